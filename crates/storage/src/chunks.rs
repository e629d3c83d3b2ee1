// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Filesystem backend for payload chunks.
//!
//! Chunk `i` lives in `data#<i>.bin` as zstd-compressed JSON holding the
//! ordered value list and the recorded byte total.

use serde::{Deserialize, Serialize};
use stagekit_core::payload::{ChunkIo, PayloadError};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

// zstd level 3 is a good balance of speed and compression
const COMPRESSION_LEVEL: i32 = 3;

#[derive(Serialize, Deserialize)]
struct ChunkFile {
    values: Vec<Vec<u8>>,
    nbytes: u64,
}

/// Payload chunk I/O rooted at a workspace directory.
#[derive(Debug, Clone)]
pub struct FsChunkIo {
    dir: PathBuf,
}

impl FsChunkIo {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn chunk_path(&self, index: u32) -> PathBuf {
        self.dir.join(format!("data#{index}.bin"))
    }
}

impl ChunkIo for FsChunkIo {
    fn load(&self, index: u32) -> Result<(Vec<Arc<Vec<u8>>>, u64), PayloadError> {
        let file = File::open(self.chunk_path(index))?;
        let decoder = zstd::stream::read::Decoder::new(file)
            .map_err(|e| PayloadError::Codec(e.to_string()))?;
        let chunk: ChunkFile =
            serde_json::from_reader(decoder).map_err(|e| PayloadError::Codec(e.to_string()))?;
        Ok((chunk.values.into_iter().map(Arc::new).collect(), chunk.nbytes))
    }

    fn save(&self, index: u32, values: &[Arc<Vec<u8>>], nbytes: u64) -> Result<(), PayloadError> {
        fs::create_dir_all(&self.dir)?;
        let chunk = ChunkFile {
            values: values.iter().map(|v| v.as_ref().clone()).collect(),
            nbytes,
        };
        let json = serde_json::to_vec(&chunk).map_err(|e| PayloadError::Codec(e.to_string()))?;
        let compressed = zstd::encode_all(json.as_slice(), COMPRESSION_LEVEL)
            .map_err(|e| PayloadError::Codec(e.to_string()))?;

        // Write-then-rename so readers never observe a partial chunk.
        let path = self.chunk_path(index);
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, &compressed)?;
        fs::rename(&tmp, &path)?;

        info!(
            chunk = index,
            size_mb = format!("{:.2}", nbytes as f64 / 1024.0 / 1024.0),
            "payload chunk saved",
        );
        Ok(())
    }

    fn last_index(&self) -> Option<u32> {
        let entries = fs::read_dir(&self.dir).ok()?;
        entries
            .filter_map(|entry| {
                let name = entry.ok()?.file_name().into_string().ok()?;
                parse_chunk_index(&name)
            })
            .max()
    }
}

fn parse_chunk_index(name: &str) -> Option<u32> {
    name.strip_prefix("data#")?.strip_suffix(".bin")?.parse().ok()
}

/// Remove every payload chunk under `dir` (used by `run -r`).
pub fn remove_chunks(dir: &Path) -> std::io::Result<()> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    for entry in entries {
        let entry = entry?;
        if let Ok(name) = entry.file_name().into_string() {
            if parse_chunk_index(&name).is_some() {
                fs::remove_file(entry.path())?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "chunks_tests.rs"]
mod tests;
