// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Out-of-band payload store.
//!
//! Large values referenced from the stage tree live here as
//! `(chunk, slot) -> bytes`. Chunks roll over when the configured byte
//! budget would be exceeded and are loaded lazily on access. All file I/O
//! goes through [`ChunkIo`] so the store itself needs no disk.
//!
//! The store is process-wide and is only touched from the scheduler
//! thread; subprocess runners never write it.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};
use thiserror::Error;

/// Errors from payload interning and access.
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("payload has neither resident bytes nor a store location")]
    Unlocated,
    #[error("payload chunk {0} slot {1} not found")]
    MissingSlot(u32, u32),
    #[error("payload store has no chunk I/O configured")]
    NoIo,
    #[error("chunk I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("chunk codec failed: {0}")]
    Codec(String),
}

/// Chunk persistence boundary, abstracted for testability.
pub trait ChunkIo: Send + Sync {
    /// Read chunk `index`: ordered values plus recorded byte total.
    fn load(&self, index: u32) -> Result<(Vec<Arc<Vec<u8>>>, u64), PayloadError>;

    /// Write chunk `index`.
    fn save(&self, index: u32, values: &[Arc<Vec<u8>>], nbytes: u64) -> Result<(), PayloadError>;

    /// Highest chunk index already persisted, if any.
    fn last_index(&self) -> Option<u32>;
}

#[derive(Default)]
struct Chunk {
    values: Vec<Arc<Vec<u8>>>,
    nbytes: u64,
    loaded: bool,
}

/// Process-wide chunked byte store.
pub struct PayloadStore {
    io: Option<Arc<dyn ChunkIo>>,
    /// Rollover threshold in bytes; `None` means chunking is disabled and
    /// blob bytes stay inline in the tree.
    limit: Option<u64>,
    chunks: BTreeMap<u32, Chunk>,
    current: u32,
    dirty: bool,
}

impl PayloadStore {
    fn empty() -> Self {
        Self { io: None, limit: None, chunks: BTreeMap::new(), current: 0, dirty: false }
    }

    /// Reset the store for a workspace: chunk I/O plus the configured
    /// chunk size in megabytes (`None` disables chunking).
    pub fn configure(&mut self, io: Option<Arc<dyn ChunkIo>>, chunk_mb: Option<f64>) {
        self.current = io.as_ref().and_then(|io| io.last_index()).unwrap_or(0);
        self.io = io;
        self.limit = chunk_mb.map(|mb| (mb * 1024.0 * 1024.0) as u64);
        self.chunks = BTreeMap::new();
        self.dirty = false;
    }

    /// Whether values should be externalized at all.
    pub fn chunking_enabled(&self) -> bool {
        self.io.is_some() && self.limit.is_some()
    }

    /// Intern bytes into the current chunk, rolling over when the byte
    /// budget would be exceeded. Returns the assigned `(chunk, slot)`.
    pub fn intern(&mut self, data: &Arc<Vec<u8>>) -> Result<(u32, u32), PayloadError> {
        if !self.chunking_enabled() {
            return Err(PayloadError::NoIo);
        }
        let size = data.len() as u64;
        self.hydrate(self.current)?;

        let limit = self.limit;
        let over_budget = {
            let chunk = self.chunk_mut(self.current);
            chunk.nbytes > 0
                && limit.map(|limit| chunk.nbytes + size > limit).unwrap_or(false)
        };
        if over_budget {
            self.flush()?;
            self.current += 1;
        }

        let index = self.current;
        let chunk = self.chunk_mut(index);
        let slot = chunk.values.len() as u32;
        chunk.values.push(data.clone());
        chunk.nbytes += size;
        chunk.loaded = true;
        self.dirty = true;
        Ok((index, slot))
    }

    /// Fetch bytes at a location, lazily loading the chunk from disk.
    pub fn get(&mut self, location: (u32, u32)) -> Result<Arc<Vec<u8>>, PayloadError> {
        let (index, slot) = location;
        self.hydrate(index)?;
        self.chunks
            .get(&index)
            .and_then(|chunk| chunk.values.get(slot as usize))
            .cloned()
            .ok_or(PayloadError::MissingSlot(index, slot))
    }

    /// Persist the current chunk if it changed since the last save.
    pub fn flush(&mut self) -> Result<(), PayloadError> {
        if !self.dirty {
            return Ok(());
        }
        let io = self.io.as_ref().ok_or(PayloadError::NoIo)?.clone();
        let current = self.current;
        let chunk = self.chunk_mut(current);
        io.save(current, &chunk.values, chunk.nbytes)?;
        self.dirty = false;
        Ok(())
    }

    /// Make a chunk resident, reading it back from disk when it was
    /// written by an earlier run.
    fn hydrate(&mut self, index: u32) -> Result<(), PayloadError> {
        let needs_load = !self.chunks.get(&index).map(|c| c.loaded).unwrap_or(false);
        if !needs_load {
            return Ok(());
        }
        let io = self.io.as_ref().ok_or(PayloadError::NoIo)?.clone();
        match io.load(index) {
            Ok((values, nbytes)) => {
                self.chunks.insert(index, Chunk { values, nbytes, loaded: true });
                Ok(())
            }
            Err(PayloadError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                self.chunks.insert(index, Chunk { loaded: true, ..Chunk::default() });
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn chunk_mut(&mut self, index: u32) -> &mut Chunk {
        self.chunks.entry(index).or_default()
    }
}

/// The process-wide store.
pub fn store() -> &'static Mutex<PayloadStore> {
    static STORE: OnceLock<Mutex<PayloadStore>> = OnceLock::new();
    STORE.get_or_init(|| Mutex::new(PayloadStore::empty()))
}

/// Reconfigure the process-wide store for a workspace.
pub fn configure(io: Option<Arc<dyn ChunkIo>>, chunk_mb: Option<f64>) {
    store().lock().configure(io, chunk_mb);
}

#[cfg(test)]
#[path = "payload_tests.rs"]
mod tests;
