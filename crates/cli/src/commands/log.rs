// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `stagekit log` - human-readable tree of the saved workflow.

use anyhow::Result;
use stagekit_core::StageRecord;
use stagekit_storage::load_roots;

pub fn run() -> Result<()> {
    let roots = load_roots(&stagekit_config::workspace_dir())?;
    if roots.is_empty() {
        println!("no saved workflow in this workspace");
        return Ok(());
    }
    for root in &roots {
        print!("{}", render(root, 0));
    }
    Ok(())
}

/// Render one stage and the children of its current version, numbered
/// and indented.
fn render(record: &StageRecord, indent: usize) -> String {
    let mut out = String::new();
    out.push_str(&display_name(record));
    if !record.done {
        out.push_str(match &record.error {
            Some(_) => "  [failed]",
            None => "  [incomplete]",
        });
    }
    out.push('\n');

    let children: Vec<&StageRecord> = record
        .history
        .iter()
        .filter(|child| child.parent_version == record.version)
        .collect();
    let width = 1 + children.len().to_string().len();

    let pad = "  ".repeat(indent);
    for (i, child) in children.iter().enumerate() {
        let tag = format!("{})", i + 1);
        out.push_str(&format!("{pad}{tag:<width$} "));
        out.push_str(&render(child, indent + 1));
    }
    out
}

/// Display name: the registered formatter when this binary has one,
/// otherwise the stored reference.
fn display_name(record: &StageRecord) -> String {
    let bag = stagekit_core::ArgBag::new(record.args.clone(), record.kwargs.clone());
    record
        .func
        .resolve()
        .and_then(|func| func.display_name(&bag))
        .unwrap_or_else(|| record.func.to_string())
}

#[cfg(test)]
#[path = "log_tests.rs"]
mod tests;
