// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `stagekit config` - interactive editor for the layered config files.

use anyhow::{Context, Result};
use std::io::{BufRead, Write};
use std::path::Path;

pub fn run() -> Result<()> {
    let stdin = std::io::stdin();
    let mut input = stdin.lock();
    let mut output = std::io::stdout();
    edit(&mut input, &mut output)
}

/// Drive the editor over explicit streams (testable).
fn edit(input: &mut impl BufRead, output: &mut impl Write) -> Result<()> {
    let choice = select(
        input,
        output,
        "Choose whether you want to change local or global configuration:",
        &[
            "Local configuration (for current workspace).",
            "Global configuration (for all workspaces of current user).",
        ],
    )?;
    let (path, env) = match choice {
        Some(1) => (stagekit_config::local_path(), stagekit_config::ENV_LOCAL),
        Some(2) => (stagekit_config::global_path(), stagekit_config::ENV_GLOBAL),
        _ => return Ok(()),
    };

    writeln!(output, "Editing `{}`.", path.display())?;
    writeln!(
        output,
        "Press Enter to confirm, or type any character to cancel (set {env} to change the location)."
    )?;
    let mut line = String::new();
    input.read_line(&mut line)?;
    if !line.trim().is_empty() {
        return Ok(());
    }

    writeln!(
        output,
        "Enter TOML lines to merge into the file; finish with an empty line:"
    )?;
    let mut fragment = String::new();
    loop {
        let mut line = String::new();
        if input.read_line(&mut line)? == 0 || line.trim().is_empty() {
            break;
        }
        fragment.push_str(&line);
    }
    if fragment.trim().is_empty() {
        writeln!(output, "Nothing to change.")?;
        return Ok(());
    }
    merge_into_file(&path, &fragment)?;
    writeln!(output, "Updated `{}`.", path.display())?;
    Ok(())
}

/// Validate the fragment and append it to the config file.
fn merge_into_file(path: &Path, fragment: &str) -> Result<()> {
    // Parse first so a typo cannot corrupt the file.
    let _: toml::Table = toml::from_str(fragment)
        .with_context(|| "invalid TOML fragment".to_string())?;
    let mut content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e.into()),
    };
    if !content.is_empty() && !content.ends_with('\n') {
        content.push('\n');
    }
    content.push_str(fragment);
    // The merged result must still parse as a whole.
    let _: toml::Table = toml::from_str(&content)
        .with_context(|| "fragment conflicts with existing configuration".to_string())?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content)?;
    Ok(())
}

/// Numbered selection menu; `None` means the exit entry was chosen.
fn select(
    input: &mut impl BufRead,
    output: &mut impl Write,
    prompt: &str,
    items: &[&str],
) -> Result<Option<usize>> {
    writeln!(output, "{prompt}")?;
    for (i, item) in items.iter().enumerate() {
        writeln!(output, "{}) {item}", i + 1)?;
    }
    writeln!(output, "{}) Exit.", items.len() + 1)?;

    loop {
        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        match line.trim().parse::<usize>() {
            Ok(n) if n == items.len() + 1 => return Ok(None),
            Ok(n) if n >= 1 && n <= items.len() => return Ok(Some(n)),
            _ => writeln!(output, "Please input a number between 1 and {}", items.len() + 1)?,
        }
    }
}

#[cfg(test)]
#[path = "config_edit_tests.rs"]
mod tests;
