// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Hidden `stagekit exec <workspace> <base> [-mp <n>]` runner.
//!
//! This is the wire format the supervisor writes into launch commands;
//! the trailing arguments are parsed by hand so the flag survives
//! unchanged.

use anyhow::{bail, Result};
use clap::Args;

#[derive(Args)]
pub struct ExecArgs {
    /// `<workspace> <base> [-mp <n>]`
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub rest: Vec<String>,
}

pub fn run(args: ExecArgs) -> Result<()> {
    let (workspace, base, mp) = parse(&args.rest)?;
    stagekit_engine::subproc::run_exec(std::path::Path::new(&workspace), &base, mp)?;
    Ok(())
}

fn parse(rest: &[String]) -> Result<(String, String, Option<u64>)> {
    let (workspace, base) = match (rest.first(), rest.get(1)) {
        (Some(ws), Some(base)) => (ws.clone(), base.clone()),
        _ => bail!("usage: stagekit exec <workspace> <base> [-mp <n>]"),
    };
    let mp = match rest.get(2).map(String::as_str) {
        Some("-mp") => match rest.get(3).and_then(|n| n.parse::<u64>().ok()) {
            Some(n) if n > 0 => Some(n),
            _ => bail!("-mp requires a positive process count"),
        },
        Some(other) => bail!("unexpected argument `{other}`"),
        None => None,
    };
    Ok((workspace, base, mp))
}

#[cfg(test)]
#[path = "exec_tests.rs"]
mod tests;
