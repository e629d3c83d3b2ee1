// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! stagekit - resumable workflow engine CLI

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{config_edit, exec, log, run};

#[derive(Parser)]
#[command(
    name = "stagekit",
    version,
    about = "Resumable hierarchical workflow engine for HPC pipelines"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a workflow (module:function, or the configured main)
    Run(run::RunArgs),
    /// Print the saved workflow tree of the current workspace
    Log,
    /// Edit local or global configuration interactively
    Config,
    /// Subprocess runner entry (spawned by the engine)
    #[command(hide = true, disable_help_flag = true)]
    Exec(exec::ExecArgs),
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let outcome: Result<()> = match cli.command {
        Some(Commands::Run(args)) => run::run(args),
        Some(Commands::Log) => log::run(),
        Some(Commands::Config) => config_edit::run(),
        Some(Commands::Exec(args)) => exec::run(args),
        None => {
            // Bare invocation lists the commands, like `help`.
            use clap::CommandFactory;
            Cli::command().print_help().map_err(Into::into)
        }
    };

    if let Err(e) = outcome {
        eprintln!("Error: {e}");
        for cause in e.chain().skip(1) {
            eprintln!("caused by: {cause}");
        }
        std::process::exit(1);
    }
}
