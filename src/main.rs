mod cli;
mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use crate::cli::{Cli, Command};
use prdl::Workspace;

fn main() {
    let cli = Cli::parse();
    prdl::logging::init(cli.verbose);

    if let Err(err) = run(cli) {
        eprintln!("Error: {:#}", err);
        std::process::exit(1);
    }
}

fn workspace(data_dir: Option<PathBuf>) -> prdl::Result<Workspace> {
    match data_dir {
        Some(dir) => Ok(Workspace::new(dir)),
        None => Workspace::from_home(),
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Version => {
            commands::print_version();
            Ok(())
        }
        Command::Status => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(commands::list_saved_downloads(&workspace(cli.data_dir)?))
        }
        Command::Download(args) => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(commands::run_download(args, workspace(cli.data_dir)?))
        }
    }
}
