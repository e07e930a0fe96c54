use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Parallel, resumable HTTP file downloader.
///
/// Splits a file into byte ranges fetched concurrently. Interrupt it with
/// Ctrl+C and run the same command again to continue where it stopped.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Log per-segment activity to stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Directory for in-progress and saved downloads (default: ~/Downloads/prdl)
    #[arg(long, global = true, env = "PRDL_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Download a file, resuming a saved download of the same URL if there is one
    Download(DownloadArgs),
    /// List interrupted downloads that can be resumed
    Status,
    /// Print version information
    Version,
}

#[derive(Args, Debug)]
pub struct DownloadArgs {
    /// URL of the file to download
    pub url: String,

    /// Number of segments fetched in parallel (defaults to number of logical CPUs)
    #[arg(short = 'c', long, value_parser = clap::value_parser!(u32).range(1..))]
    pub concurrency: Option<u32>,

    /// Use the netdisk transport profile (fixed User-Agent)
    #[arg(short = 'b', long, alias = "baidu")]
    pub netdisk: bool,

    /// Name of the merged output file
    #[arg(short = 'o', long)]
    pub output: Option<String>,

    /// Directory the merged file is written to
    #[arg(short = 'd', long = "output-dir", default_value = ".")]
    pub output_dir: PathBuf,

    /// Verify TLS certificates (skipped by default)
    #[arg(long)]
    pub verify_tls: bool,

    /// Global rate limit in bytes per second (e.g., 1048576 for 1MB/s)
    #[arg(short = 'r', long)]
    pub rate_limit: Option<u32>,

    /// Expected SHA-256 of the merged file
    #[arg(long)]
    pub sha256: Option<String>,

    /// Ignore and delete saved progress for this URL
    #[arg(long)]
    pub fresh: bool,
}
