use anyhow::{Context, Result};
use indicatif::HumanBytes;
use tokio::fs;

use prdl::progress::Progress;
use prdl::state::list_saved;
use prdl::{Downloader, Profile, RunOutcome, Termination, TransportConfig, Workspace};

use crate::cli::DownloadArgs;

pub async fn run_download(args: DownloadArgs, workspace: Workspace) -> Result<()> {
    if !args.output_dir.exists() {
        fs::create_dir_all(&args.output_dir)
            .await
            .context("Failed to create output directory")?;
    }

    let concurrency = args
        .concurrency
        .map(|c| c as usize)
        .unwrap_or_else(num_cpus::get);
    let transport = TransportConfig {
        skip_tls_verify: !args.verify_tls,
        profile: if args.netdisk {
            Profile::Netdisk
        } else {
            Profile::Default
        },
    };

    let downloader = Downloader::new(workspace, transport, args.output_dir.clone())
        .with_progress(Progress::for_terminal())
        .with_rate_limit(args.rate_limit)
        .with_expected_sha256(args.sha256.clone());

    // Registered before any segment starts.
    let termination = Termination::install();
    let outcome = downloader
        .start(
            &args.url,
            concurrency,
            args.output.as_deref(),
            args.fresh,
            termination.requested(),
        )
        .await
        .with_context(|| format!("Failed to download {}", args.url))?;

    match outcome {
        RunOutcome::Merged { path, sha256 } => {
            println!("Completed   {}", path.display());
            if let Some(hash) = sha256 {
                println!("Verified    SHA256: {}", hash);
            }
        }
        RunOutcome::Saved { state_dir, remaining } => {
            println!(
                "Download interrupted, saved {} unfinished part(s) in {}",
                remaining,
                state_dir.display()
            );
            println!("Run the same command again to resume.");
        }
        RunOutcome::Discarded => {
            println!("Download interrupted, but the server does not support resuming; progress discarded.");
        }
    }
    Ok(())
}

pub async fn list_saved_downloads(workspace: &Workspace) -> Result<()> {
    let states = list_saved(&workspace.state_root())
        .await
        .context("Failed to read saved downloads")?;

    if states.is_empty() {
        println!("No saved downloads in '{}'.", workspace.root().display());
        return Ok(());
    }

    println!("{:<40} {:<10} {:<15} {:<20}", "Filename", "Parts", "Remaining", "Saved");
    println!("{:-<40} {:-<10} {:-<15} {:-<20}", "", "", "", "");
    for state in &states {
        let remaining = state
            .remaining_bytes()
            .map(|b| HumanBytes(b).to_string())
            .unwrap_or_else(|| "unknown".to_string());
        println!(
            "{:<40} {:<10} {:<15} {:<20}",
            prdl::utils::display_name(&state.output_name),
            state.remaining.len(),
            remaining,
            state.saved_at.format("%Y-%m-%d %H:%M")
        );
        println!("  {}", state.url);
    }
    Ok(())
}

pub fn print_version() {
    println!("Version: {}", env!("CARGO_PKG_VERSION"));
    println!("Commit:  {}", option_env!("PRDL_COMMIT").unwrap_or("unknown"));
    println!("Date:    {}", option_env!("PRDL_BUILD_DATE").unwrap_or("unknown"));
}
