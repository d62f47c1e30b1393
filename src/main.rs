mod cache;
mod cli;
mod commands;
mod downloader;
mod error;
mod orchestrator;
mod providers;
mod rewrite;
mod session;
mod state;
mod utils;

use anyhow::{bail, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::debug;

use crate::cli::Resolution;
use crate::error::ListingError;
use crate::orchestrator::JobLimits;
use crate::session::Session;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Numeric id of the author whose works to list or download
    #[arg(index = 1)]
    author_id: String,

    /// Ignore the cached listing and fetch it again
    #[arg(long)]
    refresh: bool,

    /// Download the listed works instead of only printing them
    #[arg(long)]
    download: bool,

    /// Listing indices to download, comma separated (default: all)
    #[arg(short = 's', long, value_delimiter = ',')]
    select: Vec<usize>,

    /// Which image size to download
    #[arg(long, value_enum, default_value = "original")]
    resolution: Resolution,

    /// Directory to save downloaded files (one subdirectory per author)
    #[arg(short = 'd', long = "download-dir", default_value = "downloads")]
    download_dir: PathBuf,

    /// Directory holding cached listings (defaults to the platform cache dir)
    #[arg(long = "cache-dir", env = "PIXDL_CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    /// Session cookie sent with every request (e.g. PHPSESSID=...)
    #[arg(long, env = "PIXDL_COOKIE", default_value = "", hide_env_values = true)]
    cookie: String,

    /// HTTP(S) forward proxy for all requests
    #[arg(long, env = "PIXDL_PROXY")]
    proxy: Option<String>,

    /// Maximum number of concurrent downloads (default: unbounded)
    #[arg(short = 'c', long, value_parser = clap::value_parser!(u64).range(1..))]
    concurrency: Option<u64>,

    /// Global rate limit in bytes per second (e.g., 1048576 for 1MB/s)
    #[arg(short = 'r', long)]
    rate_limit: Option<u32>,

    /// More log output (-v info, -vv debug); RUST_LOG takes precedence
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let mut args = Args::parse();
    init_tracing(args.verbose);
    debug!(author_id = %args.author_id, refresh = args.refresh, download = args.download, "arguments parsed");

    // Output dir might not exist yet, so we resolve it relative to current dir
    if args.download_dir.is_relative() {
        if let Ok(cwd) = std::env::current_dir() {
            args.download_dir = cwd.join(&args.download_dir);
        }
    }
    let cache_dir = args.cache_dir.clone().unwrap_or_else(default_cache_dir);

    let session = Session::new(args.cookie.clone(), args.proxy.clone());
    let limits = JobLimits {
        concurrency: args.concurrency.map(|n| n as usize),
        rate_limit: args.rate_limit,
    };

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let listing = match crate::commands::get_thumbnails(&session, cache_dir, &args.author_id, args.refresh).await {
            Ok(listing) => listing,
            Err(ListingError::SessionExpired) => {
                bail!("Session expired: log in again and pass the new cookie via --cookie or PIXDL_COOKIE");
            }
            Err(e) => return Err(anyhow::Error::from(e)),
        };

        if !args.download {
            crate::commands::print_thumbnails(&listing);
            return Ok(());
        }

        if let Some(bad) = args.select.iter().find(|i| **i >= listing.items.len()) {
            bail!("Index {} is out of range, the listing has {} works", bad, listing.items.len());
        }

        let entries = crate::commands::job_entries(&listing, &args.select);
        crate::commands::start_download_job(
            &session,
            &args.author_id,
            entries,
            args.download_dir.clone(),
            args.resolution,
            limits,
        )
        .await?;
        Ok(())
    })
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .map(|dir| dir.join("pixdl"))
        .unwrap_or_else(|| PathBuf::from(".cache"))
}
