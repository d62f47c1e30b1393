use anyhow::{Context, Result};
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::info;

use crate::cache::ThumbnailCache;
use crate::cli::Resolution;
use crate::downloader::{DownloadEvent, DownloadOutcome, UnitState};
use crate::error::ListingError;
use crate::orchestrator::{DownloadOrchestrator, ItemDescriptor, JobLimits};
use crate::providers::PixivSource;
use crate::rewrite::to_original;
use crate::session::Session;
use crate::state::ThumbnailCacheEntry;

const BAR_SCALE: u64 = 1000;

/// One listed work as handed to a download job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobEntry {
    pub source_url: String,
    pub display_name: String,
    pub selected: bool,
    pub sequence_index: usize,
}

/// Marks entries whose index is in `select`; an empty selection takes everything.
pub fn job_entries(entry: &ThumbnailCacheEntry, select: &[usize]) -> Vec<JobEntry> {
    entry
        .items
        .iter()
        .enumerate()
        .map(|(i, item)| JobEntry {
            source_url: item.source_url.clone(),
            display_name: item.display_name.clone(),
            selected: select.is_empty() || select.contains(&i),
            sequence_index: i,
        })
        .collect()
}

/// Turns the selected entries into job descriptors, pointing at originals when asked.
pub fn prepare_descriptors(entries: Vec<JobEntry>, resolution: Resolution) -> Vec<ItemDescriptor> {
    entries
        .into_iter()
        .filter(|e| e.selected)
        .map(|e| ItemDescriptor {
            source_url: match resolution {
                Resolution::Original => to_original(&e.source_url),
                Resolution::Thumbnail => e.source_url,
            },
            display_name: e.display_name,
            sequence_index: e.sequence_index,
        })
        .collect()
}

pub fn job_directory(destination_root: &Path, author_id: &str, resolution: Resolution) -> PathBuf {
    let dir = destination_root.join(author_id);
    match resolution {
        Resolution::Original => dir,
        Resolution::Thumbnail => dir.join("thumbnail"),
    }
}

pub async fn get_thumbnails(
    session: &Session,
    cache_root: PathBuf,
    author_id: &str,
    force_refresh: bool,
) -> Result<ThumbnailCacheEntry, ListingError> {
    let cache = ThumbnailCache::new(cache_root, PixivSource::new(session)?);
    cache.get(author_id, force_refresh).await
}

pub fn print_thumbnails(entry: &ThumbnailCacheEntry) {
    if entry.items.is_empty() {
        println!("Author {} has no works (or does not exist).", entry.author_id);
        return;
    }

    println!(
        "Author {} | {} works | listed {}",
        entry.author_id,
        entry.items.len(),
        entry.fetched_at.format("%Y-%m-%d %H:%M")
    );
    println!();
    println!("{:<6} {:<12} {:<6} {:<40}", "Index", "Illust", "Pages", "Title");
    println!("{:-<6} {:-<12} {:-<6} {:-<40}", "", "", "", "");
    for (i, item) in entry.items.iter().enumerate() {
        println!("{:<6} {:<12} {:<6} {:<40}", i, item.illust_id, item.page_count, item.display_name);
    }
}

pub async fn start_download_job(
    session: &Session,
    author_id: &str,
    entries: Vec<JobEntry>,
    destination_root: PathBuf,
    resolution: Resolution,
    limits: JobLimits,
) -> Result<Vec<DownloadOutcome>> {
    let descriptors = prepare_descriptors(entries, resolution);
    if descriptors.is_empty() {
        println!("Nothing selected.");
        return Ok(vec![]);
    }

    let destination = job_directory(&destination_root, author_id, resolution);
    let options = session.download_options(destination.clone());
    let (tx, mut rx) = mpsc::unbounded_channel();
    let orchestrator = DownloadOrchestrator::new(options, limits, tx).context("Failed to set up download job")?;

    let multi_progress = MultiProgress::new();
    multi_progress.set_draw_target(ProgressDrawTarget::stderr_with_hz(5));
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {percent:>3}% {msg}")
        .context("Invalid progress template")?
        .progress_chars("=>-");
    let mut bars: HashMap<usize, (ProgressBar, String)> = HashMap::new();
    for d in &descriptors {
        let pb = multi_progress.add(ProgressBar::new(BAR_SCALE));
        pb.set_style(style.clone());
        pb.set_message(format!("Downloading {}", d.display_name));
        bars.insert(d.sequence_index, (pb, d.display_name.clone()));
    }

    info!(author_id, items = descriptors.len(), destination = %destination.display(), "download job submitted");
    let job = tokio::spawn(async move { orchestrator.run(descriptors).await });

    while let Some(event) = rx.recv().await {
        let Some((pb, name)) = bars.get(&event.sequence_index()) else {
            continue;
        };
        match event {
            DownloadEvent::Progress { fraction, .. } => {
                pb.set_position((fraction * BAR_SCALE as f64) as u64);
            }
            DownloadEvent::Finished { .. } => {
                pb.finish_with_message(format!("Completed   {}", name));
            }
            DownloadEvent::Error { kind, message, .. } => {
                pb.abandon_with_message(format!("Failed      {} ({}): {}", name, kind, message));
            }
        }
    }

    let outcomes = job.await.context("Download job panicked")?;
    let finished = outcomes.iter().filter(|o| o.state == UnitState::Finished).count();
    println!(
        "Summary: Files: {}/{} | Saved to {}",
        finished,
        outcomes.len(),
        destination.display()
    );
    Ok(outcomes)
}
