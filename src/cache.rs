use std::path::{Path, PathBuf};

use chrono::Utc;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::error::ListingError;
use crate::providers::ListingSource;
use crate::state::ThumbnailCacheEntry;

const DOCUMENT_NAME: &str = "thumbnail.json";

/// Read-through cache of author listings, one JSON document per author.
pub struct ThumbnailCache<S> {
    root: PathBuf,
    source: S,
}

impl<S: ListingSource> ThumbnailCache<S> {
    pub fn new(root: impl Into<PathBuf>, source: S) -> Self {
        Self { root: root.into(), source }
    }

    pub fn document_path(&self, author_id: &str) -> PathBuf {
        self.root.join(author_id).join(DOCUMENT_NAME)
    }

    /// Returns the cached listing, or fetches and stores a fresh one when
    /// nothing usable is on disk or `force_refresh` is set. An empty cached
    /// listing counts as nothing usable.
    pub async fn get(&self, author_id: &str, force_refresh: bool) -> Result<ThumbnailCacheEntry, ListingError> {
        validate_author_id(author_id)?;
        let document = self.document_path(author_id);

        if !force_refresh {
            if let Some(entry) = read_document(&document).await.filter(|e| !e.items.is_empty()) {
                debug!(author_id, items = entry.items.len(), "listing served from cache");
                return Ok(entry);
            }
        }

        let items = self.source.fetch_listing(author_id).await?;
        let entry = ThumbnailCacheEntry {
            author_id: author_id.to_string(),
            fetched_at: Utc::now(),
            items,
        };
        write_document(&document, &entry).await?;
        info!(author_id, items = entry.items.len(), path = %document.display(), "listing cached");
        Ok(entry)
    }
}

fn validate_author_id(author_id: &str) -> Result<(), ListingError> {
    if author_id.is_empty() || !author_id.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ListingError::InvalidAuthorId(author_id.to_string()));
    }
    Ok(())
}

async fn read_document(path: &Path) -> Option<ThumbnailCacheEntry> {
    let content = fs::read_to_string(path).await.ok()?;
    match serde_json::from_str(&content) {
        Ok(entry) => Some(entry),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "ignoring unreadable cache document");
            None
        }
    }
}

// Whole-document replace: written beside the target, then renamed over it.
async fn write_document(path: &Path, entry: &ThumbnailCacheEntry) -> Result<(), ListingError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await.map_err(ListingError::io(parent))?;
    }
    let tmp_path = path.with_extension(format!("json.{}.tmp", uuid::Uuid::new_v4()));
    let content = serde_json::to_string_pretty(entry)?;
    fs::write(&tmp_path, content).await.map_err(ListingError::io(&tmp_path))?;
    if let Err(e) = fs::rename(&tmp_path, path).await {
        let _ = fs::remove_file(&tmp_path).await;
        return Err(ListingError::io(path)(e));
    }
    Ok(())
}
