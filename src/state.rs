use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// On-disk listing of one author's works, newest first.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ThumbnailCacheEntry {
    pub author_id: String,
    pub fetched_at: DateTime<Utc>,
    pub items: Vec<ThumbnailItem>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ThumbnailItem {
    pub source_url: String,
    pub display_name: String,
    #[serde(default)]
    pub illust_id: String,
    #[serde(default = "default_page_count")]
    pub page_count: u32,
}

fn default_page_count() -> u32 {
    1
}
