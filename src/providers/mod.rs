pub mod pixiv;

use async_trait::async_trait;

use crate::error::ListingError;
use crate::state::ThumbnailItem;

pub use pixiv::PixivSource;

/// Somewhere an author's current list of works can be fetched from.
#[async_trait]
pub trait ListingSource: Send + Sync {
    async fn fetch_listing(&self, author_id: &str) -> Result<Vec<ThumbnailItem>, ListingError>;
}
