use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;
use url::Url;

use super::ListingSource;
use crate::error::ListingError;
use crate::session::{build_client, RequestHeaders, Session};
use crate::state::ThumbnailItem;

const DEFAULT_BASE_URL: &str = "https://www.pixiv.net";
const LOGIN_HOST: &str = "accounts.pixiv.net";
// The site's own pager asks for this many works per request.
const BATCH_SIZE: usize = 48;

#[derive(Deserialize)]
struct AjaxResponse {
    error: bool,
    #[serde(default)]
    message: String,
    #[serde(default)]
    body: Value,
}

#[derive(Deserialize)]
struct ProfileAll {
    #[serde(default)]
    illusts: Value,
    #[serde(default)]
    manga: Value,
}

#[derive(Deserialize)]
struct ProfileWorks {
    #[serde(default)]
    works: Value,
}

#[derive(Deserialize)]
struct Work {
    id: String,
    #[serde(default)]
    title: String,
    url: String,
    #[serde(rename = "pageCount", default = "one")]
    page_count: u32,
}

fn one() -> u32 {
    1
}

/// Reads an author's works through the pixiv web AJAX endpoints.
pub struct PixivSource {
    client: Client,
    headers: RequestHeaders,
    base_url: String,
}

impl PixivSource {
    pub fn new(session: &Session) -> Result<Self, ListingError> {
        let client = build_client(session.proxy.as_deref()).map_err(|source| ListingError::InvalidProxy {
            proxy: session.proxy.clone().unwrap_or_default(),
            source,
        })?;
        Ok(Self {
            client,
            headers: session.headers(),
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T, ListingError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(%url, "fetching listing page");
        let resp = self
            .client
            .get(&url)
            .query(query)
            .header(header::REFERER, &self.headers.referer)
            .header(header::COOKIE, &self.headers.cookie)
            .send()
            .await?;

        if is_login_page(resp.url()) || resp.status() == StatusCode::UNAUTHORIZED {
            return Err(ListingError::SessionExpired);
        }
        if !resp.status().is_success() {
            return Err(ListingError::HttpStatus { url, status: resp.status().as_u16() });
        }

        let body = resp.text().await?;
        let parsed: AjaxResponse = serde_json::from_str(&body)?;
        if parsed.error {
            return Err(ListingError::Api(parsed.message));
        }
        Ok(serde_json::from_value(parsed.body)?)
    }
}

#[async_trait]
impl ListingSource for PixivSource {
    async fn fetch_listing(&self, author_id: &str) -> Result<Vec<ThumbnailItem>, ListingError> {
        let profile: ProfileAll = self
            .get(&format!("/ajax/user/{author_id}/profile/all"), &[])
            .await?;

        let mut ids: Vec<u64> = object_keys(&profile.illusts)
            .chain(object_keys(&profile.manga))
            .filter_map(|id| id.parse().ok())
            .collect();
        ids.sort_unstable_by(|a, b| b.cmp(a));
        ids.dedup();

        let mut items = Vec::with_capacity(ids.len());
        for batch in ids.chunks(BATCH_SIZE) {
            let mut query: Vec<(&str, String)> = batch.iter().map(|id| ("ids[]", id.to_string())).collect();
            query.push(("work_category", "illustManga".to_string()));
            query.push(("is_first_page", "0".to_string()));

            let page: ProfileWorks = self
                .get(&format!("/ajax/user/{author_id}/profile/illusts"), &query)
                .await?;
            let mut works: HashMap<String, Work> = match page.works {
                Value::Object(_) => serde_json::from_value(page.works)?,
                _ => HashMap::new(),
            };

            // Keep newest-first order; ids the API no longer returns are skipped.
            for id in batch {
                if let Some(work) = works.remove(&id.to_string()) {
                    items.push(ThumbnailItem {
                        source_url: work.url,
                        display_name: work.title,
                        illust_id: work.id,
                        page_count: work.page_count,
                    });
                }
            }
        }

        debug!(author_id, count = items.len(), "listing fetched");
        Ok(items)
    }
}

// Empty collections come back as `[]` rather than `{}`.
fn object_keys(value: &Value) -> impl Iterator<Item = &String> {
    value.as_object().into_iter().flat_map(|map| map.keys())
}

fn is_login_page(url: &Url) -> bool {
    url.host_str() == Some(LOGIN_HOST) || url.path().starts_with("/login")
}
