use std::path::PathBuf;

use reqwest::{Client, Proxy};

pub const PIXIV_HOST: &str = "https://www.pixiv.net/";

const USER_AGENT: &str = "pixdl/0.1.0";

/// Credentials and network settings for one invocation. Passed explicitly to
/// whatever needs them rather than living in a global.
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub cookie: String,
    pub proxy: Option<String>,
}

impl Session {
    pub fn new(cookie: impl Into<String>, proxy: Option<String>) -> Self {
        Self {
            cookie: cookie.into(),
            proxy: proxy.filter(|p| !p.trim().is_empty()),
        }
    }

    pub fn headers(&self) -> RequestHeaders {
        RequestHeaders {
            referer: PIXIV_HOST.to_string(),
            cookie: self.cookie.clone(),
        }
    }

    pub fn download_options(&self, destination_directory: PathBuf) -> DownloadOptions {
        DownloadOptions {
            destination_directory,
            headers: self.headers(),
            proxy: self.proxy.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHeaders {
    pub referer: String,
    pub cookie: String,
}

/// Shared, read-only settings of one download job.
#[derive(Debug, Clone)]
pub struct DownloadOptions {
    pub destination_directory: PathBuf,
    pub headers: RequestHeaders,
    pub proxy: Option<String>,
}

/// Builds a client that tunnels through `proxy` when one is set. No request
/// timeout is configured; callers run until the transfer ends.
pub fn build_client(proxy: Option<&str>) -> reqwest::Result<Client> {
    let mut builder = Client::builder().user_agent(USER_AGENT);
    if let Some(proxy) = proxy {
        builder = builder.proxy(Proxy::all(proxy)?);
    }
    builder.build()
}
