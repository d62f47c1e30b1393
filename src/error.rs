use std::path::PathBuf;

use thiserror::Error;

/// Which terminal failure an item ended in. Carried by error events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    NotFound,
    Network,
    Write,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            FailureKind::NotFound => "not found",
            FailureKind::Network => "network error",
            FailureKind::Write => "write error",
        };
        f.write_str(label)
    }
}

/// Errors raised while driving a single download.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("network error downloading {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP {status} downloading {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("not found: {url}")]
    NotFound { url: String },

    #[error("IO error writing to {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid proxy address {proxy}: {source}")]
    InvalidProxy {
        proxy: String,
        #[source]
        source: reqwest::Error,
    },
}

impl DownloadError {
    pub fn kind(&self) -> FailureKind {
        match self {
            DownloadError::NotFound { .. } => FailureKind::NotFound,
            DownloadError::Io { .. } => FailureKind::Write,
            DownloadError::Network { .. }
            | DownloadError::HttpStatus { .. }
            | DownloadError::InvalidProxy { .. } => FailureKind::Network,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| DownloadError::Io { path, source }
    }
}

/// Errors raised while obtaining an author's thumbnail listing.
#[derive(Debug, Error)]
pub enum ListingError {
    /// The listing request landed on the login page; the cookie needs renewing.
    #[error("session expired, log in again and update the cookie")]
    SessionExpired,

    #[error("invalid author id {0:?}, expected a numeric id")]
    InvalidAuthorId(String),

    #[error("network error fetching listing: {0}")]
    Network(#[from] reqwest::Error),

    #[error("HTTP {status} fetching {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("listing API returned an error: {0}")]
    Api(String),

    #[error("malformed listing document: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid proxy address {proxy}: {source}")]
    InvalidProxy {
        proxy: String,
        #[source]
        source: reqwest::Error,
    },
}

impl ListingError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| ListingError::Io { path, source }
    }
}
