use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::StreamExt;
use governor::DefaultDirectRateLimiter;
use reqwest::{header, Client, Response, StatusCode};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

use crate::error::{DownloadError, FailureKind};
use crate::session::DownloadOptions;
use crate::utils::{has_jpg_extension, jpg_to_png, url_jpg_to_png};

/// Bytes at which an item of unknown length reports half progress.
const UNKNOWN_LENGTH_SCALE: f64 = 1024.0 * 1024.0;

#[derive(Debug, Clone, PartialEq)]
pub enum DownloadEvent {
    Progress {
        sequence_index: usize,
        display_name: String,
        fraction: f64,
    },
    Finished {
        sequence_index: usize,
        display_name: String,
    },
    Error {
        sequence_index: usize,
        kind: FailureKind,
        message: String,
    },
}

impl DownloadEvent {
    pub fn sequence_index(&self) -> usize {
        match self {
            DownloadEvent::Progress { sequence_index, .. }
            | DownloadEvent::Finished { sequence_index, .. }
            | DownloadEvent::Error { sequence_index, .. } => *sequence_index,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, DownloadEvent::Progress { .. })
    }
}

pub type EventSender = UnboundedSender<DownloadEvent>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitState {
    Idle,
    Requesting,
    NotFoundFallback,
    Streaming,
    Finished,
    NotFound,
    NetworkError,
    WriteError,
}

impl UnitState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            UnitState::Finished | UnitState::NotFound | UnitState::NetworkError | UnitState::WriteError
        )
    }

    fn from_failure(kind: FailureKind) -> Self {
        match kind {
            FailureKind::NotFound => UnitState::NotFound,
            FailureKind::Network => UnitState::NetworkError,
            FailureKind::Write => UnitState::WriteError,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DownloadItem {
    pub source_url: String,
    pub target_filename: String,
    pub display_name: String,
    pub sequence_index: usize,
    pub expected_byte_length: Option<u64>,
    pub bytes_transferred: u64,
}

impl DownloadItem {
    pub fn new(
        source_url: impl Into<String>,
        target_filename: impl Into<String>,
        display_name: impl Into<String>,
        sequence_index: usize,
    ) -> Self {
        Self {
            source_url: source_url.into(),
            target_filename: target_filename.into(),
            display_name: display_name.into(),
            sequence_index,
            expected_byte_length: None,
            bytes_transferred: 0,
        }
    }

    /// Share of the transfer completed so far. Without a known length the
    /// value grows with every byte but stays below 1.0.
    pub fn fraction(&self) -> f64 {
        let done = self.bytes_transferred as f64;
        match self.expected_byte_length {
            Some(total) if total > 0 => (done / total as f64).min(1.0),
            _ => done / (done + UNKNOWN_LENGTH_SCALE),
        }
    }

    fn switch_to_png(&mut self) {
        self.source_url = url_jpg_to_png(&self.source_url);
        self.target_filename = jpg_to_png(&self.target_filename);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DownloadOutcome {
    pub item: DownloadItem,
    pub state: UnitState,
    pub history: Vec<UnitState>,
}

/// Drives one item from request to exactly one terminal state.
pub struct DownloadUnit {
    client: Client,
    options: Arc<DownloadOptions>,
    rate_limiter: Option<Arc<DefaultDirectRateLimiter>>,
    events: EventSender,
    item: DownloadItem,
    history: Vec<UnitState>,
    fallback_used: bool,
    last_fraction: f64,
}

impl DownloadUnit {
    pub fn new(
        client: Client,
        options: Arc<DownloadOptions>,
        rate_limiter: Option<Arc<DefaultDirectRateLimiter>>,
        events: EventSender,
        item: DownloadItem,
    ) -> Self {
        Self {
            client,
            options,
            rate_limiter,
            events,
            item,
            history: vec![UnitState::Idle],
            fallback_used: false,
            last_fraction: 0.0,
        }
    }

    pub fn state(&self) -> UnitState {
        *self.history.last().unwrap_or(&UnitState::Idle)
    }

    pub async fn run(mut self) -> DownloadOutcome {
        let result = self.drive().await;
        self.conclude(result)
    }

    async fn drive(&mut self) -> Result<(), DownloadError> {
        loop {
            self.transition(UnitState::Requesting);
            let response = self.request().await?;
            let status = response.status();

            if status == StatusCode::NOT_FOUND {
                if !self.fallback_used && has_jpg_extension(&self.item.source_url) {
                    self.transition(UnitState::NotFoundFallback);
                    self.fallback_used = true;
                    self.item.switch_to_png();
                    continue;
                }
                return Err(DownloadError::NotFound { url: self.item.source_url.clone() });
            }

            if !status.is_success() {
                return Err(DownloadError::HttpStatus {
                    url: self.item.source_url.clone(),
                    status: status.as_u16(),
                });
            }

            self.transition(UnitState::Streaming);
            return self.stream(response).await;
        }
    }

    async fn request(&self) -> Result<Response, DownloadError> {
        debug!(index = self.item.sequence_index, url = %self.item.source_url, "requesting");
        self.client
            .get(&self.item.source_url)
            .header(header::REFERER, &self.options.headers.referer)
            .header(header::COOKIE, &self.options.headers.cookie)
            .send()
            .await
            .map_err(|source| DownloadError::Network { url: self.item.source_url.clone(), source })
    }

    async fn stream(&mut self, response: Response) -> Result<(), DownloadError> {
        let dir = &self.options.destination_directory;
        fs::create_dir_all(dir).await.map_err(DownloadError::io(dir))?;

        let filepath = dir.join(&self.item.target_filename);
        let part_filepath = part_path(&filepath);

        self.item.expected_byte_length = response.content_length();

        let result = self.write_body(response, &part_filepath).await;
        if result.is_err() {
            let _ = fs::remove_file(&part_filepath).await;
            return result;
        }

        if let Err(e) = fs::rename(&part_filepath, &filepath).await {
            let _ = fs::remove_file(&part_filepath).await;
            return Err(DownloadError::io(&filepath)(e));
        }
        if self.last_fraction < 1.0 {
            self.emit_progress(1.0);
        }
        Ok(())
    }

    async fn write_body(&mut self, response: Response, part_filepath: &Path) -> Result<(), DownloadError> {
        let mut file = File::create(part_filepath)
            .await
            .map_err(DownloadError::io(part_filepath))?;
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|source| DownloadError::Network {
                url: self.item.source_url.clone(),
                source,
            })?;
            if chunk.is_empty() {
                continue;
            }

            if let Some(limiter) = &self.rate_limiter {
                throttle(limiter, chunk.len()).await;
            }

            file.write_all(&chunk).await.map_err(DownloadError::io(part_filepath))?;
            self.item.bytes_transferred += chunk.len() as u64;
            self.emit_progress(self.item.fraction());
        }

        file.flush().await.map_err(DownloadError::io(part_filepath))?;
        file.sync_all().await.map_err(DownloadError::io(part_filepath))?;
        Ok(())
    }

    fn transition(&mut self, next: UnitState) {
        debug!(
            index = self.item.sequence_index,
            from = ?self.state(),
            to = ?next,
            "state transition"
        );
        self.history.push(next);
    }

    // Unbounded send: never waits on the consumer, and a dropped receiver is ignored.
    fn emit_progress(&mut self, fraction: f64) {
        let fraction = fraction.clamp(0.0, 1.0).max(self.last_fraction);
        self.last_fraction = fraction;
        let _ = self.events.send(DownloadEvent::Progress {
            sequence_index: self.item.sequence_index,
            display_name: self.item.display_name.clone(),
            fraction,
        });
    }

    fn conclude(mut self, result: Result<(), DownloadError>) -> DownloadOutcome {
        let event = match result {
            Ok(()) => {
                self.transition(UnitState::Finished);
                DownloadEvent::Finished {
                    sequence_index: self.item.sequence_index,
                    display_name: self.item.display_name.clone(),
                }
            }
            Err(err) => {
                let kind = err.kind();
                warn!(index = self.item.sequence_index, error = %err, "download failed");
                self.transition(UnitState::from_failure(kind));
                DownloadEvent::Error {
                    sequence_index: self.item.sequence_index,
                    kind,
                    message: err.to_string(),
                }
            }
        };
        let _ = self.events.send(event);

        DownloadOutcome {
            state: self.state(),
            item: self.item,
            history: self.history,
        }
    }
}

fn part_path(filepath: &Path) -> PathBuf {
    let mut part_filepath = filepath.to_path_buf();
    if let Some(extension) = filepath.extension() {
        let mut ext = extension.to_os_string();
        ext.push(".part");
        part_filepath.set_extension(ext);
    } else {
        part_filepath.set_extension("part");
    }
    part_filepath
}

// Waits in burst-sized slices so chunks larger than the quota never fail.
async fn throttle(limiter: &DefaultDirectRateLimiter, len: usize) {
    let mut remaining = len as u32;
    while let Some(n) = NonZeroU32::new(remaining) {
        match limiter.until_n_ready(n).await {
            Ok(()) => return,
            Err(insufficient) => {
                let burst = NonZeroU32::new(insufficient.0).unwrap_or(NonZeroU32::MIN);
                if limiter.until_n_ready(burst).await.is_err() {
                    return;
                }
                remaining = remaining.saturating_sub(burst.get());
            }
        }
    }
}
