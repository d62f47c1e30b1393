use std::num::NonZeroU32;
use std::sync::Arc;

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::Client;
use tokio::sync::Semaphore;
use tracing::{error, info};

use crate::downloader::{DownloadEvent, DownloadItem, DownloadOutcome, DownloadUnit, EventSender, UnitState};
use crate::error::{DownloadError, FailureKind};
use crate::session::{build_client, DownloadOptions};
use crate::utils::{get_filename_from_url, sanitize_filename};

/// One entry of a job as the caller lists it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemDescriptor {
    pub source_url: String,
    pub display_name: String,
    pub sequence_index: usize,
}

impl ItemDescriptor {
    fn into_item(self) -> DownloadItem {
        let filename = sanitize_filename(&get_filename_from_url(&self.source_url));
        DownloadItem::new(self.source_url, filename, self.display_name, self.sequence_index)
    }
}

/// Optional throttles for a job. The default starts every item at once.
#[derive(Debug, Clone, Copy, Default)]
pub struct JobLimits {
    pub concurrency: Option<usize>,
    /// Shared bandwidth cap in bytes per second.
    pub rate_limit: Option<u32>,
}

pub struct DownloadOrchestrator {
    client: Client,
    options: Arc<DownloadOptions>,
    gate: Option<Arc<Semaphore>>,
    rate_limiter: Option<Arc<DefaultDirectRateLimiter>>,
    events: EventSender,
}

impl DownloadOrchestrator {
    pub fn new(options: DownloadOptions, limits: JobLimits, events: EventSender) -> Result<Self, DownloadError> {
        let client = build_client(options.proxy.as_deref()).map_err(|source| DownloadError::InvalidProxy {
            proxy: options.proxy.clone().unwrap_or_default(),
            source,
        })?;

        let gate = limits
            .concurrency
            .filter(|n| *n > 0)
            .map(|n| Arc::new(Semaphore::new(n.min(Semaphore::MAX_PERMITS))));

        let rate_limiter = limits
            .rate_limit
            .and_then(NonZeroU32::new)
            .map(|limit| Arc::new(RateLimiter::direct(Quota::per_second(limit))));

        Ok(Self {
            client,
            options: Arc::new(options),
            gate,
            rate_limiter,
            events,
        })
    }

    /// Runs every item to a terminal state and returns the outcomes in
    /// submission order. Individual failures never abort the job.
    pub async fn run(&self, descriptors: Vec<ItemDescriptor>) -> Vec<DownloadOutcome> {
        info!(
            items = descriptors.len(),
            destination = %self.options.destination_directory.display(),
            "starting download job"
        );

        let mut handles = Vec::with_capacity(descriptors.len());
        for descriptor in descriptors {
            let item = descriptor.into_item();
            let unit = DownloadUnit::new(
                self.client.clone(),
                self.options.clone(),
                self.rate_limiter.clone(),
                self.events.clone(),
                item.clone(),
            );
            let gate = self.gate.clone();

            let handle = tokio::spawn(async move {
                let _permit = match gate {
                    Some(gate) => gate.acquire_owned().await.ok(),
                    None => None,
                };
                unit.run().await
            });
            handles.push((item, handle));
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        for (item, handle) in handles {
            match handle.await {
                Ok(outcome) => {
                    debug_assert!(outcome.state.is_terminal());
                    outcomes.push(outcome);
                }
                Err(e) => {
                    // The unit died before reporting; report for it so the caller still sees one terminal event.
                    error!(index = item.sequence_index, error = %e, "download task aborted");
                    let _ = self.events.send(DownloadEvent::Error {
                        sequence_index: item.sequence_index,
                        kind: FailureKind::Network,
                        message: format!("download task aborted: {e}"),
                    });
                    outcomes.push(DownloadOutcome {
                        item,
                        state: UnitState::NetworkError,
                        history: vec![UnitState::Idle, UnitState::NetworkError],
                    });
                }
            }
        }

        let finished = outcomes.iter().filter(|o| o.state == UnitState::Finished).count();
        info!(finished, failed = outcomes.len() - finished, "download job complete");
        outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Session;
    use std::collections::HashMap;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;
    use tokio::sync::mpsc;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn descriptor(server: &MockServer, file: &str, index: usize) -> ItemDescriptor {
        ItemDescriptor {
            source_url: format!("{}/img/{}", server.uri(), file),
            display_name: file.to_string(),
            sequence_index: index,
        }
    }

    async fn run_job(
        descriptors: Vec<ItemDescriptor>,
        dir: &std::path::Path,
        limits: JobLimits,
    ) -> (Vec<DownloadOutcome>, Vec<DownloadEvent>) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let options = Session::new("PHPSESSID=1_abc", None).download_options(dir.to_path_buf());
        let orchestrator = DownloadOrchestrator::new(options, limits, tx).unwrap();
        let outcomes = orchestrator.run(descriptors).await;
        drop(orchestrator);

        let mut events = vec![];
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        (outcomes, events)
    }

    #[tokio::test]
    async fn test_three_items_with_fallback_on_second() {
        let server = MockServer::start().await;
        for file in ["1_p0.jpg", "3_p0.jpg"] {
            Mock::given(method("GET"))
                .and(path(format!("/img/{file}")))
                .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8; 2048]))
                .expect(1)
                .mount(&server)
                .await;
        }
        Mock::given(method("GET"))
            .and(path("/img/2_p0.jpg"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/img/2_p0.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![2u8; 1024]))
            .expect(1)
            .mount(&server)
            .await;
        let dir = TempDir::new().unwrap();
        let descriptors = vec![
            descriptor(&server, "1_p0.jpg", 0),
            descriptor(&server, "2_p0.jpg", 1),
            descriptor(&server, "3_p0.jpg", 2),
        ];

        let (outcomes, events) = run_job(descriptors, dir.path(), JobLimits::default()).await;

        assert_eq!(outcomes.len(), 3);
        assert!(outcomes.iter().all(|o| o.state == UnitState::Finished));
        assert_eq!(
            outcomes[1].history,
            vec![
                UnitState::Idle,
                UnitState::Requesting,
                UnitState::NotFoundFallback,
                UnitState::Requesting,
                UnitState::Streaming,
                UnitState::Finished,
            ]
        );
        assert!(!outcomes[0].history.contains(&UnitState::NotFoundFallback));
        assert!(dir.path().join("1_p0.jpg").exists());
        assert!(dir.path().join("2_p0.png").exists());
        assert!(dir.path().join("3_p0.jpg").exists());

        let terminals: Vec<usize> = events.iter().filter(|e| e.is_terminal()).map(|e| e.sequence_index()).collect();
        assert_eq!(terminals.len(), 3);
        let mut sorted = terminals.clone();
        sorted.sort();
        assert_eq!(sorted, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_every_item_reports_exactly_one_terminal_event() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/img/ok.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"ok".to_vec()))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/img/gone.gif"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/img/denied.png"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        let dir = TempDir::new().unwrap();
        let descriptors = vec![
            descriptor(&server, "ok.png", 10),
            descriptor(&server, "gone.gif", 11),
            descriptor(&server, "denied.png", 12),
        ];

        let (outcomes, events) = run_job(descriptors, dir.path(), JobLimits::default()).await;

        let states: Vec<UnitState> = outcomes.iter().map(|o| o.state).collect();
        assert_eq!(states, vec![UnitState::Finished, UnitState::NotFound, UnitState::NetworkError]);

        let mut terminal_counts: HashMap<usize, usize> = HashMap::new();
        for event in events.iter().filter(|e| e.is_terminal()) {
            *terminal_counts.entry(event.sequence_index()).or_default() += 1;
        }
        assert_eq!(terminal_counts, HashMap::from([(10, 1), (11, 1), (12, 1)]));
    }

    #[tokio::test]
    async fn test_unbounded_job_starts_all_requests_together() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(b"x".to_vec())
                    .set_delay(Duration::from_millis(400)),
            )
            .expect(50)
            .mount(&server)
            .await;
        let dir = TempDir::new().unwrap();
        let descriptors = (0..50)
            .map(|i| descriptor(&server, &format!("{i}_p0.png"), i))
            .collect();

        let started = Instant::now();
        let (outcomes, _) = run_job(descriptors, dir.path(), JobLimits::default()).await;
        let elapsed = started.elapsed();

        assert_eq!(outcomes.len(), 50);
        assert!(outcomes.iter().all(|o| o.state == UnitState::Finished));
        // Serial execution would need 20s.
        assert!(elapsed < Duration::from_secs(5), "took {elapsed:?}");
    }

    #[tokio::test]
    async fn test_concurrency_gate_limits_in_flight_units() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(b"x".to_vec())
                    .set_delay(Duration::from_millis(200)),
            )
            .mount(&server)
            .await;
        let dir = TempDir::new().unwrap();
        let descriptors = (0..4)
            .map(|i| descriptor(&server, &format!("{i}_p0.png"), i))
            .collect();
        let limits = JobLimits { concurrency: Some(1), rate_limit: None };

        let started = Instant::now();
        let (outcomes, _) = run_job(descriptors, dir.path(), limits).await;

        assert!(outcomes.iter().all(|o| o.state == UnitState::Finished));
        assert!(started.elapsed() >= Duration::from_millis(800));
    }

    #[tokio::test]
    async fn test_huge_concurrency_is_clamped() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"x".to_vec()))
            .expect(2)
            .mount(&server)
            .await;
        let dir = TempDir::new().unwrap();
        let descriptors = vec![descriptor(&server, "1_p0.png", 0), descriptor(&server, "2_p0.png", 1)];
        let limits = JobLimits { concurrency: Some(usize::MAX), rate_limit: None };

        let (outcomes, _) = run_job(descriptors, dir.path(), limits).await;

        assert!(outcomes.iter().all(|o| o.state == UnitState::Finished));
    }

    #[tokio::test]
    async fn test_invalid_proxy_fails_before_start() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let options = Session::new("", Some("::not a proxy::".to_string()))
            .download_options(std::env::temp_dir());
        let result = DownloadOrchestrator::new(options, JobLimits::default(), tx);
        assert!(matches!(result, Err(DownloadError::InvalidProxy { .. })));
    }

    #[test]
    fn test_descriptor_derives_filename_from_url() {
        let item = ItemDescriptor {
            source_url: "https://i.pximg.net/img-original/img/2017/01/01/00/00/00/12345_p0.jpg".into(),
            display_name: "sunset".into(),
            sequence_index: 4,
        }
        .into_item();
        assert_eq!(item.target_filename, "12345_p0.jpg");
        assert_eq!(item.display_name, "sunset");
        assert_eq!(item.sequence_index, 4);
    }
}
