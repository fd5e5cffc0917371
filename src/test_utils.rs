//! Scripted backend for orchestrator tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use async_trait::async_trait;
use crate::downloader::{
    BackendMetrics, DownloadBackendService, DownloadRequest, DownloadResult, FailureKind, MetricsRecorder,
    VideoInfo,
};
use crate::errors::{AppError, Result};
use crate::utils::{place_file, should_keep_existing, staging_path};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolve {
    Found,
    NotFound,
    Error,
}

pub struct StubBackend {
    name: String,
    available: bool,
    resolve: Resolve,
    retrieve_ok: bool,
    failing_queries: Vec<String>,
    missing_queries: Vec<String>,
    erroring_queries: Vec<String>,
    playlists: HashMap<String, Vec<String>>,
    delays: HashMap<String, Duration>,
    pub resolve_calls: AtomicUsize,
    pub retrieve_calls: AtomicUsize,
    pub probe_calls: AtomicUsize,
    metrics: MetricsRecorder,
}

impl StubBackend {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            available: true,
            resolve: Resolve::Found,
            retrieve_ok: true,
            failing_queries: Vec::new(),
            missing_queries: Vec::new(),
            erroring_queries: Vec::new(),
            playlists: HashMap::new(),
            delays: HashMap::new(),
            resolve_calls: AtomicUsize::new(0),
            retrieve_calls: AtomicUsize::new(0),
            probe_calls: AtomicUsize::new(0),
            metrics: MetricsRecorder::new(name),
        }
    }

    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    pub fn not_found(mut self) -> Self {
        self.resolve = Resolve::NotFound;
        self
    }

    pub fn resolve_error(mut self) -> Self {
        self.resolve = Resolve::Error;
        self
    }

    pub fn failing_retrieve(mut self) -> Self {
        self.retrieve_ok = false;
        self
    }

    /// Retrieval fails only for this query (matched against the resolved title).
    pub fn fail_for(mut self, query: &str) -> Self {
        self.failing_queries.push(query.to_string());
        self
    }

    /// Resolving this query finds nothing.
    pub fn missing(mut self, query: &str) -> Self {
        self.missing_queries.push(query.to_string());
        self
    }

    /// Resolving this query errors.
    pub fn error_for(mut self, query: &str) -> Self {
        self.erroring_queries.push(query.to_string());
        self
    }

    /// `url` expands to one stub locator per entry.
    pub fn playlist(mut self, url: &str, entries: &[&str]) -> Self {
        self.playlists
            .insert(url.to_string(), entries.iter().map(|e| e.to_string()).collect());
        self
    }

    pub fn probes(&self) -> usize {
        self.probe_calls.load(Ordering::SeqCst)
    }

    /// Retrieval of this query sleeps first.
    pub fn delay_for(mut self, query: &str, delay: Duration) -> Self {
        self.delays.insert(query.to_string(), delay);
        self
    }

    pub fn resolves(&self) -> usize {
        self.resolve_calls.load(Ordering::SeqCst)
    }

    pub fn retrieves(&self) -> usize {
        self.retrieve_calls.load(Ordering::SeqCst)
    }

    async fn write_file(&self, request: &DownloadRequest) -> Result<std::path::PathBuf> {
        let target = request.target_path();
        if should_keep_existing(&target, request.overwrite_existing) {
            return Ok(target);
        }
        let staged = staging_path(&target);
        tokio::fs::write(&staged, format!("{} audio", self.name)).await?;
        place_file(&staged, &target, request.overwrite_existing).await
    }
}

#[async_trait]
impl DownloadBackendService for StubBackend {
    async fn resolve(&self, query: &str) -> Result<Option<VideoInfo>> {
        self.resolve_calls.fetch_add(1, Ordering::SeqCst);
        let outcome = if self.erroring_queries.iter().any(|q| q == query) {
            Resolve::Error
        } else if self.missing_queries.iter().any(|q| q == query) {
            Resolve::NotFound
        } else {
            self.resolve
        };
        match outcome {
            Resolve::Found => Ok(Some(VideoInfo::new(
                format!("{}:{}", self.name, query),
                query,
                format!("https://stub.invalid/{}", urlencoding::encode(query)),
            ))),
            Resolve::NotFound => Ok(None),
            Resolve::Error => {
                self.metrics.record_resolve_error();
                Err(AppError::Download(format!("{} lookup failed", self.name)))
            }
        }
    }

    async fn expand_playlist(&self, url: &str) -> Result<Option<Vec<VideoInfo>>> {
        Ok(self.playlists.get(url).map(|entries| {
            entries
                .iter()
                .map(|entry| VideoInfo::new(entry.as_str(), entry.as_str(), format!("https://stub.invalid/{}", entry)))
                .collect()
        }))
    }

    async fn retrieve(&self, request: &DownloadRequest) -> DownloadResult {
        self.retrieve_calls.fetch_add(1, Ordering::SeqCst);
        let started = Instant::now();
        let title = request.video_info.title.clone();
        if let Some(delay) = self.delays.get(&title) {
            tokio::time::sleep(*delay).await;
        }

        let result = if !self.retrieve_ok || self.failing_queries.contains(&title) {
            DownloadResult::failure(FailureKind::TransferFailed, format!("{} transfer failed", self.name))
                .with_backend(&self.name)
                .with_elapsed(started.elapsed())
        } else {
            match self.write_file(request).await {
                Ok(path) => DownloadResult::completed(&path, &self.name, started.elapsed()),
                Err(e) => DownloadResult::failure(FailureKind::TransferFailed, e.to_string()).with_backend(&self.name),
            }
        };
        self.metrics.record(result.success, started.elapsed());
        result
    }

    fn supports_url(&self, url: &str) -> bool {
        url.starts_with("https://stub.invalid/")
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn is_available(&self) -> bool {
        self.probe_calls.fetch_add(1, Ordering::SeqCst);
        self.metrics.set_available(self.available);
        self.available
    }

    fn metrics(&self) -> BackendMetrics {
        self.metrics.snapshot(None)
    }
}
