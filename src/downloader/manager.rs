use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::Semaphore;
use crate::config::{AppConfig, AudioFormat, AudioQuality};
use crate::downloader::backends::{BackendFactory, BackendKind};
use crate::downloader::{BackendMetrics, DownloadBackendService, DownloadRequest, DownloadResult, FailureKind, VideoInfo};
use crate::errors::{AppError, Result};
use crate::queries::{is_playlist_url, validate_query};
use crate::utils::ensure_dir_exists;

/// Knobs the orchestrator applies to every request it builds.
#[derive(Debug, Clone)]
pub struct ManagerOptions {
    pub max_concurrent: usize,
    pub audio_format: AudioFormat,
    pub audio_quality: AudioQuality,
    pub overwrite_existing: bool,
    pub batch_deadline: Option<Duration>,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

impl ManagerOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_concurrent: config.max_concurrent_downloads,
            audio_format: config.preferred_format,
            audio_quality: config.preferred_quality,
            overwrite_existing: config.overwrite_existing,
            batch_deadline: config.batch_deadline(),
        }
    }
}

/// Availability of one backend kind as seen at startup.
#[derive(Debug, Clone, Serialize)]
pub struct BackendStatus {
    pub name: String,
    pub kind: Option<BackendKind>,
    pub available: bool,
    pub note: String,
}

/// Outcome of a batch, one result per query in input order.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub queries: Vec<String>,
    pub results: Vec<DownloadResult>,
    pub successful: usize,
    pub failed: usize,
    pub total: usize,
    pub elapsed_ms: u64,
}

impl BatchReport {
    fn new(queries: Vec<String>, results: Vec<DownloadResult>, elapsed: Duration) -> Self {
        let successful = results.iter().filter(|r| r.success).count();
        Self {
            total: results.len(),
            failed: results.len() - successful,
            successful,
            queries,
            results,
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }

    /// `successful/total`, e.g. `3/5`.
    pub fn success_summary(&self) -> String {
        format!("{}/{}", self.successful, self.total)
    }

    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.successful as f64 * 100.0 / self.total as f64
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &DownloadResult)> {
        self.queries.iter().map(String::as_str).zip(self.results.iter())
    }
}

/// Tries each backend in priority order until one resolves and retrieves
/// a query. The order is fixed at construction.
pub struct DownloadManager {
    backends: Vec<Arc<dyn DownloadBackendService>>,
    statuses: Vec<BackendStatus>,
    options: ManagerOptions,
}

impl DownloadManager {
    /// Builds the chain from `config.backend_order`, keeping kinds whose probe succeeds.
    pub async fn new(config: &AppConfig) -> Result<Self> {
        let factory = BackendFactory::new(config.clone())?;
        let mut backends: Vec<Arc<dyn DownloadBackendService>> = Vec::new();
        let mut chained: Vec<BackendKind> = Vec::new();

        for kind in config.backend_order.iter().copied() {
            if chained.contains(&kind) {
                continue;
            }
            let (backend, available) = factory.create_probed(kind).await;
            if available {
                backends.push(backend);
                chained.push(kind);
            }
        }

        let mut statuses = Vec::with_capacity(BackendKind::ALL.len());
        for kind in BackendKind::ALL {
            let available = factory.is_kind_available(kind).await;
            let note = if let Some(position) = chained.iter().position(|k| *k == kind) {
                format!("fallback position {}", position + 1)
            } else if !available && kind.requires_external_tool() {
                format!("{} (tool not found)", kind.description())
            } else if !available {
                kind.description().to_string()
            } else {
                "available but not in backend_order".to_string()
            };
            statuses.push(BackendStatus {
                name: kind.id().to_string(),
                kind: Some(kind),
                available,
                note,
            });
        }

        Self::assemble(backends, statuses, ManagerOptions::from_config(config))
    }

    /// Builds the chain from ready-made backends, probing each once.
    pub async fn from_backends(
        candidates: Vec<Arc<dyn DownloadBackendService>>,
        options: ManagerOptions,
    ) -> Result<Self> {
        let mut backends = Vec::new();
        let mut statuses = Vec::new();
        for backend in candidates {
            let available = backend.is_available().await;
            let position = backends.len() + 1;
            statuses.push(BackendStatus {
                name: backend.name().to_string(),
                kind: backend.name().parse().ok(),
                available,
                note: if available {
                    format!("fallback position {}", position)
                } else {
                    "probe failed".to_string()
                },
            });
            if available {
                backends.push(backend);
            } else {
                log::warn!("⚠️ [MANAGER] Skipping unavailable backend {}", backend.name());
            }
        }
        Self::assemble(backends, statuses, options)
    }

    fn assemble(
        backends: Vec<Arc<dyn DownloadBackendService>>,
        statuses: Vec<BackendStatus>,
        options: ManagerOptions,
    ) -> Result<Self> {
        if backends.is_empty() {
            log::error!("❌ [MANAGER] No download backend is available");
            return Err(AppError::NoBackendAvailable);
        }
        let manager = Self {
            backends,
            statuses,
            options,
        };
        log::info!("🎯 [MANAGER] Fallback chain: {}", manager.backend_names().join(" -> "));
        Ok(manager)
    }

    pub fn options(&self) -> &ManagerOptions {
        &self.options
    }

    /// Backend names in priority order.
    pub fn backend_names(&self) -> Vec<String> {
        self.backends.iter().map(|b| b.name().to_string()).collect()
    }

    fn build_request(&self, info: VideoInfo, output_dir: &Path) -> DownloadRequest {
        DownloadRequest::new(info, output_dir)
            .with_format(self.options.audio_format)
            .with_quality(self.options.audio_quality)
            .with_overwrite(self.options.overwrite_existing)
    }

    /// Runs the fallback chain for one query. Never errors: every outcome is a result.
    pub async fn acquire(&self, query: &str, output_dir: &Path) -> DownloadResult {
        let started = Instant::now();
        let query = query.trim();

        if let Err(e) = validate_query(query) {
            return DownloadResult::failure(FailureKind::InvalidRequest, e.to_string());
        }
        if self.backends.is_empty() {
            return DownloadResult::failure(
                FailureKind::NoBackend,
                "No download backend is available on this system",
            );
        }
        if let Err(e) = ensure_dir_exists(output_dir).await {
            log::error!("❌ [MANAGER] Cannot create output directory {:?}: {}", output_dir, e);
            return DownloadResult::failure(
                FailureKind::InvalidRequest,
                format!("Cannot create output directory {}: {}", output_dir.display(), e),
            );
        }

        let mut outcomes = Vec::with_capacity(self.backends.len());
        let mut resolved_any = false;
        let mut resolve_errored = false;
        let mut last_failed: Option<&str> = None;

        for backend in &self.backends {
            let name = backend.name();
            log::debug!("[MANAGER] Trying {} for '{}'", name, query);

            let info = match backend.resolve(query).await {
                Ok(Some(info)) => info,
                Ok(None) => {
                    log::info!("🔍 [MANAGER] {} found nothing for '{}'", name, query);
                    outcomes.push(format!("{}: not found", name));
                    continue;
                }
                Err(e) => {
                    log::warn!("⚠️ [MANAGER] {} could not resolve '{}': {}", name, query, e);
                    outcomes.push(format!("{}: resolve error ({})", name, e));
                    resolve_errored = true;
                    continue;
                }
            };

            resolved_any = true;
            let request = self.build_request(info, output_dir);
            let result = backend.retrieve(&request).await;
            if result.success {
                log::info!(
                    "✅ [MANAGER] '{}' acquired by {} -> {:?}",
                    query,
                    name,
                    result.file_path
                );
                return result;
            }

            let reason = result.error_message.as_deref().unwrap_or("transfer failed");
            log::warn!("⚠️ [MANAGER] {} failed to retrieve '{}': {}", name, query, reason);
            outcomes.push(format!("{}: {}", name, reason));
            last_failed = Some(name);
        }

        let kind = if resolved_any {
            FailureKind::TransferFailed
        } else if resolve_errored {
            FailureKind::Exhausted
        } else {
            FailureKind::NotFound
        };
        log::error!("❌ [MANAGER] All backends exhausted for '{}'", query);

        let mut result = DownloadResult::failure(
            kind,
            format!("All backends exhausted for '{}': {}", query, outcomes.join("; ")),
        )
        .with_elapsed(started.elapsed());
        if let Some(name) = last_failed {
            result = result.with_backend(name);
        }
        result
    }

    pub async fn acquire_all(&self, queries: &[String], output_dir: &Path) -> BatchReport {
        self.acquire_all_with(queries, output_dir, |_, _| {}).await
    }

    /// Batch form of [`acquire`](Self::acquire) with a callback fired as each query finishes.
    ///
    /// At most `max_concurrent` queries run at once. With a batch deadline,
    /// queries that have not started when it passes are reported as cancelled;
    /// running ones are left to finish.
    pub async fn acquire_all_with<F>(&self, queries: &[String], output_dir: &Path, on_complete: F) -> BatchReport
    where
        F: Fn(usize, &DownloadResult) + Sync,
    {
        let started = Instant::now();
        let semaphore = Arc::new(Semaphore::new(self.options.max_concurrent.max(1)));
        let deadline = self.options.batch_deadline.map(|d| tokio::time::Instant::now() + d);
        log::info!(
            "📦 [MANAGER] Starting batch of {} queries ({} at a time)",
            queries.len(),
            self.options.max_concurrent.max(1)
        );

        let on_complete = &on_complete;
        let units = queries.iter().enumerate().map(move |(index, query)| {
            let semaphore = semaphore.clone();
            async move {
                let permit = match deadline {
                    Some(deadline) => tokio::time::timeout_at(deadline, semaphore.acquire_owned())
                        .await
                        .ok()
                        .and_then(|p| p.ok()),
                    None => semaphore.acquire_owned().await.ok(),
                };
                let expired = deadline.map_or(false, |d| tokio::time::Instant::now() >= d);

                let result = match permit {
                    Some(_permit) if !expired => self.acquire(query, output_dir).await,
                    _ => {
                        log::warn!("⏱️ [MANAGER] Batch deadline passed, cancelling '{}'", query);
                        DownloadResult::failure(
                            FailureKind::Cancelled,
                            format!("Cancelled: batch deadline passed before '{}' started", query.trim()),
                        )
                    }
                };
                on_complete(index, &result);
                result
            }
        });

        let results = join_all(units).await;
        let report = BatchReport::new(queries.to_vec(), results, started.elapsed());
        log::info!(
            "🎉 [MANAGER] Batch finished: {} succeeded in {}",
            report.success_summary(),
            crate::utils::format_duration(started.elapsed())
        );
        for metrics in self.all_metrics() {
            log::debug!("📊 [MANAGER] {}", metrics.summary());
        }
        report
    }

    /// Replaces playlist locators with the locators of their entries.
    ///
    /// Backends are asked in priority order; the first non-empty listing
    /// wins. A playlist no backend can list is kept as a single query.
    pub async fn expand_playlists(&self, queries: &[String]) -> Vec<String> {
        let mut expanded = Vec::with_capacity(queries.len());
        for query in queries {
            if !is_playlist_url(query) {
                expanded.push(query.clone());
                continue;
            }

            let mut entries = None;
            for backend in &self.backends {
                match backend.expand_playlist(query).await {
                    Ok(Some(listed)) if !listed.is_empty() => {
                        log::info!("📃 [MANAGER] {} listed {} entries for {}", backend.name(), listed.len(), query);
                        entries = Some(listed);
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => log::warn!("⚠️ [MANAGER] {} could not list {}: {}", backend.name(), query, e),
                }
            }

            match entries {
                Some(listed) => expanded.extend(listed.into_iter().map(|info| info.url)),
                None => {
                    log::warn!("⚠️ [MANAGER] No backend could list {}, keeping it as one query", query);
                    expanded.push(query.clone());
                }
            }
        }
        expanded
    }

    /// Resolve phase only, in the same priority order.
    pub async fn resolve_info(&self, query: &str) -> Option<VideoInfo> {
        let query = query.trim();
        if validate_query(query).is_err() {
            return None;
        }
        for backend in &self.backends {
            match backend.resolve(query).await {
                Ok(Some(info)) => return Some(info),
                Ok(None) => {}
                Err(e) => log::warn!("⚠️ [MANAGER] {} could not resolve '{}': {}", backend.name(), query, e),
            }
        }
        None
    }

    pub fn backend_status(&self) -> Vec<BackendStatus> {
        self.statuses.clone()
    }

    pub fn all_metrics(&self) -> Vec<BackendMetrics> {
        self.backends.iter().map(|b| b.metrics()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::StubBackend;

    fn options() -> ManagerOptions {
        ManagerOptions {
            max_concurrent: 4,
            audio_format: AudioFormat::Mp3,
            audio_quality: AudioQuality::Medium,
            overwrite_existing: true,
            batch_deadline: None,
        }
    }

    async fn manager_with(stubs: &[Arc<StubBackend>], options: ManagerOptions) -> DownloadManager {
        let backends: Vec<Arc<dyn DownloadBackendService>> =
            stubs.iter().map(|s| s.clone() as Arc<dyn DownloadBackendService>).collect();
        DownloadManager::from_backends(backends, options).await.unwrap()
    }

    fn queries(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_no_available_backend_fails_construction() {
        let stub: Arc<dyn DownloadBackendService> = Arc::new(StubBackend::new("a").unavailable());
        let result = DownloadManager::from_backends(vec![stub], options()).await;
        assert!(matches!(result, Err(AppError::NoBackendAvailable)));
    }

    #[tokio::test]
    async fn test_each_backend_is_checked_once() {
        let dir = tempfile::tempdir().unwrap();
        let a = Arc::new(StubBackend::new("a").unavailable());
        let b = Arc::new(StubBackend::new("b"));
        let manager = manager_with(&[a.clone(), b.clone()], options()).await;

        manager.acquire_all(&queries(&["one", "two"]), dir.path()).await;
        manager.resolve_info("three").await;
        assert_eq!((a.probes(), b.probes()), (1, 1));
        assert!(!a.metrics().is_available);
        assert!(b.metrics().is_available);
    }

    #[tokio::test]
    async fn test_empty_chain_returns_failure() {
        let dir = tempfile::tempdir().unwrap();
        let manager = DownloadManager {
            backends: Vec::new(),
            statuses: Vec::new(),
            options: options(),
        };
        let result = manager.acquire("anything", dir.path()).await;
        assert!(!result.success);
        assert_eq!(result.failure_kind, Some(FailureKind::NoBackend));
        assert!(result.error_message.unwrap().contains("available"));
    }

    #[tokio::test]
    async fn test_first_successful_backend_wins_and_later_ones_are_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let a = Arc::new(StubBackend::new("a").not_found());
        let b = Arc::new(StubBackend::new("b").resolve_error());
        let c = Arc::new(StubBackend::new("c"));
        let d = Arc::new(StubBackend::new("d"));
        let manager = manager_with(&[a.clone(), b.clone(), c.clone(), d.clone()], options()).await;

        let result = manager.acquire("Queen - Bohemian Rhapsody", dir.path()).await;
        assert!(result.success);
        assert_eq!(result.backend_used.as_deref(), Some("c"));
        assert!(result.file_path.as_ref().unwrap().exists());
        assert_eq!(result.file_name.as_deref(), Some("Queen - Bohemian Rhapsody.mp3"));
        assert_eq!((a.resolves(), b.resolves(), c.resolves(), d.resolves()), (1, 1, 1, 0));
        assert_eq!(d.retrieves(), 0);
        assert_eq!(b.metrics().resolve_errors, 1);
    }

    #[tokio::test]
    async fn test_unavailable_skipped_and_retrieve_failure_falls_through() {
        let dir = tempfile::tempdir().unwrap();
        let a = Arc::new(StubBackend::new("a").unavailable());
        let b = Arc::new(StubBackend::new("b").failing_retrieve());
        let c = Arc::new(StubBackend::new("c"));
        let manager = manager_with(&[a.clone(), b.clone(), c.clone()], options()).await;

        assert_eq!(manager.backend_names(), vec!["b", "c"]);
        let result = manager.acquire("song", dir.path()).await;
        assert!(result.success);
        assert_eq!(result.backend_used.as_deref(), Some("c"));
        assert_eq!(a.resolves() + a.retrieves(), 0);
        assert_eq!(b.metrics().failed_downloads, 1);
        assert_eq!(c.metrics().successful_downloads, 1);

        let status = manager.backend_status();
        assert_eq!(status.len(), 3);
        assert!(!status[0].available);
        assert!(status[2].available);
    }

    #[tokio::test]
    async fn test_all_not_found_is_exhaustion_without_files() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let manager = manager_with(
            &[Arc::new(StubBackend::new("a").not_found()), Arc::new(StubBackend::new("b").not_found())],
            options(),
        )
        .await;

        let result = manager.acquire("zzz-nonexistent", &out).await;
        assert!(!result.success);
        assert!(result.file_path.is_none());
        assert_eq!(result.failure_kind, Some(FailureKind::NotFound));
        let message = result.error_message.unwrap();
        assert!(message.starts_with("All backends exhausted"));
        assert!(message.contains("a: not found") && message.contains("b: not found"));
        assert_eq!(std::fs::read_dir(&out).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_exhaustion_kinds_distinguish_transfer_failures() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with(
            &[Arc::new(StubBackend::new("a").failing_retrieve()), Arc::new(StubBackend::new("b").not_found())],
            options(),
        )
        .await;
        let result = manager.acquire("song", dir.path()).await;
        assert_eq!(result.failure_kind, Some(FailureKind::TransferFailed));
        assert_eq!(result.backend_used.as_deref(), Some("a"));

        let manager = manager_with(
            &[Arc::new(StubBackend::new("a").resolve_error()), Arc::new(StubBackend::new("b").not_found())],
            options(),
        )
        .await;
        let result = manager.acquire("song", dir.path()).await;
        assert_eq!(result.failure_kind, Some(FailureKind::Exhausted));
        assert!(result.backend_used.is_none());
    }

    #[tokio::test]
    async fn test_blank_query_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let stub = Arc::new(StubBackend::new("a"));
        let manager = manager_with(&[stub.clone()], options()).await;
        let result = manager.acquire("   ", dir.path()).await;
        assert_eq!(result.failure_kind, Some(FailureKind::InvalidRequest));
        assert_eq!(stub.resolves(), 0);
    }

    #[tokio::test]
    async fn test_resolve_info_is_deterministic() {
        let manager = manager_with(
            &[Arc::new(StubBackend::new("a").not_found()), Arc::new(StubBackend::new("b"))],
            options(),
        )
        .await;
        let first = manager.resolve_info("Daft Punk - One More Time").await.unwrap();
        let second = manager.resolve_info("Daft Punk - One More Time").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.id, "b:Daft Punk - One More Time");
    }

    #[tokio::test]
    async fn test_batch_preserves_input_order() {
        let dir = tempfile::tempdir().unwrap();
        let stub = Arc::new(StubBackend::new("a").delay_for("q2", Duration::from_millis(200)));
        let manager = manager_with(&[stub], options()).await;

        let report = manager.acquire_all(&queries(&["q1", "q2", "q3"]), dir.path()).await;
        let names: Vec<_> = report.results.iter().map(|r| r.file_name.clone().unwrap()).collect();
        assert_eq!(names, vec!["q1.mp3", "q2.mp3", "q3.mp3"]);
        assert_eq!(report.success_summary(), "3/3");
    }

    #[tokio::test]
    async fn test_batch_counts_and_metrics() {
        let dir = tempfile::tempdir().unwrap();
        let stub = Arc::new(StubBackend::new("a").fail_for("s2").fail_for("s4"));
        let manager = manager_with(&[stub.clone()], options()).await;

        let seen = std::sync::Mutex::new(Vec::new());
        let report = manager
            .acquire_all_with(&queries(&["s1", "s2", "s3", "s4", "s5"]), dir.path(), |index, _| {
                seen.lock().unwrap().push(index);
            })
            .await;

        assert_eq!(report.total, 5);
        assert_eq!(report.results.len(), 5);
        assert_eq!(report.success_summary(), "3/5");
        assert_eq!(report.success_rate(), 60.0);
        for (query, result) in report.iter() {
            if !result.success {
                assert!(query == "s2" || query == "s4");
                assert!(result.error_message.is_some());
            }
        }
        let mut seen = seen.into_inner().unwrap();
        seen.sort();
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);

        let metrics = &manager.all_metrics()[0];
        assert_eq!(metrics.total_downloads, 5);
        assert_eq!(metrics.successful_downloads, 3);
        assert_eq!(metrics.failed_downloads, 2);
    }

    #[tokio::test]
    async fn test_batch_respects_concurrency_limit() {
        let dir = tempfile::tempdir().unwrap();
        let mut stub = StubBackend::new("a");
        for q in ["c1", "c2", "c3", "c4"] {
            stub = stub.delay_for(q, Duration::from_millis(150));
        }
        let manager = manager_with(
            &[Arc::new(stub)],
            ManagerOptions {
                max_concurrent: 2,
                ..options()
            },
        )
        .await;

        let started = Instant::now();
        let report = manager.acquire_all(&queries(&["c1", "c2", "c3", "c4"]), dir.path()).await;
        assert_eq!(report.successful, 4);
        assert!(started.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_batch_deadline_cancels_unscheduled_queries() {
        let dir = tempfile::tempdir().unwrap();
        let stub = Arc::new(StubBackend::new("a").delay_for("slow", Duration::from_millis(300)));
        let manager = manager_with(
            &[stub.clone()],
            ManagerOptions {
                max_concurrent: 1,
                batch_deadline: Some(Duration::from_millis(100)),
                ..options()
            },
        )
        .await;

        let report = manager.acquire_all(&queries(&["slow", "later", "last"]), dir.path()).await;
        assert_eq!(report.total, 3);
        assert!(report.results[0].success);
        for result in &report.results[1..] {
            assert!(!result.success);
            assert_eq!(result.failure_kind, Some(FailureKind::Cancelled));
        }
        assert_eq!(stub.resolves(), 1);
    }

    #[tokio::test]
    async fn test_long_titles_are_saved_under_a_shortened_name() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with(&[Arc::new(StubBackend::new("a"))], options()).await;

        let query = "Long title ".repeat(30);
        let result = manager.acquire(&query, dir.path()).await;
        assert!(result.success, "{:?}", result.error_message);
        let name = result.file_name.unwrap();
        assert!(name.starts_with("Long title Long title"));
        assert!(name.len() <= crate::utils::MAX_FILENAME_BYTES + 4);
    }

    #[tokio::test]
    async fn test_playlists_expand_through_first_backend_that_lists_them() {
        let playlist = "https://www.youtube.com/playlist?list=PLsongs";
        let a = Arc::new(StubBackend::new("a"));
        let b = Arc::new(StubBackend::new("b").playlist(playlist, &["one", "two"]));
        let c = Arc::new(StubBackend::new("c").playlist(playlist, &["ignored"]));
        let manager = manager_with(&[a, b, c], options()).await;

        let expanded = manager
            .expand_playlists(&queries(&["Queen - Bohemian Rhapsody", playlist]))
            .await;
        assert_eq!(
            expanded,
            vec![
                "Queen - Bohemian Rhapsody",
                "https://stub.invalid/one",
                "https://stub.invalid/two"
            ]
        );

        let unknown = "https://www.youtube.com/playlist?list=PLother";
        assert_eq!(manager.expand_playlists(&queries(&[unknown])).await, vec![unknown]);
    }

    #[tokio::test]
    async fn test_existing_file_kept_when_not_overwriting() {
        let dir = tempfile::tempdir().unwrap();
        let existing = dir.path().join("song.mp3");
        std::fs::write(&existing, b"original").unwrap();
        let manager = manager_with(
            &[Arc::new(StubBackend::new("a"))],
            ManagerOptions {
                overwrite_existing: false,
                ..options()
            },
        )
        .await;

        let result = manager.acquire("song", dir.path()).await;
        assert!(result.success);
        assert_eq!(std::fs::read(&existing).unwrap(), b"original");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
