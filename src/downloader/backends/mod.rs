pub mod http_direct;
pub mod native;
pub mod ytdlp;

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use crate::config::{AppConfig, AudioFormat};
use crate::downloader::ffmpeg::{self, TrackTags};
use crate::downloader::http_pool::HttpPool;
use crate::downloader::{
    DownloadBackendService, DownloadMetadata, DownloadRequest, DownloadResult, FailureKind, MetricsRecorder,
};
use crate::errors::{AppError, Result};
use crate::utils::{ensure_dir_exists, place_file, should_keep_existing, staging_path};

pub use http_direct::HttpDirectBackend;
pub use native::NativeBackend;
pub use ytdlp::YtDlpBackend;

/// The closed set of acquisition strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackendKind {
    #[serde(rename = "native")]
    NativeLibrary,
    #[serde(rename = "yt-dlp")]
    ExternalTool,
    #[serde(rename = "python")]
    ScriptingLibrary,
    #[serde(rename = "http-direct")]
    HttpDirect,
}

impl BackendKind {
    pub const ALL: [BackendKind; 4] = [
        BackendKind::NativeLibrary,
        BackendKind::ExternalTool,
        BackendKind::ScriptingLibrary,
        BackendKind::HttpDirect,
    ];

    /// Fastest and least dependent first.
    pub const PREFERENCE_ORDER: [BackendKind; 4] = Self::ALL;

    pub fn id(&self) -> &'static str {
        match self {
            BackendKind::NativeLibrary => "native",
            BackendKind::ExternalTool => "yt-dlp",
            BackendKind::ScriptingLibrary => "python",
            BackendKind::HttpDirect => "http-direct",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            BackendKind::NativeLibrary => "In-process YouTube resolver, no external tools",
            BackendKind::ExternalTool => "yt-dlp command line tool",
            BackendKind::ScriptingLibrary => "yt_dlp Python module",
            BackendKind::HttpDirect => "Direct HTTP download of audio URLs",
        }
    }

    pub fn requires_external_tool(&self) -> bool {
        matches!(self, BackendKind::ExternalTool | BackendKind::ScriptingLibrary)
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for BackendKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase();
        BackendKind::ALL
            .into_iter()
            .find(|kind| kind.id() == wanted)
            .ok_or_else(|| AppError::Parse(format!("unknown backend '{}'", s)))
    }
}

/// Creates the output directory and reports an existing target that the
/// overwrite policy says to keep.
pub(crate) async fn prepare_target(request: &DownloadRequest) -> Result<Option<PathBuf>> {
    ensure_dir_exists(&request.output_dir).await?;
    let target = request.target_path();
    if should_keep_existing(&target, request.overwrite_existing) {
        log::info!("⏭️ Keeping existing file {:?}", target);
        return Ok(Some(target));
    }
    Ok(None)
}

/// Converts a staged download to the requested format when its container
/// differs, then moves it to the request's target path.
///
/// With `tags`, the title and artist are written into the file. A file in
/// the right format that cannot be tagged is kept untagged.
pub(crate) async fn finish_staged(
    staged: &Path,
    source_ext: Option<&str>,
    request: &DownloadRequest,
    tags: Option<&TrackTags>,
    ffmpeg_program: &str,
    timeout: Duration,
) -> Result<PathBuf> {
    let target = request.target_path();
    let matches_format = source_ext.and_then(AudioFormat::from_extension) == Some(request.audio_format);

    let staged = if matches_format {
        match tags {
            Some(tags) => tag_staged(staged, &target, request.audio_format, tags, ffmpeg_program, timeout).await,
            None => staged.to_path_buf(),
        }
    } else {
        let converted = staging_path(&target);
        let outcome = ffmpeg::transcode(
            ffmpeg_program,
            staged,
            &converted,
            request.audio_format,
            request.audio_quality,
            tags,
            timeout,
        )
        .await;
        let _ = tokio::fs::remove_file(staged).await;
        outcome?;
        converted
    };

    place_file(&staged, &target, request.overwrite_existing).await
}

/// Tagged copy of `staged`, or `staged` itself when tagging fails.
async fn tag_staged(
    staged: &Path,
    target: &Path,
    format: AudioFormat,
    tags: &TrackTags,
    ffmpeg_program: &str,
    timeout: Duration,
) -> PathBuf {
    let tagged = staging_path(target);
    match ffmpeg::write_tags(ffmpeg_program, staged, &tagged, format, tags, timeout).await {
        Ok(()) => {
            let _ = tokio::fs::remove_file(staged).await;
            tagged
        }
        Err(e) => {
            log::debug!("🏷️ Leaving '{}' untagged: {}", tags.title, e);
            staged.to_path_buf()
        }
    }
}

/// Turns the outcome of one transfer into a result and records it.
pub(crate) fn finish_attempt(
    backend: &str,
    metrics: &MetricsRecorder,
    request: &DownloadRequest,
    started: Instant,
    outcome: Result<PathBuf>,
) -> DownloadResult {
    let result = match outcome {
        Ok(path) => DownloadResult::completed(&path, backend, started.elapsed()),
        Err(e) => DownloadResult::failure(FailureKind::TransferFailed, e.to_string())
            .with_backend(backend)
            .with_elapsed(started.elapsed()),
    }
    .with_metadata(DownloadMetadata::from_request(request));

    if result.success {
        log::info!(
            "✅ [{}] Saved {:?} ({}) in {}",
            backend,
            result.file_path,
            result.formatted_file_size(),
            result.formatted_download_time()
        );
    } else {
        log::warn!(
            "⚠️ [{}] Retrieve failed for '{}': {}",
            backend,
            request.video_info.title,
            result.error_message.as_deref().unwrap_or("unknown error")
        );
    }
    metrics.record(result.success, started.elapsed());
    result
}

/// Builds backends by kind and remembers which kinds this host supports.
pub struct BackendFactory {
    config: AppConfig,
    http: HttpPool,
    availability: RwLock<HashMap<BackendKind, bool>>,
}

impl BackendFactory {
    pub fn new(config: AppConfig) -> Result<Self> {
        let mut http = HttpPool::new(config.max_concurrent_downloads.max(1) * 2, config.http_timeout())?;
        if let Some(proxy) = config.proxy.as_deref().filter(|p| !p.trim().is_empty()) {
            log::info!("🌐 [FACTORY] Using proxy {}", proxy);
            http = http.with_proxy(proxy)?;
        }
        Ok(Self {
            config,
            http,
            availability: RwLock::new(HashMap::new()),
        })
    }

    /// Constructs a backend. Never probes the host.
    pub fn create(&self, kind: BackendKind) -> Arc<dyn DownloadBackendService> {
        match kind {
            BackendKind::NativeLibrary => Arc::new(NativeBackend::new(self.http.clone(), &self.config)),
            BackendKind::ExternalTool => Arc::new(YtDlpBackend::binary(&self.config)),
            BackendKind::ScriptingLibrary => Arc::new(YtDlpBackend::python_module(&self.config)),
            BackendKind::HttpDirect => Arc::new(HttpDirectBackend::new(self.http.clone(), &self.config)),
        }
    }

    /// Cached for the factory's lifetime; see [`reprobe`](Self::reprobe).
    pub async fn is_kind_available(&self, kind: BackendKind) -> bool {
        if let Some(known) = self.availability.read().await.get(&kind) {
            return *known;
        }
        self.reprobe(kind).await
    }

    pub async fn reprobe(&self, kind: BackendKind) -> bool {
        self.create_probed(kind).await.1
    }

    /// Builds a backend, probes that instance and caches the outcome.
    pub async fn create_probed(&self, kind: BackendKind) -> (Arc<dyn DownloadBackendService>, bool) {
        let backend = self.create(kind);
        let available = backend.is_available().await;
        log::info!(
            "{} [FACTORY] {} is {}",
            if available { "✅" } else { "⚠️" },
            kind,
            if available { "available" } else { "unavailable" }
        );
        self.availability.write().await.insert(kind, available);
        (backend, available)
    }

    pub async fn available_kinds(&self) -> Vec<BackendKind> {
        let mut kinds = Vec::new();
        for kind in BackendKind::ALL {
            if self.is_kind_available(kind).await {
                kinds.push(kind);
            }
        }
        kinds
    }

    pub async fn best_available(&self) -> Result<Arc<dyn DownloadBackendService>> {
        for kind in BackendKind::PREFERENCE_ORDER {
            if self.is_kind_available(kind).await {
                return Ok(self.create(kind));
            }
        }
        Err(AppError::NoBackendAvailable)
    }
}
