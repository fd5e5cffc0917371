pub mod backends;
pub mod ffmpeg;
pub mod http_pool;
pub mod manager;
pub mod metrics;
pub mod process;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use crate::config::{AudioFormat, AudioQuality};
use crate::errors::Result;
use crate::utils::sanitize_filename;

pub use metrics::{BackendHealth, BackendMetrics, MetricsRecorder};

/// Quality tier reported by the backend that resolved an item.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VideoQuality {
    Low,
    Medium,
    High,
    UltraHigh,
}

/// A resolved remote media item. Identity is local to the backend that produced it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VideoInfo {
    pub id: String,
    pub title: String,
    pub artist: Option<String>,
    pub uploader: Option<String>,
    pub url: String,
    pub duration_seconds: Option<u64>,
    pub quality: VideoQuality,
    pub thumbnail_url: Option<String>,
    pub description: Option<String>,
    pub view_count: Option<u64>,
}

impl VideoInfo {
    pub fn new(id: impl Into<String>, title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            artist: None,
            uploader: None,
            url: url.into(),
            duration_seconds: None,
            quality: VideoQuality::High,
            thumbnail_url: None,
            description: None,
            view_count: None,
        }
    }

    pub fn sanitized_title(&self) -> String {
        sanitize_filename(&self.title)
    }

    pub fn duration(&self) -> Option<Duration> {
        self.duration_seconds.map(Duration::from_secs)
    }
}

/// Everything a backend needs to materialize one item on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadRequest {
    pub video_info: VideoInfo,
    pub output_dir: PathBuf,
    pub custom_filename: Option<String>,
    pub audio_format: AudioFormat,
    pub audio_quality: AudioQuality,
    pub overwrite_existing: bool,
}

impl DownloadRequest {
    pub fn new(video_info: VideoInfo, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            video_info,
            output_dir: output_dir.into(),
            custom_filename: None,
            audio_format: AudioFormat::Mp3,
            audio_quality: AudioQuality::Medium,
            overwrite_existing: true,
        }
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.custom_filename = Some(filename.into());
        self
    }

    pub fn with_format(mut self, format: AudioFormat) -> Self {
        self.audio_format = format;
        self
    }

    pub fn with_quality(mut self, quality: AudioQuality) -> Self {
        self.audio_quality = quality;
        self
    }

    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite_existing = overwrite;
        self
    }

    /// Final file name: explicit override, else title, else id, plus the format extension.
    pub fn target_filename(&self) -> String {
        let ext = self.audio_format.extension();

        if let Some(custom) = self.custom_filename.as_deref().map(str::trim) {
            if !custom.is_empty() {
                let suffix = format!(".{}", ext);
                let cut = custom.len().checked_sub(suffix.len());
                let stem = match cut.and_then(|cut| custom.get(cut..).map(|tail| (cut, tail))) {
                    Some((cut, tail)) if tail.eq_ignore_ascii_case(&suffix) => &custom[..cut],
                    _ => custom,
                };
                let stem = sanitize_filename(stem);
                if !stem.is_empty() {
                    return format!("{}.{}", stem, ext);
                }
            }
        }

        let stem = [self.video_info.sanitized_title(), sanitize_filename(&self.video_info.id)]
            .into_iter()
            .find(|candidate| !candidate.is_empty())
            .unwrap_or_else(|| "untitled".to_string());

        format!("{}.{}", stem, ext)
    }

    pub fn target_path(&self) -> PathBuf {
        self.output_dir.join(self.target_filename())
    }
}

/// Why an attempt or a whole query failed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    NotFound,
    TransferFailed,
    Exhausted,
    NoBackend,
    Cancelled,
    InvalidRequest,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DownloadMetadata {
    pub original_url: Option<String>,
    pub video_title: Option<String>,
    pub video_id: Option<String>,
    pub video_duration_seconds: Option<u64>,
    pub audio_format: Option<String>,
    pub audio_bitrate: Option<u32>,
}

impl DownloadMetadata {
    pub fn from_request(request: &DownloadRequest) -> Self {
        Self {
            original_url: Some(request.video_info.url.clone()),
            video_title: Some(request.video_info.title.clone()),
            video_id: Some(request.video_info.id.clone()),
            video_duration_seconds: request.video_info.duration_seconds,
            audio_format: Some(request.audio_format.extension().to_string()),
            audio_bitrate: Some(request.audio_quality.bitrate_kbps()),
        }
    }
}

/// Outcome of one retrieve attempt or of one whole query.
///
/// Built only through [`DownloadResult::completed`] and the failure
/// constructors, so a success always points at an existing, non-empty file
/// and a failure never carries a path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadResult {
    pub success: bool,
    pub file_path: Option<PathBuf>,
    pub file_name: Option<String>,
    pub file_size: u64,
    pub backend_used: Option<String>,
    pub download_time_ms: Option<u64>,
    pub error_message: Option<String>,
    pub failure_kind: Option<FailureKind>,
    pub downloaded_at: Option<chrono::DateTime<chrono::Utc>>,
    pub metadata: Option<DownloadMetadata>,
}

impl DownloadResult {
    /// Success for a file on disk. Degrades to a transfer failure when the
    /// file is missing or empty.
    pub fn completed(path: &Path, backend: &str, elapsed: Duration) -> Self {
        let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        if size == 0 {
            return Self::failure(
                FailureKind::TransferFailed,
                format!("Downloaded file is missing or empty: {}", path.display()),
            )
            .with_backend(backend)
            .with_elapsed(elapsed);
        }

        let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
        Self {
            success: true,
            file_name: absolute.file_name().map(|n| n.to_string_lossy().to_string()),
            file_path: Some(absolute),
            file_size: size,
            backend_used: Some(backend.to_string()),
            download_time_ms: Some(elapsed.as_millis() as u64),
            error_message: None,
            failure_kind: None,
            downloaded_at: Some(chrono::Utc::now()),
            metadata: None,
        }
    }

    pub fn failure(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            success: false,
            file_path: None,
            file_name: None,
            file_size: 0,
            backend_used: None,
            download_time_ms: None,
            error_message: Some(message.into()),
            failure_kind: Some(kind),
            downloaded_at: Some(chrono::Utc::now()),
            metadata: None,
        }
    }

    pub fn with_backend(mut self, backend: &str) -> Self {
        self.backend_used = Some(backend.to_string());
        self
    }

    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.download_time_ms = Some(elapsed.as_millis() as u64);
        self
    }

    pub fn with_metadata(mut self, metadata: DownloadMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn formatted_file_size(&self) -> String {
        if self.file_size == 0 {
            return "Unknown".to_string();
        }
        crate::utils::format_file_size(self.file_size)
    }

    pub fn formatted_download_time(&self) -> String {
        match self.download_time_ms {
            Some(ms) if ms > 0 => crate::utils::format_duration(Duration::from_millis(ms)),
            _ => "Unknown".to_string(),
        }
    }

    /// Successful and the file is still on disk.
    pub fn is_valid(&self) -> bool {
        self.success && self.file_path.as_ref().map_or(false, |p| p.exists())
    }
}

/// One acquisition strategy. Implementations never panic or error for
/// ordinary failures: "not found" is `Ok(None)` and transfer problems are a
/// failed [`DownloadResult`].
#[async_trait::async_trait]
pub trait DownloadBackendService: Send + Sync {
    /// Looks up a free-text query or a supported locator.
    async fn resolve(&self, query: &str) -> Result<Option<VideoInfo>>;

    /// Resolves several queries, silently dropping the ones that fail.
    async fn resolve_many(&self, queries: &[String]) -> Vec<VideoInfo> {
        let mut found = Vec::with_capacity(queries.len());
        for query in queries {
            match self.resolve(query).await {
                Ok(Some(info)) => found.push(info),
                Ok(None) => {}
                Err(e) => log::debug!("{} could not resolve '{}': {}", self.name(), query, e),
            }
        }
        found
    }

    /// Entries of a playlist locator in playlist order, or `None` when this
    /// backend cannot list playlists.
    async fn expand_playlist(&self, _url: &str) -> Result<Option<Vec<VideoInfo>>> {
        Ok(None)
    }

    async fn retrieve(&self, request: &DownloadRequest) -> DownloadResult;

    fn supports_url(&self, url: &str) -> bool;

    fn name(&self) -> &str;

    /// Probes the host for this backend's prerequisites.
    async fn is_available(&self) -> bool;

    fn metrics(&self) -> BackendMetrics;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_info(title: &str) -> VideoInfo {
        VideoInfo::new("abc123", title, "https://www.youtube.com/watch?v=abc123")
    }

    #[test]
    fn test_target_filename_uses_sanitized_title() {
        let request = DownloadRequest::new(sample_info("AC/DC:  Back   in Black?"), "/tmp/out");
        assert_eq!(request.target_filename(), "ACDC Back in Black.mp3");
    }

    #[test]
    fn test_target_filename_custom_override_keeps_single_extension() {
        let request = DownloadRequest::new(sample_info("ignored"), "/tmp/out")
            .with_format(AudioFormat::Flac)
            .with_filename("My Song.flac");
        assert_eq!(request.target_filename(), "My Song.flac");

        let request = request.with_filename("Other");
        assert_eq!(request.target_filename(), "Other.flac");
    }

    #[test]
    fn test_target_filename_falls_back_to_id() {
        let request = DownloadRequest::new(sample_info("???"), "/tmp/out");
        assert_eq!(request.target_filename(), "abc123.mp3");

        let mut info = sample_info("");
        info.id = String::new();
        let request = DownloadRequest::new(info, "/tmp/out").with_format(AudioFormat::Wav);
        assert_eq!(request.target_filename(), "untitled.wav");
    }

    #[test]
    fn test_target_filename_stays_within_name_limit() {
        let request = DownloadRequest::new(sample_info(&"Long title ".repeat(30)), "/tmp/out");
        let name = request.target_filename();
        assert!(name.ends_with(".mp3"));
        assert!(name.len() <= crate::utils::MAX_FILENAME_BYTES + 4);

        let staged = crate::utils::staging_path(&request.target_path());
        assert!(staged.file_name().unwrap().len() < 255);

        let request = request.with_filename("Ünïcödé.MP3");
        assert_eq!(request.target_filename(), "Ünïcödé.mp3");
    }

    #[test]
    fn test_completed_requires_non_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.mp3");
        std::fs::write(&path, b"").unwrap();

        let result = DownloadResult::completed(&path, "stub", Duration::from_millis(5));
        assert!(!result.success);
        assert!(result.file_path.is_none());
        assert_eq!(result.failure_kind, Some(FailureKind::TransferFailed));

        std::fs::write(&path, b"ID3data").unwrap();
        let result = DownloadResult::completed(&path, "stub", Duration::from_millis(5));
        assert!(result.success);
        assert_eq!(result.file_size, 7);
        assert_eq!(result.file_name.as_deref(), Some("empty.mp3"));
        assert!(result.is_valid());
    }

    #[tokio::test]
    async fn test_resolve_many_drops_misses_and_errors() {
        let stub = crate::test_utils::StubBackend::new("stub")
            .missing("nothing here")
            .error_for("broken");
        let queries: Vec<String> = ["first", "nothing here", "broken", "second"]
            .iter()
            .map(|q| q.to_string())
            .collect();

        let found = stub.resolve_many(&queries).await;
        let titles: Vec<_> = found.iter().map(|info| info.title.as_str()).collect();
        assert_eq!(titles, vec!["first", "second"]);
        assert_eq!(stub.resolves(), 4);
        assert_eq!(stub.metrics().resolve_errors, 1);
        assert!(stub.resolve_many(&[]).await.is_empty());
    }

    #[test]
    fn test_failure_never_carries_path() {
        let result = DownloadResult::failure(FailureKind::NotFound, "nothing").with_backend("stub");
        assert!(!result.success);
        assert!(result.file_path.is_none());
        assert!(!result.is_valid());
        assert_eq!(result.formatted_file_size(), "Unknown");
    }
}
