use std::path::PathBuf;
use std::time::{Duration, Instant};
use async_trait::async_trait;
use crate::config::AppConfig;
use crate::downloader::backends::{finish_attempt, finish_staged, prepare_target};
use crate::downloader::ffmpeg::TrackTags;
use crate::downloader::http_pool::HttpPool;
use crate::downloader::{BackendMetrics, DownloadBackendService, DownloadRequest, DownloadResult, MetricsRecorder, VideoInfo};
use crate::errors::Result;
use crate::utils::{is_http_url, staging_path};

const AUDIO_EXTENSIONS: &[&str] = &["mp3", "m4a", "aac", "flac", "ogg", "oga", "opus", "wav"];

/// Plain HTTP(S) download of URLs that already point at an audio file.
pub struct HttpDirectBackend {
    http: HttpPool,
    ffmpeg: String,
    download_timeout: Duration,
    metrics: MetricsRecorder,
}

/// Lowercased extension of the URL's last path segment.
fn url_extension(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url.trim()).ok()?;
    let segment = parsed.path_segments()?.last()?.to_string();
    let (_, ext) = segment.rsplit_once('.')?;
    Some(ext.to_ascii_lowercase())
}

fn has_audio_extension(url: &str) -> bool {
    url_extension(url).map_or(false, |ext| AUDIO_EXTENSIONS.contains(&ext.as_str()))
}

/// Human title from the file name, e.g. `Queen%20-%20Song.mp3` -> `Queen - Song`.
fn title_from_url(url: &str) -> String {
    let parsed = url::Url::parse(url.trim()).ok();
    let segment = parsed
        .as_ref()
        .and_then(|u| u.path_segments())
        .and_then(|mut s| s.next_back())
        .filter(|s| !s.is_empty())
        .map(|s| urlencoding::decode(s).map(|d| d.into_owned()).unwrap_or_else(|_| s.to_string()));

    match segment {
        Some(name) => match name.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => stem.to_string(),
            _ => name,
        },
        None => parsed
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| "download".to_string()),
    }
}

impl HttpDirectBackend {
    pub fn new(http: HttpPool, config: &AppConfig) -> Self {
        Self {
            http,
            ffmpeg: config.ffmpeg_program().to_string(),
            download_timeout: config.download_timeout(),
            metrics: MetricsRecorder::new("http-direct"),
        }
    }

    fn describe(&self, url: &str, size: Option<u64>) -> VideoInfo {
        let mut info = VideoInfo::new(url, title_from_url(url), url);
        if let Some(size) = size {
            info.description = Some(format!("{} bytes", size));
        }
        info
    }

    async fn resolve_inner(&self, url: &str) -> Result<Option<VideoInfo>> {
        if has_audio_extension(url) {
            return Ok(Some(self.describe(url, None)));
        }
        let remote = self.http.head(url).await?;
        if remote.is_audio() {
            return Ok(Some(self.describe(url, remote.content_length)));
        }
        log::debug!("[HTTP] {} is not audio ({:?})", url, remote.content_type);
        Ok(None)
    }

    async fn download(&self, request: &DownloadRequest) -> Result<PathBuf> {
        if let Some(existing) = prepare_target(request).await? {
            return Ok(existing);
        }
        let url = &request.video_info.url;
        let staged = staging_path(&request.target_path());
        log::info!("⬇️ [HTTP] Downloading {}", url);
        self.http
            .download_to_file(url, &staged, self.download_timeout, |_, _| {})
            .await?;

        let ext = url_extension(url);
        let tags = TrackTags::from_info(&request.video_info);
        finish_staged(&staged, ext.as_deref(), request, Some(&tags), &self.ffmpeg, self.download_timeout).await
    }
}

#[async_trait]
impl DownloadBackendService for HttpDirectBackend {
    async fn resolve(&self, query: &str) -> Result<Option<VideoInfo>> {
        let query = query.trim();
        if !is_http_url(query) {
            return Ok(None);
        }
        self.resolve_inner(query).await.map_err(|e| {
            log::warn!("⚠️ [HTTP] Resolve failed for '{}': {}", query, e);
            self.metrics.record_resolve_error();
            e
        })
    }

    async fn retrieve(&self, request: &DownloadRequest) -> DownloadResult {
        let started = Instant::now();
        let outcome = self.download(request).await;
        finish_attempt("http-direct", &self.metrics, request, started, outcome)
    }

    fn supports_url(&self, url: &str) -> bool {
        is_http_url(url) && has_audio_extension(url)
    }

    fn name(&self) -> &str {
        "http-direct"
    }

    async fn is_available(&self) -> bool {
        self.metrics.set_available(true);
        true
    }

    fn metrics(&self) -> BackendMetrics {
        self.metrics.snapshot(None)
    }
}
