use std::path::PathBuf;
use std::time::{Duration, Instant};
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use crate::config::AppConfig;
use crate::downloader::backends::{finish_attempt, finish_staged, prepare_target};
use crate::downloader::ffmpeg::TrackTags;
use crate::downloader::http_pool::HttpPool;
use crate::downloader::{
    BackendMetrics, DownloadBackendService, DownloadRequest, DownloadResult, MetricsRecorder, VideoInfo,
    VideoQuality,
};
use crate::errors::{AppError, Result};
use crate::utils::{is_http_url, staging_path};

const YOUTUBE: &str = "https://www.youtube.com";
const PLAYER_RESPONSE_MARKER: &str = "ytInitialPlayerResponse = ";

/// In-process YouTube resolver and audio stream downloader.
///
/// Only streams exposed with a plain URL can be fetched; cipher-protected
/// streams fail the attempt so a tool-based backend can take over.
pub struct NativeBackend {
    http: HttpPool,
    ffmpeg: String,
    download_timeout: Duration,
    metrics: MetricsRecorder,
}

#[derive(Debug, Deserialize)]
struct OEmbed {
    title: String,
    #[serde(default)]
    author_name: Option<String>,
    #[serde(default)]
    thumbnail_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlayerResponse {
    #[serde(default)]
    playability_status: Option<PlayabilityStatus>,
    #[serde(default)]
    streaming_data: Option<StreamingData>,
}

#[derive(Debug, Deserialize)]
struct PlayabilityStatus {
    status: String,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamingData {
    #[serde(default)]
    adaptive_formats: Vec<StreamFormat>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamFormat {
    mime_type: String,
    #[serde(default)]
    bitrate: u64,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    signature_cipher: Option<String>,
}

impl StreamFormat {
    fn is_audio(&self) -> bool {
        self.mime_type.starts_with("audio/")
    }

    /// `audio/webm; codecs="opus"` -> `webm`, `audio/mp4` -> `m4a`.
    fn extension(&self) -> &'static str {
        let container = self
            .mime_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim_start_matches("audio/");
        match container {
            "mp4" => "m4a",
            "webm" => "webm",
            "mpeg" => "mp3",
            _ => "bin",
        }
    }
}

/// The 11-character video id in a YouTube locator.
pub fn extract_video_id(url: &str) -> Option<String> {
    let re = Regex::new(r"(?:[?&]v=|youtu\.be/|/shorts/|/embed/|/live/)([A-Za-z0-9_-]{11})(?:[^A-Za-z0-9_-]|$)").ok()?;
    re.captures(url).map(|c| c[1].to_string())
}

/// First video id on a results page.
fn first_search_result(html: &str) -> Option<String> {
    let re = Regex::new(r#""videoId":"([A-Za-z0-9_-]{11})""#).ok()?;
    re.captures(html).map(|c| c[1].to_string())
}

fn parse_player_response(html: &str) -> Result<PlayerResponse> {
    let start = html
        .find(PLAYER_RESPONSE_MARKER)
        .ok_or_else(|| AppError::Parse("watch page has no player response".to_string()))?;
    let json = &html[start + PLAYER_RESPONSE_MARKER.len()..];
    serde_json::Deserializer::from_str(json)
        .into_iter::<PlayerResponse>()
        .next()
        .ok_or_else(|| AppError::Parse("empty player response".to_string()))?
        .map_err(AppError::from)
}

/// Highest-bitrate audio-only stream that can be fetched without deciphering.
fn pick_audio_stream(player: &PlayerResponse) -> Result<StreamFormat> {
    if let Some(status) = &player.playability_status {
        if status.status != "OK" {
            return Err(AppError::Download(format!(
                "video not playable: {}",
                status.reason.as_deref().unwrap_or(&status.status)
            )));
        }
    }

    let audio: Vec<&StreamFormat> = player
        .streaming_data
        .as_ref()
        .map(|data| data.adaptive_formats.iter().filter(|f| f.is_audio()).collect())
        .unwrap_or_default();
    if audio.is_empty() {
        return Err(AppError::Download("no audio streams offered".to_string()));
    }

    audio
        .into_iter()
        .filter(|f| f.url.is_some())
        .max_by_key(|f| f.bitrate)
        .cloned()
        .ok_or_else(|| AppError::Download("audio streams are cipher-protected".to_string()))
}

fn watch_url(id: &str) -> String {
    format!("{}/watch?v={}", YOUTUBE, id)
}

impl NativeBackend {
    pub fn new(http: HttpPool, config: &AppConfig) -> Self {
        Self {
            http,
            ffmpeg: config.ffmpeg_program().to_string(),
            download_timeout: config.download_timeout(),
            metrics: MetricsRecorder::new("native"),
        }
    }

    async fn search(&self, query: &str) -> Result<Option<String>> {
        let url = format!("{}/results?search_query={}", YOUTUBE, urlencoding::encode(query));
        let html = self.http.get_text(&url).await?;
        Ok(first_search_result(&html))
    }

    async fn describe(&self, id: &str, fallback_title: &str) -> VideoInfo {
        let url = watch_url(id);
        let oembed_url = format!("{}/oembed?url={}&format=json", YOUTUBE, urlencoding::encode(&url));
        let mut info = VideoInfo::new(id, fallback_title, &url);

        match self.http.client().get(&oembed_url).send().await {
            Ok(response) if response.status().is_success() => match response.json::<OEmbed>().await {
                Ok(oembed) => {
                    info.title = oembed.title;
                    info.uploader = oembed.author_name;
                    info.thumbnail_url = oembed.thumbnail_url;
                }
                Err(e) => log::debug!("[NATIVE] Unreadable oEmbed for {}: {}", id, e),
            },
            Ok(response) => log::debug!("[NATIVE] oEmbed for {} returned {}", id, response.status()),
            Err(e) => log::debug!("[NATIVE] oEmbed request for {} failed: {}", id, e),
        }
        info.quality = VideoQuality::Medium;
        info
    }

    async fn resolve_inner(&self, query: &str) -> Result<Option<VideoInfo>> {
        let id = if is_http_url(query) {
            match extract_video_id(query) {
                Some(id) => id,
                None => return Ok(None),
            }
        } else {
            match self.search(query).await? {
                Some(id) => id,
                None => return Ok(None),
            }
        };
        Ok(Some(self.describe(&id, query).await))
    }

    async fn download(&self, request: &DownloadRequest) -> Result<PathBuf> {
        if let Some(existing) = prepare_target(request).await? {
            return Ok(existing);
        }

        let id = extract_video_id(&request.video_info.url)
            .or_else(|| Some(request.video_info.id.clone()).filter(|id| id.len() == 11))
            .ok_or_else(|| AppError::Download(format!("not a YouTube item: {}", request.video_info.url)))?;

        let html = self.http.get_text(&watch_url(&id)).await?;
        let stream = pick_audio_stream(&parse_player_response(&html)?)?;
        let stream_url = stream
            .url
            .as_deref()
            .ok_or_else(|| AppError::Download("stream has no URL".to_string()))?;
        log::info!(
            "⬇️ [NATIVE] Streaming {} at {} kbps ({})",
            id,
            stream.bitrate / 1000,
            stream.mime_type
        );

        let staged = staging_path(&request.target_path());
        let mut last_logged = 0u64;
        self.http
            .download_to_file(stream_url, &staged, self.download_timeout, |downloaded, total| {
                if total > 0 && downloaded * 4 / total > last_logged {
                    last_logged = downloaded * 4 / total;
                    log::debug!("[NATIVE] {}/{} bytes", downloaded, total);
                }
            })
            .await?;

        let tags = TrackTags::from_info(&request.video_info);
        finish_staged(
            &staged,
            Some(stream.extension()),
            request,
            Some(&tags),
            &self.ffmpeg,
            self.download_timeout,
        )
        .await
    }
}

#[async_trait]
impl DownloadBackendService for NativeBackend {
    async fn resolve(&self, query: &str) -> Result<Option<VideoInfo>> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(None);
        }
        match self.resolve_inner(query).await {
            Ok(found) => {
                if let Some(info) = &found {
                    log::info!("🔍 [NATIVE] '{}' -> {} ({})", query, info.title, info.id);
                }
                Ok(found)
            }
            Err(e) => {
                log::warn!("⚠️ [NATIVE] Resolve failed for '{}': {}", query, e);
                self.metrics.record_resolve_error();
                Err(e)
            }
        }
    }

    async fn retrieve(&self, request: &DownloadRequest) -> DownloadResult {
        let started = Instant::now();
        let outcome = self.download(request).await;
        finish_attempt("native", &self.metrics, request, started, outcome)
    }

    fn supports_url(&self, url: &str) -> bool {
        is_http_url(url) && extract_video_id(url).is_some()
    }

    fn name(&self) -> &str {
        "native"
    }

    async fn is_available(&self) -> bool {
        self.metrics.set_available(true);
        true
    }

    fn metrics(&self) -> BackendMetrics {
        self.metrics.snapshot(Some(env!("CARGO_PKG_VERSION").to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_video_id() {
        let id = Some("dQw4w9WgXcQ".to_string());
        assert_eq!(extract_video_id("https://www.youtube.com/watch?v=dQw4w9WgXcQ"), id);
        assert_eq!(extract_video_id("https://youtu.be/dQw4w9WgXcQ?t=10"), id);
        assert_eq!(extract_video_id("https://music.youtube.com/watch?list=x&v=dQw4w9WgXcQ"), id);
        assert_eq!(extract_video_id("https://www.youtube.com/shorts/dQw4w9WgXcQ"), id);
        assert_eq!(extract_video_id("https://www.youtube.com/watch?v=short"), None);
        assert_eq!(extract_video_id("https://example.com/song.mp3"), None);
    }

    #[test]
    fn test_first_search_result() {
        let html = r#"<script>var ytInitialData = {"contents":[{"videoRenderer":{"videoId":"fJ9rUzIMcZQ","title":{}}},{"videoRenderer":{"videoId":"aaaaaaaaaaa"}}]};</script>"#;
        assert_eq!(first_search_result(html).as_deref(), Some("fJ9rUzIMcZQ"));
        assert_eq!(first_search_result("<html>no results</html>"), None);
    }

    fn watch_page(formats: &str) -> String {
        format!(
            r#"<script>var ytInitialPlayerResponse = {{"playabilityStatus":{{"status":"OK"}},"streamingData":{{"adaptiveFormats":[{}]}}}};var meta = {{}};</script>"#,
            formats
        )
    }

    #[test]
    fn test_pick_best_plain_audio_stream() {
        let html = watch_page(
            r#"{"mimeType":"video/mp4; codecs=\"avc1\"","bitrate":900000,"url":"https://v"},
               {"mimeType":"audio/mp4; codecs=\"mp4a.40.2\"","bitrate":130000,"url":"https://a1"},
               {"mimeType":"audio/webm; codecs=\"opus\"","bitrate":160000,"url":"https://a2"},
               {"mimeType":"audio/webm; codecs=\"opus\"","bitrate":190000,"signatureCipher":"s=x"}"#,
        );
        let stream = pick_audio_stream(&parse_player_response(&html).unwrap()).unwrap();
        assert_eq!(stream.url.as_deref(), Some("https://a2"));
        assert_eq!(stream.extension(), "webm");
    }

    #[test]
    fn test_ciphered_streams_are_rejected() {
        let html = watch_page(r#"{"mimeType":"audio/mp4","bitrate":130000,"signatureCipher":"s=x"}"#);
        let err = pick_audio_stream(&parse_player_response(&html).unwrap()).unwrap_err();
        assert!(err.to_string().contains("cipher"));
    }

    #[test]
    fn test_unplayable_video_is_rejected() {
        let html = r#"ytInitialPlayerResponse = {"playabilityStatus":{"status":"LOGIN_REQUIRED","reason":"Sign in to confirm your age"}};"#;
        let err = pick_audio_stream(&parse_player_response(html).unwrap()).unwrap_err();
        assert!(err.to_string().contains("Sign in"));
        assert!(parse_player_response("<html></html>").is_err());
    }

    #[tokio::test]
    async fn test_non_youtube_locator_is_not_resolved() {
        let http = HttpPool::new(2, Duration::from_secs(5)).unwrap();
        let backend = NativeBackend::new(http, &AppConfig::default());
        assert!(backend.resolve("https://example.com/song.mp3").await.unwrap().is_none());
        assert!(!backend.supports_url("https://example.com/song.mp3"));
        assert!(backend.supports_url("https://youtu.be/dQw4w9WgXcQ"));
        assert!(backend.is_available().await);
    }
}
