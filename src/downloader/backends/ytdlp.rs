use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use async_trait::async_trait;
use moka::future::Cache;
use serde::Deserialize;
use crate::config::{AppConfig, AudioFormat};
use crate::downloader::backends::{finish_attempt, finish_staged, prepare_target};
use crate::downloader::process::{command_version, run_with_timeout, ProcessOutput};
use crate::downloader::{
    BackendMetrics, DownloadBackendService, DownloadRequest, DownloadResult, MetricsRecorder, VideoInfo,
    VideoQuality,
};
use crate::errors::{AppError, Result};
use crate::queries::is_playlist_url;
use crate::utils::{is_http_url, staging_path};

/// Sites yt-dlp handles well enough to accept as direct locators.
const SUPPORTED_DOMAINS: &[&str] = &[
    "youtube.com",
    "youtu.be",
    "music.youtube.com",
    "soundcloud.com",
    "vimeo.com",
    "bandcamp.com",
    "dailymotion.com",
    "mixcloud.com",
    "twitch.tv",
    "tiktok.com",
    "instagram.com",
    "x.com",
    "twitter.com",
];

const RESOLVE_CACHE_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone)]
enum Launcher {
    Binary(String),
    PythonModule(String),
}

/// yt-dlp, either as a standalone binary or through `python -m yt_dlp`.
pub struct YtDlpBackend {
    name: &'static str,
    launcher: Launcher,
    ffmpeg_path: Option<String>,
    resolve_timeout: Duration,
    download_timeout: Duration,
    probe_timeout: Duration,
    cache: Cache<String, VideoInfo>,
    metrics: MetricsRecorder,
    version: Mutex<Option<String>>,
}

/// The subset of `yt-dlp -j` output we use.
#[derive(Debug, Deserialize)]
struct YtDlpInfo {
    id: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    track: Option<String>,
    #[serde(default)]
    artist: Option<String>,
    #[serde(default)]
    uploader: Option<String>,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    webpage_url: Option<String>,
    #[serde(default)]
    original_url: Option<String>,
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default)]
    thumbnail: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    view_count: Option<u64>,
    #[serde(default)]
    abr: Option<f64>,
}

impl YtDlpInfo {
    fn into_video_info(self, fallback_url: &str) -> VideoInfo {
        let url = self
            .webpage_url
            .or(self.original_url)
            .unwrap_or_else(|| fallback_url.to_string());
        let title = self
            .title
            .or(self.track)
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| self.id.clone());
        let quality = match self.abr {
            Some(abr) if abr >= 256.0 => VideoQuality::UltraHigh,
            Some(abr) if abr >= 160.0 => VideoQuality::High,
            Some(abr) if abr >= 96.0 => VideoQuality::Medium,
            Some(_) => VideoQuality::Low,
            None => VideoQuality::High,
        };

        let mut info = VideoInfo::new(self.id, title, url);
        info.artist = self.artist;
        info.uploader = self.uploader.or(self.channel);
        info.duration_seconds = self.duration.filter(|d| *d > 0.0).map(|d| d.round() as u64);
        info.quality = quality;
        info.thumbnail_url = self.thumbnail;
        info.description = self.description;
        info.view_count = self.view_count;
        info
    }
}

/// One entry of `yt-dlp -J --flat-playlist` output.
#[derive(Debug, Deserialize)]
struct FlatEntry {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    webpage_url: Option<String>,
    #[serde(default)]
    ie_key: Option<String>,
    #[serde(default)]
    uploader: Option<String>,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    duration: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct FlatPlaylist {
    #[serde(default)]
    entries: Vec<Option<FlatEntry>>,
}

impl FlatEntry {
    /// Older yt-dlp releases put the bare video id in `url` for YouTube entries.
    fn into_video_info(self) -> Option<VideoInfo> {
        let url = self
            .webpage_url
            .or(self.url)
            .filter(|u| is_http_url(u))
            .or_else(|| match (self.ie_key.as_deref(), self.id.as_deref()) {
                (Some("Youtube"), Some(id)) => Some(format!("https://www.youtube.com/watch?v={}", id)),
                _ => None,
            })?;
        let id = self.id.unwrap_or_else(|| url.clone());
        let title = self.title.filter(|t| !t.trim().is_empty()).unwrap_or_else(|| id.clone());

        let mut info = VideoInfo::new(id, title, url);
        info.uploader = self.uploader.or(self.channel);
        info.duration_seconds = self.duration.filter(|d| *d > 0.0).map(|d| d.round() as u64);
        Some(info)
    }
}

/// Entries of the playlist JSON printed by `yt-dlp -J --flat-playlist`.
/// Unavailable entries (`null`) and entries without a locator are skipped.
fn parse_playlist(lines: &[String]) -> Result<Vec<VideoInfo>> {
    let Some(line) = lines.iter().map(|l| l.trim()).find(|l| l.starts_with('{')) else {
        return Ok(Vec::new());
    };
    let playlist: FlatPlaylist = serde_json::from_str(line)?;
    Ok(playlist
        .entries
        .into_iter()
        .flatten()
        .filter_map(FlatEntry::into_video_info)
        .collect())
}

/// yt-dlp embeds covers into these containers without extra Python packages.
fn embeds_cover(format: AudioFormat) -> bool {
    matches!(format, AudioFormat::Mp3 | AudioFormat::M4a)
}

/// Parses the first JSON object printed by `yt-dlp -j`.
fn parse_descriptor(lines: &[String], fallback_url: &str) -> Result<Option<VideoInfo>> {
    let Some(line) = lines.iter().map(|l| l.trim()).find(|l| l.starts_with('{')) else {
        return Ok(None);
    };
    let raw: YtDlpInfo = serde_json::from_str(line)?;
    Ok(Some(raw.into_video_info(fallback_url)))
}

/// Files yt-dlp reports writing, in output order.
fn reported_destinations(lines: &[String]) -> Vec<PathBuf> {
    const MARKERS: [&str; 3] = [
        "[ExtractAudio] Destination: ",
        "[download] Destination: ",
        "[Merger] Merging formats into ",
    ];

    let mut found = Vec::new();
    for line in lines {
        let line = line.trim();
        if let Some(path) = MARKERS.iter().find_map(|m| line.strip_prefix(m)) {
            found.push(PathBuf::from(path.trim().trim_matches('"')));
        } else if let Some(rest) = line.strip_prefix("[download] ") {
            if let Some(path) = rest.strip_suffix(" has already been downloaded") {
                found.push(PathBuf::from(path.trim()));
            }
        }
    }
    found
}

/// Staging files in `dir` whose name starts with `prefix`.
async fn staged_files(dir: &Path, prefix: &str) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return found;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        if entry.file_name().to_string_lossy().starts_with(prefix) {
            found.push(entry.path());
        }
    }
    found
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension().map(|e| e.to_string_lossy().to_ascii_lowercase())
}

impl YtDlpBackend {
    fn with_launcher(name: &'static str, launcher: Launcher, config: &AppConfig) -> Self {
        Self {
            name,
            launcher,
            ffmpeg_path: config.ffmpeg_path.clone(),
            resolve_timeout: config.resolve_timeout(),
            download_timeout: config.download_timeout(),
            probe_timeout: config.probe_timeout(),
            cache: Cache::builder()
                .max_capacity(1_000)
                .time_to_live(RESOLVE_CACHE_TTL)
                .build(),
            metrics: MetricsRecorder::new(name),
            version: Mutex::new(None),
        }
    }

    pub fn binary(config: &AppConfig) -> Self {
        Self::with_launcher("yt-dlp", Launcher::Binary(config.ytdlp_path.clone()), config)
    }

    pub fn python_module(config: &AppConfig) -> Self {
        Self::with_launcher("python", Launcher::PythonModule(config.python_path.clone()), config)
    }

    fn tag(&self) -> &'static str {
        match self.launcher {
            Launcher::Binary(_) => "YT-DLP",
            Launcher::PythonModule(_) => "PY-YTDLP",
        }
    }

    /// Program and full argument list for one yt-dlp invocation.
    fn command(&self, args: Vec<String>) -> (String, Vec<String>) {
        match &self.launcher {
            Launcher::Binary(path) => (path.clone(), args),
            Launcher::PythonModule(python) => {
                let mut full = vec!["-m".to_string(), "yt_dlp".to_string()];
                full.extend(args);
                (python.clone(), full)
            }
        }
    }

    async fn run(&self, args: Vec<String>, timeout: Duration) -> Result<ProcessOutput> {
        let (program, args) = self.command(args);
        log::debug!("🚀 [{}] {} {}", self.tag(), program, args.join(" "));
        run_with_timeout(&program, &args, timeout).await
    }

    async fn resolve_uncached(&self, target: &str, fallback_url: &str) -> Result<Option<VideoInfo>> {
        let args = vec![
            "-j".to_string(),
            "--no-playlist".to_string(),
            "--no-warnings".to_string(),
            target.to_string(),
        ];
        let output = self.run(args, self.resolve_timeout).await?;

        if output.timed_out {
            return Err(AppError::Process(format!(
                "resolve timed out after {}s",
                self.resolve_timeout.as_secs()
            )));
        }
        if !output.success() {
            return Err(AppError::Download(format!(
                "yt-dlp resolve failed: {}",
                output.stderr_tail(3)
            )));
        }
        parse_descriptor(&output.stdout_lines, fallback_url)
    }

    async fn download(&self, request: &DownloadRequest) -> Result<PathBuf> {
        if let Some(existing) = prepare_target(request).await? {
            return Ok(existing);
        }

        let target = request.target_path();
        let staging = staging_path(&target);
        let staged_stem = staging
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let template = staging.with_extension("%(ext)s");

        let mut args = vec![
            "--extract-audio".to_string(),
            "--audio-format".to_string(),
            request.audio_format.extension().to_string(),
            "--audio-quality".to_string(),
            request.audio_quality.bitrate_arg(),
            "--embed-metadata".to_string(),
            "--newline".to_string(),
            "--no-playlist".to_string(),
            "--no-warnings".to_string(),
            "--output".to_string(),
            template.to_string_lossy().into_owned(),
        ];
        if embeds_cover(request.audio_format) {
            args.push("--embed-thumbnail".to_string());
        }
        if let Some(ffmpeg) = &self.ffmpeg_path {
            args.push("--ffmpeg-location".to_string());
            args.push(ffmpeg.clone());
        }
        args.push(request.video_info.url.clone());

        log::info!("⬇️ [{}] Downloading '{}'", self.tag(), request.video_info.title);
        let output = self.run(args, self.download_timeout).await?;
        let prefix = format!("{}.", staged_stem);

        if !output.success() {
            for leftover in staged_files(&request.output_dir, &prefix).await {
                let _ = tokio::fs::remove_file(leftover).await;
            }
            if output.timed_out {
                return Err(AppError::Process(format!(
                    "download timed out after {}s",
                    self.download_timeout.as_secs()
                )));
            }
            return Err(AppError::Download(format!("yt-dlp failed: {}", output.stderr_tail(3))));
        }

        let produced = self.find_produced_file(&output, &request.output_dir, &prefix, request).await?;
        for leftover in staged_files(&request.output_dir, &prefix).await {
            if leftover != produced {
                let _ = tokio::fs::remove_file(leftover).await;
            }
        }

        let ext = extension_of(&produced);
        finish_staged(
            &produced,
            ext.as_deref(),
            request,
            None,
            self.ffmpeg_path.as_deref().unwrap_or("ffmpeg"),
            self.download_timeout,
        )
        .await
    }

    /// Reported destination first, then a scan of the output directory.
    async fn find_produced_file(
        &self,
        output: &ProcessOutput,
        dir: &Path,
        prefix: &str,
        request: &DownloadRequest,
    ) -> Result<PathBuf> {
        let reported = reported_destinations(&output.stdout_lines)
            .into_iter()
            .rev()
            .find(|path| path.is_file());
        if let Some(path) = reported {
            return Ok(path);
        }

        log::debug!("🔍 [{}] No destination line, scanning {:?}", self.tag(), dir);
        let wanted = request.audio_format.extension();
        let candidates = staged_files(dir, prefix).await;
        candidates
            .iter()
            .find(|p| extension_of(p).as_deref() == Some(wanted))
            .or_else(|| candidates.iter().find(|p| extension_of(p).as_deref() != Some("part")))
            .cloned()
            .ok_or_else(|| AppError::Download("yt-dlp reported success but produced no file".to_string()))
    }
}

#[async_trait]
impl DownloadBackendService for YtDlpBackend {
    async fn resolve(&self, query: &str) -> Result<Option<VideoInfo>> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(None);
        }
        let target = if is_http_url(query) {
            if !self.supports_url(query) {
                return Ok(None);
            }
            query.to_string()
        } else {
            format!("ytsearch1:{}", query)
        };

        if let Some(cached) = self.cache.get(&target).await {
            log::debug!("💾 [{}] Cache hit for '{}'", self.tag(), query);
            return Ok(Some(cached));
        }

        match self.resolve_uncached(&target, query).await {
            Ok(Some(info)) => {
                log::info!("🔍 [{}] '{}' -> {} ({})", self.tag(), query, info.title, info.id);
                self.cache.insert(target, info.clone()).await;
                Ok(Some(info))
            }
            Ok(None) => {
                log::info!("🔍 [{}] No match for '{}'", self.tag(), query);
                Ok(None)
            }
            Err(e) => {
                log::warn!("⚠️ [{}] Resolve failed for '{}': {}", self.tag(), query, e);
                self.metrics.record_resolve_error();
                Err(e)
            }
        }
    }

    async fn expand_playlist(&self, url: &str) -> Result<Option<Vec<VideoInfo>>> {
        let url = url.trim();
        if !is_playlist_url(url) || !self.supports_url(url) {
            return Ok(None);
        }

        let args = vec![
            "-J".to_string(),
            "--flat-playlist".to_string(),
            "--ignore-errors".to_string(),
            "--no-warnings".to_string(),
            url.to_string(),
        ];
        let output = self.run(args, self.resolve_timeout).await?;
        if output.timed_out {
            return Err(AppError::Process(format!(
                "playlist listing timed out after {}s",
                self.resolve_timeout.as_secs()
            )));
        }

        // --ignore-errors can exit non-zero while still printing the entries it could read.
        let entries = parse_playlist(&output.stdout_lines)?;
        if entries.is_empty() && !output.success() {
            return Err(AppError::Download(format!(
                "yt-dlp playlist listing failed: {}",
                output.stderr_tail(3)
            )));
        }
        log::info!("📃 [{}] {} has {} entries", self.tag(), url, entries.len());
        Ok(Some(entries))
    }

    async fn retrieve(&self, request: &DownloadRequest) -> DownloadResult {
        let started = Instant::now();
        let outcome = self.download(request).await;
        finish_attempt(self.name, &self.metrics, request, started, outcome)
    }

    fn supports_url(&self, url: &str) -> bool {
        let Ok(parsed) = url::Url::parse(url.trim()) else {
            return false;
        };
        let Some(host) = parsed.host_str() else {
            return false;
        };
        let host = host.trim_start_matches("www.").trim_start_matches("m.");
        SUPPORTED_DOMAINS
            .iter()
            .any(|domain| host == *domain || host.ends_with(&format!(".{}", domain)))
    }

    fn name(&self) -> &str {
        self.name
    }

    async fn is_available(&self) -> bool {
        let version = match &self.launcher {
            Launcher::Binary(path) => command_version(path, &["--version"], self.probe_timeout).await,
            Launcher::PythonModule(python) => {
                command_version(
                    python,
                    &["-c", "import yt_dlp; print(yt_dlp.version.__version__)"],
                    self.probe_timeout,
                )
                .await
            }
        };
        let available = version.is_some();
        self.metrics.set_available(available);
        *self.version.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = version;
        available
    }

    fn metrics(&self) -> BackendMetrics {
        let version = self.version.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clone();
        self.metrics.snapshot(version)
    }
}
