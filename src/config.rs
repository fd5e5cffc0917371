use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use crate::downloader::backends::BackendKind;
use crate::errors::{AppError, Result};

/// Prefix for environment overrides, e.g. `SONG_DOWNLOADER_MAX_CONCURRENT_DOWNLOADS=8`.
const ENV_PREFIX: &str = "SONG_DOWNLOADER";

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub download_path: PathBuf,
    pub max_concurrent_downloads: usize,
    pub preferred_quality: AudioQuality,
    pub preferred_format: AudioFormat,
    pub overwrite_existing: bool,
    pub backend_order: Vec<BackendKind>,
    pub download_timeout_secs: u64,
    pub resolve_timeout_secs: u64,
    pub probe_timeout_secs: u64,
    pub batch_deadline_secs: Option<u64>,
    pub ytdlp_path: String,
    pub python_path: String,
    pub ffmpeg_path: Option<String>,
    pub proxy: Option<String>,
    pub http_timeout_secs: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum AudioQuality {
    Low,    // 128 kbps
    Medium, // 192 kbps
    High,   // 256 kbps
    Best,   // 320 kbps
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Mp3,
    M4a,
    Flac,
    Ogg,
    Wav,
}

impl AudioQuality {
    pub fn bitrate_kbps(&self) -> u32 {
        match self {
            AudioQuality::Low => 128,
            AudioQuality::Medium => 192,
            AudioQuality::High => 256,
            AudioQuality::Best => 320,
        }
    }

    /// Bitrate in the `192K` notation understood by yt-dlp and ffmpeg.
    pub fn bitrate_arg(&self) -> String {
        format!("{}K", self.bitrate_kbps())
    }
}

impl AudioFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "mp3",
            AudioFormat::M4a => "m4a",
            AudioFormat::Flac => "flac",
            AudioFormat::Ogg => "ogg",
            AudioFormat::Wav => "wav",
        }
    }

    /// Format whose container a file with this extension already has.
    /// Raw `.aac` (ADTS) is not an M4A container and needs remuxing.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "mp3" => Some(AudioFormat::Mp3),
            "m4a" | "mp4" => Some(AudioFormat::M4a),
            "flac" => Some(AudioFormat::Flac),
            "ogg" | "oga" => Some(AudioFormat::Ogg),
            "wav" => Some(AudioFormat::Wav),
            _ => None,
        }
    }

    pub fn is_lossless(&self) -> bool {
        matches!(self, AudioFormat::Flac | AudioFormat::Wav)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            download_path: dirs::download_dir()
                .map(|dir| dir.join("song-downloader"))
                .unwrap_or_else(|| PathBuf::from("./downloads")),
            max_concurrent_downloads: 4,
            preferred_quality: AudioQuality::Medium,
            preferred_format: AudioFormat::Mp3,
            overwrite_existing: true,
            backend_order: BackendKind::PREFERENCE_ORDER.to_vec(),
            download_timeout_secs: 300,
            resolve_timeout_secs: 60,
            probe_timeout_secs: 10,
            batch_deadline_secs: None,
            ytdlp_path: "yt-dlp".to_string(),
            python_path: "python3".to_string(),
            ffmpeg_path: None,
            proxy: None,
            http_timeout_secs: 60,
        }
    }
}

impl AppConfig {
    /// Loads the configuration from the default location and the environment.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Layers defaults, an optional config file and `SONG_DOWNLOADER_*` variables.
    ///
    /// An explicit `path` must exist; the default location is optional.
    /// `DOWNLOAD_PATH` is honoured last for compatibility with older setups.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?);

        match path {
            Some(path) => {
                builder = builder.add_source(config::File::from(path).required(true));
            }
            None => {
                if let Some(default_path) = Self::default_config_stem() {
                    builder = builder.add_source(
                        config::File::with_name(&default_path.to_string_lossy()).required(false),
                    );
                }
            }
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("backend_order"),
        );

        let mut config: AppConfig = builder.build()?.try_deserialize()?;

        if let Ok(download_path) = std::env::var("DOWNLOAD_PATH") {
            if !download_path.trim().is_empty() {
                config.download_path = PathBuf::from(download_path);
            }
        }

        config.validate()?;
        log::debug!("Loaded configuration: {:?}", config);
        Ok(config)
    }

    /// `<config_dir>/song-downloader/config`, extension resolved by the config crate.
    fn default_config_stem() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("song-downloader").join("config"))
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_downloads == 0 {
            return Err(AppError::InvalidConfig(
                "max_concurrent_downloads must be at least 1".to_string(),
            ));
        }
        if self.download_timeout_secs == 0
            || self.resolve_timeout_secs == 0
            || self.probe_timeout_secs == 0
            || self.http_timeout_secs == 0
        {
            return Err(AppError::InvalidConfig("timeouts must be greater than zero".to_string()));
        }
        if self.backend_order.is_empty() {
            return Err(AppError::InvalidConfig("backend_order cannot be empty".to_string()));
        }
        if self.ytdlp_path.trim().is_empty() || self.python_path.trim().is_empty() {
            return Err(AppError::InvalidConfig("tool paths cannot be empty".to_string()));
        }
        Ok(())
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_secs(self.resolve_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn batch_deadline(&self) -> Option<Duration> {
        self.batch_deadline_secs.map(Duration::from_secs)
    }

    pub fn ffmpeg_program(&self) -> &str {
        self.ffmpeg_path.as_deref().unwrap_or("ffmpeg")
    }
}
