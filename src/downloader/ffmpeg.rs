use std::path::Path;
use std::time::Duration;
use crate::config::{AudioFormat, AudioQuality};
use crate::downloader::process::{probe_command, run_with_timeout};
use crate::downloader::VideoInfo;
use crate::errors::{AppError, Result};

/// True when `program -version` runs.
pub async fn probe(program: &str, timeout: Duration) -> bool {
    probe_command(program, &["-version"], timeout).await
}

/// Title and artist written into produced files.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackTags {
    pub title: String,
    pub artist: Option<String>,
    pub comment: Option<String>,
}

impl TrackTags {
    /// Artist falls back to the uploader; the source URL goes into the comment.
    pub fn from_info(info: &VideoInfo) -> Self {
        let artist = info
            .artist
            .as_deref()
            .or(info.uploader.as_deref())
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(str::to_string);
        Self {
            title: info.title.trim().to_string(),
            artist,
            comment: Some(info.url.clone()).filter(|u| !u.is_empty()),
        }
    }

    fn args(&self) -> Vec<String> {
        let mut args = Vec::new();
        let mut push = |key: &str, value: &str| {
            args.push("-metadata".to_string());
            args.push(format!("{}={}", key, value));
        };
        if !self.title.is_empty() {
            push("title", &self.title);
        }
        if let Some(artist) = &self.artist {
            push("artist", artist);
        }
        if let Some(comment) = &self.comment {
            push("comment", comment);
        }
        args
    }
}

fn codec_args(format: AudioFormat, quality: AudioQuality) -> Vec<String> {
    let codec = match format {
        AudioFormat::Mp3 => "libmp3lame",
        AudioFormat::M4a => "aac",
        AudioFormat::Ogg => "libvorbis",
        AudioFormat::Flac => "flac",
        AudioFormat::Wav => "pcm_s16le",
    };
    let mut args = vec!["-c:a".to_string(), codec.to_string()];
    if !format.is_lossless() {
        args.push("-b:a".to_string());
        args.push(quality.bitrate_arg());
    }
    args
}

fn input_args(input: &Path) -> Vec<String> {
    vec![
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-y".into(),
        "-i".into(),
        input.to_string_lossy().into_owned(),
    ]
}

async fn run_ffmpeg(program: &str, args: Vec<String>, output: &Path, timeout: Duration) -> Result<()> {
    let result = run_with_timeout(program, &args, timeout).await?;
    if result.success() {
        return Ok(());
    }

    let _ = tokio::fs::remove_file(output).await;
    if result.timed_out {
        return Err(AppError::Process(format!("ffmpeg timed out after {}s", timeout.as_secs())));
    }
    Err(AppError::Process(format!("ffmpeg failed: {}", result.stderr_tail(3))))
}

/// Re-encodes `input` into `output` with the codec matching `format`.
///
/// Video streams are dropped. `output` is overwritten if present.
pub async fn transcode(
    program: &str,
    input: &Path,
    output: &Path,
    format: AudioFormat,
    quality: AudioQuality,
    tags: Option<&TrackTags>,
    timeout: Duration,
) -> Result<()> {
    let mut args = input_args(input);
    args.push("-vn".into());
    args.extend(codec_args(format, quality));
    if let Some(tags) = tags {
        args.extend(tags.args());
    }
    args.push("-f".into());
    args.push(container_name(format).into());
    args.push(output.to_string_lossy().into_owned());

    log::info!("🎛️ [FFMPEG] Transcoding {:?} -> {:?} ({})", input, output, format.extension());
    run_ffmpeg(program, args, output, timeout).await
}

/// Copies `input` into `output` unchanged apart from the tags.
pub async fn write_tags(
    program: &str,
    input: &Path,
    output: &Path,
    format: AudioFormat,
    tags: &TrackTags,
    timeout: Duration,
) -> Result<()> {
    let mut args = input_args(input);
    args.extend(["-map".to_string(), "0".to_string(), "-c".to_string(), "copy".to_string()]);
    args.extend(tags.args());
    args.push("-f".into());
    args.push(container_name(format).into());
    args.push(output.to_string_lossy().into_owned());

    log::debug!("🏷️ [FFMPEG] Tagging {:?} as '{}'", output, tags.title);
    run_ffmpeg(program, args, output, timeout).await
}

/// Muxer name; staging files end in `.part`, so the container is always explicit.
fn container_name(format: AudioFormat) -> &'static str {
    match format {
        AudioFormat::Mp3 => "mp3",
        AudioFormat::M4a => "ipod",
        AudioFormat::Flac => "flac",
        AudioFormat::Ogg => "ogg",
        AudioFormat::Wav => "wav",
    }
}
