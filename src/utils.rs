use std::path::{Path, PathBuf};
use std::time::Duration;
use crate::errors::Result;
use log::info;

/// Longest sanitized name in bytes. Leaves room for an extension and the
/// staging suffix within the usual 255-byte file name limit.
pub const MAX_FILENAME_BYTES: usize = 200;

/// Sanitizes a filename: drops path-unsafe and control characters,
/// collapses runs of whitespace into one space and caps the length at
/// [`MAX_FILENAME_BYTES`].
pub fn sanitize_filename(filename: &str) -> String {
    let stripped: String = filename
        .chars()
        .filter(|c| !matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*'))
        .filter(|c| !c.is_control() || c.is_whitespace())
        .collect();

    let collapsed = stripped.split_whitespace().collect::<Vec<_>>().join(" ");
    truncate_on_char_boundary(&collapsed, MAX_FILENAME_BYTES)
        .trim()
        .trim_matches('.')
        .trim()
        .to_string()
}

fn truncate_on_char_boundary(value: &str, max_bytes: usize) -> &str {
    if value.len() <= max_bytes {
        return value;
    }
    let mut end = max_bytes;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    &value[..end]
}

/// Creates a directory if it doesn't exist
pub async fn ensure_dir_exists(path: &Path) -> Result<()> {
    if !path.exists() {
        tokio::fs::create_dir_all(path).await?;
        info!("Created directory: {:?}", path);
    }
    Ok(())
}

/// Unique sibling path for an in-progress transfer, e.g. `.Song.3f2a9c1e.part`.
pub fn staging_path(target: &Path) -> PathBuf {
    let stem = target
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "download".to_string());
    let token = uuid::Uuid::new_v4().simple().to_string();
    let name = format!(".{}.{}.part", stem, &token[..8]);
    target.with_file_name(name)
}

/// True when `target` already exists with content and must be kept.
pub fn should_keep_existing(target: &Path, overwrite: bool) -> bool {
    !overwrite && std::fs::metadata(target).map(|m| m.is_file() && m.len() > 0).unwrap_or(false)
}

/// Moves a finished staging file into place, honouring the overwrite policy.
///
/// When the target exists and `overwrite` is false the staged file is
/// discarded and the existing target is kept. Returns the final path.
pub async fn place_file(staged: &Path, target: &Path, overwrite: bool) -> Result<PathBuf> {
    if should_keep_existing(target, overwrite) {
        log::warn!("⚠️ Keeping existing file, discarding new download: {:?}", target);
        let _ = tokio::fs::remove_file(staged).await;
        return Ok(target.to_path_buf());
    }

    if tokio::fs::metadata(target).await.is_ok() {
        log::info!("♻️ Overwriting existing file: {:?}", target);
        // Another transfer of the same title may have moved it already.
        match tokio::fs::remove_file(target).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
                let _ = tokio::fs::remove_file(staged).await;
                return Err(e.into());
            }
            _ => {}
        }
    }

    // Fresh files can stay locked by scanners or indexers for a moment.
    let mut retries = 5u64;
    loop {
        match tokio::fs::rename(staged, target).await {
            Ok(()) => return Ok(target.to_path_buf()),
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied && retries > 1 => {
                let delay = 100 * (6 - retries);
                log::warn!("⚠️ Rename failed ({}), retrying in {}ms", e, delay);
                tokio::time::sleep(Duration::from_millis(delay)).await;
                retries -= 1;
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(staged).await;
                return Err(e.into());
            }
        }
    }
}

pub fn format_file_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{:.2} {}", size, UNITS[unit])
}

pub fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    let (minutes, seconds) = (total / 60, total % 60);
    if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else if total > 0 {
        format!("{}s", seconds)
    } else {
        format!("{}ms", duration.as_millis())
    }
}

/// True for `http://` and `https://` locators.
pub fn is_http_url(value: &str) -> bool {
    url::Url::parse(value.trim())
        .map(|u| matches!(u.scheme(), "http" | "https") && u.host_str().is_some())
        .unwrap_or(false)
}
