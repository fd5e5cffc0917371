use std::path::Path;
use crate::errors::{AppError, Result};

pub const MAX_QUERY_LENGTH: usize = 500;

pub fn validate_query(query: &str) -> Result<()> {
    if query.trim().is_empty() {
        return Err(AppError::Validation("Search query cannot be empty".to_string()));
    }
    if query.chars().count() > MAX_QUERY_LENGTH {
        return Err(AppError::Validation(format!(
            "Search query too long (max {} characters)",
            MAX_QUERY_LENGTH
        )));
    }
    if query.chars().any(char::is_control) {
        return Err(AppError::Validation("Search query contains control characters".to_string()));
    }
    Ok(())
}

/// Reads a query list. The format follows the extension:
///
/// * `.yml`, `.yaml`, `.json`, `.toml`: a `songs` list
/// * `.csv`: `title` and optional `artist` columns, or a single column without headers
/// * anything else: one query per line, `#` starts a comment
pub fn load_queries(path: &Path) -> Result<Vec<String>> {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();

    let raw = match ext.as_str() {
        "yml" | "yaml" | "json" | "toml" => load_structured(path)?,
        "csv" => load_csv(path)?,
        _ => load_lines(&std::fs::read_to_string(path)?),
    };
    log::debug!("Read {} entries from {:?}", raw.len(), path);
    normalize(raw)
}

fn load_structured(path: &Path) -> Result<Vec<String>> {
    let settings = config::Config::builder()
        .add_source(config::File::from(path).required(true))
        .build()?;
    settings.get::<Vec<String>>("songs").map_err(|e| {
        AppError::Validation(format!("{} has no usable `songs` list: {}", path.display(), e))
    })
}

fn load_csv(path: &Path) -> Result<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)?;

    let mut records = reader.records();
    let Some(first) = records.next().transpose()? else {
        return Ok(Vec::new());
    };

    let header: Vec<String> = first.iter().map(|h| h.to_ascii_lowercase()).collect();
    let title_col = header.iter().position(|h| h == "title");
    let artist_col = header.iter().position(|h| h == "artist");

    let mut queries = Vec::new();
    match title_col {
        Some(title_col) => {
            for record in records {
                let record = record?;
                let title = record.get(title_col).unwrap_or_default();
                let artist = artist_col.and_then(|c| record.get(c)).unwrap_or_default();
                queries.push(match (artist.is_empty(), title.is_empty()) {
                    (false, false) => format!("{} - {}", artist, title),
                    (true, _) => title.to_string(),
                    (false, true) => artist.to_string(),
                });
            }
        }
        None => {
            queries.push(first.get(0).unwrap_or_default().to_string());
            for record in records {
                queries.push(record?.get(0).unwrap_or_default().to_string());
            }
        }
    }
    Ok(queries)
}

fn load_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// Trims, drops blanks, validates the rest. An empty result is an error.
pub fn normalize(raw: Vec<String>) -> Result<Vec<String>> {
    let mut queries = Vec::with_capacity(raw.len());
    for (index, query) in raw.into_iter().enumerate() {
        let query = query.trim();
        if query.is_empty() {
            continue;
        }
        validate_query(query).map_err(|e| AppError::Validation(format!("entry {}: {}", index + 1, e)))?;
        queries.push(query.to_string());
    }
    if queries.is_empty() {
        return Err(AppError::Validation("No queries to process".to_string()));
    }
    Ok(queries)
}

/// True for locators naming a playlist or album rather than one track.
///
/// A YouTube watch URL that also carries `list=` is treated as the single
/// video it points at.
pub fn is_playlist_url(value: &str) -> bool {
    let Ok(url) = url::Url::parse(value.trim()) else {
        return false;
    };
    if !matches!(url.scheme(), "http" | "https") {
        return false;
    }

    let path = url.path().trim_end_matches('/');
    if path.contains("/sets/") || path.contains("/album/") {
        return true;
    }
    let mut has_list = false;
    let mut has_video = false;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "list" if !value.is_empty() => has_list = true,
            "v" => has_video = true,
            _ => {}
        }
    }
    has_list && (!has_video || path.ends_with("/playlist"))
}

/// Command-line queries followed by the ones read from `file`.
pub fn collect_queries(args: &[String], file: Option<&Path>) -> Result<Vec<String>> {
    let mut raw = args.to_vec();
    if let Some(file) = file {
        raw.extend(load_queries(file)?);
    }
    normalize(raw)
}
