use std::path::PathBuf;
use std::process::ExitCode;
use anyhow::Context;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use crate::config::{AppConfig, AudioFormat, AudioQuality};
use crate::downloader::backends::{BackendFactory, BackendKind};
use crate::downloader::manager::{BackendStatus, BatchReport, DownloadManager};
use crate::downloader::{ffmpeg, BackendMetrics};
use crate::queries::collect_queries;

/// Download songs by name or URL, falling back across several backends.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Config file (defaults to <config dir>/song-downloader/config.*)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Download one or more songs
    Download {
        /// Free-text queries ("Artist - Title") or URLs
        queries: Vec<String>,
        /// Read queries from a .yml/.json/.toml/.csv/.txt file
        #[arg(short, long)]
        file: Option<PathBuf>,
        /// Output directory
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[arg(long, value_enum)]
        format: Option<AudioFormat>,
        #[arg(long, value_enum)]
        quality: Option<AudioQuality>,
        /// Keep files that already exist
        #[arg(long)]
        no_overwrite: bool,
        /// Concurrent downloads
        #[arg(short, long)]
        jobs: Option<usize>,
        /// Stop starting new downloads after this many seconds
        #[arg(long, value_name = "SECS")]
        deadline: Option<u64>,
        #[arg(long)]
        json: bool,
    },
    /// Resolve a query without downloading it
    Info {
        query: String,
        #[arg(long)]
        json: bool,
    },
    /// Show which backends work on this machine
    Status {
        #[arg(long)]
        json: bool,
    },
}

impl Cli {
    pub fn log_level(&self) -> log::LevelFilter {
        if self.verbose {
            log::LevelFilter::Debug
        } else if self.quiet {
            log::LevelFilter::Warn
        } else {
            log::LevelFilter::Info
        }
    }
}

pub async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let mut config = AppConfig::load_from(cli.config.as_deref()).context("failed to load configuration")?;

    match cli.command {
        Commands::Download {
            queries,
            file,
            output,
            format,
            quality,
            no_overwrite,
            jobs,
            deadline,
            json,
        } => {
            if let Some(output) = output {
                config.download_path = output;
            }
            if let Some(format) = format {
                config.preferred_format = format;
            }
            if let Some(quality) = quality {
                config.preferred_quality = quality;
            }
            if no_overwrite {
                config.overwrite_existing = false;
            }
            if let Some(jobs) = jobs {
                config.max_concurrent_downloads = jobs;
            }
            if deadline.is_some() {
                config.batch_deadline_secs = deadline;
            }
            config.validate()?;

            let queries = collect_queries(&queries, file.as_deref()).context("no usable queries")?;
            download(&config, &queries, json).await
        }
        Commands::Info { query, json } => info(&config, &query, json).await,
        Commands::Status { json } => status(&config, json).await,
    }
}

fn progress_bar(len: usize, hidden: bool) -> anyhow::Result<ProgressBar> {
    if hidden {
        return Ok(ProgressBar::hidden());
    }
    let pb = ProgressBar::new(len as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.green/dim}] {pos}/{len} {msg}")?
            .progress_chars("█▓░"),
    );
    Ok(pb)
}

async fn download(config: &AppConfig, queries: &[String], json: bool) -> anyhow::Result<ExitCode> {
    let manager = DownloadManager::new(config).await?;
    let queries = manager.expand_playlists(queries).await;
    log::info!(
        "🎵 Downloading {} songs to {:?} as {} ({} kbps)",
        queries.len(),
        config.download_path,
        manager.options().audio_format.extension(),
        manager.options().audio_quality.bitrate_kbps()
    );

    let pb = progress_bar(queries.len(), json)?;
    let report = manager
        .acquire_all_with(&queries, &config.download_path, |_, result| {
            pb.inc(1);
            if let Some(name) = &result.file_name {
                pb.set_message(name.clone());
            }
        })
        .await;
    pb.finish_and_clear();

    if json {
        let out = serde_json::json!({
            "report": report,
            "metrics": manager.all_metrics(),
            "backends": manager.backend_status(),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        print_report(&report);
        println!();
        print_metrics(&manager.all_metrics());
    }

    Ok(if report.failed == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}

fn print_report(report: &BatchReport) {
    for (query, result) in report.iter() {
        if result.success {
            println!(
                "✅ {} -> {} ({}, {}, {})",
                query,
                result
                    .file_path
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default(),
                result.formatted_file_size(),
                result.formatted_download_time(),
                result.backend_used.as_deref().unwrap_or("?")
            );
        } else {
            println!(
                "❌ {}: {}",
                query,
                result.error_message.as_deref().unwrap_or("failed")
            );
        }
    }
    println!(
        "\nDownloaded {} ({:.1}%) in {}",
        report.success_summary(),
        report.success_rate(),
        crate::utils::format_duration(std::time::Duration::from_millis(report.elapsed_ms))
    );
}

fn print_metrics(metrics: &[BackendMetrics]) {
    println!(
        "{:<12} {:>6} {:>6} {:>6} {:>8} {:>10}  {}",
        "BACKEND", "TOTAL", "OK", "FAIL", "RATE", "AVG", "HEALTH"
    );
    for m in metrics {
        println!(
            "{:<12} {:>6} {:>6} {:>6} {:>8} {:>10}  {:?}",
            m.backend_name,
            m.total_downloads,
            m.successful_downloads,
            m.failed_downloads,
            m.formatted_success_rate(),
            m.formatted_average_time(),
            m.health()
        );
    }
}

async fn info(config: &AppConfig, query: &str, json: bool) -> anyhow::Result<ExitCode> {
    crate::queries::validate_query(query)?;
    let manager = DownloadManager::new(config).await?;
    let Some(info) = manager.resolve_info(query).await else {
        if json {
            println!("null");
        } else {
            println!("❌ Nothing found for '{}'", query);
        }
        return Ok(ExitCode::from(1));
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&info)?);
    } else {
        println!("Title:    {}", info.title);
        println!("ID:       {}", info.id);
        println!("URL:      {}", info.url);
        if let Some(uploader) = info.uploader.as_deref().or(info.artist.as_deref()) {
            println!("Uploader: {}", uploader);
        }
        if let Some(duration) = info.duration() {
            println!("Duration: {}", crate::utils::format_duration(duration));
        }
        if let Some(views) = info.view_count {
            println!("Views:    {}", views);
        }
    }
    Ok(ExitCode::SUCCESS)
}

/// Probes every kind, including ones left out of `backend_order`.
async fn status(config: &AppConfig, json: bool) -> anyhow::Result<ExitCode> {
    let factory = BackendFactory::new(config.clone())?;
    let mut rows = Vec::new();
    for kind in BackendKind::ALL {
        let (backend, available) = factory.create_probed(kind).await;
        let version = backend.metrics().version;
        let mut note = kind.description().to_string();
        if let Some(version) = &version {
            note = format!("{} ({})", note, version);
        }
        if !config.backend_order.contains(&kind) {
            note.push_str(", not in backend_order");
        }
        rows.push(BackendStatus {
            name: kind.id().to_string(),
            kind: Some(kind),
            available,
            note,
        });
    }

    let ffmpeg_available = ffmpeg::probe(config.ffmpeg_program(), config.probe_timeout()).await;

    if json {
        let out = serde_json::json!({
            "backends": rows,
            "ffmpeg": {
                "program": config.ffmpeg_program(),
                "available": ffmpeg_available,
            },
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!("{:<12} {:<10} {}", "BACKEND", "STATUS", "NOTE");
        for row in &rows {
            println!(
                "{:<12} {:<10} {}",
                row.name,
                if row.available { "ok" } else { "missing" },
                row.note
            );
        }
        println!(
            "\nffmpeg: {} ({})",
            if ffmpeg_available { "ok" } else { "missing, conversion and tagging disabled" },
            config.ffmpeg_program()
        );
    }

    let any_available = rows.iter().any(|r| r.available);
    Ok(if any_available {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}
