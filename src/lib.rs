//! Multi-backend song downloader.
//!
//! Queries are resolved and retrieved by a priority-ordered chain of
//! backends ([`downloader::manager::DownloadManager`]); the first backend that
//! both finds and transfers an item wins.

pub mod commands;
pub mod config;
pub mod downloader;
pub mod errors;
pub mod queries;
pub mod utils;

#[cfg(test)]
mod test_utils;

pub use config::AppConfig;
pub use downloader::manager::{BatchReport, DownloadManager, ManagerOptions};
pub use errors::{AppError, Result};
