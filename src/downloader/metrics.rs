use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Point-in-time view of one backend's counters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackendMetrics {
    pub backend_name: String,
    pub total_downloads: u64,
    pub successful_downloads: u64,
    pub failed_downloads: u64,
    pub resolve_errors: u64,
    /// Percentage in `0.0..=100.0`.
    pub success_rate: f64,
    pub average_download_time_ms: u64,
    pub is_available: bool,
    pub last_used: Option<chrono::DateTime<chrono::Utc>>,
    pub version: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BackendHealth {
    Unavailable,
    Healthy,
    Degraded,
    Failing,
}

impl BackendMetrics {
    pub fn formatted_success_rate(&self) -> String {
        format!("{:.1}%", self.success_rate)
    }

    pub fn formatted_average_time(&self) -> String {
        if self.average_download_time_ms == 0 {
            return "N/A".to_string();
        }
        crate::utils::format_duration(Duration::from_millis(self.average_download_time_ms))
    }

    pub fn health(&self) -> BackendHealth {
        if !self.is_available {
            BackendHealth::Unavailable
        } else if self.success_rate >= 95.0 {
            BackendHealth::Healthy
        } else if self.success_rate >= 80.0 {
            BackendHealth::Degraded
        } else {
            BackendHealth::Failing
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "{}: {} downloads, {} success rate, {} avg time",
            self.backend_name,
            self.total_downloads,
            self.formatted_success_rate(),
            self.formatted_average_time()
        )
    }
}

#[derive(Debug, Default)]
struct Timing {
    average_ms: f64,
    samples: u64,
    last_used: Option<chrono::DateTime<chrono::Utc>>,
}

/// Live counters owned by a single backend instance.
///
/// Each finished retrieve is recorded exactly once with
/// [`record_success`](Self::record_success) or
/// [`record_failure`](Self::record_failure). Counters only grow.
#[derive(Debug)]
pub struct MetricsRecorder {
    backend_name: String,
    total: AtomicU64,
    successful: AtomicU64,
    failed: AtomicU64,
    resolve_errors: AtomicU64,
    available: AtomicBool,
    timing: Mutex<Timing>,
}

impl MetricsRecorder {
    pub fn new(backend_name: impl Into<String>) -> Self {
        Self {
            backend_name: backend_name.into(),
            total: AtomicU64::new(0),
            successful: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            resolve_errors: AtomicU64::new(0),
            available: AtomicBool::new(false),
            timing: Mutex::new(Timing::default()),
        }
    }

    pub fn record_success(&self, elapsed: Duration) {
        self.total.fetch_add(1, Ordering::SeqCst);
        self.successful.fetch_add(1, Ordering::SeqCst);
        self.record_timing(elapsed);
    }

    pub fn record_failure(&self, elapsed: Duration) {
        self.total.fetch_add(1, Ordering::SeqCst);
        self.failed.fetch_add(1, Ordering::SeqCst);
        self.record_timing(elapsed);
    }

    pub fn record(&self, success: bool, elapsed: Duration) {
        if success {
            self.record_success(elapsed);
        } else {
            self.record_failure(elapsed);
        }
    }

    /// A resolve that errored out (as opposed to finding nothing).
    pub fn record_resolve_error(&self) {
        self.resolve_errors.fetch_add(1, Ordering::SeqCst);
        self.touch();
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn record_timing(&self, elapsed: Duration) {
        let sample = elapsed.as_secs_f64() * 1000.0;
        let mut timing = self.timing.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        timing.samples += 1;
        timing.average_ms += (sample - timing.average_ms) / timing.samples as f64;
        timing.last_used = Some(chrono::Utc::now());
    }

    fn touch(&self) {
        let mut timing = self.timing.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        timing.last_used = Some(chrono::Utc::now());
    }

    pub fn snapshot(&self, version: Option<String>) -> BackendMetrics {
        let (average_ms, last_used) = {
            let timing = self.timing.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            (timing.average_ms, timing.last_used)
        };
        // `total` is bumped first when recording, so reading it last keeps it
        // at least the sum of the other two.
        let successful = self.successful.load(Ordering::SeqCst);
        let failed = self.failed.load(Ordering::SeqCst);
        let total = self.total.load(Ordering::SeqCst);
        let success_rate = if total > 0 {
            successful as f64 * 100.0 / total as f64
        } else {
            0.0
        };

        BackendMetrics {
            backend_name: self.backend_name.clone(),
            total_downloads: total,
            successful_downloads: successful,
            failed_downloads: failed,
            resolve_errors: self.resolve_errors.load(Ordering::SeqCst),
            success_rate,
            average_download_time_ms: average_ms.round() as u64,
            is_available: self.available.load(Ordering::SeqCst),
            last_used,
            version,
        }
    }
}
