use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Counters reported with every result
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    #[serde(rename = "filescount")]
    pub files_count: u64,
    #[serde(rename = "openfailed")]
    pub open_failed: u64,
    #[serde(rename = "totalhits")]
    pub total_hits: u64,
    #[serde(rename = "exectime")]
    pub exec_time: String,
}

/// Per-invocation state threaded through the walker, the evaluator and the
/// results builder: statistics plus the error log.
///
/// With an error bound set, errors past the bound are still logged but only
/// counted, and [`RunContext::error_log`] ends with an "N errors omitted" line.
#[derive(Debug)]
pub struct RunContext {
    pub stats: Statistics,
    pub errors: Vec<String>,
    omitted: usize,
    fatal: Option<String>,
    error_bound: Option<usize>,
    started: Instant,
}

impl RunContext {
    pub fn new() -> Self {
        Self::with_error_bound(None)
    }

    pub fn with_error_bound(error_bound: Option<usize>) -> Self {
        Self {
            stats: Statistics::default(),
            errors: Vec::new(),
            omitted: 0,
            fatal: None,
            error_bound,
            started: Instant::now(),
        }
    }

    pub fn set_error_bound(&mut self, error_bound: Option<usize>) {
        self.error_bound = error_bound;
    }

    /// Records a non-fatal error.
    pub fn record_error(&mut self, err: impl Display) {
        let message = err.to_string();
        warn!("{}", message);
        if self.error_bound.is_some_and(|bound| self.errors.len() >= bound) {
            self.omitted += 1;
        } else {
            self.errors.push(message);
        }
    }

    /// Records the error that ended the invocation. It is always reported,
    /// after the bounded log.
    pub fn record_fatal(&mut self, err: impl Display) {
        let message = err.to_string();
        error!("{}", message);
        self.fatal = Some(message);
    }

    /// Errors as reported to the caller.
    pub fn error_log(&self) -> Vec<String> {
        let mut log = self.errors.clone();
        if self.omitted > 0 {
            log.push(format!("{} errors omitted", self.omitted));
        }
        log.extend(self.fatal.iter().cloned());
        log
    }

    /// Records a file or directory that could not be opened.
    pub fn record_open_failure(&mut self, path: &Path, err: impl Display) {
        self.stats.open_failed += 1;
        self.record_error(format!("failed to open '{}': {}", path.display(), err));
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Stamps the elapsed time and returns the final statistics.
    pub fn finish(&mut self) -> Statistics {
        // humantime prints nanoseconds; microseconds are plenty
        let elapsed = Duration::from_micros(self.elapsed().as_micros() as u64);
        self.stats.exec_time = humantime::format_duration(elapsed).to_string();
        self.log_stats();
        self.stats.clone()
    }

    pub fn log_stats(&self) {
        info!(
            "Search statistics:\n\
             Files checked: {}\n\
             Failed to open: {}\n\
             Total hits: {}\n\
             Errors: {}\n\
             Execution time: {}",
            self.stats.files_count,
            self.stats.open_failed,
            self.stats.total_hits,
            self.errors.len() + self.omitted,
            self.stats.exec_time
        );
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}
