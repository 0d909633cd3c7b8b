//! Failure reporting boundary.
//!
//! The store never decides how errors are shown; it hands a [`FailureReport`]
//! to whatever sink the host installed. Write failures carry a
//! [`RetryHandle`] that re-runs a full persist cycle.

use std::fmt;
use std::path::PathBuf;

use super::store::RetryHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// A mutation was rejected before touching the store
    Validation,
    /// A persist cycle left at least one file unwritten
    WriteFailure,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Validation => "validation",
            FailureKind::WriteFailure => "write_failure",
        }
    }
}

pub struct FailureReport {
    pub kind: FailureKind,
    pub message: String,
    pub failed_files: Vec<PathBuf>,
    pub retry: Option<RetryHandle>,
}

impl fmt::Debug for FailureReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FailureReport")
            .field("kind", &self.kind)
            .field("message", &self.message)
            .field("failed_files", &self.failed_files)
            .field("retryable", &self.retry.is_some())
            .finish()
    }
}

pub trait FailureSink: Send + Sync {
    fn report(&self, report: FailureReport);
}

/// Default sink: log and drop
pub struct LogFailureSink;

impl FailureSink for LogFailureSink {
    fn report(&self, report: FailureReport) {
        if report.failed_files.is_empty() {
            log::error!("[CLAIMS] {} error: {}", report.kind.as_str(), report.message);
        } else {
            log::error!(
                "[CLAIMS] {} error: {} ({:?})",
                report.kind.as_str(),
                report.message,
                report.failed_files
            );
        }
    }
}
