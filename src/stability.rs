//! Quiet-period confirmation for files that reached their final name.
//!
//! Some writers rename a download to its final name before the last flush
//! lands, so a fresh final name is not yet proof of a complete file. The
//! stability gate compares size and modification time across a fixed quiet
//! interval and only declares the file settled once both hold still. The
//! comparison itself is cheap scheduled work; the engine drives it from
//! its deadline queue rather than blocking the event path.

use crate::tracker::ArtifactState;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Outcome of one stability check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettleVerdict {
    /// Size and modification time held still across the quiet interval.
    Settled,
    /// The file is still changing; check again after another interval.
    Reschedule,
    /// The retry bound was reached; proceed on a best-effort basis rather
    /// than starving a legitimate-but-slow completion forever.
    SettledAfterTimeout,
    /// The file disappeared while settling.
    Gone,
}

impl SettleVerdict {
    /// Whether this verdict releases the file for routing.
    pub fn is_settled(&self) -> bool {
        matches!(self, SettleVerdict::Settled | SettleVerdict::SettledAfterTimeout)
    }
}

/// Applies the quiet-period check to settling files.
pub struct StabilityGate {
    quiet_interval: Duration,
    max_checks: u32,
}

impl StabilityGate {
    pub fn new(quiet_interval: Duration, max_checks: u32) -> Self {
        Self {
            quiet_interval,
            max_checks: max_checks.max(1),
        }
    }

    /// The interval between checks.
    pub fn quiet_interval(&self) -> Duration {
        self.quiet_interval
    }

    /// Captures the stability baseline when a file enters `Settling`.
    ///
    /// A failed stat leaves the baseline empty; the first check then sees
    /// the file as changed and reschedules, or as gone if it stays absent.
    pub fn prime(&self, state: &mut ArtifactState, path: &Path) {
        if let Ok(metadata) = fs::metadata(path) {
            state.last_observed_size = Some(metadata.len());
            state.last_observed_mtime = metadata.modified().ok();
        }
    }

    /// Runs one scheduled stability check against the file on disk.
    pub fn check(&self, state: &mut ArtifactState, path: &Path) -> SettleVerdict {
        let Ok(metadata) = fs::metadata(path) else {
            return SettleVerdict::Gone;
        };

        let size = metadata.len();
        let mtime = metadata.modified().ok();
        if state.last_observed_size == Some(size) && state.last_observed_mtime == mtime {
            return SettleVerdict::Settled;
        }

        state.last_observed_size = Some(size);
        state.last_observed_mtime = mtime;
        state.checks += 1;
        if state.checks >= self.max_checks {
            SettleVerdict::SettledAfterTimeout
        } else {
            SettleVerdict::Reschedule
        }
    }
}
