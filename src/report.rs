//! Status reporting boundary.
//!
//! The engine core performs no console or file output of its own; it emits
//! structured [`EngineNotice`] values through the [`EngineReporter`] trait
//! and leaves rendering to whichever implementation the binary wires in.
//! Two implementations ship here: a colored console reporter and a
//! JSON-lines reporter for machine consumption.

use crate::routing::Category;
use colored::*;
use serde_json::json;
use std::path::PathBuf;

/// Why a considered file was left in the inbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The extension has no routing rule.
    NoRoute,
    /// The file did not arrive through a download and policy keeps
    /// manually placed files untouched.
    ManualOrigin,
    /// The file disappeared before it could be routed.
    FileVanished,
}

impl SkipReason {
    pub fn describe(&self) -> &'static str {
        match self {
            SkipReason::NoRoute => "no routing rule for extension",
            SkipReason::ManualOrigin => "manually placed file left untouched",
            SkipReason::FileVanished => "file disappeared before routing",
        }
    }

    fn label(&self) -> &'static str {
        match self {
            SkipReason::NoRoute => "no_route",
            SkipReason::ManualOrigin => "manual_origin",
            SkipReason::FileVanished => "file_vanished",
        }
    }
}

/// A structured status notification emitted by the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineNotice {
    /// The watch is established on the inbox.
    WatchStarted { inbox: PathBuf },
    /// A settled file was relocated.
    Moved {
        source: PathBuf,
        destination: PathBuf,
        category: Category,
    },
    /// A settled file was deliberately not relocated.
    LeftInPlace { path: PathBuf, reason: SkipReason },
    /// A relocation attempt failed; the source file is untouched.
    RelocationFailed { path: PathBuf, detail: String },
    /// A tracked download saw no completion within the timeout.
    DownloadAbandoned { name: String },
    /// Tracked state was reconciled against the directory listing.
    Resynchronized { tracked: usize },
    /// The engine reached its terminal state.
    Stopped,
}

/// Consumer of engine status notifications.
pub trait EngineReporter {
    fn notify(&self, notice: &EngineNotice);
}

/// Discards all notices. Useful for tests.
pub struct NullReporter;

impl EngineReporter for NullReporter {
    fn notify(&self, _notice: &EngineNotice) {}
}

/// Renders notices to the console with consistent styling.
///
/// - Moves are confirmed in green with a checkmark
/// - Skips and abandonments are informational, dimmed
/// - Failures go to stderr in red with an X mark
pub struct ConsoleReporter;

impl EngineReporter for ConsoleReporter {
    fn notify(&self, notice: &EngineNotice) {
        match notice {
            EngineNotice::WatchStarted { inbox } => {
                println!("{}", format!("Watching {}", inbox.display()).cyan());
            }
            EngineNotice::Moved {
                source,
                destination,
                category,
            } => {
                println!(
                    "{} {} moved to {} ({})",
                    "✓".green(),
                    file_name(source),
                    destination.display(),
                    category.label()
                );
            }
            EngineNotice::LeftInPlace { path, reason } => {
                println!(
                    "{} {} left in place: {}",
                    "·".dimmed(),
                    file_name(path),
                    reason.describe().dimmed()
                );
            }
            EngineNotice::RelocationFailed { path, detail } => {
                eprintln!("{} {}: {}", "✗".red(), file_name(path), detail);
            }
            EngineNotice::DownloadAbandoned { name } => {
                println!(
                    "{} {} abandoned, tracking discarded",
                    "·".dimmed(),
                    name.dimmed()
                );
            }
            EngineNotice::Resynchronized { tracked } => {
                println!(
                    "{}",
                    format!("Resynchronized directory state ({} tracked)", tracked).yellow()
                );
            }
            EngineNotice::Stopped => {
                println!("{}", "Stopped.".cyan());
            }
        }
    }
}

/// Renders notices as one JSON object per line on stdout.
pub struct JsonReporter;

impl EngineReporter for JsonReporter {
    fn notify(&self, notice: &EngineNotice) {
        let timestamp = chrono::Utc::now().to_rfc3339();
        let payload = match notice {
            EngineNotice::WatchStarted { inbox } => json!({
                "timestamp": timestamp,
                "event": "watch_started",
                "inbox": inbox.to_string_lossy(),
            }),
            EngineNotice::Moved {
                source,
                destination,
                category,
            } => json!({
                "timestamp": timestamp,
                "event": "moved",
                "source": source.to_string_lossy(),
                "destination": destination.to_string_lossy(),
                "category": category.label(),
            }),
            EngineNotice::LeftInPlace { path, reason } => json!({
                "timestamp": timestamp,
                "event": "left_in_place",
                "path": path.to_string_lossy(),
                "reason": reason.label(),
            }),
            EngineNotice::RelocationFailed { path, detail } => json!({
                "timestamp": timestamp,
                "event": "relocation_failed",
                "path": path.to_string_lossy(),
                "detail": detail,
            }),
            EngineNotice::DownloadAbandoned { name } => json!({
                "timestamp": timestamp,
                "event": "download_abandoned",
                "name": name,
            }),
            EngineNotice::Resynchronized { tracked } => json!({
                "timestamp": timestamp,
                "event": "resynchronized",
                "tracked": tracked,
            }),
            EngineNotice::Stopped => json!({
                "timestamp": timestamp,
                "event": "stopped",
            }),
        };
        println!("{}", payload);
    }
}

fn file_name(path: &PathBuf) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
