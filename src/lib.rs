//! downtidy - unattended downloads-folder organization
//!
//! This library watches a single inbox directory, distinguishes finished
//! downloads from in-progress ones and from the engine's own moves, and
//! relocates settled files into category-based destination directories
//! (images, video, audio, documents, archives) by extension.

pub mod cli;
pub mod config;
pub mod engine;
pub mod paths;
pub mod relocator;
pub mod report;
pub mod routing;
pub mod stability;
pub mod tracker;
pub mod watcher;

pub use config::{CompiledRules, ConfigError, WatchConfig};
pub use engine::{Engine, EngineError, EngineState};
pub use paths::DestinationMap;
pub use relocator::{RelocateError, Relocator, SelfMoveLedger};
pub use report::{ConsoleReporter, EngineNotice, EngineReporter, JsonReporter};
pub use routing::{Category, RouteTable};
pub use stability::{SettleVerdict, StabilityGate};
pub use tracker::{ArtifactPhase, ArtifactState, DownloadTracker};
pub use watcher::{DirectoryWatcher, WatchEvent, WatchEventKind, WatchMessage};
