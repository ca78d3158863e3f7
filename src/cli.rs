//! Command-line interface module for downtidy.
//!
//! This module handles all CLI-related functionality including:
//! - Argument parsing and validation
//! - Configuration loading and compilation
//! - Inbox and destination path resolution
//! - Wiring the directory watcher, shutdown handler, and engine together

use crate::config::{ConfigError, WatchConfig};
use crate::engine::{Engine, EngineError};
use crate::paths::{self, DestinationMap};
use crate::report::{ConsoleReporter, EngineReporter, JsonReporter};
use crate::routing::RouteTable;
use crate::watcher::{DirectoryWatcher, WatchError, WatchMessage};
use clap::Parser;
use std::path::PathBuf;
use std::sync::mpsc;

/// Watch a downloads folder and relocate finished downloads into
/// category-based destination directories.
#[derive(Debug, Parser)]
#[command(name = "downtidy", version)]
pub struct Cli {
    /// Inbox directory to watch. Defaults to the user's Downloads folder.
    pub inbox: Option<PathBuf>,

    /// Path to a configuration file.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Emit one JSON object per status line instead of styled output.
    #[arg(long)]
    pub json: bool,

    /// Leave manually placed files untouched even when their extension
    /// has a routing rule.
    #[arg(long)]
    pub keep_manual: bool,
}

/// Errors surfaced to the user at startup or on engine failure.
#[derive(Debug)]
pub enum CliError {
    Config(ConfigError),
    Watch(WatchError),
    Engine(EngineError),
    Signal(String),
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CliError::Config(e) => write!(f, "{}", e),
            CliError::Watch(e) => write!(f, "{}", e),
            CliError::Engine(e) => write!(f, "{}", e),
            CliError::Signal(reason) => {
                write!(f, "Failed to install shutdown handler: {}", reason)
            }
        }
    }
}

impl std::error::Error for CliError {}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        CliError::Config(e)
    }
}

impl From<WatchError> for CliError {
    fn from(e: WatchError) -> Self {
        CliError::Watch(e)
    }
}

impl From<EngineError> for CliError {
    fn from(e: EngineError) -> Self {
        CliError::Engine(e)
    }
}

/// Runs the watcher until a shutdown signal arrives.
///
/// This is the main entry point: it loads and compiles configuration,
/// resolves the inbox and destination paths, opens the directory watch,
/// installs the ctrl-c handler, and hands control to the engine loop.
pub fn run(cli: Cli) -> Result<(), CliError> {
    let config = WatchConfig::load(cli.config.as_deref())?;
    let mut watch_rules = config.watch.clone();
    if cli.keep_manual {
        watch_rules.move_manual_drops = false;
    }
    let rules = config.compile()?;

    let inbox = match cli.inbox {
        Some(path) => path,
        None => paths::default_inbox()?,
    };
    let destinations = DestinationMap::resolve(&inbox, &config.destinations)?;

    let reporter: Box<dyn EngineReporter> = if cli.json {
        Box::new(JsonReporter)
    } else {
        Box::new(ConsoleReporter)
    };

    let (sender, receiver) = mpsc::channel();
    let _watch = DirectoryWatcher::open(&inbox, sender.clone())?;

    let shutdown_sender = sender;
    ctrlc::set_handler(move || {
        let _ = shutdown_sender.send(WatchMessage::Shutdown);
    })
    .map_err(|e| CliError::Signal(e.to_string()))?;

    let mut engine = Engine::new(
        inbox,
        destinations,
        RouteTable::default(),
        rules,
        &watch_rules,
        reporter,
    );
    engine.run(&receiver)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_defaults() {
        let cli = Cli::parse_from(["downtidy"]);
        assert!(cli.inbox.is_none());
        assert!(cli.config.is_none());
        assert!(!cli.json);
        assert!(!cli.keep_manual);
    }

    #[test]
    fn test_parse_inbox_and_flags() {
        let cli = Cli::parse_from([
            "downtidy",
            "/srv/inbox",
            "--config",
            "/etc/downtidy.toml",
            "--json",
            "--keep-manual",
        ]);
        assert_eq!(cli.inbox, Some(PathBuf::from("/srv/inbox")));
        assert_eq!(cli.config, Some(PathBuf::from("/etc/downtidy.toml")));
        assert!(cli.json);
        assert!(cli.keep_manual);
    }

    #[test]
    fn test_run_fails_on_missing_inbox() {
        let cli = Cli::parse_from(["downtidy", "/no/such/inbox"]);
        let result = run(cli);
        assert!(matches!(result, Err(CliError::Watch(_))));
    }
}
