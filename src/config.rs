//! Watcher configuration: timing knobs, temporary-artifact patterns, and
//! ignore rules.
//!
//! This module provides support for loading watcher settings from TOML
//! configuration files. It covers:
//! - Timing: the stability quiet interval, the stability retry bound, the
//!   abandonment timeout, and the self-move suppression TTL
//! - The pluggable temporary-artifact pattern set (suffixes, prefixes,
//!   glob patterns) used to recognize in-progress downloads
//! - Ignore rules for files the engine must never consider
//! - Per-category destination directory overrides
//!
//! # Configuration File Format
//!
//! Configuration is stored in TOML format with the following structure:
//!
//! ```toml
//! [watch]
//! quiet_ms = 2000
//! move_manual_drops = true
//!
//! [artifacts]
//! suffixes = ["crdownload", "part", "tmp", "download"]
//! prefixes = ["~"]
//! patterns = []
//!
//! [ignore]
//! enable_hidden_files = false
//! filenames = [".DS_Store", "Thumbs.db"]
//! patterns = []
//! regex = []
//!
//! [destinations]
//! images = "/mnt/photos/incoming"
//! ```

use glob::Pattern;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Errors that can occur during configuration loading and compilation.
#[derive(Debug, Clone)]
pub enum ConfigError {
    /// Configuration file not found at the specified path.
    ConfigNotFound(PathBuf),
    /// Invalid TOML syntax or structure.
    ConfigInvalid(String),
    /// Invalid glob pattern provided.
    InvalidGlobPattern(String),
    /// Invalid regex pattern provided with the actual error reason.
    InvalidRegexPattern {
        /// The regex pattern that failed to compile.
        pattern: String,
        /// The reason why the pattern is invalid.
        reason: String,
    },
    /// IO error while reading configuration.
    IoError(String),
    /// The home directory could not be determined when resolving defaults.
    HomeDirectoryUnknown,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::ConfigNotFound(path) => {
                write!(f, "Configuration file not found: {}", path.display())
            }
            ConfigError::ConfigInvalid(msg) => write!(f, "Invalid configuration: {}", msg),
            ConfigError::InvalidGlobPattern(pattern) => {
                write!(f, "Invalid glob pattern '{}'", pattern)
            }
            ConfigError::InvalidRegexPattern { pattern, reason } => {
                write!(f, "Invalid regex pattern '{}': {}", pattern, reason)
            }
            ConfigError::IoError(msg) => write!(f, "IO error reading configuration: {}", msg),
            ConfigError::HomeDirectoryUnknown => {
                write!(f, "Could not determine the home directory (HOME is not set)")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Top-level watcher configuration.
///
/// This struct is deserialized from TOML configuration files. Every section
/// is optional; missing sections fall back to built-in defaults that match
/// common browser download conventions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Timing and policy settings for the engine.
    #[serde(default)]
    pub watch: WatchRules,

    /// Patterns that recognize temporary download artifacts.
    #[serde(default)]
    pub artifacts: ArtifactRules,

    /// Rules for files the engine must never consider.
    #[serde(default)]
    pub ignore: IgnoreRules,

    /// Per-category destination directory overrides.
    #[serde(default)]
    pub destinations: DestinationOverrides,
}

/// Timing and policy settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchRules {
    /// Quiet interval (milliseconds) a settled name must stay unchanged
    /// before it is considered safe to move. Defaults to 2000.
    #[serde(default = "default_quiet_ms")]
    pub quiet_ms: u64,

    /// Upper bound on stability re-checks before the engine proceeds
    /// anyway. Defaults to 90 (three minutes at the default interval).
    #[serde(default = "default_max_stability_checks")]
    pub max_stability_checks: u32,

    /// Seconds of inactivity after which a tracked download with no
    /// completion is discarded. Defaults to 600.
    #[serde(default = "default_abandon_after_secs")]
    pub abandon_after_secs: u64,

    /// Milliseconds a self-move suppression record stays alive if the
    /// matching event never arrives. Defaults to 5000.
    #[serde(default = "default_self_move_ttl_ms")]
    pub self_move_ttl_ms: u64,

    /// Whether files that appeared without a temporary-download artifact
    /// (manual copies, drag-and-drop) are eligible for relocation.
    /// Defaults to true.
    #[serde(default = "default_move_manual_drops")]
    pub move_manual_drops: bool,
}

fn default_quiet_ms() -> u64 {
    2000
}

fn default_max_stability_checks() -> u32 {
    90
}

fn default_abandon_after_secs() -> u64 {
    600
}

fn default_self_move_ttl_ms() -> u64 {
    5000
}

fn default_move_manual_drops() -> bool {
    true
}

impl WatchRules {
    /// The stability quiet interval as a `Duration`.
    pub fn quiet_interval(&self) -> Duration {
        Duration::from_millis(self.quiet_ms)
    }

    /// The abandonment timeout as a `Duration`.
    pub fn abandon_after(&self) -> Duration {
        Duration::from_secs(self.abandon_after_secs)
    }

    /// The self-move suppression TTL as a `Duration`.
    pub fn self_move_ttl(&self) -> Duration {
        Duration::from_millis(self.self_move_ttl_ms)
    }
}

impl Default for WatchRules {
    fn default() -> Self {
        Self {
            quiet_ms: default_quiet_ms(),
            max_stability_checks: default_max_stability_checks(),
            abandon_after_secs: default_abandon_after_secs(),
            self_move_ttl_ms: default_self_move_ttl_ms(),
            move_manual_drops: default_move_manual_drops(),
        }
    }
}

/// Patterns that recognize temporary download artifacts.
///
/// A name matches if it carries one of the suffixes (with a dot, e.g.
/// `report.pdf.crdownload`), starts with one of the prefixes, or matches
/// one of the glob patterns. Browser conventions vary, so the set is
/// configurable rather than hard-coded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactRules {
    /// In-progress suffixes, without the leading dot.
    #[serde(default = "default_artifact_suffixes")]
    pub suffixes: Vec<String>,

    /// Hidden/temp name prefixes.
    #[serde(default = "default_artifact_prefixes")]
    pub prefixes: Vec<String>,

    /// Additional glob patterns matched against the whole filename.
    #[serde(default)]
    pub patterns: Vec<String>,
}

fn default_artifact_suffixes() -> Vec<String> {
    ["crdownload", "part", "tmp", "download"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_artifact_prefixes() -> Vec<String> {
    vec!["~".to_string()]
}

impl Default for ArtifactRules {
    fn default() -> Self {
        Self {
            suffixes: default_artifact_suffixes(),
            prefixes: default_artifact_prefixes(),
            patterns: Vec::new(),
        }
    }
}

/// Rules for files the engine must never consider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IgnoreRules {
    /// Whether to consider hidden files (starting with "."). Defaults to false.
    #[serde(default = "default_enable_hidden_files")]
    pub enable_hidden_files: bool,

    /// Exact filenames to ignore (e.g., ".DS_Store", "Thumbs.db").
    #[serde(default = "default_ignore_filenames")]
    pub filenames: Vec<String>,

    /// Glob patterns to ignore.
    #[serde(default)]
    pub patterns: Vec<String>,

    /// Regex patterns to ignore (for advanced users).
    #[serde(default)]
    pub regex: Vec<String>,
}

fn default_enable_hidden_files() -> bool {
    false
}

fn default_ignore_filenames() -> Vec<String> {
    vec![".DS_Store".to_string(), "Thumbs.db".to_string()]
}

impl Default for IgnoreRules {
    fn default() -> Self {
        Self {
            enable_hidden_files: default_enable_hidden_files(),
            filenames: default_ignore_filenames(),
            patterns: Vec::new(),
            regex: Vec::new(),
        }
    }
}

/// Per-category destination directory overrides.
///
/// Categories left unset fall back to the platform defaults resolved at
/// startup (Pictures, Videos, Music, Documents, and `_Archives` inside the
/// inbox).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DestinationOverrides {
    #[serde(default)]
    pub images: Option<PathBuf>,
    #[serde(default)]
    pub video: Option<PathBuf>,
    #[serde(default)]
    pub audio: Option<PathBuf>,
    #[serde(default)]
    pub documents: Option<PathBuf>,
    #[serde(default)]
    pub archive: Option<PathBuf>,
}

impl WatchConfig {
    /// Load configuration from a file, with fallback to defaults.
    ///
    /// Attempts to load configuration in the following order:
    /// 1. If `config_path` is provided, load from that file
    /// 2. Look for `.downtidyrc.toml` in the current directory
    /// 3. Look for `~/.config/downtidy/config.toml` in home directory
    /// 4. Fall back to default configuration
    ///
    /// # Errors
    ///
    /// Returns an error if a configuration file is explicitly provided but
    /// cannot be read.
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = config_path {
            return Self::load_from_file(path);
        }

        let local_config = PathBuf::from(".downtidyrc.toml");
        if local_config.exists() {
            return Self::load_from_file(&local_config);
        }

        if let Ok(home) = std::env::var("HOME") {
            let home_config = PathBuf::from(home)
                .join(".config")
                .join("downtidy")
                .join("config.toml");
            if home_config.exists() {
                return Self::load_from_file(&home_config);
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::ConfigNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;

        toml::from_str(&content).map_err(|e| ConfigError::ConfigInvalid(e.to_string()))
    }

    /// Compile the pattern sections into matcher structures.
    ///
    /// # Errors
    ///
    /// Returns an error if any glob or regex patterns are invalid, so that
    /// bad configuration fails at startup rather than mid-watch.
    pub fn compile(&self) -> Result<CompiledRules, ConfigError> {
        Ok(CompiledRules {
            artifacts: ArtifactMatcher::new(&self.artifacts)?,
            ignore: IgnoreFilter::new(&self.ignore)?,
        })
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            watch: WatchRules::default(),
            artifacts: ArtifactRules::default(),
            ignore: IgnoreRules::default(),
            destinations: DestinationOverrides::default(),
        }
    }
}

/// Compiled pattern matchers, produced once at startup.
pub struct CompiledRules {
    pub artifacts: ArtifactMatcher,
    pub ignore: IgnoreFilter,
}

/// Recognizes temporary download artifacts and infers final names.
pub struct ArtifactMatcher {
    suffixes: Vec<String>,
    prefixes: Vec<String>,
    patterns: Vec<Pattern>,
}

impl ArtifactMatcher {
    fn new(rules: &ArtifactRules) -> Result<Self, ConfigError> {
        let patterns = rules
            .patterns
            .iter()
            .map(|pattern| {
                Pattern::new(pattern).map_err(|_| ConfigError::InvalidGlobPattern(pattern.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            suffixes: rules
                .suffixes
                .iter()
                .map(|s| s.trim_start_matches('.').to_lowercase())
                .collect(),
            prefixes: rules.prefixes.clone(),
            patterns,
        })
    }

    /// Whether a filename looks like an in-progress download artifact.
    pub fn is_temporary(&self, name: &str) -> bool {
        if self
            .suffixes
            .iter()
            .any(|suffix| Self::has_suffix(name, suffix))
        {
            return true;
        }
        if self.prefixes.iter().any(|prefix| name.starts_with(prefix)) {
            return true;
        }
        self.patterns.iter().any(|pattern| pattern.matches(name))
    }

    /// Infers the final filename a temporary artifact will become.
    ///
    /// Suffix-style artifacts embed the final name (`report.pdf.crdownload`
    /// becomes `report.pdf`). Prefix- and pattern-style artifacts carry no
    /// inferable final name and yield `None`; the tracker keys those
    /// provisionally by the temporary name and re-keys once the rename to
    /// the final name is observed.
    pub fn inferred_final_name(&self, name: &str) -> Option<String> {
        for suffix in &self.suffixes {
            if Self::has_suffix(name, suffix) {
                let stripped = &name[..name.len() - suffix.len() - 1];
                return Some(stripped.to_string());
            }
        }
        None
    }

    // Suffixes are stored lower-cased; the dot check keeps "crdownload"
    // itself from matching.
    fn has_suffix(name: &str, suffix: &str) -> bool {
        if name.len() <= suffix.len() + 1 {
            return false;
        }
        let dot = name.len() - suffix.len() - 1;
        name.as_bytes()[dot] == b'.' && name[dot + 1..].eq_ignore_ascii_case(suffix)
    }
}

/// Compiled ignore rules for efficient per-event matching.
pub struct IgnoreFilter {
    enable_hidden_files: bool,
    filenames: HashSet<String>,
    patterns: Vec<Pattern>,
    regexes: Vec<Regex>,
}

impl IgnoreFilter {
    fn new(rules: &IgnoreRules) -> Result<Self, ConfigError> {
        let patterns = rules
            .patterns
            .iter()
            .map(|pattern| {
                Pattern::new(pattern).map_err(|_| ConfigError::InvalidGlobPattern(pattern.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let regexes = rules
            .regex
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|e| ConfigError::InvalidRegexPattern {
                    pattern: pattern.clone(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            enable_hidden_files: rules.enable_hidden_files,
            filenames: rules.filenames.iter().cloned().collect(),
            patterns,
            regexes,
        })
    }

    /// Check if a filename should be considered by the engine at all.
    ///
    /// Checks are performed in this order, with early termination:
    /// 1. Hidden file filter - if hidden and disabled, ignore
    /// 2. Exact filename match - if matched, ignore
    /// 3. Glob pattern match - if matched, ignore
    /// 4. Regex pattern match - if matched, ignore
    /// 5. Default: consider
    pub fn should_consider(&self, name: &str) -> bool {
        if !self.enable_hidden_files && name.starts_with('.') {
            return false;
        }

        if self.filenames.contains(name) {
            return false;
        }

        if self.patterns.iter().any(|pattern| pattern.matches(name)) {
            return false;
        }

        if self.regexes.iter().any(|regex| regex.is_match(name)) {
            return false;
        }

        true
    }
}
