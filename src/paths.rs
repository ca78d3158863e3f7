//! Inbox and destination path resolution.
//!
//! The engine core only needs a mapping from category to an absolute
//! directory path; this module supplies that mapping from the user's home
//! directory layout, with per-category overrides from configuration. The
//! archive destination is a fixed subdirectory of the inbox itself.

use crate::config::{ConfigError, DestinationOverrides};
use crate::routing::Category;
use std::path::{Path, PathBuf};

/// Name of the archive subdirectory kept inside the inbox.
const ARCHIVE_DIR_NAME: &str = "_Archives";

/// Returns the default inbox directory (`$HOME/Downloads`).
///
/// # Errors
///
/// Returns `ConfigError::HomeDirectoryUnknown` if `HOME` is not set.
pub fn default_inbox() -> Result<PathBuf, ConfigError> {
    home_dir().map(|home| home.join("Downloads"))
}

fn home_dir() -> Result<PathBuf, ConfigError> {
    std::env::var("HOME")
        .map(PathBuf::from)
        .map_err(|_| ConfigError::HomeDirectoryUnknown)
}

/// Absolute destination directory for each routing category.
///
/// Resolved once at startup. Directories are not created here; the
/// relocator creates a destination on demand before the first move into it.
#[derive(Debug, Clone)]
pub struct DestinationMap {
    images: PathBuf,
    video: PathBuf,
    audio: PathBuf,
    documents: PathBuf,
    archive: PathBuf,
}

impl DestinationMap {
    /// Resolves the destination map for an inbox, applying overrides.
    ///
    /// Categories without an override fall back to the conventional user
    /// folders (`Pictures`, `Videos`, `Music`, `Documents`); the archive
    /// category falls back to `_Archives` inside the inbox.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::HomeDirectoryUnknown` if a home-relative
    /// default is needed but `HOME` is not set.
    pub fn resolve(inbox: &Path, overrides: &DestinationOverrides) -> Result<Self, ConfigError> {
        let needs_home = overrides.images.is_none()
            || overrides.video.is_none()
            || overrides.audio.is_none()
            || overrides.documents.is_none();
        let home = if needs_home { Some(home_dir()?) } else { None };
        let home_sub = |sub: &str| {
            // `home` is Some whenever a default is used, per needs_home.
            home.as_ref().map(|h| h.join(sub)).unwrap_or_default()
        };

        Ok(Self {
            images: overrides
                .images
                .clone()
                .unwrap_or_else(|| home_sub("Pictures")),
            video: overrides
                .video
                .clone()
                .unwrap_or_else(|| home_sub("Videos")),
            audio: overrides.audio.clone().unwrap_or_else(|| home_sub("Music")),
            documents: overrides
                .documents
                .clone()
                .unwrap_or_else(|| home_sub("Documents")),
            archive: overrides
                .archive
                .clone()
                .unwrap_or_else(|| inbox.join(ARCHIVE_DIR_NAME)),
        })
    }

    /// Returns the destination directory for a category.
    pub fn dir_for(&self, category: Category) -> &Path {
        match category {
            Category::Image => &self.images,
            Category::Video => &self.video,
            Category::Audio => &self.audio,
            Category::Document => &self.documents,
            Category::Archive => &self.archive,
        }
    }
}
