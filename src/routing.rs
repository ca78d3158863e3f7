/// Extension-based routing for relocating finished downloads.
///
/// This module provides the mapping from a file's extension to the broad
/// destination category (images, video, audio, documents, archive) the
/// engine should move it into. Routing is purely name-based; file content
/// is never inspected.
///
/// # Examples
///
/// ```
/// use downtidy::routing::{Category, RouteTable};
///
/// let routes = RouteTable::default();
/// assert_eq!(routes.resolve("jpg"), Some(Category::Image));
/// assert_eq!(routes.resolve("PDF"), Some(Category::Document));
/// assert_eq!(routes.resolve("xyz"), None);
/// ```
use std::collections::HashMap;

/// Represents a destination category for a routed file.
///
/// Each category corresponds to one destination directory supplied at
/// startup. Extensions with no category are left in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    /// Image files (JPG, PNG, WEBP, etc.)
    Image,
    /// Video files (MP4)
    Video,
    /// Audio files (MP3, WAV, M4A)
    Audio,
    /// Document files (PDF)
    Document,
    /// Archive files (ZIP, 7Z, RAR)
    Archive,
}

impl Category {
    /// Returns the short label for this category, used in status reports.
    ///
    /// # Examples
    ///
    /// ```
    /// use downtidy::routing::Category;
    ///
    /// assert_eq!(Category::Image.label(), "images");
    /// assert_eq!(Category::Archive.label(), "archive");
    /// ```
    pub fn label(&self) -> &'static str {
        match self {
            Category::Image => "images",
            Category::Video => "video",
            Category::Audio => "audio",
            Category::Document => "documents",
            Category::Archive => "archive",
        }
    }
}

/// Maps normalized file extensions to destination categories.
///
/// The table is static default data owned by the core; swapping it for
/// user-supplied routing rules is deliberately out of scope.
#[derive(Debug, Clone)]
pub struct RouteTable {
    extension_map: HashMap<String, Category>,
}

impl RouteTable {
    /// Creates a new `RouteTable` with the standard routing rules.
    pub fn new() -> Self {
        let mut table = Self {
            extension_map: HashMap::new(),
        };
        table.populate_standard_rules();
        table
    }

    /// Populates the table with the default extension rules.
    fn populate_standard_rules(&mut self) {
        self.add_rule("jpg", Category::Image);
        self.add_rule("jpeg", Category::Image);
        self.add_rule("png", Category::Image);
        self.add_rule("webp", Category::Image);

        self.add_rule("mp4", Category::Video);

        self.add_rule("mp3", Category::Audio);
        self.add_rule("wav", Category::Audio);
        self.add_rule("m4a", Category::Audio);

        self.add_rule("pdf", Category::Document);

        self.add_rule("zip", Category::Archive);
        self.add_rule("7z", Category::Archive);
        self.add_rule("rar", Category::Archive);
    }

    /// Adds an extension to category rule.
    pub fn add_rule(&mut self, ext: &str, category: Category) {
        self.extension_map.insert(ext.to_lowercase(), category);
    }

    /// Resolves an extension to its destination category.
    ///
    /// The extension is normalized (lower-cased, no leading dot) before
    /// lookup. Extensions not present in the table yield `None`, which the
    /// engine interprets as "leave the file in place."
    ///
    /// # Examples
    ///
    /// ```
    /// use downtidy::routing::{Category, RouteTable};
    ///
    /// let routes = RouteTable::default();
    /// assert_eq!(routes.resolve("zip"), Some(Category::Archive));
    /// assert_eq!(routes.resolve(".mp3"), Some(Category::Audio));
    /// assert_eq!(routes.resolve("exe"), None);
    /// ```
    pub fn resolve(&self, ext: &str) -> Option<Category> {
        let normalized = ext.trim_start_matches('.').to_lowercase();
        self.extension_map.get(&normalized).copied()
    }
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::new()
    }
}
