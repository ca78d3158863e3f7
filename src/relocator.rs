/// Collision-safe relocation of settled downloads.
///
/// This module performs the actual move of a settled file into its routed
/// destination directory. It creates destinations on demand, never
/// overwrites an existing file (colliding names get a ` (1)`, ` (2)`, ...
/// counter suffix), uses a single rename on the same volume, and falls
/// back to copy-verify-delete across volumes so the source is only removed
/// once the copy provably holds the same number of bytes.
///
/// Every move also registers the source path in the [`SelfMoveLedger`]
/// *before* touching the filesystem, so the engine can recognize and
/// discard the delete/create notifications the move itself generates.
use std::collections::HashMap;
use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Attempts at finding a collision-free destination name.
const COLLISION_ATTEMPTS: u32 = 100;

/// Retries for transiently failing operations (e.g. a locked file).
const TRANSIENT_RETRIES: u32 = 3;

/// Pause between transient retries.
const TRANSIENT_BACKOFF: Duration = Duration::from_millis(100);

/// Errors that can occur while relocating a file.
///
/// Every failure leaves the source file untouched in the inbox; the engine
/// surfaces the error and does not retry beyond the bounds applied here.
#[derive(Debug)]
pub enum RelocateError {
    /// The destination directory could not be created.
    DestinationUnwritable {
        path: PathBuf,
        source: io::Error,
    },
    /// The source file could not be examined.
    SourceUnreadable {
        path: PathBuf,
        source: io::Error,
    },
    /// No collision-free destination name was found within the bound.
    CollisionRetriesExhausted {
        destination: PathBuf,
        attempts: u32,
    },
    /// The move itself failed after transient retries.
    MoveFailed {
        source: PathBuf,
        destination: PathBuf,
        source_error: io::Error,
    },
    /// The cross-volume copy produced a different byte count than the
    /// source; the source was left in place.
    CopyVerifyMismatch {
        source: PathBuf,
        destination: PathBuf,
        expected: u64,
        actual: u64,
    },
}

impl std::fmt::Display for RelocateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DestinationUnwritable { path, source } => {
                write!(
                    f,
                    "Failed to create destination directory {}: {}",
                    path.display(),
                    source
                )
            }
            Self::SourceUnreadable { path, source } => {
                write!(f, "Failed to read source file {}: {}", path.display(), source)
            }
            Self::CollisionRetriesExhausted {
                destination,
                attempts,
            } => {
                write!(
                    f,
                    "No free destination name for {} after {} attempts",
                    destination.display(),
                    attempts
                )
            }
            Self::MoveFailed {
                source,
                destination,
                source_error,
            } => {
                write!(
                    f,
                    "Failed to move {} to {}: {}",
                    source.display(),
                    destination.display(),
                    source_error
                )
            }
            Self::CopyVerifyMismatch {
                source,
                destination,
                expected,
                actual,
            } => {
                write!(
                    f,
                    "Copy of {} to {} holds {} bytes, expected {}; source kept",
                    source.display(),
                    destination.display(),
                    actual,
                    expected
                )
            }
        }
    }
}

impl std::error::Error for RelocateError {}

/// Result type for relocation operations.
pub type RelocateResult<T> = Result<T, RelocateError>;

/// Short-lived records of paths the relocator is about to touch.
///
/// A move generates filesystem notifications on its source side; the
/// engine checks every incoming event against this ledger and discards
/// matches so the system never reacts to its own writes. Records die on
/// match or after a short TTL, whichever comes first, so suppression state
/// cannot leak if an expected event never arrives.
#[derive(Debug)]
pub struct SelfMoveLedger {
    entries: HashMap<PathBuf, Instant>,
    ttl: Duration,
}

impl SelfMoveLedger {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
        }
    }

    /// Records a path the relocator is about to generate events for.
    pub fn register(&mut self, path: &Path, now: Instant) {
        self.entries.insert(path.to_path_buf(), now);
    }

    /// Returns true if the path matches a live record. The record is
    /// consumed by the match.
    pub fn matches(&mut self, path: &Path, now: Instant) -> bool {
        self.purge(now);
        self.entries.remove(path).is_some()
    }

    fn purge(&mut self, now: Instant) {
        let ttl = self.ttl;
        self.entries
            .retain(|_, registered_at| now.duration_since(*registered_at) < ttl);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Moves settled files into their destination directories.
pub struct Relocator;

impl Relocator {
    /// Moves `source` into `destination_dir` and returns the final path.
    ///
    /// The destination directory is created if absent. On a name collision
    /// the file is stored under a counter-suffixed name; an existing
    /// destination file is never overwritten. Same-volume moves are a
    /// single rename; cross-volume moves copy, verify the copied size
    /// against the source, and only then delete the source.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use downtidy::relocator::{Relocator, SelfMoveLedger};
    /// use std::path::Path;
    /// use std::time::Duration;
    ///
    /// let mut ledger = SelfMoveLedger::new(Duration::from_secs(5));
    /// let moved = Relocator::move_file(
    ///     Path::new("/home/user/Downloads/report.pdf"),
    ///     Path::new("/home/user/Documents"),
    ///     &mut ledger,
    /// );
    ///
    /// match moved {
    ///     Ok(destination) => println!("Stored as {}", destination.display()),
    ///     Err(e) => eprintln!("Relocation failed: {}", e),
    /// }
    /// ```
    pub fn move_file(
        source: &Path,
        destination_dir: &Path,
        ledger: &mut SelfMoveLedger,
    ) -> RelocateResult<PathBuf> {
        fs::create_dir_all(destination_dir).map_err(|e| RelocateError::DestinationUnwritable {
            path: destination_dir.to_path_buf(),
            source: e,
        })?;

        let file_name = source
            .file_name()
            .ok_or_else(|| RelocateError::MoveFailed {
                source: source.to_path_buf(),
                destination: destination_dir.to_path_buf(),
                source_error: io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "source has no name component",
                ),
            })?;

        let destination = Self::free_destination(destination_dir, file_name)?;

        // The suppression record must exist before the operation can
        // generate its first event.
        ledger.register(source, Instant::now());

        match Self::rename_with_retries(source, &destination) {
            Ok(()) => Ok(destination),
            Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
                Self::copy_verify_remove(source, &destination, ledger)?;
                Ok(destination)
            }
            Err(e) => Err(RelocateError::MoveFailed {
                source: source.to_path_buf(),
                destination,
                source_error: e,
            }),
        }
    }

    /// Finds a destination path that does not collide with an existing
    /// file, in the `name (1).ext` style.
    fn free_destination(dir: &Path, file_name: &OsStr) -> RelocateResult<PathBuf> {
        let direct = dir.join(file_name);
        if !direct.exists() {
            return Ok(direct);
        }

        let original = Path::new(file_name);
        let stem = original
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| file_name.to_string_lossy().into_owned());
        let suffix = original
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();

        for attempt in 1..=COLLISION_ATTEMPTS {
            let candidate = dir.join(format!("{} ({}){}", stem, attempt, suffix));
            if !candidate.exists() {
                return Ok(candidate);
            }
        }

        Err(RelocateError::CollisionRetriesExhausted {
            destination: direct,
            attempts: COLLISION_ATTEMPTS,
        })
    }

    /// Renames with a small bounded retry for transiently locked files.
    fn rename_with_retries(source: &Path, destination: &Path) -> io::Result<()> {
        let mut attempt = 0;
        loop {
            match fs::rename(source, destination) {
                Ok(()) => return Ok(()),
                Err(e) if attempt < TRANSIENT_RETRIES && is_transient(&e) => {
                    attempt += 1;
                    std::thread::sleep(TRANSIENT_BACKOFF);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Cross-volume fallback: copy, verify the byte count, then delete the
    /// source. A mismatch aborts with the source intact.
    fn copy_verify_remove(
        source: &Path,
        destination: &Path,
        ledger: &mut SelfMoveLedger,
    ) -> RelocateResult<()> {
        let expected = fs::metadata(source)
            .map_err(|e| RelocateError::SourceUnreadable {
                path: source.to_path_buf(),
                source: e,
            })?
            .len();

        fs::copy(source, destination).map_err(|e| RelocateError::MoveFailed {
            source: source.to_path_buf(),
            destination: destination.to_path_buf(),
            source_error: e,
        })?;

        let actual = fs::metadata(destination)
            .map_err(|e| RelocateError::SourceUnreadable {
                path: destination.to_path_buf(),
                source: e,
            })?
            .len();

        if actual != expected {
            // Drop the bad copy; the source stays where it was.
            let _ = fs::remove_file(destination);
            return Err(RelocateError::CopyVerifyMismatch {
                source: source.to_path_buf(),
                destination: destination.to_path_buf(),
                expected,
                actual,
            });
        }

        // The delete is a separate operation with its own source-side event.
        ledger.register(source, Instant::now());
        fs::remove_file(source).map_err(|e| RelocateError::MoveFailed {
            source: source.to_path_buf(),
            destination: destination.to_path_buf(),
            source_error: e,
        })?;

        Ok(())
    }
}

fn is_transient(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::PermissionDenied | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn ledger() -> SelfMoveLedger {
        SelfMoveLedger::new(Duration::from_secs(5))
    }

    #[test]
    fn test_move_creates_destination_directory() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let source = temp_dir.path().join("report.pdf");
        fs::write(&source, b"pdf bytes").expect("Failed to write test file");
        let dest_dir = temp_dir.path().join("documents");

        let mut ledger = ledger();
        let moved = Relocator::move_file(&source, &dest_dir, &mut ledger)
            .expect("Failed to move file");

        assert_eq!(moved, dest_dir.join("report.pdf"));
        assert!(moved.exists());
        assert!(!source.exists());
        assert_eq!(fs::read(&moved).expect("Failed to read moved file"), b"pdf bytes");
    }

    #[test]
    fn test_move_never_overwrites_existing_file() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let dest_dir = temp_dir.path().join("images");
        fs::create_dir(&dest_dir).expect("Failed to create destination");
        fs::write(dest_dir.join("photo.jpg"), b"original").expect("Failed to write existing file");

        let source = temp_dir.path().join("photo.jpg");
        fs::write(&source, b"incoming").expect("Failed to write test file");

        let mut ledger = ledger();
        let moved = Relocator::move_file(&source, &dest_dir, &mut ledger)
            .expect("Failed to move file");

        assert_eq!(moved, dest_dir.join("photo (1).jpg"));
        // The pre-existing destination file keeps its content.
        assert_eq!(
            fs::read(dest_dir.join("photo.jpg")).expect("Failed to read existing file"),
            b"original"
        );
        assert_eq!(fs::read(&moved).expect("Failed to read moved file"), b"incoming");
    }

    #[test]
    fn test_collision_counter_increments() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let dest_dir = temp_dir.path().join("archive");
        fs::create_dir(&dest_dir).expect("Failed to create destination");
        fs::write(dest_dir.join("data.zip"), b"a").expect("Failed to write");
        fs::write(dest_dir.join("data (1).zip"), b"b").expect("Failed to write");

        let source = temp_dir.path().join("data.zip");
        fs::write(&source, b"c").expect("Failed to write test file");

        let mut ledger = ledger();
        let moved = Relocator::move_file(&source, &dest_dir, &mut ledger)
            .expect("Failed to move file");

        assert_eq!(moved, dest_dir.join("data (2).zip"));
    }

    #[test]
    fn test_collision_name_without_extension() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let dest_dir = temp_dir.path().join("documents");
        fs::create_dir(&dest_dir).expect("Failed to create destination");
        fs::write(dest_dir.join("README"), b"existing").expect("Failed to write");

        let source = temp_dir.path().join("README");
        fs::write(&source, b"incoming").expect("Failed to write test file");

        let mut ledger = ledger();
        let moved = Relocator::move_file(&source, &dest_dir, &mut ledger)
            .expect("Failed to move file");

        assert_eq!(moved, dest_dir.join("README (1)"));
    }

    #[test]
    fn test_move_registers_source_in_ledger() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let source = temp_dir.path().join("song.mp3");
        fs::write(&source, b"audio").expect("Failed to write test file");
        let dest_dir = temp_dir.path().join("music");

        let mut ledger = ledger();
        Relocator::move_file(&source, &dest_dir, &mut ledger).expect("Failed to move file");

        assert!(ledger.matches(&source, Instant::now()));
        // The record is consumed by the match.
        assert!(!ledger.matches(&source, Instant::now()));
    }

    #[test]
    fn test_move_missing_source_fails() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let source = temp_dir.path().join("phantom.pdf");
        let dest_dir = temp_dir.path().join("documents");

        let mut ledger = ledger();
        let result = Relocator::move_file(&source, &dest_dir, &mut ledger);
        assert!(matches!(result, Err(RelocateError::MoveFailed { .. })));
    }

    #[test]
    fn test_copy_verify_remove_moves_content() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let source = temp_dir.path().join("clip.mp4");
        fs::write(&source, b"video payload").expect("Failed to write test file");
        let destination = temp_dir.path().join("clip-copy.mp4");

        let mut ledger = ledger();
        Relocator::copy_verify_remove(&source, &destination, &mut ledger)
            .expect("Copy fallback should succeed");

        assert!(!source.exists());
        assert_eq!(
            fs::read(&destination).expect("Failed to read copy"),
            b"video payload"
        );
        assert!(ledger.matches(&source, Instant::now()));
    }

    #[test]
    fn test_ledger_records_expire() {
        let mut ledger = SelfMoveLedger::new(Duration::from_millis(50));
        let now = Instant::now();
        ledger.register(Path::new("/inbox/file.pdf"), now);

        assert_eq!(ledger.len(), 1);
        assert!(!ledger.matches(Path::new("/inbox/file.pdf"), now + Duration::from_millis(51)));
        assert_eq!(ledger.len(), 0);
    }

    #[test]
    fn test_ledger_match_within_ttl() {
        let mut ledger = SelfMoveLedger::new(Duration::from_millis(50));
        let now = Instant::now();
        ledger.register(Path::new("/inbox/file.pdf"), now);

        assert!(ledger.matches(Path::new("/inbox/file.pdf"), now + Duration::from_millis(10)));
        assert!(!ledger.matches(Path::new("/inbox/file.pdf"), now + Duration::from_millis(10)));
    }
}
