/// Download-completion tracking for the watched inbox.
///
/// This module decides, from a stream of raw directory events, which final
/// filenames represent completed downloads. Browsers write an in-progress
/// artifact (`report.pdf.crdownload`) and rename it to its final name when
/// the transfer completes; that rename is the completion signal. Files
/// that appear without any temporary-artifact history are tracked as
/// manual drops so the engine can apply its origin policy to them.
///
/// Entries live in a single map keyed by the lower-cased final filename,
/// exclusively owned by the tracker. They are removed once the engine has
/// routed the settled file, or abandoned after a bounded period with no
/// further activity so cancelled downloads never leak tracking state.
use crate::config::ArtifactMatcher;
use crate::watcher::{WatchEvent, WatchEventKind};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

/// Lifecycle phase of a tracked download candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactPhase {
    /// A temporary artifact exists; the download is still in progress.
    Pending,
    /// The file has its final name and is waiting out the quiet interval.
    Settling,
    /// The stability gate confirmed the file; it is safe to route.
    Settled,
    /// No completion arrived within the timeout; the entry is discarded.
    Abandoned,
}

/// Per-candidate tracked state, keyed by the expected final filename.
#[derive(Debug, Clone)]
pub struct ArtifactState {
    /// Path of the in-progress temporary artifact, absent once renamed.
    pub temporary_path: Option<PathBuf>,
    /// Path of the real file once it carries its final name.
    pub final_path: Option<PathBuf>,
    /// Byte size at the last stability check.
    pub last_observed_size: Option<u64>,
    /// Modification time at the last stability check.
    pub last_observed_mtime: Option<SystemTime>,
    /// When this entry last saw any activity.
    pub last_observed_at: Instant,
    pub phase: ArtifactPhase,
    /// Whether this file arrived through a temporary-download artifact.
    pub from_download: bool,
    /// Stability checks performed so far.
    pub checks: u32,
}

impl ArtifactState {
    fn pending(temporary_path: PathBuf, now: Instant) -> Self {
        Self {
            temporary_path: Some(temporary_path),
            final_path: None,
            last_observed_size: None,
            last_observed_mtime: None,
            last_observed_at: now,
            phase: ArtifactPhase::Pending,
            from_download: false,
            checks: 0,
        }
    }

    fn settling(final_path: PathBuf, from_download: bool, now: Instant) -> Self {
        Self {
            temporary_path: None,
            final_path: Some(final_path),
            last_observed_size: None,
            last_observed_mtime: None,
            last_observed_at: now,
            phase: ArtifactPhase::Settling,
            from_download,
            checks: 0,
        }
    }

    /// Re-enters the settling phase with a fresh stability baseline.
    fn begin_settling(&mut self, final_path: PathBuf, from_download: bool, now: Instant) {
        self.temporary_path = None;
        self.final_path = Some(final_path);
        self.last_observed_size = None;
        self.last_observed_mtime = None;
        self.last_observed_at = now;
        self.phase = ArtifactPhase::Settling;
        self.from_download = self.from_download || from_download;
        self.checks = 0;
    }
}

/// Derives the tracking key for a path: the lower-cased filename.
pub fn key_for(path: &Path) -> Option<String> {
    path.file_name()
        .map(|name| name.to_string_lossy().to_lowercase())
}

fn file_name(path: &Path) -> Option<String> {
    path.file_name().map(|name| name.to_string_lossy().into_owned())
}

/// Correlates temporary download artifacts with their final filenames.
pub struct DownloadTracker {
    entries: HashMap<String, ArtifactState>,
    matcher: ArtifactMatcher,
    abandon_after: Duration,
}

impl DownloadTracker {
    /// Creates a tracker with the given artifact pattern set and
    /// abandonment timeout.
    pub fn new(matcher: ArtifactMatcher, abandon_after: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            matcher,
            abandon_after,
        }
    }

    /// Feeds one event into the state machine.
    ///
    /// Returns the key of an entry that entered `Settling` and now needs a
    /// stability check scheduled, or `None` when no settlement is pending.
    pub fn observe(&mut self, event: &WatchEvent, now: Instant) -> Option<String> {
        match event.kind {
            WatchEventKind::Created => self.observe_appeared(&event.path, now),
            WatchEventKind::Modified => {
                self.observe_modified(&event.path, now);
                None
            }
            WatchEventKind::RenamedOrMoved => {
                let previous = event.previous_path.as_deref()?;
                self.observe_renamed(previous, &event.path, now)
            }
            WatchEventKind::Deleted => {
                self.observe_deleted(&event.path);
                None
            }
        }
    }

    /// Registers a file found by a directory scan (startup or
    /// resynchronization), as if it had just been created.
    pub fn observe_scan(&mut self, path: &Path, now: Instant) -> Option<String> {
        self.observe_appeared(path, now)
    }

    fn observe_appeared(&mut self, path: &Path, now: Instant) -> Option<String> {
        let name = file_name(path)?;
        if self.matcher.is_temporary(&name) {
            self.upsert_pending(&name, path, now);
            return None;
        }

        let key = name.to_lowercase();
        match self.entries.get_mut(&key) {
            Some(entry) if entry.temporary_path.is_some() => {
                // Completion reported as a delete/create pair instead of a
                // rename: the temporary artifact for this key became real.
                entry.begin_settling(path.to_path_buf(), true, now);
                Some(key)
            }
            Some(entry) => {
                // The same final name appeared again; restart settling.
                entry.begin_settling(path.to_path_buf(), false, now);
                Some(key)
            }
            None => {
                self.entries
                    .insert(key.clone(), ArtifactState::settling(path.to_path_buf(), false, now));
                Some(key)
            }
        }
    }

    fn observe_modified(&mut self, path: &Path, now: Instant) {
        let Some(name) = file_name(path) else {
            return;
        };
        if self.matcher.is_temporary(&name) {
            // Writes to the artifact keep the pending download alive.
            self.upsert_pending(&name, path, now);
            return;
        }
        if let Some(entry) = self.entries.get_mut(&name.to_lowercase()) {
            entry.last_observed_at = now;
        }
    }

    fn observe_renamed(&mut self, previous: &Path, path: &Path, now: Instant) -> Option<String> {
        let new_name = file_name(path)?;

        if self.matcher.is_temporary(&new_name) {
            // Renamed into another temporary name; carry the entry along.
            let key = self.pending_key(&new_name);
            if let Some(old_key) = self.key_of_temporary(previous) {
                let mut entry = self.entries.remove(&old_key)?;
                entry.temporary_path = Some(path.to_path_buf());
                entry.last_observed_at = now;
                self.entries.insert(key, entry);
            } else {
                self.upsert_pending(&new_name, path, now);
            }
            return None;
        }

        let key = new_name.to_lowercase();
        if let Some(old_key) = self.key_of_temporary(previous) {
            // The completion signal: a tracked temporary artifact was
            // renamed to a final name. Last rename wins on key collisions.
            let mut entry = self.entries.remove(&old_key)?;
            entry.begin_settling(path.to_path_buf(), true, now);
            self.entries.insert(key.clone(), entry);
            return Some(key);
        }

        let prev_name = file_name(previous);
        if prev_name.as_deref().is_some_and(|n| self.matcher.is_temporary(n)) {
            // Untracked temporary artifact completing (e.g. the watch
            // started mid-download); still a genuine download.
            self.entries
                .insert(key.clone(), ArtifactState::settling(path.to_path_buf(), true, now));
            return Some(key);
        }

        // Rename between two final names, e.g. the user renaming a file.
        if let Some(prev_key) = prev_name.map(|n| n.to_lowercase())
            && let Some(mut entry) = self.entries.remove(&prev_key)
        {
            let from_download = entry.from_download;
            entry.begin_settling(path.to_path_buf(), from_download, now);
            self.entries.insert(key.clone(), entry);
            return Some(key);
        }

        // A file moved into the inbox under a name we have never seen.
        self.entries
            .insert(key.clone(), ArtifactState::settling(path.to_path_buf(), false, now));
        Some(key)
    }

    fn observe_deleted(&mut self, path: &Path) {
        // A deleted temporary artifact stays tracked: either a
        // delete/create completion pair is still in flight, or the
        // abandonment timer discards the entry later.
        if self.key_of_temporary(path).is_some() {
            return;
        }

        let Some(key) = key_for(path) else {
            return;
        };
        if self
            .entries
            .get(&key)
            .is_some_and(|entry| entry.final_path.as_deref() == Some(path))
        {
            self.entries.remove(&key);
        }
    }

    fn upsert_pending(&mut self, name: &str, path: &Path, now: Instant) {
        let key = self.pending_key(name);
        match self.entries.get_mut(&key) {
            Some(entry) => {
                entry.temporary_path = Some(path.to_path_buf());
                entry.phase = ArtifactPhase::Pending;
                entry.last_observed_at = now;
            }
            None => {
                self.entries
                    .insert(key, ArtifactState::pending(path.to_path_buf(), now));
            }
        }
    }

    /// Key for a temporary artifact: the inferred final name when the
    /// temporary name embeds one, otherwise provisionally the temporary
    /// name itself (re-keyed when the rename to the final name arrives).
    fn pending_key(&self, temp_name: &str) -> String {
        self.matcher
            .inferred_final_name(temp_name)
            .unwrap_or_else(|| temp_name.to_string())
            .to_lowercase()
    }

    fn key_of_temporary(&self, path: &Path) -> Option<String> {
        self.entries
            .iter()
            .find(|(_, entry)| entry.temporary_path.as_deref() == Some(path))
            .map(|(key, _)| key.clone())
    }

    pub fn state(&self, key: &str) -> Option<&ArtifactState> {
        self.entries.get(key)
    }

    pub fn state_mut(&mut self, key: &str) -> Option<&mut ArtifactState> {
        self.entries.get_mut(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<ArtifactState> {
        self.entries.remove(key)
    }

    /// Discards entries that saw no activity within the abandonment
    /// timeout and never reached settlement (cancelled or stalled
    /// downloads). Returns the discarded entries for reporting.
    pub fn prune_abandoned(&mut self, now: Instant) -> Vec<(String, ArtifactState)> {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| {
                entry.phase == ArtifactPhase::Pending
                    && now.duration_since(entry.last_observed_at) >= self.abandon_after
            })
            .map(|(key, _)| key.clone())
            .collect();

        expired
            .into_iter()
            .filter_map(|key| {
                self.entries.remove(&key).map(|mut entry| {
                    entry.phase = ArtifactPhase::Abandoned;
                    (key, entry)
                })
            })
            .collect()
    }

    /// The next moment at which an entry may become abandoned.
    pub fn next_expiry(&self) -> Option<Instant> {
        self.entries
            .values()
            .filter(|entry| entry.phase == ArtifactPhase::Pending)
            .map(|entry| entry.last_observed_at + self.abandon_after)
            .min()
    }

    /// Drops entries whose files are no longer present in the directory
    /// listing, as part of resynchronization. `present` holds the
    /// lower-cased names currently in the inbox. Returns the number of
    /// entries dropped.
    pub fn retain_present(&mut self, present: &HashSet<String>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, entry| {
            if present.contains(key) {
                return true;
            }
            entry
                .temporary_path
                .as_deref()
                .and_then(key_for)
                .is_some_and(|temp_key| present.contains(&temp_key))
        });
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WatchConfig;
    use crate::watcher::WatchEvent;

    fn tracker() -> DownloadTracker {
        tracker_with_timeout(Duration::from_secs(600))
    }

    fn tracker_with_timeout(abandon_after: Duration) -> DownloadTracker {
        let rules = WatchConfig::default()
            .compile()
            .expect("default config should compile");
        DownloadTracker::new(rules.artifacts, abandon_after)
    }

    #[test]
    fn test_temporary_artifact_creates_pending_entry() {
        let mut tracker = tracker();
        let now = Instant::now();

        let settled = tracker.observe(
            &WatchEvent::created("/inbox/image.jpg.crdownload".into()),
            now,
        );

        assert_eq!(settled, None);
        let entry = tracker.state("image.jpg").expect("entry should exist");
        assert_eq!(entry.phase, ArtifactPhase::Pending);
        assert_eq!(
            entry.temporary_path.as_deref(),
            Some(Path::new("/inbox/image.jpg.crdownload"))
        );
        assert!(entry.final_path.is_none());
    }

    #[test]
    fn test_completion_rename_begins_settling() {
        let mut tracker = tracker();
        let now = Instant::now();

        tracker.observe(
            &WatchEvent::created("/inbox/image.jpg.crdownload".into()),
            now,
        );
        let settled = tracker.observe(
            &WatchEvent::renamed("/inbox/image.jpg.crdownload".into(), "/inbox/image.jpg".into()),
            now,
        );

        assert_eq!(settled, Some("image.jpg".to_string()));
        let entry = tracker.state("image.jpg").expect("entry should exist");
        assert_eq!(entry.phase, ArtifactPhase::Settling);
        assert!(entry.from_download);
        assert!(entry.temporary_path.is_none());
        assert_eq!(entry.final_path.as_deref(), Some(Path::new("/inbox/image.jpg")));
    }

    #[test]
    fn test_manual_create_settles_without_download_origin() {
        let mut tracker = tracker();
        let now = Instant::now();

        let settled = tracker.observe(&WatchEvent::created("/inbox/dropped.pdf".into()), now);

        assert_eq!(settled, Some("dropped.pdf".to_string()));
        let entry = tracker.state("dropped.pdf").expect("entry should exist");
        assert_eq!(entry.phase, ArtifactPhase::Settling);
        assert!(!entry.from_download);
    }

    #[test]
    fn test_delete_then_create_counts_as_completion() {
        let mut tracker = tracker();
        let now = Instant::now();

        tracker.observe(&WatchEvent::created("/inbox/song.mp3.part".into()), now);
        tracker.observe(&WatchEvent::deleted("/inbox/song.mp3.part".into()), now);
        let settled = tracker.observe(&WatchEvent::created("/inbox/song.mp3".into()), now);

        assert_eq!(settled, Some("song.mp3".to_string()));
        let entry = tracker.state("song.mp3").expect("entry should exist");
        assert!(entry.from_download);
        assert_eq!(entry.phase, ArtifactPhase::Settling);
    }

    #[test]
    fn test_untracked_temporary_rename_still_counts_as_download() {
        let mut tracker = tracker();
        let now = Instant::now();

        // Watch started mid-download: no Created event was ever seen.
        let settled = tracker.observe(
            &WatchEvent::renamed("/inbox/clip.mp4.crdownload".into(), "/inbox/clip.mp4".into()),
            now,
        );

        assert_eq!(settled, Some("clip.mp4".to_string()));
        assert!(tracker.state("clip.mp4").expect("entry should exist").from_download);
    }

    #[test]
    fn test_prefix_artifact_keyed_provisionally_and_rekeyed() {
        let mut tracker = tracker();
        let now = Instant::now();

        tracker.observe(&WatchEvent::created("/inbox/~dl-83f2".into()), now);
        assert!(tracker.state("~dl-83f2").is_some());

        let settled = tracker.observe(
            &WatchEvent::renamed("/inbox/~dl-83f2".into(), "/inbox/report.pdf".into()),
            now,
        );

        assert_eq!(settled, Some("report.pdf".to_string()));
        assert!(tracker.state("~dl-83f2").is_none());
        assert!(tracker.state("report.pdf").expect("entry should exist").from_download);
    }

    #[test]
    fn test_rename_between_temporary_names_carries_entry() {
        let mut tracker = tracker();
        let now = Instant::now();

        tracker.observe(&WatchEvent::created("/inbox/~dl-83f2".into()), now);
        tracker.observe(
            &WatchEvent::renamed("/inbox/~dl-83f2".into(), "/inbox/report.pdf.part".into()),
            now,
        );

        assert!(tracker.state("~dl-83f2").is_none());
        let entry = tracker.state("report.pdf").expect("entry should be re-keyed");
        assert_eq!(
            entry.temporary_path.as_deref(),
            Some(Path::new("/inbox/report.pdf.part"))
        );
    }

    #[test]
    fn test_colliding_downloads_last_rename_wins() {
        let mut tracker = tracker();
        let now = Instant::now();

        // Two concurrent downloads inferring the same final name.
        tracker.observe(&WatchEvent::created("/inbox/data.zip.crdownload".into()), now);
        tracker.observe(
            &WatchEvent::renamed("/inbox/data.zip.crdownload".into(), "/inbox/data.zip".into()),
            now,
        );
        tracker.observe(&WatchEvent::created("/inbox/data.zip.part".into()), now);
        let settled = tracker.observe(
            &WatchEvent::renamed("/inbox/data.zip.part".into(), "/inbox/data.zip".into()),
            now,
        );

        assert_eq!(settled, Some("data.zip".to_string()));
        assert_eq!(tracker.len(), 1);
        let entry = tracker.state("data.zip").expect("entry should exist");
        assert_eq!(entry.phase, ArtifactPhase::Settling);
        assert_eq!(entry.checks, 0);
    }

    #[test]
    fn test_user_rename_keeps_tracking_under_new_key() {
        let mut tracker = tracker();
        let now = Instant::now();

        tracker.observe(&WatchEvent::created("/inbox/draft.pdf".into()), now);
        let settled = tracker.observe(
            &WatchEvent::renamed("/inbox/draft.pdf".into(), "/inbox/final.pdf".into()),
            now,
        );

        assert_eq!(settled, Some("final.pdf".to_string()));
        assert!(tracker.state("draft.pdf").is_none());
        assert!(!tracker.state("final.pdf").expect("entry should exist").from_download);
    }

    #[test]
    fn test_deleted_final_file_drops_entry() {
        let mut tracker = tracker();
        let now = Instant::now();

        tracker.observe(&WatchEvent::created("/inbox/gone.pdf".into()), now);
        tracker.observe(&WatchEvent::deleted("/inbox/gone.pdf".into()), now);

        assert!(tracker.state("gone.pdf").is_none());
    }

    #[test]
    fn test_abandoned_download_is_pruned() {
        let mut tracker = tracker_with_timeout(Duration::from_secs(600));
        let now = Instant::now();

        tracker.observe(&WatchEvent::created("/inbox/archive.zip.crdownload".into()), now);
        tracker.observe(&WatchEvent::deleted("/inbox/archive.zip.crdownload".into()), now);

        // Within the timeout nothing is discarded.
        assert!(tracker.prune_abandoned(now + Duration::from_secs(599)).is_empty());

        let discarded = tracker.prune_abandoned(now + Duration::from_secs(601));
        assert_eq!(discarded.len(), 1);
        assert_eq!(discarded[0].0, "archive.zip");
        assert_eq!(discarded[0].1.phase, ArtifactPhase::Abandoned);
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_activity_defers_abandonment() {
        let mut tracker = tracker_with_timeout(Duration::from_secs(600));
        let now = Instant::now();

        tracker.observe(&WatchEvent::created("/inbox/big.iso.part".into()), now);
        tracker.observe(
            &WatchEvent::modified("/inbox/big.iso.part".into()),
            now + Duration::from_secs(500),
        );

        assert!(tracker.prune_abandoned(now + Duration::from_secs(700)).is_empty());
        assert!(!tracker.prune_abandoned(now + Duration::from_secs(1200)).is_empty());
    }

    #[test]
    fn test_settling_entries_are_not_pruned() {
        let mut tracker = tracker_with_timeout(Duration::from_secs(600));
        let now = Instant::now();

        tracker.observe(&WatchEvent::created("/inbox/slow.pdf".into()), now);
        assert!(tracker.prune_abandoned(now + Duration::from_secs(10_000)).is_empty());
    }

    #[test]
    fn test_next_expiry_tracks_pending_entries_only() {
        let mut tracker = tracker_with_timeout(Duration::from_secs(600));
        let now = Instant::now();

        assert!(tracker.next_expiry().is_none());
        tracker.observe(&WatchEvent::created("/inbox/settled.pdf".into()), now);
        assert!(tracker.next_expiry().is_none());

        tracker.observe(&WatchEvent::created("/inbox/a.zip.crdownload".into()), now);
        assert!(tracker.next_expiry().is_some());
    }

    #[test]
    fn test_retain_present_drops_stale_entries() {
        let mut tracker = tracker();
        let now = Instant::now();

        tracker.observe(&WatchEvent::created("/inbox/kept.pdf".into()), now);
        tracker.observe(&WatchEvent::created("/inbox/stale.pdf".into()), now);
        tracker.observe(&WatchEvent::created("/inbox/partial.zip.crdownload".into()), now);

        let present: HashSet<String> = ["kept.pdf".to_string(), "partial.zip.crdownload".to_string()]
            .into_iter()
            .collect();
        let dropped = tracker.retain_present(&present);

        assert_eq!(dropped, 1);
        assert!(tracker.state("kept.pdf").is_some());
        assert!(tracker.state("stale.pdf").is_none());
        // Pending entry survives because its temporary artifact is present.
        assert!(tracker.state("partial.zip").is_some());
    }

    #[test]
    fn test_scan_observation_matches_created_semantics() {
        let mut tracker = tracker();
        let now = Instant::now();

        let settled = tracker.observe_scan(Path::new("/inbox/found.pdf"), now);
        assert_eq!(settled, Some("found.pdf".to_string()));

        let pending = tracker.observe_scan(Path::new("/inbox/found.zip.crdownload"), now);
        assert_eq!(pending, None);
        assert_eq!(
            tracker.state("found.zip").expect("entry should exist").phase,
            ArtifactPhase::Pending
        );
    }
}
