//! Engine orchestration for the watched inbox.
//!
//! The engine owns the whole process-wide state lifecycle: it consumes the
//! watcher's message stream, drives the download tracker and stability
//! gate, filters out the events its own moves generate, and hands settled
//! files to the router and relocator.
//!
//! Execution is single-threaded and cooperative: one mpsc receiver carries
//! filesystem events, resynchronize signals, and the shutdown request,
//! while stability checks and abandonment pruning run as deadline-driven
//! wake-ups (`recv_timeout`) on the same loop. No two state transitions
//! for the same tracked file can ever interleave.

use crate::config::{CompiledRules, IgnoreFilter, WatchRules};
use crate::paths::DestinationMap;
use crate::relocator::{Relocator, SelfMoveLedger};
use crate::report::{EngineNotice, EngineReporter, SkipReason};
use crate::routing::RouteTable;
use crate::stability::{SettleVerdict, StabilityGate};
use crate::tracker::{ArtifactPhase, DownloadTracker};
use crate::watcher::{WatchEvent, WatchMessage};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::Instant;

/// Lifecycle state of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Consuming events normally.
    Running,
    /// Re-listing the directory to reconcile tracked state.
    Resynchronizing,
    /// Terminal; reached only on an explicit shutdown request.
    Stopped,
}

/// Unrecoverable engine failures.
///
/// Overflowed event queues and transient I/O problems are handled
/// internally; what remains is the watch target itself becoming unusable.
#[derive(Debug)]
pub enum EngineError {
    /// The watched inbox became inaccessible (deleted or unmounted).
    WatchLost { path: PathBuf, source: io::Error },
    /// The event channel closed without a shutdown request.
    ChannelClosed,
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::WatchLost { path, source } => {
                write!(
                    f,
                    "Watched directory {} became inaccessible: {}",
                    path.display(),
                    source
                )
            }
            EngineError::ChannelClosed => {
                write!(f, "Event channel closed unexpectedly")
            }
        }
    }
}

impl std::error::Error for EngineError {}

/// Orchestrates watching, tracking, settling, routing, and relocation for
/// one inbox directory.
pub struct Engine {
    inbox: PathBuf,
    destinations: DestinationMap,
    routes: RouteTable,
    tracker: DownloadTracker,
    gate: StabilityGate,
    ledger: SelfMoveLedger,
    ignore: IgnoreFilter,
    move_manual_drops: bool,
    /// Scheduled stability checks, earliest deadline first.
    checks: BinaryHeap<Reverse<(Instant, String)>>,
    reporter: Box<dyn EngineReporter>,
    state: EngineState,
}

impl Engine {
    pub fn new(
        inbox: PathBuf,
        destinations: DestinationMap,
        routes: RouteTable,
        rules: CompiledRules,
        watch: &WatchRules,
        reporter: Box<dyn EngineReporter>,
    ) -> Self {
        Self {
            inbox,
            destinations,
            routes,
            tracker: DownloadTracker::new(rules.artifacts, watch.abandon_after()),
            gate: StabilityGate::new(watch.quiet_interval(), watch.max_stability_checks),
            ledger: SelfMoveLedger::new(watch.self_move_ttl()),
            ignore: rules.ignore,
            move_manual_drops: watch.move_manual_drops,
            checks: BinaryHeap::new(),
            reporter,
            state: EngineState::Running,
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Runs the processing loop until a shutdown request arrives or the
    /// watch becomes unrecoverable.
    ///
    /// Startup performs an initial scan so that files already present in
    /// the inbox (including moves interrupted by an earlier shutdown) are
    /// picked up again.
    pub fn run(&mut self, receiver: &Receiver<WatchMessage>) -> Result<(), EngineError> {
        self.resynchronize()?;
        self.reporter.notify(&EngineNotice::WatchStarted {
            inbox: self.inbox.clone(),
        });

        while self.state != EngineState::Stopped {
            self.run_due_work();

            let message = match self.next_deadline() {
                Some(deadline) => {
                    let now = Instant::now();
                    if deadline <= now {
                        // Work became due while we were processing.
                        continue;
                    }
                    match receiver.recv_timeout(deadline - now) {
                        Ok(message) => Some(message),
                        Err(RecvTimeoutError::Timeout) => None,
                        Err(RecvTimeoutError::Disconnected) => {
                            return Err(EngineError::ChannelClosed);
                        }
                    }
                }
                None => match receiver.recv() {
                    Ok(message) => Some(message),
                    Err(_) => return Err(EngineError::ChannelClosed),
                },
            };

            if let Some(message) = message {
                self.handle_message(message)?;
            }
        }

        Ok(())
    }

    fn handle_message(&mut self, message: WatchMessage) -> Result<(), EngineError> {
        match message {
            WatchMessage::Event(event) => {
                self.handle_event(event);
                Ok(())
            }
            WatchMessage::Resynchronize => self.resynchronize(),
            WatchMessage::Shutdown => {
                self.shutdown();
                Ok(())
            }
        }
    }

    /// Cancels pending stability checks and reaches the terminal state.
    /// A move already in progress has completed by the time this runs,
    /// since moves execute synchronously on this loop.
    fn shutdown(&mut self) {
        self.checks.clear();
        self.state = EngineState::Stopped;
        self.reporter.notify(&EngineNotice::Stopped);
    }

    fn handle_event(&mut self, event: WatchEvent) {
        let now = Instant::now();

        // Self-generated events are discarded before they reach the
        // tracker; otherwise every move would feed back into the loop.
        if self.ledger.matches(&event.path, now) {
            return;
        }
        if let Some(previous) = &event.previous_path
            && self.ledger.matches(previous, now)
        {
            return;
        }

        if let Some(name) = event.path.file_name().map(|n| n.to_string_lossy())
            && !self.ignore.should_consider(&name)
        {
            return;
        }

        if let Some(key) = self.tracker.observe(&event, now) {
            self.schedule_check(key, now);
        }
    }

    /// Captures the stability baseline and queues the first quiet-interval
    /// check for an entry that just entered `Settling`.
    fn schedule_check(&mut self, key: String, now: Instant) {
        if let Some(state) = self.tracker.state_mut(&key)
            && let Some(path) = state.final_path.clone()
        {
            self.gate.prime(state, &path);
            self.checks
                .push(Reverse((now + self.gate.quiet_interval(), key)));
        }
    }

    /// Runs every stability check and abandonment expiry that is due.
    fn run_due_work(&mut self) {
        let now = Instant::now();

        loop {
            let due = matches!(
                self.checks.peek(),
                Some(Reverse((deadline, _))) if *deadline <= now
            );
            if !due {
                break;
            }
            if let Some(Reverse((_, key))) = self.checks.pop() {
                self.run_check(key, now);
            }
        }

        for (name, _state) in self.tracker.prune_abandoned(now) {
            self.reporter.notify(&EngineNotice::DownloadAbandoned { name });
        }
    }

    fn run_check(&mut self, key: String, now: Instant) {
        let Some(state) = self.tracker.state_mut(&key) else {
            // The entry was routed or dropped; this timer is stale.
            return;
        };
        if state.phase != ArtifactPhase::Settling {
            // Superseded, e.g. a new temporary artifact reclaimed the key.
            return;
        }
        let Some(path) = state.final_path.clone() else {
            return;
        };

        let verdict = self.gate.check(state, &path);
        match verdict {
            SettleVerdict::Settled | SettleVerdict::SettledAfterTimeout => {
                state.phase = ArtifactPhase::Settled;
                self.route_settled(&key);
            }
            SettleVerdict::Reschedule => {
                self.checks
                    .push(Reverse((now + self.gate.quiet_interval(), key)));
            }
            SettleVerdict::Gone => {
                self.tracker.remove(&key);
            }
        }
    }

    /// Routes one settled file: origin policy, extension lookup, move.
    /// The entry leaves the tracker here; whatever events the move
    /// generates are suppressed through the ledger, not through tracking.
    fn route_settled(&mut self, key: &str) {
        let Some(state) = self.tracker.remove(key) else {
            return;
        };
        let Some(path) = state.final_path else {
            return;
        };

        if !self.move_manual_drops && !state.from_download {
            self.reporter.notify(&EngineNotice::LeftInPlace {
                path,
                reason: SkipReason::ManualOrigin,
            });
            return;
        }

        let category = path
            .extension()
            .map(|ext| ext.to_string_lossy())
            .and_then(|ext| self.routes.resolve(&ext));
        let Some(category) = category else {
            self.reporter.notify(&EngineNotice::LeftInPlace {
                path,
                reason: SkipReason::NoRoute,
            });
            return;
        };

        let destination_dir = self.destinations.dir_for(category).to_path_buf();
        match Relocator::move_file(&path, &destination_dir, &mut self.ledger) {
            Ok(destination) => {
                self.reporter.notify(&EngineNotice::Moved {
                    source: path,
                    destination,
                    category,
                });
            }
            Err(e) => {
                // Not retried; the file stays in the inbox untouched.
                self.reporter.notify(&EngineNotice::RelocationFailed {
                    path,
                    detail: e.to_string(),
                });
            }
        }
    }

    /// The next moment the loop must wake up even without an event.
    fn next_deadline(&self) -> Option<Instant> {
        let check = self.checks.peek().map(|Reverse((deadline, _))| *deadline);
        let expiry = self.tracker.next_expiry();
        match (check, expiry) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (deadline, None) => deadline,
            (None, expiry) => expiry,
        }
    }

    /// Re-lists the inbox and reconciles tracked state against the files
    /// actually present: untracked files are picked up as if they had
    /// just appeared, stale entries for vanished files are dropped.
    fn resynchronize(&mut self) -> Result<(), EngineError> {
        if self.state == EngineState::Stopped {
            return Ok(());
        }
        self.state = EngineState::Resynchronizing;

        let entries = fs::read_dir(&self.inbox).map_err(|e| EngineError::WatchLost {
            path: self.inbox.clone(),
            source: e,
        })?;

        let now = Instant::now();
        let mut present = HashSet::new();
        let mut needs_check = Vec::new();

        for entry in entries.flatten() {
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            if !file_type.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if !self.ignore.should_consider(&name) {
                continue;
            }
            present.insert(name.to_lowercase());
            if let Some(key) = self.tracker.observe_scan(&entry.path(), now) {
                needs_check.push(key);
            }
        }

        self.tracker.retain_present(&present);
        for key in needs_check {
            self.schedule_check(key, now);
        }

        self.state = EngineState::Running;
        self.reporter.notify(&EngineNotice::Resynchronized {
            tracked: self.tracker.len(),
        });
        Ok(())
    }
}
