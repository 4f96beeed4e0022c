//! Per-application launch state machine and the shared status map.
//!
//! # Concurrency
//!
//! One `RwLock` guards the whole map. `update`, `claim` and the bulk transitions take
//! the write side; every query takes the read side. The update callback runs after the
//! lock is released and receives a copy of the post-update map, so it may freely call
//! back into the tracker. Callbacks from different threads can therefore run out of
//! order; each copy carries the revision it was taken at, and a higher revision is
//! always the newer map.

use crate::matching::{find_match, find_process_match, MatchCandidate};
use crate::workspace::{ApplicationRecord, Workspace};
use crate::WindowHandle;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};

/// Index of an application record within its workspace.
pub type AppId = usize;

/// Launch progress of a single application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LaunchingState {
    /// Not spawned yet, or spawned without confirmation.
    Waiting,
    /// Process spawned, window not placed yet.
    Launched,
    /// Window observed, matched and moved.
    LaunchedAndMoved,
    /// Spawn failed or no window appeared before the deadline.
    Failed,
    /// Aborted by the user.
    Canceled,
}

impl LaunchingState {
    /// Terminal states are never left within one launch.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            LaunchingState::LaunchedAndMoved | LaunchingState::Failed | LaunchingState::Canceled
        )
    }

    /// Still eligible for window matching.
    pub fn is_pending(self) -> bool {
        matches!(self, LaunchingState::Waiting | LaunchingState::Launched)
    }

    /// Whether moving from `self` to `next` is a legal forward transition.
    pub fn can_transition_to(self, next: LaunchingState) -> bool {
        if self == next || self.is_terminal() {
            return false;
        }
        next != LaunchingState::Waiting
    }
}

/// One row of the status map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaunchStatusEntry {
    pub id: AppId,
    pub app: ApplicationRecord,
    /// Window claimed for this entry by the arranger.
    #[serde(default)]
    pub window: Option<WindowHandle>,
    /// Process spawned for this entry by the launcher.
    #[serde(default)]
    pub process_id: Option<u32>,
    pub state: LaunchingState,
}

/// Invoked with the revision and the full post-update map after every state change.
pub type UpdateCallback = Box<dyn Fn(u64, &[LaunchStatusEntry]) + Send + Sync>;

/// Thread-safe status map for one launch of one workspace.
pub struct LaunchingStatus {
    entries: RwLock<Vec<LaunchStatusEntry>>,
    /// Bumped while the write lock is held, once per reported change.
    revision: AtomicU64,
    on_update: Option<UpdateCallback>,
}

impl LaunchingStatus {
    /// Create a tracker with one `Waiting` entry per application in the workspace.
    pub fn new(workspace: &Workspace) -> Self {
        let entries = workspace
            .apps
            .iter()
            .enumerate()
            .map(|(id, app)| LaunchStatusEntry {
                id,
                app: app.clone(),
                window: None,
                process_id: None,
                state: LaunchingState::Waiting,
            })
            .collect();
        Self {
            entries: RwLock::new(entries),
            revision: AtomicU64::new(0),
            on_update: None,
        }
    }

    /// Create a tracker that reports every change to `on_update`.
    pub fn with_callback<F>(workspace: &Workspace, on_update: F) -> Self
    where
        F: Fn(u64, &[LaunchStatusEntry]) + Send + Sync + 'static,
    {
        Self {
            on_update: Some(Box::new(on_update)),
            ..Self::new(workspace)
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<LaunchStatusEntry>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<LaunchStatusEntry>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Copy the map and stamp it. Call with the write lock held.
    fn stamp(&self, entries: &[LaunchStatusEntry]) -> (u64, Vec<LaunchStatusEntry>) {
        let revision = self.revision.fetch_add(1, Ordering::SeqCst) + 1;
        (revision, entries.to_vec())
    }

    fn notify(&self, (revision, snapshot): (u64, Vec<LaunchStatusEntry>)) {
        if let Some(on_update) = &self.on_update {
            on_update(revision, &snapshot);
        }
    }

    /// Revision of the most recent reported change; 0 before any change.
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::SeqCst)
    }

    /// Transition an entry to `state`.
    ///
    /// Returns false, and logs, when the entry is not tracked or the transition would
    /// leave a terminal state or go backwards.
    pub fn update(&self, id: AppId, state: LaunchingState) -> bool {
        self.apply(id, |entry| entry.state = state, state)
    }

    /// Record a successful spawn: the entry becomes `Launched` and remembers its process.
    pub fn mark_launched(&self, id: AppId, process_id: u32) -> bool {
        self.apply(
            id,
            |entry| {
                entry.state = LaunchingState::Launched;
                entry.process_id = Some(process_id);
            },
            LaunchingState::Launched,
        )
    }

    fn apply<F>(&self, id: AppId, change: F, next: LaunchingState) -> bool
    where
        F: FnOnce(&mut LaunchStatusEntry),
    {
        let snapshot = {
            let mut entries = self.write();
            let Some(entry) = entries.get_mut(id) else {
                warn!("Status update for untracked application #{} ignored", id);
                return false;
            };
            if !entry.state.can_transition_to(next) {
                debug!(
                    "Ignoring {:?} -> {:?} for '{}' ({})",
                    entry.state, next, entry.app.name, entry.app.executable_path
                );
                return false;
            }
            change(entry);
            debug!("'{}' is now {:?}", entry.app.name, next);
            self.stamp(&entries)
        };
        self.notify(snapshot);
        true
    }

    /// Remember the window the arranger placed for an entry.
    pub fn set_window(&self, id: AppId, window: WindowHandle) -> bool {
        let mut entries = self.write();
        match entries.get_mut(id) {
            Some(entry) => {
                entry.window = Some(window);
                true
            }
            None => {
                warn!("Window {} reported for untracked application #{}", window, id);
                false
            }
        }
    }

    /// Atomically match a window against the pending entries and reserve the winner.
    ///
    /// A window already reserved by any entry never matches again, and a reserved
    /// entry is not offered to later windows.
    pub fn claim(&self, candidate: &MatchCandidate) -> Option<LaunchStatusEntry> {
        let mut entries = self.write();
        if entries.iter().any(|e| e.window == Some(candidate.window)) {
            return None;
        }
        let id = find_match(candidate, &entries)?;
        let entry = entries.get_mut(id)?;
        entry.window = Some(candidate.window);
        Some(entry.clone())
    }

    /// Like [`claim`](Self::claim), but only for an entry whose spawned process owns the window.
    ///
    /// Used for windows that existed before notifications were observed, where an
    /// executable match could just as well be an instance the user started earlier.
    pub fn claim_launched(&self, candidate: &MatchCandidate) -> Option<LaunchStatusEntry> {
        let mut entries = self.write();
        if entries.iter().any(|e| e.window == Some(candidate.window)) {
            return None;
        }
        let id = find_process_match(candidate, &entries)?;
        let entry = entries.get_mut(id)?;
        entry.window = Some(candidate.window);
        Some(entry.clone())
    }

    /// Copy of the full map, ordered by application index.
    pub fn get(&self) -> Vec<LaunchStatusEntry> {
        self.read().clone()
    }

    /// Copy of a single entry.
    pub fn entry(&self, id: AppId) -> Option<LaunchStatusEntry> {
        self.read().get(id).cloned()
    }

    /// Number of tracked applications.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether the workspace had no applications.
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// True when nothing is left `Waiting`.
    pub fn all_launched(&self) -> bool {
        self.read()
            .iter()
            .all(|e| e.state != LaunchingState::Waiting)
    }

    /// True when every entry is `Failed` or `LaunchedAndMoved`.
    pub fn all_launched_and_moved(&self) -> bool {
        self.read().iter().all(|e| {
            matches!(
                e.state,
                LaunchingState::Failed | LaunchingState::LaunchedAndMoved
            )
        })
    }

    /// True when every entry reached a terminal state.
    pub fn is_complete(&self) -> bool {
        self.read().iter().all(|e| e.state.is_terminal())
    }

    /// Force every pending entry to `Failed`; used when the launch deadline passes.
    pub fn fail_pending(&self) -> Vec<AppId> {
        self.finish_pending(LaunchingState::Failed)
    }

    /// Move every pending entry to `Canceled`.
    pub fn cancel_pending(&self) -> Vec<AppId> {
        self.finish_pending(LaunchingState::Canceled)
    }

    fn finish_pending(&self, state: LaunchingState) -> Vec<AppId> {
        let (changed, snapshot) = {
            let mut entries = self.write();
            let mut changed = Vec::new();
            for entry in entries.iter_mut().filter(|e| e.state.is_pending()) {
                warn!(
                    "'{}' ({}) was {:?}, marking {:?}",
                    entry.app.name, entry.app.executable_path, entry.state, state
                );
                entry.state = state;
                changed.push(entry.id);
            }
            if changed.is_empty() {
                return changed;
            }
            (changed, self.stamp(&entries))
        };
        self.notify(snapshot);
        changed
    }

    /// Summarise the current map.
    pub fn report(&self, workspace_id: &str, setup_differs: bool) -> LaunchReport {
        let entries = self.read();
        let names_in = |state: LaunchingState| {
            entries
                .iter()
                .filter(|e| e.state == state)
                .map(|e| e.app.name.clone())
                .collect::<Vec<_>>()
        };
        let report = LaunchReport {
            workspace_id: workspace_id.to_string(),
            total: entries.len(),
            launched_and_moved: entries
                .iter()
                .filter(|e| e.state == LaunchingState::LaunchedAndMoved)
                .count(),
            failed: names_in(LaunchingState::Failed),
            canceled: names_in(LaunchingState::Canceled),
            setup_differs,
        };
        info!(
            "Launch of {}: {}/{} placed, {} failed, {} canceled{}",
            report.workspace_id,
            report.launched_and_moved,
            report.total,
            report.failed.len(),
            report.canceled.len(),
            if setup_differs { " (monitor setup differs)" } else { "" }
        );
        report
    }
}

/// Outcome of one launch attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchReport {
    pub workspace_id: String,
    pub total: usize,
    pub launched_and_moved: usize,
    /// Names of applications that failed.
    pub failed: Vec<String>,
    /// Names of applications that were canceled.
    pub canceled: Vec<String>,
    /// The monitor topology differed from the snapshot.
    pub setup_differs: bool,
}

impl LaunchReport {
    /// Every application was launched and placed.
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.canceled.is_empty()
    }
}
