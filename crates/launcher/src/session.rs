//! One launch of one workspace, as seen from the launcher.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use workspaces_core::{LaunchReport, LaunchStatusEntry, LaunchingState, LaunchingStatus, Workspace};
use workspaces_ipc::{ArrangerToLauncher, LauncherToArranger, UiToLauncher};
use workspaces_platform_win32::{ProcessSpawner, SpawnRequest};

/// Revision and copy of the status map after one change.
pub type StatusSnapshot = (u64, Vec<LaunchStatusEntry>);

/// Launch state owned by the launcher process.
pub struct LaunchSession {
    workspace: Workspace,
    status: Arc<LaunchingStatus>,
    changed: Arc<Notify>,
    ready: Notify,
    setup_differs: AtomicBool,
}

impl LaunchSession {
    /// Create a session with every application `Waiting`.
    ///
    /// The receiver yields a snapshot of the status map after every change.
    pub fn new(workspace: Workspace) -> (Self, mpsc::UnboundedReceiver<StatusSnapshot>) {
        let (snapshots, receiver) = mpsc::unbounded_channel();
        let changed = Arc::new(Notify::new());
        let notify = changed.clone();
        let status = LaunchingStatus::with_callback(&workspace, move |revision, entries| {
            let _ = snapshots.send((revision, entries.to_vec()));
            notify.notify_one();
        });

        let session = Self {
            workspace,
            status: Arc::new(status),
            changed,
            ready: Notify::new(),
            setup_differs: AtomicBool::new(false),
        };
        (session, receiver)
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn status(&self) -> &LaunchingStatus {
        &self.status
    }

    pub fn setup_differs(&self) -> bool {
        self.setup_differs.load(Ordering::SeqCst)
    }

    /// Start every application that is still `Waiting`.
    ///
    /// Each entry is re-read right before its spawn, since the arranger may have
    /// claimed an existing window for it while earlier entries were starting.
    /// Each resulting state change is queued on `forward` for the arranger.
    /// Returns the number of processes started.
    pub fn launch_pending(
        &self,
        spawner: &dyn ProcessSpawner,
        forward: &mpsc::UnboundedSender<LauncherToArranger>,
    ) -> usize {
        let mut started = 0;
        for id in 0..self.status.len() {
            let Some(entry) = self.status.entry(id) else {
                continue;
            };
            if entry.state != LaunchingState::Waiting || entry.window.is_some() {
                debug!("'{}' already {:?}, not starting it", entry.app.name, entry.state);
                continue;
            }

            let request = SpawnRequest::for_app(&entry.app);
            let message = match spawner.spawn(&request) {
                Ok(process_id) => {
                    info!(
                        "Started '{}' ({}) as pid {}",
                        entry.app.name, entry.app.executable_path, process_id
                    );
                    if !self.status.mark_launched(entry.id, process_id) {
                        // The entry was placed while spawning; the new process is not tracked.
                        warn!(
                            "'{}' ({}) was placed while pid {} was starting; that process is not tracked",
                            entry.app.name, entry.app.executable_path, process_id
                        );
                        continue;
                    }
                    started += 1;
                    LauncherToArranger::StateUpdate {
                        app: entry.id,
                        state: LaunchingState::Launched,
                        process_id: Some(process_id),
                    }
                }
                Err(e) => {
                    warn!(
                        "Failed to start '{}' ({}): {}",
                        entry.app.name, entry.app.executable_path, e
                    );
                    if !self.status.update(entry.id, LaunchingState::Failed) {
                        continue;
                    }
                    LauncherToArranger::StateUpdate {
                        app: entry.id,
                        state: LaunchingState::Failed,
                        process_id: None,
                    }
                }
            };
            let _ = forward.send(message);
        }
        started
    }

    /// Apply a message received from the arranger.
    pub fn apply_arranger_message(&self, message: ArrangerToLauncher) {
        match message {
            ArrangerToLauncher::Ready => {
                debug!("Arranger is ready");
                self.ready.notify_one();
            }
            ArrangerToLauncher::StateUpdate { app, state, window } => {
                if let Some(window) = window {
                    self.status.set_window(app, window);
                }
                self.status.update(app, state);
            }
            ArrangerToLauncher::SetupDiffers => {
                if !self.setup_differs.swap(true, Ordering::SeqCst) {
                    info!("Monitor setup differs from the one saved with the workspace");
                }
            }
        }
    }

    /// Apply a message received from the progress UI.
    ///
    /// Returns the messages to forward to the arranger.
    pub fn apply_ui_message(&self, message: UiToLauncher) -> Vec<LauncherToArranger> {
        match message {
            UiToLauncher::Cancel => {
                let canceled = self.status.cancel_pending();
                info!("Launch canceled, {} application(s) not placed", canceled.len());
                canceled
                    .into_iter()
                    .map(|app| LauncherToArranger::StateUpdate {
                        app,
                        state: LaunchingState::Canceled,
                        process_id: None,
                    })
                    .collect()
            }
        }
    }

    /// Wait for the arranger's `Ready`. Returns false on timeout.
    pub async fn wait_until_ready(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.ready.notified()).await.is_ok()
    }

    /// Wait until every entry is terminal. Returns false if the deadline passed first.
    pub async fn wait_for_completion(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let changed = self.changed.notified();
            if self.status.is_complete() {
                return true;
            }
            if tokio::time::timeout_at(deadline, changed).await.is_err() {
                return self.status.is_complete();
            }
        }
    }

    /// Force everything still pending to `Failed` and summarise the run.
    pub fn finalize(&self) -> LaunchReport {
        let timed_out = self.status.fail_pending();
        if !timed_out.is_empty() {
            warn!("{} application(s) did not show a window in time", timed_out.len());
        }
        self.status.report(&self.workspace.id, self.setup_differs())
    }
}
