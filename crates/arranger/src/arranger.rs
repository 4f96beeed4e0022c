//! Matching observed windows to launch records and moving them into place.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};
use workspaces_core::monitor::{resolve_target, translate_position};
use workspaces_core::{
    AppId, ApplicationRecord, LaunchStatusEntry, LaunchingState, LaunchingStatus, Monitor, Rect,
    WindowHandle, Workspace,
};
use workspaces_ipc::{ArrangerToLauncher, LauncherToArranger};
use workspaces_platform_win32::{Desktop, ShowState};

/// Delivers messages for the launcher.
pub type Reporter = Arc<dyn Fn(ArrangerToLauncher) + Send + Sync>;

/// What happened to one observed window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrangeOutcome {
    /// The window does not belong to this launch.
    Ignored,
    /// The window was placed for the application.
    Moved(AppId),
    /// The window was claimed but could not be placed.
    Failed(AppId),
}

pub struct WindowArranger {
    desktop: Arc<dyn Desktop>,
    workspace: Workspace,
    monitors: Vec<Monitor>,
    tracker: Arc<LaunchingStatus>,
    setup_differs: AtomicBool,
    reporter: Reporter,
}

impl WindowArranger {
    pub fn new(
        desktop: Arc<dyn Desktop>,
        workspace: Workspace,
        monitors: Vec<Monitor>,
        reporter: Reporter,
    ) -> Self {
        let tracker = Arc::new(LaunchingStatus::new(&workspace));
        Self {
            desktop,
            workspace,
            monitors,
            tracker,
            setup_differs: AtomicBool::new(false),
            reporter,
        }
    }

    pub fn tracker(&self) -> &Arc<LaunchingStatus> {
        &self.tracker
    }

    /// Whether any placement fell back to a different monitor.
    pub fn setup_differs(&self) -> bool {
        self.setup_differs.load(Ordering::SeqCst)
    }

    /// Mirror a state change made by the launcher.
    ///
    /// Returns true once the launcher has said there is no more work.
    pub fn apply_launcher_message(&self, message: LauncherToArranger) -> bool {
        match message {
            LauncherToArranger::StateUpdate {
                app,
                state: LaunchingState::Launched,
                process_id: Some(process_id),
            } => {
                self.tracker.mark_launched(app, process_id);
                false
            }
            LauncherToArranger::StateUpdate { app, state, .. } => {
                self.tracker.update(app, state);
                false
            }
            LauncherToArranger::Finish => true,
        }
    }

    /// Handle a newly created top-level window.
    pub fn handle_window_created(&self, window: WindowHandle) -> ArrangeOutcome {
        let Some(identity) = self.desktop.window_identity(window) else {
            trace!("Window {} is not an application window", window);
            return ArrangeOutcome::Ignored;
        };
        let candidate = identity.into_candidate(window);
        let Some(entry) = self.tracker.claim(&candidate) else {
            trace!(
                "Window {} (pid {}, {:?}) matches no pending application",
                window,
                candidate.process_id,
                candidate.executable_path
            );
            return ArrangeOutcome::Ignored;
        };
        self.place(window, entry)
    }

    /// Match and place windows that already exist on the desktop.
    ///
    /// Returns the number of windows moved.
    pub fn arrange_existing(&self) -> usize {
        let windows = match self.desktop.enumerate_app_windows() {
            Ok(windows) => windows,
            Err(e) => {
                warn!("Failed to enumerate existing windows: {}", e);
                return 0;
            }
        };
        let moved = windows
            .iter()
            .filter(|w| matches!(self.handle_window_created(w.window), ArrangeOutcome::Moved(_)))
            .count();
        info!("Moved {} existing window(s)", moved);
        moved
    }

    /// Place windows that already exist and belong to a process the launcher started.
    ///
    /// Covers windows that appeared before creation notifications were observed.
    /// Unlike [`arrange_existing`](Self::arrange_existing), a window is only taken by the
    /// entry whose spawned process owns it. Returns the number of windows moved.
    pub fn arrange_launched(&self) -> usize {
        let windows = match self.desktop.enumerate_app_windows() {
            Ok(windows) => windows,
            Err(e) => {
                warn!("Failed to enumerate existing windows: {}", e);
                return 0;
            }
        };
        let moved = windows
            .into_iter()
            .filter_map(|w| {
                let candidate = w.identity.into_candidate(w.window);
                let entry = self.tracker.claim_launched(&candidate)?;
                Some(self.place(candidate.window, entry))
            })
            .filter(|outcome| matches!(outcome, ArrangeOutcome::Moved(_)))
            .count();
        if moved > 0 {
            info!("Moved {} window(s) that appeared before observation started", moved);
        }
        moved
    }

    fn place(&self, window: WindowHandle, entry: LaunchStatusEntry) -> ArrangeOutcome {
        let app = &entry.app;
        if let Err(e) = self.desktop.set_workspace_marker(window) {
            warn!("Failed to mark window {} of '{}': {}", window, app.name, e);
        }

        let rect = self.target_rect(app);
        let (state, outcome) = match self.desktop.move_resize(window, rect, ShowState::for_app(app)) {
            Ok(()) => {
                info!(
                    "Moved '{}' window {} to {},{} {}x{}",
                    app.name, window, rect.x, rect.y, rect.width, rect.height
                );
                (LaunchingState::LaunchedAndMoved, ArrangeOutcome::Moved(entry.id))
            }
            Err(e) => {
                warn!(
                    "Failed to move '{}' ({}) window {}: {}",
                    app.name, app.executable_path, window, e
                );
                (LaunchingState::Failed, ArrangeOutcome::Failed(entry.id))
            }
        };

        self.tracker.update(entry.id, state);
        (self.reporter)(ArrangerToLauncher::StateUpdate {
            app: entry.id,
            state,
            window: Some(window),
        });
        outcome
    }

    /// Recorded position mapped onto the current monitor set.
    fn target_rect(&self, app: &ApplicationRecord) -> Rect {
        let Some(target) = resolve_target(&self.monitors, &self.workspace.monitors, app.monitor)
        else {
            debug!("No monitors identified, using the recorded position of '{}'", app.name);
            return app.position;
        };
        if target.setup_differs {
            debug!(
                "Monitor {} of '{}' resolved to {} ({})",
                app.monitor, app.name, target.monitor.ordinal, target.monitor.stable_id
            );
            if !self.setup_differs.swap(true, Ordering::SeqCst) {
                info!("Monitor setup differs from the one saved with the workspace");
                (self.reporter)(ArrangerToLauncher::SetupDiffers);
            }
        }
        translate_position(
            &app.position,
            self.workspace.recorded_monitor(app.monitor),
            &target.monitor,
        )
    }
}
