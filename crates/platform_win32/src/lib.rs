//! Workspaces Platform Win32
//!
//! Windows-specific desktop access used while launching a workspace.
//!
//! This crate handles:
//! - Monitor enumeration (device ids, DPI, physical bounds)
//! - Window identity (owning process, image path, package identity)
//! - Window positioning via SetWindowPos and the workspace marker property
//! - WinEvent hooks for window creation, show and uncloak
//! - Process spawning, including elevated and packaged launches
//!
//! The launch engine only talks to the [`Desktop`], [`NotificationSource`] and
//! [`ProcessSpawner`] traits, so it can be driven by in-memory fakes in tests.
//! Builds for other targets get an implementation that reports `Unsupported`.

pub mod spawn;

#[cfg(windows)]
mod hooks;
#[cfg(windows)]
mod win32;

#[cfg(not(windows))]
mod unsupported;

use std::sync::Arc;
use thiserror::Error;
use tracing::debug;
use workspaces_core::monitor::{identify_with_retry, Monitor, RetryPolicy};
use workspaces_core::{ApplicationRecord, MatchCandidate, Rect, WindowHandle};

pub use spawn::{join_command_line, ProcessSpawner, SpawnError, SpawnRequest, SystemSpawner};

/// Errors that can occur during platform operations.
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("Failed to enumerate: {0}")]
    EnumerationFailed(String),

    #[error("Failed to set window position: {0}")]
    SetPositionFailed(String),

    #[error("Failed to mark window: {0}")]
    MarkerFailed(String),

    #[error("Failed to install event hook: {0}")]
    HookInstallFailed(String),

    #[error("Failed to release event hook: {0}")]
    HookReleaseFailed(String),

    #[error("Window not found: {0}")]
    WindowNotFound(WindowHandle),

    #[error("Not supported on this platform: {0}")]
    Unsupported(&'static str),
}

/// What is known about the process that owns a window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowIdentity {
    pub process_id: u32,
    pub executable_path: Option<String>,
    pub app_user_model_id: Option<String>,
}

impl WindowIdentity {
    /// Pair the identity with its window for matching.
    pub fn into_candidate(self, window: WindowHandle) -> MatchCandidate {
        MatchCandidate {
            window,
            process_id: self.process_id,
            executable_path: self.executable_path,
            app_user_model_id: self.app_user_model_id,
        }
    }
}

/// An existing top-level application window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowSnapshot {
    pub window: WindowHandle,
    pub title: String,
    pub identity: WindowIdentity,
    /// Restored (non-minimized, non-maximized) bounds.
    pub rect: Rect,
    pub minimized: bool,
    pub maximized: bool,
    /// The owning process runs elevated.
    pub elevated: bool,
}

/// Show state applied after a window is positioned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShowState {
    #[default]
    Normal,
    Minimized,
    Maximized,
}

impl ShowState {
    /// Show state recorded for an application.
    pub fn for_app(app: &ApplicationRecord) -> Self {
        if app.is_minimized {
            ShowState::Minimized
        } else if app.is_maximized {
            ShowState::Maximized
        } else {
            ShowState::Normal
        }
    }
}

/// Desktop queries and window manipulation.
pub trait Desktop: Send + Sync {
    /// Enumerate attached monitors in OS order. Ordinals are left unassigned.
    fn enumerate_monitors(&self) -> Result<Vec<Monitor>, PlatformError>;

    /// Identity of a window's owner, or `None` if it is not a top-level app window.
    fn window_identity(&self, window: WindowHandle) -> Option<WindowIdentity>;

    /// Visible top-level application windows.
    fn enumerate_app_windows(&self) -> Result<Vec<WindowSnapshot>, PlatformError>;

    /// Move and resize a window, then apply the show state.
    fn move_resize(&self, window: WindowHandle, rect: Rect, show: ShowState)
        -> Result<(), PlatformError>;

    /// Stamp the property identifying a window as launched by a workspace.
    /// Stamping an already stamped window is a no-op.
    fn set_workspace_marker(&self, window: WindowHandle) -> Result<(), PlatformError>;

    /// Whether the workspace property is present.
    fn has_workspace_marker(&self, window: WindowHandle) -> bool;
}

/// Desktop-wide window notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationKind {
    /// A window object was created.
    Created,
    /// A window became visible.
    Shown,
    /// A window was uncloaked, e.g. after switching virtual desktops.
    Unhidden,
}

impl NotificationKind {
    pub const ALL: [NotificationKind; 3] = [
        NotificationKind::Created,
        NotificationKind::Shown,
        NotificationKind::Unhidden,
    ];
}

/// Receives the window handle of every delivered notification.
///
/// Called on the source's dispatch thread; must return quickly.
pub type NotificationSink = Arc<dyn Fn(WindowHandle) + Send + Sync>;

/// A live notification subscription.
pub trait Registration: Send {
    /// Unsubscribe. The sink is not called after this returns.
    fn release(self: Box<Self>) -> Result<(), PlatformError>;
}

/// Source of desktop-wide window notifications.
pub trait NotificationSource: Send + Sync {
    fn register(
        &self,
        kind: NotificationKind,
        sink: NotificationSink,
    ) -> Result<Box<dyn Registration>, PlatformError>;
}

/// Identify the live monitors, retrying while the OS reports none.
pub fn identify_monitors(desktop: &dyn Desktop, policy: &RetryPolicy) -> Vec<Monitor> {
    identify_with_retry(policy, || match desktop.enumerate_monitors() {
        Ok(monitors) => monitors,
        Err(e) => {
            debug!("Monitor enumeration failed: {}", e);
            Vec::new()
        }
    })
}

/// Split a monitor device interface path into its hardware id and instance id.
///
/// `\\?\DISPLAY#DEL4321#5&1a2b3c&0&UID4352#{e6f07b5f-...}` yields
/// `("DEL4321", "5&1a2b3c&0&UID4352")`.
pub fn parse_device_interface(path: &str) -> Option<(String, String)> {
    let mut parts = path.split('#').skip(1);
    let hardware = parts.next().filter(|s| !s.is_empty())?;
    let instance = parts.next().filter(|s| !s.is_empty())?;
    Some((hardware.to_string(), instance.to_string()))
}

/// The desktop of the running session.
pub fn system_desktop() -> Arc<dyn Desktop> {
    #[cfg(windows)]
    {
        Arc::new(win32::Win32Desktop)
    }
    #[cfg(not(windows))]
    {
        Arc::new(unsupported::UnsupportedDesktop)
    }
}

/// Notification source backed by WinEvent hooks.
pub fn system_notifications() -> Box<dyn NotificationSource> {
    #[cfg(windows)]
    {
        Box::new(hooks::WinEventSource)
    }
    #[cfg(not(windows))]
    {
        Box::new(unsupported::UnsupportedNotifications)
    }
}

/// Opt the process into per-monitor DPI awareness so all rectangles are physical.
///
/// Returns false if the awareness could not be set (it may already be set).
pub fn set_dpi_awareness() -> bool {
    #[cfg(windows)]
    {
        win32::set_dpi_awareness()
    }
    #[cfg(not(windows))]
    {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[test]
    fn test_parse_device_interface() {
        let path = r"\\?\DISPLAY#DEL4321#5&1a2b3c&0&UID4352#{e6f07b5f-ee97-4a90-b076-33f57bf4eaa7}";
        assert_eq!(
            parse_device_interface(path),
            Some(("DEL4321".to_string(), "5&1a2b3c&0&UID4352".to_string()))
        );
        assert_eq!(parse_device_interface(r"\\.\DISPLAY1"), None);
    }

    #[test]
    fn test_show_state_for_app() {
        let mut app = ApplicationRecord {
            name: "A".into(),
            title: String::new(),
            executable_path: "a.exe".into(),
            package_identity: None,
            command_line_args: String::new(),
            is_elevated: false,
            can_launch_elevated: false,
            is_minimized: false,
            is_maximized: true,
            position: Rect::default(),
            monitor: 1,
        };
        assert_eq!(ShowState::for_app(&app), ShowState::Maximized);
        app.is_minimized = true;
        assert_eq!(ShowState::for_app(&app), ShowState::Minimized);
    }

    struct FlakyDesktop {
        failures: AtomicU32,
    }

    impl Desktop for FlakyDesktop {
        fn enumerate_monitors(&self) -> Result<Vec<Monitor>, PlatformError> {
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return Err(PlatformError::EnumerationFailed("no monitors yet".into()));
            }
            Ok(vec![Monitor::new(1, "DEL4321", "UID1", 96, true, Rect::new(0, 0, 1920, 1080))])
        }
        fn window_identity(&self, _: WindowHandle) -> Option<WindowIdentity> {
            None
        }
        fn enumerate_app_windows(&self) -> Result<Vec<WindowSnapshot>, PlatformError> {
            Ok(Vec::new())
        }
        fn move_resize(&self, _: WindowHandle, _: Rect, _: ShowState) -> Result<(), PlatformError> {
            Ok(())
        }
        fn set_workspace_marker(&self, _: WindowHandle) -> Result<(), PlatformError> {
            Ok(())
        }
        fn has_workspace_marker(&self, _: WindowHandle) -> bool {
            false
        }
    }

    #[test]
    fn test_identify_monitors_retries_through_errors() {
        let desktop = FlakyDesktop {
            failures: AtomicU32::new(3),
        };
        let policy = RetryPolicy {
            max_attempts: 10,
            interval: Duration::ZERO,
        };
        let monitors = identify_monitors(&desktop, &policy);
        assert_eq!(monitors.len(), 1);
        assert_eq!(monitors[0].ordinal, 1);
        assert_eq!(desktop.failures.load(Ordering::SeqCst), 0);
    }
}
