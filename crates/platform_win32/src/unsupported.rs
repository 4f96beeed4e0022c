//! Stand-ins for targets without a Windows desktop.

use crate::{
    Desktop, NotificationKind, NotificationSink, NotificationSource, PlatformError, Registration,
    ShowState, WindowIdentity, WindowSnapshot,
};
use workspaces_core::monitor::Monitor;
use workspaces_core::{Rect, WindowHandle};

pub struct UnsupportedDesktop;

impl Desktop for UnsupportedDesktop {
    fn enumerate_monitors(&self) -> Result<Vec<Monitor>, PlatformError> {
        Err(PlatformError::Unsupported("monitor enumeration"))
    }

    fn window_identity(&self, _window: WindowHandle) -> Option<WindowIdentity> {
        None
    }

    fn enumerate_app_windows(&self) -> Result<Vec<WindowSnapshot>, PlatformError> {
        Err(PlatformError::Unsupported("window enumeration"))
    }

    fn move_resize(
        &self,
        _window: WindowHandle,
        _rect: Rect,
        _show: ShowState,
    ) -> Result<(), PlatformError> {
        Err(PlatformError::Unsupported("window placement"))
    }

    fn set_workspace_marker(&self, _window: WindowHandle) -> Result<(), PlatformError> {
        Err(PlatformError::Unsupported("window properties"))
    }

    fn has_workspace_marker(&self, _window: WindowHandle) -> bool {
        false
    }
}

pub struct UnsupportedNotifications;

impl NotificationSource for UnsupportedNotifications {
    fn register(
        &self,
        _kind: NotificationKind,
        _sink: NotificationSink,
    ) -> Result<Box<dyn Registration>, PlatformError> {
        Err(PlatformError::Unsupported("window event hooks"))
    }
}
