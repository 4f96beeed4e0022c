//! Workspaces IPC Protocol
//!
//! Shared types for the launcher, the window arranger and the UI progress process.
//!
//! This crate handles:
//! - Message types for the launcher↔arranger and launcher↔UI links
//! - Endpoint names derived from the workspace id
//! - The duplex [`Channel`] (named pipes on Windows, Unix sockets elsewhere)
//!
//! Messages are line-delimited JSON: one object per line, tagged by `"type"`.

pub mod channel;

use serde::{Deserialize, Serialize};
use workspaces_core::{AppId, LaunchReport, LaunchStatusEntry, LaunchingState, WindowHandle};

pub use channel::{Channel, ChannelError, ChannelOptions};

/// Upper bound for one serialized message, newline excluded.
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Prefix shared by every endpoint name.
pub const ENDPOINT_PREFIX: &str = "workspaces";

/// Messages sent from the launcher to the window arranger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LauncherToArranger {
    /// An application changed state on the launcher side.
    StateUpdate {
        /// Index of the application in the workspace.
        app: AppId,
        state: LaunchingState,
        /// Process started for the application, if any.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        process_id: Option<u32>,
    },
    /// No more work: the launch is being finalized.
    Finish,
}

/// Messages sent from the window arranger to the launcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ArrangerToLauncher {
    /// Existing windows have been handled; the launcher may start spawning.
    Ready,
    /// An application changed state on the arranger side.
    StateUpdate {
        app: AppId,
        state: LaunchingState,
        /// Window that was claimed for the application.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        window: Option<WindowHandle>,
    },
    /// A recorded monitor is missing or changed.
    SetupDiffers,
}

/// Messages sent from the launcher to the UI progress process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LauncherToUi {
    /// Full snapshot of the status map.
    ///
    /// `revision` grows with every change; a snapshot older than one already shown
    /// can be discarded.
    Status {
        revision: u64,
        entries: Vec<LaunchStatusEntry>,
    },
    /// The launch finished.
    Finished { report: LaunchReport },
}

/// Messages sent from the UI progress process to the launcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UiToLauncher {
    /// The user canceled the remaining launches.
    Cancel,
}

/// The two ends of one link, as `(launcher side, peer side)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelNames {
    pub launcher: String,
    pub peer: String,
}

impl ChannelNames {
    /// Names for the launcher↔UI link of a workspace.
    pub fn launcher_ui(workspace_id: &str) -> Self {
        Self {
            launcher: endpoint_name("launcher_ui", workspace_id),
            peer: endpoint_name("ui", workspace_id),
        }
    }

    /// Names for the launcher↔arranger link of a workspace.
    pub fn launcher_arranger(workspace_id: &str) -> Self {
        Self {
            launcher: endpoint_name("launcher_arranger", workspace_id),
            peer: endpoint_name("arranger", workspace_id),
        }
    }
}

/// `workspaces_<role>_<id>`, with every character outside `[A-Za-z0-9_-]` dropped from the id.
pub fn endpoint_name(role: &str, workspace_id: &str) -> String {
    let id: String = workspace_id
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect();
    format!("{ENDPOINT_PREFIX}_{role}_{id}")
}

/// Platform address of an endpoint name.
pub fn endpoint_address(name: &str) -> String {
    #[cfg(windows)]
    {
        format!(r"\\.\pipe\{name}")
    }
    #[cfg(not(windows))]
    {
        std::env::temp_dir()
            .join(format!("{name}.sock"))
            .to_string_lossy()
            .into_owned()
    }
}

/// Serialize a message to a single line (no trailing newline).
pub fn encode<T: Serialize>(message: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string(message)
}

/// Parse one line received from a channel.
pub fn decode<'a, T: Deserialize<'a>>(line: &'a str) -> Result<T, serde_json::Error> {
    serde_json::from_str(line.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_update_wire_format() {
        let msg = LauncherToArranger::StateUpdate {
            app: 2,
            state: LaunchingState::Launched,
            process_id: Some(4242),
        };
        let json = encode(&msg).unwrap();
        assert_eq!(
            json,
            r#"{"type":"state_update","app":2,"state":"launched","process_id":4242}"#
        );
        assert_eq!(decode::<LauncherToArranger>(&json).unwrap(), msg);
    }

    #[test]
    fn test_optional_fields_are_omitted() {
        let msg = ArrangerToLauncher::StateUpdate {
            app: 0,
            state: LaunchingState::Failed,
            window: None,
        };
        let json = encode(&msg).unwrap();
        assert!(!json.contains("window"));

        let parsed: ArrangerToLauncher =
            decode(r#"{"type":"state_update","app":0,"state":"failed"}"#).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn test_unit_messages() {
        assert_eq!(encode(&LauncherToArranger::Finish).unwrap(), r#"{"type":"finish"}"#);
        assert_eq!(encode(&ArrangerToLauncher::Ready).unwrap(), r#"{"type":"ready"}"#);
        assert_eq!(
            encode(&ArrangerToLauncher::SetupDiffers).unwrap(),
            r#"{"type":"setup_differs"}"#
        );
        assert_eq!(decode::<UiToLauncher>("{\"type\":\"cancel\"}\n").unwrap(), UiToLauncher::Cancel);
    }

    #[test]
    fn test_invalid_messages_are_rejected() {
        assert!(decode::<UiToLauncher>("not json").is_err());
        assert!(decode::<LauncherToArranger>(r#"{"type":"explode"}"#).is_err());
        assert!(decode::<ArrangerToLauncher>(r#"{"type":"state_update","app":1}"#).is_err());
    }

    #[test]
    fn test_endpoint_names() {
        let id = "{5E0C3D4B-1111-2222-3333-444455556666}";
        let ui = ChannelNames::launcher_ui(id);
        assert_eq!(
            ui.launcher,
            "workspaces_launcher_ui_5E0C3D4B-1111-2222-3333-444455556666"
        );
        assert_eq!(ui.peer, "workspaces_ui_5E0C3D4B-1111-2222-3333-444455556666");

        let arranger = ChannelNames::launcher_arranger(id);
        assert_ne!(arranger.launcher, ui.launcher);
        assert_ne!(arranger.peer, ui.peer);
        assert!(endpoint_name("ui", r"..\..\evil").ends_with("_ui_evil"));
    }

    #[cfg(windows)]
    #[test]
    fn test_endpoint_address_is_pipe() {
        assert_eq!(endpoint_address("workspaces_ui_x"), r"\\.\pipe\workspaces_ui_x");
    }

    #[cfg(not(windows))]
    #[test]
    fn test_endpoint_address_is_socket() {
        let address = endpoint_address("workspaces_ui_x");
        assert!(address.ends_with("workspaces_ui_x.sock"));
    }
}
