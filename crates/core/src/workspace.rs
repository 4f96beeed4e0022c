//! Persisted workspace definitions.

use crate::monitor::Monitor;
use crate::Rect;
use serde::{Deserialize, Serialize};

/// The stored intent to run one application at one position on one monitor.
///
/// Identifies intent, not a live process. Never mutated after loading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationRecord {
    pub name: String,
    #[serde(default)]
    pub title: String,
    pub executable_path: String,
    /// Application user model id for packaged apps.
    #[serde(default)]
    pub package_identity: Option<String>,
    #[serde(default)]
    pub command_line_args: String,
    #[serde(default)]
    pub is_elevated: bool,
    #[serde(default)]
    pub can_launch_elevated: bool,
    #[serde(default)]
    pub is_minimized: bool,
    #[serde(default)]
    pub is_maximized: bool,
    pub position: Rect,
    /// Ordinal of the monitor the window was on at snapshot time.
    pub monitor: u32,
}

impl ApplicationRecord {
    /// Whether the launch should request elevation.
    pub fn launch_elevated(&self) -> bool {
        self.is_elevated && self.can_launch_elevated
    }

    /// Split the stored command line into arguments.
    ///
    /// Double quotes group words; the quotes themselves are dropped.
    pub fn arguments(&self) -> Vec<String> {
        let mut args = Vec::new();
        let mut current = String::new();
        let mut quoted = false;
        let mut pending = false;
        for c in self.command_line_args.chars() {
            match c {
                '"' => {
                    quoted = !quoted;
                    pending = true;
                }
                c if c.is_whitespace() && !quoted => {
                    if pending {
                        args.push(std::mem::take(&mut current));
                        pending = false;
                    }
                }
                c => {
                    current.push(c);
                    pending = true;
                }
            }
        }
        if pending {
            args.push(current);
        }
        args
    }

    /// File name of the executable, used in log lines.
    pub fn executable_name(&self) -> &str {
        self.executable_path
            .rsplit(|c| c == '\\' || c == '/')
            .next()
            .unwrap_or(&self.executable_path)
    }
}

/// A named snapshot of applications and the monitor layout they were arranged on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workspace {
    pub id: String,
    pub name: String,
    /// Seconds since the Unix epoch.
    pub creation_time: i64,
    #[serde(default)]
    pub last_launched_time: Option<i64>,
    #[serde(default)]
    pub move_existing_windows: bool,
    #[serde(default)]
    pub monitors: Vec<Monitor>,
    #[serde(default)]
    pub apps: Vec<ApplicationRecord>,
}

impl Workspace {
    /// Recorded monitor for an ordinal, if the snapshot captured one.
    pub fn recorded_monitor(&self, ordinal: u32) -> Option<&Monitor> {
        crate::monitor::find_by_ordinal(&self.monitors, ordinal)
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn app(name: &str, path: &str) -> ApplicationRecord {
        ApplicationRecord {
            name: name.to_string(),
            title: format!("{name} window"),
            executable_path: path.to_string(),
            package_identity: None,
            command_line_args: String::new(),
            is_elevated: false,
            can_launch_elevated: false,
            is_minimized: false,
            is_maximized: false,
            position: Rect::new(100, 100, 800, 600),
            monitor: 1,
        }
    }

    pub fn workspace(apps: Vec<ApplicationRecord>) -> Workspace {
        Workspace {
            id: "{5E0C3D4B-1A2B-4C3D-9E8F-0123456789AB}".to_string(),
            name: "Daily".to_string(),
            creation_time: 1_700_000_000,
            last_launched_time: None,
            move_existing_windows: false,
            monitors: Vec::new(),
            apps,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn test_arguments_split_on_whitespace_and_quotes() {
        let mut record = app("Code", r"C:\Code\Code.exe");
        record.command_line_args = r#"--new-window "C:\My Projects\app"  -v"#.to_string();
        assert_eq!(
            record.arguments(),
            vec!["--new-window", r"C:\My Projects\app", "-v"]
        );
    }

    #[test]
    fn test_arguments_keep_empty_quoted_argument() {
        let mut record = app("Tool", "tool.exe");
        record.command_line_args = r#"--name """#.to_string();
        assert_eq!(record.arguments(), vec!["--name", ""]);
    }

    #[test]
    fn test_launch_elevated_requires_both_flags() {
        let mut record = app("Admin", "admin.exe");
        record.is_elevated = true;
        assert!(!record.launch_elevated());
        record.can_launch_elevated = true;
        assert!(record.launch_elevated());
    }

    #[test]
    fn test_workspace_parses_with_missing_optional_fields() {
        let json = r#"{
            "id": "abc",
            "name": "Minimal",
            "creation_time": 1,
            "apps": [{
                "name": "Notepad",
                "executable_path": "C:\\Windows\\notepad.exe",
                "position": {"x": 0, "y": 0, "width": 640, "height": 480},
                "monitor": 1
            }]
        }"#;
        let ws: Workspace = serde_json::from_str(json).expect("parse");
        assert_eq!(ws.apps.len(), 1);
        assert!(ws.last_launched_time.is_none());
        assert!(!ws.move_existing_windows);
        assert_eq!(ws.apps[0].executable_name(), "notepad.exe");
    }
}
