//! Process creation for launch records.

use std::io;
use std::path::Path;
use std::process::Command;
use thiserror::Error;
use tracing::debug;
use workspaces_core::ApplicationRecord;

/// Errors that can occur while starting an application.
#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("Executable not found: {0}")]
    NotFound(String),

    #[error("Access denied starting {0}")]
    AccessDenied(String),

    #[error("Failed to start {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("Shell refused to start {path}: {message}")]
    Shell { path: String, message: String },

    #[error("Cannot start {0} on this platform")]
    Unsupported(String),
}

/// Everything needed to start one application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnRequest {
    pub executable: String,
    pub args: Vec<String>,
    pub elevated: bool,
    /// Packaged apps are activated through the shell by identity.
    pub package_identity: Option<String>,
}

impl SpawnRequest {
    pub fn for_app(app: &ApplicationRecord) -> Self {
        Self {
            executable: app.executable_path.clone(),
            args: app.arguments(),
            elevated: app.launch_elevated(),
            package_identity: app.package_identity.clone().filter(|id| !id.is_empty()),
        }
    }
}

/// Starts processes; returns the id of the started process.
pub trait ProcessSpawner: Send + Sync {
    fn spawn(&self, request: &SpawnRequest) -> Result<u32, SpawnError>;
}

/// Spawner for the running session.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemSpawner;

impl ProcessSpawner for SystemSpawner {
    fn spawn(&self, request: &SpawnRequest) -> Result<u32, SpawnError> {
        if let Some(identity) = &request.package_identity {
            return spawn_packaged(identity);
        }
        if !Path::new(&request.executable).is_file() {
            return Err(SpawnError::NotFound(request.executable.clone()));
        }
        if request.elevated {
            return spawn_elevated(request);
        }

        let child = Command::new(&request.executable)
            .args(&request.args)
            .spawn()
            .map_err(|source| match source.kind() {
                io::ErrorKind::NotFound => SpawnError::NotFound(request.executable.clone()),
                io::ErrorKind::PermissionDenied => {
                    SpawnError::AccessDenied(request.executable.clone())
                }
                _ => SpawnError::Io {
                    path: request.executable.clone(),
                    source,
                },
            })?;
        debug!("Started {} as pid {}", request.executable, child.id());
        Ok(child.id())
    }
}

#[cfg(windows)]
fn spawn_packaged(identity: &str) -> Result<u32, SpawnError> {
    // The shell activates the package; the returned id is the shell helper's.
    let child = Command::new("explorer.exe")
        .arg(format!("shell:AppsFolder\\{identity}"))
        .spawn()
        .map_err(|source| SpawnError::Io {
            path: identity.to_string(),
            source,
        })?;
    tracing::info!("Activated packaged app {}", identity);
    Ok(child.id())
}

#[cfg(not(windows))]
fn spawn_packaged(identity: &str) -> Result<u32, SpawnError> {
    Err(SpawnError::Unsupported(identity.to_string()))
}

#[cfg(windows)]
fn spawn_elevated(request: &SpawnRequest) -> Result<u32, SpawnError> {
    use windows::core::{w, HSTRING, PCWSTR};
    use windows::Win32::Foundation::CloseHandle;
    use windows::Win32::System::Threading::GetProcessId;
    use windows::Win32::UI::Shell::{ShellExecuteExW, SEE_MASK_NOCLOSEPROCESS, SHELLEXECUTEINFOW};
    use windows::Win32::UI::WindowsAndMessaging::SW_SHOWNORMAL;

    let file = HSTRING::from(request.executable.as_str());
    let params = HSTRING::from(join_command_line(&request.args));
    let mut info = SHELLEXECUTEINFOW {
        cbSize: std::mem::size_of::<SHELLEXECUTEINFOW>() as u32,
        fMask: SEE_MASK_NOCLOSEPROCESS,
        lpVerb: w!("runas"),
        lpFile: PCWSTR(file.as_ptr()),
        lpParameters: PCWSTR(params.as_ptr()),
        nShow: SW_SHOWNORMAL.0,
        ..Default::default()
    };

    unsafe { ShellExecuteExW(&mut info) }.map_err(|e| SpawnError::Shell {
        path: request.executable.clone(),
        message: e.message(),
    })?;

    let pid = unsafe { GetProcessId(info.hProcess) };
    if !info.hProcess.is_invalid() {
        let _ = unsafe { CloseHandle(info.hProcess) };
    }
    tracing::info!("Started {} elevated as pid {}", request.executable, pid);
    Ok(pid)
}

#[cfg(not(windows))]
fn spawn_elevated(request: &SpawnRequest) -> Result<u32, SpawnError> {
    Err(SpawnError::Unsupported(request.executable.clone()))
}

/// Join arguments into a single command line, quoting where needed.
pub fn join_command_line(args: &[String]) -> String {
    args.iter()
        .map(|arg| {
            if arg.is_empty() || arg.contains(char::is_whitespace) || arg.contains('"') {
                format!("\"{}\"", arg.replace('"', "\\\""))
            } else {
                arg.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use workspaces_core::Rect;

    fn record(path: &str) -> ApplicationRecord {
        ApplicationRecord {
            name: "Test".into(),
            title: String::new(),
            executable_path: path.into(),
            package_identity: Some(String::new()),
            command_line_args: r#"--open "two words""#.into(),
            is_elevated: true,
            can_launch_elevated: false,
            is_minimized: false,
            is_maximized: false,
            position: Rect::default(),
            monitor: 1,
        }
    }

    #[test]
    fn test_request_from_record() {
        let request = SpawnRequest::for_app(&record(r"C:\Apps\test.exe"));
        assert_eq!(request.args, vec!["--open", "two words"]);
        assert!(!request.elevated);
        assert_eq!(request.package_identity, None);
    }

    #[test]
    fn test_missing_executable_is_not_found() {
        let request = SpawnRequest::for_app(&record("/definitely/not/here/app.exe"));
        assert!(matches!(
            SystemSpawner.spawn(&request),
            Err(SpawnError::NotFound(path)) if path == "/definitely/not/here/app.exe"
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_spawn_existing_executable() {
        let request = SpawnRequest {
            executable: "/bin/sh".into(),
            args: vec!["-c".into(), "exit 0".into()],
            elevated: false,
            package_identity: None,
        };
        let pid = SystemSpawner.spawn(&request).expect("spawn");
        assert!(pid > 0);
    }

    #[test]
    fn test_join_command_line_quotes() {
        let args = vec!["-a".to_string(), "two words".to_string(), String::new()];
        assert_eq!(join_command_line(&args), r#"-a "two words" """#);
    }
}
