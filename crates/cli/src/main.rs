//! Workspaces Snapshot
//!
//! Captures the visible application windows and the monitor layout into a
//! workspace file that the launcher can replay.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use workspaces_core::config::Config;
use workspaces_core::monitor::monitor_for_rect;
use workspaces_core::store::WorkspacesFile;
use workspaces_core::{unix_now, ApplicationRecord, Monitor, Workspace};
use workspaces_platform_win32::{
    identify_monitors, set_dpi_awareness, system_desktop, WindowSnapshot,
};

#[derive(Parser, Debug)]
#[command(name = "workspaces-snapshot")]
#[command(author, version, about = "Capture running applications into a workspace", long_about = None)]
struct Cli {
    /// File to write the captured workspace to
    output: Option<PathBuf>,

    /// Name of the captured workspace
    #[arg(short, long, default_value = "Captured workspace")]
    name: String,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = Config::load().unwrap_or_else(|e| {
        eprintln!("Failed to load configuration: {e:#}. Using defaults.");
        Config::default()
    });
    let warnings = config.validate();
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.behavior.log_level));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to initialize logging: {e}");
    }
    for w in &warnings {
        warn!("Config: {} - {}", w.field, w.message);
    }

    let Some(output) = cli.output.filter(|p| !p.as_os_str().is_empty()) else {
        error!("No output file given");
        return ExitCode::FAILURE;
    };
    if !config.behavior.enabled {
        error!("Workspaces are disabled by policy");
        return ExitCode::FAILURE;
    }

    if !set_dpi_awareness() {
        debug!("DPI awareness was not changed (may already be set)");
    }

    match snapshot(&config, &cli.name, &output) {
        Ok(workspace) => {
            info!(
                "Captured {} application(s) on {} monitor(s) as '{}' ({}) in {}",
                workspace.apps.len(),
                workspace.monitors.len(),
                workspace.name,
                workspace.id,
                output.display()
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn snapshot(config: &Config, name: &str, output: &Path) -> Result<Workspace> {
    let desktop = system_desktop();
    let monitors = identify_monitors(desktop.as_ref(), &config.monitors.retry_policy());
    let windows = desktop
        .enumerate_app_windows()
        .context("Failed to enumerate application windows")?;
    debug!("Found {} application window(s)", windows.len());

    let workspace = capture(name, new_workspace_id(), unix_now(), monitors, &windows);
    WorkspacesFile {
        workspaces: vec![workspace.clone()],
    }
    .write(output)?;
    Ok(workspace)
}

/// Build a workspace from the current monitors and windows.
///
/// Windows whose owner's image path is unknown cannot be relaunched and are skipped.
fn capture(
    name: &str,
    id: String,
    now: i64,
    monitors: Vec<Monitor>,
    windows: &[WindowSnapshot],
) -> Workspace {
    let apps = windows
        .iter()
        .filter_map(|window| {
            let Some(path) = window.identity.executable_path.clone() else {
                debug!("Skipping '{}': owner image path unknown", window.title);
                return None;
            };
            let monitor = monitor_for_rect(&monitors, &window.rect)
                .map(|m| m.ordinal)
                .unwrap_or(1);
            let mut app = ApplicationRecord {
                name: String::new(),
                title: window.title.clone(),
                executable_path: path,
                package_identity: window.identity.app_user_model_id.clone(),
                command_line_args: String::new(),
                is_elevated: window.elevated,
                can_launch_elevated: window.elevated,
                is_minimized: window.minimized,
                is_maximized: window.maximized,
                position: window.rect,
                monitor,
            };
            let exe = app.executable_name();
            app.name = exe
                .strip_suffix(".exe")
                .or_else(|| exe.strip_suffix(".EXE"))
                .unwrap_or(exe)
                .to_string();
            Some(app)
        })
        .collect();

    Workspace {
        id,
        name: name.to_string(),
        creation_time: now,
        last_launched_time: None,
        move_existing_windows: false,
        monitors,
        apps,
    }
}

/// Fresh opaque id, unique per capture.
fn new_workspace_id() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    format!("{{{:016x}-{:08x}}}", nanos as u64, std::process::id())
}
