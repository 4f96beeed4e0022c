//! Workspaces Launcher
//!
//! Re-launches the applications of a saved workspace.
//!
//! Responsibilities:
//! - Load the workspace and start the window arranger and progress UI
//! - Start every application and track it through the launch state machine
//! - Route state changes between the arranger and the UI
//! - Finalize the launch once everything is placed or the deadline passes

mod session;
mod supervisor;

use anyhow::Result;
use clap::Parser;
use session::{LaunchSession, StatusSnapshot};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use supervisor::ProcessSupervisor;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, trace, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use workspaces_core::config::Config;
use workspaces_core::{unix_now, JsonWorkspaceStore, LaunchReport, WorkspaceStore};
use workspaces_ipc::{
    decode, ArrangerToLauncher, Channel, ChannelNames, ChannelOptions, LauncherToArranger,
    LauncherToUi, UiToLauncher,
};
use workspaces_platform_win32::SystemSpawner;

const UI_EXECUTABLE: &str = "workspaces-launcher-ui";
const ARRANGER_EXECUTABLE: &str = "workspaces-arranger";

#[derive(Parser, Debug)]
#[command(name = "workspaces-launcher")]
#[command(author, version, about = "Launch a saved workspace", long_about = None)]
struct Args {
    /// Id of the workspace to launch
    workspace_id: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Load configuration first (needed for log level)
    let mut config = Config::load().unwrap_or_else(|e| {
        eprintln!("Failed to load configuration: {e:#}. Using defaults.");
        Config::default()
    });
    let warnings = config.validate();
    if let Err(e) = init_logging(&config.behavior.log_level) {
        eprintln!("Failed to initialize logging: {e}");
    }
    for w in &warnings {
        warn!("Config: {} - {}", w.field, w.message);
    }

    let Some(workspace_id) = args.workspace_id.filter(|id| !id.trim().is_empty()) else {
        error!("No workspace id given");
        return ExitCode::FAILURE;
    };
    if !config.behavior.enabled {
        error!("Launching workspaces is disabled by policy");
        return ExitCode::FAILURE;
    }

    match run(config, workspace_id.trim()).await {
        Ok(report) => {
            if !report.is_success() {
                warn!(
                    "Not every application was placed: failed {:?}, canceled {:?}",
                    report.failed, report.canceled
                );
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(level: &str) -> Result<()> {
    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

/// Helper executable: configured path, or a sibling of this executable.
fn helper_path(configured: Option<&PathBuf>, name: &str) -> PathBuf {
    if let Some(path) = configured {
        return path.clone();
    }
    let file_name = format!("{name}{}", std::env::consts::EXE_SUFFIX);
    std::env::current_exe()
        .map(|exe| exe.with_file_name(&file_name))
        .unwrap_or_else(|_| PathBuf::from(file_name))
}

async fn run(config: Config, workspace_id: &str) -> Result<LaunchReport> {
    info!("Workspaces launcher {} starting", env!("CARGO_PKG_VERSION"));

    let store = JsonWorkspaceStore::new(config.storage.workspaces_path());
    let mut workspace = store.load_workspace(workspace_id)?;
    info!(
        "Launching workspace '{}' ({}) with {} application(s)",
        workspace.name,
        workspace.id,
        workspace.apps.len()
    );

    let (session, snapshots) = LaunchSession::new(workspace.clone());
    let session = Arc::new(session);
    let options = ChannelOptions {
        connect_timeout: config.launch.connect_timeout(),
    };
    let (forward_tx, forward_rx) = mpsc::unbounded_channel::<LauncherToArranger>();

    let ui_names = ChannelNames::launcher_ui(&workspace.id);
    let ui_channel = {
        let session = session.clone();
        let forward = forward_tx.clone();
        Channel::open_with_options(&ui_names.launcher, &ui_names.peer, options, move |line| {
            match decode::<UiToLauncher>(&line) {
                Ok(message) => {
                    for update in session.apply_ui_message(message) {
                        let _ = forward.send(update);
                    }
                }
                Err(e) => warn!("Ignoring malformed UI message: {}", e),
            }
        })
        .await
    };
    let ui_channel = match ui_channel {
        Ok(channel) => Some(Arc::new(channel)),
        Err(e) => {
            warn!("Progress UI channel unavailable, continuing without it: {}", e);
            None
        }
    };

    let arranger_names = ChannelNames::launcher_arranger(&workspace.id);
    let arranger_channel = {
        let session = session.clone();
        Channel::open_with_options(
            &arranger_names.launcher,
            &arranger_names.peer,
            options,
            move |line| match decode::<ArrangerToLauncher>(&line) {
                Ok(message) => session.apply_arranger_message(message),
                Err(e) => warn!("Ignoring malformed arranger message: {}", e),
            },
        )
        .await
    };
    let arranger_channel = match arranger_channel {
        Ok(channel) => Some(Arc::new(channel)),
        Err(e) => {
            warn!("Arranger channel unavailable, windows will not be moved: {}", e);
            None
        }
    };

    let ui_process = if ui_channel.is_some() {
        let path = helper_path(config.launch.ui_executable.as_ref(), UI_EXECUTABLE);
        ProcessSupervisor::launch("progress UI", &path, &[workspace.id.as_str()], config.launch.ui_grace())
            .map_err(|e| warn!("{:#}", e))
            .ok()
    } else {
        None
    };
    // Nobody will ever connect to a link whose helper did not start.
    let ui_channel = if ui_process.is_some() {
        ui_channel
    } else {
        close_channel(ui_channel).await;
        None
    };
    let arranger_process = if arranger_channel.is_some() {
        let path = helper_path(config.launch.arranger_executable.as_ref(), ARRANGER_EXECUTABLE);
        ProcessSupervisor::launch(
            "window arranger",
            &path,
            &[workspace.id.as_str()],
            config.launch.arranger_grace(),
        )
        .map_err(|e| warn!("{:#}", e))
        .ok()
    } else {
        None
    };
    let arranger_channel = if arranger_process.is_some() {
        arranger_channel
    } else {
        close_channel(arranger_channel).await;
        None
    };

    let arranger_task = tokio::spawn(forward_to_arranger(arranger_channel.clone(), forward_rx));
    let (report_tx, report_rx) = oneshot::channel();
    let ui_task = tokio::spawn(forward_to_ui(ui_channel.clone(), snapshots, report_rx));

    // Windows created before the arranger observes the desktop would never be
    // matched, so applications start only once it reports ready.
    if arranger_process.is_some() {
        if workspace.move_existing_windows {
            info!("Waiting for existing windows to be arranged");
        } else {
            debug!("Waiting for the arranger to observe new windows");
        }
        if !session.wait_until_ready(config.launch.ready_timeout()).await {
            warn!(
                "Arranger did not report ready within {:?}, starting applications anyway",
                config.launch.ready_timeout()
            );
        }
    }

    let started = {
        let session = session.clone();
        let forward = forward_tx.clone();
        tokio::task::spawn_blocking(move || session.launch_pending(&SystemSpawner, &forward))
            .await?
    };
    info!("Started {} application(s)", started);

    if !session.wait_for_completion(config.launch.timeout()).await {
        warn!(
            "Launch deadline of {:?} passed before every window was placed",
            config.launch.timeout()
        );
    }
    let report = session.finalize();

    let _ = forward_tx.send(LauncherToArranger::Finish);
    drop(forward_tx);
    if let Err(e) = arranger_task.await {
        warn!("Arranger forwarding task failed: {}", e);
    }
    let _ = report_tx.send(report.clone());
    if let Err(e) = ui_task.await {
        warn!("UI forwarding task failed: {}", e);
    }

    workspace.last_launched_time = Some(unix_now());
    if let Err(e) = store.save_workspace(&workspace) {
        warn!("Failed to record launch time for '{}': {}", workspace.name, e);
    }

    // Supervisors block while their grace periods run.
    let shutdown = tokio::task::spawn_blocking(move || {
        drop(arranger_process);
        drop(ui_process);
    });
    if let Err(e) = shutdown.await {
        warn!("Failed to shut down helper processes: {}", e);
    }
    close_channel(arranger_channel).await;
    close_channel(ui_channel).await;

    Ok(report)
}

/// Send queued updates to the arranger in order, stopping after `Finish`.
async fn forward_to_arranger(
    channel: Option<Arc<Channel>>,
    mut updates: mpsc::UnboundedReceiver<LauncherToArranger>,
) {
    while let Some(update) = updates.recv().await {
        let finish = update == LauncherToArranger::Finish;
        if let Some(channel) = &channel {
            if let Err(e) = channel.send_message(&update).await {
                debug!("Dropped update for the arranger: {}", e);
            }
        }
        if finish {
            break;
        }
    }
}

/// Mirror status snapshots to the UI, then send the final report.
///
/// Snapshots can be queued out of order by concurrent updates; one older than the
/// last one sent is dropped.
async fn forward_to_ui(
    channel: Option<Arc<Channel>>,
    mut snapshots: mpsc::UnboundedReceiver<StatusSnapshot>,
    mut report: oneshot::Receiver<LaunchReport>,
) {
    let Some(channel) = channel else {
        return;
    };
    let mut shown = 0;
    let mut send_status = |(revision, entries): StatusSnapshot| {
        let fresh = revision > shown;
        if fresh {
            shown = revision;
        } else {
            trace!("Skipping stale status revision {}", revision);
        }
        fresh.then_some(LauncherToUi::Status { revision, entries })
    };

    loop {
        tokio::select! {
            biased;
            Some(snapshot) = snapshots.recv() => {
                if let Some(message) = send_status(snapshot) {
                    send_to_ui(&channel, &message).await;
                }
            }
            result = &mut report => {
                while let Ok(snapshot) = snapshots.try_recv() {
                    if let Some(message) = send_status(snapshot) {
                        send_to_ui(&channel, &message).await;
                    }
                }
                if let Ok(report) = result {
                    send_to_ui(&channel, &LauncherToUi::Finished { report }).await;
                }
                break;
            }
        }
    }
}

async fn send_to_ui(channel: &Channel, message: &LauncherToUi) {
    if let Err(e) = channel.send_message(message).await {
        debug!("Dropped update for the progress UI: {}", e);
    }
}

async fn close_channel(channel: Option<Arc<Channel>>) {
    if let Some(channel) = channel {
        match Arc::try_unwrap(channel) {
            Ok(channel) => channel.close().await,
            Err(_) => debug!("Channel still shared, closing on drop"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use workspaces_core::{ApplicationRecord, LaunchStatusEntry, LaunchingStatus, Rect, Workspace};

    fn entries() -> Vec<LaunchStatusEntry> {
        let workspace = Workspace {
            id: "ui".into(),
            name: "Forwarding".into(),
            creation_time: 0,
            last_launched_time: None,
            move_existing_windows: false,
            monitors: Vec::new(),
            apps: vec![ApplicationRecord {
                name: "Editor".into(),
                title: String::new(),
                executable_path: r"C:\Apps\editor.exe".into(),
                package_identity: None,
                command_line_args: String::new(),
                is_elevated: false,
                can_launch_elevated: false,
                is_minimized: false,
                is_maximized: false,
                position: Rect::new(0, 0, 640, 480),
                monitor: 1,
            }],
        };
        LaunchingStatus::new(&workspace).get()
    }

    #[tokio::test]
    async fn test_stale_snapshots_do_not_reach_the_ui() {
        let names = ChannelNames::launcher_ui(&format!("fwd-{}", std::process::id()));
        let (to_test, mut received) = mpsc::unbounded_channel();
        let ui = Channel::open(&names.peer, &names.launcher, move |line| {
            let _ = to_test.send(decode::<LauncherToUi>(&line).unwrap());
        })
        .await
        .unwrap();
        let launcher = Arc::new(Channel::open(&names.launcher, &names.peer, |_| {}).await.unwrap());

        let (snapshot_tx, snapshot_rx) = mpsc::unbounded_channel();
        for revision in [2, 1, 3, 3] {
            snapshot_tx.send((revision, entries())).unwrap();
        }
        let (report_tx, report_rx) = oneshot::channel();
        let report = LaunchingStatus::new(&Workspace {
            id: "ui".into(),
            name: String::new(),
            creation_time: 0,
            last_launched_time: None,
            move_existing_windows: false,
            monitors: Vec::new(),
            apps: Vec::new(),
        })
        .report("ui", false);
        report_tx.send(report.clone()).unwrap();

        forward_to_ui(Some(launcher.clone()), snapshot_rx, report_rx).await;

        let mut revisions = Vec::new();
        loop {
            let message = tokio::time::timeout(Duration::from_secs(5), received.recv())
                .await
                .unwrap()
                .unwrap();
            match message {
                LauncherToUi::Status { revision, .. } => revisions.push(revision),
                LauncherToUi::Finished { report: finished } => {
                    assert_eq!(finished, report);
                    break;
                }
            }
        }
        assert_eq!(revisions, vec![2, 3]);

        close_channel(Some(launcher)).await;
        ui.close().await;
    }
}
