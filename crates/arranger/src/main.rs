//! Workspaces Arranger
//!
//! Window-arranging process started by the launcher for one workspace.
//!
//! Responsibilities:
//! - Resolve the current monitor topology
//! - Optionally move windows that already exist
//! - Observe every new top-level window and move the ones that belong to the launch
//! - Report placements back to the launcher

mod arranger;
mod observer;

use anyhow::{Context, Result};
use arranger::WindowArranger;
use clap::Parser;
use observer::WindowCreationObserver;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use workspaces_core::config::Config;
use workspaces_core::{JsonWorkspaceStore, LaunchingState, WorkspaceStore};
use workspaces_ipc::{
    decode, ArrangerToLauncher, Channel, ChannelNames, ChannelOptions, LauncherToArranger,
};
use workspaces_platform_win32::{
    identify_monitors, set_dpi_awareness, system_desktop, system_notifications,
    NotificationSource, PlatformError,
};

#[derive(Parser, Debug)]
#[command(name = "workspaces-arranger")]
#[command(author, version, about = "Arrange the windows of a launching workspace", long_about = None)]
struct Args {
    /// Id of the workspace being launched
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

    // Set DPI awareness before any window operations
    if set_dpi_awareness() {
        debug!("DPI awareness set to Per-Monitor Aware V2");
    } else {
        warn!("Failed to set DPI awareness (may already be set)");
    }

    match run(config, workspace_id.trim()).await {
        Ok(()) => ExitCode::SUCCESS,
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

async fn run(config: Config, workspace_id: &str) -> Result<()> {
    info!("Workspaces arranger {} starting", env!("CARGO_PKG_VERSION"));

    let store = JsonWorkspaceStore::new(config.storage.workspaces_path());
    let workspace = store.load_workspace(workspace_id)?;

    let desktop = system_desktop();
    let monitors = {
        let desktop = desktop.clone();
        let policy = config.monitors.retry_policy();
        tokio::task::spawn_blocking(move || identify_monitors(desktop.as_ref(), &policy)).await?
    };
    info!("Identified {} monitor(s):", monitors.len());
    for m in &monitors {
        info!(
            "  Monitor {}: {} {}x{} at {},{} ({} dpi){}",
            m.ordinal,
            m.stable_id,
            m.rect_dpi_aware.width,
            m.rect_dpi_aware.height,
            m.rect_dpi_aware.x,
            m.rect_dpi_aware.y,
            m.dpi,
            if m.is_primary { " [PRIMARY]" } else { "" }
        );
    }

    // Outgoing messages keep their order; `None` ends the queue.
    let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel::<Option<ArrangerToLauncher>>();
    let reporter_tx = outgoing_tx.clone();
    let arranger = Arc::new(WindowArranger::new(
        desktop,
        workspace.clone(),
        monitors,
        Arc::new(move |message| {
            let _ = reporter_tx.send(Some(message));
        }),
    ));

    let finished = Arc::new(Notify::new());
    let names = ChannelNames::launcher_arranger(&workspace.id);
    let options = ChannelOptions {
        connect_timeout: config.launch.connect_timeout(),
    };
    let channel = {
        let arranger = arranger.clone();
        let finished = finished.clone();
        Channel::open_with_options(&names.peer, &names.launcher, options, move |line| {
            match decode::<LauncherToArranger>(&line) {
                Ok(message) => {
                    if arranger.apply_launcher_message(message) {
                        finished.notify_one();
                    }
                }
                Err(e) => warn!("Ignoring malformed launcher message: {}", e),
            }
        })
        .await
    };
    let channel = match channel {
        Ok(channel) => Some(Arc::new(channel)),
        Err(e) => {
            warn!("Launcher channel unavailable, placements will not be reported: {}", e);
            None
        }
    };
    let forward_task = tokio::spawn(forward_to_launcher(channel.clone(), outgoing_rx));

    let (observer, _notifications) = {
        let arranger = arranger.clone();
        let capacity = config.observer.queue_capacity;
        let move_existing = workspace.move_existing_windows;
        tokio::task::spawn_blocking(move || {
            let notifications = system_notifications();
            let observer =
                start_observing(&arranger, notifications.as_ref(), capacity, move_existing);
            (observer, notifications)
        })
        .await?
    };
    let observer = observer.context("Failed to observe window creation")?;
    // The launcher holds back every application until this arrives.
    let _ = outgoing_tx.send(Some(ArrangerToLauncher::Ready));

    tokio::select! {
        _ = finished.notified() => info!("Launcher finished the launch"),
        _ = tokio::time::sleep(config.launch.timeout()) => {
            warn!("No finish from the launcher within {:?}, stopping", config.launch.timeout());
        }
    }

    tokio::task::spawn_blocking(move || observer.unsubscribe()).await?;
    let _ = outgoing_tx.send(None);
    if let Err(e) = forward_task.await {
        warn!("Launcher forwarding task failed: {}", e);
    }
    if let Some(channel) = channel {
        match Arc::try_unwrap(channel) {
            Ok(channel) => channel.close().await,
            Err(_) => debug!("Launcher channel still shared, closing on drop"),
        }
    }

    let entries = arranger.tracker().get();
    let moved = entries
        .iter()
        .filter(|e| e.state == LaunchingState::LaunchedAndMoved)
        .count();
    info!(
        "Arranged {}/{} window(s){}",
        moved,
        entries.len(),
        if arranger.setup_differs() { " (monitor setup differs)" } else { "" }
    );
    Ok(())
}

/// Observe window creation, then place windows that appeared before observation began.
///
/// Subscribing first means a window is either already on the desktop when the
/// catch-up pass enumerates it, or it raises a notification. Claims make sure it is
/// placed once either way.
fn start_observing(
    arranger: &Arc<WindowArranger>,
    source: &dyn NotificationSource,
    capacity: usize,
    move_existing: bool,
) -> Result<WindowCreationObserver, PlatformError> {
    let observer = {
        let arranger = arranger.clone();
        WindowCreationObserver::subscribe(source, capacity, move |window| {
            arranger.handle_window_created(window);
        })?
    };
    if move_existing {
        arranger.arrange_existing();
    } else {
        arranger.arrange_launched();
    }
    Ok(observer)
}

/// Send placements to the launcher in the order they happened.
async fn forward_to_launcher(
    channel: Option<Arc<Channel>>,
    mut outgoing: mpsc::UnboundedReceiver<Option<ArrangerToLauncher>>,
) {
    while let Some(Some(message)) = outgoing.recv().await {
        if let Some(channel) = &channel {
            if let Err(e) = channel.send_message(&message).await {
                warn!("Failed to report to the launcher: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arranger::fakes::FakeDesktop;
    use observer::fakes::FakeSource;
    use std::sync::Mutex;
    use workspaces_core::{ApplicationRecord, LaunchingState, Rect, Workspace};
    use workspaces_platform_win32::{NotificationKind, ShowState};

    fn app(name: &str, path: &str, position: Rect) -> ApplicationRecord {
        ApplicationRecord {
            name: name.into(),
            title: String::new(),
            executable_path: path.into(),
            package_identity: None,
            command_line_args: String::new(),
            is_elevated: false,
            can_launch_elevated: false,
            is_minimized: false,
            is_maximized: false,
            position,
            monitor: 1,
        }
    }

    fn setup(move_existing: bool) -> (Arc<FakeDesktop>, Arc<WindowArranger>) {
        let desktop = Arc::new(FakeDesktop::default());
        let workspace = Workspace {
            id: "{5D2E9A10-0000-4000-8000-00000000000B}".into(),
            name: "Morning".into(),
            creation_time: 1_700_000_000,
            last_launched_time: None,
            move_existing_windows: move_existing,
            monitors: Vec::new(),
            apps: vec![
                app("Notes", r"C:\Apps\notes.exe", Rect::new(10, 10, 500, 400)),
                app("Mail", r"C:\Apps\mail.exe", Rect::new(600, 10, 700, 500)),
            ],
        };
        let sent = Arc::new(Mutex::new(Vec::new()));
        let arranger = Arc::new(WindowArranger::new(
            desktop.clone(),
            workspace,
            Vec::new(),
            Arc::new(move |message| sent.lock().unwrap().push(message)),
        ));
        (desktop, arranger)
    }

    #[test]
    fn test_windows_before_and_after_subscription_are_placed() {
        let (desktop, arranger) = setup(false);
        arranger.apply_launcher_message(LauncherToArranger::StateUpdate {
            app: 0,
            state: LaunchingState::Launched,
            process_id: Some(500),
        });
        // Shown before any notification could be observed.
        desktop.add_window(0x10, 500, r"C:\Apps\notes.exe");

        let source = FakeSource::default();
        let observer = start_observing(&arranger, &source, 16, false).unwrap();
        assert_eq!(desktop.moves(), vec![(0x10, Rect::new(10, 10, 500, 400), ShowState::Normal)]);

        desktop.add_window(0x20, 600, r"C:\Apps\mail.exe");
        source.emit(NotificationKind::Created, 0x20);
        // Already placed by the catch-up pass.
        source.emit(NotificationKind::Created, 0x10);
        observer.unsubscribe();

        assert_eq!(desktop.moves().len(), 2);
        assert!(arranger.tracker().all_launched_and_moved());
    }

    #[test]
    fn test_catch_up_leaves_foreign_instances_alone() {
        let (desktop, arranger) = setup(false);
        desktop.add_window(0x10, 42, r"C:\Apps\notes.exe");

        let source = FakeSource::default();
        let observer = start_observing(&arranger, &source, 16, false).unwrap();
        observer.unsubscribe();

        assert!(desktop.moves().is_empty());
        assert_eq!(arranger.tracker().entry(0).unwrap().state, LaunchingState::Waiting);
    }

    #[test]
    fn test_move_existing_takes_any_matching_window() {
        let (desktop, arranger) = setup(true);
        desktop.add_window(0x10, 42, r"C:\Apps\notes.exe");

        let source = FakeSource::default();
        let observer = start_observing(&arranger, &source, 16, true).unwrap();
        observer.unsubscribe();

        assert_eq!(desktop.moves().len(), 1);
        assert_eq!(
            arranger.tracker().entry(0).unwrap().state,
            LaunchingState::LaunchedAndMoved
        );
    }

    #[test]
    fn test_failed_subscription_is_reported() {
        let (_desktop, arranger) = setup(false);
        let source = FakeSource {
            fail_on: Some(NotificationKind::Shown),
            ..Default::default()
        };
        assert!(start_observing(&arranger, &source, 16, false).is_err());
    }
}
