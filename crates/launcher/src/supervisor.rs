//! Ownership of the helper processes started by the launcher.

use anyhow::{Context, Result};
use std::path::Path;
use std::process::{Child, Command};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Owns a child process and terminates it if it outlives its grace period.
///
/// Dropping the supervisor performs [`ProcessSupervisor::shutdown`].
pub struct ProcessSupervisor {
    name: &'static str,
    child: Option<Child>,
    grace: Duration,
}

impl ProcessSupervisor {
    /// Start `executable` with `args`.
    pub fn launch(
        name: &'static str,
        executable: &Path,
        args: &[&str],
        grace: Duration,
    ) -> Result<Self> {
        let child = Command::new(executable)
            .args(args)
            .spawn()
            .with_context(|| format!("Failed to start {} ({})", name, executable.display()))?;
        info!("Started {} as pid {}", name, child.id());
        Ok(Self {
            name,
            child: Some(child),
            grace,
        })
    }

    /// Id of the supervised process, if it has not been shut down.
    pub fn process_id(&self) -> Option<u32> {
        self.child.as_ref().map(Child::id)
    }

    /// Give the process its grace period to exit, then kill it.
    ///
    /// Blocks for at most the grace period plus the time to reap a killed process.
    pub fn shutdown(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        let pid = child.id();
        let deadline = Instant::now() + self.grace;

        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    debug!("{} (pid {}) exited with {}", self.name, pid, status);
                    return;
                }
                Ok(None) if Instant::now() < deadline => std::thread::sleep(EXIT_POLL_INTERVAL),
                Ok(None) => break,
                Err(e) => {
                    warn!("Failed to query {} (pid {}): {}", self.name, pid, e);
                    break;
                }
            }
        }

        warn!(
            "{} (pid {}) still running after {:?}, terminating",
            self.name, pid, self.grace
        );
        match child.kill() {
            Ok(()) => {
                let _ = child.wait();
            }
            Err(e) => error!("Failed to terminate {} (pid {}): {}", self.name, pid, e),
        }
    }
}

impl Drop for ProcessSupervisor {
    fn drop(&mut self) {
        self.shutdown();
    }
}
