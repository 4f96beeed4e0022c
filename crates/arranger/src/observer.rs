//! Desktop-wide window creation notifications, decoupled from the OS dispatch thread.
//!
//! Every notification kind is registered, but only window creation reaches the
//! callback. Notifications are pushed onto a bounded queue and the callback runs on
//! a dedicated worker, so slow window moves never stall the hook thread.

use std::sync::mpsc::{self, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, trace, warn};
use workspaces_core::WindowHandle;
use workspaces_platform_win32::{
    NotificationKind, NotificationSink, NotificationSource, PlatformError, Registration,
};

enum QueueItem {
    Notification(NotificationKind, WindowHandle),
    Stop,
}

/// Live subscription. Dropping it releases every registration and stops the worker.
pub struct WindowCreationObserver {
    registrations: Vec<Box<dyn Registration>>,
    queue: SyncSender<QueueItem>,
    worker: Option<JoinHandle<()>>,
}

impl WindowCreationObserver {
    /// Register for all notification kinds and call `on_created` for each new window.
    pub fn subscribe<F>(
        source: &dyn NotificationSource,
        capacity: usize,
        on_created: F,
    ) -> Result<Self, PlatformError>
    where
        F: Fn(WindowHandle) + Send + 'static,
    {
        let (queue, items) = mpsc::sync_channel::<QueueItem>(capacity.max(1));

        let worker = std::thread::Builder::new()
            .name("window-observer".to_string())
            .spawn(move || {
                for item in items {
                    match item {
                        QueueItem::Notification(NotificationKind::Created, window) => {
                            on_created(window)
                        }
                        QueueItem::Notification(kind, window) => {
                            trace!("{:?} notification for {} ignored", kind, window);
                        }
                        QueueItem::Stop => break,
                    }
                }
                debug!("Window observer worker stopped");
            })
            .map_err(|e| PlatformError::HookInstallFailed(e.to_string()))?;

        let mut observer = Self {
            registrations: Vec::new(),
            queue: queue.clone(),
            worker: Some(worker),
        };

        for kind in NotificationKind::ALL {
            let queue = queue.clone();
            let sink: NotificationSink = Arc::new(move |window| {
                match queue.try_send(QueueItem::Notification(kind, window)) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        warn!("Window notification queue full, dropping {:?} for {}", kind, window)
                    }
                    Err(TrySendError::Disconnected(_)) => {}
                }
            });
            // Registrations made so far are released when `observer` drops.
            let registration = source.register(kind, sink)?;
            observer.registrations.push(registration);
        }

        debug!(
            "Observing window notifications ({} registrations)",
            observer.registrations.len()
        );
        Ok(observer)
    }

    /// Release every registration and stop the worker once queued notifications are handled.
    pub fn unsubscribe(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        for registration in self.registrations.drain(..) {
            if let Err(e) = registration.release() {
                warn!("Failed to release window notification: {}", e);
            }
        }
        let Some(worker) = self.worker.take() else {
            return;
        };
        // Blocks while the queue is full; the worker keeps draining it.
        if self.queue.send(QueueItem::Stop).is_err() {
            debug!("Window observer worker already gone");
        }
        if worker.join().is_err() {
            warn!("Window observer worker panicked");
        }
    }
}

impl Drop for WindowCreationObserver {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
pub(crate) mod fakes {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    /// Notification source driven by hand.
    #[derive(Default)]
    pub struct FakeSource {
        pub(crate) sinks: Mutex<Vec<(NotificationKind, NotificationSink, Arc<AtomicBool>)>>,
        pub fail_on: Option<NotificationKind>,
        pub fail_release: bool,
    }

    impl FakeSource {
        pub fn emit(&self, kind: NotificationKind, window: WindowHandle) {
            let sinks: Vec<_> = self
                .sinks
                .lock()
                .unwrap()
                .iter()
                .filter(|(k, _, live)| *k == kind && live.load(Ordering::SeqCst))
                .map(|(_, sink, _)| sink.clone())
                .collect();
            for sink in sinks {
                sink(window);
            }
        }

        pub fn live(&self) -> usize {
            self.sinks
                .lock()
                .unwrap()
                .iter()
                .filter(|(_, _, live)| live.load(Ordering::SeqCst))
                .count()
        }
    }

    struct FakeRegistration {
        live: Arc<AtomicBool>,
        fail: bool,
    }

    impl Registration for FakeRegistration {
        fn release(self: Box<Self>) -> Result<(), PlatformError> {
            self.live.store(false, Ordering::SeqCst);
            if self.fail {
                return Err(PlatformError::HookReleaseFailed("fake".into()));
            }
            Ok(())
        }
    }

    impl NotificationSource for FakeSource {
        fn register(
            &self,
            kind: NotificationKind,
            sink: NotificationSink,
        ) -> Result<Box<dyn Registration>, PlatformError> {
            if self.fail_on == Some(kind) {
                return Err(PlatformError::HookInstallFailed(format!("{kind:?}")));
            }
            let live = Arc::new(AtomicBool::new(true));
            self.sinks.lock().unwrap().push((kind, sink, live.clone()));
            Ok(Box::new(FakeRegistration {
                live,
                fail: self.fail_release,
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fakes::FakeSource;
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    fn collecting() -> (Arc<Mutex<Vec<WindowHandle>>>, impl Fn(WindowHandle) + Send + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (seen, move |window| sink.lock().unwrap().push(window))
    }

    #[test]
    fn test_only_created_drives_callback() {
        let source = FakeSource::default();
        let (seen, callback) = collecting();
        let observer = WindowCreationObserver::subscribe(&source, 16, callback).unwrap();
        assert_eq!(source.live(), 3);

        source.emit(NotificationKind::Shown, 1);
        source.emit(NotificationKind::Created, 2);
        source.emit(NotificationKind::Unhidden, 3);
        source.emit(NotificationKind::Created, 4);

        // Unsubscribing drains what is already queued.
        observer.unsubscribe();
        assert_eq!(*seen.lock().unwrap(), vec![2, 4]);
        assert_eq!(source.live(), 0);
    }

    #[test]
    fn test_no_callbacks_after_release() {
        let source = FakeSource::default();
        let (seen, callback) = collecting();
        let observer = WindowCreationObserver::subscribe(&source, 16, callback).unwrap();
        drop(observer);

        source.emit(NotificationKind::Created, 9);
        std::thread::sleep(Duration::from_millis(20));
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_failed_registration_releases_earlier_ones() {
        let source = FakeSource {
            fail_on: Some(NotificationKind::Unhidden),
            ..Default::default()
        };
        let result = WindowCreationObserver::subscribe(&source, 16, |_| {});
        assert!(matches!(result, Err(PlatformError::HookInstallFailed(_))));
        assert_eq!(source.live(), 0);
    }

    #[test]
    fn test_release_failures_are_not_fatal() {
        let source = FakeSource {
            fail_release: true,
            ..Default::default()
        };
        let (seen, callback) = collecting();
        let observer = WindowCreationObserver::subscribe(&source, 16, callback).unwrap();
        source.emit(NotificationKind::Created, 5);
        observer.unsubscribe();
        assert_eq!(*seen.lock().unwrap(), vec![5]);
    }

    #[test]
    fn test_full_queue_drops_instead_of_blocking() {
        let source = FakeSource::default();
        let gate = Arc::new(Mutex::new(()));
        let held = gate.lock().unwrap();
        let worker_gate = gate.clone();
        let count = Arc::new(Mutex::new(0usize));
        let counter = count.clone();
        let observer = WindowCreationObserver::subscribe(&source, 2, move |_| {
            let _wait = worker_gate.lock().unwrap();
            *counter.lock().unwrap() += 1;
        })
        .unwrap();

        // The worker blocks on the first item; the queue holds two more.
        for window in 0..10 {
            source.emit(NotificationKind::Created, window);
        }
        drop(held);
        observer.unsubscribe();

        let handled = *count.lock().unwrap();
        assert!(handled >= 1 && handled <= 3, "handled {handled}");
    }
}
