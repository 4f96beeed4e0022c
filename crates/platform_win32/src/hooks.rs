//! WinEvent hooks delivering window notifications.
//!
//! Out-of-context hooks are delivered through the message queue of the thread
//! that installed them, so every registration owns a dedicated thread that
//! installs its hook, pumps messages, and unhooks on `WM_QUIT`.

use crate::{NotificationKind, NotificationSink, NotificationSource, PlatformError, Registration};
use std::cell::RefCell;
use std::sync::mpsc;
use std::thread::JoinHandle;
use tracing::{debug, warn};
use windows::Win32::Foundation::{HWND, LPARAM, WPARAM};
use windows::Win32::System::Threading::GetCurrentThreadId;
use windows::Win32::UI::Accessibility::{SetWinEventHook, UnhookWinEvent, HWINEVENTHOOK};
use windows::Win32::UI::WindowsAndMessaging::{
    DispatchMessageW, GetMessageW, PostThreadMessageW, TranslateMessage, EVENT_OBJECT_CREATE,
    EVENT_OBJECT_SHOW, EVENT_OBJECT_UNCLOAKED, MSG, WINEVENT_OUTOFCONTEXT,
    WINEVENT_SKIPOWNPROCESS, WM_QUIT,
};

const OBJID_WINDOW: i32 = 0;
const CHILDID_SELF: i32 = 0;

thread_local! {
    static SINK: RefCell<Option<NotificationSink>> = const { RefCell::new(None) };
}

fn event_for(kind: NotificationKind) -> u32 {
    match kind {
        NotificationKind::Created => EVENT_OBJECT_CREATE,
        NotificationKind::Shown => EVENT_OBJECT_SHOW,
        NotificationKind::Unhidden => EVENT_OBJECT_UNCLOAKED,
    }
}

unsafe extern "system" fn win_event_proc(
    _hook: HWINEVENTHOOK,
    _event: u32,
    hwnd: HWND,
    id_object: i32,
    id_child: i32,
    _event_thread: u32,
    _event_time: u32,
) {
    if id_object != OBJID_WINDOW || id_child != CHILDID_SELF || hwnd.is_invalid() {
        return;
    }
    let window = hwnd.0 as usize as u64;
    SINK.with(|sink| {
        if let Some(sink) = sink.borrow().as_ref() {
            sink(window);
        }
    });
}

pub struct WinEventSource;

impl NotificationSource for WinEventSource {
    fn register(
        &self,
        kind: NotificationKind,
        sink: NotificationSink,
    ) -> Result<Box<dyn Registration>, PlatformError> {
        let (ready_tx, ready_rx) = mpsc::channel::<Result<u32, String>>();
        let event = event_for(kind);

        let thread = std::thread::Builder::new()
            .name(format!("winevent-{kind:?}").to_lowercase())
            .spawn(move || {
                SINK.with(|slot| *slot.borrow_mut() = Some(sink));
                let hook = unsafe {
                    SetWinEventHook(
                        event,
                        event,
                        None,
                        Some(win_event_proc),
                        0,
                        0,
                        WINEVENT_OUTOFCONTEXT | WINEVENT_SKIPOWNPROCESS,
                    )
                };
                if hook.is_invalid() {
                    let _ = ready_tx.send(Err(format!("SetWinEventHook({event:#x}) failed")));
                    return Ok(());
                }
                let _ = ready_tx.send(Ok(unsafe { GetCurrentThreadId() }));

                let mut msg = MSG::default();
                while unsafe { GetMessageW(&mut msg, None, 0, 0) }.0 > 0 {
                    unsafe {
                        let _ = TranslateMessage(&msg);
                        DispatchMessageW(&msg);
                    }
                }

                SINK.with(|slot| *slot.borrow_mut() = None);
                if unsafe { UnhookWinEvent(hook) }.as_bool() {
                    Ok(())
                } else {
                    Err(format!("UnhookWinEvent({event:#x}) failed"))
                }
            })
            .map_err(|e| PlatformError::HookInstallFailed(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(thread_id)) => {
                debug!("Installed {:?} hook on thread {}", kind, thread_id);
                Ok(Box::new(WinEventRegistration {
                    kind,
                    thread_id,
                    thread: Some(thread),
                }))
            }
            Ok(Err(message)) => {
                let _ = thread.join();
                Err(PlatformError::HookInstallFailed(message))
            }
            Err(_) => {
                let _ = thread.join();
                Err(PlatformError::HookInstallFailed(format!(
                    "{kind:?} hook thread exited before reporting"
                )))
            }
        }
    }
}

struct WinEventRegistration {
    kind: NotificationKind,
    thread_id: u32,
    thread: Option<JoinHandle<Result<(), String>>>,
}

impl Registration for WinEventRegistration {
    fn release(mut self: Box<Self>) -> Result<(), PlatformError> {
        let Some(thread) = self.thread.take() else {
            return Ok(());
        };
        unsafe { PostThreadMessageW(self.thread_id, WM_QUIT, WPARAM(0), LPARAM(0)) }.map_err(
            |e| {
                warn!("Failed to stop {:?} hook thread: {}", self.kind, e);
                PlatformError::HookReleaseFailed(e.message())
            },
        )?;
        match thread.join() {
            Ok(Ok(())) => {
                debug!("Released {:?} hook", self.kind);
                Ok(())
            }
            Ok(Err(message)) => Err(PlatformError::HookReleaseFailed(message)),
            Err(_) => Err(PlatformError::HookReleaseFailed(format!(
                "{:?} hook thread panicked",
                self.kind
            ))),
        }
    }
}
