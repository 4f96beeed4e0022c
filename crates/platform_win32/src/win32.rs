//! Win32 implementation of [`Desktop`].

use crate::{
    parse_device_interface, Desktop, PlatformError, ShowState, WindowIdentity, WindowSnapshot,
};
use std::ffi::c_void;
use std::mem::size_of;
use tracing::{debug, trace};
use windows::core::{w, PCWSTR, PWSTR};
use windows::Win32::Foundation::{
    CloseHandle, BOOL, ERROR_SUCCESS, HANDLE, HWND, LPARAM, RECT,
};
use windows::Win32::Graphics::Gdi::{
    EnumDisplayDevicesW, EnumDisplayMonitors, GetMonitorInfoW, DISPLAY_DEVICEW, HDC, HMONITOR,
    MONITORINFOEXW,
};
use windows::Win32::Security::{GetTokenInformation, TokenElevation, TOKEN_ELEVATION, TOKEN_QUERY};
use windows::Win32::Storage::Packaging::Appx::GetApplicationUserModelId;
use windows::Win32::System::Threading::{
    OpenProcess, OpenProcessToken, QueryFullProcessImageNameW, PROCESS_NAME_WIN32,
    PROCESS_QUERY_LIMITED_INFORMATION,
};
use windows::Win32::UI::HiDpi::{
    GetDpiForMonitor, SetProcessDpiAwarenessContext, DPI_AWARENESS_CONTEXT_PER_MONITOR_AWARE_V2,
    MDT_EFFECTIVE_DPI,
};
use windows::Win32::UI::WindowsAndMessaging::{
    EnumWindows, GetAncestor, GetPropW, GetWindow, GetWindowLongW, GetWindowPlacement,
    GetWindowTextLengthW, GetWindowTextW, GetWindowThreadProcessId, IsIconic, IsWindow,
    IsWindowVisible, IsZoomed, SetPropW, SetWindowPos, ShowWindow, GA_ROOT, GWL_EXSTYLE,
    GWL_STYLE, GW_OWNER, MONITORINFOF_PRIMARY, SWP_NOACTIVATE, SWP_NOZORDER, SW_MAXIMIZE,
    SW_MINIMIZE, SW_RESTORE, WINDOWPLACEMENT, WS_CHILD, WS_EX_TOOLWINDOW,
};
use workspaces_core::monitor::Monitor;
use workspaces_core::{Rect, WindowHandle};

/// Window property stamped on every window a workspace launch placed.
const WORKSPACE_MARKER: PCWSTR = w!("Workspaces_LaunchedWindow");

/// Request the device interface path instead of the adapter name.
const EDD_GET_DEVICE_INTERFACE_NAME: u32 = 0x1;

const MAX_PATH_CHARS: usize = 1024;

pub struct Win32Desktop;

fn hwnd(window: WindowHandle) -> HWND {
    HWND(window as usize as *mut c_void)
}

fn handle_of(hwnd: HWND) -> WindowHandle {
    hwnd.0 as usize as u64
}

fn wide_to_string(buffer: &[u16]) -> String {
    let len = buffer.iter().position(|&c| c == 0).unwrap_or(buffer.len());
    String::from_utf16_lossy(&buffer[..len])
}

fn to_rect(r: &RECT) -> Rect {
    Rect::new(r.left, r.top, r.right - r.left, r.bottom - r.top)
}

unsafe extern "system" fn collect_monitor(
    monitor: HMONITOR,
    _hdc: HDC,
    _clip: *mut RECT,
    data: LPARAM,
) -> BOOL {
    let handles = &mut *(data.0 as *mut Vec<HMONITOR>);
    handles.push(monitor);
    BOOL::from(true)
}

unsafe extern "system" fn collect_window(window: HWND, data: LPARAM) -> BOOL {
    let handles = &mut *(data.0 as *mut Vec<HWND>);
    handles.push(window);
    BOOL::from(true)
}

fn describe_monitor(monitor: HMONITOR) -> Option<Monitor> {
    let mut info = MONITORINFOEXW::default();
    info.monitorInfo.cbSize = size_of::<MONITORINFOEXW>() as u32;
    if !unsafe { GetMonitorInfoW(monitor, &mut info.monitorInfo) }.as_bool() {
        debug!("GetMonitorInfoW failed for {:?}", monitor);
        return None;
    }

    let (mut dpi_x, mut dpi_y) = (0u32, 0u32);
    let dpi = match unsafe { GetDpiForMonitor(monitor, MDT_EFFECTIVE_DPI, &mut dpi_x, &mut dpi_y) } {
        Ok(()) => dpi_x,
        Err(_) => workspaces_core::monitor::BASE_DPI,
    };

    let device_name = wide_to_string(&info.szDevice);
    let mut device = DISPLAY_DEVICEW {
        cb: size_of::<DISPLAY_DEVICEW>() as u32,
        ..Default::default()
    };
    let found = unsafe {
        EnumDisplayDevicesW(
            PCWSTR(info.szDevice.as_ptr()),
            0,
            &mut device,
            EDD_GET_DEVICE_INTERFACE_NAME,
        )
    }
    .as_bool();
    let (stable_id, instance_id) = if found {
        parse_device_interface(&wide_to_string(&device.DeviceID))
            .unwrap_or_else(|| (device_name.clone(), device_name.clone()))
    } else {
        (device_name.clone(), device_name.clone())
    };

    let is_primary = info.monitorInfo.dwFlags & MONITORINFOF_PRIMARY != 0;
    Some(Monitor::new(
        monitor.0 as usize as u64,
        stable_id,
        instance_id,
        dpi,
        is_primary,
        to_rect(&info.monitorInfo.rcMonitor),
    ))
}

/// Owner details for a process id: identity plus whether it runs elevated.
fn process_details(process_id: u32) -> (WindowIdentity, bool) {
    let mut identity = WindowIdentity {
        process_id,
        executable_path: None,
        app_user_model_id: None,
    };
    let process = match unsafe { OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, false, process_id) } {
        Ok(process) => process,
        Err(e) => {
            trace!("OpenProcess({}) failed: {}", process_id, e);
            return (identity, true);
        }
    };
    identity.executable_path = image_path(process);
    identity.app_user_model_id = app_user_model_id(process);
    let elevated = is_elevated(process);
    let _ = unsafe { CloseHandle(process) };
    (identity, elevated)
}

fn image_path(process: HANDLE) -> Option<String> {
    let mut buffer = [0u16; MAX_PATH_CHARS];
    let mut len = buffer.len() as u32;
    unsafe {
        QueryFullProcessImageNameW(
            process,
            PROCESS_NAME_WIN32,
            PWSTR(buffer.as_mut_ptr()),
            &mut len,
        )
    }
    .ok()?;
    Some(String::from_utf16_lossy(&buffer[..len as usize]))
}

fn app_user_model_id(process: HANDLE) -> Option<String> {
    let mut buffer = [0u16; MAX_PATH_CHARS];
    let mut len = buffer.len() as u32;
    let status =
        unsafe { GetApplicationUserModelId(process, &mut len, PWSTR(buffer.as_mut_ptr())) };
    if status != ERROR_SUCCESS {
        return None;
    }
    let id = wide_to_string(&buffer);
    (!id.is_empty()).then_some(id)
}

fn is_elevated(process: HANDLE) -> bool {
    let mut token = HANDLE::default();
    if unsafe { OpenProcessToken(process, TOKEN_QUERY, &mut token) }.is_err() {
        // A token we may not query belongs to a higher integrity level.
        return true;
    }
    let mut elevation = TOKEN_ELEVATION::default();
    let mut returned = 0u32;
    let queried = unsafe {
        GetTokenInformation(
            token,
            TokenElevation,
            Some(&mut elevation as *mut TOKEN_ELEVATION as *mut c_void),
            size_of::<TOKEN_ELEVATION>() as u32,
            &mut returned,
        )
    };
    let _ = unsafe { CloseHandle(token) };
    queried.is_ok() && elevation.TokenIsElevated != 0
}

/// Top-level, unowned, non-tool window.
fn is_app_window(window: HWND) -> bool {
    unsafe {
        if !IsWindow(Some(window)).as_bool() {
            return false;
        }
        if GetAncestor(window, GA_ROOT) != window {
            return false;
        }
        let style = GetWindowLongW(window, GWL_STYLE) as u32;
        let ex_style = GetWindowLongW(window, GWL_EXSTYLE) as u32;
        if style & WS_CHILD.0 != 0 || ex_style & WS_EX_TOOLWINDOW.0 != 0 {
            return false;
        }
        GetWindow(window, GW_OWNER).map_or(true, |owner| owner.is_invalid())
    }
}

fn window_title(window: HWND) -> String {
    let len = unsafe { GetWindowTextLengthW(window) };
    if len <= 0 {
        return String::new();
    }
    let mut buffer = vec![0u16; len as usize + 1];
    let copied = unsafe { GetWindowTextW(window, &mut buffer) };
    String::from_utf16_lossy(&buffer[..copied.max(0) as usize])
}

impl Desktop for Win32Desktop {
    fn enumerate_monitors(&self) -> Result<Vec<Monitor>, PlatformError> {
        let mut handles: Vec<HMONITOR> = Vec::new();
        let ok = unsafe {
            EnumDisplayMonitors(
                None,
                None,
                Some(collect_monitor),
                LPARAM(&mut handles as *mut Vec<HMONITOR> as isize),
            )
        };
        if !ok.as_bool() {
            return Err(PlatformError::EnumerationFailed(
                "EnumDisplayMonitors failed".to_string(),
            ));
        }
        Ok(handles.into_iter().filter_map(describe_monitor).collect())
    }

    fn window_identity(&self, window: WindowHandle) -> Option<WindowIdentity> {
        let hwnd = hwnd(window);
        if !is_app_window(hwnd) {
            return None;
        }
        let mut process_id = 0u32;
        unsafe { GetWindowThreadProcessId(hwnd, Some(&mut process_id)) };
        if process_id == 0 {
            return None;
        }
        Some(process_details(process_id).0)
    }

    fn enumerate_app_windows(&self) -> Result<Vec<WindowSnapshot>, PlatformError> {
        let mut handles: Vec<HWND> = Vec::new();
        unsafe {
            EnumWindows(
                Some(collect_window),
                LPARAM(&mut handles as *mut Vec<HWND> as isize),
            )
        }
        .map_err(|e| PlatformError::EnumerationFailed(e.message()))?;

        let mut windows = Vec::new();
        for window in handles {
            if !unsafe { IsWindowVisible(window) }.as_bool() || !is_app_window(window) {
                continue;
            }
            let title = window_title(window);
            if title.is_empty() {
                continue;
            }
            let mut process_id = 0u32;
            unsafe { GetWindowThreadProcessId(window, Some(&mut process_id)) };
            if process_id == 0 {
                continue;
            }
            let (identity, elevated) = process_details(process_id);

            let mut placement = WINDOWPLACEMENT {
                length: size_of::<WINDOWPLACEMENT>() as u32,
                ..Default::default()
            };
            if unsafe { GetWindowPlacement(window, &mut placement) }.is_err() {
                continue;
            }
            windows.push(WindowSnapshot {
                window: handle_of(window),
                title,
                identity,
                rect: to_rect(&placement.rcNormalPosition),
                minimized: unsafe { IsIconic(window) }.as_bool(),
                maximized: unsafe { IsZoomed(window) }.as_bool(),
                elevated,
            });
        }
        Ok(windows)
    }

    fn move_resize(
        &self,
        window: WindowHandle,
        rect: Rect,
        show: ShowState,
    ) -> Result<(), PlatformError> {
        let hwnd = hwnd(window);
        unsafe {
            if !IsWindow(Some(hwnd)).as_bool() {
                return Err(PlatformError::WindowNotFound(window));
            }
            if IsIconic(hwnd).as_bool() || IsZoomed(hwnd).as_bool() {
                let _ = ShowWindow(hwnd, SW_RESTORE);
            }
            SetWindowPos(
                hwnd,
                None,
                rect.x,
                rect.y,
                rect.width,
                rect.height,
                SWP_NOZORDER | SWP_NOACTIVATE,
            )
            .map_err(|e| PlatformError::SetPositionFailed(format!("{window}: {}", e.message())))?;
            match show {
                ShowState::Maximized => {
                    let _ = ShowWindow(hwnd, SW_MAXIMIZE);
                }
                ShowState::Minimized => {
                    let _ = ShowWindow(hwnd, SW_MINIMIZE);
                }
                ShowState::Normal => {}
            }
        }
        Ok(())
    }

    fn set_workspace_marker(&self, window: WindowHandle) -> Result<(), PlatformError> {
        unsafe {
            SetPropW(
                hwnd(window),
                WORKSPACE_MARKER,
                Some(HANDLE(1usize as *mut c_void)),
            )
        }
        .map_err(|e| PlatformError::MarkerFailed(format!("{window}: {}", e.message())))
    }

    fn has_workspace_marker(&self, window: WindowHandle) -> bool {
        !unsafe { GetPropW(hwnd(window), WORKSPACE_MARKER) }.is_invalid()
    }
}

pub fn set_dpi_awareness() -> bool {
    unsafe { SetProcessDpiAwarenessContext(DPI_AWARENESS_CONTEXT_PER_MONITOR_AWARE_V2) }.is_ok()
}
