//! Platform window operations: enumeration, active window, restore and foreground.
use async_trait::async_trait;

use crate::errors::{PinpointError, PinpointResult};
use crate::window::candidate::{WindowCandidate, WindowHandle};

#[async_trait]
pub trait WindowPlatform: Send + Sync {
    /// Every visible top-level window, unfiltered.
    async fn list_windows(&self) -> PinpointResult<Vec<WindowCandidate>>;

    async fn active_window_title(&self) -> PinpointResult<Option<String>>;

    async fn is_minimized(&self, handle: WindowHandle) -> PinpointResult<bool>;

    async fn restore(&self, handle: WindowHandle) -> PinpointResult<()>;

    async fn bring_to_foreground(&self, handle: WindowHandle) -> PinpointResult<()>;
}

/// The real desktop: `xcap` for enumeration, `sysinfo` for owning process names and
/// Win32 for focus changes.
pub struct DesktopPlatform;

fn join_error(e: tokio::task::JoinError) -> PinpointError {
    PinpointError::Window(format!("join: {e}"))
}

#[async_trait]
impl WindowPlatform for DesktopPlatform {
    async fn list_windows(&self) -> PinpointResult<Vec<WindowCandidate>> {
        tokio::task::spawn_blocking(list_windows_sync).await.map_err(join_error)?
    }

    async fn active_window_title(&self) -> PinpointResult<Option<String>> {
        tokio::task::spawn_blocking(|| {
            let windows = xcap::Window::all()
                .map_err(|e| PinpointError::Window(format!("Failed to get windows: {e}")))?;
            Ok(windows
                .iter()
                .find(|w| w.is_focused().unwrap_or(false))
                .and_then(|w| w.title().ok()))
        })
        .await
        .map_err(join_error)?
    }

    async fn is_minimized(&self, handle: WindowHandle) -> PinpointResult<bool> {
        tokio::task::spawn_blocking(move || native::is_minimized(handle))
            .await
            .map_err(join_error)?
    }

    async fn restore(&self, handle: WindowHandle) -> PinpointResult<()> {
        tokio::task::spawn_blocking(move || native::restore(handle))
            .await
            .map_err(join_error)?
    }

    async fn bring_to_foreground(&self, handle: WindowHandle) -> PinpointResult<()> {
        tokio::task::spawn_blocking(move || native::bring_to_foreground(handle))
            .await
            .map_err(join_error)?
    }
}

fn list_windows_sync() -> PinpointResult<Vec<WindowCandidate>> {
    let windows = xcap::Window::all()
        .map_err(|e| PinpointError::Window(format!("Failed to get windows: {e}")))?;

    // Process lookups are best-effort; an unknown pid leaves the name empty.
    let mut system = sysinfo::System::new();
    system.refresh_processes(sysinfo::ProcessesToUpdate::All, true);

    let mut out = Vec::with_capacity(windows.len());
    for window in windows {
        let Ok(id) = window.id() else { continue };
        let process_name = window
            .pid()
            .ok()
            .and_then(|pid| system.process(sysinfo::Pid::from_u32(pid)))
            .map(|p| p.name().to_string_lossy().to_string())
            .unwrap_or_default();
        out.push(WindowCandidate {
            title: window.title().unwrap_or_default(),
            handle: WindowHandle(id as u64),
            x: window.x().unwrap_or(0),
            y: window.y().unwrap_or(0),
            width: window.width().unwrap_or(0) as i32,
            height: window.height().unwrap_or(0) as i32,
            process_name,
            minimized: window.is_minimized().unwrap_or(false),
        });
    }
    tracing::debug!(count = out.len(), "platform windows listed");
    Ok(out)
}

#[cfg(target_os = "windows")]
mod native {
    use windows::Win32::Foundation::HWND;
    use windows::Win32::UI::WindowsAndMessaging::{
        IsIconic, SetForegroundWindow, ShowWindow, SW_RESTORE,
    };

    use crate::errors::{PinpointError, PinpointResult};
    use crate::window::candidate::WindowHandle;

    fn hwnd(handle: WindowHandle) -> HWND {
        HWND(handle.0 as usize as *mut core::ffi::c_void)
    }

    pub fn is_minimized(handle: WindowHandle) -> PinpointResult<bool> {
        Ok(unsafe { IsIconic(hwnd(handle)) }.as_bool())
    }

    pub fn restore(handle: WindowHandle) -> PinpointResult<()> {
        // ShowWindow reports the previous visibility, not success.
        let _ = unsafe { ShowWindow(hwnd(handle), SW_RESTORE) };
        Ok(())
    }

    pub fn bring_to_foreground(handle: WindowHandle) -> PinpointResult<()> {
        if unsafe { SetForegroundWindow(hwnd(handle)) }.as_bool() {
            Ok(())
        } else {
            Err(PinpointError::Window(format!(
                "SetForegroundWindow refused for handle {}",
                handle.0
            )))
        }
    }
}

#[cfg(not(target_os = "windows"))]
mod native {
    use crate::errors::{PinpointError, PinpointResult};
    use crate::window::candidate::WindowHandle;

    pub fn is_minimized(handle: WindowHandle) -> PinpointResult<bool> {
        let windows = xcap::Window::all()
            .map_err(|e| PinpointError::Window(format!("Failed to get windows: {e}")))?;
        Ok(windows
            .iter()
            .find(|w| w.id().ok().map(u64::from) == Some(handle.0))
            .and_then(|w| w.is_minimized().ok())
            .unwrap_or(false))
    }

    pub fn restore(_handle: WindowHandle) -> PinpointResult<()> {
        Err(PinpointError::Unsupported("window restore".into()))
    }

    pub fn bring_to_foreground(_handle: WindowHandle) -> PinpointResult<()> {
        Err(PinpointError::Unsupported("window focus".into()))
    }
}
