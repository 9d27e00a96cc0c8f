//! Windows UI Automation (UIA) adapter.
//!
//! Exposes the foreground window as a [`UiNode`] tree. Two backends are registered in
//! priority order: `uia` walks the control view, `uia-raw` the raw view (slower, but it
//! also reaches controls that hide themselves from the control view).
//! On non-Windows platforms no backend is registered.
use std::sync::Arc;

use crate::accessibility::node::AccessibilityBackend;

// ── Windows implementation ──────────────────────────────────────────────────

#[cfg(target_os = "windows")]
mod win {
    use std::fmt;

    use crate::accessibility::node::{AccessibilityBackend, Describable, NodeHandle, UiNode};
    use crate::errors::{PinpointError, PinpointResult};
    use windows::Win32::System::Com::{
        CoCreateInstance, CoInitializeEx, CoUninitialize, CLSCTX_ALL, COINIT_MULTITHREADED,
    };
    use windows::Win32::UI::Accessibility::{
        CUIAutomation, IUIAutomation, IUIAutomationElement, IUIAutomationTreeWalker,
    };
    use windows::Win32::UI::WindowsAndMessaging::{GetDlgCtrlID, GetForegroundWindow};

    /// RAII guard for COM initialization on the current thread.
    struct ComGuard;
    impl ComGuard {
        fn new() -> Result<Self, PinpointError> {
            unsafe {
                CoInitializeEx(None, COINIT_MULTITHREADED)
                    .ok()
                    .map_err(|e| PinpointError::Accessibility(format!("CoInitializeEx: {e}")))?;
            }
            Ok(Self)
        }
    }
    impl Drop for ComGuard {
        fn drop(&mut self) {
            unsafe { CoUninitialize() };
        }
    }

    thread_local! {
        // Lives until the thread exits so element handles outlive a single call.
        static COM: Result<ComGuard, String> = ComGuard::new().map_err(|e| e.to_string());
    }

    fn ensure_com() -> PinpointResult<()> {
        COM.with(|c| c.as_ref().map(|_| ()).map_err(|e| PinpointError::Accessibility(e.clone())))
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum WalkerView {
        Control,
        Raw,
    }

    pub struct UiaNode {
        element: IUIAutomationElement,
        walker: IUIAutomationTreeWalker,
    }

    // SAFETY: COM is initialised as MTA on every thread that touches these objects, and
    // UIA element and walker interfaces are free-threaded in the MTA.
    unsafe impl Send for UiaNode {}
    unsafe impl Sync for UiaNode {}

    impl fmt::Debug for UiaNode {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("UiaNode")
                .field("title", &self.title())
                .field("control_type", &self.control_type())
                .finish()
        }
    }

    impl Describable for UiaNode {
        fn title(&self) -> String {
            unsafe { self.element.CurrentName().map(|s| s.to_string()).unwrap_or_default() }
        }

        fn automation_id(&self) -> String {
            unsafe {
                self.element
                    .CurrentAutomationId()
                    .map(|s| s.to_string())
                    .unwrap_or_default()
            }
        }

        fn control_type(&self) -> String {
            let id = unsafe { self.element.CurrentControlType().map(|t| t.0).unwrap_or(0) };
            control_type_name(id).to_string()
        }

        fn class_name(&self) -> String {
            unsafe { self.element.CurrentClassName().map(|s| s.to_string()).unwrap_or_default() }
        }

        fn friendly_class(&self) -> String {
            unsafe {
                self.element
                    .CurrentLocalizedControlType()
                    .map(|s| s.to_string())
                    .unwrap_or_default()
            }
        }

        fn control_id(&self) -> Option<i64> {
            let hwnd = unsafe { self.element.CurrentNativeWindowHandle().ok()? };
            if hwnd.0.is_null() {
                return None;
            }
            match unsafe { GetDlgCtrlID(hwnd) } {
                0 => None,
                id => Some(id as i64),
            }
        }
    }

    impl UiNode for UiaNode {
        fn children(&self) -> PinpointResult<Vec<NodeHandle>> {
            let mut out: Vec<NodeHandle> = Vec::new();
            let first = unsafe { self.walker.GetFirstChildElement(&self.element) };
            let Ok(mut child) = first else {
                return Ok(out);
            };
            loop {
                let next = unsafe { self.walker.GetNextSiblingElement(&child) };
                out.push(std::sync::Arc::new(UiaNode {
                    element: child,
                    walker: self.walker.clone(),
                }));
                match next {
                    Ok(n) => child = n,
                    Err(_) => break,
                }
            }
            Ok(out)
        }

        // Every walk calls this first, so a blocking-pool thread joins the MTA here.
        fn probe(&self) -> PinpointResult<()> {
            ensure_com()?;
            unsafe { self.element.CurrentProcessId() }
                .map(|_| ())
                .map_err(|e| PinpointError::StaleHandle(format!("UIA element: {e}")))
        }
    }

    pub struct UiaBackend {
        view: WalkerView,
    }

    impl UiaBackend {
        pub fn new(view: WalkerView) -> Self {
            Self { view }
        }
    }

    impl AccessibilityBackend for UiaBackend {
        fn name(&self) -> &str {
            match self.view {
                WalkerView::Control => "uia",
                WalkerView::Raw => "uia-raw",
            }
        }

        fn active_window(&self) -> PinpointResult<Option<NodeHandle>> {
            ensure_com()?;

            let automation: IUIAutomation = unsafe {
                CoCreateInstance(&CUIAutomation, None, CLSCTX_ALL)
                    .map_err(|e| PinpointError::Accessibility(format!("CoCreateInstance UIA: {e}")))?
            };

            let hwnd = unsafe { GetForegroundWindow() };
            if hwnd.0.is_null() {
                return Ok(None);
            }

            let element = unsafe {
                automation
                    .ElementFromHandle(hwnd)
                    .map_err(|e| PinpointError::Accessibility(format!("ElementFromHandle: {e}")))?
            };

            let walker = unsafe {
                match self.view {
                    WalkerView::Control => automation.ControlViewWalker(),
                    WalkerView::Raw => automation.RawViewWalker(),
                }
            };
            let walker =
                walker.map_err(|e| PinpointError::Accessibility(format!("tree walker: {e}")))?;

            Ok(Some(std::sync::Arc::new(UiaNode { element, walker })))
        }
    }

    fn control_type_name(ct: i32) -> &'static str {
        // UIA_*ControlTypeId values
        match ct {
            50000 => "Button",
            50001 => "Calendar",
            50002 => "CheckBox",
            50003 => "ComboBox",
            50004 => "Edit",
            50005 => "Hyperlink",
            50006 => "Image",
            50007 => "ListItem",
            50008 => "List",
            50009 => "Menu",
            50010 => "MenuBar",
            50011 => "MenuItem",
            50012 => "ProgressBar",
            50013 => "RadioButton",
            50014 => "ScrollBar",
            50015 => "Slider",
            50016 => "Spinner",
            50017 => "StatusBar",
            50018 => "Tab",
            50019 => "TabItem",
            50020 => "Text",
            50021 => "ToolBar",
            50022 => "ToolTip",
            50023 => "Tree",
            50024 => "TreeItem",
            50025 => "Custom",
            50026 => "Group",
            50027 => "Thumb",
            50028 => "DataGrid",
            50029 => "DataItem",
            50030 => "Document",
            50031 => "SplitButton",
            50032 => "Window",
            50033 => "Pane",
            50034 => "Header",
            50035 => "HeaderItem",
            50036 => "Table",
            50037 => "TitleBar",
            50038 => "Separator",
            _ => "",
        }
    }
}

#[cfg(target_os = "windows")]
pub use win::{UiaBackend, WalkerView};

/// Accessibility backends available on this platform, in priority order.
#[cfg(target_os = "windows")]
pub fn platform_backends() -> Vec<Arc<dyn AccessibilityBackend>> {
    vec![
        Arc::new(UiaBackend::new(WalkerView::Control)),
        Arc::new(UiaBackend::new(WalkerView::Raw)),
    ]
}

#[cfg(not(target_os = "windows"))]
pub fn platform_backends() -> Vec<Arc<dyn AccessibilityBackend>> {
    tracing::debug!("no accessibility backend on this platform");
    Vec::new()
}
