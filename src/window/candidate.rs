use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::errors::PinpointResult;
use crate::window::platform::WindowPlatform;

/// Opaque platform window handle (an HWND on Windows).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WindowHandle(pub u64);

/// One visible top-level window, in screen coordinates.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindowCandidate {
    pub title: String,
    pub handle: WindowHandle,
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
    /// Owning executable; empty when the process could not be looked up.
    pub process_name: String,
    pub minimized: bool,
}

impl WindowCandidate {
    pub fn area(&self) -> i64 {
        self.width.max(0) as i64 * self.height.max(0) as i64
    }

    pub fn label(&self) -> String {
        if self.process_name.is_empty() {
            format!("\"{}\" ({}x{})", self.title, self.width, self.height)
        } else {
            format!("\"{}\" [{}] ({}x{})", self.title, self.process_name, self.width, self.height)
        }
    }
}

const SYSTEM_TITLES: &[&str] = &[
    "Program Manager",
    "Microsoft Text Input Application",
    "Windows Input Experience",
    "MSCTFIME UI",
    "Default IME",
    "Task Switching",
    "",
];

const SYSTEM_KEYWORDS: &[&str] = &["ime ui", "input experience", "progman", "dde server"];

/// Shell and input-method helper windows that are never automation targets.
pub fn is_system_window(title: &str) -> bool {
    let trimmed = title.trim();
    if SYSTEM_TITLES.contains(&trimmed) {
        return true;
    }
    let lower = trimmed.to_lowercase();
    SYSTEM_KEYWORDS.iter().any(|k| lower.contains(k))
}

/// Fresh, uncached listing of focusable windows.
pub struct WindowEnumerator {
    platform: Arc<dyn WindowPlatform>,
}

impl WindowEnumerator {
    pub fn new(platform: Arc<dyn WindowPlatform>) -> Self {
        Self { platform }
    }

    pub async fn enumerate(&self) -> PinpointResult<Vec<WindowCandidate>> {
        let all = self.platform.list_windows().await?;
        let total = all.len();
        let kept: Vec<WindowCandidate> =
            all.into_iter().filter(|w| !is_system_window(&w.title)).collect();
        tracing::debug!(total, kept = kept.len(), "window candidates enumerated");
        Ok(kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::window::platform::fake::FakeDesktop;

    #[test]
    fn system_windows_by_title_and_keyword() {
        assert!(is_system_window("Program Manager"));
        assert!(is_system_window("   "));
        assert!(is_system_window("M Default IME UI helper"));
        assert!(is_system_window("DDE Server Window"));
        assert!(!is_system_window("Notepad - untitled"));
        assert!(!is_system_window("Program Manager Notes"));
    }

    #[tokio::test]
    async fn enumeration_drops_system_windows() {
        let desktop = FakeDesktop::new(
            &[("Program Manager", "explorer.exe"), ("Notepad - untitled", "notepad.exe"), ("", "")],
            None,
        );
        let enumerator = WindowEnumerator::new(Arc::new(desktop));
        let titles: Vec<String> =
            enumerator.enumerate().await.unwrap().into_iter().map(|w| w.title).collect();
        assert_eq!(titles, vec!["Notepad - untitled"]);
    }

    #[test]
    fn label_mentions_process_when_known() {
        let w = WindowCandidate {
            title: "Calculator".into(),
            handle: WindowHandle(1),
            x: 0,
            y: 0,
            width: 320,
            height: 480,
            process_name: "calculatorapp.exe".into(),
            minimized: false,
        };
        assert_eq!(w.label(), "\"Calculator\" [calculatorapp.exe] (320x480)");
        assert_eq!(w.area(), 153_600);
    }
}
