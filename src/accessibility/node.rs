use std::fmt;
use std::sync::Arc;

use crate::errors::PinpointResult;

/// The fields every backend can report for a native control.
///
/// Adapters swallow per-property errors and return empty strings, so a single
/// malformed node never aborts a tree walk.
pub trait Describable {
    fn title(&self) -> String;
    fn automation_id(&self) -> String;
    fn control_type(&self) -> String;
    fn class_name(&self) -> String;

    /// Accessible name; most backends report the same string as the title.
    fn name(&self) -> String {
        self.title()
    }

    fn friendly_class(&self) -> String {
        String::new()
    }

    fn control_id(&self) -> Option<i64> {
        None
    }
}

/// A live handle into a platform accessibility tree.
pub trait UiNode: Describable + Send + Sync + fmt::Debug {
    fn children(&self) -> PinpointResult<Vec<NodeHandle>>;

    /// Touches the native object. Errors once the widget behind the handle is gone.
    fn probe(&self) -> PinpointResult<()>;
}

pub type NodeHandle = Arc<dyn UiNode>;

pub trait AccessibilityBackend: Send + Sync {
    fn name(&self) -> &str;

    fn active_window(&self) -> PinpointResult<Option<NodeHandle>>;
}

/// First active top-level window reported by `backends`, tried in priority order.
pub fn active_top_level_window(
    backends: &[Arc<dyn AccessibilityBackend>],
) -> Option<(String, NodeHandle)> {
    for backend in backends {
        match backend.active_window() {
            Ok(Some(window)) => {
                tracing::debug!(backend = backend.name(), title = %window.title(), "active window attached");
                return Some((backend.name().to_string(), window));
            }
            Ok(None) => {
                tracing::debug!(backend = backend.name(), "backend reports no active window");
            }
            Err(e) => {
                tracing::debug!(backend = backend.name(), error = %e, "backend failed to attach");
            }
        }
    }
    tracing::warn!("no active window detected by any accessibility backend");
    None
}


#[cfg(test)]
mod tests {
    use super::fake::*;
    use super::*;

    #[test]
    fn backends_are_tried_in_priority_order() {
        let win = FakeNode::new("Notepad", "Window");
        let backends: Vec<Arc<dyn AccessibilityBackend>> = vec![
            Arc::new(FakeBackend { name: "uia", window: None, fail: true }),
            Arc::new(FakeBackend { name: "uia-raw", window: Some(win), fail: false }),
        ];
        let (backend, window) = active_top_level_window(&backends).unwrap();
        assert_eq!(backend, "uia-raw");
        assert_eq!(window.title(), "Notepad");
    }

    #[test]
    fn no_backend_means_no_window() {
        let backends: Vec<Arc<dyn AccessibilityBackend>> =
            vec![Arc::new(FakeBackend { name: "uia", window: None, fail: false })];
        assert!(active_top_level_window(&backends).is_none());
    }
}
