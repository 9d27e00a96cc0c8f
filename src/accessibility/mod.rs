pub mod node;
pub mod snapshot;
pub mod ui_automation;

pub use node::{active_top_level_window, AccessibilityBackend, Describable, NodeHandle, UiNode};
pub use snapshot::{ControlDescriptor, ControlInfo, SearchHints, Snapshot, SnapshotBuilder};
