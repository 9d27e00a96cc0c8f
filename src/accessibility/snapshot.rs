//! Depth-bounded snapshot of the active window's control tree.
//!
//! Entries are numbered in depth-first visitation order starting at 1. Indices are only
//! meaningful within the snapshot that produced them.

use serde::{Deserialize, Serialize};

use crate::accessibility::node::{Describable, NodeHandle};
use crate::errors::{PinpointError, PinpointResult};

/// Structural lookup keys that can find a control again without its index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHints {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub control_type: Option<String>,
}

impl SearchHints {
    pub fn is_empty(&self) -> bool {
        self.auto_id.is_none() && self.title.is_none() && self.control_type.is_none()
    }

    /// All present hints must match, case-insensitively.
    pub fn matches(&self, info: &ControlInfo) -> bool {
        if self.is_empty() {
            return false;
        }
        let eq = |hint: &Option<String>, value: &str| {
            hint.as_deref().map_or(true, |h| h.eq_ignore_ascii_case(value))
        };
        eq(&self.auto_id, &info.automation_id)
            && eq(&self.title, &info.title)
            && eq(&self.control_type, info.type_label())
    }
}

/// Handle-free metadata of one control; this is what locator tokens expose.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlInfo {
    pub index: usize,
    pub depth: usize,
    pub title: String,
    pub name: String,
    pub automation_id: String,
    pub control_type: String,
    pub class_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub control_id: Option<i64>,
    pub friendly_class: String,
    pub selector: String,
    pub search_hints: SearchHints,
}

impl ControlInfo {
    pub fn from_node(node: &dyn Describable, index: usize, depth: usize) -> Self {
        let title = node.title().trim().to_string();
        let name = node.name().trim().to_string();
        let automation_id = node.automation_id().trim().to_string();
        let control_type = node.control_type().trim().to_string();

        let selector = [&automation_id, &title, &name]
            .into_iter()
            .find(|s| !s.is_empty())
            .cloned()
            .unwrap_or_default();

        let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());
        let search_hints = SearchHints {
            auto_id: non_empty(&automation_id),
            title: non_empty(&title),
            control_type: non_empty(&control_type),
        };

        Self {
            index,
            depth,
            title,
            name,
            automation_id,
            control_type,
            class_name: node.class_name().trim().to_string(),
            control_id: node.control_id(),
            friendly_class: node.friendly_class().trim().to_string(),
            selector,
            search_hints,
        }
    }

    /// Best available type label: control type, else friendly class, else class name.
    pub fn type_label(&self) -> &str {
        [&self.control_type, &self.friendly_class, &self.class_name]
            .into_iter()
            .find(|s| !s.is_empty())
            .map(String::as_str)
            .unwrap_or("")
    }

    /// Short human-readable label, e.g. `#7 [Button] "Save"`.
    pub fn label(&self) -> String {
        let ty = match self.type_label() {
            "" => "Control",
            t => t,
        };
        if self.selector.is_empty() {
            format!("#{} [{}]", self.index, ty)
        } else {
            format!("#{} [{}] \"{}\"", self.index, ty, self.selector)
        }
    }
}

#[derive(Debug, Clone)]
pub struct ControlDescriptor {
    pub info: ControlInfo,
    /// Live widget handle; present only when the snapshot was built with handles.
    pub handle: Option<NodeHandle>,
}

#[derive(Debug, Clone)]
pub struct Snapshot {
    pub backend: String,
    pub window_title: String,
    pub captured_at: chrono::DateTime<chrono::Utc>,
    pub entries: Vec<ControlDescriptor>,
}

impl Snapshot {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn by_index(&self, index: usize) -> Option<&ControlDescriptor> {
        self.entries.iter().find(|e| e.info.index == index)
    }

    /// Parent of the entry at `index`, recovered from the depth-first order.
    pub fn parent_of(&self, index: usize) -> Option<&ControlDescriptor> {
        let pos = self.entries.iter().position(|e| e.info.index == index)?;
        let depth = self.entries[pos].info.depth;
        if depth == 0 {
            return None;
        }
        self.entries[..pos]
            .iter()
            .rev()
            .find(|e| e.info.depth + 1 == depth)
    }

    /// Labels of up to `limit` entries that carry a selector.
    pub fn labeled(&self, limit: usize) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| !e.info.selector.is_empty())
            .take(limit)
            .map(|e| e.info.label())
            .collect()
    }

    /// Indented text rendering handed to the model as the turn's observation.
    pub fn render_observation(&self) -> String {
        let mut out = format!(
            "Active window: \"{}\" ({} controls, backend {})\n",
            self.window_title,
            self.entries.len(),
            self.backend
        );
        for entry in &self.entries {
            let info = &entry.info;
            out.push_str(&"  ".repeat(info.depth));
            out.push_str(&info.label());
            if !info.automation_id.is_empty() && info.automation_id != info.selector {
                out.push_str(&format!(" (auto_id={})", info.automation_id));
            }
            out.push('\n');
        }
        out
    }
}

#[derive(Debug, Clone)]
pub struct SnapshotBuilder {
    pub max_depth: usize,
    pub include_handles: bool,
}

impl SnapshotBuilder {
    pub fn new(max_depth: usize, include_handles: bool) -> Self {
        Self { max_depth, include_handles }
    }

    /// Walks the tree under `root` depth-first.
    ///
    /// Fails only when `root` itself is unusable; subtrees whose children cannot be
    /// enumerated are truncated and the node itself is still recorded.
    pub fn build(&self, root: &NodeHandle, backend: &str) -> PinpointResult<Snapshot> {
        root.probe()
            .map_err(|e| PinpointError::InvalidRoot(e.to_string()))?;

        let mut entries = Vec::new();
        self.walk(root, 0, &mut entries);
        tracing::debug!(
            count = entries.len(),
            max_depth = self.max_depth,
            "control tree snapshot built"
        );

        Ok(Snapshot {
            backend: backend.to_string(),
            window_title: root.title(),
            captured_at: chrono::Utc::now(),
            entries,
        })
    }

    /// [`build`](Self::build) on a blocking thread; tree walks are synchronous COM calls.
    pub async fn build_blocking(&self, root: &NodeHandle, backend: &str) -> PinpointResult<Snapshot> {
        let builder = self.clone();
        let root = root.clone();
        let backend = backend.to_string();
        tokio::task::spawn_blocking(move || builder.build(&root, &backend))
            .await
            .map_err(|e| PinpointError::Accessibility(format!("join: {e}")))?
    }

    fn walk(&self, node: &NodeHandle, depth: usize, out: &mut Vec<ControlDescriptor>) {
        let info = ControlInfo::from_node(node.as_ref(), out.len() + 1, depth);
        out.push(ControlDescriptor {
            info,
            handle: self.include_handles.then(|| node.clone()),
        });

        if depth >= self.max_depth {
            return;
        }

        match node.children() {
            Ok(children) => {
                for child in &children {
                    self.walk(child, depth + 1, out);
                }
            }
            Err(e) => {
                tracing::debug!(depth, error = %e, "child enumeration failed, subtree truncated");
            }
        }
    }
}
