//! Additive multi-signal scoring of snapshot entries against a query.

use similar::TextDiff;

use crate::accessibility::snapshot::ControlInfo;

pub const EXACT_FIELD: f64 = 4.0;
pub const SUBSTRING: f64 = 2.5;
pub const RATIO_FLOOR: f64 = 0.55;
pub const CONSOLATION: f64 = 0.1;

/// Character-level similarity in `[0, 1]` (2·matches / total length).
pub fn similarity(a: &str, b: &str) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    TextDiff::from_chars(a, b).ratio() as f64
}

pub fn normalize(text: &str) -> String {
    text.trim().to_lowercase()
}

#[derive(Debug, Clone, Default)]
pub struct ScoreQuery {
    /// Already normalized with [`normalize`].
    pub text: String,
    pub control_type: Option<String>,
    pub automation_id: Option<String>,
    pub exact: bool,
}

impl ScoreQuery {
    pub fn new(
        text: &str,
        control_type: Option<&str>,
        automation_id: Option<&str>,
        exact: bool,
    ) -> Self {
        let filter = |f: Option<&str>| f.map(str::trim).filter(|s| !s.is_empty()).map(String::from);
        Self {
            text: normalize(text),
            control_type: filter(control_type),
            automation_id: filter(automation_id),
            exact,
        }
    }

    pub fn has_filters(&self) -> bool {
        self.control_type.is_some() || self.automation_id.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Score {
    pub text: f64,
    pub depth_bonus: f64,
}

impl Score {
    pub fn total(&self) -> f64 {
        self.text + self.depth_bonus
    }

    /// Only the consolation (or nothing) matched.
    pub fn is_weak(&self) -> bool {
        self.text <= CONSOLATION
    }
}

pub fn depth_bonus(depth: usize) -> f64 {
    (1.5 - depth as f64 * 0.1).max(0.0)
}

/// Scores one entry. `None` means disqualified: a filter mismatch, or no exact
/// field equality in exact mode.
pub fn score(info: &ControlInfo, query: &ScoreQuery) -> Option<Score> {
    if let Some(id) = &query.automation_id {
        if !id.eq_ignore_ascii_case(info.automation_id.trim()) {
            return None;
        }
    }
    if let Some(ty) = &query.control_type {
        if !ty.eq_ignore_ascii_case(info.type_label()) {
            return None;
        }
    }

    let fields = [&info.title, &info.name, &info.automation_id, &info.selector];
    let fields: Vec<String> = fields
        .iter()
        .map(|f| normalize(f))
        .filter(|f| !f.is_empty())
        .collect();

    let text = if query.text.is_empty() {
        0.0
    } else if query.exact {
        if !fields.iter().any(|f| *f == query.text) {
            return None;
        }
        EXACT_FIELD
    } else {
        let mut total: f64 = fields
            .iter()
            .map(|f| {
                if *f == query.text {
                    EXACT_FIELD
                } else if f.contains(query.text.as_str()) {
                    SUBSTRING
                } else {
                    let ratio = similarity(&query.text, f);
                    if ratio > RATIO_FLOOR {
                        ratio
                    } else {
                        0.0
                    }
                }
            })
            .sum();
        if total == 0.0 && query.automation_id.is_none() {
            total = CONSOLATION;
        }
        total
    };

    Some(Score {
        text,
        depth_bonus: depth_bonus(info.depth),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accessibility::node::fake::FakeNode;

    fn info(title: &str, control_type: &str, auto_id: &str, depth: usize) -> ControlInfo {
        let node = FakeNode::with_id(title, control_type, auto_id);
        ControlInfo::from_node(node.as_ref(), 1, depth)
    }

    #[test]
    fn similarity_matches_expected_ratios() {
        assert!((similarity("sav", "save") - 6.0 / 7.0).abs() < 1e-6);
        assert!(similarity("sav", "cancel") < RATIO_FLOOR);
        assert_eq!(similarity("", ""), 1.0);
    }

    #[test]
    fn automation_id_mismatch_disqualifies_regardless_of_title() {
        let q = ScoreQuery::new("Save", None, Some("btnOk"), false);
        assert!(score(&info("Save", "Button", "btnSave", 1), &q).is_none());
        assert!(score(&info("OK", "Button", "BTNOK", 1), &q).is_some());
    }

    #[test]
    fn control_type_filter_uses_best_label() {
        let q = ScoreQuery::new("", Some("button"), None, false);
        let mut entry = info("Go", "", "", 1);
        entry.friendly_class = "Button".into();
        assert!(score(&entry, &q).is_some());
        entry.friendly_class = "Edit".into();
        assert!(score(&entry, &q).is_none());
    }

    #[test]
    fn exact_mode_is_flat_or_disqualified() {
        let q = ScoreQuery::new("save", None, None, true);
        let s = score(&info("Save", "Button", "", 0), &q).unwrap();
        assert_eq!(s.text, EXACT_FIELD);
        assert!(score(&info("Save As", "Button", "", 0), &q).is_none());
    }

    #[test]
    fn fuzzy_fields_accumulate() {
        let q = ScoreQuery::new("save", None, None, false);
        // title, name and selector all equal "save"
        let s = score(&info("Save", "Button", "", 2), &q).unwrap();
        assert_eq!(s.text, 3.0 * EXACT_FIELD);
        let partial = score(&info("Save As", "MenuItem", "", 2), &q).unwrap();
        assert_eq!(partial.text, 3.0 * SUBSTRING);
    }

    #[test]
    fn unmatched_entry_gets_consolation_unless_id_filtered() {
        let q = ScoreQuery::new("zzz", None, None, false);
        let s = score(&info("Cancel", "Button", "", 0), &q).unwrap();
        assert_eq!(s.text, CONSOLATION);
        assert!(s.is_weak());

        let filtered = ScoreQuery::new("zzz", None, Some("x"), false);
        let s = score(&info("Cancel", "Button", "x", 0), &filtered).unwrap();
        assert_eq!(s.text, 0.0);
    }

    #[test]
    fn depth_bonus_decays_to_zero() {
        assert!((depth_bonus(0) - 1.5).abs() < 1e-9);
        assert!((depth_bonus(3) - 1.2).abs() < 1e-9);
        assert_eq!(depth_bonus(20), 0.0);
    }
}
