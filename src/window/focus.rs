//! Bringing a window to the foreground from a loose title, process or app name.
//!
//! The resolver walks a fixed sequence of states:
//!
//! ```text
//! Idle ─► AlreadyFocused
//!    └──► DirectMatchAttempt ─► FallbackEnumeration ─► DeterministicChoice
//!                                                   ─► SimilarityRanking
//!                                                   ─► AiAssistedChoice ─► Focused | Exhausted
//! ```
//!
//! Every focus attempt is verified by re-reading the active window title after a settle
//! delay; a platform call that reports success is not trusted on its own.
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use serde::Serialize;

use crate::config::FocusConfig;
use crate::llm::oracle::{parse_selection_index, ReasoningModel};
use crate::resolver::scoring::normalize;
use crate::strategy::{LadderTrace, Step};
use crate::window::candidate::{WindowCandidate, WindowEnumerator, WindowHandle};
use crate::window::deterministic::{deterministic_choice, is_plausible, rank_by_similarity, titles_match};
use crate::window::platform::WindowPlatform;

const BUILTIN_ALIASES: &[(&str, &str)] = &[
    ("calculator", "calculatorapp.exe"),
    ("calc", "calculatorapp.exe"),
    ("notepad", "notepad.exe"),
    ("paint", "mspaint.exe"),
    ("edge", "msedge.exe"),
    ("chrome", "chrome.exe"),
    ("firefox", "firefox.exe"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FocusState {
    Idle,
    AlreadyFocused,
    DirectMatchAttempt,
    FallbackEnumeration,
    DeterministicChoice,
    SimilarityRanking,
    AiAssistedChoice,
    Focused,
    Exhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectStrategy {
    ExactTitle,
    TitlePattern,
    ProcessAlias,
    RawEnumeration,
}

impl DirectStrategy {
    pub const ALL: [DirectStrategy; 4] = [
        DirectStrategy::ExactTitle,
        DirectStrategy::TitlePattern,
        DirectStrategy::ProcessAlias,
        DirectStrategy::RawEnumeration,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DirectStrategy::ExactTitle => "exact_title",
            DirectStrategy::TitlePattern => "title_pattern",
            DirectStrategy::ProcessAlias => "process_alias",
            DirectStrategy::RawEnumeration => "raw_enumeration",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FocusOutcome {
    pub success: bool,
    pub target: String,
    /// Terminal state: `AlreadyFocused`, `Focused` or `Exhausted`.
    pub state: FocusState,
    pub focused_title: Option<String>,
    /// Strategy that produced the focus, e.g. `title_pattern` or `deterministic:close_match`.
    pub via: Option<String>,
    pub path: Vec<FocusState>,
    pub trace: LadderTrace,
    /// Candidate labels considered during fallback enumeration.
    pub considered: Vec<String>,
}

struct Run {
    target: String,
    path: Vec<FocusState>,
    trace: LadderTrace,
    considered: Vec<String>,
}

impl Run {
    fn enter(&mut self, state: FocusState) {
        tracing::debug!(query = %self.target, ?state, "focus state");
        self.path.push(state);
    }

    fn finish(mut self, state: FocusState, focused_title: Option<String>, via: Option<String>) -> FocusOutcome {
        self.path.push(state);
        FocusOutcome {
            success: state != FocusState::Exhausted,
            target: self.target,
            state,
            focused_title,
            via,
            path: self.path,
            trace: self.trace,
            considered: self.considered,
        }
    }
}

pub struct WindowFocusResolver {
    platform: Arc<dyn WindowPlatform>,
    enumerator: WindowEnumerator,
    model: Option<Arc<dyn ReasoningModel>>,
    settle_delay: Duration,
    allow_ai: bool,
    close_match_cutoff: f64,
    ai_candidate_limit: usize,
    aliases: Vec<(String, String)>,
}

impl WindowFocusResolver {
    pub fn new(
        config: &FocusConfig,
        platform: Arc<dyn WindowPlatform>,
        model: Option<Arc<dyn ReasoningModel>>,
    ) -> Self {
        let mut aliases: Vec<(String, String)> = BUILTIN_ALIASES
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let mut extra: Vec<(&String, &String)> = config.process_aliases.iter().collect();
        extra.sort();
        for (name, exe) in extra {
            let name = normalize(name);
            match aliases.iter_mut().find(|(k, _)| *k == name) {
                Some(entry) => entry.1 = exe.clone(),
                None => aliases.push((name, exe.clone())),
            }
        }

        Self {
            enumerator: WindowEnumerator::new(platform.clone()),
            platform,
            model,
            settle_delay: config.settle_delay(),
            allow_ai: config.allow_ai,
            close_match_cutoff: config.close_match_cutoff,
            ai_candidate_limit: config.ai_candidate_limit.max(1),
            aliases,
        }
    }

    pub fn enumerator(&self) -> &WindowEnumerator {
        &self.enumerator
    }

    pub async fn active_window_title(&self) -> Option<String> {
        match self.platform.active_window_title().await {
            Ok(title) => title,
            Err(e) => {
                tracing::debug!(error = %e, "active window title unavailable");
                None
            }
        }
    }

    pub async fn focus_window(&self, target: &str) -> FocusOutcome {
        let mut run = Run {
            target: target.trim().to_string(),
            path: vec![FocusState::Idle],
            trace: LadderTrace::new(),
            considered: Vec::new(),
        };
        if run.target.is_empty() {
            tracing::warn!("focus requested with an empty target");
            return run.finish(FocusState::Exhausted, None, None);
        }

        if let Some(active) = self.active_window_title().await {
            if titles_match(&active, &run.target) {
                tracing::info!(query = %run.target, active = %active, "window already focused");
                return run.finish(FocusState::AlreadyFocused, Some(active), None);
            }
        }

        tracing::info!(query = %run.target, "focusing window");
        run.enter(FocusState::DirectMatchAttempt);
        let raw = match self.platform.list_windows().await {
            Ok(raw) => raw,
            Err(e) => {
                run.trace.record::<()>("list_windows", &Step::fail(e.to_string()));
                Vec::new()
            }
        };
        for strategy in DirectStrategy::ALL {
            let step = self.direct(strategy, &raw, &run.target).await;
            run.trace.record(strategy.as_str(), &step);
            if let Step::Ok(title) = step {
                tracing::info!(query = %run.target, title = %title, via = strategy.as_str(), "window focused");
                return run.finish(FocusState::Focused, Some(title), Some(strategy.as_str().into()));
            }
        }

        run.enter(FocusState::FallbackEnumeration);
        self.focus_from_candidates(run).await
    }

    async fn focus_from_candidates(&self, mut run: Run) -> FocusOutcome {
        let candidates = match self.enumerator.enumerate().await {
            Ok(c) => c,
            Err(e) => {
                run.trace.record::<()>("enumerate", &Step::fail(e.to_string()));
                Vec::new()
            }
        };
        run.considered = candidates.iter().map(WindowCandidate::label).collect();
        if candidates.is_empty() {
            tracing::warn!(query = %run.target, "no window candidates to fall back on");
            return run.finish(FocusState::Exhausted, None, None);
        }
        tracing::debug!(query = %run.target, count = candidates.len(), "window candidates for fallback");

        let mut tried: HashSet<WindowHandle> = HashSet::new();

        run.enter(FocusState::DeterministicChoice);
        let choice =
            deterministic_choice(&candidates, &run.target, self.close_match_cutoff, &mut run.trace);
        if let Some((index, rule)) = choice {
            let candidate = &candidates[index];
            tried.insert(candidate.handle);
            let step = self.focus_candidate(candidate).await;
            run.trace.record("deterministic", &step);
            if let Step::Ok(title) = step {
                tracing::info!(query = %run.target, title = %title, rule, "window focused by rule");
                return run.finish(FocusState::Focused, Some(title), Some(format!("deterministic:{rule}")));
            }
        }

        // Weak candidates are left untried for the model or the best-remaining fallback.
        run.enter(FocusState::SimilarityRanking);
        let ranked = rank_by_similarity(&candidates, &run.target);
        for &index in &ranked {
            let candidate = &candidates[index];
            if !is_plausible(candidate, &run.target) || !tried.insert(candidate.handle) {
                continue;
            }
            let step = self.focus_candidate(candidate).await;
            run.trace.record("similarity", &step);
            if let Step::Ok(title) = step {
                tracing::info!(query = %run.target, title = %title, "window focused by similarity");
                return run.finish(FocusState::Focused, Some(title), Some("similarity".into()));
            }
        }

        if self.allow_ai {
            run.enter(FocusState::AiAssistedChoice);
            let shortlist: Vec<&WindowCandidate> = ranked
                .iter()
                .take(self.ai_candidate_limit)
                .map(|&i| &candidates[i])
                .collect();
            let (selected, via) = match self.ai_select(&run.target, &shortlist).await {
                Some(i) => (Some(shortlist[i]), "ai_choice"),
                None => (
                    ranked
                        .iter()
                        .map(|&i| &candidates[i])
                        .find(|c| !tried.contains(&c.handle)),
                    "best_remaining",
                ),
            };
            let step = match selected {
                Some(candidate) => {
                    tried.insert(candidate.handle);
                    self.focus_candidate(candidate).await
                }
                None => Step::skip("no candidate selected"),
            };
            run.trace.record(via, &step);
            if let Step::Ok(title) = step {
                tracing::info!(query = %run.target, title = %title, via, "window focused");
                return run.finish(FocusState::Focused, Some(title), Some(via.into()));
            }
        }

        tracing::warn!(
            query = %run.target,
            candidates = ?run.considered,
            trace = %run.trace.summary(),
            "window focus exhausted"
        );
        run.finish(FocusState::Exhausted, None, None)
    }

    async fn direct(&self, strategy: DirectStrategy, raw: &[WindowCandidate], target: &str) -> Step<String> {
        if raw.is_empty() {
            return Step::skip("no windows listed");
        }
        let wanted = normalize(target);
        match strategy {
            DirectStrategy::ExactTitle => {
                let matches: Vec<&WindowCandidate> =
                    raw.iter().filter(|w| normalize(&w.title) == wanted).collect();
                let Some(window) = prefer_visible(&matches).into_iter().next() else {
                    return Step::fail("no window with that exact title");
                };
                self.focus_and_verify(window, target, false).await
            }
            DirectStrategy::TitlePattern => {
                let Ok(pattern) = Regex::new(&format!("(?i){}", regex::escape(target))) else {
                    return Step::skip("target is not a usable pattern");
                };
                let matches: Vec<&WindowCandidate> =
                    raw.iter().filter(|w| pattern.is_match(&w.title)).collect();
                self.try_each(prefer_visible(&matches), "no title matches the pattern").await
            }
            DirectStrategy::ProcessAlias => {
                let exes: Vec<&str> = self
                    .aliases
                    .iter()
                    .filter(|(name, _)| wanted.contains(name.as_str()))
                    .map(|(_, exe)| exe.as_str())
                    .collect();
                if exes.is_empty() {
                    return Step::skip("no process alias applies");
                }
                let matches: Vec<&WindowCandidate> = raw
                    .iter()
                    .filter(|w| exes.iter().any(|exe| w.process_name.eq_ignore_ascii_case(exe)))
                    .collect();
                self.try_each(prefer_visible(&matches), "aliased process has no window").await
            }
            DirectStrategy::RawEnumeration => {
                let Some(window) = raw.iter().find(|w| titles_match(&w.title, target)) else {
                    return Step::fail("no window title matches");
                };
                self.focus_and_verify(window, &window.title, true).await
            }
        }
    }

    async fn try_each(&self, windows: Vec<&WindowCandidate>, none: &str) -> Step<String> {
        if windows.is_empty() {
            return Step::fail(none);
        }
        let mut last = Step::fail(none);
        for window in windows {
            last = self.focus_and_verify(window, &window.title, false).await;
            if last.is_ok() {
                break;
            }
        }
        last
    }

    async fn focus_candidate(&self, candidate: &WindowCandidate) -> Step<String> {
        self.focus_and_verify(candidate, &candidate.title, false).await
    }

    /// Restore if minimised (always when `force_restore`), foreground, settle, then require
    /// the active title to match `expected`.
    async fn focus_and_verify(&self, window: &WindowCandidate, expected: &str, force_restore: bool) -> Step<String> {
        let minimized = force_restore
            || self.platform.is_minimized(window.handle).await.unwrap_or(window.minimized);
        if minimized {
            if let Err(e) = self.platform.restore(window.handle).await {
                return Step::fail(format!("restore \"{}\": {e}", window.title));
            }
        }
        if let Err(e) = self.platform.bring_to_foreground(window.handle).await {
            return Step::fail(format!("foreground \"{}\": {e}", window.title));
        }
        if !self.settle_delay.is_zero() {
            tokio::time::sleep(self.settle_delay).await;
        }
        match self.active_window_title().await {
            Some(active) if titles_match(&active, expected) => Step::Ok(active),
            Some(active) => Step::fail(format!("focus not verified for \"{}\" (active: \"{active}\")", window.title)),
            None => Step::fail(format!("focus not verified for \"{}\" (no active window)", window.title)),
        }
    }

    async fn ai_select(&self, target: &str, shortlist: &[&WindowCandidate]) -> Option<usize> {
        let model = self.model.as_ref()?;
        if shortlist.is_empty() {
            return None;
        }
        let prompt = window_selection_prompt(target, shortlist);
        match model.infer(&prompt, None).await {
            Ok(reply) => {
                let selection = parse_selection_index(&reply, shortlist.len());
                if selection.is_none() {
                    tracing::debug!(reply = %reply.trim(), "model made no usable window selection");
                }
                selection
            }
            Err(e) => {
                tracing::debug!(error = %e, "model window selection failed");
                None
            }
        }
    }
}

/// Non-minimised windows when there are any, otherwise all of them.
fn prefer_visible<'a>(windows: &[&'a WindowCandidate]) -> Vec<&'a WindowCandidate> {
    let visible: Vec<&WindowCandidate> = windows.iter().copied().filter(|w| !w.minimized).collect();
    if visible.is_empty() {
        windows.to_vec()
    } else {
        visible
    }
}

fn window_selection_prompt(target: &str, shortlist: &[&WindowCandidate]) -> String {
    let listing = shortlist
        .iter()
        .enumerate()
        .map(|(i, w)| format!("{}. {}", i + 1, w.label()))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "Which open window best matches the request \"{target}\"?\n\n\
         Open windows:\n{listing}\n\n\
         Reply with only the number of the best window (1-{}), or 0 if none fits.",
        shortlist.len()
    )
}
