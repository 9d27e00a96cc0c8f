use std::time::Duration;

use serde::Serialize;

use crate::accessibility::node::NodeHandle;
use crate::accessibility::snapshot::{ControlDescriptor, ControlInfo, Snapshot, SnapshotBuilder};
use crate::config::ResolverConfig;
use crate::errors::{PinpointError, PinpointResult};
use crate::resolver::locator_cache::LocatorCache;
use crate::resolver::scoring::{score, Score, ScoreQuery};
use crate::strategy::{LadderTrace, Step};

/// Mutable resolution state owned by one session.
#[derive(Debug)]
pub struct ResolverState {
    pub cache: LocatorCache,
    pub last_snapshot: Option<Snapshot>,
}

impl ResolverState {
    pub fn new(cache_capacity: usize) -> Self {
        Self {
            cache: LocatorCache::new(cache_capacity),
            last_snapshot: None,
        }
    }

    pub fn clear(&mut self) {
        self.cache.clear();
        self.last_snapshot = None;
    }
}

#[derive(Debug, Clone, Default)]
pub struct ResolveRequest {
    pub query: String,
    pub control_type: Option<String>,
    pub automation_id: Option<String>,
    /// Restricts scoring to the entry with this index.
    pub index_filter: Option<usize>,
    pub exact: bool,
}

impl ResolveRequest {
    pub fn text(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    /// `#N` shorthand, if the query is one.
    pub fn direct_index(&self) -> Option<usize> {
        let rest = self.query.trim().strip_prefix('#')?;
        let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
        digits.parse().ok()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Resolution {
    pub token: String,
    pub info: ControlInfo,
    #[serde(skip)]
    pub handle: Option<NodeHandle>,
    /// `None` for direct `#N` lookups, which are not scored.
    pub score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alternative: Option<String>,
    /// The winner matched the query text only through the consolation score.
    pub weak_match: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolveFailure {
    pub reason: String,
    pub suggestions: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ResolveOutcome {
    Found(Resolution),
    NotFound(ResolveFailure),
}

impl ResolveOutcome {
    pub fn found(&self) -> Option<&Resolution> {
        match self {
            Self::Found(r) => Some(r),
            Self::NotFound(_) => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TokenOutcome {
    /// Token is usable; `via` names the rung that produced the handle.
    Valid {
        info: ControlInfo,
        #[serde(skip)]
        handle: NodeHandle,
        via: String,
    },
    /// Every rung failed; the token has been removed from the cache.
    Evicted {
        info: ControlInfo,
        reason: String,
    },
    Unknown,
}

pub struct ElementResolver {
    builder: SnapshotBuilder,
    suggestion_limit: usize,
    lookup_timeout: Duration,
    lookup_poll: Duration,
}

impl ElementResolver {
    pub fn new(config: &ResolverConfig) -> Self {
        Self {
            builder: SnapshotBuilder::new(config.max_depth, config.include_handles),
            suggestion_limit: config.suggestion_limit,
            lookup_timeout: config.lookup_timeout(),
            lookup_poll: config.lookup_poll(),
        }
    }

    pub fn builder(&self) -> &SnapshotBuilder {
        &self.builder
    }

    /// Rebuilds the snapshot from `root` and makes it the session's latest.
    pub async fn refresh<'s>(
        &self,
        state: &'s mut ResolverState,
        backend: &str,
        root: &NodeHandle,
    ) -> PinpointResult<&'s Snapshot> {
        let snapshot = self.builder.build_blocking(root, backend).await?;
        Ok(state.last_snapshot.insert(snapshot))
    }

    /// Resolves a query against the active window.
    ///
    /// `#N` queries read the latest snapshot (indices are only meaningful there) and only
    /// walk the tree when none exists yet. Other queries re-walk when a root is given.
    pub async fn resolve(
        &self,
        state: &mut ResolverState,
        root: Option<(&str, &NodeHandle)>,
        request: &ResolveRequest,
    ) -> PinpointResult<ResolveOutcome> {
        let direct = request.direct_index();

        match (root, direct, state.last_snapshot.is_some()) {
            (Some((backend, node)), None, _) | (Some((backend, node)), Some(_), false) => {
                self.refresh(state, backend, node).await?;
            }
            (None, _, false) => return Err(PinpointError::NoActiveWindow),
            _ => {}
        }
        let ResolverState { cache, last_snapshot } = state;
        let Some(snapshot) = last_snapshot.as_ref() else {
            return Err(PinpointError::NoActiveWindow);
        };

        let outcome = match direct {
            Some(index) => self.resolve_index(cache, snapshot, index),
            None => self.resolve_scored(cache, snapshot, request),
        };

        match &outcome {
            ResolveOutcome::Found(r) => tracing::info!(
                query = %request.query,
                index = r.info.index,
                score = ?r.score,
                weak = r.weak_match,
                "element resolved"
            ),
            ResolveOutcome::NotFound(f) => {
                tracing::info!(query = %request.query, reason = %f.reason, "element not found")
            }
        }
        Ok(outcome)
    }

    fn resolve_index(
        &self,
        cache: &mut LocatorCache,
        snapshot: &Snapshot,
        index: usize,
    ) -> ResolveOutcome {
        match snapshot.by_index(index) {
            Some(entry) => {
                let (token, info) = cache.store(entry);
                ResolveOutcome::Found(Resolution {
                    token,
                    info,
                    handle: entry.handle.clone(),
                    score: None,
                    alternative: None,
                    weak_match: false,
                })
            }
            None => self.not_found(
                snapshot,
                format!("no element #{index} in the current snapshot ({} entries)", snapshot.len()),
            ),
        }
    }

    fn resolve_scored(
        &self,
        cache: &mut LocatorCache,
        snapshot: &Snapshot,
        request: &ResolveRequest,
    ) -> ResolveOutcome {
        let query = ScoreQuery::new(
            &request.query,
            request.control_type.as_deref(),
            request.automation_id.as_deref(),
            request.exact,
        );

        if query.text.is_empty() && !query.has_filters() && request.index_filter.is_none() {
            return self.not_found(snapshot, "empty query".into());
        }

        let mut ranked: Vec<(&ControlDescriptor, Score)> = snapshot
            .entries
            .iter()
            .filter(|e| request.index_filter.map_or(true, |i| e.info.index == i))
            .filter_map(|e| score(&e.info, &query).map(|s| (e, s)))
            .collect();

        ranked.sort_by(|(a, sa), (b, sb)| {
            sb.total()
                .total_cmp(&sa.total())
                .then(a.info.depth.cmp(&b.info.depth))
                .then(a.info.index.cmp(&b.info.index))
        });

        tracing::debug!(
            query = %query.text,
            candidates = ranked.len(),
            "snapshot entries scored"
        );

        let mut ranked = ranked.into_iter();
        let Some((best, best_score)) = ranked.next() else {
            return self.not_found(snapshot, format!("nothing matches \"{}\"", request.query));
        };
        let alternative = ranked
            .next()
            .map(|(e, s)| format!("{} (score {:.2})", e.info.label(), s.total()));

        let (token, info) = cache.store(best);
        ResolveOutcome::Found(Resolution {
            token,
            info,
            handle: best.handle.clone(),
            score: Some(best_score.total()),
            alternative,
            weak_match: !query.text.is_empty() && best_score.is_weak(),
        })
    }

    fn not_found(&self, snapshot: &Snapshot, reason: String) -> ResolveOutcome {
        ResolveOutcome::NotFound(ResolveFailure {
            reason,
            suggestions: snapshot.labeled(self.suggestion_limit),
        })
    }

    /// Checks a previously issued token, relocating its control if the handle went stale.
    ///
    /// Rungs: cached handle, search hints (polled until the lookup timeout), selector.
    /// When all fail the token is evicted.
    pub async fn resolve_token(
        &self,
        state: &mut ResolverState,
        root: Option<&NodeHandle>,
        token: &str,
    ) -> TokenOutcome {
        let (cached_handle, Some(info)) = state.cache.resolve(token) else {
            tracing::info!(token, "unknown locator token");
            return TokenOutcome::Unknown;
        };
        let mut trace = LadderTrace::new();

        let step = match &cached_handle {
            Some(handle) => match handle.probe() {
                Ok(()) => Step::Ok(handle.clone()),
                Err(e) => Step::fail(e.to_string()),
            },
            None => Step::skip("no handle captured"),
        };
        trace.record("cached_handle", &step);
        if let Step::Ok(handle) = step {
            return TokenOutcome::Valid { info, handle, via: "cached_handle".into() };
        }

        let step = match root {
            None => Step::skip("no active window"),
            Some(_) if info.search_hints.is_empty() => Step::skip("no search hints"),
            Some(root) => {
                self.structural_lookup(root, |c| info.search_hints.matches(c), true)
                    .await
            }
        };
        trace.record("search_hints", &step);
        if let Step::Ok(handle) = step {
            state.cache.update_handle(token, handle.clone());
            return TokenOutcome::Valid { info, handle, via: "search_hints".into() };
        }

        let step = match root {
            None => Step::skip("no active window"),
            Some(_) if info.selector.is_empty() => Step::skip("empty selector"),
            Some(root) => {
                let selector = info.selector.as_str();
                self.structural_lookup(
                    root,
                    |c| {
                        [&c.automation_id, &c.title, &c.name, &c.selector]
                            .iter()
                            .any(|f| f.eq_ignore_ascii_case(selector))
                    },
                    false,
                )
                .await
            }
        };
        trace.record("selector", &step);
        if let Step::Ok(handle) = step {
            state.cache.update_handle(token, handle.clone());
            return TokenOutcome::Valid { info, handle, via: "selector".into() };
        }

        state.cache.invalidate(token);
        let reason = trace.summary();
        tracing::warn!(token, %reason, "locator could not be re-resolved, evicted");
        TokenOutcome::Evicted { info, reason }
    }

    /// Walks the tree under `root` for exactly one control matching `pred`.
    ///
    /// With `wait`, an empty result is retried until the lookup timeout; ambiguity and
    /// walk errors end the lookup immediately.
    async fn structural_lookup(
        &self,
        root: &NodeHandle,
        pred: impl Fn(&ControlInfo) -> bool,
        wait: bool,
    ) -> Step<NodeHandle> {
        let lookup = SnapshotBuilder::new(self.builder.max_depth, true);
        let deadline = tokio::time::Instant::now() + self.lookup_timeout;

        loop {
            let snapshot = match lookup.build_blocking(root, "lookup").await {
                Ok(s) => s,
                Err(e) => return Step::fail(e.to_string()),
            };
            let mut matches = snapshot.entries.into_iter().filter(|e| pred(&e.info));
            match (matches.next(), matches.next()) {
                (Some(only), None) => {
                    return match only.handle {
                        Some(h) => Step::Ok(h),
                        None => Step::fail("match carries no handle"),
                    };
                }
                (Some(_), Some(_)) => {
                    return Step::fail(format!("ambiguous ({} matches)", 2 + matches.count()))
                }
                (None, _) => {}
            }

            if !wait {
                return Step::fail("not found");
            }
            if tokio::time::Instant::now() + self.lookup_poll > deadline {
                return Step::fail(format!("timed out after {:?}", self.lookup_timeout));
            }
            tokio::time::sleep(self.lookup_poll).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::accessibility::node::fake::FakeNode;

    fn config() -> ResolverConfig {
        ResolverConfig {
            lookup_timeout_ms: 40,
            lookup_poll_ms: 10,
            ..Default::default()
        }
    }

    /// 1 Window, 2 Pane, 3 Edit(15), 4 Button Cancel, 5 Pane, 6 Text, 7 Button Save, 8 Button Save As
    fn dialog() -> Arc<FakeNode> {
        let root = FakeNode::new("Save File", "Window");
        let top = root.push(FakeNode::new("Top", "Pane"));
        top.push(FakeNode::with_id("File name", "Edit", "15"));
        top.push(FakeNode::with_id("Cancel", "Button", "btnCancel"));
        let bottom = root.push(FakeNode::new("Bottom", "Pane"));
        bottom.push(FakeNode::new("Ready", "Text"));
        bottom.push(FakeNode::with_id("Save", "Button", "btnSave"));
        bottom.push(FakeNode::new("Save As", "Button"));
        root
    }

    async fn resolve(
        resolver: &ElementResolver,
        state: &mut ResolverState,
        root: &NodeHandle,
        request: ResolveRequest,
    ) -> ResolveOutcome {
        resolver.resolve(state, Some(("uia", root)), &request).await.unwrap()
    }

    #[tokio::test]
    async fn direct_index_skips_scoring() {
        let resolver = ElementResolver::new(&config());
        let mut state = ResolverState::new(8);
        let root = dialog().handle();
        let out = resolve(&resolver, &mut state, &root, ResolveRequest::text("#7")).await;
        let found = out.found().unwrap();
        assert_eq!(found.info.index, 7);
        assert_eq!(found.info.title, "Save");
        assert!(found.score.is_none());
        assert!(state.cache.contains(&found.token));
    }

    #[tokio::test]
    async fn direct_index_out_of_range_suggests_labels() {
        let resolver = ElementResolver::new(&config());
        let mut state = ResolverState::new(8);
        let out = resolve(&resolver, &mut state, &dialog().handle(), ResolveRequest::text("#99")).await;
        let ResolveOutcome::NotFound(f) = out else { panic!("expected not found") };
        assert_eq!(f.suggestions.len(), 5);
        assert!(f.reason.contains("#99"));
    }

    #[tokio::test]
    async fn direct_index_reads_existing_snapshot_without_root() {
        let resolver = ElementResolver::new(&config());
        let mut state = ResolverState::new(8);
        resolver.refresh(&mut state, "uia", &dialog().handle()).await.unwrap();
        let out = resolver.resolve(&mut state, None, &ResolveRequest::text("#3")).await.unwrap();
        assert_eq!(out.found().unwrap().info.automation_id, "15");
    }

    #[tokio::test]
    async fn no_root_and_no_snapshot_is_an_error() {
        let resolver = ElementResolver::new(&config());
        let mut state = ResolverState::new(8);
        let err = resolver.resolve(&mut state, None, &ResolveRequest::text("Save")).await.unwrap_err();
        assert!(matches!(err, PinpointError::NoActiveWindow));
    }

    #[tokio::test]
    async fn fuzzy_prefix_ranks_save_above_cancel() {
        let resolver = ElementResolver::new(&config());
        let mut state = ResolverState::new(8);
        let root = FakeNode::new("Dialog", "Window");
        root.push(FakeNode::new("Cancel", "Button"));
        root.push(FakeNode::new("Save", "Button"));
        let out = resolve(&resolver, &mut state, &root.handle(), ResolveRequest::text("sav")).await;
        let found = out.found().unwrap();
        assert_eq!(found.info.title, "Save");
        assert!(!found.weak_match);
    }

    #[tokio::test]
    async fn exact_field_match_beats_substring_and_reports_alternative() {
        let resolver = ElementResolver::new(&config());
        let mut state = ResolverState::new(8);
        let out = resolve(&resolver, &mut state, &dialog().handle(), ResolveRequest::text("save")).await;
        let found = out.found().unwrap();
        assert_eq!(found.info.title, "Save");
        // "Save File" (substring, shallow) edges out "Save As" for second place
        assert!(found
            .alternative
            .as_deref()
            .unwrap()
            .starts_with("#1 [Window] \"Save File\""));
    }

    #[tokio::test]
    async fn automation_id_filter_is_absolute() {
        let resolver = ElementResolver::new(&config());
        let mut state = ResolverState::new(8);
        let request = ResolveRequest {
            query: "Save".into(),
            automation_id: Some("btnCancel".into()),
            ..Default::default()
        };
        let out = resolve(&resolver, &mut state, &dialog().handle(), request).await;
        let found = out.found().unwrap();
        assert_eq!(found.info.title, "Cancel");
        assert!(found.alternative.is_none());
    }

    #[tokio::test]
    async fn control_type_filter_with_no_match_is_not_found() {
        let resolver = ElementResolver::new(&config());
        let mut state = ResolverState::new(8);
        let request = ResolveRequest {
            query: "Save".into(),
            control_type: Some("CheckBox".into()),
            ..Default::default()
        };
        let out = resolve(&resolver, &mut state, &dialog().handle(), request).await;
        assert!(matches!(out, ResolveOutcome::NotFound(_)));
    }

    #[tokio::test]
    async fn ties_prefer_shallower_then_earlier() {
        let resolver = ElementResolver::new(&config());
        let mut state = ResolverState::new(8);
        let root = FakeNode::new("Main", "Window");
        let pane = root.push(FakeNode::new("Pane", "Pane"));
        pane.push(FakeNode::new("OK", "Button"));
        root.push(FakeNode::new("OK", "Button"));
        root.push(FakeNode::new("OK", "Button"));
        let out = resolve(&resolver, &mut state, &root.handle(), ResolveRequest::text("OK")).await;
        let found = out.found().unwrap();
        assert_eq!((found.info.depth, found.info.index), (1, 4));
    }

    #[tokio::test]
    async fn empty_query_without_filters_is_not_found() {
        let resolver = ElementResolver::new(&config());
        let mut state = ResolverState::new(8);
        let out = resolve(&resolver, &mut state, &dialog().handle(), ResolveRequest::text("   ")).await;
        let ResolveOutcome::NotFound(f) = out else { panic!("expected not found") };
        assert_eq!(f.reason, "empty query");
        assert!(!f.suggestions.is_empty());
    }

    #[tokio::test]
    async fn garbage_query_is_flagged_weak() {
        let resolver = ElementResolver::new(&config());
        let mut state = ResolverState::new(8);
        let out = resolve(&resolver, &mut state, &dialog().handle(), ResolveRequest::text("qqqqxj")).await;
        let found = out.found().unwrap();
        assert!(found.weak_match);
        assert_eq!(found.info.index, 1);
    }

    #[tokio::test]
    async fn live_token_uses_cached_handle() {
        let resolver = ElementResolver::new(&config());
        let mut state = ResolverState::new(8);
        let root = dialog().handle();
        let out = resolve(&resolver, &mut state, &root, ResolveRequest::text("Save")).await;
        let token = out.found().unwrap().token.clone();
        let stored = out.found().unwrap().info.clone();

        match resolver.resolve_token(&mut state, Some(&root), &token).await {
            TokenOutcome::Valid { info, via, .. } => {
                assert_eq!(via, "cached_handle");
                assert_eq!(info, stored);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn stale_handle_is_relocated_by_hints() {
        let resolver = ElementResolver::new(&config());
        let mut state = ResolverState::new(8);
        let root = FakeNode::new("Main", "Window");
        let old = root.push(FakeNode::with_id("Save", "Button", "btnSave"));
        let out = resolve(&resolver, &mut state, &root.handle(), ResolveRequest::text("Save")).await;
        let token = out.found().unwrap().token.clone();

        old.kill();
        root.remove_child("Save");
        root.push(FakeNode::with_id("Save", "Button", "btnSave"));

        match resolver.resolve_token(&mut state, Some(&root.handle()), &token).await {
            TokenOutcome::Valid { via, handle, .. } => {
                assert_eq!(via, "search_hints");
                assert!(handle.probe().is_ok());
            }
            other => panic!("unexpected {other:?}"),
        }
        let (cached, _) = state.cache.resolve(&token);
        assert!(cached.unwrap().probe().is_ok());
    }

    #[tokio::test]
    async fn renamed_control_is_relocated_by_selector() {
        let resolver = ElementResolver::new(&config());
        let mut state = ResolverState::new(8);
        let root = FakeNode::new("Main", "Window");
        let old = root.push(FakeNode::with_id("File name", "Edit", "15"));
        let out = resolve(&resolver, &mut state, &root.handle(), ResolveRequest::text("file name")).await;
        let token = out.found().unwrap().token.clone();

        old.kill();
        root.remove_child("File name");
        root.push(FakeNode::with_id("File name (required)", "Edit", "15"));

        match resolver.resolve_token(&mut state, Some(&root.handle()), &token).await {
            TokenOutcome::Valid { via, .. } => assert_eq!(via, "selector"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn vanished_control_evicts_token() {
        let resolver = ElementResolver::new(&config());
        let mut state = ResolverState::new(8);
        let root = FakeNode::new("Main", "Window");
        let old = root.push(FakeNode::with_id("Save", "Button", "btnSave"));
        let out = resolve(&resolver, &mut state, &root.handle(), ResolveRequest::text("Save")).await;
        let token = out.found().unwrap().token.clone();

        old.kill();
        root.remove_child("Save");

        match resolver.resolve_token(&mut state, Some(&root.handle()), &token).await {
            TokenOutcome::Evicted { reason, .. } => {
                assert!(reason.contains("search_hints: timed out"));
                assert!(reason.contains("selector: not found"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(!state.cache.contains(&token));
        assert!(matches!(
            resolver.resolve_token(&mut state, Some(&root.handle()), &token).await,
            TokenOutcome::Unknown
        ));
    }

    #[tokio::test]
    async fn ambiguous_relocation_is_a_failure() {
        let resolver = ElementResolver::new(&config());
        let mut state = ResolverState::new(8);
        let root = FakeNode::new("Main", "Window");
        let old = root.push(FakeNode::new("OK", "Button"));
        let out = resolve(&resolver, &mut state, &root.handle(), ResolveRequest::text("OK")).await;
        let token = out.found().unwrap().token.clone();

        old.kill();
        root.remove_child("OK");
        root.push(FakeNode::new("OK", "Button"));
        root.push(FakeNode::new("OK", "Button"));

        match resolver.resolve_token(&mut state, Some(&root.handle()), &token).await {
            TokenOutcome::Evicted { reason, .. } => assert!(reason.contains("ambiguous")),
            other => panic!("unexpected {other:?}"),
        }
    }
}
