//! One automation session: owns the resolution state and every collaborator, and turns
//! model actions into concrete targets for the dispatch layer.
use std::sync::Arc;

use serde::Serialize;

use crate::accessibility::node::{active_top_level_window, AccessibilityBackend, NodeHandle};
use crate::accessibility::ui_automation::platform_backends;
use crate::agent_engine::state::{AgentAction, TargetSpec};
use crate::config::AppConfig;
use crate::errors::{PinpointError, PinpointResult};
use crate::llm::oracle::{LlmOracle, ReasoningModel};
use crate::llm::registry::ProviderRegistry;
use crate::locator::target_locator::{LocationResult, TargetLocator};
use crate::perception::ocr::{OcrEngine, TesseractOcr};
use crate::perception::pointer::{EnigoPointer, PointerSource};
use crate::perception::screenshot::{PrimaryMonitor, ScreenSource};
use crate::resolver::element_resolver::{
    ElementResolver, ResolveOutcome, ResolveRequest, ResolverState, TokenOutcome,
};
use crate::window::candidate::WindowCandidate;
use crate::window::focus::{FocusOutcome, WindowFocusResolver};
use crate::window::platform::{DesktopPlatform, WindowPlatform};

/// Collaborators a session talks to.
pub struct SessionDeps {
    pub backends: Vec<Arc<dyn AccessibilityBackend>>,
    pub ocr: Option<Arc<dyn OcrEngine>>,
    pub model: Option<Arc<dyn ReasoningModel>>,
    pub screen: Arc<dyn ScreenSource>,
    pub pointer: Arc<dyn PointerSource>,
    pub windows: Arc<dyn WindowPlatform>,
}

impl SessionDeps {
    /// The real desktop, with the model taken from the configured providers.
    pub fn desktop(config: &AppConfig) -> Self {
        let registry = ProviderRegistry::from_config(config);
        let model: Option<Arc<dyn ReasoningModel>> = if registry.is_empty() {
            tracing::info!("no LLM providers configured; model-assisted steps are disabled");
            None
        } else {
            Some(Arc::new(LlmOracle::new(Arc::new(registry))))
        };
        Self {
            backends: platform_backends(),
            ocr: Some(Arc::new(TesseractOcr::new(&config.ocr))),
            model,
            screen: Arc::new(PrimaryMonitor),
            pointer: Arc::new(EnigoPointer),
            windows: Arc::new(DesktopPlatform),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Observation {
    pub backend: Option<String>,
    pub window_title: Option<String>,
    pub element_count: usize,
    pub text: String,
}

impl Observation {
    fn no_active_window(detail: Option<String>) -> Self {
        let text = match detail {
            Some(d) => format!("No active window detected ({d})."),
            None => "No active window detected.".to_string(),
        };
        Self { backend: None, window_title: None, element_count: 0, text }
    }
}

/// Where an action should land.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TargetRef {
    Element {
        token: String,
        label: String,
        #[serde(skip)]
        handle: Option<NodeHandle>,
    },
    Point {
        x: i32,
        y: i32,
        method: String,
        requires_fine_tuning: bool,
    },
}

/// An action with its target resolved and its window focused, ready for dispatch.
#[derive(Debug, Clone, Serialize)]
pub struct PreparedAction {
    pub action: AgentAction,
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<TargetRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub focus: Option<FocusOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PreparedAction {
    fn new(action: &AgentAction) -> Self {
        Self { action: action.clone(), ready: true, target: None, focus: None, error: None }
    }

    fn blocked(mut self, error: impl Into<String>) -> Self {
        self.ready = false;
        self.error = Some(error.into());
        self
    }
}

pub struct AgentSession {
    id: String,
    started_at: chrono::DateTime<chrono::Utc>,
    state: ResolverState,
    backends: Vec<Arc<dyn AccessibilityBackend>>,
    resolver: ElementResolver,
    locator: TargetLocator,
    focus: WindowFocusResolver,
    screen: Arc<dyn ScreenSource>,
    pointer: Arc<dyn PointerSource>,
    use_ocr: bool,
    use_vision: bool,
}

impl AgentSession {
    pub fn new(config: &AppConfig, deps: SessionDeps) -> Self {
        let id = uuid::Uuid::new_v4().to_string();
        tracing::info!(session = %id, backends = deps.backends.len(), "session started");
        Self {
            id,
            started_at: chrono::Utc::now(),
            state: ResolverState::new(config.resolver.cache_capacity),
            backends: deps.backends,
            resolver: ElementResolver::new(&config.resolver),
            locator: TargetLocator::new(&config.locator, deps.ocr, deps.model.clone()),
            focus: WindowFocusResolver::new(&config.focus, deps.windows, deps.model),
            screen: deps.screen,
            pointer: deps.pointer,
            use_ocr: config.locator.use_ocr,
            use_vision: config.locator.use_vision,
        }
    }

    pub fn desktop(config: &AppConfig) -> Self {
        Self::new(config, SessionDeps::desktop(config))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn started_at(&self) -> chrono::DateTime<chrono::Utc> {
        self.started_at
    }

    pub fn state(&self) -> &ResolverState {
        &self.state
    }

    fn active_window(&self) -> Option<(String, NodeHandle)> {
        active_top_level_window(&self.backends)
    }

    /// Snapshots the active window. A missing or broken root yields a textual
    /// "no active window" observation rather than an error.
    pub async fn observe(&mut self) -> Observation {
        let Some((backend, root)) = self.active_window() else {
            self.state.last_snapshot = None;
            return Observation::no_active_window(None);
        };
        match self.resolver.refresh(&mut self.state, &backend, &root).await {
            Ok(snapshot) => Observation {
                backend: Some(snapshot.backend.clone()),
                window_title: Some(snapshot.window_title.clone()),
                element_count: snapshot.len(),
                text: snapshot.render_observation(),
            },
            Err(e) => {
                tracing::warn!(backend = %backend, error = %e, "active window could not be walked");
                self.state.last_snapshot = None;
                Observation::no_active_window(Some(e.to_string()))
            }
        }
    }

    pub async fn find_element(&mut self, request: &ResolveRequest) -> PinpointResult<ResolveOutcome> {
        let active = self.active_window();
        let root = active.as_ref().map(|(backend, node)| (backend.as_str(), node));
        self.resolver.resolve(&mut self.state, root, request).await
    }

    pub async fn resolve_token(&mut self, token: &str) -> TokenOutcome {
        let active = self.active_window();
        self.resolver
            .resolve_token(&mut self.state, active.as_ref().map(|(_, node)| node), token)
            .await
    }

    pub async fn locate(&self, description: &str) -> PinpointResult<LocationResult> {
        let shot = self.screen.capture().await?;
        Ok(self
            .locator
            .find_target(&shot, description, self.use_ocr, self.use_vision)
            .await)
    }

    pub async fn locate_coarse(&self, description: &str) -> PinpointResult<LocationResult> {
        let shot = self.screen.capture().await?;
        Ok(self
            .locator
            .find_target_with_remote_guidance(&shot, description, self.pointer.as_ref())
            .await)
    }

    pub async fn ensure_focus(&self, title: &str) -> FocusOutcome {
        self.focus.focus_window(title).await
    }

    pub async fn list_windows(&self) -> PinpointResult<Vec<WindowCandidate>> {
        self.focus.enumerator().enumerate().await
    }

    /// Resolves the action's window and target. Ordinary failures leave the action
    /// `ready = false` with an explanation; `Err` is reserved for a broken environment.
    pub async fn prepare(&mut self, action: &AgentAction) -> PinpointResult<PreparedAction> {
        let mut prepared = PreparedAction::new(action);
        tracing::debug!(session = %self.id, action = action.name(), "preparing action");

        if let Some(window) = action.window() {
            let outcome = self.ensure_focus(window).await;
            let focused = outcome.success;
            prepared.focus = Some(outcome);
            if !focused {
                return Ok(prepared.blocked(format!("Could not focus window \"{window}\"")));
            }
        }

        match action {
            AgentAction::FindElement { query, control_type, automation_id, exact } => {
                let request = ResolveRequest {
                    query: query.clone(),
                    control_type: control_type.clone(),
                    automation_id: automation_id.clone(),
                    index_filter: None,
                    exact: *exact,
                };
                match self.find_element(&request).await {
                    Ok(ResolveOutcome::Found(r)) => {
                        prepared.target = Some(TargetRef::Element {
                            token: r.token,
                            label: r.info.label(),
                            handle: r.handle,
                        });
                    }
                    Ok(ResolveOutcome::NotFound(f)) => {
                        return Ok(prepared.blocked(with_suggestions(&f.reason, &f.suggestions)));
                    }
                    Err(PinpointError::NoActiveWindow) => {
                        return Ok(prepared.blocked("No active window detected"));
                    }
                    Err(e) => return Err(e),
                }
            }
            AgentAction::LocateTarget { description, coarse } => {
                let result = if *coarse {
                    self.locate_coarse(description).await?
                } else {
                    self.locate(description).await?
                };
                match point_of(&result) {
                    Some(point) => prepared.target = Some(point),
                    None => {
                        let reason = result.error().unwrap_or("target not located").to_string();
                        return Ok(prepared.blocked(reason));
                    }
                }
            }
            _ => {
                if let Some(target) = action.target() {
                    match self.resolve_target(target).await? {
                        Ok(target) => prepared.target = Some(target),
                        Err(reason) => return Ok(prepared.blocked(reason)),
                    }
                }
            }
        }

        tracing::info!(
            session = %self.id,
            action = action.name(),
            resolved = ?prepared.target,
            "action prepared"
        );
        Ok(prepared)
    }

    /// Token, `#N` or free-text target to an element or a screen point. The inner `Err`
    /// explains why nothing was found.
    async fn resolve_target(&mut self, target: &str) -> PinpointResult<Result<TargetRef, String>> {
        match TargetSpec::parse(target) {
            TargetSpec::Token(token) => Ok(match self.resolve_token(token).await {
                TokenOutcome::Valid { info, handle, via } => {
                    tracing::debug!(token, via = %via, "locator token still valid");
                    Ok(TargetRef::Element {
                        token: token.to_string(),
                        label: info.label(),
                        handle: Some(handle),
                    })
                }
                TokenOutcome::Evicted { info, reason } => Err(format!(
                    "Element {} is gone ({reason}); observe again and pick a new target",
                    info.label()
                )),
                TokenOutcome::Unknown => Err(format!("Unknown locator token {token}")),
            }),
            TargetSpec::Index(_) => match self.find_element(&ResolveRequest::text(target)).await {
                Ok(ResolveOutcome::Found(r)) => Ok(Ok(TargetRef::Element {
                    token: r.token,
                    label: r.info.label(),
                    handle: r.handle,
                })),
                Ok(ResolveOutcome::NotFound(f)) => Ok(Err(with_suggestions(&f.reason, &f.suggestions))),
                Err(PinpointError::NoActiveWindow) => Ok(Err("No active window detected".into())),
                Err(e) => Err(e),
            },
            TargetSpec::Text(text) => {
                // A consolation-only winner is usually the window root; the screen does better.
                let structural = match self.find_element(&ResolveRequest::text(text)).await {
                    Ok(ResolveOutcome::Found(r)) if r.weak_match => {
                        format!("only a weak match ({})", r.info.label())
                    }
                    Ok(ResolveOutcome::Found(r)) => {
                        return Ok(Ok(TargetRef::Element {
                            token: r.token,
                            label: r.info.label(),
                            handle: r.handle,
                        }))
                    }
                    Ok(ResolveOutcome::NotFound(f)) => f.reason,
                    Err(PinpointError::NoActiveWindow) => "no active window".to_string(),
                    Err(e) => return Err(e),
                };
                tracing::debug!(description = text, reason = %structural, "structural lookup failed; trying the screen");
                let result = self.locate(text).await?;
                Ok(match point_of(&result) {
                    Some(point) => Ok(point),
                    None => Err(format!(
                        "Could not locate target: {text} ({structural}; {})",
                        result.trace().summary()
                    )),
                })
            }
        }
    }

    /// Clears the locator cache and snapshot.
    pub fn end(&mut self) {
        tracing::info!(
            session = %self.id,
            cached = self.state.cache.len(),
            duration_s = (chrono::Utc::now() - self.started_at).num_seconds(),
            "session ended"
        );
        self.state.clear();
    }
}

fn point_of(result: &LocationResult) -> Option<TargetRef> {
    let (x, y) = result.coordinates().filter(|_| result.success())?;
    Some(TargetRef::Point {
        x,
        y,
        method: result.method().as_str().to_string(),
        requires_fine_tuning: result
            .metadata()
            .get("requires_fine_tuning")
            .and_then(|v| v.as_bool())
            .unwrap_or(false),
    })
}

fn with_suggestions(reason: &str, suggestions: &[String]) -> String {
    if suggestions.is_empty() {
        reason.to_string()
    } else {
        format!("{reason}. Available: {}", suggestions.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use image::RgbaImage;

    use super::*;
    use crate::accessibility::node::fake::{FakeBackend, FakeNode};
    use crate::llm::oracle::fake::ScriptedModel;
    use crate::perception::screenshot::Screenshot;
    use crate::window::platform::fake::FakeDesktop;

    struct BlankScreen;

    #[async_trait]
    impl ScreenSource for BlankScreen {
        async fn capture(&self) -> PinpointResult<Screenshot> {
            Ok(Screenshot::from_image(RgbaImage::new(1000, 800)))
        }
    }

    struct FixedPointer;

    #[async_trait]
    impl PointerSource for FixedPointer {
        async fn position(&self) -> PinpointResult<(i32, i32)> {
            Ok((5, 5))
        }
    }

    fn config() -> AppConfig {
        let mut cfg = AppConfig::default();
        cfg.resolver.lookup_timeout_ms = 20;
        cfg.resolver.lookup_poll_ms = 5;
        cfg.focus.settle_delay_ms = 0;
        cfg
    }

    fn session(
        window: Option<Arc<FakeNode>>,
        model: Option<Arc<ScriptedModel>>,
        desktop: Arc<FakeDesktop>,
    ) -> AgentSession {
        AgentSession::new(
            &config(),
            SessionDeps {
                backends: vec![Arc::new(FakeBackend { name: "uia", window, fail: false })],
                ocr: None,
                model: model.map(|m| m as Arc<dyn ReasoningModel>),
                screen: Arc::new(BlankScreen),
                pointer: Arc::new(FixedPointer),
                windows: desktop,
            },
        )
    }

    fn editor() -> Arc<FakeNode> {
        let root = FakeNode::new("Untitled - Notepad", "Window");
        let bar = root.push(FakeNode::new("Menu", "MenuBar"));
        bar.push(FakeNode::new("File", "MenuItem"));
        root.push(FakeNode::with_id("Text Editor", "Edit", "15"));
        root
    }

    fn no_desktop() -> Arc<FakeDesktop> {
        Arc::new(FakeDesktop::new(&[], None))
    }

    #[tokio::test]
    async fn observation_without_window_is_textual() {
        let mut s = session(None, None, no_desktop());
        let obs = s.observe().await;
        assert_eq!(obs.text, "No active window detected.");
        assert!(obs.window_title.is_none());
        assert!(s.state().last_snapshot.is_none());
    }

    #[tokio::test]
    async fn observe_then_click_by_index() {
        let mut s = session(Some(editor()), None, no_desktop());
        let obs = s.observe().await;
        assert_eq!(obs.element_count, 4);
        assert!(obs.text.contains("#3 [MenuItem] \"File\""));

        let prepared = s.prepare(&AgentAction::Click { target: "#3".into() }).await.unwrap();
        assert!(prepared.ready);
        match prepared.target {
            Some(TargetRef::Element { token, label, .. }) => {
                assert!(token.starts_with("element:"));
                assert_eq!(label, "#3 [MenuItem] \"File\"");
            }
            other => panic!("unexpected target {other:?}"),
        }
    }

    #[tokio::test]
    async fn issued_token_is_reused() {
        let mut s = session(Some(editor()), None, no_desktop());
        let found = s
            .prepare(&AgentAction::FindElement {
                query: "text editor".into(),
                control_type: Some("Edit".into()),
                automation_id: None,
                exact: false,
            })
            .await
            .unwrap();
        let Some(TargetRef::Element { token, .. }) = found.target else {
            panic!("element expected");
        };

        let typed = s
            .prepare(&AgentAction::TypeText {
                text: "hi".into(),
                target: Some(token.clone()),
                window: None,
                clear_first: false,
            })
            .await
            .unwrap();
        assert!(typed.ready);
        assert!(matches!(typed.target, Some(TargetRef::Element { token: ref t, .. }) if *t == token));
    }

    #[tokio::test]
    async fn without_a_tree_text_targets_go_to_the_screen() {
        let model = ScriptedModel::new(vec![r#"{"found": true, "box": [100, 100, 200, 140], "confidence": 0.9}"#]);
        let mut s = session(None, Some(model.clone()), no_desktop());

        let prepared = s.prepare(&AgentAction::Click { target: "the gear icon".into() }).await.unwrap();
        assert!(prepared.ready);
        match prepared.target {
            Some(TargetRef::Point { x, y, method, requires_fine_tuning }) => {
                assert_eq!((x, y), (150, 120));
                assert_eq!(method, "vision_ai");
                assert!(!requires_fine_tuning);
            }
            other => panic!("unexpected target {other:?}"),
        }
        assert_eq!(model.image_calls(), 1);
    }

    #[tokio::test]
    async fn weak_structural_match_defers_to_the_screen() {
        let model = ScriptedModel::new(vec![r#"{"found": true, "box": [100, 200, 140, 240], "confidence": 0.9}"#]);
        let mut s = session(Some(editor()), Some(model.clone()), no_desktop());

        let prepared = s.prepare(&AgentAction::Click { target: "the gear icon".into() }).await.unwrap();
        assert!(prepared.ready);
        match prepared.target {
            Some(TargetRef::Point { x, y, method, .. }) => {
                assert_eq!((x, y), (120, 220));
                assert_eq!(method, "vision_ai");
            }
            other => panic!("unexpected target {other:?}"),
        }
        assert_eq!(model.image_calls(), 1);
    }

    #[tokio::test]
    async fn weak_match_and_screen_miss_explains_both() {
        let model = ScriptedModel::new(vec![r#"{"found": false}"#]);
        let mut s = session(Some(editor()), Some(model), no_desktop());

        let prepared = s.prepare(&AgentAction::Click { target: "the gear icon".into() }).await.unwrap();
        assert!(!prepared.ready);
        let error = prepared.error.unwrap();
        assert!(error.starts_with("Could not locate target: the gear icon (only a weak match (#1 [Window]"));
    }

    #[tokio::test]
    async fn strong_text_match_stays_structural() {
        let model = ScriptedModel::new(vec![]);
        let mut s = session(Some(editor()), Some(model.clone()), no_desktop());

        let prepared = s.prepare(&AgentAction::Click { target: "File".into() }).await.unwrap();
        assert!(matches!(
            prepared.target,
            Some(TargetRef::Element { ref label, .. }) if label == "#3 [MenuItem] \"File\""
        ));
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn index_target_without_tree_is_blocked() {
        let model = ScriptedModel::new(vec![]);
        let mut s = session(None, Some(model.clone()), no_desktop());
        let prepared = s.prepare(&AgentAction::Click { target: "#2".into() }).await.unwrap();
        assert!(!prepared.ready);
        assert_eq!(prepared.error.as_deref(), Some("No active window detected"));
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn hotkey_focuses_its_window_first() {
        let desktop = Arc::new(FakeDesktop::new(
            &[("Untitled - Notepad", "notepad.exe"), ("Terminal", "wt.exe")],
            Some("Terminal"),
        ));
        let mut s = session(None, None, desktop.clone());
        let prepared = s
            .prepare(&AgentAction::Hotkey { keys: "ctrl+s".into(), window: Some("Notepad".into()) })
            .await
            .unwrap();
        assert!(prepared.ready);
        assert_eq!(prepared.focus.map(|f| f.success), Some(true));
        assert_eq!(desktop.focused_titles(), vec!["Untitled - Notepad"]);
    }

    #[tokio::test]
    async fn unfocusable_window_blocks_the_action() {
        let mut s = session(None, None, no_desktop());
        let prepared = s
            .prepare(&AgentAction::TypeText {
                text: "x".into(),
                target: None,
                window: Some("Spreadsheet".into()),
                clear_first: false,
            })
            .await
            .unwrap();
        assert!(!prepared.ready);
        assert_eq!(prepared.error.as_deref(), Some("Could not focus window \"Spreadsheet\""));
    }

    #[tokio::test]
    async fn coarse_locate_flags_fine_tuning() {
        let mut s = session(None, None, no_desktop());
        let prepared = s
            .prepare(&AgentAction::LocateTarget { description: "tray icon".into(), coarse: true })
            .await
            .unwrap();
        match prepared.target {
            Some(TargetRef::Point { x, y, requires_fine_tuning, .. }) => {
                assert_eq!((x, y), (5, 5));
                assert!(requires_fine_tuning);
            }
            other => panic!("unexpected target {other:?}"),
        }
    }

    #[tokio::test]
    async fn ending_the_session_forgets_tokens() {
        let mut s = session(Some(editor()), None, no_desktop());
        s.observe().await;
        let prepared = s.prepare(&AgentAction::Click { target: "#2".into() }).await.unwrap();
        let Some(TargetRef::Element { token, .. }) = prepared.target else {
            panic!("element expected");
        };
        s.end();
        assert!(s.state().cache.is_empty());
        assert!(matches!(s.resolve_token(&token).await, TokenOutcome::Unknown));
    }
}
