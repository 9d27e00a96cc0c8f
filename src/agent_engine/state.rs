use serde::{Deserialize, Serialize};

use crate::llm::types::ToolCall;
use crate::resolver::LocatorCache;

/// Actions the model can request through the built-in tools.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentAction {
    FindElement {
        query: String,
        control_type: Option<String>,
        automation_id: Option<String>,
        #[serde(default)]
        exact: bool,
    },
    Click { target: String },
    DoubleClick { target: String },
    RightClick { target: String },
    TypeText {
        text: String,
        target: Option<String>,
        window: Option<String>,
        #[serde(default)]
        clear_first: bool,
    },
    GetText { target: String },
    Scroll {
        direction: String,
        distance: String,
        target: Option<String>,
    },
    Hotkey { keys: String, window: Option<String> },
    FocusWindow { title: String },
    LocateTarget {
        description: String,
        #[serde(default)]
        coarse: bool,
    },
    FinishTask { summary: String },
}

impl AgentAction {
    pub fn name(&self) -> &'static str {
        match self {
            AgentAction::FindElement { .. } => "find_element",
            AgentAction::Click { .. } => "click",
            AgentAction::DoubleClick { .. } => "double_click",
            AgentAction::RightClick { .. } => "right_click",
            AgentAction::TypeText { .. } => "type_text",
            AgentAction::GetText { .. } => "get_text",
            AgentAction::Scroll { .. } => "scroll",
            AgentAction::Hotkey { .. } => "hotkey",
            AgentAction::FocusWindow { .. } => "focus_window",
            AgentAction::LocateTarget { .. } => "locate_target",
            AgentAction::FinishTask { .. } => "finish_task",
        }
    }

    /// Element the action operates on, if any.
    pub fn target(&self) -> Option<&str> {
        match self {
            AgentAction::Click { target }
            | AgentAction::DoubleClick { target }
            | AgentAction::RightClick { target }
            | AgentAction::GetText { target } => Some(target),
            AgentAction::TypeText { target, .. } | AgentAction::Scroll { target, .. } => {
                target.as_deref()
            }
            _ => None,
        }
    }

    /// Window that must have focus before the action runs, if any.
    pub fn window(&self) -> Option<&str> {
        match self {
            AgentAction::TypeText { window, .. } | AgentAction::Hotkey { window, .. } => {
                window.as_deref()
            }
            AgentAction::FocusWindow { title } => Some(title),
            _ => None,
        }
    }
}

/// How an element target string should be interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetSpec<'a> {
    /// Previously issued locator token.
    Token(&'a str),
    /// `#N` index into the latest snapshot.
    Index(usize),
    /// Free text, matched structurally and then on screen.
    Text(&'a str),
}

impl<'a> TargetSpec<'a> {
    pub fn parse(target: &'a str) -> Self {
        let trimmed = target.trim();
        if LocatorCache::is_token(trimmed) {
            return TargetSpec::Token(trimmed);
        }
        if let Some(n) = trimmed.strip_prefix('#').and_then(|d| d.parse().ok()) {
            return TargetSpec::Index(n);
        }
        TargetSpec::Text(trimmed)
    }
}

fn required(args: &serde_json::Value, key: &str, tool: &str) -> Result<String, String> {
    match args[key].as_str() {
        Some(s) if !s.trim().is_empty() => Ok(s.to_string()),
        _ => Err(format!("{tool}: missing required argument '{key}'")),
    }
}

fn optional(args: &serde_json::Value, key: &str) -> Option<String> {
    args[key]
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

pub fn parse_tool_call_to_action(tc: &ToolCall) -> Result<AgentAction, String> {
    let args: serde_json::Value = serde_json::from_str(&tc.function.arguments)
        .unwrap_or(serde_json::json!({}));
    let tool = tc.function.name.as_str();

    match tool {
        "find_element" => Ok(AgentAction::FindElement {
            query: required(&args, "query", tool)?,
            control_type: optional(&args, "control_type"),
            automation_id: optional(&args, "automation_id"),
            exact: args["exact"].as_bool().unwrap_or(false),
        }),
        "click" => Ok(AgentAction::Click { target: required(&args, "target", tool)? }),
        "double_click" => Ok(AgentAction::DoubleClick { target: required(&args, "target", tool)? }),
        "right_click" => Ok(AgentAction::RightClick { target: required(&args, "target", tool)? }),
        "type_text" => Ok(AgentAction::TypeText {
            text: args["text"].as_str().unwrap_or("").to_string(),
            target: optional(&args, "target"),
            window: optional(&args, "window"),
            clear_first: args["clear_first"].as_bool().unwrap_or(false),
        }),
        "get_text" => Ok(AgentAction::GetText { target: required(&args, "target", tool)? }),
        "scroll" => Ok(AgentAction::Scroll {
            direction: args["direction"].as_str().unwrap_or("down").to_string(),
            distance: args["distance"].as_str().unwrap_or("short").to_string(),
            target: optional(&args, "target"),
        }),
        "hotkey" => Ok(AgentAction::Hotkey {
            keys: required(&args, "keys", tool)?,
            window: optional(&args, "window"),
        }),
        "focus_window" => Ok(AgentAction::FocusWindow { title: required(&args, "title", tool)? }),
        "locate_target" => Ok(AgentAction::LocateTarget {
            description: required(&args, "description", tool)?,
            coarse: args["coarse"].as_bool().unwrap_or(false),
        }),
        "finish_task" => Ok(AgentAction::FinishTask {
            summary: args["summary"].as_str().unwrap_or("").to_string(),
        }),
        other => Err(format!("unknown tool: {other}")),
    }
}
