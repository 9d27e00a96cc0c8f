use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{PinpointError, PinpointResult};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub resolver: ResolverConfig,
    #[serde(default)]
    pub locator: LocatorConfig,
    #[serde(default)]
    pub ocr: OcrConfig,
    #[serde(default)]
    pub focus: FocusConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LlmConfig {
    #[serde(default)]
    pub active_provider: String,
    #[serde(default)]
    pub providers: HashMap<String, ProviderEntry>,
    /// Role-to-model mapping. If a role is absent, falls back to active_provider defaults.
    #[serde(default)]
    pub roles: RolesConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEntry {
    pub display_name: String,
    pub api_base: String,
    /// Default model for this provider (used as fallback when no role config exists).
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    /// Optional API key stored in config.toml (falls back to env var PINPOINT_<ID>_API_KEY).
    #[serde(default)]
    pub api_key: Option<String>,
}

/// Maps agent roles to specific provider+model combinations.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RolesConfig {
    /// Short numeric answers: OCR disambiguation and window selection.
    pub routing: Option<RoleEntry>,
    /// Vision / image-understanding model used for localisation.
    pub vision: Option<RoleEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleEntry {
    /// Must match a key under [llm.providers.*].
    pub provider: String,
    /// Model name sent to the API.
    pub model: String,
    /// Overrides the provider-level temperature for this role.
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
}

fn default_temperature() -> f64 {
    0.1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Deepest level of the control tree that is recorded (root = 0).
    pub max_depth: usize,
    pub cache_capacity: usize,
    pub lookup_timeout_ms: u64,
    pub lookup_poll_ms: u64,
    pub suggestion_limit: usize,
    pub include_handles: bool,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            max_depth: 4,
            cache_capacity: 64,
            lookup_timeout_ms: 10_000,
            lookup_poll_ms: 250,
            suggestion_limit: 5,
            include_handles: true,
        }
    }
}

impl ResolverConfig {
    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.lookup_timeout_ms)
    }

    pub fn lookup_poll(&self) -> Duration {
        Duration::from_millis(self.lookup_poll_ms.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocatorConfig {
    pub use_ocr: bool,
    pub use_vision: bool,
    /// Word results shown to the model during fuzzy OCR disambiguation.
    pub fuzzy_candidate_limit: usize,
    pub default_vision_confidence: f64,
    pub approximate_confidence: f64,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            use_ocr: true,
            use_vision: true,
            fuzzy_candidate_limit: 50,
            default_vision_confidence: 0.8,
            approximate_confidence: 0.7,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    pub command: String,
    pub lang: String,
    /// Tesseract confidence floor, 0–100.
    pub min_confidence: f64,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            command: "tesseract".into(),
            lang: "eng".into(),
            min_confidence: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FocusConfig {
    pub settle_delay_ms: u64,
    pub allow_ai: bool,
    pub close_match_cutoff: f64,
    pub ai_candidate_limit: usize,
    /// Extra colloquial name → executable entries, merged over the built-in table.
    pub process_aliases: HashMap<String, String>,
}

impl Default for FocusConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: 400,
            allow_ai: true,
            close_match_cutoff: 0.82,
            ai_candidate_limit: 20,
            process_aliases: HashMap::new(),
        }
    }
}

impl FocusConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

fn resolve_config_path() -> PinpointResult<PathBuf> {
    if let Ok(exe) = std::env::current_exe() {
        if let Some(parent) = exe.parent() {
            let candidate = parent.join("config.toml");
            if candidate.exists() {
                tracing::debug!(path = %candidate.display(), "config found next to executable");
                return Ok(candidate);
            }
        }
    }

    let cwd = std::env::current_dir()?;
    let candidate = cwd.join("config.toml");
    if candidate.exists() {
        tracing::debug!(path = %candidate.display(), "config found in working directory");
        return Ok(candidate);
    }

    if let Some(dir) = dirs::config_dir() {
        let candidate = dir.join("pinpoint").join("config.toml");
        if candidate.exists() {
            tracing::debug!(path = %candidate.display(), "config found in user config dir");
            return Ok(candidate);
        }
    }

    Err(PinpointError::Config(
        "config.toml not found next to executable, in working directory or user config dir".into(),
    ))
}

pub fn parse_config(content: &str) -> PinpointResult<AppConfig> {
    Ok(toml::from_str(content)?)
}

pub fn load_config() -> PinpointResult<AppConfig> {
    let path = resolve_config_path()?;
    let content = std::fs::read_to_string(&path)?;
    let config = parse_config(&content)?;
    tracing::info!(path = %path.display(), provider = %config.llm.active_provider, "config loaded");
    Ok(config)
}

/// Where a fresh config file is written: `<user config dir>/pinpoint/config.toml`.
pub fn user_config_path() -> PinpointResult<PathBuf> {
    dirs::config_dir()
        .map(|dir| dir.join("pinpoint").join("config.toml"))
        .ok_or_else(|| PinpointError::Config("no user config directory on this system".into()))
}

pub fn save_config(config: &AppConfig, path: &Path) -> PinpointResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    tracing::info!(path = %path.display(), "config saved");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let cfg = parse_config("").unwrap();
        assert_eq!(cfg.resolver.max_depth, 4);
        assert_eq!(cfg.resolver.cache_capacity, 64);
        assert_eq!(cfg.resolver.lookup_timeout(), Duration::from_secs(10));
        assert_eq!(cfg.locator.fuzzy_candidate_limit, 50);
        assert!((cfg.focus.close_match_cutoff - 0.82).abs() < f64::EPSILON);
        assert_eq!(cfg.ocr.command, "tesseract");
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let cfg = parse_config(
            r#"
            [resolver]
            cache_capacity = 8

            [focus]
            allow_ai = false
            [focus.process_aliases]
            editor = "code.exe"

            [llm]
            active_provider = "local"
            [llm.providers.local]
            display_name = "Local"
            api_base = "http://localhost:8080/v1/chat/completions"
            model = "qwen2-vl"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.resolver.cache_capacity, 8);
        assert_eq!(cfg.resolver.max_depth, 4);
        assert!(!cfg.focus.allow_ai);
        assert_eq!(cfg.focus.process_aliases.get("editor").map(String::as_str), Some("code.exe"));
        let local = &cfg.llm.providers["local"];
        assert!((local.temperature - 0.1).abs() < f64::EPSILON);
    }

    #[test]
    fn config_round_trips_through_toml() {
        let cfg = AppConfig::default();
        let text = toml::to_string_pretty(&cfg).unwrap();
        let back = parse_config(&text).unwrap();
        assert_eq!(back.resolver.suggestion_limit, cfg.resolver.suggestion_limit);
    }

    #[test]
    fn saved_config_loads_back() {
        let dir = std::env::temp_dir().join(format!("pinpoint-cfg-{}", uuid::Uuid::new_v4()));
        let path = dir.join("nested").join("config.toml");
        let mut cfg = AppConfig::default();
        cfg.focus.settle_delay_ms = 50;
        save_config(&cfg, &path).unwrap();
        let back = parse_config(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(back.focus.settle_delay(), Duration::from_millis(50));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
