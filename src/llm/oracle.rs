//! Opaque "ask the model" interface used for disambiguation and visual localisation.
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use base64::Engine as _;
use regex::Regex;

use crate::errors::PinpointResult;
use crate::llm::registry::{ProviderRegistry, Role};
use crate::llm::types::ChatMessage;

#[async_trait]
pub trait ReasoningModel: Send + Sync {
    /// Free-text reply to `prompt`, optionally looking at a PNG image.
    async fn infer(&self, prompt: &str, image_png: Option<&[u8]>) -> PinpointResult<String>;
}

/// [`ReasoningModel`] backed by the provider registry: text-only prompts go to the
/// routing role, prompts with an image to the vision role.
pub struct LlmOracle {
    registry: Arc<ProviderRegistry>,
}

impl LlmOracle {
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl ReasoningModel for LlmOracle {
    async fn infer(&self, prompt: &str, image_png: Option<&[u8]>) -> PinpointResult<String> {
        let (role, message) = match image_png {
            Some(png) => {
                let b64 = base64::engine::general_purpose::STANDARD.encode(png);
                (Role::Vision, ChatMessage::user_with_image(prompt, &b64))
            }
            None => (Role::Routing, ChatMessage::user_text(prompt)),
        };
        let (provider, cfg) = self.registry.call_config_for_role(role)?;
        tracing::debug!(role = role.as_str(), provider = provider.name(), "asking model");
        provider.complete(&[message], &cfg).await
    }
}

fn first_integer() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(\d+)\b").ok()).as_ref()
}

/// Parses a 1-based selection from a numeric-only reply into a 0-based index.
///
/// The first integer in the reply counts; `0`, out-of-range numbers and replies without a
/// number all mean "no selection".
pub fn parse_selection_index(reply: &str, count: usize) -> Option<usize> {
    let n: usize = first_integer()?.captures(reply)?.get(1)?.as_str().parse().ok()?;
    (1..=count).contains(&n).then(|| n - 1)
}

#[cfg(test)]
pub(crate) mod fake {
    //! Scripted model replies for tests.
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;
    use crate::errors::PinpointError;

    #[derive(Default)]
    pub struct ScriptedModel {
        replies: Mutex<VecDeque<PinpointResult<String>>>,
        pub prompts: Mutex<Vec<(String, bool)>>,
    }

    impl ScriptedModel {
        pub fn new(replies: Vec<&str>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into_iter().map(|r| Ok(r.to_string())).collect()),
                prompts: Mutex::new(Vec::new()),
            })
        }

        /// First call errors like an overloaded provider, later calls get `then`.
        pub fn failing(then: Vec<&str>) -> Arc<Self> {
            let mut replies: VecDeque<PinpointResult<String>> =
                VecDeque::from([Err(PinpointError::LlmProvider("503 Service Unavailable".into()))]);
            replies.extend(then.into_iter().map(|r| Ok(r.to_string())));
            Arc::new(Self {
                replies: Mutex::new(replies),
                prompts: Mutex::new(Vec::new()),
            })
        }

        pub fn calls(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }

        pub fn image_calls(&self) -> usize {
            self.prompts.lock().unwrap().iter().filter(|(_, img)| *img).count()
        }
    }

    #[async_trait]
    impl ReasoningModel for ScriptedModel {
        async fn infer(&self, prompt: &str, image_png: Option<&[u8]>) -> PinpointResult<String> {
            self.prompts
                .lock()
                .unwrap()
                .push((prompt.to_string(), image_png.is_some()));
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(String::new()))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::config::parse_config;
    use crate::llm::provider::LlmProvider;
    use crate::llm::types::{CallConfig, MessageContent};

    /// Records the model name and whether the message carried an image.
    struct EchoProvider {
        seen: Mutex<Vec<(String, bool)>>,
    }

    #[async_trait]
    impl LlmProvider for EchoProvider {
        fn name(&self) -> &str {
            "stub"
        }

        async fn complete(&self, messages: &[ChatMessage], cfg: &CallConfig) -> PinpointResult<String> {
            let has_image = matches!(messages[0].content, MessageContent::Parts(_));
            self.seen.lock().unwrap().push((cfg.model.clone(), has_image));
            Ok("2".into())
        }
    }

    #[tokio::test]
    async fn image_prompts_use_the_vision_role() {
        let config = parse_config(
            r#"
            [llm]
            active_provider = "stub"
            [llm.providers.stub]
            display_name = "Stub"
            api_base = "http://localhost:1/v1/chat/completions"
            model = "text-model"
            [llm.roles.vision]
            provider = "stub"
            model = "vl-model"
            "#,
        )
        .unwrap();
        let mut registry = ProviderRegistry::from_config(&config);
        let provider = Arc::new(EchoProvider { seen: Mutex::new(Vec::new()) });
        registry.register(provider.clone());
        let oracle = LlmOracle::new(Arc::new(registry));

        assert_eq!(oracle.infer("pick one", None).await.unwrap(), "2");
        oracle.infer("where is OK?", Some(&[0x89, b'P', b'N', b'G'])).await.unwrap();
        assert_eq!(
            *provider.seen.lock().unwrap(),
            vec![("text-model".to_string(), false), ("vl-model".to_string(), true)]
        );
    }

    #[test]
    fn selection_is_one_based() {
        assert_eq!(parse_selection_index("3", 5), Some(2));
        assert_eq!(parse_selection_index(" 1\n", 1), Some(0));
    }

    #[test]
    fn first_integer_in_prose_counts() {
        assert_eq!(parse_selection_index("The answer is 4 (or maybe 2)", 5), Some(3));
    }

    #[test]
    fn zero_out_of_range_and_garbage_are_no_selection() {
        assert_eq!(parse_selection_index("0", 5), None);
        assert_eq!(parse_selection_index("6", 5), None);
        assert_eq!(parse_selection_index("none of them", 5), None);
        assert_eq!(parse_selection_index("", 5), None);
        assert_eq!(parse_selection_index("99999999999999999999999", 5), None);
    }
}
