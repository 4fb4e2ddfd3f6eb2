//! # OpenAI-compatible Backend
//!
//! Chat completions against OpenAI or any server speaking the same API
//! (vLLM, LM Studio). The model answers in Thought/Action/Code sections
//! with restricted script in the code block.

use crate::backend::{BackendSettings, DecisionBackend, DecisionRequest};
use crate::parse::parse_script_decision;
use crate::prompt::{history_summary, script_user_prompt, SCRIPT_SYSTEM_PROMPT};
use crate::{Result, RouterError};
use async_trait::async_trait;
use deskpilot_core::config::BackendConfig;
use deskpilot_core::Decision;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiBackend {
    client: Client,
    name: String,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    max_tokens: u32,
    settings: BackendSettings,
}

impl OpenAiBackend {
    pub fn new(config: &BackendConfig, settings: BackendSettings) -> Result<Self> {
        let client = Client::builder().timeout(config.timeout()).build()?;
        let base = config
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        Ok(Self {
            client,
            name: format!("openai:{}", config.model),
            endpoint: completions_endpoint(&base),
            api_key: config.api_key.clone().filter(|k| !k.is_empty()),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            settings,
        })
    }

    async fn call_api(&self, request: &ChatRequest) -> Result<String> {
        let mut builder = self.client.post(&self.endpoint).json(request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder.send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(RouterError::ApiError {
                status,
                message: body.chars().take(300).collect(),
            });
        }

        let body: ChatResponse = response.json().await?;
        let choice = body
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| RouterError::InvalidResponse("No choices in response".into()))?;

        if let Some(reason) = choice.finish_reason.as_deref() {
            if reason != "stop" {
                return Err(RouterError::InvalidResponse(format!(
                    "Unexpected finish reason: {}",
                    reason
                )));
            }
        }

        choice
            .message
            .content
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| RouterError::InvalidResponse("Empty response content".into()))
    }
}

/// `base` may or may not already end in `/v1`.
fn completions_endpoint(base: &str) -> String {
    let base = base.trim_end_matches('/');
    if base.ends_with("/v1") {
        format!("{}/chat/completions", base)
    } else {
        format!("{}/v1/chat/completions", base)
    }
}

#[async_trait]
impl DecisionBackend for OpenAiBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn decide(&self, request: &DecisionRequest<'_>) -> Result<Decision> {
        let context = request.context;
        let projector = self
            .settings
            .projector(self.settings.projection.coordinate_space, context)?;
        let (image, mime) = self.settings.encode_image(context)?;

        let summary = history_summary(request.history, self.settings.history_window);
        let user = script_user_prompt(
            request.instruction,
            request.step,
            &summary,
            context.recovery_hint.as_deref(),
        );

        debug!("Chat completion request with model: {}", self.model);
        let body = ChatRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: vec![ChatContent::Text {
                        text: SCRIPT_SYSTEM_PROMPT.to_string(),
                    }],
                },
                ChatMessage {
                    role: "user",
                    content: vec![
                        ChatContent::ImageUrl {
                            image_url: ImageUrl {
                                url: format!("data:{};base64,{}", mime, image),
                            },
                        },
                        ChatContent::Text { text: user },
                    ],
                },
            ],
        };

        let text = self.call_api(&body).await?;
        info!(
            "Model response: {}",
            text.chars().take(300).collect::<String>()
        );

        parse_script_decision(&text, &projector, context.scale).map_err(|reason| {
            warn!("Unusable reply from {}: {}", self.name, reason);
            RouterError::InvalidResponse(reason)
        })
    }
}

// Chat completions API types

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: Vec<ChatContent>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ChatContent {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::test_support::{context, settings};
    use deskpilot_core::AgentAction;
    use mockito::Matcher;
    use serde_json::json;

    fn config(url: &str) -> BackendConfig {
        let mut config = BackendConfig::openai("local-vlm", url);
        config.api_key = Some("sk-local".into());
        config
    }

    fn reply(content: &str, finish_reason: &str) -> String {
        json!({
            "choices": [{
                "message": {"role": "assistant", "content": content},
                "finish_reason": finish_reason
            }]
        })
        .to_string()
    }

    #[test]
    fn test_completions_endpoint() {
        assert_eq!(
            completions_endpoint("http://localhost:8000"),
            "http://localhost:8000/v1/chat/completions"
        );
        assert_eq!(
            completions_endpoint("https://api.openai.com/v1/"),
            "https://api.openai.com/v1/chat/completions"
        );
    }

    #[tokio::test]
    async fn test_decide_projects_relative_script() {
        let mut server = mockito::Server::new_async().await;
        let content = "## Thought:\nThe OK button is centered.\n## Action:\nClick OK.\n## Code:\n```python\npyautogui.click(x=0.5, y=0.5)\n```";
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .match_header("authorization", "Bearer sk-local")
            .match_body(Matcher::PartialJson(json!({"model": "local-vlm"})))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(reply(content, "stop"))
            .create_async()
            .await;

        let backend = OpenAiBackend::new(&config(&server.url()), settings()).unwrap();
        let context = context();
        let decision = backend
            .decide(&DecisionRequest {
                instruction: "press ok",
                context: &context,
                history: &[],
                step: 1,
            })
            .await
            .unwrap();

        mock.assert_async().await;
        match decision.action {
            AgentAction::Script { code } => assert!(code.contains("1280"), "{}", code),
            other => panic!("expected script, got {:?}", other),
        }
        assert_eq!(decision.thought.as_deref(), Some("The OK button is centered."));
    }

    #[tokio::test]
    async fn test_truncated_reply_is_invalid() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(200)
            .with_body(reply("## Thought:\nhalf", "length"))
            .create_async()
            .await;

        let backend = OpenAiBackend::new(&config(&server.url()), settings()).unwrap();
        let context = context();
        let result = backend
            .decide(&DecisionRequest {
                instruction: "press ok",
                context: &context,
                history: &[],
                step: 1,
            })
            .await;
        assert!(matches!(result, Err(RouterError::InvalidResponse(_))));
    }

    #[tokio::test]
    async fn test_reply_without_code_is_invalid() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(200)
            .with_body(reply("I am not sure what to do.", "stop"))
            .create_async()
            .await;

        let backend = OpenAiBackend::new(&config(&server.url()), settings()).unwrap();
        let context = context();
        let result = backend
            .decide(&DecisionRequest {
                instruction: "press ok",
                context: &context,
                history: &[],
                step: 1,
            })
            .await;
        assert!(matches!(result, Err(RouterError::InvalidResponse(ref r)) if r.contains("no code blocks")));
    }
}
