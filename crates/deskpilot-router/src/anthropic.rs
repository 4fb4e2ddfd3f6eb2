//! # Anthropic Backend
//!
//! Decisions from the Anthropic Messages API. The model sees the
//! downscaled screenshot and answers with one JSON action in screenshot
//! pixels.

use crate::backend::{BackendSettings, DecisionBackend, DecisionRequest};
use crate::parse::parse_json_decision;
use crate::prompt::{history_summary, json_system_prompt, json_user_prompt};
use crate::{Result, RouterError};
use async_trait::async_trait;
use deskpilot_core::config::BackendConfig;
use deskpilot_core::projector::CoordinateSpace;
use deskpilot_core::Decision;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

const ANTHROPIC_API_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";

/// Anthropic Claude backend
pub struct AnthropicBackend {
    client: Client,
    name: String,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    settings: BackendSettings,
}

impl AnthropicBackend {
    pub fn new(config: &BackendConfig, settings: BackendSettings) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| RouterError::ConfigError("anthropic backend needs an api_key".into()))?;
        let client = Client::builder().timeout(config.timeout()).build()?;

        Ok(Self {
            client,
            name: format!("anthropic:{}", config.model),
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            settings,
        })
    }

    async fn call_api(&self, request: &MessagesRequest) -> Result<String> {
        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_API_VERSION)
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(RouterError::ApiError {
                status,
                message: body.chars().take(300).collect(),
            });
        }

        let body: MessagesResponse = response.json().await?;
        let text = body
            .content
            .into_iter()
            .filter_map(|block| match block {
                ResponseBlock::Text { text } => Some(text),
                ResponseBlock::Other => None,
            })
            .collect::<Vec<_>>()
            .join("\n");

        if text.trim().is_empty() {
            return Err(RouterError::InvalidResponse(
                "Empty response from Anthropic".into(),
            ));
        }
        Ok(text)
    }
}

#[async_trait]
impl DecisionBackend for AnthropicBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn decide(&self, request: &DecisionRequest<'_>) -> Result<Decision> {
        let context = request.context;
        let projector = self
            .settings
            .projector(CoordinateSpace::Absolute, context)?;
        let (image, media_type) = self.settings.encode_image(context)?;

        let system = json_system_prompt(
            projector.screen_size(),
            (context.model_image.width(), context.model_image.height()),
        );
        let summary = history_summary(request.history, self.settings.history_window);
        let user = json_user_prompt(
            request.instruction,
            request.step,
            &summary,
            context.recovery_hint.as_deref(),
        );

        debug!("Anthropic request with model: {}", self.model);
        let body = MessagesRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            system,
            messages: vec![Message {
                role: "user",
                content: vec![
                    ContentBlock::Image {
                        source: ImageSource {
                            kind: "base64",
                            media_type,
                            data: image,
                        },
                    },
                    ContentBlock::Text { text: user },
                ],
            }],
        };

        let text = self.call_api(&body).await?;
        info!(
            "Model response: {}",
            text.chars().take(300).collect::<String>()
        );
        Ok(parse_json_decision(&text, &projector, context.scale))
    }
}

// Anthropic API types

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    system: String,
    messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: &'static str,
    content: Vec<ContentBlock>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Image { source: ImageSource },
    Text { text: String },
}

#[derive(Debug, Serialize)]
struct ImageSource {
    #[serde(rename = "type")]
    kind: &'static str,
    media_type: &'static str,
    data: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ResponseBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseBlock {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}
