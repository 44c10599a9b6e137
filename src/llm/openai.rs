//! OpenAI 兼容 API 客户端
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url）；DeepSeek、OpenAI、自建代理均可。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequestArgs,
};
use async_openai::Client;
use async_trait::async_trait;

use crate::llm::{LlmClient, Message, Role};

/// Token 使用统计（累计值）
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: Arc<AtomicU64>,
    pub completion_tokens: Arc<AtomicU64>,
    pub total_tokens: Arc<AtomicU64>,
}

impl TokenUsage {
    pub fn add(&self, prompt: u64, completion: u64) {
        self.prompt_tokens.fetch_add(prompt, Ordering::Relaxed);
        self.completion_tokens.fetch_add(completion, Ordering::Relaxed);
        self.total_tokens.fetch_add(prompt + completion, Ordering::Relaxed);
    }

    pub fn get(&self) -> (u64, u64, u64) {
        (
            self.prompt_tokens.load(Ordering::Relaxed),
            self.completion_tokens.load(Ordering::Relaxed),
            self.total_tokens.load(Ordering::Relaxed),
        )
    }
}

/// OpenAI 兼容客户端
pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    model: String,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    pub usage: TokenUsage,
}

impl OpenAiClient {
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_else(|| "sk-placeholder".to_string());

        let config = match base_url {
            Some(url) => OpenAIConfig::new().with_api_base(url).with_api_key(api_key),
            None => OpenAIConfig::new().with_api_key(api_key),
        };

        Self {
            client: Client::with_config(config),
            model: model.to_string(),
            temperature: None,
            max_tokens: None,
            usage: TokenUsage::default(),
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    fn to_openai_messages(
        messages: &[Message],
    ) -> Result<Vec<ChatCompletionRequestMessage>, String> {
        messages
            .iter()
            .map(|m| {
                let content = m.content.clone();
                let msg = match m.role {
                    Role::System => ChatCompletionRequestMessage::System(
                        ChatCompletionRequestSystemMessageArgs::default()
                            .content(content)
                            .build()
                            .map_err(|e| e.to_string())?,
                    ),
                    Role::User => ChatCompletionRequestMessage::User(
                        ChatCompletionRequestUserMessageArgs::default()
                            .content(content)
                            .build()
                            .map_err(|e| e.to_string())?,
                    ),
                    Role::Assistant => ChatCompletionRequestMessage::Assistant(
                        ChatCompletionRequestAssistantMessageArgs::default()
                            .content(content)
                            .build()
                            .map_err(|e| e.to_string())?,
                    ),
                };
                Ok(msg)
            })
            .collect()
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }

    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(&self.model)
            .messages(Self::to_openai_messages(messages)?);
        if let Some(t) = self.temperature {
            args.temperature(t);
        }
        if let Some(n) = self.max_tokens {
            args.max_completion_tokens(n);
        }
        let request = args.build().map_err(|e| e.to_string())?;

        let started = std::time::Instant::now();
        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| e.to_string())?;

        if let Some(usage) = &response.usage {
            self.usage
                .add(usage.prompt_tokens as u64, usage.completion_tokens as u64);
        }
        tracing::debug!(
            model = %self.model,
            duration_ms = started.elapsed().as_millis() as u64,
            "llm completion"
        );

        Ok(response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default())
    }
}
