//! LLM 层：客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock / Scripted）

pub mod deepseek;
pub mod message;
pub mod mock;
pub mod openai;
pub mod traits;

use std::sync::Arc;

pub use deepseek::{create_deepseek_client, DEEPSEEK_CHAT, DEEPSEEK_REASONER};
pub use message::{Message, Role};
pub use mock::{MockLlmClient, ScriptedLlmClient};
pub use openai::{OpenAiClient, TokenUsage};
pub use traits::LlmClient;

use crate::config::AppConfig;

/// 根据配置与环境变量选择 LLM 后端（DeepSeek / OpenAI 兼容 / Mock）
pub fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    let provider = cfg.llm.provider.to_lowercase();
    // 有 DeepSeek Key，或配置为 deepseek 且仅有 OpenAI Key 时也走 DeepSeek 兼容端点
    let use_deepseek = std::env::var("DEEPSEEK_API_KEY").is_ok()
        || (provider == "deepseek" && std::env::var("OPENAI_API_KEY").is_ok());
    let use_openai = std::env::var("OPENAI_API_KEY").is_ok() && provider != "deepseek";

    if use_deepseek {
        let model = cfg
            .llm
            .deepseek
            .model
            .clone()
            .unwrap_or_else(|| cfg.llm.model.clone());
        tracing::info!(model = %model, "Using DeepSeek LLM");
        Arc::new(
            create_deepseek_client(Some(&model))
                .with_temperature(cfg.llm.temperature)
                .with_max_tokens(cfg.llm.max_tokens),
        )
    } else if use_openai {
        let model = cfg
            .llm
            .openai
            .model
            .clone()
            .unwrap_or_else(|| "gpt-4o-mini".to_string());
        tracing::info!(model = %model, "Using OpenAI LLM");
        Arc::new(
            OpenAiClient::new(
                cfg.llm.base_url.as_deref(),
                &model,
                std::env::var("OPENAI_API_KEY").ok().as_deref(),
            )
            .with_temperature(cfg.llm.temperature)
            .with_max_tokens(cfg.llm.max_tokens),
        )
    } else {
        tracing::warn!("No API key set or provider unknown, using Mock LLM");
        Arc::new(MockLlmClient)
    }
}
