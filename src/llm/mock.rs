//! 离线与测试用的 LLM 客户端
//!
//! - [`MockLlmClient`]：无需 API Key，规划请求返回单步 echo 计划，恢复请求返回 skip 指令
//! - [`ScriptedLlmClient`]：按顺序返回预置回复并记录每次收到的消息

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{LlmClient, Message, Role};

/// Mock 客户端：把用户请求回显为一步 echo 计划
#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        let is_recovery = messages
            .iter()
            .any(|m| m.role == Role::System && m.content.contains("\"action\""));
        if is_recovery {
            return Ok(r#"{"action": "skip", "reason": "mock client cannot diagnose"}"#.to_string());
        }

        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");
        let plan = serde_json::json!([{
            "id": 1,
            "description": "Echo the request",
            "capability": "echo",
            "params": {"text": format!("Echo from Mock: {last_user}")},
            "dependencies": []
        }]);
        Ok(plan.to_string())
    }
}

/// 脚本化客户端：依次弹出预置回复，耗尽后返回错误
#[derive(Debug, Default)]
pub struct ScriptedLlmClient {
    replies: Mutex<VecDeque<Result<String, String>>>,
    received: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedLlmClient {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_results(replies.into_iter().map(|r| Ok(r.into())))
    }

    /// 允许在脚本中混入查询失败
    pub fn with_results(replies: impl IntoIterator<Item = Result<String, String>>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            received: Mutex::new(Vec::new()),
        }
    }

    /// 每次调用收到的最后一条 User 消息
    pub fn user_prompts(&self) -> Vec<String> {
        self.received
            .lock()
            .map(|calls| {
                calls
                    .iter()
                    .filter_map(|msgs| msgs.iter().rev().find(|m| m.role == Role::User))
                    .map(|m| m.content.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn calls(&self) -> usize {
        self.received.lock().map(|c| c.len()).unwrap_or_default()
    }

    pub fn remaining(&self) -> usize {
        self.replies.lock().map(|r| r.len()).unwrap_or_default()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        self.received
            .lock()
            .map_err(|e| e.to_string())?
            .push(messages.to_vec());
        self.replies
            .lock()
            .map_err(|e| e.to_string())?
            .pop_front()
            .unwrap_or_else(|| Err("scripted replies exhausted".to_string()))
    }
}
