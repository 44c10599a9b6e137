//! LLM 客户端抽象
//!
//! 编排核心只把模型当作「提示 -> 原始文本」的不透明函数；Planner 与 LlmDiagnoser 都只依赖这个 trait。

use async_trait::async_trait;

use crate::llm::Message;

/// LLM 客户端 trait
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成；错误以字符串返回，由调用方归类为摄取或诊断失败
    async fn complete(&self, messages: &[Message]) -> Result<String, String>;

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}
