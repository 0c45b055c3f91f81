//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / Gemini / Mock）实现 LlmClient::complete；
//! 超时由调用方（Planner）用 tokio::time::timeout 包裹。

use async_trait::async_trait;
use thiserror::Error;

use super::Message;

/// LLM 调用错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    #[error("request build failed: {0}")]
    Request(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("empty completion")]
    EmptyResponse,
}

/// LLM 客户端 trait：非流式完成
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError>;

    /// 提供方标签，写入日志
    fn provider(&self) -> &str {
        "unknown"
    }

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}
