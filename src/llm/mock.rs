//! Mock LLM 客户端（用于测试与无 key 的本地运行，无需 API）
//!
//! 按顺序回放预设回复；回复用尽后重复最后一条。`failing()` 构造始终报错的客户端。
//! token 用量按每 4 个字符约 1 个 token 估算。

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{LlmClient, LlmError, Message, TokenUsage};

#[derive(Debug, Default)]
pub struct MockLlmClient {
    replies: Mutex<Vec<Result<String, LlmError>>>,
    calls: AtomicUsize,
    usage: TokenUsage,
}

impl MockLlmClient {
    /// 无预设回复：返回无法解析的文本（Planner 会走回退计划）
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reply(reply: impl Into<String>) -> Self {
        Self::scripted(vec![Ok(reply.into())])
    }

    pub fn scripted(replies: Vec<Result<String, LlmError>>) -> Self {
        Self {
            replies: Mutex::new(replies),
            calls: AtomicUsize::new(0),
            usage: TokenUsage::default(),
        }
    }

    /// 始终返回错误
    pub fn failing(reason: &str) -> Self {
        Self::scripted(vec![Err(LlmError::Api(reason.to_string()))])
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    fn provider(&self) -> &str {
        "mock"
    }

    fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }

    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        let replies = self
            .replies
            .lock()
            .map_err(|e| LlmError::Api(format!("mock poisoned: {}", e)))?;
        let reply = match replies.get(n).or_else(|| replies.last()) {
            Some(reply) => reply.clone(),
            None => Ok(format!(
                "Mock planner has no scripted reply ({} messages received)",
                messages.len()
            )),
        };
        if let Ok(text) = &reply {
            let prompt_chars: usize = messages.iter().map(|m| m.content.chars().count()).sum();
            self.usage.add(
                estimate_tokens(prompt_chars),
                estimate_tokens(text.chars().count()),
            );
        }
        reply
    }
}

fn estimate_tokens(chars: usize) -> u64 {
    chars.div_ceil(4) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_usage_counts_successful_replies_only() {
        let mock = MockLlmClient::scripted(vec![Ok("abcdefgh".into()), Err(LlmError::EmptyResponse)]);
        mock.complete(&[Message::user("12345678")]).await.unwrap();
        assert_eq!(mock.token_usage(), (2, 2, 4));
        assert!(mock.complete(&[Message::user("x")]).await.is_err());
        assert_eq!(mock.token_usage(), (2, 2, 4));
    }

    #[tokio::test]
    async fn test_scripted_replies_then_repeat_last() {
        let mock = MockLlmClient::scripted(vec![Ok("a".into()), Ok("b".into())]);
        let msgs = [Message::user("hi")];
        assert_eq!(mock.complete(&msgs).await.unwrap(), "a");
        assert_eq!(mock.complete(&msgs).await.unwrap(), "b");
        assert_eq!(mock.complete(&msgs).await.unwrap(), "b");
        assert_eq!(mock.call_count(), 3);
    }

    #[tokio::test]
    async fn test_failing_mock() {
        let mock = MockLlmClient::failing("down");
        let err = mock.complete(&[Message::user("hi")]).await.unwrap_err();
        assert_eq!(err, LlmError::Api("down".to_string()));
    }

    #[tokio::test]
    async fn test_default_reply_is_not_json() {
        let mock = MockLlmClient::new();
        let reply = mock.complete(&[Message::user("hi")]).await.unwrap();
        assert!(!reply.contains('{'));
    }
}
