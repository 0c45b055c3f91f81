//! Gemini 客户端（走 Gemini 的 OpenAI 兼容端点）
//!
//! - Base URL: https://generativelanguage.googleapis.com/v1beta/openai/
//! - 默认模型: gemini-1.5-flash

use super::OpenAiClient;

pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/openai/";
pub const GEMINI_FLASH: &str = "gemini-1.5-flash";

/// 创建 Gemini 客户端；base_url 为 None 时使用官方兼容端点
pub fn create_gemini_client(base_url: Option<&str>, model: Option<&str>, api_key: &str) -> OpenAiClient {
    let model = model.filter(|m| !m.trim().is_empty()).unwrap_or(GEMINI_FLASH);
    let base_url = base_url.filter(|u| !u.trim().is_empty()).unwrap_or(GEMINI_BASE_URL);
    OpenAiClient::new(Some(base_url), model, Some(api_key)).with_provider("gemini")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmClient;

    #[test]
    fn test_defaults() {
        let client = create_gemini_client(None, None, "key");
        assert_eq!(client.model(), GEMINI_FLASH);
        assert_eq!(client.provider(), "gemini");
        let client = create_gemini_client(None, Some("gemini-1.5-pro"), "key");
        assert_eq!(client.model(), "gemini-1.5-pro");
    }
}
