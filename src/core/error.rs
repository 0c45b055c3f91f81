//! 流水线错误类型
//!
//! 只有 RequestError 会暴露给调用方；其余错误都在各阶段内部被吸收：
//! PlanValidationError → 回退计划，ServiceError → 失败步骤，拒绝 → 重试或降级输出。

use thiserror::Error;

use crate::plan::StepKind;

/// 请求格式错误：进入 PLANNING 之前即被拒绝
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RequestError {
    #[error("invalid field `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl RequestError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        RequestError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// 模型输出解析 / 校验失败（Planner 内部处理，替换为回退计划）
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlanValidationError {
    #[error("LLM call failed: {0}")]
    Llm(String),

    #[error("JSON parse error: {0}")]
    JsonParse(String),

    #[error("plan has no steps")]
    Empty,

    #[error("plan has no search_venues step")]
    MissingVenueSearch,

    #[error("plan must contain exactly one compose_final step, found {0}")]
    ComposeCount(usize),

    #[error("compose_final must be the last step")]
    ComposeNotLast,

    #[error("step {index} ({kind}) is out of order")]
    OutOfOrder { index: usize, kind: StepKind },

    #[error("step {index} ({kind}) is missing required param `{param}`")]
    MissingParam {
        index: usize,
        kind: StepKind,
        param: &'static str,
    },
}

/// 单个外部数据源调用失败（记为失败步骤，不中断整次执行）
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ServiceError {
    #[error("request failed: {0}")]
    Transport(String),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("decode error: {0}")]
    Decode(String),

    #[error("timed out after {0} ms")]
    Timeout(u64),

    #[error("missing parameter: {0}")]
    MissingParam(&'static str),
}

impl From<reqwest::Error> for ServiceError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ServiceError::Timeout(0)
        } else if e.is_decode() {
            ServiceError::Decode(e.to_string())
        } else {
            ServiceError::Transport(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_error_message() {
        let err = RequestError::invalid("city", "must not be empty");
        assert_eq!(err.to_string(), "invalid field `city`: must not be empty");
    }

    #[test]
    fn test_validation_error_mentions_step() {
        let err = PlanValidationError::MissingParam {
            index: 2,
            kind: StepKind::SearchVenues,
            param: "query",
        };
        let msg = err.to_string();
        assert!(msg.contains("search_venues"));
        assert!(msg.contains("query"));
    }
}
