//! 计划 JSON Schema 生成、模型回复解析与计划不变量校验
//!
//! schema_for! 生成的 Schema 会拼进 Planner 的 prompt，约束模型输出；
//! 回复先抽取 JSON 再解析为草稿，草稿再校验为 Plan。解析与校验都返回 Result，
//! 由 Planner 在 Err 分支替换为回退计划。

use std::collections::BTreeMap;

use schemars::{schema_for, JsonSchema};
use serde::Deserialize;

use crate::core::PlanValidationError;
use crate::plan::{Params, PlanStep, Scalar, StepKind};

/// 模型回复的计划草稿（仅用于解析与 Schema 生成）
#[derive(Debug, Deserialize, JsonSchema)]
pub struct PlanDraft {
    /// 一句话概括用户想要的约会
    #[serde(default)]
    pub user_intent: Option<String>,
    /// 有序步骤：get_weather → search_venues（1~3 个）→ get_images → compose_final
    pub steps: Vec<StepDraft>,
    /// 安全提示（公共场所、时间、交通）
    #[serde(default)]
    pub safety_notes: Vec<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct StepDraft {
    #[serde(alias = "action")]
    pub kind: StepKind,
    /// 标量参数；search_venues 需要 query，get_images 需要 query
    #[serde(default)]
    #[schemars(with = "Params")]
    pub params: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub reasoning: Option<String>,
}

/// 返回计划回复的 JSON Schema 字符串，可拼入 prompt
pub fn plan_reply_schema_json() -> String {
    let schema = schema_for!(PlanDraft);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}

/// 从模型输出中抽取 JSON（```json ... ``` 代码块或最外层 {...}）
pub fn extract_json(output: &str) -> Option<&str> {
    let trimmed = output.trim();
    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        return Some(rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim()));
    }
    if let Some(start) = trimmed.find("```") {
        let rest = &trimmed[start + 3..];
        if let Some(end) = rest.find("```") {
            let inner = rest[..end].trim();
            if inner.starts_with('{') {
                return Some(inner);
            }
        }
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    (start < end).then(|| &trimmed[start..=end])
}

/// 解析模型回复为草稿
pub fn parse_plan_reply(output: &str) -> Result<PlanDraft, PlanValidationError> {
    let json = extract_json(output)
        .ok_or_else(|| PlanValidationError::JsonParse("no JSON object in reply".to_string()))?;
    serde_json::from_str(json).map_err(|e| PlanValidationError::JsonParse(e.to_string()))
}

/// 草稿步骤 → PlanStep；null 参数丢弃，数组 / 对象视为格式错误
pub fn step_from_draft(draft: StepDraft) -> Result<PlanStep, PlanValidationError> {
    let mut params = Params::new();
    for (key, value) in draft.params {
        let scalar = match value {
            serde_json::Value::Null => continue,
            serde_json::Value::Bool(b) => Scalar::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Scalar::Int(i),
                None => Scalar::Float(n.as_f64().unwrap_or_default()),
            },
            serde_json::Value::String(s) => Scalar::Text(s),
            other => {
                return Err(PlanValidationError::JsonParse(format!(
                    "param `{}` of {} is not a scalar: {}",
                    key, draft.kind, other
                )))
            }
        };
        params.insert(key, scalar);
    }
    Ok(PlanStep {
        kind: draft.kind,
        params,
        reasoning: draft.reasoning,
    })
}

/// 校验计划不变量：
/// 至少一个 search_venues；恰好一个 compose_final 且位于末尾；
/// 步骤类型按 get_weather → search_venues → get_images → compose_final 非递减；
/// 各类型必需参数存在
pub fn validate_steps(steps: &[PlanStep]) -> Result<(), PlanValidationError> {
    if steps.is_empty() {
        return Err(PlanValidationError::Empty);
    }
    let compose_count = steps
        .iter()
        .filter(|s| s.kind == StepKind::ComposeFinal)
        .count();
    if compose_count != 1 {
        return Err(PlanValidationError::ComposeCount(compose_count));
    }
    if steps.last().map(|s| s.kind) != Some(StepKind::ComposeFinal) {
        return Err(PlanValidationError::ComposeNotLast);
    }
    if !steps.iter().any(|s| s.kind == StepKind::SearchVenues) {
        return Err(PlanValidationError::MissingVenueSearch);
    }
    for (index, pair) in steps.windows(2).enumerate() {
        if pair[1].kind < pair[0].kind {
            return Err(PlanValidationError::OutOfOrder {
                index: index + 1,
                kind: pair[1].kind,
            });
        }
    }
    for (index, step) in steps.iter().enumerate() {
        let required: &[&'static str] = match step.kind {
            StepKind::SearchVenues | StepKind::GetImages => &["query"],
            StepKind::GetWeather | StepKind::ComposeFinal => &[],
        };
        for param in required {
            let present = step
                .text(param)
                .map(|v| !v.trim().is_empty())
                .unwrap_or(false);
            if !present {
                return Err(PlanValidationError::MissingParam {
                    index,
                    kind: step.kind,
                    param,
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(kind: StepKind) -> PlanStep {
        match kind {
            StepKind::SearchVenues | StepKind::GetImages => PlanStep::new(kind).param("query", "x"),
            _ => PlanStep::new(kind),
        }
    }

    #[test]
    fn test_schema_mentions_step_kinds() {
        let schema = plan_reply_schema_json();
        assert!(schema.contains("search_venues"));
        assert!(schema.contains("compose_final"));
        assert!(schema.contains("safety_notes"));
    }

    #[test]
    fn test_extract_json_from_fence() {
        let raw = "Here you go:\n```json\n{\"steps\": []}\n```\nthanks";
        assert_eq!(extract_json(raw), Some("{\"steps\": []}"));
        assert_eq!(extract_json("noise {\"a\": 1} tail"), Some("{\"a\": 1}"));
        assert_eq!(extract_json("no json here"), None);
    }

    #[test]
    fn test_parse_reply_accepts_action_alias_and_nulls() {
        let raw = r#"{
            "user_intent": "veg dinner",
            "steps": [
                {"action": "get_weather", "params": {"target_datetime": null}},
                {"kind": "search_venues", "params": {"query": "veg", "radius": 3000}},
                {"kind": "compose_final", "params": {}}
            ]
        }"#;
        let draft = parse_plan_reply(raw).unwrap();
        let steps: Vec<PlanStep> = draft
            .steps
            .into_iter()
            .map(|s| step_from_draft(s).unwrap())
            .collect();
        assert_eq!(steps[0].kind, StepKind::GetWeather);
        assert!(steps[0].params.is_empty());
        assert_eq!(steps[1].integer("radius"), Some(3000));
        assert!(validate_steps(&steps).is_ok());
    }

    #[test]
    fn test_non_scalar_param_rejected() {
        let raw = r#"{"steps": [{"kind": "search_venues", "params": {"query": ["a", "b"]}}]}"#;
        let draft = parse_plan_reply(raw).unwrap();
        let err = step_from_draft(draft.steps.into_iter().next().unwrap()).unwrap_err();
        assert!(matches!(err, PlanValidationError::JsonParse(_)));
    }

    #[test]
    fn test_unknown_kind_is_parse_error() {
        let raw = r#"{"steps": [{"kind": "book_table", "params": {}}]}"#;
        assert!(matches!(
            parse_plan_reply(raw),
            Err(PlanValidationError::JsonParse(_))
        ));
    }

    #[test]
    fn test_validate_invariants() {
        use StepKind::*;
        assert_eq!(validate_steps(&[]), Err(PlanValidationError::Empty));
        assert_eq!(
            validate_steps(&[step(GetWeather), step(SearchVenues)]),
            Err(PlanValidationError::ComposeCount(0))
        );
        assert_eq!(
            validate_steps(&[step(ComposeFinal), step(SearchVenues), step(ComposeFinal)]),
            Err(PlanValidationError::ComposeCount(2))
        );
        assert_eq!(
            validate_steps(&[step(ComposeFinal), step(SearchVenues)]),
            Err(PlanValidationError::ComposeNotLast)
        );
        assert_eq!(
            validate_steps(&[step(GetWeather), step(ComposeFinal)]),
            Err(PlanValidationError::MissingVenueSearch)
        );
        assert_eq!(
            validate_steps(&[step(SearchVenues), step(GetWeather), step(ComposeFinal)]),
            Err(PlanValidationError::OutOfOrder { index: 1, kind: GetWeather })
        );
        assert!(matches!(
            validate_steps(&[PlanStep::new(SearchVenues), step(ComposeFinal)]),
            Err(PlanValidationError::MissingParam { param: "query", .. })
        ));
        assert!(validate_steps(&[
            step(GetWeather),
            step(SearchVenues),
            step(SearchVenues),
            step(GetImages),
            step(ComposeFinal)
        ])
        .is_ok());
    }
}
