//! Planner：DateRequest → Plan
//!
//! 拼 prompt（请求、城市坐标、价格档位、回复 JSON Schema）调用 LLM，抽取 JSON 解析为草稿，
//! 补全位置参数后校验计划不变量。模型报错、超时、解析或校验失败都替换为确定性的回退计划，
//! 不向调用方暴露错误。

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;

use crate::core::PlanValidationError;
use crate::llm::{LlmClient, Message};
use crate::plan::schema::step_from_draft;
use crate::plan::{
    lookup_city, parse_date_time, parse_plan_reply, plan_reply_schema_json, price_level_for_budget,
    validate_steps, CityInfo, DateRequest, Plan, PlanSource, PlanStep, RequestedTime, StepKind,
};

const SYSTEM_PROMPT: &str = "You are a date-planning assistant. You never answer in prose: \
you reply with a single JSON object describing which data to fetch, following the given JSON Schema.";

/// 规划上下文：城市坐标、解析后的时间、价格档位
#[derive(Debug, Clone)]
pub struct PlanningContext {
    pub city: Option<CityInfo>,
    pub requested: RequestedTime,
    pub price_level: u8,
}

impl PlanningContext {
    pub fn from_request(request: &DateRequest) -> Self {
        Self {
            city: lookup_city(&request.city),
            requested: parse_date_time(&request.date_time),
            price_level: price_level_for_budget(request.budget_per_person),
        }
    }
}

/// Planner：持有 LLM 与请求超时
pub struct Planner {
    llm: Arc<dyn LlmClient>,
    timeout: Duration,
}

impl Planner {
    pub fn new(llm: Arc<dyn LlmClient>, timeout_secs: u64) -> Self {
        Self {
            llm,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    /// LLM 累计 token 用量：(prompt, completion, total)
    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.llm.token_usage()
    }

    /// 生成计划；任何失败都返回回退计划
    pub async fn plan(&self, request: &DateRequest) -> Plan {
        let plan_id = uuid::Uuid::new_v4().to_string();
        let ctx = PlanningContext::from_request(request);
        match self.plan_with_model(request, &ctx, &plan_id).await {
            Ok(plan) => {
                tracing::info!(
                    plan_id = %plan.plan_id,
                    steps = plan.steps.len(),
                    provider = self.llm.provider(),
                    "plan generated"
                );
                plan
            }
            Err(e) => {
                tracing::warn!(plan_id = %plan_id, error = %e, "planner fallback");
                fallback_plan(request, &ctx, plan_id)
            }
        }
    }

    async fn plan_with_model(
        &self,
        request: &DateRequest,
        ctx: &PlanningContext,
        plan_id: &str,
    ) -> Result<Plan, PlanValidationError> {
        let messages = build_messages(request, ctx);
        let output = match timeout(self.timeout, self.llm.complete(&messages)).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(PlanValidationError::Llm(e.to_string())),
            Err(_) => {
                return Err(PlanValidationError::Llm(format!(
                    "timed out after {}s",
                    self.timeout.as_secs()
                )))
            }
        };
        let (prompt_tokens, completion_tokens, total_tokens) = self.llm.token_usage();
        tracing::info!(
            chars = output.len(),
            prompt_tokens,
            completion_tokens,
            total_tokens,
            "planner reply received"
        );
        parse_plan(&output, request, ctx, plan_id)
    }
}

/// system + user 两条消息
pub fn build_messages(request: &DateRequest, ctx: &PlanningContext) -> Vec<Message> {
    let (coords, country) = match &ctx.city {
        Some(c) => (format!("{}, {}", c.latitude, c.longitude), c.country),
        None => ("unknown (search by city name)".to_string(), "unknown"),
    };
    let dietary = if request.dietary_restrictions.is_empty() {
        "none specified".to_string()
    } else {
        request
            .dietary_restrictions
            .iter()
            .cloned()
            .collect::<Vec<_>>()
            .join(", ")
    };
    let preferences = if request.preferences.trim().is_empty() {
        "casual, nice ambience"
    } else {
        request.preferences.trim()
    };
    let prompt = format!(
        r#"Plan a date. Analyze the request and produce a structured execution plan.

Request:
- City: {city} (country: {country})
- Coordinates: {coords}
- Budget per person: {budget}
- Price level: {price_level}/4
- Date/Time: {date_time} (evening: {evening})
- Preferences: {preferences}
- Dietary restrictions: {dietary}
- Accessibility needs: {accessibility}

Allowed step kinds, in this order:
- get_weather: {{"city": "...", "latitude": number, "longitude": number}}
- search_venues: {{"query": "cuisine, preferences, dietary and accessibility words", "radius": 3000, "venue_type": "restaurant", "max_results": 5}}
- get_images: {{"query": "scene or ambience", "count": 3}}
- compose_final: {{"include_backup_plan": true}}

Rules:
- Always include get_weather, at least one search_venues, get_images, and exactly one compose_final as the last step.
- Provide 1-3 search_venues steps with different queries.
- Parameter values must be strings, numbers or booleans.
- safety_notes should address public venues, timing and transportation.

Reply with ONLY a JSON object matching this JSON Schema:
{schema}"#,
        city = request.city.trim(),
        country = country,
        coords = coords,
        budget = request.budget_per_person,
        price_level = ctx.price_level,
        date_time = request.date_time.trim(),
        evening = ctx.requested.is_evening_or_night(),
        preferences = preferences,
        dietary = dietary,
        accessibility = request.accessibility().unwrap_or("none"),
        schema = plan_reply_schema_json(),
    );
    vec![Message::system(SYSTEM_PROMPT), Message::user(prompt)]
}

/// 解析模型回复 → 补全参数 → 校验
pub fn parse_plan(
    output: &str,
    request: &DateRequest,
    ctx: &PlanningContext,
    plan_id: &str,
) -> Result<Plan, PlanValidationError> {
    let draft = parse_plan_reply(output)?;
    let mut steps = draft
        .steps
        .into_iter()
        .map(step_from_draft)
        .collect::<Result<Vec<_>, _>>()?;
    for step in steps.iter_mut() {
        enrich_step(step, request, ctx);
    }
    validate_steps(&steps)?;
    Ok(Plan {
        plan_id: plan_id.to_string(),
        user_intent: draft
            .user_intent
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| format!("Plan a date in {}", request.city.trim())),
        steps,
        safety_notes: draft
            .safety_notes
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        source: PlanSource::Model,
    })
}

/// 补全位置参数与默认值（已有的参数不覆盖）
fn enrich_step(step: &mut PlanStep, request: &DateRequest, ctx: &PlanningContext) {
    let mut set_default = |key: &str, value: crate::plan::Scalar| {
        step.params.entry(key.to_string()).or_insert(value);
    };
    match step.kind {
        StepKind::GetWeather | StepKind::SearchVenues => {
            set_default("city", request.city.trim().into());
            if let Some(c) = &ctx.city {
                set_default("latitude", c.latitude.into());
                set_default("longitude", c.longitude.into());
            }
        }
        StepKind::GetImages => set_default("count", 3i64.into()),
        StepKind::ComposeFinal => {}
    }
    match step.kind {
        StepKind::GetWeather => set_default("date_time", request.date_time.trim().into()),
        StepKind::SearchVenues => {
            set_default("radius", 3000i64.into());
            set_default("venue_type", "restaurant".into());
            set_default("max_results", 5i64.into());
        }
        _ => {}
    }
}

/// 由偏好、饮食限制与无障碍需求拼成的收窄查询
pub fn narrowed_query(request: &DateRequest) -> String {
    let mut parts: Vec<String> = Vec::new();
    let prefs = request.preferences.trim();
    if !prefs.is_empty() {
        parts.push(prefs.to_string());
    }
    parts.extend(
        request
            .dietary_restrictions
            .iter()
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty()),
    );
    if let Some(a) = request.accessibility() {
        parts.push(a.to_string());
    }
    parts.push("restaurant".to_string());
    parts.join(" ")
}

/// 确定性回退计划：天气 → 宽泛搜索 → 收窄搜索 → 图片 → 组装
pub fn fallback_plan(request: &DateRequest, ctx: &PlanningContext, plan_id: String) -> Plan {
    let city = request.city.trim();
    let located = |step: PlanStep| match &ctx.city {
        Some(c) => step
            .param("city", city)
            .param("latitude", c.latitude)
            .param("longitude", c.longitude),
        None => step.param("city", city),
    };
    let search = |query: String, reasoning: &str| {
        located(PlanStep::new(StepKind::SearchVenues))
            .param("query", query)
            .param("radius", 3000i64)
            .param("venue_type", "restaurant")
            .param("max_results", 5i64)
            .reasoning(reasoning)
    };

    let steps = vec![
        located(PlanStep::new(StepKind::GetWeather))
            .param("date_time", request.date_time.trim())
            .reasoning("Check weather conditions for the date"),
        search("restaurant".to_string(), "Find dining venues nearby"),
        search(
            narrowed_query(request),
            "Find venues matching preferences and restrictions",
        ),
        PlanStep::new(StepKind::GetImages)
            .param("query", format!("romantic dinner {}", city))
            .param("count", 3i64)
            .reasoning("Get inspirational images"),
        PlanStep::new(StepKind::ComposeFinal)
            .param("include_backup_plan", true)
            .reasoning("Compose the final date plan"),
    ];

    Plan {
        plan_id,
        user_intent: format!("Plan a date in {}", city),
        steps,
        safety_notes: vec![
            "Choose a public, well-lit venue".to_string(),
            "Share your location with a trusted contact".to_string(),
            "Arrange your own transportation".to_string(),
        ],
        source: PlanSource::Fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmError, MockLlmClient};

    fn pune_request() -> DateRequest {
        DateRequest::new("Pune", 800.0, "Saturday 7pm")
            .with_dietary("vegetarian")
            .with_accessibility("wheelchair accessible")
    }

    const MODEL_REPLY: &str = r#"```json
{
  "user_intent": "A relaxed vegetarian dinner in Pune",
  "steps": [
    {"action": "get_weather", "params": {"target_datetime": null}, "reasoning": "weather"},
    {"action": "search_venues", "params": {"query": "vegetarian fine dining"}},
    {"action": "get_images", "params": {"query": "candle light dinner"}},
    {"action": "compose_final", "params": {"include_timeline": true}}
  ],
  "estimated_budget": 1600,
  "safety_notes": ["Meet at a public place", " "]
}
```"#;

    #[test]
    fn test_fallback_plan_is_valid() {
        let req = pune_request();
        let ctx = PlanningContext::from_request(&req);
        let plan = fallback_plan(&req, &ctx, "id".to_string());
        assert_eq!(plan.source, PlanSource::Fallback);
        assert!(validate_steps(&plan.steps).is_ok());
        assert_eq!(plan.steps[1].text("query"), Some("restaurant"));
        assert_eq!(
            plan.steps[2].text("query"),
            Some("vegetarian wheelchair accessible restaurant")
        );
        assert_eq!(plan.steps[0].number("latitude"), Some(18.5204));
    }

    #[test]
    fn test_fallback_for_unknown_city_has_no_coordinates() {
        let req = DateRequest::new("Atlantis", 500.0, "Friday 8pm");
        let ctx = PlanningContext::from_request(&req);
        let plan = fallback_plan(&req, &ctx, "id".to_string());
        assert!(plan.steps[1].number("latitude").is_none());
        assert_eq!(plan.steps[1].text("city"), Some("Atlantis"));
        assert!(validate_steps(&plan.steps).is_ok());
    }

    #[test]
    fn test_parse_plan_enriches_location() {
        let req = pune_request();
        let ctx = PlanningContext::from_request(&req);
        let plan = parse_plan(MODEL_REPLY, &req, &ctx, "id").unwrap();
        assert_eq!(plan.source, PlanSource::Model);
        assert_eq!(plan.steps.len(), 4);
        assert_eq!(plan.steps[1].number("longitude"), Some(73.8567));
        assert_eq!(plan.steps[1].integer("radius"), Some(3000));
        assert_eq!(plan.steps[2].integer("count"), Some(3));
        assert_eq!(plan.safety_notes, vec!["Meet at a public place".to_string()]);
    }

    #[test]
    fn test_prompt_contains_schema_and_request() {
        let req = pune_request();
        let ctx = PlanningContext::from_request(&req);
        let messages = build_messages(&req, &ctx);
        assert_eq!(messages.len(), 2);
        let prompt = &messages[1].content;
        assert!(prompt.contains("Pune"));
        assert!(prompt.contains("vegetarian"));
        assert!(prompt.contains("Price level: 2/4"));
        assert!(prompt.contains("\"steps\""));
    }

    #[tokio::test]
    async fn test_model_plan_used_when_valid() {
        let planner = Planner::new(Arc::new(MockLlmClient::with_reply(MODEL_REPLY)), 5);
        let plan = planner.plan(&pune_request()).await;
        assert_eq!(plan.source, PlanSource::Model);
        assert_eq!(plan.user_intent, "A relaxed vegetarian dinner in Pune");
        let (prompt, completion, total) = planner.token_usage();
        assert!(prompt > 0 && completion > 0);
        assert_eq!(total, prompt + completion);
    }

    #[tokio::test]
    async fn test_llm_error_falls_back() {
        let planner = Planner::new(Arc::new(MockLlmClient::failing("quota exceeded")), 5);
        let plan = planner.plan(&pune_request()).await;
        assert_eq!(plan.source, PlanSource::Fallback);
        assert!(validate_steps(&plan.steps).is_ok());
    }

    #[tokio::test]
    async fn test_invalid_model_plan_falls_back() {
        let reply = r#"{"steps": [{"kind": "compose_final"}, {"kind": "search_venues", "params": {"query": "x"}}]}"#;
        let planner = Planner::new(
            Arc::new(MockLlmClient::scripted(vec![Ok(reply.to_string())])),
            5,
        );
        let plan = planner.plan(&pune_request()).await;
        assert_eq!(plan.source, PlanSource::Fallback);
    }

    #[tokio::test]
    async fn test_empty_completion_falls_back() {
        let planner = Planner::new(
            Arc::new(MockLlmClient::scripted(vec![Err(LlmError::EmptyResponse)])),
            5,
        );
        let plan = planner.plan(&pune_request()).await;
        assert_eq!(plan.source, PlanSource::Fallback);
        assert!(!plan.plan_id.is_empty());
    }
}
