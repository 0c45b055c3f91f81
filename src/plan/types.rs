//! 流水线各阶段之间传递的结构化记录
//!
//! Planner / Executor / Verifier 之间只交换这些类型，不传自由文本。

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// 步骤参数中的标量值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Scalar {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Scalar::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Int(i) => Some(*i as f64),
            Scalar::Float(f) => Some(*f),
            Scalar::Text(s) => s.trim().parse().ok(),
            Scalar::Bool(_) => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Scalar::Int(i) => Some(*i),
            Scalar::Float(f) if f.is_finite() => Some(f.round() as i64),
            Scalar::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Scalar::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl From<&str> for Scalar {
    fn from(s: &str) -> Self {
        Scalar::Text(s.to_string())
    }
}

impl From<String> for Scalar {
    fn from(s: String) -> Self {
        Scalar::Text(s)
    }
}

impl From<i64> for Scalar {
    fn from(i: i64) -> Self {
        Scalar::Int(i)
    }
}

impl From<f64> for Scalar {
    fn from(f: f64) -> Self {
        Scalar::Float(f)
    }
}

impl From<bool> for Scalar {
    fn from(b: bool) -> Self {
        Scalar::Bool(b)
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Bool(b) => write!(f, "{}", b),
            Scalar::Int(i) => write!(f, "{}", i),
            Scalar::Float(x) => write!(f, "{}", x),
            Scalar::Text(s) => write!(f, "{}", s),
        }
    }
}

pub type Params = BTreeMap<String, Scalar>;

/// 步骤类型；声明顺序即计划中允许的先后顺序
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    GetWeather,
    SearchVenues,
    GetImages,
    ComposeFinal,
}

impl StepKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::GetWeather => "get_weather",
            StepKind::SearchVenues => "search_venues",
            StepKind::GetImages => "get_images",
            StepKind::ComposeFinal => "compose_final",
        }
    }

    /// 该类型步骤接受的参数名；重试调整时据此判断哪些步骤需要重新派发
    pub fn accepted_params(&self) -> &'static [&'static str] {
        match self {
            StepKind::GetWeather => &["city", "latitude", "longitude", "date_time"],
            StepKind::SearchVenues => &[
                "query",
                "city",
                "latitude",
                "longitude",
                "radius",
                "venue_type",
                "max_results",
            ],
            StepKind::GetImages => &["query", "count"],
            StepKind::ComposeFinal => &["include_backup_plan"],
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 计划中的单个步骤
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    pub kind: StepKind,
    #[serde(default)]
    pub params: Params,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

impl PlanStep {
    pub fn new(kind: StepKind) -> Self {
        Self {
            kind,
            params: Params::new(),
            reasoning: None,
        }
    }

    pub fn param(mut self, key: &str, value: impl Into<Scalar>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }

    pub fn reasoning(mut self, text: impl Into<String>) -> Self {
        self.reasoning = Some(text.into());
        self
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(Scalar::as_str)
    }

    pub fn number(&self, key: &str) -> Option<f64> {
        self.params.get(key).and_then(Scalar::as_f64)
    }

    pub fn integer(&self, key: &str) -> Option<i64> {
        self.params.get(key).and_then(Scalar::as_i64)
    }
}

/// 计划来源：模型生成或确定性回退
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanSource {
    Model,
    Fallback,
}

/// 有序步骤序列；构造后只读（重试时生成调整后的新 Plan）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub plan_id: String,
    pub user_intent: String,
    pub steps: Vec<PlanStep>,
    #[serde(default)]
    pub safety_notes: Vec<String>,
    pub source: PlanSource,
}

impl Plan {
    /// 按建议调整生成新计划，返回新计划与参数发生变化的步骤下标
    pub fn with_adjustments(&self, adjustments: &Params) -> (Plan, Vec<usize>) {
        let mut plan = self.clone();
        let mut changed = Vec::new();
        for (idx, step) in plan.steps.iter_mut().enumerate() {
            let accepted = step.kind.accepted_params();
            let mut touched = false;
            for (key, value) in adjustments {
                if !accepted.contains(&key.as_str()) {
                    continue;
                }
                // 图片查询与场馆查询同名，只放宽场馆搜索
                if key == "query" && step.kind != StepKind::SearchVenues {
                    continue;
                }
                if step.params.get(key) != Some(value) {
                    step.params.insert(key.clone(), value.clone());
                    touched = true;
                }
            }
            if touched {
                changed.push(idx);
            }
        }
        (plan, changed)
    }
}

/// 场馆记录（场馆搜索的载荷元素，实时与 demo 数据同形）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Venue {
    pub name: String,
    pub address: String,
    pub rating: Option<f32>,
    /// 价格档位 0..=4（0 = 免费，4 = 非常昂贵）
    pub price_tier: Option<u8>,
    /// 营业时间描述，如 "Saturday: 11:00 AM – 11:00 PM" 或 "11:00-23:00"
    #[serde(default)]
    pub opening_hours: Vec<String>,
    pub booking_link: Option<String>,
    pub maps_url: Option<String>,
    pub phone: Option<String>,
    /// 场所类别（restaurant / cafe / bar / private_residence ...）
    pub category: String,
    /// 归一化的元数据标签（vegetarian、wheelchair_accessible ...）
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub photos: Vec<String>,
}

/// 天气载荷
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherReport {
    /// 摄氏度
    pub temperature: f64,
    pub feels_like: f64,
    pub condition: String,
    pub description: String,
    pub humidity: u8,
    pub wind_speed: f64,
    /// 降水概率 0..=100
    pub precipitation_probability: f64,
    pub suggestion: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRef {
    pub url: String,
    pub credit: String,
    pub description: Option<String>,
}

/// 步骤载荷：按步骤类型区分
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepPayload {
    Weather(WeatherReport),
    Venues { venues: Vec<Venue> },
    Images { images: Vec<ImageRef> },
    /// compose_final 的标记，只通知编排器开始组装
    ComposeMarker,
}

/// 失败步骤的结构化错误
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepError {
    /// timeout / http / transport / decode / invalid_params
    pub code: String,
    pub message: String,
}

impl StepError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for StepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Success,
    Failed,
}

/// 单步执行结果；Executor 对每个输入步骤恰好产出一条，保持输入顺序
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub index: usize,
    pub kind: StepKind,
    pub status: StepStatus,
    pub payload: Option<StepPayload>,
    pub error: Option<StepError>,
    pub source: String,
    pub duration_ms: u64,
}

impl StepResult {
    pub fn success(index: usize, kind: StepKind, payload: StepPayload, source: &str, duration_ms: u64) -> Self {
        Self {
            index,
            kind,
            status: StepStatus::Success,
            payload: Some(payload),
            error: None,
            source: source.to_string(),
            duration_ms,
        }
    }

    pub fn failed(index: usize, kind: StepKind, error: StepError, source: &str, duration_ms: u64) -> Self {
        Self {
            index,
            kind,
            status: StepStatus::Failed,
            payload: None,
            error: Some(error),
            source: source.to_string(),
            duration_ms,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == StepStatus::Success
    }

    /// 成功的场馆搜索结果中的场馆
    pub fn venues(&self) -> &[Venue] {
        match (&self.status, &self.payload) {
            (StepStatus::Success, Some(StepPayload::Venues { venues })) => venues,
            _ => &[],
        }
    }

    pub fn weather(&self) -> Option<&WeatherReport> {
        match (&self.status, &self.payload) {
            (StepStatus::Success, Some(StepPayload::Weather(w))) => Some(w),
            _ => None,
        }
    }

    pub fn images(&self) -> &[ImageRef] {
        match (&self.status, &self.payload) {
            (StepStatus::Success, Some(StepPayload::Images { images })) => images,
            _ => &[],
        }
    }
}

/// 核验结论
#[derive(Debug, Clone, PartialEq)]
pub struct VerificationOutcome {
    pub approved: bool,
    /// 0.0..=1.0
    pub confidence: f64,
    pub issues: Vec<String>,
    /// 通过时为空
    pub suggested_adjustments: Params,
    /// 通过全部过滤的场馆（已去重），附带备注
    pub survivors: Vec<(Venue, Vec<String>)>,
    /// 去重后的全部候选（降级输出时使用）
    pub candidates: Vec<Venue>,
}

/// 输出中的候选场馆（附带核验备注）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VenueOption {
    pub name: String,
    pub address: String,
    pub rating: Option<f32>,
    pub price_tier: Option<u8>,
    pub opening_hours: Vec<String>,
    pub booking_link: Option<String>,
    pub maps_url: Option<String>,
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEntry {
    /// 时间标签，如 "6:45 PM"
    pub time: String,
    pub activity: String,
    pub location: Option<String>,
    pub duration_minutes: Option<u32>,
}

/// 最终约会计划；每次成功编排只构造一次
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatePlan {
    pub title: String,
    pub city: String,
    pub date_time: String,
    pub budget_estimate: String,
    pub venues: Vec<VenueOption>,
    pub weather_summary: String,
    pub weather: Option<WeatherReport>,
    pub timeline: Vec<TimelineEntry>,
    pub safety_checklist: Vec<String>,
    pub transportation_note: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_plan: Option<String>,
    pub images: Vec<ImageRef>,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Approved,
    Degraded,
}

/// 返回给调用方的信封
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanResponse {
    pub plan_id: String,
    pub status: PlanStatus,
    pub confidence: f64,
    pub issues: Vec<String>,
    /// Executor 被调用的次数（1 或 2）
    pub attempts: u8,
    pub plan_source: PlanSource,
    pub processing_time_ms: u64,
    pub plan: DatePlan,
}

impl PlanResponse {
    pub fn is_degraded(&self) -> bool {
        self.status == PlanStatus::Degraded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_plan() -> Plan {
        Plan {
            plan_id: "p".to_string(),
            user_intent: "test".to_string(),
            steps: vec![
                PlanStep::new(StepKind::GetWeather).param("city", "Pune"),
                PlanStep::new(StepKind::SearchVenues)
                    .param("query", "vegetarian restaurant")
                    .param("radius", 3000i64),
                PlanStep::new(StepKind::GetImages).param("query", "romantic dinner"),
                PlanStep::new(StepKind::ComposeFinal),
            ],
            safety_notes: vec![],
            source: PlanSource::Fallback,
        }
    }

    #[test]
    fn test_step_kind_order_matches_flow() {
        assert!(StepKind::GetWeather < StepKind::SearchVenues);
        assert!(StepKind::SearchVenues < StepKind::GetImages);
        assert!(StepKind::GetImages < StepKind::ComposeFinal);
    }

    #[test]
    fn test_scalar_untagged_parse() {
        let params: Params =
            serde_json::from_str(r#"{"a": true, "b": 3, "c": 2.5, "d": "x"}"#).unwrap();
        assert_eq!(params["a"], Scalar::Bool(true));
        assert_eq!(params["b"], Scalar::Int(3));
        assert_eq!(params["c"], Scalar::Float(2.5));
        assert_eq!(params["d"], Scalar::Text("x".to_string()));
        assert!(serde_json::from_str::<Params>(r#"{"a": [1]}"#).is_err());
    }

    #[test]
    fn test_adjustments_only_touch_venue_search() {
        let plan = sample_plan();
        let mut adj = Params::new();
        adj.insert("radius".to_string(), Scalar::Int(5000));
        adj.insert("query".to_string(), Scalar::Text("restaurant".to_string()));
        adj.insert("price_margin".to_string(), Scalar::Float(0.5));

        let (adjusted, changed) = plan.with_adjustments(&adj);
        assert_eq!(changed, vec![1]);
        assert_eq!(adjusted.steps[1].integer("radius"), Some(5000));
        assert_eq!(adjusted.steps[1].text("query"), Some("restaurant"));
        assert_eq!(adjusted.steps[2].text("query"), Some("romantic dinner"));
        // 原计划不变
        assert_eq!(plan.steps[1].integer("radius"), Some(3000));
    }

    #[test]
    fn test_adjustments_noop_when_equal() {
        let plan = sample_plan();
        let mut adj = Params::new();
        adj.insert("radius".to_string(), Scalar::Int(3000));
        let (_, changed) = plan.with_adjustments(&adj);
        assert!(changed.is_empty());
    }
}
