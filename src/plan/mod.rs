//! 计划数据模型
//!
//! - **types**: Plan / PlanStep / StepResult / DatePlan 等阶段间记录
//! - **request**: DateRequest 与入口校验
//! - **schema**: 模型回复的 JSON Schema、解析与计划不变量校验
//! - **timing**: 请求时间与营业时间解析
//! - **helpers**: 城市坐标表、预算档位、标签归一化

pub mod helpers;
pub mod request;
pub mod schema;
pub mod timing;
pub mod types;

pub use helpers::{format_amount, lookup_city, normalize_tag, price_level_for_budget, CityInfo};
pub use request::DateRequest;
pub use schema::{extract_json, parse_plan_reply, plan_reply_schema_json, validate_steps};
pub use timing::{check_opening_hours, format_time_label, parse_date_time, HoursCheck, RequestedTime};
pub use types::{
    DatePlan, ImageRef, Params, Plan, PlanResponse, PlanSource, PlanStatus, PlanStep, Scalar,
    StepError, StepKind, StepPayload, StepResult, StepStatus, TimelineEntry, Venue, VenueOption,
    VerificationOutcome, WeatherReport,
};
