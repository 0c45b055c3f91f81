//! Executor：按计划步骤调用数据源
//!
//! 每步派发到对应适配器，compose_final 直接产出标记结果。每次调用都包裹在 tokio::time::timeout 内，
//! 超时取「单步超时」与「距整体截止时间剩余」中较小者；失败、非 2xx 与超时都记为失败步骤，
//! 不中断其余步骤。步骤并发执行，结果保持输入顺序；每步输出一行 JSON 审计日志。

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::time::{timeout, Instant};

use crate::core::ServiceError;
use crate::plan::{Plan, PlanStep, StepError, StepKind, StepPayload, StepResult};
use crate::services::{
    ImageQuery, ImageSource, VenueQuery, VenueSource, WeatherQuery, WeatherSource,
};

/// compose_final 标记结果的来源标签
const PIPELINE_SOURCE: &str = "pipeline";

pub struct Executor {
    venues: Arc<dyn VenueSource>,
    weather: Arc<dyn WeatherSource>,
    images: Arc<dyn ImageSource>,
    step_timeout: Duration,
    passes: AtomicUsize,
}

impl Executor {
    pub fn new(
        venues: Arc<dyn VenueSource>,
        weather: Arc<dyn WeatherSource>,
        images: Arc<dyn ImageSource>,
        step_timeout_secs: u64,
    ) -> Self {
        Self {
            venues,
            weather,
            images,
            step_timeout: Duration::from_secs(step_timeout_secs),
            passes: AtomicUsize::new(0),
        }
    }

    pub fn with_step_timeout(mut self, step_timeout: Duration) -> Self {
        self.step_timeout = step_timeout;
        self
    }

    /// 已执行的 execute / execute_subset 次数
    pub fn pass_count(&self) -> usize {
        self.passes.load(Ordering::SeqCst)
    }

    /// 执行全部步骤；返回与输入等长、同序的结果
    pub async fn execute(&self, plan: &Plan, deadline: Option<Instant>) -> Vec<StepResult> {
        let indices: Vec<usize> = (0..plan.steps.len()).collect();
        self.execute_subset(plan, &indices, deadline).await
    }

    /// 只执行指定下标的步骤（重试时使用）；结果按 indices 顺序返回，越界下标忽略
    pub async fn execute_subset(
        &self,
        plan: &Plan,
        indices: &[usize],
        deadline: Option<Instant>,
    ) -> Vec<StepResult> {
        let pass = self.passes.fetch_add(1, Ordering::SeqCst) + 1;
        let futures = indices
            .iter()
            .filter_map(|&i| plan.steps.get(i).map(|step| (i, step)))
            .map(|(i, step)| self.run_step(&plan.plan_id, i, step, deadline));
        let results = join_all(futures).await;
        let failed = results.iter().filter(|r| !r.is_success()).count();
        tracing::info!(
            plan_id = %plan.plan_id,
            pass,
            steps = results.len(),
            failed,
            "executor pass finished"
        );
        results
    }

    async fn run_step(
        &self,
        plan_id: &str,
        index: usize,
        step: &PlanStep,
        deadline: Option<Instant>,
    ) -> StepResult {
        if step.kind == StepKind::ComposeFinal {
            return StepResult::success(index, step.kind, StepPayload::ComposeMarker, PIPELINE_SOURCE, 0);
        }

        let start = Instant::now();
        let budget = match deadline {
            Some(d) => self.step_timeout.min(d.saturating_duration_since(start)),
            None => self.step_timeout,
        };
        let source = self.source_label(step.kind).to_string();

        let result = if budget.is_zero() {
            Err(ServiceError::Timeout(0))
        } else {
            match timeout(budget, self.dispatch(step)).await {
                Ok(r) => r,
                Err(_) => Err(ServiceError::Timeout(budget.as_millis() as u64)),
            }
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        let outcome = match &result {
            Ok(_) => "ok",
            Err(ServiceError::Timeout(_)) => "timeout",
            Err(_) => "error",
        };
        let audit = serde_json::json!({
            "event": "step_audit",
            "plan_id": plan_id,
            "index": index,
            "kind": step.kind.as_str(),
            "source": source,
            "ok": result.is_ok(),
            "outcome": outcome,
            "duration_ms": duration_ms,
        });
        tracing::info!(audit = %audit.to_string(), "step");

        match result {
            Ok(payload) => StepResult::success(index, step.kind, payload, &source, duration_ms),
            Err(e) => {
                tracing::warn!(index, kind = %step.kind, error = %e, "step failed");
                StepResult::failed(index, step.kind, step_error(&e), &source, duration_ms)
            }
        }
    }

    fn source_label(&self, kind: StepKind) -> &str {
        match kind {
            StepKind::GetWeather => self.weather.label(),
            StepKind::SearchVenues => self.venues.label(),
            StepKind::GetImages => self.images.label(),
            StepKind::ComposeFinal => PIPELINE_SOURCE,
        }
    }

    async fn dispatch(&self, step: &PlanStep) -> Result<StepPayload, ServiceError> {
        match step.kind {
            StepKind::GetWeather => {
                let query = WeatherQuery {
                    city: step.text("city").unwrap_or_default().to_string(),
                    latitude: step.number("latitude"),
                    longitude: step.number("longitude"),
                    date_time: step.text("date_time").unwrap_or_default().to_string(),
                };
                if query.city.is_empty() && query.latitude.is_none() {
                    return Err(ServiceError::MissingParam("city"));
                }
                self.weather.forecast(&query).await.map(StepPayload::Weather)
            }
            StepKind::SearchVenues => {
                let query = venue_query(step)?;
                let venues = self.venues.search(&query).await?;
                Ok(StepPayload::Venues { venues })
            }
            StepKind::GetImages => {
                let query = ImageQuery {
                    query: step
                        .text("query")
                        .ok_or(ServiceError::MissingParam("query"))?
                        .to_string(),
                    count: step.integer("count").unwrap_or(3).clamp(1, 10) as usize,
                };
                let images = self.images.search(&query).await?;
                Ok(StepPayload::Images { images })
            }
            StepKind::ComposeFinal => Ok(StepPayload::ComposeMarker),
        }
    }
}

fn venue_query(step: &PlanStep) -> Result<VenueQuery, ServiceError> {
    let query = step
        .text("query")
        .ok_or(ServiceError::MissingParam("query"))?;
    let mut q = VenueQuery::new(query, step.text("city").unwrap_or_default());
    q.latitude = step.number("latitude");
    q.longitude = step.number("longitude");
    if let Some(radius) = step.integer("radius").filter(|r| *r > 0) {
        q.radius_m = radius;
    }
    if let Some(venue_type) = step.text("venue_type").filter(|t| !t.trim().is_empty()) {
        q.venue_type = venue_type.to_string();
    }
    if let Some(max) = step.integer("max_results").filter(|m| *m > 0) {
        q.max_results = max as usize;
    }
    Ok(q)
}

fn step_error(e: &ServiceError) -> StepError {
    let code = match e {
        ServiceError::Timeout(_) => "timeout",
        ServiceError::Http { .. } => "http",
        ServiceError::Transport(_) => "transport",
        ServiceError::Decode(_) => "decode",
        ServiceError::MissingParam(_) => "invalid_params",
    };
    StepError::new(code, e.to_string())
}
