//! 编排器：驱动 PLANNING → EXECUTING → VERIFYING → (RETRYING) → DONE 状态机
//!
//! 负责：按配置组装 LLM、三个数据源适配器与 Planner / Executor / Verifier，
//! 并对每个请求跑一遍显式状态机。重试预算至多一次，因此 Executor 每次运行至多被调用两次。

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::config::{AppConfig, PipelineSection};
use crate::core::{PipelinePhase, RequestError};
use crate::llm::{create_gemini_client, LlmClient, MockLlmClient, OpenAiClient, GEMINI_FLASH};
use crate::pipeline::{compose, Executor, Planner, Verifier};
use crate::plan::{
    DateRequest, Params, Plan, PlanResponse, PlanStatus, StepResult, VerificationOutcome,
};
use crate::services::{ImageService, PlacesService, WeatherService};

/// 根据配置选择 LLM 后端（Gemini / OpenAI 兼容 / Mock）；凭据缺失时回退到 Mock
pub fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    let provider = cfg.llm.provider.to_lowercase();
    let api_key = cfg
        .llm
        .api_key
        .as_deref()
        .map(str::trim)
        .filter(|k| !k.is_empty());

    match (provider.as_str(), api_key) {
        ("mock", _) => {
            tracing::info!("Using Mock LLM");
            Arc::new(MockLlmClient::new())
        }
        ("gemini", Some(key)) => {
            let model = if cfg.llm.model.trim().is_empty() {
                GEMINI_FLASH
            } else {
                cfg.llm.model.as_str()
            };
            tracing::info!("Using Gemini LLM ({})", model);
            Arc::new(create_gemini_client(
                cfg.llm.base_url.as_deref(),
                Some(model),
                key,
            ))
        }
        ("openai", Some(key)) => {
            // 默认模型名是 Gemini 的，切到 OpenAI 时换成其默认模型
            let model = if cfg.llm.model.starts_with("gemini") || cfg.llm.model.trim().is_empty() {
                "gpt-4o-mini"
            } else {
                cfg.llm.model.as_str()
            };
            tracing::info!("Using OpenAI LLM ({})", model);
            Arc::new(
                OpenAiClient::new(cfg.llm.base_url.as_deref(), model, Some(key))
                    .with_provider("openai"),
            )
        }
        _ => {
            tracing::warn!(
                provider = %provider,
                "No API key set or provider unknown, using Mock LLM"
            );
            Arc::new(MockLlmClient::new())
        }
    }
}

/// 单次运行的可变状态（只在 run 内部存在，不跨请求共享）
struct RunState {
    phase: PipelinePhase,
    plan: Option<Plan>,
    results: Vec<StepResult>,
    /// 待执行的步骤下标；None 表示完整执行
    pending: Option<Vec<usize>>,
    outcome: Option<VerificationOutcome>,
    price_margin: f64,
    retries_left: u8,
    attempts: u8,
}

pub struct Orchestrator {
    planner: Planner,
    executor: Executor,
    verifier: Verifier,
    max_retries: u8,
    run_timeout: Duration,
}

impl Orchestrator {
    pub fn new(
        planner: Planner,
        executor: Executor,
        verifier: Verifier,
        pipeline: &PipelineSection,
    ) -> Self {
        Self {
            planner,
            executor,
            verifier,
            max_retries: pipeline.max_retries.min(1),
            run_timeout: Duration::from_secs(pipeline.run_timeout_secs),
        }
    }

    /// 组合根：按配置构造适配器（无凭据即 demo 模式）、LLM 与三个阶段
    pub fn from_config(cfg: &AppConfig) -> Self {
        let services = &cfg.services;
        let places = PlacesService::new(&services.places, services.places.demo_mode());
        let weather = WeatherService::new(&services.weather, services.weather.demo_mode());
        let images = ImageService::new(&services.images, services.images.demo_mode());
        tracing::info!(
            places_demo = services.places.demo_mode(),
            weather_demo = services.weather.demo_mode(),
            images_demo = services.images.demo_mode(),
            "data sources configured"
        );

        let executor = Executor::new(
            Arc::new(places),
            Arc::new(weather),
            Arc::new(images),
            cfg.pipeline.step_timeout_secs,
        );
        let planner = Planner::new(create_llm_from_config(cfg), cfg.llm.timeouts.request);
        let verifier = Verifier::new(cfg.verifier.clone());
        Self::new(planner, executor, verifier, &cfg.pipeline)
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    /// 处理一个请求；只有请求格式错误会返回 Err，其余失败都体现在响应的 status / issues 中
    pub async fn run(&self, request: DateRequest) -> Result<PlanResponse, RequestError> {
        request.validate()?;
        let started = Instant::now();
        let deadline = started + self.run_timeout;

        let mut state = RunState {
            phase: PipelinePhase::Planning,
            plan: None,
            results: Vec::new(),
            pending: None,
            outcome: None,
            price_margin: self.verifier.settings().price_margin,
            retries_left: self.max_retries,
            attempts: 0,
        };

        while !state.phase.is_terminal() {
            tracing::debug!(phase = %state.phase, "pipeline phase");
            state.phase = match state.phase {
                PipelinePhase::Planning => {
                    state.plan = Some(self.planner.plan(&request).await);
                    PipelinePhase::Executing
                }
                PipelinePhase::Executing => {
                    if let Some(plan) = &state.plan {
                        self.execute(plan, &mut state.results, state.pending.take(), deadline)
                            .await;
                        state.attempts += 1;
                    }
                    PipelinePhase::Verifying
                }
                PipelinePhase::Verifying => {
                    let outcome =
                        self.verifier
                            .verify_with_margin(&request, &state.results, state.price_margin);
                    let next = PipelinePhase::after_verification(outcome.approved, state.retries_left);
                    state.outcome = Some(outcome);
                    next
                }
                PipelinePhase::Retrying => {
                    state.retries_left = state.retries_left.saturating_sub(1);
                    let adjustments = state
                        .outcome
                        .as_ref()
                        .map(|o| o.suggested_adjustments.clone())
                        .unwrap_or_default();
                    self.prepare_retry(&mut state, &adjustments)
                }
                PipelinePhase::Done => PipelinePhase::Done,
            };
        }

        let (Some(plan), Some(outcome)) = (state.plan, state.outcome) else {
            // 状态机只会在 VERIFYING 之后进入 DONE，两者必然存在
            return Err(RequestError::invalid("request", "pipeline ended without a plan"));
        };

        let date_plan = compose(&request, &plan, &state.results, &outcome, &self.verifier);
        let status = if outcome.approved {
            PlanStatus::Approved
        } else {
            PlanStatus::Degraded
        };
        let processing_time_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            plan_id = %plan.plan_id,
            status = ?status,
            confidence = outcome.confidence,
            attempts = state.attempts,
            llm_tokens = self.planner.token_usage().2,
            processing_time_ms,
            "date plan ready"
        );

        Ok(PlanResponse {
            plan_id: plan.plan_id,
            status,
            confidence: outcome.confidence,
            issues: outcome.issues,
            attempts: state.attempts,
            plan_source: plan.source,
            processing_time_ms,
            plan: date_plan,
        })
    }

    /// 完整执行或只执行待定步骤，子集结果按下标合并回已有结果
    async fn execute(
        &self,
        plan: &Plan,
        results: &mut Vec<StepResult>,
        pending: Option<Vec<usize>>,
        deadline: Instant,
    ) {
        match pending {
            None => *results = self.executor.execute(plan, Some(deadline)).await,
            Some(indices) => {
                let fresh = self
                    .executor
                    .execute_subset(plan, &indices, Some(deadline))
                    .await;
                for result in fresh {
                    match results.iter_mut().find(|r| r.index == result.index) {
                        Some(slot) => *slot = result,
                        None => results.push(result),
                    }
                }
                results.sort_by_key(|r| r.index);
            }
        }
    }

    /// 应用调整建议，算出需要重新派发的步骤；无步骤可重派时直接二次核验
    fn prepare_retry(&self, state: &mut RunState, adjustments: &Params) -> PipelinePhase {
        if let Some(margin) = adjustments.get("price_margin").and_then(|v| v.as_f64()) {
            state.price_margin = margin;
        }
        let retry_failed = adjustments
            .get("retry_failed_steps")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        let Some(plan) = state.plan.as_ref() else {
            return PipelinePhase::Done;
        };
        let (adjusted, mut pending) = plan.with_adjustments(adjustments);
        if retry_failed {
            pending.extend(
                state
                    .results
                    .iter()
                    .filter(|r| !r.is_success())
                    .map(|r| r.index),
            );
        }
        pending.sort_unstable();
        pending.dedup();

        tracing::info!(
            plan_id = %adjusted.plan_id,
            steps = ?pending,
            price_margin = state.price_margin,
            "retrying with adjusted plan"
        );
        state.plan = Some(adjusted);
        if pending.is_empty() {
            PipelinePhase::Verifying
        } else {
            state.pending = Some(pending);
            PipelinePhase::Executing
        }
    }
}
