//! dateplan - Rust 约会规划智能体
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型、流水线状态机、编排器
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / Gemini / Mock）
//! - **observability**: tracing 初始化
//! - **pipeline**: Planner、Executor、Verifier 与最终组装
//! - **plan**: 阶段间传递的数据模型与计划校验
//! - **services**: 场馆 / 天气 / 图片数据源适配器（含 demo 模式）

pub mod config;
pub mod core;
pub mod llm;
pub mod observability;
pub mod pipeline;
pub mod plan;
pub mod services;

pub use crate::core::{Orchestrator, RequestError};
pub use crate::plan::{DatePlan, DateRequest, PlanResponse, PlanStatus};
