//! 核心编排层：错误类型、流水线状态机、编排器

pub mod error;
pub mod orchestrator;
pub mod state;

pub use error::{PlanValidationError, RequestError, ServiceError};
pub use orchestrator::{create_llm_from_config, Orchestrator};
pub use state::PipelinePhase;
