//! 三阶段流水线：Planner → Executor → Verifier（+ compose 组装）

pub mod compose;
pub mod executor;
pub mod planner;
pub mod verifier;

pub use compose::compose;
pub use executor::Executor;
pub use planner::{fallback_plan, Planner, PlanningContext};
pub use verifier::{Verifier, NO_VENUES_FOUND};
