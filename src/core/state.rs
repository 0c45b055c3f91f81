//! 流水线状态机
//!
//! PLANNING → EXECUTING → VERIFYING → {DONE, RETRYING → EXECUTING → VERIFYING → DONE}。
//! 重试预算用尽后 VERIFYING 总是进入 DONE，因此每次运行 Executor 至多被调用两次。

use std::fmt;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelinePhase {
    Planning,
    Executing,
    Verifying,
    Retrying,
    Done,
}

impl PipelinePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelinePhase::Planning => "planning",
            PipelinePhase::Executing => "executing",
            PipelinePhase::Verifying => "verifying",
            PipelinePhase::Retrying => "retrying",
            PipelinePhase::Done => "done",
        }
    }

    /// 核验之后的去向：通过或重试预算用尽 → Done，否则 Retrying
    pub fn after_verification(approved: bool, retries_left: u8) -> Self {
        if approved || retries_left == 0 {
            PipelinePhase::Done
        } else {
            PipelinePhase::Retrying
        }
    }

    pub fn is_terminal(&self) -> bool {
        *self == PipelinePhase::Done
    }
}

impl fmt::Display for PipelinePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_after_verification() {
        assert_eq!(PipelinePhase::after_verification(true, 1), PipelinePhase::Done);
        assert_eq!(PipelinePhase::after_verification(false, 1), PipelinePhase::Retrying);
        assert_eq!(PipelinePhase::after_verification(false, 0), PipelinePhase::Done);
        assert!(PipelinePhase::Done.is_terminal());
        assert!(!PipelinePhase::Retrying.is_terminal());
    }
}
