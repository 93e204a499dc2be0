//! Pipeline stage state machine.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stage of a single pipeline attempt.
///
/// Stages advance strictly forward:
/// `Fetching -> Planning -> FanningOut -> Stitching -> Done`.
/// `Failed` is reachable from any non-terminal stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    #[default]
    Fetching,
    Planning,
    FanningOut,
    Stitching,
    Done,
    Failed,
}

/// Rejected stage transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid stage transition: {from} -> {to}")]
pub struct StageTransitionError {
    pub from: PipelineStage,
    pub to: PipelineStage,
}

impl PipelineStage {
    /// Get string representation of the stage.
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Fetching => "fetching",
            PipelineStage::Planning => "planning",
            PipelineStage::FanningOut => "fanning_out",
            PipelineStage::Stitching => "stitching",
            PipelineStage::Done => "done",
            PipelineStage::Failed => "failed",
        }
    }

    /// Check if this is a terminal stage.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineStage::Done | PipelineStage::Failed)
    }

    /// The stage that follows this one on the success path.
    pub fn next(&self) -> Option<PipelineStage> {
        match self {
            PipelineStage::Fetching => Some(PipelineStage::Planning),
            PipelineStage::Planning => Some(PipelineStage::FanningOut),
            PipelineStage::FanningOut => Some(PipelineStage::Stitching),
            PipelineStage::Stitching => Some(PipelineStage::Done),
            PipelineStage::Done | PipelineStage::Failed => None,
        }
    }

    /// Validate a transition from `self` to `to`.
    pub fn transition(self, to: PipelineStage) -> Result<PipelineStage, StageTransitionError> {
        let allowed = match to {
            PipelineStage::Failed => !self.is_terminal(),
            _ => self.next() == Some(to),
        };
        if allowed {
            Ok(to)
        } else {
            Err(StageTransitionError { from: self, to })
        }
    }
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
