mod advisory;
mod deterministic;
mod reasoning;

pub use advisory::{
    parse_proposal, render_prompt, AdvisoryUnavailable, CompletionAdvisor, CompletionClient,
    NoAdvisor, ProposedDecision, ReasoningAdvisor, StepOverview, ABORT_ACTION, FINISH_ACTION,
    REVIEW_ACTION,
};
pub use deterministic::DeterministicPolicy;
pub use reasoning::{PolicyViolation, ReasoningPolicy};

use serde::Serialize;

use super::domain::{StepName, StepParams};
use super::state::ApplicationState;

/// Output of a policy invocation. A closed set: policies cannot return free-form actions.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    RunStep { step: StepName, params: StepParams },
    Complete,
    NeedsReview { reason: String },
    Failed { reason: String },
}

impl Decision {
    pub fn step(&self) -> Option<&StepName> {
        match self {
            Decision::RunStep { step, .. } => Some(step),
            _ => None,
        }
    }
}

/// Strategy selecting the next step, or a terminal outcome, from the current state.
pub trait DecisionPolicy: Send + Sync {
    fn name(&self) -> &'static str;

    fn decide(&self, state: &ApplicationState) -> Decision;
}
