use std::sync::Arc;

use tracing::{debug, warn};

use super::super::domain::StepName;
use super::super::registry::CapabilityRegistry;
use super::super::state::ApplicationState;
use super::advisory::{ProposedDecision, ReasoningAdvisor};
use super::deterministic::DeterministicPolicy;
use super::{Decision, DecisionPolicy};

/// Reason an advisory proposal was discarded. Never surfaced to applicants.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyViolation {
    #[error("proposed step '{0}' is not registered")]
    UnknownStep(String),
    #[error("proposed step '{0}' already has a result")]
    AlreadyCompleted(StepName),
    #[error("proposed step '{0}' is missing required inputs")]
    UnsatisfiedInputs(StepName),
    #[error("proposed step '{0}' has exhausted its retries")]
    RetriesExhausted(StepName),
    #[error("completion proposed before terminal steps succeeded: {0:?}")]
    PrematureCompletion(Vec<StepName>),
    #[error("advisor may not fail an application: {0}")]
    FailureProposed(String),
}

/// Advisory-first policy. A validated proposal wins; anything else falls through to the
/// deterministic order for that call only.
pub struct ReasoningPolicy {
    advisor: Arc<dyn ReasoningAdvisor>,
    registry: Arc<CapabilityRegistry>,
    fallback: DeterministicPolicy,
}

impl ReasoningPolicy {
    pub fn new(advisor: Arc<dyn ReasoningAdvisor>, registry: Arc<CapabilityRegistry>) -> Self {
        let fallback = DeterministicPolicy::new(Arc::clone(&registry));
        Self {
            advisor,
            registry,
            fallback,
        }
    }

    pub fn validate(
        &self,
        proposal: ProposedDecision,
        state: &ApplicationState,
    ) -> Result<Decision, PolicyViolation> {
        match proposal {
            ProposedDecision::RunStep { step, params, .. } => {
                let descriptor = self
                    .registry
                    .resolve(&step)
                    .map_err(|_| PolicyViolation::UnknownStep(step.clone()))?;
                if state.has_result(descriptor.name.as_str()) {
                    return Err(PolicyViolation::AlreadyCompleted(descriptor.name.clone()));
                }
                if !descriptor.is_satisfied_by(state) {
                    return Err(PolicyViolation::UnsatisfiedInputs(descriptor.name.clone()));
                }
                if descriptor.retries_exhausted(state) {
                    return Err(PolicyViolation::RetriesExhausted(descriptor.name.clone()));
                }

                // State-derived inputs take precedence over advisory parameters.
                let mut merged = descriptor.params_from(state);
                for (key, value) in params {
                    merged.entry(key).or_insert(value);
                }
                Ok(Decision::RunStep {
                    step: descriptor.name.clone(),
                    params: merged,
                })
            }
            ProposedDecision::Complete { .. } => {
                let missing = self.registry.unsatisfied_terminal_steps(state);
                if missing.is_empty() {
                    Ok(Decision::Complete)
                } else {
                    Err(PolicyViolation::PrematureCompletion(missing))
                }
            }
            ProposedDecision::NeedsReview { reason } => Ok(Decision::NeedsReview { reason }),
            ProposedDecision::Failed { reason } => Err(PolicyViolation::FailureProposed(reason)),
        }
    }
}

impl DecisionPolicy for ReasoningPolicy {
    fn name(&self) -> &'static str {
        "reasoning"
    }

    fn decide(&self, state: &ApplicationState) -> Decision {
        let application_id = &state.application_id().0;
        match self.advisor.propose(&state.summary()) {
            Ok(proposal) => match self.validate(proposal, state) {
                Ok(decision) => {
                    debug!(%application_id, ?decision, "advisory proposal accepted");
                    decision
                }
                Err(violation) => {
                    warn!(%application_id, %violation, "advisory proposal discarded");
                    self.fallback.decide(state)
                }
            },
            Err(unavailable) => {
                debug!(%application_id, %unavailable, "advisor unavailable, using deterministic order");
                self.fallback.decide(state)
            }
        }
    }
}
