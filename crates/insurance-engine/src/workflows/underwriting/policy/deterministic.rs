use std::sync::Arc;

use super::super::registry::CapabilityRegistry;
use super::super::state::ApplicationState;
use super::{Decision, DecisionPolicy};

/// Rule-based policy walking the registry in its fixed dependency order.
#[derive(Clone)]
pub struct DeterministicPolicy {
    registry: Arc<CapabilityRegistry>,
}

impl DeterministicPolicy {
    pub fn new(registry: Arc<CapabilityRegistry>) -> Self {
        Self { registry }
    }
}

impl DecisionPolicy for DeterministicPolicy {
    fn name(&self) -> &'static str {
        "deterministic"
    }

    fn decide(&self, state: &ApplicationState) -> Decision {
        let next = self.registry.steps().find(|descriptor| {
            !state.has_result(descriptor.name.as_str()) && descriptor.is_satisfied_by(state)
        });

        match next {
            Some(descriptor) if descriptor.retries_exhausted(state) => Decision::NeedsReview {
                reason: format!(
                    "step '{}' exceeded its retry ceiling of {}",
                    descriptor.name, descriptor.max_retries
                ),
            },
            Some(descriptor) => Decision::RunStep {
                step: descriptor.name.clone(),
                params: descriptor.params_from(state),
            },
            None => Decision::Complete,
        }
    }
}
