use std::sync::Arc;

use tracing::{error, info, warn};

use super::bus::{BusEvent, MessageBus};
use super::domain::{ApplicationStatus, StepName, StepParams};
use super::policy::{Decision, DecisionPolicy};
use super::registry::{CapabilityRegistry, Outcome, RegistryError};
use super::report::ApplicationReport;
use super::state::{ApplicationState, StateError};

/// Cooperative cancellation, checked at the top of every loop iteration.
pub use tokio_util::sync::CancellationToken;

/// Default bound on decide/invoke iterations for a single application.
pub const DEFAULT_MAX_ITERATIONS: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorSettings {
    pub max_iterations: usize,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }
}

/// Defects that abort a run. The application is forced to `FAILED` when one surfaces.
#[derive(Debug, thiserror::Error)]
pub enum OrchestrationError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    State(#[from] StateError),
}

/// Control loop driving one application at a time to a terminal status.
pub struct Orchestrator {
    registry: Arc<CapabilityRegistry>,
    policy: Arc<dyn DecisionPolicy>,
    bus: Arc<MessageBus>,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<CapabilityRegistry>,
        policy: Arc<dyn DecisionPolicy>,
        bus: Arc<MessageBus>,
        mut settings: OrchestratorSettings,
    ) -> Self {
        let budget = registry.iteration_budget();
        if settings.max_iterations < budget {
            warn!(
                configured = settings.max_iterations,
                budget, "iteration ceiling raised to cover every step's retry allowance"
            );
            settings.max_iterations = budget;
        }
        Self {
            registry,
            policy,
            bus,
            settings,
        }
    }

    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }

    pub fn settings(&self) -> OrchestratorSettings {
        self.settings
    }

    /// Drive `state` until it reaches a terminal status and return that status.
    pub fn run(
        &self,
        state: &mut ApplicationState,
        cancellation: &CancellationToken,
    ) -> ApplicationStatus {
        if state.status().is_terminal() {
            return state.status();
        }

        let application_id = state.application_id().clone();
        info!(%application_id, policy = self.policy.name(), "processing application");
        self.bus.publish(
            &application_id,
            BusEvent::StatusUpdate {
                status: ApplicationStatus::InProgress,
                detail: format!("processing started with the {} policy", self.policy.name()),
            },
        );

        let mut iterations = 0;
        while !state.status().is_terminal() {
            if cancellation.is_cancelled() {
                self.settle(state, ApplicationStatus::Failed, "application cancelled");
                break;
            }
            if iterations >= self.settings.max_iterations {
                warn!(%application_id, iterations, "iteration ceiling reached");
                let reason = format!(
                    "iteration ceiling of {} reached without settling",
                    self.settings.max_iterations
                );
                self.settle(state, ApplicationStatus::Failed, reason);
                break;
            }
            iterations += 1;

            if let Err(defect) = self.iterate(state) {
                error!(%application_id, %defect, "orchestration defect");
                self.bus.publish(
                    &application_id,
                    BusEvent::Error {
                        step: None,
                        reason: defect.to_string(),
                        retryable: false,
                    },
                );
                self.settle(
                    state,
                    ApplicationStatus::Failed,
                    format!("orchestration defect: {defect}"),
                );
            }
        }

        state.status()
    }

    fn iterate(&self, state: &mut ApplicationState) -> Result<(), OrchestrationError> {
        match self.policy.decide(state) {
            Decision::Complete => {
                let missing = self.registry.unsatisfied_terminal_steps(state);
                if missing.is_empty() {
                    self.settle(
                        state,
                        ApplicationStatus::Completed,
                        "all terminal steps succeeded",
                    );
                } else {
                    let missing: Vec<&str> = missing.iter().map(StepName::as_str).collect();
                    self.settle(
                        state,
                        ApplicationStatus::NeedsReview,
                        format!(
                            "completion declared before terminal steps succeeded: {}",
                            missing.join(", ")
                        ),
                    );
                }
                Ok(())
            }
            Decision::NeedsReview { reason } => {
                self.settle(state, ApplicationStatus::NeedsReview, reason);
                Ok(())
            }
            Decision::Failed { reason } => {
                self.settle(state, ApplicationStatus::Failed, reason);
                Ok(())
            }
            Decision::RunStep { step, params } => self.run_step(state, step, params),
        }
    }

    fn run_step(
        &self,
        state: &mut ApplicationState,
        step: StepName,
        params: StepParams,
    ) -> Result<(), OrchestrationError> {
        let max_retries = self.registry.resolve(step.as_str())?.max_retries;
        if state.has_result(step.as_str()) {
            return Err(StateError::DuplicateStep(step).into());
        }

        let application_id = state.application_id().clone();
        self.bus.publish(
            &application_id,
            BusEvent::StepRequest {
                step: step.clone(),
                attempt: state.retry_count(step.as_str()) + 1,
            },
        );

        let outcome = self.registry.invoke(step.as_str(), state, &params)?;
        state.record_attempt(&step, outcome.attempt_outcome())?;

        match outcome {
            Outcome::Success(payload) => {
                let success = payload.success;
                state.record_result(step.clone(), payload)?;
                self.bus.publish(
                    &application_id,
                    BusEvent::StepResult {
                        step: step.clone(),
                        success,
                    },
                );
                self.bus.publish(
                    &application_id,
                    BusEvent::StatusUpdate {
                        status: ApplicationStatus::InProgress,
                        detail: format!("{step} finished"),
                    },
                );
            }
            Outcome::TransientFailure(reason) => {
                let failures = state.retry_count(step.as_str());
                let retryable = failures <= max_retries;
                self.bus.publish(
                    &application_id,
                    BusEvent::Error {
                        step: Some(step.clone()),
                        reason: reason.clone(),
                        retryable,
                    },
                );
                if !retryable {
                    self.settle(
                        state,
                        ApplicationStatus::NeedsReview,
                        format!("{step} exhausted {max_retries} retries: {reason}"),
                    );
                }
            }
            Outcome::PermanentFailure(reason) => {
                self.bus.publish(
                    &application_id,
                    BusEvent::Error {
                        step: Some(step.clone()),
                        reason: reason.clone(),
                        retryable: false,
                    },
                );
                self.settle(
                    state,
                    ApplicationStatus::NeedsReview,
                    format!("{step} failed permanently: {reason}"),
                );
            }
        }

        Ok(())
    }

    /// Move to a terminal status and publish the closing status update and audit report.
    fn settle(
        &self,
        state: &mut ApplicationState,
        status: ApplicationStatus,
        reason: impl Into<String>,
    ) {
        let reason = reason.into();
        let application_id = state.application_id().clone();
        if let Err(rejected) = state.set_status(status, reason.clone()) {
            warn!(%application_id, %rejected, "status change rejected");
            return;
        }

        info!(%application_id, status = status.label(), %reason, "application settled");
        self.bus.publish(
            &application_id,
            BusEvent::StatusUpdate {
                status,
                detail: reason,
            },
        );
        self.bus.publish(
            &application_id,
            BusEvent::Audit {
                report: ApplicationReport::from_state(state),
            },
        );
    }
}
