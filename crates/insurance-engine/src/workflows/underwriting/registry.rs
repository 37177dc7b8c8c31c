use std::collections::HashMap;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::domain::{AttemptOutcome, RequiredInput, StepName, StepParams, StepPayload};
use super::state::ApplicationState;

/// Default ceiling for a single capability call when a step does not declare its own.
pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(30);

/// Declared contract of a registered step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepDescriptor {
    pub name: StepName,
    pub description: String,
    pub required_inputs: Vec<RequiredInput>,
    pub declares_terminal: bool,
    pub max_retries: u32,
    #[serde(skip)]
    pub timeout: Option<Duration>,
}

impl StepDescriptor {
    pub fn new(name: impl Into<StepName>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            required_inputs: Vec::new(),
            declares_terminal: false,
            max_retries: 0,
            timeout: None,
        }
    }

    pub fn requires(mut self, input: RequiredInput) -> Self {
        self.required_inputs.push(input);
        self
    }

    pub fn requires_result(self, step: impl Into<StepName>) -> Self {
        self.requires(RequiredInput::StepResult(step.into()))
    }

    pub fn terminal(mut self) -> Self {
        self.declares_terminal = true;
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn is_satisfied_by(&self, state: &ApplicationState) -> bool {
        self.required_inputs
            .iter()
            .all(|input| state.is_satisfied(input))
    }

    /// Failures beyond `max_retries` mean the step may not be offered again.
    pub fn retries_exhausted(&self, state: &ApplicationState) -> bool {
        state.retry_count(self.name.as_str()) > self.max_retries
    }

    /// Parameters built from the step's required inputs.
    pub fn params_from(&self, state: &ApplicationState) -> StepParams {
        let mut params = StepParams::new();
        params.insert(
            "application_id".to_string(),
            Value::from(state.application_id().0.clone()),
        );
        for input in &self.required_inputs {
            if let Some((key, value)) = state.input_value(input) {
                params.insert(key, value);
            }
        }
        params
    }
}

/// Error a capability raises. The registry maps it onto an `Outcome`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CapabilityError {
    #[error("transient failure: {0}")]
    Transient(String),
    #[error("permanent failure: {0}")]
    Permanent(String),
}

/// External service invoked by step name.
pub trait Capability: Send + Sync {
    fn invoke(
        &self,
        state: &ApplicationState,
        params: &StepParams,
    ) -> Result<StepPayload, CapabilityError>;
}

impl<F> Capability for F
where
    F: Fn(&ApplicationState, &StepParams) -> Result<StepPayload, CapabilityError> + Send + Sync,
{
    fn invoke(
        &self,
        state: &ApplicationState,
        params: &StepParams,
    ) -> Result<StepPayload, CapabilityError> {
        self(state, params)
    }
}

/// Classified result of a capability invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success(StepPayload),
    TransientFailure(String),
    PermanentFailure(String),
}

impl Outcome {
    pub fn attempt_outcome(&self) -> AttemptOutcome {
        match self {
            Outcome::Success(_) => AttemptOutcome::Succeeded,
            Outcome::TransientFailure(reason) => AttemptOutcome::TransientFailure {
                reason: reason.clone(),
            },
            Outcome::PermanentFailure(reason) => AttemptOutcome::PermanentFailure {
                reason: reason.clone(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("unknown step '{0}'")]
    UnknownStep(StepName),
    #[error("step '{0}' is already registered")]
    DuplicateStep(StepName),
}

struct RegisteredStep {
    descriptor: StepDescriptor,
    capability: Arc<dyn Capability>,
}

/// Dispatch table from step name to capability. Read-only once shared.
pub struct CapabilityRegistry {
    steps: Vec<RegisteredStep>,
    index: HashMap<StepName, usize>,
    default_timeout: Duration,
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_STEP_TIMEOUT)
    }
}

impl CapabilityRegistry {
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            steps: Vec::new(),
            index: HashMap::new(),
            default_timeout,
        }
    }

    pub fn register(
        &mut self,
        descriptor: StepDescriptor,
        capability: Arc<dyn Capability>,
    ) -> Result<(), RegistryError> {
        if self.index.contains_key(&descriptor.name) {
            return Err(RegistryError::DuplicateStep(descriptor.name));
        }
        self.index.insert(descriptor.name.clone(), self.steps.len());
        self.steps.push(RegisteredStep {
            descriptor,
            capability,
        });
        Ok(())
    }

    pub fn resolve(&self, step: &str) -> Result<&StepDescriptor, RegistryError> {
        self.entry(step).map(|entry| &entry.descriptor)
    }

    pub fn contains(&self, step: &str) -> bool {
        self.index.contains_key(step)
    }

    /// Descriptors in registration order.
    pub fn steps(&self) -> impl Iterator<Item = &StepDescriptor> {
        self.steps.iter().map(|entry| &entry.descriptor)
    }

    pub fn terminal_steps(&self) -> impl Iterator<Item = &StepDescriptor> {
        self.steps().filter(|descriptor| descriptor.declares_terminal)
    }

    /// Terminal steps that do not yet carry a successful result.
    pub fn unsatisfied_terminal_steps(&self, state: &ApplicationState) -> Vec<StepName> {
        self.terminal_steps()
            .filter(|descriptor| !state.has_successful_result(descriptor.name.as_str()))
            .map(|descriptor| descriptor.name.clone())
            .collect()
    }

    /// Iterations a run needs at most when every step uses its full retry allowance,
    /// plus the one that settles the application.
    pub fn iteration_budget(&self) -> usize {
        self.steps()
            .map(|descriptor| descriptor.max_retries as usize + 1)
            .sum::<usize>()
            + 1
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Run the bound capability on a worker thread, bounded by the step timeout.
    ///
    /// A timed-out call is abandoned rather than interrupted; its eventual result is dropped.
    pub fn invoke(
        &self,
        step: &str,
        state: &ApplicationState,
        params: &StepParams,
    ) -> Result<Outcome, RegistryError> {
        let entry = self.entry(step)?;
        let timeout = entry.descriptor.timeout.unwrap_or(self.default_timeout);
        let capability = Arc::clone(&entry.capability);
        let snapshot = state.clone();
        let params = params.clone();
        let (sender, receiver) = mpsc::channel();

        let spawned = thread::Builder::new()
            .name(format!("capability-{step}"))
            .spawn(move || {
                let result = capability.invoke(&snapshot, &params);
                // The receiver is gone when the call outlived its timeout.
                let _ = sender.send(result);
            });
        if let Err(error) = spawned {
            warn!(step, %error, "unable to start capability worker");
            return Ok(Outcome::TransientFailure(format!(
                "capability worker unavailable: {error}"
            )));
        }

        let outcome = match receiver.recv_timeout(timeout) {
            Ok(Ok(payload)) => Outcome::Success(payload),
            Ok(Err(CapabilityError::Transient(reason))) => Outcome::TransientFailure(reason),
            Ok(Err(CapabilityError::Permanent(reason))) => Outcome::PermanentFailure(reason),
            Err(RecvTimeoutError::Timeout) => Outcome::TransientFailure(format!(
                "timed out after {} ms",
                timeout.as_millis()
            )),
            Err(RecvTimeoutError::Disconnected) => {
                Outcome::PermanentFailure("capability aborted without producing a result".into())
            }
        };
        debug!(step, ?outcome, "capability returned");
        Ok(outcome)
    }

    fn entry(&self, step: &str) -> Result<&RegisteredStep, RegistryError> {
        self.index
            .get(step)
            .map(|position| &self.steps[*position])
            .ok_or_else(|| RegistryError::UnknownStep(StepName::from(step)))
    }
}
