use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use super::domain::{
    ApplicationId, ApplicationInputs, ApplicationStatus, AttemptOutcome, HistoryEntry,
    RequiredInput, StepName, StepPayload,
};

/// Fields every submission must carry before an application state is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionRules {
    pub required_fields: Vec<String>,
}

impl Default for SubmissionRules {
    fn default() -> Self {
        Self {
            required_fields: vec!["age".to_string(), "location".to_string()],
        }
    }
}

/// Errors raised by state mutators. All of them are configuration or programming defects
/// except `InvalidInput`, which rejects a submission before any state exists.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
    #[error("invalid submission: {0}")]
    InvalidInput(String),
    #[error("step '{0}' already has a recorded result")]
    DuplicateStep(StepName),
    #[error("step '{0}' has no successful attempt on record")]
    AttemptNotRecorded(StepName),
    #[error("cannot move application from {from} to {to}")]
    InvalidTransition {
        from: ApplicationStatus,
        to: ApplicationStatus,
    },
    #[error("application is {0} and can no longer change")]
    Sealed(ApplicationStatus),
}

/// Mutable record of one in-flight application.
#[derive(Debug, Clone, Serialize)]
pub struct ApplicationState {
    application_id: ApplicationId,
    inputs: ApplicationInputs,
    step_results: BTreeMap<StepName, StepPayload>,
    history: Vec<HistoryEntry>,
    status: ApplicationStatus,
    status_reason: Option<String>,
    retry_counts: BTreeMap<StepName, u32>,
    created_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
}

impl ApplicationState {
    pub fn create(
        application_id: ApplicationId,
        inputs: ApplicationInputs,
        rules: &SubmissionRules,
    ) -> Result<Self, StateError> {
        let missing: Vec<&str> = rules
            .required_fields
            .iter()
            .filter(|field| {
                inputs
                    .applicant
                    .get(field.as_str())
                    .map(Value::is_null)
                    .unwrap_or(true)
            })
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(StateError::InvalidInput(format!(
                "missing required applicant fields: {}",
                missing.join(", ")
            )));
        }

        let blank_reference = inputs
            .image_refs
            .iter()
            .chain(inputs.document_refs.iter())
            .any(|reference| reference.trim().is_empty());
        if blank_reference {
            return Err(StateError::InvalidInput(
                "uploaded references must not be blank".to_string(),
            ));
        }

        Ok(Self {
            application_id,
            inputs,
            step_results: BTreeMap::new(),
            history: Vec::new(),
            status: ApplicationStatus::InProgress,
            status_reason: None,
            retry_counts: BTreeMap::new(),
            created_at: Utc::now(),
            finished_at: None,
        })
    }

    /// Append an attempt to the history. Failed attempts count against the step's retry ceiling.
    pub fn record_attempt(
        &mut self,
        step: &StepName,
        outcome: AttemptOutcome,
    ) -> Result<(), StateError> {
        self.ensure_open()?;
        if outcome.is_failure() {
            *self.retry_counts.entry(step.clone()).or_insert(0) += 1;
        }
        self.history.push(HistoryEntry {
            step: step.clone(),
            outcome,
            recorded_at: Utc::now(),
        });
        Ok(())
    }

    pub fn record_result(&mut self, step: StepName, payload: StepPayload) -> Result<(), StateError> {
        self.ensure_open()?;
        if self.step_results.contains_key(&step) {
            return Err(StateError::DuplicateStep(step));
        }
        let attempted = self
            .history
            .iter()
            .any(|entry| entry.step == step && entry.outcome == AttemptOutcome::Succeeded);
        if !attempted {
            return Err(StateError::AttemptNotRecorded(step));
        }
        self.step_results.insert(step, payload);
        Ok(())
    }

    pub fn set_status(
        &mut self,
        status: ApplicationStatus,
        reason: impl Into<String>,
    ) -> Result<(), StateError> {
        if self.status.is_terminal() {
            return Err(StateError::InvalidTransition {
                from: self.status,
                to: status,
            });
        }
        if status.is_terminal() {
            self.status = status;
            self.status_reason = Some(reason.into());
            self.finished_at = Some(Utc::now());
        }
        Ok(())
    }

    fn ensure_open(&self) -> Result<(), StateError> {
        if self.status.is_terminal() {
            Err(StateError::Sealed(self.status))
        } else {
            Ok(())
        }
    }

    pub fn application_id(&self) -> &ApplicationId {
        &self.application_id
    }

    pub fn inputs(&self) -> &ApplicationInputs {
        &self.inputs
    }

    pub fn status(&self) -> ApplicationStatus {
        self.status
    }

    pub fn status_reason(&self) -> Option<&str> {
        self.status_reason.as_deref()
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    pub fn step_results(&self) -> &BTreeMap<StepName, StepPayload> {
        &self.step_results
    }

    pub fn result(&self, step: &str) -> Option<&StepPayload> {
        self.step_results.get(step)
    }

    pub fn has_result(&self, step: &str) -> bool {
        self.step_results.contains_key(step)
    }

    pub fn has_successful_result(&self, step: &str) -> bool {
        self.result(step).map(|payload| payload.success).unwrap_or(false)
    }

    pub fn retry_count(&self, step: &str) -> u32 {
        self.retry_counts.get(step).copied().unwrap_or(0)
    }

    pub fn retry_counts(&self) -> &BTreeMap<StepName, u32> {
        &self.retry_counts
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    /// Most recent failed attempt, if any.
    pub fn last_failure(&self) -> Option<&HistoryEntry> {
        self.history
            .iter()
            .rev()
            .find(|entry| entry.outcome.is_failure())
    }

    pub fn is_satisfied(&self, input: &RequiredInput) -> bool {
        match input {
            RequiredInput::Applicant(key) => self
                .inputs
                .applicant
                .get(key)
                .map(|value| !value.is_null())
                .unwrap_or(false),
            RequiredInput::Images => !self.inputs.image_refs.is_empty(),
            RequiredInput::Documents => !self.inputs.document_refs.is_empty(),
            RequiredInput::StepResult(step) => self.has_result(step.as_str()),
        }
    }

    /// Value a satisfied input contributes to a step's parameters, keyed by parameter name.
    pub fn input_value(&self, input: &RequiredInput) -> Option<(String, Value)> {
        match input {
            RequiredInput::Applicant(key) => self
                .inputs
                .applicant
                .get(key)
                .map(|value| (key.clone(), value.clone())),
            RequiredInput::Images => Some((
                "image_refs".to_string(),
                Value::from(self.inputs.image_refs.clone()),
            )),
            RequiredInput::Documents => Some((
                "document_refs".to_string(),
                Value::from(self.inputs.document_refs.clone()),
            )),
            RequiredInput::StepResult(step) => self
                .result(step.as_str())
                .map(|payload| (step.to_string(), payload.data.clone())),
        }
    }

    /// Condensed view handed to the reasoning advisor.
    pub fn summary(&self) -> StateSummary {
        StateSummary {
            application_id: self.application_id.clone(),
            customer_id: self.inputs.customer_id.clone(),
            applicant_fields: self.inputs.applicant.keys().cloned().collect(),
            image_count: self.inputs.image_refs.len(),
            document_count: self.inputs.document_refs.len(),
            completed_steps: self.step_results.keys().cloned().collect(),
            attempts: self.history.len(),
            retry_counts: self.retry_counts.clone(),
            last_failure: self.last_failure().map(|entry| FailureNote {
                step: entry.step.clone(),
                reason: entry
                    .outcome
                    .failure_reason()
                    .unwrap_or_default()
                    .to_string(),
            }),
        }
    }
}

/// Inputs present, steps completed and the last failure, without payload bodies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateSummary {
    pub application_id: ApplicationId,
    pub customer_id: Option<String>,
    pub applicant_fields: Vec<String>,
    pub image_count: usize,
    pub document_count: usize,
    pub completed_steps: Vec<StepName>,
    pub attempts: usize,
    pub retry_counts: BTreeMap<StepName, u32>,
    pub last_failure: Option<FailureNote>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureNote {
    pub step: StepName,
    pub reason: String,
}
