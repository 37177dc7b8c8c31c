use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identifier wrapper for submitted applications.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ApplicationId(pub String);

impl fmt::Display for ApplicationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Symbolic name of a processing step bound to an external capability.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepName(String);

impl StepName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StepName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StepName {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for StepName {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl Borrow<str> for StepName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Parameters handed to a capability alongside the state snapshot.
pub type StepParams = serde_json::Map<String, Value>;

/// Initial inputs collected at submission time. Never mutated after the state is created.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApplicationInputs {
    #[serde(default)]
    pub customer_id: Option<String>,
    #[serde(default)]
    pub applicant: BTreeMap<String, Value>,
    #[serde(default)]
    pub image_refs: Vec<String>,
    #[serde(default)]
    pub document_refs: Vec<String>,
}

/// Lifecycle status of an application. Terminal statuses never revert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApplicationStatus {
    InProgress,
    Completed,
    Failed,
    NeedsReview,
}

impl ApplicationStatus {
    pub const fn label(self) -> &'static str {
        match self {
            ApplicationStatus::InProgress => "IN_PROGRESS",
            ApplicationStatus::Completed => "COMPLETED",
            ApplicationStatus::Failed => "FAILED",
            ApplicationStatus::NeedsReview => "NEEDS_REVIEW",
        }
    }

    pub const fn is_terminal(self) -> bool {
        !matches!(self, ApplicationStatus::InProgress)
    }
}

impl fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Result of a single attempt at running a step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Succeeded,
    TransientFailure { reason: String },
    PermanentFailure { reason: String },
}

impl AttemptOutcome {
    pub fn is_failure(&self) -> bool {
        !matches!(self, AttemptOutcome::Succeeded)
    }

    pub fn failure_reason(&self) -> Option<&str> {
        match self {
            AttemptOutcome::Succeeded => None,
            AttemptOutcome::TransientFailure { reason }
            | AttemptOutcome::PermanentFailure { reason } => Some(reason),
        }
    }
}

/// Append-only audit record of a step attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub step: StepName,
    pub outcome: AttemptOutcome,
    pub recorded_at: DateTime<Utc>,
}

/// Step output. The body is opaque to the orchestration core; only the tag is inspected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepPayload {
    pub success: bool,
    #[serde(default)]
    pub data: Value,
}

impl StepPayload {
    pub fn succeeded(data: Value) -> Self {
        Self {
            success: true,
            data,
        }
    }

    pub fn unsuccessful(data: Value) -> Self {
        Self {
            success: false,
            data,
        }
    }
}

/// Something a step needs before it can run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum RequiredInput {
    /// A structured applicant field, by key.
    Applicant(String),
    /// At least one uploaded image reference.
    Images,
    /// At least one uploaded document reference.
    Documents,
    /// The recorded result of an earlier step.
    StepResult(StepName),
}

impl fmt::Display for RequiredInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequiredInput::Applicant(key) => write!(f, "applicant.{key}"),
            RequiredInput::Images => f.write_str("image_refs"),
            RequiredInput::Documents => f.write_str("document_refs"),
            RequiredInput::StepResult(step) => write!(f, "result.{step}"),
        }
    }
}
