use serde::Serialize;

use super::domain::{ApplicationId, StepName};
use super::state::ApplicationState;

impl ApplicationState {
    pub fn status_view(&self) -> ApplicationStatusView {
        ApplicationStatusView {
            application_id: self.application_id().clone(),
            status: self.status().label(),
            status_reason: self.status_reason().map(str::to_string),
            completed_steps: self.step_results().keys().cloned().collect(),
            attempts: self.history().len(),
            last_failure: self.last_failure().map(|entry| {
                format!(
                    "{}: {}",
                    entry.step,
                    entry.outcome.failure_reason().unwrap_or_default()
                )
            }),
        }
    }
}

/// Storage abstraction for retained application states.
pub trait ApplicationRepository: Send + Sync {
    fn insert(&self, record: ApplicationState) -> Result<ApplicationState, RepositoryError>;
    fn update(&self, record: ApplicationState) -> Result<(), RepositoryError>;
    fn fetch(&self, id: &ApplicationId) -> Result<Option<ApplicationState>, RepositoryError>;
    fn pending(&self, limit: usize) -> Result<Vec<ApplicationState>, RepositoryError>;
}

/// Error enumeration for repository failures.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

/// Sanitized representation of an application's exposed status.
#[derive(Debug, Clone, Serialize)]
pub struct ApplicationStatusView {
    pub application_id: ApplicationId,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_reason: Option<String>,
    pub completed_steps: Vec<StepName>,
    pub attempts: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_failure: Option<String>,
}
