use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::domain::{ApplicationId, ApplicationStatus, StepName};
use super::state::ApplicationState;

/// Final processing summary published as the audit event when an application settles.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApplicationReport {
    pub application_id: ApplicationId,
    pub status: ApplicationStatus,
    pub status_reason: Option<String>,
    pub steps: Vec<StepReport>,
    pub total_attempts: usize,
    pub failed_attempts: BTreeMap<StepName, u32>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepReport {
    pub step: StepName,
    pub success: bool,
    pub attempts: usize,
}

impl ApplicationReport {
    pub fn from_state(state: &ApplicationState) -> Self {
        // Steps appear in the order they were first attempted.
        let mut steps: Vec<StepReport> = Vec::new();
        for entry in state.history() {
            if let Some(report) = steps.iter_mut().find(|report| report.step == entry.step) {
                report.attempts += 1;
            } else if let Some(payload) = state.step_results().get(&entry.step) {
                steps.push(StepReport {
                    step: entry.step.clone(),
                    success: payload.success,
                    attempts: 1,
                });
            }
        }

        Self {
            application_id: state.application_id().clone(),
            status: state.status(),
            status_reason: state.status_reason().map(str::to_string),
            steps,
            total_attempts: state.history().len(),
            failed_attempts: state.retry_counts().clone(),
            started_at: state.created_at(),
            finished_at: state.finished_at(),
        }
    }

    /// Wall-clock processing time once the application has settled.
    pub fn duration_ms(&self) -> Option<i64> {
        self.finished_at
            .map(|finished| (finished - self.started_at).num_milliseconds())
    }

    pub fn summary(&self) -> String {
        let succeeded = self.steps.iter().filter(|step| step.success).count();
        let mut line = format!(
            "{} {}: {}/{} steps succeeded over {} attempt(s)",
            self.application_id,
            self.status.label(),
            succeeded,
            self.steps.len(),
            self.total_attempts
        );
        if let Some(reason) = &self.status_reason {
            line.push_str(&format!(" ({reason})"));
        }
        line
    }
}
