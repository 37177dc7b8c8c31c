use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::info;

use super::bus::BusMessage;
use super::domain::{ApplicationId, ApplicationInputs, ApplicationStatus};
use super::orchestrator::{CancellationToken, Orchestrator};
use super::repository::{ApplicationRepository, RepositoryError};
use super::state::{ApplicationState, StateError, SubmissionRules};

/// Service composing submission validation, the repository, and the orchestrator.
pub struct UnderwritingService<R> {
    repository: Arc<R>,
    orchestrator: Orchestrator,
    rules: SubmissionRules,
    sessions: Mutex<HashMap<ApplicationId, Session>>,
}

/// Cancellation handle of an unsettled application and whether a run currently owns it.
#[derive(Default)]
struct Session {
    token: CancellationToken,
    running: bool,
}

/// Releases the session of an application once its run has been persisted.
struct RunGuard<'a> {
    sessions: &'a Mutex<HashMap<ApplicationId, Session>>,
    application_id: ApplicationId,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.application_id);
    }
}

static APPLICATION_SEQUENCE: AtomicU64 = AtomicU64::new(1);

fn next_application_id() -> ApplicationId {
    let id = APPLICATION_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    ApplicationId(format!("app-{id:06}"))
}

impl<R> UnderwritingService<R>
where
    R: ApplicationRepository + 'static,
{
    pub fn new(repository: Arc<R>, orchestrator: Orchestrator, rules: SubmissionRules) -> Self {
        Self {
            repository,
            orchestrator,
            rules,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Validate and store a new application. Processing starts with `process`.
    pub fn submit(&self, inputs: ApplicationInputs) -> Result<ApplicationState, ServiceError> {
        let state = ApplicationState::create(next_application_id(), inputs, &self.rules)?;
        let stored = self.repository.insert(state)?;
        self.sessions()
            .insert(stored.application_id().clone(), Session::default());
        info!(application_id = %stored.application_id(), "application submitted");
        Ok(stored)
    }

    /// Run the orchestration loop to a terminal status and persist the result.
    ///
    /// Only one run may own an application at a time; a concurrent call is refused with
    /// `AlreadyProcessing`.
    pub fn process(&self, application_id: &ApplicationId) -> Result<ApplicationState, ServiceError> {
        let (_guard, token) = self.claim(application_id)?;

        let mut state = self
            .repository
            .fetch(application_id)?
            .ok_or(RepositoryError::NotFound)?;
        if state.status().is_terminal() {
            return Ok(state);
        }

        self.orchestrator.run(&mut state, &token);
        self.repository.update(state.clone())?;
        Ok(state)
    }

    /// Request cancellation. An in-flight step finishes before the application moves to `FAILED`.
    pub fn cancel(&self, application_id: &ApplicationId) -> Result<(), ServiceError> {
        if let Some(session) = self.sessions().get(application_id) {
            session.token.cancel();
            info!(%application_id, "cancellation requested");
            return Ok(());
        }

        let state = self
            .repository
            .fetch(application_id)?
            .ok_or(RepositoryError::NotFound)?;
        Err(ServiceError::AlreadySettled {
            application_id: application_id.clone(),
            status: state.status(),
        })
    }

    pub fn get(&self, application_id: &ApplicationId) -> Result<ApplicationState, ServiceError> {
        let record = self
            .repository
            .fetch(application_id)?
            .ok_or(RepositoryError::NotFound)?;
        Ok(record)
    }

    pub fn messages(&self, application_id: &ApplicationId) -> Vec<BusMessage> {
        self.orchestrator.bus().history(application_id)
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    fn claim(
        &self,
        application_id: &ApplicationId,
    ) -> Result<(RunGuard<'_>, CancellationToken), ServiceError> {
        let mut sessions = self.sessions();
        let session = sessions.entry(application_id.clone()).or_default();
        if session.running {
            return Err(ServiceError::AlreadyProcessing(application_id.clone()));
        }
        session.running = true;
        let token = session.token.clone();
        drop(sessions);

        let guard = RunGuard {
            sessions: &self.sessions,
            application_id: application_id.clone(),
        };
        Ok((guard, token))
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<ApplicationId, Session>> {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Error raised by the underwriting service.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error("application {0} is already being processed")]
    AlreadyProcessing(ApplicationId),
    #[error("application {application_id} already settled as {status}")]
    AlreadySettled {
        application_id: ApplicationId,
        status: ApplicationStatus,
    },
}
