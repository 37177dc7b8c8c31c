//! Insurance application orchestration.
//!
//! An [`Orchestrator`] asks a [`DecisionPolicy`] what to do next, invokes the chosen
//! capability through the [`CapabilityRegistry`], records the outcome on the
//! [`ApplicationState`], and announces every transition on the [`MessageBus`] until the
//! application reaches `COMPLETED`, `FAILED` or `NEEDS_REVIEW`.

pub mod blueprint;
pub mod bus;
pub mod domain;
pub mod orchestrator;
pub mod policy;
pub mod registry;
pub mod report;
pub mod repository;
pub mod router;
pub mod service;
pub mod state;

#[cfg(test)]
mod tests;

pub use blueprint::UnderwritingBlueprint;
pub use bus::{
    BusEvent, BusMessage, BusObserver, MessageBus, TracingObserver, DEFAULT_RETAINED_APPLICATIONS,
};
pub use domain::{
    ApplicationId, ApplicationInputs, ApplicationStatus, AttemptOutcome, HistoryEntry,
    RequiredInput, StepName, StepParams, StepPayload,
};
pub use orchestrator::{
    CancellationToken, OrchestrationError, Orchestrator, OrchestratorSettings,
    DEFAULT_MAX_ITERATIONS,
};
pub use policy::{
    CompletionAdvisor, CompletionClient, Decision, DecisionPolicy, DeterministicPolicy,
    NoAdvisor, PolicyViolation, ProposedDecision, ReasoningAdvisor, ReasoningPolicy,
};
pub use registry::{
    Capability, CapabilityError, CapabilityRegistry, Outcome, RegistryError, StepDescriptor,
    DEFAULT_STEP_TIMEOUT,
};
pub use report::{ApplicationReport, StepReport};
pub use repository::{ApplicationRepository, ApplicationStatusView, RepositoryError};
pub use router::application_router;
pub use service::{ServiceError, UnderwritingService};
pub use state::{ApplicationState, FailureNote, StateError, StateSummary, SubmissionRules};
