use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

use axum::response::Response;
use serde_json::{json, Value};

use crate::workflows::underwriting::blueprint::DEFAULT_MAX_RETRIES;
use crate::workflows::underwriting::policy::AdvisoryUnavailable;
use crate::workflows::underwriting::{
    ApplicationId, ApplicationInputs, ApplicationRepository, ApplicationState, BusMessage,
    BusObserver, Capability, CapabilityError, CapabilityRegistry, DecisionPolicy,
    DeterministicPolicy, MessageBus, Orchestrator, OrchestratorSettings, ProposedDecision,
    ReasoningAdvisor, ReasoningPolicy, RepositoryError, StateSummary, StepParams, StepPayload,
    SubmissionRules, UnderwritingBlueprint, UnderwritingService,
};

pub(super) fn inputs(images: usize, documents: usize) -> ApplicationInputs {
    let mut inputs = ApplicationInputs {
        customer_id: Some("cust-0042".to_string()),
        ..ApplicationInputs::default()
    };
    inputs.applicant.insert("age".to_string(), json!(35));
    inputs.applicant.insert("location".to_string(), json!("A"));
    inputs.image_refs = (1..=images)
        .map(|index| format!("uploads/vehicle-{index}.jpg"))
        .collect();
    inputs.document_refs = (1..=documents)
        .map(|index| format!("uploads/document-{index}.pdf"))
        .collect();
    inputs
}

pub(super) fn state_from(inputs: ApplicationInputs) -> ApplicationState {
    ApplicationState::create(
        ApplicationId("app-test".to_string()),
        inputs,
        &SubmissionRules::default(),
    )
    .expect("inputs are well formed")
}

/// Capability that replays a script, then succeeds for every further call.
pub(super) struct ScriptedCapability {
    step: String,
    script: Mutex<VecDeque<Result<StepPayload, CapabilityError>>>,
    calls: AtomicUsize,
    params: Mutex<Vec<StepParams>>,
    delay: Mutex<Option<Duration>>,
}

impl ScriptedCapability {
    pub(super) fn new(step: &str) -> Self {
        Self {
            step: step.to_string(),
            script: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
            params: Mutex::new(Vec::new()),
            delay: Mutex::new(None),
        }
    }

    pub(super) fn push(&self, response: Result<StepPayload, CapabilityError>) {
        self.script
            .lock()
            .expect("script mutex poisoned")
            .push_back(response);
    }

    pub(super) fn fail_transiently(&self, times: usize) {
        for attempt in 1..=times {
            self.push(Err(CapabilityError::Transient(format!(
                "{} rate limited (attempt {attempt})",
                self.step
            ))));
        }
    }

    pub(super) fn fail_permanently(&self, reason: &str) {
        for _ in 0..8 {
            self.push(Err(CapabilityError::Permanent(reason.to_string())));
        }
    }

    pub(super) fn delay_by(&self, delay: Duration) {
        *self.delay.lock().expect("delay mutex poisoned") = Some(delay);
    }

    pub(super) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(super) fn last_params(&self) -> Option<StepParams> {
        self.params
            .lock()
            .expect("params mutex poisoned")
            .last()
            .cloned()
    }
}

impl Capability for ScriptedCapability {
    fn invoke(
        &self,
        _state: &ApplicationState,
        params: &StepParams,
    ) -> Result<StepPayload, CapabilityError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.params
            .lock()
            .expect("params mutex poisoned")
            .push(params.clone());
        let delay = *self.delay.lock().expect("delay mutex poisoned");
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        self.script
            .lock()
            .expect("script mutex poisoned")
            .pop_front()
            .unwrap_or_else(|| Ok(StepPayload::succeeded(json!({ "step": self.step }))))
    }
}

/// Standard blueprint wired to scripted capabilities.
pub(super) struct Harness {
    pub(super) registry: Arc<CapabilityRegistry>,
    pub(super) bus: Arc<MessageBus>,
    capabilities: HashMap<String, Arc<ScriptedCapability>>,
}

impl Harness {
    pub(super) fn standard() -> Self {
        Self::with_retries(DEFAULT_MAX_RETRIES)
    }

    pub(super) fn with_retries(max_retries: u32) -> Self {
        Self::with_timeout(max_retries, Duration::from_secs(5))
    }

    pub(super) fn with_timeout(max_retries: u32, timeout: Duration) -> Self {
        let mut capabilities = HashMap::new();
        let registry = UnderwritingBlueprint::with_max_retries(max_retries)
            .build_registry(timeout, |descriptor| {
                let capability = Arc::new(ScriptedCapability::new(descriptor.name.as_str()));
                capabilities.insert(descriptor.name.to_string(), Arc::clone(&capability));
                capability as Arc<dyn Capability>
            })
            .expect("blueprint steps are unique");
        Self {
            registry: Arc::new(registry),
            bus: Arc::new(MessageBus::new()),
            capabilities,
        }
    }

    pub(super) fn capability(&self, step: &str) -> &Arc<ScriptedCapability> {
        self.capabilities
            .get(step)
            .unwrap_or_else(|| panic!("no capability registered for {step}"))
    }

    pub(super) fn deterministic(&self) -> Arc<dyn DecisionPolicy> {
        Arc::new(DeterministicPolicy::new(Arc::clone(&self.registry)))
    }

    pub(super) fn reasoning(&self, advisor: Arc<dyn ReasoningAdvisor>) -> Arc<dyn DecisionPolicy> {
        Arc::new(ReasoningPolicy::new(advisor, Arc::clone(&self.registry)))
    }

    pub(super) fn orchestrator(&self, policy: Arc<dyn DecisionPolicy>) -> Orchestrator {
        self.orchestrator_with(policy, OrchestratorSettings::default())
    }

    pub(super) fn orchestrator_with(
        &self,
        policy: Arc<dyn DecisionPolicy>,
        settings: OrchestratorSettings,
    ) -> Orchestrator {
        Orchestrator::new(
            Arc::clone(&self.registry),
            policy,
            Arc::clone(&self.bus),
            settings,
        )
    }
}

/// Advisor replaying queued proposals, unavailable once the queue drains.
#[derive(Default)]
pub(super) struct ScriptedAdvisor {
    proposals: Mutex<VecDeque<Result<ProposedDecision, AdvisoryUnavailable>>>,
    seen: Mutex<Vec<StateSummary>>,
}

impl ScriptedAdvisor {
    pub(super) fn with(proposals: Vec<ProposedDecision>) -> Self {
        Self {
            proposals: Mutex::new(proposals.into_iter().map(Ok).collect()),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub(super) fn summaries(&self) -> Vec<StateSummary> {
        self.seen.lock().expect("advisor mutex poisoned").clone()
    }
}

impl ReasoningAdvisor for ScriptedAdvisor {
    fn propose(&self, summary: &StateSummary) -> Result<ProposedDecision, AdvisoryUnavailable> {
        self.seen
            .lock()
            .expect("advisor mutex poisoned")
            .push(summary.clone());
        self.proposals
            .lock()
            .expect("advisor mutex poisoned")
            .pop_front()
            .unwrap_or_else(|| Err(AdvisoryUnavailable("script exhausted".to_string())))
    }
}

pub(super) fn run_step(step: &str) -> ProposedDecision {
    ProposedDecision::RunStep {
        step: step.to_string(),
        params: StepParams::new(),
        reasoning: "test proposal".to_string(),
    }
}

#[derive(Default)]
pub(super) struct RecordingObserver {
    messages: Mutex<Vec<BusMessage>>,
}

impl RecordingObserver {
    pub(super) fn messages(&self) -> Vec<BusMessage> {
        self.messages.lock().expect("observer mutex poisoned").clone()
    }
}

impl BusObserver for RecordingObserver {
    fn observe(&self, message: &BusMessage) {
        self.messages
            .lock()
            .expect("observer mutex poisoned")
            .push(message.clone());
    }
}

/// Steps named in `StepRequest` events, in publication order.
pub(super) fn requested_steps(messages: &[BusMessage]) -> Vec<String> {
    messages
        .iter()
        .filter_map(|message| match &message.event {
            crate::workflows::underwriting::BusEvent::StepRequest { step, .. } => {
                Some(step.to_string())
            }
            _ => None,
        })
        .collect()
}

pub(super) fn build_service(harness: &Harness) -> (UnderwritingService<MemoryRepository>, Arc<MemoryRepository>) {
    let repository = Arc::new(MemoryRepository::default());
    let service = UnderwritingService::new(
        Arc::clone(&repository),
        harness.orchestrator(harness.deterministic()),
        SubmissionRules::default(),
    );
    (service, repository)
}

#[derive(Default, Clone)]
pub(super) struct MemoryRepository {
    pub(super) records: Arc<Mutex<HashMap<ApplicationId, ApplicationState>>>,
}

impl ApplicationRepository for MemoryRepository {
    fn insert(&self, record: ApplicationState) -> Result<ApplicationState, RepositoryError> {
        let mut guard = self.records.lock().expect("repository mutex poisoned");
        if guard.contains_key(record.application_id()) {
            return Err(RepositoryError::Conflict);
        }
        guard.insert(record.application_id().clone(), record.clone());
        Ok(record)
    }

    fn update(&self, record: ApplicationState) -> Result<(), RepositoryError> {
        let mut guard = self.records.lock().expect("repository mutex poisoned");
        guard.insert(record.application_id().clone(), record);
        Ok(())
    }

    fn fetch(&self, id: &ApplicationId) -> Result<Option<ApplicationState>, RepositoryError> {
        let guard = self.records.lock().expect("repository mutex poisoned");
        Ok(guard.get(id).cloned())
    }

    fn pending(&self, limit: usize) -> Result<Vec<ApplicationState>, RepositoryError> {
        let guard = self.records.lock().expect("repository mutex poisoned");
        Ok(guard
            .values()
            .filter(|record| !record.status().is_terminal())
            .take(limit)
            .cloned()
            .collect())
    }
}

pub(super) struct ConflictRepository;

impl ApplicationRepository for ConflictRepository {
    fn insert(&self, _record: ApplicationState) -> Result<ApplicationState, RepositoryError> {
        Err(RepositoryError::Conflict)
    }

    fn update(&self, _record: ApplicationState) -> Result<(), RepositoryError> {
        Err(RepositoryError::Unavailable("read only".to_string()))
    }

    fn fetch(&self, _id: &ApplicationId) -> Result<Option<ApplicationState>, RepositoryError> {
        Ok(None)
    }

    fn pending(&self, _limit: usize) -> Result<Vec<ApplicationState>, RepositoryError> {
        Ok(Vec::new())
    }
}

/// Memory repository whose `update` waits until the test releases it.
pub(super) struct GatedRepository {
    pub(super) inner: MemoryRepository,
    entered: Mutex<mpsc::Sender<()>>,
    release: Mutex<mpsc::Receiver<()>>,
}

impl GatedRepository {
    /// Returns the repository, a receiver signalled when `update` starts, and the release handle.
    pub(super) fn new() -> (Self, mpsc::Receiver<()>, mpsc::Sender<()>) {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let repository = Self {
            inner: MemoryRepository::default(),
            entered: Mutex::new(entered_tx),
            release: Mutex::new(release_rx),
        };
        (repository, entered_rx, release_tx)
    }
}

impl ApplicationRepository for GatedRepository {
    fn insert(&self, record: ApplicationState) -> Result<ApplicationState, RepositoryError> {
        self.inner.insert(record)
    }

    fn update(&self, record: ApplicationState) -> Result<(), RepositoryError> {
        let _ = self.entered.lock().expect("gate mutex poisoned").send(());
        let _ = self
            .release
            .lock()
            .expect("gate mutex poisoned")
            .recv_timeout(Duration::from_secs(5));
        self.inner.update(record)
    }

    fn fetch(&self, id: &ApplicationId) -> Result<Option<ApplicationState>, RepositoryError> {
        self.inner.fetch(id)
    }

    fn pending(&self, limit: usize) -> Result<Vec<ApplicationState>, RepositoryError> {
        self.inner.pending(limit)
    }
}

pub(super) struct UnavailableRepository;

impl ApplicationRepository for UnavailableRepository {
    fn insert(&self, _record: ApplicationState) -> Result<ApplicationState, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn update(&self, _record: ApplicationState) -> Result<(), RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn fetch(&self, _id: &ApplicationId) -> Result<Option<ApplicationState>, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn pending(&self, _limit: usize) -> Result<Vec<ApplicationState>, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
