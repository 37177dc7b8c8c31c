use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use insurance_engine::config::OrchestrationConfig;
use insurance_engine::error::AppError;
use insurance_engine::workflows::underwriting::blueprint::{
    ANALYZE_CUSTOMER_DATA, ANALYZE_VEHICLE_IMAGES, EXTRACT_DOCUMENT_DATA, GENERATE_FINAL_REPORT,
    RUN_RISK_ASSESSMENT, STORE_APPLICATION_RESULTS,
};
use insurance_engine::workflows::underwriting::{
    ApplicationId, ApplicationReport, ApplicationRepository, ApplicationState, BusEvent,
    BusMessage, BusObserver, Capability, CapabilityError, CapabilityRegistry, MessageBus,
    RepositoryError, StepDescriptor, StepParams, StepPayload, TracingObserver,
    UnderwritingBlueprint,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use serde_json::{json, Value};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

#[derive(Default, Clone)]
pub(crate) struct InMemoryApplicationRepository {
    records: Arc<Mutex<HashMap<ApplicationId, ApplicationState>>>,
}

impl InMemoryApplicationRepository {
    fn records(&self) -> std::sync::MutexGuard<'_, HashMap<ApplicationId, ApplicationState>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ApplicationRepository for InMemoryApplicationRepository {
    fn insert(&self, record: ApplicationState) -> Result<ApplicationState, RepositoryError> {
        let mut guard = self.records();
        if guard.contains_key(record.application_id()) {
            return Err(RepositoryError::Conflict);
        }
        guard.insert(record.application_id().clone(), record.clone());
        Ok(record)
    }

    fn update(&self, record: ApplicationState) -> Result<(), RepositoryError> {
        let mut guard = self.records();
        if guard.contains_key(record.application_id()) {
            guard.insert(record.application_id().clone(), record);
            Ok(())
        } else {
            Err(RepositoryError::NotFound)
        }
    }

    fn fetch(&self, id: &ApplicationId) -> Result<Option<ApplicationState>, RepositoryError> {
        Ok(self.records().get(id).cloned())
    }

    fn pending(&self, limit: usize) -> Result<Vec<ApplicationState>, RepositoryError> {
        let mut pending: Vec<ApplicationState> = self
            .records()
            .values()
            .filter(|record| !record.status().is_terminal())
            .cloned()
            .collect();
        pending.sort_by_key(|record| record.created_at());
        pending.truncate(limit);
        Ok(pending)
    }
}

/// Decision record written by the audit persistence step.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct StoredDecision {
    pub(crate) application_id: String,
    pub(crate) risk_score: f64,
    pub(crate) fraud_probability: f64,
    pub(crate) premium_quoted: f64,
    pub(crate) recommendation: String,
}

#[derive(Default)]
pub(crate) struct DecisionStore {
    records: Mutex<Vec<StoredDecision>>,
}

impl DecisionStore {
    fn push(&self, record: StoredDecision) -> usize {
        let mut guard = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        guard.push(record);
        guard.len()
    }

    pub(crate) fn records(&self) -> Vec<StoredDecision> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Keeps the final report of every settled application.
#[derive(Default)]
pub(crate) struct AuditTrail {
    reports: Mutex<Vec<ApplicationReport>>,
}

impl AuditTrail {
    pub(crate) fn reports(&self) -> Vec<ApplicationReport> {
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl BusObserver for AuditTrail {
    fn observe(&self, message: &BusMessage) {
        if let BusEvent::Audit { report } = &message.event {
            self.reports
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(report.clone());
        }
    }
}

/// Failures injected into the simulated capabilities, for demos and smoke tests.
#[derive(Debug, Clone, Default)]
pub(crate) struct FaultPlan {
    pub(crate) flaky: HashMap<String, u32>,
    pub(crate) rejected: HashSet<String>,
}

/// Shared engine components for one process.
pub(crate) struct Engine {
    pub(crate) registry: Arc<CapabilityRegistry>,
    pub(crate) bus: Arc<MessageBus>,
    pub(crate) decisions: Arc<DecisionStore>,
    pub(crate) audit: Arc<AuditTrail>,
}

pub(crate) fn build_engine(
    config: &OrchestrationConfig,
    faults: &FaultPlan,
) -> Result<Engine, AppError> {
    let decisions = Arc::new(DecisionStore::default());
    let audit = Arc::new(AuditTrail::default());
    let bus = Arc::new(MessageBus::with_retention(config.message_retention));
    bus.subscribe(Arc::new(TracingObserver));
    bus.subscribe(audit.clone());

    let registry = UnderwritingBlueprint::with_max_retries(config.step_max_retries)
        .build_registry(config.step_timeout, |descriptor| {
            let capability = simulated_capability(descriptor, &decisions);
            inject_faults(descriptor, capability, faults)
        })?;

    Ok(Engine {
        registry: Arc::new(registry),
        bus,
        decisions,
        audit,
    })
}

fn inject_faults(
    descriptor: &StepDescriptor,
    capability: Arc<dyn Capability>,
    faults: &FaultPlan,
) -> Arc<dyn Capability> {
    let step = descriptor.name.as_str();
    let flaky = faults.flaky.get(step).copied().unwrap_or(0);
    let rejected = faults.rejected.contains(step);
    if flaky == 0 && !rejected {
        return capability;
    }
    Arc::new(FaultyCapability {
        inner: capability,
        transient_remaining: AtomicU32::new(flaky),
        rejected,
    })
}

struct FaultyCapability {
    inner: Arc<dyn Capability>,
    transient_remaining: AtomicU32,
    rejected: bool,
}

impl Capability for FaultyCapability {
    fn invoke(
        &self,
        state: &ApplicationState,
        params: &StepParams,
    ) -> Result<StepPayload, CapabilityError> {
        if self.rejected {
            return Err(CapabilityError::Permanent(
                "input rejected by the capability".to_string(),
            ));
        }
        let injected = self
            .transient_remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |remaining| {
                remaining.checked_sub(1)
            })
            .is_ok();
        if injected {
            return Err(CapabilityError::Transient(
                "upstream service temporarily unavailable".to_string(),
            ));
        }
        self.inner.invoke(state, params)
    }
}

fn simulated_capability(
    descriptor: &StepDescriptor,
    decisions: &Arc<DecisionStore>,
) -> Arc<dyn Capability> {
    match descriptor.name.as_str() {
        ANALYZE_CUSTOMER_DATA => Arc::new(analyze_customer),
        ANALYZE_VEHICLE_IMAGES => Arc::new(analyze_images),
        EXTRACT_DOCUMENT_DATA => Arc::new(extract_documents),
        RUN_RISK_ASSESSMENT => Arc::new(assess_risk),
        GENERATE_FINAL_REPORT => Arc::new(write_report),
        STORE_APPLICATION_RESULTS => {
            let decisions = Arc::clone(decisions);
            Arc::new(
                move |state: &ApplicationState, _: &StepParams| -> Result<StepPayload, CapabilityError> {
                    store_results(state, &decisions)
                },
            )
        }
        other => {
            let step = other.to_string();
            Arc::new(
                move |_: &ApplicationState, _: &StepParams| -> Result<StepPayload, CapabilityError> {
                    Err(CapabilityError::Permanent(format!(
                        "no simulated capability for {step}"
                    )))
                },
            )
        }
    }
}

fn analyze_customer(
    _state: &ApplicationState,
    params: &StepParams,
) -> Result<StepPayload, CapabilityError> {
    let age = params
        .get("age")
        .and_then(Value::as_u64)
        .ok_or_else(|| CapabilityError::Permanent("age must be a whole number".to_string()))?;
    let location = params
        .get("location")
        .and_then(Value::as_str)
        .unwrap_or("unknown");

    let (age_band, profile_risk) = match age {
        0..=17 => {
            return Err(CapabilityError::Permanent(
                "applicant is below the minimum age".to_string(),
            ))
        }
        18..=24 => ("18-24", 35.0),
        25..=64 => ("25-64", 15.0),
        _ => ("65+", 25.0),
    };

    Ok(StepPayload::succeeded(json!({
        "age_band": age_band,
        "location": location,
        "profile_risk": profile_risk,
    })))
}

fn analyze_images(
    _state: &ApplicationState,
    params: &StepParams,
) -> Result<StepPayload, CapabilityError> {
    let refs = string_list(params, "image_refs");
    let damaged = refs
        .iter()
        .filter(|reference| reference.to_ascii_lowercase().contains("damage"))
        .count();

    Ok(StepPayload::succeeded(json!({
        "images_analyzed": refs.len(),
        "damage_detected": damaged > 0,
        "vehicle_risk": 10.0 * damaged as f64,
    })))
}

fn extract_documents(
    _state: &ApplicationState,
    params: &StepParams,
) -> Result<StepPayload, CapabilityError> {
    let refs = string_list(params, "document_refs");
    if let Some(unreadable) = refs
        .iter()
        .find(|reference| !reference.to_ascii_lowercase().ends_with(".pdf"))
    {
        return Err(CapabilityError::Permanent(format!(
            "document {unreadable} is not a readable PDF"
        )));
    }
    let prior_claims = refs
        .iter()
        .filter(|reference| reference.to_ascii_lowercase().contains("claim"))
        .count();

    Ok(StepPayload::succeeded(json!({
        "documents_processed": refs.len(),
        "prior_claims": prior_claims,
    })))
}

fn assess_risk(
    state: &ApplicationState,
    _params: &StepParams,
) -> Result<StepPayload, CapabilityError> {
    let field = |step: &str, key: &str| {
        state
            .result(step)
            .and_then(|payload| payload.data.get(key))
            .and_then(Value::as_f64)
            .unwrap_or(0.0)
    };

    let base = field(ANALYZE_CUSTOMER_DATA, "profile_risk");
    let vehicle = field(ANALYZE_VEHICLE_IMAGES, "vehicle_risk");
    let claims = field(EXTRACT_DOCUMENT_DATA, "prior_claims");
    let risk_score = (base + vehicle + 15.0 * claims).min(100.0);
    let fraud_probability = (0.05 + 0.1 * claims).min(0.95);
    let premium = 600.0 + risk_score * 10.0;

    Ok(StepPayload::succeeded(json!({
        "final_risk_score": risk_score,
        "fraud_probability": fraud_probability,
        "premium_amount": premium,
        "recommendation": if risk_score > 80.0 || fraud_probability > 0.7 {
            "REFER"
        } else {
            "APPROVE"
        },
    })))
}

fn write_report(
    state: &ApplicationState,
    _params: &StepParams,
) -> Result<StepPayload, CapabilityError> {
    let risk = state
        .result(RUN_RISK_ASSESSMENT)
        .map(|payload| payload.data.clone())
        .ok_or_else(|| CapabilityError::Permanent("risk assessment missing".to_string()))?;

    let narrative = format!(
        "Application {}: risk score {}/100, annual premium ${:.2}, fraud probability {:.1}%. Recommendation: {}.",
        state.application_id(),
        risk["final_risk_score"],
        risk["premium_amount"].as_f64().unwrap_or_default(),
        risk["fraud_probability"].as_f64().unwrap_or_default() * 100.0,
        risk["recommendation"].as_str().unwrap_or("REFER"),
    );

    Ok(StepPayload::succeeded(json!({
        "narrative": narrative,
        "risk": risk,
    })))
}

fn store_results(
    state: &ApplicationState,
    decisions: &DecisionStore,
) -> Result<StepPayload, CapabilityError> {
    let risk = state
        .result(GENERATE_FINAL_REPORT)
        .map(|payload| payload.data["risk"].clone())
        .ok_or_else(|| CapabilityError::Permanent("final report missing".to_string()))?;

    let record_id = decisions.push(StoredDecision {
        application_id: state.application_id().0.clone(),
        risk_score: risk["final_risk_score"].as_f64().unwrap_or_default(),
        fraud_probability: risk["fraud_probability"].as_f64().unwrap_or_default(),
        premium_quoted: risk["premium_amount"].as_f64().unwrap_or_default(),
        recommendation: risk["recommendation"]
            .as_str()
            .unwrap_or("REFER")
            .to_string(),
    });

    Ok(StepPayload::succeeded(json!({
        "stored": true,
        "record_id": record_id,
    })))
}

fn string_list(params: &StepParams, key: &str) -> Vec<String> {
    params
        .get(key)
        .and_then(Value::as_array)
        .map(|values| {
            values
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
