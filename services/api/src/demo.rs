use std::sync::Arc;

use clap::Args;
use insurance_engine::config::OrchestrationConfig;
use insurance_engine::error::AppError;
use insurance_engine::workflows::underwriting::{
    ApplicationInputs, ApplicationReport, BusEvent, BusMessage, NoAdvisor, Orchestrator,
    ReasoningPolicy, UnderwritingService,
};
use serde_json::json;

use crate::infra::{build_engine, FaultPlan, InMemoryApplicationRepository, StoredDecision};

#[derive(Args, Debug)]
pub(crate) struct DemoArgs {
    /// Applicant age in years
    #[arg(long, default_value_t = 35)]
    pub(crate) age: u32,
    /// Applicant location
    #[arg(long, default_value = "A")]
    pub(crate) location: String,
    /// Optional customer identifier
    #[arg(long)]
    pub(crate) customer_id: Option<String>,
    /// Uploaded vehicle image reference (repeatable)
    #[arg(long = "image")]
    pub(crate) images: Vec<String>,
    /// Uploaded document reference (repeatable)
    #[arg(long = "document")]
    pub(crate) documents: Vec<String>,
    /// Make a step fail transiently N times first, as STEP=N (repeatable)
    #[arg(long, value_parser = parse_flaky)]
    pub(crate) flaky: Vec<(String, u32)>,
    /// Make a step fail permanently (repeatable)
    #[arg(long)]
    pub(crate) reject: Vec<String>,
    /// Override the per-step retry ceiling
    #[arg(long)]
    pub(crate) max_retries: Option<u32>,
}

pub(crate) fn parse_flaky(raw: &str) -> Result<(String, u32), String> {
    let (step, count) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected STEP=N, got '{raw}'"))?;
    let count = count
        .trim()
        .parse::<u32>()
        .map_err(|err| format!("invalid failure count in '{raw}' ({err})"))?;
    Ok((step.trim().to_string(), count))
}

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let DemoArgs {
        age,
        location,
        customer_id,
        images,
        documents,
        flaky,
        reject,
        max_retries,
    } = args;

    let mut config = OrchestrationConfig::default();
    if let Some(max_retries) = max_retries {
        config.step_max_retries = max_retries;
    }
    let faults = FaultPlan {
        flaky: flaky.into_iter().collect(),
        rejected: reject.into_iter().collect(),
    };

    let engine = build_engine(&config, &faults)?;
    let policy = Arc::new(ReasoningPolicy::new(
        Arc::new(NoAdvisor),
        Arc::clone(&engine.registry),
    ));
    let orchestrator = Orchestrator::new(
        Arc::clone(&engine.registry),
        policy,
        Arc::clone(&engine.bus),
        config.orchestrator_settings(),
    );
    let service = UnderwritingService::new(
        Arc::new(InMemoryApplicationRepository::default()),
        orchestrator,
        config.submission_rules(),
    );

    let mut inputs = ApplicationInputs {
        customer_id,
        image_refs: images,
        document_refs: documents,
        ..ApplicationInputs::default()
    };
    inputs.applicant.insert("age".to_string(), json!(age));
    inputs.applicant.insert("location".to_string(), json!(location));

    println!("Insurance application demo");
    let submitted = service.submit(inputs)?;
    println!(
        "Submitted {} with {} image(s) and {} document(s)",
        submitted.application_id(),
        submitted.inputs().image_refs.len(),
        submitted.inputs().document_refs.len()
    );

    let processed = service.process(submitted.application_id())?;

    println!("\nMessage log");
    for message in service.messages(processed.application_id()) {
        println!("  {}", describe(&message));
    }

    if let Some(report) = engine.audit.reports().last() {
        render_report(report);
    }
    render_decisions(&engine.decisions.records());

    Ok(())
}

fn describe(message: &BusMessage) -> String {
    let body = match &message.event {
        BusEvent::StatusUpdate { status, detail } => format!("{status}: {detail}"),
        BusEvent::StepRequest { step, attempt } => format!("run {step} (attempt {attempt})"),
        BusEvent::StepResult { step, success } => {
            format!("{step} {}", if *success { "succeeded" } else { "reported failure" })
        }
        BusEvent::Error {
            step,
            reason,
            retryable,
        } => {
            let step = step
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_else(|| "orchestrator".to_string());
            let retry = if *retryable { "will retry" } else { "no retry" };
            format!("{step} error: {reason} ({retry})")
        }
        BusEvent::Audit { .. } => "final report published".to_string(),
    };
    format!("#{:<4} {:<13} {body}", message.sequence, message.event.kind())
}

fn render_report(report: &ApplicationReport) {
    println!("\nFinal report");
    println!("  {}", report.summary());
    for step in &report.steps {
        println!(
            "  - {:<36} {:<9} {} attempt(s)",
            step.step.as_str(),
            if step.success { "ok" } else { "failed" },
            step.attempts
        );
    }
    for (step, failures) in &report.failed_attempts {
        println!("  ! {step} failed {failures} time(s)");
    }
    if let Some(duration) = report.duration_ms() {
        println!("  Processing time: {duration} ms");
    }
}

fn render_decisions(decisions: &[StoredDecision]) {
    if decisions.is_empty() {
        println!("\nNo decision stored; the application awaits human review.");
        return;
    }
    println!("\nStored decisions");
    for decision in decisions {
        println!(
            "  {}: risk {:.0}/100, fraud {:.1}%, premium ${:.2}, {}",
            decision.application_id,
            decision.risk_score,
            decision.fraud_probability * 100.0,
            decision.premium_quoted,
            decision.recommendation
        );
    }
}
