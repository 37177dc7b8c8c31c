use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use super::common::*;
use crate::workflows::underwriting::blueprint::{
    ANALYZE_CUSTOMER_DATA, EXTRACT_DOCUMENT_DATA, STORE_APPLICATION_RESULTS,
};
use crate::workflows::underwriting::{
    ApplicationState, Capability, CapabilityError, CapabilityRegistry, Outcome, RegistryError,
    RequiredInput, StepDescriptor, StepName, StepParams, StepPayload,
};

fn echo(state: &ApplicationState, params: &StepParams) -> Result<StepPayload, CapabilityError> {
    Ok(StepPayload::succeeded(json!({
        "application_id": state.application_id().0,
        "params": params.len(),
    })))
}

#[test]
fn resolve_rejects_unknown_steps() {
    let harness = Harness::standard();

    let err = harness
        .registry
        .resolve("analyse_customer_data")
        .expect_err("typo is not registered");

    assert_eq!(
        err,
        RegistryError::UnknownStep(StepName::new("analyse_customer_data"))
    );
}

#[test]
fn register_rejects_duplicate_names() {
    let mut registry = CapabilityRegistry::default();
    registry
        .register(StepDescriptor::new("lookup", "first"), Arc::new(echo))
        .expect("first registration");

    let err = registry
        .register(StepDescriptor::new("lookup", "second"), Arc::new(echo))
        .expect_err("duplicate rejected");

    assert_eq!(err, RegistryError::DuplicateStep(StepName::new("lookup")));
    assert_eq!(registry.len(), 1);
}

#[test]
fn steps_keep_registration_order() {
    let harness = Harness::standard();

    let names: Vec<&str> = harness
        .registry
        .steps()
        .map(|descriptor| descriptor.name.as_str())
        .collect();

    assert_eq!(
        names,
        vec![
            "analyze_customer_data",
            "analyze_vehicle_images",
            "extract_document_data",
            "run_comprehensive_risk_assessment",
            "generate_final_report",
            "store_application_results",
        ]
    );
    let terminal: Vec<&str> = harness
        .registry
        .terminal_steps()
        .map(|descriptor| descriptor.name.as_str())
        .collect();
    assert_eq!(terminal, vec![STORE_APPLICATION_RESULTS]);
}

#[test]
fn invoke_returns_success_payloads() {
    let mut registry = CapabilityRegistry::default();
    registry
        .register(StepDescriptor::new("echo", "echo"), Arc::new(echo))
        .expect("registered");
    let state = state_from(inputs(0, 0));
    let mut params = StepParams::new();
    params.insert("age".to_string(), json!(35));

    let outcome = registry.invoke("echo", &state, &params).expect("known step");

    match outcome {
        Outcome::Success(payload) => {
            assert!(payload.success);
            assert_eq!(payload.data["application_id"], json!("app-test"));
            assert_eq!(payload.data["params"], json!(1));
        }
        other => panic!("expected success, got {other:?}"),
    }
}

#[test]
fn invoke_classifies_capability_errors() {
    let harness = Harness::standard();
    let state = state_from(inputs(0, 0));
    let capability = harness.capability(ANALYZE_CUSTOMER_DATA);
    capability.fail_transiently(1);
    capability.push(Err(CapabilityError::Permanent("applicant unknown".to_string())));

    let first = harness
        .registry
        .invoke(ANALYZE_CUSTOMER_DATA, &state, &StepParams::new())
        .expect("known step");
    let second = harness
        .registry
        .invoke(ANALYZE_CUSTOMER_DATA, &state, &StepParams::new())
        .expect("known step");

    assert!(matches!(first, Outcome::TransientFailure(_)));
    assert_eq!(
        second,
        Outcome::PermanentFailure("applicant unknown".to_string())
    );
}

#[test]
fn invoke_times_out_as_transient_failure() {
    let harness = Harness::with_timeout(1, Duration::from_millis(20));
    let state = state_from(inputs(0, 0));
    harness
        .capability(ANALYZE_CUSTOMER_DATA)
        .delay_by(Duration::from_millis(250));

    let outcome = harness
        .registry
        .invoke(ANALYZE_CUSTOMER_DATA, &state, &StepParams::new())
        .expect("known step");

    match outcome {
        Outcome::TransientFailure(reason) => assert!(reason.contains("timed out")),
        other => panic!("expected timeout, got {other:?}"),
    }
}

#[test]
fn step_timeout_overrides_the_registry_default() {
    let mut registry = CapabilityRegistry::new(Duration::from_secs(5));
    let slow = |_: &ApplicationState, _: &StepParams| -> Result<StepPayload, CapabilityError> {
        std::thread::sleep(Duration::from_millis(250));
        Ok(StepPayload::succeeded(json!({})))
    };
    registry
        .register(
            StepDescriptor::new("slow", "sleeps").timeout(Duration::from_millis(20)),
            Arc::new(slow),
        )
        .expect("registered");

    let outcome = registry
        .invoke("slow", &state_from(inputs(0, 0)), &StepParams::new())
        .expect("known step");

    assert!(matches!(outcome, Outcome::TransientFailure(_)));
}

#[test]
fn panicking_capability_is_a_permanent_failure() {
    struct Broken;

    impl Capability for Broken {
        fn invoke(
            &self,
            _state: &ApplicationState,
            _params: &StepParams,
        ) -> Result<StepPayload, CapabilityError> {
            panic!("capability bug");
        }
    }

    let mut registry = CapabilityRegistry::default();
    registry
        .register(StepDescriptor::new("broken", "panics"), Arc::new(Broken))
        .expect("registered");

    let outcome = registry
        .invoke("broken", &state_from(inputs(0, 0)), &StepParams::new())
        .expect("known step");

    assert!(matches!(outcome, Outcome::PermanentFailure(_)));
}

#[test]
fn invoke_rejects_unknown_steps() {
    let harness = Harness::standard();

    let result = harness.registry.invoke(
        "generate_everything",
        &state_from(inputs(0, 0)),
        &StepParams::new(),
    );

    assert!(matches!(result, Err(RegistryError::UnknownStep(_))));
}

#[test]
fn params_carry_required_inputs() {
    let harness = Harness::standard();
    let state = state_from(inputs(0, 2));
    let descriptor = harness
        .registry
        .resolve(EXTRACT_DOCUMENT_DATA)
        .expect("registered");

    assert!(!descriptor.is_satisfied_by(&state));
    assert!(descriptor
        .required_inputs
        .contains(&RequiredInput::Documents));

    let customer = harness
        .registry
        .resolve(ANALYZE_CUSTOMER_DATA)
        .expect("registered");
    let params = customer.params_from(&state);
    assert_eq!(params["application_id"], json!("app-test"));
    assert_eq!(params["age"], json!(35));
    assert_eq!(params["location"], json!("A"));
}
