use std::sync::Arc;
use std::time::Duration;

use super::domain::RequiredInput;
use super::registry::{Capability, CapabilityRegistry, RegistryError, StepDescriptor};

pub const ANALYZE_CUSTOMER_DATA: &str = "analyze_customer_data";
pub const ANALYZE_VEHICLE_IMAGES: &str = "analyze_vehicle_images";
pub const EXTRACT_DOCUMENT_DATA: &str = "extract_document_data";
pub const RUN_RISK_ASSESSMENT: &str = "run_comprehensive_risk_assessment";
pub const GENERATE_FINAL_REPORT: &str = "generate_final_report";
pub const STORE_APPLICATION_RESULTS: &str = "store_application_results";

pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// Standard insurance underwriting steps in their fixed dependency order.
#[derive(Debug, Clone)]
pub struct UnderwritingBlueprint {
    steps: Vec<StepDescriptor>,
}

impl UnderwritingBlueprint {
    pub fn standard() -> Self {
        Self::with_max_retries(DEFAULT_MAX_RETRIES)
    }

    pub fn with_max_retries(max_retries: u32) -> Self {
        let steps = standard_steps()
            .into_iter()
            .map(|descriptor| descriptor.max_retries(max_retries))
            .collect();
        Self { steps }
    }

    pub fn descriptors(&self) -> &[StepDescriptor] {
        &self.steps
    }

    /// Build a registry binding each step to the capability returned by `capability_for`.
    pub fn build_registry<F>(
        &self,
        default_timeout: Duration,
        mut capability_for: F,
    ) -> Result<CapabilityRegistry, RegistryError>
    where
        F: FnMut(&StepDescriptor) -> Arc<dyn Capability>,
    {
        let mut registry = CapabilityRegistry::new(default_timeout);
        for descriptor in &self.steps {
            let capability = capability_for(descriptor);
            registry.register(descriptor.clone(), capability)?;
        }
        Ok(registry)
    }
}

fn standard_steps() -> Vec<StepDescriptor> {
    vec![
        StepDescriptor::new(
            ANALYZE_CUSTOMER_DATA,
            "Profile the applicant from the structured submission data.",
        )
        .requires(RequiredInput::Applicant("age".to_string()))
        .requires(RequiredInput::Applicant("location".to_string())),
        StepDescriptor::new(
            ANALYZE_VEHICLE_IMAGES,
            "Assess vehicle condition and damage from the uploaded images.",
        )
        .requires_result(ANALYZE_CUSTOMER_DATA)
        .requires(RequiredInput::Images),
        StepDescriptor::new(
            EXTRACT_DOCUMENT_DATA,
            "Extract licence, registration and claims data from the uploaded documents.",
        )
        .requires_result(ANALYZE_CUSTOMER_DATA)
        .requires(RequiredInput::Documents),
        StepDescriptor::new(
            RUN_RISK_ASSESSMENT,
            "Score risk, premium and fraud likelihood from everything collected so far.",
        )
        .requires_result(ANALYZE_CUSTOMER_DATA),
        StepDescriptor::new(
            GENERATE_FINAL_REPORT,
            "Write the narrative underwriting report from the risk assessment.",
        )
        .requires_result(RUN_RISK_ASSESSMENT),
        StepDescriptor::new(
            STORE_APPLICATION_RESULTS,
            "Persist the decision and its evidence to the audit store.",
        )
        .requires_result(GENERATE_FINAL_REPORT)
        .terminal(),
    ]
}
