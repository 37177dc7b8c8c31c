//! Reasoning-advisory contract and the bridge to text-completion models.
//!
//! Advisors are untrusted. Whatever they propose is validated by the reasoning policy before
//! it can influence an application.

use serde::{Deserialize, Serialize};

use super::super::domain::StepParams;
use super::super::registry::CapabilityRegistry;
use super::super::state::StateSummary;

/// Advisory action that asks for the workflow to finish.
pub const FINISH_ACTION: &str = "finish_processing";
/// Advisory action that asks for a human reviewer.
pub const REVIEW_ACTION: &str = "flag_for_human_review";
/// Advisory action that asks for the application to be failed. Never offered in prompts
/// and always rejected during validation.
pub const ABORT_ACTION: &str = "abort_processing";

/// Proposal returned by an advisor. Step names are raw strings until validated.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "proposal", rename_all = "snake_case")]
pub enum ProposedDecision {
    RunStep {
        step: String,
        params: StepParams,
        reasoning: String,
    },
    Complete {
        reasoning: String,
    },
    NeedsReview {
        reason: String,
    },
    Failed {
        reason: String,
    },
}

/// The advisor could not produce a usable proposal.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("advisor unavailable: {0}")]
pub struct AdvisoryUnavailable(pub String);

pub trait ReasoningAdvisor: Send + Sync {
    fn propose(&self, summary: &StateSummary) -> Result<ProposedDecision, AdvisoryUnavailable>;
}

/// Advisor that is never available. Orchestration then runs on the deterministic order alone.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoAdvisor;

impl ReasoningAdvisor for NoAdvisor {
    fn propose(&self, _summary: &StateSummary) -> Result<ProposedDecision, AdvisoryUnavailable> {
        Err(AdvisoryUnavailable("no advisor configured".to_string()))
    }
}

/// Text completion backend, e.g. a hosted language model.
pub trait CompletionClient: Send + Sync {
    fn complete(&self, prompt: &str) -> Result<String, AdvisoryUnavailable>;
}

/// Step catalogue entry rendered into the advisory prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepOverview {
    pub name: String,
    pub description: String,
    pub requires: Vec<String>,
}

/// Advisor that prompts a completion backend and parses its reply.
pub struct CompletionAdvisor<C> {
    client: C,
    catalogue: Vec<StepOverview>,
}

impl<C> CompletionAdvisor<C>
where
    C: CompletionClient,
{
    pub fn new(client: C, registry: &CapabilityRegistry) -> Self {
        let catalogue = registry
            .steps()
            .map(|descriptor| StepOverview {
                name: descriptor.name.to_string(),
                description: descriptor.description.clone(),
                requires: descriptor
                    .required_inputs
                    .iter()
                    .map(ToString::to_string)
                    .collect(),
            })
            .collect();
        Self { client, catalogue }
    }

    pub fn catalogue(&self) -> &[StepOverview] {
        &self.catalogue
    }
}

impl<C> ReasoningAdvisor for CompletionAdvisor<C>
where
    C: CompletionClient,
{
    fn propose(&self, summary: &StateSummary) -> Result<ProposedDecision, AdvisoryUnavailable> {
        let prompt = render_prompt(summary, &self.catalogue);
        let reply = self.client.complete(&prompt)?;
        parse_proposal(&reply)
    }
}

pub fn render_prompt(summary: &StateSummary, catalogue: &[StepOverview]) -> String {
    let state = serde_json::to_string_pretty(summary).unwrap_or_else(|_| "{}".to_string());
    let tools = catalogue
        .iter()
        .map(|step| {
            if step.requires.is_empty() {
                format!("- {}: {}", step.name, step.description)
            } else {
                format!(
                    "- {}: {} (requires {})",
                    step.name,
                    step.description,
                    step.requires.join(", ")
                )
            }
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "You coordinate the processing of an insurance application.\n\n\
         CURRENT APPLICATION STATE:\n{state}\n\n\
         AVAILABLE STEPS:\n{tools}\n\
         - {FINISH_ACTION}: finish the workflow once every required step has succeeded\n\
         - {REVIEW_ACTION}: hand the application to a human reviewer\n\n\
         Never repeat a completed step and only choose steps whose requirements are met.\n\
         Respond with a single JSON object:\n\
         {{\"action\": \"step_name\", \"params\": {{}}, \"reasoning\": \"why this step\"}}\n"
    )
}

#[derive(Debug, Deserialize)]
struct RawProposal {
    action: String,
    #[serde(default)]
    params: Option<StepParams>,
    #[serde(default)]
    reasoning: Option<String>,
}

/// Extract the first `{ ... }` span of a completion and read it as a proposal.
pub fn parse_proposal(reply: &str) -> Result<ProposedDecision, AdvisoryUnavailable> {
    let (start, end) = match (reply.find('{'), reply.rfind('}')) {
        (Some(start), Some(end)) if start < end => (start, end),
        _ => {
            return Err(AdvisoryUnavailable(
                "reply did not contain a JSON object".to_string(),
            ))
        }
    };

    let raw: RawProposal = serde_json::from_str(&reply[start..=end])
        .map_err(|error| AdvisoryUnavailable(format!("unreadable proposal: {error}")))?;
    let action = raw.action.trim();
    let reasoning = raw
        .reasoning
        .filter(|text| !text.trim().is_empty())
        .unwrap_or_else(|| "no reasoning given".to_string());

    let proposal = match action {
        "" => {
            return Err(AdvisoryUnavailable(
                "proposal did not name an action".to_string(),
            ))
        }
        FINISH_ACTION => ProposedDecision::Complete { reasoning },
        REVIEW_ACTION => ProposedDecision::NeedsReview { reason: reasoning },
        ABORT_ACTION => ProposedDecision::Failed { reason: reasoning },
        step => ProposedDecision::RunStep {
            step: step.to_string(),
            params: raw.params.unwrap_or_default(),
            reasoning,
        },
    };
    Ok(proposal)
}
