//! Test repairer: failing output -> replacement test files.

use tracing::{debug, instrument, warn};

use crate::core::proposals;
use crate::core::types::{PrContextWithTests, TestProposal, TestProposalSet};
use crate::llm::{self, ModelClient};
use crate::prompt::PromptBuilder;

const TEST_PROPOSALS_SCHEMA: &str = include_str!("../../schemas/test_proposals.schema.json");
const SYSTEM_PROMPT: &str =
    "You repair failing unit tests for an automated change pipeline. You respond only with JSON.";

#[derive(Debug, Clone)]
pub struct TestFixer {
    prompt_budget_bytes: usize,
}

impl TestFixer {
    pub fn new(prompt_budget_bytes: usize) -> Self {
        Self {
            prompt_budget_bytes,
        }
    }

    /// Propose replacement tests for a failing run. The failing output goes
    /// into the prompt verbatim; output passes through the same proposal laws
    /// as the generator. A model failure degrades to an empty list (the
    /// repair iteration is spent).
    #[instrument(skip_all, fields(iteration))]
    pub fn propose_fixes(
        &self,
        client: &dyn ModelClient,
        ctx: &PrContextWithTests,
        failing_output: &str,
        iteration: u32,
    ) -> Vec<TestProposal> {
        let pack = PromptBuilder::new(self.prompt_budget_bytes)
            .build_test_fixer(ctx, failing_output, iteration);

        match llm::generate::<TestProposalSet>(
            client,
            "test_proposals",
            TEST_PROPOSALS_SCHEMA,
            SYSTEM_PROMPT,
            &pack.render(),
        ) {
            Ok(set) => {
                let normalized = proposals::normalize(set.proposals, &ctx.context.changed_files);
                debug!(proposals = normalized.len(), "fix proposals produced");
                normalized
            }
            Err(err) => {
                warn!(error = %format!("{err:#}"), "test fixer failed, proposing nothing");
                Vec::new()
            }
        }
    }
}
