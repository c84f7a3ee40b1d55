//! Code reviewer: diff context -> structured advisory review.

use tracing::{instrument, warn};

use crate::core::types::{PrContext, ReviewAnalysis};
use crate::llm::{self, ModelClient};
use crate::prompt::PromptBuilder;

const REVIEW_ANALYSIS_SCHEMA: &str = include_str!("../../schemas/review_analysis.schema.json");
const SYSTEM_PROMPT: &str =
    "You are a code reviewer for an automated change pipeline. You respond only with JSON.";

#[derive(Debug, Clone)]
pub struct Reviewer {
    prompt_budget_bytes: usize,
}

impl Reviewer {
    pub fn new(prompt_budget_bytes: usize) -> Self {
        Self {
            prompt_budget_bytes,
        }
    }

    /// Review a diff context. Never fails: the review is advisory, so model
    /// errors degrade to the parse-error fallback analysis.
    #[instrument(skip_all, fields(files = context.changed_files.len()))]
    pub fn review(&self, client: &dyn ModelClient, context: &PrContext) -> ReviewAnalysis {
        let pack = PromptBuilder::new(self.prompt_budget_bytes).build_reviewer(context);

        match llm::generate::<ReviewAnalysis>(
            client,
            "review_analysis",
            REVIEW_ANALYSIS_SCHEMA,
            SYSTEM_PROMPT,
            &pack.render(),
        ) {
            Ok(analysis) => analysis,
            Err(err) => {
                warn!(error = %format!("{err:#}"), "review failed, using fallback analysis");
                ReviewAnalysis::parse_error()
            }
        }
    }
}
