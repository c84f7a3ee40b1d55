//! Test gating: does this diff require new or updated tests?

use tracing::{debug, instrument, warn};

use crate::core::types::{GatingDecision, PrContextWithTests, ReviewAnalysis};
use crate::llm::{self, ModelClient};
use crate::prompt::PromptBuilder;

const GATING_DECISION_SCHEMA: &str = include_str!("../../schemas/gating_decision.schema.json");
const SYSTEM_PROMPT: &str =
    "You decide whether a diff requires unit tests. You respond only with JSON.";

#[derive(Debug, Clone)]
pub struct TestGate {
    prompt_budget_bytes: usize,
}

impl TestGate {
    pub fn new(prompt_budget_bytes: usize) -> Self {
        Self {
            prompt_budget_bytes,
        }
    }

    /// Decide whether the diff needs tests. A model failure defaults to "no",
    /// so a flaky gating call can only skip generation, never abort the run.
    #[instrument(skip_all)]
    pub fn decide(
        &self,
        client: &dyn ModelClient,
        ctx: &PrContextWithTests,
        review: Option<&ReviewAnalysis>,
    ) -> GatingDecision {
        let pack = PromptBuilder::new(self.prompt_budget_bytes)
            .build_gating(ctx, review.map(|r| r.summary.as_str()));

        match llm::generate::<GatingDecision>(
            client,
            "gating_decision",
            GATING_DECISION_SCHEMA,
            SYSTEM_PROMPT,
            &pack.render(),
        ) {
            Ok(decision) => {
                debug!(should_generate = decision.should_generate, "gating decided");
                decision
            }
            Err(err) => {
                warn!(error = %format!("{err:#}"), "gating failed, defaulting to no generation");
                GatingDecision::gating_error()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{FileDiff, PrContext, TestFile};
    use crate::test_support::ScriptedModelClient;

    fn ctx() -> PrContextWithTests {
        PrContextWithTests {
            context: PrContext {
                owner: "octo".to_string(),
                repo: "widgets".to_string(),
                pull_number: Some(3),
                head_ref: "agent/x".to_string(),
                base_ref: "main".to_string(),
                title: "Add page".to_string(),
                changed_files: vec![FileDiff {
                    path: "components/Widget.tsx".to_string(),
                    raw_patch: "diff --git a/components/Widget.tsx b/components/Widget.tsx\n+x"
                        .to_string(),
                    status: Some("added".to_string()),
                    additions: Some(1),
                    deletions: Some(0),
                    content: None,
                    excluded: false,
                }],
                commit_messages: vec!["Step 1".to_string()],
            },
            existing_test_files: vec![TestFile {
                path: "__tests__/unit/format.test.ts".to_string(),
                content: "test('fmt', () => {});\n".to_string(),
            }],
        }
    }

    #[test]
    fn positive_decision_parses() {
        let client = ScriptedModelClient::with_json(vec![
            r#"{"should_generate":true,"reasoning":"new component is untested","recommendation":"add Widget.test.tsx"}"#,
        ]);
        let decision = TestGate::new(10_000).decide(&client, &ctx(), None);
        assert!(decision.should_generate);

        let request = client.requests().remove(0);
        assert!(request.user_prompt.contains("__tests__/unit/format.test.ts"));
    }

    #[test]
    fn failure_defaults_to_skip_with_reason() {
        let client = ScriptedModelClient::with_json(vec!["x", "y"]);
        let decision = TestGate::new(10_000).decide(&client, &ctx(), None);
        assert!(!decision.should_generate);
        assert_eq!(decision.reasoning, "Gating error");
    }
}
