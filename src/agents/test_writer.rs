//! Test generator: propose unit tests for a diff.

use tracing::{debug, instrument, warn};

use crate::core::proposals;
use crate::core::types::{PrContextWithTests, TestProposal, TestProposalSet};
use crate::llm::{self, ModelClient};
use crate::prompt::PromptBuilder;

const TEST_PROPOSALS_SCHEMA: &str = include_str!("../../schemas/test_proposals.schema.json");
const SYSTEM_PROMPT: &str =
    "You write unit tests for an automated change pipeline. You respond only with JSON.";

#[derive(Debug, Clone)]
pub struct TestWriter {
    prompt_budget_bytes: usize,
}

impl TestWriter {
    pub fn new(prompt_budget_bytes: usize) -> Self {
        Self {
            prompt_budget_bytes,
        }
    }

    /// Propose tests for the diff. Output passes through the proposal laws
    /// (test-root containment, extension correctness, base-name dedup) before
    /// being returned. A model failure degrades to an empty list.
    #[instrument(skip_all)]
    pub fn propose(
        &self,
        client: &dyn ModelClient,
        ctx: &PrContextWithTests,
        review_summary: Option<&str>,
    ) -> Vec<TestProposal> {
        let pack =
            PromptBuilder::new(self.prompt_budget_bytes).build_test_writer(ctx, review_summary);

        match llm::generate::<TestProposalSet>(
            client,
            "test_proposals",
            TEST_PROPOSALS_SCHEMA,
            SYSTEM_PROMPT,
            &pack.render(),
        ) {
            Ok(set) => {
                let normalized = proposals::normalize(set.proposals, &ctx.context.changed_files);
                debug!(proposals = normalized.len(), "test proposals produced");
                normalized
            }
            Err(err) => {
                warn!(error = %format!("{err:#}"), "test writer failed, proposing nothing");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{FileDiff, PrContext};
    use crate::test_support::ScriptedModelClient;

    fn ctx_with_markup_widget() -> PrContextWithTests {
        PrContextWithTests {
            context: PrContext {
                owner: "octo".to_string(),
                repo: "widgets".to_string(),
                pull_number: Some(3),
                head_ref: "agent/x".to_string(),
                base_ref: "main".to_string(),
                title: "Add widget".to_string(),
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
            existing_test_files: Vec::new(),
        }
    }

    /// Name-collision law: both extensions proposed for one base, markup wins.
    #[test]
    fn colliding_proposals_keep_only_the_markup_variant() {
        let client = ScriptedModelClient::with_json(vec![
            r#"{"proposals":[
                {"path":"__tests__/unit/Widget.test.ts","test_content":"plain","action":"create","old_path":""},
                {"path":"__tests__/unit/Widget.test.tsx","test_content":"markup","action":"create","old_path":""}
            ]}"#,
        ]);
        let writer = TestWriter::new(10_000);
        let proposals = writer.propose(&client, &ctx_with_markup_widget(), Some("review"));

        assert_eq!(proposals.len(), 1);
        assert_eq!(proposals[0].path, "__tests__/unit/Widget.test.tsx");
    }

    #[test]
    fn proposals_outside_the_test_root_are_rerooted() {
        let client = ScriptedModelClient::with_json(vec![
            r#"{"proposals":[{"path":"src/Widget.test.ts","test_content":"t","action":"create","old_path":""}]}"#,
        ]);
        let writer = TestWriter::new(10_000);
        let proposals = writer.propose(&client, &ctx_with_markup_widget(), None);
        assert_eq!(proposals[0].path, "__tests__/unit/Widget.test.tsx");
    }

    #[test]
    fn failure_degrades_to_empty_list() {
        let client = ScriptedModelClient::with_json(vec!["x", "y"]);
        let writer = TestWriter::new(10_000);
        assert!(writer.propose(&client, &ctx_with_markup_widget(), None).is_empty());
    }
}
