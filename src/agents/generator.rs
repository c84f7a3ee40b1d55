//! File-change generator: one step -> complete post-state file contents.

use tracing::{debug, instrument, warn};

use crate::core::changes::AccumulatedChanges;
use crate::core::types::{FileChange, FileChangeSet, Step};
use crate::llm::{self, ModelClient};
use crate::prompt::PromptBuilder;

const FILE_CHANGES_SCHEMA: &str = include_str!("../../schemas/file_changes.schema.json");
const SYSTEM_PROMPT: &str =
    "You implement one step of a planned code change. You respond only with JSON.";

#[derive(Debug, Clone)]
pub struct ChangeGenerator {
    prompt_budget_bytes: usize,
}

impl ChangeGenerator {
    pub fn new(prompt_budget_bytes: usize) -> Self {
        Self {
            prompt_budget_bytes,
        }
    }

    /// Produce the file changes for one step.
    ///
    /// The model sees the base snapshot plus the accumulated overlay from
    /// earlier steps. A model failure degrades to an empty list: the step
    /// contributes no code but the pipeline advances.
    #[instrument(skip_all, fields(step = %step.name))]
    pub fn generate_changes(
        &self,
        client: &dyn ModelClient,
        step: &Step,
        snapshot: &str,
        accumulated: &AccumulatedChanges,
        rules: &str,
    ) -> Vec<FileChange> {
        let pack = PromptBuilder::new(self.prompt_budget_bytes)
            .build_generator(step, snapshot, accumulated, rules);

        match llm::generate::<FileChangeSet>(
            client,
            "file_changes",
            FILE_CHANGES_SCHEMA,
            SYSTEM_PROMPT,
            &pack.render(),
        ) {
            Ok(set) => {
                debug!(changes = set.changes.len(), "changes produced");
                set.changes
            }
            Err(err) => {
                warn!(error = %format!("{err:#}"), "generator failed, treating step as no-op");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedModelClient;

    fn step() -> Step {
        Step {
            name: "Wire into RecipesPage".to_string(),
            description: "Use the form".to_string(),
            plan: "app/recipes/page.tsx".to_string(),
        }
    }

    #[test]
    fn changes_parse_and_prompt_carries_overlay() {
        let client = ScriptedModelClient::with_json(vec![
            r#"{"changes":[{"path":"app/recipes/page.tsx","content":"import { RecipeForm } from '../../components/RecipeForm';\n"}]}"#,
        ]);
        let mut accumulated = AccumulatedChanges::new();
        accumulated.record(FileChange {
            path: "components/RecipeForm.tsx".to_string(),
            content: "export function RecipeForm() {}\n".to_string(),
        });

        let generator = ChangeGenerator::new(20_000);
        let changes = generator.generate_changes(&client, &step(), "snapshot", &accumulated, "rules");

        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].path, "app/recipes/page.tsx");

        let request = client.requests().remove(0);
        assert!(request.user_prompt.contains("components/RecipeForm.tsx"));
        assert!(request.user_prompt.contains("export function RecipeForm()"));
    }

    #[test]
    fn empty_change_list_is_valid_output() {
        let client = ScriptedModelClient::with_json(vec![r#"{"changes":[]}"#]);
        let generator = ChangeGenerator::new(20_000);
        let changes = generator.generate_changes(
            &client,
            &step(),
            "snapshot",
            &AccumulatedChanges::new(),
            "rules",
        );
        assert!(changes.is_empty());
        assert_eq!(client.calls(), 1);
    }

    #[test]
    fn model_failure_degrades_to_no_op() {
        let client = ScriptedModelClient::with_json(vec!["garbage", "garbage"]);
        let generator = ChangeGenerator::new(20_000);
        let changes = generator.generate_changes(
            &client,
            &step(),
            "snapshot",
            &AccumulatedChanges::new(),
            "rules",
        );
        assert!(changes.is_empty());
        assert_eq!(client.calls(), 2);
    }
}
