//! Planner agent: feature request + snapshot -> ordered step list.

use tracing::{debug, instrument, warn};

use crate::core::types::{PlanOutput, Step};
use crate::llm::{self, ModelClient};
use crate::prompt::PromptBuilder;

const PLAN_OUTPUT_SCHEMA: &str = include_str!("../../schemas/plan_output.schema.json");
const SYSTEM_PROMPT: &str =
    "You are the planning agent of an automated code-change pipeline. You respond only with JSON.";

/// Planner wrapper that owns schema and prompt settings.
#[derive(Debug, Clone)]
pub struct Planner {
    prompt_budget_bytes: usize,
}

impl Planner {
    pub fn new(prompt_budget_bytes: usize) -> Self {
        Self {
            prompt_budget_bytes,
        }
    }

    /// Produce the ordered plan.
    ///
    /// On any model or validation failure this yields a single sentinel step
    /// named `PlanError` carrying the diagnostic; the orchestrator treats that
    /// as terminal.
    #[instrument(skip_all)]
    pub fn plan(
        &self,
        client: &dyn ModelClient,
        feature_request: &str,
        snapshot: &str,
        rules: &str,
    ) -> Vec<Step> {
        let pack = PromptBuilder::new(self.prompt_budget_bytes)
            .build_planner(feature_request, snapshot, rules);

        match llm::generate::<PlanOutput>(
            client,
            "plan_output",
            PLAN_OUTPUT_SCHEMA,
            SYSTEM_PROMPT,
            &pack.render(),
        ) {
            Ok(plan) => {
                debug!(steps = plan.steps.len(), "plan produced");
                plan.steps
            }
            Err(err) => {
                warn!(error = %format!("{err:#}"), "planner failed");
                vec![Step::plan_error(format!("{err:#}"))]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedModelClient, ScriptedResponse};

    #[test]
    fn plan_parses_ordered_steps() {
        let client = ScriptedModelClient::with_json(vec![
            r#"{"steps":[
                {"name":"Add RecipeForm","description":"new form","plan":"components/RecipeForm.tsx"},
                {"name":"Wire into RecipesPage","description":"use the form","plan":"app/recipes/page.tsx"}
            ]}"#,
        ]);
        let planner = Planner::new(10_000);
        let steps = planner.plan(&client, "Add recipe form", "snapshot", "rules");

        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].name, "Add RecipeForm");
        assert_eq!(steps[1].name, "Wire into RecipesPage");

        let request = client.requests().remove(0);
        assert!(request.user_prompt.contains("Add recipe form"));
        assert!(request.user_prompt.contains("### Repository Snapshot"));
    }

    #[test]
    fn malformed_output_twice_yields_plan_error_sentinel() {
        let client = ScriptedModelClient::with_json(vec!["nope", "still nope"]);
        let planner = Planner::new(10_000);
        let steps = planner.plan(&client, "Add recipe form", "snapshot", "rules");

        assert_eq!(steps.len(), 1);
        assert!(steps[0].is_plan_error());
        assert_eq!(client.calls(), 2);
    }

    #[test]
    fn provider_error_yields_plan_error_sentinel() {
        let client = ScriptedModelClient::new(vec![
            ScriptedResponse::Error("HTTP 500".to_string()),
            ScriptedResponse::Error("HTTP 500".to_string()),
        ]);
        let planner = Planner::new(10_000);
        let steps = planner.plan(&client, "Add recipe form", "snapshot", "rules");

        assert!(steps[0].is_plan_error());
        assert!(steps[0].description.contains("HTTP 500"));
    }

    #[test]
    fn empty_step_list_is_rejected_by_schema() {
        let client = ScriptedModelClient::with_json(vec![r#"{"steps":[]}"#, r#"{"steps":[]}"#]);
        let planner = Planner::new(10_000);
        let steps = planner.plan(&client, "Add recipe form", "snapshot", "rules");
        assert!(steps[0].is_plan_error());
    }
}
