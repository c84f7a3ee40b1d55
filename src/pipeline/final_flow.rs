//! Final flow: full-range review, test gating/generation, and the bounded
//! repair loop.

use anyhow::{Context, Result};
use tracing::{instrument, warn};

use crate::io::diff;
use crate::pipeline::{
    Agents, FINAL_TEST_COMMIT_MESSAGE, PipelineDeps, RunRecord, StatusPanel,
    attach_existing_tests, pr_context, render_review_comment, run_test_cycle,
};

/// Run the final review and test pass over `merge-base..HEAD`.
///
/// Failure modes: test-budget exhaustion surfaces as
/// [`crate::pipeline::TestBudgetExhausted`]; VCS failures are fatal; surface
/// failures only degrade the status panels.
#[instrument(skip_all)]
pub fn run_final(deps: &PipelineDeps<'_>, agents: &Agents, record: &mut RunRecord) -> Result<()> {
    let root = deps.git.workdir().to_path_buf();

    let bundle = diff::full(deps.git, &deps.config.base_branch)?;
    let context = pr_context(deps.config, record, &bundle)?;
    let test_ctx = attach_existing_tests(&root, context)?;

    let mut review_panel = match record.pr_number {
        Some(pr_number) => StatusPanel::post(deps.surface, pr_number, "🤖 Final review in progress…"),
        None => {
            warn!("no pull request available, running final flow without status panels");
            None
        }
    };
    if let Some(panel) = &review_panel {
        record.review_comment_ids.push(panel.id());
    }

    let analysis = agents.reviewer.review(deps.client, &test_ctx.context);
    deps.artifacts.write_json("final/review.json", &analysis);
    if let Some(panel) = review_panel.as_mut() {
        panel.rewrite(
            deps.surface,
            &render_review_comment("Final review", &analysis),
        );
    }
    if let Some(panel) = review_panel {
        record.last_panel = Some(panel);
    }

    let mut test_panel = record
        .pr_number
        .and_then(|pr| StatusPanel::post(deps.surface, pr, "🧪 Test analysis in progress…"));
    if let Some(panel) = &test_panel {
        record.test_comment_ids.push(panel.id());
    }

    let result = run_test_cycle(
        deps,
        agents,
        record,
        &test_ctx,
        Some(&analysis),
        FINAL_TEST_COMMIT_MESSAGE,
        &mut test_panel,
        "final",
    );
    if let Some(panel) = test_panel {
        record.last_panel = Some(panel);
    }
    result.context("final test cycle")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, RepoSlug};
    use crate::github::ReviewSurface;
    use crate::io::git::Git;
    use crate::pipeline::{RunArtifacts, TestBudgetExhausted, tests_failing_message};
    use crate::test_support::{
        RecordingSurface, ScriptedModelClient, ScriptedTestRunner, TestRepo,
    };
    use std::fs;

    fn config() -> Config {
        Config {
            feature_request: "Add a widget".to_string(),
            github_token: "token".to_string(),
            repository: Some(RepoSlug {
                owner: "octo".to_string(),
                repo: "widgets".to_string(),
            }),
            api_key: "sk-test".to_string(),
            ..Config::default()
        }
    }

    fn seeded_repo() -> (TestRepo, Git) {
        let repo = TestRepo::new().expect("repo");
        let git = Git::new(repo.root());
        git.switch_to_branch("agent/final", "main").expect("switch");
        fs::create_dir_all(repo.root().join("components")).expect("mkdir");
        fs::write(
            repo.root().join("components/Widget.tsx"),
            "export function Widget() { return <div/>; }\n",
        )
        .expect("write");
        git.add_all().expect("add");
        assert!(git.commit_staged("Step 1: Add widget").expect("commit"));
        git.push("agent/final").expect("push");
        (repo, git)
    }

    #[test]
    fn gating_no_and_passing_tests_completes() {
        let (_repo, git) = seeded_repo();
        let cfg = config();
        let client = ScriptedModelClient::with_json(vec![
            r#"{"summary":"fine","file_analyses":[],"overall_suggestions":[]}"#,
            r#"{"should_generate":false,"reasoning":"pure style","recommendation":""}"#,
        ]);
        let surface = RecordingSurface::new();
        surface
            .ensure_pull_request("agent/final", "main", "t", "b")
            .expect("pr");
        let runner = ScriptedTestRunner::new(vec![ScriptedTestRunner::passing()]);
        let artifacts = RunArtifacts::disabled();
        let deps = PipelineDeps {
            config: &cfg,
            git: &git,
            client: &client,
            surface: &surface,
            test_runner: &runner,
            artifacts: &artifacts,
        };
        let agents = Agents::new(cfg.prompt_budget_bytes);
        let mut record = RunRecord::new("agent/final".to_string());
        record.pr_number = Some(101);

        run_final(&deps, &agents, &mut record).expect("final");

        let comments = surface.comments();
        assert_eq!(comments.len(), 2);
        assert!(comments[0].1.contains("Final review"));
        assert!(comments[1].1.contains("✅ Tests passing."));
        assert_eq!(record.test_comment_ids, vec![2]);
    }

    #[test]
    fn generation_plus_one_repair_then_green() {
        let (repo, git) = seeded_repo();
        let before = repo.commit_count("HEAD").expect("count");
        let cfg = config();
        let client = ScriptedModelClient::with_json(vec![
            // review
            r#"{"summary":"fine","file_analyses":[],"overall_suggestions":[]}"#,
            // gating: yes
            r#"{"should_generate":true,"reasoning":"new component","recommendation":"cover Widget"}"#,
            // writer
            r#"{"proposals":[{"path":"__tests__/unit/Widget.test.tsx","test_content":"broken import\n","action":"create","old_path":""}]}"#,
            // fixer
            r#"{"proposals":[{"path":"__tests__/unit/Widget.test.tsx","test_content":"fixed import\n","action":"update","old_path":""}]}"#,
        ]);
        let surface = RecordingSurface::new();
        surface
            .ensure_pull_request("agent/final", "main", "t", "b")
            .expect("pr");
        let runner = ScriptedTestRunner::new(vec![
            ScriptedTestRunner::failing("missing import"),
            ScriptedTestRunner::passing(),
        ]);
        let artifacts = RunArtifacts::disabled();
        let deps = PipelineDeps {
            config: &cfg,
            git: &git,
            client: &client,
            surface: &surface,
            test_runner: &runner,
            artifacts: &artifacts,
        };
        let agents = Agents::new(cfg.prompt_budget_bytes);
        let mut record = RunRecord::new("agent/final".to_string());
        record.pr_number = Some(101);

        run_final(&deps, &agents, &mut record).expect("final");

        // Generation commit + repair commit.
        assert_eq!(repo.commit_count("HEAD").expect("count"), before + 2);
        assert_eq!(
            repo.read("__tests__/unit/Widget.test.tsx").expect("read"),
            "fixed import\n"
        );

        // Fixer saw the failing output.
        let fixer_request = client.requests().into_iter().last().expect("request");
        assert!(fixer_request.user_prompt.contains("missing import"));
    }

    #[test]
    fn exhausted_budget_surfaces_typed_error_and_marker() {
        let (repo, git) = seeded_repo();
        let before = repo.commit_count("HEAD").expect("count");
        let mut cfg = config();
        cfg.max_test_fix_attempts = 3;
        let client = ScriptedModelClient::with_json(vec![
            r#"{"summary":"fine","file_analyses":[],"overall_suggestions":[]}"#,
            r#"{"should_generate":true,"reasoning":"new component","recommendation":""}"#,
            r#"{"proposals":[{"path":"__tests__/unit/Widget.test.tsx","test_content":"v0\n","action":"create","old_path":""}]}"#,
            r#"{"proposals":[{"path":"__tests__/unit/Widget.test.tsx","test_content":"v1\n","action":"update","old_path":""}]}"#,
            r#"{"proposals":[{"path":"__tests__/unit/Widget.test.tsx","test_content":"v2\n","action":"update","old_path":""}]}"#,
            r#"{"proposals":[{"path":"__tests__/unit/Widget.test.tsx","test_content":"v3\n","action":"update","old_path":""}]}"#,
        ]);
        let surface = RecordingSurface::new();
        surface
            .ensure_pull_request("agent/final", "main", "t", "b")
            .expect("pr");
        let runner = ScriptedTestRunner::new(vec![
            ScriptedTestRunner::failing("fail 0"),
            ScriptedTestRunner::failing("fail 1"),
            ScriptedTestRunner::failing("fail 2"),
            ScriptedTestRunner::failing("fail 3"),
        ]);
        let artifacts = RunArtifacts::disabled();
        let deps = PipelineDeps {
            config: &cfg,
            git: &git,
            client: &client,
            surface: &surface,
            test_runner: &runner,
            artifacts: &artifacts,
        };
        let agents = Agents::new(cfg.prompt_budget_bytes);
        let mut record = RunRecord::new("agent/final".to_string());
        record.pr_number = Some(101);

        let err = run_final(&deps, &agents, &mut record).expect_err("should exhaust");
        let exhausted = err
            .downcast_ref::<TestBudgetExhausted>()
            .expect("typed budget error");
        assert_eq!(exhausted.attempts, 3);

        // 1 generation + 3 fix commits.
        assert_eq!(repo.commit_count("HEAD").expect("count"), before + 4);

        // Final test-comment body ends with the failure marker.
        let body = surface.comment_body(2).expect("test panel");
        assert!(body.trim_end().ends_with(&tests_failing_message(3)));
    }
}
