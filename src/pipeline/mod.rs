//! Step-by-step orchestration engine: shared pipeline state, status panels,
//! run artifacts, and the bounded test-repair cycle used by both the per-step
//! and final flows.

pub mod final_flow;
pub mod orchestrator;
pub mod step_flow;

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context as _, Result};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::agents::generator::ChangeGenerator;
use crate::agents::gating::TestGate;
use crate::agents::planner::Planner;
use crate::agents::reviewer::Reviewer;
use crate::agents::test_fixer::TestFixer;
use crate::agents::test_writer::TestWriter;
use crate::config::Config;
use crate::core::changes::AccumulatedChanges;
use crate::core::types::{PrContext, PrContextWithTests, ReviewAnalysis, TestRunOutcome};
use crate::github::ReviewSurface;
use crate::io::diff::DiffBundle;
use crate::io::git::Git;
use crate::io::test_runner::{TestRequest, TestRunner};
use crate::io::{diff, workspace};
use crate::llm::ModelClient;

/// Forward-only pipeline phases. Transitions never go backwards; iterative
/// repair inside a flow is an internal loop, not a phase transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Init,
    Planning,
    Step(u32),
    FinalReview,
    ReadyForReview,
    NoPlan,
    Aborted,
    TestBudgetExhausted,
}

impl RunPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunPhase::ReadyForReview
                | RunPhase::NoPlan
                | RunPhase::Aborted
                | RunPhase::TestBudgetExhausted
        )
    }
}

/// The test-repair loop spent its whole budget without a passing run.
#[derive(Debug)]
pub struct TestBudgetExhausted {
    pub attempts: u32,
}

impl std::fmt::Display for TestBudgetExhausted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "tests failing after {} fix attempts", self.attempts)
    }
}

impl std::error::Error for TestBudgetExhausted {}

/// Commit message for step `index`.
pub fn step_commit_message(index: u32, name: &str) -> String {
    format!("Step {index}: {name}")
}

/// Commit message for the final-pass test generation commit.
pub const FINAL_TEST_COMMIT_MESSAGE: &str = "AI test generation - final pass";

/// Commit message for repair iteration `n`.
pub fn fix_commit_message(n: u32) -> String {
    format!("AI test fix attempt #{n}")
}

/// Initial PR body.
pub fn pr_body_initial(feature_request: &str) -> String {
    format!("This is an AI-generated PR for feature: \"{feature_request}\"")
}

/// PR body once every step and the final flow completed.
pub const PR_BODY_DONE: &str = "All steps done. PR is ready for final review.";

/// Trailing marker for the budget-exhausted test panel.
pub fn tests_failing_message(attempts: u32) -> String {
    format!("Tests failing after {attempts} fix attempts.")
}

/// Generic trailing marker appended to the latest panel when the run aborts.
pub const FAILURE_MARKER: &str = "❌ Pipeline aborted.";

/// All model-facing agents, constructed once per run.
pub struct Agents {
    pub planner: Planner,
    pub generator: ChangeGenerator,
    pub reviewer: Reviewer,
    pub gate: TestGate,
    pub writer: TestWriter,
    pub fixer: TestFixer,
}

impl Agents {
    pub fn new(prompt_budget_bytes: usize) -> Self {
        Self {
            planner: Planner::new(prompt_budget_bytes),
            generator: ChangeGenerator::new(prompt_budget_bytes),
            reviewer: Reviewer::new(prompt_budget_bytes),
            gate: TestGate::new(prompt_budget_bytes),
            writer: TestWriter::new(prompt_budget_bytes),
            fixer: TestFixer::new(prompt_budget_bytes),
        }
    }
}

/// External collaborators shared by every flow.
pub struct PipelineDeps<'a> {
    pub config: &'a Config,
    pub git: &'a Git,
    pub client: &'a dyn ModelClient,
    pub surface: &'a dyn ReviewSurface,
    pub test_runner: &'a dyn TestRunner,
    pub artifacts: &'a RunArtifacts,
}

impl PipelineDeps<'_> {
    fn test_request(&self) -> TestRequest {
        TestRequest {
            workdir: self.git.workdir().to_path_buf(),
            timeout: Duration::from_secs(self.config.test_timeout_secs),
            output_limit_bytes: self.config.test_output_limit_bytes,
        }
    }
}

/// Mutable per-run bookkeeping. Lives for the process lifetime; nothing here
/// is persisted beyond git, the PR, and its comments.
pub struct RunRecord {
    pub branch_name: String,
    pub pr_number: Option<u64>,
    pub accumulated: AccumulatedChanges,
    pub review_comment_ids: Vec<u64>,
    pub test_comment_ids: Vec<u64>,
    pub last_panel: Option<StatusPanel>,
}

impl RunRecord {
    pub fn new(branch_name: String) -> Self {
        Self {
            branch_name,
            pr_number: None,
            accumulated: AccumulatedChanges::new(),
            review_comment_ids: Vec::new(),
            test_comment_ids: Vec::new(),
            last_panel: None,
        }
    }

    /// Best-effort trailing failure marker on the most recent status panel.
    /// Successful panel bodies already posted are never overwritten.
    pub fn append_failure_marker(&mut self, surface: &dyn ReviewSurface) {
        if let Some(panel) = self.last_panel.as_mut() {
            let body = format!("{}\n\n{FAILURE_MARKER}", panel.body());
            panel.rewrite(surface, &body);
        }
    }
}

/// A progressive status comment on the PR. The surface is best-effort: any
/// failure is logged and the pipeline continues.
pub struct StatusPanel {
    id: u64,
    body: String,
}

impl StatusPanel {
    /// Post a new panel; `None` when the surface rejected it.
    pub fn post(surface: &dyn ReviewSurface, pr_number: u64, body: &str) -> Option<Self> {
        match surface.create_comment(pr_number, body) {
            Ok(id) => Some(Self {
                id,
                body: body.to_string(),
            }),
            Err(err) => {
                warn!(error = %format!("{err:#}"), "failed to post status comment");
                None
            }
        }
    }

    /// Rewrite the whole body (last-writer-wins on the surface).
    pub fn rewrite(&mut self, surface: &dyn ReviewSurface, body: &str) {
        if let Err(err) = surface.update_comment(self.id, body) {
            warn!(error = %format!("{err:#}"), "failed to update status comment");
            return;
        }
        self.body = body.to_string();
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn body(&self) -> &str {
        &self.body
    }
}

/// Run artifacts under `.autopr/runs/<run-id>/`: prompts, model output,
/// reviews, and test logs. Purely observational and always best-effort; the
/// run never fails because an artifact write did.
pub struct RunArtifacts {
    dir: Option<PathBuf>,
}

impl RunArtifacts {
    pub fn new(root: &Path, run_id: &str) -> Self {
        let dir = root.join(".autopr").join("runs").join(run_id);
        match fs::create_dir_all(&dir) {
            Ok(()) => Self { dir: Some(dir) },
            Err(err) => {
                warn!(error = %err, "run artifacts disabled");
                Self { dir: None }
            }
        }
    }

    pub fn disabled() -> Self {
        Self { dir: None }
    }

    pub fn write_json<T: Serialize>(&self, name: &str, value: &T) {
        match serde_json::to_string_pretty(value) {
            Ok(mut payload) => {
                payload.push('\n');
                self.write_text(name, &payload);
            }
            Err(err) => warn!(artifact = name, error = %err, "failed to serialize artifact"),
        }
    }

    pub fn write_text(&self, name: &str, contents: &str) {
        let Some(dir) = &self.dir else { return };
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            if let Err(err) = fs::create_dir_all(parent) {
                warn!(artifact = name, error = %err, "failed to create artifact dir");
                return;
            }
        }
        if let Err(err) = fs::write(&path, contents) {
            warn!(artifact = name, error = %err, "failed to write artifact");
        }
    }
}

/// Assemble a review-pass context from a diff bundle. Contexts are rebuilt
/// from git on every pass, never cached across commits.
pub fn pr_context(config: &Config, record: &RunRecord, bundle: &DiffBundle) -> Result<PrContext> {
    let slug = config.repo()?;
    Ok(PrContext {
        owner: slug.owner.clone(),
        repo: slug.repo.clone(),
        pull_number: record.pr_number,
        head_ref: record.branch_name.clone(),
        base_ref: config.base_branch.clone(),
        title: config.feature_request.clone(),
        changed_files: diff::parse_file_diffs(&bundle.patch),
        commit_messages: bundle.messages.clone(),
    })
}

/// Extend a context with the current on-disk unit-test files.
pub fn attach_existing_tests(root: &Path, context: PrContext) -> Result<PrContextWithTests> {
    let existing_test_files = workspace::existing_test_files(root)?;
    Ok(PrContextWithTests {
        context,
        existing_test_files,
    })
}

/// Render a review analysis as a comment body.
pub fn render_review_comment(heading: &str, analysis: &ReviewAnalysis) -> String {
    let mut body = format!("## {heading}\n\n{}\n", analysis.summary);
    if !analysis.file_analyses.is_empty() {
        body.push_str("\n### Files\n");
        for file in &analysis.file_analyses {
            body.push_str(&format!("- `{}` — {}\n", file.path, file.analysis));
        }
    }
    if !analysis.overall_suggestions.is_empty() {
        body.push_str("\n### Suggestions\n");
        for suggestion in &analysis.overall_suggestions {
            body.push_str(&format!("- {suggestion}\n"));
        }
    }
    body
}

/// Gating + generation + bounded repair, shared by the final flow and the
/// review-plus-tests step variant.
///
/// Writes generated tests to disk, commits with `generation_commit_message`,
/// then runs the suite and repairs it for at most
/// `config.max_test_fix_attempts` iterations. Returns the last test outcome;
/// an exhausted budget surfaces as [`TestBudgetExhausted`].
#[allow(clippy::too_many_arguments)]
pub(crate) fn run_test_cycle(
    deps: &PipelineDeps<'_>,
    agents: &Agents,
    record: &mut RunRecord,
    test_ctx: &PrContextWithTests,
    review: Option<&ReviewAnalysis>,
    generation_commit_message: &str,
    panel: &mut Option<StatusPanel>,
    artifact_prefix: &str,
) -> Result<TestRunOutcome> {
    let root = deps.git.workdir().to_path_buf();
    let decision = agents.gate.decide(deps.client, test_ctx, review);
    deps.artifacts
        .write_json(&format!("{artifact_prefix}/gating.json"), &decision);
    if let Some(panel) = panel.as_mut() {
        panel.rewrite(
            deps.surface,
            &format!(
                "## Test analysis\n\nTests required: **{}**\n\n{}",
                if decision.should_generate { "yes" } else { "no" },
                decision.reasoning
            ),
        );
    }

    if decision.should_generate {
        let proposals = agents
            .writer
            .propose(deps.client, test_ctx, review.map(|r| r.summary.as_str()));
        deps.artifacts
            .write_json(&format!("{artifact_prefix}/test_proposals.json"), &proposals);
        if proposals.is_empty() {
            debug!("gating asked for tests but the writer proposed none");
        } else {
            workspace::apply_test_proposals(&root, &proposals)?;
            deps.git.add_all()?;
            if deps.git.commit_staged(generation_commit_message)? {
                deps.git.push(&record.branch_name)?;
            }
        }
    }

    let mut outcome = deps.test_runner.run(&deps.test_request())?;
    deps.artifacts
        .write_text(&format!("{artifact_prefix}/test_run_0.log"), &outcome.output);

    let budget = deps.config.max_test_fix_attempts;
    let mut iteration = 0u32;
    while outcome.failed && iteration < budget {
        iteration += 1;
        info!(iteration, budget, "test repair iteration");

        // The repairer sees the tests as they are on disk right now.
        let fresh_ctx = attach_existing_tests(&root, test_ctx.context.clone())?;
        let fixes =
            agents
                .fixer
                .propose_fixes(deps.client, &fresh_ctx, &outcome.output, iteration);
        deps.artifacts.write_json(
            &format!("{artifact_prefix}/test_fixes_{iteration}.json"),
            &fixes,
        );
        if !fixes.is_empty() {
            workspace::apply_test_proposals(&root, &fixes)?;
            deps.git.add_all()?;
            if deps.git.commit_staged(&fix_commit_message(iteration))? {
                deps.git.push(&record.branch_name)?;
            }
        }

        outcome = deps.test_runner.run(&deps.test_request())?;
        deps.artifacts.write_text(
            &format!("{artifact_prefix}/test_run_{iteration}.log"),
            &outcome.output,
        );
    }

    if outcome.failed {
        if let Some(panel) = panel.as_mut() {
            let body = format!(
                "## Test analysis\n\n{}\n\n{}",
                decision.reasoning,
                tests_failing_message(budget)
            );
            panel.rewrite(deps.surface, &body);
        }
        return Err(TestBudgetExhausted { attempts: budget })
            .context("test repair budget exhausted");
    }

    if let Some(panel) = panel.as_mut() {
        let body = format!(
            "## Test analysis\n\nTests required: **{}**\n\n{}\n\n✅ Tests passing.",
            if decision.should_generate { "yes" } else { "no" },
            decision.reasoning
        );
        panel.rewrite(deps.surface, &body);
    }
    Ok(outcome)
}
