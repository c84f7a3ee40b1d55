//! Top-level orchestration: branch setup, planning, per-step execution, and
//! the final flow, with the forward-only phase machine.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Local;
use tracing::{info, instrument, warn};

use crate::agents::DEFAULT_CODE_RULES;
use crate::config::Config;
use crate::github::ReviewSurface;
use crate::io::git::Git;
use crate::io::snapshot;
use crate::io::test_runner::TestRunner;
use crate::llm::ModelClient;
use crate::pipeline::{
    Agents, PR_BODY_DONE, PipelineDeps, RunArtifacts, RunPhase, RunRecord, TestBudgetExhausted,
    final_flow, step_flow,
};

/// How a pipeline run ended, for exit-code mapping.
#[derive(Debug)]
pub enum PipelineOutcome {
    /// Every step landed and the final flow passed.
    Ready {
        pr_number: Option<u64>,
        steps: usize,
    },
    /// The planner produced no usable plan; nothing was committed or pushed.
    NoPlan { diagnostic: String },
}

/// Timestamped branch policy: stable length regardless of the feature request.
pub fn default_branch_name() -> String {
    format!("agent/{}", Local::now().format("%Y%m%d_%H%M"))
}

/// Drive the whole pipeline: switch branch, plan, run every step, then the
/// final review-and-test flow.
#[instrument(skip_all)]
pub fn run_pipeline(
    root: &Path,
    config: &Config,
    client: &dyn ModelClient,
    surface: &dyn ReviewSurface,
    test_runner: &dyn TestRunner,
) -> Result<PipelineOutcome> {
    config.validate_for_run()?;
    let mut phase = RunPhase::Init;

    let branch = config.branch.clone().unwrap_or_else(default_branch_name);
    let run_id = Local::now().format("%Y%m%d_%H%M%S").to_string();
    let git = Git::new(root);
    ensure_local_exclude(root);
    let artifacts = RunArtifacts::new(root, &run_id);

    git.switch_to_branch(&branch, &config.base_branch)
        .context("switch to working branch")?;
    info!(branch = %branch, "working branch ready");

    transition(&mut phase, RunPhase::Planning);
    let snapshot = snapshot::snapshot(root)?;
    let rules = load_code_rules(root);
    let agents = Agents::new(config.prompt_budget_bytes);

    let steps = agents
        .planner
        .plan(client, &config.feature_request, &snapshot, &rules);
    artifacts.write_json("plan.json", &steps);

    if steps.iter().any(|step| step.is_plan_error()) {
        let diagnostic = steps
            .iter()
            .find(|step| step.is_plan_error())
            .map(|step| step.description.clone())
            .unwrap_or_default();
        transition(&mut phase, RunPhase::NoPlan);
        return Ok(PipelineOutcome::NoPlan { diagnostic });
    }

    let deps = PipelineDeps {
        config,
        git: &git,
        client,
        surface,
        test_runner,
        artifacts: &artifacts,
    };
    let mut record = RunRecord::new(branch);

    for (i, step) in steps.iter().enumerate() {
        let index = i as u32 + 1;
        transition(&mut phase, RunPhase::Step(index));
        if let Err(err) = step_flow::run_step(
            &deps,
            &agents,
            &mut record,
            &snapshot,
            &rules,
            index,
            step,
        ) {
            transition(&mut phase, RunPhase::Aborted);
            record.append_failure_marker(surface);
            return Err(err).with_context(|| format!("step {index} '{}' failed", step.name));
        }
    }

    transition(&mut phase, RunPhase::FinalReview);
    if let Err(err) = final_flow::run_final(&deps, &agents, &mut record) {
        if err.downcast_ref::<TestBudgetExhausted>().is_some() {
            // The test panel already carries its specific failure marker.
            transition(&mut phase, RunPhase::TestBudgetExhausted);
        } else {
            transition(&mut phase, RunPhase::Aborted);
            record.append_failure_marker(surface);
        }
        return Err(err).context("final flow failed");
    }

    if let Some(pr_number) = record.pr_number {
        if let Err(err) = surface.update_pull_request_body(pr_number, PR_BODY_DONE) {
            // Non-fatal after a successful run.
            warn!(error = %format!("{err:#}"), "failed to update PR body after success");
        }
    }

    transition(&mut phase, RunPhase::ReadyForReview);
    Ok(PipelineOutcome::Ready {
        pr_number: record.pr_number,
        steps: steps.len(),
    })
}

fn transition(phase: &mut RunPhase, next: RunPhase) {
    debug_assert!(!phase.is_terminal(), "no transitions out of {phase:?}");
    info!(from = ?phase, to = ?next, "phase transition");
    *phase = next;
}

/// Repo-specific code rules from `.autopr/rules.md`, with a built-in default.
fn load_code_rules(root: &Path) -> String {
    let path = root.join(".autopr").join("rules.md");
    match fs::read_to_string(&path) {
        Ok(rules) if !rules.trim().is_empty() => rules,
        _ => DEFAULT_CODE_RULES.to_string(),
    }
}

/// Keep `.autopr/` out of the diff without committing an ignore entry: the
/// run artifacts live in the working tree but belong to the agent, not the PR.
fn ensure_local_exclude(root: &Path) {
    let exclude = root.join(".git").join("info").join("exclude");
    let current = fs::read_to_string(&exclude).unwrap_or_default();
    if current.lines().any(|line| line.trim() == ".autopr/") {
        return;
    }
    let mut updated = current;
    if !updated.is_empty() && !updated.ends_with('\n') {
        updated.push('\n');
    }
    updated.push_str(".autopr/\n");
    if let Some(parent) = exclude.parent() {
        if let Err(err) = fs::create_dir_all(parent) {
            warn!(error = %err, "could not prepare git exclude file");
            return;
        }
    }
    if let Err(err) = fs::write(&exclude, updated) {
        warn!(error = %err, "could not write git exclude file");
    }
}
