//! Per-step flow: generate changes, commit, push, ensure the PR, and run the
//! partial review (optionally with the step-level test cycle).

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::core::types::Step;
use crate::io::{diff, workspace};
use crate::pipeline::{
    Agents, PipelineDeps, RunRecord, StatusPanel, attach_existing_tests, pr_context,
    pr_body_initial, render_review_comment, run_test_cycle, step_commit_message,
};

/// Execute one step of the plan.
///
/// An empty change set is a successful no-op: no commit, no review, and the
/// pipeline advances. The PR is created after this step's push when it does
/// not exist yet, so it always opens against a non-empty branch.
#[instrument(skip_all, fields(index, step = %step.name))]
pub fn run_step(
    deps: &PipelineDeps<'_>,
    agents: &Agents,
    record: &mut RunRecord,
    snapshot: &str,
    rules: &str,
    index: u32,
    step: &Step,
) -> Result<()> {
    let root = deps.git.workdir().to_path_buf();

    let changes = agents.generator.generate_changes(
        deps.client,
        step,
        snapshot,
        &record.accumulated,
        rules,
    );
    deps.artifacts
        .write_json(&format!("step-{index}/changes.json"), &changes);
    if changes.is_empty() {
        info!("step contributes no code, advancing");
        return Ok(());
    }

    workspace::apply_changes(&root, &changes)
        .with_context(|| format!("write changes for step {index}"))?;
    record.accumulated.record_all(&changes);

    deps.git.add_all()?;
    let committed = deps
        .git
        .commit_staged(&step_commit_message(index, &step.name))?;
    if !committed {
        debug!("changes were byte-identical to the working tree, advancing");
        return Ok(());
    }
    deps.git.push(&record.branch_name)?;

    if record.pr_number.is_none() {
        let title = &deps.config.feature_request;
        match deps.surface.ensure_pull_request(
            &record.branch_name,
            &deps.config.base_branch,
            title,
            &pr_body_initial(title),
        ) {
            Ok(number) => {
                info!(number, "pull request ready");
                record.pr_number = Some(number);
            }
            Err(err) => {
                warn!(error = %format!("{err:#}"), "could not ensure pull request, continuing without one");
            }
        }
    }

    let bundle = diff::partial(deps.git)?;
    let context = pr_context(deps.config, record, &bundle)?;
    if context.changed_files.is_empty() {
        debug!("partial diff is empty, skipping review");
        return Ok(());
    }

    let Some(pr_number) = record.pr_number else {
        warn!("no pull request available, skipping partial review");
        return Ok(());
    };

    let mut panel = StatusPanel::post(
        deps.surface,
        pr_number,
        &format!("🤖 Reviewing Step {index}: {}…", step.name),
    );
    if let Some(panel) = &panel {
        record.review_comment_ids.push(panel.id());
    }

    let analysis = agents.reviewer.review(deps.client, &context);
    deps.artifacts
        .write_json(&format!("step-{index}/review.json"), &analysis);
    if let Some(panel) = panel.as_mut() {
        panel.rewrite(
            deps.surface,
            &render_review_comment(&format!("Step {index} review: {}", step.name), &analysis),
        );
    }

    if deps.config.step_tests {
        let test_ctx = attach_existing_tests(&root, context)?;
        let mut no_panel = None;
        run_test_cycle(
            deps,
            agents,
            record,
            &test_ctx,
            Some(&analysis),
            &format!("AI test generation - step {index}"),
            &mut no_panel,
            &format!("step-{index}"),
        )
        .with_context(|| format!("step {index} test cycle"))?;
    }

    if let Some(panel) = panel {
        record.last_panel = Some(panel);
    }
    Ok(())
}
