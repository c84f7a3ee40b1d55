//! Autonomous feature-to-PR agent.
//!
//! Reads a natural-language feature request from the environment, plans it
//! into ordered steps, drives a structured-output model to emit file changes
//! per step, commits and pushes each step with an AI partial review, then runs
//! a final review with test gating and a bounded test-repair loop.

use anyhow::Result;
use clap::{Parser, Subcommand};

use autopr::config::Config;
use autopr::exit_codes;
use autopr::github::GithubClient;
use autopr::io::test_runner::CommandTestRunner;
use autopr::llm;
use autopr::logging;
use autopr::agents::planner::Planner;
use autopr::io::snapshot;
use autopr::pipeline::orchestrator::{self, PipelineOutcome};

#[derive(Parser)]
#[command(
    name = "autopr",
    version,
    about = "Turns a feature request into a reviewed, test-verified pull request"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the full pipeline: plan, edit, commit, push, review, test-repair.
    Run,
    /// Plan only: print the step list as JSON without touching git or the PR.
    Plan,
}

fn main() {
    logging::init();
    let cli = Cli::parse();
    let code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            exit_codes::ABORT
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<i32> {
    let config = Config::from_env()?;
    match cli.command {
        Command::Run => cmd_run(&config),
        Command::Plan => cmd_plan(&config),
    }
}

fn cmd_run(config: &Config) -> Result<i32> {
    config.validate_for_run()?;
    let root = std::env::current_dir()?;

    let client = llm::client_from_config(config)?;
    let surface = GithubClient::new(config.github_token.clone(), config.repo()?.clone())?;
    let test_runner = CommandTestRunner::new(config.test_command.clone());

    match orchestrator::run_pipeline(&root, config, client.as_ref(), &surface, &test_runner)? {
        PipelineOutcome::Ready { pr_number, steps } => {
            match pr_number {
                Some(number) => println!("done: {steps} step(s), PR #{number} ready for review"),
                None => println!("done: {steps} step(s), no pull request was needed"),
            }
            Ok(exit_codes::OK)
        }
        PipelineOutcome::NoPlan { diagnostic } => {
            // Terminal but side-effect free: nothing was committed or pushed.
            eprintln!("planner produced no plan: {diagnostic}");
            Ok(exit_codes::OK)
        }
    }
}

fn cmd_plan(config: &Config) -> Result<i32> {
    config.validate_for_plan()?;
    let root = std::env::current_dir()?;

    let client = llm::client_from_config(config)?;
    let snapshot = snapshot::snapshot(&root)?;
    let planner = Planner::new(config.prompt_budget_bytes);

    let steps = planner.plan(
        client.as_ref(),
        &config.feature_request,
        &snapshot,
        autopr::agents::DEFAULT_CODE_RULES,
    );
    if steps.iter().any(|step| step.is_plan_error()) {
        eprintln!(
            "planner produced no plan: {}",
            steps
                .first()
                .map(|step| step.description.clone())
                .unwrap_or_default()
        );
        return Ok(exit_codes::OK);
    }

    let mut payload = serde_json::to_string_pretty(&steps)?;
    payload.push('\n');
    print!("{payload}");
    Ok(exit_codes::OK)
}
