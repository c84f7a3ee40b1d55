//! Prompt pack builder for deterministic model input.
//!
//! Each agent renders a minijinja template into sections marked with
//! `<!-- section:KEY required|droppable -->` comments, then a byte budget is
//! applied: droppable sections go first, and if the pack is still over budget
//! the last section is truncated with a marker. Section order is stable so
//! cross-references between the planner and generator prompts stay valid.

use minijinja::{Environment, context};
use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

use crate::core::changes::AccumulatedChanges;
use crate::core::types::{PrContext, PrContextWithTests, Step, TestFile};

const PLANNER_TEMPLATE: &str = include_str!("prompts/planner.md");
const GENERATOR_TEMPLATE: &str = include_str!("prompts/generator.md");
const REVIEWER_TEMPLATE: &str = include_str!("prompts/reviewer.md");
const GATING_TEMPLATE: &str = include_str!("prompts/gating.md");
const TEST_WRITER_TEMPLATE: &str = include_str!("prompts/test_writer.md");
const TEST_FIXER_TEMPLATE: &str = include_str!("prompts/test_fixer.md");

/// Template engine wrapper around minijinja.
struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    fn new() -> Self {
        let mut env = Environment::new();
        for (name, template) in [
            ("planner", PLANNER_TEMPLATE),
            ("generator", GENERATOR_TEMPLATE),
            ("reviewer", REVIEWER_TEMPLATE),
            ("gating", GATING_TEMPLATE),
            ("test_writer", TEST_WRITER_TEMPLATE),
            ("test_fixer", TEST_FIXER_TEMPLATE),
        ] {
            env.add_template(name, template)
                .expect("prompt template should be valid");
        }
        Self { env }
    }
}

/// A parsed section from rendered template output.
#[derive(Debug, Clone)]
struct ParsedSection {
    /// Section identifier (e.g., "contract", "diff").
    key: String,
    /// Whether this section is required (cannot be dropped).
    required: bool,
    /// Full section content including header.
    content: String,
}

static SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->").expect("section regex")
});

/// Parse sections from rendered template output using HTML comment markers.
fn parse_sections(rendered: &str) -> Vec<ParsedSection> {
    let mut sections = Vec::new();
    let matches: Vec<_> = SECTION_RE.captures_iter(rendered).collect();

    for (i, caps) in matches.iter().enumerate() {
        let key = caps.get(1).expect("key group").as_str().to_string();
        let required = caps.get(2).expect("kind group").as_str() == "required";
        let start = caps.get(0).expect("marker").end();
        let end = matches
            .get(i + 1)
            .map(|m| m.get(0).expect("marker").start())
            .unwrap_or(rendered.len());

        let content = rendered[start..end].trim().to_string();
        if !content.is_empty() || required {
            sections.push(ParsedSection {
                key,
                required,
                content,
            });
        }
    }

    sections
}

/// Apply budget to parsed sections, dropping droppable sections as needed.
///
/// Drop order: rules -> review -> tests
fn apply_budget_to_sections(sections: &mut Vec<ParsedSection>, budget: usize) {
    let total_len =
        |secs: &[ParsedSection]| -> usize { secs.iter().map(|s| s.content.len()).sum() };

    if total_len(sections) <= budget {
        return;
    }

    let drop_order = ["rules", "review", "tests"];
    for key in drop_order {
        if total_len(sections) <= budget {
            break;
        }
        if let Some(idx) = sections.iter().position(|s| s.key == key && !s.required) {
            let dropped_len = sections[idx].content.len();
            debug!(
                section = key,
                bytes_dropped = dropped_len,
                "dropped section for budget"
            );
            sections.remove(idx);
        }
    }

    // If still over budget, truncate the last section
    if total_len(sections) > budget && !sections.is_empty() {
        let other_len: usize = sections
            .iter()
            .take(sections.len() - 1)
            .map(|s| s.content.len())
            .sum();
        let allowed = budget.saturating_sub(other_len);
        let last = sections.last_mut().expect("non-empty sections");
        let before_len = last.content.len();
        if last.content.len() > allowed {
            if allowed > 12 {
                let mut cut = allowed - 12;
                while cut > 0 && !last.content.is_char_boundary(cut) {
                    cut -= 1;
                }
                last.content.truncate(cut);
                last.content.push_str("\n[truncated]");
            } else {
                let mut cut = allowed;
                while cut > 0 && !last.content.is_char_boundary(cut) {
                    cut -= 1;
                }
                last.content.truncate(cut);
            }
            debug!(
                section = last.key,
                before_len,
                after_len = last.content.len(),
                "truncated section for budget"
            );
        }
    }
}

/// Render sections back to a single string.
fn render_sections(sections: &[ParsedSection]) -> String {
    sections
        .iter()
        .map(|s| s.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// A rendered prompt ready to send to the model.
#[derive(Debug, Clone)]
pub struct PromptPack {
    content: String,
}

impl PromptPack {
    /// Get the rendered prompt content.
    pub fn render(&self) -> String {
        self.content.clone()
    }
}

/// Builds a prompt pack within a byte budget, dropping less critical sections
/// first.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    budget_bytes: usize,
}

impl PromptBuilder {
    pub fn new(budget_bytes: usize) -> Self {
        Self { budget_bytes }
    }

    pub fn build_planner(&self, feature_request: &str, snapshot: &str, rules: &str) -> PromptPack {
        let engine = PromptEngine::new();
        let rendered = engine
            .env
            .get_template("planner")
            .expect("planner template")
            .render(context! {
                feature_request => feature_request.trim(),
                rules => rules.trim(),
                snapshot => snapshot,
            })
            .expect("planner template rendering should not fail");
        self.finish(rendered)
    }

    pub fn build_generator(
        &self,
        step: &Step,
        snapshot: &str,
        accumulated: &AccumulatedChanges,
        rules: &str,
    ) -> PromptPack {
        let engine = PromptEngine::new();
        let overlay = render_accumulated(accumulated);
        let rendered = engine
            .env
            .get_template("generator")
            .expect("generator template")
            .render(context! {
                step_name => step.name,
                step_description => step.description,
                step_plan => step.plan,
                rules => rules.trim(),
                accumulated => (!overlay.is_empty()).then_some(overlay),
                snapshot => snapshot,
            })
            .expect("generator template rendering should not fail");
        self.finish(rendered)
    }

    pub fn build_reviewer(&self, pr: &PrContext) -> PromptPack {
        let engine = PromptEngine::new();
        let rendered = engine
            .env
            .get_template("reviewer")
            .expect("reviewer template")
            .render(context! {
                title => pr.title,
                head_ref => pr.head_ref,
                base_ref => pr.base_ref,
                commit_messages => render_commit_messages(&pr.commit_messages),
                diff => render_changed_files(pr),
            })
            .expect("reviewer template rendering should not fail");
        self.finish(rendered)
    }

    pub fn build_gating(
        &self,
        ctx: &PrContextWithTests,
        review_summary: Option<&str>,
    ) -> PromptPack {
        let engine = PromptEngine::new();
        let rendered = engine
            .env
            .get_template("gating")
            .expect("gating template")
            .render(context! {
                review => review_summary.map(str::trim).filter(|s| !s.is_empty()),
                existing_tests => non_empty(render_test_files(&ctx.existing_test_files)),
                diff => render_changed_files(&ctx.context),
            })
            .expect("gating template rendering should not fail");
        self.finish(rendered)
    }

    pub fn build_test_writer(
        &self,
        ctx: &PrContextWithTests,
        review_summary: Option<&str>,
    ) -> PromptPack {
        let engine = PromptEngine::new();
        let rendered = engine
            .env
            .get_template("test_writer")
            .expect("test_writer template")
            .render(context! {
                review => review_summary.map(str::trim).filter(|s| !s.is_empty()),
                existing_tests => non_empty(render_test_files(&ctx.existing_test_files)),
                diff => render_changed_files(&ctx.context),
            })
            .expect("test_writer template rendering should not fail");
        self.finish(rendered)
    }

    pub fn build_test_fixer(
        &self,
        ctx: &PrContextWithTests,
        failing_output: &str,
        iteration: u32,
    ) -> PromptPack {
        let engine = PromptEngine::new();
        let rendered = engine
            .env
            .get_template("test_fixer")
            .expect("test_fixer template")
            .render(context! {
                iteration => iteration,
                failing_output => failing_output,
                existing_tests => non_empty(render_test_files(&ctx.existing_test_files)),
                diff => render_changed_files(&ctx.context),
            })
            .expect("test_fixer template rendering should not fail");
        self.finish(rendered)
    }

    fn finish(&self, rendered: String) -> PromptPack {
        let mut sections = parse_sections(&rendered);
        apply_budget_to_sections(&mut sections, self.budget_bytes);
        PromptPack {
            content: render_sections(&sections),
        }
    }
}

/// Accumulated overlay in the same `path\n---\ncontent` shape as the snapshot.
fn render_accumulated(accumulated: &AccumulatedChanges) -> String {
    accumulated
        .iter()
        .map(|change| format!("{}\n---\n{}\n", change.path, change.content))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Per-file patches, skipping excluded paths.
fn render_changed_files(pr: &PrContext) -> String {
    pr.changed_files
        .iter()
        .filter(|diff| !diff.excluded)
        .map(|diff| diff.raw_patch.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_commit_messages(messages: &[String]) -> String {
    messages
        .iter()
        .map(|msg| format!("- {msg}"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_test_files(files: &[TestFile]) -> String {
    files
        .iter()
        .map(|file| format!("{}\n---\n{}\n", file.path, file.content))
        .collect::<Vec<_>>()
        .join("\n")
}

fn non_empty(text: String) -> Option<String> {
    (!text.trim().is_empty()).then_some(text)
}
