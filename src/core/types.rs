//! Shared deterministic types for the pipeline.
//!
//! These types define stable contracts between components. They should not
//! depend on external state or I/O and must remain deterministic across runs.

use serde::{Deserialize, Serialize};

/// Name of the sentinel step the planner yields when it cannot produce a plan.
pub const PLAN_ERROR_STEP: &str = "PlanError";

/// One planner-produced unit of work. Immutable once planned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub name: String,
    pub description: String,
    pub plan: String,
}

impl Step {
    /// Sentinel step carrying the planner failure diagnostic.
    pub fn plan_error(diagnostic: impl Into<String>) -> Self {
        Self {
            name: PLAN_ERROR_STEP.to_string(),
            description: diagnostic.into(),
            plan: String::new(),
        }
    }

    pub fn is_plan_error(&self) -> bool {
        self.name == PLAN_ERROR_STEP
    }
}

/// Ordered plan produced by the planner. The schema keeps a single list field
/// so an empty plan is unambiguous.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanOutput {
    pub steps: Vec<Step>,
}

/// Full post-state of one file. Writes are replace-in-full; there is no patch
/// arithmetic anywhere in the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    /// Repository-relative path.
    pub path: String,
    pub content: String,
}

/// Generator output wrapper (single list field keeps empty output unambiguous).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChangeSet {
    pub changes: Vec<FileChange>,
}

/// One parsed element of a unified diff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDiff {
    /// Post-image path of the touched file.
    pub path: String,
    /// Per-file patch text, preserved verbatim.
    pub raw_patch: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additions: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletions: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Set when a path is deliberately hidden from prompts.
    #[serde(default)]
    pub excluded: bool,
}

/// Per-run pipeline record for one review pass. Built twice per run: partial
/// (`HEAD~1..HEAD`) and full (`merge-base..HEAD`); never cached across commits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrContext {
    pub owner: String,
    pub repo: String,
    pub pull_number: Option<u64>,
    pub head_ref: String,
    pub base_ref: String,
    pub title: String,
    pub changed_files: Vec<FileDiff>,
    pub commit_messages: Vec<String>,
}

/// An existing test file under the designated test root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestFile {
    pub path: String,
    pub content: String,
}

/// PrContext extended with the existing unit-test files, for gating and test
/// generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrContextWithTests {
    pub context: PrContext,
    pub existing_test_files: Vec<TestFile>,
}

/// Per-file review note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAnalysis {
    pub path: String,
    pub analysis: String,
}

/// Structured review produced by the code reviewer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewAnalysis {
    pub summary: String,
    pub file_analyses: Vec<FileAnalysis>,
    pub overall_suggestions: Vec<String>,
}

impl ReviewAnalysis {
    /// Fallback analysis when the model reply cannot be parsed. The review is
    /// advisory, so a parse failure must not abort the pipeline.
    pub fn parse_error() -> Self {
        Self {
            summary: "Review parse error".to_string(),
            file_analyses: Vec::new(),
            overall_suggestions: Vec::new(),
        }
    }
}

/// What a test proposal does to its target path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProposalAction {
    Create,
    Update,
    Rename,
}

/// One proposed test file from the generator or repairer.
///
/// When `action` is `Rename`, `old_path` must be non-empty and differ from
/// `path`; otherwise `old_path` is ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestProposal {
    pub path: String,
    pub test_content: String,
    pub action: ProposalAction,
    #[serde(default)]
    pub old_path: String,
}

/// Proposal list wrapper, mirroring the generator-output shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestProposalSet {
    pub proposals: Vec<TestProposal>,
}

/// Whether a diff requires new or updated tests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatingDecision {
    pub should_generate: bool,
    pub reasoning: String,
    pub recommendation: String,
}

impl GatingDecision {
    /// Fallback when the gating call fails: skip generation rather than abort.
    pub fn gating_error() -> Self {
        Self {
            should_generate: false,
            reasoning: "Gating error".to_string(),
            recommendation: String::new(),
        }
    }
}

/// Result of one local test run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestRunOutcome {
    pub failed: bool,
    pub output: String,
}
