//! Test-only helpers: scripted implementations of the external seams and a
//! temp git repository with a local bare remote.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result, anyhow};

use crate::core::types::TestRunOutcome;
use crate::github::ReviewSurface;
use crate::io::test_runner::{TestRequest, TestRunner};
use crate::llm::{ModelClient, ModelRequest};

/// One scripted model reply.
pub enum ScriptedResponse {
    Json(String),
    Error(String),
}

/// Model client that returns predetermined replies and records every request.
pub struct ScriptedModelClient {
    responses: RefCell<VecDeque<ScriptedResponse>>,
    requests: RefCell<Vec<ModelRequest>>,
}

impl ScriptedModelClient {
    pub fn new(responses: Vec<ScriptedResponse>) -> Self {
        Self {
            responses: RefCell::new(responses.into()),
            requests: RefCell::new(Vec::new()),
        }
    }

    /// Convenience: every reply is a raw JSON string.
    pub fn with_json(replies: Vec<&str>) -> Self {
        Self::new(
            replies
                .into_iter()
                .map(|r| ScriptedResponse::Json(r.to_string()))
                .collect(),
        )
    }

    /// Number of completions requested so far.
    pub fn calls(&self) -> usize {
        self.requests.borrow().len()
    }

    /// All requests seen so far, in order.
    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.borrow().clone()
    }
}

impl ModelClient for ScriptedModelClient {
    fn complete(&self, request: &ModelRequest) -> Result<String> {
        self.requests.borrow_mut().push(request.clone());
        match self.responses.borrow_mut().pop_front() {
            Some(ScriptedResponse::Json(reply)) => Ok(reply),
            Some(ScriptedResponse::Error(message)) => Err(anyhow!(message)),
            None => Err(anyhow!("scripted model client exhausted")),
        }
    }
}

/// In-memory review surface that records every panel mutation.
#[derive(Default)]
pub struct RecordingSurface {
    pr: RefCell<Option<(u64, String)>>,
    ensure_calls: RefCell<u32>,
    comments: RefCell<Vec<(u64, String)>>,
    pr_body_updates: RefCell<Vec<String>>,
    /// When true, every comment operation fails (for non-fatal-error tests).
    pub fail_comments: bool,
}

impl RecordingSurface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Surface whose comment operations always fail.
    pub fn with_failing_comments() -> Self {
        Self {
            fail_comments: true,
            ..Self::default()
        }
    }

    pub fn ensure_calls(&self) -> u32 {
        *self.ensure_calls.borrow()
    }

    pub fn pr_number(&self) -> Option<u64> {
        self.pr.borrow().as_ref().map(|(number, _)| *number)
    }

    pub fn comments(&self) -> Vec<(u64, String)> {
        self.comments.borrow().clone()
    }

    pub fn comment_body(&self, id: u64) -> Option<String> {
        self.comments
            .borrow()
            .iter()
            .find(|(comment_id, _)| *comment_id == id)
            .map(|(_, body)| body.clone())
    }

    pub fn pr_body_updates(&self) -> Vec<String> {
        self.pr_body_updates.borrow().clone()
    }
}

impl ReviewSurface for RecordingSurface {
    fn ensure_pull_request(&self, _head: &str, _base: &str, _title: &str, body: &str) -> Result<u64> {
        *self.ensure_calls.borrow_mut() += 1;
        let mut pr = self.pr.borrow_mut();
        if let Some((number, _)) = pr.as_ref() {
            return Ok(*number);
        }
        *pr = Some((101, body.to_string()));
        Ok(101)
    }

    fn update_pull_request_body(&self, _number: u64, body: &str) -> Result<()> {
        self.pr_body_updates.borrow_mut().push(body.to_string());
        Ok(())
    }

    fn create_comment(&self, _number: u64, body: &str) -> Result<u64> {
        if self.fail_comments {
            return Err(anyhow!("comment surface unavailable"));
        }
        let mut comments = self.comments.borrow_mut();
        let id = comments.len() as u64 + 1;
        comments.push((id, body.to_string()));
        Ok(id)
    }

    fn update_comment(&self, comment_id: u64, body: &str) -> Result<()> {
        if self.fail_comments {
            return Err(anyhow!("comment surface unavailable"));
        }
        let mut comments = self.comments.borrow_mut();
        let entry = comments
            .iter_mut()
            .find(|(id, _)| *id == comment_id)
            .ok_or_else(|| anyhow!("no comment {comment_id}"))?;
        entry.1 = body.to_string();
        Ok(())
    }
}

/// Test runner that replays predetermined outcomes.
pub struct ScriptedTestRunner {
    outcomes: RefCell<VecDeque<TestRunOutcome>>,
}

impl ScriptedTestRunner {
    pub fn new(outcomes: Vec<TestRunOutcome>) -> Self {
        Self {
            outcomes: RefCell::new(outcomes.into()),
        }
    }

    pub fn passing() -> TestRunOutcome {
        TestRunOutcome {
            failed: false,
            output: "all tests passed".to_string(),
        }
    }

    pub fn failing(output: &str) -> TestRunOutcome {
        TestRunOutcome {
            failed: true,
            output: output.to_string(),
        }
    }
}

impl TestRunner for ScriptedTestRunner {
    fn run(&self, _request: &TestRequest) -> Result<TestRunOutcome> {
        self.outcomes
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| anyhow!("scripted test runner exhausted"))
    }
}

/// Temp git repository with a bare `origin` remote, one commit on `main`.
pub struct TestRepo {
    _temp: tempfile::TempDir,
    root: PathBuf,
}

impl TestRepo {
    pub fn new() -> Result<Self> {
        let temp = tempfile::tempdir().context("create tempdir")?;
        let root = temp.path().join("work");
        let remote = temp.path().join("remote.git");
        fs::create_dir_all(&root).context("create workdir")?;

        run_git(&root, &["init", "-q"])?;
        run_git(&root, &["symbolic-ref", "HEAD", "refs/heads/main"])?;
        run_git(&root, &["config", "user.email", "test@example.com"])?;
        run_git(&root, &["config", "user.name", "test"])?;

        fs::write(root.join("README.md"), "# fixture\n").context("write README")?;
        run_git(&root, &["add", "README.md"])?;
        run_git(&root, &["commit", "-q", "-m", "chore: init"])?;

        run_git(temp.path(), &["init", "-q", "--bare", "remote.git"])?;
        let remote_str = remote.to_string_lossy().into_owned();
        run_git(&root, &["remote", "add", "origin", &remote_str])?;
        run_git(&root, &["push", "-q", "-u", "origin", "main"])?;

        Ok(Self { _temp: temp, root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Number of commits reachable from a revision.
    pub fn commit_count(&self, rev: &str) -> Result<u32> {
        let out = Command::new("git")
            .args(["rev-list", "--count", rev])
            .current_dir(&self.root)
            .output()
            .context("git rev-list")?;
        if !out.status.success() {
            return Err(anyhow!(
                "git rev-list failed: {}",
                String::from_utf8_lossy(&out.stderr).trim()
            ));
        }
        String::from_utf8_lossy(&out.stdout)
            .trim()
            .parse()
            .context("parse rev-list count")
    }

    /// Read a file relative to the working tree.
    pub fn read(&self, relative: &str) -> Result<String> {
        fs::read_to_string(self.root.join(relative))
            .with_context(|| format!("read {relative}"))
    }
}

fn run_git(dir: &Path, args: &[&str]) -> Result<()> {
    let status = Command::new("git")
        .args(args)
        .current_dir(dir)
        .status()
        .with_context(|| format!("spawn git {}", args.join(" ")))?;
    if !status.success() {
        return Err(anyhow!("git {} failed", args.join(" ")));
    }
    Ok(())
}
