//! Git adapter for the pipeline.
//!
//! Every commit and push the agent makes goes through this wrapper, so we keep
//! a small, explicit interface over `git` subprocess calls with argument
//! arrays (no shell interpolation). Any git failure is fatal for the
//! orchestrator: the working tree may be inconsistent afterwards.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};

/// Remote name the pipeline pushes to.
pub const REMOTE: &str = "origin";

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Return the current branch name (errors on detached HEAD).
    #[instrument(skip_all)]
    pub fn current_branch(&self) -> Result<String> {
        let out = self.run_capture(&["rev-parse", "--abbrev-ref", "HEAD"])?;
        let name = out.trim().to_string();
        if name == "HEAD" {
            warn!("detached HEAD detected");
            return Err(anyhow!("detached HEAD (refuse to run)"));
        }
        debug!(branch = %name, "current branch");
        Ok(name)
    }

    /// Resolve a revision to a full SHA, or `None` when it does not exist.
    pub fn rev_parse(&self, rev: &str) -> Result<Option<String>> {
        let out = self.run(&["rev-parse", "--verify", "--quiet", rev])?;
        if !out.status.success() {
            return Ok(None);
        }
        Ok(Some(String::from_utf8_lossy(&out.stdout).trim().to_string()))
    }

    /// True when HEAD has at least one parent commit.
    pub fn head_has_parent(&self) -> Result<bool> {
        Ok(self.rev_parse("HEAD~1")?.is_some())
    }

    /// Most recent common ancestor of two revisions, or `None` when git cannot
    /// compute one (unrelated histories, missing ref).
    pub fn merge_base(&self, a: &str, b: &str) -> Result<Option<String>> {
        let out = self.run(&["merge-base", a, b])?;
        if !out.status.success() {
            return Ok(None);
        }
        Ok(Some(String::from_utf8_lossy(&out.stdout).trim().to_string()))
    }

    /// Check whether a local branch exists.
    pub fn branch_exists(&self, branch: &str) -> Result<bool> {
        let status = self
            .run(&[
                "show-ref",
                "--verify",
                "--quiet",
                &format!("refs/heads/{branch}"),
            ])?
            .status;
        Ok(status.success())
    }

    /// True when the configured remote is set up in this clone.
    pub fn has_remote(&self) -> Result<bool> {
        let out = self.run_capture(&["remote"])?;
        Ok(out.lines().any(|line| line.trim() == REMOTE))
    }

    /// Probe the remote for a branch head without fetching.
    #[instrument(skip_all, fields(branch))]
    pub fn remote_branch_exists(&self, branch: &str) -> Result<bool> {
        if !self.has_remote()? {
            return Ok(false);
        }
        let out = self.run_capture(&[
            "ls-remote",
            "--heads",
            REMOTE,
            &format!("refs/heads/{branch}"),
        ])?;
        Ok(!out.trim().is_empty())
    }

    /// Check out the working branch for a run.
    ///
    /// Checks out `base`, fast-forwards it from the remote, then either
    /// re-attaches to an existing remote branch (rebase onto its head) or
    /// creates the branch fresh from base. Leaves HEAD at a valid tip with no
    /// merge in progress.
    #[instrument(skip_all, fields(branch, base))]
    pub fn switch_to_branch(&self, branch: &str, base: &str) -> Result<()> {
        self.checkout_branch(base)?;
        if self.has_remote()? {
            // Fast-forward base; a base branch that has never been pushed is
            // tolerated, a diverged base is not.
            let out = self.run(&["pull", "--ff-only", REMOTE, base])?;
            if !out.status.success() {
                let stderr = String::from_utf8_lossy(&out.stderr);
                if self.remote_branch_exists(base)? {
                    return Err(anyhow!("fast-forward {base} failed: {}", stderr.trim()));
                }
                debug!(base, "base branch has no remote head, skipping fast-forward");
            }
            if self.remote_branch_exists(branch)? {
                debug!(branch, "remote branch exists, attaching and rebasing");
                if self.branch_exists(branch)? {
                    self.checkout_branch(branch)?;
                } else {
                    self.run_checked(&[
                        "checkout",
                        "-b",
                        branch,
                        &format!("{REMOTE}/{branch}"),
                    ])?;
                }
                self.run_checked(&["rebase", &format!("{REMOTE}/{branch}")])?;
                return Ok(());
            }
        }
        if self.branch_exists(branch)? {
            self.checkout_branch(branch)
        } else {
            self.checkout_new_branch(branch)
        }
    }

    /// Create and checkout a new branch at current HEAD.
    #[instrument(skip_all, fields(branch))]
    pub fn checkout_new_branch(&self, branch: &str) -> Result<()> {
        debug!(branch, "creating and checking out new branch");
        self.run_checked(&["checkout", "-b", branch])?;
        Ok(())
    }

    /// Checkout an existing branch.
    #[instrument(skip_all, fields(branch))]
    pub fn checkout_branch(&self, branch: &str) -> Result<()> {
        debug!(branch, "checking out branch");
        self.run_checked(&["checkout", branch])?;
        Ok(())
    }

    /// Stage all working-tree changes, including deletions and new files.
    pub fn add_all(&self) -> Result<()> {
        self.run_checked(&["add", "-A"])?;
        Ok(())
    }

    /// True if there is anything staged for commit.
    pub fn has_staged_changes(&self) -> Result<bool> {
        let out = self.run(&["diff", "--cached", "--name-only"])?;
        Ok(!String::from_utf8_lossy(&out.stdout).trim().is_empty())
    }

    /// Commit staged changes with a message.
    ///
    /// If there are no staged changes, this returns Ok(false) and does nothing.
    #[instrument(skip_all)]
    pub fn commit_staged(&self, message: &str) -> Result<bool> {
        if !self.has_staged_changes()? {
            debug!("no staged changes, skipping commit");
            return Ok(false);
        }
        debug!("committing staged changes");
        self.run_checked(&["commit", "-m", message])?;
        Ok(true)
    }

    /// Push the current branch, absorbing concurrent remote updates.
    ///
    /// When the remote branch exists: fetch, rebase onto its head, then push.
    /// When it does not: push with upstream set. Either way the local tip is
    /// visible on the remote afterwards.
    #[instrument(skip_all, fields(branch))]
    pub fn push(&self, branch: &str) -> Result<()> {
        if self.remote_branch_exists(branch)? {
            self.run_checked(&["fetch", REMOTE, branch])?;
            self.run_checked(&["rebase", &format!("{REMOTE}/{branch}")])?;
            self.run_checked(&["push", REMOTE, branch])?;
        } else {
            self.run_checked(&["push", "-u", REMOTE, branch])?;
        }
        Ok(())
    }

    /// Unified diff between two revisions with enough context lines to contain
    /// each touched file in full.
    pub fn diff_full_context(&self, from: &str, to: &str) -> Result<String> {
        self.run_capture(&["diff", "--unified=100000", &format!("{from}..{to}")])
    }

    /// Full message (subject + body) of the last commit.
    pub fn last_commit_message(&self) -> Result<String> {
        Ok(self.run_capture(&["log", "-1", "--format=%B"])?.trim().to_string())
    }

    /// Subjects + bodies of every commit in `from..HEAD`, oldest first.
    pub fn commit_messages_since(&self, from: &str) -> Result<Vec<String>> {
        // NUL-separated so multi-line bodies split unambiguously.
        let raw = self.run_capture(&[
            "log",
            "--reverse",
            "--format=%B%x00",
            &format!("{from}..HEAD"),
        ])?;
        Ok(raw
            .split('\0')
            .map(str::trim)
            .filter(|msg| !msg.is_empty())
            .map(str::to_string)
            .collect())
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("git {} failed: {}", args.join(" "), stderr.trim()));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }
}
