//! Local test-command adapter.
//!
//! A non-zero exit is a test failure, not an error: the repair loop feeds the
//! captured output back to the model. Only a failure to spawn the command at
//! all surfaces as an error.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::{Result, anyhow};
use tracing::{debug, instrument, warn};

use crate::core::types::TestRunOutcome;
use crate::io::process::run_command_with_timeout;

/// Parameters for one test run.
#[derive(Debug, Clone)]
pub struct TestRequest {
    pub workdir: PathBuf,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
}

/// Abstraction over the local test command, for scripted tests.
pub trait TestRunner {
    fn run(&self, request: &TestRequest) -> Result<TestRunOutcome>;
}

/// Runs the configured test command (e.g. `npm test`) as a subprocess.
pub struct CommandTestRunner {
    command: Vec<String>,
}

impl CommandTestRunner {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }
}

impl TestRunner for CommandTestRunner {
    #[instrument(skip_all, fields(command = %self.command.join(" ")))]
    fn run(&self, request: &TestRequest) -> Result<TestRunOutcome> {
        let program = self
            .command
            .first()
            .ok_or_else(|| anyhow!("test command must not be empty"))?;
        let mut cmd = Command::new(program);
        cmd.args(&self.command[1..]).current_dir(&request.workdir);

        let output = run_command_with_timeout(cmd, request.timeout, request.output_limit_bytes)?;
        let failed = output.timed_out || !output.status.success();
        if failed {
            warn!(timed_out = output.timed_out, code = ?output.status.code(), "test run failed");
        } else {
            debug!("test run passed");
        }
        Ok(TestRunOutcome {
            failed,
            output: output.combined_log(),
        })
    }
}
