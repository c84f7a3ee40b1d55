//! Pipeline configuration assembled from the environment at startup.
//!
//! All components consume the config by parameter; nothing reads `std::env`
//! after this module has run. Validation happens before any side effect so a
//! missing token never leaves a half-touched working tree behind.

use anyhow::{Context, Result, anyhow};

/// LLM provider backing the structured-output client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    OpenAi,
    Anthropic,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::Anthropic => "anthropic",
        }
    }
}

/// `owner/repo` slug for the hosting API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoSlug {
    pub owner: String,
    pub repo: String,
}

impl RepoSlug {
    pub fn parse(raw: &str) -> Result<Self> {
        let (owner, repo) = raw
            .split_once('/')
            .ok_or_else(|| anyhow!("GITHUB_REPOSITORY must be 'owner/repo', got '{raw}'"))?;
        if owner.trim().is_empty() || repo.trim().is_empty() {
            return Err(anyhow!("GITHUB_REPOSITORY must be 'owner/repo', got '{raw}'"));
        }
        Ok(Self {
            owner: owner.trim().to_string(),
            repo: repo.trim().to_string(),
        })
    }
}

/// Immutable configuration for one pipeline run.
#[derive(Debug, Clone)]
pub struct Config {
    /// Natural-language task description (`FEATURE_REQUEST`).
    pub feature_request: String,
    /// Hosting credentials (`GITHUB_TOKEN`).
    pub github_token: String,
    /// Target repository (`GITHUB_REPOSITORY`).
    pub repository: Option<RepoSlug>,
    /// Provider for all structured LLM calls (`LLM_PROVIDER`, default openai).
    pub provider: Provider,
    /// API key for the chosen provider.
    pub api_key: String,
    /// Model identifier override (`LLM_MODEL`).
    pub model: Option<String>,
    /// Base branch the PR targets (`BASE_BRANCH`, default `main`).
    pub base_branch: String,
    /// Local test command as argv (`TEST_COMMAND`, default `npm test`).
    pub test_command: Vec<String>,
    /// When true, each step also runs gating/generation/tests (`STEP_TESTS=1`).
    pub step_tests: bool,
    /// Repair budget *k* for the test-fix loop (`MAX_TEST_FIX_ATTEMPTS`, default 3).
    pub max_test_fix_attempts: u32,
    /// High-effort reasoning flag, applied where the provider supports it
    /// (`LLM_HIGH_EFFORT=1`).
    pub high_effort: bool,
    /// Branch name override; defaults to the timestamped `agent/` policy.
    pub branch: Option<String>,
    /// Byte budget for prompt packs before sections are dropped.
    pub prompt_budget_bytes: usize,
    /// Timeout for one LLM call, in seconds.
    pub llm_timeout_secs: u64,
    /// Timeout for the local test run, in seconds.
    pub test_timeout_secs: u64,
    /// Truncate captured test output beyond this many bytes.
    pub test_output_limit_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            feature_request: String::new(),
            github_token: String::new(),
            repository: None,
            provider: Provider::OpenAi,
            api_key: String::new(),
            model: None,
            base_branch: "main".to_string(),
            test_command: vec!["npm".to_string(), "test".to_string()],
            step_tests: false,
            max_test_fix_attempts: 3,
            high_effort: false,
            branch: None,
            prompt_budget_bytes: 48_000,
            llm_timeout_secs: 300,
            test_timeout_secs: 30 * 60,
            test_output_limit_bytes: 100_000,
        }
    }
}

impl Config {
    /// Read configuration from the process environment without validating.
    ///
    /// Callers pick the validation matching the command (`validate_for_run`
    /// needs hosting credentials, `validate_for_plan` does not).
    pub fn from_env() -> Result<Self> {
        let mut cfg = Config::default();
        cfg.feature_request = env_string("FEATURE_REQUEST").unwrap_or_default();
        cfg.github_token = env_string("GITHUB_TOKEN").unwrap_or_default();
        cfg.repository = match env_string("GITHUB_REPOSITORY") {
            Some(raw) => Some(RepoSlug::parse(&raw)?),
            None => None,
        };
        cfg.provider = match env_string("LLM_PROVIDER").as_deref() {
            None | Some("openai") => Provider::OpenAi,
            Some("anthropic") => Provider::Anthropic,
            Some(other) => {
                return Err(anyhow!(
                    "LLM_PROVIDER must be 'openai' or 'anthropic', got '{other}'"
                ));
            }
        };
        cfg.api_key = match cfg.provider {
            Provider::OpenAi => env_string("OPENAI_API_KEY").unwrap_or_default(),
            Provider::Anthropic => env_string("ANTHROPIC_API_KEY").unwrap_or_default(),
        };
        cfg.model = env_string("LLM_MODEL");
        if let Some(base) = env_string("BASE_BRANCH") {
            cfg.base_branch = base;
        }
        if let Some(raw) = env_string("TEST_COMMAND") {
            cfg.test_command = raw.split_whitespace().map(str::to_string).collect();
        }
        cfg.step_tests = env_flag("STEP_TESTS");
        if let Some(raw) = env_string("MAX_TEST_FIX_ATTEMPTS") {
            cfg.max_test_fix_attempts = raw
                .parse()
                .with_context(|| format!("parse MAX_TEST_FIX_ATTEMPTS '{raw}'"))?;
        }
        cfg.high_effort = env_flag("LLM_HIGH_EFFORT");
        Ok(cfg)
    }

    /// Validate everything the full pipeline needs.
    pub fn validate_for_run(&self) -> Result<()> {
        self.validate_for_plan()?;
        if self.github_token.is_empty() {
            return Err(anyhow!("GITHUB_TOKEN is required"));
        }
        if self.repository.is_none() {
            return Err(anyhow!("GITHUB_REPOSITORY is required"));
        }
        Ok(())
    }

    /// Validate the subset needed for planning only (no hosting side effects).
    pub fn validate_for_plan(&self) -> Result<()> {
        if self.feature_request.trim().is_empty() {
            return Err(anyhow!("FEATURE_REQUEST is required"));
        }
        if self.api_key.is_empty() {
            let var = match self.provider {
                Provider::OpenAi => "OPENAI_API_KEY",
                Provider::Anthropic => "ANTHROPIC_API_KEY",
            };
            return Err(anyhow!("{var} is required for provider {}", self.provider.as_str()));
        }
        if self.test_command.is_empty() {
            return Err(anyhow!("TEST_COMMAND must not be empty"));
        }
        if self.max_test_fix_attempts == 0 {
            return Err(anyhow!("MAX_TEST_FIX_ATTEMPTS must be > 0"));
        }
        Ok(())
    }

    /// Repository slug, for callers that already validated for run.
    pub fn repo(&self) -> Result<&RepoSlug> {
        self.repository
            .as_ref()
            .ok_or_else(|| anyhow!("GITHUB_REPOSITORY is required"))
    }
}

fn env_string(key: &str) -> Option<String> {
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => Some(value),
        _ => None,
    }
}

fn env_flag(key: &str) -> bool {
    matches!(std::env::var(key).as_deref(), Ok("1") | Ok("true"))
}
