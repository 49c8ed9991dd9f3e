use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, UnderwriteError};

/// Top-level Underwrite configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub executor: ExecutorConfig,
    /// Worker processes, keyed by worker name.
    #[serde(default)]
    pub workers: HashMap<String, WorkerConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Default per-call timeout in seconds.
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,
    /// Per-capability overrides of `call_timeout_secs`.
    #[serde(default)]
    pub call_timeouts: HashMap<String, u64>,
    /// How long a freshly launched worker has to answer the handshake.
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_secs: u64,
    /// Optional deadline for a whole run. Unset means runs are bounded only
    /// by per-call timeouts.
    #[serde(default)]
    pub run_deadline_secs: Option<u64>,
    /// Retry policy for idempotent capabilities. Unset means no retries.
    #[serde(default)]
    pub retry: Option<RetryConfig>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            call_timeout_secs: default_call_timeout(),
            call_timeouts: HashMap::new(),
            handshake_timeout_secs: default_handshake_timeout(),
            run_deadline_secs: None,
            retry: None,
        }
    }
}

impl ExecutorConfig {
    pub fn call_timeout(&self, capability: &str) -> Duration {
        let secs = self
            .call_timeouts
            .get(capability)
            .copied()
            .unwrap_or(self.call_timeout_secs);
        Duration::from_secs(secs)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    pub fn run_deadline(&self) -> Option<Duration> {
        self.run_deadline_secs.map(Duration::from_secs)
    }
}

fn default_call_timeout() -> u64 {
    30
}

fn default_handshake_timeout() -> u64 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Capabilities safe to call more than once.
    #[serde(default)]
    pub capabilities: Vec<String>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            capabilities: vec![],
        }
    }
}

fn default_max_retries() -> u32 {
    2
}

fn default_initial_backoff_ms() -> u64 {
    200
}

fn default_max_backoff_ms() -> u64 {
    5000
}

/// Launch specification of one worker process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment passed to the worker. The coordinator's own environment
    /// is not forwarded beyond what the OS inherits.
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| UnderwriteError::ConfigNotFound(path.display().to_string()))?;

        Self::parse(&content)
    }

    /// Parse config text, expanding `${ENV_VAR}` references first.
    pub fn parse(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content);

        toml::from_str(&expanded).map_err(|e| UnderwriteError::Config(e.to_string()))
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // Keep original if env var not set
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_env_vars() {
        std::env::set_var("TEST_UNDERWRITE_VAR", "hello");
        let result = expand_env_vars("key = \"${TEST_UNDERWRITE_VAR}\"");
        assert_eq!(result, "key = \"hello\"");
        std::env::remove_var("TEST_UNDERWRITE_VAR");
    }

    #[test]
    fn test_expand_env_vars_missing() {
        let result = expand_env_vars("key = \"${NONEXISTENT_UNDERWRITE_VAR}\"");
        assert_eq!(result, "key = \"${NONEXISTENT_UNDERWRITE_VAR}\"");
    }

    #[test]
    fn test_defaults_from_empty_toml() {
        let config = AppConfig::parse("").unwrap();
        assert_eq!(config.executor.call_timeout_secs, 30);
        assert_eq!(config.executor.handshake_timeout_secs, 10);
        assert!(config.executor.run_deadline().is_none());
        assert!(config.executor.retry.is_none());
        assert!(config.workers.is_empty());
    }

    #[test]
    fn test_call_timeout_override() {
        let config = AppConfig::parse(
            r#"
[executor]
call_timeout_secs = 5

[executor.call_timeouts]
generate_explanation = 90
"#,
        )
        .unwrap();
        assert_eq!(
            config.executor.call_timeout("generate_explanation"),
            Duration::from_secs(90)
        );
        assert_eq!(
            config.executor.call_timeout("make_decision"),
            Duration::from_secs(5)
        );
    }

    #[test]
    fn test_retry_section_defaults() {
        let config = AppConfig::parse(
            r#"
[executor.retry]
capabilities = ["fetch_macro_risk"]
"#,
        )
        .unwrap();
        let retry = config.executor.retry.unwrap();
        assert_eq!(retry.max_retries, 2);
        assert_eq!(retry.initial_backoff_ms, 200);
        assert_eq!(retry.capabilities, vec!["fetch_macro_risk"]);
    }

    #[test]
    fn test_worker_requires_command() {
        let err = AppConfig::parse(
            r#"
[workers.intake]
args = ["worker", "normalize_application"]
"#,
        )
        .unwrap_err();
        assert!(matches!(err, UnderwriteError::Config(_)));
    }
}
