//! Daemon configuration: TOML on disk, `${VAR}` expansion, typed defaults.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub server: ServerConfig,
    pub github: GitHubConfig,
    pub repository: RepositoryConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub tasks: TasksConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitHubConfig {
    pub webhook_secret: String,
    #[serde(default)]
    pub token: String,
    pub owner: String,
    pub repo: String,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_trigger_label")]
    pub trigger_label: String,
    #[serde(default = "default_trigger_command")]
    pub trigger_command: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryConfig {
    pub path: PathBuf,
    #[serde(default = "default_base_branch")]
    pub base_branch: String,
    #[serde(default = "default_remote_name")]
    pub remote_name: String,
    #[serde(default = "default_branch_prefix")]
    pub branch_prefix: String,
    /// Supports `{issue_title}` and `{issue_number}`.
    #[serde(default = "default_commit_template")]
    pub commit_template: String,
    #[serde(default = "default_committer_name")]
    pub committer_name: String,
    #[serde(default = "default_committer_email")]
    pub committer_email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_agent_executable")]
    pub executable: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_grace_period_secs")]
    pub grace_period_secs: u64,
    #[serde(default = "default_true")]
    pub skip_permissions: bool,
    #[serde(default = "default_output_tail_lines")]
    pub output_tail_lines: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            executable: default_agent_executable(),
            args: Vec::new(),
            timeout_secs: default_timeout_secs(),
            grace_period_secs: default_grace_period_secs(),
            skip_permissions: true,
            output_tail_lines: default_output_tail_lines(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TasksConfig {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_true")]
    pub auto_retry: bool,
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
    #[serde(default = "default_dedup_window_secs")]
    pub dedup_window_secs: u64,
}

impl Default for TasksConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            max_retries: default_max_retries(),
            auto_retry: true,
            retry_delay_secs: default_retry_delay_secs(),
            dedup_window_secs: default_dedup_window_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: PathBuf,
    #[serde(default = "default_log_buffer_lines")]
    pub log_buffer_lines: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            sqlite_path: default_sqlite_path(),
            log_buffer_lines: default_log_buffer_lines(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// The handful of knobs the task engine itself reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    pub max_concurrent: usize,
    pub timeout: Duration,
    pub max_retries: u32,
    pub trigger_label: String,
    pub trigger_command: String,
    pub base_branch: String,
    pub remote_name: String,
}

impl RelayConfig {
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            max_concurrent: self.tasks.max_concurrent,
            timeout: Duration::from_secs(self.agent.timeout_secs),
            max_retries: self.tasks.max_retries,
            trigger_label: self.github.trigger_label.clone(),
            trigger_command: self.github.trigger_command.clone(),
            base_branch: self.repository.base_branch.clone(),
            remote_name: self.repository.remote_name.clone(),
        }
    }

    pub fn commit_message(&self, issue_number: u64, issue_title: &str) -> String {
        render_commit_message(&self.repository.commit_template, issue_number, issue_title)
    }
}

pub fn render_commit_message(template: &str, issue_number: u64, issue_title: &str) -> String {
    template
        .replace("{issue_title}", issue_title)
        .replace("{issue_number}", &issue_number.to_string())
}

pub fn parse_config(contents: &str) -> Result<RelayConfig, toml::de::Error> {
    let expanded = expand_env_vars(contents, |name| std::env::var(name).ok());
    toml::from_str(&expanded)
}

pub fn load_config(path: impl AsRef<Path>) -> Result<RelayConfig, ConfigError> {
    let path_ref = path.as_ref();
    let body = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
        path: path_ref.to_path_buf(),
        source,
    })?;
    parse_config(&body).map_err(|source| ConfigError::Parse {
        path: path_ref.to_path_buf(),
        source,
    })
}

/// Replace `${NAME}` and `${NAME:default}` references using `lookup`.
///
/// References to unset variables without a default stay verbatim so that
/// validation can point at them.
pub fn expand_env_vars<F>(input: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return out;
        };

        let reference = &after[..end];
        let (name, default) = match reference.split_once(':') {
            Some((name, default)) => (name, Some(default)),
            None => (reference, None),
        };

        match (is_env_name(name), lookup(name), default) {
            (true, Some(value), _) => out.push_str(&value),
            (true, None, Some(default)) => out.push_str(default),
            _ => out.push_str(&rest[start..start + 2 + end + 1]),
        }
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    out
}

fn is_env_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn default_bind() -> String {
    "127.0.0.1:8787".to_string()
}

fn default_api_base_url() -> String {
    "https://api.github.com".to_string()
}

fn default_trigger_label() -> String {
    "ai-dev".to_string()
}

fn default_trigger_command() -> String {
    "/ai develop".to_string()
}

fn default_base_branch() -> String {
    "main".to_string()
}

fn default_remote_name() -> String {
    "origin".to_string()
}

fn default_branch_prefix() -> String {
    "ai/feature".to_string()
}

fn default_commit_template() -> String {
    "AI: {issue_title}".to_string()
}

fn default_committer_name() -> String {
    "relay-bot".to_string()
}

fn default_committer_email() -> String {
    "relay-bot@users.noreply.github.com".to_string()
}

fn default_agent_executable() -> String {
    "claude".to_string()
}

fn default_timeout_secs() -> u64 {
    1800
}

fn default_grace_period_secs() -> u64 {
    5
}

fn default_output_tail_lines() -> usize {
    200
}

fn default_max_concurrent() -> usize {
    1
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_delay_secs() -> u64 {
    5
}

fn default_dedup_window_secs() -> u64 {
    3600
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("relay.sqlite")
}

fn default_log_buffer_lines() -> usize {
    1000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const MINIMAL: &str = r#"
[github]
webhook_secret = "s3cret"
owner = "acme"
repo = "widgets"

[repository]
path = "/srv/widgets"
"#;

    #[test]
    fn minimal_config_fills_documented_defaults() {
        let config = parse_config(MINIMAL).expect("parse minimal config");

        assert_eq!(config.server.bind, "127.0.0.1:8787");
        assert_eq!(config.github.trigger_label, "ai-dev");
        assert_eq!(config.github.trigger_command, "/ai develop");
        assert_eq!(config.repository.base_branch, "main");
        assert_eq!(config.repository.remote_name, "origin");
        assert_eq!(config.repository.branch_prefix, "ai/feature");
        assert_eq!(config.agent.timeout_secs, 1800);
        assert!(config.agent.skip_permissions);
        assert_eq!(config.tasks.max_concurrent, 1);
        assert_eq!(config.tasks.max_retries, 2);
        assert_eq!(config.storage.log_buffer_lines, 1000);
    }

    #[test]
    fn engine_settings_exposes_engine_view() {
        let mut config = parse_config(MINIMAL).expect("parse");
        config.tasks.max_concurrent = 3;
        config.agent.timeout_secs = 60;

        let settings = config.engine_settings();
        assert_eq!(settings.max_concurrent, 3);
        assert_eq!(settings.timeout, Duration::from_secs(60));
        assert_eq!(settings.max_retries, 2);
        assert_eq!(settings.trigger_label, "ai-dev");
        assert_eq!(settings.base_branch, "main");
        assert_eq!(settings.remote_name, "origin");
    }

    #[test]
    fn commit_message_fills_placeholders() {
        let config = parse_config(MINIMAL).expect("parse");
        assert_eq!(config.commit_message(7, "Fix login"), "AI: Fix login");
        assert_eq!(
            render_commit_message("#{issue_number}: {issue_title}", 7, "Fix login"),
            "#7: Fix login"
        );
    }

    #[test]
    fn expand_env_vars_handles_values_defaults_and_unknowns() {
        let vars: HashMap<&str, &str> = HashMap::from([("TOKEN", "abc"), ("EMPTY", "")]);
        let lookup = |name: &str| vars.get(name).map(|v| v.to_string());

        assert_eq!(expand_env_vars("t=${TOKEN}", lookup), "t=abc");
        assert_eq!(expand_env_vars("e=${EMPTY:x}", lookup), "e=");
        assert_eq!(expand_env_vars("p=${PORT:8080}", lookup), "p=8080");
        assert_eq!(expand_env_vars("m=${MISSING}", lookup), "m=${MISSING}");
        assert_eq!(expand_env_vars("bad=${1X}", lookup), "bad=${1X}");
        assert_eq!(expand_env_vars("open=${TOKEN", lookup), "open=${TOKEN");
        assert_eq!(
            expand_env_vars("${TOKEN}-${TOKEN}", lookup),
            "abc-abc"
        );
    }

    #[test]
    fn load_config_reports_path_on_errors() {
        let dir = std::env::temp_dir().join(format!(
            "relay-core-config-{}",
            std::process::id()
        ));
        fs::create_dir_all(&dir).expect("create dir");

        let missing = dir.join("missing.toml");
        let err = load_config(&missing).expect_err("missing file");
        assert!(matches!(err, ConfigError::Read { ref path, .. } if path == &missing));

        let broken = dir.join("broken.toml");
        fs::write(&broken, "[github\n").expect("write broken config");
        let err = load_config(&broken).expect_err("broken toml");
        assert!(err.to_string().contains("failed to parse config"));

        let _ = fs::remove_dir_all(&dir);
    }
}
