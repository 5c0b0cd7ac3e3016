//! Dependency checks reported by `GET /health`.

use std::collections::BTreeMap;
use std::time::Duration;

use relay_agents::locate_executable;
use relay_core::{AgentConfig, RelayConfig, Validate, ValidationLevel};
use relay_git::GitAutomation;
use serde::Serialize;

pub const CHECK_CONFIG: &str = "config";
pub const CHECK_REPOSITORY: &str = "git_repository";
pub const CHECK_AGENT: &str = "agent_cli";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub healthy: bool,
    pub message: String,
}

impl HealthCheck {
    fn pass(message: impl Into<String>) -> Self {
        Self {
            healthy: true,
            message: message.into(),
        }
    }

    fn fail(message: impl Into<String>) -> Self {
        Self {
            healthy: false,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub version: &'static str,
    pub uptime_secs: u64,
    pub checks: BTreeMap<&'static str, HealthCheck>,
}

impl HealthReport {
    pub fn from_checks(uptime: Duration, checks: BTreeMap<&'static str, HealthCheck>) -> Self {
        let status = if checks.values().all(|check| check.healthy) {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded
        };
        Self {
            status,
            version: env!("CARGO_PKG_VERSION"),
            uptime_secs: uptime.as_secs(),
            checks,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

/// Validation errors make the config unhealthy; warnings are only counted.
pub fn check_config(config: &RelayConfig) -> HealthCheck {
    let issues = config.validate();
    let errors: Vec<&str> = issues
        .iter()
        .filter(|issue| issue.level == ValidationLevel::Error)
        .map(|issue| issue.code)
        .collect();
    if !errors.is_empty() {
        return HealthCheck::fail(format!("invalid configuration: {}", errors.join(", ")));
    }
    let warnings = issues.len();
    if warnings == 0 {
        HealthCheck::pass("configuration valid")
    } else {
        HealthCheck::pass(format!("configuration valid with {warnings} warning(s)"))
    }
}

pub async fn check_repository(git: &GitAutomation) -> HealthCheck {
    match git.check_repository().await {
        Ok(()) => HealthCheck::pass("repository reachable"),
        Err(err) => HealthCheck::fail(err.to_string()),
    }
}

pub fn check_agent(config: &AgentConfig) -> HealthCheck {
    match locate_executable(&config.executable) {
        Some(path) => HealthCheck::pass(format!("found {}", path.display())),
        None => HealthCheck::fail(format!(
            "agent executable {:?} not found on PATH",
            config.executable
        )),
    }
}
