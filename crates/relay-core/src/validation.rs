//! Startup checks for a loaded [`RelayConfig`].

use serde::{Deserialize, Serialize};

use crate::config::RelayConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationLevel {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub level: ValidationLevel,
    pub code: &'static str,
    pub message: String,
}

impl ValidationIssue {
    fn error(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            level: ValidationLevel::Error,
            code,
            message: message.into(),
        }
    }

    fn warning(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            level: ValidationLevel::Warning,
            code,
            message: message.into(),
        }
    }
}

pub trait Validate {
    fn validate(&self) -> Vec<ValidationIssue>;
}

pub fn has_errors(issues: &[ValidationIssue]) -> bool {
    issues
        .iter()
        .any(|issue| issue.level == ValidationLevel::Error)
}

const MIN_SENSIBLE_TIMEOUT_SECS: u64 = 30;

impl Validate for RelayConfig {
    fn validate(&self) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();

        let secret = self.github.webhook_secret.trim();
        if secret.is_empty() {
            issues.push(ValidationIssue::error(
                "github.webhook_secret.empty",
                "webhook secret is required to authenticate deliveries",
            ));
        } else if secret.starts_with("${") {
            issues.push(ValidationIssue::error(
                "github.webhook_secret.unresolved",
                format!("webhook secret references an unset variable: {secret}"),
            ));
        }

        let token = self.github.token.trim();
        if token.is_empty() || token.starts_with("${") {
            issues.push(ValidationIssue::warning(
                "github.token.missing",
                "no GitHub token; pull requests and issue comments will fail",
            ));
        }

        if self.github.owner.trim().is_empty() || self.github.repo.trim().is_empty() {
            issues.push(ValidationIssue::error(
                "github.repository.empty",
                "github owner and repo must both be set",
            ));
        }

        if self.github.trigger_label.trim().is_empty() {
            issues.push(ValidationIssue::error(
                "github.trigger_label.empty",
                "trigger label cannot be empty",
            ));
        }

        if self.github.trigger_command.trim().is_empty() {
            issues.push(ValidationIssue::error(
                "github.trigger_command.empty",
                "trigger command cannot be empty",
            ));
        }

        if self.repository.base_branch.trim().is_empty() {
            issues.push(ValidationIssue::error(
                "repository.base_branch.empty",
                "base branch cannot be empty",
            ));
        }

        if self.repository.branch_prefix.trim().is_empty() {
            issues.push(ValidationIssue::error(
                "repository.branch_prefix.empty",
                "branch prefix cannot be empty",
            ));
        }

        if self.agent.executable.trim().is_empty() {
            issues.push(ValidationIssue::error(
                "agent.executable.empty",
                "agent executable cannot be empty",
            ));
        }

        if self.agent.timeout_secs == 0 {
            issues.push(ValidationIssue::error(
                "agent.timeout.zero",
                "agent timeout must be greater than zero",
            ));
        } else if self.agent.timeout_secs < MIN_SENSIBLE_TIMEOUT_SECS {
            issues.push(ValidationIssue::warning(
                "agent.timeout.short",
                format!(
                    "agent timeout of {}s is unlikely to fit a development run",
                    self.agent.timeout_secs
                ),
            ));
        }

        if self.tasks.max_concurrent == 0 {
            issues.push(ValidationIssue::error(
                "tasks.max_concurrent.zero",
                "max_concurrent must be at least 1",
            ));
        } else if self.tasks.max_concurrent > 1 {
            issues.push(ValidationIssue::warning(
                "tasks.max_concurrent.shared_tree",
                format!(
                    "max_concurrent={} lets tasks check out branches in the same working tree concurrently",
                    self.tasks.max_concurrent
                ),
            ));
        }

        if self.storage.log_buffer_lines == 0 {
            issues.push(ValidationIssue::warning(
                "storage.log_buffer_lines.zero",
                "live log subscribers will not receive any backlog",
            ));
        }

        issues
    }
}
