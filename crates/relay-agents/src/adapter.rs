use std::path::{Path, PathBuf};

use relay_core::AgentConfig;

use crate::prompt::build_prompt;
use crate::types::{AgentCommand, AgentInvocation};

pub trait AgentAdapter: Send + Sync {
    fn name(&self) -> &str;
    fn build_command(&self, invocation: &AgentInvocation) -> AgentCommand;
    /// Text piped to the agent's stdin.
    fn build_stdin(&self, invocation: &AgentInvocation) -> Option<String> {
        Some(build_prompt(&invocation.issue, &invocation.branch_name))
    }
}

/// The Claude CLI in non-interactive print mode, prompt on stdin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaudeAdapter {
    pub executable: String,
    pub extra_args: Vec<String>,
    pub skip_permissions: bool,
}

impl Default for ClaudeAdapter {
    fn default() -> Self {
        Self {
            executable: "claude".to_string(),
            extra_args: Vec::new(),
            skip_permissions: true,
        }
    }
}

impl AgentAdapter for ClaudeAdapter {
    fn name(&self) -> &str {
        "claude"
    }

    fn build_command(&self, invocation: &AgentInvocation) -> AgentCommand {
        let mut args = vec!["-p".to_string()];
        if self.skip_permissions {
            args.push("--dangerously-skip-permissions".to_string());
        }
        args.extend(self.extra_args.iter().cloned());
        AgentCommand {
            executable: self.executable.clone(),
            args,
            env: task_env(invocation),
        }
    }
}

/// Any other executable, run with exactly the configured arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandAdapter {
    pub executable: String,
    pub args: Vec<String>,
}

impl AgentAdapter for CommandAdapter {
    fn name(&self) -> &str {
        &self.executable
    }

    fn build_command(&self, invocation: &AgentInvocation) -> AgentCommand {
        AgentCommand {
            executable: self.executable.clone(),
            args: self.args.clone(),
            env: task_env(invocation),
        }
    }
}

/// Pick the adapter for the configured executable.
pub fn adapter_from_config(config: &AgentConfig) -> Box<dyn AgentAdapter> {
    let is_claude = Path::new(&config.executable)
        .file_name()
        .is_some_and(|name| name == "claude");
    if is_claude {
        Box::new(ClaudeAdapter {
            executable: config.executable.clone(),
            extra_args: config.args.clone(),
            skip_permissions: config.skip_permissions,
        })
    } else {
        Box::new(CommandAdapter {
            executable: config.executable.clone(),
            args: config.args.clone(),
        })
    }
}

/// Resolve the agent executable the way a spawn would: absolute and
/// relative paths as given, bare names through `PATH`.
pub fn locate_executable(executable: &str) -> Option<PathBuf> {
    which::which(executable).ok()
}

fn task_env(invocation: &AgentInvocation) -> Vec<(String, String)> {
    vec![
        ("RELAY_TASK_ID".to_string(), invocation.task_id.to_string()),
        (
            "RELAY_ISSUE_NUMBER".to_string(),
            invocation.issue.number.to_string(),
        ),
        ("RELAY_BRANCH".to_string(), invocation.branch_name.clone()),
    ]
}
