//! Wires configuration into a running engine.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use relay_agents::{adapter_from_config, AgentAdapter};
use relay_core::RelayConfig;
use relay_git::{GitAutomation, GitCli, GitError, GitSettings};

use crate::broadcaster::LogBroadcaster;
use crate::error::LifecycleError;
use crate::gate::{ConcurrencyGate, GateError};
use crate::github::{GitHubApi, GitHubError, HttpGitHubClient};
use crate::health::{
    check_agent, check_config, check_repository, HealthReport, CHECK_AGENT, CHECK_CONFIG,
    CHECK_REPOSITORY,
};
use crate::intake::WebhookIntake;
use crate::lifecycle::{LifecycleParts, LifecycleSettings, TaskLifecycleManager};
use crate::signature::SignatureValidator;
use crate::store::{StoreError, TaskStore};
use crate::trigger::TriggerEvaluator;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    GitHub(#[from] GitHubError),
    #[error("repository is not usable: {0}")]
    Git(#[from] GitError),
    #[error(transparent)]
    Gate(#[from] GateError),
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

/// The running engine: intake in front, lifecycle behind it.
#[derive(Clone)]
pub struct RelayService {
    pub config: Arc<RelayConfig>,
    pub lifecycle: TaskLifecycleManager,
    pub intake: Arc<WebhookIntake>,
    git: GitAutomation,
    started: Instant,
}

impl RelayService {
    /// Open the store, probe the repository and start the engine.
    pub async fn from_config(config: RelayConfig) -> Result<Self, ServiceError> {
        let store = Arc::new(TaskStore::open(&config.storage.sqlite_path)?);
        let github: Arc<dyn GitHubApi> = Arc::new(HttpGitHubClient::new(&config.github)?);
        let adapter: Arc<dyn AgentAdapter> = Arc::from(adapter_from_config(&config.agent));
        let git = GitAutomation::open(
            config.repository.path.clone(),
            GitCli::default(),
            GitSettings::from(&config.repository),
        )
        .await?;
        Self::assemble(config, store, git, github, adapter)
    }

    /// Start the engine over explicitly constructed collaborators.
    pub fn assemble(
        config: RelayConfig,
        store: Arc<TaskStore>,
        git: GitAutomation,
        github: Arc<dyn GitHubApi>,
        adapter: Arc<dyn AgentAdapter>,
    ) -> Result<Self, ServiceError> {
        let engine = config.engine_settings();
        let gate = ConcurrencyGate::new(engine.max_concurrent)?;
        let broadcaster = Arc::new(LogBroadcaster::new(config.storage.log_buffer_lines));

        let lifecycle = TaskLifecycleManager::start(LifecycleParts {
            store,
            gate,
            broadcaster,
            git: git.clone(),
            github,
            adapter,
            settings: LifecycleSettings::from_config(&config),
        })?;

        let intake = WebhookIntake::new(
            SignatureValidator::new(config.github.webhook_secret.as_bytes().to_vec()),
            TriggerEvaluator::new(
                engine.trigger_label,
                engine.trigger_command,
                Duration::from_secs(config.tasks.dedup_window_secs),
            ),
            lifecycle.clone(),
        );

        tracing::info!(
            max_concurrent = engine.max_concurrent,
            base_branch = %engine.base_branch,
            remote = %engine.remote_name,
            "relay engine started"
        );
        Ok(Self {
            config: Arc::new(config),
            lifecycle,
            intake: Arc::new(intake),
            git,
            started: Instant::now(),
        })
    }

    /// Probe configuration, repository and agent executable.
    pub async fn health(&self) -> HealthReport {
        let mut checks = BTreeMap::new();
        checks.insert(CHECK_CONFIG, check_config(&self.config));
        checks.insert(CHECK_REPOSITORY, check_repository(&self.git).await);
        checks.insert(CHECK_AGENT, check_agent(&self.config.agent));
        HealthReport::from_checks(self.started.elapsed(), checks)
    }

    pub async fn shutdown(&self) {
        self.lifecycle.shutdown().await;
        tracing::info!("relay engine stopped");
    }
}
