//! Webhook intake: authenticate, classify, match, hand off.
//!
//! Everything after the acknowledgement happens asynchronously on the task.

use relay_core::{sanitize_payload, TaskId};
use serde::Serialize;

use crate::error::LifecycleError;
use crate::lifecycle::TaskLifecycleManager;
use crate::router::{EventRouter, RouteError, RoutedEvent};
use crate::signature::{SignatureError, SignatureValidator};
use crate::trigger::{NoOpReason, TriggerDecision, TriggerEvaluator};

pub const SIGNATURE_HEADER: &str = "X-Hub-Signature-256";
pub const EVENT_HEADER: &str = "X-GitHub-Event";
pub const DELIVERY_HEADER: &str = "X-GitHub-Delivery";

/// One inbound webhook request, headers already extracted.
#[derive(Debug, Clone, Copy)]
pub struct InboundDelivery<'a> {
    pub signature: Option<&'a str>,
    pub event_type: Option<&'a str>,
    pub delivery_id: Option<&'a str>,
    pub body: &'a [u8],
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum IntakeAck {
    Accepted { task_id: TaskId, issue_number: u64 },
    Pong { zen: Option<String> },
    Ignored { reason: NoOpReason, detail: String },
}

#[derive(Debug, thiserror::Error)]
pub enum IntakeError {
    #[error(transparent)]
    Signature(#[from] SignatureError),
    #[error("missing {header} header")]
    MissingHeader { header: &'static str },
    #[error(transparent)]
    Malformed(#[from] RouteError),
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

pub struct WebhookIntake {
    validator: SignatureValidator,
    router: EventRouter,
    evaluator: TriggerEvaluator,
    lifecycle: TaskLifecycleManager,
}

impl WebhookIntake {
    pub fn new(
        validator: SignatureValidator,
        evaluator: TriggerEvaluator,
        lifecycle: TaskLifecycleManager,
    ) -> Self {
        Self {
            validator,
            router: EventRouter::new(),
            evaluator,
            lifecycle,
        }
    }

    pub fn handle(&self, delivery: InboundDelivery<'_>) -> Result<IntakeAck, IntakeError> {
        self.validator.validate(delivery.body, delivery.signature)?;

        let event_type = delivery
            .event_type
            .filter(|value| !value.trim().is_empty())
            .ok_or(IntakeError::MissingHeader {
                header: EVENT_HEADER,
            })?;
        let delivery_id = delivery
            .delivery_id
            .filter(|value| !value.trim().is_empty())
            .ok_or(IntakeError::MissingHeader {
                header: DELIVERY_HEADER,
            })?;

        if tracing::enabled!(tracing::Level::DEBUG) {
            if let Ok(payload) = serde_json::from_slice::<serde_json::Value>(delivery.body) {
                tracing::debug!(delivery = delivery_id, event = event_type, payload = %sanitize_payload(&payload), "webhook payload");
            }
        }

        let routed = self.router.route(event_type, delivery.body)?;
        let decision = self.evaluator.evaluate(delivery_id, &routed);

        match decision {
            TriggerDecision::NoOp(NoOpReason::Ping) => {
                let zen = match routed {
                    RoutedEvent::Ping(ping) => ping.zen,
                    _ => None,
                };
                tracing::info!(delivery = delivery_id, "webhook ping");
                Ok(IntakeAck::Pong { zen })
            }
            TriggerDecision::NoOp(reason) => {
                tracing::info!(delivery = delivery_id, event = event_type, reason = %reason, "webhook ignored");
                Ok(IntakeAck::Ignored {
                    detail: reason.to_string(),
                    reason,
                })
            }
            TriggerDecision::Matched(matched) => {
                tracing::info!(
                    delivery = delivery_id,
                    issue = matched.issue.number,
                    source = ?matched.source,
                    "trigger matched"
                );
                let task = match self.lifecycle.submit(matched.issue) {
                    Ok(task) => task,
                    Err(err) => {
                        // The provider redelivers after an error response.
                        self.evaluator.release_delivery(delivery_id);
                        tracing::error!(delivery = delivery_id, error = %err, "failed to create task for matched trigger");
                        return Err(err.into());
                    }
                };
                Ok(IntakeAck::Accepted {
                    task_id: task.id,
                    issue_number: task.issue.number,
                })
            }
        }
    }
}
