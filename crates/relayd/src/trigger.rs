//! Decides whether a routed event should start a task.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use relay_core::IssueRef;
use serde::{Deserialize, Serialize};

use crate::router::{RoutedEvent, UnsupportedEvent};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TriggerSource {
    Label { name: String },
    Comment { command: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerMatch {
    pub delivery_id: String,
    pub issue: IssueRef,
    pub source: TriggerSource,
}

/// Why a delivery was acknowledged without creating a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum NoOpReason {
    Ping,
    Unsupported(UnsupportedEvent),
    LabelMismatch { label: Option<String> },
    CommandAbsent,
    DuplicateDelivery { delivery_id: String },
}

impl std::fmt::Display for NoOpReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NoOpReason::Ping => f.write_str("ping"),
            NoOpReason::Unsupported(event) => write!(f, "{event}"),
            NoOpReason::LabelMismatch { label: Some(label) } => {
                write!(f, "label '{label}' is not the trigger label")
            }
            NoOpReason::LabelMismatch { label: None } => f.write_str("trigger label not present"),
            NoOpReason::CommandAbsent => f.write_str("comment does not contain the trigger command"),
            NoOpReason::DuplicateDelivery { delivery_id } => {
                write!(f, "delivery {delivery_id} was already processed")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerDecision {
    Matched(TriggerMatch),
    NoOp(NoOpReason),
}

/// Remembers delivery ids for a retention window.
#[derive(Debug)]
pub struct DeliveryLedger {
    window: Duration,
    seen: Mutex<HashMap<String, Instant>>,
}

impl DeliveryLedger {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// Record `delivery_id`; returns `false` if it was already seen inside the window.
    pub fn first_sighting(&self, delivery_id: &str, now: Instant) -> bool {
        let mut seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
        let window = self.window;
        seen.retain(|_, at| now.saturating_duration_since(*at) < window);

        if seen.contains_key(delivery_id) {
            return false;
        }
        seen.insert(delivery_id.to_string(), now);
        true
    }

    /// Forget `delivery_id` so a redelivery is evaluated again.
    pub fn forget(&self, delivery_id: &str) {
        self.seen
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(delivery_id);
    }

    pub fn len(&self) -> usize {
        self.seen.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug)]
pub struct TriggerEvaluator {
    trigger_label: String,
    trigger_command: String,
    ledger: DeliveryLedger,
}

impl TriggerEvaluator {
    pub fn new(
        trigger_label: impl Into<String>,
        trigger_command: impl Into<String>,
        dedup_window: Duration,
    ) -> Self {
        Self {
            trigger_label: trigger_label.into(),
            trigger_command: trigger_command.into(),
            ledger: DeliveryLedger::new(dedup_window),
        }
    }

    /// Undo the sighting of a matched delivery whose task was never created.
    pub fn release_delivery(&self, delivery_id: &str) {
        self.ledger.forget(delivery_id);
    }

    pub fn evaluate(&self, delivery_id: &str, event: &RoutedEvent) -> TriggerDecision {
        self.evaluate_at(delivery_id, event, Instant::now())
    }

    pub fn evaluate_at(&self, delivery_id: &str, event: &RoutedEvent, now: Instant) -> TriggerDecision {
        if !self.ledger.first_sighting(delivery_id, now) {
            return TriggerDecision::NoOp(NoOpReason::DuplicateDelivery {
                delivery_id: delivery_id.to_string(),
            });
        }

        match event {
            RoutedEvent::Ping(_) => TriggerDecision::NoOp(NoOpReason::Ping),
            RoutedEvent::Unsupported(event) => {
                TriggerDecision::NoOp(NoOpReason::Unsupported(event.clone()))
            }
            RoutedEvent::IssueLabeled(payload) => {
                let matched = match &payload.label {
                    Some(label) => label.name == self.trigger_label,
                    None => payload.issue.has_label(&self.trigger_label),
                };
                if !matched {
                    return TriggerDecision::NoOp(NoOpReason::LabelMismatch {
                        label: payload.label.as_ref().map(|label| label.name.clone()),
                    });
                }
                TriggerDecision::Matched(TriggerMatch {
                    delivery_id: delivery_id.to_string(),
                    issue: payload.issue.to_issue_ref(),
                    source: TriggerSource::Label {
                        name: self.trigger_label.clone(),
                    },
                })
            }
            RoutedEvent::IssueCommented(payload) => {
                if !contains_ignore_case(&payload.comment.body, &self.trigger_command) {
                    return TriggerDecision::NoOp(NoOpReason::CommandAbsent);
                }
                TriggerDecision::Matched(TriggerMatch {
                    delivery_id: delivery_id.to_string(),
                    issue: payload.issue.to_issue_ref(),
                    source: TriggerSource::Comment {
                        command: self.trigger_command.clone(),
                    },
                })
            }
        }
    }
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}
