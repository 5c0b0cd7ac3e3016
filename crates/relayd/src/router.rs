//! Classifies authenticated deliveries into the closed set of events the
//! engine reacts to.

use relay_core::{IssueCommentEventPayload, IssuesEventPayload, PingPayload};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutedEvent {
    IssueLabeled(IssuesEventPayload),
    IssueCommented(IssueCommentEventPayload),
    Ping(PingPayload),
    Unsupported(UnsupportedEvent),
}

/// A delivery that is acknowledged but never starts work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsupportedEvent {
    pub event_type: String,
    pub action: Option<String>,
}

impl std::fmt::Display for UnsupportedEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.action {
            Some(action) => write!(f, "unsupported event {}.{action}", self.event_type),
            None => write!(f, "unsupported event {}", self.event_type),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error("malformed {event_type} payload: {source}")]
    MalformedPayload {
        event_type: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EventRouter;

#[derive(Deserialize)]
struct ActionOnly {
    #[serde(default)]
    action: Option<String>,
}

impl EventRouter {
    pub fn new() -> Self {
        Self
    }

    /// Route a delivery by its `X-GitHub-Event` value and raw JSON body.
    pub fn route(&self, event_type: &str, body: &[u8]) -> Result<RoutedEvent, RouteError> {
        let malformed = |source| RouteError::MalformedPayload {
            event_type: event_type.to_string(),
            source,
        };

        match event_type {
            "ping" => Ok(RoutedEvent::Ping(
                serde_json::from_slice(body).map_err(malformed)?,
            )),
            "issues" => {
                let action = peek_action(body).map_err(malformed)?;
                if action.as_deref() != Some("labeled") {
                    return Ok(unsupported(event_type, action));
                }
                Ok(RoutedEvent::IssueLabeled(
                    serde_json::from_slice(body).map_err(malformed)?,
                ))
            }
            "issue_comment" => {
                let action = peek_action(body).map_err(malformed)?;
                if action.as_deref() != Some("created") {
                    return Ok(unsupported(event_type, action));
                }
                Ok(RoutedEvent::IssueCommented(
                    serde_json::from_slice(body).map_err(malformed)?,
                ))
            }
            other => Ok(unsupported(other, None)),
        }
    }
}

fn peek_action(body: &[u8]) -> Result<Option<String>, serde_json::Error> {
    serde_json::from_slice::<ActionOnly>(body).map(|peek| peek.action)
}

fn unsupported(event_type: &str, action: Option<String>) -> RoutedEvent {
    RoutedEvent::Unsupported(UnsupportedEvent {
        event_type: event_type.to_string(),
        action,
    })
}
