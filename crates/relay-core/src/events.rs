//! Wire shapes of the GitHub webhook deliveries the engine understands.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::IssueRef;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelPayload {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuePayload {
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    pub html_url: String,
    #[serde(default)]
    pub labels: Vec<LabelPayload>,
}

impl IssuePayload {
    pub fn has_label(&self, name: &str) -> bool {
        self.labels.iter().any(|label| label.name == name)
    }

    pub fn to_issue_ref(&self) -> IssueRef {
        IssueRef {
            number: self.number,
            title: self.title.clone(),
            body: self.body.clone().unwrap_or_default(),
            html_url: self.html_url.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentPayload {
    #[serde(default)]
    pub body: String,
}

/// Body of an `issues` delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuesEventPayload {
    pub action: String,
    pub issue: IssuePayload,
    #[serde(default)]
    pub label: Option<LabelPayload>,
}

/// Body of an `issue_comment` delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueCommentEventPayload {
    pub action: String,
    pub issue: IssuePayload,
    pub comment: CommentPayload,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingPayload {
    #[serde(default)]
    pub zen: Option<String>,
    #[serde(default)]
    pub hook_id: Option<u64>,
}

const SENSITIVE_KEY_FRAGMENTS: [&str; 5] = ["secret", "token", "password", "key", "authorization"];
const MASK: &str = "***";

/// Copy of `payload` with values under credential-looking keys masked, for logging.
pub fn sanitize_payload(payload: &Value) -> Value {
    match payload {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, value)| {
                    let lowered = key.to_ascii_lowercase();
                    let masked = SENSITIVE_KEY_FRAGMENTS
                        .iter()
                        .any(|fragment| lowered.contains(fragment));
                    if masked {
                        (key.clone(), Value::String(MASK.to_string()))
                    } else {
                        (key.clone(), sanitize_payload(value))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(sanitize_payload).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn issues_payload_parses_with_optional_label_and_null_body() {
        let payload: IssuesEventPayload = serde_json::from_value(json!({
            "action": "labeled",
            "issue": {
                "number": 42,
                "title": "Add dark mode",
                "body": null,
                "html_url": "https://github.com/acme/widgets/issues/42",
                "labels": [{"name": "ai-dev"}, {"name": "ui"}]
            },
            "label": {"name": "ai-dev"},
            "sender": {"login": "octocat"}
        }))
        .expect("parse issues payload");

        assert_eq!(payload.label.as_ref().map(|l| l.name.as_str()), Some("ai-dev"));
        assert!(payload.issue.has_label("ui"));
        assert!(!payload.issue.has_label("AI-DEV"));

        let issue = payload.issue.to_issue_ref();
        assert_eq!(issue.number, 42);
        assert_eq!(issue.body, "");
    }

    #[test]
    fn comment_payload_requires_comment_object() {
        let err = serde_json::from_value::<IssueCommentEventPayload>(json!({
            "action": "created",
            "issue": {"number": 1, "title": "t", "html_url": "u"}
        }))
        .expect_err("missing comment");
        assert!(err.to_string().contains("comment"));
    }

    #[test]
    fn sanitize_masks_nested_credentials_only() {
        let cleaned = sanitize_payload(&json!({
            "action": "created",
            "installation": {"access_token": "abc", "id": 7},
            "hook": {"config": {"secret": "xyz", "url": "https://example.com"}},
            "list": [{"api_key": "k"}]
        }));

        assert_eq!(cleaned["action"], "created");
        assert_eq!(cleaned["installation"]["access_token"], "***");
        assert_eq!(cleaned["installation"]["id"], 7);
        assert_eq!(cleaned["hook"]["config"]["secret"], "***");
        assert_eq!(cleaned["hook"]["config"]["url"], "https://example.com");
        assert_eq!(cleaned["list"][0]["api_key"], "***");
    }
}
