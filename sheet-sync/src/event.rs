use crate::normalize::KeyPolicy;
use serde::Deserialize;
use serde_json::{Map, Value};

const SUMMARY_FIELD: &str = "summary";

#[derive(thiserror::Error, Debug)]
pub enum MalformedEvent {
    #[error("request body is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("payload has no `issue.fields` object")]
    MissingFields,
    #[error("issue has no string `summary` field")]
    MissingSummary,
    #[error("issue summary is blank")]
    BlankSummary,
}

#[derive(Deserialize)]
struct WebhookPayload {
    issue: Option<IssuePayload>,
}

#[derive(Deserialize)]
struct IssuePayload {
    key: Option<String>,
    fields: Option<Value>,
}

/// One Flow B issue notification, validated at intake.
#[derive(Clone, Debug, PartialEq)]
pub struct IssueEvent {
    /// Jira issue key (`FLOWB-123`), only used for logging
    pub issue_key: Option<String>,
    /// Summary exactly as sent by Jira; the row join key before canonicalization
    pub summary: String,
    pub fields: Map<String, Value>,
}

impl IssueEvent {
    /// Parses a webhook body. Rejects payloads whose summary is missing or
    /// canonicalizes to nothing under `policy`.
    pub fn from_slice(body: &[u8], policy: &KeyPolicy) -> Result<Self, MalformedEvent> {
        let payload: WebhookPayload = serde_json::from_slice(body)?;
        let issue = payload.issue.ok_or(MalformedEvent::MissingFields)?;

        let fields = match issue.fields {
            Some(Value::Object(fields)) => fields,
            _ => return Err(MalformedEvent::MissingFields),
        };

        let summary = match fields.get(SUMMARY_FIELD) {
            Some(Value::String(summary)) => summary.clone(),
            _ => return Err(MalformedEvent::MissingSummary),
        };

        if policy.canonicalize(&summary).is_empty() {
            return Err(MalformedEvent::BlankSummary);
        }

        Ok(IssueEvent {
            issue_key: issue.key,
            summary,
            fields,
        })
    }

    /// Raw value of a field; absent fields read as `null`.
    pub fn raw_field(&self, field_id: &str) -> &Value {
        self.fields.get(field_id).unwrap_or(&Value::Null)
    }
}
