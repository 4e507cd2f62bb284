//! Request and response bodies of the agent service REST API.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// `POST /api/agent/send` request
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest<'a> {
    pub message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<&'a str>,
}

/// Agent reply to a sent message
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentResponse {
    pub thread_id: String,
    pub message: String,
    #[serde(deserialize_with = "utc_timestamp")]
    pub timestamp: DateTime<Utc>,
}

/// User-configurable agent preferences (`/api/profile`)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_agent_instructions: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_workflows_json: Option<String>,
}

/// One entry of `GET /api/agent/conversations`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationThread {
    pub id: i64,
    pub thread_id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(deserialize_with = "utc_timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(deserialize_with = "utc_timestamp")]
    pub last_message_at: DateTime<Utc>,
}

impl ConversationThread {
    pub fn title_or_default(&self) -> &str {
        self.title
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or("(untitled)")
    }

    /// First 8 characters of the thread id followed by an ellipsis
    pub fn short_thread_id(&self) -> String {
        let head: String = self.thread_id.chars().take(8).collect();
        format!("{}...", head)
    }
}

/// Error body the service sends with status >= 400
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorResponse {
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub message: String,
}

/// RFC 3339 timestamps, plus offset-less ones (taken as UTC) as emitted for
/// unspecified-kind server dates
fn utc_timestamp<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
    let raw = String::deserialize(deserializer)?;

    if let Ok(parsed) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(parsed.with_timezone(&Utc));
    }

    NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(serde::de::Error::custom)
}
