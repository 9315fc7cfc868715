//! Wire records of the answer service API.
//!
//! Field names mirror the service schema exactly; optional fields stay
//! `Option` so older service builds keep parsing.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize)]
pub struct QueryRequest {
    pub query: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    pub streaming: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceAttribution {
    pub source: String,
    #[serde(default)]
    pub snippet: Option<String>,
    pub score: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueryResponse {
    pub answer: String,
    #[serde(default)]
    pub sources: Vec<SourceAttribution>,
    #[serde(default)]
    pub latency_ms: Option<f64>,
}

/// Payload of the `__META__` sentinel line terminating a streamed answer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetaRecord {
    #[serde(default)]
    pub sources: Vec<SourceAttribution>,
    #[serde(default)]
    pub latency_ms: Option<f64>,
    #[serde(default)]
    pub low_relevance: bool,
    #[serde(default)]
    pub best_score: Option<f64>,
}

/// One decoded frame of a streaming response body.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamFrame {
    Content(String),
    Meta(MetaRecord),
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SessionSummary {
    pub session_id: String,
    pub title: String,
    #[serde(default)]
    pub last_message: Option<String>,
    pub created_at: f64,
    pub updated_at: f64,
    #[serde(default)]
    pub message_count: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionListResponse {
    pub sessions: Vec<SessionSummary>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionCreateResponse {
    pub session_id: String,
    pub title: String,
    pub created_at: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionMessage {
    pub role: String,
    pub content: String,
    #[serde(default)]
    pub created_at: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionHistoryResponse {
    pub session_id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub history: Vec<SessionMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    #[serde(default)]
    pub must_change_password: bool,
    #[serde(default)]
    pub role: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub embedding_model: String,
    pub docs_indexed: u64,
}
