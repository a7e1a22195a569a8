// Backend API trait for entity, timer and pattern data
use crate::domain::time_series::TimeSeriesEntry;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum BackendError {
    /// Non-2xx response; `message` is the body's `detail` or `message`.
    #[error("{message} (status {status})")]
    Status { status: u16, message: String },
    #[error("backend unreachable: {0}")]
    Transport(String),
    #[error("unexpected backend response: {0}")]
    Decode(String),
}

/// Domain actions exposed on an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityAction {
    StartOccurrence,
    EndOccurrence,
    StartTimer,
    PauseTimer,
    ResetTimer,
}

impl EntityAction {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "start-occurrence" => Some(Self::StartOccurrence),
            "end-occurrence" => Some(Self::EndOccurrence),
            "start-timer" => Some(Self::StartTimer),
            "pause-timer" => Some(Self::PauseTimer),
            "reset-timer" => Some(Self::ResetTimer),
            _ => None,
        }
    }

    pub fn path_segment(&self) -> &'static str {
        match self {
            Self::StartOccurrence => "start-occurrence",
            Self::EndOccurrence => "end-occurrence",
            Self::StartTimer => "start-timer",
            Self::PauseTimer => "pause-timer",
            Self::ResetTimer => "reset-timer",
        }
    }
}

/// Result of resolving a date expression against a set of anchors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedExpression {
    pub resolved_date: String,
    #[serde(default)]
    pub anchors: HashMap<String, String>,
}

#[async_trait]
pub trait BackendApi: Send + Sync {
    /// Entities of a type, optionally narrowed to one category.
    async fn list_entities(
        &self,
        entity_type: &str,
        category: Option<&str>,
    ) -> Result<Vec<Value>, BackendError>;

    async fn get_entity(&self, entity_id: &str) -> Result<Value, BackendError>;

    async fn create_entity(
        &self,
        entity_type: &str,
        name: &str,
        category: Option<&str>,
    ) -> Result<Value, BackendError>;

    async fn update_attribute(
        &self,
        entity_id: &str,
        attribute: &str,
        value: Value,
    ) -> Result<Value, BackendError>;

    async fn entity_action(&self, entity_id: &str, action: EntityAction) -> Result<Value, BackendError>;

    /// The entity's value log, in whatever order the backend returns it.
    async fn list_entries(&self, entity_id: &str) -> Result<Vec<TimeSeriesEntry>, BackendError>;

    async fn resolve(
        &self,
        expression: &str,
        anchor_labels: &[String],
    ) -> Result<ResolvedExpression, BackendError>;

    /// Fetches an external JSON feed (transit departures and the like).
    async fn fetch_feed(&self, url: &str) -> Result<Value, BackendError>;
}
