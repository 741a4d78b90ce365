use crate::error::{Result, StrandError};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Global sequence number - strictly monotonic, assigned once at commit.
///
/// The first committed event has sequence 1; a checkpoint of 0 means
/// "nothing applied yet".
pub type Sequence = u64;

/// An event as committed to the log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Position in the global log
    pub sequence: Sequence,

    /// Stream the event belongs to
    pub stream_id: String,

    /// Position within the stream (1-based)
    pub stream_sequence: u64,

    /// Event type identifier used for projection filtering
    pub event_type: String,

    /// Event payload
    pub data: serde_json::Value,

    /// Commit timestamp
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// Deserialize the payload into a typed value
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.data.clone()).map_err(|e| {
            StrandError::Serialization(format!(
                "event {} ({}): {}",
                self.sequence, self.event_type, e
            ))
        })
    }
}

/// An event waiting to be appended
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEvent {
    pub event_type: String,
    pub data: serde_json::Value,
}

impl NewEvent {
    pub fn new(event_type: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            event_type: event_type.into(),
            data,
        }
    }

    /// Build an event from any serializable payload
    pub fn from_payload<T: Serialize>(event_type: impl Into<String>, payload: &T) -> Result<Self> {
        Ok(Self {
            event_type: event_type.into(),
            data: serde_json::to_value(payload)?,
        })
    }
}

/// The set of event types a projection consumes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventTypeFilter {
    /// Every event type
    All,
    /// Only the named event types
    Only(BTreeSet<String>),
}

impl EventTypeFilter {
    pub fn only<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Only(types.into_iter().map(Into::into).collect())
    }

    pub fn matches(&self, event_type: &str) -> bool {
        match self {
            Self::All => true,
            Self::Only(types) => types.contains(event_type),
        }
    }

    /// True when the filter can never match anything
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Only(types) if types.is_empty())
    }

    /// Named event types, `None` for [`EventTypeFilter::All`]
    pub fn types(&self) -> Option<&BTreeSet<String>> {
        match self {
            Self::All => None,
            Self::Only(types) => Some(types),
        }
    }
}
