use crate::types::event::Sequence;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Last sequence a projection has durably finished processing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectionCheckpoint {
    pub projection: String,
    pub last_sequence: Sequence,
}

impl ProjectionCheckpoint {
    pub fn new(projection: impl Into<String>, last_sequence: Sequence) -> Self {
        Self {
            projection: projection.into(),
            last_sequence,
        }
    }
}

/// A page skipped under the `SkipEvent` terminal action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    pub projection: String,
    pub floor: Sequence,
    pub ceiling: Sequence,
    pub sequences: Vec<Sequence>,
    pub error_message: String,
    pub attempts: u32,
    pub failed_at: DateTime<Utc>,
}
