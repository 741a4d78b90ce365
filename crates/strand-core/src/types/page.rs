use crate::types::event::{Event, Sequence};
use serde::{Deserialize, Serialize};

/// A bounded, ordered batch of events applied as one unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventPage {
    /// Events in ascending sequence order
    pub events: Vec<Event>,

    /// Checkpoint the page was fetched above
    pub floor: Sequence,

    /// Highest sequence in the page, or `floor` when empty
    pub ceiling: Sequence,

    /// Highest sequence known to be safely visible when the page was fetched.
    ///
    /// An empty page proves that no consumed event exists in
    /// `(floor, high_water_mark]`.
    pub high_water_mark: Sequence,
}

impl EventPage {
    pub fn new(floor: Sequence, events: Vec<Event>, high_water_mark: Sequence) -> Self {
        let ceiling = events.last().map(|e| e.sequence).unwrap_or(floor);
        Self {
            events,
            floor,
            ceiling,
            high_water_mark,
        }
    }

    pub fn empty(floor: Sequence, high_water_mark: Sequence) -> Self {
        Self::new(floor, Vec::new(), high_water_mark)
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn sequences(&self) -> Vec<Sequence> {
        self.events.iter().map(|e| e.sequence).collect()
    }

    /// How far this page proves the log consumed once it is applied
    pub fn processed_through(&self) -> Sequence {
        if self.is_empty() {
            self.high_water_mark.max(self.floor)
        } else {
            self.ceiling
        }
    }
}
