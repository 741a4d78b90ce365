//! Event-type → projection routing table.

use std::collections::BTreeMap;
use strand_core::EventTypeFilter;

/// Which projections consume which event types
///
/// Built from the registered projections when the daemon starts. Shards
/// filter on their own; the table answers routing questions for hosts
/// (e.g. "who is affected by this event type?").
#[derive(Debug, Clone, Default)]
pub struct DispatchTable {
    by_type: BTreeMap<String, Vec<String>>,
    wildcard: Vec<String>,
}

impl DispatchTable {
    pub fn build<'a, I>(projections: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a EventTypeFilter)>,
    {
        let mut table = Self::default();
        for (name, filter) in projections {
            match filter.types() {
                None => table.wildcard.push(name.to_string()),
                Some(types) => {
                    for event_type in types {
                        table
                            .by_type
                            .entry(event_type.clone())
                            .or_default()
                            .push(name.to_string());
                    }
                }
            }
        }
        table
    }

    /// Projections that consume `event_type`, sorted by name
    pub fn projections_for(&self, event_type: &str) -> Vec<String> {
        let mut names = self.wildcard.clone();
        if let Some(specific) = self.by_type.get(event_type) {
            names.extend(specific.iter().cloned());
        }
        names.sort();
        names.dedup();
        names
    }

    /// Event types named by at least one projection
    pub fn event_types(&self) -> impl Iterator<Item = &str> {
        self.by_type.keys().map(String::as_str)
    }

    pub fn has_wildcard(&self) -> bool {
        !self.wildcard.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.by_type.is_empty() && self.wildcard.is_empty()
    }
}
