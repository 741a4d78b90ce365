pub mod checkpoint;
pub mod event;
pub mod page;

pub use checkpoint::{DeadLetterRecord, ProjectionCheckpoint};
pub use event::{Event, EventTypeFilter, NewEvent, Sequence};
pub use page::EventPage;
