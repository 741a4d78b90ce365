pub mod dead_letter;
pub mod progression;
pub mod projection;
pub mod store;

pub use dead_letter::DeadLetterStore;
pub use progression::ProgressionStore;
pub use projection::Projection;
pub use store::{EventQuery, EventStore};
