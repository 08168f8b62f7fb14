pub mod defs;
pub mod state;

pub use defs::{ErrorRecord, FeedItem, NewSource, Source, SourceId, SourceKind};
pub use state::{ErrorLedger, SourceRegistry};
