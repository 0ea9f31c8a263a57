//! Domain types persisted and produced by the storage engine.
//!
//! Everything here is plain data: no I/O, no connection handles. The store
//! crate moves these values in and out of the database.

mod dispatchable;
mod entry;
mod metadata;
mod payload;
mod seek;
mod state;
mod stream;

pub use dispatchable::Dispatchable;
pub use entry::Entry;
pub use metadata::Metadata;
pub use payload::Payload;
pub use seek::{ParseSeekTokenError, SeekToken};
pub use state::State;
pub use stream::Stream;
