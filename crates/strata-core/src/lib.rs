//! # strata-core
//!
//! Foundation types for the strata event-sourcing storage engine.
//!
//! - **[`Entry`]**: immutable journal record, identity assigned by the log on insert
//! - **[`State`]**: versioned current-value snapshot of an entity
//! - **[`Stream`]**: derived view of a stream's entries since its reference snapshot
//! - **[`Dispatchable`]**: outbox record pairing a state with the entries it produced
//! - **[`SeekToken`]**: cursor positioning tokens understood by entry readers
//! - **[`TypeRegistry`]**: explicit tag + version → decoder table for entry payloads
//! - **[`ResultKind`]**: outcome taxonomy shared by every storage operation
//! - **[`logging`]**: `tracing` subscriber setup and log capture for tests

#![deny(unsafe_code)]

pub mod codec;
pub mod errors;
pub mod logging;
pub mod types;

pub use codec::{SourceEvent, Stateful, TypeRegistry};
pub use errors::{CodecError, ResultKind};
pub use types::*;
