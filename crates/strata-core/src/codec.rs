//! Type tags and the decoder registry.
//!
//! Entries and states carry a `(type name, type version)` tag next to their
//! payload. Decoding is driven by an explicit [`TypeRegistry`] built at
//! startup: every tag the application expects to read must be registered,
//! and an unknown tag fails with [`CodecError::Unregistered`] instead of
//! being guessed at.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::errors::CodecError;
use crate::types::{Entry, Payload};

/// A domain object stored in the state store.
pub trait Stateful: Serialize + DeserializeOwned {
    /// Logical type name, also used to resolve the storage namespace.
    const TYPE_NAME: &'static str;
    /// Schema version of the serialized form.
    const TYPE_VERSION: u32 = 1;
}

/// A domain event appended to the journal.
pub trait SourceEvent: Serialize {
    /// Logical type name written on the entry.
    const TYPE_NAME: &'static str;
    /// Schema version of the serialized form.
    const TYPE_VERSION: u32 = 1;
}

/// Serialize `value` as a JSON text payload.
pub fn encode_json<T: Serialize + ?Sized>(value: &T) -> Result<Payload, CodecError> {
    Ok(Payload::Text(serde_json::to_string(value)?))
}

type Decoder<E> = Box<dyn Fn(&Payload) -> Result<E, CodecError> + Send + Sync>;

/// Maps `(type name, type version)` tags to decoders producing `E`.
///
/// `E` is usually an application enum of every event the journal holds.
pub struct TypeRegistry<E> {
    decoders: HashMap<(String, u32), Decoder<E>>,
}

impl<E> TypeRegistry<E> {
    /// Empty registry.
    pub fn new() -> Self {
        Self {
            decoders: HashMap::new(),
        }
    }

    /// Register a decoder for an explicit tag, replacing any previous one.
    pub fn register<F>(&mut self, type_name: impl Into<String>, type_version: u32, decode: F) -> &mut Self
    where
        F: Fn(&Payload) -> Result<E, CodecError> + Send + Sync + 'static,
    {
        let _ = self
            .decoders
            .insert((type_name.into(), type_version), Box::new(decode));
        self
    }

    /// Register a JSON decoder for `S` under its own tag, wrapping the
    /// decoded value with `wrap`.
    pub fn register_source<S>(&mut self, wrap: fn(S) -> E) -> &mut Self
    where
        S: SourceEvent + DeserializeOwned + 'static,
        E: 'static,
    {
        self.register(S::TYPE_NAME, S::TYPE_VERSION, move |payload| {
            Ok(wrap(payload.json::<S>()?))
        })
    }

    /// Whether a decoder exists for the tag.
    pub fn contains(&self, type_name: &str, type_version: u32) -> bool {
        self.decoders
            .contains_key(&(type_name.to_owned(), type_version))
    }

    /// Number of registered tags.
    pub fn len(&self) -> usize {
        self.decoders.len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.decoders.is_empty()
    }

    /// Decode a single entry.
    pub fn decode(&self, entry: &Entry) -> Result<E, CodecError> {
        let key = (entry.entry_type().to_owned(), entry.type_version());
        let decoder = self
            .decoders
            .get(&key)
            .ok_or_else(|| CodecError::Unregistered {
                type_name: key.0.clone(),
                type_version: key.1,
            })?;
        decoder(entry.data())
    }

    /// Decode entries in order, stopping at the first failure.
    pub fn decode_all(&self, entries: &[Entry]) -> Result<Vec<E>, CodecError> {
        entries.iter().map(|entry| self.decode(entry)).collect()
    }
}

impl<E> Default for TypeRegistry<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for TypeRegistry<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tags: Vec<_> = self.decoders.keys().collect();
        tags.sort();
        f.debug_struct("TypeRegistry").field("tags", &tags).finish()
    }
}
