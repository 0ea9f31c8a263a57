//! Immutable journal entries.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::{Metadata, Payload};
use crate::codec::{self, SourceEvent};
use crate::errors::CodecError;

/// One immutable record of the entry log, usually a single domain event.
///
/// Callers build entries without an id. The log assigns the id after a
/// successful insert and hands the entry back; from then on the id never
/// changes. Ids increase monotonically within one physical log but are
/// opaque strings to callers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    id: Option<String>,
    entry_type: String,
    type_version: u32,
    data: Payload,
    metadata: Metadata,
}

impl Entry {
    /// Build an entry that has not been appended yet.
    pub fn new(
        entry_type: impl Into<String>,
        type_version: u32,
        data: impl Into<Payload>,
        metadata: Metadata,
    ) -> Self {
        Self {
            id: None,
            entry_type: entry_type.into(),
            type_version,
            data: data.into(),
            metadata,
        }
    }

    /// Rebuild an entry read back from storage.
    pub fn persisted(
        id: impl Into<String>,
        entry_type: impl Into<String>,
        type_version: u32,
        data: Payload,
        metadata: Metadata,
    ) -> Self {
        Self {
            id: Some(id.into()),
            entry_type: entry_type.into(),
            type_version,
            data,
            metadata,
        }
    }

    /// Encode a source event as a JSON text entry.
    pub fn from_source<S: SourceEvent>(source: &S, metadata: Metadata) -> Result<Self, CodecError> {
        Ok(Self::new(
            S::TYPE_NAME,
            S::TYPE_VERSION,
            codec::encode_json(source)?,
            metadata,
        ))
    }

    /// Log-assigned identity, `None` until appended.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Numeric form of the id, for offset arithmetic.
    pub fn sequence(&self) -> Option<i64> {
        self.id.as_deref().and_then(|id| id.parse().ok())
    }

    /// Whether the log has assigned an id.
    pub fn is_persisted(&self) -> bool {
        self.id.is_some()
    }

    /// Logical type name.
    pub fn entry_type(&self) -> &str {
        &self.entry_type
    }

    /// Schema version of the encoded payload.
    pub fn type_version(&self) -> u32 {
        self.type_version
    }

    /// Encoded payload.
    pub fn data(&self) -> &Payload {
        &self.data
    }

    /// Metadata attached at append time.
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Replace empty metadata with `metadata`; non-empty metadata is kept.
    #[must_use]
    pub fn or_metadata(mut self, metadata: &Metadata) -> Self {
        if self.metadata.is_empty() {
            self.metadata = metadata.clone();
        }
        self
    }

    /// Attach the log-assigned id.
    ///
    /// Returns `false` and leaves the entry untouched if an id was already
    /// assigned.
    pub fn assign_id(&mut self, id: impl Into<String>) -> bool {
        if self.id.is_some() {
            return false;
        }
        self.id = Some(id.into());
        true
    }

    /// Decode the payload as `S`, checking the type tag first.
    pub fn decode<S: SourceEvent + DeserializeOwned>(&self) -> Result<S, CodecError> {
        if self.entry_type != S::TYPE_NAME {
            return Err(CodecError::TypeMismatch {
                expected: S::TYPE_NAME.to_owned(),
                found: self.entry_type.clone(),
            });
        }
        Ok(self.data.json()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    struct Deposited {
        amount: u64,
    }

    impl SourceEvent for Deposited {
        const TYPE_NAME: &'static str = "Deposited";
    }

    #[derive(Serialize, Deserialize, Debug)]
    struct Withdrawn {
        amount: u64,
    }

    impl SourceEvent for Withdrawn {
        const TYPE_NAME: &'static str = "Withdrawn";
        const TYPE_VERSION: u32 = 3;
    }

    #[test]
    fn new_entry_has_no_id() {
        let entry = Entry::new("Deposited", 1, "{}", Metadata::new());
        assert_eq!(entry.id(), None);
        assert!(!entry.is_persisted());
        assert_eq!(entry.sequence(), None);
    }

    #[test]
    fn id_is_assigned_once() {
        let mut entry = Entry::new("Deposited", 1, "{}", Metadata::new());
        assert!(entry.assign_id("7"));
        assert!(!entry.assign_id("8"));
        assert_eq!(entry.id(), Some("7"));
        assert_eq!(entry.sequence(), Some(7));
    }

    #[test]
    fn from_source_uses_type_constants() {
        let entry = Entry::from_source(&Withdrawn { amount: 5 }, Metadata::new()).unwrap();
        assert_eq!(entry.entry_type(), "Withdrawn");
        assert_eq!(entry.type_version(), 3);
        assert_eq!(entry.data().as_text(), Some(r#"{"amount":5}"#));
    }

    #[test]
    fn decode_round_trips() {
        let entry = Entry::from_source(&Deposited { amount: 10 }, Metadata::new()).unwrap();
        assert_eq!(entry.decode::<Deposited>().unwrap(), Deposited { amount: 10 });
    }

    #[test]
    fn decode_rejects_other_type() {
        let entry = Entry::from_source(&Deposited { amount: 10 }, Metadata::new()).unwrap();
        let err = entry.decode::<Withdrawn>().unwrap_err();
        assert!(matches!(err, CodecError::TypeMismatch { .. }));
    }

    #[test]
    fn or_metadata_only_fills_empty() {
        let fallback = Metadata::with_operation("write");
        let bare = Entry::new("A", 1, "{}", Metadata::new()).or_metadata(&fallback);
        assert_eq!(bare.metadata().operation, "write");

        let tagged = Entry::new("A", 1, "{}", Metadata::with_operation("own")).or_metadata(&fallback);
        assert_eq!(tagged.metadata().operation, "own");
    }
}
