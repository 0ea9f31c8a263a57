//! Versioned entity state.

use serde::{Deserialize, Serialize};

use super::{Metadata, Payload};
use crate::codec::{self, Stateful};
use crate::errors::CodecError;

/// Current value of one entity in raw, storable form.
///
/// `data_version` increases strictly per id. It doubles as the optimistic
/// concurrency token for state writes and as the version watermark of a
/// stream snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    /// Entity id (or stream name for snapshots).
    pub id: String,
    /// Logical type name.
    pub state_type: String,
    /// Schema version of the encoded payload.
    pub type_version: u32,
    /// Encoded state.
    pub data: Payload,
    /// Version of this state value.
    pub data_version: i64,
    /// Metadata recorded with the write.
    pub metadata: Metadata,
}

impl State {
    /// Build a raw state.
    pub fn new(
        id: impl Into<String>,
        state_type: impl Into<String>,
        type_version: u32,
        data: impl Into<Payload>,
        data_version: i64,
        metadata: Metadata,
    ) -> Self {
        Self {
            id: id.into(),
            state_type: state_type.into(),
            type_version,
            data: data.into(),
            data_version,
            metadata,
        }
    }

    /// Encode a domain object as a JSON text state.
    pub fn from_object<S: Stateful>(
        id: impl Into<String>,
        object: &S,
        data_version: i64,
        metadata: Metadata,
    ) -> Result<Self, CodecError> {
        Ok(Self::new(
            id,
            S::TYPE_NAME,
            S::TYPE_VERSION,
            codec::encode_json(object)?,
            data_version,
            metadata,
        ))
    }

    /// Decode the payload back into a domain object, checking the type tag.
    pub fn to_object<S: Stateful>(&self) -> Result<S, CodecError> {
        if self.state_type != S::TYPE_NAME {
            return Err(CodecError::TypeMismatch {
                expected: S::TYPE_NAME.to_owned(),
                found: self.state_type.clone(),
            });
        }
        Ok(self.data.json()?)
    }
}
