//! Entry reader positioning tokens.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Where an entry reader's `seek_to` moves its offset.
///
/// String form is `"Beginning"`, `"End"`, `"Query"` or a non-negative
/// base-10 offset.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SeekToken {
    /// Offset 1.
    Beginning,
    /// One past the latest entry id.
    End,
    /// Report the current offset without moving.
    Query,
    /// A literal offset.
    Offset(i64),
}

/// A seek token string could not be parsed.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid seek token: {0:?}")]
pub struct ParseSeekTokenError(String);

impl FromStr for SeekToken {
    type Err = ParseSeekTokenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Beginning" => Ok(Self::Beginning),
            "End" => Ok(Self::End),
            "Query" => Ok(Self::Query),
            other => match other.parse::<i64>() {
                Ok(offset) if offset >= 0 => Ok(Self::Offset(offset)),
                _ => Err(ParseSeekTokenError(other.to_owned())),
            },
        }
    }
}

impl fmt::Display for SeekToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Beginning => f.write_str("Beginning"),
            Self::End => f.write_str("End"),
            Self::Query => f.write_str("Query"),
            Self::Offset(offset) => write!(f, "{offset}"),
        }
    }
}
