use std::fmt::Display;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Process-wide runner configuration.
pub mod config;

/// Logging facade that forwards to a host-provided sink.
pub mod logger;

/// Number of bytes in a [`RecordId`]
const RECORD_ID_LEN: usize = 12;

/// Identifier of a persisted migration record.
///
/// Twelve bytes rendered as 24 lowercase hex characters: a 4-byte big-endian
/// Unix timestamp (seconds) followed by 8 random bytes. Identifiers created in
/// later seconds sort after earlier ones.
///
/// # Examples
/// ```
/// use waypoint::primitives::RecordId;
///
/// let id = RecordId::generate();
/// assert_eq!(id.as_str().len(), 24);
/// assert_eq!(RecordId::new(id.as_str()).unwrap(), id);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RecordId(String);

impl RecordId {
    /// Parses a record identifier from its hex representation.
    ///
    /// Upper-case hex is accepted and normalized to lower case.
    ///
    /// # Errors
    /// - `PrimitiveError::InvalidHexString` if `s` is not valid hex.
    /// - `PrimitiveError::InvalidRecordId` if `s` does not decode to 12 bytes.
    pub fn new(s: &str) -> Result<Self, PrimitiveError> {
        let bytes =
            hex::decode(s).map_err(|_| PrimitiveError::InvalidHexString(s.to_string()))?;
        if bytes.len() != RECORD_ID_LEN {
            return Err(PrimitiveError::InvalidRecordId(s.to_string()));
        }
        Ok(Self(hex::encode(bytes)))
    }

    /// Generates a fresh identifier stamped with the current time.
    #[must_use]
    pub fn generate() -> Self {
        let seconds = u32::try_from(Utc::now().timestamp()).unwrap_or(u32::MAX);
        let tail: u64 = rand::random();

        let mut bytes = [0u8; RECORD_ID_LEN];
        bytes[..4].copy_from_slice(&seconds.to_be_bytes());
        bytes[4..].copy_from_slice(&tail.to_be_bytes());
        Self(hex::encode(bytes))
    }

    /// Returns the identifier as a &str.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Creation time embedded in the identifier, at second precision.
    #[must_use]
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        let bytes = hex::decode(&self.0).ok()?;
        let seconds: [u8; 4] = bytes.get(..4)?.try_into().ok()?;
        DateTime::from_timestamp(i64::from(u32::from_be_bytes(seconds)), 0)
    }
}

impl Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<RecordId> for String {
    fn from(id: RecordId) -> Self {
        id.0
    }
}

impl TryFrom<String> for RecordId {
    type Error = PrimitiveError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(&s)
    }
}

impl TryFrom<&str> for RecordId {
    type Error = PrimitiveError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

/// Errors raised while parsing primitive values.
#[derive(Debug, thiserror::Error)]
pub enum PrimitiveError {
    /// The provided string is not validly encoded hex data.
    #[error("invalid hex string: {0}")]
    InvalidHexString(String),
    /// The provided string is hex but not the length of a record id.
    #[error("invalid record id: {0}")]
    InvalidRecordId(String),
}
