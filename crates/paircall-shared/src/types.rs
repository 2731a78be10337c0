use serde::{Deserialize, Serialize};

use crate::constants::{INBOX_FIELD, STATUS_FIELD, USERS_ROOT};
use crate::error::ProtocolError;

/// Opaque identifier of one installed client instance.
///
/// Ids double as directory keys, so they may not contain the characters
/// the realtime database reserves for paths.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(try_from = "String", into = "String")]
pub struct ParticipantId(String);

impl ParticipantId {
    pub fn parse(s: &str) -> Result<Self, ProtocolError> {
        let valid = !s.is_empty()
            && !s
                .chars()
                .any(|c| matches!(c, '/' | '.' | '#' | '$' | '[' | ']') || c.is_control());
        if valid {
            Ok(Self(s.to_string()))
        } else {
            Err(ProtocolError::InvalidParticipantId(s.to_string()))
        }
    }

    /// Caller guarantees `s` is non-empty and free of reserved characters.
    pub(crate) fn from_trusted(s: String) -> Self {
        Self(s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `users/{id}/status`
    pub fn status_path(&self) -> String {
        format!("{USERS_ROOT}/{}/{STATUS_FIELD}", self.0)
    }

    /// `users/{id}/data`
    pub fn inbox_path(&self) -> String {
        format!("{USERS_ROOT}/{}/{INBOX_FIELD}", self.0)
    }
}

impl TryFrom<String> for ParticipantId {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ParticipantId> for String {
    fn from(id: ParticipantId) -> Self {
        id.0
    }
}

impl std::fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for ParticipantId {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
