use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;
use crate::types::ParticipantId;

/// Matchmaking phase published in a Status Record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusKind {
    Idle,
    LookingForMatch,
    OfferedMatch,
    ReceivedMatch,
    Connected,
}

impl StatusKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::LookingForMatch => "LookingForMatch",
            Self::OfferedMatch => "OfferedMatch",
            Self::ReceivedMatch => "ReceivedMatch",
            Self::Connected => "Connected",
        }
    }
}

/// Status Record as stored at `users/{id}/status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRecord {
    #[serde(rename = "type")]
    pub kind: StatusKind,
    #[serde(rename = "participant", default, skip_serializing_if = "Option::is_none")]
    pub partner: Option<ParticipantId>,
}

/// Validated view of a Status Record: the partner is present exactly when
/// the kind needs one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Idle,
    LookingForMatch,
    OfferedMatch(ParticipantId),
    ReceivedMatch(ParticipantId),
    Connected,
}

impl Status {
    pub fn kind(&self) -> StatusKind {
        match self {
            Self::Idle => StatusKind::Idle,
            Self::LookingForMatch => StatusKind::LookingForMatch,
            Self::OfferedMatch(_) => StatusKind::OfferedMatch,
            Self::ReceivedMatch(_) => StatusKind::ReceivedMatch,
            Self::Connected => StatusKind::Connected,
        }
    }

    pub fn partner(&self) -> Option<&ParticipantId> {
        match self {
            Self::OfferedMatch(p) | Self::ReceivedMatch(p) => Some(p),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Result<Value, ProtocolError> {
        Ok(serde_json::to_value(StatusRecord::from(self))?)
    }

    /// Decode a raw directory value. An absent record, unknown kind or a
    /// missing partner all fail; callers route failures to self-heal.
    pub fn from_value(value: Option<&Value>) -> Result<Self, ProtocolError> {
        let value = match value {
            None | Some(Value::Null) => return Err(ProtocolError::MissingStatus),
            Some(v) => v,
        };
        let record: StatusRecord = serde_json::from_value(value.clone())?;
        Self::try_from(record)
    }
}

impl From<&Status> for StatusRecord {
    fn from(status: &Status) -> Self {
        Self {
            kind: status.kind(),
            partner: status.partner().cloned(),
        }
    }
}

impl TryFrom<StatusRecord> for Status {
    type Error = ProtocolError;

    fn try_from(record: StatusRecord) -> Result<Self, Self::Error> {
        match record.kind {
            StatusKind::Idle => Ok(Self::Idle),
            StatusKind::LookingForMatch => Ok(Self::LookingForMatch),
            StatusKind::Connected => Ok(Self::Connected),
            StatusKind::OfferedMatch => record
                .partner
                .map(Self::OfferedMatch)
                .ok_or(ProtocolError::MissingPartner("OfferedMatch")),
            StatusKind::ReceivedMatch => record
                .partner
                .map(Self::ReceivedMatch)
                .ok_or(ProtocolError::MissingPartner("ReceivedMatch")),
        }
    }
}

/// Payload carried through a recipient's single-slot inbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum SignalEnvelope {
    /// SDP offer
    Offer(String),
    /// SDP answer
    Answer(String),
    /// Connectivity candidate, opaque to this system
    IceCandidate(String),
    /// Chat line typed by the partner
    Chat(String),
}

impl SignalEnvelope {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Offer(_) => "offer",
            Self::Answer(_) => "answer",
            Self::IceCandidate(_) => "ice",
            Self::Chat(_) => "chat",
        }
    }

    pub fn to_value(&self) -> Result<Value, ProtocolError> {
        Ok(serde_json::to_value(self)?)
    }

    /// Decode an inbox value. Some writers store the envelope as a
    /// JSON-encoded string instead of an object; both are accepted.
    pub fn from_value(value: &Value) -> Result<Self, ProtocolError> {
        match value {
            Value::Null => Err(ProtocolError::MalformedEnvelope("empty inbox".into())),
            Value::String(s) => Ok(serde_json::from_str(s)?),
            other => Ok(serde_json::from_value(other.clone())?),
        }
    }
}
