use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::protocol::Status;
use crate::types::ParticipantId;

/// Client-local view of the matchmaking phase. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum MatchState {
    /// Subscription started, no record observed yet
    #[default]
    New,
    Idle,
    LookingForMatch,
    OfferedMatch(ParticipantId),
    ReceivedMatch(ParticipantId),
    Connected,
}

impl MatchState {
    pub fn partner(&self) -> Option<&ParticipantId> {
        match self {
            Self::OfferedMatch(p) | Self::ReceivedMatch(p) => Some(p),
            _ => None,
        }
    }

    /// Offered or received, but not yet connected.
    pub fn is_pending_match(&self) -> bool {
        matches!(self, Self::OfferedMatch(_) | Self::ReceivedMatch(_))
    }
}

impl From<Status> for MatchState {
    fn from(status: Status) -> Self {
        match status {
            Status::Idle => Self::Idle,
            Status::LookingForMatch => Self::LookingForMatch,
            Status::OfferedMatch(p) => Self::OfferedMatch(p),
            Status::ReceivedMatch(p) => Self::ReceivedMatch(p),
            Status::Connected => Self::Connected,
        }
    }
}

/// One line of the chat transcript shown next to the call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatEntry {
    pub text: String,
    pub is_mine: bool,
    pub timestamp: DateTime<Utc>,
}

impl ChatEntry {
    pub fn mine(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_mine: true,
            timestamp: Utc::now(),
        }
    }

    pub fn theirs(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_mine: false,
            timestamp: Utc::now(),
        }
    }
}
