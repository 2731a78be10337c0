//! Signaling Channel: the only code that touches this participant's
//! directory records.
//!
//! Raw directory values are translated into [`MatchState`] and
//! [`SignalEnvelope`] here. An undecodable or absent Status Record is never
//! surfaced as an error; it is repaired by re-publishing `LookingForMatch`.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use paircall_directory::{Directory, Subscription};
use paircall_shared::constants::{STATUS_TYPE_FIELD, USERS_ROOT};
use paircall_shared::error::ProtocolError;
use paircall_shared::protocol::{SignalEnvelope, Status, StatusKind};
use paircall_shared::state::MatchState;
use paircall_shared::types::ParticipantId;

use crate::error::Result;

#[derive(Clone)]
pub struct SignalingChannel {
    directory: Arc<dyn Directory>,
    me: ParticipantId,
}

impl SignalingChannel {
    pub fn new(directory: Arc<dyn Directory>, me: ParticipantId) -> Self {
        Self { directory, me }
    }

    pub fn participant(&self) -> &ParticipantId {
        &self.me
    }

    /// Overwrite this participant's Status Record.
    pub async fn publish_self_status(&self, status: &Status) -> Result<()> {
        debug!(participant = %self.me, status = status.kind().as_str(), "publishing own status");
        self.directory
            .set(&self.me.status_path(), status.to_value()?)
            .await?;
        Ok(())
    }

    /// Overwrite another participant's Status Record. Used to claim a
    /// candidate and to hand an abandoned partner back to the search.
    pub async fn publish_partner_status(&self, partner: &ParticipantId, status: &Status) -> Result<()> {
        debug!(
            participant = %self.me,
            partner = %partner,
            status = status.kind().as_str(),
            "publishing partner status"
        );
        self.directory
            .set(&partner.status_path(), status.to_value()?)
            .await?;
        Ok(())
    }

    pub async fn clear_self_inbox(&self) -> Result<()> {
        self.directory.remove(&self.me.inbox_path()).await?;
        Ok(())
    }

    /// Overwrite the recipient's inbox with `envelope`.
    pub async fn send_envelope(&self, to: &ParticipantId, envelope: &SignalEnvelope) -> Result<()> {
        debug!(to = %to, kind = envelope.label(), "sending envelope");
        self.directory
            .set(&to.inbox_path(), envelope.to_value()?)
            .await?;
        Ok(())
    }

    pub async fn subscribe_self_status(&self) -> Result<StatusEvents> {
        let sub = self.directory.subscribe(&self.me.status_path()).await?;
        Ok(StatusEvents {
            channel: self.clone(),
            sub,
            healing: false,
        })
    }

    pub async fn subscribe_inbox(&self) -> Result<InboxEvents> {
        let sub = self.directory.subscribe(&self.me.inbox_path()).await?;
        Ok(InboxEvents {
            me: self.me.clone(),
            sub,
        })
    }

    /// First participant other than ourselves whose status is
    /// `LookingForMatch`, in the directory's result order. Query failures
    /// count as "nobody found".
    pub async fn find_candidate_partner(&self) -> Option<ParticipantId> {
        let looking = Value::String(StatusKind::LookingForMatch.as_str().to_string());
        let hits = match self
            .directory
            .query_children_eq(USERS_ROOT, STATUS_TYPE_FIELD, &looking)
            .await
        {
            Ok(hits) => hits,
            Err(e) => {
                warn!(participant = %self.me, error = %e, "candidate query failed");
                return None;
            }
        };

        hits.into_iter()
            .filter_map(|(key, _)| ParticipantId::parse(&key).ok())
            .find(|candidate| *candidate != self.me)
    }
}

/// Decoded notifications for this participant's Status Record.
pub struct StatusEvents {
    channel: SignalingChannel,
    sub: Subscription,
    /// A repair write is in flight; its own notification is not a new event.
    healing: bool,
}

impl StatusEvents {
    /// Next observed state. Returns `None` once the subscription ends.
    pub async fn next(&mut self) -> Option<MatchState> {
        loop {
            let raw = self.sub.next().await?;
            let status = match Status::from_value(Some(&raw)) {
                Ok(status) => status,
                Err(e) => return Some(self.repair(e).await),
            };
            if std::mem::take(&mut self.healing) && status == Status::LookingForMatch {
                continue;
            }
            return Some(status.into());
        }
    }

    async fn repair(&mut self, cause: ProtocolError) -> MatchState {
        let me = self.channel.participant().clone();
        warn!(participant = %me, error = %cause, "unusable status record, resuming search");
        let repaired = self
            .channel
            .publish_self_status(&Status::LookingForMatch)
            .await;
        match repaired {
            Ok(()) => self.healing = true,
            Err(e) => warn!(participant = %me, error = %e, "failed to repair status record"),
        }
        MatchState::LookingForMatch
    }
}

/// Decoded envelopes arriving in this participant's inbox.
pub struct InboxEvents {
    me: ParticipantId,
    sub: Subscription,
}

impl InboxEvents {
    /// Next decodable envelope. Removals are skipped and malformed values
    /// are logged and dropped. Returns `None` once the subscription ends.
    pub async fn next(&mut self) -> Option<SignalEnvelope> {
        loop {
            let raw = self.sub.next().await?;
            if raw.is_null() {
                continue;
            }
            match SignalEnvelope::from_value(&raw) {
                Ok(envelope) => return Some(envelope),
                Err(e) => {
                    debug!(participant = %self.me, error = %e, "dropping malformed envelope");
                }
            }
        }
    }
}
