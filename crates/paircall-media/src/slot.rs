use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;

use crate::session::{MediaEngine, MediaError, MediaEvent, MediaObserver, MediaSession, SessionId};

/// Which side of the offer/answer exchange a session was created for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    Offering,
    Answering,
}

struct ActiveSession {
    id: SessionId,
    role: SessionRole,
    session: Box<dyn MediaSession>,
}

/// Holds at most one live media session. Creating a session always destroys
/// the previous one first.
pub struct SessionSlot {
    engine: Arc<dyn MediaEngine>,
    events_tx: mpsc::UnboundedSender<MediaEvent>,
    next_id: u64,
    active: Option<ActiveSession>,
}

impl SessionSlot {
    pub fn new(engine: Arc<dyn MediaEngine>, events_tx: mpsc::UnboundedSender<MediaEvent>) -> Self {
        Self {
            engine,
            events_tx,
            next_id: 1,
            active: None,
        }
    }

    pub async fn create(&mut self, role: SessionRole) -> Result<&mut Box<dyn MediaSession>, MediaError> {
        self.destroy().await;

        let id = SessionId(self.next_id);
        self.next_id += 1;
        let observer = MediaObserver::new(id, self.events_tx.clone());
        let session = self.engine.create(observer).await?;
        debug!(session = %id, ?role, "media session created");

        let active = self.active.insert(ActiveSession { id, role, session });
        Ok(&mut active.session)
    }

    pub async fn destroy(&mut self) {
        if let Some(mut old) = self.active.take() {
            debug!(session = %old.id, "destroying media session");
            old.session.destroy().await;
        }
    }

    pub fn session_mut(&mut self) -> Option<&mut Box<dyn MediaSession>> {
        self.active.as_mut().map(|a| &mut a.session)
    }

    pub fn role(&self) -> Option<SessionRole> {
        self.active.as_ref().map(|a| a.role)
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Whether `id` names the live session; events from anything else are stale.
    pub fn is_current(&self, id: SessionId) -> bool {
        self.active.as_ref().is_some_and(|a| a.id == id)
    }
}
