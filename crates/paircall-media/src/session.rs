use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Error, Debug)]
pub enum MediaError {
    #[error("Cannot answer without a remote offer")]
    NoRemoteOffer,

    #[error("Invalid session description: {0}")]
    InvalidDescription(String),

    #[error("Invalid connectivity candidate: {0}")]
    InvalidCandidate(String),

    #[error("Media session is closed")]
    Closed,

    #[error("Media engine error: {0}")]
    Engine(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptionKind {
    Offer,
    Answer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Everything an engine reports back about a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaEvent {
    LocalCandidate {
        session: SessionId,
        candidate: String,
    },
    LocalDescription {
        session: SessionId,
        kind: DescriptionKind,
        sdp: String,
    },
    ConnectionChanged {
        session: SessionId,
        state: ConnectionState,
    },
}

impl MediaEvent {
    pub fn session(&self) -> SessionId {
        match self {
            Self::LocalCandidate { session, .. }
            | Self::LocalDescription { session, .. }
            | Self::ConnectionChanged { session, .. } => *session,
        }
    }
}

/// Callback half handed to an engine when a session is created.
#[derive(Debug, Clone)]
pub struct MediaObserver {
    session: SessionId,
    tx: mpsc::UnboundedSender<MediaEvent>,
}

impl MediaObserver {
    pub fn new(session: SessionId, tx: mpsc::UnboundedSender<MediaEvent>) -> Self {
        Self { session, tx }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn local_candidate(&self, candidate: impl Into<String>) {
        self.emit(MediaEvent::LocalCandidate {
            session: self.session,
            candidate: candidate.into(),
        });
    }

    pub fn local_description(&self, kind: DescriptionKind, sdp: impl Into<String>) {
        self.emit(MediaEvent::LocalDescription {
            session: self.session,
            kind,
            sdp: sdp.into(),
        });
    }

    pub fn connection_changed(&self, state: ConnectionState) {
        self.emit(MediaEvent::ConnectionChanged {
            session: self.session,
            state,
        });
    }

    fn emit(&self, event: MediaEvent) {
        // The matchmaker may already be gone during shutdown.
        let _ = self.tx.send(event);
    }
}

/// Factory for media sessions.
#[async_trait]
pub trait MediaEngine: Send + Sync {
    async fn create(&self, observer: MediaObserver) -> Result<Box<dyn MediaSession>, MediaError>;
}

/// One peer connection. Offers and answers are delivered through the
/// observer, not returned.
#[async_trait]
pub trait MediaSession: Send {
    async fn generate_offer(&mut self) -> Result<(), MediaError>;

    async fn generate_answer(&mut self) -> Result<(), MediaError>;

    async fn accept_remote_description(
        &mut self,
        sdp: &str,
        kind: DescriptionKind,
    ) -> Result<(), MediaError>;

    async fn accept_remote_candidate(&mut self, candidate: &str) -> Result<(), MediaError>;

    async fn destroy(&mut self);
}
