//! Stand-in transport used by the demo node and tests.
//!
//! Sessions produce plausible SDP and host candidates, report `Connected`
//! once an offer/answer pair has been exchanged, and record every call the
//! matchmaker makes so scenarios can assert on them.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::trace;

use crate::session::{
    ConnectionState, DescriptionKind, MediaEngine, MediaError, MediaObserver, MediaSession,
    SessionId,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaCall {
    Create(SessionId),
    GenerateOffer(SessionId),
    GenerateAnswer(SessionId),
    RemoteDescription(SessionId, DescriptionKind, String),
    RemoteCandidate(SessionId, String),
    Destroy(SessionId),
}

#[derive(Clone)]
pub struct LoopbackEngine {
    label: String,
    candidates: usize,
    log: Arc<Mutex<Vec<MediaCall>>>,
}

impl LoopbackEngine {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            candidates: 2,
            log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Number of host candidates emitted after each local description.
    pub fn with_candidates(mut self, candidates: usize) -> Self {
        self.candidates = candidates;
        self
    }

    /// Snapshot of every call made so far, across all sessions.
    pub fn calls(&self) -> Vec<MediaCall> {
        self.log.lock().map(|log| log.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl MediaEngine for LoopbackEngine {
    async fn create(&self, observer: MediaObserver) -> Result<Box<dyn MediaSession>, MediaError> {
        record(&self.log, MediaCall::Create(observer.session()));
        observer.connection_changed(ConnectionState::New);
        Ok(Box::new(LoopbackSession {
            label: self.label.clone(),
            candidates: self.candidates,
            log: self.log.clone(),
            observer,
            local: None,
            remote: None,
            closed: false,
        }))
    }
}

struct LoopbackSession {
    label: String,
    candidates: usize,
    log: Arc<Mutex<Vec<MediaCall>>>,
    observer: MediaObserver,
    local: Option<DescriptionKind>,
    remote: Option<DescriptionKind>,
    closed: bool,
}

impl LoopbackSession {
    fn id(&self) -> SessionId {
        self.observer.session()
    }

    fn ensure_open(&self) -> Result<(), MediaError> {
        if self.closed {
            Err(MediaError::Closed)
        } else {
            Ok(())
        }
    }

    fn describe(&mut self, kind: DescriptionKind) {
        let role = match kind {
            DescriptionKind::Offer => "offer",
            DescriptionKind::Answer => "answer",
        };
        let sdp = format!(
            "v=0\r\no=- {} 2 IN IP4 127.0.0.1\r\ns={}\r\nt=0 0\r\na=x-loopback:{role}\r\n",
            self.id().0,
            self.label
        );
        self.local = Some(kind);
        self.observer.local_description(kind, sdp);
        for n in 0..self.candidates {
            self.observer.local_candidate(format!(
                "candidate:{n} 1 udp 2122260223 127.0.0.1 {} typ host",
                50_000 + self.id().0 * 10 + n as u64
            ));
        }
    }

    fn check_connected(&self) {
        let pair = matches!(
            (self.local, self.remote),
            (Some(DescriptionKind::Offer), Some(DescriptionKind::Answer))
                | (Some(DescriptionKind::Answer), Some(DescriptionKind::Offer))
        );
        if pair {
            self.observer.connection_changed(ConnectionState::Connected);
        }
    }
}

#[async_trait]
impl MediaSession for LoopbackSession {
    async fn generate_offer(&mut self) -> Result<(), MediaError> {
        self.ensure_open()?;
        record(&self.log, MediaCall::GenerateOffer(self.id()));
        self.observer.connection_changed(ConnectionState::Connecting);
        self.describe(DescriptionKind::Offer);
        Ok(())
    }

    async fn generate_answer(&mut self) -> Result<(), MediaError> {
        self.ensure_open()?;
        record(&self.log, MediaCall::GenerateAnswer(self.id()));
        if self.remote != Some(DescriptionKind::Offer) {
            return Err(MediaError::NoRemoteOffer);
        }
        self.describe(DescriptionKind::Answer);
        self.check_connected();
        Ok(())
    }

    async fn accept_remote_description(
        &mut self,
        sdp: &str,
        kind: DescriptionKind,
    ) -> Result<(), MediaError> {
        self.ensure_open()?;
        record(
            &self.log,
            MediaCall::RemoteDescription(self.id(), kind, sdp.to_string()),
        );
        if !sdp.starts_with("v=0") {
            return Err(MediaError::InvalidDescription(sdp.chars().take(32).collect()));
        }
        if kind == DescriptionKind::Answer && self.local != Some(DescriptionKind::Offer) {
            return Err(MediaError::InvalidDescription(
                "answer without a local offer".into(),
            ));
        }
        self.remote = Some(kind);
        if kind == DescriptionKind::Answer {
            self.check_connected();
        }
        Ok(())
    }

    async fn accept_remote_candidate(&mut self, candidate: &str) -> Result<(), MediaError> {
        self.ensure_open()?;
        if self.remote.is_none() || !candidate.starts_with("candidate:") {
            return Err(MediaError::InvalidCandidate(candidate.to_string()));
        }
        record(
            &self.log,
            MediaCall::RemoteCandidate(self.id(), candidate.to_string()),
        );
        Ok(())
    }

    async fn destroy(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        record(&self.log, MediaCall::Destroy(self.id()));
        self.observer.connection_changed(ConnectionState::Closed);
    }
}

fn record(log: &Mutex<Vec<MediaCall>>, call: MediaCall) {
    trace!(?call, "loopback media call");
    if let Ok(mut log) = log.lock() {
        log.push(call);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::MediaEvent;
    use tokio::sync::mpsc;

    async fn session(
        engine: &LoopbackEngine,
        id: u64,
    ) -> (Box<dyn MediaSession>, mpsc::UnboundedReceiver<MediaEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let s = engine
            .create(MediaObserver::new(SessionId(id), tx))
            .await
            .unwrap();
        (s, rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<MediaEvent>) -> Vec<MediaEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    fn description_sdp(events: &[MediaEvent]) -> String {
        events
            .iter()
            .find_map(|e| match e {
                MediaEvent::LocalDescription { sdp, .. } => Some(sdp.clone()),
                _ => None,
            })
            .unwrap()
    }

    #[tokio::test]
    async fn test_offer_answer_connects_both_sides() {
        let engine = LoopbackEngine::new("t").with_candidates(1);
        let (mut offerer, mut off_rx) = session(&engine, 1).await;
        let (mut answerer, mut ans_rx) = session(&engine, 2).await;

        offerer.generate_offer().await.unwrap();
        let offer = description_sdp(&drain(&mut off_rx));

        answerer
            .accept_remote_description(&offer, DescriptionKind::Offer)
            .await
            .unwrap();
        answerer.generate_answer().await.unwrap();
        let ans_events = drain(&mut ans_rx);
        assert!(ans_events.contains(&MediaEvent::ConnectionChanged {
            session: SessionId(2),
            state: ConnectionState::Connected,
        }));
        assert!(ans_events
            .iter()
            .any(|e| matches!(e, MediaEvent::LocalCandidate { .. })));

        offerer
            .accept_remote_description(&description_sdp(&ans_events), DescriptionKind::Answer)
            .await
            .unwrap();
        assert!(drain(&mut off_rx).contains(&MediaEvent::ConnectionChanged {
            session: SessionId(1),
            state: ConnectionState::Connected,
        }));
    }

    #[tokio::test]
    async fn test_answer_requires_remote_offer() {
        let engine = LoopbackEngine::new("t");
        let (mut s, _rx) = session(&engine, 1).await;
        assert!(matches!(s.generate_answer().await, Err(MediaError::NoRemoteOffer)));
    }

    #[tokio::test]
    async fn test_candidate_rules() {
        let engine = LoopbackEngine::new("t");
        let (mut s, _rx) = session(&engine, 1).await;
        // no remote description yet
        assert!(s.accept_remote_candidate("candidate:0 1 udp 1 h 1 typ host").await.is_err());

        s.accept_remote_description("v=0\r\n", DescriptionKind::Offer)
            .await
            .unwrap();
        assert!(s.accept_remote_candidate("garbage").await.is_err());
        s.accept_remote_candidate("candidate:0 1 udp 1 h 1 typ host")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_destroyed_session_rejects_calls() {
        let engine = LoopbackEngine::new("t");
        let (mut s, _rx) = session(&engine, 1).await;
        s.destroy().await;
        s.destroy().await;
        assert!(matches!(s.generate_offer().await, Err(MediaError::Closed)));
        let destroys = engine
            .calls()
            .into_iter()
            .filter(|c| matches!(c, MediaCall::Destroy(_)))
            .count();
        assert_eq!(destroys, 1);
    }
}
