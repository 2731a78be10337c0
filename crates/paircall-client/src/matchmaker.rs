//! Matchmaking state machine.
//!
//! The matchmaker runs in a dedicated tokio task and reacts to four
//! independent streams: this participant's Status Record, its inbox, events
//! from the media engine, and commands from the application. Status
//! notifications drive the phase transitions:
//!
//! ```text
//! New ──▶ LookingForMatch ──claim──▶ OfferedMatch(p) ──┐
//!              ▲    │                                   ├──▶ Connected
//!              │    └──claimed by p──▶ ReceivedMatch(p) ┘        │
//!              └──────────── timeout / next_match ◀──────────────┘
//! ```
//!
//! The side that *receives* a match creates the media session and sends the
//! offer. The claiming side answers once the offer shows up in its inbox.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use paircall_directory::Directory;
use paircall_media::{
    ConnectionState, DescriptionKind, MediaEngine, MediaEvent, SessionRole, SessionSlot,
};
use paircall_shared::protocol::{SignalEnvelope, Status};
use paircall_shared::state::{ChatEntry, MatchState};
use paircall_shared::types::ParticipantId;

use crate::backoff::SearchBackoff;
use crate::config::MatchmakerConfig;
use crate::error::{ClientError, Result};
use crate::signaling::{InboxEvents, SignalingChannel, StatusEvents};

const SHUTDOWN_WRITE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(2);

/// Requests from the application into the matchmaker task.
#[derive(Debug)]
pub enum MatchCommand {
    SendChat {
        text: String,
        reply: oneshot::Sender<Result<()>>,
    },
    NextMatch {
        reply: oneshot::Sender<Result<()>>,
    },
    LeaveMatch {
        reply: oneshot::Sender<Result<()>>,
    },
}

/// Cloneable access to a running matchmaker: observe its state and
/// transcript, and issue commands.
#[derive(Clone)]
pub struct MatchmakerView {
    participant: ParticipantId,
    cmd_tx: mpsc::Sender<MatchCommand>,
    state_rx: watch::Receiver<MatchState>,
    transcript_rx: watch::Receiver<Vec<ChatEntry>>,
}

impl MatchmakerView {
    pub fn participant(&self) -> &ParticipantId {
        &self.participant
    }

    pub fn state(&self) -> MatchState {
        self.state_rx.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<MatchState> {
        self.state_rx.clone()
    }

    pub fn transcript(&self) -> Vec<ChatEntry> {
        self.transcript_rx.borrow().clone()
    }

    pub fn watch_transcript(&self) -> watch::Receiver<Vec<ChatEntry>> {
        self.transcript_rx.clone()
    }

    /// Append `text` to the transcript and deliver it to the partner.
    pub async fn send_chat(&self, text: impl Into<String>) -> Result<()> {
        let text = text.into();
        self.request(|reply| MatchCommand::SendChat { text, reply })
            .await
    }

    /// Abandon the current partner (if any) and search again.
    pub async fn next_match(&self) -> Result<()> {
        self.request(|reply| MatchCommand::NextMatch { reply }).await
    }

    /// Abandon the current partner (if any) and stop searching.
    pub async fn leave_match(&self) -> Result<()> {
        self.request(|reply| MatchCommand::LeaveMatch { reply }).await
    }

    async fn request(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<()>>) -> MatchCommand,
    ) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(make(reply))
            .await
            .map_err(|_| ClientError::ActorGone)?;
        rx.await.map_err(|_| ClientError::ActorGone)?
    }
}

/// Owning handle to a running matchmaker. Dereferences to its
/// [`MatchmakerView`].
pub struct MatchmakerHandle {
    view: MatchmakerView,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl MatchmakerHandle {
    pub fn clone_view(&self) -> MatchmakerView {
        self.view.clone()
    }

    /// Cancel the session and wait for the task to finish.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!(error = %e, "matchmaker task failed");
        }
    }
}

impl std::ops::Deref for MatchmakerHandle {
    type Target = MatchmakerView;

    fn deref(&self) -> &MatchmakerView {
        &self.view
    }
}

pub struct Matchmaker {
    channel: SignalingChannel,
    slot: SessionSlot,
    state: MatchState,
    partner: Option<ParticipantId>,
    backoff: SearchBackoff,
    match_timeout: std::time::Duration,
    search_at: Option<Instant>,
    match_deadline: Option<Instant>,
    state_tx: watch::Sender<MatchState>,
    transcript_tx: watch::Sender<Vec<ChatEntry>>,
}

impl Matchmaker {
    /// Reset this participant's records, subscribe to them and start the
    /// matchmaker task. `cancel` ends the task together with every
    /// subscription it holds.
    pub async fn spawn(
        directory: Arc<dyn Directory>,
        engine: Arc<dyn MediaEngine>,
        me: ParticipantId,
        config: MatchmakerConfig,
        cancel: CancellationToken,
    ) -> Result<MatchmakerHandle> {
        let channel = SignalingChannel::new(directory, me.clone());

        // A record left over from a previous run must not strand us.
        channel.clear_self_inbox().await?;
        channel.publish_self_status(&Status::LookingForMatch).await?;
        let status = channel.subscribe_self_status().await?;
        let inbox = channel.subscribe_inbox().await?;

        let (media_tx, media_rx) = mpsc::unbounded_channel();
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let (machine, state_rx, transcript_rx) = Self::new(channel, engine, media_tx, &config);

        info!(participant = %me, "matchmaker started");

        let token = cancel.clone();
        let task = tokio::spawn(async move {
            machine.run(status, inbox, media_rx, cmd_rx, token).await;
        });

        Ok(MatchmakerHandle {
            view: MatchmakerView {
                participant: me,
                cmd_tx,
                state_rx,
                transcript_rx,
            },
            cancel,
            task,
        })
    }

    fn new(
        channel: SignalingChannel,
        engine: Arc<dyn MediaEngine>,
        media_tx: mpsc::UnboundedSender<MediaEvent>,
        config: &MatchmakerConfig,
    ) -> (Self, watch::Receiver<MatchState>, watch::Receiver<Vec<ChatEntry>>) {
        let (state_tx, state_rx) = watch::channel(MatchState::New);
        let (transcript_tx, transcript_rx) = watch::channel(Vec::new());
        let machine = Self {
            channel,
            slot: SessionSlot::new(engine, media_tx),
            state: MatchState::New,
            partner: None,
            backoff: SearchBackoff::new(config.search_retry, config.search_retry_max),
            match_timeout: config.match_timeout,
            search_at: None,
            match_deadline: None,
            state_tx,
            transcript_tx,
        };
        (machine, state_rx, transcript_rx)
    }

    async fn run(
        mut self,
        mut status: StatusEvents,
        mut inbox: InboxEvents,
        mut media_rx: mpsc::UnboundedReceiver<MediaEvent>,
        mut cmd_rx: mpsc::Receiver<MatchCommand>,
        cancel: CancellationToken,
    ) {
        loop {
            let wake = self.next_wake();
            tokio::select! {
                biased;

                _ = cancel.cancelled() => break,

                cmd = cmd_rx.recv() => match cmd {
                    Some(cmd) => self.on_command(cmd).await,
                    None => break,
                },

                state = status.next() => match state {
                    Some(state) => self.on_status(state).await,
                    None => {
                        warn!(participant = %self.me(), "status subscription ended");
                        break;
                    }
                },

                envelope = inbox.next() => match envelope {
                    Some(envelope) => self.on_envelope(envelope).await,
                    None => {
                        warn!(participant = %self.me(), "inbox subscription ended");
                        break;
                    }
                },

                Some(event) = media_rx.recv() => self.on_media(event).await,

                _ = sleep_until_opt(wake) => self.on_timer().await,
            }
        }

        self.slot.destroy().await;
        // Best effort: stop others from claiming a participant that is gone.
        match tokio::time::timeout(
            SHUTDOWN_WRITE_TIMEOUT,
            self.channel.publish_self_status(&Status::Idle),
        )
        .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(error = %e, "could not publish idle status on shutdown"),
            Err(_) => debug!("timed out publishing idle status on shutdown"),
        }
        info!(participant = %self.me(), "matchmaker stopped");
    }

    fn me(&self) -> &ParticipantId {
        self.channel.participant()
    }

    // ------------------------------------------------------------------
    // Status notifications
    // ------------------------------------------------------------------

    async fn on_status(&mut self, state: MatchState) {
        debug!(participant = %self.me(), ?state, "status notification");
        match state {
            MatchState::LookingForMatch => {
                if self.state == MatchState::LookingForMatch {
                    // already searching; the retry timer owns the next attempt
                    return;
                }
                self.set_state(MatchState::LookingForMatch);
                self.reset_match().await;
                self.run_search().await;
            }
            MatchState::OfferedMatch(partner) => {
                // Passive side: wait for the partner's offer in our inbox.
                self.enter_pending(MatchState::OfferedMatch(partner.clone()), partner);
            }
            MatchState::ReceivedMatch(partner) => {
                let repeat = self.state == MatchState::ReceivedMatch(partner.clone())
                    && self.slot.role() == Some(SessionRole::Offering);
                self.enter_pending(MatchState::ReceivedMatch(partner.clone()), partner);
                if !repeat {
                    self.start_offer().await;
                }
            }
            MatchState::Connected => {
                self.search_at = None;
                self.match_deadline = None;
                self.backoff.reset();
                self.set_state(MatchState::Connected);
            }
            MatchState::Idle => {
                self.search_at = None;
                self.match_deadline = None;
                self.set_state(MatchState::Idle);
            }
            MatchState::New => {}
        }
    }

    fn enter_pending(&mut self, state: MatchState, partner: ParticipantId) {
        if self.partner.as_ref() != Some(&partner) || self.match_deadline.is_none() {
            self.match_deadline = Some(Instant::now() + self.match_timeout);
        }
        self.partner = Some(partner);
        self.search_at = None;
        self.set_state(state);
    }

    async fn start_offer(&mut self) {
        let session = match self.slot.create(SessionRole::Offering).await {
            Ok(session) => session,
            Err(e) => {
                warn!(error = %e, "failed to create media session");
                return;
            }
        };
        if let Err(e) = session.generate_offer().await {
            warn!(error = %e, "failed to generate offer");
        }
    }

    /// Drop everything tied to the previous partner.
    async fn reset_match(&mut self) {
        self.slot.destroy().await;
        self.partner = None;
        self.match_deadline = None;
        self.transcript_tx.send_modify(|t| t.clear());
    }

    // ------------------------------------------------------------------
    // Search
    // ------------------------------------------------------------------

    /// Clear the inbox, advertise as searching, and claim the first other
    /// searcher found. Own status is written before the partner's, so the
    /// partner never sees `ReceivedMatch` without a matching `OfferedMatch`.
    async fn run_search(&mut self) {
        self.search_at = None;

        if let Err(e) = self.channel.clear_self_inbox().await {
            warn!(error = %e, "failed to clear inbox before search");
        }
        if let Err(e) = self.channel.publish_self_status(&Status::LookingForMatch).await {
            warn!(error = %e, "failed to publish searching status");
            self.schedule_search();
            return;
        }

        let Some(candidate) = self.channel.find_candidate_partner().await else {
            debug!(participant = %self.me(), "no candidate found");
            self.schedule_search();
            return;
        };

        let me = self.me().clone();
        if let Err(e) = self
            .channel
            .publish_self_status(&Status::OfferedMatch(candidate.clone()))
            .await
        {
            warn!(error = %e, "failed to publish offered status");
            self.schedule_search();
            return;
        }
        if let Err(e) = self
            .channel
            .publish_partner_status(&candidate, &Status::ReceivedMatch(me))
            .await
        {
            // Our record says OfferedMatch; the match timeout sends us back.
            warn!(partner = %candidate, error = %e, "failed to claim candidate");
            self.enter_pending(MatchState::OfferedMatch(candidate.clone()), candidate);
            return;
        }

        info!(participant = %self.me(), partner = %candidate, "claimed candidate");
        self.backoff.reset();
        self.enter_pending(MatchState::OfferedMatch(candidate.clone()), candidate);
    }

    fn schedule_search(&mut self) {
        let delay = self.backoff.next_delay();
        trace!(?delay, "search retry scheduled");
        self.search_at = Some(Instant::now() + delay);
    }

    fn next_wake(&self) -> Option<Instant> {
        match (self.search_at, self.match_deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    async fn on_timer(&mut self) {
        let now = Instant::now();

        if self.match_deadline.is_some_and(|d| d <= now) {
            self.match_deadline = None;
            if self.state.is_pending_match() {
                warn!(
                    participant = %self.me(),
                    partner = ?self.partner,
                    "match did not connect in time, searching again"
                );
                if let Err(e) = self.channel.publish_self_status(&Status::LookingForMatch).await {
                    warn!(error = %e, "failed to restart search");
                    self.match_deadline = Some(now + self.match_timeout);
                }
            }
        }

        if self.search_at.is_some_and(|d| d <= now) {
            self.search_at = None;
            if self.state == MatchState::LookingForMatch {
                self.run_search().await;
            }
        }
    }

    // ------------------------------------------------------------------
    // Inbox
    // ------------------------------------------------------------------

    async fn on_envelope(&mut self, envelope: SignalEnvelope) {
        trace!(kind = envelope.label(), "inbox envelope");
        match envelope {
            SignalEnvelope::Offer(sdp) => self.on_remote_offer(&sdp).await,
            SignalEnvelope::Answer(sdp) => self.on_remote_answer(&sdp).await,
            SignalEnvelope::IceCandidate(candidate) => self.on_remote_candidate(&candidate).await,
            SignalEnvelope::Chat(text) => {
                self.transcript_tx
                    .send_modify(|t| t.push(ChatEntry::theirs(text)));
            }
        }
    }

    async fn on_remote_offer(&mut self, sdp: &str) {
        let Some(partner) = self.partner.clone() else {
            debug!(participant = %self.me(), "offer without a partner, dropping");
            return;
        };

        // Both sides offered. The smaller id keeps its offer; the larger
        // discards its own session and answers.
        let glare = self.slot.role() == Some(SessionRole::Offering);
        if glare {
            if self.me() < &partner {
                debug!(partner = %partner, "offer collision, keeping our offer");
                return;
            }
            info!(partner = %partner, "offer collision, answering partner's offer");
        }

        if glare || !self.slot.is_active() {
            if let Err(e) = self.slot.create(SessionRole::Answering).await {
                warn!(error = %e, "failed to create media session");
                return;
            }
        }
        let Some(session) = self.slot.session_mut() else {
            return;
        };
        if let Err(e) = session
            .accept_remote_description(sdp, DescriptionKind::Offer)
            .await
        {
            warn!(error = %e, "partner's offer rejected");
            return;
        }
        if let Err(e) = session.generate_answer().await {
            warn!(error = %e, "failed to generate answer");
        }
    }

    async fn on_remote_answer(&mut self, sdp: &str) {
        let Some(session) = self.slot.session_mut() else {
            debug!(participant = %self.me(), "answer without a session, dropping");
            return;
        };
        if let Err(e) = session
            .accept_remote_description(sdp, DescriptionKind::Answer)
            .await
        {
            warn!(error = %e, "partner's answer rejected");
        }
    }

    async fn on_remote_candidate(&mut self, candidate: &str) {
        let Some(session) = self.slot.session_mut() else {
            trace!("candidate without a session, discarding");
            return;
        };
        if let Err(e) = session.accept_remote_candidate(candidate).await {
            trace!(error = %e, "discarding candidate");
        }
    }

    // ------------------------------------------------------------------
    // Media engine
    // ------------------------------------------------------------------

    async fn on_media(&mut self, event: MediaEvent) {
        if !self.slot.is_current(event.session()) {
            trace!(session = %event.session(), "event from a stale session");
            return;
        }
        match event {
            MediaEvent::LocalCandidate { candidate, .. } => {
                self.forward(SignalEnvelope::IceCandidate(candidate)).await;
            }
            MediaEvent::LocalDescription { kind, sdp, .. } => {
                let envelope = match kind {
                    DescriptionKind::Offer => SignalEnvelope::Offer(sdp),
                    DescriptionKind::Answer => SignalEnvelope::Answer(sdp),
                };
                self.forward(envelope).await;
            }
            MediaEvent::ConnectionChanged { state, .. } => self.on_connection(state).await,
        }
    }

    async fn on_connection(&mut self, state: ConnectionState) {
        match state {
            ConnectionState::Connected => {
                info!(participant = %self.me(), partner = ?self.partner, "media connected");
                if let Err(e) = self.channel.publish_self_status(&Status::Connected).await {
                    warn!(error = %e, "failed to publish connected status");
                }
                if let Err(e) = self.channel.clear_self_inbox().await {
                    warn!(error = %e, "failed to clear inbox");
                }
            }
            ConnectionState::Failed if self.state == MatchState::Connected => {
                warn!(participant = %self.me(), "media connection failed, searching again");
                if let Err(e) = self.next_match().await {
                    warn!(error = %e, "failed to restart search");
                }
            }
            _ => {}
        }
    }

    async fn forward(&mut self, envelope: SignalEnvelope) {
        let Some(partner) = &self.partner else {
            debug!(kind = envelope.label(), "no partner to forward to");
            return;
        };
        if let Err(e) = self.channel.send_envelope(partner, &envelope).await {
            warn!(partner = %partner, kind = envelope.label(), error = %e, "failed to send envelope");
        }
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    async fn on_command(&mut self, cmd: MatchCommand) {
        match cmd {
            MatchCommand::SendChat { text, reply } => {
                let _ = reply.send(self.send_chat(text).await);
            }
            MatchCommand::NextMatch { reply } => {
                let _ = reply.send(self.next_match().await);
            }
            MatchCommand::LeaveMatch { reply } => {
                let _ = reply.send(self.leave_match().await);
            }
        }
    }

    async fn send_chat(&mut self, text: String) -> Result<()> {
        self.transcript_tx
            .send_modify(|t| t.push(ChatEntry::mine(text.clone())));
        let Some(partner) = self.partner.clone() else {
            warn!(participant = %self.me(), "chat with no partner");
            return Err(ClientError::NoPartner);
        };
        self.channel
            .send_envelope(&partner, &SignalEnvelope::Chat(text))
            .await
    }

    /// Hand a connected partner back to the search, then search ourselves.
    /// The search itself starts when our own `LookingForMatch` is observed.
    async fn next_match(&mut self) -> Result<()> {
        self.slot.destroy().await;
        self.release_partner().await;
        self.channel.publish_self_status(&Status::LookingForMatch).await
    }

    /// Hand a connected partner back to the search and go idle.
    async fn leave_match(&mut self) -> Result<()> {
        self.release_partner().await;
        self.channel.publish_self_status(&Status::Idle).await?;
        self.reset_match().await;
        self.search_at = None;
        self.set_state(MatchState::Idle);
        Ok(())
    }

    /// Courtesy write so an abandoned partner resumes searching promptly.
    async fn release_partner(&mut self) {
        if self.state != MatchState::Connected {
            return;
        }
        let Some(partner) = self.partner.clone() else {
            return;
        };
        if let Err(e) = self
            .channel
            .publish_partner_status(&partner, &Status::LookingForMatch)
            .await
        {
            warn!(partner = %partner, error = %e, "failed to release partner");
        }
    }

    fn set_state(&mut self, state: MatchState) {
        if self.state != state {
            debug!(participant = %self.me(), from = ?self.state, to = ?state, "match state");
        }
        self.state = state.clone();
        self.state_tx.send_replace(state);
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use paircall_directory::{Faults, MemoryDirectory};
    use paircall_media::{LoopbackEngine, MediaCall, SessionId};
    use serde_json::{json, Value};
    use std::time::Duration;

    fn pid(s: &str) -> ParticipantId {
        ParticipantId::parse(s).unwrap()
    }

    struct Fixture {
        dir: MemoryDirectory,
        engine: LoopbackEngine,
        machine: Matchmaker,
        media_rx: mpsc::UnboundedReceiver<MediaEvent>,
        transcript_rx: watch::Receiver<Vec<ChatEntry>>,
    }

    impl Fixture {
        fn new(dir: &MemoryDirectory, me: &str) -> Self {
            let engine = LoopbackEngine::new(me);
            let channel = SignalingChannel::new(Arc::new(dir.clone()), pid(me));
            let (media_tx, media_rx) = mpsc::unbounded_channel();
            let (machine, _state_rx, transcript_rx) = Matchmaker::new(
                channel,
                Arc::new(engine.clone()),
                media_tx,
                &MatchmakerConfig::default(),
            );
            Self {
                dir: dir.clone(),
                engine,
                machine,
                media_rx,
                transcript_rx,
            }
        }

        /// Feed every queued media event back into the machine.
        async fn pump_media(&mut self) {
            while let Ok(event) = self.media_rx.try_recv() {
                self.machine.on_media(event).await;
            }
        }

        async fn status_of(&self, id: &str) -> Value {
            self.dir.get(&format!("users/{id}/status")).await.unwrap()
        }
    }

    async fn collect_inbox(dir: &MemoryDirectory, id: &str) -> mpsc::UnboundedReceiver<Value> {
        let mut sub = dir.subscribe(&format!("users/{id}/data")).await.unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(v) = sub.next().await {
                if tx.send(v).is_err() {
                    break;
                }
            }
        });
        rx
    }

    async fn drain_values(rx: &mut mpsc::UnboundedReceiver<Value>) -> Vec<Value> {
        tokio::time::sleep(Duration::from_millis(20)).await;
        let mut out = Vec::new();
        while let Ok(v) = rx.try_recv() {
            out.push(v);
        }
        out
    }

    #[tokio::test]
    async fn test_search_claims_other_searcher() {
        let dir = MemoryDirectory::spawn();
        dir.set("users/bbbbbb/status", json!({"type": "LookingForMatch"}))
            .await
            .unwrap();
        let mut a = Fixture::new(&dir, "aaaaaa");

        a.machine.on_status(MatchState::LookingForMatch).await;

        assert_eq!(a.machine.state, MatchState::OfferedMatch(pid("bbbbbb")));
        assert_eq!(
            a.status_of("aaaaaa").await,
            json!({"type": "OfferedMatch", "participant": "bbbbbb"})
        );
        assert_eq!(
            a.status_of("bbbbbb").await,
            json!({"type": "ReceivedMatch", "participant": "aaaaaa"})
        );
        assert!(a.machine.match_deadline.is_some());
        assert!(a.machine.search_at.is_none());
    }

    #[tokio::test]
    async fn test_claim_is_sequenced_after_own_offer() {
        let dir = MemoryDirectory::spawn();
        dir.set("users/bbbbbb/status", json!({"type": "LookingForMatch"}))
            .await
            .unwrap();
        let mut watch_b = dir.subscribe("users/bbbbbb/status").await.unwrap();
        let checker = dir.clone();
        let observed = tokio::spawn(async move {
            while let Some(v) = watch_b.next().await {
                if v["type"] == "ReceivedMatch" {
                    return checker.get("users/aaaaaa/status").await.unwrap();
                }
            }
            Value::Null
        });

        let mut a = Fixture::new(&dir, "aaaaaa");
        a.machine.run_search().await;

        assert_eq!(
            observed.await.unwrap(),
            json!({"type": "OfferedMatch", "participant": "bbbbbb"})
        );
    }

    #[tokio::test]
    async fn test_search_without_candidate_schedules_retry() {
        let dir = MemoryDirectory::spawn();
        let mut a = Fixture::new(&dir, "aaaaaa");

        a.machine.on_status(MatchState::LookingForMatch).await;

        assert_eq!(a.machine.state, MatchState::LookingForMatch);
        assert!(a.machine.search_at.is_some());
        assert_eq!(a.status_of("aaaaaa").await, json!({"type": "LookingForMatch"}));
    }

    #[tokio::test]
    async fn test_repeated_searching_notification_is_ignored() {
        let dir = MemoryDirectory::spawn();
        let mut a = Fixture::new(&dir, "aaaaaa");
        a.machine.on_status(MatchState::LookingForMatch).await;
        let scheduled = a.machine.search_at;

        dir.set("users/bbbbbb/status", json!({"type": "LookingForMatch"}))
            .await
            .unwrap();
        a.machine.on_status(MatchState::LookingForMatch).await;

        // still waiting on the retry timer, no claim made
        assert_eq!(a.machine.search_at, scheduled);
        assert_eq!(a.status_of("bbbbbb").await, json!({"type": "LookingForMatch"}));
    }

    #[tokio::test]
    async fn test_received_match_offers_to_partner() {
        let dir = MemoryDirectory::spawn();
        let mut inbox_a = collect_inbox(&dir, "aaaaaa").await;
        let mut b = Fixture::new(&dir, "bbbbbb");

        b.machine
            .on_status(MatchState::ReceivedMatch(pid("aaaaaa")))
            .await;
        b.pump_media().await;

        assert_eq!(b.machine.slot.role(), Some(SessionRole::Offering));
        assert!(b.engine.calls().contains(&MediaCall::GenerateOffer(SessionId(1))));

        let seen = drain_values(&mut inbox_a).await;
        assert!(seen.iter().any(|v| v["type"] == "Offer"));
        assert!(seen.iter().any(|v| v["type"] == "IceCandidate"));
    }

    #[tokio::test]
    async fn test_offered_match_waits_passively() {
        let dir = MemoryDirectory::spawn();
        let mut a = Fixture::new(&dir, "aaaaaa");

        a.machine
            .on_status(MatchState::OfferedMatch(pid("bbbbbb")))
            .await;

        assert_eq!(a.machine.partner, Some(pid("bbbbbb")));
        assert!(!a.machine.slot.is_active());
        assert!(a.engine.calls().is_empty());
    }

    #[tokio::test]
    async fn test_offer_is_answered() {
        let dir = MemoryDirectory::spawn();
        let mut inbox_b = collect_inbox(&dir, "bbbbbb").await;
        let mut a = Fixture::new(&dir, "aaaaaa");
        a.machine
            .on_status(MatchState::OfferedMatch(pid("bbbbbb")))
            .await;

        a.machine
            .on_envelope(SignalEnvelope::Offer("v=0\r\ns=b\r\n".into()))
            .await;
        a.pump_media().await;

        assert_eq!(a.machine.slot.role(), Some(SessionRole::Answering));
        let seen = drain_values(&mut inbox_b).await;
        assert!(seen.iter().any(|v| v["type"] == "Answer"));
        // loopback connects once answered
        assert_eq!(a.status_of("aaaaaa").await, json!({"type": "Connected"}));
    }

    #[tokio::test]
    async fn test_offer_without_partner_is_dropped() {
        let dir = MemoryDirectory::spawn();
        let mut a = Fixture::new(&dir, "aaaaaa");

        a.machine
            .on_envelope(SignalEnvelope::Offer("v=0\r\n".into()))
            .await;

        assert!(!a.machine.slot.is_active());
        assert!(a.engine.calls().is_empty());
    }

    #[tokio::test]
    async fn test_glare_smaller_id_keeps_offer() {
        let dir = MemoryDirectory::spawn();
        let mut a = Fixture::new(&dir, "aaaaaa");
        a.machine
            .on_status(MatchState::ReceivedMatch(pid("bbbbbb")))
            .await;

        a.machine
            .on_envelope(SignalEnvelope::Offer("v=0\r\ns=b\r\n".into()))
            .await;

        assert_eq!(a.machine.slot.role(), Some(SessionRole::Offering));
        assert!(a.machine.slot.is_current(SessionId(1)));
        assert!(!a
            .engine
            .calls()
            .iter()
            .any(|c| matches!(c, MediaCall::GenerateAnswer(_))));
    }

    #[tokio::test]
    async fn test_glare_larger_id_answers() {
        let dir = MemoryDirectory::spawn();
        let mut b = Fixture::new(&dir, "bbbbbb");
        b.machine
            .on_status(MatchState::ReceivedMatch(pid("aaaaaa")))
            .await;

        b.machine
            .on_envelope(SignalEnvelope::Offer("v=0\r\ns=a\r\n".into()))
            .await;

        assert_eq!(b.machine.slot.role(), Some(SessionRole::Answering));
        let calls = b.engine.calls();
        assert!(calls.contains(&MediaCall::Destroy(SessionId(1))));
        assert!(calls.contains(&MediaCall::GenerateAnswer(SessionId(2))));
    }

    #[tokio::test]
    async fn test_candidate_without_session_is_discarded() {
        let dir = MemoryDirectory::spawn();
        let mut a = Fixture::new(&dir, "aaaaaa");

        a.machine
            .on_envelope(SignalEnvelope::IceCandidate("candidate:0 1 udp 1 h 1 typ host".into()))
            .await;
        a.machine
            .on_envelope(SignalEnvelope::Answer("v=0\r\n".into()))
            .await;

        assert!(a.engine.calls().is_empty());
    }

    #[tokio::test]
    async fn test_stale_session_events_are_ignored() {
        let dir = MemoryDirectory::spawn();
        let mut inbox_b = collect_inbox(&dir, "bbbbbb").await;
        let mut a = Fixture::new(&dir, "aaaaaa");
        a.machine.partner = Some(pid("bbbbbb"));

        a.machine
            .on_media(MediaEvent::LocalCandidate {
                session: SessionId(7),
                candidate: "candidate:0".into(),
            })
            .await;

        let seen = drain_values(&mut inbox_b).await;
        assert_eq!(seen, vec![Value::Null]);
    }

    #[tokio::test]
    async fn test_media_forwarding_runs_on_spawned_task() {
        let dir = MemoryDirectory::spawn();
        let Fixture {
            mut machine,
            mut media_rx,
            ..
        } = Fixture::new(&dir, "bbbbbb");
        machine
            .on_status(MatchState::ReceivedMatch(pid("aaaaaa")))
            .await;

        let task = tokio::spawn(async move {
            while let Ok(event) = media_rx.try_recv() {
                machine.on_media(event).await;
            }
        });
        task.await.unwrap();

        assert_eq!(
            dir.get("users/aaaaaa/data").await.unwrap()["type"],
            "IceCandidate"
        );
    }

    #[tokio::test]
    async fn test_chat_in_and_out() {
        let dir = MemoryDirectory::spawn();
        let mut a = Fixture::new(&dir, "aaaaaa");
        a.machine
            .on_status(MatchState::OfferedMatch(pid("bbbbbb")))
            .await;

        a.machine.send_chat("hi".into()).await.unwrap();
        a.machine
            .on_envelope(SignalEnvelope::Chat("hey".into()))
            .await;

        let transcript = a.transcript_rx.borrow().clone();
        assert_eq!(transcript.len(), 2);
        assert_eq!((transcript[0].text.as_str(), transcript[0].is_mine), ("hi", true));
        assert_eq!((transcript[1].text.as_str(), transcript[1].is_mine), ("hey", false));
        assert_eq!(
            dir.get("users/bbbbbb/data").await.unwrap(),
            json!({"type": "Chat", "data": "hi"})
        );
    }

    #[tokio::test]
    async fn test_chat_is_recorded_even_when_undeliverable() {
        let dir = MemoryDirectory::spawn();
        let mut a = Fixture::new(&dir, "aaaaaa");

        assert!(matches!(
            a.machine.send_chat("hello?".into()).await,
            Err(ClientError::NoPartner)
        ));

        a.machine.partner = Some(pid("bbbbbb"));
        dir.set_faults(Faults {
            fail_writes: true,
            ..Faults::default()
        });
        assert!(a.machine.send_chat("anyone".into()).await.is_err());

        let texts: Vec<_> = a
            .transcript_rx
            .borrow()
            .iter()
            .map(|e| (e.text.clone(), e.is_mine))
            .collect();
        assert_eq!(
            texts,
            vec![("hello?".to_string(), true), ("anyone".to_string(), true)]
        );
    }

    #[tokio::test]
    async fn test_leave_when_connected_releases_partner() {
        let dir = MemoryDirectory::spawn();
        let mut a = Fixture::new(&dir, "aaaaaa");
        a.machine
            .on_status(MatchState::OfferedMatch(pid("bbbbbb")))
            .await;
        a.machine.on_status(MatchState::Connected).await;

        a.machine.leave_match().await.unwrap();

        assert_eq!(a.status_of("bbbbbb").await, json!({"type": "LookingForMatch"}));
        assert_eq!(a.status_of("aaaaaa").await, json!({"type": "Idle"}));
        assert_eq!(a.machine.state, MatchState::Idle);
        assert!(a.machine.partner.is_none());
    }

    #[tokio::test]
    async fn test_leave_while_pending_leaves_partner_alone() {
        let dir = MemoryDirectory::spawn();
        dir.set(
            "users/bbbbbb/status",
            json!({"type": "ReceivedMatch", "participant": "aaaaaa"}),
        )
        .await
        .unwrap();
        let mut a = Fixture::new(&dir, "aaaaaa");
        a.machine
            .on_status(MatchState::OfferedMatch(pid("bbbbbb")))
            .await;

        a.machine.leave_match().await.unwrap();

        assert_eq!(
            a.status_of("bbbbbb").await,
            json!({"type": "ReceivedMatch", "participant": "aaaaaa"})
        );
        assert_eq!(a.status_of("aaaaaa").await, json!({"type": "Idle"}));
    }

    #[tokio::test]
    async fn test_next_match_when_connected() {
        let dir = MemoryDirectory::spawn();
        let mut a = Fixture::new(&dir, "aaaaaa");
        a.machine
            .on_status(MatchState::ReceivedMatch(pid("bbbbbb")))
            .await;
        a.machine.on_status(MatchState::Connected).await;

        a.machine.next_match().await.unwrap();

        assert!(!a.machine.slot.is_active());
        assert_eq!(a.status_of("bbbbbb").await, json!({"type": "LookingForMatch"}));
        assert_eq!(a.status_of("aaaaaa").await, json!({"type": "LookingForMatch"}));
    }

    #[tokio::test]
    async fn test_looking_for_match_resets_session_and_transcript() {
        let dir = MemoryDirectory::spawn();
        let mut a = Fixture::new(&dir, "aaaaaa");
        a.machine
            .on_status(MatchState::ReceivedMatch(pid("bbbbbb")))
            .await;
        a.machine
            .on_envelope(SignalEnvelope::Chat("bye".into()))
            .await;

        a.machine.on_status(MatchState::LookingForMatch).await;

        assert!(!a.machine.slot.is_active());
        assert!(a.transcript_rx.borrow().is_empty());
        assert!(a.engine.calls().contains(&MediaCall::Destroy(SessionId(1))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_match_timeout_restarts_search() {
        let dir = MemoryDirectory::spawn();
        let mut a = Fixture::new(&dir, "aaaaaa");
        a.machine
            .on_status(MatchState::OfferedMatch(pid("bbbbbb")))
            .await;

        // not due yet
        tokio::time::advance(Duration::from_secs(10)).await;
        a.machine.on_timer().await;
        assert_eq!(a.status_of("aaaaaa").await, Value::Null);
        assert!(a.machine.match_deadline.is_some());

        tokio::time::advance(Duration::from_secs(6)).await;
        a.machine.on_timer().await;
        assert_eq!(a.status_of("aaaaaa").await, json!({"type": "LookingForMatch"}));
        assert!(a.machine.match_deadline.is_none());
    }

    #[tokio::test]
    async fn test_connected_clears_timers() {
        let dir = MemoryDirectory::spawn();
        let mut a = Fixture::new(&dir, "aaaaaa");
        a.machine
            .on_status(MatchState::OfferedMatch(pid("bbbbbb")))
            .await;
        a.machine.on_status(MatchState::Connected).await;

        assert!(a.machine.match_deadline.is_none());
        assert!(a.machine.next_wake().is_none());
    }
}
