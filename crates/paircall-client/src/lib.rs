//! # paircall-client
//!
//! Peer-driven matchmaking for random one-to-one calls.
//!
//! Two clients find each other and negotiate a media session using nothing
//! but a shared realtime directory: each participant publishes a Status
//! Record, claims a searching peer by writing onto the peer's record, and
//! exchanges SDP and connectivity candidates through single-slot inboxes.
//!
//! - [`signaling`]: typed reads and writes of this participant's records
//! - [`matchmaker`]: the state machine actor driving search, negotiation
//!   and teardown

pub mod backoff;
pub mod config;
pub mod error;
pub mod matchmaker;
pub mod signaling;

pub use config::MatchmakerConfig;
pub use error::ClientError;
pub use matchmaker::{Matchmaker, MatchmakerHandle, MatchmakerView};
pub use signaling::SignalingChannel;
