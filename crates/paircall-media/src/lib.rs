//! Media Session Adapter: the narrow contract the matchmaker uses to drive
//! a peer-to-peer media transport.
//!
//! The transport engine itself lives outside this workspace. Engines report
//! locally generated descriptions, candidates and connectivity changes back
//! through a [`MediaObserver`], tagged with the [`SessionId`] they belong to
//! so events from a torn-down session can be told apart.

pub mod loopback;
pub mod session;
pub mod slot;

pub use loopback::{LoopbackEngine, MediaCall};
pub use session::{
    ConnectionState, DescriptionKind, MediaEngine, MediaError, MediaEvent, MediaObserver,
    MediaSession, SessionId,
};
pub use slot::{SessionRole, SessionSlot};
