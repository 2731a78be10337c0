//! Shared Directory boundary: the realtime key-value store clients use as
//! their only coordination medium.
//!
//! Values are JSON trees addressed by `/`-separated paths. `null` means
//! absent, as in a Firebase-style realtime database. Two backends are
//! provided: [`MemoryDirectory`], an in-process store that runs in its own
//! tokio task, and [`RestDirectory`], which speaks the realtime database
//! REST protocol with server-sent events for subscriptions.

pub mod directory;
pub mod error;
pub mod memory;
pub mod rest;
pub mod sse;
pub mod tree;

pub use directory::{Directory, Subscription};
pub use error::{DirectoryError, Result};
pub use memory::{Faults, MemoryDirectory};
pub use rest::RestDirectory;
