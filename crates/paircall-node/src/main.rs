//! # paircall-node
//!
//! Runs a matchmaking participant against a shared realtime directory.
//!
//! With `PAIRCALL_DIRECTORY_URL` set, the node joins that database as the
//! participant stored in the local identity store. Without it, two local
//! participants are matched against each other over an in-process
//! directory, which exercises the whole negotiation without a network.

mod config;

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use paircall_client::{Matchmaker, MatchmakerHandle};
use paircall_directory::{Directory, MemoryDirectory, RestDirectory};
use paircall_media::LoopbackEngine;
use paircall_shared::constants::APP_NAME;
use paircall_shared::identity::generate_participant_id;
use paircall_shared::state::MatchState;
use paircall_store::Database;

use crate::config::NodeConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,paircall_client=debug,paircall_directory=info")
        }))
        .init();

    info!("Starting {APP_NAME} node v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration and identity
    // -----------------------------------------------------------------------
    let config = NodeConfig::from_env();
    info!(?config, "Loaded configuration");

    let me = {
        let db = match &config.data_dir {
            Some(dir) => Database::open_in(dir)?,
            None => Database::new()?,
        };
        db.load_or_create_participant_id()?
    };
    info!(participant = %me, "Using participant id");

    // -----------------------------------------------------------------------
    // 3. Start the matchmakers
    // -----------------------------------------------------------------------
    let cancel = CancellationToken::new();
    let mut handles: Vec<MatchmakerHandle> = Vec::new();

    match &config.directory_url {
        Some(url) => {
            info!(url = %url, "Joining shared directory");
            let directory: Arc<dyn Directory> =
                Arc::new(RestDirectory::new(url.clone(), config.directory_auth.clone())?);
            let handle = Matchmaker::spawn(
                directory,
                Arc::new(LoopbackEngine::new(me.as_str())),
                me,
                config.matchmaker.clone(),
                cancel.child_token(),
            )
            .await?;
            handles.push(handle);
        }
        None => {
            info!("No directory configured, running local demo");
            let directory: Arc<dyn Directory> = Arc::new(MemoryDirectory::spawn());
            let mut peer = generate_participant_id();
            while peer == me {
                peer = generate_participant_id();
            }
            for id in [me, peer] {
                let handle = Matchmaker::spawn(
                    directory.clone(),
                    Arc::new(LoopbackEngine::new(id.as_str())),
                    id,
                    config.matchmaker.clone(),
                    cancel.child_token(),
                )
                .await?;
                handles.push(handle);
            }
        }
    }

    let demo = config.directory_url.is_none();
    let mut watchers = Vec::new();
    for handle in &handles {
        watchers.push(tokio::spawn(report(handle.clone_view(), demo, cancel.clone())));
    }

    // -----------------------------------------------------------------------
    // 4. Run until Ctrl+C
    // -----------------------------------------------------------------------
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Could not listen for Ctrl+C, shutting down");
    } else {
        info!("Received Ctrl+C, shutting down");
    }

    cancel.cancel();
    for handle in handles {
        handle.shutdown().await;
    }
    join_reporters(watchers).await;

    Ok(())
}

/// Wait for every reporter task, logging the ones that failed. Returns the
/// number of failures.
async fn join_reporters(watchers: Vec<JoinHandle<()>>) -> usize {
    let mut failed = 0;
    for watcher in watchers {
        if let Err(e) = watcher.await {
            warn!(error = %e, "reporter task failed");
            failed += 1;
        }
    }
    failed
}

/// Log state changes and incoming chat. In the demo, greet every new
/// partner once connected.
async fn report(view: paircall_client::MatchmakerView, greet: bool, cancel: CancellationToken) {
    let mut state_rx = view.watch_state();
    let mut transcript_rx = view.watch_transcript();
    let mut seen = 0usize;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            changed = state_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = state_rx.borrow_and_update().clone();
                info!(participant = %view.participant(), ?state, "Match state");
                if greet && state == MatchState::Connected {
                    let text = format!("hello from {}", view.participant());
                    if let Err(e) = view.send_chat(text).await {
                        warn!(error = %e, "Greeting failed");
                    }
                }
            }
            changed = transcript_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let transcript = transcript_rx.borrow_and_update().clone();
                if transcript.len() < seen {
                    seen = 0;
                }
                for entry in transcript.iter().skip(seen).filter(|e| !e.is_mine) {
                    info!(participant = %view.participant(), text = %entry.text, "Chat");
                }
                seen = transcript.len();
            }
        }
    }
}
