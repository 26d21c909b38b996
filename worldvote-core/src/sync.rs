//! Background synchronization loop.
//!
//! Owns the remote strategy. Work arrives from two directions: commands
//! queued by the engine (increments, reset pushes) and snapshots delivered
//! by the remote's change feed. Remote failures are logged and dropped;
//! local state has already been persisted by the time anything reaches
//! this loop, so nothing here can lose a vote.

use crate::reconcile::{MergeDecision, Reconciler};
use crate::remote::{Remote, RemoteCommand, RemoteError, RemoteSnapshot};
use crate::store::VoteStore;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

/// Runs until the command channel closes or the task is aborted.
pub async fn run_sync_loop<S>(
    engine: Arc<RwLock<Reconciler<S>>>,
    mut remote: Remote,
    mut cmd_rx: mpsc::Receiver<RemoteCommand>,
) where
    S: VoteStore + Send + Sync + 'static,
{
    info!("Sync: Starting ({} remote)", remote.kind());
    let mut snapshots = remote.subscribe().await;

    // One-time load. A store nobody ever wrote to must not clobber a
    // populated local cache with zeros.
    match remote.fetch_snapshot().await {
        Ok(snapshot) if snapshot.is_blank() => {
            debug!("Sync: Remote is blank, keeping local state");
        }
        Ok(snapshot) => apply(&engine, snapshot).await,
        Err(RemoteError::Disabled) => info!("Sync: No remote configured, running local-only"),
        Err(e) => warn!("Sync: Initial fetch failed: {}", e),
    }

    loop {
        tokio::select! {
            command = cmd_rx.recv() => {
                match command {
                    Some(RemoteCommand::Increment { key }) => {
                        if let Err(e) = remote.increment(&key).await {
                            debug!("Sync: Increment for {} dropped: {}", key, e);
                        }
                    }
                    Some(RemoteCommand::PushFull { votes, epoch }) => {
                        if let Err(e) = remote.push_full(&votes, epoch).await {
                            warn!("Sync: Reset push failed, remote keeps stale counts: {}", e);
                        }
                    }
                    None => {
                        debug!("Sync: Command channel closed, stopping");
                        break;
                    }
                }
            }

            Some(snapshot) = snapshots.recv() => {
                apply(&engine, snapshot).await;
            }
        }
    }
}

async fn apply<S: VoteStore>(engine: &Arc<RwLock<Reconciler<S>>>, snapshot: RemoteSnapshot) {
    let mut engine = engine.write().await;
    match engine.apply_remote_snapshot(snapshot) {
        Ok(MergeDecision::ResetApplied) => info!("Sync: Remote reset adopted"),
        Ok(MergeDecision::Refreshed) => {}
        Err(e) => warn!("Sync: Failed to persist remote snapshot: {}", e),
    }
}
