//! Remote counter-store strategies.
//!
//! The shared tally lives in a remote key/value counter store. Three
//! interchangeable strategies talk to it:
//! - `RestRemote`: stateless HTTP polling against a JSON document store
//! - `LiveRemote`: persistent WebSocket session with server push
//! - `MemoryRemote`: in-process store
//!
//! A strategy is owned by the sync loop alone. The engine never calls the
//! remote directly; it queues `RemoteCommand`s instead.

pub mod live;
pub mod memory;
pub mod rest;

pub use live::LiveRemote;
pub use memory::{MemoryHandle, MemoryRemote};
pub use rest::RestRemote;

use crate::tally::{Epoch, Tally};
use std::collections::BTreeMap;
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors from remote traffic.
#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("remote sync is disabled")]
    Disabled,
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("unexpected status: {0}")]
    Status(reqwest::StatusCode),
    #[error("invalid payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("connection closed")]
    ConnectionClosed,
    #[error("request timed out")]
    Timeout,
    #[error("remote unavailable: {0}")]
    Unavailable(String),
}

/// One observation of the remote store.
#[derive(Debug, Clone)]
pub struct RemoteSnapshot {
    pub tally: Tally,
    pub epoch: Option<Epoch>,
}

impl RemoteSnapshot {
    /// An untouched remote: no counts and no reset epoch ever written.
    pub fn is_blank(&self) -> bool {
        self.tally.is_empty() && self.epoch.is_none()
    }
}

/// Outbound work queued by the engine for the sync loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCommand {
    /// Bump one counter key by 1.
    Increment { key: String },
    /// Replace the whole remote document, counters and reset epoch both.
    PushFull {
        votes: BTreeMap<String, u64>,
        epoch: Epoch,
    },
}

/// A configured remote strategy.
pub enum Remote {
    Disabled,
    Rest(RestRemote),
    Live(LiveRemote),
    Memory(MemoryRemote),
}

impl Remote {
    pub fn kind(&self) -> &'static str {
        match self {
            Remote::Disabled => "off",
            Remote::Rest(_) => "rest",
            Remote::Live(_) => "live",
            Remote::Memory(_) => "memory",
        }
    }

    /// Reads the current remote tally and reset epoch.
    pub async fn fetch_snapshot(&mut self) -> Result<RemoteSnapshot, RemoteError> {
        match self {
            Remote::Disabled => Err(RemoteError::Disabled),
            Remote::Rest(rest) => rest.fetch_snapshot().await,
            Remote::Live(live) => live.fetch_snapshot().await,
            Remote::Memory(memory) => memory.fetch_snapshot().await,
        }
    }

    /// Bumps a single counter key.
    pub async fn increment(&mut self, key: &str) -> Result<(), RemoteError> {
        match self {
            Remote::Disabled => Err(RemoteError::Disabled),
            Remote::Rest(rest) => rest.increment(key).await,
            Remote::Live(live) => live.increment(key).await,
            Remote::Memory(memory) => memory.increment(key).await,
        }
    }

    /// Replaces the remote counters and reset epoch wholesale.
    pub async fn push_full(
        &mut self,
        votes: &BTreeMap<String, u64>,
        epoch: Epoch,
    ) -> Result<(), RemoteError> {
        match self {
            Remote::Disabled => Err(RemoteError::Disabled),
            Remote::Rest(rest) => rest.push_full(votes, epoch).await,
            Remote::Live(live) => live.push_full(votes, epoch).await,
            Remote::Memory(memory) => memory.push_full(votes, epoch).await,
        }
    }

    /// Starts the change feed for this strategy. REST polls on an interval,
    /// live receives server push, memory notifies on mutation. The disabled
    /// strategy returns a channel that never delivers.
    pub async fn subscribe(&mut self) -> mpsc::Receiver<RemoteSnapshot> {
        match self {
            Remote::Disabled => {
                // Closed channel, the sync loop treats it as a silent feed.
                let (_tx, rx) = mpsc::channel(1);
                rx
            }
            Remote::Rest(rest) => rest.subscribe(),
            Remote::Live(live) => live.subscribe(),
            Remote::Memory(memory) => memory.subscribe().await,
        }
    }
}
