//! In-process remote for tests and offline demos.
//!
//! Behaves like the live store: every mutation notifies all subscribers,
//! the client's own writes included. A `MemoryHandle` lets tests mutate
//! the store from outside the sync loop, standing in for other clients,
//! and flip the store unavailable to exercise degraded paths.

use super::{RemoteError, RemoteSnapshot};
use crate::tally::{Epoch, Tally};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::debug;

#[derive(Debug, Default)]
struct MemoryState {
    votes: BTreeMap<String, u64>,
    epoch: Option<Epoch>,
    unavailable: bool,
    watchers: Vec<mpsc::Sender<RemoteSnapshot>>,
}

impl MemoryState {
    fn snapshot(&self) -> RemoteSnapshot {
        RemoteSnapshot {
            tally: Tally::from_counts(&self.votes),
            epoch: self.epoch,
        }
    }
}

pub struct MemoryRemote {
    state: Arc<RwLock<MemoryState>>,
}

/// Cloneable view of the in-process store for use outside the sync loop.
#[derive(Clone)]
pub struct MemoryHandle {
    state: Arc<RwLock<MemoryState>>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(MemoryState::default())),
        }
    }

    pub fn handle(&self) -> MemoryHandle {
        MemoryHandle {
            state: self.state.clone(),
        }
    }

    pub async fn fetch_snapshot(&self) -> Result<RemoteSnapshot, RemoteError> {
        let state = self.state.read().await;
        if state.unavailable {
            return Err(RemoteError::Unavailable("store marked unavailable".to_string()));
        }
        Ok(state.snapshot())
    }

    pub async fn increment(&self, key: &str) -> Result<(), RemoteError> {
        {
            let mut state = self.state.write().await;
            if state.unavailable {
                return Err(RemoteError::Unavailable("store marked unavailable".to_string()));
            }
            let slot = state.votes.entry(key.to_string()).or_insert(0);
            *slot = slot.saturating_add(1);
        }
        notify(&self.state).await;
        Ok(())
    }

    pub async fn push_full(
        &self,
        votes: &BTreeMap<String, u64>,
        epoch: Epoch,
    ) -> Result<(), RemoteError> {
        {
            let mut state = self.state.write().await;
            if state.unavailable {
                return Err(RemoteError::Unavailable("store marked unavailable".to_string()));
            }
            state.votes = votes.clone();
            state.epoch = Some(epoch);
        }
        notify(&self.state).await;
        Ok(())
    }

    pub async fn subscribe(&self) -> mpsc::Receiver<RemoteSnapshot> {
        let (tx, rx) = mpsc::channel(32);
        self.state.write().await.watchers.push(tx);
        rx
    }
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryHandle {
    /// Replace the store contents as another client would, notifying all
    /// subscribers.
    pub async fn set_state(&self, votes: BTreeMap<String, u64>, epoch: Option<Epoch>) {
        {
            let mut state = self.state.write().await;
            state.votes = votes;
            state.epoch = epoch;
        }
        notify(&self.state).await;
    }

    pub async fn set_unavailable(&self, unavailable: bool) {
        self.state.write().await.unavailable = unavailable;
    }

    pub async fn count(&self, key: &str) -> u64 {
        self.state
            .read()
            .await
            .votes
            .get(key)
            .copied()
            .unwrap_or(0)
    }

    pub async fn epoch(&self) -> Option<Epoch> {
        self.state.read().await.epoch
    }

    pub async fn snapshot(&self) -> RemoteSnapshot {
        self.state.read().await.snapshot()
    }
}

/// Deliver the current snapshot to every watcher. Senders are cloned out
/// so no lock is held across the sends.
async fn notify(state: &Arc<RwLock<MemoryState>>) {
    let (snapshot, watchers) = {
        let state = state.read().await;
        (state.snapshot(), state.watchers.clone())
    };
    for watcher in watchers {
        if watcher.send(snapshot.clone()).await.is_err() {
            debug!("Remote: Dropping notification for a gone subscriber");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tally::VoteKind;

    #[tokio::test]
    async fn test_increment_and_fetch() {
        let remote = MemoryRemote::new();

        remote.increment("RUS").await.unwrap();
        remote.increment("RUS").await.unwrap();
        remote.increment("CHN_unknown").await.unwrap();

        let snapshot = remote.fetch_snapshot().await.unwrap();
        assert_eq!(snapshot.tally.count("RUS", VoteKind::For), 2);
        assert_eq!(snapshot.tally.count("CHN", VoteKind::Unknown), 1);
        assert_eq!(snapshot.epoch, None);
    }

    #[tokio::test]
    async fn test_increment_saturates_at_max() {
        let remote = MemoryRemote::new();
        remote
            .handle()
            .set_state(BTreeMap::from([("RUS".to_string(), u64::MAX)]), None)
            .await;

        remote.increment("RUS").await.unwrap();
        assert_eq!(remote.handle().count("RUS").await, u64::MAX);
    }

    #[tokio::test]
    async fn test_unavailable_store_rejects_traffic() {
        let remote = MemoryRemote::new();
        remote.handle().set_unavailable(true).await;

        assert!(remote.fetch_snapshot().await.is_err());
        assert!(remote.increment("RUS").await.is_err());
        assert!(remote.push_full(&BTreeMap::new(), 1).await.is_err());

        remote.handle().set_unavailable(false).await;
        assert!(remote.fetch_snapshot().await.is_ok());
    }

    #[tokio::test]
    async fn test_subscribers_see_mutations() {
        let remote = MemoryRemote::new();
        let mut feed = remote.subscribe().await;

        remote.increment("FRA").await.unwrap();
        let snapshot = feed.recv().await.unwrap();
        assert_eq!(snapshot.tally.count("FRA", VoteKind::For), 1);

        remote
            .handle()
            .set_state(BTreeMap::from([("DEU".to_string(), 4)]), Some(1000))
            .await;
        let snapshot = feed.recv().await.unwrap();
        assert_eq!(snapshot.tally.count("DEU", VoteKind::For), 4);
        assert_eq!(snapshot.epoch, Some(1000));
    }

    #[tokio::test]
    async fn test_push_full_replaces_state() {
        let remote = MemoryRemote::new();
        remote.increment("RUS").await.unwrap();

        let zeroed = Tally::new().to_wire_map();
        remote.push_full(&zeroed, 42).await.unwrap();

        let snapshot = remote.fetch_snapshot().await.unwrap();
        assert_eq!(snapshot.tally.count("RUS", VoteKind::For), 0);
        assert_eq!(snapshot.epoch, Some(42));
        // Explicit zeros are data, not a blank store.
        assert!(!snapshot.is_blank());
    }
}
