//! REST strategy: stateless HTTP against a JSON document store.
//!
//! The store exposes the whole tally at `votes.json`, one counter at
//! `votes/{key}.json` and the reset epoch at `resetTimestamp.json`. There
//! is no change feed, so subscribing spawns an interval poller that
//! re-reads the whole document.

use super::{RemoteError, RemoteSnapshot};
use crate::tally::{self, Tally};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant};
use tracing::{debug, warn};

#[derive(Clone)]
pub struct RestRemote {
    client: reqwest::Client,
    base_url: String,
    poll_interval: Duration,
}

impl RestRemote {
    pub fn new(base_url: &str, poll_interval: Duration, request_timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            poll_interval,
        }
    }

    fn votes_url(&self) -> String {
        format!("{}/votes.json", self.base_url)
    }

    fn counter_url(&self, key: &str) -> String {
        format!("{}/votes/{}.json", self.base_url, key)
    }

    fn epoch_url(&self) -> String {
        format!("{}/resetTimestamp.json", self.base_url)
    }

    /// Reads the whole tally document plus the reset epoch.
    pub async fn fetch_snapshot(&self) -> Result<RemoteSnapshot, RemoteError> {
        let response = self.client.get(self.votes_url()).send().await?;
        if !response.status().is_success() {
            return Err(RemoteError::Status(response.status()));
        }
        let votes: Value = response.json().await?;

        // An absent epoch document reads as null; a failed read is treated
        // the same so a flaky epoch endpoint cannot block tally refreshes.
        let epoch_value = match self.client.get(self.epoch_url()).send().await {
            Ok(response) if response.status().is_success() => {
                response.json().await.unwrap_or(Value::Null)
            }
            _ => Value::Null,
        };

        let tally = match &votes {
            Value::Object(map) => Tally::from_wire_map(map),
            _ => Tally::new(),
        };

        Ok(RemoteSnapshot {
            tally,
            epoch: tally::parse_epoch(&epoch_value),
        })
    }

    /// Bumps one counter with a read-modify-write. Not transactional; the
    /// live strategy is the path for contended counters. A failed read
    /// counts as 0 so a fresh key can still be created.
    pub async fn increment(&self, key: &str) -> Result<(), RemoteError> {
        let url = self.counter_url(key);

        let current = match self.client.get(&url).send().await {
            Ok(response) if response.status().is_success() => {
                let value: Value = response.json().await.unwrap_or(Value::Null);
                tally::coerce_count(&value)
            }
            _ => 0,
        };

        let next = current.saturating_add(1);
        let response = self.client.put(&url).json(&next).send().await?;
        if !response.status().is_success() {
            return Err(RemoteError::Status(response.status()));
        }

        debug!("Remote: Incremented {} to {}", key, next);
        Ok(())
    }

    /// Replaces the counters document and the reset epoch.
    pub async fn push_full(
        &self,
        votes: &BTreeMap<String, u64>,
        epoch: tally::Epoch,
    ) -> Result<(), RemoteError> {
        let response = self.client.put(self.votes_url()).json(votes).send().await?;
        if !response.status().is_success() {
            return Err(RemoteError::Status(response.status()));
        }

        let response = self
            .client
            .put(self.epoch_url())
            .json(&epoch)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(RemoteError::Status(response.status()));
        }

        debug!("Remote: Pushed full snapshot (epoch {})", epoch);
        Ok(())
    }

    /// Spawns the poll loop. The first poll happens one interval after the
    /// subscription, and failed polls are skipped. The loop ends when the
    /// receiving side is dropped.
    pub fn subscribe(&self) -> mpsc::Receiver<RemoteSnapshot> {
        let (tx, rx) = mpsc::channel(16);
        let poller = self.clone();

        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + poller.poll_interval, poller.poll_interval);
            loop {
                ticker.tick().await;
                match poller.fetch_snapshot().await {
                    Ok(snapshot) => {
                        if tx.send(snapshot).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("Remote: Poll failed: {}", e),
                }
            }
            debug!("Remote: Poll loop stopped");
        });

        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote(base: &str) -> RestRemote {
        RestRemote::new(base, Duration::from_secs(2), Duration::from_secs(10))
    }

    #[test]
    fn test_url_building() {
        let remote = remote("https://example.com/db");
        assert_eq!(remote.votes_url(), "https://example.com/db/votes.json");
        assert_eq!(
            remote.counter_url("RUS_unknown"),
            "https://example.com/db/votes/RUS_unknown.json"
        );
        assert_eq!(
            remote.epoch_url(),
            "https://example.com/db/resetTimestamp.json"
        );
    }

    #[test]
    fn test_trailing_slash_is_normalized() {
        let remote = remote("https://example.com/db/");
        assert_eq!(remote.votes_url(), "https://example.com/db/votes.json");
    }
}
