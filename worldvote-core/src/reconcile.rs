//! Vote-state reconciliation engine.
//!
//! The `Reconciler` owns the local copy of the shared tally, the client's
//! own ballot record, and the last observed reset epoch. All mutations go
//! through it:
//! - `cast_vote` applies an eligibility-gated increment to local state
//!   before any remote traffic is issued
//! - `apply_remote_snapshot` folds a remote tally in, clearing the ballot
//!   record exactly once per distinct reset epoch
//! - `admin_reset` zeroes the tally and mints a strictly newer epoch
//!
//! Remote traffic leaves through a fire-and-forget command channel that the
//! sync loop drains. Observers (the interactive shell, tests) subscribe to
//! engine events over a broadcast channel.

use crate::country;
use crate::remote::{RemoteCommand, RemoteSnapshot};
use crate::stats::{self, TallyStats};
use crate::store::VoteStore;
use crate::tally::{self, BallotSet, Epoch, Tally, VoteKind};
use std::io;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

/// Why a vote cast was refused.
#[derive(Error, Debug)]
pub enum VoteError {
    #[error("already voted for {code}")]
    AlreadyVoted { code: String },
    #[error("unknown country code: {0}")]
    UnknownCountry(String),
    #[error("store error: {0}")]
    Store(#[from] io::Error),
}

/// How a remote snapshot was folded into local state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeDecision {
    /// Tally adopted, ballot record and epoch untouched.
    Refreshed,
    /// New reset epoch observed: tally adopted wholesale, ballots cleared.
    ResetApplied,
}

/// State changes broadcast to observers.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    VoteCast { code: String, kind: VoteKind },
    AdminReset { epoch: Epoch },
    RemoteUpdate { decision: MergeDecision },
}

/// Snapshot handed back to the caller after a successful cast.
#[derive(Debug, Clone)]
pub struct VoteReceipt {
    pub tally: Tally,
    pub stats: TallyStats,
}

/// Reconciliation engine over a persistent vote store.
pub struct Reconciler<S: VoteStore> {
    store: S,
    tally: Tally,
    ballots: BallotSet,
    epoch: Option<Epoch>,
    is_admin: bool,
    remote_tx: mpsc::Sender<RemoteCommand>,
    events: broadcast::Sender<EngineEvent>,
}

impl<S: VoteStore> Reconciler<S> {
    /// Loads persisted state from the store and wires up the outbound
    /// command channel. The admin flag persisted in the store is ORed with
    /// the caller's flag; callers that want the role to survive restarts
    /// persist it through `set_admin`.
    pub fn open(store: S, is_admin: bool, remote_tx: mpsc::Sender<RemoteCommand>) -> Self {
        let tally = store.load_tally();
        let ballots = store.load_ballots();
        let epoch = store.load_epoch();
        let is_admin = is_admin || store.load_admin_active();
        let (events, _) = broadcast::channel(32);

        info!(
            "Engine: Loaded state ({} votes, {} ballot keys, epoch {:?})",
            stats::compute_stats(&tally).total,
            ballots.len(),
            epoch
        );

        Self {
            store,
            tally,
            ballots,
            epoch,
            is_admin,
            remote_tx,
            events,
        }
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub fn tally(&self) -> &Tally {
        &self.tally
    }

    pub fn stats(&self) -> TallyStats {
        stats::compute_stats(&self.tally)
    }

    pub fn epoch(&self) -> Option<Epoch> {
        self.epoch
    }

    pub fn is_admin(&self) -> bool {
        self.is_admin
    }

    /// True if this client already holds a ballot (of either kind) for the
    /// given country.
    pub fn has_ballot(&self, code: &str) -> bool {
        tally::has_any_ballot(&self.ballots, code)
    }

    /// Flips the admin role and persists it.
    pub fn set_admin(&mut self, active: bool) -> io::Result<()> {
        self.is_admin = active;
        self.store.save_admin_active(active)?;
        info!("Engine: Admin mode {}", if active { "on" } else { "off" });
        Ok(())
    }

    /// Casts a vote for `code`. A country accepts one ballot per client,
    /// FOR and "don't know" included, unless the admin role is active.
    /// Local state is updated and persisted before the remote increment is
    /// queued, so a dead remote never loses the vote.
    pub fn cast_vote(&mut self, code: &str, kind: VoteKind) -> Result<VoteReceipt, VoteError> {
        if !country::is_known(code) {
            return Err(VoteError::UnknownCountry(code.to_string()));
        }
        if !self.is_admin && tally::has_any_ballot(&self.ballots, code) {
            debug!("Engine: Repeat vote for {} rejected", code);
            return Err(VoteError::AlreadyVoted {
                code: code.to_string(),
            });
        }

        self.tally.increment(code, kind);
        self.store.save_tally(&self.tally)?;

        if !self.is_admin {
            self.ballots.insert(kind.ballot_key(code));
            self.store.save_ballots(&self.ballots)?;
        }

        // Best effort. The sync loop may be gone or busy, and the vote
        // stands either way.
        let command = RemoteCommand::Increment {
            key: kind.ballot_key(code),
        };
        if self.remote_tx.try_send(command).is_err() {
            debug!("Engine: Remote increment for {} not queued", code);
        }

        info!("Engine: Vote cast for {} ({:?})", code, kind);
        let _ = self.events.send(EngineEvent::VoteCast {
            code: code.to_string(),
            kind,
        });

        Ok(self.receipt())
    }

    /// Folds a remote snapshot into local state.
    ///
    /// A remote epoch differing from the stored one (including the first
    /// epoch ever observed) marks a new vote generation: the remote tally
    /// is adopted wholesale, the ballot record is cleared, and the epoch is
    /// stored so the same reset is never applied twice. Otherwise the
    /// remote tally only refreshes the local copy and ballots stay.
    pub fn apply_remote_snapshot(&mut self, snapshot: RemoteSnapshot) -> io::Result<MergeDecision> {
        let decision = match snapshot.epoch {
            Some(remote_epoch) if self.epoch != Some(remote_epoch) => {
                info!(
                    "Engine: Reset epoch {} observed (was {:?}), clearing ballots",
                    remote_epoch, self.epoch
                );
                self.tally = snapshot.tally;
                self.store.save_tally(&self.tally)?;
                self.ballots.clear();
                self.store.clear_ballots()?;
                self.epoch = Some(remote_epoch);
                self.store.save_epoch(remote_epoch)?;
                MergeDecision::ResetApplied
            }
            _ => {
                self.tally = snapshot.tally;
                self.store.save_tally(&self.tally)?;
                debug!("Engine: Tally refreshed from remote");
                MergeDecision::Refreshed
            }
        };

        let _ = self.events.send(EngineEvent::RemoteUpdate { decision });
        Ok(decision)
    }

    /// Zeroes the tally, clears all ballots and mints a reset epoch that is
    /// strictly greater than the previous one. The new state is persisted
    /// and pushed to the remote as a full snapshot; the local reset stands
    /// even if the push is never delivered.
    pub fn admin_reset(&mut self) -> io::Result<Epoch> {
        let epoch = tally::mint_epoch(self.epoch);

        self.tally = Tally::new();
        self.store.save_tally(&self.tally)?;
        self.ballots.clear();
        self.store.clear_ballots()?;
        self.epoch = Some(epoch);
        self.store.save_epoch(epoch)?;

        let command = RemoteCommand::PushFull {
            votes: self.tally.to_wire_map(),
            epoch,
        };
        if self.remote_tx.try_send(command).is_err() {
            warn!("Engine: Reset push not queued, remote will lag until the next reset");
        }

        info!("Engine: Votes reset, new epoch {}", epoch);
        let _ = self.events.send(EngineEvent::AdminReset { epoch });
        Ok(epoch)
    }

    fn receipt(&self) -> VoteReceipt {
        VoteReceipt {
            tally: self.tally.clone(),
            stats: self.stats(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{FileStore, MemoryStore};
    use std::collections::BTreeMap;

    fn engine() -> (Reconciler<MemoryStore>, mpsc::Receiver<RemoteCommand>) {
        let (tx, rx) = mpsc::channel(16);
        (Reconciler::open(MemoryStore::new(), false, tx), rx)
    }

    fn admin_engine() -> (Reconciler<MemoryStore>, mpsc::Receiver<RemoteCommand>) {
        let (tx, rx) = mpsc::channel(16);
        (Reconciler::open(MemoryStore::new(), true, tx), rx)
    }

    fn snapshot(counts: &[(&str, u64)], epoch: Option<Epoch>) -> RemoteSnapshot {
        let map: BTreeMap<String, u64> =
            counts.iter().map(|(k, v)| (k.to_string(), *v)).collect();
        RemoteSnapshot {
            tally: Tally::from_counts(&map),
            epoch,
        }
    }

    #[test]
    fn test_cast_vote_updates_tally_and_receipt() {
        let (mut engine, _rx) = engine();

        let receipt = engine.cast_vote("RUS", VoteKind::For).unwrap();
        assert_eq!(receipt.tally.count("RUS", VoteKind::For), 1);
        assert_eq!(receipt.stats.total, 1);
        assert_eq!(receipt.stats.total_for, 1);
        assert!(engine.has_ballot("RUS"));
    }

    #[test]
    fn test_double_vote_rejected_and_tally_increments_once() {
        let (mut engine, _rx) = engine();

        engine.cast_vote("CHN", VoteKind::For).unwrap();
        let second = engine.cast_vote("CHN", VoteKind::For);
        match second {
            Err(VoteError::AlreadyVoted { code }) => assert_eq!(code, "CHN"),
            other => panic!("Expected AlreadyVoted, got {:?}", other.map(|r| r.stats)),
        }
        assert_eq!(engine.tally().count("CHN", VoteKind::For), 1);
    }

    #[test]
    fn test_for_vote_blocks_unknown_vote() {
        let (mut engine, _rx) = engine();
        engine.cast_vote("ITA", VoteKind::For).unwrap();
        assert!(matches!(
            engine.cast_vote("ITA", VoteKind::Unknown),
            Err(VoteError::AlreadyVoted { .. })
        ));
    }

    #[test]
    fn test_unknown_vote_blocks_for_vote() {
        let (mut engine, _rx) = engine();
        engine.cast_vote("ITA", VoteKind::Unknown).unwrap();
        assert!(matches!(
            engine.cast_vote("ITA", VoteKind::For),
            Err(VoteError::AlreadyVoted { .. })
        ));
    }

    #[test]
    fn test_admin_bypasses_ballot_gate() {
        let (mut engine, _rx) = admin_engine();

        for _ in 0..3 {
            engine.cast_vote("UZB", VoteKind::For).unwrap();
        }
        assert_eq!(engine.tally().count("UZB", VoteKind::For), 3);
        // Admin casts leave no ballot behind.
        assert!(!engine.has_ballot("UZB"));
    }

    #[test]
    fn test_unknown_country_is_rejected() {
        let (mut engine, _rx) = engine();
        assert!(matches!(
            engine.cast_vote("ZZZ", VoteKind::For),
            Err(VoteError::UnknownCountry(_))
        ));
        assert!(engine.tally().is_empty());
    }

    #[test]
    fn test_cast_queues_remote_increment() {
        let (mut engine, mut rx) = engine();

        engine.cast_vote("RUS", VoteKind::For).unwrap();
        engine.cast_vote("CHN", VoteKind::Unknown).unwrap();

        assert_eq!(
            rx.try_recv().unwrap(),
            RemoteCommand::Increment {
                key: "RUS".to_string()
            }
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            RemoteCommand::Increment {
                key: "CHN_unknown".to_string()
            }
        );
    }

    #[test]
    fn test_cast_survives_closed_command_channel() {
        let (mut engine, rx) = engine();
        drop(rx);

        let receipt = engine.cast_vote("FRA", VoteKind::For).unwrap();
        assert_eq!(receipt.tally.count("FRA", VoteKind::For), 1);
    }

    #[test]
    fn test_state_survives_reopen() -> std::io::Result<()> {
        let dir = tempfile::tempdir()?;
        let (tx, _rx) = mpsc::channel(16);

        let mut engine = Reconciler::open(FileStore::open(dir.path())?, false, tx);
        engine.cast_vote("BLR", VoteKind::For).unwrap();
        drop(engine);

        let (tx, _rx) = mpsc::channel(16);
        let engine = Reconciler::open(FileStore::open(dir.path())?, false, tx);
        assert_eq!(engine.tally().count("BLR", VoteKind::For), 1);
        assert!(engine.has_ballot("BLR"));
        Ok(())
    }

    #[test]
    fn test_snapshot_without_epoch_refreshes_and_keeps_ballots() {
        let (mut engine, _rx) = engine();
        engine.cast_vote("RUS", VoteKind::For).unwrap();

        let decision = engine
            .apply_remote_snapshot(snapshot(&[("CHN", 5)], None))
            .unwrap();

        assert_eq!(decision, MergeDecision::Refreshed);
        // Adopted wholesale, the local RUS vote is gone from the tally.
        assert_eq!(engine.tally().count("RUS", VoteKind::For), 0);
        assert_eq!(engine.tally().count("CHN", VoteKind::For), 5);
        // But the ballot record survives.
        assert!(engine.has_ballot("RUS"));
    }

    #[test]
    fn test_epoch_change_clears_ballots_exactly_once() {
        let (mut engine, _rx) = engine();
        engine.cast_vote("RUS", VoteKind::For).unwrap();

        let first = engine
            .apply_remote_snapshot(snapshot(&[], Some(1000)))
            .unwrap();
        assert_eq!(first, MergeDecision::ResetApplied);
        assert!(!engine.has_ballot("RUS"));
        assert_eq!(engine.epoch(), Some(1000));

        // Eligible again after the reset.
        engine.cast_vote("RUS", VoteKind::For).unwrap();

        // The same epoch redelivered is a plain refresh, ballots stay.
        let again = engine
            .apply_remote_snapshot(snapshot(&[("RUS", 1)], Some(1000)))
            .unwrap();
        assert_eq!(again, MergeDecision::Refreshed);
        assert!(engine.has_ballot("RUS"));
    }

    #[test]
    fn test_first_observed_epoch_counts_as_reset() {
        let (mut engine, _rx) = engine();
        engine.cast_vote("DEU", VoteKind::Unknown).unwrap();
        assert_eq!(engine.epoch(), None);

        let decision = engine
            .apply_remote_snapshot(snapshot(&[("DEU", 2)], Some(2000)))
            .unwrap();

        assert_eq!(decision, MergeDecision::ResetApplied);
        assert!(!engine.has_ballot("DEU"));
        assert_eq!(engine.tally().count("DEU", VoteKind::For), 2);
    }

    #[test]
    fn test_huge_remote_counts_keep_stats_sane() {
        let (mut engine, _rx) = engine();

        engine
            .apply_remote_snapshot(snapshot(
                &[("RUS", u64::MAX), ("CHN", u64::MAX)],
                Some(1000),
            ))
            .unwrap();

        let stats = engine.stats();
        assert_eq!(stats.total_for, u64::MAX);
        assert_eq!(stats.total, u64::MAX);
        assert_eq!(stats.max_for, Some(u64::MAX));
    }

    #[test]
    fn test_admin_reset_restores_eligibility() {
        let (mut engine, _rx) = engine();
        engine.cast_vote("JPN", VoteKind::For).unwrap();
        assert!(matches!(
            engine.cast_vote("JPN", VoteKind::For),
            Err(VoteError::AlreadyVoted { .. })
        ));

        engine.admin_reset().unwrap();

        assert!(engine.tally().is_empty());
        engine.cast_vote("JPN", VoteKind::For).unwrap();
        assert_eq!(engine.tally().count("JPN", VoteKind::For), 1);
    }

    #[test]
    fn test_admin_reset_pushes_zeroed_snapshot() {
        let (mut engine, mut rx) = engine();
        engine
            .apply_remote_snapshot(snapshot(&[("RUS", 7)], Some(5000)))
            .unwrap();

        let epoch = engine.admin_reset().unwrap();
        assert!(epoch > 5000);

        match rx.try_recv().unwrap() {
            RemoteCommand::PushFull {
                votes,
                epoch: pushed,
            } => {
                assert_eq!(pushed, epoch);
                // Full wire map, every key explicit and zeroed.
                assert_eq!(votes.len(), crate::country::COUNTRIES.len() * 2);
                assert!(votes.values().all(|v| *v == 0));
            }
            other => panic!("Expected PushFull, got {:?}", other),
        }
    }

    #[test]
    fn test_admin_reset_epochs_strictly_increase() {
        let (mut engine, _rx) = engine();
        let first = engine.admin_reset().unwrap();
        let second = engine.admin_reset().unwrap();
        assert!(second > first);
    }

    #[test]
    fn test_events_are_broadcast() {
        let (mut engine, _rx) = engine();
        let mut events = engine.subscribe_events();

        engine.cast_vote("GBR", VoteKind::For).unwrap();
        match events.try_recv().unwrap() {
            EngineEvent::VoteCast { code, kind } => {
                assert_eq!(code, "GBR");
                assert_eq!(kind, VoteKind::For);
            }
            other => panic!("Expected VoteCast, got {:?}", other),
        }

        engine
            .apply_remote_snapshot(snapshot(&[], Some(1)))
            .unwrap();
        assert!(matches!(
            events.try_recv().unwrap(),
            EngineEvent::RemoteUpdate {
                decision: MergeDecision::ResetApplied
            }
        ));

        engine.admin_reset().unwrap();
        assert!(matches!(
            events.try_recv().unwrap(),
            EngineEvent::AdminReset { .. }
        ));
    }

    #[test]
    fn test_persisted_admin_flag_is_restored() {
        let mut store = MemoryStore::new();
        store.save_admin_active(true).unwrap();

        let (tx, _rx) = mpsc::channel(16);
        let engine = Reconciler::open(store, false, tx);
        assert!(engine.is_admin());
    }

    #[test]
    fn test_admin_role_survives_reopen() -> std::io::Result<()> {
        let dir = tempfile::tempdir()?;

        let (tx, _rx) = mpsc::channel(16);
        let mut engine = Reconciler::open(FileStore::open(dir.path())?, true, tx);
        engine.set_admin(true)?;
        drop(engine);

        // Reopened without the flag, the stored role still applies.
        let (tx, _rx) = mpsc::channel(16);
        let engine = Reconciler::open(FileStore::open(dir.path())?, false, tx);
        assert!(engine.is_admin());
        Ok(())
    }
}
