//! Worldvote Core Library
//!
//! Vote-state reconciliation for a shared country poll. Keeps a local
//! persistent tally in sync with a remote counter store, enforces
//! one-ballot-per-country eligibility and handles multi-client resets
//! through monotonic reset epochs.

pub mod config;
pub mod country;
pub mod reconcile;
pub mod remote;
pub mod render;
pub mod stats;
pub mod store;
pub mod sync;
pub mod tally;

pub use config::{RemoteMode, SyncConfig};
pub use country::{Country, COUNTRIES};
pub use reconcile::{EngineEvent, MergeDecision, Reconciler, VoteError, VoteReceipt};
pub use remote::{Remote, RemoteCommand, RemoteError, RemoteSnapshot};
pub use stats::{compute_stats, percentage, TallyStats};
pub use store::{FileStore, MemoryStore, StoreConfig, VoteStore};
pub use sync::run_sync_loop;
pub use tally::{BallotSet, Epoch, Tally, VoteKind};
