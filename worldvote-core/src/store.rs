//! Local persistent vote store.
//!
//! One file per key under a data directory:
//! - `votes.json`: tally wire map
//! - `ballots.json`: this client's cast ballot keys
//! - `reset_epoch`: last observed reset epoch, stringified
//! - `admin_active`: present (containing `true`) while the admin role is held
//!
//! Loads are total: a missing file reads as the default, a corrupt one is
//! logged and dropped, never an error either way. Saves go through a temp
//! file + rename and report I/O failures to the caller.

use crate::tally::{BallotSet, Epoch, Tally};
use serde_json::Value;
use std::fs;
use std::io;
use std::path::PathBuf;
use tracing::{debug, warn};

/// Store configuration
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Base directory for store files
    pub dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./worldvote-data"),
        }
    }
}

/// Persistence contract for the reconciliation engine.
///
/// Loads never fail the caller; saves surface `io::Error` (silent loss of
/// a cast vote is the one failure the engine must not swallow).
pub trait VoteStore {
    fn load_tally(&self) -> Tally;
    fn save_tally(&mut self, tally: &Tally) -> io::Result<()>;

    fn load_epoch(&self) -> Option<Epoch>;
    fn save_epoch(&mut self, epoch: Epoch) -> io::Result<()>;

    fn load_ballots(&self) -> BallotSet;
    fn save_ballots(&mut self, ballots: &BallotSet) -> io::Result<()>;
    fn clear_ballots(&mut self) -> io::Result<()>;

    fn load_admin_active(&self) -> bool;
    fn save_admin_active(&mut self, active: bool) -> io::Result<()>;
}

const TALLY_FILE: &str = "votes.json";
const BALLOTS_FILE: &str = "ballots.json";
const EPOCH_FILE: &str = "reset_epoch";
const ADMIN_FILE: &str = "admin_active";

/// File-backed store
pub struct FileStore {
    config: StoreConfig,
}

impl FileStore {
    /// Create the store, making the data directory if needed
    pub fn new(config: StoreConfig) -> io::Result<Self> {
        fs::create_dir_all(&config.dir)?;
        Ok(Self { config })
    }

    /// Open a store rooted at `dir`
    pub fn open(dir: impl Into<PathBuf>) -> io::Result<Self> {
        Self::new(StoreConfig { dir: dir.into() })
    }

    fn path(&self, name: &str) -> PathBuf {
        self.config.dir.join(name)
    }

    /// Write via temp file + rename so readers never see a torn file
    fn write_atomic(&self, name: &str, contents: &str) -> io::Result<()> {
        let path = self.path(name);
        let temp_path = self.path(&format!("{}.tmp", name));
        fs::write(&temp_path, contents)?;
        fs::rename(&temp_path, &path)?;
        Ok(())
    }

    fn read_existing(&self, name: &str) -> Option<String> {
        let path = self.path(name);
        if !path.exists() {
            return None;
        }
        match fs::read_to_string(&path) {
            Ok(data) => Some(data),
            Err(e) => {
                warn!("Store: Failed to read {:?}: {}", path, e);
                None
            }
        }
    }
}

impl VoteStore for FileStore {
    fn load_tally(&self) -> Tally {
        let data = match self.read_existing(TALLY_FILE) {
            Some(d) => d,
            None => return Tally::new(),
        };
        match serde_json::from_str::<Value>(&data) {
            Ok(Value::Object(map)) => Tally::from_wire_map(&map),
            Ok(other) => {
                warn!("Store: Tally file is not an object ({}), starting empty", other);
                Tally::new()
            }
            Err(e) => {
                warn!("Store: Failed to parse tally file: {}", e);
                Tally::new()
            }
        }
    }

    fn save_tally(&mut self, tally: &Tally) -> io::Result<()> {
        let data = serde_json::to_string_pretty(&tally.to_wire_map())?;
        self.write_atomic(TALLY_FILE, &data)?;
        debug!("Store: Saved tally");
        Ok(())
    }

    fn load_epoch(&self) -> Option<Epoch> {
        let data = self.read_existing(EPOCH_FILE)?;
        match data.trim().parse::<Epoch>() {
            Ok(epoch) => Some(epoch),
            Err(e) => {
                warn!("Store: Failed to parse reset epoch {:?}: {}", data.trim(), e);
                None
            }
        }
    }

    fn save_epoch(&mut self, epoch: Epoch) -> io::Result<()> {
        self.write_atomic(EPOCH_FILE, &epoch.to_string())?;
        debug!("Store: Saved reset epoch {}", epoch);
        Ok(())
    }

    fn load_ballots(&self) -> BallotSet {
        let data = match self.read_existing(BALLOTS_FILE) {
            Some(d) => d,
            None => return BallotSet::new(),
        };
        match serde_json::from_str::<BallotSet>(&data) {
            Ok(ballots) => ballots,
            Err(e) => {
                warn!("Store: Failed to parse ballots file: {}", e);
                BallotSet::new()
            }
        }
    }

    fn save_ballots(&mut self, ballots: &BallotSet) -> io::Result<()> {
        let data = serde_json::to_string(ballots)?;
        self.write_atomic(BALLOTS_FILE, &data)?;
        debug!("Store: Saved {} ballot keys", ballots.len());
        Ok(())
    }

    fn clear_ballots(&mut self) -> io::Result<()> {
        let path = self.path(BALLOTS_FILE);
        if path.exists() {
            fs::remove_file(&path)?;
        }
        debug!("Store: Cleared ballots");
        Ok(())
    }

    fn load_admin_active(&self) -> bool {
        self.read_existing(ADMIN_FILE)
            .map(|data| data.trim() == "true")
            .unwrap_or(false)
    }

    fn save_admin_active(&mut self, active: bool) -> io::Result<()> {
        if active {
            self.write_atomic(ADMIN_FILE, "true")?;
        } else {
            let path = self.path(ADMIN_FILE);
            if path.exists() {
                fs::remove_file(&path)?;
            }
        }
        Ok(())
    }
}

/// In-memory store for tests and ephemeral runs
#[derive(Debug, Default)]
pub struct MemoryStore {
    tally: Tally,
    epoch: Option<Epoch>,
    ballots: BallotSet,
    admin: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl VoteStore for MemoryStore {
    fn load_tally(&self) -> Tally {
        self.tally.clone()
    }

    fn save_tally(&mut self, tally: &Tally) -> io::Result<()> {
        self.tally = tally.clone();
        Ok(())
    }

    fn load_epoch(&self) -> Option<Epoch> {
        self.epoch
    }

    fn save_epoch(&mut self, epoch: Epoch) -> io::Result<()> {
        self.epoch = Some(epoch);
        Ok(())
    }

    fn load_ballots(&self) -> BallotSet {
        self.ballots.clone()
    }

    fn save_ballots(&mut self, ballots: &BallotSet) -> io::Result<()> {
        self.ballots = ballots.clone();
        Ok(())
    }

    fn clear_ballots(&mut self) -> io::Result<()> {
        self.ballots.clear();
        Ok(())
    }

    fn load_admin_active(&self) -> bool {
        self.admin
    }

    fn save_admin_active(&mut self, active: bool) -> io::Result<()> {
        self.admin = active;
        Ok(())
    }
}
