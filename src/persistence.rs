//! Persistence: the hard state a node must fsync before replying to any
//! RPC or casting any vote — `currentTerm` and `votedFor`.
//!
//! Grounded on `persistence/state_store.rs`'s atomic tmp-file-then-rename
//! write path, stripped of its write-ahead log, snapshot registry, and
//! checksum bookkeeping: the hard state is two small fields rewritten in
//! full on every change, not a large structure worth incrementally
//! logging.

use crate::error::{Error, Result};
use crate::types::{NodeId, Term};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::info;

/// The state a node must never lose across a restart: the term it has
/// seen, and who (if anyone) it voted for in that term.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct HardState {
    pub current_term: Term,
    pub voted_for: Option<NodeId>,
}

/// Durable store for [`HardState`], written atomically on every change.
pub struct PersistentState {
    path: PathBuf,
    state: HardState,
}

impl PersistentState {
    /// Load hard state from `path`, defaulting to term 0 / no vote if the
    /// file does not yet exist.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let state = Self::load(&path).await?;
        info!(term = state.current_term, "loaded hard state");
        Ok(Self { path, state })
    }

    /// In-memory-only store, for tests that don't need durability.
    pub fn in_memory() -> Self {
        Self {
            path: PathBuf::new(),
            state: HardState::default(),
        }
    }

    pub fn current_term(&self) -> Term {
        self.state.current_term
    }

    pub fn voted_for(&self) -> Option<&NodeId> {
        self.state.voted_for.as_ref()
    }

    /// Advance to `term` with no vote cast yet, fsyncing before returning:
    /// a node must persist its term before replying to the RPC that
    /// revealed it.
    pub async fn set_term(&mut self, term: Term) -> Result<()> {
        self.state.current_term = term;
        self.state.voted_for = None;
        self.save().await
    }

    /// Record a vote for `candidate` in the current term, fsyncing before
    /// returning: a node must persist its vote before granting it.
    pub async fn record_vote(&mut self, candidate: NodeId) -> Result<()> {
        self.state.voted_for = Some(candidate);
        self.save().await
    }

    async fn save(&self) -> Result<()> {
        if self.path.as_os_str().is_empty() {
            return Ok(());
        }
        let tmp_path = self.path.with_extension("tmp");
        let bytes = bincode::serialize(&self.state)
            .map_err(|e| Error::persistence(format!("encoding hard state: {e}")))?;
        let mut tmp = File::create(&tmp_path)
            .await
            .map_err(|e| Error::persistence(format!("creating hard state file: {e}")))?;
        tmp.write_all(&bytes)
            .await
            .map_err(|e| Error::persistence(format!("writing hard state: {e}")))?;
        tmp.sync_all()
            .await
            .map_err(|e| Error::persistence(format!("fsyncing hard state: {e}")))?;
        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .map_err(|e| Error::persistence(format!("installing hard state: {e}")))?;
        Ok(())
    }

    async fn load(path: &Path) -> Result<HardState> {
        if !path.exists() {
            return Ok(HardState::default());
        }
        let mut file = File::open(path)
            .await
            .map_err(|e| Error::persistence(format!("opening hard state file: {e}")))?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)
            .await
            .map_err(|e| Error::persistence(format!("reading hard state file: {e}")))?;
        bincode::deserialize(&bytes)
            .map_err(|e| Error::persistence(format!("decoding hard state: {e}")))
    }
}
