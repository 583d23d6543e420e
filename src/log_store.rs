//! Log Store: an append-only, rewritable-suffix ordered sequence of log
//! entries, with O(1) access to the last index/term and O(1) indexed
//! lookup.
//!
//! Grounded on `consensus/log_manager.rs`'s length-prefixed bincode
//! framing (`write_entry_to_disk`/`recover_from_log`), with its bounded
//! in-memory eviction dropped (a Raft log cannot forget entries that are
//! not yet applied everywhere) and its stubbed disk truncation replaced
//! with a real rewrite.

use crate::error::{Error, Result};
use crate::types::{LogEntry, LogIndex, Term};
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, warn};

/// Ordered, durable sequence of log entries. Indexes are zero-based;
/// `last_index()` returns `None` for an empty log (standing in for the
/// usual `lastIndex = -1` sentinel) and `last_term()` returns `0` in that
/// case.
pub struct LogStore {
    entries: Vec<LogEntry>,
    path: PathBuf,
}

impl LogStore {
    /// Open (and recover) the log file at `path`, creating it if absent.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = Self::recover(&path).await?;
        info!(recovered = entries.len(), "log store opened");
        Ok(Self { entries, path })
    }

    /// In-memory-only store, for tests that don't need durability.
    pub fn in_memory() -> Self {
        Self {
            entries: Vec::new(),
            path: PathBuf::new(),
        }
    }

    /// Append `entry`, durably persisting it before returning, and return
    /// its assigned index.
    pub async fn append(&mut self, entry: LogEntry) -> Result<LogIndex> {
        let index = self.entries.len() as LogIndex;
        self.write_entry(&entry).await?;
        self.entries.push(entry);
        debug!(index, "appended log entry");
        Ok(index)
    }

    /// Delete `index` and every entry after it. The leader never calls
    /// this; only a follower reconciling with a new leader's log does.
    pub async fn truncate_from(&mut self, index: LogIndex) -> Result<()> {
        if (index as usize) >= self.entries.len() {
            return Ok(());
        }
        self.entries.truncate(index as usize);
        self.rewrite_file().await?;
        warn!(from = index, "truncated log suffix");
        Ok(())
    }

    pub fn get(&self, index: LogIndex) -> Option<&LogEntry> {
        self.entries.get(index as usize)
    }

    pub fn term_at(&self, index: LogIndex) -> Option<Term> {
        self.get(index).map(|e| e.term)
    }

    /// Index of the last entry, or `None` if the log is empty.
    pub fn last_index(&self) -> Option<LogIndex> {
        if self.entries.is_empty() {
            None
        } else {
            Some(self.entries.len() as LogIndex - 1)
        }
    }

    /// Term of the last entry, or `0` if the log is empty.
    pub fn last_term(&self) -> Term {
        match self.last_index() {
            Some(i) => self.term_at(i).unwrap_or(0),
            None => 0,
        }
    }

    /// Entries from `from_index` (inclusive) to the end.
    pub fn slice(&self, from_index: LogIndex) -> &[LogEntry] {
        let start = (from_index as usize).min(self.entries.len());
        &self.entries[start..]
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    async fn write_entry(&self, entry: &LogEntry) -> Result<()> {
        if self.path.as_os_str().is_empty() {
            return Ok(());
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| Error::persistence(format!("opening log file: {e}")))?;
        let bytes = bincode::serialize(entry)
            .map_err(|e| Error::persistence(format!("encoding log entry: {e}")))?;
        let len = (bytes.len() as u32).to_le_bytes();
        file.write_all(&len)
            .await
            .map_err(|e| Error::persistence(format!("writing log entry length: {e}")))?;
        file.write_all(&bytes)
            .await
            .map_err(|e| Error::persistence(format!("writing log entry: {e}")))?;
        file.sync_all()
            .await
            .map_err(|e| Error::persistence(format!("fsyncing log file: {e}")))?;
        Ok(())
    }

    /// Rewrite the whole log file from the in-memory state. Used by
    /// truncation, which cannot be expressed as an append-only edit.
    async fn rewrite_file(&self) -> Result<()> {
        if self.path.as_os_str().is_empty() {
            return Ok(());
        }
        let tmp_path = self.path.with_extension("tmp");
        let mut tmp = File::create(&tmp_path)
            .await
            .map_err(|e| Error::persistence(format!("creating log rewrite file: {e}")))?;
        for entry in &self.entries {
            let bytes = bincode::serialize(entry)
                .map_err(|e| Error::persistence(format!("encoding log entry: {e}")))?;
            let len = (bytes.len() as u32).to_le_bytes();
            tmp.write_all(&len)
                .await
                .map_err(|e| Error::persistence(format!("writing log entry length: {e}")))?;
            tmp.write_all(&bytes)
                .await
                .map_err(|e| Error::persistence(format!("writing log entry: {e}")))?;
        }
        tmp.sync_all()
            .await
            .map_err(|e| Error::persistence(format!("fsyncing rewritten log: {e}")))?;
        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .map_err(|e| Error::persistence(format!("installing rewritten log: {e}")))?;
        Ok(())
    }

    async fn recover(path: &Path) -> Result<Vec<LogEntry>> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let mut file = File::open(path)
            .await
            .map_err(|e| Error::persistence(format!("opening log file for recovery: {e}")))?;
        let mut entries = Vec::new();
        loop {
            let mut len_buf = [0u8; 4];
            match file.read_exact(&mut len_buf).await {
                Ok(_) => {}
                Err(_) => break,
            }
            let len = u32::from_le_bytes(len_buf) as usize;
            let mut data = vec![0u8; len];
            if file.read_exact(&mut data).await.is_err() {
                warn!("log file truncated mid-record during recovery, stopping");
                break;
            }
            match bincode::deserialize::<LogEntry>(&data) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    warn!(error = %e, "failed to decode log entry during recovery, stopping");
                    break;
                }
            }
        }
        Ok(entries)
    }
}
