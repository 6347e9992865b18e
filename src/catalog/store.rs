//! Durable grant store
//!
//! Tokens and grants are the only catalog state that can't be rebuilt from
//! the backends, so every accepted token and grant is appended here before
//! it becomes visible. The catalog replays the log on open.
//!
//! `FileStore` format: one JSON record per line, each tagged by `kind`:
//! ```text
//! {"kind":"token","token":"9f..","name":"etl","admin":false,"description":null,"created_at":"2024-05-01T10:00:00Z"}
//! {"kind":"grant","token":"9f..","database":"shop","table":"orders"}
//! ```

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

use super::{Grant, TokenRecord};

/// Grant store errors
#[derive(Error, Debug)]
pub enum StoreError {
    /// Standard IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Record could not be encoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A complete record in the log could not be decoded
    #[error("Corrupted grant store at line {line}: {reason}")]
    Corrupted { line: usize, reason: String },
}

/// Result type for grant store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// One durable record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoreRecord {
    Token(TokenRecord),
    Grant(Grant),
}

/// Append-only persistence for tokens and grants
#[async_trait]
pub trait GrantStore: Send + Sync {
    /// All records, in the order they were appended
    async fn load(&self) -> StoreResult<Vec<StoreRecord>>;

    /// Durably append one record. Returns only once the record is persisted.
    async fn append(&self, record: &StoreRecord) -> StoreResult<()>;
}

/// JSON-lines log on the local filesystem
pub struct FileStore {
    path: PathBuf,
    log: tokio::sync::Mutex<LogFile>,
}

struct LogFile {
    file: fs::File,
    /// Length covering only complete, synced records
    committed_len: u64,
}

impl LogFile {
    /// Cut off anything past the last committed record
    async fn truncate_uncommitted(&mut self) -> std::io::Result<()> {
        if self.file.metadata().await?.len() != self.committed_len {
            self.file.set_len(self.committed_len).await?;
            self.file.sync_data().await?;
        }
        Ok(())
    }

    async fn write_record(&mut self, line: &[u8]) -> std::io::Result<()> {
        self.file.write_all(line).await?;
        self.file.flush().await?;
        self.file.sync_data().await
    }
}

impl FileStore {
    /// Open (or create) the log at `path`
    ///
    /// A record torn by a crash mid-append is the only thing that can follow
    /// the last newline; it is cut off so the next append starts on a fresh line.
    pub async fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&path)
            .await?;

        let contents = fs::read(&path).await?;
        let mut committed_len = contents.len() as u64;
        if !contents.is_empty() && !contents.ends_with(b"\n") {
            let keep = contents
                .iter()
                .rposition(|b| *b == b'\n')
                .map_or(0, |pos| pos + 1);
            tracing::warn!(
                path = %path.display(),
                dropped_bytes = contents.len() - keep,
                "Discarding torn record at end of grant store"
            );
            file.set_len(keep as u64).await?;
            file.sync_data().await?;
            committed_len = keep as u64;
        }

        Ok(FileStore {
            path,
            log: tokio::sync::Mutex::new(LogFile {
                file,
                committed_len,
            }),
        })
    }

    /// Path of the log file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl GrantStore for FileStore {
    async fn load(&self) -> StoreResult<Vec<StoreRecord>> {
        // Hold the lock so a concurrent append can't be read half-written
        let _log = self.log.lock().await;
        let contents = fs::read_to_string(&self.path).await?;
        parse_log(&contents)
    }

    async fn append(&self, record: &StoreRecord) -> StoreResult<()> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let mut log = self.log.lock().await;

        // A failed earlier append may have left part of a record behind
        log.truncate_uncommitted().await?;

        if let Err(e) = log.write_record(&line).await {
            if let Err(rollback) = log.truncate_uncommitted().await {
                tracing::error!(
                    path = %self.path.display(),
                    error = %rollback,
                    "Could not roll back partial grant store append"
                );
            }
            return Err(e.into());
        }
        log.committed_len += line.len() as u64;
        Ok(())
    }
}

fn parse_log(contents: &str) -> StoreResult<Vec<StoreRecord>> {
    contents
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            serde_json::from_str(line).map_err(|e| StoreError::Corrupted {
                line: idx + 1,
                reason: e.to_string(),
            })
        })
        .collect()
}

/// Volatile store for tests and throwaway gateways
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<Vec<StoreRecord>>,
    fail_appends: AtomicBool,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following append fail with an IO error
    pub fn set_fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }

    /// Snapshot of the stored records
    pub fn records(&self) -> Vec<StoreRecord> {
        self.records.lock().clone()
    }
}

#[async_trait]
impl GrantStore for MemoryStore {
    async fn load(&self) -> StoreResult<Vec<StoreRecord>> {
        Ok(self.records())
    }

    async fn append(&self, record: &StoreRecord) -> StoreResult<()> {
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(StoreError::Io(std::io::Error::other("append refused")));
        }
        self.records.lock().push(record.clone());
        Ok(())
    }
}
