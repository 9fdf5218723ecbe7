//! Append-only decision log
//!
//! One `DecisionRecord` per processed track. `JsonlDecisionLog` writes one
//! JSON object per line and flushes after each record, so a log cut short
//! by cancellation or a crash is still a valid sequence of complete records.

use crate::error::DecisionLogError;
use crate::models::DecisionRecord;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;

/// Sink for decision records
#[async_trait]
pub trait DecisionLog: Send + Sync {
    async fn append(&self, record: &DecisionRecord) -> Result<(), DecisionLogError>;
}

/// JSON-lines file sink
pub struct JsonlDecisionLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonlDecisionLog {
    /// Open `path` for appending, creating it (and its parent directory) if needed
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, DecisionLogError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let file = OpenOptions::new().create(true).append(true).open(&path).await?;
        tracing::info!(path = %path.display(), "Decision log opened");

        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl DecisionLog for JsonlDecisionLog {
    async fn append(&self, record: &DecisionRecord) -> Result<(), DecisionLogError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let mut file = self.file.lock().await;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Read every record from a JSON-lines decision log
///
/// Blank lines are ignored; a malformed line is an error.
pub async fn read_jsonl(path: impl AsRef<Path>) -> Result<Vec<DecisionRecord>, DecisionLogError> {
    let file = File::open(path.as_ref()).await?;
    let mut lines = BufReader::new(file).lines();
    let mut records = Vec::new();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        records.push(serde_json::from_str(&line)?);
    }

    Ok(records)
}

/// In-memory sink
#[derive(Default)]
pub struct MemoryDecisionLog {
    records: Mutex<Vec<DecisionRecord>>,
}

impl MemoryDecisionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self) -> Vec<DecisionRecord> {
        self.records.lock().await.clone()
    }
}

#[async_trait]
impl DecisionLog for MemoryDecisionLog {
    async fn append(&self, record: &DecisionRecord) -> Result<(), DecisionLogError> {
        self.records.lock().await.push(record.clone());
        Ok(())
    }
}
