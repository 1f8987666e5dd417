//! JSON-lines memory log
//!
//! One line per record: `{"checksum": <sha256 of record json>, "record": {...}}`.
//! Lines that fail to parse or whose checksum does not match are skipped on
//! read, so a torn or hand-edited file never blocks planning.

use super::{MemoryRecord, MemoryStore};
use crate::error::OrchestrationError;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

#[derive(Serialize, Deserialize)]
struct MemoryLine {
    checksum: String,
    record: MemoryRecord,
}

fn checksum(record_json: &str) -> String {
    hex::encode(Sha256::digest(record_json.as_bytes()))
}

pub struct FileMemoryStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileMemoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn parse_line(line: &str) -> std::result::Result<MemoryRecord, String> {
    let parsed: MemoryLine = serde_json::from_str(line).map_err(|e| e.to_string())?;
    let record_json = serde_json::to_string(&parsed.record).map_err(|e| e.to_string())?;
    if checksum(&record_json) != parsed.checksum {
        return Err("checksum mismatch".to_string());
    }
    Ok(parsed.record)
}

#[async_trait]
impl MemoryStore for FileMemoryStore {
    async fn append(&self, record: &MemoryRecord) -> Result<()> {
        let record_json = serde_json::to_string(record)?;
        let line = serde_json::to_string(&MemoryLine {
            checksum: checksum(&record_json),
            record: record.clone(),
        })?;

        let _guard = self.write_lock.lock().await;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await.map_err(|e| {
                OrchestrationError::MemoryUnavailable(format!("cannot create {}: {}", parent.display(), e))
            })?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| {
                OrchestrationError::MemoryUnavailable(format!("cannot open {}: {}", self.path.display(), e))
            })?;

        file.write_all(format!("{}\n", line).as_bytes())
            .await
            .map_err(|e| OrchestrationError::MemoryUnavailable(format!("append failed: {}", e)))?;
        file.flush()
            .await
            .map_err(|e| OrchestrationError::MemoryUnavailable(format!("flush failed: {}", e)))?;

        debug!(path = %self.path.display(), run_id = %record.run_id, "Appended memory record");
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<MemoryRecord>> {
        let contents = match fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(OrchestrationError::MemoryUnavailable(format!(
                    "cannot read {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };

        let mut records = Vec::new();
        for (number, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match parse_line(line) {
                Ok(record) => records.push(record),
                Err(reason) => {
                    warn!(path = %self.path.display(), line = number + 1, %reason, "Skipping unreadable memory line")
                }
            }
        }
        Ok(records)
    }

    fn backend_name(&self) -> &'static str {
        "file"
    }
}
