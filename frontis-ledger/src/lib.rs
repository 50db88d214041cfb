use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

/// Hard cap on how many records a single history read may return.
pub const MAX_RECENT: usize = 200;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("io error: {0}")]
    Io(String),
    #[error("parse error: {0}")]
    Parse(String),
}

/// One completed generation event. Immutable once appended.
///
/// The textual fields are the authoritative snapshot; the id fields are
/// informational back-references that may dangle after later catalog edits.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GenerationRecord {
    pub record_id: Uuid,
    pub timestamp: String,
    pub name: String,
    pub roll: String,
    pub reg: String,
    pub subject_name: String,
    pub subject_code: String,
    pub stream_label: String,
    pub semester_label: String,
    pub subject_id: Uuid,
    pub stream_id: u32,
    pub semester_id: u32,
    pub prev_hash: Option<String>,
    pub chain_hash: String,
}

/// Append-only generation history: one self-delimited JSON record per line,
/// hash-chained so reordering or rewriting past entries is detectable.
pub struct GenerationLedger {
    path: PathBuf,
    last_hash: Mutex<Option<String>>,
}

impl GenerationLedger {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let path = path.as_ref().to_path_buf();
        let last_hash = read_last_hash(&path)?;
        Ok(Self {
            path,
            last_hash: Mutex::new(last_hash),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Chain and append one record. `prev_hash`/`chain_hash` on the way in
    /// are ignored; the ledger assigns them under its lock.
    pub fn append(&self, mut record: GenerationRecord) -> Result<(), LedgerError> {
        let mut last = self
            .last_hash
            .lock()
            .map_err(|_| LedgerError::Io("lock".into()))?;
        record.prev_hash = last.clone();
        record.chain_hash = hash_record(&record);

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| LedgerError::Io(e.to_string()))?;
            }
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| LedgerError::Io(e.to_string()))?;
        let line =
            serde_json::to_string(&record).map_err(|e| LedgerError::Parse(e.to_string()))?;
        writeln!(file, "{line}").map_err(|e| LedgerError::Io(e.to_string()))?;
        *last = Some(record.chain_hash.clone());
        Ok(())
    }

    /// Up to `min(limit, 200)` most recent records, newest first. Lines that
    /// fail to parse are skipped, so a corrupt trailing write cannot take
    /// the readable history down with it.
    pub fn recent_n(&self, limit: usize) -> Result<Vec<GenerationRecord>, LedgerError> {
        let limit = limit.clamp(1, MAX_RECENT);
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(&self.path).map_err(|e| LedgerError::Io(e.to_string()))?;
        let reader = BufReader::new(file);
        let mut bucket: VecDeque<GenerationRecord> = VecDeque::with_capacity(limit);
        for line in reader.lines() {
            let line = line.map_err(|e| LedgerError::Io(e.to_string()))?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let Ok(record) = serde_json::from_str::<GenerationRecord>(line) else {
                continue;
            };
            if bucket.len() == limit {
                bucket.pop_front();
            }
            bucket.push_back(record);
        }
        Ok(bucket.into_iter().rev().collect())
    }

    /// Total appended records: one non-empty line each.
    pub fn count(&self) -> Result<usize, LedgerError> {
        if !self.path.exists() {
            return Ok(0);
        }
        let file = File::open(&self.path).map_err(|e| LedgerError::Io(e.to_string()))?;
        let reader = BufReader::new(file);
        let mut count = 0;
        for line in reader.lines() {
            let line = line.map_err(|e| LedgerError::Io(e.to_string()))?;
            if !line.trim().is_empty() {
                count += 1;
            }
        }
        Ok(count)
    }
}

/// Strict full-chain validation, used by the CLI. Unlike the read paths this
/// refuses malformed lines outright.
pub fn verify_log(path: impl AsRef<Path>) -> Result<(), LedgerError> {
    let file = File::open(path.as_ref()).map_err(|e| LedgerError::Io(e.to_string()))?;
    let reader = BufReader::new(file);
    let mut prev: Option<String> = None;
    for line in reader.lines() {
        let line = line.map_err(|e| LedgerError::Io(e.to_string()))?;
        let record: GenerationRecord =
            serde_json::from_str(&line).map_err(|e| LedgerError::Parse(e.to_string()))?;
        if record.prev_hash != prev {
            return Err(LedgerError::Parse("hash chain mismatch".into()));
        }
        let expected = hash_record(&record);
        if record.chain_hash != expected {
            return Err(LedgerError::Parse("chain hash invalid".into()));
        }
        prev = Some(record.chain_hash);
    }
    Ok(())
}

fn hash_record(record: &GenerationRecord) -> String {
    let mut h = Sha256::new();
    h.update(record.record_id.to_string());
    h.update(&record.timestamp);
    h.update(&record.name);
    h.update(&record.roll);
    h.update(&record.reg);
    h.update(&record.subject_name);
    h.update(&record.subject_code);
    h.update(&record.stream_label);
    h.update(&record.semester_label);
    h.update(record.subject_id.to_string());
    h.update(record.stream_id.to_le_bytes());
    h.update(record.semester_id.to_le_bytes());
    if let Some(prev) = &record.prev_hash {
        h.update(prev);
    }
    format!("{:x}", h.finalize())
}

/// Recover the chain tail from an existing file. Unparseable lines are
/// skipped here too; the chain resumes from the last record that survived.
fn read_last_hash(path: &Path) -> Result<Option<String>, LedgerError> {
    if !path.exists() {
        return Ok(None);
    }
    let file = File::open(path).map_err(|e| LedgerError::Io(e.to_string()))?;
    let reader = BufReader::new(file);
    let mut last: Option<String> = None;
    for line in reader.lines() {
        let line = line.map_err(|e| LedgerError::Io(e.to_string()))?;
        if let Ok(record) = serde_json::from_str::<GenerationRecord>(&line) {
            last = Some(record.chain_hash);
        }
    }
    Ok(last)
}
