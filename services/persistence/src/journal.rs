//! Append-only event journal
//!
//! One journal directory per order book, written only by that book's
//! controller. Binary format per record:
//!
//! ```text
//! [body_len:  u32]
//! [sequence:  u64]
//! [timestamp: i64]
//! [kind_len:  u16][kind: bytes]
//! [payload_len: u32][payload: bytes]
//! [checksum: u32]   // CRC32C over sequence+timestamp+kind+payload
//! ```
//!
//! Files rotate by size; flush and fsync cadence are configurable.

use crc32c::crc32c;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use types::events::OrderBookEvent;

#[derive(Error, Debug)]
pub enum JournalError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Sequence error: expected {expected}, got {got}")]
    Sequence { expected: u64, got: u64 },
}

/// One persisted record: an order book event or a dispatcher entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    pub sequence: u64,
    pub timestamp: i64,
    pub kind: String,
    pub payload: Vec<u8>,
    pub checksum: u32,
}

impl EventRecord {
    pub fn new(sequence: u64, timestamp: i64, kind: String, payload: Vec<u8>) -> Self {
        let checksum = Self::compute_checksum(sequence, timestamp, &kind, &payload);
        Self {
            sequence,
            timestamp,
            kind,
            payload,
            checksum,
        }
    }

    pub fn compute_checksum(sequence: u64, timestamp: i64, kind: &str, payload: &[u8]) -> u32 {
        let mut buf = Vec::with_capacity(16 + kind.len() + payload.len());
        buf.extend_from_slice(&sequence.to_le_bytes());
        buf.extend_from_slice(&timestamp.to_le_bytes());
        buf.extend_from_slice(kind.as_bytes());
        buf.extend_from_slice(payload);
        crc32c(&buf)
    }

    pub fn verify_checksum(&self) -> bool {
        self.checksum
            == Self::compute_checksum(self.sequence, self.timestamp, &self.kind, &self.payload)
    }

    /// Decode the payload back into an order book event.
    pub fn decode_event(&self) -> Result<OrderBookEvent, JournalError> {
        bincode::deserialize(&self.payload).map_err(|e| JournalError::Encoding(e.to_string()))
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let kind = self.kind.as_bytes();
        let body_len: u32 = 8 + 8 + 2 + kind.len() as u32 + 4 + self.payload.len() as u32 + 4;

        let mut buf = Vec::with_capacity(4 + body_len as usize);
        buf.extend_from_slice(&body_len.to_le_bytes());
        buf.extend_from_slice(&self.sequence.to_le_bytes());
        buf.extend_from_slice(&self.timestamp.to_le_bytes());
        buf.extend_from_slice(&(kind.len() as u16).to_le_bytes());
        buf.extend_from_slice(kind);
        buf.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.payload);
        buf.extend_from_slice(&self.checksum.to_le_bytes());
        buf
    }

    /// Decode one record from `data`. Returns `(record, bytes_consumed)`.
    /// Truncated or implausible input is an error, never a panic.
    pub fn from_bytes(data: &[u8]) -> Result<(Self, usize), JournalError> {
        if data.len() < 4 {
            return Err(JournalError::Encoding("missing length prefix".into()));
        }
        let body_len = u32::from_le_bytes(data[0..4].try_into().unwrap()) as usize;
        if body_len > 100_000_000 {
            return Err(JournalError::Encoding(format!(
                "implausible body length {}",
                body_len
            )));
        }
        // Minimum body: seq + ts + kind_len + payload_len + checksum.
        if body_len < 26 {
            return Err(JournalError::Encoding(format!(
                "body too small: {} bytes",
                body_len
            )));
        }
        let total = 4 + body_len;
        if data.len() < total {
            return Err(JournalError::Encoding(format!(
                "incomplete record: need {}, have {}",
                total,
                data.len()
            )));
        }

        let body = &data[4..total];
        let mut pos = 0usize;

        let sequence = u64::from_le_bytes(body[pos..pos + 8].try_into().unwrap());
        pos += 8;
        let timestamp = i64::from_le_bytes(body[pos..pos + 8].try_into().unwrap());
        pos += 8;

        let kind_len = u16::from_le_bytes(body[pos..pos + 2].try_into().unwrap()) as usize;
        pos += 2;
        if pos + kind_len + 4 + 4 > body.len() {
            return Err(JournalError::Encoding("kind overruns body".into()));
        }
        let kind = String::from_utf8(body[pos..pos + kind_len].to_vec())
            .map_err(|e| JournalError::Encoding(e.to_string()))?;
        pos += kind_len;

        let payload_len = u32::from_le_bytes(body[pos..pos + 4].try_into().unwrap()) as usize;
        pos += 4;
        if pos + payload_len + 4 > body.len() {
            return Err(JournalError::Encoding("payload overruns body".into()));
        }
        let payload = body[pos..pos + payload_len].to_vec();
        pos += payload_len;

        let checksum = u32::from_le_bytes(body[pos..pos + 4].try_into().unwrap());

        Ok((
            Self {
                sequence,
                timestamp,
                kind,
                payload,
                checksum,
            },
            total,
        ))
    }
}

/// When buffered data is flushed to the OS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushPolicy {
    EveryWrite,
    EveryN(usize),
}

/// When `fsync` is called.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsyncPolicy {
    EveryWrite,
    EveryN(usize),
}

#[derive(Debug, Clone)]
pub struct JournalConfig {
    pub dir: PathBuf,
    /// Rotate after this many bytes (default 64 MiB).
    pub max_file_size: u64,
    pub flush_policy: FlushPolicy,
    pub fsync_policy: FsyncPolicy,
}

impl JournalConfig {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            max_file_size: 64 * 1024 * 1024,
            flush_policy: FlushPolicy::EveryWrite,
            fsync_policy: FsyncPolicy::EveryWrite,
        }
    }
}

/// Append-only journal writer with rotation and checksums.
pub struct EventLog {
    config: JournalConfig,
    writer: BufWriter<File>,
    current_file: PathBuf,
    current_file_size: u64,
    next_sequence: u64,
    file_index: u64,
    writes_since_flush: usize,
    writes_since_fsync: usize,
}

impl EventLog {
    /// Open (creating the directory if needed) and append to the latest
    /// journal file. The next sequence is set by the caller after
    /// recovery.
    pub fn open(config: JournalConfig) -> Result<Self, JournalError> {
        fs::create_dir_all(&config.dir)?;

        let file_index = Self::latest_index(&config.dir);
        let current_file = Self::file_path(&config.dir, file_index);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&current_file)?;
        let current_file_size = file.metadata()?.len();

        Ok(Self {
            config,
            writer: BufWriter::new(file),
            current_file,
            current_file_size,
            next_sequence: 1,
            file_index,
            writes_since_flush: 0,
            writes_since_fsync: 0,
        })
    }

    pub fn set_next_sequence(&mut self, sequence: u64) {
        self.next_sequence = sequence;
    }

    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// Append an order book event; returns its sequence number.
    pub fn append_event(
        &mut self,
        event: &OrderBookEvent,
        timestamp: i64,
    ) -> Result<u64, JournalError> {
        let payload =
            bincode::serialize(event).map_err(|e| JournalError::Encoding(e.to_string()))?;
        self.append_raw(event.kind().to_string(), payload, timestamp)
    }

    /// Append an arbitrary record (the dispatcher's pair log uses this).
    pub fn append_raw(
        &mut self,
        kind: String,
        payload: Vec<u8>,
        timestamp: i64,
    ) -> Result<u64, JournalError> {
        let record = EventRecord::new(self.next_sequence, timestamp, kind, payload);
        self.append(&record)?;
        Ok(record.sequence)
    }

    pub fn append(&mut self, record: &EventRecord) -> Result<(), JournalError> {
        if record.sequence != self.next_sequence {
            return Err(JournalError::Sequence {
                expected: self.next_sequence,
                got: record.sequence,
            });
        }

        if self.current_file_size >= self.config.max_file_size {
            self.rotate()?;
        }

        let bytes = record.to_bytes();
        self.writer.write_all(&bytes)?;
        self.current_file_size += bytes.len() as u64;
        self.next_sequence = record.sequence + 1;
        self.writes_since_flush += 1;
        self.writes_since_fsync += 1;

        let flush = match self.config.flush_policy {
            FlushPolicy::EveryWrite => true,
            FlushPolicy::EveryN(n) => self.writes_since_flush >= n,
        };
        if flush {
            self.writer.flush()?;
            self.writes_since_flush = 0;
        }

        let fsync = match self.config.fsync_policy {
            FsyncPolicy::EveryWrite => true,
            FsyncPolicy::EveryN(n) => self.writes_since_fsync >= n,
        };
        if fsync {
            self.writer.flush()?;
            self.writer.get_ref().sync_all()?;
            self.writes_since_fsync = 0;
        }

        Ok(())
    }

    /// Flush and fsync; used before shutdown and rotation.
    pub fn sync(&mut self) -> Result<(), JournalError> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        self.writes_since_flush = 0;
        self.writes_since_fsync = 0;
        Ok(())
    }

    fn rotate(&mut self) -> Result<(), JournalError> {
        self.sync()?;
        self.file_index += 1;
        self.current_file = Self::file_path(&self.config.dir, self.file_index);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.current_file)?;
        self.writer = BufWriter::new(file);
        self.current_file_size = 0;
        Ok(())
    }

    pub fn file_path(dir: &Path, index: u64) -> PathBuf {
        dir.join(format!("events-{:06}.bin", index))
    }

    fn latest_index(dir: &Path) -> u64 {
        list_journal_files(dir)
            .into_iter()
            .last()
            .map(|(index, _)| index)
            .unwrap_or(0)
    }
}

/// Journal files in `dir` as `(index, path)`, ascending by index.
pub fn list_journal_files(dir: &Path) -> Vec<(u64, PathBuf)> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<(u64, PathBuf)> = entries
        .filter_map(|e| e.ok())
        .filter_map(|e| {
            let name = e.file_name().to_string_lossy().to_string();
            let index = name
                .strip_prefix("events-")?
                .strip_suffix(".bin")?
                .parse::<u64>()
                .ok()?;
            Some((index, e.path()))
        })
        .collect();
    files.sort_by_key(|(index, _)| *index);
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(seq: u64) -> EventRecord {
        EventRecord::new(
            seq,
            1_700_000_000_000 + seq as i64,
            "OrderAdded".to_string(),
            vec![1, 2, 3, 4],
        )
    }

    #[test]
    fn test_checksum_roundtrip() {
        let rec = record(1);
        assert!(rec.verify_checksum());
    }

    #[test]
    fn test_checksum_detects_tamper() {
        let mut rec = record(1);
        rec.payload = vec![9, 9];
        assert!(!rec.verify_checksum());
    }

    #[test]
    fn test_wire_roundtrip() {
        let rec = record(42);
        let bytes = rec.to_bytes();
        let (decoded, consumed) = EventRecord::from_bytes(&bytes).unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(decoded, rec);
    }

    #[test]
    fn test_truncated_record_is_an_error() {
        let bytes = record(1).to_bytes();
        assert!(EventRecord::from_bytes(&bytes[..bytes.len() - 3]).is_err());
        assert!(EventRecord::from_bytes(&bytes[..2]).is_err());
    }

    #[test]
    fn test_append_advances_sequence() {
        let tmp = TempDir::new().unwrap();
        let mut log = EventLog::open(JournalConfig::new(tmp.path())).unwrap();

        for seq in 1..=10 {
            log.append(&record(seq)).unwrap();
        }
        assert_eq!(log.next_sequence(), 11);
    }

    #[test]
    fn test_append_rejects_sequence_gap() {
        let tmp = TempDir::new().unwrap();
        let mut log = EventLog::open(JournalConfig::new(tmp.path())).unwrap();

        log.append(&record(1)).unwrap();
        match log.append(&record(5)) {
            Err(JournalError::Sequence { expected, got }) => {
                assert_eq!(expected, 2);
                assert_eq!(got, 5);
            }
            other => panic!("expected sequence error, got {:?}", other),
        }
    }

    #[test]
    fn test_rotation_by_size() {
        let tmp = TempDir::new().unwrap();
        let config = JournalConfig {
            max_file_size: 100,
            ..JournalConfig::new(tmp.path())
        };
        let mut log = EventLog::open(config).unwrap();

        for seq in 1..=20 {
            log.append(&record(seq)).unwrap();
        }
        assert!(
            list_journal_files(tmp.path()).len() > 1,
            "expected rotation to create multiple files"
        );
    }

    #[test]
    fn test_reopen_continues_latest_file() {
        let tmp = TempDir::new().unwrap();
        {
            let mut log = EventLog::open(JournalConfig::new(tmp.path())).unwrap();
            log.append(&record(1)).unwrap();
            log.sync().unwrap();
        }
        let mut log = EventLog::open(JournalConfig::new(tmp.path())).unwrap();
        log.set_next_sequence(2);
        log.append(&record(2)).unwrap();
        assert_eq!(list_journal_files(tmp.path()).len(), 1);
    }
}
