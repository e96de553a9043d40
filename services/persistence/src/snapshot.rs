//! Order book snapshots
//!
//! A snapshot bounds journal replay: it captures the resident orders at a
//! journal sequence, with a SHA-256 integrity hash and optional zstd
//! compression. Writes are atomic (tmp file + rename). The retention
//! policy keeps only the newest snapshot; older ones are pruned after a
//! successful write.

use matching_engine::BookSnapshot;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Integrity check failed: expected {expected}, got {actual}")]
    IntegrityFailure { expected: String, actual: String },

    #[error("Unsupported snapshot version: {0}")]
    UnsupportedVersion(u32),

    #[error("Compression error: {0}")]
    Compression(String),

    #[error("No snapshots found")]
    NoSnapshots,
}

/// A full book snapshot at a journal sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookSnapshotFile {
    pub version: u32,
    /// Last journal sequence applied to the captured book.
    pub sequence: u64,
    pub timestamp: i64,
    pub book: BookSnapshot,
    /// SHA-256 hex digest of the encoded book.
    pub checksum: String,
}

impl BookSnapshotFile {
    pub fn new(sequence: u64, timestamp: i64, book: BookSnapshot) -> Self {
        let checksum = Self::book_hash(&book);
        Self {
            version: SNAPSHOT_VERSION,
            sequence,
            timestamp,
            book,
            checksum,
        }
    }

    fn book_hash(book: &BookSnapshot) -> String {
        let bytes = bincode::serialize(book).expect("book snapshot encoding cannot fail");
        format!("{:x}", Sha256::digest(&bytes))
    }

    pub fn verify_integrity(&self) -> bool {
        self.checksum == Self::book_hash(&self.book)
    }
}

/// Writes snapshots atomically, optionally zstd-compressed.
pub struct SnapshotWriter {
    dir: PathBuf,
    compress: bool,
}

impl SnapshotWriter {
    pub fn new(dir: impl Into<PathBuf>, compress: bool) -> Self {
        Self {
            dir: dir.into(),
            compress,
        }
    }

    pub fn write(&self, snapshot: &BookSnapshotFile) -> Result<PathBuf, SnapshotError> {
        fs::create_dir_all(&self.dir)?;

        let data =
            bincode::serialize(snapshot).map_err(|e| SnapshotError::Encoding(e.to_string()))?;
        let (data, ext) = if self.compress {
            let compressed = zstd::encode_all(data.as_slice(), 3)
                .map_err(|e| SnapshotError::Compression(e.to_string()))?;
            (compressed, "book.zst")
        } else {
            (data, "book")
        };

        let filename = format!("snapshot-{:012}.{}", snapshot.sequence, ext);
        let path = self.dir.join(&filename);
        let tmp_path = self.dir.join(format!("{}.tmp", filename));
        {
            let mut file = File::create(&tmp_path)?;
            file.write_all(&data)?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, &path)?;
        Ok(path)
    }

    /// Delete every snapshot other than the one at `keep_sequence`.
    pub fn prune_others(&self, keep_sequence: u64) -> Result<usize, SnapshotError> {
        let loader = SnapshotLoader::new(&self.dir);
        let mut removed = 0;
        for (sequence, path) in loader.list()? {
            if sequence != keep_sequence {
                fs::remove_file(path)?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// Loads snapshots, verifying version and integrity.
pub struct SnapshotLoader {
    dir: PathBuf,
}

impl SnapshotLoader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn load(&self, path: &Path) -> Result<BookSnapshotFile, SnapshotError> {
        let mut data = Vec::new();
        File::open(path)?.read_to_end(&mut data)?;

        let compressed = path.extension().map(|e| e == "zst").unwrap_or(false);
        let data = if compressed {
            zstd::decode_all(data.as_slice())
                .map_err(|e| SnapshotError::Compression(e.to_string()))?
        } else {
            data
        };

        let snapshot: BookSnapshotFile =
            bincode::deserialize(&data).map_err(|e| SnapshotError::Encoding(e.to_string()))?;

        if snapshot.version > SNAPSHOT_VERSION {
            return Err(SnapshotError::UnsupportedVersion(snapshot.version));
        }
        if !snapshot.verify_integrity() {
            return Err(SnapshotError::IntegrityFailure {
                expected: snapshot.checksum.clone(),
                actual: BookSnapshotFile::book_hash(&snapshot.book),
            });
        }
        Ok(snapshot)
    }

    pub fn load_latest(&self) -> Result<BookSnapshotFile, SnapshotError> {
        let (_, path) = self
            .list()?
            .into_iter()
            .last()
            .ok_or(SnapshotError::NoSnapshots)?;
        self.load(&path)
    }

    /// All snapshots as `(sequence, path)`, ascending by sequence.
    pub fn list(&self) -> Result<Vec<(u64, PathBuf)>, SnapshotError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if !name.starts_with("snapshot-") {
                continue;
            }
            let stripped = name
                .trim_start_matches("snapshot-")
                .trim_end_matches(".book.zst")
                .trim_end_matches(".book");
            if let Ok(sequence) = stripped.parse::<u64>() {
                out.push((sequence, entry.path()));
            }
        }
        out.sort_by_key(|(sequence, _)| *sequence);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;
    use matching_engine::OrderBook;
    use tempfile::TempDir;
    use types::assets::{AssetId, AssetPair};
    use types::numeric::{Amount, Price};
    use types::order::{LimitOrder, Order, Side};

    fn sample_book() -> OrderBook {
        let pair = AssetPair::new(AssetId::Issued([7u8; 32]), AssetId::Native);
        let mut book = OrderBook::new();
        for (seed, side, price, amount) in [
            (1u8, Side::Buy, 90u64, 10u64),
            (2, Side::Buy, 95, 20),
            (3, Side::Sell, 105, 15),
        ] {
            let key = SigningKey::from_bytes(&[seed; 32]);
            book.add(LimitOrder::new(Order::signed(
                &key,
                pair,
                side,
                Price::new(price).unwrap(),
                Amount::new(amount).unwrap(),
                1_700_000_000_000,
                1_700_000_060_000,
                300_000,
            )));
        }
        book
    }

    #[test]
    fn test_write_and_load_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let book = sample_book();
        let snapshot = BookSnapshotFile::new(500, 1_700_000_000_000, book.snapshot());

        let writer = SnapshotWriter::new(tmp.path(), false);
        let path = writer.write(&snapshot).unwrap();

        let loaded = SnapshotLoader::new(tmp.path()).load(&path).unwrap();
        assert_eq!(loaded.sequence, 500);
        assert_eq!(loaded.book, snapshot.book);
        assert!(loaded.verify_integrity());

        let restored = OrderBook::from_snapshot(loaded.book);
        assert_eq!(restored.order_count(), 3);
    }

    #[test]
    fn test_compressed_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let snapshot = BookSnapshotFile::new(7, 1, sample_book().snapshot());

        let writer = SnapshotWriter::new(tmp.path(), true);
        let path = writer.write(&snapshot).unwrap();
        assert!(path.to_string_lossy().ends_with(".book.zst"));

        let loaded = SnapshotLoader::new(tmp.path()).load(&path).unwrap();
        assert_eq!(loaded.book, snapshot.book);
    }

    #[test]
    fn test_integrity_detects_tamper() {
        let mut snapshot = BookSnapshotFile::new(7, 1, sample_book().snapshot());
        snapshot.book.bids.clear();
        assert!(!snapshot.verify_integrity());
    }

    #[test]
    fn test_load_latest_picks_highest_sequence() {
        let tmp = TempDir::new().unwrap();
        let writer = SnapshotWriter::new(tmp.path(), false);
        for sequence in [100u64, 500, 300] {
            let snap = BookSnapshotFile::new(sequence, sequence as i64, sample_book().snapshot());
            writer.write(&snap).unwrap();
        }
        let latest = SnapshotLoader::new(tmp.path()).load_latest().unwrap();
        assert_eq!(latest.sequence, 500);
    }

    #[test]
    fn test_prune_keeps_only_latest() {
        let tmp = TempDir::new().unwrap();
        let writer = SnapshotWriter::new(tmp.path(), false);
        for sequence in [100u64, 200, 300] {
            let snap = BookSnapshotFile::new(sequence, sequence as i64, sample_book().snapshot());
            writer.write(&snap).unwrap();
        }
        let removed = writer.prune_others(300).unwrap();
        assert_eq!(removed, 2);

        let remaining = SnapshotLoader::new(tmp.path()).list().unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].0, 300);
    }

    #[test]
    fn test_no_snapshots_error() {
        let tmp = TempDir::new().unwrap();
        assert!(matches!(
            SnapshotLoader::new(tmp.path()).load_latest(),
            Err(SnapshotError::NoSnapshots)
        ));
    }
}
