//! Recovery: snapshot restore + journal replay
//!
//! On controller start, restore the newest intact snapshot (or an empty
//! book) and replay all journal records with a higher sequence through
//! `OrderBook::apply`. Replay never re-validates orders and never
//! re-broadcasts settlement transactions: the journal is authoritative.

use crate::reader::{EventLogReader, ReaderError};
use crate::snapshot::{SnapshotError, SnapshotLoader};
use matching_engine::OrderBook;
use std::fs;
use std::io;
use std::path::Path;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum RecoveryError {
    #[error("Snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("Reader error: {0}")]
    Reader(#[from] ReaderError),

    #[error("Replay error at sequence {sequence}: {detail}")]
    Replay { sequence: u64, detail: String },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Result of a book recovery.
pub struct RecoveredBook {
    pub book: OrderBook,
    /// Sequence of the last applied journal record (0 when empty).
    pub last_sequence: u64,
    /// Sequence of the restored snapshot (0 when none).
    pub snapshot_sequence: u64,
    /// Number of replayed journal records.
    pub replayed: u64,
}

/// Restore a book from its snapshot and journal directories.
pub fn recover_book(
    snapshot_dir: &Path,
    journal_dir: &Path,
) -> Result<RecoveredBook, RecoveryError> {
    let (mut book, snapshot_sequence) = match SnapshotLoader::new(snapshot_dir).load_latest() {
        Ok(snapshot) => {
            info!(sequence = snapshot.sequence, "restored book snapshot");
            (OrderBook::from_snapshot(snapshot.book), snapshot.sequence)
        }
        Err(SnapshotError::NoSnapshots) => (OrderBook::new(), 0),
        Err(e) => return Err(e.into()),
    };

    let mut reader = EventLogReader::open(journal_dir)?;
    if snapshot_sequence > 0 {
        reader.seek_past(snapshot_sequence)?;
    }

    let mut last_sequence = snapshot_sequence;
    let mut replayed = 0u64;
    while let Some(record) = reader.next_record()? {
        let event = record.decode_event().map_err(|e| RecoveryError::Replay {
            sequence: record.sequence,
            detail: e.to_string(),
        })?;
        book.apply(&event);
        last_sequence = record.sequence;
        replayed += 1;
    }

    if replayed > 0 {
        info!(replayed, last_sequence, "replayed journal tail");
    }

    Ok(RecoveredBook {
        book,
        last_sequence,
        snapshot_sequence,
        replayed,
    })
}

/// Remove a pair's journal and snapshot storage (order book deletion).
pub fn purge_book_storage(snapshot_dir: &Path, journal_dir: &Path) -> io::Result<()> {
    for dir in [snapshot_dir, journal_dir] {
        if dir.exists() {
            fs::remove_dir_all(dir)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::{EventLog, JournalConfig};
    use crate::snapshot::{BookSnapshotFile, SnapshotWriter};
    use ed25519_dalek::SigningKey;
    use tempfile::TempDir;
    use types::assets::{AssetId, AssetPair};
    use types::events::OrderBookEvent;
    use types::numeric::{Amount, Price};
    use types::order::{LimitOrder, Order, Side};

    fn limit_order(seed: u8, side: Side, price: u64, amount: u64) -> LimitOrder {
        let key = SigningKey::from_bytes(&[seed; 32]);
        LimitOrder::new(Order::signed(
            &key,
            AssetPair::new(AssetId::Issued([7u8; 32]), AssetId::Native),
            side,
            Price::new(price).unwrap(),
            Amount::new(amount).unwrap(),
            1_700_000_000_000 + seed as i64,
            1_700_000_060_000,
            300_000,
        ))
    }

    #[test]
    fn test_recover_from_journal_only() {
        let tmp = TempDir::new().unwrap();
        let journal_dir = tmp.path().join("journal");
        let snapshot_dir = tmp.path().join("snapshots");

        let mut log = EventLog::open(JournalConfig::new(&journal_dir)).unwrap();
        for (seed, side, price) in [(1u8, Side::Buy, 90u64), (2, Side::Sell, 110)] {
            let event = OrderBookEvent::OrderAdded {
                order: limit_order(seed, side, price, 100),
            };
            log.append_event(&event, 1_000).unwrap();
        }
        log.sync().unwrap();

        let recovered = recover_book(&snapshot_dir, &journal_dir).unwrap();
        assert_eq!(recovered.replayed, 2);
        assert_eq!(recovered.last_sequence, 2);
        assert_eq!(recovered.snapshot_sequence, 0);
        assert_eq!(recovered.book.order_count(), 2);
        assert_eq!(recovered.book.best_bid(), Some(Price::new(90).unwrap()));
        assert_eq!(recovered.book.best_ask(), Some(Price::new(110).unwrap()));
    }

    #[test]
    fn test_recover_snapshot_plus_tail() {
        let tmp = TempDir::new().unwrap();
        let journal_dir = tmp.path().join("journal");
        let snapshot_dir = tmp.path().join("snapshots");

        let mut log = EventLog::open(JournalConfig::new(&journal_dir)).unwrap();
        let mut book = OrderBook::new();

        // Events 1..=2 are captured by the snapshot.
        for (seed, side, price) in [(1u8, Side::Buy, 90u64), (2, Side::Sell, 110)] {
            let event = OrderBookEvent::OrderAdded {
                order: limit_order(seed, side, price, 100),
            };
            log.append_event(&event, 1_000).unwrap();
            book.apply(&event);
        }
        SnapshotWriter::new(&snapshot_dir, false)
            .write(&BookSnapshotFile::new(2, 2_000, book.snapshot()))
            .unwrap();

        // Event 3 is only in the journal.
        let tail_event = OrderBookEvent::OrderAdded {
            order: limit_order(3, Side::Buy, 95, 50),
        };
        log.append_event(&tail_event, 3_000).unwrap();
        log.sync().unwrap();

        let recovered = recover_book(&snapshot_dir, &journal_dir).unwrap();
        assert_eq!(recovered.snapshot_sequence, 2);
        assert_eq!(recovered.replayed, 1);
        assert_eq!(recovered.last_sequence, 3);
        assert_eq!(recovered.book.order_count(), 3);
        assert_eq!(recovered.book.best_bid(), Some(Price::new(95).unwrap()));
    }

    #[test]
    fn test_replay_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let journal_dir = tmp.path().join("journal");
        let snapshot_dir = tmp.path().join("snapshots");

        let mut log = EventLog::open(JournalConfig::new(&journal_dir)).unwrap();
        let resting = limit_order(1, Side::Sell, 100, 60);
        log.append_event(
            &OrderBookEvent::OrderAdded {
                order: resting.clone(),
            },
            1_000,
        )
        .unwrap();
        log.append_event(
            &OrderBookEvent::OrderExecuted {
                submitted: limit_order(2, Side::Buy, 100, 40),
                counter: resting,
                executed_amount: 40,
            },
            2_000,
        )
        .unwrap();
        log.sync().unwrap();

        let first = recover_book(&snapshot_dir, &journal_dir).unwrap();
        let second = recover_book(&snapshot_dir, &journal_dir).unwrap();
        assert_eq!(first.book.snapshot(), second.book.snapshot());
        assert_eq!(first.book.depth(None).asks[0].1, 20);
    }

    #[test]
    fn test_cold_start_is_empty() {
        let tmp = TempDir::new().unwrap();
        let recovered = recover_book(&tmp.path().join("s"), &tmp.path().join("j")).unwrap();
        assert!(recovered.book.is_empty());
        assert_eq!(recovered.last_sequence, 0);
    }

    #[test]
    fn test_purge_removes_storage() {
        let tmp = TempDir::new().unwrap();
        let journal_dir = tmp.path().join("journal");
        let snapshot_dir = tmp.path().join("snapshots");

        let mut log = EventLog::open(JournalConfig::new(&journal_dir)).unwrap();
        log.append_event(
            &OrderBookEvent::OrderAdded {
                order: limit_order(1, Side::Buy, 90, 10),
            },
            1_000,
        )
        .unwrap();
        log.sync().unwrap();

        purge_book_storage(&snapshot_dir, &journal_dir).unwrap();
        assert!(!journal_dir.exists());
    }
}
