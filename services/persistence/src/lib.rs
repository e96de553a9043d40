//! Durable storage for order books
//!
//! Per pair: an append-only event journal (length-prefixed records with
//! CRC32C checksums, size-based rotation) and a snapshot directory
//! (versioned, SHA-256 integrity, optional zstd compression). Recovery
//! restores the latest snapshot and replays the journal tail through the
//! book's event application.

pub mod journal;
pub mod reader;
pub mod recovery;
pub mod snapshot;
