//! Sequential journal reader
//!
//! Reads records across rotated files in order, validating every
//! checksum. A torn write at the tail (crash mid-append) is tolerated:
//! the valid prefix is returned and the corruption is recorded. A bad
//! checksum in the middle of the stream is an error.

use crate::journal::{list_journal_files, EventRecord, JournalError};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug)]
pub enum ReaderError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Checksum mismatch at offset {offset}, sequence {sequence}")]
    ChecksumMismatch { offset: u64, sequence: u64 },

    #[error("Sequence not monotonic: prev {prev}, current {current}")]
    NotMonotonic { prev: u64, current: u64 },
}

/// Details of a detected torn tail.
#[derive(Debug, Clone)]
pub struct CorruptionRecord {
    pub byte_offset: u64,
    pub detail: String,
}

pub struct EventLogReader {
    files: Vec<PathBuf>,
    current_file: usize,
    data: Vec<u8>,
    pos: usize,
    global_offset: u64,
    last_sequence: Option<u64>,
    corruption: Option<CorruptionRecord>,
}

impl EventLogReader {
    pub fn open(dir: &Path) -> Result<Self, ReaderError> {
        let files = list_journal_files(dir)
            .into_iter()
            .map(|(_, path)| path)
            .collect();
        let mut reader = Self {
            files,
            current_file: 0,
            data: Vec::new(),
            pos: 0,
            global_offset: 0,
            last_sequence: None,
            corruption: None,
        };
        reader.load_current()?;
        Ok(reader)
    }

    /// Next valid record, or `None` at end of journal. A torn tail ends
    /// the stream; a mid-stream checksum failure is an error.
    pub fn next_record(&mut self) -> Result<Option<EventRecord>, ReaderError> {
        loop {
            if self.pos >= self.data.len() {
                if !self.advance_file()? {
                    return Ok(None);
                }
                continue;
            }

            let offset = self.global_offset;
            match EventRecord::from_bytes(&self.data[self.pos..]) {
                Ok((record, consumed)) => {
                    self.pos += consumed;
                    self.global_offset += consumed as u64;

                    if !record.verify_checksum() {
                        return Err(ReaderError::ChecksumMismatch {
                            offset,
                            sequence: record.sequence,
                        });
                    }
                    if let Some(prev) = self.last_sequence {
                        if record.sequence <= prev {
                            return Err(ReaderError::NotMonotonic {
                                prev,
                                current: record.sequence,
                            });
                        }
                    }
                    self.last_sequence = Some(record.sequence);
                    return Ok(Some(record));
                }
                Err(JournalError::Encoding(detail)) => {
                    // A torn record is only acceptable at the very end of
                    // the last file.
                    let is_last_file = self.current_file + 1 >= self.files.len();
                    if is_last_file {
                        warn!(offset, %detail, "torn journal tail, stopping replay");
                        self.corruption = Some(CorruptionRecord {
                            byte_offset: offset,
                            detail,
                        });
                        self.pos = self.data.len();
                        return Ok(None);
                    }
                    return Err(ReaderError::Io(io::Error::new(
                        io::ErrorKind::InvalidData,
                        detail,
                    )));
                }
                Err(JournalError::Io(e)) => return Err(ReaderError::Io(e)),
                Err(JournalError::Sequence { .. }) => unreachable!("decode never checks sequence"),
            }
        }
    }

    /// Skip records up to and including `sequence`.
    pub fn seek_past(&mut self, sequence: u64) -> Result<(), ReaderError> {
        while let Some(record) = self.peek_sequence()? {
            if record > sequence {
                break;
            }
            self.next_record()?;
        }
        Ok(())
    }

    fn peek_sequence(&mut self) -> Result<Option<u64>, ReaderError> {
        loop {
            if self.pos >= self.data.len() {
                if !self.advance_file()? {
                    return Ok(None);
                }
                continue;
            }
            return match EventRecord::from_bytes(&self.data[self.pos..]) {
                Ok((record, _)) => Ok(Some(record.sequence)),
                Err(_) => Ok(None),
            };
        }
    }

    pub fn last_sequence(&self) -> Option<u64> {
        self.last_sequence
    }

    pub fn corruption(&self) -> Option<&CorruptionRecord> {
        self.corruption.as_ref()
    }

    fn load_current(&mut self) -> Result<(), ReaderError> {
        if let Some(path) = self.files.get(self.current_file) {
            self.data = fs::read(path)?;
        } else {
            self.data = Vec::new();
        }
        self.pos = 0;
        Ok(())
    }

    fn advance_file(&mut self) -> Result<bool, ReaderError> {
        if self.current_file + 1 >= self.files.len() {
            return Ok(false);
        }
        self.current_file += 1;
        self.load_current()?;
        Ok(true)
    }
}
