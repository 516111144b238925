//! A naive in-memory implementation of [`Log`](super::Log).

use core::convert::{TryFrom, TryInto};
use core::fmt;

use crate::message::{LogEntry, LogIndex, TermId};
use crate::prelude::*;

use super::Log;

/// A naive in-memory implementation of [`Log`](super::Log), holding every entry for the lifetime of the node.
#[derive(Default)]
pub struct InMemoryLog {
    entries: Vec<LogEntry>,
    last_taken: LogIndex,
}

/// An error returned by [`InMemoryLog`].
#[derive(Debug, Eq, PartialEq)]
pub enum InMemoryLogError {
    /// An appended entry did not directly follow the last entry of the log.
    NotContiguous {
        /// The index the entry should have carried.
        expected: LogIndex,
        /// The index the entry actually carried.
        actual: LogIndex,
    },
    /// A truncation pointed outside of the stored entries.
    OutOfRange(LogIndex),
    /// A truncation would have removed entries already handed out as committed.
    AlreadyTaken(LogIndex),
}

impl InMemoryLog {
    /// Constructs an empty Raft log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Constructs a Raft log holding `entries`, which must carry the indices `1..=entries.len()`.
    pub fn from_entries(entries: impl IntoIterator<Item = LogEntry>) -> Result<Self, InMemoryLogError> {
        let mut log = Self::new();
        for entry in entries {
            log.append(entry)?;
        }
        Ok(log)
    }

    fn entry_index(&self, log_idx: LogIndex) -> Option<usize> {
        log_idx.id.checked_sub(1)?.try_into().ok()
    }
}

impl Log for InMemoryLog {
    type Error = InMemoryLogError;

    fn append(&mut self, log_entry: LogEntry) -> Result<(), Self::Error> {
        let expected = self.last_index() + 1;
        if log_entry.index != expected {
            return Err(InMemoryLogError::NotContiguous {
                expected,
                actual: log_entry.index,
            });
        }
        self.entries.push(log_entry);
        Ok(())
    }

    fn cancel_from(&mut self, from_log_idx: LogIndex) -> Result<usize, Self::Error> {
        if from_log_idx <= self.last_taken {
            return Err(InMemoryLogError::AlreadyTaken(from_log_idx));
        }
        let from_index = self
            .entry_index(from_log_idx)
            .ok_or(InMemoryLogError::OutOfRange(from_log_idx))?;
        match self.entries.len().checked_sub(from_index) {
            Some(0) | None => Err(InMemoryLogError::OutOfRange(from_log_idx)),
            Some(cancelled_len) => {
                self.entries.truncate(from_index);
                Ok(cancelled_len)
            }
        }
    }

    fn entry_len(&self, log_entry: &LogEntry) -> usize {
        20 + log_entry.data.len()
    }

    fn get(&mut self, log_idx: LogIndex) -> Option<LogEntry> {
        let index = self.entry_index(log_idx)?;
        self.entries.get(index).cloned()
    }

    fn get_term(&mut self, log_idx: LogIndex) -> Option<TermId> {
        let index = self.entry_index(log_idx)?;
        self.entries.get(index).map(|log_entry| log_entry.term)
    }

    fn last_index(&self) -> LogIndex {
        let entries_len = u64::try_from(self.entries.len())
            .unwrap_or_else(|_| panic!("more than 2^64 log entries"));
        LogIndex::new(entries_len)
    }

    fn last_taken_index(&self) -> LogIndex {
        self.last_taken
    }

    fn last_term(&self) -> TermId {
        self.entries
            .last()
            .map(|log_entry: &LogEntry| log_entry.term)
            .unwrap_or_default()
    }

    fn take_next(&mut self) -> Option<LogEntry> {
        let log_idx = self.last_taken + 1;
        let log_entry = self.get(log_idx)?;
        self.last_taken = log_idx;
        Some(log_entry)
    }
}

impl fmt::Display for InMemoryLogError {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InMemoryLogError::NotContiguous { expected, actual } => {
                write!(fmt, "expected entry at {} but got {}", expected, actual)
            }
            InMemoryLogError::OutOfRange(index) => write!(fmt, "{} is out of range", index),
            InMemoryLogError::AlreadyTaken(index) => {
                write!(fmt, "{} has already been taken as committed", index)
            }
        }
    }
}
