//! Raft consensus over RESP.
//!
//! A [`RaftNode`] replicates an ordered log of opaque commands across a fixed group of peers. Peers talk over plain
//! TCP connections carrying RESP frames (see [`message`] for the layout); the consensus rules themselves live in the
//! sans-I/O `raft` crate.

#[macro_use]
extern crate log;

pub mod config;
pub mod error;
pub mod message;
pub mod node;
pub mod protocol;
pub mod transport;

pub use config::{NodeConfig, TransportConfig};
pub use error::{ConfigError, SubmitError, TransportError};
pub use node::{NodeEvent, NodeStatus, Payload, RaftNode};
pub use raft::core::Role;
pub use raft::message::{LogEntry, LogIndex, ServerRef, TermId};
