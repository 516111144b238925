//! This is the Raft Distributed Consensus Protocol implemented for Rust.
//! [Raft](http://raftconsensus.github.io/) is described as:
//!
//! > Raft is a consensus algorithm that is designed to be easy to understand. It's equivalent to
//! > Paxos in fault-tolerance and performance. The difference is that it's decomposed into
//! > relatively independent subproblems, and it cleanly addresses all major pieces needed for
//! > practical systems.
//!
//! The crate is sans-I/O: a [`node::Node`] is fed received messages, timer ticks and client requests, and hands back
//! the messages it wants sent. Moving bytes between peers is left to the caller.

#![no_std]

extern crate alloc;
#[cfg(test)]
extern crate std;

#[macro_use]
mod macros;

pub mod core;
pub mod log;
pub mod message;
pub mod node;

mod prelude {
    pub use alloc::string::{String, ToString};
    pub use alloc::vec::Vec;
}
