use std::io;

use thiserror::Error;

use raft::message::ServerRef;

use crate::message::DecodeError;
use crate::protocol::RespError;

/// Failure to bring up or run the peer transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("cannot listen on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("cannot build the connect pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    #[error("a handler for {0} is already registered")]
    HandlerAlreadySet(&'static str),
}

/// Why a single peer connection was closed. Never escapes the transport; it is logged and the connection dropped.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("malformed frame: {0}")]
    Resp(#[from] RespError),

    #[error("undecodable message: {0}")]
    Decode(#[from] DecodeError),

    #[error("{0} received before the peer identified itself")]
    Unidentified(&'static str),

    #[error("peer {0} identified itself twice")]
    DuplicateIdentity(String),

    #[error("{0} frames already queued, the peer is not reading")]
    QueueFull(usize),

    #[error("the writer has stopped")]
    WriterStopped,
}

/// Failure to append a command to the replicated log.
#[derive(Debug, Error, PartialEq)]
pub enum SubmitError {
    #[error("not the leader, last known leader is {leader:?}")]
    NotLeader { leader: Option<ServerRef> },

    #[error("log error: {0}")]
    Log(String),

    #[error("the node has been shut down")]
    Stopped,
}
