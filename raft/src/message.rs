//! Raft message types for sending between nodes.
//!
//! This module provides data types for messages to be sent between Raft nodes. The top-level message type is
//! [`Message`], which pairs the sender's term with one of the four [`Rpc`] kinds. Serialization is left to the
//! transport embedding the node.

use core::cmp::Ordering;
use core::fmt;
use core::ops::{Add, AddAssign, Sub};

use bytes::Bytes;

use crate::prelude::*;

/// A [`Message`] to be sent to a destination.
pub struct SendableMessage {
    /// The message to be sent.
    pub message: Message,

    /// The destination for the message.
    pub dest: MessageDestination,
}

/// The destination for a [`SendableMessage`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum MessageDestination {
    /// The associated message should be sent to all known peers.
    Broadcast,
    /// The associated message should be sent to one particular peer.
    To(ServerRef),
}

/// The identity of a member of a Raft group.
///
/// Two references are equal only if both the `id` and the `is_self` flag match, so a node's reference to itself never
/// collides with a peer's reference to it.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ServerRef {
    /// Whether this reference names the local node.
    pub is_self: bool,

    /// The identifier of the member, typically its listening address.
    pub id: String,
}

/// A message sent between Raft nodes.
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    /// The greatest Raft leadership term ID seen by the sender.
    pub term: TermId,

    /// The Remote Procedure Call contained by this message.
    pub rpc: Rpc,
}

/// A Remote Procedure Call message to a Raft node.
#[derive(Clone, Debug, PartialEq)]
pub enum Rpc {
    /// A request to append entries to a Raft node's log.
    AppendEntriesReq(AppendEntriesReq),

    /// A response to an [`AppendEntriesReq`] allowing or denying an append to the Raft node's log.
    AppendEntriesResp(AppendEntriesResp),

    /// A request to obtain leadership amongst Raft nodes.
    RequestVoteReq(RequestVoteReq),

    /// A response to a [`RequestVoteReq`] granting or denying leadership.
    RequestVoteResp(RequestVoteResp),
}

/// A request to append entries to a Raft node's log.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AppendEntriesReq {
    /// The ID of the leader sending the request.
    pub leader_id: String,

    /// The Raft log index immediately before the index of the first entry in [`entries`](Self::entries).
    pub prev_log_index: LogIndex,

    /// The Raft leadership term of the log entry immediately before the first entry in [`entries`](Self::entries).
    pub prev_log_term: TermId,

    /// The Raft log index of the last log entry known by the requester to be committed.
    pub leader_commit: LogIndex,

    /// A list of consecutive Raft log entries to append.
    pub entries: Vec<LogEntry>,
}

/// The response to an [`AppendEntriesReq`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AppendEntriesResp {
    /// Whether the [`AppendEntriesReq`] was accepted or not.
    pub success: bool,
}

/// A request to obtain leadership amongst Raft nodes.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RequestVoteReq {
    /// The ID of the candidate requesting the vote.
    pub candidate_id: String,

    /// The Raft log index of the last log entry stored by the candidate.
    pub last_log_index: LogIndex,

    /// The Raft leadership term of the last log entry stored by the candidate.
    pub last_log_term: TermId,
}

/// The response to a [`RequestVoteReq`] granting or denying leadership.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RequestVoteResp {
    /// Whether the [`RequestVoteReq`] was granted or not.
    pub vote_granted: bool,
}

/// An entry in a [Raft log][crate::log::Log].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LogEntry {
    /// The term of leadership of the node which appended this log entry.
    pub term: TermId,

    /// The position of this entry in the log.
    pub index: LogIndex,

    /// Whether [`data`](Self::data) is arbitrary binary rather than text.
    pub binary: bool,

    /// Arbitrary data associated with the log entry.
    pub data: Bytes,
}

/// The unique, monotonically-increasing ID for a term of Raft group leadership.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct TermId {
    /// The non-negative integer assigned to this term.
    pub id: u64,
}

/// A 1-based index into a [Raft log][crate::log::Log]. Index `0` stands for the position before the first entry.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct LogIndex {
    /// The integer representing this log index.
    pub id: u64,
}

//
// ServerRef impls
//

impl ServerRef {
    /// A reference to the local node.
    pub fn local<T: Into<String>>(id: T) -> Self {
        Self {
            is_self: true,
            id: id.into(),
        }
    }

    /// A reference to a remote peer.
    pub fn peer<T: Into<String>>(id: T) -> Self {
        Self {
            is_self: false,
            id: id.into(),
        }
    }

    /// Returns the same member as seen from another node.
    pub fn as_peer(&self) -> Self {
        Self::peer(self.id.clone())
    }
}

impl fmt::Display for ServerRef {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_self {
            write!(fmt, "{}(self)", &self.id)
        } else {
            fmt.write_str(&self.id)
        }
    }
}

//
// Message impls
//

impl fmt::Display for Message {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self { term, rpc } = self;
        fmt.debug_tuple("")
            .field(&format_args!("{}", term))
            .field(&format_args!("{}", rpc))
            .finish()
    }
}

//
// Rpc impls
//

impl Rpc {
    /// The name under which this kind of message travels on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            Rpc::AppendEntriesReq(_) => "AppendEntriesReq",
            Rpc::AppendEntriesResp(_) => "AppendEntriesResp",
            Rpc::RequestVoteReq(_) => "RequestVoteReq",
            Rpc::RequestVoteResp(_) => "RequestVoteResp",
        }
    }
}

impl fmt::Display for Rpc {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            Rpc::AppendEntriesReq(msg) => fmt::Display::fmt(msg, fmt),
            Rpc::AppendEntriesResp(msg) => fmt::Display::fmt(msg, fmt),
            Rpc::RequestVoteReq(msg) => fmt::Display::fmt(msg, fmt),
            Rpc::RequestVoteResp(msg) => fmt::Display::fmt(msg, fmt),
        }
    }
}

impl fmt::Display for AppendEntriesReq {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self {
            leader_id,
            prev_log_index,
            prev_log_term,
            leader_commit,
            entries,
        } = self;
        fmt.debug_struct("AppendEntriesReq")
            .field("leader_id", leader_id)
            .field("prev_log_index", &format_args!("{}", prev_log_index))
            .field("prev_log_term", &format_args!("{}", prev_log_term))
            .field("leader_commit", &format_args!("{}", leader_commit))
            .field("entries", &entries.len())
            .finish()
    }
}

impl fmt::Display for AppendEntriesResp {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self { success } = self;
        fmt.debug_struct("AppendEntriesResp")
            .field("success", success)
            .finish()
    }
}

impl fmt::Display for RequestVoteReq {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self {
            candidate_id,
            last_log_index,
            last_log_term,
        } = self;
        fmt.debug_struct("RequestVoteReq")
            .field("candidate_id", candidate_id)
            .field("last_log_index", &format_args!("{}", last_log_index))
            .field("last_log_term", &format_args!("{}", last_log_term))
            .finish()
    }
}

impl fmt::Display for RequestVoteResp {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self { vote_granted } = self;
        fmt.debug_struct("RequestVoteResp")
            .field("vote_granted", vote_granted)
            .finish()
    }
}

//
// LogEntry impls
//

impl LogEntry {
    /// Constructs a text entry.
    pub fn text<T: Into<Bytes>>(term: TermId, index: LogIndex, data: T) -> Self {
        Self {
            term,
            index,
            binary: false,
            data: data.into(),
        }
    }

    /// Constructs a binary entry.
    pub fn binary<T: Into<Bytes>>(term: TermId, index: LogIndex, data: T) -> Self {
        Self {
            term,
            index,
            binary: true,
            data: data.into(),
        }
    }
}

//
// TermId impls
//

impl TermId {
    pub const fn new(id: u64) -> Self {
        Self { id }
    }
}

impl fmt::Display for TermId {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self { id } = self;
        fmt.debug_tuple("TermId").field(id).finish()
    }
}

impl PartialOrd for TermId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TermId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id.cmp(&other.id)
    }
}

impl AddAssign<u64> for TermId {
    fn add_assign(&mut self, rhs: u64) {
        self.id = self
            .id
            .checked_add(rhs)
            .unwrap_or_else(|| panic!("overflow"));
    }
}

//
// LogIndex impls
//

impl LogIndex {
    pub const fn new(id: u64) -> Self {
        Self { id }
    }

    /// Subtraction with a non-negative integer, checking for overflow. Returns `self - dec`, or `None` if an overflow
    /// occurred.
    pub fn checked_sub(self, dec: u64) -> Option<Self> {
        self.id.checked_sub(dec).map(|id| Self { id })
    }
}

impl fmt::Display for LogIndex {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self { id } = self;
        fmt.debug_tuple("LogIdx").field(id).finish()
    }
}

impl PartialOrd for LogIndex {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for LogIndex {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id.cmp(&other.id)
    }
}

impl Add<u64> for LogIndex {
    type Output = Self;
    fn add(self, inc: u64) -> Self {
        Self {
            id: self
                .id
                .checked_add(inc)
                .unwrap_or_else(|| panic!("overflow")),
        }
    }
}

impl Sub<u64> for LogIndex {
    type Output = Self;
    fn sub(self, dec: u64) -> Self {
        Self {
            id: self.id.saturating_sub(dec),
        }
    }
}
