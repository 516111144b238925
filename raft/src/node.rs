//! Higher-level API for a Raft node.

use alloc::collections::BTreeSet;
use core::fmt;

use bytes::Bytes;
use rand_core::RngCore;

use crate::core::{ReplicationState, Role, State};
use crate::log::{CommittedIter, Log};
use crate::message::{LogIndex, Message, SendableMessage, ServerRef, TermId};

/// A Raft node, used for replicating a strongly-consistent distributed log of entries with arbitrary data amongst its
/// peers.
///
/// # Appending entries to the distributed log
///
/// Log entries passed to [`append`] are not guaranteed to ultimately be appended to the distributed log, and may be
/// cancelled any time [`receive`] is called before they are "committed".
///
/// The distributed log may only be appended to by the node returned by [`leader`], but even that node is not guaranteed
/// to be able to append to the log, since it must be able to send each new entry to a majority of its peers before
/// losing leadership in order for the entry to become committed. However, [`take_committed`] is guaranteed to return
/// the same entries in the same order on every node.
///
/// # Timer ticks
///
/// Timeouts in [`Node`] are driven by a timer ticking at fixed interval, with the number of ticks between timeouts
/// configured by the provided [`Config`]. The time interval and [`Config`] must be the same on all peers in a group.
///
/// # Message delivery
///
/// Messages may be lost, duplicated or delivered out of order. Lost messages are recovered by heartbeats and election
/// timeouts, at the cost of slower progress.
///
/// [`append`]: Self::append
/// [`leader`]: Self::leader
/// [`receive`]: Self::receive
/// [`take_committed`]: Self::take_committed
pub struct Node<Log, Random> {
    state: State<Log, Random>,
}

/// Configurable parameters of a Raft node.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Config {
    /// The minimum number of timer ticks between leadership elections.
    pub election_timeout_ticks: u32,

    /// The number of timer ticks between sending heartbeats to peers.
    pub heartbeat_interval_ticks: u32,

    /// The maximum number of bytes to replicate to a peer at a time.
    pub replication_chunk_size: usize,
}

/// An error returned while attempting to append to a Raft log.
#[derive(Debug)]
pub enum AppendError<E> {
    /// This node is not the leader. The entry should be resubmitted to the current leader, if one is known.
    NotLeader {
        /// Arbitrary data associated with the log entry.
        data: Bytes,
        /// The last leader this node heard from in the current term.
        leader: Option<ServerRef>,
    },
    /// An error was returned by the [`Log`](crate::log::Log) implementation.
    LogErr(E),
}

impl Default for Config {
    fn default() -> Self {
        Self {
            election_timeout_ticks: 10,
            heartbeat_interval_ticks: 3,
            replication_chunk_size: 64 * 1024,
        }
    }
}

impl<E: fmt::Display> fmt::Display for AppendError<E> {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppendError::NotLeader {
                leader: Some(leader),
                ..
            } => write!(fmt, "not the leader, try {}", leader),
            AppendError::NotLeader { leader: None, .. } => fmt.write_str("not the leader"),
            AppendError::LogErr(err) => write!(fmt, "log error: {}", err),
        }
    }
}

impl<L, Random> Node<L, Random>
where
    L: Log,
    L::Error: fmt::Display,
    Random: RngCore,
{
    /// Constructs a new Raft node with specified peers and configuration.
    ///
    /// The Raft node will start with an empty initial state. The `log` provided should also be in an empty initial
    /// state. Each Raft node in a group must be constructed with the same set of peers and `config`. `peers` may
    /// contain `node_id` or omit it to the same effect. `random` must produce different values on every node in a
    /// group.
    pub fn new(
        node_id: ServerRef,
        peers: BTreeSet<ServerRef>,
        log: L,
        random: Random,
        config: Config,
    ) -> Self {
        Self {
            state: State::new(node_id, peers, log, random, config),
        }
    }

    /// Request appending an entry with arbitrary `data` to the Raft log, returning the index it was appended at along
    /// with messages to be sent.
    ///
    /// # Errors
    ///
    /// If this node is not the leader, or the log refused the entry, an error is returned.
    #[allow(clippy::type_complexity)]
    pub fn append<T: Into<Bytes>>(
        &mut self,
        data: T,
        binary: bool,
    ) -> Result<(LogIndex, impl Iterator<Item = SendableMessage> + '_), AppendError<L::Error>> {
        let index = self.state.client_request(data.into(), binary)?;
        Ok((index, self.append_entries()))
    }

    /// Returns this node's configurable parameters.
    pub fn config(&self) -> &Config {
        self.state.config()
    }

    /// Returns whether this node is the leader of the latest known term.
    pub fn is_leader(&self) -> bool {
        self.state.is_leader()
    }

    /// Returns the role this node currently plays.
    pub fn role(&self) -> Role {
        self.state.role()
    }

    /// Returns the index of the last [`LogEntry`] which has been committed and thus may be returned by
    /// [`take_committed`].
    ///
    /// [`take_committed`]: Self::take_committed
    /// [`LogEntry`]: crate::message::LogEntry
    pub fn last_committed_log_index(&self) -> LogIndex {
        *self.state.commit_idx()
    }

    /// Returns the index of the last [`LogEntry`](crate::message::LogEntry) returned by
    /// [`take_committed`](Self::take_committed).
    pub fn last_applied_log_index(&self) -> LogIndex {
        self.state.last_applied()
    }

    /// Returns the ID of the leader, if there is one, of the latest known term, along with the term.
    pub fn leader(&self) -> (Option<&ServerRef>, TermId) {
        let (leader, term) = self.state.leader();
        (leader, *term)
    }

    /// Returns a reference to the Raft log storage.
    pub fn log(&self) -> &L {
        self.state.log()
    }

    /// Returns this node's ID.
    pub fn node_id(&self) -> &ServerRef {
        self.state.node_id()
    }

    /// Returns the IDs of this node's peers.
    pub fn peers(&self) -> &BTreeSet<ServerRef> {
        self.state.peers()
    }

    /// Processes receipt of a `message` from a peer with ID `from`, returning messages to be sent.
    #[must_use = "This function returns Raft messages to be sent."]
    pub fn receive(
        &mut self,
        message: Message,
        from: ServerRef,
    ) -> impl Iterator<Item = SendableMessage> + '_ {
        let message = self.state.receive(message, from);
        message.into_iter().chain(self.append_entries())
    }

    /// Returns the replication state corresponding to the peer with ID `peer_node_id`.
    pub fn replication_state(&self, peer_node_id: &ServerRef) -> Option<&ReplicationState> {
        self.state.replication_state(peer_node_id)
    }

    /// Returns a reference to the low-level state of the Raft node.
    pub fn state(&self) -> &State<L, Random> {
        &self.state
    }

    /// Returns an iterator yielding committed [log entries][`LogEntry`]. A given [`LogEntry`] will be yielded only once
    /// over the lifetime of a [`Node`].
    ///
    /// [`LogEntry`]: crate::message::LogEntry
    pub fn take_committed(&mut self) -> CommittedIter<'_, L> {
        self.state.take_committed()
    }

    /// Ticks forward this node's internal clock by one tick, returning messages to be sent.
    #[must_use = "This function returns Raft messages to be sent."]
    pub fn timer_tick(&mut self) -> impl Iterator<Item = SendableMessage> + '_ {
        let message = self.state.timer_tick();
        message.into_iter().chain(self.append_entries())
    }

    #[must_use = "This function returns Raft messages to be sent."]
    fn append_entries(&mut self) -> impl Iterator<Item = SendableMessage> + '_ {
        let peers = self.state.peers().clone().into_iter();
        peers.flat_map(move |peer| self.state.append_entries(peer))
    }
}
