//! A Raft group member running on its own thread.
//!
//! [`RaftNode`] wires a [`raft::node::Node`] to a [`Transport`] and a timer. All engine state lives on one actor
//! thread which takes, in arrival order, timer ticks, messages from peers and client commands. Committed entries
//! are handed to the `on_committed` callback and published as [`NodeEvent::Committed`].


use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::Bytes;
use crossbeam_channel::{bounded, select, tick, unbounded, Receiver, Sender};
use mpb::MPB;
use rand::rngs::StdRng;
use rand::SeedableRng;

use raft::core::Role;
use raft::log::memory::InMemoryLog;
use raft::message::{LogEntry, LogIndex, Message, MessageDestination, SendableMessage, ServerRef, TermId};
use raft::node::{AppendError, Node};

use crate::config::NodeConfig;
use crate::error::{SubmitError, TransportError};
use crate::transport::{Handlers, Transport};

type Engine = Node<InMemoryLog, StdRng>;
type CommitCallback = Box<dyn FnMut(&LogEntry) + Send>;

/// An opaque command to replicate.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Payload {
    Text(Bytes),
    Binary(Bytes),
}

#[derive(Clone, Debug, PartialEq)]
pub enum NodeEvent {
    RoleChanged(Role),
    LeaderChanged(Option<ServerRef>),
    Committed(LogEntry),
}

/// What the node last reported about itself.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NodeStatus {
    pub role: Role,
    pub leader: Option<ServerRef>,
    pub term: TermId,
    pub commit_index: LogIndex,
}

enum Input {
    Raft(ServerRef, Message),
    Submit(Payload, Sender<Result<LogIndex, SubmitError>>),
    Shutdown,
}

pub struct RaftNodeBuilder {
    config: NodeConfig,
    on_committed: Option<CommitCallback>,
}

pub struct RaftNode {
    node_id: ServerRef,
    inbox: Sender<Input>,
    status: Arc<Mutex<NodeStatus>>,
    events: MPB<NodeEvent>,
    thread: Option<JoinHandle<()>>,
}

struct Actor {
    engine: Engine,
    transport: Transport,
    status: Arc<Mutex<NodeStatus>>,
    events: Sender<NodeEvent>,
    on_committed: Option<CommitCallback>,
}

impl Payload {
    fn into_parts(self) -> (Bytes, bool) {
        match self {
            Payload::Text(data) => (data, false),
            Payload::Binary(data) => (data, true),
        }
    }
}

impl From<&'static str> for Payload {
    fn from(text: &'static str) -> Self {
        Payload::Text(Bytes::from_static(text.as_bytes()))
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::Text(Bytes::from(text))
    }
}

impl Default for NodeStatus {
    fn default() -> Self {
        NodeStatus {
            role: Role::Follower,
            leader: None,
            term: TermId::default(),
            commit_index: LogIndex::default(),
        }
    }
}

impl RaftNodeBuilder {
    /// Called on the node thread, once per committed entry, in log order.
    pub fn on_committed<F>(mut self, on_committed: F) -> Self
    where
        F: FnMut(&LogEntry) + Send + 'static,
    {
        self.on_committed = Some(Box::new(on_committed));
        self
    }

    /// Start listening, connect to the configured peers and start the node thread.
    pub fn start(self) -> Result<RaftNode, TransportError> {
        let RaftNodeBuilder {
            config,
            on_committed,
        } = self;

        let (inbox, inputs) = unbounded();
        let to_inbox = inbox.clone();
        let handlers = Handlers::builder()
            .on_any_message(move |from, message| {
                let _ = to_inbox.send(Input::Raft(from, message));
            })?
            .build();
        let transport = Transport::start(config.transport.clone(), handlers)?;

        let node_id = ServerRef::local(transport.node_id());
        let peers: BTreeSet<ServerRef> = config
            .peers
            .iter()
            .filter(|peer| peer.as_str() != node_id.id)
            .map(ServerRef::peer)
            .collect();
        for peer in &peers {
            transport.ensure_connection(peer);
        }

        let engine = Node::new(
            node_id.clone(),
            peers,
            InMemoryLog::new(),
            StdRng::from_entropy(),
            config.raft.clone(),
        );
        let status = Arc::new(Mutex::new(NodeStatus::default()));
        let events = MPB::new();
        let actor = Actor {
            engine,
            transport,
            status: status.clone(),
            events: events.sender(),
            on_committed,
        };

        let tick_interval = config.tick_interval;
        let thread = thread::Builder::new()
            .name(format!("raft node {}", node_id.id))
            .spawn(move || actor.run(inputs, tick_interval))?;

        info!("node {} started with peers {:?}", node_id, config.peers);
        Ok(RaftNode {
            node_id,
            inbox,
            status,
            events,
            thread: Some(thread),
        })
    }
}

impl RaftNode {
    pub fn builder(config: NodeConfig) -> RaftNodeBuilder {
        RaftNodeBuilder {
            config,
            on_committed: None,
        }
    }

    /// Append a command to the replicated log, returning the index it was given.
    ///
    /// The index is not a commitment: the entry may still be replaced if leadership changes before it commits.
    pub fn submit_command<P: Into<Payload>>(&self, payload: P) -> Result<LogIndex, SubmitError> {
        let (reply, result) = bounded(1);
        self.inbox
            .send(Input::Submit(payload.into(), reply))
            .map_err(|_| SubmitError::Stopped)?;
        result.recv().map_err(|_| SubmitError::Stopped)?
    }

    pub fn node_id(&self) -> &ServerRef {
        &self.node_id
    }

    pub fn status(&self) -> NodeStatus {
        match self.status.lock() {
            Ok(status) => status.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn role(&self) -> Role {
        self.status().role
    }

    pub fn is_leader(&self) -> bool {
        self.role() == Role::Leader
    }

    pub fn leader_hint(&self) -> Option<ServerRef> {
        self.status().leader
    }

    pub fn term(&self) -> TermId {
        self.status().term
    }

    pub fn commit_index(&self) -> LogIndex {
        self.status().commit_index
    }

    /// Events from now on; earlier ones are not replayed.
    pub fn subscribe(&self) -> Receiver<NodeEvent> {
        self.events.subscribe()
    }

    /// Stop the node thread and its transport. Idempotent.
    pub fn shutdown(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = self.inbox.send(Input::Shutdown);
            let _ = thread.join();
            info!("node {} stopped", self.node_id);
        }
    }
}

impl Drop for RaftNode {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Actor {
    fn run(mut self, inputs: Receiver<Input>, tick_interval: Duration) {
        let ticker = tick(tick_interval);
        loop {
            select! {
                recv(ticker) -> _ => {
                    let messages: Vec<_> = self.engine.timer_tick().collect();
                    self.send(messages);
                }
                recv(inputs) -> input => match input {
                    Ok(Input::Raft(from, message)) => {
                        let messages: Vec<_> = self.engine.receive(message, from).collect();
                        self.send(messages);
                    }
                    Ok(Input::Submit(payload, reply)) => {
                        let _ = reply.send(self.submit(payload));
                    }
                    Ok(Input::Shutdown) | Err(_) => break,
                },
            }
            self.publish();
        }
        self.transport.shutdown();
    }

    fn submit(&mut self, payload: Payload) -> Result<LogIndex, SubmitError> {
        let (data, binary) = payload.into_parts();
        let (index, messages) = match self.engine.append(data, binary) {
            Ok((index, messages)) => (index, messages.collect::<Vec<_>>()),
            Err(AppendError::NotLeader { leader, .. }) => {
                return Err(SubmitError::NotLeader { leader })
            }
            Err(AppendError::LogErr(err)) => return Err(SubmitError::Log(err.to_string())),
        };
        debug!("command appended at {}", index);
        self.send(messages);
        Ok(index)
    }

    fn send(&self, messages: Vec<SendableMessage>) {
        for SendableMessage { message, dest } in messages {
            match dest {
                MessageDestination::Broadcast => {
                    for peer in self.engine.peers() {
                        self.transport.send_to(peer, message.clone());
                    }
                }
                MessageDestination::To(peer) => self.transport.send_to(&peer, message),
            }
        }
    }

    /// Apply newly committed entries and report any change of role or leader.
    fn publish(&mut self) {
        let committed: Vec<LogEntry> = self.engine.take_committed().collect();
        for entry in committed {
            if let Some(on_committed) = self.on_committed.as_mut() {
                on_committed(&entry);
            }
            let _ = self.events.send(NodeEvent::Committed(entry));
        }

        let (leader, term) = self.engine.leader();
        let current = NodeStatus {
            role: self.engine.role(),
            leader: leader.cloned(),
            term,
            commit_index: self.engine.last_committed_log_index(),
        };

        let mut status = match self.status.lock() {
            Ok(status) => status,
            Err(poisoned) => poisoned.into_inner(),
        };
        if status.role != current.role {
            info!("{} is now {:?} in {}", self.engine.node_id(), current.role, current.term);
            let _ = self.events.send(NodeEvent::RoleChanged(current.role));
        }
        if status.leader != current.leader {
            let _ = self.events.send(NodeEvent::LeaderChanged(current.leader.clone()));
        }
        *status = current;
    }
}
