//! Unstable, low-level API for the complete state of a Raft node.

use alloc::collections::{BTreeMap, BTreeSet, VecDeque};
use core::fmt;
use core::iter;

use bytes::Bytes;
use log::{debug, error, info, warn};
use rand_core::RngCore;

use crate::log::{CommittedIter, Log, LogState};
use crate::message::*;
use crate::node::{AppendError, Config};
use crate::prelude::*;

use self::LeadershipState::*;

/// The state of Raft log replication from a Raft node to one of its peers.
///
/// Responses to append requests do not say which request they answer. A peer answers in the order it received
/// requests, but any request may be lost, so a success is never credited beyond the smallest last index among the
/// requests it could be answering.
pub struct ReplicationState {
    // \* The next entry to send to each follower.
    // VARIABLE nextIndex
    /// The index of the next log entry to be sent to this peer.
    pub next_idx: LogIndex,

    // \* The latest entry that each follower has acknowledged is the same as the
    // \* leader's. This is used to calculate commitIndex on the leader.
    // VARIABLE matchIndex
    /// The index of the last log entry on this peer up to which the peer's log is known to match this node's log.
    pub match_idx: LogIndex,

    /// The last log index of each request sent to this peer and not yet matched with a response, oldest first.
    pub unanswered: VecDeque<LogIndex>,

    /// Whether this node is currently probing to discover the correct [`match_idx`][Self::match_idx] for this peer.
    pub send_probe: bool,

    /// Whether a heartbeat "ping" message is due to be sent to this peer.
    send_heartbeat: bool,

    /// Whether a request was sent since the last response or give-up. No further request is sent while set.
    awaiting_response: bool,

    /// Timer ticks elapsed since the last request was sent.
    inflight_ticks: u32,
}

/// Requests remembered per peer. Beyond this the oldest is forgotten, which would only matter for a response trailing
/// that many later requests.
const MAX_UNANSWERED: usize = 64;

/// The role a Raft node currently plays in its group.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Role {
    Follower,
    Candidate,
    Leader,
}

// \* Server states.
// CONSTANTS Follower, Candidate, Leader
enum LeadershipState {
    Follower(FollowerState),
    Candidate(CandidateState),
    Leader(LeaderState),
}

struct FollowerState {
    leader: Option<ServerRef>,

    election_ticks: u32,
    random_election_ticks: u32,
}

struct CandidateState {
    // VARIABLE votesGranted
    votes_granted: BTreeSet<ServerRef>,

    election_ticks: u32,
}

struct LeaderState {
    followers: BTreeMap<ServerRef, ReplicationState>,

    heartbeat_ticks: u32,
}

/// The complete state of a Raft node.
pub struct State<L, Random> {
    node_id: ServerRef,
    peers: BTreeSet<ServerRef>,
    random: Random,
    config: Config,

    // VARIABLE currentTerm
    current_term: TermId,

    // \* The candidate the server voted for in its current term, or
    // \* Nil if it hasn't voted for any.
    // VARIABLE votedFor
    voted_for: Option<ServerRef>,

    // VARIABLE state
    leadership: LeadershipState,

    // VARIABLE log
    // VARIABLE commitIndex
    log: LogState<L>,
}

#[allow(missing_docs)]
impl<L, Random> State<L, Random>
where
    L: Log,
    L::Error: fmt::Display,
    Random: RngCore,
{
    /// `node_id` names this node and is marked as local. Every member of `peers` is marked as remote; an entry with the
    /// same id as `node_id` is ignored.
    pub fn new(
        node_id: ServerRef,
        peers: BTreeSet<ServerRef>,
        log: L,
        mut random: Random,
        config: Config,
    ) -> Self {
        let node_id = ServerRef::local(node_id.id);
        let peers = (peers.into_iter())
            .filter(|peer| peer.id != node_id.id)
            .map(|peer| peer.as_peer())
            .collect();
        let random_election_ticks =
            random_election_timeout(&mut random, config.election_timeout_ticks);
        Self {
            node_id,
            peers,
            random,
            config,
            log: LogState::new(log),
            current_term: Default::default(),
            voted_for: Default::default(),
            leadership: Follower(FollowerState {
                leader: None,
                election_ticks: random_election_ticks,
                random_election_ticks,
            }),
        }
    }

    pub fn commit_idx(&self) -> &LogIndex {
        &self.log.commit_idx
    }

    pub fn last_applied(&self) -> LogIndex {
        self.log.last_taken_index()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn current_term(&self) -> &TermId {
        &self.current_term
    }

    pub fn voted_for(&self) -> Option<&ServerRef> {
        self.voted_for.as_ref()
    }

    pub fn is_leader(&self) -> bool {
        matches!(&self.leadership, Leader(_))
    }

    pub fn role(&self) -> Role {
        match &self.leadership {
            Follower(_) => Role::Follower,
            Candidate(_) => Role::Candidate,
            Leader(_) => Role::Leader,
        }
    }

    pub fn leader(&self) -> (Option<&ServerRef>, &TermId) {
        let leader = match &self.leadership {
            Follower(follower_state) => follower_state.leader.as_ref(),
            Candidate(_) => None,
            Leader(_) => Some(&self.node_id),
        };
        (leader, &self.current_term)
    }

    pub fn log(&self) -> &L {
        self.log.log()
    }

    pub fn log_mut(&mut self) -> &mut L {
        self.log.log_mut()
    }

    pub fn node_id(&self) -> &ServerRef {
        &self.node_id
    }

    pub fn peers(&self) -> &BTreeSet<ServerRef> {
        &self.peers
    }

    pub fn replication_state(&self, peer_node_id: &ServerRef) -> Option<&ReplicationState> {
        if let Leader(leader_state) = &self.leadership {
            leader_state.followers.get(peer_node_id)
        } else {
            None
        }
    }

    pub fn take_committed(&mut self) -> CommittedIter<'_, L> {
        self.log.take_committed()
    }

    pub fn timer_tick(&mut self) -> Option<SendableMessage> {
        match &mut self.leadership {
            Follower(FollowerState { election_ticks, .. })
            | Candidate(CandidateState { election_ticks, .. }) => {
                match election_ticks.saturating_sub(1) {
                    0 => {
                        info!("election timeout at {}", &self.current_term);
                        self.timeout()
                    }
                    new_election_ticks => {
                        *election_ticks = new_election_ticks;
                        None
                    }
                }
            }
            Leader(leader_state) => {
                for replication in leader_state.followers.values_mut() {
                    if replication.awaiting_response {
                        replication.inflight_ticks = replication.inflight_ticks.saturating_add(1);
                    }
                }
                match leader_state.heartbeat_ticks.saturating_sub(1) {
                    0 => {
                        leader_state.heartbeat_ticks = self.config.heartbeat_interval_ticks;
                        verbose!("sending heartbeat");
                        let give_up_ticks = self.config.heartbeat_interval_ticks.max(2);
                        for (peer, replication) in &mut leader_state.followers {
                            if replication.awaiting_response
                                && replication.inflight_ticks >= give_up_ticks
                            {
                                warn!(
                                    "no append response from {} after {} ticks, probing from {}",
                                    peer, replication.inflight_ticks, &replication.match_idx
                                );
                                // the request stays unanswered: its response may still arrive
                                replication.awaiting_response = false;
                                replication.next_idx = replication.match_idx + 1;
                                replication.send_probe = true;
                            }
                            replication.send_heartbeat = true;
                        }
                    }
                    new_heartbeat_ticks => {
                        leader_state.heartbeat_ticks = new_heartbeat_ticks;
                    }
                }
                None
            }
        }
    }

    //
    // -- raft TLA+ parallel code --
    // the state transitions and message handlers below follow the order of Raft's TLA+ specification.
    //

    // \* Server i times out and starts a new election.
    pub fn timeout(&mut self) -> Option<SendableMessage> {
        // Timeout(i) ==
        match &self.leadership {
            Follower(_) | Candidate(_) => {
                self.current_term += 1; // /\ currentTerm' = [currentTerm EXCEPT ![i] = currentTerm[i] + 1]
                self.voted_for = Some(self.node_id.clone());
                let votes_granted = iter::once(self.node_id.clone()).collect();
                let election_ticks = self.random_election_timeout();
                self.leadership = Candidate(CandidateState {
                    votes_granted,
                    election_ticks,
                });

                info!("became candidate at {}", self.current_term);
                self.become_leader();
                self.request_vote().map(|message| SendableMessage {
                    message,
                    dest: MessageDestination::Broadcast,
                })
            }
            Leader(_) => None,
        }
    }

    // \* Candidate i sends j a RequestVote request.
    fn request_vote(&mut self) -> Option<Message> {
        // RequestVote(i,j) ==
        match self.leadership {
            Candidate(_) => Some(Message {
                term: self.current_term,
                rpc: Rpc::RequestVoteReq(RequestVoteReq {
                    candidate_id: self.node_id.id.clone(),
                    last_log_index: self.log.last_index(), // mlastLogIndex |-> Len(log[i])
                    last_log_term: self.log.last_term(),   // mlastLogTerm  |-> LastTerm(log[i])
                }),
            }),
            _ => None,
        }
    }

    // \* Leader i sends j an AppendEntries request.
    pub fn append_entries(&mut self, to_node_id: ServerRef) -> Option<SendableMessage> {
        // AppendEntries(i, j) ==
        let leader_state = match &mut self.leadership {
            Leader(leader_state) => leader_state,
            _ => return None,
        };
        let replication = leader_state.followers.get_mut(&to_node_id)?;
        if replication.awaiting_response {
            return None;
        }
        let last_log_idx = self.log.last_index();
        let next_idx = replication.next_idx;
        let send_entries = last_log_idx >= next_idx && !replication.send_probe;
        if !send_entries && !replication.send_heartbeat {
            return None;
        }

        let prev_log_index = next_idx - 1; // /\ LET prevLogIndex == nextIndex[i][j] - 1
        let prev_log_term = match self.log.get_term(prev_log_index) {
            Some(prev_log_term) => prev_log_term,
            None => {
                error!("missing log {} to send to {}!", &prev_log_index, &to_node_id);
                return None;
            }
        };

        let mut entries: Vec<LogEntry> = Vec::new();
        if send_entries {
            let mut entries_size = 0usize;
            let max_entries_size = self.config.replication_chunk_size;
            let entry_log_idxs = (0..)
                .map(|idx| next_idx + idx)
                .take_while(|log_idx| *log_idx <= last_log_idx);
            for entry_log_idx in entry_log_idxs {
                let log_entry = match self.log.get(entry_log_idx) {
                    Some(log_entry) => log_entry,
                    None => {
                        error!(
                            "error fetching raft log {} to send to {}!",
                            &entry_log_idx, &to_node_id
                        );
                        break;
                    }
                };
                let new_entries_size = entries_size.saturating_add(self.log.entry_len(&log_entry));
                // the first entry is always sent, however large
                if !entries.is_empty() && new_entries_size > max_entries_size {
                    break;
                }
                entries_size = new_entries_size;
                entries.push(log_entry);
            }
        }
        let last_entry = prev_log_index + (entries.len() as u64);

        let message = Message {
            term: self.current_term, // mterm          |-> currentTerm[i],
            rpc: Rpc::AppendEntriesReq(AppendEntriesReq {
                leader_id: self.node_id.id.clone(),
                prev_log_index, // mprevLogIndex  |-> prevLogIndex,
                prev_log_term,  // mprevLogTerm   |-> prevLogTerm,
                entries,        // mentries       |-> entries,
                leader_commit: self.log.commit_idx, // mcommitIndex   |-> commitIndex[i],
            }),
        };
        replication.send_heartbeat = false;
        replication.awaiting_response = true;
        replication.inflight_ticks = 0;
        if replication.unanswered.len() >= MAX_UNANSWERED {
            warn!(
                "forgetting unanswered append request to {} up to {}",
                &to_node_id,
                replication.unanswered.front().map_or(LogIndex::default(), |idx| *idx)
            );
            replication.unanswered.pop_front();
        }
        replication.unanswered.push_back(last_entry);
        Some(SendableMessage {
            message,
            dest: MessageDestination::To(to_node_id),
        })
    }

    // \* Candidate i transitions to leader.
    fn become_leader(&mut self) {
        // BecomeLeader(i) ==
        if let Candidate(candidate_state) = &self.leadership {
            if candidate_state.votes_granted.len() >= self.quorum_size() {
                // /\ votesGranted[i] \in Quorum
                info!("became leader at {}", &self.current_term);
                let next_idx = self.log.last_index() + 1;
                self.leadership = Leader(LeaderState {
                    followers: (self.peers.iter().cloned())
                        .map(|id| {
                            (
                                id,
                                ReplicationState {
                                    next_idx, // /\ nextIndex'  = [nextIndex EXCEPT ![i] = [j \in Server |-> Len(log[i]) + 1]]
                                    match_idx: Default::default(), // /\ matchIndex' = [matchIndex EXCEPT ![i] = [j \in Server |-> 0]]
                                    unanswered: VecDeque::new(),
                                    send_probe: false,
                                    send_heartbeat: true,
                                    awaiting_response: false,
                                    inflight_ticks: 0,
                                },
                            )
                        })
                        .collect(),
                    heartbeat_ticks: self.config.heartbeat_interval_ticks,
                });
                self.advance_commit_idx();
            }
        }
    }

    // \* Leader i receives a client request to add v to the log.
    pub fn client_request(
        &mut self,
        data: Bytes,
        binary: bool,
    ) -> Result<LogIndex, AppendError<L::Error>> {
        // ClientRequest(i, v) ==
        match &self.leadership {
            Leader(_) => {
                let index = self.log.last_index() + 1;
                let entry = LogEntry {
                    term: self.current_term, // /\ LET entry == [term  |-> currentTerm[i],
                    index,
                    binary,
                    data, //                  value |-> v]
                };
                self.log.append(entry).map_err(AppendError::LogErr)?; // newLog == Append(log[i], entry)
                self.advance_commit_idx();
                Ok(index)
            }
            Follower(FollowerState { leader, .. }) => Err(AppendError::NotLeader {
                data,
                leader: leader.clone(),
            }),
            Candidate(_) => Err(AppendError::NotLeader { data, leader: None }),
        }
    }

    // \* Leader i advances its commitIndex.
    // \* This is done as a separate step from handling AppendEntries responses,
    // \* in part to minimize atomic regions, and in part so that leaders of
    // \* single-server clusters are able to mark entries committed.
    fn advance_commit_idx(&mut self) {
        // AdvanceCommitIndex(i) ==
        if let Leader(leader_state) = &self.leadership {
            let mut match_idxs: Vec<_> = (leader_state.followers.values())
                .map(|follower| follower.match_idx)
                .chain(iter::once(self.log.last_index()))
                .collect();
            // Agree(index) == {i} \cup {k \in Server : matchIndex[i][k] >= index}
            match_idxs.sort_unstable();
            let agree_idx = (match_idxs.into_iter())
                .rev()
                .nth(self.quorum_size() - 1);
            let commit_idx = match agree_idx {
                // only entries of the current term are committed by counting replicas
                Some(agree_idx) if self.log.get_term(agree_idx) == Some(self.current_term) => {
                    self.log.commit_idx.max(agree_idx)
                }
                Some(_) | None => self.log.commit_idx,
            };
            if commit_idx != self.log.commit_idx {
                debug!(
                    "committed transactions from {} to {}",
                    &self.log.commit_idx, &commit_idx
                );
            }
            self.log.commit_idx = commit_idx; // IN commitIndex' = [commitIndex EXCEPT ![i] = newCommitIndex]
        }
    }

    //
    // \* Message handlers
    // \* i = recipient, j = sender, m = message
    //

    // \* Server i receives a RequestVote request from server j with
    // \* m.mterm <= currentTerm[i].
    fn handle_vote_request(
        &mut self,
        msg_term: TermId,
        msg: RequestVoteReq,
        from: ServerRef,
    ) -> Option<SendableMessage> {
        // HandleRequestVoteRequest(i, j, m) ==
        if msg.candidate_id != from.id {
            warn!(
                "vote request from {} names candidate {}",
                &from, &msg.candidate_id
            );
        }
        let last_log_idx = self.log.last_index();
        let last_log_term = self.log.last_term();
        let log_ok = (msg.last_log_term > last_log_term)
            || (msg.last_log_term == last_log_term && msg.last_log_index >= last_log_idx);
        let grant = msg_term == self.current_term
            && log_ok
            && self.voted_for.as_ref().map(|vote| &from == vote).unwrap_or(true);
        if grant {
            self.voted_for = Some(from.clone()); // /\ \/ grant  /\ votedFor' = [votedFor EXCEPT ![i] = j]
            info!(
                "granted vote at {} with {} at {} for node {} with {} at {}",
                &self.current_term,
                &last_log_idx,
                &last_log_term,
                &from,
                &msg.last_log_index,
                &msg.last_log_term
            );
            if let Follower(FollowerState {
                election_ticks,
                random_election_ticks,
                ..
            }) = &mut self.leadership
            {
                *election_ticks = *random_election_ticks;
            }
        } else if msg_term < self.current_term {
            info!(
                "ignored message with {} < current {}: {}",
                &msg_term, &self.current_term, &msg
            );
        } else if let Some(vote) = &self.voted_for {
            info!(
                "rejected vote at {} for node {} as already voted for {}",
                &self.current_term, &from, vote
            );
        } else {
            info!(
                "rejected vote at {} with {} at {} for node {} with {} at {}",
                &self.current_term,
                &last_log_idx,
                &last_log_term,
                &from,
                &msg.last_log_index,
                &msg.last_log_term
            );
        }

        Some(SendableMessage {
            message: Message {
                term: self.current_term, // mterm        |-> currentTerm[i],
                rpc: Rpc::RequestVoteResp(RequestVoteResp { vote_granted: grant }),
            },
            dest: MessageDestination::To(from),
        })
    }

    // \* Server i receives a RequestVote response from server j with
    // \* m.mterm = currentTerm[i].
    fn handle_vote_response(&mut self, msg: RequestVoteResp, from: ServerRef) {
        // HandleRequestVoteResponse(i, j, m) ==
        if let Candidate(candidate_state) = &mut self.leadership {
            if msg.vote_granted {
                info!(
                    "received vote granted from {} at {}",
                    &from, &self.current_term
                );
                candidate_state.votes_granted.insert(from); // /\ votesGranted' = [votesGranted EXCEPT ![i] = votesGranted[i] \cup {j}]
            } else {
                info!(
                    "received vote rejected from {} at {}",
                    &from, &self.current_term
                );
            }
        }
    }

    // \* Server i receives an AppendEntries request from server j with
    // \* m.mterm <= currentTerm[i].
    fn handle_append_request(
        &mut self,
        msg_term: TermId,
        msg: AppendEntriesReq,
        from: ServerRef,
    ) -> Option<SendableMessage> {
        // HandleAppendEntriesRequest(i, j, m) ==
        let success = if msg_term < self.current_term {
            info!(
                "ignored message with {} < current {}: {}",
                &msg_term, &self.current_term, &msg
            );
            false
        } else if self.follow(&from) {
            self.append_from_leader(msg, &from)
        } else {
            false
        };

        Some(SendableMessage {
            message: Message {
                term: self.current_term,
                rpc: Rpc::AppendEntriesResp(AppendEntriesResp { success }),
            },
            dest: MessageDestination::To(from),
        })
    }

    // \* return to follower state
    fn follow(&mut self, leader: &ServerRef) -> bool {
        match &mut self.leadership {
            Candidate(_) => {
                let random_election_ticks = self.random_election_timeout();
                self.leadership = Follower(FollowerState {
                    leader: Some(leader.clone()),
                    election_ticks: random_election_ticks,
                    random_election_ticks,
                });
                info!("became follower at {} of {}", &self.current_term, leader);
                true
            }
            Follower(follower_state) => {
                if follower_state.leader.as_ref() != Some(leader) {
                    info!("became follower at {} of {}", &self.current_term, leader);
                }
                follower_state.leader = Some(leader.clone());
                follower_state.election_ticks = follower_state.random_election_ticks;
                true
            }
            Leader(_) => {
                error!(
                    "received append request as leader at {} from {}",
                    &self.current_term, leader
                );
                false
            }
        }
    }

    fn append_from_leader(&mut self, msg: AppendEntriesReq, from: &ServerRef) -> bool {
        let prev_log_idx = msg.prev_log_index;
        let our_prev_log_term = self.log.get_term(prev_log_idx);
        // LET logOk == \/ m.mprevLogIndex = 0
        //              \/ /\ m.mprevLogIndex > 0 /\ m.mprevLogIndex <= Len(log[i]) /\ m.mprevLogTerm = log[i][m.mprevLogIndex].term
        if our_prev_log_term != Some(msg.prev_log_term) {
            if let Some(our_prev_log_term) = our_prev_log_term {
                warn!(
                    "rejected append from {} with {} at {}, we have {}",
                    from, &prev_log_idx, &msg.prev_log_term, &our_prev_log_term
                );
            } else {
                info!(
                    "rejected append from {} with {}, we are behind at {}",
                    from,
                    &prev_log_idx,
                    self.log.last_index()
                );
            }
            return false;
        }

        let contiguous = (msg.entries.iter())
            .enumerate()
            .all(|(offset, entry)| entry.index == prev_log_idx + (offset as u64 + 1));
        if !contiguous {
            error!(
                "rejected append from {} with non-contiguous entries after {}",
                from, &prev_log_idx
            );
            return false;
        }

        let msg_last_log_idx = prev_log_idx + (msg.entries.len() as u64);
        for msg_entry in msg.entries {
            let msg_entry_log_idx = msg_entry.index;
            if msg_entry_log_idx == self.log.last_index() + 1 {
                if let Err(err) = self.log.append(msg_entry) {
                    error!("failed to append {}: {}", &msg_entry_log_idx, err);
                    return false;
                }
            } else if let Some(our_entry_log_term) = self.log.get_term(msg_entry_log_idx) {
                if our_entry_log_term != msg_entry.term {
                    if msg_entry_log_idx <= self.log.commit_idx {
                        error!(
                            "refusing to overwrite committed {} at {} with entry from {} at {}",
                            &msg_entry_log_idx, &our_entry_log_term, from, &msg_entry.term
                        );
                        return false;
                    }
                    match self.log.cancel_from(msg_entry_log_idx) {
                        Ok(cancelled_len) => info!(
                            "cancelled {} transactions from {}",
                            cancelled_len, &msg_entry_log_idx
                        ),
                        Err(err) => {
                            error!("failed to cancel from {}: {}", &msg_entry_log_idx, err);
                            return false;
                        }
                    }
                    if let Err(err) = self.log.append(msg_entry) {
                        error!("failed to append {}: {}", &msg_entry_log_idx, err);
                        return false;
                    }
                }
            } else {
                error!(
                    "failed to fetch log index {} to find conflicts for append!",
                    &msg_entry_log_idx
                );
                return false;
            }
        }

        // update commit index from leader
        let leader_commit = msg.leader_commit.min(msg_last_log_idx);
        if leader_commit > self.log.commit_idx {
            debug!(
                "committed transactions from {} to {}",
                &self.log.commit_idx, &leader_commit
            );
            self.log.commit_idx = leader_commit; // /\ commitIndex' = [commitIndex EXCEPT ![i] = m.mcommitIndex]
        }
        true
    }

    // \* Server i receives an AppendEntries response from server j with
    // \* m.mterm = currentTerm[i].
    fn handle_append_response(&mut self, msg: AppendEntriesResp, from: ServerRef) {
        // HandleAppendEntriesResponse(i, j, m) ==
        let replication = match &mut self.leadership {
            Leader(leader_state) => match leader_state.followers.get_mut(&from) {
                Some(replication) => replication,
                None => return,
            },
            _ => return,
        };
        // the oldest unanswered request is the earliest this response can answer
        let oldest = match replication.unanswered.pop_front() {
            Some(oldest) => oldest,
            None => {
                verbose!("discarded unexpected append response from {}", &from);
                return;
            }
        };
        // requests before it may have been lost, so it may answer any of the later ones
        let acked_idx = (replication.unanswered.iter().copied()).fold(oldest, LogIndex::min);
        replication.awaiting_response = false;

        if msg.success {
            // /\ \/ /\ m.msuccess \* successful
            if acked_idx > replication.match_idx {
                replication.match_idx = acked_idx; // /\ matchIndex' = [matchIndex EXCEPT ![i][j] = m.mmatchIndex]
            }
            replication.next_idx = replication.match_idx + 1; // /\ nextIndex'  = [nextIndex  EXCEPT ![i][j] = m.mmatchIndex + 1]
            replication.send_probe = false;
        } else {
            //    \/ /\ \lnot m.msuccess \* not successful
            if !replication.send_probe {
                info!(
                    "received append rejection at {} from {}",
                    &replication.next_idx, &from
                );
            } else {
                verbose!(
                    "received append rejection at {} from {}",
                    &replication.next_idx,
                    &from
                );
            }
            // /\ nextIndex' = [nextIndex EXCEPT ![i][j] = Max({nextIndex[i][j] - 1, 1})]
            replication.next_idx = (replication.next_idx - 1).max(replication.match_idx + 1);
            replication.send_probe = true;
            replication.send_heartbeat = true;
        }
    }

    // \* Any RPC with a newer term causes the recipient to advance its term first.
    fn update_term(&mut self, from: &ServerRef, msg: &Message) {
        // UpdateTerm(i, j, m) ==
        if msg.term > self.current_term {
            info!(
                "became follower at {} (from {}) due to message from {}: {}",
                &msg.term, &self.current_term, from, &msg
            );
            let random_election_ticks = self.random_election_timeout();
            self.current_term = msg.term; // /\ currentTerm'    = [currentTerm EXCEPT ![i] = m.mterm]
            self.leadership = Follower(FollowerState {
                leader: None,
                election_ticks: random_election_ticks,
                random_election_ticks,
            });
            self.voted_for = None; // /\ votedFor'       = [votedFor    EXCEPT ![i] = Nil]
        }
    }

    // \* Responses with stale terms are ignored.
    fn is_stale_response(&self, msg: &Message) -> bool {
        // DropStaleResponse(i, j, m) ==
        if msg.term < self.current_term {
            info!(
                "ignored message with {} < current {}: {}",
                &msg.term, &self.current_term, &msg
            );
            true
        } else {
            false
        }
    }

    // /* Receive a message.
    pub fn receive(&mut self, msg: Message, from: ServerRef) -> Option<SendableMessage> {
        // Receive(m) ==
        let from = from.as_peer();
        if !self.peers.contains(&from) {
            error!("received raft message from {} for wrong group", &from);
            return None;
        }
        self.update_term(&from, &msg); // \/ UpdateTerm(i, j, m)
        let reply = if matches!(
            msg.rpc,
            Rpc::AppendEntriesResp(_) | Rpc::RequestVoteResp(_)
        ) && self.is_stale_response(&msg)
        {
            None
        } else {
            let Message { term, rpc } = msg;
            match rpc {
                Rpc::RequestVoteReq(request) => self.handle_vote_request(term, request, from),
                Rpc::RequestVoteResp(response) => {
                    self.handle_vote_response(response, from);
                    None
                }
                Rpc::AppendEntriesReq(request) => self.handle_append_request(term, request, from),
                Rpc::AppendEntriesResp(response) => {
                    self.handle_append_response(response, from);
                    None
                }
            }
        };
        self.become_leader();
        self.advance_commit_idx();
        reply
    }

    //
    // helpers
    //

    fn quorum_size(&self) -> usize {
        quorum_size(self.peers.len())
    }

    fn random_election_timeout(&mut self) -> u32 {
        random_election_timeout(&mut self.random, self.config.election_timeout_ticks)
    }
}

/// Computes the minimum size of a quorum of nodes in a Raft group.
///
/// Returns the minimum number of nodes out of a Raft group with `peer_count` peers besides the local node necessary to
/// constitute a quorum. A quorum of reachable nodes is needed to elect a leader and append to the distributed log.
pub fn quorum_size(peer_count: usize) -> usize {
    (peer_count.saturating_add(1)) / 2 + 1
}

fn random_election_timeout(random: &mut impl RngCore, election_timeout_ticks: u32) -> u32 {
    let random = random
        .next_u32()
        .checked_rem(election_timeout_ticks)
        .unwrap_or(0);
    election_timeout_ticks.saturating_add(random)
}
