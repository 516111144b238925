#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

use rand_core::{RngCore, SeedableRng};

use raft::core::State;
use raft::log::memory::InMemoryLog;
use raft::message::{
    LogEntry, LogIndex, Message, MessageDestination, Rpc, SendableMessage, ServerRef, TermId,
};
use raft::node::Config;
use rand_chacha::ChaChaRng;

pub const CONFIG: Config = Config {
    election_timeout_ticks: 10,
    heartbeat_interval_ticks: 3,
    replication_chunk_size: 1024,
};
const RANDOM_SEED: u64 = 0;
const MAX_TICKS: u32 = 100_000;

pub type TestRaft = State<InMemoryLog, ChaChaRng>;

pub struct TestRaftGroup {
    pub nodes: Vec<TestRaft>,
    pub tick: u32,
    pub config: TestRaftGroupConfig,
    pub dropped_messages: Vec<(ServerRef, SendableMessage)>,
    pub delivery: Delivery,
}

/// Holds messages back for a random number of ticks. Messages between the same pair of nodes keep their order, as
/// they would on one connection, while different pairs overtake each other.
#[derive(Default)]
pub struct Delivery {
    pub max_delay_ticks: u32,
    random: Option<ChaChaRng>,
    held: Vec<(u32, ServerRef, SendableMessage)>,
    link_release: BTreeMap<(ServerRef, ServerRef), u32>,
}

#[derive(Clone, Default)]
pub struct TestRaftGroupConfig {
    pub drops: BTreeSet<(Option<ServerRef>, Option<ServerRef>)>,
    pub down: BTreeSet<ServerRef>,
}

pub struct TestLogger;

pub struct TestLoggerContext {
    node_id: Option<ServerRef>,
    tick: Option<u32>,
}

pub fn node_id(id: u64) -> ServerRef {
    ServerRef::peer(format!("n{}", id))
}

pub fn rpc_types() -> [Rpc; 4] {
    [
        Rpc::RequestVoteReq(Default::default()),
        Rpc::RequestVoteResp(Default::default()),
        Rpc::AppendEntriesReq(Default::default()),
        Rpc::AppendEntriesResp(Default::default()),
    ]
}

pub fn init_random() -> ChaChaRng {
    ChaChaRng::seed_from_u64(RANDOM_SEED)
}

pub fn entry(term: u64, index: u64, data: &'static str) -> LogEntry {
    LogEntry::text(TermId::new(term), LogIndex::new(index), data)
}

pub fn raft(
    id: u64,
    peers: Vec<u64>,
    log: Option<InMemoryLog>,
    random: &mut impl RngCore,
) -> TestRaft {
    TestLogger::init();
    State::new(
        ServerRef::local(node_id(id).id),
        peers.into_iter().map(node_id).collect(),
        log.unwrap_or_else(InMemoryLog::new),
        ChaChaRng::seed_from_u64(random.next_u64()),
        CONFIG,
    )
}

pub fn config() -> TestRaftGroupConfig {
    TestRaftGroupConfig::default()
}

pub fn send(raft: &mut TestRaft, from: u64, term: TermId, rpc: Rpc) -> Option<SendableMessage> {
    raft.receive(Message { term, rpc }, node_id(from))
}

pub fn append_entries<'a>(
    node: &'a mut TestRaft,
    peers: impl IntoIterator<Item = ServerRef> + 'a,
) -> impl Iterator<Item = SendableMessage> + 'a {
    let self_id = node.node_id().id.clone();
    peers.into_iter().flat_map(move |append_to_node_id| {
        if append_to_node_id.id != self_id {
            node.append_entries(append_to_node_id)
        } else {
            None
        }
    })
}

pub fn run_group<'a>(
    nodes: impl Iterator<Item = &'a mut TestRaft> + ExactSizeIterator,
    initial_messages: impl IntoIterator<Item = (ServerRef, SendableMessage)>,
    start_tick: u32,
    ticks: Option<u32>,
    config: &mut TestRaftGroupConfig,
    dropped_messages: &mut Vec<(ServerRef, SendableMessage)>,
    delivery: &mut Delivery,
) {
    let mut nodes: Vec<_> = nodes.collect();
    let node_ids: Vec<_> = nodes.iter().map(|node| node.node_id().as_peer()).collect();
    let mut messages = VecDeque::with_capacity(nodes.len() * nodes.len());
    messages.extend(
        initial_messages
            .into_iter()
            .map(|(from, message)| (from, message, false)),
    );

    for tick in 0..ticks.unwrap_or(1) {
        let now = start_tick + tick;
        TestLogger::set_tick(Some(now));
        messages.extend(
            (delivery.release(now).into_iter()).map(|(from, message)| (from, message, true)),
        );
        if ticks.is_some() {
            for node in &mut nodes {
                let node_id = node.node_id().as_peer();
                if !config.is_node_down(&node_id) {
                    TestLogger::set_node_id(Some(node_id.clone()));
                    messages.extend(
                        node.timer_tick()
                            .map(|message| (node_id.clone(), message, false)),
                    );
                    messages.extend(
                        append_entries(node, node_ids.iter().cloned())
                            .map(|message| (node_id.clone(), message, false)),
                    );
                }
            }
        }

        while let Some((from, sendable, released)) = messages.pop_front() {
            let (reply_to_node_id, to_node_count) = match &sendable.dest {
                MessageDestination::Broadcast => (None, nodes.len().saturating_sub(1)),
                MessageDestination::To(to) => (Some(to.as_peer()), 1),
            };
            let to_nodes = nodes.iter_mut().filter(|node| match &reply_to_node_id {
                Some(to_node_id) => node.node_id().id == to_node_id.id,
                None => node.node_id().id != from.id,
            });

            for (to_node, message) in Iterator::zip(
                to_nodes,
                itertools::repeat_n(sendable.message.clone(), to_node_count),
            ) {
                let to_node_id = to_node.node_id().as_peer();
                TestLogger::set_node_id(Some(to_node_id.clone()));
                if config.should_drop(&from, &to_node_id) {
                    log::info!("<- {} DROPPED {}", from, message);
                    dropped_messages.push((
                        from.clone(),
                        SendableMessage {
                            message,
                            dest: MessageDestination::To(to_node_id.clone()),
                        },
                    ));
                } else if !released && delivery.hold(now, &from, &to_node_id, &message) {
                    log::info!("<- {} DELAYED {}", from, message);
                } else {
                    log::info!("<- {} {}", from, message);
                    messages.extend(
                        to_node
                            .receive(message, from.clone())
                            .map(|message| (to_node_id.clone(), message, false)),
                    );
                }
                messages.extend(
                    append_entries(to_node, node_ids.iter().cloned())
                        .map(|message| (to_node_id.clone(), message, false)),
                );
            }
        }
    }
    TestLogger::set_tick(None);
    TestLogger::set_node_id(None);
}

//
// TestRaftGroup impls
//

impl TestRaftGroup {
    pub fn new(size: u64, random: &mut impl RngCore, config: TestRaftGroupConfig) -> Self {
        let nodes: Vec<u64> = (0..size).collect();
        Self {
            nodes: nodes
                .iter()
                .map(|id| raft(*id, nodes.clone(), None, random))
                .collect(),
            tick: 0,
            config,
            dropped_messages: Default::default(),
            delivery: Default::default(),
        }
    }

    pub fn with_delays(mut self, max_delay_ticks: u32, random: &mut impl RngCore) -> Self {
        self.delivery = Delivery::delayed(max_delay_ticks, random);
        self
    }

    pub fn run_until(&mut self, mut until_fun: impl FnMut(&mut Self) -> bool) -> &mut Self {
        let mut ticks_remaining = MAX_TICKS;
        while !until_fun(self) {
            ticks_remaining = ticks_remaining
                .checked_sub(1)
                .expect("condition failed after maximum simulation length");
            self.run_tick();
        }
        self
    }

    pub fn run_until_commit(&mut self, mut until_fun: impl FnMut(&LogEntry) -> bool) -> &mut Self {
        self.run_until(|group| {
            let result = group.take_committed().any(|commit| until_fun(&commit));
            group.take_committed().for_each(drop);
            result
        })
    }

    pub fn run_for(&mut self, ticks: u32) -> &mut Self {
        self.run_for_inspect(ticks, |_| ())
    }

    pub fn run_for_inspect(&mut self, ticks: u32, mut fun: impl FnMut(&mut Self)) -> &mut Self {
        for _ in 0..ticks {
            self.run_tick();
            fun(self);
        }
        self
    }

    pub fn run_on_node(
        &mut self,
        node_idx: usize,
        fun: impl FnOnce(&mut TestRaft) -> Option<SendableMessage>,
    ) -> &mut Self {
        let node_id = self.nodes[node_idx].node_id().as_peer();
        let messages = fun(&mut self.nodes[node_idx]).map(|message| (node_id, message));
        run_group(
            self.nodes.iter_mut(),
            messages,
            self.tick,
            None,
            &mut self.config,
            &mut self.dropped_messages,
            &mut self.delivery,
        );
        self
    }

    pub fn inspect(&mut self, fun: impl FnOnce(&Self)) -> &mut Self {
        fun(self);
        self
    }

    pub fn modify(&mut self, fun: impl FnOnce(&mut Self)) -> &mut Self {
        fun(self);
        self
    }

    pub fn take_committed(&mut self) -> impl Iterator<Item = LogEntry> + '_ {
        self.nodes.iter_mut().flat_map(|node| node.take_committed())
    }

    pub fn has_leader(&self) -> bool {
        self.nodes.iter().any(|node| node.is_leader())
    }

    pub fn leaders(&self) -> impl Iterator<Item = &TestRaft> + '_ {
        self.nodes.iter().filter(|node| node.is_leader())
    }

    fn run_tick(&mut self) {
        self.tick += 1;
        run_group(
            self.nodes.iter_mut(),
            None,
            self.tick,
            Some(1),
            &mut self.config,
            &mut self.dropped_messages,
            &mut self.delivery,
        );
    }
}

//
// Delivery impls
//

impl Delivery {
    pub fn delayed(max_delay_ticks: u32, random: &mut impl RngCore) -> Self {
        Self {
            max_delay_ticks,
            random: Some(ChaChaRng::seed_from_u64(random.next_u64())),
            ..Default::default()
        }
    }

    pub fn held_count(&self) -> usize {
        self.held.len()
    }

    /// Returns `true` if `message` is held back instead of being delivered at `tick`.
    fn hold(&mut self, tick: u32, from: &ServerRef, to: &ServerRef, message: &Message) -> bool {
        let random = match &mut self.random {
            Some(random) => random,
            None => return false,
        };
        let delay = random.next_u32() % self.max_delay_ticks.saturating_add(1);
        let link = (from.clone(), to.clone());
        let release = (self.link_release.get(&link).copied())
            .unwrap_or_default()
            .max(tick + delay);
        if release <= tick {
            return false;
        }
        self.link_release.insert(link, release);
        self.held.push((
            release,
            from.clone(),
            SendableMessage {
                message: message.clone(),
                dest: MessageDestination::To(to.clone()),
            },
        ));
        true
    }

    fn release(&mut self, tick: u32) -> Vec<(ServerRef, SendableMessage)> {
        let (due, held): (Vec<_>, Vec<_>) =
            (self.held.drain(..)).partition(|(release, _, _)| *release <= tick);
        self.held = held;
        due.into_iter()
            .map(|(_, from, message)| (from, message))
            .collect()
    }
}

//
// TestRaftGroupConfig impls
//

impl TestRaftGroupConfig {
    pub fn node_down(mut self, id: u64) -> Self {
        self.down.insert(node_id(id));
        self
    }

    pub fn isolate(mut self, id: u64) -> Self {
        self.drops.insert((Some(node_id(id)), None));
        self.drops.insert((None, Some(node_id(id))));
        self
    }

    pub fn drop_between(mut self, from: u64, to: u64) -> Self {
        self.drops.insert((Some(node_id(from)), Some(node_id(to))));
        self.drops.insert((Some(node_id(to)), Some(node_id(from))));
        self
    }

    pub fn drop_to(mut self, id: u64) -> Self {
        self.drops.insert((None, Some(node_id(id))));
        self
    }

    pub fn is_node_down(&self, node_id: &ServerRef) -> bool {
        self.down.contains(node_id)
    }

    pub fn should_drop(&self, from: &ServerRef, to: &ServerRef) -> bool {
        self.drops.contains(&(Some(from.clone()), Some(to.clone())))
            || self.drops.contains(&(Some(from.clone()), None))
            || self.drops.contains(&(None, Some(to.clone())))
            || self.down.contains(from)
            || self.down.contains(to)
    }
}

//
// TestLogger impls
//

thread_local! {
    static LOGGER_CONTEXT: RefCell<TestLoggerContext> = RefCell::new(TestLoggerContext::new());
}

impl TestLogger {
    pub fn init() {
        let _ignore = log::set_logger(&Self);
        log::set_max_level(log::LevelFilter::Debug);
    }
    pub fn set_node_id(node_id: Option<ServerRef>) {
        LOGGER_CONTEXT.with(|context| {
            context.borrow_mut().node_id = node_id;
        });
    }
    pub fn set_tick(tick: Option<u32>) {
        LOGGER_CONTEXT.with(|context| {
            context.borrow_mut().tick = tick;
        });
    }
}

impl log::Log for TestLogger {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        LOGGER_CONTEXT.with(|context| {
            let context = context.borrow();
            match (&context.node_id, context.tick) {
                (Some(node_id), Some(tick)) => {
                    eprintln!("tick {:03} {} {}", tick, node_id, record.args())
                }
                (Some(node_id), None) => eprintln!("tick ??? {} {}", node_id, record.args()),
                (None, _) => eprintln!("{}", record.args()),
            }
        })
    }

    fn flush(&self) {}
}

impl TestLoggerContext {
    const fn new() -> Self {
        Self {
            node_id: None,
            tick: None,
        }
    }
}
