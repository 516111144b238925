use std::time::Duration;

pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:7000";
pub const DEFAULT_MAX_FRAME_LEN: usize = 4 * 1024 * 1024;
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(1);
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(1);
pub const DEFAULT_CONNECT_THREADS: usize = 4;
pub const DEFAULT_SEND_QUEUE_LEN: usize = 64;
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Clone, Debug)]
pub struct TransportConfig {
    /// Identity announced to peers. Defaults to the address actually bound, which must be reachable by them.
    pub node_id: Option<String>,
    pub listen_addr: String,
    pub connect_timeout: Duration,
    pub write_timeout: Duration,
    /// Largest frame, complete or still being received, a connection may buffer.
    pub max_frame_len: usize,
    pub connect_threads: usize,
    /// Frames queued per connection before it is considered stalled and evicted.
    pub send_queue_len: usize,
}

impl TransportConfig {
    pub fn new<A: Into<String>>(listen_addr: A) -> Self {
        TransportConfig {
            listen_addr: listen_addr.into(),
            ..Default::default()
        }
    }

    pub fn with_node_id<T: Into<String>>(mut self, node_id: T) -> Self {
        self.node_id = Some(node_id.into());
        self
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn with_write_timeout(mut self, write_timeout: Duration) -> Self {
        self.write_timeout = write_timeout;
        self
    }

    pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len;
        self
    }

    pub fn with_connect_threads(mut self, connect_threads: usize) -> Self {
        self.connect_threads = connect_threads;
        self
    }

    pub fn with_send_queue_len(mut self, send_queue_len: usize) -> Self {
        self.send_queue_len = send_queue_len;
        self
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            node_id: None,
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            connect_threads: DEFAULT_CONNECT_THREADS,
            send_queue_len: DEFAULT_SEND_QUEUE_LEN,
        }
    }
}

/// Everything a [`RaftNode`](crate::node::RaftNode) needs to join a group.
///
/// `peers` lists the node ids of the other members; the local id may be listed too and is ignored. Every member must
/// run with the same `tick_interval` and `raft` parameters.
#[derive(Clone, Debug)]
pub struct NodeConfig {
    pub transport: TransportConfig,
    pub peers: Vec<String>,
    pub tick_interval: Duration,
    pub raft: raft::node::Config,
}

impl NodeConfig {
    pub fn new<A: Into<String>>(listen_addr: A, peers: Vec<String>) -> Self {
        NodeConfig {
            transport: TransportConfig::new(listen_addr),
            peers,
            tick_interval: DEFAULT_TICK_INTERVAL,
            raft: raft::node::Config::default(),
        }
    }

    pub fn with_transport(mut self, transport: TransportConfig) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_tick_interval(mut self, tick_interval: Duration) -> Self {
        self.tick_interval = tick_interval;
        self
    }

    pub fn with_raft(mut self, raft: raft::node::Config) -> Self {
        self.raft = raft;
        self
    }
}
