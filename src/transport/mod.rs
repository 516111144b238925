//! Peer transport: one listener, at most one connection per peer in each direction, and routing of Raft messages
//! over them.
//!
//! A single control thread owns every connection map, so all bookkeeping happens without locks. Callers,
//! connection readers and connect jobs talk to it over a channel. Each connection gets a reader thread with its own
//! [`RespParser`](crate::protocol::RespParser); a malformed frame closes that connection only. Each connection also
//! gets a writer thread fed through a bounded queue, and the control thread never writes to a socket itself: a
//! connection whose queue fills up is evicted.
//!
//! Lost connections are never retried in the background: the next [`Transport::ensure_connection`] or
//! [`Transport::send_to`] for that peer opens a new one.


mod connection;
mod handlers;
mod peers;

use std::io::{self, ErrorKind, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};

use raft::message::{Message, ServerRef};

use crate::config::TransportConfig;
use crate::error::TransportError;
use crate::message::Frame;

use connection::{read_inbound, read_outbound, ConnId, Connection, Direction, ReaderContext};
pub use handlers::{Handlers, HandlersBuilder};
use peers::Peers;
pub use peers::{ConnectionState, Outbound};

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(10);

enum Control {
    EnsureConnection(ServerRef),
    SendTo(ServerRef, Message),
    Identified {
        peer: ServerRef,
        conn_id: ConnId,
        stream: TcpStream,
    },
    Connected {
        peer: ServerRef,
        conn_id: ConnId,
        stream: TcpStream,
    },
    ConnectFailed {
        peer: ServerRef,
        conn_id: ConnId,
        error: io::Error,
    },
    Closed {
        peer: ServerRef,
        conn_id: ConnId,
        direction: Direction,
    },
    State {
        peer: ServerRef,
        reply: Sender<ConnectionState>,
    },
    Shutdown,
}

pub struct Transport {
    node_id: String,
    local_addr: SocketAddr,
    control: Sender<Control>,
    stop: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
}

impl Transport {
    /// Bind the listener and start the transport threads.
    ///
    /// Only setup can fail; once started, connection failures are logged and absorbed.
    pub fn start(config: TransportConfig, handlers: Handlers) -> Result<Transport, TransportError> {
        let listener =
            TcpListener::bind(&config.listen_addr).map_err(|source| TransportError::Bind {
                addr: config.listen_addr.clone(),
                source,
            })?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;
        let node_id = config
            .node_id
            .clone()
            .unwrap_or_else(|| local_addr.to_string());

        let pool = rayon::ThreadPoolBuilder::new()
            .thread_name(|index| format!("raft connect {}", index))
            .num_threads(config.connect_threads)
            .build()?;

        let (control, inbox) = unbounded();
        let stop = Arc::new(AtomicBool::new(false));
        let next_conn_id = Arc::new(AtomicU64::new(1));
        let context = ReaderContext {
            control: control.clone(),
            handlers: Arc::new(handlers),
            stop: stop.clone(),
            max_frame_len: config.max_frame_len,
        };

        let listener_thread = {
            let context = context.clone();
            let next_conn_id = next_conn_id.clone();
            thread::Builder::new()
                .name(format!("raft listener {}", node_id))
                .spawn(move || listen(listener, context, next_conn_id))?
        };

        let control_loop = ControlLoop {
            node_id: node_id.clone(),
            config,
            peers: Peers::default(),
            pool,
            context,
            next_conn_id,
        };
        let control_thread = match thread::Builder::new()
            .name(format!("raft transport {}", node_id))
            .spawn(move || control_loop.run(inbox))
        {
            Ok(handle) => handle,
            Err(err) => {
                stop.store(true, Ordering::Relaxed);
                let _ = listener_thread.join();
                return Err(err.into());
            }
        };

        info!("transport {} listening on {}", node_id, local_addr);
        Ok(Transport {
            node_id,
            local_addr,
            control,
            stop,
            threads: vec![control_thread, listener_thread],
        })
    }

    /// Open a connection to `peer` unless one already exists or is being opened, in either direction.
    pub fn ensure_connection(&self, peer: &ServerRef) {
        self.send_control(Control::EnsureConnection(peer.as_peer()));
    }

    /// Best effort delivery of `message` to `peer`.
    ///
    /// A connection accepted from `peer` is preferred over our own. Without any usable connection the message is
    /// dropped and a connection attempt starts.
    pub fn send_to(&self, peer: &ServerRef, message: Message) {
        self.send_control(Control::SendTo(peer.as_peer(), message));
    }

    pub fn connection_state(&self, peer: &ServerRef) -> ConnectionState {
        let (reply, state) = bounded(1);
        let query = Control::State {
            peer: peer.as_peer(),
            reply,
        };
        if self.control.send(query).is_err() {
            return ConnectionState::default();
        }
        state.recv().unwrap_or_default()
    }

    pub fn has_inbound_from(&self, peer: &ServerRef) -> bool {
        self.connection_state(peer).inbound
    }

    /// The identity announced to peers.
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop every transport thread and close every connection. Idempotent.
    pub fn shutdown(&mut self) {
        if self.threads.is_empty() {
            return;
        }
        self.stop.store(true, Ordering::Relaxed);
        let _ = self.control.send(Control::Shutdown);
        for thread in self.threads.drain(..) {
            let _ = thread.join();
        }
        info!("transport {} stopped", self.node_id);
    }

    fn send_control(&self, control: Control) {
        if self.control.send(control).is_err() {
            debug!("transport {} is stopped", self.node_id);
        }
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn listen(listener: TcpListener, context: ReaderContext, next_conn_id: Arc<AtomicU64>) {
    while !context.stop.load(Ordering::Relaxed) {
        match listener.accept() {
            Ok((stream, addr)) => {
                let id = next_conn_id.fetch_add(1, Ordering::Relaxed);
                if let Err(err) = stream.set_nonblocking(false) {
                    warn!("dropping connection {} from {}: {}", id, addr, err);
                    continue;
                }
                let _ = stream.set_nodelay(true);
                debug!("accepted connection {} from {}", id, addr);

                let context = context.clone();
                let spawned = thread::Builder::new()
                    .name(format!("raft inbound {}", id))
                    .spawn(move || read_inbound(id, stream, context));
                if let Err(err) = spawned {
                    error!("cannot start a reader for connection {}: {}", id, err);
                }
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL_INTERVAL);
            }
            Err(err) => {
                warn!("accept failed: {}", err);
                thread::sleep(ACCEPT_POLL_INTERVAL);
            }
        }
    }
}

struct ControlLoop {
    node_id: String,
    config: TransportConfig,
    peers: Peers,
    pool: rayon::ThreadPool,
    context: ReaderContext,
    next_conn_id: Arc<AtomicU64>,
}

impl ControlLoop {
    fn run(mut self, inbox: Receiver<Control>) {
        for control in inbox.iter() {
            match control {
                Control::EnsureConnection(peer) => self.ensure_connection(&peer),
                Control::SendTo(peer, message) => self.send_to(&peer, message),
                Control::Identified {
                    peer,
                    conn_id,
                    stream,
                } => self.on_identified(peer, conn_id, stream),
                Control::Connected {
                    peer,
                    conn_id,
                    stream,
                } => self.on_connected(peer, conn_id, stream),
                Control::ConnectFailed {
                    peer,
                    conn_id,
                    error,
                } => self.on_connect_failed(&peer, conn_id, error),
                Control::Closed {
                    peer,
                    conn_id,
                    direction,
                } => self.on_closed(&peer, conn_id, direction),
                Control::State { peer, reply } => {
                    let _ = reply.send(self.peers.state(&peer));
                }
                Control::Shutdown => break,
            }
        }
        self.peers.close_all();
    }

    fn ensure_connection(&mut self, peer: &ServerRef) {
        if !self.peers.slot(peer).is_linked() {
            self.connect(peer);
        }
    }

    fn send_to(&mut self, peer: &ServerRef, message: Message) {
        let kind = message.rpc.kind();
        let frame = Frame::Raft(message);
        let slot = self.peers.slot(peer);

        if let Some(conn) = &slot.inbound {
            match conn.send(&frame) {
                Ok(()) => return,
                Err(err) => {
                    warn!("evicting inbound connection {} from {}: {}", conn.id, peer, err);
                    conn.close();
                    slot.inbound = None;
                }
            }
        }

        if let Some(conn) = &slot.working {
            match conn.send(&frame) {
                Ok(()) => return,
                Err(err) => {
                    warn!("evicting connection {} to {}: {}", conn.id, peer, err);
                    conn.close();
                    slot.working = None;
                    self.context.handlers.error(peer, err.to_string());
                    self.connect(peer);
                    return;
                }
            }
        }

        if slot.pending.is_some() {
            debug!("connection to {} still pending, dropped {}", peer, kind);
            return;
        }
        debug!("no connection to {}, dropped {}", peer, kind);
        self.connect(peer);
    }

    fn connect(&mut self, peer: &ServerRef) {
        let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        self.peers.slot(peer).pending = Some(conn_id);
        debug!("connecting to {} (connection {})", peer, conn_id);

        let peer = peer.clone();
        let identity = Frame::Identity(self.node_id.clone());
        let control = self.context.control.clone();
        let (connect_timeout, write_timeout) =
            (self.config.connect_timeout, self.config.write_timeout);
        self.pool.spawn(move || {
            let outcome = match open(&peer.id, &identity, connect_timeout, write_timeout) {
                Ok(stream) => Control::Connected {
                    peer,
                    conn_id,
                    stream,
                },
                Err(error) => Control::ConnectFailed {
                    peer,
                    conn_id,
                    error,
                },
            };
            let _ = control.send(outcome);
        });
    }

    fn on_connected(&mut self, peer: ServerRef, conn_id: ConnId, stream: TcpStream) {
        let slot = self.peers.slot(&peer);
        if slot.pending != Some(conn_id) {
            error!(
                "connection {} to {} completed but {:?} is the pending one",
                conn_id, peer, slot.pending
            );
            let _ = stream.shutdown(Shutdown::Both);
            return;
        }
        slot.pending = None;

        let started = stream.try_clone().and_then(|reader| {
            let conn = Connection::start(
                conn_id,
                stream,
                self.config.write_timeout,
                self.config.send_queue_len,
            )?;
            Ok((conn, reader))
        });
        let (conn, reader) = match started {
            Ok(started) => started,
            Err(err) => {
                warn!("dropping connection {} to {}: {}", conn_id, peer, err);
                self.context.handlers.error(&peer, err.to_string());
                return;
            }
        };

        let context = self.context.clone();
        let reader_peer = peer.clone();
        let spawned = thread::Builder::new()
            .name(format!("raft outbound {}", conn_id))
            .spawn(move || read_outbound(conn_id, reader_peer, reader, context));
        if let Err(err) = spawned {
            error!("cannot start a reader for connection {}: {}", conn_id, err);
            conn.close();
            self.context.handlers.error(&peer, err.to_string());
            return;
        }
        self.peers.slot(&peer).working = Some(conn);
        info!("connected to {} (connection {})", peer, conn_id);
        self.context.handlers.connected(&peer);
    }

    fn on_connect_failed(&mut self, peer: &ServerRef, conn_id: ConnId, error: io::Error) {
        let slot = self.peers.slot(peer);
        if slot.pending == Some(conn_id) {
            slot.pending = None;
            warn!("cannot connect to {}: {}", peer, error);
            self.context.handlers.error(peer, error.to_string());
        }
    }

    fn on_identified(&mut self, peer: ServerRef, conn_id: ConnId, stream: TcpStream) {
        let conn = match Connection::start(
            conn_id,
            stream,
            self.config.write_timeout,
            self.config.send_queue_len,
        ) {
            Ok(conn) => conn,
            Err(err) => {
                warn!("dropping inbound connection {} from {}: {}", conn_id, peer, err);
                return;
            }
        };
        info!("accepted connection {} from {}", conn.id, peer);
        if let Some(previous) = self.peers.slot(&peer).inbound.replace(conn) {
            debug!("replacing inbound connection {} from {}", previous.id, peer);
            previous.close();
        }
    }

    fn on_closed(&mut self, peer: &ServerRef, conn_id: ConnId, direction: Direction) {
        let slot = self.peers.slot(peer);
        let current = match direction {
            Direction::Inbound => &mut slot.inbound,
            Direction::Outbound => &mut slot.working,
        };
        if current.as_ref().map(|conn| conn.id) == Some(conn_id) {
            *current = None;
            info!("{:?} connection {} with {} closed", direction, conn_id, peer);
            if direction == Direction::Outbound {
                self.context
                    .handlers
                    .error(peer, format!("connection {} closed", conn_id));
            }
        }
    }
}

/// Connect to the first reachable address of `addr` and announce ourselves on it.
fn open(
    addr: &str,
    identity: &Frame,
    connect_timeout: Duration,
    write_timeout: Duration,
) -> io::Result<TcpStream> {
    let mut last_error = None;
    for socket_addr in addr.to_socket_addrs()? {
        match TcpStream::connect_timeout(&socket_addr, connect_timeout) {
            Ok(mut stream) => {
                stream.set_nodelay(true)?;
                stream.set_write_timeout(Some(write_timeout))?;
                stream.write_all(&identity.to_bytes())?;
                return Ok(stream);
            }
            Err(err) => last_error = Some(err),
        }
    }
    Err(last_error.unwrap_or_else(|| {
        io::Error::new(
            ErrorKind::InvalidInput,
            format!("{} resolves to no address", addr),
        )
    }))
}
