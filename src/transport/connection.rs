use std::io::{self, ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

use raft::message::ServerRef;

use crate::error::ConnectionError;
use crate::message::Frame;
use crate::protocol::{Parsed, RespParser};

use super::handlers::Handlers;
use super::Control;

pub type ConnId = u64;

const READ_BUFFER_LEN: usize = 16 * 1024;
const READ_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Direction {
    /// Accepted by our listener.
    Inbound,
    /// Opened by us.
    Outbound,
}

/// The writing half of a peer connection, owned by the control thread.
///
/// Frames are handed to a writer thread through a bounded queue, so a peer that stops reading holds up nothing but
/// its own connection.
#[derive(Debug)]
pub struct Connection {
    pub id: ConnId,
    stream: TcpStream,
    frames: Sender<Bytes>,
    queue_len: usize,
}

impl Connection {
    /// Start the writer thread of `stream`. On failure the socket is shut down.
    pub fn start(
        id: ConnId,
        stream: TcpStream,
        write_timeout: Duration,
        queue_len: usize,
    ) -> io::Result<Self> {
        let queue_len = queue_len.max(1);
        match spawn_writer(id, &stream, write_timeout, queue_len) {
            Ok(frames) => Ok(Connection {
                id,
                stream,
                frames,
                queue_len,
            }),
            Err(err) => {
                let _ = stream.shutdown(Shutdown::Both);
                Err(err)
            }
        }
    }

    /// Queue `frame` for the writer without waiting.
    pub fn send(&self, frame: &Frame) -> Result<(), ConnectionError> {
        self.frames
            .try_send(frame.to_bytes())
            .map_err(|err| match err {
                TrySendError::Full(_) => ConnectionError::QueueFull(self.queue_len),
                TrySendError::Disconnected(_) => ConnectionError::WriterStopped,
            })
    }

    /// Close both directions; the reader and writer threads of this connection notice and exit.
    pub fn close(&self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

fn spawn_writer(
    id: ConnId,
    stream: &TcpStream,
    write_timeout: Duration,
    queue_len: usize,
) -> io::Result<Sender<Bytes>> {
    stream.set_write_timeout(Some(write_timeout))?;
    let writer = stream.try_clone()?;
    let (frames, queue) = bounded(queue_len);
    thread::Builder::new()
        .name(format!("raft writer {}", id))
        .spawn(move || write_frames(id, writer, queue))?;
    Ok(frames)
}

fn write_frames(id: ConnId, mut stream: TcpStream, queue: Receiver<Bytes>) {
    for bytes in queue.iter() {
        if let Err(err) = stream.write_all(&bytes).and_then(|()| stream.flush()) {
            warn!("write on connection {} failed: {}", id, err);
            // the reader sees the socket go and reports the connection closed
            let _ = stream.shutdown(Shutdown::Both);
            return;
        }
    }
}

/// Everything a reader thread needs besides its socket.
#[derive(Clone)]
pub(super) struct ReaderContext {
    pub(super) control: Sender<Control>,
    pub(super) handlers: Arc<Handlers>,
    pub(super) stop: Arc<AtomicBool>,
    pub(super) max_frame_len: usize,
}

/// Read an accepted connection: the first frame must name the peer, everything after is Raft traffic from it.
pub(super) fn read_inbound(id: ConnId, stream: TcpStream, context: ReaderContext) {
    let mut peer: Option<ServerRef> = None;
    let result = read_frames(&stream, &context, |frame| match frame {
        Frame::Identity(peer_id) => {
            if let Some(peer) = &peer {
                return Err(ConnectionError::DuplicateIdentity(peer.id.clone()));
            }
            let identified = ServerRef::peer(peer_id);
            let writer = stream.try_clone()?;
            debug!("connection {} identified as {}", id, identified);
            let _ = context.control.send(Control::Identified {
                peer: identified.clone(),
                conn_id: id,
                stream: writer,
            });
            peer = Some(identified);
            Ok(())
        }
        Frame::Raft(message) => match &peer {
            Some(peer) => {
                context.handlers.dispatch(peer.clone(), message);
                Ok(())
            }
            None => Err(ConnectionError::Unidentified(message.rpc.kind())),
        },
    });

    finish(id, &stream, peer, Direction::Inbound, result, &context);
}

/// Read the replies a peer sends back on a connection we opened to it.
pub(super) fn read_outbound(id: ConnId, peer: ServerRef, stream: TcpStream, context: ReaderContext) {
    let result = read_frames(&stream, &context, |frame| match frame {
        Frame::Identity(_) => Err(ConnectionError::DuplicateIdentity(peer.id.clone())),
        Frame::Raft(message) => {
            context.handlers.dispatch(peer.clone(), message);
            Ok(())
        }
    });

    finish(id, &stream, Some(peer), Direction::Outbound, result, &context);
}

fn finish(
    id: ConnId,
    stream: &TcpStream,
    peer: Option<ServerRef>,
    direction: Direction,
    result: Result<(), ConnectionError>,
    context: &ReaderContext,
) {
    let name = peer.as_ref().map(|peer| peer.id.as_str()).unwrap_or("unidentified peer");
    match result {
        Ok(()) => debug!("{:?} connection {} with {} closed", direction, id, name),
        Err(ConnectionError::Io(err)) => {
            warn!("{:?} connection {} with {} lost: {}", direction, id, name, err)
        }
        Err(err) => error!("closing {:?} connection {} with {}: {}", direction, id, name, err),
    }

    let _ = stream.shutdown(Shutdown::Both);
    if let Some(peer) = peer {
        let _ = context.control.send(Control::Closed {
            peer,
            conn_id: id,
            direction,
        });
    }
}

/// Feed everything read from `stream` through a fresh parser, handing each decoded frame to `on_frame`.
///
/// Returns `Ok` on a clean close by the remote side or when the transport stops.
fn read_frames<F>(
    mut stream: &TcpStream,
    context: &ReaderContext,
    mut on_frame: F,
) -> Result<(), ConnectionError>
where
    F: FnMut(Frame) -> Result<(), ConnectionError>,
{
    stream.set_read_timeout(Some(READ_POLL_INTERVAL))?;
    let mut parser = RespParser::new(context.max_frame_len);
    let mut buffer = [0; READ_BUFFER_LEN];

    while !context.stop.load(Ordering::Relaxed) {
        let read = match stream.read(&mut buffer) {
            Ok(0) => return Ok(()),
            Ok(read) => read,
            Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                continue
            }
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };

        let mut parsed = parser.feed(&buffer[..read])?;
        while let Parsed::Value(resp) = parsed {
            on_frame(Frame::decode(resp)?)?;
            parsed = parser.parse()?;
        }
    }
    Ok(())
}
