//! Ordered storage of active client sessions.
//!
//! The registry is the only state shared between the acceptor and the
//! dispatcher; the network serializes access with a single mutex. A
//! session's source id is its index in the registry at the moment of
//! dispatch — indices shift on removal, which is fine because source ids
//! are only used within a single dispatch pass.

use std::io;
use std::net::SocketAddr;

use tokio::net::TcpStream;
use tracing::{debug, info};

use crate::domain::frame::{FrameArray, FRAME_ARRAY_SIZE};
use crate::error::NetworkError;

/// Default upper bound on concurrent client sessions per network.
pub const MAX_SESSIONS: usize = 16;

/// Source id reserved for the hardware interface. High enough to never
/// collide with a registry index.
pub const HARDWARE_SOURCE_ID: usize = 22_345;

/// Most frames accepted from one source within a single dispatch pass.
/// Bounds the time the registry mutex is held.
pub const MAX_FRAMES_PER_TICK: usize = 256;

/// One connected client: its TCP stream plus the buffered bytes of a frame
/// that has not completely arrived yet.
pub(crate) struct Session {
    stream: TcpStream,
    peer: SocketAddr,
    rx: Vec<u8>,
    closed: bool,
}

impl Session {
    pub(crate) fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            stream,
            peer,
            rx: Vec::new(),
            closed: false,
        }
    }

    pub(crate) fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed
    }

    /// Non-blocking write of one frame array. A would-block drops the frame
    /// for this recipient only. A short write would leave the stream
    /// mid-frame, so the session is closed instead; hard I/O errors close
    /// it as well. Returns whether the frame was fully written.
    pub(crate) fn try_send(&mut self, bytes: &[u8]) -> bool {
        if self.closed {
            return false;
        }
        match self.stream.try_write(bytes) {
            Ok(n) if n == bytes.len() => true,
            Ok(n) => {
                debug!(peer = %self.peer, written = n, "short write broke framing, closing session");
                self.closed = true;
                false
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => false,
            Err(e) => {
                debug!(peer = %self.peer, error = %e, "socket write failed");
                self.closed = true;
                false
            }
        }
    }

    /// Pull whatever the socket has ready into the session buffer, then
    /// split off the complete frames. Partial trailing bytes stay buffered
    /// for the next tick.
    pub(crate) fn drain_frames(&mut self) -> Vec<FrameArray> {
        if self.closed {
            return Vec::new();
        }
        let mut chunk = [0u8; 2048];
        while self.rx.len() < MAX_FRAMES_PER_TICK * FRAME_ARRAY_SIZE {
            match self.stream.try_read(&mut chunk) {
                Ok(0) => {
                    self.closed = true;
                    break;
                }
                Ok(n) => self.rx.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    debug!(peer = %self.peer, error = %e, "socket read failed");
                    self.closed = true;
                    break;
                }
            }
        }
        let complete = self.rx.len() / FRAME_ARRAY_SIZE;
        let mut frames = Vec::with_capacity(complete);
        for i in 0..complete {
            let mut array = [0u8; FRAME_ARRAY_SIZE];
            array.copy_from_slice(&self.rx[i * FRAME_ARRAY_SIZE..(i + 1) * FRAME_ARRAY_SIZE]);
            frames.push(array);
        }
        self.rx.drain(..complete * FRAME_ARRAY_SIZE);
        frames
    }
}

/// Ordered collection of the sessions of one network.
pub(crate) struct SessionRegistry {
    sessions: Vec<Session>,
    max_sessions: usize,
}

impl SessionRegistry {
    pub(crate) fn new(max_sessions: usize) -> Self {
        Self {
            sessions: Vec::with_capacity(max_sessions),
            max_sessions,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.sessions.len()
    }

    pub(crate) fn max_sessions(&self) -> usize {
        self.max_sessions
    }

    pub(crate) fn set_max_sessions(&mut self, limit: usize) {
        self.max_sessions = limit;
    }

    /// Append a new session; its index is the next source id.
    pub(crate) fn append(&mut self, session: Session) -> Result<usize, NetworkError> {
        if self.sessions.len() >= self.max_sessions {
            return Err(NetworkError::TooManyClients(self.max_sessions));
        }
        self.sessions.push(session);
        Ok(self.sessions.len() - 1)
    }

    pub(crate) fn session_mut(&mut self, index: usize) -> &mut Session {
        &mut self.sessions[index]
    }

    /// Write `bytes` to every session whose index differs from `source`.
    /// Returns whether at least one recipient was written to.
    pub(crate) fn fan_out(&mut self, source: usize, bytes: &[u8]) -> bool {
        let mut delivered = false;
        for (index, session) in self.sessions.iter_mut().enumerate() {
            if index != source {
                delivered |= session.try_send(bytes);
            }
        }
        delivered
    }

    /// Remove every session that reached EOF or failed hard. Indices of the
    /// remaining sessions shift down; callers must not reuse source ids
    /// across this call.
    pub(crate) fn purge_closed(&mut self) {
        self.sessions.retain(|session| {
            if session.is_closed() {
                info!(peer = %session.peer(), "client disconnected");
                false
            } else {
                true
            }
        });
    }
}
