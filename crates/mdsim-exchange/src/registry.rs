//! Connected-client registry and the fan-out policy.
//!
//! Every registered client receives every frame. There is no per-client
//! queue: a client that cannot take a whole frame immediately is a slow
//! consumer and is evicted on the spot, because stale market data is worse
//! than missing market data.
//!
//! | Send outcome            | Action |
//! |-------------------------|--------|
//! | whole frame written     | keep   |
//! | `WouldBlock`            | evict  |
//! | short write             | evict  |
//! | any other error         | evict  |

use std::{
    fmt, io,
    net::TcpStream,
    os::fd::{AsRawFd, RawFd},
};

use ahash::AHashMap;

/// Registry key; doubles as the poller token of the client socket.
pub type ClientId = u64;

/// Anything a frame can be pushed into without blocking.
pub trait FrameSink {
    /// Attempt one non-blocking send, returning the bytes accepted.
    fn send_frame(&mut self, frame: &[u8]) -> io::Result<usize>;
}

#[inline]
fn send_nosignal(fd: RawFd, frame: &[u8]) -> io::Result<usize> {
    // SAFETY: `frame` is a valid buffer for its length; MSG_NOSIGNAL turns a
    // dead peer into EPIPE instead of SIGPIPE.
    let n = unsafe {
        libc::send(
            fd,
            frame.as_ptr() as *const libc::c_void,
            frame.len(),
            libc::MSG_NOSIGNAL | libc::MSG_DONTWAIT,
        )
    };
    if n < 0 { Err(io::Error::last_os_error()) } else { Ok(n as usize) }
}

impl FrameSink for TcpStream {
    #[inline]
    fn send_frame(&mut self, frame: &[u8]) -> io::Result<usize> {
        send_nosignal(self.as_raw_fd(), frame)
    }
}

/// Why a client was dropped during a broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendFailure {
    WouldBlock,
    Short { written: usize, expected: usize },
    Error(io::ErrorKind),
}

impl fmt::Display for SendFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WouldBlock => write!(f, "slow consumer (would block)"),
            Self::Short { written, expected } => write!(f, "short write {written}/{expected}"),
            Self::Error(kind) => write!(f, "send error: {kind}"),
        }
    }
}

/// Map one send attempt to keep (`None`) or evict (`Some`).
#[inline]
fn classify(result: io::Result<usize>, expected: usize) -> Option<SendFailure> {
    match result {
        Ok(n) if n == expected => None,
        Ok(written) => Some(SendFailure::Short { written, expected }),
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => Some(SendFailure::WouldBlock),
        Err(e) => Some(SendFailure::Error(e.kind())),
    }
}

/// Set of clients eligible for broadcast.
///
/// # Thread safety
///
/// Not thread-safe. Owned by the exchange reactor thread.
pub struct ClientRegistry<S> {
    clients: AHashMap<ClientId, S>,
    evicted: Vec<(ClientId, SendFailure)>,
}

impl<S: FrameSink> ClientRegistry<S> {
    pub fn new() -> Self {
        Self { clients: AHashMap::new(), evicted: Vec::new() }
    }

    pub fn insert(&mut self, id: ClientId, sink: S) {
        self.clients.insert(id, sink);
    }

    /// Remove a client. Returns `None` if it was already gone.
    pub fn remove(&mut self, id: ClientId) -> Option<S> {
        self.clients.remove(&id)
    }

    pub fn get_mut(&mut self, id: ClientId) -> Option<&mut S> {
        self.clients.get_mut(&id)
    }

    pub fn contains(&self, id: ClientId) -> bool {
        self.clients.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = ClientId> + '_ {
        self.clients.keys().copied()
    }

    /// Send `frame` to every client. Failed clients are removed before this
    /// returns and handed to `on_evict` for cleanup. Returns the number of
    /// clients that took the whole frame.
    pub fn broadcast<F>(&mut self, frame: &[u8], mut on_evict: F) -> usize
    where
        F: FnMut(ClientId, S, SendFailure),
    {
        let mut delivered = 0;
        for (&id, sink) in self.clients.iter_mut() {
            match classify(sink.send_frame(frame), frame.len()) {
                None => delivered += 1,
                Some(reason) => self.evicted.push((id, reason)),
            }
        }

        for (id, reason) in self.evicted.drain(..) {
            if let Some(sink) = self.clients.remove(&id) {
                on_evict(id, sink, reason);
            }
        }
        delivered
    }

    /// Remove every client, e.g. on shutdown.
    pub fn drain(&mut self) -> impl Iterator<Item = (ClientId, S)> + '_ {
        self.clients.drain()
    }
}

impl<S: FrameSink> Default for ClientRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}
