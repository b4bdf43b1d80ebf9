//! Exchange simulator: the single-threaded broadcast reactor.
//!
//! # Lifecycle
//!
//! ```text
//! INIT ──listen()──► LISTENING ──run()──► RUNNING ──deadline / stop──► STOPPED
//! ```
//!
//! One `RUNNING` iteration:
//!
//! 1. zero-timeout poll; listener readiness drains `accept()` until it would
//!    block, error/hang-up on a client disconnects it;
//! 2. while the [`TickScheduler`] says a tick is due, generate one tick for a
//!    random active symbol and broadcast the encoded frame;
//! 3. leave once the [`RunDeadline`] has passed or the stop flag is set.
//!
//! The loop never blocks, so it spins between ticks. A client's
//! subscription request is read and logged, but does not filter anything:
//! every client receives every symbol.

use std::{
    fmt,
    io::{self, Read},
    net::{SocketAddr, TcpListener, TcpStream},
    os::fd::{AsRawFd, RawFd},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use mdsim_core::{
    config::MdSimConfig,
    error::{MdError, MdResult},
    poller::{Events, Interest, Poller},
    protocol::{MAX_SYMBOL_ID, SubscriptionRequest},
    time_util::{Clock, MonotonicClock},
};
use tracing::{debug, info, warn};

use crate::{
    engine::PriceEngine,
    registry::{ClientId, ClientRegistry, FrameSink},
    scheduler::{RunDeadline, TickScheduler},
};

const LISTENER_TOKEN: u64 = 0;

/// Largest well-formed subscription request: every id in the id space.
const MAX_REQUEST_BYTES: usize = 3 + 2 * MAX_SYMBOL_ID as usize;

/// One accepted client and any request bytes it has sent so far.
struct ClientConn {
    stream: TcpStream,
    inbox: Vec<u8>,
}

impl ClientConn {
    /// Pull everything readable into the inbox. `Ok(false)` on end of stream.
    fn read_inbound(&mut self) -> io::Result<bool> {
        let mut chunk = [0u8; 1024];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => return Ok(false),
                Ok(n) => self.inbox.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(true),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
    }
}

impl FrameSink for ClientConn {
    #[inline]
    fn send_frame(&mut self, frame: &[u8]) -> io::Result<usize> {
        self.stream.send_frame(frame)
    }
}

impl AsRawFd for ClientConn {
    fn as_raw_fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeState {
    Init,
    Listening,
    Running,
    Stopped,
}

/// Counters reported when the simulator stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExchangeStats {
    pub ticks: u64,
    pub quotes: u64,
    pub trades: u64,
    /// Frames fully handed to a client socket.
    pub frames_sent: u64,
    pub clients_accepted: u64,
    /// Subscription requests received (logged, not used for filtering).
    pub subscriptions: u64,
    /// Dropped as slow or broken consumers during a broadcast.
    pub clients_evicted: u64,
    /// Dropped on error/hang-up notification.
    pub clients_disconnected: u64,
}

impl fmt::Display for ExchangeStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ticks={} quotes={} trades={} frames_sent={} accepted={} subscriptions={} \
             evicted={} disconnected={}",
            self.ticks,
            self.quotes,
            self.trades,
            self.frames_sent,
            self.clients_accepted,
            self.subscriptions,
            self.clients_evicted,
            self.clients_disconnected
        )
    }
}

/// The exchange side of the simulator.
pub struct ExchangeSimulator<C: Clock = MonotonicClock> {
    config: MdSimConfig,
    state: ExchangeState,
    engine: PriceEngine,
    poller: Poller,
    listener: Option<TcpListener>,
    local_addr: Option<SocketAddr>,
    clients: ClientRegistry<ClientConn>,
    next_client_id: ClientId,
    stats: ExchangeStats,
    clock: C,
    stop: Arc<AtomicBool>,
}

impl ExchangeSimulator<MonotonicClock> {
    pub fn new(config: &MdSimConfig) -> MdResult<Self> {
        Self::with_clock(config, MonotonicClock)
    }
}

impl<C: Clock> ExchangeSimulator<C> {
    /// INIT: derive scheduling constants and seed the simulation.
    pub fn with_clock(config: &MdSimConfig, clock: C) -> MdResult<Self> {
        if config.ticks.rate == 0 || config.ticks.rate > 1_000_000_000 {
            return Err(MdError::Config(format!(
                "tick rate {} cannot be scheduled",
                config.ticks.rate
            )));
        }
        let engine = PriceEngine::from_config(config)?;
        let poller = Poller::new()?;

        info!(
            "[exchange] INIT: {} symbols, {} ticks/s (interval {} ns), run {} s, seed {}",
            config.exchange.symbols,
            config.ticks.rate,
            config.ticks.interval_ns(),
            config.ticks.run_duration_sec,
            config.exchange.seed
        );

        Ok(Self {
            config: config.clone(),
            state: ExchangeState::Init,
            engine,
            poller,
            listener: None,
            local_addr: None,
            clients: ClientRegistry::new(),
            next_client_id: LISTENER_TOKEN + 1,
            stats: ExchangeStats::default(),
            clock,
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    /// LISTENING: bind the listen socket and register it for readiness.
    /// Calling it again while listening returns the bound address.
    pub fn listen(&mut self) -> MdResult<SocketAddr> {
        match self.state {
            ExchangeState::Init => {}
            ExchangeState::Listening => {
                return self
                    .local_addr
                    .ok_or_else(|| MdError::Protocol("listening without an address".to_string()));
            }
            state => return Err(MdError::Protocol(format!("cannot listen in state {state:?}"))),
        }

        let bind = self.config.server.bind.as_str();
        let port = self.config.server.port;
        let listener = TcpListener::bind((bind, port))
            .map_err(|e| MdError::Connect(format!("bind {bind}:{port}: {e}")))?;
        listener.set_nonblocking(true)?;
        self.poller.add(&listener, LISTENER_TOKEN, Interest::READABLE)?;

        let addr = listener.local_addr()?;
        self.listener = Some(listener);
        self.local_addr = Some(addr);
        self.state = ExchangeState::Listening;
        info!("[exchange] LISTENING on {addr}");
        Ok(addr)
    }

    /// RUNNING until the run duration elapses or a stop is requested, then
    /// STOPPED. Listens first if still in INIT.
    pub fn run(&mut self) -> MdResult<ExchangeStats> {
        if self.state == ExchangeState::Init {
            self.listen()?;
        }
        if self.state != ExchangeState::Listening {
            return Err(MdError::Protocol(format!("cannot run in state {:?}", self.state)));
        }

        let mut events = Events::with_capacity(self.config.exchange.max_events);
        let start = self.clock.now_ns();
        let mut scheduler = TickScheduler::new(self.config.ticks.interval_ns(), start);
        let deadline = RunDeadline::new(start, self.config.ticks.run_duration_ns());

        self.state = ExchangeState::Running;
        info!("[exchange] RUNNING");

        let result = loop {
            if self.stop.load(Ordering::Relaxed) {
                info!("[exchange] stop requested");
                break Ok(());
            }
            if let Err(e) = self.poll_once(&mut events) {
                break Err(e);
            }

            let now = self.clock.now_ns();
            if deadline.is_expired(now) {
                info!(
                    "[exchange] run duration reached after {} ms",
                    deadline.elapsed_ns(now) / 1_000_000
                );
                break Ok(());
            }
            while scheduler.next_due(now) {
                self.tick(now);
            }
        };

        self.shutdown();
        result.map(|()| self.stats())
    }

    /// One zero-timeout readiness pass: accept new clients, read
    /// subscription requests, drop hung-up clients.
    pub fn poll_once(&mut self, events: &mut Events) -> MdResult<()> {
        self.poller.wait(events, Some(Duration::ZERO))?;
        for ev in events.iter() {
            if ev.token() == LISTENER_TOKEN {
                self.accept_pending();
                continue;
            }
            if ev.is_readable() {
                self.read_client(ev.token());
            }
            if ev.is_error() || ev.is_hangup() {
                self.disconnect(ev.token(), "hang-up");
            }
        }
        Ok(())
    }

    fn accept_pending(&mut self) {
        loop {
            let accepted = match &self.listener {
                Some(listener) => listener.accept(),
                None => return,
            };
            match accepted {
                Ok((stream, peer)) => self.register_client(stream, peer),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("[exchange] accept failed: {e}");
                    return;
                }
            }
        }
    }

    fn register_client(&mut self, stream: TcpStream, peer: SocketAddr) {
        let id = self.next_client_id;
        self.next_client_id += 1;

        let setup = stream
            .set_nonblocking(true)
            .and_then(|()| stream.set_nodelay(true))
            .and_then(|()| self.poller.add(&stream, id, Interest::READABLE | Interest::HANGUP));
        if let Err(e) = setup {
            warn!("[exchange] rejecting client from {peer}: {e}");
            return;
        }

        self.clients.insert(id, ClientConn { stream, inbox: Vec::new() });
        self.stats.clients_accepted += 1;
        info!("[exchange] client {id} connected from {peer} ({} active)", self.clients.len());
    }

    /// Read whatever the client sent and log complete subscription requests.
    fn read_client(&mut self, id: ClientId) {
        let Some(conn) = self.clients.get_mut(id) else {
            return;
        };
        match conn.read_inbound() {
            Ok(true) => {}
            Ok(false) => {
                self.disconnect(id, "closed by peer");
                return;
            }
            Err(e) => {
                self.disconnect(id, &format!("read error: {e}"));
                return;
            }
        }

        loop {
            match SubscriptionRequest::decode(&conn.inbox) {
                Ok(Some((request, used))) => {
                    conn.inbox.drain(..used);
                    self.stats.subscriptions += 1;
                    info!(
                        "[exchange] client {id} subscribed to {} symbol(s); \
                         all symbols are broadcast",
                        request.symbols.len()
                    );
                }
                Ok(None) => {
                    if conn.inbox.len() > MAX_REQUEST_BYTES {
                        warn!(
                            "[exchange] client {id} sent {} bytes without a complete request",
                            conn.inbox.len()
                        );
                        conn.inbox.clear();
                    }
                    return;
                }
                Err(e) => {
                    warn!("[exchange] client {id} sent an invalid request: {e}");
                    conn.inbox.clear();
                    return;
                }
            }
        }
    }

    /// Deregister, close and forget a client. Unknown ids are ignored.
    fn disconnect(&mut self, id: ClientId, reason: &str) {
        if let Some(conn) = self.clients.remove(id) {
            let _ = self.poller.delete(&conn);
            self.stats.clients_disconnected += 1;
            info!("[exchange] client {id} disconnected: {reason} ({} active)", self.clients.len());
        }
    }

    fn tick(&mut self, now_ns: u64) {
        let msg = self.engine.tick(now_ns);
        if self.clients.is_empty() {
            return;
        }

        let frame = msg.encode();
        let poller = &self.poller;
        let stats = &mut self.stats;
        let delivered = self.clients.broadcast(&frame, |id, conn, reason| {
            let _ = poller.delete(&conn);
            stats.clients_evicted += 1;
            warn!("[exchange] evicting client {id}: {reason}");
        });
        self.stats.frames_sent += delivered as u64;
    }

    fn shutdown(&mut self) {
        for (id, conn) in self.clients.drain() {
            let _ = self.poller.delete(&conn);
            debug!("[exchange] closing client {id}");
        }
        if let Some(listener) = self.listener.take() {
            let _ = self.poller.delete(&listener);
        }
        self.state = ExchangeState::Stopped;
        info!("[exchange] STOPPED: {}", self.stats());
    }

    /// Engine counters merged with the connection counters.
    pub fn stats(&self) -> ExchangeStats {
        let e = self.engine.stats();
        ExchangeStats { ticks: e.ticks, quotes: e.quotes, trades: e.trades, ..self.stats }
    }

    /// Flag checked once per loop iteration; set it to stop the run early.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn state(&self) -> ExchangeState {
        self.state
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn engine(&self) -> &PriceEngine {
        &self.engine
    }
}
