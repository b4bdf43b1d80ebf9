//! Feed handler: connects to the exchange, subscribes, and publishes the
//! latest message per symbol into a seqlock table.
//!
//! # Lifecycle
//!
//! ```text
//! CONNECTING ──writable──► SUBSCRIBING ──request sent──► RECEIVING
//!                                                          │
//!                                            EOF / error / stop
//!                                                          ▼
//!                                                        CLOSED
//! ```
//!
//! `RECEIVING` is edge-triggered: every readiness notification drains the
//! socket until it would block, so no notification is ever missed. Each read
//! is parsed immediately; complete frames are published, malformed frames
//! are skipped, and a partial frame waits in the [`StreamBuffer`].
//!
//! The handler thread is the only writer of the table. Any number of
//! [`TableReader`] clones may read it concurrently.

use std::{
    io::{self, Write},
    net::{SocketAddrV4, TcpStream},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use mdsim_core::{
    config::{FeedConfig, MdSimConfig},
    cpu_affinity,
    error::{MdError, MdResult},
    net,
    poller::{Events, Interest, Poller},
    protocol::{MarketMessage, SubscriptionRequest},
    seqlock::{SeqLockTable, TableReader, TableWriter},
};
use tracing::{debug, info, warn};

use crate::{
    buffer::StreamBuffer,
    parser::{ParseOutcome, Parser},
    stats::FeedStats,
};

/// Slots in the latest-message table, indexed by symbol id.
pub const TABLE_CAPACITY: usize = 1024;

/// Shared read handle onto the latest message per symbol.
pub type SymbolTable = TableReader<MarketMessage>;

const STREAM_TOKEN: u64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedState {
    Connecting,
    Subscribing,
    Receiving,
    Closed,
}

pub struct FeedHandler {
    config: FeedConfig,
    peer: SocketAddrV4,
    state: FeedState,
    stream: TcpStream,
    poller: Poller,
    buffer: StreamBuffer,
    parser: Parser,
    writer: TableWriter<MarketMessage>,
    reader: SymbolTable,
    stats: Arc<FeedStats>,
    stop: Arc<AtomicBool>,
}

impl FeedHandler {
    /// Connect to the address named by the `feed` section.
    pub fn connect(config: &MdSimConfig) -> MdResult<Self> {
        let addr = net::resolve_ipv4(&config.feed.host, config.feed_port())
            .map_err(|e| MdError::Connect(format!("resolve {}: {e}", config.feed.host)))?;
        Self::connect_to(addr, &config.feed)
    }

    /// Connect to `peer`, wait for the handshake, and send the subscription.
    /// On return the handler is `RECEIVING`.
    pub fn connect_to(peer: SocketAddrV4, config: &FeedConfig) -> MdResult<Self> {
        info!("[feed] CONNECTING to {peer}");
        let stream = net::connect_nonblocking(peer, config.recv_buffer_bytes)
            .map_err(|e| MdError::Connect(format!("{peer}: {e}")))?;
        let poller = Poller::new()?;
        poller.add(&stream, STREAM_TOKEN, Interest::WRITABLE)?;

        let (writer, reader) = SeqLockTable::split(TABLE_CAPACITY);
        let mut handler = Self {
            config: config.clone(),
            peer,
            state: FeedState::Connecting,
            stream,
            poller,
            buffer: StreamBuffer::with_capacity(config.stream_buffer_bytes),
            parser: Parser::new(),
            writer,
            reader,
            stats: Arc::new(FeedStats::default()),
            stop: Arc::new(AtomicBool::new(false)),
        };

        handler.await_connected()?;
        handler.subscribe()?;

        handler.poller.modify(
            &handler.stream,
            STREAM_TOKEN,
            Interest::READABLE | Interest::EDGE | Interest::HANGUP,
        )?;
        handler.state = FeedState::Receiving;
        info!("[feed] RECEIVING from {peer}");
        Ok(handler)
    }

    fn await_connected(&mut self) -> MdResult<()> {
        let timeout = Duration::from_millis(self.config.connect_timeout_ms);
        self.wait_writable(timeout)
            .map_err(|e| MdError::Connect(format!("{}: {e}", self.peer)))?;
        if let Some(e) = self.stream.take_error()? {
            return Err(MdError::Connect(format!("{}: {e}", self.peer)));
        }

        if let Ok(rcvbuf) = net::recv_buffer(&self.stream) {
            debug!("[feed] connected, SO_RCVBUF={rcvbuf}");
        }
        self.state = FeedState::Subscribing;
        Ok(())
    }

    fn subscribe(&mut self) -> MdResult<()> {
        let request = SubscriptionRequest::range(self.config.first_symbol, self.config.last_symbol);
        let bytes = request.encode();
        info!(
            "[feed] SUBSCRIBING to symbols {}..={}",
            self.config.first_symbol, self.config.last_symbol
        );

        let timeout = Duration::from_millis(self.config.connect_timeout_ms);
        let mut sent = 0;
        while sent < bytes.len() {
            match self.stream.write(&bytes[sent..]) {
                Ok(0) => return Err(MdError::PeerClosed),
                Ok(n) => sent += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.wait_writable(timeout)
                        .map_err(|e| MdError::Connect(format!("subscribe: {e}")))?;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(MdError::Connect(format!("subscribe: {e}"))),
            }
        }
        Ok(())
    }

    /// Block until the socket reports writable (or error/hang-up, which
    /// `take_error`/`write` then surface), or `timeout` passes.
    fn wait_writable(&self, timeout: Duration) -> io::Result<()> {
        let deadline = Instant::now() + timeout;
        let mut events = Events::with_capacity(4);
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(io::Error::new(io::ErrorKind::TimedOut, "timed out waiting for socket"));
            }
            if self.poller.wait(&mut events, Some(remaining))? > 0 {
                return Ok(());
            }
        }
    }

    /// Run the receive loop until the stop flag is set (`Ok`) or the
    /// connection fails (`Err`). Either way the handler ends `CLOSED`.
    pub fn run(&mut self) -> MdResult<()> {
        cpu_affinity::maybe_bind(self.config.cpu_core);

        let result = self.receive_loop();
        self.state = FeedState::Closed;
        let _ = self.poller.delete(&self.stream);
        match &result {
            Ok(()) => info!("[feed] CLOSED: stopped, {}", self.stats.snapshot()),
            Err(e) => warn!("[feed] CLOSED: {e}, {}", self.stats.snapshot()),
        }
        result
    }

    fn receive_loop(&mut self) -> MdResult<()> {
        if self.state != FeedState::Receiving {
            return Err(MdError::Protocol(format!("cannot receive in state {:?}", self.state)));
        }
        let mut events = Events::with_capacity(8);
        let timeout = Some(Duration::from_millis(self.config.poll_timeout_ms));

        loop {
            if self.stop.load(Ordering::Relaxed) {
                return Ok(());
            }
            self.poller.wait(&mut events, timeout)?;
            if events.iter().any(|ev| ev.is_readable() || ev.is_hangup() || ev.is_error()) {
                self.drain_socket()?;
            }
        }
    }

    /// Read until the socket would block. A zero-length read means the
    /// exchange closed the connection.
    fn drain_socket(&mut self) -> MdResult<()> {
        let chunk = self.config.stream_buffer_bytes;
        loop {
            match self.buffer.read_from(&mut self.stream, chunk) {
                Ok(0) => return Err(MdError::PeerClosed),
                Ok(n) => {
                    self.stats.record_bytes(n);
                    self.process_buffer();
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Parse and publish every complete frame in the buffer. Returns the
    /// number of messages published.
    pub fn process_buffer(&mut self) -> usize {
        let mut published = 0;
        let mut frames = self.parser.frames(self.buffer.unread());
        for result in frames.by_ref() {
            match result.outcome {
                ParseOutcome::Ok(msg) => {
                    if result.sequence_gap {
                        self.stats.record_gap();
                    }
                    self.stats.record_message();
                    if self.writer.publish(msg.symbol_id as usize, msg) {
                        published += 1;
                    }
                }
                ParseOutcome::Malformed(e) => {
                    self.stats.record_malformed();
                    debug!("[feed] dropped malformed frame: {e}");
                }
                ParseOutcome::Incomplete => break,
            }
        }
        let consumed = frames.consumed();
        self.buffer.consume(consumed);
        published
    }

    /// Another read handle onto the latest-message table.
    pub fn table(&self) -> SymbolTable {
        self.reader.clone()
    }

    pub fn stats(&self) -> Arc<FeedStats> {
        Arc::clone(&self.stats)
    }

    /// Flag checked once per loop iteration; set it to close the feed.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn state(&self) -> FeedState {
        self.state
    }

    pub fn peer(&self) -> SocketAddrV4 {
        self.peer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mdsim_core::protocol::{FRAME_SIZE, Payload, Quote};
    use std::{io::Read, net::TcpListener};

    fn quote(symbol_id: u16, sequence: u64) -> MarketMessage {
        MarketMessage {
            symbol_id,
            sequence,
            timestamp_ns: sequence * 10,
            payload: Payload::Quote(Quote {
                bid_price: 10.0,
                ask_price: 10.5,
                bid_qty: 100,
                ask_qty: 200,
            }),
        }
    }

    fn feed_config() -> FeedConfig {
        FeedConfig { first_symbol: 1, last_symbol: 3, ..FeedConfig::default() }
    }

    fn local_listener() -> (TcpListener, SocketAddrV4) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, SocketAddrV4::new([127, 0, 0, 1].into(), port))
    }

    #[test]
    fn sends_subscription_after_connect() {
        let (listener, addr) = local_listener();
        let handler = FeedHandler::connect_to(addr, &feed_config()).unwrap();
        assert_eq!(handler.state(), FeedState::Receiving);

        let (mut server_side, _) = listener.accept().unwrap();
        let mut got = [0u8; 9];
        server_side.read_exact(&mut got).unwrap();
        assert_eq!(got, [0xFF, 0x00, 0x03, 0x00, 0x01, 0x00, 0x02, 0x00, 0x03]);
    }

    #[test]
    fn refused_connection_is_a_connect_error() {
        let (listener, addr) = local_listener();
        drop(listener);
        match FeedHandler::connect_to(addr, &feed_config()) {
            Err(MdError::Connect(_)) => {}
            Err(e) => panic!("unexpected error {e}"),
            Ok(_) => panic!("connected to a closed port"),
        }
    }

    #[test]
    fn publishes_counts_gaps_and_closes_on_eof() {
        let (listener, addr) = local_listener();
        let mut handler = FeedHandler::connect_to(addr, &feed_config()).unwrap();
        let table = handler.table();
        let stats = handler.stats();

        let (mut server_side, _) = listener.accept().unwrap();
        // Consume the request so closing sends FIN rather than RST.
        let mut request = [0u8; 9];
        server_side.read_exact(&mut request).unwrap();

        let mut bytes: Vec<u8> =
            [quote(2, 1), quote(2, 2), quote(2, 4)].iter().flat_map(|m| m.encode()).collect();
        let mut bad = quote(3, 1).encode();
        bad[2] = 0x7F;
        bad[3] = 0xFF;
        bytes.extend_from_slice(&bad);
        bytes.extend_from_slice(&quote(1, 1).encode());
        server_side.write_all(&bytes).unwrap();
        drop(server_side);

        match handler.run() {
            Err(MdError::PeerClosed) => {}
            other => panic!("expected peer close, got {other:?}"),
        }
        assert_eq!(handler.state(), FeedState::Closed);

        let snap = stats.snapshot();
        assert_eq!(snap.messages, 4);
        assert_eq!(snap.malformed, 1);
        // One sequence gap (2 → 4) plus the dropped frame.
        assert_eq!(snap.gaps, 2);
        assert_eq!(snap.bytes, 5 * FRAME_SIZE as u64);

        assert_eq!(table.get(2), Some(quote(2, 4)));
        assert_eq!(table.get(1), Some(quote(1, 1)));
        assert_eq!(table.get(3), None);
        assert_eq!(table.version(2), 6);
    }

    #[test]
    fn stop_flag_closes_cleanly() {
        let (listener, addr) = local_listener();
        let mut handler = FeedHandler::connect_to(addr, &feed_config()).unwrap();
        let (_server_side, _) = listener.accept().unwrap();
        handler.stop_handle().store(true, Ordering::Relaxed);
        assert!(handler.run().is_ok());
        assert_eq!(handler.state(), FeedState::Closed);
    }
}
