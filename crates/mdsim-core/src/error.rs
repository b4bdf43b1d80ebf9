//! Typed error definitions for the market data simulator.
//!
//! [`MdError`] covers the failure classes both sides of the wire care about:
//! configuration faults (fatal at startup), connection faults (fatal to one
//! connection), and protocol faults. [`DecodeError`] is the allocation-free
//! classification used by the frame decoder. Both implement
//! `std::error::Error` via `thiserror`, so they compose with `anyhow::Result`.

use thiserror::Error;

/// Domain-specific errors for the exchange simulator and the feed handler.
#[derive(Debug, Error)]
pub enum MdError {
    /// Configuration parsing or validation error.
    #[error("config error: {0}")]
    Config(String),

    /// Socket, poller, or file I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Connection establishment or subscription handshake failed.
    #[error("connect error: {0}")]
    Connect(String),

    /// The remote side closed the connection (zero-length read).
    #[error("connection closed by peer")]
    PeerClosed,

    /// Wire protocol violation that cannot be recovered locally.
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Why a fixed-size frame failed structural validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Fewer bytes than one full frame.
    #[error("truncated frame: {0} bytes")]
    Truncated(usize),

    /// The kind tag is neither QUOTE nor TRADE.
    #[error("unknown message kind {0:#06x}")]
    UnknownKind(u16),

    /// Symbol id outside the valid id space.
    #[error("symbol id {0} out of range")]
    SymbolOutOfRange(u16),

    /// Subscription request with a command tag other than `0xFF`.
    #[error("bad command tag {0:#04x}")]
    BadCommand(u8),
}

/// Convenience alias used by fallible core operations.
pub type MdResult<T> = Result<T, MdError>;
