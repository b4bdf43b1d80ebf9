//! # mdsim-core
//!
//! Shared building blocks for the market data simulator, providing:
//!
//! - **Wire protocol** (`protocol`): fixed 44-byte tick frames, subscription requests, XOR checksum
//! - **Seqlock** (`seqlock`): single-writer / multi-reader latest-value table
//! - **Readiness polling** (`poller`): epoll wrapper used by both event loops
//! - **Sockets** (`net`): non-blocking connect, receive-buffer sizing
//! - **Configuration** (`config`): JSON config deserialization and validation
//! - **Error types** (`error`): domain-specific `MdError` via thiserror
//! - **Time utilities** (`time_util`): monotonic timestamps and test clocks
//! - **CPU affinity** (`cpu_affinity`): thread-to-core pinning
//! - **Logging** (`logging`): tracing-based structured logging

pub mod config;
pub mod cpu_affinity;
pub mod error;
pub mod logging;
pub mod net;
pub mod poller;
pub mod protocol;
pub mod seqlock;
pub mod time_util;

// Re-export the wire types at crate root for convenience.
pub use protocol::*;
