//! # mdsim-feed
//!
//! The client side of the simulator:
//!
//! - **Stream buffer** (`buffer`): byte accumulator with half-full compaction
//! - **Parser** (`parser`): frame decoding with per-symbol gap detection
//! - **Statistics** (`stats`): atomic counters readable from any thread
//! - **Feed handler** (`handler`): connect, subscribe, receive, publish

pub mod buffer;
pub mod handler;
pub mod parser;
pub mod stats;

pub use handler::{FeedHandler, FeedState, SymbolTable, TABLE_CAPACITY};
pub use stats::{FeedStats, FeedStatsSnapshot};
