//! # mdsim-exchange
//!
//! The exchange side of the simulator:
//!
//! - **Symbols** (`symbol`): per-symbol GBM state
//! - **Price engine** (`engine`): active-set selection, QUOTE/TRADE generation
//! - **Scheduling** (`scheduler`): fixed-interval catch-up ticks, run deadline
//! - **Client registry** (`registry`): fan-out with slow-consumer eviction
//! - **Server** (`server`): the single-threaded broadcast reactor

pub mod engine;
pub mod registry;
pub mod scheduler;
pub mod server;
pub mod symbol;

pub use engine::PriceEngine;
pub use server::{ExchangeSimulator, ExchangeState, ExchangeStats};
