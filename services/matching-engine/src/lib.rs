//! Pure order book and matching transformations
//!
//! No I/O and no clocks: the book is a deterministic container, and the
//! single-step matcher returns events without mutating anything. The
//! controller persists each event before applying it back through
//! [`orderbook::OrderBook::apply`].

pub mod book;
pub mod crossing;
pub mod orderbook;

pub use orderbook::{BookSnapshot, DepthView, OrderBook};
