//! Core domain types for the matcher
//!
//! Assets and trading pairs, signed orders, the integer fixed-point
//! numerics used by matching, order-status and open-volume accounting,
//! order book events, and the domain error taxonomy.

pub mod assets;
pub mod errors;
pub mod events;
pub mod info;
pub mod numeric;
pub mod order;
pub mod settlement;
pub mod time;
