//! Domain types shared by the router and the dispatcher.
//!
//! Nothing in here performs I/O or spawns tasks; the application layer drives these types.

pub mod context;
pub mod flow;
pub mod outcome;
pub mod ports;
pub mod transaction;
pub mod variables;
