//! Order log storage layer.
//!
//! The order log is the durable, ordered, append-only record of every
//! purchase this node knows about.  The [`store::OrderLog`] trait defines
//! the interface; [`sqlite::SqliteOrderLog`] is the default implementation
//! and [`memory::MemoryOrderLog`] serves tests and ephemeral nodes.

pub mod memory;
pub mod sqlite;
pub mod store;

pub use store::{OrderLog, OrderRecord};
