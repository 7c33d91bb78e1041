//! Transport unit of work and the in-memory reference transport.
//!
//! - [`transaction`]: [`TransportTransaction`] handle shared by receive and sends
//! - [`in_memory`]: [`InMemoryBroker`] queues and [`InMemoryTransport`]

pub mod in_memory;
pub mod transaction;

pub use in_memory::{InMemoryBroker, InMemoryTransport};
pub use transaction::{PendingSend, Receipt, TransportTransaction};
