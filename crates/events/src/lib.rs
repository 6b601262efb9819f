//! `stockline-events` — signal plumbing shared by the domain crates.
//!
//! Domain operations return their signals as plain values; the infrastructure
//! layer wraps them in [`EventEnvelope`]s and fans them out over an
//! [`EventBus`] once the unit of work that produced them has committed.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
