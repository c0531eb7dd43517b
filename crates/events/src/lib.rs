//! Lifecycle events and the pub/sub transport that carries them to
//! notification and audit consumers.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use envelope::{EventEnvelope, NotifyOptions};
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
