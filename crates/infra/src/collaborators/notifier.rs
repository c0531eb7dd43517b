use thiserror::Error;

use orderflow_events::{EventBus, EventEnvelope};
use orderflow_orders::OrderEvent;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NotifyError {
    #[error("event publish failed: {0}")]
    Publish(String),
}

/// Hands committed lifecycle events to downstream consumers.
pub trait EventNotifier: Send + Sync {
    fn notify(&self, envelope: EventEnvelope<OrderEvent>) -> Result<(), NotifyError>;
}

/// Notifier that publishes envelopes on an [`EventBus`].
#[derive(Debug)]
pub struct BusEventNotifier<B> {
    bus: B,
}

impl<B> BusEventNotifier<B> {
    pub fn new(bus: B) -> Self {
        Self { bus }
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }
}

impl<B> EventNotifier for BusEventNotifier<B>
where
    B: EventBus<EventEnvelope<OrderEvent>>,
{
    fn notify(&self, envelope: EventEnvelope<OrderEvent>) -> Result<(), NotifyError> {
        self.bus
            .publish(envelope)
            .map_err(|e| NotifyError::Publish(format!("{e:?}")))
    }
}
