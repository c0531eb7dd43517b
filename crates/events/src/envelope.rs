use serde::{Deserialize, Serialize};
use uuid::Uuid;

use orderflow_core::{DomainId, UserId};

/// Who should hear about an event beyond the configured subscribers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyOptions {
    /// Free-text message attached to the notification.
    pub message: Option<String>,
    /// Users to notify immediately.
    pub user_ids: Vec<UserId>,
}

impl NotifyOptions {
    pub fn is_empty(&self) -> bool {
        self.message.as_deref().is_none_or(str::is_empty) && self.user_ids.is_empty()
    }
}

/// Envelope for a published event.
///
/// Notes:
/// - `domain_id` scopes the event to the owning domain.
/// - `object_type` / `object_id` name the affected object (e.g. `"order"`, `"4821"`).
/// - `payload` is the typed event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope<E> {
    event_id: Uuid,
    domain_id: DomainId,
    object_type: String,
    object_id: String,
    #[serde(default)]
    notify: NotifyOptions,
    payload: E,
}

impl<E> EventEnvelope<E> {
    pub fn new(
        event_id: Uuid,
        domain_id: DomainId,
        object_type: impl Into<String>,
        object_id: impl Into<String>,
        payload: E,
    ) -> Self {
        Self {
            event_id,
            domain_id,
            object_type: object_type.into(),
            object_id: object_id.into(),
            notify: NotifyOptions::default(),
            payload,
        }
    }

    pub fn with_notify(mut self, notify: NotifyOptions) -> Self {
        self.notify = notify;
        self
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn domain_id(&self) -> DomainId {
        self.domain_id
    }

    pub fn object_type(&self) -> &str {
        &self.object_type
    }

    pub fn object_id(&self) -> &str {
        &self.object_id
    }

    pub fn notify(&self) -> &NotifyOptions {
        &self.notify
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }

    pub fn into_payload(self) -> E {
        self.payload
    }
}
