use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::event::Event;

/// Envelope for an event, carrying the metadata subscribers route on.
///
/// `aggregate_id` is the textual id of the record the event is about (an
/// order or product id). `sequence_number` is assigned by the publisher and
/// increases monotonically, so consumers can order what they receive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope<E> {
    event_id: Uuid,
    event_type: String,
    aggregate_type: String,
    aggregate_id: String,
    sequence_number: u64,
    occurred_at: DateTime<Utc>,
    payload: E,
}

impl<E> EventEnvelope<E> {
    pub fn new(
        event_id: Uuid,
        aggregate_type: impl Into<String>,
        aggregate_id: impl Into<String>,
        sequence_number: u64,
        payload: E,
    ) -> Self
    where
        E: Event,
    {
        Self {
            event_id,
            event_type: payload.event_type().to_string(),
            aggregate_type: aggregate_type.into(),
            aggregate_id: aggregate_id.into(),
            sequence_number,
            occurred_at: payload.occurred_at(),
            payload,
        }
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn aggregate_type(&self) -> &str {
        &self.aggregate_type
    }

    pub fn aggregate_id(&self) -> &str {
        &self.aggregate_id
    }

    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }

    pub fn into_payload(self) -> E {
        self.payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Pinged {
        at: DateTime<Utc>,
    }

    impl Event for Pinged {
        fn event_type(&self) -> &'static str {
            "test.pinged"
        }

        fn version(&self) -> u32 {
            1
        }

        fn occurred_at(&self) -> DateTime<Utc> {
            self.at
        }
    }

    #[test]
    fn envelope_copies_event_metadata() {
        let at = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let id = Uuid::now_v7();
        let env = EventEnvelope::new(id, "order", "abc", 7, Pinged { at });

        assert_eq!(env.event_id(), id);
        assert_eq!(env.event_type(), "test.pinged");
        assert_eq!(env.aggregate_type(), "order");
        assert_eq!(env.aggregate_id(), "abc");
        assert_eq!(env.sequence_number(), 7);
        assert_eq!(env.occurred_at(), at);
        assert_eq!(env.into_payload(), Pinged { at });
    }
}
