//! Post-commit signals.
//!
//! State transitions return the signals they produce; services hand them to
//! a [`SignalDispatcher`] only after the owning unit of work has committed.
//! Delivery is fire-and-forget: a failed publish is logged, never raised.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use stockline_events::{Event, EventBus, EventEnvelope, Subscription};
use stockline_inventory::LowStockDetected;
use stockline_sales::OrderStatusChanged;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Signal {
    OrderStatusChanged(OrderStatusChanged),
    LowStockDetected(LowStockDetected),
}

impl Signal {
    fn subject(&self) -> (&'static str, String) {
        match self {
            Signal::OrderStatusChanged(e) => ("order", e.order_id.to_string()),
            Signal::LowStockDetected(e) => ("product", e.product_id.to_string()),
        }
    }
}

impl Event for Signal {
    fn event_type(&self) -> &'static str {
        match self {
            Signal::OrderStatusChanged(e) => e.event_type(),
            Signal::LowStockDetected(e) => e.event_type(),
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            Signal::OrderStatusChanged(e) => e.occurred_at,
            Signal::LowStockDetected(e) => e.occurred_at,
        }
    }
}

impl From<OrderStatusChanged> for Signal {
    fn from(value: OrderStatusChanged) -> Self {
        Signal::OrderStatusChanged(value)
    }
}

impl From<LowStockDetected> for Signal {
    fn from(value: LowStockDetected) -> Self {
        Signal::LowStockDetected(value)
    }
}

pub type SignalEnvelope = EventEnvelope<Signal>;

/// Wraps signals in envelopes and publishes them on a bus.
///
/// Sequence numbers are assigned here, process-wide and strictly increasing.
#[derive(Debug)]
pub struct SignalDispatcher<B> {
    bus: B,
    sequence: AtomicU64,
}

impl<B> SignalDispatcher<B>
where
    B: EventBus<SignalEnvelope>,
{
    pub fn new(bus: B) -> Self {
        Self {
            bus,
            sequence: AtomicU64::new(0),
        }
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn subscribe(&self) -> Subscription<SignalEnvelope> {
        self.bus.subscribe()
    }

    /// Publish every signal; returns how many were accepted by the bus.
    pub fn dispatch(&self, signals: impl IntoIterator<Item = Signal>) -> usize {
        let mut delivered = 0;
        for signal in signals {
            let (aggregate_type, aggregate_id) = signal.subject();
            let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
            let envelope =
                EventEnvelope::new(Uuid::now_v7(), aggregate_type, aggregate_id, sequence, signal);

            let event_type = envelope.event_type().to_string();
            match self.bus.publish(envelope) {
                Ok(()) => {
                    delivered += 1;
                    debug!(sequence, event_type, "signal dispatched");
                }
                Err(err) => {
                    warn!(sequence, event_type, error = %err, "signal delivery failed");
                }
            }
        }
        delivered
    }
}
