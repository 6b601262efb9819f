//! Sales orders domain module.
//!
//! The order lifecycle state machine, implemented purely as deterministic
//! domain logic (no IO, no HTTP, no storage). Transitions return the events
//! they produce; the infrastructure layer persists them and runs the ledger
//! effects they call for.

pub mod number;
pub mod order;

pub use number::{OrderNumberGenerator, OrderNumberSource};
pub use order::{
    CancelOrder, ConfirmOrder, DeliverOrder, Order, OrderCommand, OrderEvent, OrderItem,
    OrderPlaced, OrderRecord, OrderStatus, OrderStatusChanged, PlaceOrder, PricedItem, ShipOrder,
    StockEffect,
};
