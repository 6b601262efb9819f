//! Inventory ledger domain module.
//!
//! Pure decision logic for stock movements (no IO, no storage). The
//! infrastructure layer loads a [`StockPosition`], asks it to decide, and
//! persists the resulting movement together with the quantity change.

pub mod movement;
pub mod position;

pub use movement::{InventoryMovement, MovementReference, MovementType, net_movement};
pub use position::{
    AdjustStock, LedgerCommand, LedgerEvent, LowStockDetected, StockChange, StockPosition,
};
