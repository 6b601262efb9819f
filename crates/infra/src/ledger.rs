//! Inventory ledger: the only path through which stock changes.
//!
//! ```text
//! load product → StockPosition::handle → floor-checked store primitive
//!              → append movement → (after commit) LowStockDetected
//! ```
//!
//! [`InventoryLedger`] runs inside a caller-supplied unit of work so order
//! transitions can combine several ledger calls with their own writes.
//! [`InventoryService`] wraps single ledger calls in their own transaction.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, instrument};

use stockline_core::{Aggregate, DomainError, MovementId, ProductId};
use stockline_events::EventBus;
use stockline_inventory::{
    AdjustStock, InventoryMovement, LedgerCommand, LedgerEvent, LowStockDetected,
    MovementReference, MovementType, StockChange, StockPosition,
};

use crate::config::Config;
use crate::error::ServiceError;
use crate::signals::{Signal, SignalDispatcher, SignalEnvelope};
use crate::store::{Page, PageRequest, Store, UnitOfWork};
use crate::tx::transact;

/// Outcome of one ledger mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerReceipt {
    pub movement: InventoryMovement,
    pub quantity_after: i64,
    /// Present when a deduction left the product at or below its threshold.
    pub low_stock: Option<LowStockDetected>,
}

pub struct InventoryLedger;

impl InventoryLedger {
    /// Take `quantity` units out of stock and log an `out` movement.
    pub fn deduct(
        uow: &mut dyn UnitOfWork,
        product_id: ProductId,
        quantity: i64,
        reference: Option<MovementReference>,
        note: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<LedgerReceipt, ServiceError> {
        Self::execute(
            uow,
            product_id,
            LedgerCommand::Deduct(StockChange {
                movement_id: MovementId::new(),
                quantity,
                reference,
                note,
                occurred_at: at,
            }),
        )
    }

    /// Put `quantity` units back and log a `return` movement. No upper bound.
    pub fn restore(
        uow: &mut dyn UnitOfWork,
        product_id: ProductId,
        quantity: i64,
        reference: Option<MovementReference>,
        note: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<LedgerReceipt, ServiceError> {
        Self::execute(
            uow,
            product_id,
            LedgerCommand::Restore(StockChange {
                movement_id: MovementId::new(),
                quantity,
                reference,
                note,
                occurred_at: at,
            }),
        )
    }

    /// Manual correction: positive deltas log `in`, negative ones `adjustment`.
    pub fn adjust(
        uow: &mut dyn UnitOfWork,
        product_id: ProductId,
        delta: i64,
        note: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<LedgerReceipt, ServiceError> {
        Self::execute(
            uow,
            product_id,
            LedgerCommand::Adjust(AdjustStock {
                movement_id: MovementId::new(),
                delta,
                note,
                occurred_at: at,
            }),
        )
    }

    /// Movements for a product, newest first.
    pub fn history(
        uow: &mut dyn UnitOfWork,
        product_id: ProductId,
        page: PageRequest,
    ) -> Result<Page<InventoryMovement>, ServiceError> {
        if uow.product(product_id)?.is_none() {
            return Err(DomainError::not_found(format!("product {product_id}")).into());
        }
        Ok(uow.movements(product_id, page)?)
    }

    fn execute(
        uow: &mut dyn UnitOfWork,
        product_id: ProductId,
        command: LedgerCommand,
    ) -> Result<LedgerReceipt, ServiceError> {
        let product = uow
            .product(product_id)?
            .ok_or_else(|| DomainError::not_found(format!("product {product_id}")))?;

        let position = StockPosition::new(
            product.id,
            product.sku.clone(),
            product.quantity,
            product.low_stock_threshold,
            product.version,
        );

        let movement = position
            .handle(&command)?
            .into_iter()
            .find_map(|e| match e {
                LedgerEvent::StockMoved(m) => Some(m),
                LedgerEvent::LowStockDetected(_) => None,
            })
            .ok_or_else(|| DomainError::validation("ledger command produced no movement"))?;

        // The store re-checks the floor atomically; the snapshot above may be stale.
        let quantity_after = match movement.movement_type {
            MovementType::Out | MovementType::Adjustment => uow
                .decrement_stock(product.id, movement.quantity)?
                .ok_or_else(|| {
                    DomainError::insufficient_stock(
                        product.sku.clone(),
                        movement.quantity,
                        product.quantity,
                    )
                })?,
            MovementType::In | MovementType::Return => {
                uow.increment_stock(product.id, movement.quantity)?
            }
        };

        uow.append_movement(&movement)?;

        debug!(
            product_id = %product.id,
            movement_type = %movement.movement_type,
            quantity = movement.quantity,
            quantity_after,
            "stock moved"
        );

        Ok(LedgerReceipt {
            low_stock: position.low_stock_after(&movement, quantity_after),
            movement,
            quantity_after,
        })
    }
}

/// Standalone ledger operations, each in its own transaction.
///
/// Low-stock signals are dispatched after commit.
pub struct InventoryService<S, B> {
    store: S,
    signals: Arc<SignalDispatcher<B>>,
    config: Config,
}

impl<S, B> InventoryService<S, B>
where
    S: Store,
    B: EventBus<SignalEnvelope>,
{
    pub fn new(store: S, signals: Arc<SignalDispatcher<B>>, config: Config) -> Self {
        Self {
            store,
            signals,
            config,
        }
    }

    #[instrument(skip(self, reference, note), fields(product_id = %product_id), err)]
    pub fn deduct(
        &self,
        product_id: ProductId,
        quantity: i64,
        reference: Option<MovementReference>,
        note: Option<String>,
    ) -> Result<LedgerReceipt, ServiceError> {
        let receipt = transact(&self.store, self.config.max_conflict_retries, |uow| {
            InventoryLedger::deduct(
                uow,
                product_id,
                quantity,
                reference.clone(),
                note.clone(),
                Utc::now(),
            )
        })?;
        self.publish(&receipt);
        Ok(receipt)
    }

    #[instrument(skip(self, reference, note), fields(product_id = %product_id), err)]
    pub fn restore(
        &self,
        product_id: ProductId,
        quantity: i64,
        reference: Option<MovementReference>,
        note: Option<String>,
    ) -> Result<LedgerReceipt, ServiceError> {
        transact(&self.store, self.config.max_conflict_retries, |uow| {
            InventoryLedger::restore(
                uow,
                product_id,
                quantity,
                reference.clone(),
                note.clone(),
                Utc::now(),
            )
        })
    }

    #[instrument(skip(self, note), fields(product_id = %product_id), err)]
    pub fn adjust(
        &self,
        product_id: ProductId,
        delta: i64,
        note: Option<String>,
    ) -> Result<LedgerReceipt, ServiceError> {
        let receipt = transact(&self.store, self.config.max_conflict_retries, |uow| {
            InventoryLedger::adjust(uow, product_id, delta, note.clone(), Utc::now())
        })?;
        self.publish(&receipt);
        Ok(receipt)
    }

    /// One page of history, `Config::history_page_size` movements per page.
    pub fn history(
        &self,
        product_id: ProductId,
        page: u32,
    ) -> Result<Page<InventoryMovement>, ServiceError> {
        let page = PageRequest::new(page, self.config.history_page_size);
        transact(&self.store, self.config.max_conflict_retries, |uow| {
            InventoryLedger::history(uow, product_id, page)
        })
    }

    fn publish(&self, receipt: &LedgerReceipt) {
        if let Some(low) = &receipt.low_stock {
            self.signals.dispatch([Signal::from(low.clone())]);
        }
    }
}
