use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockline_core::{Aggregate, AggregateRoot, DomainError, MovementId, ProductId};
use stockline_events::Event;

use crate::movement::{InventoryMovement, MovementReference, MovementType};

/// Aggregate root: the on-hand stock of one product.
///
/// A snapshot of the ledger-owned fields of a product row. It decides
/// movements but never writes them; the store applies the quantity change
/// through its own floor-checked primitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockPosition {
    product_id: ProductId,
    sku: String,
    quantity: i64,
    low_stock_threshold: i64,
    version: u64,
}

impl StockPosition {
    pub fn new(
        product_id: ProductId,
        sku: impl Into<String>,
        quantity: i64,
        low_stock_threshold: i64,
        version: u64,
    ) -> Self {
        Self {
            product_id,
            sku: sku.into(),
            quantity,
            low_stock_threshold,
            version,
        }
    }

    pub fn product_id(&self) -> ProductId {
        self.product_id
    }

    pub fn sku(&self) -> &str {
        &self.sku
    }

    pub fn quantity(&self) -> i64 {
        self.quantity
    }

    pub fn low_stock_threshold(&self) -> i64 {
        self.low_stock_threshold
    }

    /// Low-stock signal for a movement that left the product at `quantity_after`.
    ///
    /// Only deductions raise the signal.
    pub fn low_stock_after(
        &self,
        movement: &InventoryMovement,
        quantity_after: i64,
    ) -> Option<LowStockDetected> {
        if movement.movement_type != MovementType::Out || quantity_after > self.low_stock_threshold {
            return None;
        }
        Some(LowStockDetected {
            product_id: self.product_id,
            sku: self.sku.clone(),
            quantity: quantity_after,
            threshold: self.low_stock_threshold,
            occurred_at: movement.created_at,
        })
    }
}

impl AggregateRoot for StockPosition {
    type Id = ProductId;

    fn id(&self) -> &Self::Id {
        &self.product_id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// A deduction or restoration tied to a business reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockChange {
    pub movement_id: MovementId,
    pub quantity: i64,
    pub reference: Option<MovementReference>,
    pub note: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Manual correction by a signed amount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustStock {
    pub movement_id: MovementId,
    pub delta: i64,
    pub note: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerCommand {
    Deduct(StockChange),
    Restore(StockChange),
    Adjust(AdjustStock),
}

/// Signal: a deduction left a product at or below its threshold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LowStockDetected {
    pub product_id: ProductId,
    pub sku: String,
    pub quantity: i64,
    pub threshold: i64,
    pub occurred_at: DateTime<Utc>,
}

impl Event for LowStockDetected {
    fn event_type(&self) -> &'static str {
        "inventory.stock.low"
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerEvent {
    StockMoved(InventoryMovement),
    LowStockDetected(LowStockDetected),
}

impl Event for LedgerEvent {
    fn event_type(&self) -> &'static str {
        match self {
            LedgerEvent::StockMoved(_) => "inventory.stock.moved",
            LedgerEvent::LowStockDetected(e) => e.event_type(),
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            LedgerEvent::StockMoved(m) => m.created_at,
            LedgerEvent::LowStockDetected(e) => e.occurred_at,
        }
    }
}

impl Aggregate for StockPosition {
    type Command = LedgerCommand;
    type Event = LedgerEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            LedgerEvent::StockMoved(m) => {
                self.quantity += m.signed_quantity();
                self.version += 1;
            }
            // A signal, not a state change.
            LedgerEvent::LowStockDetected(_) => {}
        }
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            LedgerCommand::Deduct(cmd) => self.handle_deduct(cmd),
            LedgerCommand::Restore(cmd) => self.handle_restore(cmd),
            LedgerCommand::Adjust(cmd) => self.handle_adjust(cmd),
        }
    }
}

impl StockPosition {
    fn movement(
        &self,
        id: MovementId,
        movement_type: MovementType,
        quantity: i64,
        reference: Option<MovementReference>,
        note: Option<String>,
        at: DateTime<Utc>,
    ) -> InventoryMovement {
        InventoryMovement {
            id,
            product_id: self.product_id,
            movement_type,
            quantity,
            reference,
            note,
            created_at: at,
        }
    }

    fn ensure_available(&self, quantity: i64) -> Result<(), DomainError> {
        if self.quantity < quantity {
            return Err(DomainError::insufficient_stock(
                self.sku.clone(),
                quantity,
                self.quantity,
            ));
        }
        Ok(())
    }

    fn handle_deduct(&self, cmd: &StockChange) -> Result<Vec<LedgerEvent>, DomainError> {
        if cmd.quantity <= 0 {
            return Err(DomainError::validation("quantity must be positive"));
        }
        self.ensure_available(cmd.quantity)?;

        let movement = self.movement(
            cmd.movement_id,
            MovementType::Out,
            cmd.quantity,
            cmd.reference.clone(),
            cmd.note.clone(),
            cmd.occurred_at,
        );
        let low = self.low_stock_after(&movement, self.quantity - cmd.quantity);

        let mut events = vec![LedgerEvent::StockMoved(movement)];
        events.extend(low.map(LedgerEvent::LowStockDetected));
        Ok(events)
    }

    fn handle_restore(&self, cmd: &StockChange) -> Result<Vec<LedgerEvent>, DomainError> {
        if cmd.quantity <= 0 {
            return Err(DomainError::validation("quantity must be positive"));
        }
        Ok(vec![LedgerEvent::StockMoved(self.movement(
            cmd.movement_id,
            MovementType::Return,
            cmd.quantity,
            cmd.reference.clone(),
            cmd.note.clone(),
            cmd.occurred_at,
        ))])
    }

    fn handle_adjust(&self, cmd: &AdjustStock) -> Result<Vec<LedgerEvent>, DomainError> {
        if cmd.delta == 0 {
            return Err(DomainError::validation("delta cannot be zero"));
        }

        let (movement_type, quantity) = if cmd.delta > 0 {
            (MovementType::In, cmd.delta)
        } else {
            let quantity = cmd
                .delta
                .checked_neg()
                .ok_or_else(|| DomainError::validation("delta out of range"))?;
            self.ensure_available(quantity)?;
            (MovementType::Adjustment, quantity)
        };

        Ok(vec![LedgerEvent::StockMoved(self.movement(
            cmd.movement_id,
            movement_type,
            quantity,
            None,
            cmd.note.clone(),
            cmd.occurred_at,
        ))])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    use crate::movement::net_movement;

    fn test_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
    }

    fn position(quantity: i64, threshold: i64) -> StockPosition {
        StockPosition::new(ProductId::new(), "SKU-1", quantity, threshold, 1)
    }

    fn change(quantity: i64) -> StockChange {
        StockChange {
            movement_id: MovementId::new(),
            quantity,
            reference: None,
            note: None,
            occurred_at: test_time(),
        }
    }

    fn adjust(delta: i64) -> AdjustStock {
        AdjustStock {
            movement_id: MovementId::new(),
            delta,
            note: Some("cycle count".into()),
            occurred_at: test_time(),
        }
    }

    #[test]
    fn deduct_emits_out_movement_and_low_stock() {
        let mut pos = position(5, 10);
        let events = pos.handle(&LedgerCommand::Deduct(change(3))).unwrap();

        assert_eq!(events.len(), 2);
        match &events[0] {
            LedgerEvent::StockMoved(m) => {
                assert_eq!(m.movement_type, MovementType::Out);
                assert_eq!(m.quantity, 3);
            }
            _ => panic!("expected StockMoved"),
        }
        match &events[1] {
            LedgerEvent::LowStockDetected(e) => {
                assert_eq!(e.quantity, 2);
                assert_eq!(e.threshold, 10);
            }
            _ => panic!("expected LowStockDetected"),
        }

        for e in &events {
            pos.apply(e);
        }
        assert_eq!(pos.quantity(), 2);
        assert_eq!(pos.version(), 2);
    }

    #[test]
    fn deduct_above_threshold_is_quiet() {
        let pos = position(100, 10);
        let events = pos.handle(&LedgerCommand::Deduct(change(20))).unwrap();
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn deduct_exactly_to_threshold_signals() {
        let pos = position(15, 10);
        let events = pos.handle(&LedgerCommand::Deduct(change(5))).unwrap();
        assert!(matches!(events.last(), Some(LedgerEvent::LowStockDetected(_))));
    }

    #[test]
    fn deduct_more_than_on_hand_fails() {
        let pos = position(2, 10);
        let err = pos.handle(&LedgerCommand::Deduct(change(10))).unwrap_err();
        assert_eq!(err, DomainError::insufficient_stock("SKU-1", 10, 2));
    }

    #[test]
    fn restore_logs_return_without_upper_bound() {
        let mut pos = position(0, 10);
        let events = pos.handle(&LedgerCommand::Restore(change(1_000))).unwrap();
        match &events[0] {
            LedgerEvent::StockMoved(m) => assert_eq!(m.movement_type, MovementType::Return),
            _ => panic!("expected StockMoved"),
        }
        pos.apply(&events[0]);
        assert_eq!(pos.quantity(), 1_000);
    }

    #[test]
    fn adjust_direction_picks_movement_type() {
        let pos = position(10, 0);

        let up = pos.handle(&LedgerCommand::Adjust(adjust(4))).unwrap();
        let down = pos.handle(&LedgerCommand::Adjust(adjust(-4))).unwrap();

        match (&up[0], &down[0]) {
            (LedgerEvent::StockMoved(a), LedgerEvent::StockMoved(b)) => {
                assert_eq!((a.movement_type, a.quantity), (MovementType::In, 4));
                assert_eq!((b.movement_type, b.quantity), (MovementType::Adjustment, 4));
            }
            _ => panic!("expected StockMoved"),
        }
    }

    #[test]
    fn adjust_rejects_zero_and_overdraw() {
        let pos = position(3, 0);
        assert!(matches!(
            pos.handle(&LedgerCommand::Adjust(adjust(0))),
            Err(DomainError::Validation(_))
        ));
        assert!(matches!(
            pos.handle(&LedgerCommand::Adjust(adjust(-4))),
            Err(DomainError::InsufficientStock { .. })
        ));
    }

    #[test]
    fn non_positive_quantities_are_rejected() {
        let pos = position(3, 0);
        assert!(pos.handle(&LedgerCommand::Deduct(change(0))).is_err());
        assert!(pos.handle(&LedgerCommand::Restore(change(-1))).is_err());
    }

    #[derive(Debug, Clone)]
    enum Op {
        Deduct(i64),
        Restore(i64),
        Adjust(i64),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (1i64..50).prop_map(Op::Deduct),
            (1i64..50).prop_map(Op::Restore),
            (-50i64..50).prop_map(Op::Adjust),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 256, ..ProptestConfig::default() })]

        #[test]
        fn ledger_never_negative_and_reconstructable(
            initial in 0i64..100,
            ops in proptest::collection::vec(op(), 0..40),
        ) {
            let mut pos = position(initial, 5);
            let mut history = Vec::new();

            for op in ops {
                let cmd = match op {
                    Op::Deduct(q) => LedgerCommand::Deduct(change(q)),
                    Op::Restore(q) => LedgerCommand::Restore(change(q)),
                    Op::Adjust(d) => LedgerCommand::Adjust(adjust(d)),
                };
                if let Ok(events) = pos.handle(&cmd) {
                    for e in &events {
                        if let LedgerEvent::StockMoved(m) = e {
                            prop_assert!(m.quantity > 0);
                            history.push(m.clone());
                        }
                        pos.apply(e);
                    }
                }
                prop_assert!(pos.quantity() >= 0);
            }

            prop_assert_eq!(net_movement(&history), pos.quantity() - initial);
        }
    }
}
