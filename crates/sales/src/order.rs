use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockline_core::{
    Aggregate, AggregateRoot, DomainError, Entity, Money, OrderId, OrderItemId, ProductId, UserId,
    VariantId,
};
use stockline_events::Event;

/// Order status lifecycle.
///
/// `pending → processing → shipped → delivered`, with `cancelled` reachable
/// from every non-terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Processing => "processing",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }

    /// Whether stock for this order's items is currently held by the ledger.
    pub fn holds_stock(self) -> bool {
        matches!(self, OrderStatus::Processing | OrderStatus::Shipped)
    }

    pub fn can_transition_to(self, to: OrderStatus) -> bool {
        matches!(
            (self, to),
            (OrderStatus::Pending, OrderStatus::Processing)
                | (OrderStatus::Processing, OrderStatus::Shipped)
                | (OrderStatus::Shipped, OrderStatus::Delivered)
                | (
                    OrderStatus::Pending | OrderStatus::Processing | OrderStatus::Shipped,
                    OrderStatus::Cancelled
                )
        )
    }
}

impl core::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for OrderStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OrderStatus::Pending),
            "processing" => Ok(OrderStatus::Processing),
            "shipped" => Ok(OrderStatus::Shipped),
            "delivered" => Ok(OrderStatus::Delivered),
            "cancelled" => Ok(OrderStatus::Cancelled),
            other => Err(DomainError::validation(format!("unknown order status: {other}"))),
        }
    }
}

/// Ledger work a status change requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StockEffect {
    None,
    /// Deduct every item's quantity.
    Deduct,
    /// Give every item's quantity back.
    Restore,
}

/// Order line. The unit price is a snapshot taken when the order was placed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: OrderItemId,
    pub product_id: ProductId,
    pub variant_id: Option<VariantId>,
    pub quantity: i64,
    pub unit_price: Money,
    pub subtotal: Money,
}

impl Entity for OrderItem {
    type Id = OrderItemId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Persisted shape of an order, used to rehydrate it from storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub id: OrderId,
    pub order_number: String,
    pub customer_id: UserId,
    pub status: OrderStatus,
    pub items: Vec<OrderItem>,
    pub tax: Money,
    pub shipping: Money,
    pub total: Money,
    pub notes: Option<String>,
    pub shipped_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
}

/// Aggregate root: Order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    id: OrderId,
    order_number: String,
    customer_id: Option<UserId>,
    status: OrderStatus,
    items: Vec<OrderItem>,
    tax: Money,
    shipping: Money,
    total: Money,
    notes: Option<String>,
    shipped_at: Option<DateTime<Utc>>,
    delivered_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl Order {
    /// Create an empty, not-yet-placed aggregate instance.
    pub fn empty(id: OrderId) -> Self {
        Self {
            id,
            order_number: String::new(),
            customer_id: None,
            status: OrderStatus::Pending,
            items: Vec::new(),
            tax: Money::ZERO,
            shipping: Money::ZERO,
            total: Money::ZERO,
            notes: None,
            shipped_at: None,
            delivered_at: None,
            cancelled_at: None,
            created_at: None,
            updated_at: None,
            version: 0,
            created: false,
        }
    }

    /// Rebuild a placed order from its stored shape.
    pub fn restore(record: OrderRecord) -> Self {
        Self {
            id: record.id,
            order_number: record.order_number,
            customer_id: Some(record.customer_id),
            status: record.status,
            items: record.items,
            tax: record.tax,
            shipping: record.shipping,
            total: record.total,
            notes: record.notes,
            shipped_at: record.shipped_at,
            delivered_at: record.delivered_at,
            cancelled_at: record.cancelled_at,
            created_at: Some(record.created_at),
            updated_at: Some(record.updated_at),
            version: record.version,
            created: true,
        }
    }

    /// Stored shape of a placed order; `None` before placement.
    pub fn to_record(&self) -> Option<OrderRecord> {
        if !self.created {
            return None;
        }
        Some(OrderRecord {
            id: self.id,
            order_number: self.order_number.clone(),
            customer_id: self.customer_id?,
            status: self.status,
            items: self.items.clone(),
            tax: self.tax,
            shipping: self.shipping,
            total: self.total,
            notes: self.notes.clone(),
            shipped_at: self.shipped_at,
            delivered_at: self.delivered_at,
            cancelled_at: self.cancelled_at,
            created_at: self.created_at?,
            updated_at: self.updated_at?,
            version: self.version,
        })
    }

    pub fn id_typed(&self) -> OrderId {
        self.id
    }

    pub fn order_number(&self) -> &str {
        &self.order_number
    }

    pub fn customer_id(&self) -> Option<UserId> {
        self.customer_id
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn items(&self) -> &[OrderItem] {
        &self.items
    }

    pub fn tax(&self) -> Money {
        self.tax
    }

    pub fn shipping(&self) -> Money {
        self.shipping
    }

    pub fn total(&self) -> Money {
        self.total
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    pub fn shipped_at(&self) -> Option<DateTime<Utc>> {
        self.shipped_at
    }

    pub fn delivered_at(&self) -> Option<DateTime<Utc>> {
        self.delivered_at
    }

    pub fn cancelled_at(&self) -> Option<DateTime<Utc>> {
        self.cancelled_at
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn is_placed(&self) -> bool {
        self.created
    }
}

impl AggregateRoot for Order {
    type Id = OrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// A requested line with its price already resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricedItem {
    pub item_id: OrderItemId,
    pub product_id: ProductId,
    pub variant_id: Option<VariantId>,
    pub quantity: i64,
    pub unit_price: Money,
}

/// Command: PlaceOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceOrder {
    pub order_id: OrderId,
    pub order_number: String,
    pub customer_id: UserId,
    pub items: Vec<PricedItem>,
    pub tax: Money,
    pub shipping: Money,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ConfirmOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmOrder {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ShipOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipOrder {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: DeliverOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliverOrder {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelOrder {
    pub order_id: OrderId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderCommand {
    Place(PlaceOrder),
    Confirm(ConfirmOrder),
    Ship(ShipOrder),
    Deliver(DeliverOrder),
    Cancel(CancelOrder),
}

/// Event: OrderPlaced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPlaced {
    pub order_id: OrderId,
    pub order_number: String,
    pub customer_id: UserId,
    pub items: Vec<OrderItem>,
    pub tax: Money,
    pub shipping: Money,
    pub total: Money,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event/signal: OrderStatusChanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderStatusChanged {
    pub order_id: OrderId,
    pub order_number: String,
    pub customer_id: UserId,
    pub from: OrderStatus,
    pub to: OrderStatus,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl OrderStatusChanged {
    pub fn stock_effect(&self) -> StockEffect {
        match (self.from, self.to) {
            (OrderStatus::Pending, OrderStatus::Processing) => StockEffect::Deduct,
            (from, OrderStatus::Cancelled) if from.holds_stock() => StockEffect::Restore,
            _ => StockEffect::None,
        }
    }
}

impl Event for OrderStatusChanged {
    fn event_type(&self) -> &'static str {
        "sales.order.status_changed"
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderEvent {
    OrderPlaced(OrderPlaced),
    StatusChanged(OrderStatusChanged),
}

impl Event for OrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::OrderPlaced(_) => "sales.order.placed",
            OrderEvent::StatusChanged(e) => e.event_type(),
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            OrderEvent::OrderPlaced(e) => e.occurred_at,
            OrderEvent::StatusChanged(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Order {
    type Command = OrderCommand;
    type Event = OrderEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            OrderEvent::OrderPlaced(e) => {
                self.id = e.order_id;
                self.order_number = e.order_number.clone();
                self.customer_id = Some(e.customer_id);
                self.status = OrderStatus::Pending;
                self.items = e.items.clone();
                self.tax = e.tax;
                self.shipping = e.shipping;
                self.total = e.total;
                self.notes = e.notes.clone();
                self.created_at = Some(e.occurred_at);
                self.updated_at = Some(e.occurred_at);
                self.created = true;
            }
            OrderEvent::StatusChanged(e) => {
                self.status = e.to;
                // Each timestamp is written on first entry only.
                let stamp = match e.to {
                    OrderStatus::Shipped => Some(&mut self.shipped_at),
                    OrderStatus::Delivered => Some(&mut self.delivered_at),
                    OrderStatus::Cancelled => Some(&mut self.cancelled_at),
                    OrderStatus::Pending | OrderStatus::Processing => None,
                };
                if let Some(slot) = stamp {
                    slot.get_or_insert(e.occurred_at);
                }
                self.updated_at = Some(e.occurred_at);
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            OrderCommand::Place(cmd) => self.handle_place(cmd),
            OrderCommand::Confirm(cmd) => {
                self.transition(cmd.order_id, OrderStatus::Processing, None, cmd.occurred_at)
            }
            OrderCommand::Ship(cmd) => {
                self.transition(cmd.order_id, OrderStatus::Shipped, None, cmd.occurred_at)
            }
            OrderCommand::Deliver(cmd) => {
                self.transition(cmd.order_id, OrderStatus::Delivered, None, cmd.occurred_at)
            }
            OrderCommand::Cancel(cmd) => self.handle_cancel(cmd),
        }
    }
}

impl Order {
    fn ensure_order_id(&self, order_id: OrderId) -> Result<(), DomainError> {
        if self.id != order_id {
            return Err(DomainError::validation("order_id mismatch"));
        }
        Ok(())
    }

    fn ensure_placed(&self) -> Result<UserId, DomainError> {
        match (self.created, self.customer_id) {
            (true, Some(customer)) => Ok(customer),
            _ => Err(DomainError::not_found(format!("order {}", self.id))),
        }
    }

    fn handle_place(&self, cmd: &PlaceOrder) -> Result<Vec<OrderEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("order already exists"));
        }
        self.ensure_order_id(cmd.order_id)?;

        if cmd.order_number.trim().is_empty() {
            return Err(DomainError::validation("order_number cannot be empty"));
        }
        if cmd.items.is_empty() {
            return Err(DomainError::validation("order must have at least one item"));
        }
        if cmd.tax.is_negative() || cmd.shipping.is_negative() {
            return Err(DomainError::validation("tax and shipping cannot be negative"));
        }

        let mut items = Vec::with_capacity(cmd.items.len());
        let mut total = cmd.tax.checked_add(cmd.shipping)?;
        for item in &cmd.items {
            if item.quantity <= 0 {
                return Err(DomainError::validation("quantity must be positive"));
            }
            if item.unit_price.is_negative() {
                return Err(DomainError::validation("unit_price cannot be negative"));
            }
            let subtotal = item.unit_price.times(item.quantity)?;
            total = total.checked_add(subtotal)?;
            items.push(OrderItem {
                id: item.item_id,
                product_id: item.product_id,
                variant_id: item.variant_id,
                quantity: item.quantity,
                unit_price: item.unit_price,
                subtotal,
            });
        }

        Ok(vec![OrderEvent::OrderPlaced(OrderPlaced {
            order_id: cmd.order_id,
            order_number: cmd.order_number.clone(),
            customer_id: cmd.customer_id,
            items,
            tax: cmd.tax,
            shipping: cmd.shipping,
            total,
            notes: cmd.notes.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn transition(
        &self,
        order_id: OrderId,
        to: OrderStatus,
        reason: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<Vec<OrderEvent>, DomainError> {
        let customer_id = self.ensure_placed()?;
        self.ensure_order_id(order_id)?;

        if !self.status.can_transition_to(to) {
            return Err(DomainError::invalid_transition(format!(
                "order {} cannot move from {} to {}",
                self.order_number, self.status, to
            )));
        }

        Ok(vec![OrderEvent::StatusChanged(OrderStatusChanged {
            order_id: self.id,
            order_number: self.order_number.clone(),
            customer_id,
            from: self.status,
            to,
            reason,
            occurred_at: at,
        })])
    }

    fn handle_cancel(&self, cmd: &CancelOrder) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_placed()?;
        if self.status == OrderStatus::Cancelled {
            return Err(DomainError::AlreadyCancelled(self.order_number.clone()));
        }
        self.transition(
            cmd.order_id,
            OrderStatus::Cancelled,
            cmd.reason.clone(),
            cmd.occurred_at,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn test_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 10, 8, 30, 0).unwrap()
    }

    fn item(quantity: i64, cents: i64) -> PricedItem {
        PricedItem {
            item_id: OrderItemId::new(),
            product_id: ProductId::new(),
            variant_id: None,
            quantity,
            unit_price: Money::from_cents(cents),
        }
    }

    fn place_cmd(order_id: OrderId, items: Vec<PricedItem>) -> PlaceOrder {
        PlaceOrder {
            order_id,
            order_number: "ORD-20260410-AB12CD".into(),
            customer_id: UserId::new(),
            items,
            tax: Money::from_cents(150),
            shipping: Money::from_cents(500),
            notes: Some("leave at door".into()),
            occurred_at: test_time(),
        }
    }

    fn placed_order() -> Order {
        let id = OrderId::new();
        let mut order = Order::empty(id);
        let events = order
            .handle(&OrderCommand::Place(place_cmd(id, vec![item(20, 1000), item(1, 250)])))
            .unwrap();
        for e in &events {
            order.apply(e);
        }
        order
    }

    fn run(
        order: &mut Order,
        make: fn(&Order) -> OrderCommand,
    ) -> Result<OrderStatusChanged, DomainError> {
        let cmd = make(order);
        let events = order.handle(&cmd)?;
        for e in &events {
            order.apply(e);
        }
        match events.into_iter().next() {
            Some(OrderEvent::StatusChanged(e)) => Ok(e),
            other => panic!("expected StatusChanged, got {other:?}"),
        }
    }

    fn confirm(order: &Order) -> OrderCommand {
        OrderCommand::Confirm(ConfirmOrder {
            order_id: order.id_typed(),
            occurred_at: test_time(),
        })
    }

    fn ship(order: &Order) -> OrderCommand {
        OrderCommand::Ship(ShipOrder {
            order_id: order.id_typed(),
            occurred_at: test_time(),
        })
    }

    fn deliver(order: &Order) -> OrderCommand {
        OrderCommand::Deliver(DeliverOrder {
            order_id: order.id_typed(),
            occurred_at: test_time(),
        })
    }

    fn cancel(order: &Order) -> OrderCommand {
        OrderCommand::Cancel(CancelOrder {
            order_id: order.id_typed(),
            reason: Some("customer request".into()),
            occurred_at: test_time(),
        })
    }

    #[test]
    fn place_computes_subtotals_and_total() {
        let order = placed_order();
        assert!(order.is_placed());
        assert_eq!(order.status(), OrderStatus::Pending);
        assert_eq!(order.items()[0].subtotal, Money::from_cents(20_000));
        assert_eq!(order.items()[1].subtotal, Money::from_cents(250));
        // 200.00 + 2.50 + 1.50 tax + 5.00 shipping
        assert_eq!(order.total(), Money::from_cents(20_900));
        assert_eq!(order.version(), 1);
        assert_eq!(order.notes(), Some("leave at door"));
    }

    #[test]
    fn place_rejects_empty_and_non_positive_items() {
        let id = OrderId::new();
        let order = Order::empty(id);
        assert!(matches!(
            order.handle(&OrderCommand::Place(place_cmd(id, vec![]))),
            Err(DomainError::Validation(_))
        ));
        assert!(matches!(
            order.handle(&OrderCommand::Place(place_cmd(id, vec![item(0, 100)]))),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn place_twice_is_a_conflict() {
        let order = placed_order();
        let err = order
            .handle(&OrderCommand::Place(place_cmd(order.id_typed(), vec![item(1, 1)])))
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[test]
    fn happy_path_walks_forward_and_stamps_once() {
        let mut order = placed_order();

        let confirmed = run(&mut order, confirm).unwrap();
        assert_eq!(confirmed.stock_effect(), StockEffect::Deduct);
        assert_eq!(order.status(), OrderStatus::Processing);

        let shipped = run(&mut order, ship).unwrap();
        assert_eq!(shipped.stock_effect(), StockEffect::None);
        assert_eq!(order.shipped_at(), Some(test_time()));

        run(&mut order, deliver).unwrap();
        assert_eq!(order.status(), OrderStatus::Delivered);
        assert_eq!(order.delivered_at(), Some(test_time()));
        assert_eq!(order.version(), 4);
    }

    #[test]
    fn confirm_requires_pending() {
        let mut order = placed_order();
        run(&mut order, confirm).unwrap();
        let err = run(&mut order, confirm).unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition(_)));
    }

    #[test]
    fn ship_requires_processing() {
        let mut order = placed_order();
        let err = run(&mut order, ship).unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition(_)));
    }

    #[test]
    fn deliver_requires_shipped() {
        let mut order = placed_order();
        assert!(matches!(run(&mut order, deliver), Err(DomainError::InvalidTransition(_))));
        run(&mut order, confirm).unwrap();
        assert!(matches!(run(&mut order, deliver), Err(DomainError::InvalidTransition(_))));
        assert_eq!(order.status(), OrderStatus::Processing);
        assert!(order.shipped_at().is_none());
    }

    #[test]
    fn cancel_pending_has_no_stock_effect() {
        let mut order = placed_order();
        let e = run(&mut order, cancel).unwrap();
        assert_eq!(e.stock_effect(), StockEffect::None);
        assert_eq!(e.reason.as_deref(), Some("customer request"));
        assert_eq!(order.cancelled_at(), Some(test_time()));
    }

    #[test]
    fn cancel_after_deduction_restores() {
        for steps in [1, 2] {
            let mut order = placed_order();
            run(&mut order, confirm).unwrap();
            if steps == 2 {
                run(&mut order, ship).unwrap();
            }
            let e = run(&mut order, cancel).unwrap();
            assert_eq!(e.stock_effect(), StockEffect::Restore);
        }
    }

    #[test]
    fn terminal_states_reject_everything() {
        let mut cancelled = placed_order();
        run(&mut cancelled, cancel).unwrap();
        assert!(matches!(
            run(&mut cancelled, cancel),
            Err(DomainError::AlreadyCancelled(n)) if n == "ORD-20260410-AB12CD"
        ));
        for cmd in [confirm(&cancelled), ship(&cancelled), deliver(&cancelled)] {
            assert!(matches!(
                cancelled.handle(&cmd),
                Err(DomainError::InvalidTransition(_))
            ));
        }

        let mut delivered = placed_order();
        run(&mut delivered, confirm).unwrap();
        run(&mut delivered, ship).unwrap();
        run(&mut delivered, deliver).unwrap();
        for cmd in [
            confirm(&delivered),
            ship(&delivered),
            deliver(&delivered),
            cancel(&delivered),
        ] {
            assert!(matches!(
                delivered.handle(&cmd),
                Err(DomainError::InvalidTransition(_))
            ));
        }
    }

    #[test]
    fn commands_against_unplaced_order_are_not_found() {
        let order = Order::empty(OrderId::new());
        assert!(matches!(order.handle(&confirm(&order)), Err(DomainError::NotFound(_))));
        assert!(matches!(order.handle(&cancel(&order)), Err(DomainError::NotFound(_))));
    }

    #[test]
    fn handle_does_not_mutate_state() {
        let order = placed_order();
        let before = order.clone();
        let _ = order.handle(&confirm(&order)).unwrap();
        assert_eq!(order, before);
    }

    #[test]
    fn record_round_trips_through_restore() {
        let mut order = placed_order();
        run(&mut order, confirm).unwrap();
        let record = order.to_record().unwrap();
        assert_eq!(Order::restore(record), order);
        assert!(Order::empty(OrderId::new()).to_record().is_none());
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 256, ..ProptestConfig::default() })]

        #[test]
        fn total_is_sum_of_subtotals_plus_charges(
            lines in proptest::collection::vec((1i64..100, 0i64..100_000), 1..10),
            tax in 0i64..10_000,
            shipping in 0i64..10_000,
        ) {
            let id = OrderId::new();
            let mut cmd = place_cmd(id, lines.iter().map(|(q, p)| item(*q, *p)).collect());
            cmd.tax = Money::from_cents(tax);
            cmd.shipping = Money::from_cents(shipping);

            let events = Order::empty(id).handle(&OrderCommand::Place(cmd)).unwrap();
            let placed = match &events[0] {
                OrderEvent::OrderPlaced(e) => e.clone(),
                _ => panic!("expected OrderPlaced"),
            };

            let expected: i64 = lines.iter().map(|(q, p)| q * p).sum::<i64>() + tax + shipping;
            prop_assert_eq!(placed.total, Money::from_cents(expected));
            let recomputed = placed
                .items
                .iter()
                .try_fold(placed.tax.checked_add(placed.shipping).unwrap(), |acc, i| acc.checked_add(i.subtotal))
                .unwrap();
            prop_assert_eq!(recomputed, placed.total);
        }

        #[test]
        fn no_transition_escapes_a_terminal_status(
            path in proptest::collection::vec(0u8..4, 0..8),
        ) {
            let mut order = placed_order();
            for step in path {
                let cmd = match step {
                    0 => confirm(&order),
                    1 => ship(&order),
                    2 => deliver(&order),
                    _ => cancel(&order),
                };
                let was_terminal = order.status().is_terminal();
                let result = order.handle(&cmd);
                if was_terminal {
                    prop_assert!(result.is_err());
                }
                if let Ok(events) = result {
                    for e in &events {
                        order.apply(e);
                    }
                }
            }
        }
    }
}
