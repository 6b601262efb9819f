//! Order lifecycle execution.
//!
//! Runs the `Order` state machine against the store: load, decide, apply the
//! ledger effects the transition calls for, persist. Everything happens in the
//! caller's unit of work, so a failure anywhere leaves nothing behind.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use stockline_core::{
    Aggregate, AggregateRoot, DomainError, ExpectedVersion, Money, OrderId, OrderItemId,
    ProductId, UserId, VariantId,
};
use stockline_inventory::MovementReference;
use stockline_sales::{
    CancelOrder, ConfirmOrder, DeliverOrder, Order, OrderCommand, OrderEvent,
    OrderNumberGenerator, OrderNumberSource, PlaceOrder, PricedItem, ShipOrder, StockEffect,
};

use crate::config::Config;
use crate::error::ServiceError;
use crate::ledger::InventoryLedger;
use crate::signals::Signal;
use crate::store::UnitOfWork;

/// Requested order line. Without an explicit price the current variant or
/// product price is snapshotted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrderItem {
    pub product_id: ProductId,
    pub variant_id: Option<VariantId>,
    pub quantity: i64,
    pub unit_price: Option<Money>,
}

impl NewOrderItem {
    pub fn new(product_id: ProductId, quantity: i64) -> Self {
        Self {
            product_id,
            variant_id: None,
            quantity,
            unit_price: None,
        }
    }

    pub fn with_variant(mut self, variant_id: VariantId) -> Self {
        self.variant_id = Some(variant_id);
        self
    }

    pub fn with_unit_price(mut self, price: Money) -> Self {
        self.unit_price = Some(price);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrder {
    pub customer_id: UserId,
    pub items: Vec<NewOrderItem>,
    pub tax: Money,
    pub shipping: Money,
    pub notes: Option<String>,
}

impl NewOrder {
    pub fn new(customer_id: UserId, items: Vec<NewOrderItem>) -> Self {
        Self {
            customer_id,
            items,
            tax: Money::ZERO,
            shipping: Money::ZERO,
            notes: None,
        }
    }
}

/// A transition's refreshed order plus the signals to publish after commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderOutcome {
    pub order: Order,
    pub signals: Vec<Signal>,
}

#[derive(Debug, Clone)]
pub struct OrderWorkflow {
    numbers: Arc<dyn OrderNumberSource>,
    number_attempts: u32,
}

impl OrderWorkflow {
    pub fn new(config: &Config) -> Self {
        Self {
            numbers: Arc::new(OrderNumberGenerator::new(config.order_prefix.clone())),
            number_attempts: config.order_number_attempts.max(1),
        }
    }

    /// Replace the order-number candidate source.
    pub fn with_numbers(mut self, numbers: impl OrderNumberSource + 'static) -> Self {
        self.numbers = Arc::new(numbers);
        self
    }

    /// Create a pending order. Inventory is not touched.
    pub fn place(
        &self,
        uow: &mut dyn UnitOfWork,
        input: &NewOrder,
        at: DateTime<Utc>,
    ) -> Result<Order, ServiceError> {
        let mut items = Vec::with_capacity(input.items.len());
        for line in &input.items {
            items.push(price_line(uow, line)?);
        }

        let order_number = self.allocate_number(uow, at)?;
        let order_id = OrderId::new();
        let mut order = Order::empty(order_id);
        let events = order.handle(&OrderCommand::Place(PlaceOrder {
            order_id,
            order_number,
            customer_id: input.customer_id,
            items,
            tax: input.tax,
            shipping: input.shipping,
            notes: input.notes.clone(),
            occurred_at: at,
        }))?;
        for e in &events {
            order.apply(e);
        }

        let record = order
            .to_record()
            .ok_or_else(|| DomainError::validation("order was not placed"))?;
        uow.insert_order(&record)?;

        debug!(order_id = %order_id, order_number = %order.order_number(), "order placed");
        Ok(order)
    }

    pub fn confirm(
        &self,
        uow: &mut dyn UnitOfWork,
        order_id: OrderId,
        at: DateTime<Utc>,
    ) -> Result<OrderOutcome, ServiceError> {
        self.transition(
            uow,
            order_id,
            OrderCommand::Confirm(ConfirmOrder {
                order_id,
                occurred_at: at,
            }),
        )
    }

    pub fn ship(
        &self,
        uow: &mut dyn UnitOfWork,
        order_id: OrderId,
        at: DateTime<Utc>,
    ) -> Result<OrderOutcome, ServiceError> {
        self.transition(
            uow,
            order_id,
            OrderCommand::Ship(ShipOrder {
                order_id,
                occurred_at: at,
            }),
        )
    }

    pub fn deliver(
        &self,
        uow: &mut dyn UnitOfWork,
        order_id: OrderId,
        at: DateTime<Utc>,
    ) -> Result<OrderOutcome, ServiceError> {
        self.transition(
            uow,
            order_id,
            OrderCommand::Deliver(DeliverOrder {
                order_id,
                occurred_at: at,
            }),
        )
    }

    /// Cancel an order, giving back stock if it had been deducted.
    pub fn cancel(
        &self,
        uow: &mut dyn UnitOfWork,
        order_id: OrderId,
        reason: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<OrderOutcome, ServiceError> {
        self.transition(
            uow,
            order_id,
            OrderCommand::Cancel(CancelOrder {
                order_id,
                reason,
                occurred_at: at,
            }),
        )
    }

    pub fn load(uow: &mut dyn UnitOfWork, order_id: OrderId) -> Result<Order, ServiceError> {
        uow.order(order_id)?
            .map(Order::restore)
            .ok_or_else(|| DomainError::not_found(format!("order {order_id}")).into())
    }

    fn allocate_number(
        &self,
        uow: &mut dyn UnitOfWork,
        at: DateTime<Utc>,
    ) -> Result<String, ServiceError> {
        for attempt in 1..=self.number_attempts {
            let candidate = self.numbers.candidate(at);
            if !uow.order_number_exists(&candidate)? {
                return Ok(candidate);
            }
            warn!(attempt, candidate = %candidate, "order number collision");
        }
        warn!(attempts = self.number_attempts, "order number space exhausted");
        Err(DomainError::conflict(format!(
            "no unique order number after {} attempts",
            self.number_attempts
        ))
        .into())
    }

    fn transition(
        &self,
        uow: &mut dyn UnitOfWork,
        order_id: OrderId,
        command: OrderCommand,
    ) -> Result<OrderOutcome, ServiceError> {
        let mut order = Self::load(uow, order_id)?;
        let loaded_version = order.version();

        let events = order.handle(&command)?;

        let mut signals = Vec::new();
        for event in &events {
            if let OrderEvent::StatusChanged(changed) = event {
                match changed.stock_effect() {
                    StockEffect::Deduct => {
                        signals.extend(deduct_items(uow, &order, changed.occurred_at)?);
                    }
                    StockEffect::Restore => {
                        restore_items(uow, &order, changed.reason.as_deref(), changed.occurred_at)?;
                    }
                    StockEffect::None => {}
                }
            }
        }

        for event in &events {
            order.apply(event);
        }

        let record = order
            .to_record()
            .ok_or_else(|| DomainError::not_found(format!("order {order_id}")))?;
        uow.save_order(&record, ExpectedVersion::Exact(loaded_version))?;

        let mut out: Vec<Signal> = events
            .into_iter()
            .filter_map(|e| match e {
                OrderEvent::StatusChanged(changed) => Some(Signal::from(changed)),
                OrderEvent::OrderPlaced(_) => None,
            })
            .collect();
        out.extend(signals);

        debug!(order_id = %order_id, status = %order.status(), "order transitioned");
        Ok(OrderOutcome {
            order,
            signals: out,
        })
    }
}

fn price_line(uow: &mut dyn UnitOfWork, line: &NewOrderItem) -> Result<PricedItem, ServiceError> {
    let product = uow
        .product(line.product_id)?
        .ok_or_else(|| DomainError::not_found(format!("product {}", line.product_id)))?;
    if !product.can_be_sold() {
        return Err(DomainError::validation(format!("product {} is not active", product.sku)).into());
    }

    let variant = match line.variant_id {
        Some(variant_id) => {
            let variant = uow
                .variant(variant_id)?
                .ok_or_else(|| DomainError::not_found(format!("variant {variant_id}")))?;
            if variant.product_id != product.id {
                return Err(DomainError::validation(format!(
                    "variant {} does not belong to product {}",
                    variant.sku, product.sku
                ))
                .into());
            }
            Some(variant)
        }
        None => None,
    };

    let unit_price = line
        .unit_price
        .or(variant.as_ref().map(|v| v.price))
        .unwrap_or(product.price);

    Ok(PricedItem {
        item_id: OrderItemId::new(),
        product_id: product.id,
        variant_id: line.variant_id,
        quantity: line.quantity,
        unit_price,
    })
}

/// Check every product can cover the order, then deduct item by item.
fn deduct_items(
    uow: &mut dyn UnitOfWork,
    order: &Order,
    at: DateTime<Utc>,
) -> Result<Vec<Signal>, ServiceError> {
    let mut required: BTreeMap<ProductId, i64> = BTreeMap::new();
    for item in order.items() {
        let total = required.entry(item.product_id).or_default();
        *total = total.checked_add(item.quantity).ok_or_else(|| {
            DomainError::validation(format!("quantity for product {} overflows", item.product_id))
        })?;
    }
    for (product_id, quantity) in &required {
        let product = uow
            .product(*product_id)?
            .ok_or_else(|| DomainError::not_found(format!("product {product_id}")))?;
        if product.quantity < *quantity {
            return Err(
                DomainError::insufficient_stock(product.sku, *quantity, product.quantity).into(),
            );
        }
    }

    let reference = MovementReference::order(order.id_typed());
    let note = format!("Order {}", order.order_number());

    let mut signals = Vec::new();
    for item in order.items() {
        let receipt = InventoryLedger::deduct(
            uow,
            item.product_id,
            item.quantity,
            Some(reference.clone()),
            Some(note.clone()),
            at,
        )?;
        signals.extend(receipt.low_stock.map(Signal::from));
    }
    Ok(signals)
}

fn restore_items(
    uow: &mut dyn UnitOfWork,
    order: &Order,
    reason: Option<&str>,
    at: DateTime<Utc>,
) -> Result<(), ServiceError> {
    let reference = MovementReference::order(order.id_typed());
    let note = match reason {
        Some(reason) => format!("Order {} cancelled - {}", order.order_number(), reason),
        None => format!("Order {} cancelled", order.order_number()),
    };
    for item in order.items() {
        InventoryLedger::restore(
            uow,
            item.product_id,
            item.quantity,
            Some(reference.clone()),
            Some(note.clone()),
            at,
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use stockline_inventory::MovementType;
    use stockline_products::{NewProduct, Product};
    use stockline_sales::OrderStatus;

    use crate::store::{InMemoryStore, PageRequest, Store};

    /// Hands out `script` in order, then keeps repeating its last entry.
    #[derive(Debug, Clone)]
    struct ScriptedNumbers {
        script: Arc<Mutex<VecDeque<&'static str>>>,
        calls: Arc<AtomicUsize>,
    }

    impl ScriptedNumbers {
        fn new(script: &[&'static str]) -> Self {
            Self {
                script: Arc::new(Mutex::new(script.iter().copied().collect())),
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl OrderNumberSource for ScriptedNumbers {
        fn candidate(&self, _at: DateTime<Utc>) -> String {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut script = self.script.lock().unwrap();
            let next = if script.len() > 1 {
                script.pop_front()
            } else {
                script.front().copied()
            };
            next.unwrap().to_string()
        }
    }

    #[derive(Debug, Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl CapturedLogs {
        fn subscriber(&self) -> impl tracing::Subscriber + Send + Sync + 'static {
            let sink = self.clone();
            tracing_subscriber::fmt()
                .with_writer(move || sink.clone())
                .with_ansi(false)
                .finish()
        }

        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    fn seed(store: &InMemoryStore, sku: &str, quantity: i64, cents: i64) -> Product {
        let product = Product::create(
            ProductId::new(),
            NewProduct::new(sku, sku, Money::from_cents(cents)).with_quantity(quantity),
            10,
            Utc::now(),
        )
        .unwrap();
        let mut uow = store.begin().unwrap();
        let product = uow.insert_product(&product).unwrap();
        uow.commit().unwrap();
        product
    }

    fn quantity_of(store: &InMemoryStore, id: ProductId) -> i64 {
        let mut uow = store.begin().unwrap();
        uow.product(id).unwrap().unwrap().quantity
    }

    fn place(store: &InMemoryStore, workflow: &OrderWorkflow, items: Vec<NewOrderItem>) -> Order {
        let mut uow = store.begin().unwrap();
        let order = workflow
            .place(&mut *uow, &NewOrder::new(UserId::new(), items), Utc::now())
            .unwrap();
        uow.commit().unwrap();
        order
    }

    #[test]
    fn place_snapshots_prices_and_leaves_stock_alone() {
        let store = InMemoryStore::new();
        let workflow = OrderWorkflow::new(&Config::default());
        let a = seed(&store, "A", 10, 250);

        let order = place(
            &store,
            &workflow,
            vec![
                NewOrderItem::new(a.id, 2),
                NewOrderItem::new(a.id, 1).with_unit_price(Money::from_cents(100)),
            ],
        );

        assert_eq!(order.status(), OrderStatus::Pending);
        assert_eq!(order.items()[0].unit_price, Money::from_cents(250));
        assert_eq!(order.total(), Money::from_cents(600));
        assert!(order.order_number().starts_with("ORD-"));
        assert_eq!(quantity_of(&store, a.id), 10);
    }

    #[test]
    fn confirm_prevalidates_the_summed_quantity() {
        let store = InMemoryStore::new();
        let workflow = OrderWorkflow::new(&Config::default());
        let a = seed(&store, "A", 5, 100);
        let order = place(
            &store,
            &workflow,
            vec![NewOrderItem::new(a.id, 3), NewOrderItem::new(a.id, 3)],
        );

        let mut uow = store.begin().unwrap();
        let err = workflow.confirm(&mut *uow, order.id_typed(), Utc::now()).unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Domain(DomainError::InsufficientStock { requested: 6, available: 5, .. })
        ));
        drop(uow);
        assert_eq!(quantity_of(&store, a.id), 5);
    }

    #[test]
    fn confirm_rejects_line_quantities_that_overflow_when_summed() {
        let store = InMemoryStore::new();
        let workflow = OrderWorkflow::new(&Config::default());
        let free = seed(&store, "FREE", 10, 0);
        let order = place(
            &store,
            &workflow,
            vec![NewOrderItem::new(free.id, i64::MAX), NewOrderItem::new(free.id, i64::MAX)],
        );
        assert_eq!(order.total(), Money::ZERO);

        let mut uow = store.begin().unwrap();
        let err = workflow.confirm(&mut *uow, order.id_typed(), Utc::now()).unwrap_err();
        assert_eq!(err.kind().code(), "validation");
        drop(uow);
        assert_eq!(quantity_of(&store, free.id), 10);
    }

    #[test]
    fn number_collision_draws_a_fresh_candidate() {
        let store = InMemoryStore::new();
        let numbers = ScriptedNumbers::new(&["ORD-20260101-AAAAAA", "ORD-20260101-AAAAAA", "ORD-20260101-BBBBBB"]);
        let workflow = OrderWorkflow::new(&Config::default()).with_numbers(numbers.clone());
        let a = seed(&store, "A", 10, 100);

        let first = place(&store, &workflow, vec![NewOrderItem::new(a.id, 1)]);
        let second = place(&store, &workflow, vec![NewOrderItem::new(a.id, 1)]);

        assert_eq!(first.order_number(), "ORD-20260101-AAAAAA");
        assert_eq!(second.order_number(), "ORD-20260101-BBBBBB");
        assert_eq!(numbers.calls(), 3);
    }

    #[test]
    fn exhausted_number_attempts_are_a_logged_conflict() {
        let store = InMemoryStore::new();
        let numbers = ScriptedNumbers::new(&["ORD-20260101-AAAAAA"]);
        let workflow = OrderWorkflow::new(&Config::default().with_order_number_attempts(3))
            .with_numbers(numbers.clone());
        let a = seed(&store, "A", 10, 100);
        place(&store, &workflow, vec![NewOrderItem::new(a.id, 1)]);

        let logs = CapturedLogs::default();
        let mut uow = store.begin().unwrap();
        let err = tracing::subscriber::with_default(logs.subscriber(), || {
            workflow.place(
                &mut *uow,
                &NewOrder::new(UserId::new(), vec![NewOrderItem::new(a.id, 1)]),
                Utc::now(),
            )
        })
        .unwrap_err();

        assert_eq!(err.kind().code(), "conflict");
        assert!(!err.is_retryable());
        assert_eq!(numbers.calls(), 4);

        let text = logs.text();
        assert_eq!(text.matches("order number collision").count(), 3);
        assert!(text.contains("WARN"));
        assert!(text.contains("order number space exhausted"));
    }

    #[test]
    fn cancel_after_confirm_restores_with_reason() {
        let store = InMemoryStore::new();
        let workflow = OrderWorkflow::new(&Config::default());
        let a = seed(&store, "A", 100, 100);
        let order = place(&store, &workflow, vec![NewOrderItem::new(a.id, 20)]);

        let mut uow = store.begin().unwrap();
        workflow.confirm(&mut *uow, order.id_typed(), Utc::now()).unwrap();
        let outcome = workflow
            .cancel(&mut *uow, order.id_typed(), Some("out of budget".into()), Utc::now())
            .unwrap();
        uow.commit().unwrap();

        assert_eq!(outcome.order.status(), OrderStatus::Cancelled);
        assert_eq!(quantity_of(&store, a.id), 100);

        let mut uow = store.begin().unwrap();
        let history = uow.movements(a.id, PageRequest::first(10)).unwrap();
        assert_eq!(history.items[0].movement_type, MovementType::Return);
        assert_eq!(
            history.items[0].note.as_deref(),
            Some(format!("Order {} cancelled - out of budget", order.order_number()).as_str())
        );
        assert_eq!(
            history.items[1].note.as_deref(),
            Some(format!("Order {}", order.order_number()).as_str())
        );
    }

    #[test]
    fn unknown_product_or_order_is_not_found() {
        let store = InMemoryStore::new();
        let workflow = OrderWorkflow::new(&Config::default());
        let mut uow = store.begin().unwrap();

        let err = workflow
            .place(
                &mut *uow,
                &NewOrder::new(UserId::new(), vec![NewOrderItem::new(ProductId::new(), 1)]),
                Utc::now(),
            )
            .unwrap_err();
        assert_eq!(err.kind().code(), "not_found");

        let err = workflow.ship(&mut *uow, OrderId::new(), Utc::now()).unwrap_err();
        assert_eq!(err.kind().code(), "not_found");
    }
}
