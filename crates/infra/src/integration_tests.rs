//! Integration tests across the ledger, order workflow and catalog import.
//!
//! Tests: OrderActions → OrderWorkflow → InventoryLedger → Store → signals,
//! and ImportService → Reconciler → Store → results artifact.
//!
//! Verifies:
//! - Stock is conserved across confirm/cancel and never goes negative
//! - Terminal orders reject every further transition
//! - Import rows fail independently and re-runs are idempotent
//! - Concurrent confirms against one product cannot overdraw it

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use chrono::Utc;

    use stockline_core::{DomainError, Money, ProductId, UserId};
    use stockline_events::InMemoryEventBus;
    use stockline_inventory::{MovementReference, MovementType, net_movement};
    use stockline_products::{NewProduct, Product};
    use stockline_sales::{Order, OrderStatus};

    use crate::actions::OrderActions;
    use crate::catalog::{ImportService, ImportStatus, InMemoryBlobStore};
    use crate::config::Config;
    use crate::error::ServiceError;
    use crate::ledger::InventoryService;
    use crate::orders::{NewOrder, NewOrderItem};
    use crate::signals::{Signal, SignalDispatcher, SignalEnvelope};
    use crate::store::{InMemoryStore, PageRequest, ProductQuery, Store};

    type Bus = Arc<InMemoryEventBus<SignalEnvelope>>;

    struct Harness {
        store: Arc<InMemoryStore>,
        signals: Arc<SignalDispatcher<Bus>>,
        actions: OrderActions<Arc<InMemoryStore>, Bus>,
        inventory: InventoryService<Arc<InMemoryStore>, Bus>,
    }

    fn harness(config: Config) -> Harness {
        stockline_observability::init_for_tests();
        let store = Arc::new(InMemoryStore::new());
        let signals = Arc::new(SignalDispatcher::new(Arc::new(InMemoryEventBus::new())));
        Harness {
            actions: OrderActions::new(store.clone(), signals.clone(), config.clone()),
            inventory: InventoryService::new(store.clone(), signals.clone(), config),
            store,
            signals,
        }
    }

    fn seed(store: &InMemoryStore, sku: &str, quantity: i64, threshold: i64) -> ProductId {
        let product = Product::create(
            ProductId::new(),
            NewProduct::new(sku, sku, Money::from_cents(1000))
                .with_quantity(quantity)
                .with_low_stock_threshold(threshold),
            10,
            Utc::now(),
        )
        .unwrap();
        let mut uow = store.begin().unwrap();
        let product = uow.insert_product(&product).unwrap();
        uow.commit().unwrap();
        product.id
    }

    fn quantity_of(store: &InMemoryStore, id: ProductId) -> i64 {
        store.begin().unwrap().product(id).unwrap().unwrap().quantity
    }

    fn order_of(h: &Harness, product_id: ProductId, quantity: i64) -> Order {
        h.actions
            .create(NewOrder::new(
                UserId::new(),
                vec![NewOrderItem::new(product_id, quantity)],
            ))
            .unwrap()
    }

    #[test]
    fn confirm_then_cancel_conserves_stock() {
        let h = harness(Config::default());
        let product = seed(&h.store, "CONS-1", 100, 10);
        let order = order_of(&h, product, 20);

        h.actions.confirm(order.id_typed()).unwrap();
        assert_eq!(quantity_of(&h.store, product), 80);

        let history = h.inventory.history(product, 1).unwrap();
        assert_eq!(history.total, 1);
        assert_eq!(history.items[0].movement_type, MovementType::Out);
        assert_eq!(history.items[0].quantity, 20);
        assert_eq!(
            history.items[0].reference,
            Some(MovementReference::order(order.id_typed()))
        );

        let cancelled = h
            .actions
            .cancel(order.id_typed(), Some("customer request".into()))
            .unwrap();
        assert_eq!(cancelled.status(), OrderStatus::Cancelled);
        assert!(cancelled.cancelled_at().is_some());
        assert_eq!(quantity_of(&h.store, product), 100);

        let history = h.inventory.history(product, 1).unwrap();
        assert_eq!(history.total, 2);
        assert_eq!(history.items[0].movement_type, MovementType::Return);
        assert_eq!(history.items[0].quantity, 20);
        assert_eq!(net_movement(&history.items), 0);
    }

    #[test]
    fn deduct_to_low_stock_then_refuse_overdraw() {
        let h = harness(Config::default());
        let sub = h.signals.subscribe();
        let product = seed(&h.store, "LOW-1", 5, 10);

        let receipt = h.inventory.deduct(product, 3, None, None).unwrap();
        assert_eq!(receipt.quantity_after, 2);
        let got = sub.drain();
        assert_eq!(got.len(), 1);
        assert!(matches!(
            got[0].payload(),
            Signal::LowStockDetected(e) if e.product_id == product && e.quantity == 2
        ));

        let err = h.inventory.deduct(product, 10, None, None).unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Domain(DomainError::InsufficientStock { requested: 10, available: 2, .. })
        ));
        assert_eq!(quantity_of(&h.store, product), 2);
        assert_eq!(h.inventory.history(product, 1).unwrap().total, 1);
        assert!(sub.drain().is_empty());
    }

    #[test]
    fn cancelling_a_pending_order_leaves_stock_alone() {
        let h = harness(Config::default());
        let product = seed(&h.store, "PEND-1", 7, 0);
        let order = order_of(&h, product, 5);

        h.actions.cancel(order.id_typed(), None).unwrap();
        assert_eq!(quantity_of(&h.store, product), 7);
        assert_eq!(h.inventory.history(product, 1).unwrap().total, 0);
    }

    #[test]
    fn terminal_orders_reject_every_transition() {
        let h = harness(Config::default());
        let product = seed(&h.store, "TERM-1", 50, 0);

        let delivered = order_of(&h, product, 1);
        h.actions.confirm(delivered.id_typed()).unwrap();
        h.actions.ship(delivered.id_typed()).unwrap();
        h.actions.deliver(delivered.id_typed()).unwrap();

        let cancelled = order_of(&h, product, 1);
        h.actions.confirm(cancelled.id_typed()).unwrap();
        h.actions.cancel(cancelled.id_typed(), None).unwrap();
        let before = quantity_of(&h.store, product);

        for id in [delivered.id_typed(), cancelled.id_typed()] {
            let attempts = [
                h.actions.confirm(id),
                h.actions.ship(id),
                h.actions.deliver(id),
                h.actions.cancel(id, Some("late".into())),
            ];
            for result in attempts {
                let code = result.unwrap_err().kind().code();
                assert!(
                    code == "invalid_transition" || code == "already_cancelled",
                    "unexpected error kind {code}"
                );
            }
        }
        assert_eq!(
            h.actions.cancel(cancelled.id_typed(), None).unwrap_err().kind().code(),
            "already_cancelled"
        );
        assert_eq!(quantity_of(&h.store, product), before);
    }

    #[test]
    fn partial_confirm_rolls_back_every_item() {
        let h = harness(Config::default());
        let plenty = seed(&h.store, "MULTI-A", 10, 0);
        let scarce = seed(&h.store, "MULTI-B", 1, 0);
        let order = h
            .actions
            .create(NewOrder::new(
                UserId::new(),
                vec![NewOrderItem::new(plenty, 4), NewOrderItem::new(scarce, 2)],
            ))
            .unwrap();

        let err = h.actions.confirm(order.id_typed()).unwrap_err();
        assert_eq!(err.kind().code(), "insufficient_stock");
        assert_eq!(quantity_of(&h.store, plenty), 10);
        assert_eq!(quantity_of(&h.store, scarce), 1);
        assert_eq!(
            h.actions.get(order.id_typed()).unwrap().status(),
            OrderStatus::Pending
        );
    }

    #[test]
    fn concurrent_confirms_never_overdraw() {
        let h = Arc::new(harness(Config::default().with_max_conflict_retries(64)));
        let product = seed(&h.store, "RACE-1", 10, 0);
        let orders: Vec<_> = (0..8).map(|_| order_of(&h, product, 3)).collect();

        let workers: Vec<_> = orders
            .into_iter()
            .map(|order| {
                let h = h.clone();
                thread::spawn(move || h.actions.confirm(order.id_typed()))
            })
            .collect();
        let results: Vec<_> = workers.into_iter().map(|w| w.join().unwrap()).collect();

        let confirmed = results.iter().filter(|r| r.is_ok()).count() as i64;
        for err in results.iter().filter_map(|r| r.as_ref().err()) {
            assert!(
                err.kind().code() == "insufficient_stock" || err.is_retryable(),
                "unexpected failure: {err}"
            );
        }

        let remaining = quantity_of(&h.store, product);
        assert!(confirmed <= 3);
        assert!(remaining >= 0);
        assert_eq!(remaining, 10 - 3 * confirmed);

        let mut uow = h.store.begin().unwrap();
        let history = uow.movements(product, PageRequest::first(50)).unwrap();
        assert_eq!(history.total as i64, confirmed);
        assert_eq!(net_movement(&history.items), remaining - 10);
    }

    #[test]
    fn status_signals_follow_commits_only() {
        let h = harness(Config::default());
        let sub = h.signals.subscribe();
        let product = seed(&h.store, "SIG-1", 3, 1);
        let order = order_of(&h, product, 2);

        h.actions.confirm(order.id_typed()).unwrap();
        let got = sub.drain();
        let types: Vec<_> = got.iter().map(|e| e.event_type().to_string()).collect();
        assert_eq!(types, vec!["sales.order.status_changed", "inventory.stock.low"]);
        assert!(got[0].sequence_number() < got[1].sequence_number());

        assert!(h.actions.deliver(order.id_typed()).is_err());
        assert!(sub.drain().is_empty());
    }

    fn importer(store: Arc<InMemoryStore>) -> ImportService<Arc<InMemoryStore>, Arc<InMemoryBlobStore>> {
        ImportService::new(store, Arc::new(InMemoryBlobStore::new()), Config::default())
    }

    #[test]
    fn import_row_failures_do_not_block_siblings() {
        let h = harness(Config::default());
        let imports = importer(h.store.clone());
        let import = imports
            .upload(
                "batch.csv",
                b"sku,name,price,quantity\nNOPRICE,No price,,5\nGOOD-1,Good,4.25,5\n",
                None,
            )
            .unwrap();

        let done = imports.run(import.id).unwrap();
        assert_eq!(done.status, ImportStatus::Failed);

        let view = imports.status(import.id).unwrap();
        let results = view.results.unwrap();
        assert_eq!(results.processed, 2);
        assert_eq!(results.failed, 1);
        assert_eq!(results.created, 1);
        assert_eq!(results.errors[0].row, Some(2));
        assert!(results.errors[0].message.contains("price"));

        let mut uow = h.store.begin().unwrap();
        assert!(uow.product_by_sku("NOPRICE").unwrap().is_none());
        let good = uow.product_by_sku("GOOD-1").unwrap().unwrap();
        assert_eq!(good.price, Money::from_cents(425));
        assert_eq!(good.quantity, 5);
    }

    #[test]
    fn rerunning_an_import_updates_instead_of_duplicating() {
        let h = harness(Config::default());
        let imports = importer(h.store.clone());
        let csv = b"SKU,Name,Price,Quantity,Variants\nX,Ex,10,4,\"[{\"\"attributes\"\":{\"\"size\"\":\"\"M\"\"}}]\"\n";

        let first = imports.upload("x.csv", csv, None).unwrap();
        imports.run(first.id).unwrap();
        let second = imports.upload("x-again.csv", csv, None).unwrap();
        let done = imports.run(second.id).unwrap();
        assert_eq!(done.status, ImportStatus::Completed);

        let first_results = imports.status(first.id).unwrap().results.unwrap();
        let second_results = imports.status(second.id).unwrap().results.unwrap();
        assert_eq!((first_results.created, first_results.updated), (1, 0));
        assert_eq!((second_results.created, second_results.updated), (0, 1));

        let mut uow = h.store.begin().unwrap();
        let all = uow.list_products(&ProductQuery::default()).unwrap();
        assert_eq!(all.total, 1);
        let product = uow.product_by_sku("X").unwrap().unwrap();
        assert_eq!(product.quantity, 4);
        assert_eq!(uow.variants_for_product(product.id).unwrap().len(), 1);
    }

    #[test]
    fn imported_stock_feeds_orders() {
        let h = harness(Config::default());
        let imports = importer(h.store.clone());
        let import = imports
            .upload("feed.csv", b"sku,name,price,quantity\nFEED-1,Feed,2,6\n", None)
            .unwrap();
        imports.run(import.id).unwrap();

        let product = h.store.begin().unwrap().product_by_sku("FEED-1").unwrap().unwrap();
        let order = order_of(&h, product.id, 6);
        let confirmed = h.actions.confirm(order.id_typed()).unwrap();
        assert_eq!(confirmed.total(), Money::from_cents(1200));
        assert_eq!(quantity_of(&h.store, product.id), 0);

        let restock = imports
            .upload("restock.csv", b"sku,name,price,quantity\nFEED-1,Feed,2,9\n", None)
            .unwrap();
        imports.run(restock.id).unwrap();

        let history = h.inventory.history(product.id, 1).unwrap();
        assert_eq!(history.items[0].movement_type, MovementType::In);
        assert_eq!(history.items[0].quantity, 9);
        assert_eq!(quantity_of(&h.store, product.id), 9);
    }
}
