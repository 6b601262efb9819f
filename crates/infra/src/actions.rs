//! Order action façade.
//!
//! The externally callable surface over [`OrderWorkflow`]. Each action runs
//! in exactly one unit of work, retries transient store failures and, once
//! the unit has committed, hands the transition's signals to the dispatcher.

use std::sync::Arc;

use chrono::Utc;
use tracing::{Span, info, instrument};

use stockline_core::{OrderId, UserId};
use stockline_events::EventBus;
use stockline_sales::{Order, OrderNumberSource};

use crate::config::Config;
use crate::error::ServiceError;
use crate::orders::{NewOrder, OrderOutcome, OrderWorkflow};
use crate::signals::{SignalDispatcher, SignalEnvelope};
use crate::store::{Page, PageRequest, Store, UnitOfWork};
use crate::tx::{transact, transact_when};

pub struct OrderActions<S, B> {
    store: S,
    signals: Arc<SignalDispatcher<B>>,
    workflow: OrderWorkflow,
    config: Config,
}

impl<S, B> OrderActions<S, B>
where
    S: Store,
    B: EventBus<SignalEnvelope>,
{
    pub fn new(store: S, signals: Arc<SignalDispatcher<B>>, config: Config) -> Self {
        Self {
            store,
            signals,
            workflow: OrderWorkflow::new(&config),
            config,
        }
    }

    /// Replace the order-number candidate source.
    pub fn with_numbers(mut self, numbers: impl OrderNumberSource + 'static) -> Self {
        self.workflow = self.workflow.with_numbers(numbers);
        self
    }

    /// Place a pending order.
    ///
    /// A unique-key violation at commit means another writer took the same
    /// order number; the whole unit is retried with a fresh candidate.
    #[instrument(skip(self, input), fields(customer_id = %input.customer_id, order_id = tracing::field::Empty), err)]
    pub fn create(&self, input: NewOrder) -> Result<Order, ServiceError> {
        let order = transact_when(
            &self.store,
            self.config.max_conflict_retries,
            |e: &ServiceError| e.is_retryable() || e.is_unique_violation(),
            |uow| self.workflow.place(uow, &input, Utc::now()),
        )?;
        Span::current().record("order_id", tracing::field::display(order.id_typed()));
        info!(order_number = %order.order_number(), "order created");
        Ok(order)
    }

    /// Pending → processing, deducting every item's stock.
    #[instrument(skip(self), fields(order_id = %order_id), err)]
    pub fn confirm(&self, order_id: OrderId) -> Result<Order, ServiceError> {
        self.run(|workflow, uow| workflow.confirm(uow, order_id, Utc::now()))
    }

    #[instrument(skip(self), fields(order_id = %order_id), err)]
    pub fn ship(&self, order_id: OrderId) -> Result<Order, ServiceError> {
        self.run(|workflow, uow| workflow.ship(uow, order_id, Utc::now()))
    }

    #[instrument(skip(self), fields(order_id = %order_id), err)]
    pub fn deliver(&self, order_id: OrderId) -> Result<Order, ServiceError> {
        self.run(|workflow, uow| workflow.deliver(uow, order_id, Utc::now()))
    }

    /// Cancel; stock is restored only if the order had been confirmed.
    #[instrument(skip(self, reason), fields(order_id = %order_id), err)]
    pub fn cancel(&self, order_id: OrderId, reason: Option<String>) -> Result<Order, ServiceError> {
        self.run(|workflow, uow| workflow.cancel(uow, order_id, reason.clone(), Utc::now()))
    }

    pub fn get(&self, order_id: OrderId) -> Result<Order, ServiceError> {
        transact(&self.store, self.config.max_conflict_retries, |uow| {
            OrderWorkflow::load(uow, order_id)
        })
    }

    /// A customer's orders, newest first, `Config::history_page_size` per page.
    pub fn customer_orders(&self, customer_id: UserId, page: u32) -> Result<Page<Order>, ServiceError> {
        let page = PageRequest::new(page, self.config.history_page_size);
        let records = transact(&self.store, self.config.max_conflict_retries, |uow| {
            Ok(uow.orders_for_customer(customer_id, page)?)
        })?;
        Ok(records.map(Order::restore))
    }

    fn run<F>(&self, mut step: F) -> Result<Order, ServiceError>
    where
        F: FnMut(&OrderWorkflow, &mut dyn UnitOfWork) -> Result<OrderOutcome, ServiceError>,
    {
        let OrderOutcome { order, signals } =
            transact(&self.store, self.config.max_conflict_retries, |uow| {
                step(&self.workflow, uow)
            })?;
        self.signals.dispatch(signals);
        info!(status = %order.status(), "order updated");
        Ok(order)
    }
}
