//! Infrastructure layer: transactional store, inventory ledger, order
//! workflow and actions, signal dispatch, catalog import, configuration.

pub mod actions;
pub mod catalog;
pub mod config;
pub mod error;
pub mod ledger;
pub mod orders;
pub mod signals;
pub mod store;
pub mod tx;

pub use actions::OrderActions;
pub use catalog::{CatalogService, ImportService, ImportWorker};
pub use config::Config;
pub use error::{ServiceError, ServiceResult};
pub use ledger::{InventoryLedger, InventoryService, LedgerReceipt};
pub use orders::{NewOrder, NewOrderItem, OrderOutcome, OrderWorkflow};
pub use signals::{Signal, SignalDispatcher, SignalEnvelope};
pub use store::{InMemoryStore, Page, PageRequest, Store, StoreError, UnitOfWork};

#[cfg(test)]
mod integration_tests;
