//! Transactional store boundary.
//!
//! Everything the services read or write goes through a [`UnitOfWork`]:
//! one atomic, all-or-nothing transaction. Dropping a unit of work without
//! committing rolls it back.

pub mod in_memory;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresStore;
pub use r#trait::{Page, PageRequest, ProductQuery, Store, StoreError, UnitOfWork, Vendor};
