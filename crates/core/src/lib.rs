//! `stockline-core` — domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! identifiers, the domain error model, money, and the aggregate traits the
//! inventory and order state machines are written against.

pub mod aggregate;
pub mod entity;
pub mod error;
pub mod id;
pub mod money;
pub mod value_object;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion};
pub use entity::Entity;
pub use error::{DomainError, DomainResult, ErrorKind};
pub use id::{ImportId, MovementId, OrderId, OrderItemId, ProductId, UserId, VariantId};
pub use money::Money;
pub use value_object::ValueObject;
