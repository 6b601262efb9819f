use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use stockline_core::{ExpectedVersion, ImportId, OrderId, ProductId, UserId, VariantId};
use stockline_inventory::InventoryMovement;
use stockline_products::{Product, ProductVariant};
use stockline_sales::OrderRecord;

use crate::catalog::model::{ImportStatus, ProductImport};

/// Store operation error.
///
/// These are **infrastructure errors** (storage, concurrency) as opposed to
/// domain errors (validation, invariants).
///
/// - **Conflict**: a concurrent writer got there first, or a lock wait timed
///   out. The whole unit of work may be retried.
/// - **Unique**: a unique key (SKU, order number) is already taken.
/// - **Backend**: the store itself failed (connection, poisoned lock, missing row).
/// - **Serialization**: a stored value could not be decoded.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("concurrent modification: {0}")]
    Conflict(String),

    #[error("unique constraint violated: {0}")]
    Unique(String),

    #[error("storage backend failure: {0}")]
    Backend(String),

    #[error("stored data could not be decoded: {0}")]
    Serialization(String),
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}

/// 1-based page selector.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: u32,
    pub per_page: u32,
}

impl PageRequest {
    pub fn new(page: u32, per_page: u32) -> Self {
        Self {
            page: page.max(1),
            per_page: per_page.max(1),
        }
    }

    pub fn first(per_page: u32) -> Self {
        Self::new(1, per_page)
    }

    pub fn offset(&self) -> usize {
        (self.page.saturating_sub(1) as usize).saturating_mul(self.per_page as usize)
    }

    pub fn limit(&self) -> usize {
        self.per_page as usize
    }

    /// Slice one page out of an already-ordered collection.
    pub fn slice<T>(&self, all: Vec<T>) -> Page<T> {
        let total = all.len() as u64;
        let items = all.into_iter().skip(self.offset()).take(self.limit()).collect();
        Page {
            items,
            page: self.page,
            per_page: self.per_page,
            total,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub per_page: u32,
    pub total: u64,
}

impl<T> Page<T> {
    pub fn has_more(&self) -> bool {
        (self.page as u64).saturating_mul(self.per_page as u64) < self.total
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            page: self.page,
            per_page: self.per_page,
            total: self.total,
        }
    }
}

/// Product listing filter. Results are newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProductQuery {
    pub vendor_id: Option<UserId>,
    /// Only products at or below their low-stock threshold.
    pub low_stock_only: bool,
    pub active_only: bool,
    /// `None` returns every match on a single page.
    pub page: Option<PageRequest>,
}

impl ProductQuery {
    pub(crate) fn matches(&self, product: &Product) -> bool {
        self.vendor_id.is_none_or(|v| product.vendor_id == Some(v))
            && (!self.low_stock_only || product.is_low_stock())
            && (!self.active_only || product.is_active)
    }
}

/// A user that can own products, resolved by email during imports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vendor {
    pub id: UserId,
    pub email: String,
    pub name: String,
}

/// One atomic transaction against the store.
///
/// Reads see the transaction's own uncommitted writes. Nothing is visible to
/// other units of work until [`UnitOfWork::commit`] succeeds; dropping the
/// value instead discards every write.
pub trait UnitOfWork {
    // products
    fn product(&mut self, id: ProductId) -> Result<Option<Product>, StoreError>;
    fn product_by_sku(&mut self, sku: &str) -> Result<Option<Product>, StoreError>;
    /// Insert a new product. The stored snapshot (version 1) is returned.
    fn insert_product(&mut self, product: &Product) -> Result<Product, StoreError>;
    /// Persist the non-quantity fields of `product`.
    ///
    /// The stored quantity is kept: stock only changes through
    /// `decrement_stock`/`increment_stock`.
    fn save_product(
        &mut self,
        product: &Product,
        expected: ExpectedVersion,
    ) -> Result<Product, StoreError>;
    fn list_products(&mut self, query: &ProductQuery) -> Result<Page<Product>, StoreError>;

    // stock primitives
    /// Atomic decrement with a floor check. `None` when fewer than `quantity`
    /// units are on hand; the row is left unchanged in that case.
    fn decrement_stock(&mut self, id: ProductId, quantity: i64) -> Result<Option<i64>, StoreError>;
    fn increment_stock(&mut self, id: ProductId, quantity: i64) -> Result<i64, StoreError>;

    // ledger
    fn append_movement(&mut self, movement: &InventoryMovement) -> Result<(), StoreError>;
    /// Movements for a product, newest first.
    fn movements(
        &mut self,
        product_id: ProductId,
        page: PageRequest,
    ) -> Result<Page<InventoryMovement>, StoreError>;

    // variants
    fn variant(&mut self, id: VariantId) -> Result<Option<ProductVariant>, StoreError>;
    fn variant_by_sku(&mut self, sku: &str) -> Result<Option<ProductVariant>, StoreError>;
    /// Variants of a product in creation order.
    fn variants_for_product(
        &mut self,
        product_id: ProductId,
    ) -> Result<Vec<ProductVariant>, StoreError>;
    fn insert_variant(&mut self, variant: &ProductVariant) -> Result<ProductVariant, StoreError>;
    fn save_variant(
        &mut self,
        variant: &ProductVariant,
        expected: ExpectedVersion,
    ) -> Result<ProductVariant, StoreError>;

    // orders
    fn order(&mut self, id: OrderId) -> Result<Option<OrderRecord>, StoreError>;
    fn order_number_exists(&mut self, order_number: &str) -> Result<bool, StoreError>;
    fn insert_order(&mut self, order: &OrderRecord) -> Result<(), StoreError>;
    /// Persist status, timestamps and version. `expected` is the version the
    /// order was loaded at; `order.version` is the new one.
    fn save_order(&mut self, order: &OrderRecord, expected: ExpectedVersion)
    -> Result<(), StoreError>;
    /// A customer's orders, newest first.
    fn orders_for_customer(
        &mut self,
        customer_id: UserId,
        page: PageRequest,
    ) -> Result<Page<OrderRecord>, StoreError>;

    // imports
    fn import(&mut self, id: ImportId) -> Result<Option<ProductImport>, StoreError>;
    fn insert_import(&mut self, import: &ProductImport) -> Result<ProductImport, StoreError>;
    fn save_import(
        &mut self,
        import: &ProductImport,
        expected: ExpectedVersion,
    ) -> Result<ProductImport, StoreError>;
    /// Imports in any of `statuses`, oldest first.
    fn imports_by_status(
        &mut self,
        statuses: &[ImportStatus],
    ) -> Result<Vec<ProductImport>, StoreError>;

    // vendors
    /// Case-insensitive lookup.
    fn vendor_by_email(&mut self, email: &str) -> Result<Option<Vendor>, StoreError>;
    fn vendor(&mut self, id: UserId) -> Result<Option<Vendor>, StoreError>;

    fn commit(self: Box<Self>) -> Result<(), StoreError>;
}

/// Source of units of work.
///
/// Implementations must be `Send + Sync`; order actions run on many threads
/// and the import worker runs on its own.
pub trait Store: Send + Sync {
    fn begin(&self) -> Result<Box<dyn UnitOfWork + '_>, StoreError>;
}

impl<S> Store for Arc<S>
where
    S: Store + ?Sized,
{
    fn begin(&self) -> Result<Box<dyn UnitOfWork + '_>, StoreError> {
        (**self).begin()
    }
}
