//! Product catalog: direct product maintenance and bulk CSV reconciliation.
//!
//! ```text
//! upload → ImportService::submit → ImportQueue → ImportWorker
//!        → ImportService::run → read_source → ImportRow::parse
//!        → Reconciler::apply (one unit of work per row) → results artifact
//! ```

pub mod blob;
pub mod job;
pub mod model;
pub mod reconcile;
pub mod rows;
pub mod worker;

pub use blob::{BlobError, BlobStore, FsBlobStore, InMemoryBlobStore};
pub use job::{DEFAULT_REQUEUE_STATUSES, ImportService, UPLOAD_DIR, results_path_for};
pub use model::{ImportIssue, ImportResults, ImportStatus, ImportStatusView, ProductImport};
pub use reconcile::{Reconciler, RowOutcome};
pub use rows::{ImportRow, RawRow, VariantSpec, VendorRef, read_source};
pub use worker::{ImportQueue, ImportWorker, ImportWorkerHandle, import_queue};

use chrono::Utc;
use tracing::{info, instrument};

use stockline_core::{DomainError, ExpectedVersion, ProductId, UserId};
use stockline_products::{NewProduct, Product, ProductPatch, ProductVariant};

use crate::config::Config;
use crate::error::ServiceError;
use crate::store::{Page, PageRequest, ProductQuery, Store};
use crate::tx::transact;

/// Page size for vendor product listings.
pub const PRODUCTS_PER_PAGE: u32 = 15;

/// Single-product maintenance outside of imports.
pub struct CatalogService<S> {
    store: S,
    config: Config,
}

impl<S: Store> CatalogService<S> {
    pub fn new(store: S, config: Config) -> Self {
        Self { store, config }
    }

    /// Create a product. Its initial quantity is the ledger baseline; no
    /// movement is logged for it.
    #[instrument(skip(self, input), fields(sku = %input.sku), err)]
    pub fn create_product(&self, input: NewProduct) -> Result<Product, ServiceError> {
        let product = Product::create(
            ProductId::new(),
            input,
            self.config.default_low_stock_threshold,
            Utc::now(),
        )?;
        let stored = transact(&self.store, self.config.max_conflict_retries, |uow| {
            Ok(uow.insert_product(&product)?)
        })?;
        info!(product_id = %stored.id, "product created");
        Ok(stored)
    }

    /// Apply a patch. Quantity is not patchable here; use the ledger.
    #[instrument(skip(self, patch), fields(product_id = %product_id), err)]
    pub fn update_product(
        &self,
        product_id: ProductId,
        patch: ProductPatch,
    ) -> Result<Product, ServiceError> {
        transact(&self.store, self.config.max_conflict_retries, |uow| {
            let current = uow
                .product(product_id)?
                .ok_or_else(|| DomainError::not_found(format!("product {product_id}")))?;
            if patch.is_empty() {
                return Ok(current);
            }
            let next = current.patched(&patch, Utc::now())?;
            Ok(uow.save_product(&next, ExpectedVersion::Exact(current.version))?)
        })
    }

    pub fn product(&self, product_id: ProductId) -> Result<Product, ServiceError> {
        transact(&self.store, self.config.max_conflict_retries, |uow| {
            uow.product(product_id)?
                .ok_or_else(|| DomainError::not_found(format!("product {product_id}")).into())
        })
    }

    pub fn variants(&self, product_id: ProductId) -> Result<Vec<ProductVariant>, ServiceError> {
        transact(&self.store, self.config.max_conflict_retries, |uow| {
            Ok(uow.variants_for_product(product_id)?)
        })
    }

    /// Active products at or below their threshold.
    pub fn low_stock_products(&self) -> Result<Vec<Product>, ServiceError> {
        let query = ProductQuery {
            low_stock_only: true,
            active_only: true,
            ..ProductQuery::default()
        };
        let page = transact(&self.store, self.config.max_conflict_retries, |uow| {
            Ok(uow.list_products(&query)?)
        })?;
        Ok(page.items)
    }

    pub fn vendor_products(&self, vendor_id: UserId, page: u32) -> Result<Page<Product>, ServiceError> {
        let query = ProductQuery {
            vendor_id: Some(vendor_id),
            page: Some(PageRequest::new(page, PRODUCTS_PER_PAGE)),
            ..ProductQuery::default()
        };
        transact(&self.store, self.config.max_conflict_retries, |uow| {
            Ok(uow.list_products(&query)?)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use stockline_core::Money;

    use crate::store::InMemoryStore;

    fn service() -> CatalogService<InMemoryStore> {
        CatalogService::new(InMemoryStore::new(), Config::default().with_default_low_stock_threshold(5))
    }

    #[test]
    fn create_applies_the_configured_threshold() {
        let catalog = service();
        let product = catalog
            .create_product(NewProduct::new(" SKU-1 ", "Thing", Money::from_cents(100)).with_quantity(3))
            .unwrap();
        assert_eq!(product.sku, "SKU-1");
        assert_eq!(product.low_stock_threshold, 5);
        assert_eq!(product.version, 1);

        let dup = catalog
            .create_product(NewProduct::new("SKU-1", "Other", Money::from_cents(1)))
            .unwrap_err();
        assert_eq!(dup.kind().code(), "conflict");
    }

    #[test]
    fn update_keeps_quantity_and_bumps_version() {
        let catalog = service();
        let product = catalog
            .create_product(NewProduct::new("U-1", "Thing", Money::from_cents(100)).with_quantity(9))
            .unwrap();

        let updated = catalog
            .update_product(
                product.id,
                ProductPatch {
                    price: Some(Money::from_cents(250)),
                    ..ProductPatch::default()
                },
            )
            .unwrap();
        assert_eq!(updated.price, Money::from_cents(250));
        assert_eq!(updated.quantity, 9);
        assert_eq!(updated.version, 2);

        let err = catalog
            .update_product(ProductId::new(), ProductPatch::default())
            .unwrap_err();
        assert_eq!(err.kind().code(), "not_found");
    }

    #[test]
    fn listings_filter_by_stock_and_vendor() {
        let catalog = service();
        let vendor = UserId::new();
        catalog
            .create_product(NewProduct::new("L-1", "Low", Money::from_cents(1)).with_quantity(2))
            .unwrap();
        let inactive = catalog
            .create_product(NewProduct::new("L-2", "Low, hidden", Money::from_cents(1)).with_quantity(0))
            .unwrap();
        catalog
            .update_product(
                inactive.id,
                ProductPatch {
                    is_active: Some(false),
                    ..ProductPatch::default()
                },
            )
            .unwrap();
        for n in 0..17 {
            catalog
                .create_product(
                    NewProduct::new(format!("V-{n}"), "Vendor item", Money::from_cents(1))
                        .with_quantity(50)
                        .with_vendor(vendor),
                )
                .unwrap();
        }

        let low: Vec<_> = catalog.low_stock_products().unwrap().into_iter().map(|p| p.sku).collect();
        assert_eq!(low, vec!["L-1".to_string()]);

        let first = catalog.vendor_products(vendor, 1).unwrap();
        assert_eq!(first.total, 17);
        assert_eq!(first.items.len(), 15);
        assert!(first.has_more());
        assert_eq!(catalog.vendor_products(vendor, 2).unwrap().items.len(), 2);
    }
}
