//! Per-row catalog reconciliation.
//!
//! [`Reconciler::apply`] upserts one [`ImportRow`] inside the caller's unit of
//! work: product by SKU, then each inline variant by SKU or, lacking one, by
//! attribute set under the product. Applying the same row twice leaves the
//! same end state.

use chrono::{DateTime, Utc};
use tracing::debug;

use stockline_core::{DomainError, ExpectedVersion, ImportId, ProductId, UserId, VariantId};
use stockline_products::{
    NewProduct, Product, ProductPatch, ProductVariant, VariantPatch, variant_sku_candidates,
};

use crate::error::ServiceError;
use crate::ledger::InventoryLedger;
use crate::store::UnitOfWork;

use super::rows::{ImportRow, VariantSpec, VendorRef};

/// What one row did to the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowOutcome {
    pub product: Product,
    pub created: bool,
    pub variants_created: usize,
    pub variants_updated: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct Reconciler {
    default_low_stock_threshold: i64,
}

impl Reconciler {
    pub fn new(default_low_stock_threshold: i64) -> Self {
        Self {
            default_low_stock_threshold,
        }
    }

    pub fn apply(
        &self,
        uow: &mut dyn UnitOfWork,
        import_id: ImportId,
        row: &ImportRow,
        at: DateTime<Utc>,
    ) -> Result<RowOutcome, ServiceError> {
        let vendor_id = resolve_vendor(uow, row.vendor.as_ref())?;

        let (product, created) = match uow.product_by_sku(&row.sku)? {
            None => (self.create_product(uow, row, vendor_id, at)?, true),
            Some(existing) => (update_product(uow, existing, row, vendor_id, import_id, at)?, false),
        };

        let mut outcome = RowOutcome {
            product,
            created,
            variants_created: 0,
            variants_updated: 0,
        };
        for spec in &row.variants {
            if upsert_variant(uow, &outcome.product, spec, at)? {
                outcome.variants_created += 1;
            } else {
                outcome.variants_updated += 1;
            }
        }

        debug!(
            row = row.number,
            sku = %outcome.product.sku,
            created,
            variants = row.variants.len(),
            "row reconciled"
        );
        Ok(outcome)
    }

    fn create_product(
        &self,
        uow: &mut dyn UnitOfWork,
        row: &ImportRow,
        vendor_id: Option<UserId>,
        at: DateTime<Utc>,
    ) -> Result<Product, ServiceError> {
        let input = NewProduct {
            sku: row.sku.clone(),
            name: row.name.clone(),
            description: row.description.clone(),
            price: row.price,
            cost: row.cost,
            quantity: row.quantity,
            low_stock_threshold: row.low_stock_threshold,
            is_active: None,
            vendor_id,
        };
        let product = Product::create(ProductId::new(), input, self.default_low_stock_threshold, at)?;
        Ok(uow.insert_product(&product)?)
    }
}

/// An email that matches nobody leaves the vendor untouched; an explicit id
/// must exist.
fn resolve_vendor(
    uow: &mut dyn UnitOfWork,
    vendor: Option<&VendorRef>,
) -> Result<Option<UserId>, ServiceError> {
    match vendor {
        None => Ok(None),
        Some(VendorRef::Email(email)) => Ok(uow.vendor_by_email(email)?.map(|v| v.id)),
        Some(VendorRef::Id(id)) => match uow.vendor(*id)? {
            Some(v) => Ok(Some(v.id)),
            None => Err(DomainError::not_found(format!("vendor {id}")).into()),
        },
    }
}

fn update_product(
    uow: &mut dyn UnitOfWork,
    existing: Product,
    row: &ImportRow,
    vendor_id: Option<UserId>,
    import_id: ImportId,
    at: DateTime<Utc>,
) -> Result<Product, ServiceError> {
    let patch = ProductPatch {
        name: Some(row.name.clone()),
        description: row.description.clone(),
        price: Some(row.price),
        cost: row.cost,
        low_stock_threshold: row.low_stock_threshold,
        is_active: None,
        vendor_id,
    };
    let next = existing.patched(&patch, at)?;
    if next != existing {
        uow.save_product(&next, ExpectedVersion::Exact(existing.version))?;
    }

    if let Some(target) = row.quantity {
        let delta = target - existing.quantity;
        if delta != 0 {
            let note = format!("catalog import {import_id} row {}", row.number);
            InventoryLedger::adjust(uow, existing.id, delta, Some(note), at)?;
        }
    }

    Ok(uow
        .product(existing.id)?
        .ok_or_else(|| DomainError::not_found(format!("product {}", existing.sku)))?)
}

/// Returns true when a new variant was created.
fn upsert_variant(
    uow: &mut dyn UnitOfWork,
    product: &Product,
    spec: &VariantSpec,
    at: DateTime<Utc>,
) -> Result<bool, ServiceError> {
    let patch = VariantPatch {
        name: spec.name.clone(),
        attributes: spec.attributes.clone(),
        price: spec.price,
        quantity: spec.quantity,
    };

    let existing = match &spec.sku {
        Some(sku) => uow.variant_by_sku(sku)?,
        None => {
            let wanted = spec.attributes.clone().unwrap_or_default();
            uow.variants_for_product(product.id)?
                .into_iter()
                .find(|v| v.attributes == wanted)
        }
    };

    match existing {
        Some(variant) => {
            let next = variant.patched(product, &patch, at)?;
            if next != variant {
                uow.save_variant(&next, ExpectedVersion::Exact(variant.version))?;
            }
            Ok(false)
        }
        None => {
            let sku = match &spec.sku {
                Some(sku) => sku.clone(),
                None => free_variant_sku(uow, &product.sku)?,
            };
            let variant = ProductVariant::create(VariantId::new(), product, &sku, &patch, at)?;
            uow.insert_variant(&variant)?;
            Ok(true)
        }
    }
}

fn free_variant_sku(uow: &mut dyn UnitOfWork, parent_sku: &str) -> Result<String, ServiceError> {
    for candidate in variant_sku_candidates(parent_sku) {
        if uow.variant_by_sku(&candidate)?.is_none() {
            return Ok(candidate);
        }
    }
    Err(DomainError::conflict(format!("no free variant sku under {parent_sku}")).into())
}
