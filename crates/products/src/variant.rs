use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockline_core::{DomainError, DomainResult, Entity, Money, ProductId, VariantId};

use crate::attributes::AttributeSet;
use crate::product::Product;
use crate::sku::normalize_sku;

/// A sellable variation of a product (size, colour, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductVariant {
    pub id: VariantId,
    pub product_id: ProductId,
    pub sku: String,
    pub name: Option<String>,
    pub attributes: AttributeSet,
    pub price: Money,
    pub quantity: i64,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Partial update for a variant: only `Some` fields are applied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantPatch {
    pub name: Option<String>,
    pub attributes: Option<AttributeSet>,
    pub price: Option<Money>,
    pub quantity: Option<i64>,
}

impl Entity for ProductVariant {
    type Id = VariantId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

fn validate(patch: &VariantPatch) -> DomainResult<()> {
    if patch.price.is_some_and(Money::is_negative) {
        return Err(DomainError::validation("variant price cannot be negative"));
    }
    if patch.quantity.is_some_and(|q| q < 0) {
        return Err(DomainError::validation("variant quantity cannot be negative"));
    }
    Ok(())
}

impl ProductVariant {
    /// New variant under `parent`. Unset price and quantity default to the
    /// parent's current values.
    pub fn create(
        id: VariantId,
        parent: &Product,
        sku: &str,
        patch: &VariantPatch,
        at: DateTime<Utc>,
    ) -> DomainResult<ProductVariant> {
        validate(patch)?;
        Ok(ProductVariant {
            id,
            product_id: parent.id,
            sku: normalize_sku(sku)?,
            name: patch.name.clone(),
            attributes: patch.attributes.clone().unwrap_or_default(),
            price: patch.price.unwrap_or(parent.price),
            quantity: patch.quantity.unwrap_or(parent.quantity),
            version: 0,
            created_at: at,
            updated_at: at,
        })
    }

    /// Next snapshot with the patch applied, attached to `parent`.
    ///
    /// Re-parenting is allowed: a SKU names one variant catalog-wide.
    pub fn patched(
        &self,
        parent: &Product,
        patch: &VariantPatch,
        at: DateTime<Utc>,
    ) -> DomainResult<ProductVariant> {
        validate(patch)?;
        let mut next = self.clone();
        next.product_id = parent.id;
        if let Some(name) = &patch.name {
            next.name = Some(name.clone());
        }
        if let Some(attributes) = &patch.attributes {
            next.attributes = attributes.clone();
        }
        if let Some(price) = patch.price {
            next.price = price;
        }
        if let Some(quantity) = patch.quantity {
            next.quantity = quantity;
        }
        if next != *self {
            next.updated_at = at;
        }
        Ok(next)
    }
}
