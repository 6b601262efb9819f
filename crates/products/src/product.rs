use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockline_core::{AggregateRoot, DomainError, DomainResult, Money, ProductId, UserId};

use crate::sku::normalize_sku;

/// Catalog product snapshot.
///
/// Snapshots are immutable values: updates go through [`Product::patched`],
/// which returns the next snapshot for the store to persist. `quantity` is
/// owned by the inventory ledger and is never touched by a patch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub sku: String,
    pub name: String,
    pub description: Option<String>,
    pub price: Money,
    pub cost: Money,
    pub quantity: i64,
    pub low_stock_threshold: i64,
    pub is_active: bool,
    pub vendor_id: Option<UserId>,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProduct {
    pub sku: String,
    pub name: String,
    pub description: Option<String>,
    pub price: Money,
    pub cost: Option<Money>,
    pub quantity: Option<i64>,
    pub low_stock_threshold: Option<i64>,
    pub is_active: Option<bool>,
    pub vendor_id: Option<UserId>,
}

impl NewProduct {
    pub fn new(sku: impl Into<String>, name: impl Into<String>, price: Money) -> Self {
        Self {
            sku: sku.into(),
            name: name.into(),
            description: None,
            price,
            cost: None,
            quantity: None,
            low_stock_threshold: None,
            is_active: None,
            vendor_id: None,
        }
    }

    pub fn with_quantity(mut self, quantity: i64) -> Self {
        self.quantity = Some(quantity);
        self
    }

    pub fn with_low_stock_threshold(mut self, threshold: i64) -> Self {
        self.low_stock_threshold = Some(threshold);
        self
    }

    pub fn with_vendor(mut self, vendor_id: UserId) -> Self {
        self.vendor_id = Some(vendor_id);
        self
    }
}

/// Partial update: only `Some` fields are applied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<Money>,
    pub cost: Option<Money>,
    pub low_stock_threshold: Option<i64>,
    pub is_active: Option<bool>,
    pub vendor_id: Option<UserId>,
}

impl ProductPatch {
    pub fn is_empty(&self) -> bool {
        *self == ProductPatch::default()
    }
}

impl AggregateRoot for Product {
    type Id = ProductId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

fn ensure_name(name: &str) -> DomainResult<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(DomainError::validation("name cannot be empty"));
    }
    Ok(name.to_string())
}

fn ensure_non_negative_money(field: &str, value: Money) -> DomainResult<()> {
    if value.is_negative() {
        return Err(DomainError::validation(format!("{field} cannot be negative")));
    }
    Ok(())
}

fn ensure_non_negative(field: &str, value: i64) -> DomainResult<()> {
    if value < 0 {
        return Err(DomainError::validation(format!("{field} cannot be negative")));
    }
    Ok(())
}

impl Product {
    /// Build the first snapshot of a product.
    ///
    /// Version starts at 0; the store assigns 1 on insert.
    pub fn create(
        id: ProductId,
        input: NewProduct,
        default_low_stock_threshold: i64,
        at: DateTime<Utc>,
    ) -> DomainResult<Product> {
        let sku = normalize_sku(&input.sku)?;
        let name = ensure_name(&input.name)?;

        let cost = input.cost.unwrap_or(Money::ZERO);
        let quantity = input.quantity.unwrap_or(0);
        let low_stock_threshold = input
            .low_stock_threshold
            .unwrap_or(default_low_stock_threshold);

        ensure_non_negative_money("price", input.price)?;
        ensure_non_negative_money("cost", cost)?;
        ensure_non_negative("quantity", quantity)?;
        ensure_non_negative("low_stock_threshold", low_stock_threshold)?;

        Ok(Product {
            id,
            sku,
            name,
            description: input.description,
            price: input.price,
            cost,
            quantity,
            low_stock_threshold,
            is_active: input.is_active.unwrap_or(true),
            vendor_id: input.vendor_id,
            version: 0,
            created_at: at,
            updated_at: at,
        })
    }

    /// Next snapshot with the patch applied.
    pub fn patched(&self, patch: &ProductPatch, at: DateTime<Utc>) -> DomainResult<Product> {
        let mut next = self.clone();

        if let Some(name) = &patch.name {
            next.name = ensure_name(name)?;
        }
        if let Some(description) = &patch.description {
            next.description = Some(description.clone());
        }
        if let Some(price) = patch.price {
            ensure_non_negative_money("price", price)?;
            next.price = price;
        }
        if let Some(cost) = patch.cost {
            ensure_non_negative_money("cost", cost)?;
            next.cost = cost;
        }
        if let Some(threshold) = patch.low_stock_threshold {
            ensure_non_negative("low_stock_threshold", threshold)?;
            next.low_stock_threshold = threshold;
        }
        if let Some(active) = patch.is_active {
            next.is_active = active;
        }
        if let Some(vendor) = patch.vendor_id {
            next.vendor_id = Some(vendor);
        }

        if next != *self {
            next.updated_at = at;
        }
        Ok(next)
    }

    pub fn is_low_stock(&self) -> bool {
        self.quantity <= self.low_stock_threshold
    }

    pub fn can_be_sold(&self) -> bool {
        self.is_active
    }
}
