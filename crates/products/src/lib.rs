//! Products domain module.
//!
//! Catalog records (products and their variants) and the merge rules used when
//! creating or updating them. Pure domain logic: no IO, no storage. Stock
//! quantity on a product is carried here but only ever changed through the
//! inventory ledger.

pub mod attributes;
pub mod product;
pub mod sku;
pub mod variant;

pub use attributes::AttributeSet;
pub use product::{NewProduct, Product, ProductPatch};
pub use sku::{normalize_sku, variant_sku_candidates};
pub use variant::{ProductVariant, VariantPatch};
