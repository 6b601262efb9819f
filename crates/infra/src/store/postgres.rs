//! Postgres-backed transactional store.
//!
//! Each unit of work is one SQL transaction. Stock deductions use a single
//! floor-checked `UPDATE ... RETURNING`, which takes the product row lock, so
//! concurrent deductions against one product are linearizable. Lock waits are
//! bounded with `SET LOCAL lock_timeout`.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError | Scenario |
//! |------------|----------------------|------------|----------|
//! | Database (lock not available) | `55P03` | `Conflict` | `lock_timeout` elapsed |
//! | Database (serialization failure) | `40001` | `Conflict` | Concurrent transaction won |
//! | Database (deadlock detected) | `40P01` | `Conflict` | Lock cycle broken by Postgres |
//! | Database (unique violation) | `23505` | `Unique` | SKU / order number taken |
//! | Database (other) | Any other | `Backend` | Constraint or other database errors |
//! | ColumnDecode / Decode | N/A | `Serialization` | Stored value not decodable |
//! | Other | N/A | `Backend` | Network errors, pool closed, etc. |
//!
//! The `UnitOfWork` trait is synchronous; the store owns a tokio runtime and
//! drives every query with `block_on`. Do not call it from inside another
//! tokio runtime.

use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tokio::runtime::Runtime;
use tracing::{Span, instrument};
use uuid::Uuid;

use stockline_core::{
    ExpectedVersion, ImportId, Money, MovementId, OrderId, OrderItemId, ProductId, UserId,
    VariantId,
};
use stockline_inventory::{InventoryMovement, MovementReference};
use stockline_products::{AttributeSet, Product, ProductVariant};
use stockline_sales::{OrderItem, OrderRecord};

use super::r#trait::{Page, PageRequest, ProductQuery, Store, StoreError, UnitOfWork, Vendor};
use crate::catalog::model::{ImportIssue, ImportStatus, ProductImport};
use crate::config::Config;

const SCHEMA: &str = include_str!("../../migrations/0001_stockline.sql");

const PRODUCT_COLUMNS: &str = "id, sku, name, description, price_cents, cost_cents, quantity, \
     low_stock_threshold, is_active, vendor_id, version, created_at, updated_at";

const VARIANT_COLUMNS: &str =
    "id, product_id, sku, name, attributes, price_cents, quantity, version, created_at, updated_at";

const ORDER_COLUMNS: &str = "id, order_number, customer_id, status, tax_cents, shipping_cents, \
     total_cents, notes, shipped_at, delivered_at, cancelled_at, version, created_at, updated_at";

const IMPORT_COLUMNS: &str =
    "id, path, uploaded_by, status, results_path, errors, version, created_at, updated_at";

/// Postgres-backed store.
///
/// Cheap to share behind an `Arc`; the pool is thread-safe and every unit of
/// work checks out its own connection.
pub struct PostgresStore {
    runtime: Arc<Runtime>,
    pool: PgPool,
    lock_timeout: Duration,
}

impl PostgresStore {
    /// Build a runtime, connect to `config.database_url` and return the store.
    pub fn connect(config: &Config) -> Result<Self, StoreError> {
        let url = config
            .database_url
            .as_deref()
            .ok_or_else(|| StoreError::Backend("DATABASE_URL is not set".to_string()))?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("stockline-pg")
            .build()
            .map_err(|e| StoreError::Backend(format!("could not start runtime: {e}")))?;

        let pool = runtime
            .block_on(PgPoolOptions::new().max_connections(10).connect(url))
            .map_err(|e| map_sqlx_error("connect", e))?;

        Ok(Self::new(Arc::new(runtime), pool, config.lock_timeout))
    }

    pub fn new(runtime: Arc<Runtime>, pool: PgPool, lock_timeout: Duration) -> Self {
        Self {
            runtime,
            pool,
            lock_timeout,
        }
    }

    /// Create the schema if it does not exist yet.
    #[instrument(skip(self), err)]
    pub fn migrate(&self) -> Result<(), StoreError> {
        self.runtime
            .block_on(sqlx::raw_sql(SCHEMA).execute(&self.pool))
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }

    /// Register a vendor account.
    pub fn add_vendor(&self, vendor: &Vendor) -> Result<(), StoreError> {
        self.runtime
            .block_on(
                sqlx::query(
                    "INSERT INTO vendors (id, email, name) VALUES ($1, $2, $3) \
                     ON CONFLICT (id) DO UPDATE SET email = EXCLUDED.email, name = EXCLUDED.name",
                )
                .bind(*vendor.id.as_uuid())
                .bind(&vendor.email)
                .bind(&vendor.name)
                .execute(&self.pool),
            )
            .map_err(|e| map_sqlx_error("add_vendor", e))?;
        Ok(())
    }
}

impl Store for PostgresStore {
    #[instrument(skip(self), fields(operation = "begin"), err)]
    fn begin(&self) -> Result<Box<dyn UnitOfWork + '_>, StoreError> {
        let timeout_ms = self.lock_timeout.as_millis();
        let tx = self.runtime.block_on(async {
            let mut tx = self.pool.begin().await?;
            sqlx::query(&format!("SET LOCAL lock_timeout = '{timeout_ms}ms'"))
                .execute(&mut *tx)
                .await?;
            Ok::<_, sqlx::Error>(tx)
        });
        let tx = tx.map_err(|e| map_sqlx_error("begin", e))?;
        Ok(Box::new(PgUnitOfWork { store: self, tx }))
    }
}

struct PgUnitOfWork<'a> {
    store: &'a PostgresStore,
    tx: Transaction<'static, Postgres>,
}

fn get<'r, T>(row: &'r PgRow, column: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(column)
        .map_err(|e| StoreError::Serialization(format!("{column}: {e}")))
}

fn to_u64(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn expected_param(expected: ExpectedVersion) -> Option<i64> {
    match expected {
        ExpectedVersion::Any => None,
        ExpectedVersion::Exact(v) => Some(to_i64(v)),
    }
}

fn product_from_row(row: &PgRow) -> Result<Product, StoreError> {
    Ok(Product {
        id: ProductId::from_uuid(get(row, "id")?),
        sku: get(row, "sku")?,
        name: get(row, "name")?,
        description: get(row, "description")?,
        price: Money::from_cents(get(row, "price_cents")?),
        cost: Money::from_cents(get(row, "cost_cents")?),
        quantity: get(row, "quantity")?,
        low_stock_threshold: get(row, "low_stock_threshold")?,
        is_active: get(row, "is_active")?,
        vendor_id: get::<Option<Uuid>>(row, "vendor_id")?.map(UserId::from_uuid),
        version: to_u64(get(row, "version")?),
        created_at: get(row, "created_at")?,
        updated_at: get(row, "updated_at")?,
    })
}

fn variant_from_row(row: &PgRow) -> Result<ProductVariant, StoreError> {
    let Json(attributes): Json<AttributeSet> = get(row, "attributes")?;
    Ok(ProductVariant {
        id: VariantId::from_uuid(get(row, "id")?),
        product_id: ProductId::from_uuid(get(row, "product_id")?),
        sku: get(row, "sku")?,
        name: get(row, "name")?,
        attributes,
        price: Money::from_cents(get(row, "price_cents")?),
        quantity: get(row, "quantity")?,
        version: to_u64(get(row, "version")?),
        created_at: get(row, "created_at")?,
        updated_at: get(row, "updated_at")?,
    })
}

fn movement_from_row(row: &PgRow) -> Result<InventoryMovement, StoreError> {
    let movement_type: String = get(row, "movement_type")?;
    let reference = match (
        get::<Option<String>>(row, "reference_type")?,
        get::<Option<String>>(row, "reference_id")?,
    ) {
        (Some(ref_type), Some(ref_id)) => Some(MovementReference::new(ref_type, ref_id)),
        _ => None,
    };
    Ok(InventoryMovement {
        id: MovementId::from_uuid(get(row, "id")?),
        product_id: ProductId::from_uuid(get(row, "product_id")?),
        movement_type: movement_type
            .parse()
            .map_err(|e| StoreError::Serialization(format!("movement_type: {e}")))?,
        quantity: get(row, "quantity")?,
        reference,
        note: get(row, "note")?,
        created_at: get(row, "created_at")?,
    })
}

fn item_from_row(row: &PgRow) -> Result<OrderItem, StoreError> {
    Ok(OrderItem {
        id: OrderItemId::from_uuid(get(row, "id")?),
        product_id: ProductId::from_uuid(get(row, "product_id")?),
        variant_id: get::<Option<Uuid>>(row, "variant_id")?.map(VariantId::from_uuid),
        quantity: get(row, "quantity")?,
        unit_price: Money::from_cents(get(row, "unit_price_cents")?),
        subtotal: Money::from_cents(get(row, "subtotal_cents")?),
    })
}

fn order_from_row(row: &PgRow, items: Vec<OrderItem>) -> Result<OrderRecord, StoreError> {
    let status: String = get(row, "status")?;
    Ok(OrderRecord {
        id: OrderId::from_uuid(get(row, "id")?),
        order_number: get(row, "order_number")?,
        customer_id: UserId::from_uuid(get(row, "customer_id")?),
        status: status
            .parse()
            .map_err(|e| StoreError::Serialization(format!("status: {e}")))?,
        items,
        tax: Money::from_cents(get(row, "tax_cents")?),
        shipping: Money::from_cents(get(row, "shipping_cents")?),
        total: Money::from_cents(get(row, "total_cents")?),
        notes: get(row, "notes")?,
        shipped_at: get(row, "shipped_at")?,
        delivered_at: get(row, "delivered_at")?,
        cancelled_at: get(row, "cancelled_at")?,
        created_at: get(row, "created_at")?,
        updated_at: get(row, "updated_at")?,
        version: to_u64(get(row, "version")?),
    })
}

fn import_from_row(row: &PgRow) -> Result<ProductImport, StoreError> {
    let status: String = get(row, "status")?;
    let Json(errors): Json<Vec<ImportIssue>> = get(row, "errors")?;
    Ok(ProductImport {
        id: ImportId::from_uuid(get(row, "id")?),
        path: get(row, "path")?,
        uploaded_by: get::<Option<Uuid>>(row, "uploaded_by")?.map(UserId::from_uuid),
        status: status
            .parse()
            .map_err(|e| StoreError::Serialization(format!("status: {e}")))?,
        results_path: get(row, "results_path")?,
        errors,
        version: to_u64(get(row, "version")?),
        created_at: get(row, "created_at")?,
        updated_at: get(row, "updated_at")?,
    })
}

fn vendor_from_row(row: &PgRow) -> Result<Vendor, StoreError> {
    Ok(Vendor {
        id: UserId::from_uuid(get(row, "id")?),
        email: get(row, "email")?,
        name: get(row, "name")?,
    })
}

fn page_params(page: PageRequest) -> (i64, i64) {
    (
        i64::from(page.per_page),
        i64::try_from(page.offset()).unwrap_or(i64::MAX),
    )
}

impl PgUnitOfWork<'_> {
    fn fetch_optional(
        &mut self,
        operation: &str,
        query: sqlx::query::Query<'_, Postgres, sqlx::postgres::PgArguments>,
    ) -> Result<Option<PgRow>, StoreError> {
        let tx = &mut self.tx;
        self.store
            .runtime
            .block_on(query.fetch_optional(&mut **tx))
            .map_err(|e| map_sqlx_error(operation, e))
    }

    fn fetch_all(
        &mut self,
        operation: &str,
        query: sqlx::query::Query<'_, Postgres, sqlx::postgres::PgArguments>,
    ) -> Result<Vec<PgRow>, StoreError> {
        let tx = &mut self.tx;
        self.store
            .runtime
            .block_on(query.fetch_all(&mut **tx))
            .map_err(|e| map_sqlx_error(operation, e))
    }

    fn execute(
        &mut self,
        operation: &str,
        query: sqlx::query::Query<'_, Postgres, sqlx::postgres::PgArguments>,
    ) -> Result<u64, StoreError> {
        let tx = &mut self.tx;
        self.store
            .runtime
            .block_on(query.execute(&mut **tx))
            .map(|r| r.rows_affected())
            .map_err(|e| map_sqlx_error(operation, e))
    }

    fn count(
        &mut self,
        operation: &str,
        query: sqlx::query::Query<'_, Postgres, sqlx::postgres::PgArguments>,
    ) -> Result<u64, StoreError> {
        let row = self
            .fetch_optional(operation, query)?
            .ok_or_else(|| StoreError::Backend(format!("{operation}: count returned no row")))?;
        Ok(to_u64(get(&row, "total")?))
    }

    fn items_for(&mut self, order_id: OrderId) -> Result<Vec<OrderItem>, StoreError> {
        let rows = self.fetch_all(
            "order_items",
            sqlx::query(
                "SELECT id, product_id, variant_id, quantity, unit_price_cents, subtotal_cents \
                 FROM order_items WHERE order_id = $1 ORDER BY line_no",
            )
            .bind(*order_id.as_uuid()),
        )?;
        rows.iter().map(item_from_row).collect()
    }
}

impl UnitOfWork for PgUnitOfWork<'_> {
    fn product(&mut self, id: ProductId) -> Result<Option<Product>, StoreError> {
        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1");
        let row = self.fetch_optional("product", sqlx::query(&sql).bind(*id.as_uuid()))?;
        row.as_ref().map(product_from_row).transpose()
    }

    fn product_by_sku(&mut self, sku: &str) -> Result<Option<Product>, StoreError> {
        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE sku = $1");
        let row = self.fetch_optional("product_by_sku", sqlx::query(&sql).bind(sku))?;
        row.as_ref().map(product_from_row).transpose()
    }

    #[instrument(skip(self, product), fields(product_id = %product.id, sku = %product.sku), err)]
    fn insert_product(&mut self, product: &Product) -> Result<Product, StoreError> {
        let sql = format!(
            "INSERT INTO products ({PRODUCT_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, 1, $11, $12) \
             RETURNING {PRODUCT_COLUMNS}"
        );
        let row = self.fetch_optional(
            "insert_product",
            sqlx::query(&sql)
                .bind(*product.id.as_uuid())
                .bind(&product.sku)
                .bind(&product.name)
                .bind(&product.description)
                .bind(product.price.cents())
                .bind(product.cost.cents())
                .bind(product.quantity)
                .bind(product.low_stock_threshold)
                .bind(product.is_active)
                .bind(product.vendor_id.map(Uuid::from))
                .bind(product.created_at)
                .bind(product.updated_at),
        )?;
        row.as_ref()
            .map(product_from_row)
            .transpose()?
            .ok_or_else(|| StoreError::Backend("insert_product returned no row".to_string()))
    }

    #[instrument(skip(self, product), fields(product_id = %product.id), err)]
    fn save_product(
        &mut self,
        product: &Product,
        expected: ExpectedVersion,
    ) -> Result<Product, StoreError> {
        // sku and quantity are never written here.
        let sql = format!(
            "UPDATE products SET name = $2, description = $3, price_cents = $4, cost_cents = $5, \
             low_stock_threshold = $6, is_active = $7, vendor_id = $8, updated_at = $9, \
             version = version + 1 \
             WHERE id = $1 AND ($10::BIGINT IS NULL OR version = $10) \
             RETURNING {PRODUCT_COLUMNS}"
        );
        let row = self.fetch_optional(
            "save_product",
            sqlx::query(&sql)
                .bind(*product.id.as_uuid())
                .bind(&product.name)
                .bind(&product.description)
                .bind(product.price.cents())
                .bind(product.cost.cents())
                .bind(product.low_stock_threshold)
                .bind(product.is_active)
                .bind(product.vendor_id.map(Uuid::from))
                .bind(product.updated_at)
                .bind(expected_param(expected)),
        )?;
        row.as_ref().map(product_from_row).transpose()?.ok_or_else(|| {
            StoreError::Conflict(format!(
                "product {}: expected {expected:?}, row changed or missing",
                product.id
            ))
        })
    }

    fn list_products(&mut self, query: &ProductQuery) -> Result<Page<Product>, StoreError> {
        let filter = "($1::UUID IS NULL OR vendor_id = $1) \
             AND (NOT $2 OR quantity <= low_stock_threshold) \
             AND (NOT $3 OR is_active)";
        let vendor = query.vendor_id.map(Uuid::from);

        let total = self.count(
            "list_products",
            sqlx::query(
                "SELECT COUNT(*) AS total FROM products WHERE \
                 ($1::UUID IS NULL OR vendor_id = $1) \
                 AND (NOT $2 OR quantity <= low_stock_threshold) \
                 AND (NOT $3 OR is_active)",
            )
            .bind(vendor)
            .bind(query.low_stock_only)
            .bind(query.active_only),
        )?;

        let page = query
            .page
            .unwrap_or_else(|| PageRequest::first(u32::try_from(total).unwrap_or(u32::MAX)));
        let (limit, offset) = page_params(page);
        let sql = format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE {filter} \
             ORDER BY created_at DESC, id DESC LIMIT $4 OFFSET $5"
        );
        let rows = self.fetch_all(
            "list_products",
            sqlx::query(&sql)
                .bind(vendor)
                .bind(query.low_stock_only)
                .bind(query.active_only)
                .bind(limit)
                .bind(offset),
        )?;
        Ok(Page {
            items: rows.iter().map(product_from_row).collect::<Result<_, _>>()?,
            page: page.page,
            per_page: page.per_page,
            total,
        })
    }

    #[instrument(skip(self), fields(product_id = %id, quantity_after = tracing::field::Empty), err)]
    fn decrement_stock(&mut self, id: ProductId, quantity: i64) -> Result<Option<i64>, StoreError> {
        let row = self.fetch_optional(
            "decrement_stock",
            sqlx::query(
                "UPDATE products SET quantity = quantity - $1 \
                 WHERE id = $2 AND quantity >= $1 RETURNING quantity",
            )
            .bind(quantity)
            .bind(*id.as_uuid()),
        )?;
        let after = row.as_ref().map(|r| get::<i64>(r, "quantity")).transpose()?;
        Span::current().record("quantity_after", after);
        Ok(after)
    }

    #[instrument(skip(self), fields(product_id = %id), err)]
    fn increment_stock(&mut self, id: ProductId, quantity: i64) -> Result<i64, StoreError> {
        let row = self.fetch_optional(
            "increment_stock",
            sqlx::query("UPDATE products SET quantity = quantity + $1 WHERE id = $2 RETURNING quantity")
                .bind(quantity)
                .bind(*id.as_uuid()),
        )?;
        match row {
            Some(r) => get(&r, "quantity"),
            None => Err(StoreError::Backend(format!("product {id} does not exist"))),
        }
    }

    fn append_movement(&mut self, movement: &InventoryMovement) -> Result<(), StoreError> {
        let (ref_type, ref_id) = match &movement.reference {
            Some(r) => (Some(r.ref_type.as_str()), Some(r.ref_id.as_str())),
            None => (None, None),
        };
        self.execute(
            "append_movement",
            sqlx::query(
                "INSERT INTO inventory_movements \
                 (id, product_id, movement_type, quantity, reference_type, reference_id, note, created_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            )
            .bind(*movement.id.as_uuid())
            .bind(*movement.product_id.as_uuid())
            .bind(movement.movement_type.as_str())
            .bind(movement.quantity)
            .bind(ref_type)
            .bind(ref_id)
            .bind(&movement.note)
            .bind(movement.created_at),
        )?;
        Ok(())
    }

    fn movements(
        &mut self,
        product_id: ProductId,
        page: PageRequest,
    ) -> Result<Page<InventoryMovement>, StoreError> {
        let total = self.count(
            "movements",
            sqlx::query("SELECT COUNT(*) AS total FROM inventory_movements WHERE product_id = $1")
                .bind(*product_id.as_uuid()),
        )?;
        let (limit, offset) = page_params(page);
        let rows = self.fetch_all(
            "movements",
            sqlx::query(
                "SELECT id, product_id, movement_type, quantity, reference_type, reference_id, \
                 note, created_at FROM inventory_movements WHERE product_id = $1 \
                 ORDER BY seq DESC LIMIT $2 OFFSET $3",
            )
            .bind(*product_id.as_uuid())
            .bind(limit)
            .bind(offset),
        )?;
        Ok(Page {
            items: rows.iter().map(movement_from_row).collect::<Result<_, _>>()?,
            page: page.page,
            per_page: page.per_page,
            total,
        })
    }

    fn variant(&mut self, id: VariantId) -> Result<Option<ProductVariant>, StoreError> {
        let sql = format!("SELECT {VARIANT_COLUMNS} FROM product_variants WHERE id = $1");
        let row = self.fetch_optional("variant", sqlx::query(&sql).bind(*id.as_uuid()))?;
        row.as_ref().map(variant_from_row).transpose()
    }

    fn variant_by_sku(&mut self, sku: &str) -> Result<Option<ProductVariant>, StoreError> {
        let sql = format!("SELECT {VARIANT_COLUMNS} FROM product_variants WHERE sku = $1");
        let row = self.fetch_optional("variant_by_sku", sqlx::query(&sql).bind(sku))?;
        row.as_ref().map(variant_from_row).transpose()
    }

    fn variants_for_product(
        &mut self,
        product_id: ProductId,
    ) -> Result<Vec<ProductVariant>, StoreError> {
        // Lock the parent so concurrent attribute-matched upserts serialize.
        self.execute(
            "variants_for_product",
            sqlx::query("SELECT 1 FROM products WHERE id = $1 FOR UPDATE")
                .bind(*product_id.as_uuid()),
        )?;
        let sql = format!(
            "SELECT {VARIANT_COLUMNS} FROM product_variants WHERE product_id = $1 \
             ORDER BY created_at, id"
        );
        let rows = self.fetch_all("variants_for_product", sqlx::query(&sql).bind(*product_id.as_uuid()))?;
        rows.iter().map(variant_from_row).collect()
    }

    fn insert_variant(&mut self, variant: &ProductVariant) -> Result<ProductVariant, StoreError> {
        let sql = format!(
            "INSERT INTO product_variants ({VARIANT_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, 1, $8, $9) RETURNING {VARIANT_COLUMNS}"
        );
        let row = self.fetch_optional(
            "insert_variant",
            sqlx::query(&sql)
                .bind(*variant.id.as_uuid())
                .bind(*variant.product_id.as_uuid())
                .bind(&variant.sku)
                .bind(&variant.name)
                .bind(Json(&variant.attributes))
                .bind(variant.price.cents())
                .bind(variant.quantity)
                .bind(variant.created_at)
                .bind(variant.updated_at),
        )?;
        row.as_ref()
            .map(variant_from_row)
            .transpose()?
            .ok_or_else(|| StoreError::Backend("insert_variant returned no row".to_string()))
    }

    fn save_variant(
        &mut self,
        variant: &ProductVariant,
        expected: ExpectedVersion,
    ) -> Result<ProductVariant, StoreError> {
        let sql = format!(
            "UPDATE product_variants SET product_id = $2, name = $3, attributes = $4, \
             price_cents = $5, quantity = $6, updated_at = $7, version = version + 1 \
             WHERE id = $1 AND ($8::BIGINT IS NULL OR version = $8) RETURNING {VARIANT_COLUMNS}"
        );
        let row = self.fetch_optional(
            "save_variant",
            sqlx::query(&sql)
                .bind(*variant.id.as_uuid())
                .bind(*variant.product_id.as_uuid())
                .bind(&variant.name)
                .bind(Json(&variant.attributes))
                .bind(variant.price.cents())
                .bind(variant.quantity)
                .bind(variant.updated_at)
                .bind(expected_param(expected)),
        )?;
        row.as_ref().map(variant_from_row).transpose()?.ok_or_else(|| {
            StoreError::Conflict(format!(
                "variant {}: expected {expected:?}, row changed or missing",
                variant.id
            ))
        })
    }

    fn order(&mut self, id: OrderId) -> Result<Option<OrderRecord>, StoreError> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1 FOR UPDATE");
        let Some(row) = self.fetch_optional("order", sqlx::query(&sql).bind(*id.as_uuid()))? else {
            return Ok(None);
        };
        let items = self.items_for(id)?;
        order_from_row(&row, items).map(Some)
    }

    fn order_number_exists(&mut self, order_number: &str) -> Result<bool, StoreError> {
        let row = self.fetch_optional(
            "order_number_exists",
            sqlx::query("SELECT 1 AS found FROM orders WHERE order_number = $1").bind(order_number),
        )?;
        Ok(row.is_some())
    }

    #[instrument(skip(self, order), fields(order_id = %order.id, order_number = %order.order_number), err)]
    fn insert_order(&mut self, order: &OrderRecord) -> Result<(), StoreError> {
        let sql = format!(
            "INSERT INTO orders ({ORDER_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)"
        );
        self.execute(
            "insert_order",
            sqlx::query(&sql)
                .bind(*order.id.as_uuid())
                .bind(&order.order_number)
                .bind(*order.customer_id.as_uuid())
                .bind(order.status.as_str())
                .bind(order.tax.cents())
                .bind(order.shipping.cents())
                .bind(order.total.cents())
                .bind(&order.notes)
                .bind(order.shipped_at)
                .bind(order.delivered_at)
                .bind(order.cancelled_at)
                .bind(to_i64(order.version))
                .bind(order.created_at)
                .bind(order.updated_at),
        )?;

        for (line_no, item) in order.items.iter().enumerate() {
            self.execute(
                "insert_order_item",
                sqlx::query(
                    "INSERT INTO order_items (id, order_id, line_no, product_id, variant_id, \
                     quantity, unit_price_cents, subtotal_cents) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
                )
                .bind(*item.id.as_uuid())
                .bind(*order.id.as_uuid())
                .bind(i32::try_from(line_no).unwrap_or(i32::MAX))
                .bind(*item.product_id.as_uuid())
                .bind(item.variant_id.map(Uuid::from))
                .bind(item.quantity)
                .bind(item.unit_price.cents())
                .bind(item.subtotal.cents()),
            )?;
        }
        Ok(())
    }

    #[instrument(skip(self, order), fields(order_id = %order.id, status = %order.status), err)]
    fn save_order(
        &mut self,
        order: &OrderRecord,
        expected: ExpectedVersion,
    ) -> Result<(), StoreError> {
        let updated = self.execute(
            "save_order",
            sqlx::query(
                "UPDATE orders SET status = $2, shipped_at = $3, delivered_at = $4, \
                 cancelled_at = $5, updated_at = $6, version = $7 \
                 WHERE id = $1 AND ($8::BIGINT IS NULL OR version = $8)",
            )
            .bind(*order.id.as_uuid())
            .bind(order.status.as_str())
            .bind(order.shipped_at)
            .bind(order.delivered_at)
            .bind(order.cancelled_at)
            .bind(order.updated_at)
            .bind(to_i64(order.version))
            .bind(expected_param(expected)),
        )?;
        if updated == 0 {
            return Err(StoreError::Conflict(format!(
                "order {}: expected {expected:?}, row changed or missing",
                order.id
            )));
        }
        Ok(())
    }

    fn orders_for_customer(
        &mut self,
        customer_id: UserId,
        page: PageRequest,
    ) -> Result<Page<OrderRecord>, StoreError> {
        let total = self.count(
            "orders_for_customer",
            sqlx::query("SELECT COUNT(*) AS total FROM orders WHERE customer_id = $1")
                .bind(*customer_id.as_uuid()),
        )?;
        let (limit, offset) = page_params(page);
        let sql = format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE customer_id = $1 \
             ORDER BY created_at DESC, id DESC LIMIT $2 OFFSET $3"
        );
        let rows = self.fetch_all(
            "orders_for_customer",
            sqlx::query(&sql)
                .bind(*customer_id.as_uuid())
                .bind(limit)
                .bind(offset),
        )?;
        let mut items = Vec::with_capacity(rows.len());
        for row in &rows {
            let id = OrderId::from_uuid(get(row, "id")?);
            let lines = self.items_for(id)?;
            items.push(order_from_row(row, lines)?);
        }
        Ok(Page {
            items,
            page: page.page,
            per_page: page.per_page,
            total,
        })
    }

    fn import(&mut self, id: ImportId) -> Result<Option<ProductImport>, StoreError> {
        let sql = format!("SELECT {IMPORT_COLUMNS} FROM product_imports WHERE id = $1");
        let row = self.fetch_optional("import", sqlx::query(&sql).bind(*id.as_uuid()))?;
        row.as_ref().map(import_from_row).transpose()
    }

    fn insert_import(&mut self, import: &ProductImport) -> Result<ProductImport, StoreError> {
        let sql = format!(
            "INSERT INTO product_imports ({IMPORT_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, 1, $7, $8) RETURNING {IMPORT_COLUMNS}"
        );
        let row = self.fetch_optional(
            "insert_import",
            sqlx::query(&sql)
                .bind(*import.id.as_uuid())
                .bind(&import.path)
                .bind(import.uploaded_by.map(Uuid::from))
                .bind(import.status.as_str())
                .bind(&import.results_path)
                .bind(Json(&import.errors))
                .bind(import.created_at)
                .bind(import.updated_at),
        )?;
        row.as_ref()
            .map(import_from_row)
            .transpose()?
            .ok_or_else(|| StoreError::Backend("insert_import returned no row".to_string()))
    }

    fn save_import(
        &mut self,
        import: &ProductImport,
        expected: ExpectedVersion,
    ) -> Result<ProductImport, StoreError> {
        let sql = format!(
            "UPDATE product_imports SET status = $2, results_path = $3, errors = $4, \
             updated_at = $5, version = version + 1 \
             WHERE id = $1 AND ($6::BIGINT IS NULL OR version = $6) RETURNING {IMPORT_COLUMNS}"
        );
        let row = self.fetch_optional(
            "save_import",
            sqlx::query(&sql)
                .bind(*import.id.as_uuid())
                .bind(import.status.as_str())
                .bind(&import.results_path)
                .bind(Json(&import.errors))
                .bind(import.updated_at)
                .bind(expected_param(expected)),
        )?;
        row.as_ref().map(import_from_row).transpose()?.ok_or_else(|| {
            StoreError::Conflict(format!(
                "import {}: expected {expected:?}, row changed or missing",
                import.id
            ))
        })
    }

    fn imports_by_status(
        &mut self,
        statuses: &[ImportStatus],
    ) -> Result<Vec<ProductImport>, StoreError> {
        let names: Vec<&str> = statuses.iter().map(|s| s.as_str()).collect();
        let sql = format!(
            "SELECT {IMPORT_COLUMNS} FROM product_imports WHERE status = ANY($1) \
             ORDER BY created_at, id"
        );
        let rows = self.fetch_all("imports_by_status", sqlx::query(&sql).bind(names))?;
        rows.iter().map(import_from_row).collect()
    }

    fn vendor_by_email(&mut self, email: &str) -> Result<Option<Vendor>, StoreError> {
        let row = self.fetch_optional(
            "vendor_by_email",
            sqlx::query("SELECT id, email, name FROM vendors WHERE lower(email) = lower($1)")
                .bind(email.trim()),
        )?;
        row.as_ref().map(vendor_from_row).transpose()
    }

    fn vendor(&mut self, id: UserId) -> Result<Option<Vendor>, StoreError> {
        let row = self.fetch_optional(
            "vendor",
            sqlx::query("SELECT id, email, name FROM vendors WHERE id = $1").bind(*id.as_uuid()),
        )?;
        row.as_ref().map(vendor_from_row).transpose()
    }

    fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let this = *self;
        this.store
            .runtime
            .block_on(this.tx.commit())
            .map_err(|e| map_sqlx_error("commit", e))
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                // lock_not_available, serialization_failure, deadlock_detected
                Some("55P03") | Some("40001") | Some("40P01") => StoreError::Conflict(msg),
                Some("23505") => StoreError::Unique(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            StoreError::Serialization(format!("decode error in {operation}: {err}"))
        }
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {operation}"))
        }
        _ => StoreError::Backend(format!("sqlx error in {operation}: {err}")),
    }
}
