use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use stockline_core::{ExpectedVersion, ImportId, OrderId, ProductId, UserId, VariantId};
use stockline_inventory::InventoryMovement;
use stockline_products::{Product, ProductVariant};
use stockline_sales::OrderRecord;

use super::r#trait::{
    Page, PageRequest, ProductQuery, Store, StoreError, UnitOfWork, Vendor,
};
use crate::catalog::model::{ImportStatus, ProductImport};

/// Anything a unit of work can observe and another can change underneath it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum RowKey {
    Product(ProductId),
    ProductSku(String),
    Variant(VariantId),
    VariantSku(String),
    /// The set of variants attached to a product.
    ProductVariants(ProductId),
    Order(OrderId),
    OrderNumber(String),
    Import(ImportId),
}

#[derive(Debug, Default)]
struct Tables {
    products: HashMap<ProductId, Product>,
    product_skus: HashMap<String, ProductId>,
    product_order: Vec<ProductId>,

    variants: HashMap<VariantId, ProductVariant>,
    variant_skus: HashMap<String, VariantId>,
    variant_order: Vec<VariantId>,

    orders: HashMap<OrderId, OrderRecord>,
    order_numbers: HashMap<String, OrderId>,
    order_order: Vec<OrderId>,

    imports: HashMap<ImportId, ProductImport>,
    import_order: Vec<ImportId>,

    movements: Vec<InventoryMovement>,
    vendors: HashMap<UserId, Vendor>,

    /// Commit stamp per row key; absent means never written (stamp 0).
    stamps: HashMap<RowKey, u64>,
    clock: u64,
}

impl Tables {
    fn stamp(&self, key: &RowKey) -> u64 {
        self.stamps.get(key).copied().unwrap_or(0)
    }

    fn bump(&mut self, key: RowKey) {
        self.clock += 1;
        self.stamps.insert(key, self.clock);
    }
}

/// In-memory transactional store.
///
/// Intended for tests/dev. Units of work run optimistically: reads record the
/// commit stamp of every row they observe, writes are buffered, and `commit`
/// validates the observed stamps under the write lock before applying
/// anything. A unit of work that raced with another commit fails with
/// [`StoreError::Conflict`] and leaves no trace, so concurrent stock
/// deductions against one product serialize without ever blocking.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a vendor account (owned by the excluded identity service in
    /// production).
    pub fn add_vendor(&self, vendor: Vendor) -> Result<(), StoreError> {
        let mut tables = self.write()?;
        tables.vendors.insert(vendor.id, vendor);
        Ok(())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>, StoreError> {
        self.tables
            .read()
            .map_err(|_| StoreError::Backend("in-memory store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>, StoreError> {
        self.tables
            .write()
            .map_err(|_| StoreError::Backend("in-memory store lock poisoned".to_string()))
    }
}

impl Store for InMemoryStore {
    fn begin(&self) -> Result<Box<dyn UnitOfWork + '_>, StoreError> {
        Ok(Box::new(InMemoryUnitOfWork {
            store: self,
            reads: HashMap::new(),
            writes: WriteSet::default(),
        }))
    }
}

#[derive(Debug, Default)]
struct WriteSet {
    products: HashMap<ProductId, Product>,
    new_products: Vec<ProductId>,
    variants: HashMap<VariantId, ProductVariant>,
    new_variants: Vec<VariantId>,
    orders: HashMap<OrderId, OrderRecord>,
    new_orders: Vec<OrderId>,
    imports: HashMap<ImportId, ProductImport>,
    new_imports: Vec<ImportId>,
    movements: Vec<InventoryMovement>,
}

struct InMemoryUnitOfWork<'a> {
    store: &'a InMemoryStore,
    reads: HashMap<RowKey, u64>,
    writes: WriteSet,
}

fn missing(what: &str, id: impl core::fmt::Display) -> StoreError {
    StoreError::Backend(format!("{what} {id} does not exist"))
}

fn stale(what: &str, id: impl core::fmt::Display, expected: ExpectedVersion, actual: u64) -> StoreError {
    StoreError::Conflict(format!(
        "{what} {id}: expected {expected:?}, found version {actual}"
    ))
}

fn whole<T>(rows: Vec<T>) -> Page<T> {
    let per_page = u32::try_from(rows.len()).unwrap_or(u32::MAX);
    PageRequest::first(per_page).slice(rows)
}

impl InMemoryUnitOfWork<'_> {
    /// Record the first stamp this unit of work saw for `key`.
    fn observe(&mut self, tables: &Tables, key: RowKey) {
        let stamp = tables.stamp(&key);
        self.reads.entry(key).or_insert(stamp);
    }

    fn observe_now(&mut self, key: RowKey) -> Result<(), StoreError> {
        let store = self.store;
        let tables = store.read()?;
        self.observe(&tables, key);
        Ok(())
    }

    fn merged<K, V>(
        order: &[K],
        committed: &HashMap<K, V>,
        pending: &HashMap<K, V>,
        new: &[K],
    ) -> Vec<V>
    where
        K: Eq + core::hash::Hash,
        V: Clone,
    {
        order
            .iter()
            .filter_map(|k| pending.get(k).or_else(|| committed.get(k)))
            .chain(new.iter().filter_map(|k| pending.get(k)))
            .cloned()
            .collect()
    }
}

impl UnitOfWork for InMemoryUnitOfWork<'_> {
    fn product(&mut self, id: ProductId) -> Result<Option<Product>, StoreError> {
        if let Some(p) = self.writes.products.get(&id) {
            return Ok(Some(p.clone()));
        }
        let store = self.store;
        let tables = store.read()?;
        self.observe(&tables, RowKey::Product(id));
        Ok(tables.products.get(&id).cloned())
    }

    fn product_by_sku(&mut self, sku: &str) -> Result<Option<Product>, StoreError> {
        if let Some(p) = self.writes.products.values().find(|p| p.sku == sku) {
            return Ok(Some(p.clone()));
        }
        let store = self.store;
        let tables = store.read()?;
        self.observe(&tables, RowKey::ProductSku(sku.to_string()));
        match tables.product_skus.get(sku) {
            Some(id) => {
                self.observe(&tables, RowKey::Product(*id));
                Ok(tables.products.get(id).cloned())
            }
            None => Ok(None),
        }
    }

    fn insert_product(&mut self, product: &Product) -> Result<Product, StoreError> {
        if self.product_by_sku(&product.sku)?.is_some() {
            return Err(StoreError::Unique(format!("product sku {}", product.sku)));
        }
        if self.product(product.id)?.is_some() {
            return Err(StoreError::Unique(format!("product id {}", product.id)));
        }
        let mut stored = product.clone();
        stored.version = 1;
        self.writes.products.insert(stored.id, stored.clone());
        self.writes.new_products.push(stored.id);
        Ok(stored)
    }

    fn save_product(
        &mut self,
        product: &Product,
        expected: ExpectedVersion,
    ) -> Result<Product, StoreError> {
        let current = self
            .product(product.id)?
            .ok_or_else(|| missing("product", product.id))?;
        if !expected.matches(current.version) {
            return Err(stale("product", product.id, expected, current.version));
        }
        let mut next = product.clone();
        next.sku = current.sku;
        next.quantity = current.quantity;
        next.version = current.version + 1;
        self.writes.products.insert(next.id, next.clone());
        Ok(next)
    }

    fn list_products(&mut self, query: &ProductQuery) -> Result<Page<Product>, StoreError> {
        let tables = self.store.read()?;
        let mut rows = Self::merged(
            &tables.product_order,
            &tables.products,
            &self.writes.products,
            &self.writes.new_products,
        );
        rows.retain(|p| query.matches(p));
        rows.reverse();
        Ok(match query.page {
            Some(page) => page.slice(rows),
            None => whole(rows),
        })
    }

    fn decrement_stock(&mut self, id: ProductId, quantity: i64) -> Result<Option<i64>, StoreError> {
        let mut product = self.product(id)?.ok_or_else(|| missing("product", id))?;
        if product.quantity < quantity {
            return Ok(None);
        }
        product.quantity -= quantity;
        let after = product.quantity;
        self.writes.products.insert(id, product);
        Ok(Some(after))
    }

    fn increment_stock(&mut self, id: ProductId, quantity: i64) -> Result<i64, StoreError> {
        let mut product = self.product(id)?.ok_or_else(|| missing("product", id))?;
        product.quantity = product
            .quantity
            .checked_add(quantity)
            .ok_or_else(|| StoreError::Backend(format!("quantity overflow on product {id}")))?;
        let after = product.quantity;
        self.writes.products.insert(id, product);
        Ok(after)
    }

    fn append_movement(&mut self, movement: &InventoryMovement) -> Result<(), StoreError> {
        self.writes.movements.push(movement.clone());
        Ok(())
    }

    fn movements(
        &mut self,
        product_id: ProductId,
        page: PageRequest,
    ) -> Result<Page<InventoryMovement>, StoreError> {
        let tables = self.store.read()?;
        let rows: Vec<InventoryMovement> = tables
            .movements
            .iter()
            .chain(self.writes.movements.iter())
            .rev()
            .filter(|m| m.product_id == product_id)
            .cloned()
            .collect();
        Ok(page.slice(rows))
    }

    fn variant(&mut self, id: VariantId) -> Result<Option<ProductVariant>, StoreError> {
        if let Some(v) = self.writes.variants.get(&id) {
            return Ok(Some(v.clone()));
        }
        let store = self.store;
        let tables = store.read()?;
        self.observe(&tables, RowKey::Variant(id));
        Ok(tables.variants.get(&id).cloned())
    }

    fn variant_by_sku(&mut self, sku: &str) -> Result<Option<ProductVariant>, StoreError> {
        if let Some(v) = self.writes.variants.values().find(|v| v.sku == sku) {
            return Ok(Some(v.clone()));
        }
        let store = self.store;
        let tables = store.read()?;
        self.observe(&tables, RowKey::VariantSku(sku.to_string()));
        match tables.variant_skus.get(sku) {
            Some(id) => {
                self.observe(&tables, RowKey::Variant(*id));
                Ok(tables.variants.get(id).cloned())
            }
            None => Ok(None),
        }
    }

    fn variants_for_product(
        &mut self,
        product_id: ProductId,
    ) -> Result<Vec<ProductVariant>, StoreError> {
        let store = self.store;
        let tables = store.read()?;
        self.observe(&tables, RowKey::ProductVariants(product_id));
        let mut rows = Self::merged(
            &tables.variant_order,
            &tables.variants,
            &self.writes.variants,
            &self.writes.new_variants,
        );
        rows.retain(|v| v.product_id == product_id);
        Ok(rows)
    }

    fn insert_variant(&mut self, variant: &ProductVariant) -> Result<ProductVariant, StoreError> {
        if self.variant_by_sku(&variant.sku)?.is_some() {
            return Err(StoreError::Unique(format!("variant sku {}", variant.sku)));
        }
        if self.variant(variant.id)?.is_some() {
            return Err(StoreError::Unique(format!("variant id {}", variant.id)));
        }
        self.observe_now(RowKey::ProductVariants(variant.product_id))?;
        let mut stored = variant.clone();
        stored.version = 1;
        self.writes.variants.insert(stored.id, stored.clone());
        self.writes.new_variants.push(stored.id);
        Ok(stored)
    }

    fn save_variant(
        &mut self,
        variant: &ProductVariant,
        expected: ExpectedVersion,
    ) -> Result<ProductVariant, StoreError> {
        let current = self
            .variant(variant.id)?
            .ok_or_else(|| missing("variant", variant.id))?;
        if !expected.matches(current.version) {
            return Err(stale("variant", variant.id, expected, current.version));
        }
        self.observe_now(RowKey::ProductVariants(current.product_id))?;
        self.observe_now(RowKey::ProductVariants(variant.product_id))?;
        let mut next = variant.clone();
        next.sku = current.sku;
        next.version = current.version + 1;
        self.writes.variants.insert(next.id, next.clone());
        Ok(next)
    }

    fn order(&mut self, id: OrderId) -> Result<Option<OrderRecord>, StoreError> {
        if let Some(o) = self.writes.orders.get(&id) {
            return Ok(Some(o.clone()));
        }
        let store = self.store;
        let tables = store.read()?;
        self.observe(&tables, RowKey::Order(id));
        Ok(tables.orders.get(&id).cloned())
    }

    fn order_number_exists(&mut self, order_number: &str) -> Result<bool, StoreError> {
        if self
            .writes
            .orders
            .values()
            .any(|o| o.order_number == order_number)
        {
            return Ok(true);
        }
        let store = self.store;
        let tables = store.read()?;
        self.observe(&tables, RowKey::OrderNumber(order_number.to_string()));
        Ok(tables.order_numbers.contains_key(order_number))
    }

    fn insert_order(&mut self, order: &OrderRecord) -> Result<(), StoreError> {
        if self.order_number_exists(&order.order_number)? {
            return Err(StoreError::Unique(format!("order number {}", order.order_number)));
        }
        if self.order(order.id)?.is_some() {
            return Err(StoreError::Unique(format!("order id {}", order.id)));
        }
        self.writes.orders.insert(order.id, order.clone());
        self.writes.new_orders.push(order.id);
        Ok(())
    }

    fn save_order(
        &mut self,
        order: &OrderRecord,
        expected: ExpectedVersion,
    ) -> Result<(), StoreError> {
        let current = self.order(order.id)?.ok_or_else(|| missing("order", order.id))?;
        if !expected.matches(current.version) {
            return Err(stale("order", order.id, expected, current.version));
        }
        let mut next = order.clone();
        next.order_number = current.order_number;
        next.items = current.items;
        self.writes.orders.insert(next.id, next);
        Ok(())
    }

    fn orders_for_customer(
        &mut self,
        customer_id: UserId,
        page: PageRequest,
    ) -> Result<Page<OrderRecord>, StoreError> {
        let tables = self.store.read()?;
        let mut rows = Self::merged(
            &tables.order_order,
            &tables.orders,
            &self.writes.orders,
            &self.writes.new_orders,
        );
        rows.retain(|o| o.customer_id == customer_id);
        rows.reverse();
        Ok(page.slice(rows))
    }

    fn import(&mut self, id: ImportId) -> Result<Option<ProductImport>, StoreError> {
        if let Some(i) = self.writes.imports.get(&id) {
            return Ok(Some(i.clone()));
        }
        let store = self.store;
        let tables = store.read()?;
        self.observe(&tables, RowKey::Import(id));
        Ok(tables.imports.get(&id).cloned())
    }

    fn insert_import(&mut self, import: &ProductImport) -> Result<ProductImport, StoreError> {
        if self.import(import.id)?.is_some() {
            return Err(StoreError::Unique(format!("import id {}", import.id)));
        }
        let mut stored = import.clone();
        stored.version = 1;
        self.writes.imports.insert(stored.id, stored.clone());
        self.writes.new_imports.push(stored.id);
        Ok(stored)
    }

    fn save_import(
        &mut self,
        import: &ProductImport,
        expected: ExpectedVersion,
    ) -> Result<ProductImport, StoreError> {
        let current = self.import(import.id)?.ok_or_else(|| missing("import", import.id))?;
        if !expected.matches(current.version) {
            return Err(stale("import", import.id, expected, current.version));
        }
        let mut next = import.clone();
        next.version = current.version + 1;
        self.writes.imports.insert(next.id, next.clone());
        Ok(next)
    }

    fn imports_by_status(
        &mut self,
        statuses: &[ImportStatus],
    ) -> Result<Vec<ProductImport>, StoreError> {
        let tables = self.store.read()?;
        let mut rows = Self::merged(
            &tables.import_order,
            &tables.imports,
            &self.writes.imports,
            &self.writes.new_imports,
        );
        rows.retain(|i| statuses.contains(&i.status));
        Ok(rows)
    }

    fn vendor_by_email(&mut self, email: &str) -> Result<Option<Vendor>, StoreError> {
        let email = email.trim();
        let tables = self.store.read()?;
        Ok(tables
            .vendors
            .values()
            .find(|v| v.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    fn vendor(&mut self, id: UserId) -> Result<Option<Vendor>, StoreError> {
        let tables = self.store.read()?;
        Ok(tables.vendors.get(&id).cloned())
    }

    fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let this = *self;
        let mut tables = this.store.write()?;

        for (key, seen) in &this.reads {
            if tables.stamp(key) != *seen {
                return Err(StoreError::Conflict(format!("{key:?} changed since it was read")));
            }
        }

        let writes = this.writes;

        for p in writes.products.values() {
            if let Some(owner) = tables.product_skus.get(&p.sku) {
                if *owner != p.id {
                    return Err(StoreError::Unique(format!("product sku {}", p.sku)));
                }
            }
        }
        for v in writes.variants.values() {
            if let Some(owner) = tables.variant_skus.get(&v.sku) {
                if *owner != v.id {
                    return Err(StoreError::Unique(format!("variant sku {}", v.sku)));
                }
            }
        }
        for o in writes.orders.values() {
            if let Some(owner) = tables.order_numbers.get(&o.order_number) {
                if *owner != o.id {
                    return Err(StoreError::Unique(format!("order number {}", o.order_number)));
                }
            }
        }

        for (id, product) in writes.products {
            tables.product_skus.insert(product.sku.clone(), id);
            tables.bump(RowKey::ProductSku(product.sku.clone()));
            tables.bump(RowKey::Product(id));
            tables.products.insert(id, product);
        }
        tables.product_order.extend(writes.new_products);

        for (id, variant) in writes.variants {
            if let Some(previous) = tables.variants.get(&id).map(|v| v.product_id) {
                tables.bump(RowKey::ProductVariants(previous));
            }
            tables.variant_skus.insert(variant.sku.clone(), id);
            tables.bump(RowKey::VariantSku(variant.sku.clone()));
            tables.bump(RowKey::Variant(id));
            tables.bump(RowKey::ProductVariants(variant.product_id));
            tables.variants.insert(id, variant);
        }
        tables.variant_order.extend(writes.new_variants);

        for (id, order) in writes.orders {
            tables.order_numbers.insert(order.order_number.clone(), id);
            tables.bump(RowKey::OrderNumber(order.order_number.clone()));
            tables.bump(RowKey::Order(id));
            tables.orders.insert(id, order);
        }
        tables.order_order.extend(writes.new_orders);

        for (id, import) in writes.imports {
            tables.bump(RowKey::Import(id));
            tables.imports.insert(id, import);
        }
        tables.import_order.extend(writes.new_imports);

        tables.movements.extend(writes.movements);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use stockline_core::Money;
    use stockline_products::NewProduct;

    fn product(sku: &str, quantity: i64) -> Product {
        Product::create(
            ProductId::new(),
            NewProduct::new(sku, "Thing", Money::from_cents(100)).with_quantity(quantity),
            10,
            Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
        )
        .unwrap()
    }

    fn seed(store: &InMemoryStore, p: &Product) -> Product {
        let mut uow = store.begin().unwrap();
        let stored = uow.insert_product(p).unwrap();
        uow.commit().unwrap();
        stored
    }

    #[test]
    fn uncommitted_writes_are_invisible_and_dropped() {
        let store = InMemoryStore::new();
        let p = product("A", 5);
        {
            let mut uow = store.begin().unwrap();
            uow.insert_product(&p).unwrap();
            assert!(uow.product(p.id).unwrap().is_some());
            // dropped without commit
        }
        let mut uow = store.begin().unwrap();
        assert!(uow.product(p.id).unwrap().is_none());
    }

    #[test]
    fn decrement_respects_the_floor() {
        let store = InMemoryStore::new();
        let p = seed(&store, &product("A", 5));

        let mut uow = store.begin().unwrap();
        assert_eq!(uow.decrement_stock(p.id, 3).unwrap(), Some(2));
        assert_eq!(uow.decrement_stock(p.id, 3).unwrap(), None);
        uow.commit().unwrap();

        let mut uow = store.begin().unwrap();
        assert_eq!(uow.product(p.id).unwrap().unwrap().quantity, 2);
    }

    #[test]
    fn racing_units_of_work_conflict() {
        let store = InMemoryStore::new();
        let p = seed(&store, &product("A", 5));

        let mut first = store.begin().unwrap();
        let mut second = store.begin().unwrap();
        assert_eq!(first.decrement_stock(p.id, 4).unwrap(), Some(1));
        assert_eq!(second.decrement_stock(p.id, 4).unwrap(), Some(1));

        first.commit().unwrap();
        let err = second.commit().unwrap_err();
        assert!(err.is_retryable(), "{err:?}");

        let mut uow = store.begin().unwrap();
        assert_eq!(uow.product(p.id).unwrap().unwrap().quantity, 1);
    }

    #[test]
    fn duplicate_sku_is_rejected() {
        let store = InMemoryStore::new();
        seed(&store, &product("DUP", 1));

        let mut uow = store.begin().unwrap();
        let err = uow.insert_product(&product("DUP", 1)).unwrap_err();
        assert!(matches!(err, StoreError::Unique(_)));
    }

    #[test]
    fn save_product_keeps_stored_quantity_and_bumps_version() {
        let store = InMemoryStore::new();
        let stored = seed(&store, &product("A", 7));

        let mut edited = stored.clone();
        edited.name = "Renamed".into();
        edited.quantity = 999;

        let mut uow = store.begin().unwrap();
        let saved = uow
            .save_product(&edited, ExpectedVersion::Exact(stored.version))
            .unwrap();
        uow.commit().unwrap();

        assert_eq!(saved.quantity, 7);
        assert_eq!(saved.version, 2);
        assert_eq!(saved.name, "Renamed");

        let mut uow = store.begin().unwrap();
        let err = uow
            .save_product(&edited, ExpectedVersion::Exact(stored.version))
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[test]
    fn movements_are_listed_newest_first() {
        use stockline_core::MovementId;
        use stockline_inventory::MovementType;

        let store = InMemoryStore::new();
        let p = seed(&store, &product("A", 0));
        let mut uow = store.begin().unwrap();
        for q in 1..=3 {
            uow.append_movement(&InventoryMovement {
                id: MovementId::new(),
                product_id: p.id,
                movement_type: MovementType::In,
                quantity: q,
                reference: None,
                note: None,
                created_at: Utc::now(),
            })
            .unwrap();
        }
        uow.commit().unwrap();

        let mut uow = store.begin().unwrap();
        let page = uow.movements(p.id, PageRequest::first(2)).unwrap();
        assert_eq!(page.items.iter().map(|m| m.quantity).collect::<Vec<_>>(), vec![3, 2]);
        assert_eq!(page.total, 3);
    }

    #[test]
    fn vendor_lookup_ignores_case() {
        let store = InMemoryStore::new();
        let id = UserId::new();
        store
            .add_vendor(Vendor {
                id,
                email: "Shop@Example.com".into(),
                name: "Shop".into(),
            })
            .unwrap();
        let mut uow = store.begin().unwrap();
        assert_eq!(uow.vendor_by_email(" shop@example.COM ").unwrap().map(|v| v.id), Some(id));
    }
}
