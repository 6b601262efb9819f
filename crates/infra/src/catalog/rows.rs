//! Import source parsing.
//!
//! Two stages: the CSV reader yields [`RawRow`]s keyed by normalised header
//! names, then [`ImportRow::parse`] turns one raw row into a typed record or
//! explains why it cannot.

use std::collections::BTreeMap;

use serde_json::Value;
use uuid::Uuid;

use stockline_core::{DomainError, DomainResult, Money, UserId};
use stockline_products::{AttributeSet, normalize_sku};

use super::model::ImportIssue;

/// One data line: column name → non-empty raw value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRow {
    /// 1-based line in the source; the header is line 1.
    pub number: usize,
    pub fields: BTreeMap<String, String>,
}

impl RawRow {
    pub fn get(&self, column: &str) -> Option<&str> {
        self.fields.get(column).map(String::as_str)
    }
}

/// A data line that could not even be split into fields.
pub type SourceRow = Result<RawRow, ImportIssue>;

/// Split CSV bytes into rows.
///
/// Header names are trimmed and lowercased. Blank cells are dropped so that
/// "absent" and "empty" mean the same thing downstream. A source without a
/// single record is a structural failure.
pub fn read_source(bytes: &[u8]) -> DomainResult<Vec<SourceRow>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(bytes);

    let mut records = reader.byte_records();
    let header = match records.next() {
        None => return Err(DomainError::structural("file is empty")),
        Some(Err(e)) => return Err(DomainError::structural(format!("unreadable header: {e}"))),
        Some(Ok(h)) => h,
    };
    let columns: Vec<String> = header
        .iter()
        .map(|h| String::from_utf8_lossy(h).trim().to_lowercase())
        .collect();
    if columns.iter().all(String::is_empty) {
        return Err(DomainError::structural("file is empty"));
    }

    let mut rows = Vec::new();
    for (index, record) in records.enumerate() {
        let fallback = index + 2;
        let row = match record {
            Ok(record) => {
                let number = record
                    .position()
                    .map_or(fallback, |p| p.line() as usize);
                let mut fields = BTreeMap::new();
                for (column, cell) in columns.iter().zip(record.iter()) {
                    if column.is_empty() {
                        continue;
                    }
                    let value = String::from_utf8_lossy(cell).trim().to_string();
                    if !value.is_empty() {
                        fields.insert(column.clone(), value);
                    }
                }
                Ok(RawRow { number, fields })
            }
            Err(e) => {
                let number = e
                    .position()
                    .map_or(fallback, |p| p.line() as usize);
                Err(ImportIssue::row(number, format!("malformed line: {e}")))
            }
        };
        rows.push(row);
    }
    Ok(rows)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VendorRef {
    Email(String),
    Id(UserId),
}

/// An inline variant entry from the `variants` column.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VariantSpec {
    pub sku: Option<String>,
    pub name: Option<String>,
    pub attributes: Option<AttributeSet>,
    pub price: Option<Money>,
    pub quantity: Option<i64>,
}

/// A validated catalog row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRow {
    pub number: usize,
    pub sku: String,
    pub name: String,
    pub price: Money,
    pub description: Option<String>,
    pub cost: Option<Money>,
    pub quantity: Option<i64>,
    pub low_stock_threshold: Option<i64>,
    pub vendor: Option<VendorRef>,
    pub variants: Vec<VariantSpec>,
}

impl ImportRow {
    pub fn parse(raw: &RawRow) -> DomainResult<ImportRow> {
        let sku = raw.get("sku");
        let name = raw.get("name");
        let price = raw.get("price").and_then(|p| Money::parse(p).ok());

        let missing: Vec<&str> = [
            ("sku", sku.is_none()),
            ("name", name.is_none()),
            ("price", price.is_none()),
        ]
        .into_iter()
        .filter_map(|(field, absent)| absent.then_some(field))
        .collect();

        let (Some(sku), Some(name), Some(price)) = (sku, name, price) else {
            return Err(DomainError::missing_fields(missing.join(", ")));
        };

        let vendor = match (raw.get("vendor_email"), raw.get("vendor_id")) {
            (Some(email), _) => Some(VendorRef::Email(email.to_string())),
            (None, Some(id)) => Some(VendorRef::Id(parse_user_id(id)?)),
            (None, None) => None,
        };

        Ok(ImportRow {
            number: raw.number,
            sku: normalize_sku(sku)?,
            name: name.to_string(),
            price,
            description: raw.get("description").map(str::to_string),
            cost: raw.get("cost").map(Money::parse).transpose()?,
            quantity: raw.get("quantity").map(|q| parse_count("quantity", q)).transpose()?,
            low_stock_threshold: raw
                .get("low_stock_threshold")
                .map(|t| parse_count("low_stock_threshold", t))
                .transpose()?,
            vendor,
            variants: raw.get("variants").map(parse_variants).transpose()?.unwrap_or_default(),
        })
    }
}

fn parse_user_id(raw: &str) -> DomainResult<UserId> {
    Uuid::parse_str(raw)
        .map(UserId::from_uuid)
        .map_err(|_| DomainError::validation(format!("invalid vendor_id: {raw:?}")))
}

fn parse_count(field: &str, raw: &str) -> DomainResult<i64> {
    raw.trim()
        .parse::<i64>()
        .map_err(|_| DomainError::validation(format!("invalid {field}: {raw:?}")))
}

fn parse_variants(raw: &str) -> DomainResult<Vec<VariantSpec>> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|e| DomainError::validation(format!("variants is not valid JSON: {e}")))?;
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Array(entries) => entries.iter().map(parse_variant).collect(),
        _ => Err(DomainError::validation("variants must be a JSON array")),
    }
}

fn parse_variant(entry: &Value) -> DomainResult<VariantSpec> {
    let Value::Object(map) = entry else {
        return Err(DomainError::validation("each variant must be a JSON object"));
    };
    let field = |key: &str| map.get(key).filter(|v| !v.is_null());

    Ok(VariantSpec {
        sku: field("sku").map(scalar_text).filter(|s| !s.is_empty()),
        name: field("name").map(scalar_text),
        attributes: field("attributes").map(AttributeSet::from_json).transpose()?,
        price: field("price")
            .map(|v| Money::parse(&scalar_text(v)))
            .transpose()?,
        quantity: field("quantity")
            .map(|v| parse_count("variant quantity", &scalar_text(v)))
            .transpose()?,
    })
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    }
}
