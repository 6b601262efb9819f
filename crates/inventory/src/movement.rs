use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockline_core::{DomainError, MovementId, OrderId, ProductId};

/// Direction/cause of a ledger movement.
///
/// Quantities are always stored positive; the type carries the sign.
/// `Adjustment` is only ever written for manual decreases, increases are `In`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementType {
    In,
    Out,
    Return,
    Adjustment,
}

impl MovementType {
    pub fn as_str(self) -> &'static str {
        match self {
            MovementType::In => "in",
            MovementType::Out => "out",
            MovementType::Return => "return",
            MovementType::Adjustment => "adjustment",
        }
    }

    /// Signed effect of `quantity` units of this movement on on-hand stock.
    pub fn signed(self, quantity: i64) -> i64 {
        match self {
            MovementType::In | MovementType::Return => quantity,
            MovementType::Out | MovementType::Adjustment => -quantity,
        }
    }
}

impl core::fmt::Display for MovementType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for MovementType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in" => Ok(MovementType::In),
            "out" => Ok(MovementType::Out),
            "return" => Ok(MovementType::Return),
            "adjustment" => Ok(MovementType::Adjustment),
            other => Err(DomainError::validation(format!("unknown movement type: {other}"))),
        }
    }
}

/// The business event a movement was caused by, as a `(type, id)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MovementReference {
    pub ref_type: String,
    pub ref_id: String,
}

impl MovementReference {
    pub fn new(ref_type: impl Into<String>, ref_id: impl Into<String>) -> Self {
        Self {
            ref_type: ref_type.into(),
            ref_id: ref_id.into(),
        }
    }

    pub fn order(order_id: OrderId) -> Self {
        Self::new("order", order_id.to_string())
    }
}

/// Immutable ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryMovement {
    pub id: MovementId,
    pub product_id: ProductId,
    pub movement_type: MovementType,
    pub quantity: i64,
    pub reference: Option<MovementReference>,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl InventoryMovement {
    pub fn signed_quantity(&self) -> i64 {
        self.movement_type.signed(self.quantity)
    }
}

/// Net stock change described by a set of movements.
///
/// For a product's complete history this equals its current quantity minus
/// its initial quantity.
pub fn net_movement<'a>(movements: impl IntoIterator<Item = &'a InventoryMovement>) -> i64 {
    movements.into_iter().map(InventoryMovement::signed_quantity).sum()
}
