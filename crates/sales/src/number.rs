//! Human-readable order numbers: `PREFIX-YYYYMMDD-XXXXXX`.

use chrono::{DateTime, Utc};
use uuid::Uuid;

const SUFFIX_LEN: usize = 6;
const ALPHABET: &[u8; 36] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Produces order-number candidates.
///
/// Candidates are random, not unique: callers check them against the store
/// and ask again on collision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderNumberGenerator {
    prefix: String,
}

impl OrderNumberGenerator {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn candidate(&self, at: DateTime<Utc>) -> String {
        self.format(at, &random_suffix())
    }

    pub fn format(&self, at: DateTime<Utc>, suffix: &str) -> String {
        format!("{}-{}-{}", self.prefix, at.format("%Y%m%d"), suffix)
    }

    /// Whether `number` has the shape this generator produces.
    pub fn is_well_formed(&self, number: &str) -> bool {
        let Some(rest) = number
            .strip_prefix(self.prefix.as_str())
            .and_then(|r| r.strip_prefix('-'))
        else {
            return false;
        };
        let Some((date, suffix)) = rest.split_once('-') else {
            return false;
        };
        date.len() == 8
            && date.bytes().all(|b| b.is_ascii_digit())
            && suffix.len() == SUFFIX_LEN
            && suffix.bytes().all(|b| ALPHABET.contains(&b))
    }
}

/// Where order-number candidates come from.
pub trait OrderNumberSource: Send + Sync + core::fmt::Debug {
    fn candidate(&self, at: DateTime<Utc>) -> String;
}

impl OrderNumberSource for OrderNumberGenerator {
    fn candidate(&self, at: DateTime<Utc>) -> String {
        OrderNumberGenerator::candidate(self, at)
    }
}

impl Default for OrderNumberGenerator {
    fn default() -> Self {
        Self::new("ORD")
    }
}

fn random_suffix() -> String {
    Uuid::new_v4()
        .as_bytes()
        .iter()
        .take(SUFFIX_LEN)
        .map(|b| char::from(ALPHABET[usize::from(*b) % ALPHABET.len()]))
        .collect()
}
