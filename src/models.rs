// src/models.rs
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

/// One lot of an instrument. `(user_id, symbol)` may repeat across lots;
/// `lot_id` makes each lot independently addressable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Holding {
    pub user_id: String,
    pub symbol: String,
    pub lot_id: Uuid,
    pub quantity: Decimal,
    pub cost_basis: Decimal,
    pub acquired_at: DateTime<Utc>,
}

/// Immutable record of a full or partial disposal of a lot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisposalEvent {
    pub event_id: Uuid,
    pub user_id: String,
    pub symbol: String,
    pub lot_id: Uuid,
    pub quantity: Decimal,
    pub cost_basis: Decimal,
    pub disposal_price: Decimal,
    pub realized_gain: Decimal,
    pub disposed_at: DateTime<Utc>,
}

/// A market price at a point in time. Fetched on demand and cached
/// transiently; never source of truth.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceQuote {
    pub symbol: String,
    pub price: Decimal,
    pub as_of: DateTime<Utc>,
}

impl PriceQuote {
    pub fn is_fresh(&self, now: DateTime<Utc>, max_age_secs: i64) -> bool {
        now.signed_duration_since(self.as_of) < chrono::Duration::seconds(max_age_secs)
    }
}

#[derive(Debug, Clone)]
pub struct User {
    pub user_id: Uuid,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

// ---- request bodies ----

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    /// Username or email.
    pub identifier: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct HoldingRequest {
    pub symbol: String,
    pub quantity: Decimal,
    pub cost_basis: Decimal,
    pub acquired_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateHoldingRequest {
    pub quantity: Decimal,
    pub cost_basis: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct SellRequest {
    pub quantity: Decimal,
    /// Omitted price means "sell at current market", resolved via the oracle.
    pub price: Option<Decimal>,
}

// ---- response bodies ----

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub user_id: String,
    pub username: String,
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct SellResponse {
    #[serde(flatten)]
    pub event: DisposalEvent,
    /// Quote timestamp when the sale was market-priced; absent when the
    /// caller supplied the price.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_as_of: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct RealizedGainsResponse {
    pub events: Vec<DisposalEvent>,
    pub total_realized_gain: Decimal,
}

pub fn normalize_symbol(symbol: &str) -> String {
    symbol.trim().to_uppercase()
}

/// Normalizes and rejects blank symbols. A persisted empty symbol can never
/// be priced, which would fail every later valuation of the portfolio.
pub fn validate_symbol(symbol: &str) -> Result<String, AppError> {
    let normalized = normalize_symbol(symbol);
    if normalized.is_empty() {
        return Err(AppError::Validation("symbol must not be empty".to_string()));
    }
    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn symbol_normalization_uppercases_and_trims() {
        assert_eq!(normalize_symbol(" aapl "), "AAPL");
        assert_eq!(normalize_symbol("MSFT"), "MSFT");
    }

    #[test]
    fn blank_symbols_are_rejected() {
        assert!(matches!(validate_symbol(""), Err(AppError::Validation(_))));
        assert!(matches!(validate_symbol("   "), Err(AppError::Validation(_))));
        assert_eq!(validate_symbol(" aapl ").unwrap(), "AAPL");
    }

    #[test]
    fn quote_freshness_respects_window() {
        let now = Utc::now();
        let quote = PriceQuote {
            symbol: "AAPL".to_string(),
            price: dec!(150),
            as_of: now - chrono::Duration::seconds(3599),
        };
        assert!(quote.is_fresh(now, 3600));
        let stale = PriceQuote {
            as_of: now - chrono::Duration::seconds(3600),
            ..quote
        };
        assert!(!stale.is_fresh(now, 3600));
    }
}
