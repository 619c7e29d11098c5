// src/oracle.rs
//
// Price Oracle adapter over the Financial Modeling Prep quote-short endpoint.
// The provider is treated as unreliable: one retry with a short backoff, then
// the failure surfaces as `ProviderUnavailable` and the caller decides whether
// a stale cached quote is acceptable.

use chrono::Utc;
use log::{info, warn};
use reqwest::Client;
use rust_decimal::Decimal;
use scylla::Session;
use serde::Deserialize;
use std::sync::Arc;
use tokio::time::{sleep, Duration};

use crate::config::Config;
use crate::db;
use crate::error::AppError;
use crate::models::PriceQuote;

const RETRY_BACKOFF_MS: u64 = 500;

#[derive(Debug, Deserialize)]
struct FmpQuote {
    symbol: String,
    price: Decimal,
}

fn quote_from_response(symbol: &str, quotes: Vec<FmpQuote>) -> Result<PriceQuote, AppError> {
    // FMP answers an empty array for symbols it does not know.
    let first = quotes.into_iter().next().ok_or(AppError::UnknownSymbol {
        symbol: symbol.to_string(),
    })?;
    Ok(PriceQuote {
        symbol: first.symbol,
        price: first.price,
        as_of: Utc::now(),
    })
}

/// Fetches a live quote from the provider. Best-effort single retry with
/// backoff on network errors and non-2xx responses.
pub async fn fetch_price(
    client: &Client,
    symbol: &str,
    api_key: &str,
) -> Result<PriceQuote, AppError> {
    let url = format!(
        "https://financialmodelingprep.com/api/v3/quote-short/{}?apikey={}",
        symbol, api_key
    );

    let mut last_failure = String::new();
    for attempt in 0..2 {
        if attempt > 0 {
            sleep(Duration::from_millis(RETRY_BACKOFF_MS)).await;
        }
        match client.get(&url).send().await {
            Ok(response) if response.status().is_success() => {
                let quotes = response
                    .json::<Vec<FmpQuote>>()
                    .await
                    .map_err(|e| AppError::ProviderUnavailable(e.to_string()))?;
                return quote_from_response(symbol, quotes);
            }
            Ok(response) => {
                last_failure = format!("HTTP {}", response.status());
                warn!("Provider returned {} for {}", response.status(), symbol);
            }
            Err(e) => {
                last_failure = e.to_string();
                warn!("Provider request failed for {}: {}", symbol, e);
            }
        }
    }
    Err(AppError::ProviderUnavailable(last_failure))
}

/// Cache-first quote lookup. A fresh cached quote is used as-is; a stale or
/// missing one triggers a live fetch that is written back to the cache. If
/// the fetch fails but a stale quote exists, the stale quote is returned so
/// the caller can still render with its `as_of` visible.
pub async fn get_quote(
    session: &Arc<Session>,
    client: &Client,
    symbol: &str,
    config: &Config,
    max_age_secs: i64,
) -> Result<PriceQuote, AppError> {
    let cached = db::read_cached_quote(session, symbol).await?;
    if let Some(quote) = &cached {
        if quote.is_fresh(Utc::now(), max_age_secs) {
            return Ok(quote.clone());
        }
    }

    match fetch_price(client, symbol, &config.fmp_api_key).await {
        Ok(quote) => {
            db::upsert_cached_quote(session, &quote).await?;
            info!("Cached {} @ {}", quote.symbol, quote.price);
            Ok(quote)
        }
        Err(AppError::UnknownSymbol { symbol }) => Err(AppError::UnknownSymbol { symbol }),
        Err(e) => match cached {
            Some(stale) => {
                warn!(
                    "Serving stale quote for {} (as of {}): {}",
                    symbol, stale.as_of, e
                );
                Ok(stale)
            }
            None => Err(e),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn parses_provider_payload() {
        let quotes: Vec<FmpQuote> =
            serde_json::from_str(r#"[{"symbol":"AAPL","price":150.25,"volume":123456}]"#).unwrap();
        let quote = quote_from_response("AAPL", quotes).unwrap();
        assert_eq!(quote.symbol, "AAPL");
        assert_eq!(quote.price, dec!(150.25));
    }

    #[test]
    fn empty_payload_means_unknown_symbol() {
        let err = quote_from_response("NOPE", Vec::new()).unwrap_err();
        match err {
            AppError::UnknownSymbol { symbol } => assert_eq!(symbol, "NOPE"),
            other => panic!("expected UnknownSymbol, got {:?}", other),
        }
    }
}
