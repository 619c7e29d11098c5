// src/db.rs
//
// Holdings Store on ScyllaDB. Pure data access: every function maps one
// record operation, business rules live in the valuation module. Monetary
// columns are stored as TEXT and parsed into Decimal to keep fixed-precision
// end to end; instants are epoch-millis BIGINT columns.

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{error, info};
use rust_decimal::Decimal;
use scylla::frame::response::result::{CqlValue, Row};
use scylla::query::Query;
use scylla::{Session, SessionBuilder};
use uuid::Uuid;

use crate::config::Config;
use crate::error::AppError;
use crate::models::{DisposalEvent, Holding, PriceQuote, User};
use crate::valuation::DisposalPlan;

pub async fn init(config: &Config) -> Result<Session, AppError> {
    let session = SessionBuilder::new()
        .known_node(&config.scylla_node)
        .build()
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

    session
        .query(
            "CREATE KEYSPACE IF NOT EXISTS finance WITH REPLICATION = {'class': 'SimpleStrategy', 'replication_factor': 1}",
            &[],
        )
        .await
        .map_err(db_err)?;
    session
        .query(
            "CREATE TABLE IF NOT EXISTS finance.users (email TEXT PRIMARY KEY, user_id TEXT, username TEXT, password_hash TEXT, created_at BIGINT)",
            &[],
        )
        .await
        .map_err(db_err)?;
    session
        .query(
            "CREATE TABLE IF NOT EXISTS finance.holdings (user_id TEXT, symbol TEXT, lot_id TEXT, quantity TEXT, cost_basis TEXT, acquired_at BIGINT, PRIMARY KEY ((user_id), symbol, lot_id))",
            &[],
        )
        .await
        .map_err(db_err)?;
    session
        .query(
            "CREATE TABLE IF NOT EXISTS finance.disposals (user_id TEXT, disposed_at BIGINT, event_id TEXT, symbol TEXT, lot_id TEXT, quantity TEXT, cost_basis TEXT, disposal_price TEXT, realized_gain TEXT, PRIMARY KEY ((user_id), disposed_at, event_id)) WITH CLUSTERING ORDER BY (disposed_at DESC, event_id ASC)",
            &[],
        )
        .await
        .map_err(db_err)?;
    session
        .query(
            "CREATE TABLE IF NOT EXISTS finance.prices (symbol TEXT PRIMARY KEY, price TEXT, as_of BIGINT)",
            &[],
        )
        .await
        .map_err(db_err)?;

    info!("Successfully connected to ScyllaDB.");
    Ok(session)
}

fn db_err(e: impl std::fmt::Display) -> AppError {
    AppError::Database(e.to_string())
}

// ---- row decoding helpers ----

fn text_column(row: &Row, idx: usize) -> Result<String, AppError> {
    row.columns
        .get(idx)
        .and_then(|c| c.as_ref())
        .and_then(|v| v.as_text())
        .cloned()
        .ok_or_else(|| AppError::Database(format!("missing text column {}", idx)))
}

fn bigint_column(row: &Row, idx: usize) -> Result<i64, AppError> {
    row.columns
        .get(idx)
        .and_then(|c| c.as_ref())
        .and_then(|v| v.as_bigint())
        .ok_or_else(|| AppError::Database(format!("missing bigint column {}", idx)))
}

fn decimal_column(row: &Row, idx: usize) -> Result<Decimal, AppError> {
    let raw = text_column(row, idx)?;
    Decimal::from_str(&raw).map_err(|e| AppError::Database(format!("bad decimal {}: {}", raw, e)))
}

fn uuid_column(row: &Row, idx: usize) -> Result<Uuid, AppError> {
    let raw = text_column(row, idx)?;
    Uuid::parse_str(&raw).map_err(|e| AppError::Database(format!("bad uuid {}: {}", raw, e)))
}

fn datetime_column(row: &Row, idx: usize) -> Result<DateTime<Utc>, AppError> {
    let millis = bigint_column(row, idx)?;
    DateTime::<Utc>::from_timestamp_millis(millis)
        .ok_or_else(|| AppError::Database(format!("bad timestamp {}", millis)))
}

fn applied(rows: Option<Vec<Row>>) -> bool {
    // Conditional statements answer a single row whose first column is the
    // [applied] boolean.
    rows.and_then(|rows| rows.into_iter().next())
        .map(|row| {
            matches!(
                row.columns.first().and_then(|c| c.as_ref()),
                Some(CqlValue::Boolean(true))
            )
        })
        .unwrap_or(false)
}

// ---- users ----

pub async fn insert_user(session: &Arc<Session>, user: &User) -> Result<(), AppError> {
    let query = Query::new(
        "INSERT INTO finance.users (email, user_id, username, password_hash, created_at) VALUES (?, ?, ?, ?, ?) IF NOT EXISTS",
    );
    let result = session
        .query(
            query,
            (
                user.email.as_str(),
                user.user_id.to_string(),
                user.username.as_str(),
                user.password_hash.as_str(),
                user.created_at.timestamp_millis(),
            ),
        )
        .await
        .map_err(db_err)?;
    if !applied(result.rows) {
        return Err(AppError::DuplicateUser);
    }
    Ok(())
}

fn user_from_row(row: &Row) -> Result<User, AppError> {
    Ok(User {
        email: text_column(row, 0)?,
        user_id: uuid_column(row, 1)?,
        username: text_column(row, 2)?,
        password_hash: text_column(row, 3)?,
        created_at: datetime_column(row, 4)?,
    })
}

/// Looks a user up by email first, then by username. Returns `None` when
/// neither matches; the caller decides whether that is an auth failure.
pub async fn find_user(
    session: &Arc<Session>,
    identifier: &str,
) -> Result<Option<User>, AppError> {
    let by_email = Query::new(
        "SELECT email, user_id, username, password_hash, created_at FROM finance.users WHERE email = ?",
    );
    let result = session
        .query(by_email, (identifier.to_lowercase(),))
        .await
        .map_err(db_err)?;
    if let Some(row) = result.rows.unwrap_or_default().into_iter().next() {
        return Ok(Some(user_from_row(&row)?));
    }

    let by_username = Query::new(
        "SELECT email, user_id, username, password_hash, created_at FROM finance.users WHERE username = ? ALLOW FILTERING",
    );
    let result = session
        .query(by_username, (identifier,))
        .await
        .map_err(db_err)?;
    match result.rows.unwrap_or_default().into_iter().next() {
        Some(row) => Ok(Some(user_from_row(&row)?)),
        None => Ok(None),
    }
}

// ---- holdings ----

fn holding_from_row(row: &Row) -> Result<Holding, AppError> {
    Ok(Holding {
        user_id: text_column(row, 0)?,
        symbol: text_column(row, 1)?,
        lot_id: uuid_column(row, 2)?,
        quantity: decimal_column(row, 3)?,
        cost_basis: decimal_column(row, 4)?,
        acquired_at: datetime_column(row, 5)?,
    })
}

pub async fn add_holding(session: &Arc<Session>, holding: &Holding) -> Result<(), AppError> {
    let query = Query::new(
        "INSERT INTO finance.holdings (user_id, symbol, lot_id, quantity, cost_basis, acquired_at) VALUES (?, ?, ?, ?, ?, ?)",
    );
    session
        .query(
            query,
            (
                holding.user_id.as_str(),
                holding.symbol.as_str(),
                holding.lot_id.to_string(),
                holding.quantity.to_string(),
                holding.cost_basis.to_string(),
                holding.acquired_at.timestamp_millis(),
            ),
        )
        .await
        .map_err(db_err)?;
    Ok(())
}

pub async fn list_holdings(
    session: &Arc<Session>,
    user_id: &str,
) -> Result<Vec<Holding>, AppError> {
    let query = Query::new(
        "SELECT user_id, symbol, lot_id, quantity, cost_basis, acquired_at FROM finance.holdings WHERE user_id = ?",
    );
    let result = session.query(query, (user_id,)).await.map_err(db_err)?;
    result
        .rows
        .unwrap_or_default()
        .iter()
        .map(holding_from_row)
        .collect()
}

pub async fn get_holding(
    session: &Arc<Session>,
    user_id: &str,
    symbol: &str,
    lot_id: &Uuid,
) -> Result<Holding, AppError> {
    let query = Query::new(
        "SELECT user_id, symbol, lot_id, quantity, cost_basis, acquired_at FROM finance.holdings WHERE user_id = ? AND symbol = ? AND lot_id = ?",
    );
    let result = session
        .query(query, (user_id, symbol, lot_id.to_string()))
        .await
        .map_err(db_err)?;
    match result.rows.unwrap_or_default().iter().next() {
        Some(row) => holding_from_row(row),
        None => Err(AppError::NotFound {
            symbol: symbol.to_string(),
            lot_id: lot_id.to_string(),
        }),
    }
}

pub async fn update_holding(
    session: &Arc<Session>,
    user_id: &str,
    symbol: &str,
    lot_id: &Uuid,
    quantity: Decimal,
    cost_basis: Decimal,
) -> Result<Holding, AppError> {
    // CQL UPDATE is an upsert; read first so absent lots fail with NotFound.
    let mut holding = get_holding(session, user_id, symbol, lot_id).await?;

    let query = Query::new(
        "UPDATE finance.holdings SET quantity = ?, cost_basis = ? WHERE user_id = ? AND symbol = ? AND lot_id = ?",
    );
    session
        .query(
            query,
            (
                quantity.to_string(),
                cost_basis.to_string(),
                user_id,
                symbol,
                lot_id.to_string(),
            ),
        )
        .await
        .map_err(db_err)?;

    holding.quantity = quantity;
    holding.cost_basis = cost_basis;
    Ok(holding)
}

pub async fn delete_holding(
    session: &Arc<Session>,
    user_id: &str,
    symbol: &str,
    lot_id: &Uuid,
) -> Result<(), AppError> {
    get_holding(session, user_id, symbol, lot_id).await?;

    let query =
        Query::new("DELETE FROM finance.holdings WHERE user_id = ? AND symbol = ? AND lot_id = ?");
    session
        .query(query, (user_id, symbol, lot_id.to_string()))
        .await
        .map_err(db_err)?;
    Ok(())
}

// ---- disposals ----

/// Applies a disposal plan atomically per lot: the quantity write carries an
/// `IF quantity = ?` precondition, so two concurrent disposals of the same
/// lot cannot both succeed. The loser sees `ConcurrentModification` and the
/// event is only appended after the quantity write was accepted.
pub async fn record_disposal(session: &Arc<Session>, plan: &DisposalPlan) -> Result<(), AppError> {
    let event = &plan.event;
    let expected = plan.remaining_quantity + event.quantity;

    let result = if plan.remaining_quantity.is_zero() {
        let query = Query::new(
            "DELETE FROM finance.holdings WHERE user_id = ? AND symbol = ? AND lot_id = ? IF quantity = ?",
        );
        session
            .query(
                query,
                (
                    event.user_id.as_str(),
                    event.symbol.as_str(),
                    event.lot_id.to_string(),
                    expected.to_string(),
                ),
            )
            .await
            .map_err(db_err)?
    } else {
        let query = Query::new(
            "UPDATE finance.holdings SET quantity = ? WHERE user_id = ? AND symbol = ? AND lot_id = ? IF quantity = ?",
        );
        session
            .query(
                query,
                (
                    plan.remaining_quantity.to_string(),
                    event.user_id.as_str(),
                    event.symbol.as_str(),
                    event.lot_id.to_string(),
                    expected.to_string(),
                ),
            )
            .await
            .map_err(db_err)?
    };
    if !applied(result.rows) {
        return Err(AppError::ConcurrentModification);
    }

    let query = Query::new(
        "INSERT INTO finance.disposals (user_id, disposed_at, event_id, symbol, lot_id, quantity, cost_basis, disposal_price, realized_gain) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    );
    if let Err(e) = session
        .query(
            query,
            (
                event.user_id.as_str(),
                event.disposed_at.timestamp_millis(),
                event.event_id.to_string(),
                event.symbol.as_str(),
                event.lot_id.to_string(),
                event.quantity.to_string(),
                event.cost_basis.to_string(),
                event.disposal_price.to_string(),
                event.realized_gain.to_string(),
            ),
        )
        .await
    {
        // The quantity write already went through; only per-record atomicity
        // is available, so the missing gain record must be reconstructable
        // from the log.
        error!(
            "Lot {} of {} was reduced to {} but disposal event {} (gain {}) failed to persist: {}",
            event.lot_id,
            event.symbol,
            plan.remaining_quantity,
            event.event_id,
            event.realized_gain,
            e
        );
        return Err(db_err(e));
    }
    Ok(())
}

pub async fn list_disposals(
    session: &Arc<Session>,
    user_id: &str,
) -> Result<Vec<DisposalEvent>, AppError> {
    let query = Query::new(
        "SELECT user_id, disposed_at, event_id, symbol, lot_id, quantity, cost_basis, disposal_price, realized_gain FROM finance.disposals WHERE user_id = ?",
    );
    let result = session.query(query, (user_id,)).await.map_err(db_err)?;
    result
        .rows
        .unwrap_or_default()
        .iter()
        .map(|row| {
            Ok(DisposalEvent {
                user_id: text_column(row, 0)?,
                disposed_at: datetime_column(row, 1)?,
                event_id: uuid_column(row, 2)?,
                symbol: text_column(row, 3)?,
                lot_id: uuid_column(row, 4)?,
                quantity: decimal_column(row, 5)?,
                cost_basis: decimal_column(row, 6)?,
                disposal_price: decimal_column(row, 7)?,
                realized_gain: decimal_column(row, 8)?,
            })
        })
        .collect()
}

// ---- price cache ----

pub async fn read_cached_quote(
    session: &Arc<Session>,
    symbol: &str,
) -> Result<Option<PriceQuote>, AppError> {
    let query = Query::new("SELECT symbol, price, as_of FROM finance.prices WHERE symbol = ?");
    let result = session.query(query, (symbol,)).await.map_err(db_err)?;
    match result.rows.unwrap_or_default().iter().next() {
        Some(row) => Ok(Some(PriceQuote {
            symbol: text_column(row, 0)?,
            price: decimal_column(row, 1)?,
            as_of: datetime_column(row, 2)?,
        })),
        None => Ok(None),
    }
}

pub async fn upsert_cached_quote(
    session: &Arc<Session>,
    quote: &PriceQuote,
) -> Result<(), AppError> {
    let query = Query::new("INSERT INTO finance.prices (symbol, price, as_of) VALUES (?, ?, ?)");
    session
        .query(
            query,
            (
                quote.symbol.as_str(),
                quote.price.to_string(),
                quote.as_of.timestamp_millis(),
            ),
        )
        .await
        .map_err(db_err)?;
    Ok(())
}
