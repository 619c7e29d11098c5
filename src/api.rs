// src/api.rs
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use log::info;
use reqwest::Client;
use rust_decimal::Decimal;
use scylla::Session;
use serde_json::json;
use uuid::Uuid;
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

use crate::auth::{self, with_auth};
use crate::config::Config;
use crate::db;
use crate::error::AppError;
use crate::models::{
    normalize_symbol, validate_symbol, Holding, HoldingRequest, LoginRequest, LoginResponse,
    RegisterRequest, RealizedGainsResponse, SellRequest, SellResponse, UpdateHoldingRequest, User,
};
use crate::oracle;
use crate::valuation;

/// Staleness window for a market-priced sale: much tighter than the portfolio
/// valuation window, since the quote becomes the recorded disposal price.
const SELL_QUOTE_MAX_AGE_SECS: i64 = 300;

pub fn routes(
    session: Arc<Session>,
    client: Client,
    config: Arc<Config>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    let auth = with_auth(config.clone());

    let health = warp::path("health")
        .and(warp::get())
        .map(|| warp::reply::json(&json!({ "status": "ok" })));

    let register = warp::path("register")
        .and(warp::post())
        .and(with_session(session.clone()))
        .and(warp::body::json())
        .and_then(register_handler);

    let login = warp::path("login")
        .and(warp::post())
        .and(with_session(session.clone()))
        .and(with_config(config.clone()))
        .and(warp::body::json())
        .and_then(login_handler);

    let list_holdings = warp::path!("holdings")
        .and(warp::get())
        .and(auth.clone())
        .and(with_session(session.clone()))
        .and_then(list_holdings_handler);

    let add_holding = warp::path!("holdings")
        .and(warp::post())
        .and(auth.clone())
        .and(with_session(session.clone()))
        .and(warp::body::json())
        .and_then(add_holding_handler);

    let update_holding = warp::path!("holdings" / String / Uuid)
        .and(warp::put())
        .and(auth.clone())
        .and(with_session(session.clone()))
        .and(warp::body::json())
        .and_then(update_holding_handler);

    let delete_holding = warp::path!("holdings" / String / Uuid)
        .and(warp::delete())
        .and(auth.clone())
        .and(with_session(session.clone()))
        .and_then(delete_holding_handler);

    let sell_holding = warp::path!("holdings" / String / Uuid / "sell")
        .and(warp::post())
        .and(auth.clone())
        .and(with_session(session.clone()))
        .and(with_client(client.clone()))
        .and(with_config(config.clone()))
        .and(warp::body::json())
        .and_then(sell_holding_handler);

    let portfolio = warp::path!("portfolio")
        .and(warp::get())
        .and(auth.clone())
        .and(with_session(session.clone()))
        .and(with_client(client))
        .and(with_config(config))
        .and_then(portfolio_handler);

    let realized_gains = warp::path!("realized_gains")
        .and(warp::get())
        .and(auth.clone())
        .and(with_session(session))
        .and_then(realized_gains_handler);

    let tax_estimate = warp::path!("tax_estimate")
        .and(warp::post())
        .and(auth)
        .and_then(tax_estimate_handler);

    health
        .or(register)
        .or(login)
        .or(list_holdings)
        .or(add_holding)
        .or(update_holding)
        .or(delete_holding)
        .or(sell_holding)
        .or(portfolio)
        .or(realized_gains)
        .or(tax_estimate)
}

fn with_session(
    session: Arc<Session>,
) -> impl Filter<Extract = (Arc<Session>,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || session.clone())
}

fn with_client(
    client: Client,
) -> impl Filter<Extract = (Client,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || client.clone())
}

fn with_config(
    config: Arc<Config>,
) -> impl Filter<Extract = (Arc<Config>,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || config.clone())
}

fn reject(e: AppError) -> Rejection {
    warp::reject::custom(e)
}

fn ensure_non_negative(name: &str, value: Decimal) -> Result<(), Rejection> {
    if value < Decimal::ZERO {
        return Err(reject(AppError::Validation(format!(
            "{} must not be negative",
            name
        ))));
    }
    Ok(())
}

// ---- auth ----

async fn register_handler(
    session: Arc<Session>,
    req: RegisterRequest,
) -> Result<impl Reply, Rejection> {
    if req.username.trim().is_empty() || req.email.trim().is_empty() || req.password.is_empty() {
        return Err(reject(AppError::Validation(
            "username, email and password are required".to_string(),
        )));
    }

    let user = User {
        user_id: Uuid::new_v4(),
        username: req.username.trim().to_string(),
        email: req.email.trim().to_lowercase(),
        password_hash: auth::hash_password(&req.password).map_err(reject)?,
        created_at: Utc::now(),
    };
    db::insert_user(&session, &user).await.map_err(reject)?;
    info!("Registered user {}", user.username);

    Ok(warp::reply::with_status(
        warp::reply::json(&json!({
            "user_id": user.user_id.to_string(),
            "username": user.username,
        })),
        StatusCode::CREATED,
    ))
}

async fn login_handler(
    session: Arc<Session>,
    config: Arc<Config>,
    req: LoginRequest,
) -> Result<impl Reply, Rejection> {
    let user = db::find_user(&session, req.identifier.trim())
        .await
        .map_err(reject)?
        .ok_or_else(|| reject(AppError::InvalidCredentials))?;

    if !auth::verify_password(&req.password, &user.password_hash).map_err(reject)? {
        return Err(reject(AppError::InvalidCredentials));
    }

    let user_id = user.user_id.to_string();
    let token = auth::create_token(&user_id, &config.jwt_secret).map_err(reject)?;
    info!("User {} logged in", user.username);
    Ok(warp::reply::json(&LoginResponse {
        user_id,
        username: user.username,
        token,
    }))
}

// ---- holdings ----

async fn list_holdings_handler(
    user_id: String,
    session: Arc<Session>,
) -> Result<impl Reply, Rejection> {
    let holdings = db::list_holdings(&session, &user_id).await.map_err(reject)?;
    Ok(warp::reply::json(&holdings))
}

async fn add_holding_handler(
    user_id: String,
    session: Arc<Session>,
    req: HoldingRequest,
) -> Result<impl Reply, Rejection> {
    ensure_non_negative("quantity", req.quantity)?;
    ensure_non_negative("cost_basis", req.cost_basis)?;

    // Lots stay independent; adding the same symbol twice creates a second
    // lot instead of averaging cost bases.
    let holding = Holding {
        user_id,
        symbol: validate_symbol(&req.symbol).map_err(reject)?,
        lot_id: Uuid::new_v4(),
        quantity: req.quantity,
        cost_basis: req.cost_basis,
        acquired_at: req.acquired_at.unwrap_or_else(Utc::now),
    };
    db::add_holding(&session, &holding).await.map_err(reject)?;

    info!("Added lot {} of {}", holding.lot_id, holding.symbol);
    Ok(warp::reply::with_status(
        warp::reply::json(&holding),
        StatusCode::CREATED,
    ))
}

async fn update_holding_handler(
    symbol: String,
    lot_id: Uuid,
    user_id: String,
    session: Arc<Session>,
    req: UpdateHoldingRequest,
) -> Result<impl Reply, Rejection> {
    ensure_non_negative("quantity", req.quantity)?;
    ensure_non_negative("cost_basis", req.cost_basis)?;

    let symbol = normalize_symbol(&symbol);
    let holding = db::update_holding(
        &session,
        &user_id,
        &symbol,
        &lot_id,
        req.quantity,
        req.cost_basis,
    )
    .await
    .map_err(reject)?;

    info!("Updated lot {} of {}", lot_id, symbol);
    Ok(warp::reply::json(&holding))
}

async fn delete_holding_handler(
    symbol: String,
    lot_id: Uuid,
    user_id: String,
    session: Arc<Session>,
) -> Result<impl Reply, Rejection> {
    let symbol = normalize_symbol(&symbol);
    db::delete_holding(&session, &user_id, &symbol, &lot_id)
        .await
        .map_err(reject)?;

    info!("Deleted lot {} of {}", lot_id, symbol);
    Ok(warp::reply::with_status(
        warp::reply::json(&json!({ "deleted": lot_id.to_string() })),
        StatusCode::OK,
    ))
}

async fn sell_holding_handler(
    symbol: String,
    lot_id: Uuid,
    user_id: String,
    session: Arc<Session>,
    client: Client,
    config: Arc<Config>,
    req: SellRequest,
) -> Result<impl Reply, Rejection> {
    let symbol = normalize_symbol(&symbol);
    let holding = db::get_holding(&session, &user_id, &symbol, &lot_id)
        .await
        .map_err(reject)?;

    let (price, price_as_of) = match req.price {
        Some(price) => {
            ensure_non_negative("price", price)?;
            (price, None)
        }
        None => {
            let quote =
                oracle::get_quote(&session, &client, &symbol, &config, SELL_QUOTE_MAX_AGE_SECS)
                    .await
                    .map_err(reject)?;
            (quote.price, Some(quote.as_of))
        }
    };

    let plan =
        valuation::plan_disposal(&holding, req.quantity, price, Utc::now()).map_err(reject)?;
    db::record_disposal(&session, &plan).await.map_err(reject)?;

    info!(
        "Disposed {} {} at {} (gain {})",
        plan.event.quantity, symbol, price, plan.event.realized_gain
    );
    Ok(warp::reply::with_status(
        warp::reply::json(&SellResponse {
            event: plan.event,
            price_as_of,
        }),
        StatusCode::CREATED,
    ))
}

// ---- valuation ----

async fn portfolio_handler(
    user_id: String,
    session: Arc<Session>,
    client: Client,
    config: Arc<Config>,
) -> Result<impl Reply, Rejection> {
    let holdings = db::list_holdings(&session, &user_id).await.map_err(reject)?;

    // Two-step pipeline: gather quotes for every held symbol first, then run
    // one pure valuation pass over the lot list.
    let symbols: HashSet<&str> = holdings.iter().map(|h| h.symbol.as_str()).collect();
    let mut quotes = HashMap::with_capacity(symbols.len());
    for symbol in symbols {
        let quote = oracle::get_quote(&session, &client, symbol, &config, config.quote_max_age_secs)
            .await
            .map_err(reject)?;
        quotes.insert(symbol.to_string(), quote);
    }

    let valuation = valuation::compute_portfolio_value(&holdings, &quotes).map_err(reject)?;
    info!(
        "Valued {} lots for {}: total {}",
        valuation.positions.len(),
        user_id,
        valuation.total_market_value
    );
    Ok(warp::reply::json(&valuation))
}

async fn realized_gains_handler(
    user_id: String,
    session: Arc<Session>,
) -> Result<impl Reply, Rejection> {
    let events = db::list_disposals(&session, &user_id).await.map_err(reject)?;
    let total_realized_gain = valuation::total_realized_gain(&events);
    Ok(warp::reply::json(&RealizedGainsResponse {
        events,
        total_realized_gain,
    }))
}

// Deliberately unspecified: there is no tax model to implement yet.
async fn tax_estimate_handler(_user_id: String) -> Result<impl Reply, Rejection> {
    Ok(warp::reply::with_status(
        warp::reply::json(&json!({
            "error": "not_implemented",
            "message": "tax estimation is not yet specified",
        })),
        StatusCode::NOT_IMPLEMENTED,
    ))
}
