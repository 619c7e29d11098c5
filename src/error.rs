// src/error.rs
use std::convert::Infallible;

use log::error;
use serde_json::json;
use thiserror::Error;
use warp::http::StatusCode;
use warp::reject::Reject;
use warp::{Rejection, Reply};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("holding not found: {symbol}/{lot_id}")]
    NotFound { symbol: String, lot_id: String },

    #[error("user not found")]
    UserNotFound,

    #[error("cannot dispose {requested} units, only {held} held")]
    InsufficientQuantity { requested: String, held: String },

    #[error("no quote available for {symbol}")]
    MissingQuote { symbol: String },

    #[error("unknown symbol: {symbol}")]
    UnknownSymbol { symbol: String },

    #[error("price provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("holding was modified concurrently, retry")]
    ConcurrentModification,

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("email already registered")]
    DuplicateUser,

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Reject for AppError {}

impl AppError {
    /// Stable kind string so the dashboard can branch on the failure class
    /// without parsing messages.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::NotFound { .. } | AppError::UserNotFound => "not_found",
            AppError::InsufficientQuantity { .. } => "insufficient_quantity",
            AppError::MissingQuote { .. } => "missing_quote",
            AppError::UnknownSymbol { .. } => "unknown_symbol",
            AppError::ProviderUnavailable(_) => "provider_unavailable",
            AppError::ConcurrentModification => "conflict",
            AppError::InvalidCredentials => "invalid_credentials",
            AppError::DuplicateUser => "duplicate_user",
            AppError::Validation(_) => "validation",
            AppError::Database(_) => "database",
            AppError::Internal(_) => "internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound { .. } | AppError::UserNotFound => StatusCode::NOT_FOUND,
            AppError::InsufficientQuantity { .. } | AppError::Validation(_) => {
                StatusCode::BAD_REQUEST
            }
            AppError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            AppError::DuplicateUser | AppError::ConcurrentModification => StatusCode::CONFLICT,
            AppError::UnknownSymbol { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::MissingQuote { .. } | AppError::ProviderUnavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            AppError::Database(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

pub async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    let (status, kind, message) = if err.is_not_found() {
        (
            StatusCode::NOT_FOUND,
            "not_found",
            "route not found".to_string(),
        )
    } else if let Some(app_err) = err.find::<AppError>() {
        (app_err.status(), app_err.kind(), app_err.to_string())
    } else if let Some(body_err) = err.find::<warp::filters::body::BodyDeserializeError>() {
        (StatusCode::BAD_REQUEST, "validation", body_err.to_string())
    } else if err.find::<warp::reject::MissingHeader>().is_some() {
        (
            StatusCode::UNAUTHORIZED,
            "invalid_credentials",
            "missing authorization header".to_string(),
        )
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (
            StatusCode::METHOD_NOT_ALLOWED,
            "method_not_allowed",
            "method not allowed".to_string(),
        )
    } else {
        error!("Unhandled rejection: {:?}", err);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal",
            "internal server error".to_string(),
        )
    };

    let body = warp::reply::json(&json!({ "error": kind, "message": message }));
    Ok(warp::reply::with_status(body, status))
}
