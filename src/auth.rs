// src/auth.rs
use std::sync::Arc;

use argon2::password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use warp::{Filter, Rejection};

use crate::config::Config;
use crate::error::AppError;

const TOKEN_TTL_HOURS: i64 = 24;

#[derive(Serialize, Deserialize)]
struct Claims {
    sub: String,
    exp: usize,
}

pub fn create_token(user_id: &str, secret: &str) -> Result<String, AppError> {
    let claims = Claims {
        sub: user_id.to_string(),
        exp: (Utc::now() + Duration::hours(TOKEN_TTL_HOURS)).timestamp() as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_ref()),
    )
    .map_err(|e| AppError::Internal(e.to_string()))
}

/// Returns the token subject (user id). Expired or tampered tokens fail with
/// `InvalidCredentials`.
pub fn verify_token(token: &str, secret: &str) -> Result<String, AppError> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_ref()),
        &Validation::default(),
    )
    .map(|data| data.claims.sub)
    .map_err(|_| AppError::InvalidCredentials)
}

pub fn hash_password(password: &str) -> Result<String, AppError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::Internal(e.to_string()))
}

pub fn verify_password(password: &str, hash: &str) -> Result<bool, AppError> {
    let parsed = PasswordHash::new(hash).map_err(|e| AppError::Internal(e.to_string()))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

/// Extracts the authenticated user id from the `Authorization: Bearer` header.
/// Identity is always request-scoped; nothing downstream reads ambient state.
pub fn with_auth(
    config: Arc<Config>,
) -> impl Filter<Extract = (String,), Error = Rejection> + Clone {
    warp::header::<String>("authorization").and_then(move |header: String| {
        let config = config.clone();
        async move {
            let token = header
                .strip_prefix("Bearer ")
                .ok_or_else(|| warp::reject::custom(AppError::InvalidCredentials))?;
            verify_token(token, &config.jwt_secret).map_err(warp::reject::custom)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_round_trip_preserves_subject() {
        let token = create_token("user-42", "test-secret").unwrap();
        assert_eq!(verify_token(&token, "test-secret").unwrap(), "user-42");
    }

    #[test]
    fn token_with_wrong_secret_is_rejected() {
        let token = create_token("user-42", "test-secret").unwrap();
        assert!(matches!(
            verify_token(&token, "other-secret"),
            Err(AppError::InvalidCredentials)
        ));
    }

    #[test]
    fn password_hash_verifies_and_rejects() {
        let hash = hash_password("hunter2").unwrap();
        assert!(verify_password("hunter2", &hash).unwrap());
        assert!(!verify_password("hunter3", &hash).unwrap());
    }
}
