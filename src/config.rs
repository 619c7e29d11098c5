// src/config.rs
use std::env;

use log::warn;

const DEFAULT_QUOTE_MAX_AGE_SECS: i64 = 3600;

#[derive(Debug, Clone)]
pub struct Config {
    pub scylla_node: String,
    pub bind_port: u16,
    pub fmp_api_key: String,
    pub jwt_secret: String,
    /// Quotes older than this must be refetched before valuation.
    pub quote_max_age_secs: i64,
}

impl Config {
    pub fn from_env() -> Result<Config, String> {
        dotenvy::dotenv().ok();

        let fmp_api_key =
            env::var("FMP_API_KEY").map_err(|_| "FMP_API_KEY is not set".to_string())?;

        let jwt_secret = env::var("JWT_SECRET").unwrap_or_else(|_| {
            warn!("JWT_SECRET not set, using an insecure development secret");
            "dev-secret-do-not-use".to_string()
        });

        let bind_port = match env::var("PORT") {
            Ok(raw) => raw
                .parse()
                .map_err(|_| format!("PORT is not a valid port number: {}", raw))?,
            Err(_) => 3030,
        };

        let quote_max_age_secs = match env::var("QUOTE_MAX_AGE_SECS") {
            Ok(raw) => raw
                .parse()
                .map_err(|_| format!("QUOTE_MAX_AGE_SECS is not a number: {}", raw))?,
            Err(_) => DEFAULT_QUOTE_MAX_AGE_SECS,
        };

        Ok(Config {
            scylla_node: env::var("SCYLLA_NODE").unwrap_or_else(|_| "127.0.0.1:9042".to_string()),
            bind_port,
            fmp_api_key,
            jwt_secret,
            quote_max_age_secs,
        })
    }
}
