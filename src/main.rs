// src/main.rs
mod api;
mod auth;
mod config;
mod db;
mod error;
mod models;
mod oracle;
mod valuation;

use std::sync::Arc;

use env_logger::Builder;
use log::{error, info, LevelFilter};
use reqwest::Client;
use warp::Filter;

use crate::config::Config;

#[tokio::main]
async fn main() {
    Builder::new()
        .filter_level(LevelFilter::Info)
        .format_timestamp_secs()
        .init();

    let config = match Config::from_env() {
        Ok(config) => Arc::new(config),
        Err(e) => {
            error!("Invalid configuration: {}", e);
            return;
        }
    };

    let session = match db::init(&config).await {
        Ok(session) => Arc::new(session),
        Err(e) => {
            error!("Failed to initialize database: {}", e);
            return;
        }
    };
    info!("Connected to database...");

    let client = Client::new();
    let port = config.bind_port;
    let routes = api::routes(session, client, config).recover(error::handle_rejection);

    info!("Server running on http://127.0.0.1:{}", port);
    warp::serve(routes).run(([127, 0, 0, 1], port)).await;
}
