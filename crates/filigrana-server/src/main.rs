// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Filigrana Contributors
//
// Filigrana — purchase-webhook PDF watermarking and delivery service.
//
// Entry point. Initialises logging, loads configuration, wires the Gmail
// transport into the pipeline, and runs the webhook server until ctrl-c.

mod payload;
mod pipeline;
mod sources;
mod webhook;

use std::sync::Arc;

use filigrana_core::AppConfig;
use filigrana_delivery::transport::{GmailTransport, MailTransport};
use pipeline::Pipeline;
use tracing::{error, info};
use webhook::WebhookServer;

/// Config file path when none is given on the command line.
const DEFAULT_CONFIG_PATH: &str = "filigrana.json";

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

    let config = match AppConfig::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            error!(path = %config_path, error = %e, "cannot load configuration");
            std::process::exit(2);
        }
    };

    info!(
        path = %config_path,
        offers = config.offers.len(),
        port = config.server.port,
        "Filigrana starting"
    );

    let transport: Arc<dyn MailTransport> = match GmailTransport::new(config.gmail.clone()) {
        Ok(transport) => Arc::new(transport),
        Err(e) => {
            error!(error = %e, "cannot initialise mail transport");
            std::process::exit(2);
        }
    };

    let port = config.server.port;
    let pipeline = match Pipeline::new(config, transport) {
        Ok(pipeline) => Arc::new(pipeline),
        Err(e) => {
            error!(error = %e, "cannot initialise pipeline");
            std::process::exit(2);
        }
    };

    let mut server = WebhookServer::new(port);
    if let Err(e) = server.start(pipeline).await {
        error!(error = %e, "cannot start webhook server");
        std::process::exit(1);
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "signal handler failed");
    }

    info!("shutdown requested");
    if let Err(e) = server.stop().await {
        error!(error = %e, "error during shutdown");
    }
}
