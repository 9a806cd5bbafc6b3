// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Dockyard server: HTTP API, image builds, container runs and timers.

use tracing::{info, warn};

use dockyard::config::Config;
use dockyard::runtime::DockyardRuntime;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dockyard=info".into()),
        )
        .init();

    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    let config = Config::from_env()?;

    info!(
        http_addr = %config.http_addr,
        base_path = %config.base_path.display(),
        code_types = %config.code_types_file.display(),
        "Starting Dockyard"
    );

    let runtime = DockyardRuntime::builder()
        .config(config)
        .build()
        .start()
        .await?;

    info!(addr = %runtime.local_addr(), "Dockyard ready");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    runtime.shutdown().await?;

    info!("Dockyard shut down");

    Ok(())
}
