// Copyright 2024 RISC Zero, Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use ballot_core::{
    commitment::{CommitmentBackend, Keccak256Commitment},
    readiness::Readiness,
    VotingCore,
};
use ballot_relay::{
    config::Args,
    http::{self, AppState},
};
use clap::Parser;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    match dotenvy::dotenv() {
        Ok(path) => tracing::debug!("Loaded environment variables from {:?}", path),
        Err(e) if e.not_found() => tracing::debug!("No .env file found"),
        Err(e) => bail!("failed to load .env file: {}", e),
    }
    let args = Args::parse();

    let config = args.core_config()?;
    let collaborators = args.collaborators()?;
    let backend = Arc::new(Readiness::new("commitment"));
    let core = Arc::new(VotingCore::new(&config, Arc::clone(&backend), collaborators));

    // Snapshot builds wait on this; every other route is served immediately.
    if backend.begin() {
        tokio::spawn(async move {
            let init = tokio::task::spawn_blocking(|| {
                CommitmentBackend::new(Arc::new(Keccak256Commitment))
            });
            match init.await {
                Ok(ready) => {
                    tracing::info!(padding_leaf = %ready.padding_leaf(), "commitment backend ready");
                    backend.complete(ready);
                }
                Err(err) => {
                    tracing::error!(%err, "commitment backend failed to initialize");
                    backend.fail(err.to_string());
                }
            }
        });
    }

    let state = AppState {
        core,
        keys: args.key_retriever(),
        mpc_deployment: args.mpc_deployment.as_str().into(),
    };
    let listener = tokio::net::TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("failed to bind {}", args.listen))?;
    tracing::info!(
        listen = %args.listen,
        ledger = ?args.ledger,
        tree_depth = config.tree_depth,
        "relayer listening"
    );
    axum::serve(listener, http::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(%err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
