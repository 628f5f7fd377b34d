// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! One shutdown signal shared by every long running task.

use anyhow::{Context as _, Result};
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Cancels `token` on SIGTERM or SIGINT. Returns once the token is cancelled, by a signal or not.
pub async fn cancel_on_signal(token: CancellationToken) -> Result<()> {
    let mut sigterm = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("installing SIGINT handler")?;

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
        _ = sigint.recv() => info!("Received SIGINT, shutting down"),
        _ = token.cancelled() => {}
    }
    token.cancel();
    Ok(())
}

/// Resolves once `token` is cancelled
pub async fn cancelled(token: CancellationToken) {
    token.cancelled().await
}
