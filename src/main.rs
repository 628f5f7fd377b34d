// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use anyhow::{bail, Result};
use futures::future::{try_join_all, BoxFuture, FutureExt};
use kube::Client;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use alb_controller::config::Config;
use alb_controller::kubernetes::wait_for_alb_crds;
use alb_controller::reconcilers::gateway::ROUTE_TYPES;
use alb_controller::reconcilers::{Context, GatewayReconciler, IngressReconciler};
use alb_controller::shutdown::cancel_on_signal;
use alb_controller::sync::ResyncSweeper;
use alb_controller::types::SourceType;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting ALB controller");

    let config = Config::from_env()?;
    info!(
        alb = %config.alb_name,
        namespace = %config.alb_namespace,
        ingress = config.enable_ingress,
        gateway = config.enable_gateway,
        "Configuration loaded"
    );
    if !config.enable_ingress && !config.enable_gateway {
        bail!("both ENABLE_INGRESS and ENABLE_GATEWAY are off, nothing to do");
    }

    let client = Client::try_default().await?;
    info!("Connected to Kubernetes cluster");

    info!("Waiting for ALB CRDs to become available...");
    wait_for_alb_crds(&client).await?;

    let ctx = Arc::new(Context::new(client, config.clone()));

    let mut sweeper = config
        .resync_period
        .map(|period| ResyncSweeper::new(ctx.clone(), period));

    let shutdown = CancellationToken::new();
    let mut tasks: Vec<BoxFuture<'static, Result<()>>> =
        vec![cancel_on_signal(shutdown.clone()).boxed()];
    if config.enable_ingress {
        let resync = sweeper.as_mut().map(|s| s.subscribe(SourceType::Ingress));
        tasks.push(IngressReconciler::new(ctx.clone(), resync, shutdown.clone()).run().boxed());
    }
    if config.enable_gateway {
        let resync: HashMap<_, _> = match sweeper.as_mut() {
            Some(s) => ROUTE_TYPES.iter().map(|t| (*t, s.subscribe(*t))).collect(),
            None => HashMap::new(),
        };
        tasks.push(GatewayReconciler::new(ctx.clone(), resync, shutdown.clone()).run().boxed());
    }
    if let Some(sweeper) = sweeper {
        tasks.push(sweeper.run(shutdown.clone()).boxed());
    }

    info!(tasks = tasks.len(), "Starting reconcilers...");
    try_join_all(tasks).await?;

    warn!("All reconcilers stopped");
    Ok(())
}
