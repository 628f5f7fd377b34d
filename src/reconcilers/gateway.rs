// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Gateway reconciler - converges Gateway-API routes attached to gateways of our class.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::orchestrator::{run_controller, Context};
use crate::types::{HTTPRoute, SourceKey, SourceType, TCPRoute, TLSRoute, UDPRoute};

/// Route kinds converged by the gateway reconciler
pub const ROUTE_TYPES: [SourceType; 4] = [
    SourceType::HttpRoute,
    SourceType::TcpRoute,
    SourceType::UdpRoute,
    SourceType::TlsRoute,
];

pub struct GatewayReconciler {
    ctx: Arc<Context>,
    resync: HashMap<SourceType, mpsc::Receiver<SourceKey>>,
    shutdown: CancellationToken,
}

impl GatewayReconciler {
    /// `resync` carries drifted keys per route kind; kinds without a receiver only follow watches
    pub fn new(
        ctx: Arc<Context>,
        resync: HashMap<SourceType, mpsc::Receiver<SourceKey>>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            ctx,
            resync,
            shutdown,
        }
    }

    pub async fn run(mut self) -> anyhow::Result<()> {
        info!(class = %self.ctx.config.gateway_class, "Watching gateway routes");
        let mut take = |t: SourceType| self.resync.remove(&t);
        let (http, tcp, udp, tls) = (
            take(SourceType::HttpRoute),
            take(SourceType::TcpRoute),
            take(SourceType::UdpRoute),
            take(SourceType::TlsRoute),
        );
        tokio::try_join!(
            run_controller::<HTTPRoute>(self.ctx.clone(), http, self.shutdown.clone()),
            run_controller::<TCPRoute>(self.ctx.clone(), tcp, self.shutdown.clone()),
            run_controller::<UDPRoute>(self.ctx.clone(), udp, self.shutdown.clone()),
            run_controller::<TLSRoute>(self.ctx.clone(), tls, self.shutdown.clone()),
        )?;
        Ok(())
    }
}
