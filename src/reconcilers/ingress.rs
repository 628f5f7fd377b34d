// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Ingress reconciler - converges Ingress objects into frontends and rules.

use k8s_openapi::api::networking::v1::Ingress;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::orchestrator::{run_controller, Context};
use crate::types::SourceKey;

pub struct IngressReconciler {
    ctx: Arc<Context>,
    resync: Option<mpsc::Receiver<SourceKey>>,
    shutdown: CancellationToken,
}

impl IngressReconciler {
    pub fn new(
        ctx: Arc<Context>,
        resync: Option<mpsc::Receiver<SourceKey>>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            ctx,
            resync,
            shutdown,
        }
    }

    pub async fn run(self) -> anyhow::Result<()> {
        info!(
            class = %self.ctx.config.ingress_class,
            alb = %self.ctx.config.alb_name,
            "Watching ingresses"
        );
        run_controller::<Ingress>(self.ctx, self.resync, self.shutdown).await
    }
}
