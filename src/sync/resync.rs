// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Periodic drift detection over every route the controllers watch.
//!
//! Each sweep dry-runs a pass for every route and re-enqueues only the keys whose plan is not
//! empty. Sources that still own rules or frontend default backends but whose object is gone
//! are cleaned up directly, since no controller will ever see them again. Gateway listener
//! status is refreshed from the routes found attached during the sweep.

use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::chrono::{SecondsFormat, Utc};
use kube::{
    api::{ListParams, Patch},
    Api, ResourceExt,
};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::error::Result;
use crate::kubernetes::apply::patch_params;
use crate::kubernetes::snapshot::Snapshot;
use crate::reconcilers::orchestrator::{cleanup, evaluate, Context};
use crate::synth::status::gateway_status;
use crate::synth::RouteSource;
use crate::types::{Gateway, HTTPRoute, SourceKey, SourceType, TCPRoute, TLSRoute, UDPRoute};

/// What one sweep found
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub checked: usize,
    pub drifted: usize,
    pub orphaned: usize,
    /// Gateways whose status was written
    pub gateways: usize,
}

/// State carried through one sweep
#[derive(Default)]
struct Sweep {
    report: SweepReport,
    existing: BTreeSet<SourceKey>,
    /// Handled routes per listener, keyed by (namespace, gateway, listener)
    attached: BTreeMap<(String, String, String), i32>,
}

pub struct ResyncSweeper {
    ctx: Arc<Context>,
    period: Duration,
    subscribers: HashMap<SourceType, mpsc::Sender<SourceKey>>,
}

impl ResyncSweeper {
    pub fn new(ctx: Arc<Context>, period: Duration) -> Self {
        Self {
            ctx,
            period,
            subscribers: HashMap::new(),
        }
    }

    /// Receiver of drifted keys of one route kind. Only subscribed kinds are swept.
    pub fn subscribe(&mut self, source_type: SourceType) -> mpsc::Receiver<SourceKey> {
        let (tx, rx) = mpsc::channel(256);
        self.subscribers.insert(source_type, tx);
        rx
    }

    /// Sweeps every period until `shutdown` is cancelled
    pub async fn run(self, shutdown: CancellationToken) -> anyhow::Result<()> {
        info!(period = ?self.period, "Resync sweeper started");
        let mut ticker = interval_at(Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => match self.sweep().await {
                    Ok(report) => info!(
                        checked = report.checked,
                        drifted = report.drifted,
                        orphaned = report.orphaned,
                        gateways = report.gateways,
                        "Resync complete"
                    ),
                    Err(e) => warn!("Resync failed: {}", e),
                },
                _ = shutdown.cancelled() => {
                    info!("Resync sweeper stopping");
                    break;
                }
            }
        }
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn sweep(&self) -> Result<SweepReport> {
        let with_gateways = self.subscribers.keys().any(|t| *t != SourceType::Ingress);
        let base = self.ctx.loader.load_base(with_gateways).await?;

        let mut sweep = Sweep::default();
        let mut listed = Vec::new();
        let mut complete = true;
        let kinds = [
            self.sweep_kind::<Ingress>(&base, &mut sweep).await,
            self.sweep_kind::<HTTPRoute>(&base, &mut sweep).await,
            self.sweep_kind::<TCPRoute>(&base, &mut sweep).await,
            self.sweep_kind::<UDPRoute>(&base, &mut sweep).await,
            self.sweep_kind::<TLSRoute>(&base, &mut sweep).await,
        ];
        for kind in kinds {
            match kind {
                Ok(Some(t)) => listed.push(t),
                Ok(None) => {}
                Err(e) => {
                    warn!("Skipping route kind in resync: {}", e);
                    complete = false;
                }
            }
        }

        for key in over_handled(&base.source_keys(), &sweep.existing, &listed) {
            info!(route = %key, "Source is gone, cleaning up");
            match cleanup(&key, &base, &self.ctx).await {
                Ok(_) => sweep.report.orphaned += 1,
                Err(e) => warn!(route = %key, "Cleanup failed: {}", e),
            }
        }

        // attachment counts are only trustworthy when every route kind was listed
        if complete {
            sweep.report.gateways = self.report_gateways(&base, &sweep.attached).await;
        }
        Ok(sweep.report)
    }

    /// Dry-runs every route of kind `K`. Returns the kind when it was listed.
    async fn sweep_kind<K: RouteSource>(
        &self,
        base: &Snapshot,
        sweep: &mut Sweep,
    ) -> Result<Option<SourceType>> {
        let Some(tx) = self.subscribers.get(&K::SOURCE_TYPE) else {
            return Ok(None);
        };
        let config = &self.ctx.config;
        let api: Api<K> = Api::all(self.ctx.client.clone());
        let routes = api.list(&ListParams::default()).await?;

        for route in routes.items {
            let key = route.source_key();
            sweep.existing.insert(key.clone());
            sweep.report.checked += 1;

            let snapshot = self
                .ctx
                .loader
                .for_route(base, &route.namespace().unwrap_or_default(), &route.referenced_services())
                .await;
            let intent = snapshot.and_then(|snapshot| {
                if route.should_handle(&snapshot, config).is_ok() {
                    for listener in route.attached_listeners(&snapshot, config) {
                        *sweep.attached.entry(listener).or_default() += 1;
                    }
                }
                evaluate(&route, &snapshot, config)
            });
            let drifted = match intent {
                Ok(intent) => !intent.plan().is_empty(),
                Err(e) => {
                    debug!(route = %key, error = %e, "Dry run failed");
                    true
                }
            };
            if drifted {
                sweep.report.drifted += 1;
                if tx.send(key.clone()).await.is_err() {
                    warn!(route = %key, "Controller is gone, dropping resync");
                }
            }
        }
        Ok(Some(K::SOURCE_TYPE))
    }

    /// Writes listener status of every gateway of our class. Returns how many were written.
    async fn report_gateways(
        &self,
        base: &Snapshot,
        attached: &BTreeMap<(String, String, String), i32>,
    ) -> usize {
        let address = base.alb.spec.address.as_deref().unwrap_or_default();
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        let mut written = 0;
        for gateway in &base.gateways {
            let ns = gateway.namespace().unwrap_or_default();
            let name = gateway.name_any();
            let counts: BTreeMap<String, i32> = attached
                .iter()
                .filter(|((n, g, _), _)| *n == ns && *g == name)
                .map(|((_, _, listener), count)| (listener.clone(), *count))
                .collect();
            let reserved = &self.ctx.config.reserved_ports;
            let Some(status) = gateway_status(gateway, &counts, reserved, address, &now) else {
                continue;
            };
            let api: Api<Gateway> = Api::namespaced(self.ctx.client.clone(), &ns);
            let patch = json!({ "status": status });
            match api.patch_status(&name, &patch_params(), &Patch::Merge(&patch)).await {
                Ok(_) => written += 1,
                Err(e) => warn!(gateway = %name, namespace = %ns, error = %e, "Gateway status update failed"),
            }
        }
        written
    }
}

/// Sources of a listed kind that own something but no longer exist
pub fn over_handled(
    owners: &[SourceKey],
    existing: &BTreeSet<SourceKey>,
    listed: &[SourceType],
) -> Vec<SourceKey> {
    owners
        .iter()
        .filter(|k| listed.contains(&k.source_type) && !existing.contains(k))
        .cloned()
        .collect()
}
