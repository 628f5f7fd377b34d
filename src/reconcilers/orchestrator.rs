// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! One reconcile pass for a route object, shared by every route controller.
//!
//! A pass loads a snapshot, decides whether the object is handled, synthesizes and plans,
//! then applies the plan. A plan that writes frontends ends the pass and asks for a requeue,
//! so rules are only planned against frontends that are visible in a later snapshot.

use futures::stream::{self, BoxStream};
use futures::StreamExt;
use k8s_openapi::api::core::v1::Service;
use kube::{
    api::Patch,
    runtime::{
        controller::{self, Action},
        finalizer::{finalizer, Error as FinalizerError, Event},
        reflector::ObjectRef,
        watcher, Controller,
    },
    Api, Client, Resource, ResourceExt,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::retry::RetryTracker;
use crate::config::Config;
use crate::constants::requeue::FRONTEND_SETTLE_MILLIS;
use crate::error::{AlbError, ErrorKind, Result};
use crate::kubernetes::apply::{apply_plan, patch_params, Applied};
use crate::kubernetes::snapshot::{Snapshot, SnapshotLoader};
use crate::shutdown::cancelled;
use crate::synth::plan::{cleanup_plan, plan};
use crate::synth::{Plan, RouteSource};
use crate::types::{Gateway, SourceKey};

/// Shared state of all route controllers
pub struct Context {
    pub client: Client,
    pub config: Config,
    pub loader: SnapshotLoader,
    pub retries: RetryTracker,
}

impl Context {
    pub fn new(client: Client, config: Config) -> Self {
        let loader = SnapshotLoader::new(client.clone(), config.clone());
        Self {
            client,
            config,
            loader,
            retries: RetryTracker::new(),
        }
    }

    /// Snapshot of everything one pass over `route` reads
    pub async fn snapshot_for<K: RouteSource>(&self, route: &K) -> Result<Snapshot> {
        let base = self.loader.load_base(K::NEEDS_GATEWAYS).await?;
        self.loader
            .for_route(
                &base,
                &route.namespace().unwrap_or_default(),
                &route.referenced_services(),
            )
            .await
    }
}

/// What a pass intends to do with a route
#[derive(Debug, Clone)]
pub enum Intent {
    /// The route is not ours; whatever it produced earlier is removed
    Ignored { reason: String, plan: Plan },
    Converge(Plan),
}

impl Intent {
    pub fn plan(&self) -> &Plan {
        match self {
            Intent::Ignored { plan, .. } | Intent::Converge(plan) => plan,
        }
    }
}

/// Decides and plans a pass without writing anything
pub fn evaluate<K: RouteSource>(route: &K, snapshot: &Snapshot, config: &Config) -> Result<Intent> {
    let key = route.source_key();
    if let Err(reason) = route.should_handle(snapshot, config) {
        return Ok(Intent::Ignored {
            reason,
            plan: cleanup_plan(&key, snapshot),
        });
    }
    let expected = route.synthesize(snapshot, config)?;
    let plan = plan(&key, &expected, snapshot, config, |r| K::recognizes(r, config))?;
    Ok(Intent::Converge(plan))
}

/// Where a pass left the route
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Ignored,
    Converged,
    NeedsFrontend,
    Removed,
}

/// Result of one pass; the need for a second pass travels here, not through errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepOutcome {
    pub state: State,
    pub applied: Applied,
}

impl StepOutcome {
    pub fn requeue(&self) -> bool {
        self.state == State::NeedsFrontend
    }

    pub fn action(&self) -> Action {
        if self.requeue() {
            Action::requeue(Duration::from_millis(FRONTEND_SETTLE_MILLIS))
        } else {
            Action::await_change()
        }
    }
}

#[instrument(skip(route, snapshot, ctx), fields(route = %route.source_key()))]
async fn converge<K: RouteSource>(route: &K, snapshot: &Snapshot, ctx: &Context) -> Result<StepOutcome> {
    let (state, plan) = match evaluate(route, snapshot, &ctx.config)? {
        Intent::Ignored { reason, plan } => {
            info!(%reason, "Route not handled, removing its rules");
            (State::Ignored, plan)
        }
        Intent::Converge(plan) if plan.needs_second_pass() => (State::NeedsFrontend, plan),
        Intent::Converge(plan) => (State::Converged, plan),
    };
    for rule in &plan.delete_rules {
        debug!(rule = %route.describe_rule(rule, &ctx.config), "Rule no longer expected");
    }
    let applied = apply_plan(&ctx.client, &plan).await?;
    if applied.total() > 0 {
        info!(state = ?state, writes = applied.total(), "Applied plan");
    }
    if state != State::NeedsFrontend {
        write_status(route, snapshot, ctx).await;
    }
    Ok(StepOutcome { state, applied })
}

/// Merges the status of `route` when it changed. A failed write is logged and not retried.
pub async fn write_status<K: RouteSource>(route: &K, snapshot: &Snapshot, ctx: &Context) {
    let Some(patch) = route.status_patch(snapshot, &ctx.config) else {
        return;
    };
    let key = route.source_key();
    let api: Api<K> = Api::namespaced(ctx.client.clone(), &key.namespace);
    match api
        .patch_status(&route.name_any(), &patch_params(), &Patch::Merge(&patch))
        .await
    {
        Ok(_) => debug!(route = %key, "Updated status"),
        Err(e) => warn!(route = %key, error = %e, "Status update failed"),
    }
}

/// Removes what `key` produced: its rules, and the default backend of frontends it set up
#[instrument(skip(snapshot, ctx), fields(route = %key))]
pub async fn cleanup(key: &SourceKey, snapshot: &Snapshot, ctx: &Context) -> Result<StepOutcome> {
    let plan = cleanup_plan(key, snapshot);
    let applied = apply_plan(&ctx.client, &plan).await?;
    if applied.total() > 0 {
        info!(writes = applied.total(), "Cleaned up route");
    }
    ctx.retries.reset(&key.to_string());
    Ok(StepOutcome {
        state: State::Removed,
        applied,
    })
}

async fn remove_finalizer<K: RouteSource>(api: &Api<K>, route: &K, name: &str) -> Result<()> {
    let finalizers = route.finalizers();
    if !finalizers.iter().any(|f| f == name) {
        return Ok(());
    }
    let remaining: Vec<&String> = finalizers.iter().filter(|f| *f != name).collect();
    let patch = json!({
        "metadata": {
            "finalizers": remaining,
            "resourceVersion": route.resource_version(),
        }
    });
    api.patch(&route.name_any(), &patch_params(), &Patch::Merge(&patch))
        .await?;
    debug!(route = %route.source_key(), "Removed finalizer");
    Ok(())
}

pub async fn reconcile<K: RouteSource>(route: Arc<K>, ctx: Arc<Context>) -> Result<Action> {
    let key = route.source_key();
    let api: Api<K> = Api::namespaced(ctx.client.clone(), &key.namespace);
    let finalizer_name = ctx.config.finalizer();
    let deleting = route.meta().deletion_timestamp.is_some();

    let snapshot = match ctx.snapshot_for(&*route).await {
        Ok(s) => s,
        Err(AlbError::MissingLoadBalancer(alb)) if deleting => {
            // owner references already take frontends and rules with the load balancer
            info!(route = %key, %alb, "Load balancer gone, releasing route");
            remove_finalizer(&api, &*route, &finalizer_name).await?;
            ctx.retries.reset(&key.to_string());
            return Ok(Action::await_change());
        }
        Err(e) => return Err(e),
    };

    if !deleting {
        if let Err(reason) = route.should_handle(&snapshot, &ctx.config) {
            debug!(route = %key, %reason, "Route not handled");
            cleanup(&key, &snapshot, &ctx).await?;
            remove_finalizer(&api, &*route, &finalizer_name).await?;
            write_status(&*route, &snapshot, &ctx).await;
            return Ok(Action::await_change());
        }
    }

    let pass_ctx = ctx.clone();
    let action = finalizer(&api, &finalizer_name, route, move |event| async move {
        let outcome = match event {
            Event::Apply(route) => converge(&*route, &snapshot, &pass_ctx).await?,
            Event::Cleanup(route) => cleanup(&route.source_key(), &snapshot, &pass_ctx).await?,
        };
        Ok::<Action, AlbError>(outcome.action())
    })
    .await
    .map_err(|e| match e {
        FinalizerError::ApplyFailed(e) | FinalizerError::CleanupFailed(e) => e,
        other => AlbError::FinalizerError(other.to_string()),
    })?;

    ctx.retries.reset(&key.to_string());
    Ok(action)
}

pub fn error_policy<K: RouteSource>(route: Arc<K>, error: &AlbError, ctx: Arc<Context>) -> Action {
    let key = route.source_key();
    let delay = ctx.retries.next_delay(&key.to_string(), error.kind());
    match error.kind() {
        ErrorKind::Resolution => {
            warn!(route = %key, error = %error, retry_in = ?delay, "Route cannot be resolved yet")
        }
        _ => error!(route = %key, error = %error, retry_in = ?delay, "Reconciliation error"),
    }
    Action::requeue(delay)
}

fn resync_stream<K: RouteSource>(
    resync: Option<mpsc::Receiver<SourceKey>>,
) -> BoxStream<'static, ObjectRef<K>> {
    match resync {
        Some(rx) => stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|key| {
                let obj = ObjectRef::new(&key.name).within(&key.namespace);
                (obj, rx)
            })
        })
        .boxed(),
        None => stream::empty().boxed(),
    }
}

/// Runs the controller of one route kind until shutdown.
///
/// Besides the routes themselves it watches Services, requeueing the routes that reference
/// a changed Service, and Gateways for kinds that attach to them. Keys found drifted by the
/// resync sweeper arrive on `resync`. In-flight passes finish once `shutdown` is cancelled.
pub async fn run_controller<K: RouteSource>(
    ctx: Arc<Context>,
    resync: Option<mpsc::Receiver<SourceKey>>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let routes: Api<K> = Api::all(ctx.client.clone());
    let services: Api<Service> = Api::all(ctx.client.clone());

    let mut controller = Controller::new(routes, watcher::Config::default()).with_config(
        controller::Config::default().concurrency(ctx.config.workers),
    );

    let store = controller.store();
    controller = controller.watches(services, watcher::Config::default(), move |svc: Service| {
        let target = (svc.namespace().unwrap_or_default(), svc.name_any());
        store
            .state()
            .into_iter()
            .filter(|route| route.referenced_services().contains(&target))
            .map(|route| ObjectRef::from_obj(&*route))
            .collect::<Vec<_>>()
    });

    if K::NEEDS_GATEWAYS {
        let store = controller.store();
        let gateways: Api<Gateway> = Api::all(ctx.client.clone());
        controller = controller.watches(gateways, watcher::Config::default(), move |gw: Gateway| {
            let target = (gw.namespace().unwrap_or_default(), gw.name_any());
            store
                .state()
                .into_iter()
                .filter(|route| route.parent_gateways().contains(&target))
                .map(|route| ObjectRef::from_obj(&*route))
                .collect::<Vec<_>>()
        });
    }

    info!(kind = %K::kind(&()), "Starting route controller");
    controller
        .reconcile_on(resync_stream::<K>(resync))
        .graceful_shutdown_on(cancelled(shutdown))
        .run(reconcile::<K>, error_policy::<K>, ctx)
        .for_each(|res| async move {
            match res {
                Ok((obj, _)) => debug!("Reconciled {}/{}", obj.namespace.unwrap_or_default(), obj.name),
                Err(e) => debug!("Reconcile failed: {}", e),
            }
        })
        .await;

    info!(kind = %K::kind(&()), "Route controller stopped");
    Ok(())
}
