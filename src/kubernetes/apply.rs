// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Writes a plan to the API server.
//!
//! Frontends first, then rule creations, then rule deletions. A rule that already exists on
//! create or is already gone on delete counts as applied. Any other failure stops the pass;
//! the next pass recomputes the plan from a fresh snapshot.
//!
//! Frontends may be shared with users and other controllers, so an existing frontend is only
//! ever merge-patched on the fields this controller owns.

use kube::{
    api::{DeleteParams, Patch, PatchParams, PostParams},
    Api, Client, ResourceExt,
};
use serde_json::{json, Value};
use tracing::{debug, info, instrument};

use crate::constants::CONTROLLER_NAME;
use crate::error::Result;
use crate::synth::{FrontendAction, Plan};
use crate::types::{Frontend, Rule};

/// Writes that went through
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Applied {
    pub frontends: usize,
    pub created_rules: usize,
    pub deleted_rules: usize,
}

impl Applied {
    pub fn total(&self) -> usize {
        self.frontends + self.created_rules + self.deleted_rules
    }
}

pub fn post_params() -> PostParams {
    PostParams {
        field_manager: Some(CONTROLLER_NAME.to_string()),
        ..Default::default()
    }
}

pub fn patch_params() -> PatchParams {
    PatchParams {
        field_manager: Some(CONTROLLER_NAME.to_string()),
        ..Default::default()
    }
}

/// Merge patch setting the default backend fields of a frontend. Cleared fields become null
/// so the API server drops them; every other field of the stored spec is left alone.
pub fn default_backend_patch(frontend: &Frontend) -> Value {
    let backend_protocol = Some(frontend.spec.backend_protocol.as_str()).filter(|p| !p.is_empty());
    json!({
        "spec": {
            "serviceGroup": frontend.spec.service_group,
            "source": frontend.spec.source,
            "backendProtocol": backend_protocol,
        }
    })
}

#[instrument(skip(client, plan), fields(frontends = plan.frontends.len(), create = plan.create_rules.len(), delete = plan.delete_rules.len()))]
pub async fn apply_plan(client: &Client, plan: &Plan) -> Result<Applied> {
    let mut applied = Applied::default();
    let pp = post_params();

    for action in &plan.frontends {
        let frontend = action.frontend();
        let api: Api<Frontend> = Api::namespaced(client.clone(), &namespace_of(frontend));
        match action {
            FrontendAction::Create(f) => match api.create(&pp, f).await {
                Ok(_) => info!(frontend = %f.name_any(), port = f.spec.port, "Created frontend"),
                Err(kube::Error::Api(err)) if err.code == 409 => {
                    debug!(frontend = %f.name_any(), "Frontend already exists")
                }
                Err(e) => return Err(e.into()),
            },
            FrontendAction::Update(f) => {
                let patch = default_backend_patch(f);
                api.patch(&f.name_any(), &patch_params(), &Patch::Merge(&patch))
                    .await?;
                info!(frontend = %f.name_any(), port = f.spec.port, "Updated frontend default backend");
            }
        }
        applied.frontends += 1;
    }

    for rule in &plan.create_rules {
        let api: Api<Rule> = Api::namespaced(client.clone(), &namespace_of(rule));
        match api.create(&pp, rule).await {
            Ok(_) => info!(rule = %rule.name_any(), url = %rule.spec.url, "Created rule"),
            Err(kube::Error::Api(err)) if err.code == 409 => {
                debug!(rule = %rule.name_any(), "Rule already exists")
            }
            Err(e) => return Err(e.into()),
        }
        applied.created_rules += 1;
    }

    for rule in &plan.delete_rules {
        let api: Api<Rule> = Api::namespaced(client.clone(), &namespace_of(rule));
        match api.delete(&rule.name_any(), &DeleteParams::default()).await {
            Ok(_) => info!(rule = %rule.name_any(), "Deleted rule"),
            Err(kube::Error::Api(err)) if err.code == 404 => {
                debug!(rule = %rule.name_any(), "Rule already gone")
            }
            Err(e) => return Err(e.into()),
        }
        applied.deleted_rules += 1;
    }

    Ok(applied)
}

fn namespace_of<K: ResourceExt>(obj: &K) -> String {
    obj.namespace().unwrap_or_default()
}
