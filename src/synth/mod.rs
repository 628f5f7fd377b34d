// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Pure synthesis of expected frontends and rules from routing intents.

pub mod gateway;
pub mod identity;
pub mod ingress;
pub mod need;
pub mod plan;
pub mod status;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::NamespaceResourceScope;
use kube::{Resource, ResourceExt};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::BTreeMap;
use std::fmt::Debug;

use crate::config::Config;
use crate::constants::ALL_PROJECTS;
use crate::error::{AlbError, Result};
use crate::kubernetes::snapshot::Snapshot;
use crate::types::{
    BackendService, Frontend, FrontendSpec, Protocol, Rule, RuleSpec, ServiceGroup, SourceKey,
    SourceType,
};

pub use plan::{FrontendAction, Plan};

/// Frontends and rules one route object should produce
#[derive(Debug, Clone, Default)]
pub struct Expected {
    pub frontends: Vec<Frontend>,
    pub rules: Vec<Rule>,
}

impl Expected {
    /// Adds a frontend, replacing an earlier one on the same port
    pub fn push_frontend(&mut self, frontend: Frontend) {
        self.frontends.retain(|f| f.spec.port != frontend.spec.port);
        self.frontends.push(frontend);
    }
}

/// A routing intent the controller turns into frontends and rules
pub trait RouteSource:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Debug
    + DeserializeOwned
    + Serialize
    + Send
    + Sync
    + 'static
{
    const SOURCE_TYPE: SourceType;
    /// Whether synthesis reads gateways from the snapshot
    const NEEDS_GATEWAYS: bool = false;

    fn source_key(&self) -> SourceKey {
        SourceKey::new(
            Self::SOURCE_TYPE,
            &self.namespace().unwrap_or_default(),
            &self.name_any(),
        )
    }

    /// Ok when this controller should handle the object, else the reason it is ignored
    fn should_handle(&self, snapshot: &Snapshot, config: &Config) -> std::result::Result<(), String>;

    fn synthesize(&self, snapshot: &Snapshot, config: &Config) -> Result<Expected>;

    /// Services the object routes to, as (namespace, name)
    fn referenced_services(&self) -> Vec<(String, String)>;

    /// Gateways the object attaches to, as (namespace, name)
    fn parent_gateways(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    /// Whether a stored rule carries the bookkeeping this source writes.
    /// Rules that do not are never touched by reconciliation.
    fn recognizes(rule: &Rule, config: &Config) -> bool;

    /// Gateway listeners the object is attached to, as (namespace, gateway, listener)
    fn attached_listeners(&self, _snapshot: &Snapshot, _config: &Config) -> Vec<(String, String, String)> {
        Vec::new()
    }

    /// Merge patch for the object's status, or None when the status is current
    fn status_patch(&self, _snapshot: &Snapshot, _config: &Config) -> Option<serde_json::Value> {
        None
    }

    /// Human readable origin of a stored rule, for logs
    fn describe_rule(&self, rule: &Rule, config: &Config) -> String {
        let index = rule
            .labels()
            .get(&config.label_source_index())
            .cloned()
            .unwrap_or_default();
        format!("{} index {}", rule.name_any(), index)
    }
}

/// A backend port as referenced by a route
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortRef {
    Number(i32),
    Name(String),
}

impl std::fmt::Display for PortRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PortRef::Number(n) => write!(f, "{}", n),
            PortRef::Name(n) => f.write_str(n),
        }
    }
}

/// Resolves a backend port against the Service in the snapshot.
/// Named ports are looked up among the service ports of the given protocol.
pub fn resolve_port(
    snapshot: &Snapshot,
    namespace: &str,
    name: &str,
    port: &PortRef,
    protocol: &str,
) -> Result<i32> {
    let unresolved = || AlbError::UnresolvedPort {
        namespace: namespace.to_string(),
        name: name.to_string(),
        port: port.to_string(),
    };
    let service = snapshot.service(namespace, name).ok_or_else(unresolved)?;
    let ports = service
        .spec
        .as_ref()
        .and_then(|s| s.ports.as_ref())
        .ok_or_else(unresolved)?;
    let found = ports.iter().find(|p| {
        let same_protocol = p.protocol.as_deref().unwrap_or("TCP") == protocol;
        match port {
            PortRef::Number(n) => p.port == *n && same_protocol,
            PortRef::Name(n) => p.name.as_deref() == Some(n.as_str()) && same_protocol,
        }
    });
    found.map(|p| p.port).ok_or_else(unresolved)
}

/// Scales weights to sum to 100, remainder to the first entries. All-zero weights split evenly.
pub fn normalize_weights(weights: &[i32]) -> Vec<i32> {
    if weights.is_empty() {
        return Vec::new();
    }
    let clamped: Vec<i64> = weights.iter().map(|w| i64::from((*w).max(0))).collect();
    let total: i64 = clamped.iter().sum();
    let shares: Vec<i64> = if total == 0 {
        vec![1; weights.len()]
    } else {
        clamped
    };
    let total: i64 = shares.iter().sum();

    let mut out: Vec<i64> = shares.iter().map(|w| w * 100 / total).collect();
    let mut remainder = 100 - out.iter().sum::<i64>();
    for (slot, share) in out.iter_mut().zip(&shares) {
        if remainder == 0 {
            break;
        }
        if *share > 0 {
            *slot += 1;
            remainder -= 1;
        }
    }
    out.into_iter().map(|w| w as i32).collect()
}

pub fn service_group(services: Vec<BackendService>) -> ServiceGroup {
    ServiceGroup {
        services,
        ..Default::default()
    }
}

pub fn frontend_name(config: &Config, port: i32) -> String {
    format!("{}-{:05}", config.alb_name, port)
}

/// Frontend a route needs on a port: the observed one when there is one, else a new one
/// owned by the load balancer and tagged with the route as its source.
pub fn expected_frontend(
    snapshot: &Snapshot,
    config: &Config,
    key: &SourceKey,
    port: i32,
    protocol: Protocol,
) -> Result<Frontend> {
    if let Some(observed) = snapshot.frontend_by_port(port) {
        if observed.spec.protocol != protocol {
            return Err(AlbError::PortConflict {
                port,
                existing: observed.spec.protocol.to_string(),
                wanted: protocol.to_string(),
            });
        }
        return Ok(observed.clone());
    }

    let mut frontend = Frontend::new(
        &frontend_name(config, port),
        FrontendSpec {
            port,
            protocol,
            certificate_name: String::new(),
            backend_protocol: String::new(),
            service_group: None,
            source: Some(key.to_source()),
        },
    );
    frontend.metadata.namespace = Some(config.alb_namespace.clone());
    frontend.metadata.labels = Some(BTreeMap::from([(
        config.label_alb_name(),
        config.alb_name.clone(),
    )]));
    frontend.metadata.owner_references = snapshot
        .alb
        .controller_owner_ref(&())
        .map(|owner| vec![owner]);
    Ok(frontend)
}

/// Points a frontend's default backend at the route
pub fn set_default_backend(
    frontend: &mut Frontend,
    key: &SourceKey,
    group: ServiceGroup,
    backend_protocol: &str,
) {
    frontend.spec.service_group = Some(group);
    frontend.spec.backend_protocol = backend_protocol.to_string();
    frontend.spec.source = Some(key.to_source());
}

fn cut(value: &str, size: usize) -> String {
    value.chars().take(size).collect()
}

/// Bookkeeping of one synthesized rule
pub struct RuleOrigin<'a> {
    pub key: &'a SourceKey,
    pub frontend: &'a Frontend,
    /// `<rule>-<path>` for ingresses, `<listener>-<rule>-<match>` for gateway routes
    pub source_index: String,
    pub annotations: BTreeMap<String, String>,
}

/// Wraps a rule spec with labels, annotations, owner and a content-derived name
pub fn build_rule(
    snapshot: &Snapshot,
    config: &Config,
    origin: RuleOrigin<'_>,
    mut spec: RuleSpec,
) -> Result<Rule> {
    let frontend_name = origin.frontend.name_any();
    spec.source = Some(origin.key.to_source());

    let mut labels = BTreeMap::from([
        (config.label_alb_name(), config.alb_name.clone()),
        (config.label_frontend(), frontend_name.clone()),
        (
            config.label_source_type(),
            origin.key.source_type.as_str().to_string(),
        ),
        (config.label_source_name(), cut(&origin.key.name, 63)),
        (config.label_source_ns(), cut(&origin.key.namespace, 63)),
        (config.label_source_index(), origin.source_index),
        (config.label_source_hash(), identity::source_hash(origin.key)),
    ]);
    if let Some(project) = &snapshot.project {
        labels.insert(config.label_project(), project.clone());
    }

    let mut rule = Rule {
        metadata: ObjectMeta {
            namespace: origin.frontend.namespace(),
            labels: Some(labels),
            annotations: Some(origin.annotations),
            owner_references: origin
                .frontend
                .controller_owner_ref(&())
                .map(|owner| vec![owner]),
            ..Default::default()
        },
        spec,
    };
    let hash = identity::rule_hash(&rule, config)?;
    rule.metadata.name = Some(format!("{}-{}", frontend_name, &hash[..8]));
    Ok(rule)
}

/// Whether the load balancer serves the project of the route's namespace.
/// A load balancer without project labels serves every project.
pub fn alb_owns_project(snapshot: &Snapshot, config: &Config) -> bool {
    let prefix = config.project_label_prefix();
    let legacy = format!("{}name", prefix);
    let owned: Vec<&str> = snapshot
        .alb
        .labels()
        .iter()
        .filter_map(|(k, v)| {
            if *k == legacy {
                Some(v.as_str())
            } else if v == "true" {
                k.strip_prefix(&prefix)
            } else {
                None
            }
        })
        .collect();

    if owned.is_empty() || owned.contains(&ALL_PROJECTS) {
        return true;
    }
    snapshot
        .project
        .as_deref()
        .is_some_and(|project| owned.contains(&project))
}
