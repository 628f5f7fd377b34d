// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Ingress to frontends and rules.

use k8s_openapi::api::networking::v1::{HTTPIngressPath, Ingress, IngressServiceBackend};
use kube::ResourceExt;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use super::status::ingress_status;
use super::{
    alb_owns_project, build_rule, expected_frontend, need, resolve_port, service_group,
    set_default_backend, Expected, PortRef, RouteSource, RuleOrigin,
};
use crate::config::Config;
use crate::constants::{nginx, DEFAULT_PRIORITY, INGRESS_CLASS_ANNOTATION, VALID_BACKEND_PROTOCOLS};
use crate::dsl::{PathMatch, Predicate};
use crate::error::{AlbError, ErrorKind, Result};
use crate::kubernetes::snapshot::Snapshot;
use crate::types::{BackendService, Frontend, Protocol, Rule, RuleSpec, SourceKey, SourceType};

/// Rule directives read from ingress annotations
#[derive(Debug, Clone, Default, PartialEq)]
struct Directives {
    rewrite_target: String,
    enable_cors: bool,
    cors_allow_headers: String,
    cors_allow_origin: String,
    backend_protocol: String,
    redirect_url: String,
    redirect_code: i32,
    vhost: String,
}

fn directives(annotations: &BTreeMap<String, String>) -> Result<Directives> {
    let get = |k: &str| annotations.get(k).cloned().unwrap_or_default();

    let backend_protocol = get(nginx::BACKEND_PROTOCOL).to_lowercase();
    if !backend_protocol.is_empty() && !VALID_BACKEND_PROTOCOLS.contains(&backend_protocol.as_str())
    {
        return Err(AlbError::Validation(format!(
            "unsupported backend protocol {}",
            backend_protocol
        )));
    }

    let permanent = get(nginx::PERMANENT_REDIRECT);
    let temporal = get(nginx::TEMPORAL_REDIRECT);
    let (redirect_url, redirect_code) = match (permanent.is_empty(), temporal.is_empty()) {
        (false, false) => {
            return Err(AlbError::Validation(
                "permanent and temporal redirect cannot be used together".to_string(),
            ))
        }
        (false, true) => (permanent, 301),
        (true, false) => (temporal, 302),
        (true, true) => (String::new(), 0),
    };

    Ok(Directives {
        rewrite_target: get(nginx::REWRITE_TARGET),
        enable_cors: get(nginx::ENABLE_CORS) == "true",
        cors_allow_headers: get(nginx::CORS_ALLOW_HEADERS),
        cors_allow_origin: get(nginx::CORS_ALLOW_ORIGIN),
        backend_protocol,
        redirect_url,
        redirect_code,
        vhost: get(nginx::UPSTREAM_VHOST),
    })
}

fn port_ref(backend: &IngressServiceBackend) -> Result<PortRef> {
    let port = backend.port.as_ref();
    match (
        port.and_then(|p| p.number),
        port.and_then(|p| p.name.clone()),
    ) {
        (Some(n), _) => Ok(PortRef::Number(n)),
        (None, Some(name)) => Ok(PortRef::Name(name)),
        (None, None) => Err(AlbError::Validation(format!(
            "backend {} has no port",
            backend.name
        ))),
    }
}

fn path_match(path_type: &str) -> PathMatch {
    match path_type {
        "Exact" => PathMatch::Exact,
        "Prefix" => PathMatch::Prefix,
        _ => PathMatch::ImplementationSpecific,
    }
}

fn ingress_class(ingress: &Ingress) -> Option<String> {
    ingress
        .spec
        .as_ref()
        .and_then(|s| s.ingress_class_name.clone())
        .or_else(|| ingress.annotations().get(INGRESS_CLASS_ANNOTATION).cloned())
}

/// The ingress path a stored rule was synthesized from, through its index annotations
pub fn path_of_rule<'a>(
    ingress: &'a Ingress,
    rule: &Rule,
    config: &Config,
) -> Option<&'a HTTPIngressPath> {
    let (r, p) = rule_indices(rule, config)?;
    ingress
        .spec
        .as_ref()?
        .rules
        .as_ref()?
        .get(r)?
        .http
        .as_ref()?
        .paths
        .get(p)
}

fn rule_indices(rule: &Rule, config: &Config) -> Option<(usize, usize)> {
    let annotations = rule.metadata.annotations.as_ref()?;
    let r = annotations.get(&config.annotation_rule_index())?.parse().ok()?;
    let p = annotations.get(&config.annotation_path_index())?.parse().ok()?;
    Some((r, p))
}

struct PathContext<'a> {
    key: &'a SourceKey,
    frontend: &'a Frontend,
    rule_index: usize,
    path_index: usize,
    host: &'a str,
    path: &'a HTTPIngressPath,
    directives: &'a Result<Directives>,
    certs: &'a BTreeMap<String, String>,
}

fn rule_priority(ingress: &Ingress, config: &Config, rule_index: usize, path_index: usize) -> i64 {
    let key = config.annotation_ingress_priority(rule_index, path_index);
    match ingress.annotations().get(&key).map(|v| v.parse::<i64>()) {
        Some(Ok(p)) if p != 0 => p,
        Some(Err(e)) => {
            warn!(annotation = %key, error = %e, "Ignoring unparsable rule priority");
            DEFAULT_PRIORITY
        }
        _ => DEFAULT_PRIORITY,
    }
}

fn path_rule(
    ingress: &Ingress,
    snapshot: &Snapshot,
    config: &Config,
    ctx: PathContext<'_>,
) -> Result<Rule> {
    let directives = match ctx.directives {
        Ok(d) => d.clone(),
        Err(e) => return Err(AlbError::Validation(e.to_string())),
    };
    let backend = ctx.path.backend.service.as_ref().ok_or_else(|| {
        AlbError::Validation("path backend is not a service".to_string())
    })?;
    let namespace = ctx.key.namespace.as_str();
    let port = resolve_port(snapshot, namespace, &backend.name, &port_ref(backend)?, "TCP")?;

    let url = ctx.path.path.clone().unwrap_or_default();
    let predicate = Predicate::for_path(ctx.host, &url, path_match(&ctx.path.path_type));
    // rules on both frontends carry the host certificate
    let certificate_name = ctx.certs.get(ctx.host).cloned().unwrap_or_default();

    let spec = RuleSpec {
        domain: ctx.host.to_string(),
        url: url.clone(),
        dslx: predicate.to_dslx(),
        dsl: predicate.to_wire_string(),
        priority: rule_priority(ingress, config, ctx.rule_index, ctx.path_index),
        rewrite_target: directives.rewrite_target,
        rewrite_base: url,
        backend_protocol: directives.backend_protocol,
        certificate_name,
        enable_cors: directives.enable_cors,
        cors_allow_headers: directives.cors_allow_headers,
        cors_allow_origin: directives.cors_allow_origin,
        redirect_url: directives.redirect_url,
        redirect_code: directives.redirect_code,
        vhost: directives.vhost,
        description: format!(
            "{}/{}:{}:{}",
            namespace, ctx.key.name, ctx.frontend.spec.port, ctx.path_index
        ),
        service_group: Some(service_group(vec![BackendService {
            namespace: namespace.to_string(),
            name: backend.name.clone(),
            port,
            weight: 100,
        }])),
        source: None,
    };

    let annotations = BTreeMap::from([
        (config.annotation_rule_index(), ctx.rule_index.to_string()),
        (config.annotation_path_index(), ctx.path_index.to_string()),
        (
            config.annotation_source_version(),
            ingress.metadata.generation.unwrap_or_default().to_string(),
        ),
    ]);
    build_rule(
        snapshot,
        config,
        RuleOrigin {
            key: ctx.key,
            frontend: ctx.frontend,
            source_index: format!("{}-{}", ctx.rule_index, ctx.path_index),
            annotations,
        },
        spec,
    )
}

impl RouteSource for Ingress {
    const SOURCE_TYPE: SourceType = SourceType::Ingress;

    fn should_handle(&self, snapshot: &Snapshot, config: &Config) -> std::result::Result<(), String> {
        if let Some(class) = ingress_class(self) {
            if class != config.ingress_class {
                return Err(format!(
                    "ingress class {} is not {}",
                    class, config.ingress_class
                ));
            }
        }
        if !alb_owns_project(snapshot, config) {
            return Err(format!(
                "project {} is not served by {}",
                snapshot.project.as_deref().unwrap_or("<none>"),
                config.alb_name
            ));
        }
        Ok(())
    }

    fn synthesize(&self, snapshot: &Snapshot, config: &Config) -> Result<Expected> {
        let key = self.source_key();
        let need = need::classify(self, config);
        let certs = need::host_certificates(self, config);
        let directives = directives(self.annotations());
        debug!(route = %key, http = need.http, https = need.https, "Classified ingress");

        let mut expected = Expected::default();
        if need.http {
            let frontend =
                expected_frontend(snapshot, config, &key, config.http_port, Protocol::Http)?;
            expected.push_frontend(frontend);
        }
        if need.https {
            let mut frontend =
                expected_frontend(snapshot, config, &key, config.https_port, Protocol::Https)?;
            if let Some(cert) = &config.default_ssl_cert {
                frontend.spec.certificate_name = cert.replace('/', "_");
            }
            expected.push_frontend(frontend);
        }

        let Some(spec) = self.spec.as_ref() else {
            return Ok(expected);
        };

        let default_service = spec
            .default_backend
            .as_ref()
            .and_then(|b| b.service.as_ref());
        if let Some(backend) = default_service {
            let port = resolve_port(
                snapshot,
                &key.namespace,
                &backend.name,
                &port_ref(backend)?,
                "TCP",
            )?;
            let group = service_group(vec![BackendService {
                namespace: key.namespace.clone(),
                name: backend.name.clone(),
                port,
                weight: 100,
            }]);
            let backend_protocol = directives
                .as_ref()
                .map(|d| d.backend_protocol.clone())
                .unwrap_or_default();
            for frontend in expected.frontends.iter_mut() {
                set_default_backend(frontend, &key, group.clone(), &backend_protocol);
            }
        }

        let mut rules = Vec::new();
        for (rule_index, rule) in spec.rules.iter().flatten().enumerate() {
            let host = rule.host.as_deref().unwrap_or_default().to_lowercase();
            let Some(http) = rule.http.as_ref() else {
                debug!(route = %key, host = %host, "Ingress rule without paths");
                continue;
            };
            for (path_index, path) in http.paths.iter().enumerate() {
                for frontend in &expected.frontends {
                    let ctx = PathContext {
                        key: &key,
                        frontend,
                        rule_index,
                        path_index,
                        host: &host,
                        path,
                        directives: &directives,
                        certs: &certs,
                    };
                    match path_rule(self, snapshot, config, ctx) {
                        Ok(rule) => rules.push(rule),
                        Err(e) if e.kind() == ErrorKind::Validation => warn!(
                            route = %key,
                            rule_index,
                            path_index,
                            error = %e,
                            "Skipping ingress path"
                        ),
                        Err(e) => return Err(e),
                    }
                }
            }
        }
        expected.rules = rules;
        Ok(expected)
    }

    fn referenced_services(&self) -> Vec<(String, String)> {
        let namespace = self.namespace().unwrap_or_default();
        let Some(spec) = self.spec.as_ref() else {
            return Vec::new();
        };
        let paths = spec
            .rules
            .iter()
            .flatten()
            .filter_map(|r| r.http.as_ref())
            .flat_map(|h| h.paths.iter())
            .map(|p| &p.backend);
        let mut services: Vec<(String, String)> = spec
            .default_backend
            .iter()
            .chain(paths)
            .filter_map(|b| b.service.as_ref())
            .map(|s| (namespace.clone(), s.name.clone()))
            .collect();
        services.sort();
        services.dedup();
        services
    }

    fn recognizes(rule: &Rule, config: &Config) -> bool {
        rule_indices(rule, config).is_some()
    }

    fn status_patch(&self, snapshot: &Snapshot, config: &Config) -> Option<Value> {
        self.should_handle(snapshot, config).ok()?;
        let address = snapshot.alb.spec.address.as_deref().unwrap_or_default();
        let need = need::classify(self, config);
        let ports: Vec<i32> = [(need.http, config.http_port), (need.https, config.https_port)]
            .into_iter()
            .filter(|(needed, port)| *needed && *port > 0)
            .map(|(_, port)| port)
            .collect();
        let status = ingress_status(self.status.as_ref(), address, &ports)?;
        Some(json!({ "status": status }))
    }

    fn describe_rule(&self, rule: &Rule, config: &Config) -> String {
        match path_of_rule(self, rule, config) {
            Some(path) => format!(
                "{} path {}",
                rule.name_any(),
                path.path.as_deref().unwrap_or("<none>")
            ),
            None => format!("{} (path no longer present)", rule.name_any()),
        }
    }
}
