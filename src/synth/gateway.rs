// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Gateway-API routes to frontends and rules.
//!
//! A route attaches to listeners of gateways of the configured class through its parentRefs.
//! Every listener gets a frontend on its port; every route rule (and every match of an
//! HTTPRoute rule) becomes one rule under that frontend.

use k8s_openapi::chrono::{SecondsFormat, Utc};
use kube::{Resource, ResourceExt};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use super::status::{route_status, ParentVerdict, REASON_READY, REASON_RESERVED_PORT};
use super::{
    alb_owns_project, build_rule, expected_frontend, normalize_weights, resolve_port,
    service_group, Expected, PortRef, RouteSource, RuleOrigin,
};
use crate::config::Config;
use crate::constants::DEFAULT_PRIORITY;
use crate::dsl::{Condition, Op, PathMatch, Predicate, Term, TermType};
use crate::error::{AlbError, ErrorKind, Result};
use crate::kubernetes::snapshot::Snapshot;
use crate::types::gateway::{
    BackendRef, HTTPRouteMatch, HTTPValueMatch, L4RouteRule, Listener, ParentRef, RouteStatus,
};
use crate::types::{
    BackendService, Frontend, Gateway, HTTPRoute, Protocol, Rule, RuleSpec, ServiceGroup,
    SourceKey, SourceType, TCPRoute, TLSRoute, UDPRoute,
};

/// A listener a route is attached to, with the hosts the route serves there
struct Attachment<'a> {
    gateway: &'a Gateway,
    listener: &'a Listener,
    hosts: Vec<String>,
}

/// Listeners a route attached to, and how each of its parentRefs was treated
struct Attached<'a> {
    listeners: Vec<Attachment<'a>>,
    parents: Vec<ParentVerdict>,
}

/// What a route asks of the listeners it names
struct RouteTarget<'a> {
    namespace: &'a str,
    parent_refs: &'a [ParentRef],
    protocols: &'a [&'a str],
    hostnames: &'a [String],
}

fn attach<'a>(snapshot: &'a Snapshot, config: &Config, target: &RouteTarget<'_>) -> Attached<'a> {
    let mut attached = Attached {
        listeners: Vec::new(),
        parents: Vec::new(),
    };
    for parent in target.parent_refs {
        if parent.kind.as_deref().is_some_and(|k| k != "Gateway") {
            continue;
        }
        let namespace = parent.namespace.as_deref().unwrap_or(target.namespace);
        let gateways: Vec<&Gateway> = snapshot
            .gateways
            .iter()
            .filter(|g| g.name_any() == parent.name && g.namespace().as_deref() == Some(namespace))
            .collect();
        if gateways.is_empty() {
            continue;
        }

        let mut verdict = ParentVerdict::refused(
            parent,
            REASON_READY,
            "no listener of the gateway matches the parent reference",
        );
        // accepted, then reserved port, then hostname, then no match
        let mut rank = 0;
        for gateway in gateways {
            for listener in &gateway.spec.listeners {
                let section_ok = parent
                    .section_name
                    .as_deref()
                    .map_or(true, |s| s == listener.name);
                let port_ok = parent.port.map_or(true, |p| p == listener.port);
                let protocol_ok = target
                    .protocols
                    .contains(&listener.protocol.to_uppercase().as_str());
                if !(section_ok && port_ok && protocol_ok) {
                    continue;
                }
                if config.reserved_ports.contains(&listener.port) {
                    debug!(listener = %listener.name, port = listener.port, "Listener uses a reserved port");
                    if rank < 2 {
                        rank = 2;
                        verdict = ParentVerdict::refused(
                            parent,
                            REASON_RESERVED_PORT,
                            format!("{:?} are reserved ports", config.reserved_ports),
                        );
                    }
                    continue;
                }
                let Some(hosts) = effective_hosts(listener.hostname.as_deref(), target.hostnames) else {
                    debug!(listener = %listener.name, "No intersection hostname");
                    if rank < 1 {
                        rank = 1;
                        verdict = ParentVerdict::refused(parent, REASON_READY, "no intersection hostname");
                    }
                    continue;
                };
                rank = 3;
                verdict = ParentVerdict::accepted(parent);
                let seen = attached.listeners.iter().any(|a| {
                    std::ptr::eq(a.gateway, gateway) && a.listener.name == listener.name
                });
                if !seen {
                    attached.listeners.push(Attachment {
                        gateway,
                        listener,
                        hosts,
                    });
                }
            }
        }
        attached.parents.push(verdict);
    }
    attached
}

fn listener_keys(attached: Attached<'_>) -> Vec<(String, String, String)> {
    attached
        .listeners
        .into_iter()
        .map(|a| {
            (
                a.gateway.namespace().unwrap_or_default(),
                a.gateway.name_any(),
                a.listener.name.clone(),
            )
        })
        .collect()
}

fn listener_protocol(listener: &Listener) -> Option<Protocol> {
    match listener.protocol.to_uppercase().as_str() {
        "HTTP" => Some(Protocol::Http),
        "HTTPS" => Some(Protocol::Https),
        "TCP" | "TLS" => Some(Protocol::Tcp),
        "UDP" => Some(Protocol::Udp),
        _ => None,
    }
}

/// Frontend for a listener, added to `expected`. None when the port is taken by another protocol.
fn listener_frontend(
    snapshot: &Snapshot,
    config: &Config,
    key: &SourceKey,
    attachment: &Attachment<'_>,
    expected: &mut Expected,
) -> Result<Option<Frontend>> {
    let listener = attachment.listener;
    let Some(protocol) = listener_protocol(listener) else {
        warn!(route = %key, listener = %listener.name, protocol = %listener.protocol, "Unsupported listener protocol");
        return Ok(None);
    };
    let planned = expected
        .frontends
        .iter()
        .find(|f| f.spec.port == listener.port && f.spec.protocol == protocol);
    if let Some(frontend) = planned {
        return Ok(Some(frontend.clone()));
    }
    match expected_frontend(snapshot, config, key, listener.port, protocol) {
        Ok(frontend) => {
            expected.push_frontend(frontend.clone());
            Ok(Some(frontend))
        }
        Err(e @ AlbError::PortConflict { .. }) => {
            warn!(route = %key, listener = %listener.name, error = %e, "Skipping listener");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Certificate of an HTTPS listener as `ns_name`
fn listener_certificate(attachment: &Attachment<'_>) -> String {
    let gateway_ns = attachment.gateway.namespace().unwrap_or_default();
    attachment
        .listener
        .tls
        .as_ref()
        .and_then(|tls| tls.certificate_refs.first())
        .filter(|r| matches!(r.kind.as_deref(), None | Some("Secret")))
        .map(|r| {
            let ns = r.namespace.clone().unwrap_or(gateway_ns);
            format!("{}_{}", ns, r.name)
        })
        .unwrap_or_default()
}

fn intersect_host(listener: &str, route: &str) -> Option<String> {
    if listener == route {
        return Some(route.to_string());
    }
    if let Some(suffix) = listener.strip_prefix('*') {
        if route.ends_with(suffix) {
            return Some(route.to_string());
        }
    }
    if let Some(suffix) = route.strip_prefix('*') {
        if listener.ends_with(suffix) {
            return Some(listener.to_string());
        }
    }
    None
}

/// Hosts a route serves on a listener, or None when the route hostnames miss the listener
fn effective_hosts(listener: Option<&str>, route: &[String]) -> Option<Vec<String>> {
    let route: Vec<String> = route.iter().map(|h| h.to_lowercase()).collect();
    let listener = listener.filter(|h| !h.is_empty()).map(str::to_lowercase);
    let Some(listener) = listener else {
        return Some(route);
    };
    if route.is_empty() {
        return Some(vec![listener]);
    }
    let mut hosts: Vec<String> = route
        .iter()
        .filter_map(|h| intersect_host(&listener, h))
        .collect();
    hosts.dedup();
    Some(hosts).filter(|h| !h.is_empty())
}

/// Weighted service group of a route rule; backends are resolved against their Service
fn backend_group(
    snapshot: &Snapshot,
    route_namespace: &str,
    refs: &[BackendRef],
    protocol: &str,
) -> Result<ServiceGroup> {
    let mut services = Vec::new();
    let mut weights = Vec::new();
    for backend in refs {
        if !backend.is_service() {
            debug!(backend = %backend.name, "Ignoring non-service backend");
            continue;
        }
        let namespace = backend.namespace.as_deref().unwrap_or(route_namespace);
        let port = backend.port.ok_or_else(|| {
            AlbError::Validation(format!("backend {} has no port", backend.name))
        })?;
        let port = resolve_port(snapshot, namespace, &backend.name, &PortRef::Number(port), protocol)?;
        services.push(BackendService {
            namespace: namespace.to_string(),
            name: backend.name.clone(),
            port,
            weight: 0,
        });
        weights.push(backend.weight.unwrap_or(1));
    }
    if services.is_empty() {
        return Err(AlbError::Validation("rule has no service backends".to_string()));
    }
    for (service, weight) in services.iter_mut().zip(normalize_weights(&weights)) {
        service.weight = weight;
    }
    Ok(service_group(services))
}

fn referenced<'a>(
    route_namespace: &str,
    refs: impl Iterator<Item = &'a BackendRef>,
) -> Vec<(String, String)> {
    let mut services: Vec<(String, String)> = refs
        .filter(|b| b.is_service())
        .map(|b| {
            (
                b.namespace.clone().unwrap_or_else(|| route_namespace.to_string()),
                b.name.clone(),
            )
        })
        .collect();
    services.sort();
    services.dedup();
    services
}

fn parents(route_namespace: &str, parent_refs: &[ParentRef]) -> Vec<(String, String)> {
    let mut gateways: Vec<(String, String)> = parent_refs
        .iter()
        .map(|p| {
            (
                p.namespace.clone().unwrap_or_else(|| route_namespace.to_string()),
                p.name.clone(),
            )
        })
        .collect();
    gateways.sort();
    gateways.dedup();
    gateways
}

fn value_op(m: &HTTPValueMatch) -> Result<Op> {
    match m.match_type.as_deref() {
        None | Some("Exact") => Ok(Op::Eq),
        Some("RegularExpression") => Ok(Op::Regex),
        Some(other) => Err(AlbError::Validation(format!(
            "unsupported match type {} for {}",
            other, m.name
        ))),
    }
}

/// Predicate of one HTTPRoute match: URL, HOST, headers, query params, then method
fn http_predicate(m: &HTTPRouteMatch, hosts: &[String]) -> Result<(String, Predicate)> {
    let (kind, url) = match &m.path {
        None => (PathMatch::Prefix, "/".to_string()),
        Some(path) => {
            let kind = match path.match_type.as_deref() {
                None | Some("PathPrefix") => PathMatch::Prefix,
                Some("Exact") => PathMatch::Exact,
                Some("RegularExpression") => PathMatch::Regex,
                Some(other) => {
                    return Err(AlbError::Validation(format!(
                        "unsupported path match type {}",
                        other
                    )))
                }
            };
            (kind, path.value.clone().unwrap_or_else(|| "/".to_string()))
        }
    };

    let mut predicate = Predicate::new().with_url(&url, kind).with_hosts(hosts);
    for header in &m.headers {
        predicate = predicate.with_term(Term::keyed(
            TermType::Header,
            &header.name,
            vec![Condition::new(value_op(header)?, header.value.as_str())],
        ));
    }
    for param in &m.query_params {
        predicate = predicate.with_term(Term::keyed(
            TermType::Param,
            &param.name,
            vec![Condition::new(value_op(param)?, param.value.as_str())],
        ));
    }
    if let Some(method) = &m.method {
        predicate = predicate.with_term(Term::new(
            TermType::Method,
            vec![Condition::new(Op::Eq, method.to_uppercase())],
        ));
    }
    Ok((url, predicate))
}

fn route_priority<K: Resource>(
    route: &K,
    config: &Config,
    rule_index: usize,
    match_index: usize,
    predicate: &Predicate,
) -> i64 {
    let key = config.annotation_gateway_priority(rule_index, match_index);
    match route.annotations().get(&key).map(|v| v.parse::<i64>()) {
        Some(Ok(p)) if p != 0 => p,
        Some(Err(e)) => {
            warn!(annotation = %key, error = %e, "Ignoring unparsable rule priority");
            predicate.complexity()
        }
        _ => predicate.complexity(),
    }
}

fn version_annotations<K: Resource>(route: &K, config: &Config) -> BTreeMap<String, String> {
    BTreeMap::from([(
        config.annotation_source_version(),
        route.meta().generation.unwrap_or_default().to_string(),
    )])
}

/// Handled when the route reaches a listener of our gateways and its project is served
fn route_should_handle(
    snapshot: &Snapshot,
    config: &Config,
    attached: usize,
) -> std::result::Result<(), String> {
    if attached == 0 {
        return Err(format!(
            "no listener of gateway class {} accepts the route",
            config.gateway_class
        ));
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

/// Parent status of a route, merged over `current`. Listeners of an unserved project are refused.
fn route_status_patch<K: Resource>(
    route: &K,
    current: Option<&RouteStatus>,
    snapshot: &Snapshot,
    config: &Config,
    target: &RouteTarget<'_>,
) -> Option<Value> {
    let mut parents = attach(snapshot, config, target).parents;
    if !alb_owns_project(snapshot, config) {
        for verdict in parents.iter_mut().filter(|v| v.accepted) {
            let refused = ParentVerdict::refused(
                &verdict.parent,
                REASON_READY,
                format!("project is not served by {}", config.alb_name),
            );
            *verdict = refused;
        }
    }
    let now = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    let status = route_status(
        current,
        &parents,
        &config.gateway_controller_name(),
        route.meta().generation,
        &now,
    )?;
    Some(json!({ "status": status }))
}

fn has_source_index(rule: &Rule, config: &Config) -> bool {
    rule.labels()
        .get(&config.label_source_index())
        .is_some_and(|v| !v.is_empty())
}

fn skip_or_fail<T>(key: &SourceKey, what: &str, result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(v) => Ok(Some(v)),
        Err(e) if e.kind() == ErrorKind::Validation => {
            warn!(route = %key, at = %what, error = %e, "Skipping route rule");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

const HTTP_LISTENERS: &[&str] = &["HTTP", "HTTPS"];

impl RouteSource for HTTPRoute {
    const SOURCE_TYPE: SourceType = SourceType::HttpRoute;
    const NEEDS_GATEWAYS: bool = true;

    fn should_handle(&self, snapshot: &Snapshot, config: &Config) -> std::result::Result<(), String> {
        let attached = attach(snapshot, config, &self.target()).listeners.len();
        route_should_handle(snapshot, config, attached)
    }

    fn synthesize(&self, snapshot: &Snapshot, config: &Config) -> Result<Expected> {
        let key = self.source_key();
        let ns = key.namespace.clone();
        let mut expected = Expected::default();
        let mut rules = Vec::new();

        for attachment in attach(snapshot, config, &self.target()).listeners {
            let Some(frontend) = listener_frontend(snapshot, config, &key, &attachment, &mut expected)? else {
                continue;
            };
            let listener = attachment.listener;
            let certificate_name = match frontend.spec.protocol {
                Protocol::Https => listener_certificate(&attachment),
                _ => String::new(),
            };
            let hosts = &attachment.hosts;

            for (rule_index, route_rule) in self.spec.rules.iter().enumerate() {
                let at = format!("{}-{}", listener.name, rule_index);
                let group = backend_group(snapshot, &ns, &route_rule.backend_refs, "TCP");
                let Some(group) = skip_or_fail(&key, &at, group)? else {
                    continue;
                };
                let matches = if route_rule.matches.is_empty() {
                    vec![HTTPRouteMatch::default()]
                } else {
                    route_rule.matches.clone()
                };
                for (match_index, m) in matches.iter().enumerate() {
                    let source_index = format!("{}-{}", at, match_index);
                    let Some((url, predicate)) = skip_or_fail(&key, &source_index, http_predicate(m, hosts))? else {
                        continue;
                    };
                    let spec = RuleSpec {
                        domain: listener.hostname.clone().unwrap_or_default(),
                        url,
                        dslx: predicate.to_dslx(),
                        dsl: predicate.to_wire_string(),
                        priority: route_priority(self, config, rule_index, match_index, &predicate),
                        certificate_name: certificate_name.clone(),
                        description: format!("{}:{}:{}", key, listener.port, source_index),
                        service_group: Some(group.clone()),
                        ..Default::default()
                    };
                    let origin = RuleOrigin {
                        key: &key,
                        frontend: &frontend,
                        source_index,
                        annotations: version_annotations(self, config),
                    };
                    rules.push(build_rule(snapshot, config, origin, spec)?);
                }
            }
        }
        expected.rules = rules;
        Ok(expected)
    }

    fn referenced_services(&self) -> Vec<(String, String)> {
        let ns = self.namespace().unwrap_or_default();
        referenced(&ns, self.spec.rules.iter().flat_map(|r| r.backend_refs.iter()))
    }

    fn parent_gateways(&self) -> Vec<(String, String)> {
        parents(&self.namespace().unwrap_or_default(), &self.spec.parent_refs)
    }

    fn recognizes(rule: &Rule, config: &Config) -> bool {
        has_source_index(rule, config)
    }

    fn attached_listeners(&self, snapshot: &Snapshot, config: &Config) -> Vec<(String, String, String)> {
        listener_keys(attach(snapshot, config, &self.target()))
    }

    fn status_patch(&self, snapshot: &Snapshot, config: &Config) -> Option<Value> {
        route_status_patch(self, self.status.as_ref(), snapshot, config, &self.target())
    }
}

impl HTTPRoute {
    fn target(&self) -> RouteTarget<'_> {
        RouteTarget {
            namespace: self.metadata.namespace.as_deref().unwrap_or_default(),
            parent_refs: &self.spec.parent_refs,
            protocols: HTTP_LISTENERS,
            hostnames: &self.spec.hostnames,
        }
    }
}

/// Inputs shared by TCP, UDP and TLS routes
struct L4Route<'a> {
    parent_refs: &'a [ParentRef],
    hostnames: &'a [String],
    rules: &'a [L4RouteRule],
    listener_protocol: &'a str,
    /// Protocol of the backend service ports
    backend_protocol: &'a str,
}

impl L4Route<'_> {
    fn target<'a>(&'a self, namespace: &'a str) -> RouteTarget<'a> {
        RouteTarget {
            namespace,
            parent_refs: self.parent_refs,
            protocols: std::slice::from_ref(&self.listener_protocol),
            hostnames: self.hostnames,
        }
    }
}

fn l4_should_handle<K: RouteSource>(
    route: &K,
    l4: &L4Route<'_>,
    snapshot: &Snapshot,
    config: &Config,
) -> std::result::Result<(), String> {
    let ns = route.namespace().unwrap_or_default();
    let attached = attach(snapshot, config, &l4.target(&ns)).listeners.len();
    route_should_handle(snapshot, config, attached)
}

fn l4_synthesize<K: RouteSource>(
    route: &K,
    l4: &L4Route<'_>,
    snapshot: &Snapshot,
    config: &Config,
) -> Result<Expected> {
    let key = route.source_key();
    let ns = key.namespace.clone();
    let mut expected = Expected::default();
    let mut rules = Vec::new();

    for attachment in attach(snapshot, config, &l4.target(&ns)).listeners {
        let Some(frontend) = listener_frontend(snapshot, config, &key, &attachment, &mut expected)? else {
            continue;
        };
        let listener = attachment.listener;
        // without route hostnames an L4 rule matches every connection on the port
        let hosts = if l4.hostnames.is_empty() {
            Vec::new()
        } else {
            attachment.hosts.clone()
        };
        for (rule_index, route_rule) in l4.rules.iter().enumerate() {
            let source_index = format!("{}-{}-0", listener.name, rule_index);
            let group = backend_group(snapshot, &ns, &route_rule.backend_refs, l4.backend_protocol);
            let Some(group) = skip_or_fail(&key, &source_index, group)? else {
                continue;
            };
            let predicate = Predicate::new().with_hosts(&hosts);
            let spec = RuleSpec {
                dslx: predicate.to_dslx(),
                dsl: predicate.to_wire_string(),
                priority: DEFAULT_PRIORITY,
                description: format!("{}:{}:{}", key, listener.port, source_index),
                service_group: Some(group),
                ..Default::default()
            };
            let origin = RuleOrigin {
                key: &key,
                frontend: &frontend,
                source_index,
                annotations: version_annotations(route, config),
            };
            rules.push(build_rule(snapshot, config, origin, spec)?);
        }
    }
    expected.rules = rules;
    Ok(expected)
}

impl TCPRoute {
    fn l4(&self) -> L4Route<'_> {
        L4Route {
            parent_refs: &self.spec.parent_refs,
            hostnames: &[],
            rules: &self.spec.rules,
            listener_protocol: "TCP",
            backend_protocol: "TCP",
        }
    }
}

impl UDPRoute {
    fn l4(&self) -> L4Route<'_> {
        L4Route {
            parent_refs: &self.spec.parent_refs,
            hostnames: &[],
            rules: &self.spec.rules,
            listener_protocol: "UDP",
            backend_protocol: "UDP",
        }
    }
}

impl TLSRoute {
    fn l4(&self) -> L4Route<'_> {
        L4Route {
            parent_refs: &self.spec.parent_refs,
            hostnames: &self.spec.hostnames,
            rules: &self.spec.rules,
            listener_protocol: "TLS",
            backend_protocol: "TCP",
        }
    }
}

macro_rules! l4_route_source {
    ($kind:ty, $source_type:expr) => {
        impl RouteSource for $kind {
            const SOURCE_TYPE: SourceType = $source_type;
            const NEEDS_GATEWAYS: bool = true;

            fn should_handle(
                &self,
                snapshot: &Snapshot,
                config: &Config,
            ) -> std::result::Result<(), String> {
                l4_should_handle(self, &self.l4(), snapshot, config)
            }

            fn synthesize(&self, snapshot: &Snapshot, config: &Config) -> Result<Expected> {
                l4_synthesize(self, &self.l4(), snapshot, config)
            }

            fn referenced_services(&self) -> Vec<(String, String)> {
                let ns = self.namespace().unwrap_or_default();
                referenced(&ns, self.spec.rules.iter().flat_map(|r| r.backend_refs.iter()))
            }

            fn parent_gateways(&self) -> Vec<(String, String)> {
                parents(&self.namespace().unwrap_or_default(), &self.spec.parent_refs)
            }

            fn recognizes(rule: &Rule, config: &Config) -> bool {
                has_source_index(rule, config)
            }

            fn attached_listeners(
                &self,
                snapshot: &Snapshot,
                config: &Config,
            ) -> Vec<(String, String, String)> {
                let ns = self.namespace().unwrap_or_default();
                listener_keys(attach(snapshot, config, &self.l4().target(&ns)))
            }

            fn status_patch(&self, snapshot: &Snapshot, config: &Config) -> Option<Value> {
                let l4 = self.l4();
                let ns = self.namespace().unwrap_or_default();
                route_status_patch(self, self.status.as_ref(), snapshot, config, &l4.target(&ns))
            }
        }
    };
}

l4_route_source!(TCPRoute, SourceType::TcpRoute);
l4_route_source!(UDPRoute, SourceType::UdpRoute);
l4_route_source!(TLSRoute, SourceType::TlsRoute);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synth::plan::plan;
    use crate::synth::tests::{make_config, make_service, make_snapshot, persist};
    use crate::types::gateway::{
        GatewaySpec, HTTPPathMatch, HTTPRouteRule, HTTPRouteSpec, ListenerTls, ObjectRef,
        TCPRouteSpec, UDPRouteSpec,
    };
    use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
    use kube::api::ObjectMeta;

    fn make_listener(name: &str, port: i32, protocol: &str, hostname: Option<&str>) -> Listener {
        Listener {
            name: name.to_string(),
            hostname: hostname.map(str::to_string),
            port,
            protocol: protocol.to_string(),
            tls: None,
        }
    }

    fn make_gateway(listeners: Vec<Listener>) -> Gateway {
        let mut gateway = Gateway::new(
            "gw",
            GatewaySpec {
                gateway_class_name: "exclusive-gateway".to_string(),
                listeners,
            },
        );
        gateway.metadata.namespace = Some("default".to_string());
        gateway
    }

    fn make_parent(section: Option<&str>) -> ParentRef {
        ParentRef {
            name: "gw".to_string(),
            section_name: section.map(str::to_string),
            ..Default::default()
        }
    }

    fn make_backend(name: &str, port: i32, weight: Option<i32>) -> BackendRef {
        BackendRef {
            name: name.to_string(),
            port: Some(port),
            weight,
            ..Default::default()
        }
    }

    fn make_path(match_type: &str, value: &str) -> Option<HTTPPathMatch> {
        Some(HTTPPathMatch {
            match_type: Some(match_type.to_string()),
            value: Some(value.to_string()),
        })
    }

    fn make_http_route(hostnames: &[&str], rules: Vec<HTTPRouteRule>) -> HTTPRoute {
        let mut route = HTTPRoute::new(
            "web",
            HTTPRouteSpec {
                parent_refs: vec![make_parent(None)],
                hostnames: hostnames.iter().map(|h| h.to_string()).collect(),
                rules,
            },
        );
        route.metadata.namespace = Some("default".to_string());
        route
    }

    fn gateway_snapshot(listeners: Vec<Listener>, services: Vec<Service>) -> Snapshot {
        let mut snapshot = make_snapshot(services);
        snapshot.gateways = vec![make_gateway(listeners)];
        snapshot
    }

    fn converge<K: RouteSource>(route: &K, snapshot: &mut Snapshot, config: &Config) -> Expected {
        let expected = route.synthesize(snapshot, config).unwrap();
        let p = plan(&route.source_key(), &expected, snapshot, config, |r| {
            K::recognizes(r, config)
        })
        .unwrap();
        if p.frontends.is_empty() {
            return expected;
        }
        persist(snapshot, &expected);
        route.synthesize(snapshot, config).unwrap()
    }

    #[test]
    fn test_http_route_terms_and_labels() {
        let config = make_config();
        let mut snapshot = gateway_snapshot(
            vec![make_listener("http", 80, "HTTP", None)],
            vec![make_service("default", "web", &[("http", 8080)])],
        );
        let route = make_http_route(
            &["a.com"],
            vec![HTTPRouteRule {
                matches: vec![HTTPRouteMatch {
                    path: make_path("PathPrefix", "/api"),
                    headers: vec![HTTPValueMatch {
                        match_type: None,
                        name: "x-env".to_string(),
                        value: "canary".to_string(),
                    }],
                    method: Some("get".to_string()),
                    ..Default::default()
                }],
                backend_refs: vec![make_backend("web", 8080, None)],
            }],
        );
        let expected = converge(&route, &mut snapshot, &config);
        assert_eq!(expected.frontends.len(), 1);
        assert_eq!(expected.rules.len(), 1);

        let rule = &expected.rules[0];
        assert_eq!(
            rule.spec.dsl,
            r#"["AND",["STARTS_WITH","URL","/api"],["EQ","HOST","a.com"],["EQ","HEADER","x-env","canary"],["EQ","METHOD","GET"]]"#
        );
        assert_eq!(rule.spec.url, "/api");
        let labels = rule.labels();
        assert_eq!(labels.get("alb2.cpaas.io/source-index").map(String::as_str), Some("http-0-0"));
        assert_eq!(labels.get("alb2.cpaas.io/source-type").map(String::as_str), Some("httpRoute"));
        assert!(HTTPRoute::recognizes(rule, &config));
        assert_eq!(rule.spec.service_group.as_ref().unwrap().services[0].weight, 100);
    }

    #[test]
    fn test_more_specific_match_has_higher_priority() {
        let config = make_config();
        let mut snapshot = gateway_snapshot(
            vec![make_listener("http", 80, "HTTP", None)],
            vec![make_service("default", "web", &[("http", 8080)])],
        );
        let plain = HTTPRouteMatch {
            path: make_path("PathPrefix", "/"),
            ..Default::default()
        };
        let with_header = HTTPRouteMatch {
            headers: vec![HTTPValueMatch {
                match_type: Some("RegularExpression".to_string()),
                name: "x-user".to_string(),
                value: "^vip".to_string(),
            }],
            ..plain.clone()
        };
        let exact = HTTPRouteMatch {
            path: make_path("Exact", "/"),
            ..Default::default()
        };
        let route = make_http_route(
            &["a.com"],
            vec![HTTPRouteRule {
                matches: vec![plain, with_header, exact],
                backend_refs: vec![make_backend("web", 8080, None)],
            }],
        );
        let expected = converge(&route, &mut snapshot, &config);
        let priorities: Vec<i64> = expected.rules.iter().map(|r| r.spec.priority).collect();
        assert_eq!(priorities.len(), 3);
        assert!(priorities[1] > priorities[0]);
        assert!(priorities[2] > priorities[0]);
        assert_eq!(expected.rules[1].spec.dslx[2].key, "x-user");
    }

    #[test]
    fn test_rule_without_matches_defaults_to_root_prefix() {
        let config = make_config();
        let mut snapshot = gateway_snapshot(
            vec![make_listener("http", 80, "HTTP", None)],
            vec![make_service("default", "web", &[("http", 8080)])],
        );
        let route = make_http_route(
            &[],
            vec![HTTPRouteRule {
                matches: vec![],
                backend_refs: vec![make_backend("web", 8080, None)],
            }],
        );
        let expected = converge(&route, &mut snapshot, &config);
        assert_eq!(expected.rules[0].spec.dsl, r#"["AND",["STARTS_WITH","URL","/"]]"#);
    }

    #[test]
    fn test_priority_annotation_overrides_complexity() {
        let config = make_config();
        let mut snapshot = gateway_snapshot(
            vec![make_listener("http", 80, "HTTP", None)],
            vec![make_service("default", "web", &[("http", 8080)])],
        );
        let mut route = make_http_route(
            &["a.com"],
            vec![HTTPRouteRule {
                matches: vec![],
                backend_refs: vec![make_backend("web", 8080, None)],
            }],
        );
        route.metadata.annotations = Some(BTreeMap::from([(
            "alb.cpaas.io/gateway-http-router-rule-priority-0-0".to_string(),
            "3".to_string(),
        )]));
        let expected = converge(&route, &mut snapshot, &config);
        assert_eq!(expected.rules[0].spec.priority, 3);
    }

    #[test]
    fn test_https_listener_certificate_and_hosts() {
        let config = make_config();
        let mut listener = make_listener("https", 443, "HTTPS", Some("*.a.com"));
        listener.tls = Some(ListenerTls {
            certificate_refs: vec![ObjectRef {
                name: "wildcard".to_string(),
                namespace: None,
                kind: None,
            }],
        });
        let mut snapshot = gateway_snapshot(
            vec![listener],
            vec![make_service("default", "web", &[("http", 8080)])],
        );
        let route = make_http_route(
            &["x.a.com", "b.com"],
            vec![HTTPRouteRule {
                matches: vec![],
                backend_refs: vec![make_backend("web", 8080, None)],
            }],
        );
        let expected = converge(&route, &mut snapshot, &config);
        assert_eq!(expected.frontends[0].spec.protocol, Protocol::Https);
        let rule = &expected.rules[0];
        assert_eq!(rule.spec.certificate_name, "default_wildcard");
        assert_eq!(rule.spec.domain, "*.a.com");
        assert_eq!(
            rule.spec.dsl,
            r#"["AND",["STARTS_WITH","URL","/"],["EQ","HOST","x.a.com"]]"#
        );
    }

    #[test]
    fn test_effective_hosts() {
        let hosts = |l: Option<&str>, r: &[&str]| {
            let r: Vec<String> = r.iter().map(|h| h.to_string()).collect();
            effective_hosts(l, &r)
        };
        assert_eq!(hosts(None, &["a.com"]), Some(vec!["a.com".to_string()]));
        assert_eq!(hosts(Some("a.com"), &[]), Some(vec!["a.com".to_string()]));
        assert_eq!(hosts(Some("a.x.com"), &["*.x.com"]), Some(vec!["a.x.com".to_string()]));
        assert_eq!(hosts(Some("*.x.com"), &["B.x.com", "c.com"]), Some(vec!["b.x.com".to_string()]));
        assert_eq!(hosts(Some("b.com"), &["A.com"]), None);
    }

    #[test]
    fn test_disjoint_hostnames_do_not_attach() {
        let config = make_config();
        let snapshot = gateway_snapshot(
            vec![make_listener("https", 443, "HTTPS", Some("*.a.com"))],
            vec![make_service("default", "web", &[("http", 8080)])],
        );
        let route = make_http_route(
            &["b.com"],
            vec![HTTPRouteRule {
                matches: vec![],
                backend_refs: vec![make_backend("web", 8080, None)],
            }],
        );
        assert!(route.should_handle(&snapshot, &config).is_err());
        let expected = route.synthesize(&snapshot, &config).unwrap();
        assert!(expected.frontends.is_empty());
        assert!(expected.rules.is_empty());

        let patch = route.status_patch(&snapshot, &config).unwrap();
        let parent = &patch["status"]["parents"][0];
        assert_eq!(parent["parentRef"]["name"], "gw");
        assert_eq!(parent["controllerName"], "alb2.gateway.cpaas.io/alb");
        assert_eq!(parent["conditions"][0]["status"], "False");
        assert_eq!(parent["conditions"][0]["message"], "no intersection hostname");
    }

    #[test]
    fn test_hostname_rejection_is_per_listener() {
        let config = make_config();
        let snapshot = gateway_snapshot(
            vec![
                make_listener("a", 80, "HTTP", Some("a.com")),
                make_listener("b", 8080, "HTTP", Some("b.com")),
            ],
            vec![make_service("default", "web", &[("http", 8080)])],
        );
        let route = make_http_route(
            &["b.com"],
            vec![HTTPRouteRule {
                matches: vec![],
                backend_refs: vec![make_backend("web", 8080, None)],
            }],
        );
        assert!(route.should_handle(&snapshot, &config).is_ok());
        let expected = route.synthesize(&snapshot, &config).unwrap();
        let ports: Vec<i32> = expected.frontends.iter().map(|f| f.spec.port).collect();
        assert_eq!(ports, vec![8080]);

        let patch = route.status_patch(&snapshot, &config).unwrap();
        assert_eq!(patch["status"]["parents"][0]["conditions"][0]["status"], "True");
    }

    #[test]
    fn test_reserved_port_listener_is_refused() {
        let config = make_config();
        let snapshot = gateway_snapshot(
            vec![make_listener("metrics", 1936, "TCP", None)],
            vec![make_service("default", "db", &[("sql", 5432)])],
        );
        let mut route = TCPRoute::new(
            "db",
            TCPRouteSpec {
                parent_refs: vec![make_parent(None)],
                rules: vec![L4RouteRule {
                    backend_refs: vec![make_backend("db", 5432, None)],
                }],
            },
        );
        route.metadata.namespace = Some("default".to_string());
        assert!(route.should_handle(&snapshot, &config).is_err());
        assert!(route.synthesize(&snapshot, &config).unwrap().frontends.is_empty());

        let patch = route.status_patch(&snapshot, &config).unwrap();
        let condition = &patch["status"]["parents"][0]["conditions"][0];
        assert_eq!(condition["reason"], "ReservedPortUsed");
        assert_eq!(condition["status"], "False");
    }

    #[test]
    fn test_status_ignores_parents_of_other_gateways() {
        let config = make_config();
        let snapshot = gateway_snapshot(vec![make_listener("http", 80, "HTTP", None)], vec![]);
        let mut route = make_http_route(&[], vec![]);
        route.spec.parent_refs = vec![ParentRef {
            name: "other".to_string(),
            ..Default::default()
        }];
        assert!(route.status_patch(&snapshot, &config).is_none());
    }

    #[test]
    fn test_section_name_and_protocol_narrow_attachment() {
        let config = make_config();
        let snapshot = gateway_snapshot(
            vec![
                make_listener("http", 80, "HTTP", None),
                make_listener("alt", 8080, "HTTP", None),
                make_listener("tcp", 9000, "TCP", None),
            ],
            vec![make_service("default", "web", &[("http", 8080)])],
        );
        let mut route = make_http_route(
            &[],
            vec![HTTPRouteRule {
                matches: vec![],
                backend_refs: vec![make_backend("web", 8080, None)],
            }],
        );
        let expected = route.synthesize(&snapshot, &config).unwrap();
        let ports: Vec<i32> = expected.frontends.iter().map(|f| f.spec.port).collect();
        assert_eq!(ports, vec![80, 8080]);

        route.spec.parent_refs = vec![make_parent(Some("alt"))];
        let expected = route.synthesize(&snapshot, &config).unwrap();
        assert_eq!(expected.frontends.len(), 1);
        assert_eq!(expected.frontends[0].spec.port, 8080);

        route.spec.parent_refs = vec![ParentRef {
            name: "other".to_string(),
            ..Default::default()
        }];
        assert!(route.should_handle(&snapshot, &config).is_err());
        assert_eq!(route.parent_gateways(), vec![("default".to_string(), "other".to_string())]);
    }

    #[test]
    fn test_invalid_match_skips_only_that_match() {
        let config = make_config();
        let mut snapshot = gateway_snapshot(
            vec![make_listener("http", 80, "HTTP", None)],
            vec![make_service("default", "web", &[("http", 8080)])],
        );
        let bad = HTTPRouteMatch {
            headers: vec![HTTPValueMatch {
                match_type: Some("Fuzzy".to_string()),
                name: "x".to_string(),
                value: "y".to_string(),
            }],
            ..Default::default()
        };
        let good = HTTPRouteMatch {
            path: make_path("Exact", "/ok"),
            ..Default::default()
        };
        let route = make_http_route(
            &[],
            vec![HTTPRouteRule {
                matches: vec![bad, good],
                backend_refs: vec![make_backend("web", 8080, None)],
            }],
        );
        let expected = converge(&route, &mut snapshot, &config);
        assert_eq!(expected.rules.len(), 1);
        assert_eq!(expected.rules[0].spec.url, "/ok");
    }

    #[test]
    fn test_missing_service_aborts() {
        let config = make_config();
        let snapshot = gateway_snapshot(vec![make_listener("http", 80, "HTTP", None)], vec![]);
        let route = make_http_route(
            &[],
            vec![HTTPRouteRule {
                matches: vec![],
                backend_refs: vec![make_backend("web", 8080, None)],
            }],
        );
        let err = route.synthesize(&snapshot, &config).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Resolution);
    }

    #[test]
    fn test_tcp_route_weights() {
        let config = make_config();
        let mut snapshot = gateway_snapshot(
            vec![make_listener("tcp", 9000, "TCP", None)],
            vec![
                make_service("default", "db", &[("sql", 5432)]),
                make_service("default", "db-replica", &[("sql", 5432)]),
            ],
        );
        let mut route = TCPRoute::new(
            "db",
            TCPRouteSpec {
                parent_refs: vec![make_parent(None)],
                rules: vec![L4RouteRule {
                    backend_refs: vec![
                        make_backend("db", 5432, Some(3)),
                        make_backend("db-replica", 5432, Some(1)),
                    ],
                }],
            },
        );
        route.metadata.namespace = Some("default".to_string());

        assert!(route.should_handle(&snapshot, &config).is_ok());
        assert_eq!(
            route.attached_listeners(&snapshot, &config),
            vec![("default".to_string(), "gw".to_string(), "tcp".to_string())]
        );
        let expected = converge(&route, &mut snapshot, &config);
        assert_eq!(expected.frontends[0].spec.protocol, Protocol::Tcp);
        assert_eq!(expected.frontends[0].name_any(), "alb-09000");
        let rule = &expected.rules[0];
        assert!(rule.spec.dslx.is_empty());
        assert_eq!(rule.spec.dsl, "[]");
        let weights: Vec<i32> = rule
            .spec
            .service_group
            .as_ref()
            .unwrap()
            .services
            .iter()
            .map(|s| s.weight)
            .collect();
        assert_eq!(weights, vec![75, 25]);
        assert_eq!(
            route.referenced_services(),
            vec![
                ("default".to_string(), "db".to_string()),
                ("default".to_string(), "db-replica".to_string())
            ]
        );
    }

    #[test]
    fn test_udp_route_resolves_udp_ports() {
        let config = make_config();
        let dns = Service {
            metadata: ObjectMeta {
                name: Some("dns".to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                ports: Some(vec![ServicePort {
                    name: Some("dns".to_string()),
                    port: 53,
                    protocol: Some("UDP".to_string()),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        };
        let snapshot = gateway_snapshot(vec![make_listener("udp", 53, "UDP", None)], vec![dns]);
        let mut route = UDPRoute::new(
            "dns",
            UDPRouteSpec {
                parent_refs: vec![make_parent(None)],
                rules: vec![L4RouteRule {
                    backend_refs: vec![make_backend("dns", 53, None)],
                }],
            },
        );
        route.metadata.namespace = Some("default".to_string());
        let expected = route.synthesize(&snapshot, &config).unwrap();
        assert_eq!(expected.frontends[0].spec.protocol, Protocol::Udp);
    }

    #[test]
    fn test_port_conflict_skips_listener() {
        let config = make_config();
        let mut snapshot = gateway_snapshot(
            vec![make_listener("tcp", 80, "TCP", None)],
            vec![make_service("default", "db", &[("sql", 5432)])],
        );
        let key = SourceKey::new(SourceType::Ingress, "default", "web");
        let http = expected_frontend(&snapshot, &config, &key, 80, Protocol::Http).unwrap();
        snapshot.frontends.push(http);

        let mut route = TCPRoute::new(
            "db",
            TCPRouteSpec {
                parent_refs: vec![make_parent(None)],
                rules: vec![L4RouteRule {
                    backend_refs: vec![make_backend("db", 5432, None)],
                }],
            },
        );
        route.metadata.namespace = Some("default".to_string());
        let expected = route.synthesize(&snapshot, &config).unwrap();
        assert!(expected.frontends.is_empty());
        assert!(expected.rules.is_empty());
    }
}
