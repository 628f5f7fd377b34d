// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Status written back to routing objects.
//!
//! Gateway routes get one parent entry per parentRef that names a gateway of our class.
//! Gateways get the load balancer addresses and one entry per listener. Ingresses get the
//! load balancer addresses and the ports they are served on. Everything is computed against
//! the current status and yields None when nothing would change.

use k8s_openapi::api::networking::v1::{
    IngressLoadBalancerIngress, IngressLoadBalancerStatus, IngressPortStatus, IngressStatus,
};
use std::collections::BTreeMap;
use std::net::IpAddr;

use crate::types::gateway::{
    GatewayAddress, GatewayStatus, ListenerStatus, ParentRef, RouteGroupKind, RouteParentStatus,
    RouteStatus, StatusCondition,
};
use crate::types::Gateway;

pub const CONDITION_READY: &str = "Ready";
pub const CONDITION_CONFLICTED: &str = "Conflicted";
pub const REASON_READY: &str = "Ready";
pub const REASON_INVALID: &str = "Invalid";
pub const REASON_PROTOCOL_CONFLICT: &str = "ProtocolConflict";
pub const REASON_RESERVED_PORT: &str = "ReservedPortUsed";

const GATEWAY_GROUP: &str = "gateway.networking.k8s.io";

/// How one parentRef of a route was treated
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentVerdict {
    pub parent: ParentRef,
    pub accepted: bool,
    pub reason: &'static str,
    pub message: String,
}

impl ParentVerdict {
    pub fn accepted(parent: &ParentRef) -> Self {
        Self {
            parent: parent.clone(),
            accepted: true,
            reason: REASON_READY,
            message: String::new(),
        }
    }

    pub fn refused(parent: &ParentRef, reason: &'static str, message: impl Into<String>) -> Self {
        Self {
            parent: parent.clone(),
            accepted: false,
            reason,
            message: message.into(),
        }
    }
}

fn same_condition(a: &StatusCondition, b: &StatusCondition) -> bool {
    StatusCondition {
        last_transition_time: String::new(),
        ..a.clone()
    } == StatusCondition {
        last_transition_time: String::new(),
        ..b.clone()
    }
}

/// Route status with our parent entries replaced by `verdicts`.
/// A condition that did not change keeps its transition time.
pub fn route_status(
    current: Option<&RouteStatus>,
    verdicts: &[ParentVerdict],
    controller_name: &str,
    generation: Option<i64>,
    now: &str,
) -> Option<RouteStatus> {
    let current_parents = current.map(|s| s.parents.as_slice()).unwrap_or_default();
    let mut parents: Vec<RouteParentStatus> = current_parents
        .iter()
        .filter(|p| p.controller_name != controller_name)
        .cloned()
        .collect();

    for verdict in verdicts {
        let mut condition = StatusCondition {
            condition_type: CONDITION_READY.to_string(),
            status: if verdict.accepted { "True" } else { "False" }.to_string(),
            reason: verdict.reason.to_string(),
            message: verdict.message.clone(),
            observed_generation: generation,
            last_transition_time: now.to_string(),
        };
        let previous = current_parents
            .iter()
            .find(|p| p.controller_name == controller_name && p.parent_ref == verdict.parent)
            .and_then(|p| p.conditions.iter().find(|c| c.condition_type == CONDITION_READY));
        if let Some(previous) = previous.filter(|p| same_condition(p, &condition)) {
            condition.last_transition_time = previous.last_transition_time.clone();
        }
        parents.push(RouteParentStatus {
            parent_ref: verdict.parent.clone(),
            controller_name: controller_name.to_string(),
            conditions: vec![condition],
        });
    }

    if parents.as_slice() == current_parents {
        return None;
    }
    Some(RouteStatus { parents })
}

fn condition(
    condition_type: &str,
    status: bool,
    reason: &str,
    message: String,
    generation: Option<i64>,
    now: &str,
) -> StatusCondition {
    StatusCondition {
        condition_type: condition_type.to_string(),
        status: if status { "True" } else { "False" }.to_string(),
        reason: reason.to_string(),
        message,
        observed_generation: generation,
        last_transition_time: now.to_string(),
    }
}

/// Route kinds a listener protocol serves
fn supported_kinds(protocol: &str) -> Vec<RouteGroupKind> {
    let kind = match protocol.to_uppercase().as_str() {
        "HTTP" | "HTTPS" => "HTTPRoute",
        "TCP" => "TCPRoute",
        "UDP" => "UDPRoute",
        "TLS" => "TLSRoute",
        _ => return Vec::new(),
    };
    vec![RouteGroupKind {
        group: Some(GATEWAY_GROUP.to_string()),
        kind: kind.to_string(),
    }]
}

/// Addresses and listener entries of a gateway. `attached` counts accepted routes per listener.
pub fn gateway_status(
    gateway: &Gateway,
    attached: &BTreeMap<String, i32>,
    reserved_ports: &[i32],
    address: &str,
    now: &str,
) -> Option<GatewayStatus> {
    let current = gateway.status.as_ref();
    let generation = gateway.metadata.generation;
    let (ips, hosts) = parse_address(address);
    let addresses: Vec<GatewayAddress> = hosts
        .into_iter()
        .map(|value| ("Hostname", value))
        .chain(ips.into_iter().map(|value| ("IPAddress", value)))
        .map(|(address_type, value)| GatewayAddress {
            address_type: Some(address_type.to_string()),
            value,
        })
        .collect();

    let listeners = &gateway.spec.listeners;
    let mut statuses = Vec::new();
    for (index, listener) in listeners.iter().enumerate() {
        let kinds = supported_kinds(&listener.protocol);
        let conflict = listeners[..index]
            .iter()
            .find(|l| l.port == listener.port && !l.protocol.eq_ignore_ascii_case(&listener.protocol));
        let mut conditions = if kinds.is_empty() {
            vec![condition(
                CONDITION_READY,
                false,
                REASON_INVALID,
                format!("unsupported protocol {}", listener.protocol),
                generation,
                now,
            )]
        } else if reserved_ports.contains(&listener.port) {
            vec![condition(
                CONDITION_READY,
                false,
                REASON_RESERVED_PORT,
                format!("{:?} are reserved ports", reserved_ports),
                generation,
                now,
            )]
        } else if let Some(first) = conflict {
            vec![
                condition(CONDITION_READY, false, REASON_INVALID, String::new(), generation, now),
                condition(
                    CONDITION_CONFLICTED,
                    true,
                    REASON_PROTOCOL_CONFLICT,
                    format!("port {} is already served by listener {}", listener.port, first.name),
                    generation,
                    now,
                ),
            ]
        } else {
            vec![condition(CONDITION_READY, true, REASON_READY, String::new(), generation, now)]
        };

        let previous = current.and_then(|s| s.listeners.iter().find(|l| l.name == listener.name));
        for c in conditions.iter_mut() {
            let kept = previous
                .and_then(|p| p.conditions.iter().find(|o| o.condition_type == c.condition_type))
                .filter(|o| same_condition(o, c));
            if let Some(kept) = kept {
                c.last_transition_time = kept.last_transition_time.clone();
            }
        }
        statuses.push(ListenerStatus {
            name: listener.name.clone(),
            supported_kinds: kinds,
            attached_routes: attached.get(&listener.name).copied().unwrap_or_default(),
            conditions,
        });
    }

    let status = GatewayStatus {
        addresses,
        listeners: statuses,
    };
    if current.cloned().unwrap_or_default() == status {
        return None;
    }
    Some(status)
}

/// Splits the comma separated load balancer address into IPs and hostnames
pub fn parse_address(address: &str) -> (Vec<String>, Vec<String>) {
    let mut ips = Vec::new();
    let mut hosts = Vec::new();
    for part in address.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        if part.parse::<IpAddr>().is_ok() {
            ips.push(part.to_string());
        } else {
            hosts.push(part.to_string());
        }
    }
    (ips, hosts)
}

/// Ingress status with every address listing `ports`. Entries are only ever added to.
pub fn ingress_status(
    current: Option<&IngressStatus>,
    address: &str,
    ports: &[i32],
) -> Option<IngressStatus> {
    let (ips, hosts) = parse_address(address);
    let mut entries: Vec<IngressLoadBalancerIngress> = current
        .and_then(|s| s.load_balancer.as_ref())
        .and_then(|lb| lb.ingress.clone())
        .unwrap_or_default();
    let mut changed = false;

    let wanted = ips
        .into_iter()
        .map(|ip| (Some(ip), None))
        .chain(hosts.into_iter().map(|host| (None, Some(host))));
    for (ip, hostname) in wanted {
        let existing = entries
            .iter_mut()
            .find(|e| (ip.is_some() && e.ip == ip) || (hostname.is_some() && e.hostname == hostname));
        let Some(entry) = existing else {
            entries.push(IngressLoadBalancerIngress {
                ip,
                hostname,
                ports: Some(ports.iter().map(|p| port_status(*p)).collect()),
            });
            changed = true;
            continue;
        };
        let listed = entry.ports.get_or_insert_with(Vec::new);
        for port in ports {
            if !listed.iter().any(|p| p.port == *port) {
                listed.push(port_status(*port));
                changed = true;
            }
        }
    }

    if !changed {
        return None;
    }
    Some(IngressStatus {
        load_balancer: Some(IngressLoadBalancerStatus {
            ingress: Some(entries),
        }),
    })
}

fn port_status(port: i32) -> IngressPortStatus {
    IngressPortStatus {
        port,
        protocol: "TCP".to_string(),
        error: None,
    }
}
