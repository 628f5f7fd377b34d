// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use kube::CustomResource;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The load balancer instance. Only the metadata is read.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, schemars::JsonSchema)]
#[kube(group = "crd.alauda.io", version = "v2beta1", kind = "ALB2")]
#[kube(namespaced)]
#[serde(rename_all = "camelCase")]
pub struct Alb2Spec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub alb_type: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, schemars::JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    Https,
    Tcp,
    Udp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        };
        f.write_str(s)
    }
}

/// One listening port of the load balancer
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, PartialEq, schemars::JsonSchema)]
#[kube(group = "crd.alauda.io", version = "v1", kind = "Frontend")]
#[kube(namespaced, shortname = "ft")]
#[serde(rename_all = "camelCase")]
pub struct FrontendSpec {
    pub port: i32,
    pub protocol: Protocol,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub certificate_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub backend_protocol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_group: Option<ServiceGroup>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Source>,
}

/// One match-to-backend binding under a frontend
#[derive(
    CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq, schemars::JsonSchema,
)]
#[kube(group = "crd.alauda.io", version = "v1", kind = "Rule")]
#[kube(namespaced, shortname = "rl")]
#[serde(rename_all = "camelCase", default)]
pub struct RuleSpec {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub domain: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub url: String,
    pub dslx: Vec<DslxTerm>,
    /// Compact wire form of `dslx`, kept for searching
    #[serde(skip_serializing_if = "String::is_empty")]
    pub dsl: String,
    pub priority: i64,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub rewrite_target: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub rewrite_base: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub backend_protocol: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub certificate_name: String,
    #[serde(rename = "enableCORS")]
    pub enable_cors: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub cors_allow_headers: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub cors_allow_origin: String,
    #[serde(rename = "redirectURL", skip_serializing_if = "String::is_empty")]
    pub redirect_url: String,
    #[serde(skip_serializing_if = "is_zero")]
    pub redirect_code: i32,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub vhost: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_group: Option<ServiceGroup>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<Source>,
}

fn is_zero(v: &i32) -> bool {
    *v == 0
}

/// One typed term of a stored predicate tree
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, schemars::JsonSchema)]
pub struct DslxTerm {
    #[serde(rename = "type")]
    pub term_type: String,
    /// Alternatives, each `[OP, args...]`
    pub values: Vec<Vec<String>>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub key: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServiceGroup {
    #[serde(default)]
    pub services: Vec<BackendService>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_affinity_policy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_affinity_attribute: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, schemars::JsonSchema)]
pub struct BackendService {
    pub namespace: String,
    pub name: String,
    pub port: i32,
    pub weight: i32,
}

/// Provenance of a synthesized frontend default backend or rule
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, schemars::JsonSchema)]
pub struct Source {
    #[serde(rename = "type")]
    pub source_type: String,
    #[serde(default)]
    pub namespace: String,
    pub name: String,
}

/// Kinds of objects that synthesize frontends and rules
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SourceType {
    Ingress,
    HttpRoute,
    TcpRoute,
    UdpRoute,
    TlsRoute,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Ingress => "ingress",
            SourceType::HttpRoute => "httpRoute",
            SourceType::TcpRoute => "tcpRoute",
            SourceType::UdpRoute => "udpRoute",
            SourceType::TlsRoute => "tlsRoute",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        [
            SourceType::Ingress,
            SourceType::HttpRoute,
            SourceType::TcpRoute,
            SourceType::UdpRoute,
            SourceType::TlsRoute,
        ]
        .into_iter()
        .find(|t| t.as_str() == s)
    }
}

/// Reconcile key of a route object: its type plus namespaced name
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceKey {
    pub source_type: SourceType,
    pub namespace: String,
    pub name: String,
}

impl SourceKey {
    pub fn new(source_type: SourceType, namespace: &str, name: &str) -> Self {
        Self {
            source_type,
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    pub fn to_source(&self) -> Source {
        Source {
            source_type: self.source_type.as_str().to_string(),
            namespace: self.namespace.clone(),
            name: self.name.clone(),
        }
    }

    /// Whether a stored provenance tag points at this key
    pub fn matches(&self, source: Option<&Source>) -> bool {
        source.is_some_and(|s| {
            s.source_type == self.source_type.as_str()
                && s.namespace == self.namespace
                && s.name == self.name
        })
    }

    pub fn from_source(source: &Source) -> Option<Self> {
        SourceType::parse(&source.source_type)
            .map(|t| SourceKey::new(t, &source.namespace, &source.name))
    }
}

impl fmt::Display for SourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.source_type.as_str(),
            self.namespace,
            self.name
        )
    }
}

impl Frontend {
    pub fn has_default_backend(&self) -> bool {
        self.spec.service_group.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_spec_wire_names() {
        let spec = RuleSpec {
            url: "/a".to_string(),
            enable_cors: true,
            redirect_url: "https://b".to_string(),
            redirect_code: 301,
            service_group: Some(ServiceGroup {
                services: vec![BackendService {
                    namespace: "default".to_string(),
                    name: "web".to_string(),
                    port: 80,
                    weight: 100,
                }],
                ..Default::default()
            }),
            ..Default::default()
        };
        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["enableCORS"], true);
        assert_eq!(json["redirectURL"], "https://b");
        assert_eq!(json["redirectCode"], 301);
        assert_eq!(json["serviceGroup"]["services"][0]["weight"], 100);
        assert!(json.get("domain").is_none());
    }

    #[test]
    fn test_rule_spec_tolerates_missing_fields() {
        let spec: RuleSpec = serde_json::from_str(r#"{"priority": 3, "url": "/x"}"#).unwrap();
        assert_eq!(spec.priority, 3);
        assert!(spec.dslx.is_empty());
        assert!(spec.source.is_none());
    }

    #[test]
    fn test_frontend_spec_from_yaml() {
        let yaml = r#"
port: 443
protocol: https
certificateName: cpaas-system_default
source:
  type: ingress
  namespace: default
  name: web
"#;
        let spec: FrontendSpec = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(spec.protocol, Protocol::Https);
        assert_eq!(spec.certificate_name, "cpaas-system_default");
        let key = SourceKey::new(SourceType::Ingress, "default", "web");
        assert!(key.matches(spec.source.as_ref()));
        assert!(!SourceKey::new(SourceType::HttpRoute, "default", "web").matches(spec.source.as_ref()));
    }

    #[test]
    fn test_source_key_round_trip() {
        let key = SourceKey::new(SourceType::UdpRoute, "ns", "dns");
        assert_eq!(key.to_string(), "udpRoute/ns/dns");
        assert_eq!(SourceKey::from_source(&key.to_source()), Some(key));
        assert_eq!(SourceType::parse("grpcRoute"), None);
    }
}
