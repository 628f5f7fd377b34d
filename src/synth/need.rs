// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Decides which listeners an ingress needs.

use k8s_openapi::api::networking::v1::Ingress;
use std::collections::BTreeMap;
use tracing::warn;

use crate::config::{Config, SslStrategy};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Need {
    pub http: bool,
    pub https: bool,
}

/// Parses the per-host certificate annotation `host=ns/secret,host2=ns/secret2`.
/// Returns host to `ns_secret`, or None when the value is malformed or names a host twice.
pub fn parse_tls_annotation(value: &str) -> Option<BTreeMap<String, String>> {
    let mut certs = BTreeMap::new();
    for entry in value.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (host, secret) = entry.split_once('=')?;
        let (ns, name) = secret.split_once('/')?;
        if host.is_empty() || ns.is_empty() || name.is_empty() || name.contains('/') {
            return None;
        }
        let host = host.to_lowercase();
        if certs.contains_key(&host) {
            return None;
        }
        certs.insert(host, format!("{}_{}", ns, name));
    }
    Some(certs)
}

/// Certificates per host: `spec.tls` first, then the annotation for hosts it does not cover
pub fn host_certificates(ingress: &Ingress, config: &Config) -> BTreeMap<String, String> {
    let namespace = ingress.metadata.namespace.clone().unwrap_or_default();
    let mut certs = BTreeMap::new();

    let tls = ingress.spec.as_ref().and_then(|s| s.tls.as_ref());
    for block in tls.into_iter().flatten() {
        let secret = block.secret_name.clone().unwrap_or_default();
        for host in block.hosts.iter().flatten() {
            certs.insert(host.to_lowercase(), format!("{}_{}", namespace, secret));
        }
    }

    let annotation = ingress
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(&config.annotation_tls()));
    if let Some(value) = annotation {
        match parse_tls_annotation(value) {
            Some(parsed) => {
                for (host, cert) in parsed {
                    certs.entry(host).or_insert(cert);
                }
            }
            None => warn!(value = %value, "Ignoring malformed TLS annotation"),
        }
    }
    certs
}

/// Listener types the ingress needs under the configured SSL strategy
pub fn classify(ingress: &Ingress, config: &Config) -> Need {
    let mut need = Need::default();
    let Some(spec) = ingress.spec.as_ref() else {
        return need;
    };

    if spec.default_backend.is_some() {
        need.http = true;
    }

    let certs = host_certificates(ingress, config);
    let enable_https = ingress
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(&config.annotation_enable_https()))
        .map(String::as_str);

    for rule in spec.rules.iter().flatten() {
        let host = rule.host.as_deref().unwrap_or_default().to_lowercase();
        if !host.is_empty() && certs.contains_key(&host) {
            need.https = true;
            // Both keeps plain HTTP next to a TLS host
            if config.default_ssl_strategy == SslStrategy::Both && enable_https != Some("false") {
                need.http = true;
            }
            continue;
        }
        match (config.default_ssl_strategy, enable_https) {
            (SslStrategy::Both, override_) if override_ != Some("false") => {
                need.http = true;
                need.https = true;
            }
            (SslStrategy::Always, override_) if override_ != Some("false") => need.https = true,
            (SslStrategy::Request, Some("true")) => need.https = true,
            _ => need.http = true,
        }
    }

    if config.http_port == 0 {
        need.http = false;
    }
    need
}
