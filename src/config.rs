// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use anyhow::{bail, Context, Result};
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::constants::defaults;

/// Cluster-wide policy deciding which listeners a TLS-less ingress host needs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SslStrategy {
    /// Always serve HTTPS, unless the ingress opts out
    Always,
    /// Never serve HTTPS unless the host is covered by TLS
    Never,
    /// Serve HTTPS only when the ingress opts in
    #[default]
    Request,
    /// Serve both HTTP and HTTPS, unless the ingress opts out
    Both,
}

impl FromStr for SslStrategy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "always" => Ok(SslStrategy::Always),
            "never" => Ok(SslStrategy::Never),
            "request" => Ok(SslStrategy::Request),
            "both" => Ok(SslStrategy::Both),
            other => bail!("unknown SSL strategy '{}'", other),
        }
    }
}

/// Controller configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Name of the ALB2 object this controller serves
    pub alb_name: String,
    pub alb_namespace: String,
    /// Domain every owned label and annotation is namespaced under
    pub domain: String,
    /// HTTP listener port for ingresses, 0 disables HTTP
    pub http_port: i32,
    pub https_port: i32,
    pub default_ssl_strategy: SslStrategy,
    /// Default certificate for ingress HTTPS frontends, as `ns/name`
    pub default_ssl_cert: Option<String>,
    pub ingress_class: String,
    pub gateway_class: String,
    pub enable_ingress: bool,
    pub enable_gateway: bool,
    /// Period of the drift sweeper, None disables it
    pub resync_period: Option<Duration>,
    pub workers: u16,
    /// Ports of the load balancer itself; gateway listeners on them are refused
    pub reserved_ports: Vec<i32>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let alb_name = lookup("ALB_NAME").context("ALB_NAME environment variable not set")?;
        let parsed = |key: &str, default: &str| -> String {
            lookup(key).unwrap_or_else(|| default.to_string())
        };

        let http_port: i32 = parsed("INGRESS_HTTP_PORT", &defaults::HTTP_PORT.to_string())
            .parse()
            .context("INGRESS_HTTP_PORT is not a valid port")?;
        let https_port: i32 = parsed("INGRESS_HTTPS_PORT", &defaults::HTTPS_PORT.to_string())
            .parse()
            .context("INGRESS_HTTPS_PORT is not a valid port")?;
        if !(0..=65535).contains(&http_port) || !(1..=65535).contains(&https_port) {
            bail!(
                "ingress ports out of range: http={}, https={}",
                http_port,
                https_port
            );
        }

        let default_ssl_strategy = match lookup("DEFAULT_SSL_STRATEGY") {
            Some(v) => v.parse().context("DEFAULT_SSL_STRATEGY is invalid")?,
            None => SslStrategy::default(),
        };
        let default_ssl_cert = lookup("DEFAULT_SSL_CERT").filter(|v| !v.is_empty());
        if let Some(cert) = &default_ssl_cert {
            if cert.split('/').count() != 2 {
                bail!("DEFAULT_SSL_CERT must be ns/name, got '{}'", cert);
            }
        }

        let resync_secs: u64 = parsed(
            "RESYNC_PERIOD_SECS",
            &defaults::RESYNC_PERIOD_SECS.to_string(),
        )
        .parse()
        .context("RESYNC_PERIOD_SECS is not a number")?;
        let workers: u16 = parsed("WORKERS", &defaults::WORKERS.to_string())
            .parse()
            .context("WORKERS is not a number")?;

        let reserved_ports = parsed("RESERVED_PORTS", defaults::RESERVED_PORTS)
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(|p| p.parse::<i32>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("RESERVED_PORTS must be a comma separated list of ports")?;

        Ok(Config {
            ingress_class: parsed("INGRESS_CLASS", &alb_name),
            alb_namespace: parsed("ALB_NAMESPACE", defaults::ALB_NAMESPACE),
            domain: parsed("DOMAIN", defaults::DOMAIN),
            http_port,
            https_port,
            default_ssl_strategy,
            default_ssl_cert,
            gateway_class: parsed("GATEWAY_CLASS", defaults::GATEWAY_CLASS),
            enable_ingress: parse_bool(&parsed("ENABLE_INGRESS", "true")),
            enable_gateway: parse_bool(&parsed("ENABLE_GATEWAY", "true")),
            resync_period: (resync_secs > 0).then(|| Duration::from_secs(resync_secs)),
            workers: workers.max(1),
            reserved_ports,
            alb_name,
        })
    }

    pub fn label_alb_name(&self) -> String {
        format!("alb2.{}/name", self.domain)
    }

    pub fn label_frontend(&self) -> String {
        format!("alb2.{}/frontend", self.domain)
    }

    pub fn label_source_type(&self) -> String {
        format!("alb2.{}/source-type", self.domain)
    }

    pub fn label_source_name(&self) -> String {
        format!("alb2.{}/source-name", self.domain)
    }

    pub fn label_source_ns(&self) -> String {
        format!("alb2.{}/source-ns", self.domain)
    }

    pub fn label_source_index(&self) -> String {
        format!("alb2.{}/source-index", self.domain)
    }

    pub fn label_source_hash(&self) -> String {
        format!("alb2.{}/source-hash", self.domain)
    }

    pub fn label_project(&self) -> String {
        format!("{}/project", self.domain)
    }

    /// Prefix of ALB2 labels granting projects to the load balancer
    pub fn project_label_prefix(&self) -> String {
        format!("project.{}/", self.domain)
    }

    pub fn annotation_source_version(&self) -> String {
        format!("alb2.{}/source-ingress-version", self.domain)
    }

    pub fn annotation_rule_index(&self) -> String {
        format!("alb2.{}/source-ingress-rule-index", self.domain)
    }

    pub fn annotation_path_index(&self) -> String {
        format!("alb2.{}/source-ingress-path-index", self.domain)
    }

    /// Per-ingress override of the SSL strategy ("true"/"false")
    pub fn annotation_enable_https(&self) -> String {
        format!("alb.networking.{}/enable-https", self.domain)
    }

    /// Per-host certificate map, `host=ns/secret,...`
    pub fn annotation_tls(&self) -> String {
        format!("alb.networking.{}/tls", self.domain)
    }

    pub fn annotation_ingress_priority(&self, rule: usize, path: usize) -> String {
        format!("alb.{}/ingress-rule-priority-{}-{}", self.domain, rule, path)
    }

    pub fn annotation_gateway_priority(&self, rule: usize, matcher: usize) -> String {
        format!(
            "alb.{}/gateway-http-router-rule-priority-{}-{}",
            self.domain, rule, matcher
        )
    }

    /// Controller name reported in Gateway-API status
    pub fn gateway_controller_name(&self) -> String {
        format!("alb2.gateway.{}/{}", self.domain, self.alb_name)
    }

    pub fn finalizer(&self) -> String {
        format!("alb2.{}/finalizer", self.domain)
    }

    /// Whether a label or annotation key belongs to this controller
    pub fn owns_key(&self, key: &str) -> bool {
        key.starts_with(&format!("alb2.{}/", self.domain))
            || key.starts_with(&format!("alb.{}/", self.domain))
            || key.starts_with(&format!("alb.networking.{}/", self.domain))
            || key == self.label_project()
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            alb_name: "alb".to_string(),
            alb_namespace: defaults::ALB_NAMESPACE.to_string(),
            domain: defaults::DOMAIN.to_string(),
            http_port: defaults::HTTP_PORT,
            https_port: defaults::HTTPS_PORT,
            default_ssl_strategy: SslStrategy::default(),
            default_ssl_cert: None,
            ingress_class: "alb".to_string(),
            gateway_class: defaults::GATEWAY_CLASS.to_string(),
            enable_ingress: true,
            enable_gateway: true,
            resync_period: Some(Duration::from_secs(defaults::RESYNC_PERIOD_SECS)),
            workers: defaults::WORKERS,
            reserved_ports: vec![1936, 11782],
        }
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "true" | "1" | "yes")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn make_lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_requires_alb_name() {
        assert!(Config::from_lookup(make_lookup(&[])).is_err());
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(make_lookup(&[("ALB_NAME", "global-alb")])).unwrap();
        assert_eq!(config.ingress_class, "global-alb");
        assert_eq!(config.domain, "cpaas.io");
        assert_eq!(config.http_port, 80);
        assert_eq!(config.https_port, 443);
        assert_eq!(config.default_ssl_strategy, SslStrategy::Request);
        assert_eq!(config.resync_period, Some(Duration::from_secs(300)));
        assert!(config.enable_ingress);
        assert!(config.enable_gateway);
        assert_eq!(config.reserved_ports, vec![1936, 11782]);
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(make_lookup(&[
            ("ALB_NAME", "a"),
            ("INGRESS_HTTP_PORT", "0"),
            ("DEFAULT_SSL_STRATEGY", "Both"),
            ("DEFAULT_SSL_CERT", "cpaas-system/default-cert"),
            ("RESYNC_PERIOD_SECS", "0"),
            ("ENABLE_GATEWAY", "false"),
            ("RESERVED_PORTS", "1936, 8443"),
        ]))
        .unwrap();
        assert_eq!(config.reserved_ports, vec![1936, 8443]);
        assert_eq!(config.http_port, 0);
        assert_eq!(config.default_ssl_strategy, SslStrategy::Both);
        assert_eq!(
            config.default_ssl_cert.as_deref(),
            Some("cpaas-system/default-cert")
        );
        assert_eq!(config.resync_period, None);
        assert!(!config.enable_gateway);
    }

    #[test]
    fn test_invalid_values_fail() {
        assert!(Config::from_lookup(make_lookup(&[
            ("ALB_NAME", "a"),
            ("DEFAULT_SSL_STRATEGY", "sometimes")
        ]))
        .is_err());
        assert!(Config::from_lookup(make_lookup(&[
            ("ALB_NAME", "a"),
            ("INGRESS_HTTPS_PORT", "70000")
        ]))
        .is_err());
        assert!(Config::from_lookup(make_lookup(&[
            ("ALB_NAME", "a"),
            ("DEFAULT_SSL_CERT", "no-namespace")
        ]))
        .is_err());
        assert!(Config::from_lookup(make_lookup(&[
            ("ALB_NAME", "a"),
            ("RESERVED_PORTS", "1936,http")
        ]))
        .is_err());
    }

    #[test]
    fn test_key_names() {
        let config = Config::default();
        assert_eq!(config.label_alb_name(), "alb2.cpaas.io/name");
        assert_eq!(config.label_project(), "cpaas.io/project");
        assert_eq!(
            config.annotation_ingress_priority(0, 1),
            "alb.cpaas.io/ingress-rule-priority-0-1"
        );
        assert_eq!(config.annotation_tls(), "alb.networking.cpaas.io/tls");
        assert!(config.owns_key("alb2.cpaas.io/source-index"));
        assert!(config.owns_key("cpaas.io/project"));
        assert!(!config.owns_key("app.kubernetes.io/name"));
        assert_eq!(config.gateway_controller_name(), "alb2.gateway.cpaas.io/alb");
    }
}
