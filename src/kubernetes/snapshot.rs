// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Point-in-time view of the cluster state one reconcile pass works on.

use k8s_openapi::api::core::v1::{Namespace, Service};
use kube::{api::ListParams, Api, Client, ResourceExt};
use std::collections::BTreeMap;
use tracing::{debug, instrument};

use crate::config::Config;
use crate::error::{AlbError, Result};
use crate::types::{Frontend, Gateway, Rule, SourceKey, ALB2};

/// Immutable within a pass; synthesis never sees live objects
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub alb: ALB2,
    /// Frontends of this load balancer
    pub frontends: Vec<Frontend>,
    /// Rules of this load balancer
    pub rules: Vec<Rule>,
    /// Services referenced by the route, keyed by (namespace, name)
    pub services: BTreeMap<(String, String), Service>,
    /// Gateways of the configured gateway class
    pub gateways: Vec<Gateway>,
    /// Project of the route's namespace
    pub project: Option<String>,
}

impl Snapshot {
    pub fn new(alb: ALB2) -> Self {
        Self {
            alb,
            frontends: Vec::new(),
            rules: Vec::new(),
            services: BTreeMap::new(),
            gateways: Vec::new(),
            project: None,
        }
    }

    pub fn frontend_by_port(&self, port: i32) -> Option<&Frontend> {
        self.frontends.iter().find(|f| f.spec.port == port)
    }

    pub fn service(&self, namespace: &str, name: &str) -> Option<&Service> {
        self.services
            .get(&(namespace.to_string(), name.to_string()))
    }

    /// Rules whose provenance is the given route
    pub fn rules_from<'a>(&'a self, key: &'a SourceKey) -> impl Iterator<Item = &'a Rule> + 'a {
        self.rules
            .iter()
            .filter(move |r| key.matches(r.spec.source.as_ref()))
    }

    /// Frontends whose provenance is the given route
    pub fn frontends_from<'a>(
        &'a self,
        key: &'a SourceKey,
    ) -> impl Iterator<Item = &'a Frontend> + 'a {
        self.frontends
            .iter()
            .filter(move |f| key.matches(f.spec.source.as_ref()))
    }

    /// Every route key that owns a rule or a frontend default backend
    pub fn source_keys(&self) -> Vec<SourceKey> {
        let mut keys: Vec<SourceKey> = self
            .rules
            .iter()
            .filter_map(|r| r.spec.source.as_ref())
            .chain(
                self.frontends
                    .iter()
                    .filter(|f| f.has_default_backend())
                    .filter_map(|f| f.spec.source.as_ref()),
            )
            .filter_map(SourceKey::from_source)
            .collect();
        keys.sort();
        keys.dedup();
        keys
    }
}

/// Reads snapshots through the Kubernetes API
#[derive(Clone)]
pub struct SnapshotLoader {
    client: Client,
    config: Config,
}

impl SnapshotLoader {
    pub fn new(client: Client, config: Config) -> Self {
        Self { client, config }
    }

    /// Load balancer, its frontends and rules, and gateways when asked for
    #[instrument(skip(self), fields(alb = %self.config.alb_name))]
    pub async fn load_base(&self, with_gateways: bool) -> Result<Snapshot> {
        let ns = &self.config.alb_namespace;
        let albs: Api<ALB2> = Api::namespaced(self.client.clone(), ns);
        let alb = albs
            .get_opt(&self.config.alb_name)
            .await?
            .ok_or_else(|| AlbError::MissingLoadBalancer(self.config.alb_name.clone()))?;

        let selector = format!("{}={}", self.config.label_alb_name(), self.config.alb_name);
        let lp = ListParams::default().labels(&selector);

        let frontends: Api<Frontend> = Api::namespaced(self.client.clone(), ns);
        let rules: Api<Rule> = Api::namespaced(self.client.clone(), ns);

        let mut snapshot = Snapshot::new(alb);
        snapshot.frontends = frontends.list(&lp).await?.items;
        snapshot.rules = rules.list(&lp).await?.items;

        if with_gateways {
            let gateways: Api<Gateway> = Api::all(self.client.clone());
            snapshot.gateways = gateways
                .list(&ListParams::default())
                .await?
                .items
                .into_iter()
                .filter(|g| g.spec.gateway_class_name == self.config.gateway_class)
                .collect();
        }

        debug!(
            frontends = snapshot.frontends.len(),
            rules = snapshot.rules.len(),
            gateways = snapshot.gateways.len(),
            "Loaded snapshot"
        );
        Ok(snapshot)
    }

    /// Adds the services a route references and the project of its namespace
    #[instrument(skip(self, base, services))]
    pub async fn for_route(
        &self,
        base: &Snapshot,
        namespace: &str,
        services: &[(String, String)],
    ) -> Result<Snapshot> {
        let mut snapshot = base.clone();

        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        snapshot.project = namespaces
            .get_opt(namespace)
            .await?
            .and_then(|ns| ns.labels().get(&self.config.label_project()).cloned());

        for (svc_ns, svc_name) in services {
            let key = (svc_ns.clone(), svc_name.clone());
            if snapshot.services.contains_key(&key) {
                continue;
            }
            let api: Api<Service> = Api::namespaced(self.client.clone(), svc_ns);
            if let Some(service) = api.get_opt(svc_name).await? {
                snapshot.services.insert(key, service);
            }
        }
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{alb_json, list_json, namespace_json, service_json, MockService};
    use crate::types::SourceType;

    fn make_config() -> Config {
        Config {
            alb_name: "alb".to_string(),
            alb_namespace: "cpaas-system".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_load_base_missing_alb() {
        let client = MockService::new().into_client();
        let loader = SnapshotLoader::new(client, make_config());
        let err = loader.load_base(false).await.unwrap_err();
        assert!(matches!(err, AlbError::MissingLoadBalancer(name) if name == "alb"));
    }

    #[tokio::test]
    async fn test_load_base_and_route() {
        let client = MockService::new()
            .on_get(
                "/apis/crd.alauda.io/v2beta1/namespaces/cpaas-system/alb2s/alb",
                200,
                &alb_json("alb", &[]),
            )
            .on_get(
                "/apis/crd.alauda.io/v1/namespaces/cpaas-system/frontends",
                200,
                &list_json("FrontendList", vec![]),
            )
            .on_get(
                "/apis/crd.alauda.io/v1/namespaces/cpaas-system/rules",
                200,
                &list_json("RuleList", vec![]),
            )
            .on_get("/api/v1/namespaces/default", 200, &namespace_json("default", Some("p1")))
            .on_get(
                "/api/v1/namespaces/default/services/web",
                200,
                &service_json("default", "web", &[("http", 8080)]),
            )
            .into_client();
        let loader = SnapshotLoader::new(client, make_config());
        let base = loader.load_base(false).await.unwrap();
        assert!(base.frontends.is_empty());

        let snapshot = loader
            .for_route(
                &base,
                "default",
                &[
                    ("default".to_string(), "web".to_string()),
                    ("default".to_string(), "gone".to_string()),
                ],
            )
            .await
            .unwrap();
        assert_eq!(snapshot.project.as_deref(), Some("p1"));
        assert!(snapshot.service("default", "web").is_some());
        assert!(snapshot.service("default", "gone").is_none());
        assert!(snapshot
            .rules_from(&SourceKey::new(SourceType::Ingress, "default", "web"))
            .next()
            .is_none());
    }
}
