// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Content fingerprints of synthesized rules.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt::Write;

use crate::config::Config;
use crate::constants::nginx;
use crate::error::Result;
use crate::types::{Rule, SourceKey};

/// Canonical text of the meaningful parts of an object.
///
/// Only labels and annotations this controller owns take part, the source version annotation
/// excepted; server-assigned metadata (name, uid, resource version, timestamps) never does.
/// Owner references contribute kind, name and uid of the owner.
pub fn identity<S: Serialize>(meta: &ObjectMeta, spec: &S, config: &Config) -> Result<String> {
    let mut out = String::new();
    let version_key = config.annotation_source_version();

    if let Some(labels) = &meta.labels {
        for (k, v) in labels.iter().filter(|(k, _)| config.owns_key(k)) {
            let _ = writeln!(out, "label:{}={}", k, v);
        }
    }
    if let Some(annotations) = &meta.annotations {
        for (k, v) in annotations.iter().filter(|(k, _)| {
            **k != version_key && (config.owns_key(k) || k.starts_with(nginx::PREFIX))
        }) {
            let _ = writeln!(out, "annotation:{}={}", k, v);
        }
    }
    for owner in meta.owner_references.iter().flatten() {
        let _ = writeln!(out, "owner:{}/{}/{}", owner.kind, owner.name, owner.uid);
    }
    out.push_str(&serde_json::to_string(spec)?);
    Ok(out)
}

pub fn digest(text: &str) -> String {
    format!("{:x}", Sha256::digest(text.as_bytes()))
}

/// Identity hash of a rule, used to compare expected and observed rules
pub fn rule_hash(rule: &Rule, config: &Config) -> Result<String> {
    Ok(digest(&identity(&rule.metadata, &rule.spec, config)?))
}

/// Short label-safe hash of a route key
pub fn source_hash(key: &SourceKey) -> String {
    digest(&key.to_string())[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RuleSpec;
    use std::collections::BTreeMap;

    fn make_rule(url: &str, port: i32) -> Rule {
        let mut rule = Rule::new(
            "alb-00080-abc",
            RuleSpec {
                url: url.to_string(),
                priority: 5,
                service_group: Some(crate::types::ServiceGroup {
                    services: vec![crate::types::BackendService {
                        namespace: "default".to_string(),
                        name: "web".to_string(),
                        port,
                        weight: 100,
                    }],
                    ..Default::default()
                }),
                ..Default::default()
            },
        );
        rule.metadata.labels = Some(BTreeMap::from([
            ("alb2.cpaas.io/name".to_string(), "alb".to_string()),
            ("alb2.cpaas.io/source-index".to_string(), "0-0".to_string()),
            ("app".to_string(), "web".to_string()),
        ]));
        rule.metadata.annotations = Some(BTreeMap::from([
            (
                "alb2.cpaas.io/source-ingress-version".to_string(),
                "1".to_string(),
            ),
            (
                "alb2.cpaas.io/source-ingress-rule-index".to_string(),
                "0".to_string(),
            ),
        ]));
        rule
    }

    #[test]
    fn test_hash_ignores_server_metadata() {
        let config = Config::default();
        let a = make_rule("/a", 80);
        let mut b = make_rule("/a", 80);
        b.metadata.name = Some("other-name".to_string());
        b.metadata.uid = Some("uid-2".to_string());
        b.metadata.resource_version = Some("42".to_string());
        b.metadata
            .labels
            .as_mut()
            .unwrap()
            .insert("app".to_string(), "changed".to_string());
        b.metadata.annotations.as_mut().unwrap().insert(
            "alb2.cpaas.io/source-ingress-version".to_string(),
            "7".to_string(),
        );
        assert_eq!(
            rule_hash(&a, &config).unwrap(),
            rule_hash(&b, &config).unwrap()
        );
    }

    #[test]
    fn test_hash_changes_with_semantics() {
        let config = Config::default();
        let base = rule_hash(&make_rule("/a", 80), &config).unwrap();
        assert_ne!(base, rule_hash(&make_rule("/b", 80), &config).unwrap());
        assert_ne!(base, rule_hash(&make_rule("/a", 8080), &config).unwrap());

        let mut relabeled = make_rule("/a", 80);
        relabeled
            .metadata
            .labels
            .as_mut()
            .unwrap()
            .insert("alb2.cpaas.io/source-index".to_string(), "0-1".to_string());
        assert_ne!(base, rule_hash(&relabeled, &config).unwrap());
    }

    #[test]
    fn test_source_hash_is_label_safe() {
        let key = SourceKey::new(crate::types::SourceType::Ingress, "default", "web");
        let h = source_hash(&key);
        assert_eq!(h.len(), 16);
        assert_eq!(h, source_hash(&key));
    }
}
