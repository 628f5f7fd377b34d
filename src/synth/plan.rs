// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Diffs expected against observed state into an ordered action plan.

use kube::ResourceExt;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use super::identity::rule_hash;
use super::Expected;
use crate::config::Config;
use crate::error::Result;
use crate::kubernetes::snapshot::Snapshot;
use crate::types::{Frontend, Rule, SourceKey};

#[derive(Debug, Clone)]
pub enum FrontendAction {
    Create(Frontend),
    /// Observed frontend with the fields to write
    Update(Frontend),
}

impl FrontendAction {
    pub fn frontend(&self) -> &Frontend {
        match self {
            FrontendAction::Create(f) | FrontendAction::Update(f) => f,
        }
    }
}

/// Writes one pass has to make.
///
/// A plan with frontend actions carries no rule actions: rules are only planned once every
/// frontend they hang under is visible in a snapshot.
#[derive(Debug, Clone, Default)]
pub struct Plan {
    pub frontends: Vec<FrontendAction>,
    pub create_rules: Vec<Rule>,
    pub delete_rules: Vec<Rule>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.frontends.is_empty() && self.create_rules.is_empty() && self.delete_rules.is_empty()
    }

    /// Whether applying this plan must be followed by another pass
    pub fn needs_second_pass(&self) -> bool {
        !self.frontends.is_empty()
    }
}

/// Plans the writes that converge the observed state of one route to the expected state.
///
/// Only observed rules whose source is `key` and that `recognizes` accepts are considered;
/// anything else in the snapshot is never touched. Frontends are never deleted.
pub fn plan<F>(
    key: &SourceKey,
    expected: &Expected,
    snapshot: &Snapshot,
    config: &Config,
    recognizes: F,
) -> Result<Plan>
where
    F: Fn(&Rule) -> bool,
{
    let mut plan = Plan::default();

    for frontend in &expected.frontends {
        match snapshot.frontend_by_port(frontend.spec.port) {
            None => plan.frontends.push(FrontendAction::Create(frontend.clone())),
            Some(observed)
                if observed.spec.service_group.is_none() && frontend.spec.service_group.is_some() =>
            {
                let mut updated = observed.clone();
                updated.spec.service_group = frontend.spec.service_group.clone();
                updated.spec.source = frontend.spec.source.clone();
                updated.spec.backend_protocol = frontend.spec.backend_protocol.clone();
                plan.frontends.push(FrontendAction::Update(updated));
            }
            Some(_) => {}
        }
    }
    if plan.needs_second_pass() {
        debug!(route = %key, frontends = plan.frontends.len(), "Frontends first");
        return Ok(plan);
    }

    let mut expected_by_hash: BTreeMap<String, &Rule> = BTreeMap::new();
    for rule in &expected.rules {
        expected_by_hash.entry(rule_hash(rule, config)?).or_insert(rule);
    }

    let mut observed_hashes = BTreeSet::new();
    for rule in snapshot.rules_from(key) {
        if !recognizes(rule) {
            debug!(route = %key, rule = %rule.name_any(), "Leaving unrecognized rule alone");
            continue;
        }
        let hash = rule_hash(rule, config)?;
        if !expected_by_hash.contains_key(&hash) || !observed_hashes.insert(hash) {
            plan.delete_rules.push(rule.clone());
        }
    }

    plan.create_rules = expected_by_hash
        .into_iter()
        .filter(|(hash, _)| !observed_hashes.contains(hash))
        .map(|(_, rule)| rule.clone())
        .collect();
    Ok(plan)
}

/// Plans the removal of everything a route produced: its rules are deleted and frontends
/// it set up have their default backend and provenance cleared. Frontends stay.
pub fn cleanup_plan(key: &SourceKey, snapshot: &Snapshot) -> Plan {
    let frontends = snapshot
        .frontends_from(key)
        .map(|f| {
            let mut cleared = f.clone();
            cleared.spec.service_group = None;
            cleared.spec.source = None;
            cleared.spec.backend_protocol = String::new();
            FrontendAction::Update(cleared)
        })
        .collect();
    Plan {
        frontends,
        create_rules: Vec::new(),
        delete_rules: snapshot.rules_from(key).cloned().collect(),
    }
}
