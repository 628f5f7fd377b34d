// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Canonical predicate trees for rule matching.
//!
//! A [`Predicate`] is an ordered list of typed terms combined with AND; every term carries one or
//! more alternatives combined with OR. Terms are kept in the order URL, HOST, then any keyed
//! conditions in the order they were added, so the stored form and the wire form are
//! deterministic for a given input.

use serde_json::{json, Value};

use crate::types::DslxTerm;

/// Characters that turn an implementation-specific ingress path into a regex
const REGEX_METACHARACTERS: &[char] = &['^', '$', '(', ')', ':', '?', '[', ']', '*', '\\'];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    In,
    Regex,
    StartsWith,
    EndsWith,
    Range,
    Exist,
}

impl Op {
    pub fn as_str(&self) -> &'static str {
        match self {
            Op::Eq => "EQ",
            Op::In => "IN",
            Op::Regex => "REGEX",
            Op::StartsWith => "STARTS_WITH",
            Op::EndsWith => "ENDS_WITH",
            Op::Range => "RANGE",
            Op::Exist => "EXIST",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TermType {
    Host,
    Url,
    Header,
    Cookie,
    Param,
    SrcIp,
    Method,
}

impl TermType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TermType::Host => "HOST",
            TermType::Url => "URL",
            TermType::Header => "HEADER",
            TermType::Cookie => "COOKIE",
            TermType::Param => "PARAM",
            TermType::SrcIp => "SRC_IP",
            TermType::Method => "METHOD",
        }
    }

    fn is_keyed(&self) -> bool {
        matches!(self, TermType::Header | TermType::Cookie | TermType::Param)
    }
}

/// How a path string is to be matched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathMatch {
    Exact,
    Prefix,
    /// Regex when the path contains regex metacharacters, prefix otherwise
    ImplementationSpecific,
    Regex,
}

/// One alternative of a term: an operator and its arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    pub op: Op,
    pub args: Vec<String>,
}

impl Condition {
    pub fn new(op: Op, arg: impl Into<String>) -> Self {
        Self {
            op,
            args: vec![arg.into()],
        }
    }

    /// Condition matching a URL path
    pub fn url(path: &str, kind: PathMatch) -> Self {
        match kind {
            PathMatch::Exact => Condition::new(Op::Eq, path),
            PathMatch::Prefix => Condition::new(Op::StartsWith, path),
            PathMatch::Regex => Condition::new(Op::Regex, anchored(path)),
            PathMatch::ImplementationSpecific => {
                if path.contains(REGEX_METACHARACTERS) {
                    Condition::new(Op::Regex, anchored(path))
                } else {
                    Condition::new(Op::StartsWith, path)
                }
            }
        }
    }

    /// Condition matching a host; `*.example.com` matches by suffix
    pub fn host(domain: &str) -> Self {
        match domain.strip_prefix('*') {
            Some(suffix) => Condition::new(Op::EndsWith, suffix),
            None => Condition::new(Op::Eq, domain),
        }
    }

    fn first_arg_len(&self) -> i64 {
        self.args.first().map(|a| a.len() as i64).unwrap_or(0)
    }
}

fn anchored(path: &str) -> String {
    if path.starts_with('^') {
        path.to_string()
    } else {
        format!("^{}", path)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Term {
    pub term_type: TermType,
    /// Header, cookie or parameter name; empty for other types
    pub key: String,
    pub alternatives: Vec<Condition>,
}

impl Term {
    pub fn new(term_type: TermType, alternatives: Vec<Condition>) -> Self {
        Self {
            term_type,
            key: String::new(),
            alternatives,
        }
    }

    pub fn keyed(term_type: TermType, key: &str, alternatives: Vec<Condition>) -> Self {
        Self {
            term_type,
            key: key.to_string(),
            alternatives,
        }
    }

    fn alternative_to_wire(&self, condition: &Condition) -> Value {
        let mut parts = vec![
            Value::from(condition.op.as_str()),
            Value::from(self.term_type.as_str()),
        ];
        if self.term_type.is_keyed() {
            parts.push(Value::from(self.key.as_str()));
        }
        parts.extend(condition.args.iter().map(|a| Value::from(a.as_str())));
        Value::Array(parts)
    }

    fn to_wire(&self) -> Option<Value> {
        match self.alternatives.as_slice() {
            [] => None,
            [single] => Some(self.alternative_to_wire(single)),
            many => {
                let mut parts = vec![Value::from("OR")];
                parts.extend(many.iter().map(|c| self.alternative_to_wire(c)));
                Some(Value::Array(parts))
            }
        }
    }

    /// Specificity score; adding a term never lowers a predicate's total
    fn complexity(&self) -> i64 {
        match self.term_type {
            TermType::Host | TermType::Url => self
                .alternatives
                .iter()
                .map(|c| match (self.term_type, c.op) {
                    (TermType::Host, Op::Eq | Op::In) => 50_000,
                    (TermType::Host, _) => 10_000,
                    (_, Op::Eq) => 2_000,
                    (_, Op::StartsWith) => 1_002 + c.first_arg_len().min(990),
                    _ => 1_000 + c.first_arg_len().min(990),
                })
                .max()
                .unwrap_or(0),
            _ => 100 * self.alternatives.len() as i64,
        }
    }
}

/// An ordered AND of terms
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Predicate {
    terms: Vec<Term>,
}

impl Predicate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Predicate for an ingress path: URL first, then HOST. Empty inputs add no term.
    pub fn for_path(domain: &str, url: &str, kind: PathMatch) -> Self {
        Self::new()
            .with_url(url, kind)
            .with_hosts(&[domain.to_string()])
    }

    pub fn with_url(mut self, url: &str, kind: PathMatch) -> Self {
        if !url.is_empty() {
            self.terms
                .push(Term::new(TermType::Url, vec![Condition::url(url, kind)]));
        }
        self
    }

    /// Adds one HOST term with an alternative per non-empty host
    pub fn with_hosts(mut self, hosts: &[String]) -> Self {
        let alternatives: Vec<Condition> = hosts
            .iter()
            .filter(|h| !h.is_empty())
            .map(|h| Condition::host(h))
            .collect();
        if !alternatives.is_empty() {
            self.terms.push(Term::new(TermType::Host, alternatives));
        }
        self
    }

    pub fn with_term(mut self, term: Term) -> Self {
        if !term.alternatives.is_empty() {
            self.terms.push(term);
        }
        self
    }

    pub fn terms(&self) -> &[Term] {
        &self.terms
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Stored form, as kept in `Rule.spec.dslx`
    pub fn to_dslx(&self) -> Vec<DslxTerm> {
        self.terms
            .iter()
            .map(|t| DslxTerm {
                term_type: t.term_type.as_str().to_string(),
                values: t
                    .alternatives
                    .iter()
                    .map(|c| {
                        let mut v = vec![c.op.as_str().to_string()];
                        v.extend(c.args.iter().cloned());
                        v
                    })
                    .collect(),
                key: t.key.clone(),
            })
            .collect()
    }

    /// Wire form consumed by the data plane: `["AND", term, ...]`, `[]` when empty
    pub fn to_wire(&self) -> Value {
        let terms: Vec<Value> = self.terms.iter().filter_map(Term::to_wire).collect();
        if terms.is_empty() {
            return json!([]);
        }
        let mut parts = vec![Value::from("AND")];
        parts.extend(terms);
        Value::Array(parts)
    }

    pub fn to_wire_string(&self) -> String {
        self.to_wire().to_string()
    }

    /// Specificity of the predicate, larger is more specific
    pub fn complexity(&self) -> i64 {
        self.terms.iter().map(Term::complexity).sum()
    }
}
