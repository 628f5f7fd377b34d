// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
pub mod alb;
pub mod gateway;

pub use alb::{
    Alb2Spec, BackendService, DslxTerm, Frontend, FrontendSpec, Protocol, Rule, RuleSpec, ServiceGroup,
    Source, SourceKey, SourceType, ALB2,
};
pub use gateway::{Gateway, HTTPRoute, TCPRoute, TLSRoute, UDPRoute};
