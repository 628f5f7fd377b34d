// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Kubernetes reconcilers that react to watch events.

pub mod gateway;
pub mod ingress;
pub mod orchestrator;
pub mod retry;

pub use gateway::GatewayReconciler;
pub use ingress::IngressReconciler;
pub use orchestrator::Context;
