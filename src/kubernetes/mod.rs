// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Kubernetes access: CRD discovery, snapshot loading and plan application.

pub mod apply;
pub mod crd;
pub mod snapshot;

pub use apply::apply_plan;
pub use crd::wait_for_alb_crds;
pub use snapshot::{Snapshot, SnapshotLoader};
