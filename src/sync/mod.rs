// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Periodic resynchronization of every watched route.

pub mod resync;

pub use resync::{ResyncSweeper, SweepReport};
