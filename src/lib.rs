// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
pub mod config;
pub mod constants;
pub mod dsl;
pub mod error;
pub mod kubernetes;
pub mod reconcilers;
pub mod shutdown;
pub mod sync;
pub mod synth;
pub mod types;

#[cfg(test)]
pub mod test_utils;
