// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AlbError {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Service {namespace}/{name} has no port {port}")]
    UnresolvedPort {
        namespace: String,
        name: String,
        port: String,
    },

    #[error("Invalid route: {0}")]
    Validation(String),

    #[error("Port {port} is already served as {existing}, cannot serve it as {wanted}")]
    PortConflict {
        port: i32,
        existing: String,
        wanted: String,
    },

    #[error("Load balancer {0} not found")]
    MissingLoadBalancer(String),

    #[error("Finalizer error: {0}")]
    FinalizerError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// How the controller should react to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Network failures, conflicts and writes not yet visible. Retried with backoff.
    Transient,
    /// A referenced Service or port is missing. Retried on the next Service event or resync.
    Resolution,
    /// The route itself is malformed.
    Validation,
    /// Stored state this controller cannot interpret.
    Invariant,
}

impl AlbError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AlbError::KubeError(_) | AlbError::FinalizerError(_) => ErrorKind::Transient,
            AlbError::UnresolvedPort { .. } | AlbError::MissingLoadBalancer(_) => {
                ErrorKind::Resolution
            }
            AlbError::Validation(_) | AlbError::PortConflict { .. } => ErrorKind::Validation,
            AlbError::SerializationError(_) => ErrorKind::Invariant,
        }
    }
}

pub type Result<T> = std::result::Result<T, AlbError>;
