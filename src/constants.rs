// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

/// Ingress annotations understood by the controller, shared with ingress-nginx
pub mod nginx {
    pub const REWRITE_TARGET: &str = "nginx.ingress.kubernetes.io/rewrite-target";
    pub const ENABLE_CORS: &str = "nginx.ingress.kubernetes.io/enable-cors";
    pub const CORS_ALLOW_HEADERS: &str = "nginx.ingress.kubernetes.io/cors-allow-headers";
    pub const CORS_ALLOW_ORIGIN: &str = "nginx.ingress.kubernetes.io/cors-allow-origin";
    pub const BACKEND_PROTOCOL: &str = "nginx.ingress.kubernetes.io/backend-protocol";
    pub const TEMPORAL_REDIRECT: &str = "nginx.ingress.kubernetes.io/temporal-redirect";
    pub const PERMANENT_REDIRECT: &str = "nginx.ingress.kubernetes.io/permanent-redirect";
    pub const UPSTREAM_VHOST: &str = "nginx.ingress.kubernetes.io/upstream-vhost";
    /// Prefix of every nginx annotation, part of a rule's identity
    pub const PREFIX: &str = "nginx.ingress";
}

/// Legacy ingress class annotation, consulted when `spec.ingressClassName` is unset
pub const INGRESS_CLASS_ANNOTATION: &str = "kubernetes.io/ingress.class";

/// The controller name reported as field manager
pub const CONTROLLER_NAME: &str = "alb-controller";

/// Priority of ingress rules without an override annotation
pub const DEFAULT_PRIORITY: i64 = 5;

/// Backend protocols accepted from the backend-protocol annotation
pub const VALID_BACKEND_PROTOCOLS: [&str; 2] = ["http", "https"];

/// Project value that grants a load balancer every namespace
pub const ALL_PROJECTS: &str = "ALL_ALL";

/// Default cluster-wide values, overridable through the environment
pub mod defaults {
    pub const ALB_NAMESPACE: &str = "cpaas-system";
    pub const DOMAIN: &str = "cpaas.io";
    pub const HTTP_PORT: i32 = 80;
    pub const HTTPS_PORT: i32 = 443;
    pub const GATEWAY_CLASS: &str = "exclusive-gateway";
    pub const RESYNC_PERIOD_SECS: u64 = 300;
    pub const WORKERS: u16 = 4;
    /// Metrics and status ports of the load balancer
    pub const RESERVED_PORTS: &str = "1936,11782";
}

/// Requeue delays used by the reconcilers
pub mod requeue {
    /// Delay before the pass that follows a frontend write
    pub const FRONTEND_SETTLE_MILLIS: u64 = 1000;
    /// Base delay for exponential backoff after a failed pass
    pub const BASE_DELAY_SECS: u64 = 2;
    /// Cap for exponential backoff
    pub const MAX_DELAY_SECS: u64 = 300;
}

/// CRD polling configuration
pub mod crd {
    /// Initial polling interval in seconds when waiting for CRD
    pub const POLL_INTERVAL_SECS: u64 = 10;
    /// Maximum polling interval in seconds (exponential backoff cap)
    pub const POLL_MAX_INTERVAL_SECS: u64 = 60;
    /// API group of Frontend and Rule
    pub const GROUP: &str = "crd.alauda.io";
    pub const VERSION: &str = "v1";
}
