//! Cluster access: custom resource definitions, the deterministic child
//! resource shapes for both workloads, and custom-domain wiring.

pub mod combinator;
pub mod crds;
pub mod custom_domain;
pub mod worker;

use kube::api::{ApiResource, GroupVersionKind};
use thiserror::Error;

/// Namespace holding every tenant worker workload.
pub const WORKER_NAMESPACE: &str = "worker";

/// Namespace holding every tenant combinator workload.
pub const COMBINATOR_NAMESPACE: &str = "combinator";

/// Namespace holding ingress routes, certificates, and external services.
pub const INGRESS_NAMESPACE: &str = "ingress";

/// API group of the platform's custom resources.
pub const GROUP: &str = "console.app238.com";

/// Version of the platform's custom resources.
pub const VERSION: &str = "v1";

/// Annotation patched onto pod templates to trigger rolling restarts.
pub const RESTARTED_AT_ANNOTATION: &str = "console.app238.com/restartedAt";

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("An error occurred with kube when dealing with the cluster: {0}")]
    Kube(#[from] kube::Error),

    #[error("An error occurred in serde when dealing with cluster resources: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("reload returned {0}: {1}")]
    Reload(reqwest::StatusCode, String),

    #[error("failed to reach the combinator pod: {0}")]
    ReloadTransport(#[from] reqwest::Error),

    #[error("CRD {0} not established after {1}s")]
    CrdNotEstablished(String, u64),
}

/// Descriptor for Traefik `IngressRoute` objects.
pub fn ingress_route_resource() -> ApiResource {
    ApiResource::from_gvk(&GroupVersionKind::gvk("traefik.io", "v1alpha1", "IngressRoute"))
}

/// Descriptor for cert-manager `Certificate` objects.
pub fn certificate_resource() -> ApiResource {
    ApiResource::from_gvk(&GroupVersionKind::gvk("cert-manager.io", "v1", "Certificate"))
}
