use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, PostParams};
use kube::runtime::wait::{await_condition, conditions};
use kube::{Client, CustomResource, CustomResourceExt, Resource};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

use crate::cluster::ClusterError;

/// Seconds to wait for a freshly created CRD to become established.
const CRD_ESTABLISH_TIMEOUT_SECS: u64 = 30;

/// Desired shape of one tenant worker: a user-supplied container image
/// exposed on a per-worker hostname.
#[derive(CustomResource, Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "console.app238.com",
    version = "v1",
    kind = "WorkerApp",
    plural = "workerapps",
    singular = "workerapp",
    shortname = "wa",
    namespaced,
    status = "WorkerAppStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct WorkerAppSpec {
    #[serde(rename = "workerID")]
    pub worker_id: String,
    #[serde(rename = "ownerID")]
    pub owner_id: String,
    pub image: String,
    pub port: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct WorkerAppStatus {
    pub phase: String,
    pub message: String,
}

/// Desired shape of one tenant combinator: the per-tenant aggregator pod
/// plus its live JSON configuration of data-backend references.
#[derive(CustomResource, Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "console.app238.com",
    version = "v1",
    kind = "CombinatorApp",
    plural = "combinatorapps",
    singular = "combinatorapp",
    shortname = "ca",
    namespaced,
    status = "CombinatorAppStatus"
)]
pub struct CombinatorAppSpec {
    #[serde(rename = "ownerID")]
    pub owner_id: String,
    /// Opaque JSON document consumed by the combinator process.
    pub config: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CombinatorAppStatus {
    pub phase: String,
    pub message: String,
}

/// Reconcile phases reported through the status subresource.
pub mod phase {
    pub const DEPLOYING: &str = "Deploying";
    pub const RUNNING: &str = "Running";
    pub const FAILED: &str = "Failed";
}

/// Installs both CRDs, waiting for newly created ones to be established.
pub async fn ensure_crds(client: &Client) -> Result<(), ClusterError> {
    ensure_crd(client, WorkerApp::crd()).await?;
    ensure_crd(client, CombinatorApp::crd()).await?;
    Ok(())
}

async fn ensure_crd(client: &Client, crd: CustomResourceDefinition) -> Result<(), ClusterError> {
    let api: Api<CustomResourceDefinition> = Api::all(client.clone());
    let name = crd.meta().name.clone().unwrap_or_default();

    if api.get_opt(&name).await?.is_some() {
        info!(crd = %name, "crd already exists");
        return Ok(());
    }

    api.create(&PostParams::default(), &crd).await?;
    info!(crd = %name, "crd created, waiting for it to be established");

    let established = await_condition(api, &name, conditions::is_crd_established());
    tokio::time::timeout(Duration::from_secs(CRD_ESTABLISH_TIMEOUT_SECS), established)
        .await
        .map_err(|_| ClusterError::CrdNotEstablished(name.clone(), CRD_ESTABLISH_TIMEOUT_SECS))?
        .map_err(|e| ClusterError::Kube(kube::Error::Service(Box::new(e))))?;

    info!(crd = %name, "crd established");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_app_spec_uses_wire_field_names() {
        let spec = WorkerAppSpec {
            worker_id: "w1".into(),
            owner_id: "uid1".into(),
            image: "img:1".into(),
            port: 8080,
        };
        let value = serde_json::to_value(&spec).unwrap();
        assert_eq!(value["workerID"], "w1");
        assert_eq!(value["ownerID"], "uid1");
        assert_eq!(value["image"], "img:1");
        assert_eq!(value["port"], 8080);
    }

    #[test]
    fn crds_carry_status_subresource() {
        for crd in [WorkerApp::crd(), CombinatorApp::crd()] {
            let version = &crd.spec.versions[0];
            assert!(
                version
                    .subresources
                    .as_ref()
                    .and_then(|s| s.status.as_ref())
                    .is_some(),
                "status subresource missing on {}",
                crd.spec.names.kind
            );
        }
    }

    #[test]
    fn crd_names_are_namespaced_under_the_platform_group() {
        use crate::cluster::{GROUP, VERSION};

        for crd in [WorkerApp::crd(), CombinatorApp::crd()] {
            assert_eq!(crd.spec.group, GROUP);
            assert_eq!(crd.spec.scope, "Namespaced");
            assert_eq!(crd.spec.versions[0].name, VERSION);
        }
        assert_eq!(WorkerApp::crd().spec.names.plural, "workerapps");
        assert_eq!(CombinatorApp::crd().spec.names.plural, "combinatorapps");
    }
}
