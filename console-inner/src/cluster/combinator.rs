use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, Container, ContainerPort, EnvVar, HTTPGetAction, PodSpec,
    PodTemplateSpec, Probe, Service, ServicePort, ServiceSpec, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::{Api, DeleteParams, DynamicObject, PostParams};
use kube::{Client, ResourceExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

use console_core::idents;

use crate::cluster::{
    COMBINATOR_NAMESPACE, ClusterError, INGRESS_NAMESPACE, ingress_route_resource,
};

/// Image every combinator pod runs.
const COMBINATOR_IMAGE: &str = "ghcr.io/app238/combinator:latest";

/// Port the combinator process listens on.
pub const COMBINATOR_PORT: i32 = 8899;

/// TLS secret terminating combinator hostnames.
const COMBINATOR_TLS_SECRET: &str = "combinator-tls";

/// Timeout for the in-cluster `/reload` call.
const RELOAD_TIMEOUT: Duration = Duration::from_secs(10);

/// One relational-schema handle in a combinator config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RdbItem {
    pub id: String,
    pub name: String,
    pub url: String,
}

/// One key-value handle in a combinator config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KvItem {
    pub id: String,
    pub url: String,
    #[serde(rename = "kv_type")]
    pub kv_type: String,
}

/// The JSON document mounted into the combinator pod and pushed through its
/// `/reload` endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CombinatorConfig {
    #[serde(rename = "rdb")]
    pub rdbs: Vec<RdbItem>,
    #[serde(rename = "kv")]
    pub kvs: Vec<KvItem>,
}

impl CombinatorConfig {
    /// Parses the opaque config string from a `CombinatorApp` spec. An
    /// empty string is an empty config.
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        if raw.is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(raw)
    }

    /// Serializes to the canonical pretty form stored in the CR.
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).expect("combinator config serialization cannot fail")
    }

    /// The config every tenant starts with.
    pub fn empty_json() -> String {
        Self::default().to_json()
    }
}

/// Desired cluster shape of one tenant's combinator, as read from its
/// `CombinatorApp` spec.
#[derive(Debug, Clone, PartialEq)]
pub struct CombinatorWorkload {
    pub user_uid: String,
    /// Opaque JSON config string, stored verbatim in the ConfigMap.
    pub config: String,
}

impl CombinatorWorkload {
    pub fn name(&self) -> String {
        idents::combinator_name(&self.user_uid)
    }

    pub fn config_map_name(&self) -> String {
        idents::combinator_config_map_name(&self.user_uid)
    }

    pub fn labels(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("app".to_string(), self.name()),
            ("user-uid".to_string(), self.user_uid.clone()),
        ])
    }

    /// Builds the ConfigMap carrying `config.json`.
    pub fn config_map(&self) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some(self.config_map_name()),
                namespace: Some(COMBINATOR_NAMESPACE.to_string()),
                labels: Some(self.labels()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([(
                "config.json".to_string(),
                self.config.clone(),
            )])),
            ..Default::default()
        }
    }

    fn pod_spec(&self) -> PodSpec {
        let probe = |initial: i32, period: i32| Probe {
            http_get: Some(HTTPGetAction {
                path: Some("/health".to_string()),
                port: IntOrString::Int(COMBINATOR_PORT),
                ..Default::default()
            }),
            initial_delay_seconds: Some(initial),
            period_seconds: Some(period),
            ..Default::default()
        };

        PodSpec {
            node_selector: Some(BTreeMap::from([(
                "project".to_string(),
                "combinator-affinitive".to_string(),
            )])),
            containers: vec![Container {
                name: "combinator".to_string(),
                image: Some(COMBINATOR_IMAGE.to_string()),
                image_pull_policy: Some("Always".to_string()),
                ports: Some(vec![ContainerPort {
                    container_port: COMBINATOR_PORT,
                    name: Some("http".to_string()),
                    ..Default::default()
                }]),
                args: Some(
                    [
                        "start",
                        "-c",
                        "/config/config.json",
                        "-l",
                        "0.0.0.0:8899",
                        "--watch",
                        "all",
                        "--watch-interval",
                        "60",
                    ]
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
                ),
                env: Some(vec![EnvVar {
                    name: "USER_UID".to_string(),
                    value: Some(self.user_uid.clone()),
                    ..Default::default()
                }]),
                volume_mounts: Some(vec![VolumeMount {
                    name: "config".to_string(),
                    mount_path: "/config".to_string(),
                    read_only: Some(true),
                    ..Default::default()
                }]),
                liveness_probe: Some(probe(10, 10)),
                readiness_probe: Some(probe(5, 5)),
                ..Default::default()
            }],
            volumes: Some(vec![Volume {
                name: "config".to_string(),
                config_map: Some(ConfigMapVolumeSource {
                    name: self.config_map_name(),
                    ..Default::default()
                }),
                ..Default::default()
            }]),
            ..Default::default()
        }
    }

    pub fn deployment(&self) -> Deployment {
        let name = self.name();
        Deployment {
            metadata: ObjectMeta {
                name: Some(name.clone()),
                namespace: Some(COMBINATOR_NAMESPACE.to_string()),
                labels: Some(self.labels()),
                ..Default::default()
            },
            spec: Some(DeploymentSpec {
                replicas: Some(1),
                selector: LabelSelector {
                    match_labels: Some(BTreeMap::from([("app".to_string(), name)])),
                    ..Default::default()
                },
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(self.labels()),
                        ..Default::default()
                    }),
                    spec: Some(self.pod_spec()),
                },
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    pub fn service(&self) -> Service {
        let name = self.name();
        Service {
            metadata: ObjectMeta {
                name: Some(name.clone()),
                namespace: Some(COMBINATOR_NAMESPACE.to_string()),
                labels: Some(self.labels()),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                selector: Some(BTreeMap::from([("app".to_string(), name)])),
                ports: Some(vec![ServicePort {
                    name: Some("http".to_string()),
                    port: COMBINATOR_PORT,
                    protocol: Some("TCP".to_string()),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    pub fn ingress_route(&self, domain: &str) -> DynamicObject {
        let name = self.name();
        let host = idents::combinator_host(&self.user_uid, domain);

        let mut route = DynamicObject::new(&name, &ingress_route_resource());
        route.metadata.namespace = Some(INGRESS_NAMESPACE.to_string());
        route.metadata.labels = Some(self.labels());
        route.data = json!({
            "spec": {
                "entryPoints": ["websecure"],
                "routes": [{
                    "match": format!("Host(`{host}`)"),
                    "kind": "Rule",
                    "services": [{
                        "name": name,
                        "namespace": COMBINATOR_NAMESPACE,
                        "port": COMBINATOR_PORT,
                    }],
                }],
                "tls": { "secretName": COMBINATOR_TLS_SECRET },
            }
        });
        route
    }

    /// Ensures the ConfigMap exists and carries the current config. Unlike
    /// the worker env map, this one is owned by the controller and is
    /// overwritten on every reconcile.
    pub async fn ensure_config_map(&self, client: &Client) -> Result<(), ClusterError> {
        let api: Api<ConfigMap> = Api::namespaced(client.clone(), COMBINATOR_NAMESPACE);
        let desired = self.config_map();

        match api.get_opt(&self.config_map_name()).await? {
            None => {
                api.create(&PostParams::default(), &desired).await?;
            }
            Some(mut existing) => {
                existing.data = desired.data;
                existing.metadata.labels = desired.metadata.labels;
                api.replace(&self.config_map_name(), &PostParams::default(), &existing)
                    .await?;
            }
        }
        Ok(())
    }

    pub async fn ensure_deployment(&self, client: &Client) -> Result<(), ClusterError> {
        let api: Api<Deployment> = Api::namespaced(client.clone(), COMBINATOR_NAMESPACE);
        let name = self.name();
        let mut deployment = self.deployment();

        match api.get_opt(&name).await? {
            None => {
                api.create(&PostParams::default(), &deployment).await?;
            }
            Some(existing) => {
                deployment.metadata.resource_version = existing.resource_version();
                api.replace(&name, &PostParams::default(), &deployment).await?;
            }
        }
        Ok(())
    }

    pub async fn ensure_service(&self, client: &Client) -> Result<(), ClusterError> {
        let api: Api<Service> = Api::namespaced(client.clone(), COMBINATOR_NAMESPACE);
        if api.get_opt(&self.name()).await?.is_none() {
            api.create(&PostParams::default(), &self.service()).await?;
        }
        Ok(())
    }

    pub async fn ensure_ingress_route(
        &self,
        client: &Client,
        domain: &str,
    ) -> Result<(), ClusterError> {
        let api: Api<DynamicObject> =
            Api::namespaced_with(client.clone(), INGRESS_NAMESPACE, &ingress_route_resource());
        let name = self.name();
        let mut route = self.ingress_route(domain);

        match api.get_opt(&name).await? {
            None => {
                api.create(&PostParams::default(), &route).await?;
            }
            Some(existing) => {
                route.metadata.resource_version = existing.resource_version();
                api.replace(&name, &PostParams::default(), &route).await?;
            }
        }
        Ok(())
    }

    /// Deletes every child object, best-effort.
    pub async fn delete_all(&self, client: &Client) {
        let name = self.name();
        let params = DeleteParams::default();

        let deployments: Api<Deployment> = Api::namespaced(client.clone(), COMBINATOR_NAMESPACE);
        let services: Api<Service> = Api::namespaced(client.clone(), COMBINATOR_NAMESPACE);
        let config_maps: Api<ConfigMap> = Api::namespaced(client.clone(), COMBINATOR_NAMESPACE);
        let routes: Api<DynamicObject> =
            Api::namespaced_with(client.clone(), INGRESS_NAMESPACE, &ingress_route_resource());

        if let Err(e) = deployments.delete(&name, &params).await {
            debug!(combinator = %name, "delete deployment: {e}");
        }
        if let Err(e) = services.delete(&name, &params).await {
            debug!(combinator = %name, "delete service: {e}");
        }
        if let Err(e) = config_maps.delete(&self.config_map_name(), &params).await {
            debug!(combinator = %name, "delete configmap: {e}");
        }
        if let Err(e) = routes.delete(&name, &params).await {
            debug!(combinator = %name, "delete ingress route: {e}");
        }
    }

    /// Pushes the current config to the pod's `/reload` endpoint through
    /// the cluster-internal service name.
    ///
    /// The pod may not exist yet; callers treat failures as non-fatal.
    pub async fn reload_config(&self, http: &reqwest::Client) -> Result<(), ClusterError> {
        let url = format!(
            "http://{}.{}.svc.cluster.local:{}/reload",
            self.name(),
            COMBINATOR_NAMESPACE,
            COMBINATOR_PORT,
        );

        let response = http
            .post(&url)
            .timeout(RELOAD_TIMEOUT)
            .header("Content-Type", "application/json")
            .body(self.config.clone())
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ClusterError::Reload(status, body));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workload() -> CombinatorWorkload {
        CombinatorWorkload {
            user_uid: "uid1".into(),
            config: CombinatorConfig::empty_json(),
        }
    }

    #[test]
    fn config_parse_accepts_empty_string() {
        let config = CombinatorConfig::parse("").unwrap();
        assert!(config.rdbs.is_empty());
        assert!(config.kvs.is_empty());
    }

    #[test]
    fn config_round_trips_through_canonical_json() {
        let config = CombinatorConfig {
            rdbs: vec![RdbItem {
                id: "r1".into(),
                name: "orders".into(),
                url: "postgresql://user_uid1@h:26257/db_uid1".into(),
            }],
            kvs: vec![KvItem {
                id: "k1".into(),
                url: "redis://kv:6379".into(),
                kv_type: "redis".into(),
            }],
        };

        let parsed = CombinatorConfig::parse(&config.to_json()).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn config_json_uses_wire_keys() {
        let json = workload().config;
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert!(value.get("rdb").is_some());
        assert!(value.get("kv").is_some());
    }

    #[test]
    fn config_map_holds_config_json_key() {
        let cm = workload().config_map();
        assert_eq!(cm.metadata.name.as_deref(), Some("combinator-config-uid1"));
        assert!(cm.data.unwrap().contains_key("config.json"));
    }

    #[test]
    fn deployment_mounts_the_config_volume() {
        let deployment = workload().deployment();
        let pod = deployment.spec.unwrap().template.spec.unwrap();

        let volume = &pod.volumes.as_ref().unwrap()[0];
        assert_eq!(volume.config_map.as_ref().unwrap().name, "combinator-config-uid1");

        let container = &pod.containers[0];
        let mount = &container.volume_mounts.as_ref().unwrap()[0];
        assert_eq!(mount.mount_path, "/config");
        assert_eq!(mount.read_only, Some(true));

        let args = container.args.as_ref().unwrap();
        assert!(args.contains(&"/config/config.json".to_string()));
        assert!(args.contains(&"--watch-interval".to_string()));
    }

    #[test]
    fn ingress_route_matches_combinator_hostname() {
        let route = workload().ingress_route("app238.com");
        let spec = &route.data["spec"];
        assert_eq!(spec["routes"][0]["match"], "Host(`uid1.combinator.app238.com`)");
        assert_eq!(spec["routes"][0]["services"][0]["port"], COMBINATOR_PORT);
    }
}
