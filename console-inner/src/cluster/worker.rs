use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapEnvSource, Container, ContainerPort, EnvFromSource, PodSpec,
    PodTemplateSpec, Secret, SecretEnvSource, Service, ServicePort, ServiceSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kube::api::{Api, DeleteParams, DynamicObject, PostParams};
use kube::{Client, ResourceExt};
use serde_json::json;
use std::collections::BTreeMap;
use tracing::debug;

use console_core::idents;

use crate::cluster::{
    ClusterError, INGRESS_NAMESPACE, WORKER_NAMESPACE, ingress_route_resource,
};

/// TLS secret terminating worker hostnames.
const WORKER_TLS_SECRET: &str = "worker-tls";

/// Desired cluster shape of one worker, as read from its `WorkerApp` spec.
///
/// All five child builders are deterministic functions of these four
/// fields plus the platform domain.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerWorkload {
    pub worker_id: String,
    pub owner_id: String,
    pub image: String,
    pub port: i32,
}

impl WorkerWorkload {
    /// Shared name of the CR, Deployment, Service, and IngressRoute.
    pub fn name(&self) -> String {
        idents::worker_name(&self.worker_id, &self.owner_id)
    }

    pub fn env_config_map_name(&self) -> String {
        idents::worker_env_config_map_name(&self.worker_id, &self.owner_id)
    }

    pub fn secret_name(&self) -> String {
        idents::worker_secret_name(&self.worker_id, &self.owner_id)
    }

    /// Labels stamped on every child so events can be traced back to the
    /// owning CR.
    pub fn labels(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("app".to_string(), self.name()),
            ("worker-id".to_string(), self.worker_id.clone()),
            ("owner-id".to_string(), self.owner_id.clone()),
        ])
    }

    /// Builds the single-replica Deployment running the tenant image, with
    /// env sourced from the worker's ConfigMap and Secret.
    pub fn deployment(&self) -> Deployment {
        let name = self.name();
        Deployment {
            metadata: ObjectMeta {
                name: Some(name.clone()),
                namespace: Some(WORKER_NAMESPACE.to_string()),
                labels: Some(self.labels()),
                ..Default::default()
            },
            spec: Some(DeploymentSpec {
                replicas: Some(1),
                selector: LabelSelector {
                    match_labels: Some(BTreeMap::from([("app".to_string(), name.clone())])),
                    ..Default::default()
                },
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(self.labels()),
                        ..Default::default()
                    }),
                    spec: Some(PodSpec {
                        containers: vec![Container {
                            name: name.clone(),
                            image: Some(self.image.clone()),
                            ports: Some(vec![ContainerPort {
                                container_port: self.port,
                                ..Default::default()
                            }]),
                            env_from: Some(vec![
                                EnvFromSource {
                                    config_map_ref: Some(ConfigMapEnvSource {
                                        name: self.env_config_map_name(),
                                        ..Default::default()
                                    }),
                                    ..Default::default()
                                },
                                EnvFromSource {
                                    secret_ref: Some(SecretEnvSource {
                                        name: self.secret_name(),
                                        ..Default::default()
                                    }),
                                    ..Default::default()
                                },
                            ]),
                            ..Default::default()
                        }],
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Builds the cluster-internal Service in front of the worker pod.
    pub fn service(&self) -> Service {
        let name = self.name();
        Service {
            metadata: ObjectMeta {
                name: Some(name.clone()),
                namespace: Some(WORKER_NAMESPACE.to_string()),
                labels: Some(self.labels()),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                selector: Some(BTreeMap::from([("app".to_string(), name)])),
                ports: Some(vec![ServicePort {
                    port: self.port,
                    protocol: Some("TCP".to_string()),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Builds the (initially empty) env ConfigMap. Contents are owned by
    /// tenant mutations, never by the controller.
    pub fn env_config_map(&self) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some(self.env_config_map_name()),
                namespace: Some(WORKER_NAMESPACE.to_string()),
                labels: Some(self.labels()),
                ..Default::default()
            },
            data: Some(BTreeMap::new()),
            ..Default::default()
        }
    }

    /// Builds the (initially empty) opaque Secret. Contents are owned by
    /// tenant mutations, never by the controller.
    pub fn secret(&self) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some(self.secret_name()),
                namespace: Some(WORKER_NAMESPACE.to_string()),
                labels: Some(self.labels()),
                ..Default::default()
            },
            type_: Some("Opaque".to_string()),
            string_data: Some(BTreeMap::new()),
            ..Default::default()
        }
    }

    /// Builds the IngressRoute exposing the worker on its hostname.
    pub fn ingress_route(&self, domain: &str) -> DynamicObject {
        let name = self.name();
        let host = idents::worker_host(&self.worker_id, &self.owner_id, domain);

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
                        "namespace": WORKER_NAMESPACE,
                        "port": self.port,
                    }],
                }],
                "tls": { "secretName": WORKER_TLS_SECRET },
            }
        });
        route
    }

    /// Ensures the env ConfigMap exists. Create-only: an existing map is
    /// never overwritten with the empty default.
    pub async fn ensure_config_map(&self, client: &Client) -> Result<(), ClusterError> {
        let api: Api<ConfigMap> = Api::namespaced(client.clone(), WORKER_NAMESPACE);
        if api.get_opt(&self.env_config_map_name()).await?.is_none() {
            api.create(&PostParams::default(), &self.env_config_map()).await?;
        }
        Ok(())
    }

    /// Ensures the Secret exists. Create-only, like the ConfigMap.
    pub async fn ensure_secret(&self, client: &Client) -> Result<(), ClusterError> {
        let api: Api<Secret> = Api::namespaced(client.clone(), WORKER_NAMESPACE);
        if api.get_opt(&self.secret_name()).await?.is_none() {
            api.create(&PostParams::default(), &self.secret()).await?;
        }
        Ok(())
    }

    /// Ensures the Deployment matches the spec, creating or replacing it.
    pub async fn ensure_deployment(&self, client: &Client) -> Result<(), ClusterError> {
        let api: Api<Deployment> = Api::namespaced(client.clone(), WORKER_NAMESPACE);
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

    /// Ensures the Service exists. Create-only: cluster IPs are immutable.
    pub async fn ensure_service(&self, client: &Client) -> Result<(), ClusterError> {
        let api: Api<Service> = Api::namespaced(client.clone(), WORKER_NAMESPACE);
        if api.get_opt(&self.name()).await?.is_none() {
            api.create(&PostParams::default(), &self.service()).await?;
        }
        Ok(())
    }

    /// Ensures the IngressRoute matches the spec, creating or replacing it.
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

    /// Deletes every child object. Best-effort: not-found is ignored so the
    /// teardown can run against a partially created worker.
    pub async fn delete_all(&self, client: &Client) {
        let name = self.name();
        let params = DeleteParams::default();

        let deployments: Api<Deployment> = Api::namespaced(client.clone(), WORKER_NAMESPACE);
        let services: Api<Service> = Api::namespaced(client.clone(), WORKER_NAMESPACE);
        let config_maps: Api<ConfigMap> = Api::namespaced(client.clone(), WORKER_NAMESPACE);
        let secrets: Api<Secret> = Api::namespaced(client.clone(), WORKER_NAMESPACE);
        let routes: Api<DynamicObject> =
            Api::namespaced_with(client.clone(), INGRESS_NAMESPACE, &ingress_route_resource());

        if let Err(e) = deployments.delete(&name, &params).await {
            debug!(worker = %name, "delete deployment: {e}");
        }
        if let Err(e) = services.delete(&name, &params).await {
            debug!(worker = %name, "delete service: {e}");
        }
        if let Err(e) = config_maps.delete(&self.env_config_map_name(), &params).await {
            debug!(worker = %name, "delete env configmap: {e}");
        }
        if let Err(e) = secrets.delete(&self.secret_name(), &params).await {
            debug!(worker = %name, "delete secret: {e}");
        }
        if let Err(e) = routes.delete(&name, &params).await {
            debug!(worker = %name, "delete ingress route: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workload() -> WorkerWorkload {
        WorkerWorkload {
            worker_id: "w1".into(),
            owner_id: "uid1".into(),
            image: "img:1".into(),
            port: 8080,
        }
    }

    #[test]
    fn deployment_wires_env_from_config_map_and_secret() {
        let deployment = workload().deployment();
        let container = &deployment.spec.unwrap().template.spec.unwrap().containers[0];

        let env_from = container.env_from.as_ref().unwrap();
        assert_eq!(env_from[0].config_map_ref.as_ref().unwrap().name, "w1-uid1-env");
        assert_eq!(env_from[1].secret_ref.as_ref().unwrap().name, "w1-uid1-secret");
        assert_eq!(container.image.as_deref(), Some("img:1"));
        assert_eq!(container.ports.as_ref().unwrap()[0].container_port, 8080);
    }

    #[test]
    fn children_carry_reverse_lookup_labels() {
        let w = workload();
        for labels in [
            w.deployment().metadata.labels.unwrap(),
            w.service().metadata.labels.unwrap(),
            w.env_config_map().metadata.labels.unwrap(),
            w.secret().metadata.labels.unwrap(),
            w.ingress_route("app238.com").metadata.labels.unwrap(),
        ] {
            assert_eq!(labels.get("app").map(String::as_str), Some("w1-uid1"));
            assert_eq!(labels.get("worker-id").map(String::as_str), Some("w1"));
            assert_eq!(labels.get("owner-id").map(String::as_str), Some("uid1"));
        }
    }

    #[test]
    fn ingress_route_matches_worker_hostname() {
        let route = workload().ingress_route("app238.com");
        assert_eq!(route.metadata.namespace.as_deref(), Some(INGRESS_NAMESPACE));

        let spec = &route.data["spec"];
        assert_eq!(spec["entryPoints"][0], "websecure");
        assert_eq!(spec["routes"][0]["match"], "Host(`w1-uid1.worker.app238.com`)");
        assert_eq!(spec["routes"][0]["services"][0]["name"], "w1-uid1");
        assert_eq!(spec["routes"][0]["services"][0]["port"], 8080);
        assert_eq!(spec["tls"]["secretName"], WORKER_TLS_SECRET);
    }

    #[test]
    fn selector_matches_pod_labels() {
        let deployment = workload().deployment();
        let spec = deployment.spec.unwrap();
        let selector = spec.selector.match_labels.unwrap();
        let pod_labels = spec.template.metadata.unwrap().labels.unwrap();
        for (key, value) in &selector {
            assert_eq!(pod_labels.get(key), Some(value));
        }
    }
}
