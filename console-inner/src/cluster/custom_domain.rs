use k8s_openapi::api::core::v1::{Service, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, DynamicObject, PostParams};
use kube::Client;
use serde_json::json;
use std::collections::BTreeMap;
use tracing::debug;

use console_core::idents;

use crate::cluster::{
    ClusterError, INGRESS_NAMESPACE, certificate_resource, ingress_route_resource,
};

/// ClusterIssuer handing out certificates for tenant-owned hostnames.
const CERT_ISSUER: &str = "cert-issuer";

/// Cluster objects wiring a verified tenant-owned hostname to its upstream.
///
/// All three objects are named `custom-domain-<cdid>` in the ingress
/// namespace and are created only after the TXT challenge succeeds.
#[derive(Debug, Clone)]
pub struct CustomDomainAttachment {
    pub cdid: String,
    pub user_uid: String,
    pub domain: String,
    pub target: String,
}

impl CustomDomainAttachment {
    pub fn name(&self) -> String {
        idents::custom_domain_name(&self.cdid)
    }

    fn labels(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("app".to_string(), "custom-domain".to_string()),
            ("user-uid".to_string(), self.user_uid.clone()),
        ])
    }

    /// ExternalName Service forwarding to the tenant's upstream host.
    pub fn external_service(&self) -> Service {
        Service {
            metadata: ObjectMeta {
                name: Some(self.name()),
                namespace: Some(INGRESS_NAMESPACE.to_string()),
                labels: Some(self.labels()),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                type_: Some("ExternalName".to_string()),
                external_name: Some(self.target.clone()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// cert-manager Certificate for the bare domain.
    pub fn certificate(&self) -> DynamicObject {
        let mut cert = DynamicObject::new(&self.name(), &certificate_resource());
        cert.metadata.namespace = Some(INGRESS_NAMESPACE.to_string());
        cert.metadata.labels = Some(self.labels());
        cert.data = json!({
            "spec": {
                "secretName": idents::custom_domain_tls_secret_name(&self.cdid),
                "dnsNames": [self.domain],
                "issuerRef": { "name": CERT_ISSUER, "kind": "ClusterIssuer" },
            }
        });
        cert
    }

    /// IngressRoute terminating TLS for the domain and forwarding to the
    /// ExternalName service.
    pub fn ingress_route(&self) -> DynamicObject {
        let name = self.name();
        let mut route = DynamicObject::new(&name, &ingress_route_resource());
        route.metadata.namespace = Some(INGRESS_NAMESPACE.to_string());
        route.metadata.labels = Some(self.labels());
        route.data = json!({
            "spec": {
                "entryPoints": ["websecure"],
                "routes": [{
                    "match": format!("Host(`{}`)", self.domain),
                    "kind": "Rule",
                    "services": [{ "name": name, "port": 443 }],
                }],
                "tls": { "secretName": idents::custom_domain_tls_secret_name(&self.cdid) },
            }
        });
        route
    }

    /// Creates the Service, Certificate, and IngressRoute.
    pub async fn attach(&self, client: &Client) -> Result<(), ClusterError> {
        let services: Api<Service> = Api::namespaced(client.clone(), INGRESS_NAMESPACE);
        services.create(&PostParams::default(), &self.external_service()).await?;

        let certificates: Api<DynamicObject> =
            Api::namespaced_with(client.clone(), INGRESS_NAMESPACE, &certificate_resource());
        certificates.create(&PostParams::default(), &self.certificate()).await?;

        let routes: Api<DynamicObject> =
            Api::namespaced_with(client.clone(), INGRESS_NAMESPACE, &ingress_route_resource());
        routes.create(&PostParams::default(), &self.ingress_route()).await?;

        Ok(())
    }

    /// Deletes the three objects, best-effort.
    pub async fn detach(client: &Client, cdid: &str) {
        let name = idents::custom_domain_name(cdid);
        let params = DeleteParams::default();

        let services: Api<Service> = Api::namespaced(client.clone(), INGRESS_NAMESPACE);
        if let Err(e) = services.delete(&name, &params).await {
            debug!(domain = %name, "delete external service: {e}");
        }

        let routes: Api<DynamicObject> =
            Api::namespaced_with(client.clone(), INGRESS_NAMESPACE, &ingress_route_resource());
        if let Err(e) = routes.delete(&name, &params).await {
            debug!(domain = %name, "delete ingress route: {e}");
        }

        let certificates: Api<DynamicObject> =
            Api::namespaced_with(client.clone(), INGRESS_NAMESPACE, &certificate_resource());
        if let Err(e) = certificates.delete(&name, &params).await {
            debug!(domain = %name, "delete certificate: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attachment() -> CustomDomainAttachment {
        CustomDomainAttachment {
            cdid: "cd1".into(),
            user_uid: "uid1".into(),
            domain: "shop.example.com".into(),
            target: "uid1.combinator.app238.com".into(),
        }
    }

    #[test]
    fn external_service_points_at_target() {
        let service = attachment().external_service();
        let spec = service.spec.unwrap();
        assert_eq!(spec.type_.as_deref(), Some("ExternalName"));
        assert_eq!(spec.external_name.as_deref(), Some("uid1.combinator.app238.com"));
    }

    #[test]
    fn certificate_requests_the_bare_domain() {
        let cert = attachment().certificate();
        let spec = &cert.data["spec"];
        assert_eq!(spec["dnsNames"][0], "shop.example.com");
        assert_eq!(spec["secretName"], "custom-domain-tls-cd1");
        assert_eq!(spec["issuerRef"]["kind"], "ClusterIssuer");
    }

    #[test]
    fn ingress_route_terminates_with_the_issued_secret() {
        let route = attachment().ingress_route();
        let spec = &route.data["spec"];
        assert_eq!(spec["routes"][0]["match"], "Host(`shop.example.com`)");
        assert_eq!(spec["routes"][0]["services"][0]["port"], 443);
        assert_eq!(spec["tls"]["secretName"], "custom-domain-tls-cd1");
    }
}
