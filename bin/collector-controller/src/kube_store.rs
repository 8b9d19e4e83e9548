//! Kubernetes-backed stores for Services and ConfigMaps

use async_trait::async_trait;
use collector_core::{
    CollectorError, ConfigDocument, DocumentStore, Result, ServicePort, ServiceRecord, ServiceStore,
};
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::{Client, ResourceExt};
use tracing::debug;

/// Convert a Service into the record the engine works on
pub fn service_record(svc: &Service) -> ServiceRecord {
    let ports = svc
        .spec
        .as_ref()
        .and_then(|spec| spec.ports.as_ref())
        .map(|ports| {
            ports
                .iter()
                .map(|p| ServicePort {
                    name: p.name.clone(),
                    port: p.port,
                })
                .collect()
        })
        .unwrap_or_default();

    ServiceRecord {
        name: svc.name_any(),
        namespace: svc.namespace().unwrap_or_default(),
        annotations: svc.annotations().clone(),
        deleted: svc.metadata.deletion_timestamp.is_some(),
        ports,
        finalizers: svc.finalizers().to_vec(),
        resource_version: svc.resource_version(),
    }
}

pub fn config_document(cm: &ConfigMap) -> ConfigDocument {
    ConfigDocument {
        name: cm.name_any(),
        namespace: cm.namespace().unwrap_or_default(),
        resource_version: cm.resource_version(),
        data: cm.data.clone().unwrap_or_default(),
    }
}

/// Map a write failure, turning HTTP 409 into a retryable conflict
pub fn write_error(key: String, err: kube::Error) -> CollectorError {
    match err {
        kube::Error::Api(ae) if ae.code == 409 => CollectorError::Conflict(key),
        e => e.into(),
    }
}

/// Merge patch replacing the finalizer list, guarded by the observed version
pub fn finalizer_patch(service: &ServiceRecord, finalizers: &[String]) -> serde_json::Value {
    let mut metadata = serde_json::json!({ "finalizers": finalizers });
    if let Some(version) = &service.resource_version {
        metadata["resourceVersion"] = serde_json::Value::String(version.clone());
    }
    serde_json::json!({ "metadata": metadata })
}

pub struct KubeServiceStore {
    client: Client,
}

impl KubeServiceStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ServiceStore for KubeServiceStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<ServiceRecord>> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?.map(|svc| service_record(&svc)))
    }

    async fn update_finalizers(
        &self,
        service: &ServiceRecord,
        finalizers: &[String],
    ) -> Result<()> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), &service.namespace);
        let patch = finalizer_patch(service, finalizers);

        api.patch(&service.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| write_error(service.key(), e))?;

        debug!(service = %service.key(), "Finalizers updated");
        Ok(())
    }
}

pub struct KubeDocumentStore {
    client: Client,
}

impl KubeDocumentStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DocumentStore for KubeDocumentStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<ConfigDocument>> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?.map(|cm| config_document(&cm)))
    }

    async fn replace(&self, doc: &ConfigDocument) -> Result<()> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), &doc.namespace);

        // Re-read so labels, owners and other metadata survive the replace
        let Some(mut cm) = api.get_opt(&doc.name).await? else {
            return Err(CollectorError::Store(format!("ConfigMap {} no longer exists", doc.key())));
        };
        if cm.resource_version() != doc.resource_version {
            return Err(CollectorError::Conflict(doc.key()));
        }

        cm.data = Some(doc.data.clone());
        api.replace(&doc.name, &PostParams::default(), &cm)
            .await
            .map_err(|e| write_error(doc.key(), e))?;

        debug!(document = %doc.key(), keys = doc.data.len(), "ConfigMap replaced");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use collector_core::service::{ANNOTATION_COLLECT, FINALIZER};

    fn service_json() -> serde_json::Value {
        serde_json::json!({
            "apiVersion": "v1",
            "kind": "Service",
            "metadata": {
                "name": "api",
                "namespace": "ns1",
                "resourceVersion": "42",
                "annotations": { "openapi/collect": "true" },
                "finalizers": ["other/finalizer"]
            },
            "spec": {
                "ports": [
                    { "name": "http", "port": 80 },
                    { "port": 9000 }
                ]
            }
        })
    }

    #[test]
    fn test_service_record_from_service() {
        let svc: Service = serde_json::from_value(service_json()).unwrap();
        let record = service_record(&svc);

        assert_eq!(record.host(), "api-ns1");
        assert_eq!(record.annotation(ANNOTATION_COLLECT), Some("true"));
        assert!(!record.deleted);
        assert_eq!(
            record.ports,
            vec![
                ServicePort::new("http", 80),
                ServicePort {
                    name: None,
                    port: 9000
                }
            ]
        );
        assert_eq!(record.finalizers, vec!["other/finalizer".to_string()]);
        assert_eq!(record.resource_version.as_deref(), Some("42"));
    }

    #[test]
    fn test_service_record_marks_deletion() {
        let mut value = service_json();
        value["metadata"]["deletionTimestamp"] = serde_json::json!("2024-01-01T00:00:00Z");
        let svc: Service = serde_json::from_value(value).unwrap();

        let record = service_record(&svc);
        assert!(record.deleted);
        assert!(!record.is_tracked());
    }

    #[test]
    fn test_config_document_without_data() {
        let cm: ConfigMap = serde_json::from_value(serde_json::json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": { "name": "routes", "namespace": "ns1", "resourceVersion": "3" }
        }))
        .unwrap();

        let doc = config_document(&cm);
        assert_eq!(doc.key(), "ns1/routes");
        assert_eq!(doc.resource_version.as_deref(), Some("3"));
        assert!(doc.data.is_empty());
    }

    #[test]
    fn test_finalizer_patch_carries_version() {
        let mut record = ServiceRecord::new("api", "ns1");
        record.resource_version = Some("42".to_string());

        let patch = finalizer_patch(&record, &[FINALIZER.to_string()]);
        assert_eq!(
            patch,
            serde_json::json!({
                "metadata": { "finalizers": ["openapi/finalizer"], "resourceVersion": "42" }
            })
        );

        record.resource_version = None;
        let patch = finalizer_patch(&record, &[]);
        assert_eq!(patch, serde_json::json!({ "metadata": { "finalizers": [] } }));
    }

    #[test]
    fn test_write_error_maps_conflict() {
        let response: kube::error::ErrorResponse = serde_json::from_value(serde_json::json!({
            "status": "Failure",
            "message": "the object has been modified",
            "reason": "Conflict",
            "code": 409
        }))
        .unwrap();

        let err = write_error("ns1/routes".to_string(), kube::Error::Api(response));
        assert!(err.is_conflict());

        let response: kube::error::ErrorResponse = serde_json::from_value(serde_json::json!({
            "status": "Failure",
            "message": "forbidden",
            "reason": "Forbidden",
            "code": 403
        }))
        .unwrap();
        let err = write_error("ns1/routes".to_string(), kube::Error::Api(response));
        assert!(matches!(err, CollectorError::Kubernetes(_)));
    }
}
