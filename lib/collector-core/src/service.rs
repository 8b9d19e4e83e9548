//! The slice of a cluster Service the collector reads and writes

use std::collections::BTreeMap;

/// Opt-in annotation: the service is collected when set to `"true"`
pub const ANNOTATION_COLLECT: &str = "openapi/collect";
/// Optional path of the OpenAPI document inside the service
pub const ANNOTATION_PATH: &str = "openapi/path";
/// Optional port, numeric or the name of one of the service's ports
pub const ANNOTATION_PORT: &str = "openapi/port";

/// Finalizer marker recorded on every tracked service
pub const FINALIZER: &str = "openapi/finalizer";

/// A named port exposed by a service
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ServicePort {
    pub name: Option<String>,
    pub port: i32,
}

impl ServicePort {
    pub fn new(name: impl Into<String>, port: i32) -> Self {
        Self {
            name: Some(name.into()),
            port,
        }
    }
}

/// Service state as seen by one reconciliation pass.
///
/// Owned by the cluster; the collector only reads annotations and ports and
/// rewrites the finalizer list.
#[derive(Clone, Debug, Default)]
pub struct ServiceRecord {
    pub name: String,
    pub namespace: String,
    pub annotations: BTreeMap<String, String>,
    /// Deletion has been requested (deletion timestamp set)
    pub deleted: bool,
    pub ports: Vec<ServicePort>,
    pub finalizers: Vec<String>,
    pub resource_version: Option<String>,
}

impl ServiceRecord {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    pub fn with_annotation(mut self, key: &str, value: &str) -> Self {
        self.annotations.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_port(mut self, port: ServicePort) -> Self {
        self.ports.push(port);
        self
    }

    /// Host identity joining this service to its document entries.
    ///
    /// Unique per service because name and namespace are unique together.
    pub fn host(&self) -> String {
        host_identity(&self.name, &self.namespace)
    }

    /// Annotation value, with an empty string treated as absent
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Whether the service should currently be represented in both documents
    pub fn is_tracked(&self) -> bool {
        !self.deleted && self.annotation(ANNOTATION_COLLECT) == Some("true")
    }

    /// Human-readable `namespace/name` for logs
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

pub fn host_identity(name: &str, namespace: &str) -> String {
    format!("{}-{}", name, namespace)
}
