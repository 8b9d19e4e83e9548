//! Key-value configuration documents shared by all collected services

use std::collections::BTreeMap;

/// A named string-to-string document, as stored by the cluster.
///
/// `resource_version` is the version observed at read time and is sent back on
/// write so the store can reject lost updates.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConfigDocument {
    pub name: String,
    pub namespace: String,
    pub resource_version: Option<String>,
    pub data: BTreeMap<String, String>,
}

impl ConfigDocument {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.data.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.data.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.data.remove(key)
    }

    /// `namespace/name`, for logs and error messages
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

/// Well-known names of the two documents, looked up in the service's namespace
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DocumentNames {
    pub routing: String,
    pub manifest: String,
}

pub const DEFAULT_ROUTING_DOCUMENT: &str = "openapi-collector-nginx-dynamic-config";
pub const DEFAULT_MANIFEST_DOCUMENT: &str = "openapi-collector-swagger-dynamic-config";

impl Default for DocumentNames {
    fn default() -> Self {
        Self {
            routing: DEFAULT_ROUTING_DOCUMENT.to_string(),
            manifest: DEFAULT_MANIFEST_DOCUMENT.to_string(),
        }
    }
}
