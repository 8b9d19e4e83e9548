//! Documentation aggregator manifest codec
//!
//! The manifest is the Swagger UI `urls` configuration, stored as compact JSON
//! under a single key of the manifest document. Entries keep insertion order.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::document::ConfigDocument;

/// Key of the manifest text inside the manifest document
pub const MANIFEST_KEY: &str = "swagger-config.json";

/// Path used when the service carries no path annotation
pub const DEFAULT_SPEC_PATH: &str = "/openapi.json";

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub urls: Vec<ManifestEntry>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub name: String,
    pub url: String,
}

impl Manifest {
    /// Parse manifest text; blank text is an empty manifest
    pub fn parse(text: &str) -> serde_json::Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(text)
    }

    pub fn to_text(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Drop all entries named `name`. Returns true if anything was removed.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.urls.len();
        self.urls.retain(|e| e.name != name);
        self.urls.len() != before
    }

    /// Replace any entry named `entry.name` and append `entry` at the end
    pub fn upsert(&mut self, entry: ManifestEntry) {
        self.remove(&entry.name);
        self.urls.push(entry);
    }

    pub fn entry(&self, name: &str) -> Option<&ManifestEntry> {
        self.urls.iter().find(|e| e.name == name)
    }
}

/// Normalise the path annotation to an absolute path inside the service
pub fn resolve_path(annotation: Option<&str>) -> String {
    match annotation {
        Some(path) if path.starts_with('/') => path.to_string(),
        Some(path) => format!("/{}", path),
        None => DEFAULT_SPEC_PATH.to_string(),
    }
}

/// Entry published for `host`, pointing at its document through the router
pub fn entry_for(host: &str, spec_path: &str) -> ManifestEntry {
    ManifestEntry {
        name: host.to_string(),
        url: format!("/{}{}", host, spec_path),
    }
}

/// Insert or replace the entry for `host`.
///
/// A missing or blank manifest starts out empty. Unreadable text is left as
/// is so the other services' entries are not lost.
pub fn upsert(doc: &mut ConfigDocument, host: &str, spec_path: &str) {
    let mut manifest = match Manifest::parse(doc.get(MANIFEST_KEY).unwrap_or_default()) {
        Ok(manifest) => manifest,
        Err(e) => {
            warn!(document = %doc.key(), error = %e, "Manifest is not valid JSON, skipping upsert");
            return;
        }
    };

    manifest.upsert(entry_for(host, spec_path));
    store(doc, &manifest);
}

/// Remove the entry for `host`.
///
/// A missing or unreadable manifest is left as is.
pub fn remove(doc: &mut ConfigDocument, host: &str) {
    let Some(text) = doc.get(MANIFEST_KEY).filter(|t| !t.trim().is_empty()) else {
        return;
    };

    let mut manifest = match Manifest::parse(text) {
        Ok(manifest) => manifest,
        Err(e) => {
            warn!(document = %doc.key(), error = %e, "Manifest is not valid JSON, skipping remove");
            return;
        }
    };

    manifest.remove(host);
    store(doc, &manifest);
}

fn store(doc: &mut ConfigDocument, manifest: &Manifest) {
    match manifest.to_text() {
        Ok(text) => doc.insert(MANIFEST_KEY, text),
        Err(e) => warn!(document = %doc.key(), error = %e, "Failed to encode manifest"),
    }
}
