//! Reconciliation engine
//!
//! Decides, from a single service's annotations and deletion state, what the
//! routing document, the manifest document and the finalizer list should
//! contain for that service. The decision is pure; applying it mutates the
//! documents in place and is idempotent.

use tracing::{debug, warn};

use crate::document::ConfigDocument;
use crate::finalizer;
use crate::manifest;
use crate::routing::{self, UpstreamTarget};
use crate::service::{ServiceRecord, ANNOTATION_PATH, ANNOTATION_PORT, FINALIZER};

/// Knobs that shape the generated documents
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EngineSettings {
    /// Upstream that serves rewritten OpenAPI documents, if deployed
    pub spec_proxy_upstream: Option<String>,
}

/// What a pass should do for one service
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decision {
    Track {
        host: String,
        spec_path: String,
        /// `None` when the port annotation could not be resolved; routing is skipped
        upstream: Option<UpstreamTarget>,
    },
    Untrack {
        host: String,
    },
}

/// Neither document is touched unless both exist
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("collector documents not ready")]
pub struct DocumentsNotReady;

/// Work out the desired state for `service`
pub fn plan(service: &ServiceRecord) -> Decision {
    let host = service.host();

    if !service.is_tracked() {
        return Decision::Untrack { host };
    }

    let spec_path = manifest::resolve_path(service.annotation(ANNOTATION_PATH));
    let port_annotation = service.annotation(ANNOTATION_PORT);

    let upstream = match routing::resolve_port(port_annotation, &service.ports) {
        Some(port) => Some(UpstreamTarget {
            host: host.clone(),
            service: service.name.clone(),
            namespace: service.namespace.clone(),
            port,
            spec_path: spec_path.clone(),
        }),
        None => {
            warn!(
                service = %service.key(),
                port = port_annotation.unwrap_or_default(),
                "Cannot resolve port annotation, skipping routing entry"
            );
            None
        }
    };

    Decision::Track {
        host,
        spec_path,
        upstream,
    }
}

impl Decision {
    pub fn host(&self) -> &str {
        match self {
            Decision::Track { host, .. } | Decision::Untrack { host } => host,
        }
    }

    pub fn is_tracked(&self) -> bool {
        matches!(self, Decision::Track { .. })
    }

    pub fn apply_routing(&self, doc: &mut ConfigDocument, settings: &EngineSettings) {
        match self {
            Decision::Track {
                upstream: Some(target),
                ..
            } => routing::upsert(doc, target, settings.spec_proxy_upstream.as_deref()),
            Decision::Track { upstream: None, .. } => {}
            Decision::Untrack { host } => routing::remove(doc, host),
        }
    }

    pub fn apply_manifest(&self, doc: &mut ConfigDocument) {
        match self {
            Decision::Track {
                host, spec_path, ..
            } => manifest::upsert(doc, host, spec_path),
            Decision::Untrack { host } => manifest::remove(doc, host),
        }
    }

    /// Returns true if the finalizer list changed
    pub fn apply_finalizers(&self, finalizers: &mut Vec<String>) -> bool {
        if self.is_tracked() {
            finalizer::ensure_present(finalizers, FINALIZER)
        } else {
            finalizer::ensure_absent(finalizers, FINALIZER)
        }
    }
}

/// Reconcile one service against both documents in memory.
///
/// Returns whether the service is tracked after the pass. When either document
/// is missing nothing is mutated, the service's finalizers included.
pub fn reconcile(
    service: &mut ServiceRecord,
    routing_doc: Option<&mut ConfigDocument>,
    manifest_doc: Option<&mut ConfigDocument>,
    settings: &EngineSettings,
) -> Result<bool, DocumentsNotReady> {
    let (Some(routing_doc), Some(manifest_doc)) = (routing_doc, manifest_doc) else {
        debug!(service = %service.key(), "Collector documents missing, skipping");
        return Err(DocumentsNotReady);
    };

    let decision = plan(service);
    decision.apply_routing(routing_doc, settings);
    decision.apply_manifest(manifest_doc);
    decision.apply_finalizers(&mut service.finalizers);

    Ok(decision.is_tracked())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{Manifest, MANIFEST_KEY};
    use crate::service::{ServicePort, ANNOTATION_COLLECT};

    fn documents() -> (ConfigDocument, ConfigDocument) {
        let routing = ConfigDocument::new("routing", "ns1");
        let mut manifest = ConfigDocument::new("manifest", "ns1");
        manifest.insert(MANIFEST_KEY, r#"{"urls":[]}"#);
        (routing, manifest)
    }

    fn collected() -> ServiceRecord {
        ServiceRecord::new("api", "ns1")
            .with_annotation(ANNOTATION_COLLECT, "true")
            .with_annotation(ANNOTATION_PATH, "docs.json")
            .with_annotation(ANNOTATION_PORT, "8080")
    }

    fn manifest_of(doc: &ConfigDocument) -> Manifest {
        Manifest::parse(doc.get(MANIFEST_KEY).unwrap()).unwrap()
    }

    #[test]
    fn test_tracked_service_populates_both_documents() {
        let (mut routing, mut manifest) = documents();
        let mut svc = collected();

        let tracked = reconcile(
            &mut svc,
            Some(&mut routing),
            Some(&mut manifest),
            &EngineSettings::default(),
        );
        assert_eq!(tracked, Ok(true));

        let upstream = routing.get("api-ns1-upstream.conf").unwrap();
        assert!(upstream.contains("upstream api-ns1 {"));
        assert!(upstream.contains("server api.ns1:8080;"));
        let location = routing.get("api-ns1-location.conf").unwrap();
        assert!(location.contains("rewrite /api-ns1/(.*) /$1 break;"));
        assert!(location.contains("proxy_pass http://api-ns1;"));

        let entry = manifest_of(&manifest).entry("api-ns1").cloned().unwrap();
        assert_eq!(entry.url, "/api-ns1/docs.json");
        assert_eq!(svc.finalizers, vec![FINALIZER.to_string()]);
    }

    #[test]
    fn test_reconcile_is_idempotent() {
        let (mut routing, mut manifest) = documents();
        let mut svc = collected();
        let settings = EngineSettings::default();

        reconcile(&mut svc, Some(&mut routing), Some(&mut manifest), &settings).unwrap();
        let (first_routing, first_manifest, first_finalizers) =
            (routing.clone(), manifest.clone(), svc.finalizers.clone());

        reconcile(&mut svc, Some(&mut routing), Some(&mut manifest), &settings).unwrap();
        assert_eq!(routing, first_routing);
        assert_eq!(manifest, first_manifest);
        assert_eq!(svc.finalizers, first_finalizers);
    }

    #[test]
    fn test_toggling_collect_off_removes_entries() {
        let (mut routing, mut manifest) = documents();
        let mut svc = collected();
        let settings = EngineSettings::default();
        reconcile(&mut svc, Some(&mut routing), Some(&mut manifest), &settings).unwrap();

        svc.annotations.insert(ANNOTATION_COLLECT.to_string(), "false".to_string());
        let tracked = reconcile(&mut svc, Some(&mut routing), Some(&mut manifest), &settings);

        assert_eq!(tracked, Ok(false));
        assert!(routing.data.is_empty());
        assert!(manifest_of(&manifest).urls.is_empty());
        assert!(svc.finalizers.is_empty());
    }

    #[test]
    fn test_deleted_service_is_cleaned_up() {
        let (mut routing, mut manifest) = documents();
        let mut svc = collected();
        svc.finalizers.push("other/finalizer".to_string());
        let settings = EngineSettings::default();
        reconcile(&mut svc, Some(&mut routing), Some(&mut manifest), &settings).unwrap();

        svc.deleted = true;
        reconcile(&mut svc, Some(&mut routing), Some(&mut manifest), &settings).unwrap();

        assert!(routing.get("api-ns1-upstream.conf").is_none());
        assert!(manifest_of(&manifest).entry("api-ns1").is_none());
        assert_eq!(svc.finalizers, vec!["other/finalizer".to_string()]);
    }

    #[test]
    fn test_unresolvable_port_skips_routing_only() {
        let (mut routing, mut manifest) = documents();
        let mut svc = ServiceRecord::new("api", "ns1")
            .with_annotation(ANNOTATION_COLLECT, "true")
            .with_annotation(ANNOTATION_PORT, "metrics")
            .with_port(ServicePort::new("http", 80));

        let tracked = reconcile(
            &mut svc,
            Some(&mut routing),
            Some(&mut manifest),
            &EngineSettings::default(),
        );

        assert_eq!(tracked, Ok(true));
        assert!(routing.data.is_empty());
        assert_eq!(manifest_of(&manifest).entry("api-ns1").unwrap().url, "/api-ns1/openapi.json");
        assert_eq!(svc.finalizers, vec![FINALIZER.to_string()]);
    }

    #[test]
    fn test_missing_document_mutates_nothing() {
        let (mut routing, _) = documents();
        let mut svc = collected();

        let result = reconcile(&mut svc, Some(&mut routing), None, &EngineSettings::default());

        assert_eq!(result, Err(DocumentsNotReady));
        assert!(routing.data.is_empty());
        assert!(svc.finalizers.is_empty());
    }

    #[test]
    fn test_other_services_survive() {
        let (mut routing, mut manifest) = documents();
        let settings = EngineSettings::default();
        let mut a = ServiceRecord::new("a", "ns1").with_annotation(ANNOTATION_COLLECT, "true");
        let mut b = ServiceRecord::new("b", "ns1").with_annotation(ANNOTATION_COLLECT, "true");

        reconcile(&mut a, Some(&mut routing), Some(&mut manifest), &settings).unwrap();
        reconcile(&mut b, Some(&mut routing), Some(&mut manifest), &settings).unwrap();
        a.deleted = true;
        reconcile(&mut a, Some(&mut routing), Some(&mut manifest), &settings).unwrap();

        assert_eq!(routing.data.len(), 2);
        assert!(routing.get("b-ns1-location.conf").is_some());
        let names: Vec<_> = manifest_of(&manifest).urls.into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["b-ns1".to_string()]);
    }

    #[test]
    fn test_apply_routing_uses_spec_proxy_setting() {
        let (mut routing, _) = documents();
        let settings = EngineSettings {
            spec_proxy_upstream: Some("openapi-proxy".to_string()),
        };
        plan(&collected()).apply_routing(&mut routing, &settings);

        let location = routing.get("api-ns1-location.conf").unwrap();
        assert!(location.contains("location = /api-ns1/docs.json {"));
    }
}
