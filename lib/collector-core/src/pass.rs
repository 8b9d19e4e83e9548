//! One reconciliation pass against the live stores
//!
//! Fetches the service and both documents, applies the engine's decision and
//! persists the result. Documents are shared by every collected service in a
//! namespace, so each one is committed as a read-modify-write carrying the
//! observed resource version; on a conflict the fresh copy is re-read and the
//! same decision re-applied.

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::document::{ConfigDocument, DocumentNames};
use crate::engine::{plan, Decision, EngineSettings};
use crate::retry::RetryConfig;
use crate::service::ServiceRecord;
use crate::Result;

/// Access to services in the cluster
#[async_trait]
pub trait ServiceStore: Send + Sync {
    /// `Ok(None)` when the service no longer exists
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<ServiceRecord>>;

    /// Replace the finalizer list of `service`.
    ///
    /// Must fail with `CollectorError::Conflict` if the service changed since
    /// it was read.
    async fn update_finalizers(
        &self,
        service: &ServiceRecord,
        finalizers: &[String],
    ) -> Result<()>;
}

/// Access to the two collector documents
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// `Ok(None)` when the document does not exist
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<ConfigDocument>>;

    /// Persist `doc`, failing with `CollectorError::Conflict` if its
    /// `resource_version` is stale.
    async fn replace(&self, doc: &ConfigDocument) -> Result<()>;
}

/// How a pass ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The service is gone; nothing left to clean up
    Gone,
    /// One of the documents does not exist yet; retry later
    DocumentsNotReady,
    Tracked,
    Untracked,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Gone => "gone",
            Outcome::DocumentsNotReady => "documents_not_ready",
            Outcome::Tracked => "tracked",
            Outcome::Untracked => "untracked",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PassReport {
    pub outcome: Outcome,
    /// Document write conflicts resolved by re-reading
    pub conflicts: u32,
}

/// Drives the engine against a service store and a document store
pub struct Reconciler<S, D> {
    services: S,
    documents: D,
    names: DocumentNames,
    settings: EngineSettings,
    retry: RetryConfig,
}

enum Commit {
    Done { conflicts: u32 },
    Vanished { conflicts: u32 },
}

impl<S: ServiceStore, D: DocumentStore> Reconciler<S, D> {
    pub fn new(services: S, documents: D) -> Self {
        Self {
            services,
            documents,
            names: DocumentNames::default(),
            settings: EngineSettings::default(),
            retry: RetryConfig::default(),
        }
    }

    pub fn with_document_names(mut self, names: DocumentNames) -> Self {
        self.names = names;
        self
    }

    pub fn with_settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn services(&self) -> &S {
        &self.services
    }

    pub fn documents(&self) -> &D {
        &self.documents
    }

    /// Reconcile the service `namespace/name`.
    ///
    /// Store errors, including a conflict on the service itself, are returned
    /// for the caller to requeue.
    pub async fn reconcile(&self, namespace: &str, name: &str) -> Result<PassReport> {
        let Some(service) = self.services.get(namespace, name).await? else {
            let service = format!("{}/{}", namespace, name);
            debug!(service = %service, "Service not found, nothing to do");
            return Ok(report(Outcome::Gone, 0));
        };

        let routing = self.documents.get(namespace, &self.names.routing).await?;
        let manifest = self.documents.get(namespace, &self.names.manifest).await?;
        let (Some(routing), Some(manifest)) = (routing, manifest) else {
            info!(
                service = %service.key(),
                routing = %self.names.routing,
                manifest = %self.names.manifest,
                "Collector documents not found in namespace, skipping"
            );
            return Ok(report(Outcome::DocumentsNotReady, 0));
        };

        let decision = plan(&service);
        debug!(service = %service.key(), ?decision, "Planned reconciliation");

        let mut conflicts = 0;
        match self
            .commit(routing, |doc| decision.apply_routing(doc, &self.settings))
            .await?
        {
            Commit::Done { conflicts: n } => conflicts += n,
            Commit::Vanished { conflicts: n } => {
                return Ok(report(Outcome::DocumentsNotReady, conflicts + n))
            }
        }
        match self.commit(manifest, |doc| decision.apply_manifest(doc)).await? {
            Commit::Done { conflicts: n } => conflicts += n,
            Commit::Vanished { conflicts: n } => {
                // routing is already committed; the next pass converges the rest
                warn!(
                    service = %service.key(),
                    manifest = %self.names.manifest,
                    "Manifest document disappeared after routing was written"
                );
                return Ok(report(Outcome::DocumentsNotReady, conflicts + n));
            }
        }

        self.sync_finalizers(&service, &decision).await?;

        let outcome = if decision.is_tracked() {
            Outcome::Tracked
        } else {
            Outcome::Untracked
        };
        info!(
            service = %service.key(),
            host = %decision.host(),
            outcome = outcome.as_str(),
            "Reconciled service"
        );
        Ok(report(outcome, conflicts))
    }

    async fn sync_finalizers(&self, service: &ServiceRecord, decision: &Decision) -> Result<()> {
        let mut finalizers = service.finalizers.clone();
        if !decision.apply_finalizers(&mut finalizers) {
            return Ok(());
        }

        debug!(service = %service.key(), ?finalizers, "Updating finalizers");
        self.services.update_finalizers(service, &finalizers).await
    }

    /// Apply `mutate` to `doc` and write it back, re-reading on conflict
    async fn commit<F>(&self, mut doc: ConfigDocument, mutate: F) -> Result<Commit>
    where
        F: Fn(&mut ConfigDocument) + Send + Sync,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            mutate(&mut doc);

            match self.documents.replace(&doc).await {
                Ok(()) => {
                    return Ok(Commit::Done {
                        conflicts: attempt - 1,
                    })
                }
                Err(e) if e.is_conflict() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.jittered_delay(attempt);
                    warn!(
                        document = %doc.key(),
                        attempt = attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Document changed concurrently, retrying"
                    );
                    tokio::time::sleep(delay).await;

                    match self.documents.get(&doc.namespace, &doc.name).await? {
                        Some(fresh) => doc = fresh,
                        None => return Ok(Commit::Vanished { conflicts: attempt }),
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn report(outcome: Outcome, conflicts: u32) -> PassReport {
    PassReport { outcome, conflicts }
}
