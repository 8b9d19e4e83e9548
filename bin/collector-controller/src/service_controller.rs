//! Service controller keeping the collector ConfigMaps in sync

use std::sync::Arc;
use std::time::Duration;

use collector_core::{CollectorError, Outcome, PassReport, Reconciler};
use futures::StreamExt;
use k8s_openapi::api::core::v1::Service;
use kube::{Api, Client, ResourceExt};
use kube_runtime::{controller::Action, watcher, Controller};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::kube_store::{KubeDocumentStore, KubeServiceStore};
use crate::metrics::ControllerMetrics;

/// Conflicts that outlived the in-pass retries are retried sooner than other errors
const CONFLICT_REQUEUE: Duration = Duration::from_secs(1);

pub struct Context {
    reconciler: Reconciler<KubeServiceStore, KubeDocumentStore>,
    metrics: Arc<ControllerMetrics>,
    requeue: RequeuePolicy,
}

#[derive(Clone, Copy, Debug)]
pub struct RequeuePolicy {
    pub resync: Duration,
    pub not_ready: Duration,
    pub error: Duration,
}

impl RequeuePolicy {
    pub fn after_success(&self, outcome: Outcome) -> Action {
        match outcome {
            Outcome::DocumentsNotReady => Action::requeue(self.not_ready),
            Outcome::Gone => Action::await_change(),
            Outcome::Tracked | Outcome::Untracked => Action::requeue(self.resync),
        }
    }

    pub fn after_error(&self, err: &CollectorError) -> Action {
        if err.is_conflict() {
            Action::requeue(CONFLICT_REQUEUE)
        } else {
            Action::requeue(self.error)
        }
    }
}

pub struct ServiceController {
    client: Client,
    config: Config,
    metrics: Arc<ControllerMetrics>,
}

impl ServiceController {
    pub fn new(client: Client, config: Config, metrics: Arc<ControllerMetrics>) -> Self {
        Self {
            client,
            config,
            metrics,
        }
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let services: Api<Service> = match &self.config.namespace {
            Some(namespace) => {
                info!("Watching Services in namespace {}", namespace);
                Api::namespaced(self.client.clone(), namespace)
            }
            None => {
                info!("Watching Services in all namespaces");
                Api::all(self.client.clone())
            }
        };

        let reconciler = Reconciler::new(
            KubeServiceStore::new(self.client.clone()),
            KubeDocumentStore::new(self.client.clone()),
        )
        .with_document_names(self.config.document_names())
        .with_settings(self.config.engine_settings())
        .with_retry(self.config.retry());

        let context = Arc::new(Context {
            reconciler,
            metrics: self.metrics.clone(),
            requeue: RequeuePolicy {
                resync: self.config.resync_interval(),
                not_ready: self.config.not_ready_interval(),
                error: self.config.error_requeue_interval(),
            },
        });

        let mut stream = Controller::new(services, watcher::Config::default())
            .shutdown_on_signal()
            .run(reconcile, error_policy, context)
            .boxed();

        while let Some(item) = stream.next().await {
            match item {
                Ok((object, _)) => debug!("Reconciled Service {}", object),
                Err(e) => warn!("Error in reconciliation stream: {}", e),
            }
        }

        info!("Service controller stopped");
        Ok(())
    }
}

async fn reconcile(svc: Arc<Service>, ctx: Arc<Context>) -> Result<Action, CollectorError> {
    let name = svc.name_any();
    let namespace = svc.namespace().unwrap_or_default();
    debug!("Reconciling Service: {}/{}", namespace, name);

    let timer = ctx.metrics.reconcile_duration_seconds.start_timer();
    let result = ctx.reconciler.reconcile(&namespace, &name).await;
    timer.observe_duration();

    let report: PassReport = result?;
    ctx.metrics.record(&report);
    Ok(ctx.requeue.after_success(report.outcome))
}

fn error_policy(svc: Arc<Service>, err: &CollectorError, ctx: Arc<Context>) -> Action {
    ctx.metrics.reconcile_errors_total.inc();
    error!(
        service = %format!("{}/{}", svc.namespace().unwrap_or_default(), svc.name_any()),
        error = %err,
        "Error reconciling Service"
    );
    ctx.requeue.after_error(err)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RequeuePolicy {
        RequeuePolicy {
            resync: Duration::from_secs(300),
            not_ready: Duration::from_secs(30),
            error: Duration::from_secs(60),
        }
    }

    #[test]
    fn test_requeue_after_success() {
        let policy = policy();
        assert_eq!(
            policy.after_success(Outcome::DocumentsNotReady),
            Action::requeue(Duration::from_secs(30))
        );
        assert_eq!(
            policy.after_success(Outcome::Tracked),
            Action::requeue(Duration::from_secs(300))
        );
        assert_eq!(policy.after_success(Outcome::Gone), Action::await_change());
    }

    #[test]
    fn test_requeue_after_error() {
        let policy = policy();
        assert_eq!(
            policy.after_error(&CollectorError::Conflict("ns1/api".to_string())),
            Action::requeue(CONFLICT_REQUEUE)
        );
        assert_eq!(
            policy.after_error(&CollectorError::Store("down".to_string())),
            Action::requeue(Duration::from_secs(60))
        );
    }
}
