//! Command-line and environment configuration

use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;
use collector_core::document::{DEFAULT_MANIFEST_DOCUMENT, DEFAULT_ROUTING_DOCUMENT};
use collector_core::{DocumentNames, EngineSettings, RetryConfig};

/// Keeps the nginx routing and Swagger UI manifests in sync with annotated Services
#[derive(Parser, Debug, Clone)]
#[command(name = "collector-controller", version, about, long_about = None)]
pub struct Config {
    /// Debug mode: log more information
    #[arg(long, short, env = "COLLECTOR_DEBUG")]
    pub debug: bool,

    /// Emit logs as JSON
    #[arg(long, env = "COLLECTOR_LOG_JSON")]
    pub log_json: bool,

    /// Only watch Services in this namespace (default: all namespaces)
    #[arg(long, env = "COLLECTOR_NAMESPACE")]
    pub namespace: Option<String>,

    /// Name of the ConfigMap holding the nginx snippets
    #[arg(long, env = "COLLECTOR_ROUTING_CONFIGMAP", default_value = DEFAULT_ROUTING_DOCUMENT)]
    pub routing_configmap: String,

    /// Name of the ConfigMap holding the Swagger UI configuration
    #[arg(long, env = "COLLECTOR_MANIFEST_CONFIGMAP", default_value = DEFAULT_MANIFEST_DOCUMENT)]
    pub manifest_configmap: String,

    /// nginx upstream of the openapi-proxy; when set, OpenAPI documents are
    /// routed through it so their server URLs get rewritten
    #[arg(long, env = "COLLECTOR_SPEC_PROXY_UPSTREAM")]
    pub spec_proxy_upstream: Option<String>,

    /// Seconds between periodic resyncs of every Service
    #[arg(long, env = "COLLECTOR_RESYNC_INTERVAL", default_value_t = 300)]
    pub resync_interval: u64,

    /// Seconds to wait before retrying when the ConfigMaps do not exist yet
    #[arg(long, env = "COLLECTOR_NOT_READY_INTERVAL", default_value_t = 30)]
    pub not_ready_interval: u64,

    /// Seconds to wait before retrying a failed reconciliation
    #[arg(long, env = "COLLECTOR_ERROR_REQUEUE_INTERVAL", default_value_t = 60)]
    pub error_requeue_interval: u64,

    /// Attempts at writing a ConfigMap that keeps changing underneath us
    #[arg(long, env = "COLLECTOR_CONFLICT_RETRIES", default_value_t = 5)]
    pub conflict_retries: u32,

    /// Address of the /metrics and /healthz listener
    #[arg(long, env = "COLLECTOR_METRICS_ADDR", default_value = "0.0.0.0:8080")]
    pub metrics_addr: SocketAddr,
}

impl Config {
    pub fn document_names(&self) -> DocumentNames {
        DocumentNames {
            routing: self.routing_configmap.clone(),
            manifest: self.manifest_configmap.clone(),
        }
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            spec_proxy_upstream: self.spec_proxy_upstream.clone().filter(|u| !u.is_empty()),
        }
    }

    pub fn retry(&self) -> RetryConfig {
        RetryConfig::with_max_attempts(self.conflict_retries)
    }

    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval)
    }

    pub fn not_ready_interval(&self) -> Duration {
        Duration::from_secs(self.not_ready_interval)
    }

    pub fn error_requeue_interval(&self) -> Duration {
        Duration::from_secs(self.error_requeue_interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::try_parse_from(["collector-controller"]).unwrap();
        assert!(!config.debug);
        assert_eq!(config.namespace, None);
        assert_eq!(config.document_names(), DocumentNames::default());
        assert_eq!(config.engine_settings(), EngineSettings::default());
        assert_eq!(config.not_ready_interval(), Duration::from_secs(30));
        assert_eq!(config.resync_interval(), Duration::from_secs(300));
        assert_eq!(config.retry().max_attempts, 5);
        assert_eq!(config.metrics_addr, "0.0.0.0:8080".parse::<SocketAddr>().unwrap());
    }

    #[test]
    fn test_overrides() {
        let config = Config::try_parse_from([
            "collector-controller",
            "--debug",
            "--namespace",
            "docs",
            "--routing-configmap",
            "routes",
            "--spec-proxy-upstream",
            "openapi-proxy",
            "--conflict-retries",
            "0",
        ])
        .unwrap();

        assert!(config.debug);
        assert_eq!(config.namespace.as_deref(), Some("docs"));
        assert_eq!(config.document_names().routing, "routes");
        assert_eq!(
            config.engine_settings().spec_proxy_upstream.as_deref(),
            Some("openapi-proxy")
        );
        assert_eq!(config.retry().max_attempts, 1);
    }

    #[test]
    fn test_empty_spec_proxy_is_disabled() {
        let config =
            Config::try_parse_from(["collector-controller", "--spec-proxy-upstream", ""]).unwrap();
        assert_eq!(config.engine_settings().spec_proxy_upstream, None);
    }
}
