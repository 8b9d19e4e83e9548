//! Prometheus metrics for the controller and the listener exposing them

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use collector_core::PassReport;
use http_body_util::Full;
use hyper::{
    body::Bytes, header::CONTENT_TYPE, header::HeaderValue, server::conn::http1,
    service::service_fn, Method, Request, Response, StatusCode,
};
use hyper_util::rt::tokio::TokioIo;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use tokio::net::TcpListener;
use tracing::{debug, info};

pub struct ControllerMetrics {
    /// Finished passes by outcome
    pub reconciliations_total: IntCounterVec,
    pub reconcile_errors_total: IntCounter,
    /// ConfigMap writes that lost a race and were retried
    pub document_conflicts_total: IntCounter,
    pub reconcile_duration_seconds: Histogram,
    pub registry: Registry,
}

impl ControllerMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new_custom(Some("openapi_collector".to_string()), None)?;

        let reconciliations_total = IntCounterVec::new(
            Opts::new("reconciliations_total", "Finished reconciliation passes by outcome"),
            &["outcome"],
        )?;
        let reconcile_errors_total =
            IntCounter::new("reconcile_errors_total", "Reconciliation passes that failed")?;
        let document_conflicts_total = IntCounter::new(
            "document_conflicts_total",
            "ConfigMap writes retried after a concurrent modification",
        )?;
        let reconcile_duration_seconds = Histogram::with_opts(HistogramOpts::new(
            "reconcile_duration_seconds",
            "Duration of a reconciliation pass in seconds",
        ))?;

        registry.register(Box::new(reconciliations_total.clone()))?;
        registry.register(Box::new(reconcile_errors_total.clone()))?;
        registry.register(Box::new(document_conflicts_total.clone()))?;
        registry.register(Box::new(reconcile_duration_seconds.clone()))?;

        Ok(Self {
            reconciliations_total,
            reconcile_errors_total,
            document_conflicts_total,
            reconcile_duration_seconds,
            registry,
        })
    }

    pub fn record(&self, report: &PassReport) {
        self.reconciliations_total
            .with_label_values(&[report.outcome.as_str()])
            .inc();
        self.document_conflicts_total.inc_by(u64::from(report.conflicts));
    }

    /// Gather all metrics in Prometheus text format
    pub fn gather(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = vec![];
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

/// Serve `/metrics` and `/healthz` until the process exits
pub async fn serve(addr: SocketAddr, metrics: Arc<ControllerMetrics>) -> Result<()> {
    let listener = TcpListener::bind(&addr).await?;
    info!("Metrics listening on {}", addr);

    loop {
        let (stream, peer_addr) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let metrics = metrics.clone();

        tokio::task::spawn(async move {
            let service = service_fn(move |req| {
                let metrics = metrics.clone();
                async move { Ok::<_, Infallible>(handle(&req, &metrics)) }
            });

            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                debug!("Error serving metrics connection from {}: {}", peer_addr, e);
            }
        });
    }
}

fn handle<B>(req: &Request<B>, metrics: &ControllerMetrics) -> Response<Full<Bytes>> {
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => match metrics.gather() {
            Ok(text) => {
                let mut response = Response::new(Full::new(Bytes::from(text)));
                response.headers_mut().insert(
                    CONTENT_TYPE,
                    HeaderValue::from_static("text/plain; version=0.0.4"),
                );
                response
            }
            Err(e) => text_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to gather metrics: {}\n", e),
            ),
        },
        (&Method::GET, "/healthz") => text_response(StatusCode::OK, "OK\n".to_string()),
        _ => text_response(StatusCode::NOT_FOUND, "Not Found\n".to_string()),
    }
}

fn text_response(status: StatusCode, body: String) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
}
