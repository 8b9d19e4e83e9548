//! Fetches a service's OpenAPI document and rewrites its server URLs
//!
//! The router exposes every collected service under `/<host>`. Documents
//! served by the services themselves know nothing about that prefix, so the
//! `servers` list is rewritten to point back through the router.

use std::time::Duration;

use anyhow::Result;
use http_body_util::Full;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{body::Bytes, HeaderMap, Method, Request, Response, StatusCode};
use serde_json::{json, Value};
use tracing::{debug, warn};

/// Header carrying the real backend base URL, set by the router
pub const SERVER_HOST_HEADER: &str = "serverhost";

const DESCRIPTION_SUFFIX: &str = "Not real base path";

pub struct SpecProxy {
    client: reqwest::Client,
}

impl SpecProxy {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .no_proxy()
            .build()?;
        Ok(Self { client })
    }

    pub async fn handle<B>(&self, req: Request<B>) -> Response<Full<Bytes>> {
        let path = req.uri().path();

        if req.method() == Method::GET && path == "/healthz" {
            return empty_response(StatusCode::OK);
        }

        let (host, rest) = match (req.method(), split_spec_path(path)) {
            (&Method::GET, Some(parts)) => parts,
            _ => return json_response(StatusCode::NOT_FOUND, json!({"msg": "not found"})),
        };

        let Some(server_host) = req
            .headers()
            .get(SERVER_HOST_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
        else {
            return json_response(
                StatusCode::BAD_REQUEST,
                json!({"msg": "missing ServerHost header"}),
            );
        };

        let url = upstream_url(server_host, rest, req.uri().query());

        match self.fetch(&url, req.headers()).await {
            Ok(mut spec) => {
                rewrite_servers(&mut spec, host);
                json_response(StatusCode::OK, spec)
            }
            Err(e) => {
                warn!(url = %url, error = %e, "Error getting spec");
                json_response(StatusCode::INTERNAL_SERVER_ERROR, json!({"msg": "error"}))
            }
        }
    }

    async fn fetch(&self, url: &str, headers: &HeaderMap) -> Result<Value> {
        debug!("Fetching spec from {}", url);

        let response = self
            .client
            .get(url)
            .headers(forwarded_headers(headers))
            .send()
            .await?
            .error_for_status()?;

        let spec: Value = response.json().await?;
        if !spec.is_object() {
            anyhow::bail!("spec at {} is not a JSON object", url);
        }
        Ok(spec)
    }
}

/// `/<host>/<path>` → (`<host>`, `<path>`), where `<path>` names the document
/// inside the service and has at least one segment
pub fn split_spec_path(path: &str) -> Option<(&str, &str)> {
    let (host, rest) = path.strip_prefix('/')?.split_once('/')?;
    if host.is_empty() || rest.is_empty() || rest.split('/').any(str::is_empty) {
        return None;
    }
    Some((host, rest))
}

/// Re-root the service-relative document path on `server_host`
pub fn upstream_url(server_host: &str, path: &str, query: Option<&str>) -> String {
    let mut url = format!("{}/{}", server_host.trim_end_matches('/'), path);
    if let Some(query) = query.filter(|q| !q.is_empty()) {
        url.push('?');
        url.push_str(query);
    }
    url
}

/// Prefix every server URL with `/<host>` and flag the description
pub fn rewrite_servers(spec: &mut Value, host: &str) {
    let Some(obj) = spec.as_object_mut() else {
        return;
    };

    let mut servers = match obj.remove("servers") {
        Some(Value::Array(servers)) if !servers.is_empty() => servers,
        _ => vec![json!({"url": "", "description": ""})],
    };

    for server in servers.iter_mut() {
        let Some(server) = server.as_object_mut() else {
            continue;
        };

        let url = server.get("url").and_then(Value::as_str).unwrap_or("");
        let url = format!("/{}{}", host, url);

        let mut description = server
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        if !description.is_empty() {
            description.push_str(" - ");
        }
        description.push_str(DESCRIPTION_SUFFIX);

        server.insert("url".to_string(), Value::String(url));
        server.insert("description".to_string(), Value::String(description));
    }

    obj.insert("servers".to_string(), Value::Array(servers));
}

/// Request headers passed to the backend: everything but the routing headers
/// and hop-by-hop headers
fn forwarded_headers(headers: &HeaderMap) -> reqwest::header::HeaderMap {
    let mut forwarded = reqwest::header::HeaderMap::new();
    for (name, value) in headers {
        if !is_forwarded(name.as_str()) {
            continue;
        }
        let (Ok(name), Ok(value)) = (
            reqwest::header::HeaderName::from_bytes(name.as_str().as_bytes()),
            reqwest::header::HeaderValue::from_bytes(value.as_bytes()),
        ) else {
            continue;
        };
        forwarded.append(name, value);
    }
    forwarded
}

fn is_forwarded(name: &str) -> bool {
    !matches!(
        name,
        "host"
            | SERVER_HOST_HEADER
            | "content-length"
            | "accept-encoding"
            | "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailers"
            | "transfer-encoding"
            | "upgrade"
    )
}

fn json_response(status: StatusCode, body: Value) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body.to_string())));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

fn empty_response(status: StatusCode) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = status;
    response
}
