//! Reverse-proxy routing codec
//!
//! Every collected service contributes two nginx snippets to the routing
//! document: an upstream block naming the backend, and a location block that
//! strips the `/<host>` prefix and proxies to that upstream.

use crate::document::ConfigDocument;
use crate::service::ServicePort;

/// Port used when the service carries no port annotation
pub const DEFAULT_PORT: u16 = 80;

/// Backend a routing entry points at
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UpstreamTarget {
    pub host: String,
    pub service: String,
    pub namespace: String,
    pub port: u16,
    /// Path of the OpenAPI document inside the service, always starting with `/`
    pub spec_path: String,
}

impl UpstreamTarget {
    fn server(&self) -> String {
        format!("{}.{}:{}", self.service, self.namespace, self.port)
    }
}

pub fn upstream_key(host: &str) -> String {
    format!("{}-upstream.conf", host)
}

pub fn location_key(host: &str) -> String {
    format!("{}-location.conf", host)
}

/// Resolve the port annotation against the service's ports.
///
/// Numeric values are used literally; anything else is looked up by port name.
/// Returns `None` when the value is neither a valid port nor a known port name.
pub fn resolve_port(annotation: Option<&str>, ports: &[ServicePort]) -> Option<u16> {
    let Some(value) = annotation else {
        return Some(DEFAULT_PORT);
    };

    if let Ok(port) = value.parse::<u16>() {
        return Some(port);
    }

    ports
        .iter()
        .find(|p| p.name.as_deref() == Some(value))
        .and_then(|p| u16::try_from(p.port).ok())
}

pub fn render_upstream(target: &UpstreamTarget) -> String {
    format!(
        "upstream {host} {{\n  server {server};\n}}\n",
        host = target.host,
        server = target.server(),
    )
}

/// Render the location snippet.
///
/// With a spec proxy configured, the document path itself is routed through
/// that upstream first, passing the real backend in the `ServerHost` header so
/// the proxy can rewrite the document's server URLs.
pub fn render_location(target: &UpstreamTarget, spec_proxy: Option<&str>) -> String {
    let mut out = String::new();

    if let Some(proxy) = spec_proxy {
        out.push_str(&format!(
            concat!(
                "location = /{host}{path} {{\n",
                "  proxy_set_header ServerHost \"http://{server}\";\n",
                "  proxy_pass http://{proxy};\n",
                "}}\n\n",
            ),
            host = target.host,
            path = target.spec_path,
            server = target.server(),
            proxy = proxy,
        ));
    }

    out.push_str(&format!(
        "location /{host} {{\n  rewrite /{host}/(.*) /$1 break;\n  proxy_pass http://{host};\n}}\n",
        host = target.host,
    ));

    out
}

/// Write both snippets for `target`, replacing any previous ones
pub fn upsert(doc: &mut ConfigDocument, target: &UpstreamTarget, spec_proxy: Option<&str>) {
    doc.insert(upstream_key(&target.host), render_upstream(target));
    doc.insert(location_key(&target.host), render_location(target, spec_proxy));
}

/// Drop both snippets for `host`; missing keys are ignored
pub fn remove(doc: &mut ConfigDocument, host: &str) {
    doc.remove(&upstream_key(host));
    doc.remove(&location_key(host));
}
