//! Core of the OpenAPI collector
//!
//! This library provides:
//! - The reconciliation engine deciding whether a service is collected
//! - Codecs for the nginx routing document and the Swagger UI manifest
//! - Finalizer bookkeeping guaranteeing cleanup before a service is deleted
//! - A store-agnostic reconciliation pass with conflict-aware document writes

pub mod document;
pub mod engine;
pub mod error;
pub mod finalizer;
pub mod manifest;
pub mod pass;
pub mod retry;
pub mod routing;
pub mod service;

pub use document::{ConfigDocument, DocumentNames};
pub use engine::{plan, reconcile, Decision, DocumentsNotReady, EngineSettings};
pub use error::{CollectorError, Result};
pub use pass::{DocumentStore, Outcome, PassReport, Reconciler, ServiceStore};
pub use retry::RetryConfig;
pub use service::{ServicePort, ServiceRecord};
