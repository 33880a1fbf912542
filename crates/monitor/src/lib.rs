//! podwatch: production collaborators and wiring for the monitor
//!
//! The monitoring logic lives in `monitor_lib`; this crate connects it to
//! Kubernetes, HTTP, an Alertmanager webhook and the self-observability API.

pub mod alert;
pub mod api;
pub mod config;
pub mod transport;
pub mod k8s;
