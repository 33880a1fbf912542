//! Monitor library for HTTP services running on Kubernetes
//!
//! This crate provides the core functionality for:
//! - Probing HTTP endpoints with bounded retries
//! - Classifying pod CPU and memory usage against threshold bands
//! - Assessing pod status (crash loops, stuck readiness)
//! - Aggregating a per-tick health verdict and reacting to transitions
//! - Collecting diagnostic container logs when the service turns unhealthy
//! - Self-health checks and observability

pub mod alerter;
pub mod analyzer;
pub mod cluster;
pub mod collector;
pub mod coordinator;
pub mod health;
pub mod models;
pub mod observability;
pub mod prober;
pub mod watcher;

pub use alerter::{AlertError, AlertSink, Alerter, MonitorEvent, TracingAlertSink, TransitionAlert};
pub use cluster::{ClusterClient, ClusterQueryError};
pub use collector::{FileLogStore, LogCollector, LogStore};
pub use coordinator::{Coordinator, CoordinatorConfig, TickOutcome, Transition};
pub use health::{ComponentHealth, HealthRegistry, HealthResponse, ReadinessResponse};
pub use models::*;
pub use observability::{MonitorMetrics, StructuredLogger};
pub use prober::{EndpointProber, HttpTransport, ProberConfig, TransportError};
