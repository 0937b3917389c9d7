//! Chaos Agent Library
//!
//! Injects controlled failures into running service containers while
//! observing their health before and after each injection, and aggregates
//! the observations into a run summary.
//!
//! # Modules
//!
//! - [`runtime`]: container runtime CLI client
//! - [`eligibility`]: which containers may be disturbed
//! - [`faults`]: the fault catalog
//! - [`observe`]: health probes, Prometheus queries, resource stats
//! - [`agent`]: the orchestration loop
//! - [`stats`]: running statistics and the summary
//! - [`control`]: control-plane `inject` requests

pub mod agent;
pub mod config;
pub mod control;
pub mod eligibility;
pub mod event_log;
pub mod faults;
pub mod metrics;
pub mod metrics_server;
pub mod observe;
pub mod runtime;
pub mod stats;
