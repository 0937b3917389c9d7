//! Container Runtime Subsystem
//!
//! Everything the agent does to a container goes through the runtime CLI:
//! lifecycle control (pause/unpause/restart/kill/start), cgroup updates,
//! `exec` inside the container, listing and single-shot stats.
//!
//! # Architecture
//!
//! - `command.rs`: subprocess execution behind the [`CommandRunner`] seam
//! - `client.rs`: argument building and output parsing per operation
//! - `stats.rs`: `stats` output and size-unit parsing
//! - `timeout.rs`: bounded calls
//!
//! Failures never surface as `Err`: a non-zero exit, a missing binary or a
//! timeout is reported in the `error` field of the returned value.

mod client;
mod command;
#[cfg(test)]
pub(crate) mod fake;
mod stats;
mod timeout;

pub use client::{
    cpu_quota, exec_args, update_args, ContainerList, ContainerSummary, ResourceUpdate,
    RuntimeClient, CPU_PERIOD_US, DEFAULT_RUNTIME_BINARY,
};
pub use command::{command_line, CommandOutput, CommandRunner, ProcessRunner};
pub use stats::{parse_size_to_bytes, parse_stats_line, ResourceSample, ResourceUsage, STATS_FORMAT};
pub use timeout::{CallTimeout, TimedOut};
