//! Scripted stand-in for the runtime binary, used by unit tests.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use super::client::RuntimeClient;
use super::command::{command_line, CommandOutput, CommandRunner};
use super::timeout::CallTimeout;

const DEFAULT_STATS: &str = "1.00%|10MiB / 100MiB|10.00%|0B / 0B|0B / 0B";

#[derive(Debug, Default)]
struct FakeState {
    /// container name -> running
    containers: BTreeMap<String, bool>,
    stats: Option<String>,
    failing_subcommands: Vec<(String, String)>,
    failing_patterns: Vec<(String, String)>,
    calls: Vec<Vec<String>>,
}

/// Fake runtime that keeps a container table and records every call
#[derive(Debug, Clone, Default)]
pub(crate) struct FakeRunner {
    state: Arc<Mutex<FakeState>>,
}

impl FakeRunner {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_running(self, names: &[&str]) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            for name in names {
                state.containers.insert(name.to_string(), true);
            }
        }
        self
    }

    pub(crate) fn with_stopped(self, names: &[&str]) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            for name in names {
                state.containers.insert(name.to_string(), false);
            }
        }
        self
    }

    pub(crate) fn with_stats(self, line: &str) -> Self {
        self.state.lock().unwrap().stats = Some(line.to_string());
        self
    }

    /// Fail every call whose first argument is `subcommand`
    pub(crate) fn fail_subcommand(self, subcommand: &str, error: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .failing_subcommands
            .push((subcommand.to_string(), error.to_string()));
        self
    }

    /// Fail every call whose joined command line contains `pattern`
    pub(crate) fn fail_matching(self, pattern: &str, error: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .failing_patterns
            .push((pattern.to_string(), error.to_string()));
        self
    }

    pub(crate) fn set_running(&self, name: &str, running: bool) {
        self.state
            .lock()
            .unwrap()
            .containers
            .insert(name.to_string(), running);
    }

    pub(crate) fn calls(&self) -> Vec<Vec<String>> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Recorded calls excluding `ps` and `stats` bookkeeping
    pub(crate) fn control_calls(&self) -> Vec<Vec<String>> {
        self.calls()
            .into_iter()
            .filter(|c| c[0] != "ps" && c[0] != "stats")
            .collect()
    }

    pub(crate) fn client(&self) -> RuntimeClient {
        RuntimeClient::with_runner("docker", Arc::new(self.clone()))
    }
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn run(&self, program: &str, args: &[String], _timeout: CallTimeout) -> CommandOutput {
        let cmd = command_line(program, args);
        let mut state = self.state.lock().unwrap();
        state.calls.push(args.to_vec());

        let subcommand = args.first().map(String::as_str).unwrap_or("");
        let failure = state
            .failing_subcommands
            .iter()
            .find(|(sub, _)| sub == subcommand)
            .or_else(|| {
                state
                    .failing_patterns
                    .iter()
                    .find(|(pattern, _)| cmd.contains(pattern.as_str()))
            })
            .map(|(_, error)| error.clone());
        if let Some(error) = failure {
            return CommandOutput::from_exit(cmd, "", &error, 1);
        }

        let target = args.last().cloned().unwrap_or_default();
        let stdout = match subcommand {
            "ps" => {
                let include_stopped = args.iter().any(|a| a == "-a");
                state
                    .containers
                    .iter()
                    .filter(|(_, running)| include_stopped || **running)
                    .map(|(name, running)| {
                        serde_json::json!({
                            "Names": name,
                            "State": if *running { "running" } else { "exited" },
                        })
                        .to_string()
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            }
            "stats" => state.stats.clone().unwrap_or_else(|| DEFAULT_STATS.to_string()),
            "kill" => {
                state.containers.insert(target, false);
                String::new()
            }
            "start" | "restart" => {
                state.containers.insert(target, true);
                String::new()
            }
            _ => String::new(),
        };

        CommandOutput::from_exit(cmd, &stdout, "", 0)
    }
}
