// Metrics Port Blackout
//
// Builds the in-container commands used by the `metrics_block` fault. The
// rule drops inbound TCP to the service's metrics port so scrapes and health
// probes time out while the service itself keeps running.
//
// Key invariants:
// - A failed insertion (no iptables, no NET_ADMIN) exits non-zero so the
//   caller can fall back to patching the exporter
// - Removal deletes the exact rule that was inserted, not a rule position
// - Removal runs detached inside the target after a fixed delay and is not
//   supervised by the agent

/// iptables rule dropping inbound traffic to one port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsBlockRule {
    port: u16,
}

impl MetricsBlockRule {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    /// Rule specification shared by insert and delete
    fn rule_spec(&self) -> String {
        format!("INPUT -p tcp --dport {} -j DROP", self.port)
    }

    /// Insert the DROP rule at the head of INPUT
    pub fn insert_command(&self) -> Vec<String> {
        vec![
            "sh".to_string(),
            "-c".to_string(),
            format!("iptables -I {}", self.rule_spec()),
        ]
    }

    /// Remove the DROP rule after `delay_secs`
    pub fn delayed_removal_command(&self, delay_secs: u64) -> Vec<String> {
        vec![
            "sh".to_string(),
            "-c".to_string(),
            format!("sleep {} && iptables -D {} || true", delay_secs, self.rule_spec()),
        ]
    }

    /// Fallback when iptables is unavailable: make the exporter emit nothing
    pub fn fallback_patch_command(&self) -> Vec<String> {
        vec![
            "python".to_string(),
            "-c".to_string(),
            "import prometheus_client; prometheus_client.generate_latest=lambda *a,**k: b''"
                .to_string(),
        ]
    }
}
