//! Target registry
//!
//! Static knowledge about each service the agent may disturb: the port its
//! metrics endpoint listens on, the instance label Prometheus scrapes it
//! under, and which business-metric query profile applies.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Business metrics evaluated in addition to the common process metrics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryProfile {
    #[default]
    Generic,
    Cart,
    Payment,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetEntry {
    /// Metrics/health port
    pub port: u16,

    /// Fallback Prometheus instance label when discovery finds nothing
    #[serde(default)]
    pub instance: Option<String>,

    #[serde(default)]
    pub profile: QueryProfile,
}

impl TargetEntry {
    pub fn new(port: u16, instance: &str, profile: QueryProfile) -> Self {
        Self {
            port,
            instance: Some(instance.to_string()),
            profile,
        }
    }
}

/// Container name -> target entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetRegistry {
    entries: BTreeMap<String, TargetEntry>,
}

impl Default for TargetRegistry {
    fn default() -> Self {
        let entries = [
            ("testapp_gateway", TargetEntry::new(5000, "gateway:5000", QueryProfile::Generic)),
            ("testapp_catalog", TargetEntry::new(5001, "catalog:5001", QueryProfile::Generic)),
            ("testapp_cart", TargetEntry::new(5002, "cart:5002", QueryProfile::Cart)),
            ("testapp_payment", TargetEntry::new(5003, "payment:5003", QueryProfile::Payment)),
        ]
        .into_iter()
        .map(|(name, entry)| (name.to_string(), entry))
        .collect();
        Self { entries }
    }
}

impl TargetRegistry {
    pub fn empty() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, name: impl Into<String>, entry: TargetEntry) {
        self.entries.insert(name.into(), entry);
    }

    pub fn get(&self, name: &str) -> Option<&TargetEntry> {
        self.entries.get(name)
    }

    pub fn port(&self, name: &str) -> Option<u16> {
        self.get(name).map(|entry| entry.port)
    }

    pub fn instance_label(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(|entry| entry.instance.as_deref())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// PromQL per alias for `target` scraped as `instance`
    ///
    /// Unknown targets get the common process metrics only.
    pub fn queries_for(&self, target: &str, instance: &str) -> BTreeMap<String, String> {
        let mut queries = BTreeMap::new();
        queries.insert(
            "cpu_seconds_per_s".to_string(),
            format!("sum(rate(process_cpu_seconds_total{{instance=\"{instance}\"}}[1m]))"),
        );
        queries.insert(
            "rss_bytes".to_string(),
            format!("avg(process_resident_memory_bytes{{instance=\"{instance}\"}})"),
        );

        let profile = self.get(target).map(|e| e.profile).unwrap_or_default();
        match profile {
            QueryProfile::Generic => {}
            QueryProfile::Cart => {
                queries.insert(
                    "throughput_rps".to_string(),
                    format!("sum(rate(cart_checkout_total{{instance=\"{instance}\"}}[5m]))"),
                );
                queries.insert("amount_p90".to_string(), p90("cart_checkout_amount_bucket", instance));
            }
            QueryProfile::Payment => {
                queries.insert(
                    "throughput_rps".to_string(),
                    format!("sum(rate(payment_payments_total{{instance=\"{instance}\"}}[5m]))"),
                );
                queries.insert(
                    "fail_rps".to_string(),
                    format!("sum(rate(payment_payments_failed_total{{instance=\"{instance}\"}}[5m]))"),
                );
                queries.insert("amount_p90".to_string(), p90("payment_payment_amount_bucket", instance));
            }
        }
        queries
    }
}

fn p90(bucket: &str, instance: &str) -> String {
    format!(
        "histogram_quantile(0.9, sum by (le) (rate({bucket}{{instance=\"{instance}\"}}[5m])))"
    )
}
