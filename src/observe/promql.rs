//! Prometheus instant-query client
//!
//! Only the `/api/v1/query` endpoint is used. Every failure mode (transport
//! error, timeout, non-success status, unparseable body) is an
//! [`PromError`] for the raw query and folds into `None` for the derived
//! helpers.

use reqwest::Url;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::debug;

use crate::runtime::{CallTimeout, TimedOut};

#[derive(Debug, Error)]
pub enum PromError {
    #[error("invalid query url: {0}")]
    Url(String),

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error(transparent)]
    Timeout(#[from] TimedOut),

    #[error("query status {status}: {error}")]
    Status { status: String, error: String },
}

/// Body of an instant query response
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueryResponse {
    pub status: String,

    #[serde(default)]
    pub data: QueryData,

    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueryData {
    #[serde(default)]
    pub result: Vec<QuerySample>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct QuerySample {
    #[serde(default)]
    pub metric: BTreeMap<String, String>,

    /// `[timestamp, "value"]`
    #[serde(default)]
    pub value: Vec<Value>,
}

impl QuerySample {
    /// Finite sample value; `NaN` and `±Inf` count as missing
    pub fn number(&self) -> Option<f64> {
        let value = match self.value.get(1)? {
            Value::String(s) => s.parse::<f64>().ok(),
            Value::Number(n) => n.as_f64(),
            _ => None,
        };
        value.filter(|v| v.is_finite())
    }
}

impl QueryResponse {
    /// Value of the first series
    pub fn first_value(&self) -> Option<f64> {
        self.data.result.first().and_then(QuerySample::number)
    }
}

#[derive(Debug, Clone)]
pub struct PromClient {
    http: reqwest::Client,
    base_url: String,
    timeout: CallTimeout,
}

impl PromClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            timeout: CallTimeout::query(),
        }
    }

    pub fn with_timeout(mut self, timeout: CallTimeout) -> Self {
        self.timeout = timeout;
        self
    }

    /// Evaluate one PromQL expression
    pub async fn query(&self, expr: &str) -> Result<QueryResponse, PromError> {
        let url = Url::parse_with_params(
            &format!("{}/api/v1/query", self.base_url.trim_end_matches('/')),
            &[("query", expr)],
        )
        .map_err(|e| PromError::Url(e.to_string()))?;

        let response = self
            .timeout
            .run(async {
                self.http
                    .get(url)
                    .send()
                    .await?
                    .json::<QueryResponse>()
                    .await
            })
            .await??;

        if response.status != "success" {
            return Err(PromError::Status {
                error: response.error.clone().unwrap_or_default(),
                status: response.status,
            });
        }
        Ok(response)
    }

    /// Instance label under `job` whose port suffix is `port`
    pub async fn discover_instance_label(&self, job: &str, port: u16) -> Option<String> {
        let response = match self.query(&format!("up{{job=\"{job}\"}}")).await {
            Ok(response) => response,
            Err(e) => {
                debug!(job, error = %e, "Instance discovery failed");
                return None;
            }
        };

        let suffix = format!(":{port}");
        response
            .data
            .result
            .into_iter()
            .filter_map(|sample| sample.metric.get("instance").cloned())
            .find(|instance| instance.ends_with(&suffix))
    }

    /// Evaluate each aliased query independently
    pub async fn eval_metric_queries(
        &self,
        queries: &BTreeMap<String, String>,
    ) -> BTreeMap<String, Option<f64>> {
        let mut values = BTreeMap::new();
        for (alias, expr) in queries {
            let value = match self.query(expr).await {
                Ok(response) => response.first_value(),
                Err(e) => {
                    debug!(alias = %alias, error = %e, "Metric query failed");
                    None
                }
            };
            values.insert(alias.clone(), value);
        }
        values
    }

    /// `up` value for one instance
    pub async fn uptime(&self, instance: &str) -> Option<f64> {
        self.query(&format!("up{{instance=\"{instance}\"}}"))
            .await
            .ok()
            .and_then(|response| response.first_value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::Query, routing::get, Json, Router};
    use serde_json::json;
    use std::collections::HashMap;

    /// Fake Prometheus answering a few fixed expressions
    async fn fake_prometheus() -> String {
        async fn handler(Query(params): Query<HashMap<String, String>>) -> Json<Value> {
            let expr = params.get("query").cloned().unwrap_or_default();
            let body = match expr.as_str() {
                "up{job=\"test_app\"}" => json!({
                    "status": "success",
                    "data": {"result": [
                        {"metric": {"instance": "172.18.0.4:5001"}, "value": [1.0, "1"]},
                        {"metric": {"instance": "172.18.0.5:5002"}, "value": [1.0, "1"]}
                    ]}
                }),
                "up{instance=\"cart:5002\"}" => json!({
                    "status": "success",
                    "data": {"result": [{"metric": {}, "value": [1.0, "0"]}]}
                }),
                "rate_ok" => json!({
                    "status": "success",
                    "data": {"result": [{"metric": {}, "value": [1.0, "2.5"]}]}
                }),
                "nan_value" => json!({
                    "status": "success",
                    "data": {"result": [{"metric": {}, "value": [1.0, "not-a-number"]}]}
                }),
                "quantile_no_traffic" => json!({
                    "status": "success",
                    "data": {"result": [{"metric": {}, "value": [1.0, "NaN"]}]}
                }),
                "ratio_div_zero" => json!({
                    "status": "success",
                    "data": {"result": [{"metric": {}, "value": [1.0, "+Inf"]}]}
                }),
                "bad" => json!({"status": "error", "error": "parse error"}),
                _ => json!({"status": "success", "data": {"result": []}}),
            };
            Json(body)
        }

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, Router::new().route("/api/v1/query", get(handler)))
                .await
                .unwrap();
        });
        format!("http://{}/", addr)
    }

    #[tokio::test]
    async fn test_discover_instance_by_port() {
        let prom = PromClient::new(fake_prometheus().await);
        assert_eq!(
            prom.discover_instance_label("test_app", 5002).await.as_deref(),
            Some("172.18.0.5:5002")
        );
        assert_eq!(prom.discover_instance_label("test_app", 5003).await, None);
        assert_eq!(prom.discover_instance_label("other_job", 5002).await, None);
    }

    #[tokio::test]
    async fn test_partial_failures_do_not_abort_batch() {
        let prom = PromClient::new(fake_prometheus().await);
        let queries: BTreeMap<String, String> = [
            ("ok", "rate_ok"),
            ("empty", "no_series"),
            ("nan", "nan_value"),
            ("quantile", "quantile_no_traffic"),
            ("inf", "ratio_div_zero"),
            ("err", "bad"),
        ]
        .into_iter()
        .map(|(a, q)| (a.to_string(), q.to_string()))
        .collect();

        let values = prom.eval_metric_queries(&queries).await;

        assert_eq!(values.len(), 6);
        assert_eq!(values["ok"], Some(2.5));
        assert_eq!(values["empty"], None);
        assert_eq!(values["nan"], None);
        assert_eq!(values["quantile"], None);
        assert_eq!(values["inf"], None);
        assert_eq!(values["err"], None);
    }

    #[test]
    fn test_non_finite_samples_are_missing() {
        let sample = |v: Value| QuerySample {
            metric: BTreeMap::new(),
            value: vec![json!(1.0), v],
        };
        assert_eq!(sample(json!("0.25")).number(), Some(0.25));
        assert_eq!(sample(json!("NaN")).number(), None);
        assert_eq!(sample(json!("+Inf")).number(), None);
        assert_eq!(sample(json!("-Inf")).number(), None);
    }

    #[tokio::test]
    async fn test_error_status_is_error() {
        let prom = PromClient::new(fake_prometheus().await);
        let err = prom.query("bad").await.unwrap_err();
        assert!(matches!(err, PromError::Status { .. }));
        assert!(err.to_string().contains("parse error"));
    }

    #[tokio::test]
    async fn test_uptime_reads_first_sample() {
        let prom = PromClient::new(fake_prometheus().await);
        assert_eq!(prom.uptime("cart:5002").await, Some(0.0));
        assert_eq!(prom.uptime("gateway:5000").await, None);
    }

    #[tokio::test]
    async fn test_unreachable_server_folds_to_none() {
        let prom = PromClient::new("http://127.0.0.1:1");
        assert!(prom.query("up").await.is_err());
        assert_eq!(prom.uptime("cart:5002").await, None);
    }
}
