// Health probe against a target's metrics endpoint

use std::sync::Arc;
use tokio::time::Instant;
use tracing::debug;

use super::registry::TargetRegistry;
use crate::metrics::PROBE_LATENCY_SECONDS;
use crate::runtime::CallTimeout;

pub const DEFAULT_PROBE_HOST: &str = "localhost";

/// Times `GET http://<host>:<port>/metrics` for registered targets
#[derive(Debug, Clone)]
pub struct HealthProber {
    http: reqwest::Client,
    registry: Arc<TargetRegistry>,
    host: String,
    timeout: CallTimeout,
}

impl HealthProber {
    pub fn new(registry: Arc<TargetRegistry>) -> Self {
        Self {
            http: reqwest::Client::new(),
            registry,
            host: DEFAULT_PROBE_HOST.to_string(),
            timeout: CallTimeout::probe(),
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_timeout(mut self, timeout: CallTimeout) -> Self {
        self.timeout = timeout;
        self
    }

    /// Elapsed milliseconds on HTTP 200, `None` on anything else
    ///
    /// `phase` labels the latency histogram (`before` / `after`).
    pub async fn probe_target(&self, name: &str, phase: &str) -> Option<f64> {
        let port = self.registry.port(name)?;
        let url = format!("http://{}:{}/metrics", self.host, port);

        let start = Instant::now();
        let status = match self.timeout.run(self.http.get(&url).send()).await {
            Ok(Ok(response)) => response.status(),
            Ok(Err(e)) => {
                debug!(container = name, error = %e, "Probe failed");
                return None;
            }
            Err(e) => {
                debug!(container = name, error = %e, "Probe timed out");
                return None;
            }
        };
        if status != reqwest::StatusCode::OK {
            debug!(container = name, %status, "Probe returned non-200");
            return None;
        }

        let elapsed = start.elapsed();
        PROBE_LATENCY_SECONDS
            .with_label_values(&[phase])
            .observe(elapsed.as_secs_f64());
        Some(elapsed.as_secs_f64() * 1000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::registry::{QueryProfile, TargetEntry};
    use axum::{http::StatusCode, routing::get, Router};

    async fn serve(router: Router) -> u16 {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        port
    }

    fn prober_for(name: &str, port: u16) -> HealthProber {
        let mut registry = TargetRegistry::empty();
        registry.insert(name, TargetEntry::new(port, "svc:1", QueryProfile::Generic));
        HealthProber::new(Arc::new(registry)).with_host("127.0.0.1")
    }

    #[tokio::test]
    async fn test_probe_healthy_target() {
        let port = serve(Router::new().route("/metrics", get(|| async { "up 1" }))).await;
        let latency = prober_for("svc", port).probe_target("svc", "before").await;
        assert!(latency.is_some_and(|ms| ms >= 0.0));
    }

    #[tokio::test]
    async fn test_probe_non_200_is_none() {
        let port = serve(Router::new().route(
            "/metrics",
            get(|| async { StatusCode::SERVICE_UNAVAILABLE }),
        ))
        .await;
        assert_eq!(prober_for("svc", port).probe_target("svc", "after").await, None);
    }

    #[tokio::test]
    async fn test_probe_unknown_target_is_none() {
        let prober = HealthProber::new(Arc::new(TargetRegistry::default()));
        assert_eq!(prober.probe_target("postgres", "before").await, None);
    }

    #[tokio::test]
    async fn test_probe_connection_refused_is_none() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        assert_eq!(prober_for("svc", port).probe_target("svc", "before").await, None);
    }
}
