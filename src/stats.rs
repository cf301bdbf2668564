/// Métricas de requisição por endpoint
/// Conta cada tentativa no transporte como sucesso ou falha e mantém a média
/// corrente da latência dos sucessos, espelhando tudo na fachada `metrics`
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use hdrhistogram::Histogram;
use serde::Serialize;

struct EndpointStats {
    total_requests: u64,
    successful_requests: u64,
    failed_requests: u64,
    average_response_time_ms: f64,
    last_request_at: Option<DateTime<Utc>>,
    // None quando o histograma não pôde ser alocado
    latency: Option<Histogram<u64>>,
}

impl Default for EndpointStats {
    fn default() -> Self {
        Self {
            total_requests: 0,
            successful_requests: 0,
            failed_requests: 0,
            average_response_time_ms: 0.0,
            last_request_at: None,
            latency: Histogram::new(3).ok(),
        }
    }
}

/// Cópia somente leitura das métricas de um endpoint
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestMetrics {
    pub endpoint: String,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    /// Média só sobre requisições com sucesso
    pub average_response_time: f64,
    pub p50_response_time: Option<u64>,
    pub p99_response_time: Option<u64>,
    pub last_request_time: Option<DateTime<Utc>>,
}

#[derive(Default)]
pub struct StatsRegistry {
    endpoints: DashMap<String, EndpointStats>,
}

impl StatsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&self, endpoint: &str, latency: Duration) {
        let latency_ms = latency.as_secs_f64() * 1_000.0;
        {
            let mut s = self.endpoints.entry(endpoint.to_string()).or_default();
            s.total_requests += 1;
            s.successful_requests += 1;
            let n = s.successful_requests as f64;
            s.average_response_time_ms = (s.average_response_time_ms * (n - 1.0) + latency_ms) / n;
            s.last_request_at = Some(Utc::now());
            if let Some(h) = s.latency.as_mut() {
                h.saturating_record(latency.as_millis().min(u64::MAX as u128) as u64);
            }
        }

        metrics::counter!("client_requests_total", "endpoint" => endpoint.to_string(), "outcome" => "success")
            .increment(1);
        metrics::histogram!("client_request_latency_ms", "endpoint" => endpoint.to_string())
            .record(latency_ms);
    }

    pub fn record_failure(&self, endpoint: &str) {
        {
            let mut s = self.endpoints.entry(endpoint.to_string()).or_default();
            s.total_requests += 1;
            s.failed_requests += 1;
            s.last_request_at = Some(Utc::now());
        }

        metrics::counter!("client_requests_total", "endpoint" => endpoint.to_string(), "outcome" => "failure")
            .increment(1);
    }

    pub fn snapshot(&self, endpoint: &str) -> Option<RequestMetrics> {
        self.endpoints.get(endpoint).map(|s| snapshot_of(endpoint, &s))
    }

    /// Todos os endpoints conhecidos, ordenados por nome
    pub fn snapshot_all(&self) -> Vec<RequestMetrics> {
        let mut all: Vec<_> = self
            .endpoints
            .iter()
            .map(|e| snapshot_of(e.key(), e.value()))
            .collect();
        all.sort_by(|a, b| a.endpoint.cmp(&b.endpoint));
        all
    }

    pub fn reset(&self, endpoint: &str) -> bool {
        self.endpoints.remove(endpoint).is_some()
    }

    pub fn reset_all(&self) {
        self.endpoints.clear();
    }
}

fn snapshot_of(endpoint: &str, s: &EndpointStats) -> RequestMetrics {
    let quantile = |q: f64| {
        s.latency
            .as_ref()
            .filter(|h| !h.is_empty())
            .map(|h| h.value_at_quantile(q))
    };
    RequestMetrics {
        endpoint: endpoint.to_string(),
        total_requests: s.total_requests,
        successful_requests: s.successful_requests,
        failed_requests: s.failed_requests,
        average_response_time: s.average_response_time_ms,
        p50_response_time: quantile(0.5),
        p99_response_time: quantile(0.99),
        last_request_time: s.last_request_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn running_mean_over_successes() {
        let r = StatsRegistry::new();
        r.record_success("/x", Duration::from_millis(100));
        r.record_success("/x", Duration::from_millis(200));
        r.record_success("/x", Duration::from_millis(300));
        let m = r.snapshot("/x").unwrap();
        assert_eq!(m.successful_requests, 3);
        assert!((m.average_response_time - 200.0).abs() < 1e-9);
        assert!(m.p50_response_time.is_some());
        assert!(m.last_request_time.is_some());
    }

    #[test]
    fn failures_do_not_move_the_average() {
        let r = StatsRegistry::new();
        r.record_success("/x", Duration::from_millis(40));
        r.record_failure("/x");
        r.record_failure("/x");
        let m = r.snapshot("/x").unwrap();
        assert!((m.average_response_time - 40.0).abs() < 1e-9);
        assert_eq!(m.failed_requests, 2);
        assert_eq!(m.total_requests, m.successful_requests + m.failed_requests);
    }

    #[test]
    fn failure_only_endpoint_has_no_percentiles() {
        let r = StatsRegistry::new();
        r.record_failure("/down");
        let m = r.snapshot("/down").unwrap();
        assert_eq!(m.total_requests, 1);
        assert_eq!(m.average_response_time, 0.0);
        assert_eq!(m.p99_response_time, None);
    }

    #[test]
    fn reset_clears_endpoints() {
        let r = StatsRegistry::new();
        r.record_failure("/a");
        r.record_failure("/b");
        assert!(r.reset("/a"));
        assert_eq!(r.snapshot_all().len(), 1);
        r.reset_all();
        assert!(r.snapshot_all().is_empty());
    }
}
