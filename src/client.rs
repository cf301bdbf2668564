/// Cliente HTTP resiliente
/// Envolve um `Transport` com circuit breakers por endpoint, retries limitados
/// com backoff exponencial + jitter e métricas de requisição por endpoint
use std::{sync::Arc, time::Duration};

use http::{HeaderMap, HeaderName, HeaderValue, Method};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::breaker::{BreakerRegistry, BreakerSettings, BreakerSnapshot};
use crate::config::ClientConfig;
use crate::error::{ClientError, classify_response, classify_transport};
use crate::retry::{RetryPolicy, retry_delay};
use crate::stats::{RequestMetrics, StatsRegistry};
use crate::transport::{ReqwestTransport, Transport, TransportRequest, TransportResponse};

const REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Ajustes por chamada
#[derive(Clone, Debug, Default)]
pub struct RequestOptions {
    /// Exatamente uma tentativa
    pub skip_retry: bool,
    /// Pula o check do breaker; o resultado ainda atualiza o breaker
    pub skip_circuit_breaker: bool,
    /// Headers extras em todas as tentativas desta chamada
    pub headers: HeaderMap,
    /// Sobrescreve o timeout por tentativa
    pub timeout: Option<Duration>,
    /// Prazo cobrindo todas as tentativas, sobrescreve o padrão do cliente
    /// Valores que estouram o relógio (ex.: `Duration::MAX`) significam sem prazo
    pub overall_timeout: Option<Duration>,
}

impl RequestOptions {
    pub fn single_attempt() -> Self {
        Self {
            skip_retry: true,
            ..Self::default()
        }
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }
}

/// Registros de breakers e métricas
/// Posse explícita para vários clientes compartilharem o mesmo store
#[derive(Clone, Default)]
pub struct ClientState {
    pub breakers: Arc<BreakerRegistry>,
    pub stats: Arc<StatsRegistry>,
}

impl ClientState {
    pub fn new(settings: BreakerSettings) -> Self {
        Self {
            breakers: Arc::new(BreakerRegistry::new(settings)),
            stats: Arc::new(StatsRegistry::new()),
        }
    }

    pub fn from_config(cfg: &ClientConfig) -> Self {
        Self::new(BreakerSettings {
            threshold: cfg.circuit_breaker_threshold.max(1),
            cooldown: cfg.circuit_breaker_cooldown,
            half_open_success_threshold: cfg.circuit_breaker_half_open_success_threshold.max(1),
        })
    }
}

pub struct ResilientClient<T = ReqwestTransport> {
    transport: Arc<T>,
    config: Arc<ClientConfig>,
    state: ClientState,
    retry: RetryPolicy,
}

impl<T> Clone for ResilientClient<T> {
    /// Clones compartilham o transporte e o store de estado
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            config: Arc::clone(&self.config),
            state: self.state.clone(),
            retry: self.retry.clone(),
        }
    }
}

impl ResilientClient<ReqwestTransport> {
    /// Cliente de produção sobre o transporte reqwest com pool
    pub fn from_config(config: ClientConfig) -> anyhow::Result<Self> {
        let config = config.normalized();
        let transport = ReqwestTransport::new(&config)?;
        Ok(Self::new(transport, config))
    }
}

impl<T: Transport> ResilientClient<T> {
    /// Cliente com store de estado próprio e vazio
    pub fn new(transport: T, config: ClientConfig) -> Self {
        let config = config.normalized();
        let state = ClientState::from_config(&config);
        Self::with_state(transport, config, state)
    }

    /// Cliente sobre um store de estado existente
    pub fn with_state(transport: T, config: ClientConfig, state: ClientState) -> Self {
        Self {
            transport: Arc::new(transport),
            config: Arc::new(config.normalized()),
            state,
            retry: RetryPolicy::default(),
        }
    }

    /// Substitui o predicado de retry padrão
    pub fn with_retry_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&ClientError) -> bool + Send + Sync + 'static,
    {
        self.retry = RetryPolicy::new(predicate);
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn state(&self) -> &ClientState {
        &self.state
    }

    // ========== VERBOS ==========

    pub async fn get<R: DeserializeOwned>(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> Result<R, ClientError> {
        self.request(Method::GET, path, None, options).await
    }

    pub async fn post<R: DeserializeOwned>(
        &self,
        path: &str,
        body: Option<Value>,
        options: RequestOptions,
    ) -> Result<R, ClientError> {
        self.request(Method::POST, path, body, options).await
    }

    pub async fn put<R: DeserializeOwned>(
        &self,
        path: &str,
        body: Option<Value>,
        options: RequestOptions,
    ) -> Result<R, ClientError> {
        self.request(Method::PUT, path, body, options).await
    }

    pub async fn patch<R: DeserializeOwned>(
        &self,
        path: &str,
        body: Option<Value>,
        options: RequestOptions,
    ) -> Result<R, ClientError> {
        self.request(Method::PATCH, path, body, options).await
    }

    pub async fn delete<R: DeserializeOwned>(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> Result<R, ClientError> {
        self.request(Method::DELETE, path, None, options).await
    }

    /// Roda o loop de retry e decodifica o corpo JSON (corpo vazio vira `null`)
    pub async fn request<R: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        options: RequestOptions,
    ) -> Result<R, ClientError> {
        let (resp, attempt) = self.run(method, path, body, &options).await?;
        let raw: &[u8] = if resp.body.is_empty() {
            b"null"
        } else {
            &resp.body
        };
        serde_json::from_slice(raw).map_err(|e| ClientError::Api {
            endpoint: endpoint_key(path).to_string(),
            attempt,
            status: Some(resp.status),
            body: Some(String::from_utf8_lossy(&resp.body).into_owned()),
            message: format!("invalid response body: {e}"),
        })
    }

    /// Roda o loop de retry e devolve a resposta bruta de sucesso
    pub async fn execute_with_retry(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        options: RequestOptions,
    ) -> Result<TransportResponse, ClientError> {
        self.run(method, path, body, &options)
            .await
            .map(|(resp, _)| resp)
    }

    async fn run(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        options: &RequestOptions,
    ) -> Result<(TransportResponse, u32), ClientError> {
        let endpoint = endpoint_key(path);
        let max_attempts = if options.skip_retry {
            1
        } else {
            self.config.max_retry_attempts.max(1)
        };
        // prazo que estoura o Instant equivale a não ter prazo
        let deadline = options
            .overall_timeout
            .or(self.config.overall_timeout)
            .and_then(|d| Instant::now().checked_add(d));
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            if deadline.is_some_and(|dl| Instant::now() >= dl) {
                return Err(ClientError::DeadlineExceeded {
                    endpoint: endpoint.to_string(),
                    attempt: attempt - 1,
                });
            }

            // ========== CIRCUIT BREAKER ==========
            // Rejeição não conta como requisição nem mexe no breaker
            if !options.skip_circuit_breaker && self.state.breakers.is_open(endpoint) {
                metrics::counter!("client_circuit_rejections_total", "endpoint" => endpoint.to_string())
                    .increment(1);
                debug!(endpoint, attempt, "rejected by open circuit");
                return Err(ClientError::CircuitOpen {
                    endpoint: endpoint.to_string(),
                });
            }

            // ========== TENTATIVA ==========
            // Cada tentativa leva um x-request-id novo
            let request = TransportRequest {
                method: method.clone(),
                path: path.to_string(),
                body: body.clone(),
                headers: attempt_headers(&options.headers),
                timeout: options.timeout,
            };
            if self.config.log_requests {
                debug!(%method, endpoint, attempt, "request");
            }

            let started = Instant::now();
            let outcome = match deadline {
                Some(dl) => match tokio::time::timeout_at(dl, self.transport.send(request)).await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        self.record_failure(endpoint);
                        return Err(ClientError::DeadlineExceeded {
                            endpoint: endpoint.to_string(),
                            attempt,
                        });
                    }
                },
                None => self.transport.send(request).await,
            };
            let elapsed = started.elapsed();

            let error = match outcome {
                Ok(resp) if resp.status.is_success() => {
                    if self.config.log_requests {
                        debug!(endpoint, attempt, status = %resp.status, ?elapsed, "response");
                    }
                    self.record_success(endpoint, elapsed);
                    return Ok((resp, attempt));
                }
                Ok(resp) => classify_response(endpoint, attempt, &resp),
                Err(e) => classify_transport(endpoint, attempt, e),
            };
            self.record_failure(endpoint);

            // ========== DECISÃO DE RETRY ==========
            // Falha já registrada acima; aqui só decide se tenta de novo
            let retry = attempt < max_attempts
                && !options.skip_retry
                && self.retry.should_retry(&error);
            if !retry {
                debug!(endpoint, attempt, kind = error.kind(), "giving up");
                return Err(error);
            }

            let mut delay = retry_delay(
                attempt,
                self.config.base_retry_delay,
                self.config.max_retry_delay,
            );
            if let ClientError::RateLimit {
                retry_after: Some(hint),
                ..
            } = &error
            {
                delay = delay.max(*hint).min(self.config.max_retry_delay);
            }
            let crosses =
                |dl: Instant| Instant::now().checked_add(delay).is_none_or(|at| at >= dl);
            if deadline.is_some_and(crosses) {
                debug!(endpoint, attempt, "next backoff would cross the deadline");
                return Err(error);
            }

            warn!(endpoint, attempt, ?delay, error = %error, "retrying");
            metrics::counter!("client_retries_total", "endpoint" => endpoint.to_string())
                .increment(1);
            tokio::time::sleep(delay).await;
            last_error = Some(error);
        }

        Err(last_error.unwrap_or_else(|| ClientError::Api {
            endpoint: endpoint.to_string(),
            attempt: max_attempts,
            status: None,
            body: None,
            message: "request failed without a recorded error".into(),
        }))
    }

    fn record_success(&self, endpoint: &str, latency: Duration) {
        self.state.breakers.record_success(endpoint);
        self.state.stats.record_success(endpoint, latency);
    }

    fn record_failure(&self, endpoint: &str) {
        self.state.breakers.record_failure(endpoint);
        self.state.stats.record_failure(endpoint);
    }

    // ========== OBSERVABILIDADE ==========

    pub fn circuit_breaker_states(&self) -> Vec<BreakerSnapshot> {
        self.state.breakers.snapshot_all()
    }

    pub fn metrics(&self) -> Vec<RequestMetrics> {
        self.state.stats.snapshot_all()
    }

    pub fn reset_circuit_breaker(&self, endpoint: &str) -> bool {
        self.state.breakers.reset(endpoint_key(endpoint))
    }

    pub fn reset_all_circuit_breakers(&self) {
        self.state.breakers.reset_all();
    }

    pub fn reset_metrics(&self, endpoint: &str) -> bool {
        self.state.stats.reset(endpoint_key(endpoint))
    }

    pub fn reset_all_metrics(&self) {
        self.state.stats.reset_all();
    }
}

/// Chave de breaker/métricas: o path sem a query string
pub fn endpoint_key(path: &str) -> &str {
    path.split_once('?').map_or(path, |(p, _)| p)
}

fn attempt_headers(extra: &HeaderMap) -> HeaderMap {
    let mut headers = extra.clone();
    if let Ok(id) = HeaderValue::from_str(&uuid::Uuid::new_v4().to_string()) {
        headers.insert(REQUEST_ID, id);
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_key_strips_query() {
        assert_eq!(endpoint_key("/v1/api/x?a=1&b=2"), "/v1/api/x");
        assert_eq!(endpoint_key("/v1/api/x"), "/v1/api/x");
        assert_eq!(endpoint_key(""), "");
    }

    #[test]
    fn each_attempt_gets_a_fresh_request_id() {
        let extra = HeaderMap::new();
        let a = attempt_headers(&extra);
        let b = attempt_headers(&extra);
        assert!(a.contains_key(REQUEST_ID));
        assert_ne!(a.get(REQUEST_ID), b.get(REQUEST_ID));
    }

    #[test]
    fn single_attempt_options() {
        let o = RequestOptions::single_attempt();
        assert!(o.skip_retry);
        assert!(!o.skip_circuit_breaker);
    }
}
