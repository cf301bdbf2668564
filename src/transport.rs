/// Transporte HTTP de saída
/// O cliente só precisa de "envia esta requisição, devolve uma resposta ou falha";
/// `ReqwestTransport` é a implementação de produção
use std::{future::Future, sync::Arc, time::Duration};

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use reqwest::Client;
use serde_json::Value;

use crate::config::ClientConfig;

/// Uma tentativa como entregue ao transporte
#[derive(Clone, Debug)]
pub struct TransportRequest {
    pub method: Method,
    /// Path relativo à URL base do transporte (query string permitida)
    pub path: String,
    pub body: Option<Value>,
    pub headers: HeaderMap,
    /// Sobrescreve o timeout padrão por tentativa
    pub timeout: Option<Duration>,
}

/// Qualquer resposta HTTP, de sucesso ou não
#[derive(Clone, Debug)]
pub struct TransportResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl TransportResponse {
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    pub fn json(status: StatusCode, value: &Value) -> Self {
        Self::new(status, value.to_string())
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }
}

/// Falhas sem resposta HTTP
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Connection refused, falha de DNS, timeout, stream do corpo quebrado
    #[error("no response: {0}")]
    NoResponse(String),
    /// A requisição não pôde ser montada
    #[error("request setup error: {0}")]
    Setup(String),
}

/// Colaborador HTTP injetado
/// Status não-2xx voltam como `Ok`; classificar é papel do chamador
pub trait Transport: Send + Sync {
    fn send(
        &self,
        request: TransportRequest,
    ) -> impl Future<Output = Result<TransportResponse, TransportError>> + Send;
}

/// Transporte sobre um `reqwest::Client` com pool
#[derive(Clone)]
pub struct ReqwestTransport {
    base_url: String,
    /// Pool de conexões compartilhado
    http: Arc<Client>,
}

impl ReqwestTransport {
    /// Monta o cliente com pool a partir das configurações
    pub fn new(cfg: &ClientConfig) -> anyhow::Result<Self> {
        let mut default_headers = HeaderMap::new();
        if let (Some(name), Some(value)) = (&cfg.auth_header_name, &cfg.auth_header_value) {
            default_headers.insert(
                HeaderName::from_bytes(name.as_bytes())?,
                HeaderValue::from_str(value)?,
            );
        }

        // ========== POOL DE CONEXÕES ==========
        let http = Client::builder()
            .pool_max_idle_per_host(8) // poucos endpoints, um host só
            .pool_idle_timeout(Duration::from_secs(30)) // Keep-alive por 30s
            .tcp_nodelay(true) // Desabilita Nagle
            .use_rustls_tls()
            .danger_accept_invalid_certs(cfg.accept_invalid_certs) // gateway local usa certificado próprio
            .connect_timeout(cfg.timeout.min(Duration::from_secs(5)))
            .timeout(cfg.timeout) // Timeout por tentativa
            .default_headers(default_headers)
            .build()?;

        Ok(Self {
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            http: Arc::new(http),
        })
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{path}", self.base_url)
        } else {
            format!("{}/{path}", self.base_url)
        }
    }
}

impl Transport for ReqwestTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        let url = self.url(&request.path);

        let mut builder = self
            .http
            .request(request.method, &url)
            .headers(request.headers);
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }
        let req = builder
            .build()
            .map_err(|e| TransportError::Setup(e.to_string()))?;

        // ========== EXECUÇÃO ==========
        // Erro de builder é de montagem; o resto é falta de resposta
        let resp = self.http.execute(req).await.map_err(|e| {
            if e.is_builder() {
                TransportError::Setup(e.to_string())
            } else {
                TransportError::NoResponse(e.to_string())
            }
        })?;

        let status = resp.status();
        let headers = resp.headers().clone();
        let body = resp
            .bytes()
            .await
            .map_err(|e| TransportError::NoResponse(e.to_string()))?;

        Ok(TransportResponse {
            status,
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_joins_base_and_path() {
        let cfg = ClientConfig {
            base_url: "https://localhost:5000/".into(),
            ..ClientConfig::default()
        };
        let t = ReqwestTransport::new(&cfg).unwrap();
        assert_eq!(
            t.url("/v1/api/tickle"),
            "https://localhost:5000/v1/api/tickle"
        );
        assert_eq!(t.url("v1/api/tickle"), "https://localhost:5000/v1/api/tickle");
    }

    #[test]
    fn rejects_invalid_auth_header() {
        let cfg = ClientConfig {
            auth_header_name: Some("bad header".into()),
            auth_header_value: Some("x".into()),
            ..ClientConfig::default()
        };
        assert!(ReqwestTransport::new(&cfg).is_err());
    }

    #[tokio::test]
    async fn unreachable_host_is_no_response() {
        let cfg = ClientConfig {
            base_url: "http://127.0.0.1:1".into(),
            timeout: Duration::from_millis(500),
            ..ClientConfig::default()
        };
        let t = ReqwestTransport::new(&cfg).unwrap();
        let err = t
            .send(TransportRequest {
                method: Method::GET,
                path: "/x".into(),
                body: None,
                headers: HeaderMap::new(),
                timeout: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::NoResponse(_)));
    }
}
