/// Taxonomia de erros do cliente
/// Classifica respostas não-2xx e falhas de transporte em tipos fechados
use std::time::Duration;

use http::{StatusCode, header::RETRY_AFTER};
use thiserror::Error;

use crate::transport::{TransportError, TransportResponse};

/// Tudo que um chamador do `ResilientClient` pode receber em caso de falha
/// Quando um destes aparece, os retries já se esgotaram
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// Nenhuma resposta recebida (connect refused, DNS, timeout)
    #[error("network error on {endpoint} (attempt {attempt}): {message}")]
    Network {
        endpoint: String,
        attempt: u32,
        message: String,
    },

    /// HTTP 401
    #[error("authentication failed on {endpoint} (attempt {attempt})")]
    Authentication {
        endpoint: String,
        attempt: u32,
        body: String,
    },

    /// HTTP 429
    #[error("rate limited on {endpoint} (attempt {attempt})")]
    RateLimit {
        endpoint: String,
        attempt: u32,
        body: String,
        retry_after: Option<Duration>,
    },

    /// Qualquer outro erro HTTP, requisição que não pôde ser montada ou corpo
    /// de sucesso indecodificável; `status` é `None` em erro de montagem
    #[error("api error on {endpoint} (attempt {attempt}, status {status:?}): {message}")]
    Api {
        endpoint: String,
        attempt: u32,
        status: Option<StatusCode>,
        body: Option<String>,
        message: String,
    },

    /// Circuito do endpoint aberto; o transporte não foi chamado
    #[error("circuit breaker open for {endpoint}")]
    CircuitOpen { endpoint: String },

    /// O prazo total da chamada expirou
    #[error("deadline exceeded on {endpoint} after {attempt} attempt(s)")]
    DeadlineExceeded { endpoint: String, attempt: u32 },
}

impl ClientError {
    pub fn endpoint(&self) -> &str {
        match self {
            ClientError::Network { endpoint, .. }
            | ClientError::Authentication { endpoint, .. }
            | ClientError::RateLimit { endpoint, .. }
            | ClientError::Api { endpoint, .. }
            | ClientError::CircuitOpen { endpoint }
            | ClientError::DeadlineExceeded { endpoint, .. } => endpoint,
        }
    }

    /// Status HTTP, quando houve resposta
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ClientError::Authentication { .. } => Some(StatusCode::UNAUTHORIZED),
            ClientError::RateLimit { .. } => Some(StatusCode::TOO_MANY_REQUESTS),
            ClientError::Api { status, .. } => *status,
            _ => None,
        }
    }

    /// Número da tentativa que gerou o erro (zero para rejeição do breaker)
    pub fn attempt(&self) -> u32 {
        match self {
            ClientError::Network { attempt, .. }
            | ClientError::Authentication { attempt, .. }
            | ClientError::RateLimit { attempt, .. }
            | ClientError::Api { attempt, .. }
            | ClientError::DeadlineExceeded { attempt, .. } => *attempt,
            ClientError::CircuitOpen { .. } => 0,
        }
    }

    /// Rótulo curto usado em métricas e logs
    pub fn kind(&self) -> &'static str {
        match self {
            ClientError::Network { .. } => "network",
            ClientError::Authentication { .. } => "authentication",
            ClientError::RateLimit { .. } => "rate_limit",
            ClientError::Api { .. } => "api",
            ClientError::CircuitOpen { .. } => "circuit_open",
            ClientError::DeadlineExceeded { .. } => "deadline",
        }
    }
}

/// Mapeia uma resposta não-2xx para o tipo de erro
pub(crate) fn classify_response(
    endpoint: &str,
    attempt: u32,
    resp: &TransportResponse,
) -> ClientError {
    let body = String::from_utf8_lossy(&resp.body).into_owned();
    match resp.status {
        StatusCode::UNAUTHORIZED => ClientError::Authentication {
            endpoint: endpoint.to_string(),
            attempt,
            body,
        },
        StatusCode::TOO_MANY_REQUESTS => ClientError::RateLimit {
            endpoint: endpoint.to_string(),
            attempt,
            body,
            retry_after: resp
                .headers
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse::<u64>().ok())
                .map(Duration::from_secs),
        },
        status => ClientError::Api {
            endpoint: endpoint.to_string(),
            attempt,
            status: Some(status),
            message: format!("server responded with {status}"),
            body: Some(body),
        },
    }
}

/// Mapeia uma falha de transporte (sem resposta) para o tipo de erro
pub(crate) fn classify_transport(endpoint: &str, attempt: u32, err: TransportError) -> ClientError {
    match err {
        TransportError::NoResponse(message) => ClientError::Network {
            endpoint: endpoint.to_string(),
            attempt,
            message,
        },
        TransportError::Setup(message) => ClientError::Api {
            endpoint: endpoint.to_string(),
            attempt,
            status: None,
            body: None,
            message: format!("request setup error: {message}"),
        },
    }
}
