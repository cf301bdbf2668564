/// Monitor de sessão do gateway
/// Consulta o status de autenticação do gateway da corretora e mantém a sessão viva
/// pelo cliente resiliente, publicando o último resultado num canal watch
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::client::{RequestOptions, ResilientClient};
use crate::error::ClientError;
use crate::transport::{ReqwestTransport, Transport};

/// Corpo do endpoint de status de autenticação
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthStatus {
    #[serde(default)]
    pub authenticated: bool,
    #[serde(default)]
    pub connected: bool,
    #[serde(default)]
    pub competing: bool,
    #[serde(default)]
    pub message: Option<String>,
}

/// Resultado de um health check
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayHealth {
    /// O gateway respondeu com alguma resposta HTTP
    pub reachable: bool,
    pub authenticated: bool,
    pub connected: bool,
    pub checked_at: DateTime<Utc>,
    pub error: Option<String>,
}

pub struct GatewayMonitor<T = ReqwestTransport> {
    client: ResilientClient<T>,
    status_path: String,
    tickle_path: String,
}

impl<T: Transport> GatewayMonitor<T> {
    pub fn new(
        client: ResilientClient<T>,
        status_path: impl Into<String>,
        tickle_path: impl Into<String>,
    ) -> Self {
        Self {
            client,
            status_path: status_path.into(),
            tickle_path: tickle_path.into(),
        }
    }

    pub async fn auth_status(&self) -> Result<AuthStatus, ClientError> {
        self.client
            .get(&self.status_path, RequestOptions::default())
            .await
    }

    /// Keep-alive; o gateway derruba sessões ociosas após alguns minutos
    pub async fn tickle(&self) -> Result<Value, ClientError> {
        self.client
            .post(&self.tickle_path, None, RequestOptions::default())
            .await
    }

    /// Status e keep-alive, disparados em paralelo
    pub async fn check(&self) -> GatewayHealth {
        let (status, tickle) = futures::future::join(self.auth_status(), self.tickle()).await;
        let checked_at = Utc::now();

        match status {
            Ok(s) => GatewayHealth {
                reachable: true,
                authenticated: s.authenticated,
                connected: s.connected,
                checked_at,
                error: tickle.err().map(|e| e.to_string()),
            },
            Err(e) => GatewayHealth {
                // um 401 ainda prova que o processo do gateway está de pé
                reachable: e.status().is_some(),
                authenticated: false,
                connected: false,
                checked_at,
                error: Some(e.to_string()),
            },
        }
    }

    /// Checa a cada `interval` até todos os receivers de `tx` sumirem
    pub async fn run_poller(self, interval: Duration, tx: watch::Sender<Option<GatewayHealth>>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let health = self.check().await;

            metrics::gauge!("gateway_reachable").set(if health.reachable { 1.0 } else { 0.0 });
            metrics::gauge!("gateway_authenticated").set(if health.authenticated { 1.0 } else { 0.0 });
            if health.authenticated {
                info!(connected = health.connected, "gateway authenticated");
            } else {
                warn!(reachable = health.reachable, error = ?health.error, "gateway not authenticated");
            }

            if tx.send(Some(health)).is_err() {
                info!("no health subscribers left, stopping poller");
                break;
            }
        }
    }
}
