/// Superfície HTTP de administração
/// Health, scrape do Prometheus, snapshots e resets de breakers/métricas
/// e o último check do gateway
use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::info;

use crate::breaker::BreakerSnapshot;
use crate::client::{ClientState, endpoint_key};
use crate::gateway::GatewayHealth;
use crate::stats::RequestMetrics;

/// Estado compartilhado pelos handlers
#[derive(Clone)]
pub struct AdminState {
    pub client: ClientState,
    pub gateway: watch::Receiver<Option<GatewayHealth>>,
    pub prom: PrometheusHandle,
}

#[derive(Deserialize)]
struct EndpointQuery {
    endpoint: Option<String>,
}

/// Endpoints efetivamente resetados
#[derive(Debug, Serialize, Deserialize)]
pub struct ResetOut {
    pub reset: Vec<String>,
}

pub fn router(state: AdminState) -> Router {
    Router::new()
        // ========== ROTAS ==========
        .route("/healthz", get(|| async { "ok" }))
        .route("/metrics", get(render_metrics))
        .route("/breakers", get(breakers))
        .route("/breakers/reset", post(reset_breakers))
        .route("/stats", get(stats))
        .route("/stats/reset", post(reset_stats))
        .route("/gateway", get(gateway))
        // ========== MIDDLEWARE ==========
        // Última layer roda primeiro: limite, id, trace, propagação
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(ConcurrencyLimitLayer::new(64))
        .with_state(state)
}

async fn render_metrics(State(st): State<AdminState>) -> String {
    st.prom.render()
}

async fn breakers(State(st): State<AdminState>) -> Json<Vec<BreakerSnapshot>> {
    Json(st.client.breakers.snapshot_all())
}

async fn stats(State(st): State<AdminState>) -> Json<Vec<RequestMetrics>> {
    Json(st.client.stats.snapshot_all())
}

async fn gateway(
    State(st): State<AdminState>,
) -> Result<Json<GatewayHealth>, (StatusCode, String)> {
    // clona para não segurar o borrow do watch
    let latest = st.gateway.borrow().clone();
    latest
        .map(Json)
        .ok_or((StatusCode::SERVICE_UNAVAILABLE, "no gateway check yet".into()))
}

async fn reset_breakers(
    State(st): State<AdminState>,
    Query(q): Query<EndpointQuery>,
) -> Result<Json<ResetOut>, (StatusCode, String)> {
    let breakers = &st.client.breakers;
    match q.endpoint {
        Some(ep) => {
            let key = endpoint_key(&ep).to_string();
            if breakers.reset(&key) {
                Ok(Json(ResetOut { reset: vec![key] }))
            } else {
                Err((StatusCode::NOT_FOUND, format!("unknown endpoint {key}")))
            }
        }
        // sem endpoint: reseta todos
        None => {
            let reset = breakers.snapshot_all().into_iter().map(|b| b.endpoint).collect();
            breakers.reset_all();
            info!("breakers reset via admin");
            Ok(Json(ResetOut { reset }))
        }
    }
}

async fn reset_stats(
    State(st): State<AdminState>,
    Query(q): Query<EndpointQuery>,
) -> Result<Json<ResetOut>, (StatusCode, String)> {
    let stats = &st.client.stats;
    match q.endpoint {
        Some(ep) => {
            let key = endpoint_key(&ep).to_string();
            if stats.reset(&key) {
                Ok(Json(ResetOut { reset: vec![key] }))
            } else {
                Err((StatusCode::NOT_FOUND, format!("unknown endpoint {key}")))
            }
        }
        None => {
            let reset = stats.snapshot_all().into_iter().map(|m| m.endpoint).collect();
            stats.reset_all();
            Ok(Json(ResetOut { reset }))
        }
    }
}
