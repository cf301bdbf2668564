use std::net::SocketAddr;

use anyhow::Context;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tokio::{net::TcpListener, sync::watch};
use tracing::info;

use gateway_client::{
    Cfg, ResilientClient,
    admin::{self, AdminState},
    gateway::GatewayMonitor,
};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("gateway_client=info".parse()?)
                .add_directive("axum=warn".parse()?)
                .add_directive("tower_http=warn".parse()?)
                .add_directive("reqwest=warn".parse()?),
        )
        .with_target(false)
        .compact()
        .init();

    // métricas (metrics 0.24 + prometheus 0.17)
    let prom: PrometheusHandle = PrometheusBuilder::new()
        .install_recorder()
        .context("install prometheus recorder")?;

    let cfg = Cfg::from_env()?;
    info!("cfg: {:?}", cfg.redacted());

    let client = ResilientClient::from_config(cfg.client.clone())?;

    // watchdog do gateway
    let (tx, rx) = watch::channel(None);
    let monitor = GatewayMonitor::new(client.clone(), cfg.status_path.clone(), cfg.tickle_path.clone());
    let poller = tokio::spawn(monitor.run_poller(cfg.poll_interval, tx));

    let app = admin::router(AdminState {
        client: client.state().clone(),
        gateway: rx,
        prom,
    });

    let addr: SocketAddr = format!("0.0.0.0:{}", cfg.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!("listening on {}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    poller.abort();
    info!("shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("ctrl-c handler failed: {e}");
        std::future::pending::<()>().await;
    }
}
