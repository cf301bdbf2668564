// Cliente HTTP resiliente para o gateway local da corretora
// `ResilientClient` envolve um `Transport` injetado com circuit breakers por endpoint,
// retries com backoff exponencial e métricas; `gateway` e `admin` montam o watchdog em cima

pub mod admin;
pub mod breaker;
pub mod client;
pub mod config;
pub mod error;
pub mod gateway;
pub mod retry;
pub mod stats;
pub mod transport;

pub use breaker::{BreakerRegistry, BreakerSettings, BreakerSnapshot, CircuitState};
pub use client::{ClientState, RequestOptions, ResilientClient};
pub use config::{Cfg, ClientConfig};
pub use error::ClientError;
pub use stats::{RequestMetrics, StatsRegistry};
pub use transport::{ReqwestTransport, Transport, TransportError, TransportRequest, TransportResponse};
