/// Circuit breakers por endpoint
/// CLOSED -> OPEN após `threshold` falhas, OPEN -> HALF_OPEN de forma preguiçosa
/// quando o cooldown expira, HALF_OPEN -> CLOSED após sucessos suficientes,
/// HALF_OPEN -> OPEN em qualquer falha
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{info, warn};

/// Posição do breaker
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    #[default]
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    /// Codificação do gauge: 0 fechado, 1 aberto, 2 meio-aberto
    pub fn as_gauge(self) -> f64 {
        match self {
            CircuitState::Closed => 0.0,
            CircuitState::Open => 1.0,
            CircuitState::HalfOpen => 2.0,
        }
    }
}

/// Limiares compartilhados por todos os endpoints de um registro
#[derive(Clone, Copy, Debug)]
pub struct BreakerSettings {
    /// Falhas que abrem um circuito fechado
    pub threshold: u32,
    /// Tempo que um circuito aberto espera antes de liberar uma tentativa
    pub cooldown: Duration,
    /// Sucessos que fecham um circuito meio-aberto
    pub half_open_success_threshold: u32,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            threshold: 5,
            cooldown: Duration::from_millis(30_000),
            half_open_success_threshold: 2,
        }
    }
}

/// Estado de um endpoint
#[derive(Clone, Debug, Default)]
struct Breaker {
    failures: u32,
    last_failure: Option<Instant>,
    last_failure_at: Option<DateTime<Utc>>,
    state: CircuitState,
    success_count: u32,
    /// Início da tentativa em voo no HALF_OPEN (None = vaga livre)
    trial_started: Option<Instant>,
}

/// Cópia somente leitura do breaker de um endpoint
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerSnapshot {
    pub endpoint: String,
    pub state: CircuitState,
    pub failures: u32,
    pub success_count: u32,
    pub last_failure_time: Option<DateTime<Utc>>,
}

/// Todos os breakers de um cliente, indexados por endpoint
/// Cada passo de check/registro roda sob o lock do shard da entrada
#[derive(Debug, Default)]
pub struct BreakerRegistry {
    settings: BreakerSettings,
    breakers: DashMap<String, Breaker>,
}

impl BreakerRegistry {
    pub fn new(settings: BreakerSettings) -> Self {
        Self {
            settings,
            breakers: DashMap::new(),
        }
    }

    pub fn settings(&self) -> BreakerSettings {
        self.settings
    }

    /// True quando a chamada deve ser rejeitada sem tocar o transporte
    /// Circuito aberto com cooldown vencido vai para HALF_OPEN e libera esta chamada;
    /// no HALF_OPEN só uma tentativa fica em voo por vez, as concorrentes são rejeitadas
    /// Uma tentativa abandonada (future descartado) libera a vaga após outro cooldown
    pub fn is_open(&self, endpoint: &str) -> bool {
        self.is_open_at(endpoint, Instant::now())
    }

    fn is_open_at(&self, endpoint: &str, now: Instant) -> bool {
        let Some(mut b) = self.breakers.get_mut(endpoint) else {
            return false;
        };
        let cooldown = self.settings.cooldown;
        let state = b.state;
        match state {
            CircuitState::Closed => false,
            CircuitState::HalfOpen => {
                let busy = b
                    .trial_started
                    .is_some_and(|t| now.saturating_duration_since(t) <= cooldown);
                if !busy {
                    b.trial_started = Some(now);
                }
                busy
            }
            CircuitState::Open => {
                let cooled = b
                    .last_failure
                    .is_none_or(|t| now.saturating_duration_since(t) > cooldown);
                if !cooled {
                    return true;
                }
                b.state = CircuitState::HalfOpen;
                b.success_count = 0;
                b.trial_started = Some(now);
                info!(endpoint, "circuit half-open, admitting trial request");
                metrics::gauge!("client_circuit_state", "endpoint" => endpoint.to_string())
                    .set(CircuitState::HalfOpen.as_gauge());
                false
            }
        }
    }

    pub fn record_success(&self, endpoint: &str) {
        let Some(mut b) = self.breakers.get_mut(endpoint) else {
            return;
        };
        let state = b.state;
        match state {
            CircuitState::HalfOpen => {
                b.trial_started = None;
                b.success_count += 1;
                if b.success_count >= self.settings.half_open_success_threshold {
                    b.state = CircuitState::Closed;
                    b.failures = 0;
                    b.success_count = 0;
                    info!(endpoint, "circuit closed");
                    metrics::gauge!("client_circuit_state", "endpoint" => endpoint.to_string())
                        .set(CircuitState::Closed.as_gauge());
                }
            }
            CircuitState::Closed => b.failures = 0,
            // só acontece quando o chamador pulou o breaker
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self, endpoint: &str) {
        self.record_failure_at(endpoint, Instant::now());
    }

    fn record_failure_at(&self, endpoint: &str, now: Instant) {
        let mut b = self.breakers.entry(endpoint.to_string()).or_default();
        b.failures = b.failures.saturating_add(1);
        b.last_failure = Some(now);
        b.last_failure_at = Some(Utc::now());

        let state = b.state;
        let opened = match state {
            // uma falha na tentativa reabre e zera o progresso
            CircuitState::HalfOpen => {
                b.success_count = 0;
                b.trial_started = None;
                true
            }
            CircuitState::Closed => b.failures >= self.settings.threshold,
            CircuitState::Open => false,
        };
        if opened {
            b.state = CircuitState::Open;
            warn!(endpoint, failures = b.failures, "circuit opened");
            metrics::gauge!("client_circuit_state", "endpoint" => endpoint.to_string())
                .set(CircuitState::Open.as_gauge());
        }
    }

    pub fn snapshot(&self, endpoint: &str) -> Option<BreakerSnapshot> {
        self.breakers
            .get(endpoint)
            .map(|b| snapshot_of(endpoint, &b))
    }

    /// Todos os breakers conhecidos, ordenados por endpoint
    pub fn snapshot_all(&self) -> Vec<BreakerSnapshot> {
        let mut all: Vec<_> = self
            .breakers
            .iter()
            .map(|e| snapshot_of(e.key(), e.value()))
            .collect();
        all.sort_by(|a, b| a.endpoint.cmp(&b.endpoint));
        all
    }

    /// Esquece um endpoint; retorna se ele era conhecido
    pub fn reset(&self, endpoint: &str) -> bool {
        let known = self.breakers.remove(endpoint).is_some();
        if known {
            info!(endpoint, "circuit reset");
            metrics::gauge!("client_circuit_state", "endpoint" => endpoint.to_string())
                .set(CircuitState::Closed.as_gauge());
        }
        known
    }

    pub fn reset_all(&self) {
        for e in self.breakers.iter() {
            metrics::gauge!("client_circuit_state", "endpoint" => e.key().clone())
                .set(CircuitState::Closed.as_gauge());
        }
        self.breakers.clear();
        info!("all circuits reset");
    }
}

fn snapshot_of(endpoint: &str, b: &Breaker) -> BreakerSnapshot {
    BreakerSnapshot {
        endpoint: endpoint.to_string(),
        state: b.state,
        failures: b.failures,
        success_count: b.success_count,
        last_failure_time: b.last_failure_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> BreakerRegistry {
        BreakerRegistry::new(BreakerSettings {
            threshold: 3,
            cooldown: Duration::from_secs(30),
            half_open_success_threshold: 2,
        })
    }

    fn state(r: &BreakerRegistry, ep: &str) -> CircuitState {
        r.snapshot(ep).map(|s| s.state).unwrap_or_default()
    }

    #[test]
    fn unknown_endpoint_is_closed() {
        let r = registry();
        assert!(!r.is_open("/x"));
        assert!(r.snapshot("/x").is_none());
        // sucesso em endpoint desconhecido não cria registro
        r.record_success("/x");
        assert!(r.snapshot_all().is_empty());
    }

    #[test]
    fn opens_after_threshold() {
        let r = registry();
        let t0 = Instant::now();
        r.record_failure_at("/x", t0);
        r.record_failure_at("/x", t0);
        assert!(!r.is_open_at("/x", t0));
        r.record_failure_at("/x", t0);
        assert_eq!(state(&r, "/x"), CircuitState::Open);
        assert!(r.is_open_at("/x", t0 + Duration::from_secs(30)));
        // outros endpoints não são afetados
        assert!(!r.is_open_at("/y", t0));
    }

    #[test]
    fn success_in_closed_forgives_failures() {
        let r = registry();
        r.record_failure("/x");
        r.record_failure("/x");
        r.record_success("/x");
        assert_eq!(r.snapshot("/x").unwrap().failures, 0);
        r.record_failure("/x");
        r.record_failure("/x");
        assert_eq!(state(&r, "/x"), CircuitState::Closed);
    }

    #[test]
    fn cooldown_admits_trial_then_closes() {
        let r = registry();
        let t0 = Instant::now();
        for _ in 0..3 {
            r.record_failure_at("/x", t0);
        }
        let later = t0 + Duration::from_secs(31);
        assert!(!r.is_open_at("/x", later));
        assert_eq!(state(&r, "/x"), CircuitState::HalfOpen);

        r.record_success("/x");
        let snap = r.snapshot("/x").unwrap();
        assert_eq!(snap.state, CircuitState::HalfOpen);
        assert_eq!(snap.success_count, 1);

        r.record_success("/x");
        let snap = r.snapshot("/x").unwrap();
        assert_eq!(snap.state, CircuitState::Closed);
        assert_eq!(snap.failures, 0);
        assert_eq!(snap.success_count, 0);
    }

    #[test]
    fn failure_in_half_open_reopens_and_restarts_cooldown() {
        let r = registry();
        let t0 = Instant::now();
        for _ in 0..3 {
            r.record_failure_at("/x", t0);
        }
        let t1 = t0 + Duration::from_secs(31);
        assert!(!r.is_open_at("/x", t1));
        r.record_success("/x");
        r.record_failure_at("/x", t1);

        let snap = r.snapshot("/x").unwrap();
        assert_eq!(snap.state, CircuitState::Open);
        assert_eq!(snap.success_count, 0);
        // cooldown conta a partir da falha da tentativa, não da primeira
        assert!(r.is_open_at("/x", t1 + Duration::from_secs(30)));
        assert!(!r.is_open_at("/x", t1 + Duration::from_secs(31)));
    }

    #[test]
    fn reset_one_and_all() {
        let r = registry();
        for _ in 0..3 {
            r.record_failure("/x");
            r.record_failure("/y");
        }
        assert!(r.reset("/x"));
        assert!(!r.reset("/x"));
        assert!(!r.is_open("/x"));
        assert!(r.is_open("/y"));
        assert_eq!(r.snapshot_all().len(), 1);

        r.reset_all();
        assert!(r.snapshot_all().is_empty());
        assert!(!r.is_open("/y"));
    }

    #[test]
    fn half_open_admits_one_trial_at_a_time() {
        let r = registry();
        let t0 = Instant::now();
        for _ in 0..3 {
            r.record_failure_at("/x", t0);
        }
        let t1 = t0 + Duration::from_secs(31);
        assert!(!r.is_open_at("/x", t1));
        // concorrentes são rejeitadas enquanto a tentativa está em voo
        assert!(r.is_open_at("/x", t1));
        assert!(r.is_open_at("/x", t1 + Duration::from_secs(1)));

        r.record_success("/x");
        assert_eq!(state(&r, "/x"), CircuitState::HalfOpen);
        assert!(!r.is_open_at("/x", t1 + Duration::from_secs(2)));
        assert!(r.is_open_at("/x", t1 + Duration::from_secs(2)));
        r.record_success("/x");
        assert_eq!(state(&r, "/x"), CircuitState::Closed);
        assert!(!r.is_open_at("/x", t1 + Duration::from_secs(3)));
    }

    #[test]
    fn abandoned_trial_frees_the_slot_after_cooldown() {
        let r = registry();
        let t0 = Instant::now();
        for _ in 0..3 {
            r.record_failure_at("/x", t0);
        }
        let t1 = t0 + Duration::from_secs(31);
        assert!(!r.is_open_at("/x", t1));
        // nenhum registro chega: o chamador desistiu
        assert!(r.is_open_at("/x", t1 + Duration::from_secs(30)));
        assert!(!r.is_open_at("/x", t1 + Duration::from_secs(31)));
        assert_eq!(state(&r, "/x"), CircuitState::HalfOpen);
    }
}
