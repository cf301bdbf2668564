/// Política de retry
/// Backoff exponencial com jitter aditivo e o predicado padrão de "vale tentar de novo"
use std::{fmt, sync::Arc, time::Duration};

use rand::Rng;

use crate::error::ClientError;

/// Limite superior (exclusivo) do jitter aleatório somado a cada espera
pub const MAX_JITTER_MS: u64 = 500;

/// `min(base * 2^(attempt-1) + jitter, max)` com jitter em `[0, 500)` ms
pub fn retry_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let jitter = rand::rng().random_range(0..MAX_JITTER_MS);
    delay_with_jitter(attempt, base, max, jitter)
}

fn delay_with_jitter(attempt: u32, base: Duration, max: Duration, jitter_ms: u64) -> Duration {
    let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
    let base_ms = u64::try_from(base.as_millis()).unwrap_or(u64::MAX);
    let max_ms = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
    let delay_ms = base_ms.saturating_mul(factor).saturating_add(jitter_ms);
    Duration::from_millis(delay_ms.min(max_ms))
}

/// Falhas de rede, 429 e 5xx são repetidas; o resto é final
pub fn default_should_retry(err: &ClientError) -> bool {
    match err {
        ClientError::Network { .. } | ClientError::RateLimit { .. } => true,
        ClientError::Authentication { .. } => false,
        ClientError::Api { status, .. } => status.is_some_and(|s| s.is_server_error()),
        ClientError::CircuitOpen { .. } | ClientError::DeadlineExceeded { .. } => false,
    }
}

type Predicate = Arc<dyn Fn(&ClientError) -> bool + Send + Sync>;

/// Decide se uma tentativa que falhou é repetida
#[derive(Clone, Default)]
pub struct RetryPolicy {
    predicate: Option<Predicate>,
}

impl RetryPolicy {
    pub fn new<F>(predicate: F) -> Self
    where
        F: Fn(&ClientError) -> bool + Send + Sync + 'static,
    {
        Self {
            predicate: Some(Arc::new(predicate)),
        }
    }

    pub fn should_retry(&self, err: &ClientError) -> bool {
        // rejeição do breaker e prazo estourado encerram a chamada, diga o predicado o que disser
        if matches!(
            err,
            ClientError::CircuitOpen { .. } | ClientError::DeadlineExceeded { .. }
        ) {
            return false;
        }
        match &self.predicate {
            Some(p) => p(err),
            None => default_should_retry(err),
        }
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("custom", &self.predicate.is_some())
            .finish()
    }
}
