/// Configuração do cliente e do serviço
/// Toda configuração vem de variáveis de ambiente
/// Os padrões apontam para um gateway local em https://localhost:5000
use std::time::Duration;

use anyhow::Context;

/// Configurações de um `ResilientClient`
/// Cobre ajustes de transporte, retry e circuit breaker
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// URL base à qual cada path é concatenado
    pub base_url: String,

    /// Timeout do transporte por tentativa
    pub timeout: Duration,

    /// Teto de tentativas por chamada (incluindo a primeira)
    pub max_retry_attempts: u32,

    /// Espera base do backoff
    pub base_retry_delay: Duration,

    /// Teto do backoff
    pub max_retry_delay: Duration,

    /// Falhas consecutivas que abrem o circuito de um endpoint
    pub circuit_breaker_threshold: u32,

    /// Quanto tempo um circuito aberto rejeita chamadas antes de liberar uma tentativa
    pub circuit_breaker_cooldown: Duration,

    /// Sucessos necessários para fechar um circuito meio-aberto
    pub circuit_breaker_half_open_success_threshold: u32,

    /// Prazo opcional cobrindo todas as tentativas de uma chamada
    pub overall_timeout: Option<Duration>,

    /// Aceita certificados autoassinados (o gateway local vem com um)
    pub accept_invalid_certs: bool,

    /// Nome do header padrão enviado em toda requisição (opcional)
    pub auth_header_name: Option<String>,

    /// Valor do header padrão enviado em toda requisição (opcional)
    pub auth_header_value: Option<String>,

    /// Emite eventos debug para cada requisição e resposta
    pub log_requests: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "https://localhost:5000".into(),
            timeout: Duration::from_millis(10_000),
            max_retry_attempts: 3,
            base_retry_delay: Duration::from_millis(1_000),
            max_retry_delay: Duration::from_millis(10_000),
            circuit_breaker_threshold: 5,
            circuit_breaker_cooldown: Duration::from_millis(30_000),
            circuit_breaker_half_open_success_threshold: 2,
            overall_timeout: None,
            accept_invalid_certs: true,
            auth_header_name: None,
            auth_header_value: None,
            log_requests: false,
        }
    }
}

impl ClientConfig {
    /// Carrega as configurações do cliente das variáveis de ambiente
    /// Valores ausentes ou inválidos caem no `Default`
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            // ========== TRANSPORTE ==========
            base_url: std::env::var("GATEWAY_URL").unwrap_or(d.base_url),
            timeout: env_millis("CLIENT_TIMEOUT_MS").unwrap_or(d.timeout),
            accept_invalid_certs: env_parse("GATEWAY_ACCEPT_INVALID_CERTS")
                .unwrap_or(d.accept_invalid_certs),
            auth_header_name: std::env::var("AUTH_HEADER_NAME").ok(),
            auth_header_value: std::env::var("AUTH_HEADER_VALUE").ok(),
            log_requests: env_parse("CLIENT_LOG_REQUESTS").unwrap_or(d.log_requests),

            // ========== RETRY ==========
            max_retry_attempts: env_parse("CLIENT_MAX_RETRY_ATTEMPTS")
                .unwrap_or(d.max_retry_attempts),
            base_retry_delay: env_millis("CLIENT_BASE_RETRY_DELAY_MS")
                .unwrap_or(d.base_retry_delay),
            max_retry_delay: env_millis("CLIENT_MAX_RETRY_DELAY_MS").unwrap_or(d.max_retry_delay),
            overall_timeout: env_millis("CLIENT_OVERALL_TIMEOUT_MS"),

            // ========== CIRCUIT BREAKER ==========
            circuit_breaker_threshold: env_parse("CB_THRESHOLD")
                .unwrap_or(d.circuit_breaker_threshold),
            circuit_breaker_cooldown: env_millis("CB_COOLDOWN_MS")
                .unwrap_or(d.circuit_breaker_cooldown),
            circuit_breaker_half_open_success_threshold: env_parse("CB_HALF_OPEN_SUCCESSES")
                .unwrap_or(d.circuit_breaker_half_open_success_threshold),
        }
        .normalized()
    }

    /// Garante contadores com valor mínimo um
    pub fn normalized(mut self) -> Self {
        self.max_retry_attempts = self.max_retry_attempts.max(1);
        self.circuit_breaker_threshold = self.circuit_breaker_threshold.max(1);
        self.circuit_breaker_half_open_success_threshold =
            self.circuit_breaker_half_open_success_threshold.max(1);
        if self.max_retry_delay < self.base_retry_delay {
            self.max_retry_delay = self.base_retry_delay;
        }
        self
    }

    /// Cópia com o valor do header de auth mascarado, segura para log
    pub fn redacted(&self) -> Self {
        let mut c = self.clone();
        c.auth_header_value = c.auth_header_value.as_ref().map(|_| "***".into());
        c
    }
}

/// Configurações do binário gateway-client
#[derive(Clone, Debug)]
pub struct Cfg {
    /// Porta do servidor HTTP de administração
    pub port: u16,

    /// Intervalo entre health checks do gateway
    pub poll_interval: Duration,

    /// Path do gateway com o status da sessão na corretora
    pub status_path: String,

    /// Path de keep-alive do gateway
    pub tickle_path: String,

    /// Configurações do cliente de saída
    pub client: ClientConfig,
}

impl Cfg {
    /// Carrega as configurações do serviço das variáveis de ambiente
    pub fn from_env() -> anyhow::Result<Self> {
        let port = match std::env::var("PORT") {
            Ok(raw) => raw.parse::<u16>().with_context(|| format!("PORT is not a port: {raw}"))?,
            Err(_) => 9999,
        };
        let poll_secs: u64 = env_parse("GATEWAY_POLL_INTERVAL_SECS").unwrap_or(60);

        Ok(Self {
            port,
            poll_interval: Duration::from_secs(poll_secs.max(1)),
            status_path: std::env::var("GATEWAY_STATUS_PATH")
                .unwrap_or_else(|_| "/v1/api/iserver/auth/status".into()),
            tickle_path: std::env::var("GATEWAY_TICKLE_PATH")
                .unwrap_or_else(|_| "/v1/api/tickle".into()),
            client: ClientConfig::from_env(),
        })
    }

    /// Cópia com segredos mascarados
    pub fn redacted(&self) -> Self {
        let mut c = self.clone();
        c.client = c.client.redacted();
        c
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

fn env_millis(key: &str) -> Option<Duration> {
    env_parse::<u64>(key).map(Duration::from_millis)
}
