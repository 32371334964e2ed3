//! # Módulo de Limites de Execução
//!
//! Tetos de proteção aplicados na carga da configuração: um YAML
//! malformado ou exagerado é recusado antes de processar o primeiro
//! evento.
//!
//! ## Limites configuráveis (via variáveis de ambiente):
//!
//! | Limite | Variável | Padrão | Descrição |
//! |---|---|---|---|
//! | max_steps | ADAPTER_MAX_STEPS | 100 | Steps por pipeline |
//! | max_retry_total | ADAPTER_MAX_RETRY_TOTAL | 50 | Soma de retryAttempts |
//! | max_call_timeout_secs | ADAPTER_MAX_CALL_TIMEOUT_SECS | 120 | Timeout por ApiCall |

use serde::{Deserialize, Serialize};

use crate::protocol::AdapterConfig;

/// Steps máximos por pipeline.
pub const DEFAULT_MAX_STEPS: usize = 100;

/// Soma máxima de tentativas de retry declaradas no pipeline.
pub const DEFAULT_MAX_RETRY_TOTAL: u32 = 50;

/// Timeout máximo declarável em um ApiCall, em segundos.
pub const DEFAULT_MAX_CALL_TIMEOUT_SECS: u64 = 120;

/// Tetos de execução.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLimits {
    pub max_steps: usize,
    pub max_retry_total: u32,
    pub max_call_timeout_secs: u64,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            max_steps: DEFAULT_MAX_STEPS,
            max_retry_total: DEFAULT_MAX_RETRY_TOTAL,
            max_call_timeout_secs: DEFAULT_MAX_CALL_TIMEOUT_SECS,
        }
    }
}

impl ExecutionLimits {
    /// Carrega os tetos das variáveis de ambiente, mantendo os padrões
    /// para o que não estiver definido.
    pub fn from_env() -> Self {
        let mut limits = Self::default();
        if let Some(value) = env_parse("ADAPTER_MAX_STEPS") {
            limits.max_steps = value;
        }
        if let Some(value) = env_parse("ADAPTER_MAX_RETRY_TOTAL") {
            limits.max_retry_total = value;
        }
        if let Some(value) = env_parse("ADAPTER_MAX_CALL_TIMEOUT_SECS") {
            limits.max_call_timeout_secs = value;
        }
        limits
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

/// Uma violação de limite.
#[derive(Debug, Clone, Serialize)]
pub struct LimitViolation {
    pub limit: String,
    pub message: String,
}

/// Resultado da checagem de limites.
#[derive(Debug, Serialize)]
pub struct LimitReport {
    pub passed: bool,
    pub violations: Vec<LimitViolation>,
}

/// Checa a configuração contra os tetos.
pub fn validate_limits(config: &AdapterConfig, limits: &ExecutionLimits) -> LimitReport {
    let mut violations = Vec::new();

    if config.steps.len() > limits.max_steps {
        violations.push(LimitViolation {
            limit: "max_steps".to_string(),
            message: format!(
                "pipeline declara {} steps, máximo é {}",
                config.steps.len(),
                limits.max_steps
            ),
        });
    }

    let retry_total: u32 = config
        .steps
        .iter()
        .filter_map(|s| s.api_call.as_ref())
        .filter_map(|c| c.retry_attempts)
        .sum();
    if retry_total > limits.max_retry_total {
        violations.push(LimitViolation {
            limit: "max_retry_total".to_string(),
            message: format!(
                "pipeline declara {} tentativas de retry, máximo é {}",
                retry_total, limits.max_retry_total
            ),
        });
    }

    for step in &config.steps {
        if let Some(timeout) = step.api_call.as_ref().and_then(|c| c.timeout) {
            if timeout > limits.max_call_timeout_secs {
                violations.push(LimitViolation {
                    limit: "max_call_timeout_secs".to_string(),
                    message: format!(
                        "step '{}' declara timeout de {}s, máximo é {}s",
                        step.name, timeout, limits.max_call_timeout_secs
                    ),
                });
            }
        }
    }

    LimitReport {
        passed: violations.is_empty(),
        violations,
    }
}
