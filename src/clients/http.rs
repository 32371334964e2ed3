//! # Cliente HTTP
//!
//! Define o contrato `HttpClient` que o executor de ApiCall consome e
//! as duas implementações que o binário conhece:
//!
//! - `ReqwestHttpClient`: produção. Resolve URLs relativas contra a
//!   base da API, aplica timeout por tentativa e faz retry com backoff
//!   exponencial e jitter.
//! - `RecordingHttpClient`: dry-run e testes. Registra cada requisição
//!   que seria enviada e responde com respostas enfileiradas.
//!
//! ## Resolução de URL
//!
//! ```text
//! base: https://api.example.com/api/hyperfleet      product: hyperfleet
//!
//! "/clusters/c1"                  → https://api.example.com/api/hyperfleet/v1/clusters/c1
//! "/api/hyperfleet/clusters/c1"   → idem (prefixo sobreposto removido)
//! "/api/hyperfleet/v2/clusters"   → versão explícita respeitada
//! "https://other.host/x"          → usada como está
//! ```
//!
//! ## Retry
//!
//! Só erros de transporte e status 5xx são repetidos; 4xx é resposta
//! definitiva do servidor. O backoff dobra a cada tentativa e recebe
//! jitter para não sincronizar clientes concorrentes.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use rand::Rng;
use regex::Regex;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::protocol::ApiConfig;

static VERSION_SEGMENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^v\d+$").expect("valid version segment regex"));

/// Timeout de tentativa quando o step não declara um.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Backoff base quando o step pede retry sem declarar um.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(500);

// ============================================================================
// CONTRATO
// ============================================================================

/// Uma requisição pronta para envio (templates já renderizados).
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,

    /// Timeout de uma única tentativa.
    pub timeout: Duration,

    /// Total de tentativas, incluindo a primeira. Mínimo efetivo: 1.
    pub retry_attempts: u32,

    /// Backoff base entre tentativas.
    pub retry_backoff: Duration,
}

/// Resposta de uma chamada que chegou ao servidor.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
    pub headers: HashMap<String, String>,

    /// Quantas tentativas foram feitas até esta resposta.
    pub attempts: u32,

    /// Duração total (todas as tentativas) em milissegundos.
    pub duration_ms: u64,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Falhas em que nenhuma resposta chegou.
#[derive(Debug, Error)]
pub enum HttpError {
    /// Erro de rede/DNS/TLS/timeout após todas as tentativas.
    #[error("transport error after {attempts} attempt(s): {message}")]
    Transport {
        message: String,
        attempts: u32,
        duration_ms: u64,
    },

    /// Requisição inválida antes do envio (método ou URL).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Cancelamento observado durante a chamada.
    #[error("request canceled")]
    Canceled,
}

/// Contrato consumido pelo executor de ApiCall.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn execute(
        &self,
        request: HttpRequest,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse, HttpError>;
}

// ============================================================================
// IMPLEMENTAÇÃO REQWEST
// ============================================================================

/// Cliente de produção sobre `reqwest`.
///
/// O `reqwest::Client` interno é reutilizado entre chamadas para
/// manter o connection pool.
pub struct ReqwestHttpClient {
    client: reqwest::Client,
    base_url: String,
    product: Option<String>,
}

impl ReqwestHttpClient {
    pub fn new(api: &ApiConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: api.base_url.trim_end_matches('/').to_string(),
            product: api.product.clone(),
        }
    }

    /// Resolve a URL de um step contra a base configurada.
    ///
    /// URLs absolutas passam direto. Paths relativos são colados na
    /// base; um prefixo de path sobreposto é removido; quando o path
    /// final começa com `/api/<product>/` sem segmento de versão, `v1`
    /// é inserido.
    pub fn resolve_url(&self, url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") {
            return url.to_string();
        }

        let (origin, base_path) = split_origin(&self.base_url);

        let mut path = if url.starts_with('/') {
            url.to_string()
        } else {
            format!("/{}", url)
        };

        // Prefixo sobreposto: "/api/hyperfleet" + "/api/hyperfleet/x" → "/x".
        if !base_path.is_empty() {
            if let Some(rest) = path.strip_prefix(base_path) {
                if rest.is_empty() || rest.starts_with('/') {
                    path = rest.to_string();
                }
            }
        }

        let mut full_path = format!("{}{}", base_path, path);

        // Inserção de versão: "/api/<product>/x" → "/api/<product>/v1/x".
        if let Some(product) = &self.product {
            let api_prefix = format!("/api/{}/", product);
            let versioned = full_path.strip_prefix(&api_prefix).and_then(|rest| {
                let first_segment = rest.split('/').next().unwrap_or_default();
                if VERSION_SEGMENT_RE.is_match(first_segment) {
                    None
                } else {
                    Some(format!("{}v1/{}", api_prefix, rest))
                }
            });
            if let Some(versioned) = versioned {
                full_path = versioned;
            }
        }

        format!("{}{}", origin, full_path)
    }

    /// Uma tentativa: monta, envia e coleta a resposta.
    async fn send_once(
        &self,
        request: &HttpRequest,
        url: &str,
    ) -> Result<HttpResponse, SendError> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|e| SendError::Invalid(format!("invalid HTTP method: {}", e)))?;

        let mut builder = self
            .client
            .request(method, url)
            .timeout(request.timeout);

        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| SendError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| {
                v.to_str()
                    .ok()
                    .map(|value| (k.as_str().to_string(), value.to_string()))
            })
            .collect();
        let body = response
            .text()
            .await
            .map_err(|e| SendError::Transport(e.to_string()))?;

        Ok(HttpResponse {
            status,
            body,
            headers,
            attempts: 1,
            duration_ms: 0,
        })
    }
}

enum SendError {
    Transport(String),
    Invalid(String),
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn execute(
        &self,
        request: HttpRequest,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse, HttpError> {
        let url = self.resolve_url(&request.url);
        let max_attempts = request.retry_attempts.max(1);
        let start = Instant::now();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(HttpError::Canceled),
                outcome = self.send_once(&request, &url) => outcome,
            };

            let retriable = match &outcome {
                Ok(response) => response.status >= 500,
                Err(SendError::Transport(_)) => true,
                Err(SendError::Invalid(_)) => false,
            };

            if !retriable || attempt >= max_attempts {
                return match outcome {
                    Ok(mut response) => {
                        response.attempts = attempt;
                        response.duration_ms = start.elapsed().as_millis() as u64;
                        Ok(response)
                    }
                    Err(SendError::Invalid(message)) => Err(HttpError::InvalidRequest(message)),
                    Err(SendError::Transport(message)) => Err(HttpError::Transport {
                        message,
                        attempts: attempt,
                        duration_ms: start.elapsed().as_millis() as u64,
                    }),
                };
            }

            let backoff = backoff_with_jitter(request.retry_backoff, attempt);
            tracing::warn!(
                url = %url,
                attempt,
                max_attempts,
                backoff_ms = backoff.as_millis() as u64,
                "tentativa falhou, aguardando retry"
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(HttpError::Canceled),
                _ = tokio::time::sleep(backoff) => {}
            }
        }
    }
}

/// Backoff exponencial (dobra por tentativa) com até 50% de jitter.
fn backoff_with_jitter(base: Duration, attempt: u32) -> Duration {
    let base_ms = base.as_millis() as u64;
    let scaled = base_ms.saturating_mul(1u64 << (attempt - 1).min(16));
    let jitter = if scaled > 0 {
        rand::thread_rng().gen_range(0..=scaled / 2)
    } else {
        0
    };
    Duration::from_millis(scaled + jitter)
}

// ============================================================================
// IMPLEMENTAÇÃO RECORDING (DRY-RUN / TESTES)
// ============================================================================

/// Uma requisição que o engine teria enviado.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

/// Cliente que registra requisições e devolve respostas enfileiradas.
///
/// Respostas são consumidas em ordem; esgotada a fila, a resposta
/// padrão (200, "{}") é usada.
#[derive(Default)]
pub struct RecordingHttpClient {
    requests: Mutex<Vec<RecordedRequest>>,
    responses: Mutex<VecDeque<HttpResponse>>,
}

impl RecordingHttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enfileira uma resposta.
    pub fn push_response(&self, status: u16, body: &str) {
        self.responses
            .lock()
            .expect("responses lock poisoned")
            .push_back(HttpResponse {
                status,
                body: body.to_string(),
                headers: HashMap::new(),
                attempts: 1,
                duration_ms: 0,
            });
    }

    /// Requisições registradas até agora.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests
            .lock()
            .expect("requests lock poisoned")
            .clone()
    }
}

#[async_trait]
impl HttpClient for RecordingHttpClient {
    async fn execute(
        &self,
        request: HttpRequest,
        _cancel: &CancellationToken,
    ) -> Result<HttpResponse, HttpError> {
        self.requests
            .lock()
            .expect("requests lock poisoned")
            .push(RecordedRequest {
                method: request.method.clone(),
                url: request.url.clone(),
                headers: request.headers.clone(),
                body: request.body.clone(),
            });

        let queued = self
            .responses
            .lock()
            .expect("responses lock poisoned")
            .pop_front();

        Ok(queued.unwrap_or(HttpResponse {
            status: 200,
            body: "{}".to_string(),
            headers: HashMap::new(),
            attempts: 1,
            duration_ms: 0,
        }))
    }
}

/// Separa uma base URL em origem e path.
///
/// "https://host:8443/api/fleet" → ("https://host:8443", "/api/fleet")
fn split_origin(base_url: &str) -> (&str, &str) {
    let after_scheme = match base_url.find("://") {
        Some(index) => index + 3,
        None => return (base_url, ""),
    };
    match base_url[after_scheme..].find('/') {
        Some(slash) => {
            let split = after_scheme + slash;
            (&base_url[..split], &base_url[split..])
        }
        None => (base_url, ""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base: &str, product: Option<&str>) -> ReqwestHttpClient {
        ReqwestHttpClient::new(&ApiConfig {
            base_url: base.to_string(),
            product: product.map(String::from),
        })
    }

    // ------------------------------------------------------------------------
    // Resolução de URL
    // ------------------------------------------------------------------------

    #[test]
    fn test_absolute_url_passes_through() {
        let c = client("https://api.example.com", None);
        assert_eq!(
            c.resolve_url("https://other.host/x"),
            "https://other.host/x"
        );
    }

    #[test]
    fn test_relative_path_joins_base() {
        let c = client("https://api.example.com", None);
        assert_eq!(
            c.resolve_url("/clusters/c1"),
            "https://api.example.com/clusters/c1"
        );
        assert_eq!(
            c.resolve_url("clusters/c1"),
            "https://api.example.com/clusters/c1"
        );
    }

    #[test]
    fn test_overlapping_prefix_is_stripped() {
        let c = client("https://api.example.com/api/hyperfleet", None);
        assert_eq!(
            c.resolve_url("/api/hyperfleet/clusters/c1"),
            "https://api.example.com/api/hyperfleet/clusters/c1"
        );
    }

    #[test]
    fn test_version_inserted_for_product_paths() {
        let c = client("https://api.example.com", Some("hyperfleet"));
        assert_eq!(
            c.resolve_url("/api/hyperfleet/clusters/c1"),
            "https://api.example.com/api/hyperfleet/v1/clusters/c1"
        );
    }

    #[test]
    fn test_explicit_version_respected() {
        let c = client("https://api.example.com", Some("hyperfleet"));
        assert_eq!(
            c.resolve_url("/api/hyperfleet/v2/clusters"),
            "https://api.example.com/api/hyperfleet/v2/clusters"
        );
    }

    #[test]
    fn test_base_path_and_version_insertion_compose() {
        let c = client("https://api.example.com/api/hyperfleet", Some("hyperfleet"));
        assert_eq!(
            c.resolve_url("/clusters/c1"),
            "https://api.example.com/api/hyperfleet/v1/clusters/c1"
        );
    }

    #[test]
    fn test_split_origin() {
        assert_eq!(
            split_origin("https://host:8443/api/fleet"),
            ("https://host:8443", "/api/fleet")
        );
        assert_eq!(split_origin("https://host"), ("https://host", ""));
    }

    // ------------------------------------------------------------------------
    // Backoff
    // ------------------------------------------------------------------------

    #[test]
    fn test_backoff_grows_exponentially() {
        let base = Duration::from_millis(100);
        for attempt in 1..=4u32 {
            let expected_floor = 100u64 << (attempt - 1);
            let backoff = backoff_with_jitter(base, attempt).as_millis() as u64;
            assert!(backoff >= expected_floor, "attempt {}", attempt);
            assert!(backoff <= expected_floor + expected_floor / 2);
        }
    }

    #[test]
    fn test_backoff_zero_base_stays_zero() {
        assert_eq!(
            backoff_with_jitter(Duration::ZERO, 3),
            Duration::ZERO
        );
    }

    // ------------------------------------------------------------------------
    // Recording client
    // ------------------------------------------------------------------------

    fn request(method: &str, url: &str) -> HttpRequest {
        HttpRequest {
            method: method.to_string(),
            url: url.to_string(),
            headers: vec![],
            body: None,
            timeout: DEFAULT_TIMEOUT,
            retry_attempts: 1,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
        }
    }

    #[tokio::test]
    async fn test_recording_client_journals_requests() {
        let client = RecordingHttpClient::new();
        let cancel = CancellationToken::new();

        client.push_response(201, "{\"id\":\"x\"}");
        let first = client
            .execute(request("POST", "/clusters"), &cancel)
            .await
            .unwrap();
        let second = client
            .execute(request("GET", "/clusters/x"), &cancel)
            .await
            .unwrap();

        assert_eq!(first.status, 201);
        assert_eq!(second.status, 200);
        assert_eq!(second.body, "{}");

        let journal = client.requests();
        assert_eq!(journal.len(), 2);
        assert_eq!(journal[0].method, "POST");
        assert_eq!(journal[1].url, "/clusters/x");
    }
}
