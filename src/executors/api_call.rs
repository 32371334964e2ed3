//! # Executor de ApiCall - Chamadas à API de Gerenciamento
//!
//! O executor mais movimentado do pipeline. Para cada step `apiCall`:
//!
//! 1. **Renderiza** URL, headers e body como templates
//! 2. **Envia** a requisição pelo `HttpClient` injetado (timeout e
//!    retry são responsabilidade do cliente)
//! 3. **Classifica** a resposta: transporte falhou ou status não-2xx
//!    viram `APIError` com método, URL, status, trecho do body,
//!    tentativas e duração
//! 4. **Captura** valores do body JSON parseado: captura ausente é
//!    warning (o step segue `success`), expressão malformada é
//!    `CaptureError` fatal
//! 5. **Liga** a resposta parseada sob o nome do step
//!
//! ## O contrato de binding
//!
//! ApiCall **não** liga `result`: consumidores leem capturas (topo do
//! ambiente) ou o side-binding da resposta sob o nome do step, que
//! existe para condições do tipo `fetchCluster.status.conditions`.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::StepExecutor;
use crate::clients::http::{
    HttpClient, HttpError, HttpRequest, DEFAULT_RETRY_BACKOFF, DEFAULT_TIMEOUT,
};
use crate::context::ExecutionContext;
use crate::errors::{ErrorReason, StepError};
use crate::expression::template::TemplateEngine;
use crate::extractors::{ExtractSpec, ValueExtractor};
use crate::protocol::{ApiCallStep, Step, StepKind, StepResult};

/// Tamanho máximo do trecho de body incluído em um `APIError`.
const BODY_EXCERPT_CHARS: usize = 256;

/// Executor responsável pela variante `apiCall`.
pub struct ApiCallExecutor {
    http: Arc<dyn HttpClient>,
    templates: Arc<TemplateEngine>,
}

impl ApiCallExecutor {
    pub fn new(http: Arc<dyn HttpClient>, templates: Arc<TemplateEngine>) -> Self {
        Self { http, templates }
    }

    /// Renderiza URL, headers e body contra o ambiente corrente.
    fn build_request(
        &self,
        spec: &ApiCallStep,
        context: &ExecutionContext,
    ) -> Result<HttpRequest, StepError> {
        let template_error =
            |e: crate::expression::template::TemplateError| -> StepError {
                StepError::new(ErrorReason::TemplateError, e.to_string())
            };

        let url = self
            .templates
            .render(&spec.url, context.variables())
            .map_err(template_error)?;

        let mut headers = Vec::with_capacity(spec.headers.len());
        for header in &spec.headers {
            let value = self
                .templates
                .render(&header.value, context.variables())
                .map_err(template_error)?;
            headers.push((header.name.clone(), value));
        }

        let body = match &spec.body {
            Some(template) => Some(
                self.templates
                    .render(template, context.variables())
                    .map_err(template_error)?,
            ),
            None => None,
        };

        Ok(HttpRequest {
            method: spec.method.to_uppercase(),
            url,
            headers,
            body,
            timeout: spec
                .timeout
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_TIMEOUT),
            retry_attempts: spec.retry_attempts.unwrap_or(1),
            retry_backoff: spec
                .retry_backoff
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_RETRY_BACKOFF),
        })
    }

    /// Aplica as capturas sobre o body parseado.
    ///
    /// Retorna o mapa de valores capturados; captura ausente só gera
    /// warning, expressão malformada aborta com `CaptureError`.
    fn apply_captures(
        &self,
        step: &Step,
        spec: &ApiCallStep,
        parsed_body: &Value,
        context: &mut ExecutionContext,
    ) -> Result<HashMap<String, Value>, StepError> {
        let mut captured = HashMap::new();

        for capture in &spec.capture {
            let extract_spec = match (&capture.field, &capture.expression) {
                (Some(field), _) => ExtractSpec::Field(field),
                (None, Some(expression)) => ExtractSpec::Expression(expression),
                (None, None) => {
                    return Err(StepError::new(
                        ErrorReason::CaptureError,
                        format!("capture '{}' has neither field nor expression", capture.name),
                    ))
                }
            };

            match ValueExtractor::extract(parsed_body, &extract_spec) {
                Ok(extracted) if extracted.missing => {
                    tracing::warn!(
                        step = %step.name,
                        capture = %capture.name,
                        "captura ausente na resposta, pulando"
                    );
                }
                Ok(extracted) => {
                    context.bind(capture.name.clone(), extracted.value.clone());
                    captured.insert(capture.name.clone(), extracted.value);
                }
                Err(e) => {
                    return Err(StepError::new(
                        ErrorReason::CaptureError,
                        format!("capture '{}': {}", capture.name, e),
                    ))
                }
            }
        }

        Ok(captured)
    }
}

#[async_trait]
impl StepExecutor for ApiCallExecutor {
    fn can_handle(&self, kind: StepKind) -> bool {
        kind == StepKind::ApiCall
    }

    #[tracing::instrument(
        name = "api_call",
        skip_all,
        fields(
            step = %step.name,
            http.method = tracing::field::Empty,
            http.url = tracing::field::Empty,
            http.status_code = tracing::field::Empty,
            http.duration_ms = tracing::field::Empty,
            otel.kind = "client"
        )
    )]
    async fn execute(
        &self,
        step: &Step,
        context: &mut ExecutionContext,
        cancel: &CancellationToken,
    ) -> StepResult {
        let span = tracing::Span::current();
        let Some(spec) = &step.api_call else {
            return StepResult::failed(
                &step.name,
                StepKind::ApiCall,
                StepError::new(ErrorReason::ApiError, "step has no apiCall variant"),
            );
        };

        // ====================================================================
        // PASSO 1: RENDERIZAÇÃO
        // ====================================================================

        let request = match self.build_request(spec, context) {
            Ok(request) => request,
            Err(error) => return StepResult::failed(&step.name, StepKind::ApiCall, error),
        };
        span.record("http.method", request.method.as_str());
        span.record("http.url", request.url.as_str());

        // ====================================================================
        // PASSO 2: ENVIO
        // ====================================================================

        let method = request.method.clone();
        let url = request.url.clone();
        let response = match self.http.execute(request, cancel).await {
            Ok(response) => response,
            Err(HttpError::Canceled) => {
                return StepResult::failed(
                    &step.name,
                    StepKind::ApiCall,
                    StepError::new(ErrorReason::Canceled, "request canceled"),
                );
            }
            Err(HttpError::Transport {
                message,
                attempts,
                duration_ms,
            }) => {
                tracing::error!(step = %step.name, error = %message, "HTTP transport failed");
                return StepResult::failed(
                    &step.name,
                    StepKind::ApiCall,
                    StepError::new(
                        ErrorReason::ApiError,
                        format!("{} {} transport error: {}", method, url, message),
                    )
                    .with_detail("method", method.as_str())
                    .with_detail("url", url.as_str())
                    .with_detail("status", 0)
                    .with_detail("attempts", attempts)
                    .with_detail("durationMs", duration_ms),
                )
                .with_duration(duration_ms);
            }
            Err(HttpError::InvalidRequest(message)) => {
                return StepResult::failed(
                    &step.name,
                    StepKind::ApiCall,
                    StepError::new(ErrorReason::ApiError, message),
                );
            }
        };

        span.record("http.status_code", response.status as i64);
        span.record("http.duration_ms", response.duration_ms as i64);
        tracing::info!(
            step = %step.name,
            method = %method,
            url = %url,
            status = response.status,
            attempts = response.attempts,
            duration_ms = response.duration_ms,
            "API call finished"
        );

        // ====================================================================
        // PASSO 3: CLASSIFICAÇÃO
        // ====================================================================

        if !response.is_success() {
            let excerpt: String = response.body.chars().take(BODY_EXCERPT_CHARS).collect();
            return StepResult::failed(
                &step.name,
                StepKind::ApiCall,
                StepError::new(
                    ErrorReason::ApiError,
                    format!("{} {} returned status {}", method, url, response.status),
                )
                .with_detail("method", method.as_str())
                .with_detail("url", url.as_str())
                .with_detail("status", response.status)
                .with_detail("body", excerpt)
                .with_detail("attempts", response.attempts)
                .with_detail("durationMs", response.duration_ms),
            )
            .with_duration(response.duration_ms);
        }

        // ====================================================================
        // PASSO 4: CAPTURAS + SIDE-BINDING
        // ====================================================================

        let parsed_body: Value = serde_json::from_str(&response.body).unwrap_or(Value::Null);

        let captured = match self.apply_captures(step, spec, &parsed_body, context) {
            Ok(captured) => captured,
            Err(error) => {
                return StepResult::failed(&step.name, StepKind::ApiCall, error)
                    .with_duration(response.duration_ms)
            }
        };

        // Resposta parseada acessível como `stepName.status.conditions`.
        context.bind(step.name.clone(), parsed_body);

        StepResult::success(&step.name, StepKind::ApiCall, None)
            .with_captures(captured)
            .with_duration(response.duration_ms)
    }
}
