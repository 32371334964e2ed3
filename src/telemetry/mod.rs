//! # Módulo de Telemetria
//!
//! Observabilidade do adapter: logging estruturado via `tracing` e
//! exportação opcional de traces OpenTelemetry (OTLP/gRPC).
//!
//! ## Para todos entenderem:
//!
//! Um adapter processa eventos que atravessam três sistemas (broker,
//! API REST, backend de recursos). Quando algo demora ou falha, os
//! spans mostram onde: cada ApiCall e cada reconciliação viram spans
//! com método, URL, status e duração.
//!
//! ## Configuração via variáveis de ambiente:
//!
//! - `OTEL_SERVICE_NAME`: nome do serviço nos traces
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: URL do coletor OTLP
//! - `OTEL_TRACES_SAMPLER_ARG`: taxa de sampling (0.0-1.0)
//!
//! Sem endpoint configurado, só o logging de console fica ativo.

use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::runtime::Tokio;
use opentelemetry_sdk::trace::{RandomIdGenerator, Sampler, Tracer, TracerProvider};
use opentelemetry_sdk::{trace as sdktrace, Resource};
use serde_json::Value;
use tracing::Level;
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

// ============================================================================
// CONFIGURAÇÃO
// ============================================================================

/// Configuração do sistema de telemetria.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Nome do serviço nos traces e dashboards.
    pub service_name: String,

    /// Endpoint OTLP (gRPC). `None` = apenas console.
    pub otlp_endpoint: Option<String>,

    /// Taxa de sampling: 1.0 coleta tudo, 0.0 nada.
    pub sampling_ratio: f64,

    /// Logging de console habilitado.
    pub enable_console_logging: bool,

    /// Nível mínimo de log.
    pub log_level: Level,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "hyperfleet-adapter".to_string(),
            otlp_endpoint: None,
            sampling_ratio: 1.0,
            enable_console_logging: true,
            log_level: Level::INFO,
        }
    }
}

impl TelemetryConfig {
    /// Carrega a configuração das variáveis de ambiente padrão OTEL.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(name) = std::env::var("OTEL_SERVICE_NAME") {
            config.service_name = name;
        }
        if let Ok(endpoint) = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT") {
            config.otlp_endpoint = Some(endpoint);
        }
        if let Ok(ratio) = std::env::var("OTEL_TRACES_SAMPLER_ARG") {
            if let Ok(parsed) = ratio.parse::<f64>() {
                config.sampling_ratio = parsed.clamp(0.0, 1.0);
            }
        }

        config
    }
}

// ============================================================================
// INICIALIZAÇÃO / ENCERRAMENTO
// ============================================================================

/// Inicializa logging e, se configurado, a exportação OTLP.
///
/// Retorna o tracer quando o OTLP está ativo, para que o chamador
/// possa criar spans raiz explicitamente se quiser.
pub fn init_telemetry(config: TelemetryConfig) -> anyhow::Result<Option<Tracer>> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.to_string()));

    if let Some(endpoint) = &config.otlp_endpoint {
        let tracer = init_otlp_tracer(&config.service_name, endpoint, config.sampling_ratio)?;
        let telemetry_layer = OpenTelemetryLayer::new(tracer.clone());

        let subscriber = tracing_subscriber::registry()
            .with(env_filter)
            .with(telemetry_layer);
        if config.enable_console_logging {
            subscriber
                .with(tracing_subscriber::fmt::layer().compact())
                .init();
        } else {
            subscriber.init();
        }

        tracing::info!(
            service_name = %config.service_name,
            endpoint = %endpoint,
            sampling_ratio = config.sampling_ratio,
            "telemetria OTEL inicializada"
        );
        Ok(Some(tracer))
    } else {
        let subscriber = tracing_subscriber::registry().with(env_filter);
        if config.enable_console_logging {
            subscriber
                .with(tracing_subscriber::fmt::layer().compact())
                .init();
        } else {
            subscriber.init();
        }

        tracing::debug!("telemetria inicializada (console, sem OTLP)");
        Ok(None)
    }
}

/// Cria o tracer com exporter OTLP/gRPC em lote.
fn init_otlp_tracer(
    service_name: &str,
    endpoint: &str,
    sampling_ratio: f64,
) -> anyhow::Result<Tracer> {
    let sampler = if sampling_ratio >= 1.0 {
        Sampler::AlwaysOn
    } else if sampling_ratio <= 0.0 {
        Sampler::AlwaysOff
    } else {
        Sampler::TraceIdRatioBased(sampling_ratio)
    };

    let tracer_provider = TracerProvider::builder()
        .with_batch_exporter(
            opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(endpoint)
                .build_span_exporter()?,
            Tokio,
        )
        .with_config(
            sdktrace::Config::default()
                .with_sampler(sampler)
                .with_id_generator(RandomIdGenerator::default())
                .with_resource(Resource::new(vec![KeyValue::new(
                    "service.name",
                    service_name.to_string(),
                )])),
        )
        .build();

    let tracer = tracer_provider.tracer(service_name.to_string());
    global::set_tracer_provider(tracer_provider);

    Ok(tracer)
}

/// Encerra a telemetria, garantindo o flush dos spans em lote.
///
/// Chamar antes de sair do processo; spans acumulados no batch
/// exporter são perdidos sem o flush.
pub fn shutdown_telemetry() {
    global::shutdown_tracer_provider();
}

// ============================================================================
// CORRELAÇÃO DE EVENTOS
// ============================================================================

/// Campos de correlação extraídos do payload de um evento.
///
/// Nenhum campo é obrigatório; os presentes viram campos de log da
/// execução (`event.id`, `event.kind`, ...).
pub fn event_correlation_fields(event: &Value) -> Vec<(&'static str, String)> {
    let mut fields = Vec::new();

    for (key, label) in [
        ("id", "event.id"),
        ("kind", "event.kind"),
        ("href", "event.href"),
        ("generation", "event.generation"),
    ] {
        if let Some(value) = event.get(key) {
            fields.push((label, scalar_string(value)));
        }
    }

    if let Some(owned) = event.get("owned_reference") {
        for (key, label) in [
            ("id", "owned_reference.id"),
            ("kind", "owned_reference.kind"),
            ("href", "owned_reference.href"),
        ] {
            if let Some(value) = owned.get(key) {
                fields.push((label, scalar_string(value)));
            }
        }
    }

    fields
}

fn scalar_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_config_default() {
        let config = TelemetryConfig::default();
        assert_eq!(config.service_name, "hyperfleet-adapter");
        assert!(config.otlp_endpoint.is_none());
        assert_eq!(config.sampling_ratio, 1.0);
        assert!(config.enable_console_logging);
    }

    #[test]
    fn test_event_correlation_fields() {
        let event = json!({
            "id": "c1",
            "kind": "Cluster",
            "generation": 4,
            "owned_reference": { "id": "o1", "kind": "Order" },
            "unrelated": "ignored"
        });

        let fields = event_correlation_fields(&event);

        assert!(fields.contains(&("event.id", "c1".to_string())));
        assert!(fields.contains(&("event.kind", "Cluster".to_string())));
        assert!(fields.contains(&("event.generation", "4".to_string())));
        assert!(fields.contains(&("owned_reference.id", "o1".to_string())));
        assert!(!fields.iter().any(|(label, _)| *label == "event.href"));
    }

    #[test]
    fn test_event_correlation_fields_empty_event() {
        assert!(event_correlation_fields(&json!({})).is_empty());
    }
}
