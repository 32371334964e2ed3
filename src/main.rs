//! # Adapter - Executor de Pipelines Dirigidos por Configuração
//!
//! Ponto de entrada do binário. Um adapter consome CloudEvents e, para
//! cada evento, executa o pipeline de steps descrito em um YAML: o
//! mesmo binário apontado para YAMLs diferentes produz adapters
//! diferentes.
//!
//! ## O que este arquivo faz?
//!
//! 1. **Processa a linha de comando** (CLI) com `clap`
//! 2. **Carrega e valida** a configuração YAML do adapter
//! 3. **Inicializa a telemetria** (tracing + OTEL opcional)
//! 4. **Executa o pipeline** para um evento lido de arquivo
//! 5. **Serializa o relatório** com os resultados de cada step
//!
//! A assinatura do broker fica no serviço que embute o engine; este
//! binário processa um evento por invocação, o que também serve de
//! ferramenta de dry-run para configurações.
//!
//! ## Exemplo de uso:
//!
//! ```bash
//! # Executa um evento contra a configuração
//! adapter execute --config adapter.yaml --event event.json
//!
//! # Dry-run: clientes gravadores, nenhuma chamada externa
//! adapter execute --config adapter.yaml --event event.json --dry-run
//!
//! # Só valida a configuração
//! adapter validate --config adapter.yaml
//! ```

// ============================================================================
// DECLARAÇÃO DE MÓDULOS
// ============================================================================

/// Interfaces consumidas: HTTP, recursos, relógio, env.
mod clients;

/// Contexto de execução por evento (ambiente de variáveis).
mod context;

/// Taxonomia de erros estruturados de step.
mod errors;

/// Executores: um por variante de step.
mod executors;

/// Linguagens de expressão: templates e expressões estilo CEL.
mod expression;

/// Extração de valores (field/expression) com sinal de ausência.
mod extractors;

/// Tetos de execução (steps, retries, timeouts).
mod limits;

/// Carga de configuração YAML e eventos JSON.
mod loader;

/// DSL do pipeline e tipos de resultado/relatório.
mod protocol;

/// Reconciliação de recursos por anotação de geração.
mod reconciler;

/// Orquestração sequencial do pipeline.
mod runner;

/// Logging estruturado e exportação OTEL.
mod telemetry;

/// Validação estrutural da configuração.
mod validation;

// ============================================================================
// IMPORTS
// ============================================================================

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use uuid::Uuid;

use clients::http::{HttpClient, RecordingHttpClient, ReqwestHttpClient};
use clients::resource::RecordingResourceClient;
use clients::{EnvSource, SystemClock, SystemEnv};
use context::ExecutionContext;
use executors::api_call::ApiCallExecutor;
use executors::log::LogExecutor;
use executors::param::ParamExecutor;
use executors::payload::PayloadExecutor;
use executors::resource::ResourceExecutor;
use executors::StepExecutor;
use expression::template::TemplateEngine;
use limits::ExecutionLimits;
use protocol::{AdapterConfig, ExecutionReport, ExecutionStatus, ExecutionSummary};
use runner::StepRunner;
use telemetry::{event_correlation_fields, init_telemetry, shutdown_telemetry, TelemetryConfig};

// ============================================================================
// CLI
// ============================================================================

/// CLI do adapter.
#[derive(Parser)]
#[command(name = "adapter")]
#[command(about = "Executor de pipelines de adapter dirigidos por configuração", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Executa o pipeline para um evento.
    Execute {
        /// Caminho da configuração YAML do adapter.
        #[arg(short, long)]
        config: PathBuf,

        /// Caminho do payload do evento (JSON).
        #[arg(short, long)]
        event: PathBuf,

        /// Caminho do relatório de execução (padrão: stdout).
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Troca os clientes externos por gravadores em memória.
        ///
        /// As semânticas do engine não mudam; só os clientes injetados.
        #[arg(long, default_value = "false")]
        dry_run: bool,

        /// Respostas enfileiradas para o cliente HTTP do dry-run
        /// (JSON: lista de {status, body}).
        #[arg(long)]
        mock_responses: Option<PathBuf>,

        /// Habilita exportação de traces OTEL.
        #[arg(long, default_value = "false")]
        otel: bool,

        /// Endpoint do coletor OTLP.
        #[arg(long)]
        otel_endpoint: Option<String>,

        /// Modo silencioso: apenas erros no stderr.
        #[arg(long, short = 's', default_value = "false")]
        silent: bool,

        /// Logs detalhados de debug.
        #[arg(long, short = 'v', default_value = "false")]
        verbose: bool,

        /// ID de execução customizado (padrão: UUID v4).
        #[arg(long)]
        execution_id: Option<String>,
    },

    /// Carrega e valida a configuração, sem executar nada.
    Validate {
        /// Caminho da configuração YAML do adapter.
        #[arg(short, long)]
        config: PathBuf,
    },
}

// ============================================================================
// MAIN
// ============================================================================

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Execute {
            config,
            event,
            output,
            dry_run,
            mock_responses,
            otel,
            otel_endpoint,
            silent,
            verbose,
            execution_id,
        } => {
            let exec_id = execution_id
                .clone()
                .unwrap_or_else(|| Uuid::new_v4().to_string());

            let mut telemetry_config = TelemetryConfig::from_env();
            telemetry_config.log_level = if *silent {
                Level::ERROR
            } else if *verbose {
                Level::DEBUG
            } else {
                Level::INFO
            };
            if *otel {
                if let Some(endpoint) = otel_endpoint {
                    telemetry_config.otlp_endpoint = Some(endpoint.clone());
                } else if telemetry_config.otlp_endpoint.is_none() {
                    telemetry_config.otlp_endpoint = Some("http://localhost:4317".to_string());
                }
            }

            if let Err(e) = init_telemetry(telemetry_config) {
                if !*silent {
                    eprintln!("Warning: failed to initialize telemetry: {}", e);
                }
                let _ = tracing_subscriber::fmt()
                    .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
                    .try_init();
            }

            execute_event(config, event, output, *dry_run, mock_responses, &exec_id).await;
            shutdown_telemetry();
        }

        Commands::Validate { config } => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
                .try_init();
            validate_only(config);
        }
    }
}

// ============================================================================
// EXECUÇÃO DE UM EVENTO
// ============================================================================

/// Carrega, valida e executa o pipeline para um evento.
async fn execute_event(
    config_path: &PathBuf,
    event_path: &PathBuf,
    output_path: &Option<PathBuf>,
    dry_run: bool,
    mock_responses: &Option<PathBuf>,
    execution_id: &str,
) {
    let start_time = chrono::Utc::now();

    // 1. Carga da configuração e do evento.
    let config = match loader::load_config(config_path) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "failed to load adapter config");
            std::process::exit(1);
        }
    };
    let event = match loader::load_event(event_path) {
        Ok(event) => event,
        Err(e) => {
            error!(error = %e, "failed to load event");
            std::process::exit(1);
        }
    };

    // 2. Validação estrutural + tetos.
    if !ensure_valid(&config) {
        std::process::exit(1);
    }

    info!(
        adapter = %config.metadata.name,
        execution_id = %execution_id,
        dry_run,
        fields = ?event_correlation_fields(&event),
        "processing event"
    );

    // 3. Clientes e executores.
    let mocks = match mock_responses {
        Some(path) => match loader::load_mock_responses(path) {
            Ok(mocks) => mocks,
            Err(e) => {
                error!(error = %e, "failed to load mock responses");
                std::process::exit(1);
            }
        },
        None => Vec::new(),
    };
    let executors = build_executors(&config, dry_run, mocks);

    // 4. Cancelamento via ctrl-c.
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, canceling execution");
                cancel.cancel();
            }
        });
    }

    // 5. Execução.
    let pipeline_len = config.steps.len();
    let context = ExecutionContext::new(config.metadata.to_value(), event);
    let runner = StepRunner::new(config.steps, executors);
    let result = runner.execute(context, &cancel).await;
    let end_time = chrono::Utc::now();

    // 6. Relatório.
    let duration_ms = (end_time - start_time).num_milliseconds().max(0) as u64;
    let report = ExecutionReport {
        execution_id: execution_id.to_string(),
        adapter: config.metadata.name.clone(),
        status: result.status,
        start_time: start_time.to_rfc3339(),
        end_time: end_time.to_rfc3339(),
        summary: ExecutionSummary::from_results(&result.steps, pipeline_len, duration_ms),
        steps: result.steps,
        environment: dry_run.then_some(result.environment),
    };

    let json = match serde_json::to_string_pretty(&report) {
        Ok(json) => json,
        Err(e) => {
            error!(error = %e, "failed to serialize report");
            std::process::exit(1);
        }
    };
    match output_path {
        Some(path) => {
            if let Err(e) = std::fs::write(path, json) {
                error!(error = %e, "failed to write report");
                std::process::exit(1);
            }
            info!(path = %path.display(), "report written");
        }
        None => println!("{}", json),
    }

    if report.status == ExecutionStatus::Failed {
        std::process::exit(1);
    }
}

/// Valida a configuração e reporta todos os problemas.
fn ensure_valid(config: &AdapterConfig) -> bool {
    if let Err(errors) = validation::validate_config(config) {
        error!("adapter config validation failed with {} error(s):", errors.len());
        for e in &errors {
            error!("  - {}", e);
        }
        return false;
    }

    let limits = ExecutionLimits::from_env();
    let report = limits::validate_limits(config, &limits);
    if !report.passed {
        error!("adapter config exceeds execution limits:");
        for v in &report.violations {
            error!("  - {}", v.message);
        }
        return false;
    }

    true
}

/// Monta os cinco executores com os clientes do modo escolhido.
///
/// Em dry-run, HTTP e recursos usam gravadores em memória. Fora dele,
/// o HTTP é o cliente reqwest real; o backend de recursos deste
/// binário continua em memória - o transporte Kubernetes/ManifestWork
/// de produção é injetado pelo serviço que embute o engine.
fn build_executors(
    config: &AdapterConfig,
    dry_run: bool,
    mocks: Vec<(u16, String)>,
) -> Vec<Box<dyn StepExecutor>> {
    let templates = Arc::new(TemplateEngine::new(Arc::new(SystemClock)));
    let env_source: Arc<dyn EnvSource> = Arc::new(SystemEnv);

    let http: Arc<dyn HttpClient> = if dry_run {
        let recording = RecordingHttpClient::new();
        for (status, body) in &mocks {
            recording.push_response(*status, body);
        }
        Arc::new(recording)
    } else {
        Arc::new(ReqwestHttpClient::new(&config.api))
    };

    let resources = Arc::new(RecordingResourceClient::new());
    if !dry_run && config.steps.iter().any(|s| s.resource.is_some()) {
        warn!("no live resource backend wired in this binary; resource steps run in-memory");
    }

    vec![
        Box::new(ParamExecutor::new(env_source)),
        Box::new(ApiCallExecutor::new(http, templates.clone())),
        Box::new(ResourceExecutor::new(resources, templates.clone())),
        Box::new(PayloadExecutor::new(templates.clone())),
        Box::new(LogExecutor::new(templates)),
    ]
}

// ============================================================================
// VALIDAÇÃO ISOLADA
// ============================================================================

/// Implementa o subcomando `validate`.
fn validate_only(config_path: &PathBuf) {
    let config = match loader::load_config(config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {}", e);
            std::process::exit(1);
        }
    };

    if !ensure_valid(&config) {
        std::process::exit(1);
    }

    println!(
        "configuration '{}' is valid ({} steps)",
        config.metadata.name,
        config.steps.len()
    );
}
