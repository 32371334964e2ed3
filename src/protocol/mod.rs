//! # Módulo de Protocolo - Estruturas do Pipeline Declarativo
//!
//! Este módulo define todas as **estruturas de dados** que representam
//! a configuração de um adapter e o pipeline de steps que ele executa.
//!
//! ## O que é a configuração do adapter?
//!
//! É um documento YAML que descreve, passo a passo, o que o adapter
//! deve fazer para cada CloudEvent recebido. O mesmo binário apontado
//! para YAMLs diferentes produz adapters diferentes.
//!
//! ## Estrutura de uma configuração:
//!
//! ```yaml
//! metadata:
//!   name: cluster-provisioner          # nome do adapter
//!   version: "1.2.0"
//! api:
//!   baseUrl: https://api.example.com   # base das chamadas REST
//!   product: hyperfleet                # produto para resolução de versão
//! steps:
//!   - name: clusterId
//!     param: { source: "event.id" }
//!   - name: fetchCluster
//!     apiCall:
//!       method: GET
//!       url: "/clusters/{{ .clusterId }}"
//!       capture:
//!         - { name: phase, field: "status.phase" }
//!   - name: notifyReady
//!     when: 'phase == "Ready"'
//!     log: { message: "cluster {{ .clusterId }} pronto" }
//! ```
//!
//! ## Hierarquia de Tipos:
//!
//! ```text
//! AdapterConfig
//! ├── AdapterMetadata (nome, versão, campos livres)
//! ├── ApiConfig (baseUrl, product)
//! └── Steps[] (lista de passos)
//!     ├── ParamStep    (extração de parâmetro)
//!     ├── ApiCallStep  (chamada REST + CaptureField[])
//!     ├── ResourceStep (reconciliação Kubernetes + Discovery)
//!     ├── Payload      (construção de documento JSON)
//!     └── LogStep      (emissão de log)
//! ```
//!
//! Cada step tem **exatamente uma** das cinco variantes. Essa regra é
//! verificada pelo módulo `validation` antes de qualquer execução.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::collections::HashMap;

use crate::errors::StepError;

// ============================================================================
// CONFIGURAÇÃO DO ADAPTER
// ============================================================================

/// Representa a configuração completa de um adapter.
///
/// Esta é a estrutura raiz carregada do arquivo YAML.
///
/// ## Campos:
/// - `metadata`: Identificação do adapter (disponível no ambiente como `metadata`)
/// - `api`: Configuração da API de gerenciamento REST
/// - `steps`: Pipeline de steps executado para cada evento
#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdapterConfig {
    /// Metadados do adapter, ligados ao ambiente sob a raiz `metadata`.
    pub metadata: AdapterMetadata,

    /// Configuração da API de gerenciamento (base URL, produto).
    pub api: ApiConfig,

    /// Lista de steps executados em ordem de declaração.
    pub steps: Vec<Step>,
}

/// Metadados de identificação do adapter.
///
/// Campos não reconhecidos são preservados e expostos ao ambiente
/// junto com `name` e `version`, então a configuração pode carregar
/// qualquer metadado extra que os templates precisem ler.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AdapterMetadata {
    /// Nome do adapter. Aparece em logs e no relatório de execução.
    pub name: String,

    /// Versão declarada da configuração.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Campos livres adicionais (expostos sob `metadata.<campo>`).
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl AdapterMetadata {
    /// Converte os metadados para o valor JSON ligado sob a raiz `metadata`.
    pub fn to_value(&self) -> Value {
        let mut map = serde_json::Map::new();
        map.insert("name".to_string(), Value::String(self.name.clone()));
        if let Some(version) = &self.version {
            map.insert("version".to_string(), Value::String(version.clone()));
        }
        for (k, v) in &self.extra {
            map.insert(k.clone(), v.clone());
        }
        Value::Object(map)
    }
}

/// Configuração da API de gerenciamento REST.
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ApiConfig {
    /// URL base contra a qual URLs relativas de `apiCall` são resolvidas.
    ///
    /// Ex: "https://api.example.com/api/hyperfleet"
    pub base_url: String,

    /// Nome do produto usado na inserção de versão.
    ///
    /// Quando um path relativo começa com `/api/<product>/` sem segmento
    /// de versão, `v1` é inserido automaticamente.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,
}

// ============================================================================
// PASSO DE EXECUÇÃO: STEP
// ============================================================================

/// Representa um passo (step) do pipeline.
///
/// Cada step é uma **ação atômica** executada contra o evento corrente.
///
/// ## Campos obrigatórios:
/// - `name`: Identificador único no pipeline, no formato
///   `^[a-z][a-zA-Z0-9_]*$` (o nome também é um identificador legal nas
///   expressões, então steps posteriores podem referenciá-lo)
/// - Exatamente uma das cinco variantes: `param`, `apiCall`, `resource`,
///   `payload`, `log`
///
/// ## Campos opcionais:
/// - `when`: Expressão de condição. Ausente = sempre executa.
///   Se avaliar para `false`, o step é registrado como `skipped`.
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    /// Identificador único do step dentro do pipeline.
    pub name: String,

    /// Expressão de condição avaliada contra o ambiente corrente.
    ///
    /// Ex: `when: 'phase == "Ready"'`
    /// Ex: `when: 'adapter.executionStatus == "success"'`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,

    /// Variante de extração de parâmetro.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub param: Option<ParamStep>,

    /// Variante de chamada à API REST.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_call: Option<ApiCallStep>,

    /// Variante de reconciliação de recurso Kubernetes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<ResourceStep>,

    /// Variante de construção de payload JSON.
    ///
    /// Árvore livre onde folhas podem ser literais, templates ou mapas
    /// `{field|expression, default}`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,

    /// Variante de emissão de log.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log: Option<LogStep>,
}

impl Step {
    /// Retorna a variante deste step, se exatamente uma estiver presente.
    ///
    /// A unicidade é garantida pela validação de carga; em tempo de
    /// execução este método só retorna `None` para configurações que
    /// contornaram a validação.
    pub fn kind(&self) -> Option<StepKind> {
        let mut kind = None;
        let mut count = 0;
        if self.param.is_some() {
            kind = Some(StepKind::Param);
            count += 1;
        }
        if self.api_call.is_some() {
            kind = Some(StepKind::ApiCall);
            count += 1;
        }
        if self.resource.is_some() {
            kind = Some(StepKind::Resource);
            count += 1;
        }
        if self.payload.is_some() {
            kind = Some(StepKind::Payload);
            count += 1;
        }
        if self.log.is_some() {
            kind = Some(StepKind::Log);
            count += 1;
        }
        if count == 1 {
            kind
        } else {
            None
        }
    }

    /// Conta quantas variantes foram declaradas (usado pela validação).
    pub fn variant_count(&self) -> usize {
        [
            self.param.is_some(),
            self.api_call.is_some(),
            self.resource.is_some(),
            self.payload.is_some(),
            self.log.is_some(),
        ]
        .iter()
        .filter(|set| **set)
        .count()
    }
}

/// As cinco variantes possíveis de um step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    Param,
    ApiCall,
    Resource,
    Payload,
    Log,
}

impl StepKind {
    /// Nome da variante como aparece em relatórios e logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::Param => "param",
            StepKind::ApiCall => "apiCall",
            StepKind::Resource => "resource",
            StepKind::Payload => "payload",
            StepKind::Log => "log",
        }
    }
}

// ============================================================================
// VARIANTE: PARAM
// ============================================================================

/// Extração de um parâmetro para o ambiente.
///
/// Exatamente uma das fontes deve estar presente:
///
/// | Fonte | Significado |
/// |---|---|
/// | `source: "event.<path>"` | Lookup pontilhado no payload do evento |
/// | `source: "env.<NAME>"` | Variável de ambiente do processo |
/// | `value: <literal>` | Valor literal usado como está |
/// | `expression: <expr>` | Expressão avaliada contra o ambiente |
///
/// ## Exemplo:
/// ```yaml
/// - name: clusterId
///   param: { source: "event.id" }
/// - name: region
///   param: { source: "env.REGION", default: "us-east-1" }
/// - name: replicas
///   param: { value: "3", as: int }
/// ```
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ParamStep {
    /// Fonte `event.<path>` ou `env.<NAME>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    /// Valor literal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,

    /// Expressão avaliada contra o ambiente corrente.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,

    /// Valor usado quando a fonte não resolve.
    ///
    /// Sem `default`, uma fonte ausente falha o step com `MissingParam`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,

    /// Coerção de tipo aplicada após a resolução.
    #[serde(default, rename = "as", skip_serializing_if = "Option::is_none")]
    pub coerce: Option<CoerceTarget>,
}

/// Tipos alvo da coerção `as:` de um ParamStep.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CoerceTarget {
    /// Forma decimal mínima para números, "true"/"false" para bool.
    String,
    /// Inteiro com sinal (`int` e `int64` têm o mesmo efeito).
    Int,
    Int64,
    Float64,
    /// Aceita true/false/yes/no/on/off/1/0, caso-insensitivo.
    Bool,
}

// ============================================================================
// VARIANTE: API CALL
// ============================================================================

/// Chamada à API de gerenciamento REST.
///
/// URL, headers e body são templates renderizados contra o ambiente.
/// A resposta parseada é ligada sob o nome do step (para condições que
/// precisam cavar em `stepName.status.conditions`); valores individuais
/// são ligados no topo do ambiente via `capture`.
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ApiCallStep {
    /// Método HTTP: GET, POST, PUT, PATCH ou DELETE.
    pub method: String,

    /// Template da URL. Pode ser absoluta ou um path resolvido contra
    /// `api.baseUrl`.
    pub url: String,

    /// Template do body da requisição (enviado como está).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,

    /// Headers adicionais; o valor de cada um é um template.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<HeaderTemplate>,

    /// Timeout de uma única tentativa, em segundos.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,

    /// Número máximo de tentativas (incluindo a primeira).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_attempts: Option<u32>,

    /// Backoff base entre tentativas, em milissegundos.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_backoff: Option<u64>,

    /// Extrações nomeadas aplicadas sobre o body JSON da resposta.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub capture: Vec<CaptureField>,
}

/// Um header HTTP cujo valor é um template.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct HeaderTemplate {
    /// Nome do header (ex: "Authorization").
    pub name: String,

    /// Template do valor (ex: "Bearer {{ .token }}").
    pub value: String,
}

/// Extração nomeada de um valor da resposta de um ApiCall.
///
/// Exatamente um de `field` ou `expression` deve estar presente.
/// O valor extraído é ligado no topo do ambiente sob `name`.
///
/// Uma extração cujo campo não existe na resposta é pulada com um
/// warning (o step continua `success`); uma expressão malformada é
/// fatal (`CaptureError`).
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CaptureField {
    /// Nome da variável de destino no ambiente.
    pub name: String,

    /// Caminho pontilhado no body da resposta (ex: "status.phase").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,

    /// Expressão avaliada sobre o body da resposta.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
}

// ============================================================================
// VARIANTE: RESOURCE
// ============================================================================

/// Reconciliação de um recurso Kubernetes contra o estado observado.
///
/// O manifesto é uma árvore com templates em qualquer string (chaves
/// inclusive). A decisão create/update/recreate/skip é tomada pela
/// comparação da anotação de geração (`hyperfleet.io/generation`) entre
/// o manifesto desejado e o objeto descoberto.
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ResourceStep {
    /// Manifesto único (forma simples).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest: Option<Value>,

    /// Manifestos nomeados (transporte em bundle).
    ///
    /// O cliente de recursos recebe a lista inteira e a embrulha em um
    /// envelope do lado do servidor. Cada constituinte fica acessível
    /// como `resources.<step>.<manifesto>`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub manifests: Vec<NamedManifest>,

    /// Como descobrir o objeto existente.
    pub discovery: Discovery,

    /// Quando a geração aumenta, deletar e recriar ao invés de atualizar.
    #[serde(default)]
    pub recreate_on_change: bool,
}

/// Um manifesto nomeado dentro de um bundle.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct NamedManifest {
    /// Nome do constituinte dentro do bundle.
    pub name: String,

    /// O manifesto propriamente dito.
    pub manifest: Value,
}

/// Especificação de descoberta do objeto existente.
///
/// Exatamente um de `byName` ou `bySelectors` deve estar presente.
///
/// ## Exemplo:
/// ```yaml
/// discovery:
///   byName: "cm-{{ .clusterId }}"
///   namespace: default
/// ```
/// ```yaml
/// discovery:
///   bySelectors:
///     hyperfleet.io/cluster: "{{ .clusterId }}"
///   namespace: "*"          # todos os namespaces
/// ```
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Discovery {
    /// Template do nome do objeto.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub by_name: Option<String>,

    /// Templates de chave/valor de um label selector.
    ///
    /// Quando múltiplos objetos casam, vence o de maior anotação de
    /// geração.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub by_selectors: Option<BTreeMap<String, String>>,

    /// Template do namespace. `*` ou vazio significa todos.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

// ============================================================================
// VARIANTE: LOG
// ============================================================================

/// Emissão de uma linha de log estruturado.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LogStep {
    /// Nível de emissão. Padrão: info.
    #[serde(default)]
    pub level: LogLevel,

    /// Template da mensagem.
    pub message: String,
}

/// Níveis de log aceitos em um LogStep.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

// ============================================================================
// RESULTADO DE STEP
// ============================================================================

/// Status possíveis de um step após a execução.
#[derive(Debug, Deserialize, Serialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    /// Step executou com sucesso.
    Success,

    /// Step falhou; nenhum step posterior executa.
    Failed,

    /// Condição `when` avaliou para false.
    Skipped,
}

/// Motivo registrado quando um step é pulado.
#[derive(Debug, Deserialize, Serialize, PartialEq, Eq, Clone, Copy)]
pub enum SkipReason {
    /// A condição `when` avaliou para `false`.
    WhenFalse,
}

/// Resultado da execução de um step.
///
/// Registrado no contexto tanto na lista ordenada quanto no mapa por
/// nome, e endereçável por steps posteriores (`.error`, `.skipped`).
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    /// Nome do step.
    pub name: String,

    /// Variante do step ("param", "apiCall", ...).
    #[serde(rename = "type")]
    pub step_type: String,

    /// Status final.
    pub status: StepStatus,

    /// Motivo do skip, quando status é `skipped`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<SkipReason>,

    /// Valor produzido pelo step (ausente para apiCall, que liga a
    /// resposta apenas como side-binding).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    /// Capturas ligadas ao ambiente por este step (apenas apiCall).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub captured_fields: Option<HashMap<String, Value>>,

    /// Erro estruturado, quando status é `failed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<StepError>,

    /// Duração da execução em milissegundos.
    pub duration_ms: u64,
}

impl StepResult {
    /// Resultado de sucesso com valor produzido.
    pub fn success(name: &str, kind: StepKind, result: Option<Value>) -> Self {
        Self {
            name: name.to_string(),
            step_type: kind.as_str().to_string(),
            status: StepStatus::Success,
            skip_reason: None,
            result,
            captured_fields: None,
            error: None,
            duration_ms: 0,
        }
    }

    /// Resultado de falha com erro estruturado.
    pub fn failed(name: &str, kind: StepKind, error: StepError) -> Self {
        Self {
            name: name.to_string(),
            step_type: kind.as_str().to_string(),
            status: StepStatus::Failed,
            skip_reason: None,
            result: None,
            captured_fields: None,
            error: Some(error),
            duration_ms: 0,
        }
    }

    /// Resultado de skip com o motivo.
    pub fn skipped(name: &str, kind: StepKind, reason: SkipReason) -> Self {
        Self {
            name: name.to_string(),
            step_type: kind.as_str().to_string(),
            status: StepStatus::Skipped,
            skip_reason: Some(reason),
            result: None,
            captured_fields: None,
            error: None,
            duration_ms: 0,
        }
    }

    /// Anexa as capturas realizadas (builder).
    pub fn with_captures(mut self, captures: HashMap<String, Value>) -> Self {
        if !captures.is_empty() {
            self.captured_fields = Some(captures);
        }
        self
    }

    /// Anexa a duração medida (builder).
    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }
}

// ============================================================================
// RESULTADO DE EXECUÇÃO
// ============================================================================

/// Status geral de uma execução.
#[derive(Debug, Deserialize, Serialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Success,
    Failed,
}

/// Primeiro erro de uma execução que falhou.
///
/// Também ligado ao ambiente como `adapter.executionError` para que
/// condições possam inspecioná-lo.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ExecutionError {
    /// Nome do step que falhou.
    pub step: String,

    /// Mensagem do erro.
    pub message: String,
}

/// Resultado completo de uma execução do pipeline.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    /// Status geral: failed se qualquer step falhou.
    pub status: ExecutionStatus,

    /// Resultados de cada step, em ordem de execução.
    pub steps: Vec<StepResult>,

    /// Primeiro erro, se houver.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ExecutionError>,

    /// Snapshot final do ambiente (para debug e dry-run).
    pub environment: serde_json::Map<String, Value>,
}

// ============================================================================
// RELATÓRIO DE EXECUÇÃO
// ============================================================================

/// Relatório final serializado pela CLI.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionReport {
    /// UUID único desta execução.
    pub execution_id: String,

    /// Nome do adapter que executou.
    pub adapter: String,

    /// Status geral ("success" ou "failed").
    pub status: ExecutionStatus,

    /// Início em ISO8601.
    pub start_time: String,

    /// Fim em ISO8601.
    pub end_time: String,

    /// Resumo estatístico.
    pub summary: ExecutionSummary,

    /// Resultados de cada step.
    pub steps: Vec<StepResult>,

    /// Snapshot final do ambiente (incluído em dry-run, para trace).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<serde_json::Map<String, Value>>,
}

/// Resumo estatístico de uma execução.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionSummary {
    /// Total de steps no pipeline.
    pub total_steps: usize,

    /// Steps que executaram com sucesso.
    pub success: usize,

    /// Steps que falharam (no máximo 1, o runner para na primeira falha).
    pub failed: usize,

    /// Steps pulados por `when` falso.
    pub skipped: usize,

    /// Duração total em milissegundos.
    pub duration_ms: u64,
}

impl ExecutionSummary {
    /// Monta o resumo a partir dos resultados.
    pub fn from_results(results: &[StepResult], total_steps: usize, duration_ms: u64) -> Self {
        let success = results
            .iter()
            .filter(|r| r.status == StepStatus::Success)
            .count();
        let failed = results
            .iter()
            .filter(|r| r.status == StepStatus::Failed)
            .count();
        let skipped = results
            .iter()
            .filter(|r| r.status == StepStatus::Skipped)
            .count();

        Self {
            total_steps,
            success,
            failed,
            skipped,
            duration_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse_step(yaml: &str) -> Step {
        serde_yaml::from_str(yaml).expect("step parses")
    }

    #[test]
    fn test_param_step_parses() {
        let step = parse_step(
            r#"
name: clusterId
param:
  source: "event.id"
  default: "unknown"
  as: string
"#,
        );
        assert_eq!(step.kind(), Some(StepKind::Param));
        let param = step.param.unwrap();
        assert_eq!(param.source.as_deref(), Some("event.id"));
        assert_eq!(param.default, Some(json!("unknown")));
        assert_eq!(param.coerce, Some(CoerceTarget::String));
    }

    #[test]
    fn test_api_call_step_parses_camel_case() {
        let step = parse_step(
            r#"
name: fetchCluster
apiCall:
  method: GET
  url: "/clusters/{{ .clusterId }}"
  retryAttempts: 3
  retryBackoff: 250
  capture:
    - name: phase
      field: "status.phase"
"#,
        );
        assert_eq!(step.kind(), Some(StepKind::ApiCall));
        let call = step.api_call.unwrap();
        assert_eq!(call.retry_attempts, Some(3));
        assert_eq!(call.retry_backoff, Some(250));
        assert_eq!(call.capture.len(), 1);
        assert_eq!(call.capture[0].field.as_deref(), Some("status.phase"));
    }

    #[test]
    fn test_resource_step_parses() {
        let step = parse_step(
            r#"
name: applyConfig
resource:
  manifest:
    apiVersion: v1
    kind: ConfigMap
    metadata:
      name: "cm-{{ .clusterId }}"
      annotations:
        hyperfleet.io/generation: "3"
  discovery:
    byName: "cm-{{ .clusterId }}"
    namespace: default
  recreateOnChange: true
"#,
        );
        assert_eq!(step.kind(), Some(StepKind::Resource));
        let resource = step.resource.unwrap();
        assert!(resource.recreate_on_change);
        assert_eq!(
            resource.discovery.by_name.as_deref(),
            Some("cm-{{ .clusterId }}")
        );
    }

    #[test]
    fn test_log_step_defaults_to_info() {
        let step = parse_step(
            r#"
name: announce
log:
  message: "cluster {{ .clusterId }} pronto"
"#,
        );
        assert_eq!(step.kind(), Some(StepKind::Log));
        assert_eq!(step.log.unwrap().level, LogLevel::Info);
    }

    #[test]
    fn test_step_with_two_variants_has_no_kind() {
        let step = parse_step(
            r#"
name: broken
param: { value: 1 }
log: { message: "x" }
"#,
        );
        assert_eq!(step.variant_count(), 2);
        assert_eq!(step.kind(), None);
    }

    #[test]
    fn test_step_without_variant_has_no_kind() {
        let step = parse_step("name: empty\n");
        assert_eq!(step.variant_count(), 0);
        assert_eq!(step.kind(), None);
    }

    #[test]
    fn test_metadata_to_value_keeps_extra_fields() {
        let config: AdapterConfig = serde_yaml::from_str(
            r#"
metadata:
  name: cluster-provisioner
  version: "1.2.0"
  team: fleet
api:
  baseUrl: https://api.example.com
steps:
  - name: announce
    log: { message: "up" }
"#,
        )
        .expect("config parses");

        let value = config.metadata.to_value();
        assert_eq!(value["name"], json!("cluster-provisioner"));
        assert_eq!(value["version"], json!("1.2.0"));
        assert_eq!(value["team"], json!("fleet"));
    }

    #[test]
    fn test_step_status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&StepStatus::Success).unwrap(),
            "\"success\""
        );
        assert_eq!(
            serde_json::to_string(&StepStatus::Skipped).unwrap(),
            "\"skipped\""
        );
    }

    #[test]
    fn test_summary_from_results() {
        let results = vec![
            StepResult::success("a", StepKind::Param, Some(json!("x"))),
            StepResult::skipped("b", StepKind::Log, SkipReason::WhenFalse),
        ];
        let summary = ExecutionSummary::from_results(&results, 3, 42);
        assert_eq!(summary.total_steps, 3);
        assert_eq!(summary.success, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.failed, 0);
        assert_eq!(summary.duration_ms, 42);
    }
}
