//! # Módulo de Erros Estruturados
//!
//! Define a taxonomia de erros que um step pode produzir. Nenhum erro
//! atravessa a fronteira de um step sem estrutura: cada falha vira um
//! `StepError` com razão, mensagem e campos opcionais, carregado dentro
//! do `StepResult`.
//!
//! ## Para todos entenderem:
//!
//! Quando um step falha, o chamador precisa saber **que tipo** de
//! falha foi para decidir o que fazer com a mensagem do broker:
//!
//! - Erro de configuração/parsing → ack e descarta (repetir não ajuda)
//! - Erro transiente de API/recurso → a política de retry do host decide
//!
//! A razão (`ErrorReason`) é esse rótulo estável.
//!
//! ## Taxonomia
//!
//! | Razão | Significado | Onde nasce |
//! |--------|-------------|------------|
//! | `MissingParam` | Valor de evento/env ausente, sem default | Param |
//! | `TypeCoercion` | Conversão `as:` falhou | Param |
//! | `TemplateError` | Template falhou ou variável não ligada | Qualquer step com template |
//! | `ConditionError` | Expressão `when` com erro | Runner |
//! | `APIError` | Transporte HTTP falhou ou status não-2xx | ApiCall |
//! | `CaptureError` | Expressão de captura malformada | ApiCall |
//! | `PayloadError` | Extração de payload com erro | Payload |
//! | `ValidationError` | Manifesto sem campos obrigatórios | Resource |
//! | `ResourceError` | Backend de recursos retornou erro | Resource |
//! | `Canceled` | Cancelamento observado entre steps | Runner |

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

// ============================================================================
// RAZÃO DO ERRO
// ============================================================================

/// Rótulo estável do tipo de falha de um step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorReason {
    /// Valor obrigatório de evento/env ausente e sem default.
    MissingParam,

    /// A coerção `as:` não pôde converter o valor resolvido.
    TypeCoercion,

    /// Template com erro de parse/execução ou variável não ligada.
    TemplateError,

    /// A expressão `when` falhou (parse ou runtime).
    ConditionError,

    /// Transporte HTTP falhou ou a resposta não foi 2xx.
    #[serde(rename = "APIError")]
    ApiError,

    /// A expressão de uma captura é malformada.
    CaptureError,

    /// A avaliação de uma extração de payload falhou.
    PayloadError,

    /// Manifesto construído sem campos obrigatórios ou sem anotação de
    /// geração válida.
    ValidationError,

    /// O backend de recursos retornou erro.
    ResourceError,

    /// Cancelamento da invocação observado entre steps.
    Canceled,
}

impl ErrorReason {
    /// Forma textual da razão, idêntica à serializada.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorReason::MissingParam => "MissingParam",
            ErrorReason::TypeCoercion => "TypeCoercion",
            ErrorReason::TemplateError => "TemplateError",
            ErrorReason::ConditionError => "ConditionError",
            ErrorReason::ApiError => "APIError",
            ErrorReason::CaptureError => "CaptureError",
            ErrorReason::PayloadError => "PayloadError",
            ErrorReason::ValidationError => "ValidationError",
            ErrorReason::ResourceError => "ResourceError",
            ErrorReason::Canceled => "Canceled",
        }
    }

    /// Indica se repetir a mensagem inteira tende a ajudar.
    ///
    /// Falhas de API e de backend de recursos podem ser transientes;
    /// todo o resto é determinístico para a mesma entrada.
    pub fn is_transient(&self) -> bool {
        matches!(self, ErrorReason::ApiError | ErrorReason::ResourceError)
    }
}

impl fmt::Display for ErrorReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// ERRO ESTRUTURADO
// ============================================================================

/// Erro estruturado produzido por um step.
///
/// Carrega a razão, uma mensagem legível e campos estruturados
/// opcionais (método/URL/status de uma chamada HTTP, por exemplo).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepError {
    /// Razão da taxonomia.
    pub reason: ErrorReason,

    /// Mensagem detalhada.
    pub message: String,

    /// Campos estruturados adicionais.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub details: serde_json::Map<String, Value>,
}

impl StepError {
    /// Cria um novo erro estruturado.
    pub fn new(reason: ErrorReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
            details: serde_json::Map::new(),
        }
    }

    /// Anexa um campo estruturado (builder).
    pub fn with_detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }
}

impl fmt::Display for StepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.reason, self.message)
    }
}

impl std::error::Error for StepError {}
