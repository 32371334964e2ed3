//! # Módulo de Validação da Configuração
//!
//! Valida a configuração do adapter antes de qualquer execução, para
//! que o engine possa assumir uma configuração estruturalmente válida.
//!
//! ## Para leigos:
//!
//! É a checagem do formulário antes do envio: campos obrigatórios
//! preenchidos, valores que fazem sentido, nada duplicado. Melhor
//! recusar o YAML na carga do que falhar no meio de um evento.
//!
//! ## Validações realizadas:
//!
//! 1. **Pipeline não vazio**: pelo menos um step
//! 2. **Nomes válidos**: `^[a-z][a-zA-Z0-9_]*$` (o nome precisa ser um
//!    identificador legal nas expressões) e únicos no pipeline
//! 3. **Nomes reservados**: um step não pode sombrear as raízes
//!    `metadata`, `adapter` e `resources`
//! 4. **Exatamente uma variante** por step
//! 5. **Param**: exatamente uma fonte; `source` com prefixo conhecido
//! 6. **ApiCall**: método HTTP conhecido; cada captura com exatamente
//!    um de `field`/`expression` e nome válido
//! 7. **Resource**: manifesto único ou bundle (nunca ambos, nunca
//!    nenhum); descoberta com exatamente um de `byName`/`bySelectors`
//!
//! Todos os problemas são coletados e reportados de uma vez.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use thiserror::Error;

use crate::context::{ROOT_ADAPTER, ROOT_METADATA, ROOT_RESOURCES};
use crate::protocol::{AdapterConfig, Step};

/// Formato obrigatório de nomes de steps e de capturas.
static STEP_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z][a-zA-Z0-9_]*$").expect("valid step name regex"));

/// Métodos HTTP aceitos em um ApiCall.
const VALID_HTTP_METHODS: &[&str] = &["GET", "POST", "PUT", "PATCH", "DELETE"];

// ============================================================================
// TIPOS DE ERRO
// ============================================================================

/// Erros de validação da configuração do adapter.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// Pipeline sem nenhum step.
    #[error("pipeline vazio: nenhum step definido")]
    EmptySteps,

    /// Nome fora do formato exigido.
    #[error("step '{name}': nome não casa com ^[a-z][a-zA-Z0-9_]*$")]
    InvalidStepName { name: String },

    /// Nome repetido no pipeline.
    #[error("step '{name}': nome duplicado")]
    DuplicateStepName { name: String },

    /// Nome que sombrearia uma raiz do ambiente.
    #[error("step '{name}': nome reservado (raízes metadata/adapter/resources)")]
    ReservedStepName { name: String },

    /// Step sem variante ou com mais de uma.
    #[error("step '{name}': exatamente uma variante é exigida, {count} declaradas")]
    VariantCount { name: String, count: usize },

    /// Param sem fonte ou com mais de uma.
    #[error("step '{name}': param exige exatamente um de source/value/expression, {count} declarados")]
    ParamSourceCount { name: String, count: usize },

    /// Fonte de param com prefixo desconhecido.
    #[error("step '{name}': source '{source_value}' precisa começar com 'event.' ou 'env.'")]
    InvalidParamSource { name: String, source_value: String },

    /// Método HTTP fora da lista aceita.
    #[error("step '{name}': método HTTP '{method}' inválido")]
    InvalidHttpMethod { name: String, method: String },

    /// Captura sem `field`/`expression` ou com ambos.
    #[error("step '{name}': captura '{capture}' exige exatamente um de field/expression")]
    InvalidCapture { name: String, capture: String },

    /// Nome de captura fora do formato (ligada no topo do ambiente).
    #[error("step '{name}': nome de captura '{capture}' inválido")]
    InvalidCaptureName { name: String, capture: String },

    /// Resource sem manifesto, ou com manifesto único E bundle.
    #[error("step '{name}': resource exige manifest ou manifests (e não ambos)")]
    InvalidManifests { name: String },

    /// Descoberta sem `byName`/`bySelectors` ou com ambos.
    #[error("step '{name}': discovery exige exatamente um de byName/bySelectors")]
    InvalidDiscovery { name: String },
}

/// Resultado de validação: ok, ou todos os problemas encontrados.
pub type ValidationResult = Result<(), Vec<ValidationError>>;

// ============================================================================
// VALIDAÇÃO
// ============================================================================

/// Valida a configuração completa do adapter.
pub fn validate_config(config: &AdapterConfig) -> ValidationResult {
    let mut errors = Vec::new();

    if config.steps.is_empty() {
        errors.push(ValidationError::EmptySteps);
        return Err(errors);
    }

    let mut seen = HashSet::new();
    for step in &config.steps {
        if !seen.insert(step.name.as_str()) {
            errors.push(ValidationError::DuplicateStepName {
                name: step.name.clone(),
            });
        }
        validate_step(step, &mut errors);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Valida um step individual.
fn validate_step(step: &Step, errors: &mut Vec<ValidationError>) {
    if !STEP_NAME_RE.is_match(&step.name) {
        errors.push(ValidationError::InvalidStepName {
            name: step.name.clone(),
        });
    }
    if step.name == ROOT_METADATA || step.name == ROOT_ADAPTER || step.name == ROOT_RESOURCES {
        errors.push(ValidationError::ReservedStepName {
            name: step.name.clone(),
        });
    }

    let count = step.variant_count();
    if count != 1 {
        errors.push(ValidationError::VariantCount {
            name: step.name.clone(),
            count,
        });
        // Sem variante única não há o que validar por variante.
        return;
    }

    if let Some(param) = &step.param {
        let sources = [
            param.source.is_some(),
            param.value.is_some(),
            param.expression.is_some(),
        ]
        .iter()
        .filter(|set| **set)
        .count();
        if sources != 1 {
            errors.push(ValidationError::ParamSourceCount {
                name: step.name.clone(),
                count: sources,
            });
        }
        if let Some(source) = &param.source {
            if !source.starts_with("event.") && !source.starts_with("env.") {
                errors.push(ValidationError::InvalidParamSource {
                    name: step.name.clone(),
                    source_value: source.clone(),
                });
            }
        }
    }

    if let Some(call) = &step.api_call {
        if !VALID_HTTP_METHODS.contains(&call.method.to_uppercase().as_str()) {
            errors.push(ValidationError::InvalidHttpMethod {
                name: step.name.clone(),
                method: call.method.clone(),
            });
        }
        for capture in &call.capture {
            let fields = [capture.field.is_some(), capture.expression.is_some()]
                .iter()
                .filter(|set| **set)
                .count();
            if fields != 1 {
                errors.push(ValidationError::InvalidCapture {
                    name: step.name.clone(),
                    capture: capture.name.clone(),
                });
            }
            if !STEP_NAME_RE.is_match(&capture.name) {
                errors.push(ValidationError::InvalidCaptureName {
                    name: step.name.clone(),
                    capture: capture.name.clone(),
                });
            }
        }
    }

    if let Some(resource) = &step.resource {
        let single = resource.manifest.is_some();
        let bundle = !resource.manifests.is_empty();
        if single == bundle {
            errors.push(ValidationError::InvalidManifests {
                name: step.name.clone(),
            });
        }

        let discoveries = [
            resource.discovery.by_name.is_some(),
            resource.discovery.by_selectors.is_some(),
        ]
        .iter()
        .filter(|set| **set)
        .count();
        if discoveries != 1 {
            errors.push(ValidationError::InvalidDiscovery {
                name: step.name.clone(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_config(steps_yaml: &str) -> AdapterConfig {
        let yaml = format!(
            r#"
metadata:
  name: test-adapter
api:
  baseUrl: https://api.example.com
steps:
{}
"#,
            steps_yaml
        );
        serde_yaml::from_str(&yaml).expect("config parses")
    }

    #[test]
    fn test_valid_config_passes() {
        let config = parse_config(
            r#"
  - name: clusterId
    param: { source: "event.id" }
  - name: fetchCluster
    apiCall:
      method: GET
      url: "/clusters/{{ .clusterId }}"
      capture:
        - { name: phase, field: "status.phase" }
  - name: announce
    log: { message: "ok" }
"#,
        );
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_empty_pipeline_rejected() {
        let config: AdapterConfig = serde_yaml::from_str(
            r#"
metadata: { name: x }
api: { baseUrl: "https://a" }
steps: []
"#,
        )
        .unwrap();
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0], ValidationError::EmptySteps);
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let config = parse_config(
            r#"
  - name: same
    log: { message: "a" }
  - name: same
    log: { message: "b" }
"#,
        );
        let errors = validate_config(&config).unwrap_err();
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::DuplicateStepName { name } if name == "same")));
    }

    #[test]
    fn test_invalid_name_format_rejected() {
        for bad in ["Upper", "1digit", "has-dash", "has space"] {
            let config = parse_config(&format!(
                "  - name: \"{}\"\n    log: {{ message: \"x\" }}\n",
                bad
            ));
            let errors = validate_config(&config).unwrap_err();
            assert!(
                errors
                    .iter()
                    .any(|e| matches!(e, ValidationError::InvalidStepName { .. })),
                "'{}' should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_reserved_names_rejected() {
        let config = parse_config(
            r#"
  - name: adapter
    log: { message: "x" }
"#,
        );
        let errors = validate_config(&config).unwrap_err();
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::ReservedStepName { .. })));
    }

    #[test]
    fn test_zero_and_two_variants_rejected() {
        let config = parse_config(
            r#"
  - name: none
  - name: both
    param: { value: 1 }
    log: { message: "x" }
"#,
        );
        let errors = validate_config(&config).unwrap_err();
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::VariantCount { name, count: 0 } if name == "none")));
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::VariantCount { name, count: 2 } if name == "both")));
    }

    #[test]
    fn test_param_needs_exactly_one_source() {
        let config = parse_config(
            r#"
  - name: nothing
    param: {}
  - name: two
    param: { source: "event.id", value: "x" }
"#,
        );
        let errors = validate_config(&config).unwrap_err();
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::ParamSourceCount { count: 0, .. })));
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::ParamSourceCount { count: 2, .. })));
    }

    #[test]
    fn test_param_source_prefix_checked() {
        let config = parse_config(
            r#"
  - name: bad
    param: { source: "payload.id" }
"#,
        );
        let errors = validate_config(&config).unwrap_err();
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::InvalidParamSource { .. })));
    }

    #[test]
    fn test_http_method_checked() {
        let config = parse_config(
            r#"
  - name: call
    apiCall: { method: FETCH, url: "/x" }
"#,
        );
        let errors = validate_config(&config).unwrap_err();
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::InvalidHttpMethod { method, .. } if method == "FETCH")));
    }

    #[test]
    fn test_lowercase_method_accepted() {
        let config = parse_config(
            r#"
  - name: call
    apiCall: { method: post, url: "/x" }
"#,
        );
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_capture_needs_exactly_one_of_field_expression() {
        let config = parse_config(
            r#"
  - name: call
    apiCall:
      method: GET
      url: "/x"
      capture:
        - { name: none }
        - { name: both, field: "a", expression: "b" }
"#,
        );
        let errors = validate_config(&config).unwrap_err();
        let invalid: Vec<_> = errors
            .iter()
            .filter(|e| matches!(e, ValidationError::InvalidCapture { .. }))
            .collect();
        assert_eq!(invalid.len(), 2);
    }

    #[test]
    fn test_resource_manifest_xor_bundle() {
        let config = parse_config(
            r#"
  - name: neither
    resource:
      discovery: { byName: "x" }
  - name: both
    resource:
      manifest: { apiVersion: v1, kind: ConfigMap }
      manifests:
        - name: extra
          manifest: { apiVersion: v1, kind: Secret }
      discovery: { byName: "x" }
"#,
        );
        let errors = validate_config(&config).unwrap_err();
        let invalid: Vec<_> = errors
            .iter()
            .filter(|e| matches!(e, ValidationError::InvalidManifests { .. }))
            .collect();
        assert_eq!(invalid.len(), 2);
    }

    #[test]
    fn test_discovery_needs_exactly_one_mode() {
        let config = parse_config(
            r#"
  - name: none
    resource:
      manifest: { apiVersion: v1, kind: ConfigMap }
      discovery: {}
  - name: both
    resource:
      manifest: { apiVersion: v1, kind: ConfigMap }
      discovery:
        byName: "x"
        bySelectors: { app: fleet }
"#,
        );
        let errors = validate_config(&config).unwrap_err();
        let invalid: Vec<_> = errors
            .iter()
            .filter(|e| matches!(e, ValidationError::InvalidDiscovery { .. }))
            .collect();
        assert_eq!(invalid.len(), 2);
    }
}
