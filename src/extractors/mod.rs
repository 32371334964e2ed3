//! # Módulo de Extração - Captura de Valores de Documentos JSON
//!
//! Este módulo implementa a extração de valores usada pelas capturas de
//! ApiCall e pelas folhas `{field|expression, default}` de um Payload.
//!
//! ## Para todos entenderem:
//!
//! Imagine que uma API respondeu com um documento grande e você só
//! precisa do campo `status.phase`. A extração faz isso:
//!
//! 1. **Recebe** o documento (body da resposta, ou o ambiente inteiro)
//! 2. **Busca** o valor por caminho pontilhado ou por expressão
//! 3. **Distingue** três desfechos: valor encontrado, valor AUSENTE,
//!    ou expressão com ERRO
//!
//! A distinção ausente/erro é o contrato central deste módulo:
//!
//! ```text
//! field: "status.phase"     body sem o campo  → ausente (não é erro)
//! expression: "a.b.c"       campo não existe  → ausente (não é erro)
//! expression: "a ==  "      sintaxe inválida  → ERRO (sempre fatal)
//! ```
//!
//! Quem decide o que fazer com "ausente" é o chamador: uma captura vira
//! warning e segue, uma folha de payload usa o `default`.

use serde_json::Value;

use crate::expression::cel::{self, EvalError};

// ============================================================================
// RESULTADO DE EXTRAÇÃO
// ============================================================================

/// Desfecho de uma extração que não deu erro.
#[derive(Debug, Clone, PartialEq)]
pub struct Extracted {
    /// O valor extraído (`Null` quando ausente).
    pub value: Value,

    /// Se o caminho/campo não existia na fonte.
    pub missing: bool,
}

impl Extracted {
    /// Valor encontrado.
    pub fn found(value: Value) -> Self {
        Self {
            value,
            missing: false,
        }
    }

    /// Campo ausente na fonte.
    pub fn missing() -> Self {
        Self {
            value: Value::Null,
            missing: true,
        }
    }
}

/// O que extrair: um caminho pontilhado ou uma expressão.
///
/// Contrato do chamador: exatamente um dos dois (a validação de carga
/// rejeita capturas e folhas de payload com zero ou dois).
#[derive(Debug, Clone, Copy)]
pub enum ExtractSpec<'a> {
    /// Caminho pontilhado (ex: "status.phase", "items.0.name").
    Field(&'a str),

    /// Expressão avaliada sobre a fonte.
    Expression(&'a str),
}

// ============================================================================
// EXTRATOR
// ============================================================================

/// Motor de extração de valores.
pub struct ValueExtractor;

impl ValueExtractor {
    /// Extrai um valor da fonte.
    ///
    /// ## Retorno:
    /// - `Ok(Extracted { missing: false, .. })`: valor encontrado
    /// - `Ok(Extracted { missing: true, .. })`: campo/caminho ausente
    /// - `Err(EvalError)`: expressão malformada ou erro de runtime que
    ///   não é sinal de ausência
    pub fn extract(source: &Value, spec: &ExtractSpec) -> Result<Extracted, EvalError> {
        match spec {
            ExtractSpec::Field(path) => Ok(match walk_path(source, path) {
                Some(value) if !value.is_null() => Extracted::found(value.clone()),
                _ => Extracted::missing(),
            }),
            ExtractSpec::Expression(expression) => {
                let env = match source {
                    Value::Object(map) => map
                        .iter()
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect(),
                    // Fonte não-objeto: nenhuma raiz para resolver, toda
                    // referência cai em ausência.
                    _ => std::collections::HashMap::new(),
                };
                match cel::evaluate(expression, &env) {
                    Ok(Value::Null) => Ok(Extracted::missing()),
                    Ok(value) => Ok(Extracted::found(value)),
                    Err(e) if e.is_missing() => Ok(Extracted::missing()),
                    Err(e) => Err(e),
                }
            }
        }
    }
}

// ============================================================================
// NAVEGAÇÃO POR CAMINHO PONTILHADO
// ============================================================================

/// Navega um documento JSON por um caminho pontilhado.
///
/// Suporta:
/// - `field` → acesso direto
/// - `parent.child` → acesso aninhado
/// - `items.0.name` → segmento numérico indexa arrays
pub fn walk_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in path.split('.') {
        if segment.is_empty() {
            return None;
        }
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // ------------------------------------------------------------------------
    // Navegação por caminho
    // ------------------------------------------------------------------------

    #[test]
    fn test_walk_simple_field() {
        let doc = json!({"name": "c1"});
        assert_eq!(walk_path(&doc, "name"), Some(&json!("c1")));
    }

    #[test]
    fn test_walk_nested_field() {
        let doc = json!({"status": {"phase": "Ready"}});
        assert_eq!(walk_path(&doc, "status.phase"), Some(&json!("Ready")));
    }

    #[test]
    fn test_walk_array_segment() {
        let doc = json!({"items": [{"id": 1}, {"id": 2}]});
        assert_eq!(walk_path(&doc, "items.1.id"), Some(&json!(2)));
    }

    #[test]
    fn test_walk_missing_segment() {
        let doc = json!({"status": {}});
        assert_eq!(walk_path(&doc, "status.phase"), None);
        assert_eq!(walk_path(&doc, "spec.replicas"), None);
    }

    #[test]
    fn test_walk_through_scalar_fails() {
        let doc = json!({"name": "c1"});
        assert_eq!(walk_path(&doc, "name.deeper"), None);
    }

    // ------------------------------------------------------------------------
    // Extração por field
    // ------------------------------------------------------------------------

    #[test]
    fn test_extract_field_found() {
        let body = json!({"status": {"phase": "Ready"}});
        let extracted =
            ValueExtractor::extract(&body, &ExtractSpec::Field("status.phase")).unwrap();
        assert!(!extracted.missing);
        assert_eq!(extracted.value, json!("Ready"));
    }

    #[test]
    fn test_extract_field_missing() {
        let body = json!({"status": {}});
        let extracted =
            ValueExtractor::extract(&body, &ExtractSpec::Field("status.phase")).unwrap();
        assert!(extracted.missing);
        assert_eq!(extracted.value, json!(null));
    }

    #[test]
    fn test_extract_field_null_counts_as_missing() {
        let body = json!({"token": null});
        let extracted = ValueExtractor::extract(&body, &ExtractSpec::Field("token")).unwrap();
        assert!(extracted.missing);
    }

    // ------------------------------------------------------------------------
    // Extração por expression
    // ------------------------------------------------------------------------

    #[test]
    fn test_extract_expression_found() {
        let body = json!({"status": {"conditions": [{"type": "Ready", "status": "True"}]}});
        let extracted = ValueExtractor::extract(
            &body,
            &ExtractSpec::Expression("status.conditions[0].status"),
        )
        .unwrap();
        assert!(!extracted.missing);
        assert_eq!(extracted.value, json!("True"));
    }

    #[test]
    fn test_extract_expression_missing_field_is_missing() {
        let body = json!({"status": {}});
        let extracted =
            ValueExtractor::extract(&body, &ExtractSpec::Expression("status.phase")).unwrap();
        assert!(extracted.missing);
    }

    #[test]
    fn test_extract_expression_null_result_is_missing() {
        let body = json!({"status": {"phase": null}});
        let extracted = ValueExtractor::extract(
            &body,
            &ExtractSpec::Expression("status.?phase"),
        )
        .unwrap();
        assert!(extracted.missing);
    }

    #[test]
    fn test_extract_expression_parse_error_is_fatal() {
        let body = json!({"a": 1});
        let result = ValueExtractor::extract(&body, &ExtractSpec::Expression("a == "));
        assert!(matches!(result, Err(EvalError::Parse(_))));
    }

    #[test]
    fn test_extract_expression_overload_is_missing() {
        let body = json!({"a": "text"});
        let extracted =
            ValueExtractor::extract(&body, &ExtractSpec::Expression("a.b.c")).unwrap();
        assert!(extracted.missing);
    }

    #[test]
    fn test_extract_from_non_object_source() {
        let body = json!("just text");
        let extracted =
            ValueExtractor::extract(&body, &ExtractSpec::Expression("anything")).unwrap();
        assert!(extracted.missing);
    }

    #[test]
    fn test_extract_expression_computed_value() {
        let body = json!({"a": 2, "b": 3});
        let extracted =
            ValueExtractor::extract(&body, &ExtractSpec::Expression("a + b")).unwrap();
        assert_eq!(extracted.value, json!(5));
    }
}
