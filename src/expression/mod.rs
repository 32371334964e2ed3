//! # Módulo de Expressões
//!
//! Abriga as duas linguagens avaliadas contra o ambiente de execução:
//!
//! - **Templates** (`template`): interpolação de texto com delimitadores
//!   `{{ }}`, caminhos pontilhados e filtros encadeados por pipe.
//! - **Expressões** (`cel`): linguagem de valores e booleanos no estilo
//!   CEL, usada em `when`, em params/captures/payloads com `expression`
//!   e pelo extrator de valores.
//!
//! As coerções de tipo ficam aqui porque são compartilhadas: o filtro
//! `int` de um template e o `as: int` de um ParamStep aplicam as mesmas
//! regras.

pub mod cel;
pub mod template;

use serde_json::Value;
use thiserror::Error;

use crate::protocol::CoerceTarget;

/// Falha de coerção de tipo.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct CoerceError(pub String);

// ============================================================================
// COERÇÕES
// ============================================================================

/// Converte um valor para o tipo alvo.
///
/// Regras:
/// - string → int/int64/float: parse decimal (string vazia é erro)
/// - string → bool: aceita true/false/yes/no/on/off/1/0, caso-insensitivo
/// - bool → int: 0 ou 1
/// - número → string: forma decimal mínima
/// - qualquer outra combinação é erro
pub fn coerce(value: &Value, target: CoerceTarget) -> Result<Value, CoerceError> {
    match target {
        CoerceTarget::String => coerce_to_string(value),
        CoerceTarget::Int | CoerceTarget::Int64 => coerce_to_int(value),
        CoerceTarget::Float64 => coerce_to_float(value),
        CoerceTarget::Bool => coerce_to_bool(value),
    }
}

fn coerce_to_string(value: &Value) -> Result<Value, CoerceError> {
    match value {
        Value::String(_) => Ok(value.clone()),
        Value::Number(n) => Ok(Value::String(n.to_string())),
        Value::Bool(b) => Ok(Value::String(b.to_string())),
        other => Err(CoerceError(format!(
            "cannot coerce {} to string",
            type_name(other)
        ))),
    }
}

fn coerce_to_int(value: &Value) -> Result<Value, CoerceError> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return Err(CoerceError("cannot coerce empty string to int".to_string()));
            }
            trimmed
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| CoerceError(format!("cannot coerce string '{}' to int", s)))
        }
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Value::from(i))
            } else if let Some(f) = n.as_f64() {
                if f.fract() == 0.0 && f.is_finite() {
                    Ok(Value::from(f as i64))
                } else {
                    Err(CoerceError(format!("cannot coerce {} to int", f)))
                }
            } else {
                Err(CoerceError("cannot coerce number to int".to_string()))
            }
        }
        Value::Bool(b) => Ok(Value::from(i64::from(*b))),
        other => Err(CoerceError(format!(
            "cannot coerce {} to int",
            type_name(other)
        ))),
    }
}

fn coerce_to_float(value: &Value) -> Result<Value, CoerceError> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return Err(CoerceError(
                    "cannot coerce empty string to float64".to_string(),
                ));
            }
            let parsed = trimmed
                .parse::<f64>()
                .map_err(|_| CoerceError(format!("cannot coerce string '{}' to float64", s)))?;
            serde_json::Number::from_f64(parsed)
                .map(Value::Number)
                .ok_or_else(|| CoerceError(format!("'{}' is not a finite float64", s)))
        }
        Value::Number(n) => {
            let f = n
                .as_f64()
                .ok_or_else(|| CoerceError("cannot coerce number to float64".to_string()))?;
            serde_json::Number::from_f64(f)
                .map(Value::Number)
                .ok_or_else(|| CoerceError("not a finite float64".to_string()))
        }
        other => Err(CoerceError(format!(
            "cannot coerce {} to float64",
            type_name(other)
        ))),
    }
}

fn coerce_to_bool(value: &Value) -> Result<Value, CoerceError> {
    match value {
        Value::Bool(_) => Ok(value.clone()),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "yes" | "on" | "1" => Ok(Value::Bool(true)),
            "false" | "no" | "off" | "0" => Ok(Value::Bool(false)),
            _ => Err(CoerceError(format!("cannot coerce string '{}' to bool", s))),
        },
        other => Err(CoerceError(format!(
            "cannot coerce {} to bool",
            type_name(other)
        ))),
    }
}

/// Nome do tipo JSON de um valor, para mensagens de erro.
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "map",
    }
}

/// Forma textual de um valor para saída de template.
///
/// Strings são usadas como estão, números e bools na forma mínima,
/// null vira string vazia, listas e mapas são serializados como JSON.
pub fn display_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_string_to_int() {
        assert_eq!(coerce(&json!("42"), CoerceTarget::Int).unwrap(), json!(42));
        assert_eq!(
            coerce(&json!(" -7 "), CoerceTarget::Int64).unwrap(),
            json!(-7)
        );
    }

    #[test]
    fn test_empty_string_to_int_is_error() {
        assert!(coerce(&json!(""), CoerceTarget::Int).is_err());
        assert!(coerce(&json!("   "), CoerceTarget::Int).is_err());
    }

    #[test]
    fn test_string_to_float() {
        assert_eq!(
            coerce(&json!("2.5"), CoerceTarget::Float64).unwrap(),
            json!(2.5)
        );
    }

    #[test]
    fn test_bool_words() {
        for truthy in ["true", "YES", "On", "1"] {
            assert_eq!(
                coerce(&json!(truthy), CoerceTarget::Bool).unwrap(),
                json!(true)
            );
        }
        for falsy in ["false", "no", "OFF", "0"] {
            assert_eq!(
                coerce(&json!(falsy), CoerceTarget::Bool).unwrap(),
                json!(false)
            );
        }
        assert!(coerce(&json!("maybe"), CoerceTarget::Bool).is_err());
    }

    #[test]
    fn test_bool_to_int() {
        assert_eq!(coerce(&json!(true), CoerceTarget::Int).unwrap(), json!(1));
        assert_eq!(coerce(&json!(false), CoerceTarget::Int).unwrap(), json!(0));
    }

    #[test]
    fn test_number_to_string_minimal_form() {
        assert_eq!(
            coerce(&json!(3), CoerceTarget::String).unwrap(),
            json!("3")
        );
        assert_eq!(
            coerce(&json!(2.5), CoerceTarget::String).unwrap(),
            json!("2.5")
        );
    }

    #[test]
    fn test_float_with_fraction_to_int_is_error() {
        assert!(coerce(&json!(2.5), CoerceTarget::Int).is_err());
        assert_eq!(coerce(&json!(2.0), CoerceTarget::Int).unwrap(), json!(2));
    }

    #[test]
    fn test_unsupported_coercions() {
        assert!(coerce(&json!([1, 2]), CoerceTarget::String).is_err());
        assert!(coerce(&json!({"a": 1}), CoerceTarget::Int).is_err());
        assert!(coerce(&json!(null), CoerceTarget::Bool).is_err());
        assert!(coerce(&json!(true), CoerceTarget::Float64).is_err());
    }

    #[test]
    fn test_display_string() {
        assert_eq!(display_string(&json!("x")), "x");
        assert_eq!(display_string(&json!(3)), "3");
        assert_eq!(display_string(&json!(null)), "");
        assert_eq!(display_string(&json!([1, 2])), "[1,2]");
    }
}
