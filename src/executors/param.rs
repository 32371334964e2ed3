//! # Executor de Param - Extração de Parâmetros
//!
//! Resolve um valor de uma das fontes possíveis e o liga no ambiente
//! sob o nome do step.
//!
//! ## Fontes:
//!
//! | Fonte | Resolução |
//! |---|---|
//! | `source: "event.<path>"` | Lookup pontilhado no payload do evento |
//! | `source: "env.<NAME>"` | Variável de ambiente (via `EnvSource`) |
//! | `value` | Literal |
//! | `expression` | Expressão avaliada contra o ambiente |
//!
//! Fonte ausente usa o `default`; sem default, o step falha com
//! `MissingParam`. Depois da resolução, a coerção `as:` é aplicada;
//! uma conversão impossível falha com `TypeCoercion`.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

use super::StepExecutor;
use crate::clients::EnvSource;
use crate::context::ExecutionContext;
use crate::errors::{ErrorReason, StepError};
use crate::expression::{cel, coerce};
use crate::extractors::walk_path;
use crate::protocol::{ParamStep, Step, StepKind, StepResult};

/// Executor responsável pela variante `param`.
pub struct ParamExecutor {
    env_source: Arc<dyn EnvSource>,
}

impl ParamExecutor {
    pub fn new(env_source: Arc<dyn EnvSource>) -> Self {
        Self { env_source }
    }

    /// Resolve a fonte declarada, aplicando o default quando a fonte
    /// não produz valor.
    fn resolve(
        &self,
        spec: &ParamStep,
        context: &ExecutionContext,
    ) -> Result<Value, StepError> {
        if let Some(source) = &spec.source {
            if let Some(path) = source.strip_prefix("event.") {
                return match walk_path(context.event(), path) {
                    Some(value) if !value.is_null() => Ok(value.clone()),
                    _ => self.fallback(spec, || {
                        format!("event field '{}' not found and no default set", path)
                    }),
                };
            }
            if let Some(name) = source.strip_prefix("env.") {
                return match self.env_source.get(name) {
                    Some(value) => Ok(Value::String(value)),
                    None => self.fallback(spec, || {
                        format!(
                            "environment variable '{}' not set and no default set",
                            name
                        )
                    }),
                };
            }
            return Err(StepError::new(
                ErrorReason::MissingParam,
                format!("unknown param source '{}'", source),
            ));
        }

        if let Some(value) = &spec.value {
            return Ok(value.clone());
        }

        if let Some(expression) = &spec.expression {
            return match cel::evaluate(expression, context.variables()) {
                Ok(Value::Null) => self.fallback(spec, || {
                    format!("expression '{}' evaluated to null", expression)
                }),
                Ok(value) => Ok(value),
                Err(e) if e.is_missing() => self.fallback(spec, || {
                    format!("expression '{}': {}", expression, e)
                }),
                Err(e) => Err(StepError::new(
                    ErrorReason::MissingParam,
                    format!("expression '{}': {}", expression, e),
                )),
            };
        }

        Err(StepError::new(
            ErrorReason::MissingParam,
            "param step has no source, value or expression",
        ))
    }

    fn fallback(
        &self,
        spec: &ParamStep,
        message: impl FnOnce() -> String,
    ) -> Result<Value, StepError> {
        match &spec.default {
            Some(default) => Ok(default.clone()),
            None => Err(StepError::new(ErrorReason::MissingParam, message())),
        }
    }
}

#[async_trait]
impl StepExecutor for ParamExecutor {
    fn can_handle(&self, kind: StepKind) -> bool {
        kind == StepKind::Param
    }

    async fn execute(
        &self,
        step: &Step,
        context: &mut ExecutionContext,
        _cancel: &CancellationToken,
    ) -> StepResult {
        let start = Instant::now();
        let Some(spec) = &step.param else {
            return StepResult::failed(
                &step.name,
                StepKind::Param,
                StepError::new(ErrorReason::MissingParam, "step has no param variant"),
            );
        };

        let resolved = match self.resolve(spec, context) {
            Ok(value) => value,
            Err(error) => return StepResult::failed(&step.name, StepKind::Param, error),
        };

        let value = match spec.coerce {
            Some(target) => match coerce(&resolved, target) {
                Ok(value) => value,
                Err(e) => {
                    return StepResult::failed(
                        &step.name,
                        StepKind::Param,
                        StepError::new(ErrorReason::TypeCoercion, e.0),
                    )
                }
            },
            None => resolved,
        };

        tracing::debug!(step = %step.name, value = %value, "param resolved");
        context.bind(step.name.clone(), value.clone());

        StepResult::success(&step.name, StepKind::Param, Some(value))
            .with_duration(start.elapsed().as_millis() as u64)
    }
}
