//! # Executor de Log
//!
//! Renderiza a mensagem como template e emite no nível pedido via
//! `tracing`. A única falha possível é de renderização.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::StepExecutor;
use crate::context::ExecutionContext;
use crate::errors::{ErrorReason, StepError};
use crate::expression::template::TemplateEngine;
use crate::protocol::{LogLevel, Step, StepKind, StepResult};

/// Executor responsável pela variante `log`.
pub struct LogExecutor {
    templates: Arc<TemplateEngine>,
}

impl LogExecutor {
    pub fn new(templates: Arc<TemplateEngine>) -> Self {
        Self { templates }
    }
}

#[async_trait]
impl StepExecutor for LogExecutor {
    fn can_handle(&self, kind: StepKind) -> bool {
        kind == StepKind::Log
    }

    async fn execute(
        &self,
        step: &Step,
        context: &mut ExecutionContext,
        _cancel: &CancellationToken,
    ) -> StepResult {
        let Some(spec) = &step.log else {
            return StepResult::failed(
                &step.name,
                StepKind::Log,
                StepError::new(ErrorReason::TemplateError, "step has no log variant"),
            );
        };

        let message = match self.templates.render(&spec.message, context.variables()) {
            Ok(message) => message,
            Err(e) => {
                return StepResult::failed(
                    &step.name,
                    StepKind::Log,
                    StepError::new(ErrorReason::TemplateError, e.to_string()),
                )
            }
        };

        match spec.level {
            LogLevel::Debug => tracing::debug!(step = %step.name, "{}", message),
            LogLevel::Info => tracing::info!(step = %step.name, "{}", message),
            LogLevel::Warn => tracing::warn!(step = %step.name, "{}", message),
            LogLevel::Error => tracing::error!(step = %step.name, "{}", message),
        }

        context.bind(step.name.clone(), Value::String(message.clone()));
        StepResult::success(&step.name, StepKind::Log, Some(Value::String(message)))
    }
}
