//! # Runner - Orquestração Sequencial do Pipeline
//!
//! Executa os steps na ordem de declaração, um por vez. Para cada step:
//!
//! 1. Avalia a condição `when` (ausente = true). Erro de avaliação
//!    marca o step como `failed/ConditionError`.
//! 2. `when` falso registra `skipped/WhenFalse` e segue adiante.
//! 3. Despacha para o executor da variante.
//! 4. Registra o `StepResult` no contexto (lista ordenada + mapa).
//! 5. Em falha: liga `adapter.executionStatus=failed` e
//!    `adapter.executionError={step,message}` e **para** - nenhum step
//!    posterior executa. Relatório pós-falha é trabalho do host (um
//!    segundo pipeline); o status fica exposto no ambiente para que
//!    guardas como `adapter.executionStatus == "success"` avaliem
//!    corretamente no caminho feliz.
//!
//! ## Concorrência
//!
//! Dentro de um evento a execução é estritamente sequencial e
//! single-threaded. Entre eventos, o runner pode ser invocado
//! concorrentemente desde que cada invocação receba o seu próprio
//! `ExecutionContext`; os clientes injetados podem ser compartilhados
//! e precisam ser thread-safe por conta própria.
//!
//! ## Cancelamento
//!
//! O token é observado entre steps (o step que ia executar é marcado
//! `failed/Canceled`) e propagado para dentro das chamadas de I/O.
//! Um recurso parcialmente aplicado não sofre rollback.

use tokio_util::sync::CancellationToken;

use crate::context::ExecutionContext;
use crate::errors::{ErrorReason, StepError};
use crate::executors::StepExecutor;
use crate::expression::cel;
use crate::protocol::{
    ExecutionError, ExecutionResult, ExecutionStatus, SkipReason, Step, StepKind, StepResult,
};

/// Orquestrador de um pipeline de steps.
pub struct StepRunner {
    steps: Vec<Step>,
    executors: Vec<Box<dyn StepExecutor>>,
}

impl StepRunner {
    pub fn new(steps: Vec<Step>, executors: Vec<Box<dyn StepExecutor>>) -> Self {
        Self { steps, executors }
    }

    /// Executa o pipeline inteiro para um evento.
    ///
    /// O contexto chega recém-criado (metadados + payload do evento) e
    /// é consumido; o snapshot final do ambiente volta dentro do
    /// `ExecutionResult`.
    pub async fn execute(
        &self,
        mut context: ExecutionContext,
        cancel: &CancellationToken,
    ) -> ExecutionResult {
        let mut first_error: Option<ExecutionError> = None;

        for step in &self.steps {
            let kind = step.kind().unwrap_or(StepKind::Log);

            // Cancelamento entre steps: o step que ia rodar vira o
            // portador do Canceled e o pipeline termina.
            if cancel.is_cancelled() {
                let result = StepResult::failed(
                    &step.name,
                    kind,
                    StepError::new(ErrorReason::Canceled, "execution canceled between steps"),
                );
                first_error = Some(self.record_failure(&mut context, result));
                break;
            }

            // Condição `when`: ausente é true.
            if let Some(when) = &step.when {
                match cel::evaluate_condition(when, context.variables()) {
                    Ok(true) => {}
                    Ok(false) => {
                        tracing::debug!(step = %step.name, "when evaluated false, skipping");
                        // Steps posteriores podem ler `<nome>.skipped`;
                        // o resultado em si nunca é ligado.
                        context.bind(step.name.clone(), serde_json::json!({ "skipped": true }));
                        context.record_result(StepResult::skipped(
                            &step.name,
                            kind,
                            SkipReason::WhenFalse,
                        ));
                        continue;
                    }
                    Err(e) => {
                        let result = StepResult::failed(
                            &step.name,
                            kind,
                            StepError::new(
                                ErrorReason::ConditionError,
                                format!("when '{}': {}", when, e),
                            ),
                        );
                        first_error = Some(self.record_failure(&mut context, result));
                        break;
                    }
                }
            }

            // Despacho para o executor da variante.
            let executor = self.executors.iter().find(|e| e.can_handle(kind));
            let result = match executor {
                Some(executor) => executor.execute(step, &mut context, cancel).await,
                None => StepResult::failed(
                    &step.name,
                    kind,
                    StepError::new(
                        ErrorReason::ValidationError,
                        format!("no executor for step variant '{}'", kind.as_str()),
                    ),
                ),
            };

            tracing::info!(
                step = %step.name,
                step_type = kind.as_str(),
                status = ?result.status,
                duration_ms = result.duration_ms,
                "step finished"
            );

            match result.status {
                crate::protocol::StepStatus::Failed => {
                    first_error = Some(self.record_failure(&mut context, result));
                    break;
                }
                _ => context.record_result(result),
            }
        }

        let status = if first_error.is_some() {
            ExecutionStatus::Failed
        } else {
            ExecutionStatus::Success
        };

        ExecutionResult {
            status,
            steps: context.results_in_order(),
            error: first_error,
            environment: context.environment_snapshot(),
        }
    }

    /// Registra um resultado de falha e atualiza o estado do adapter.
    fn record_failure(
        &self,
        context: &mut ExecutionContext,
        result: StepResult,
    ) -> ExecutionError {
        let reason = result
            .error
            .as_ref()
            .map(|e| e.reason.as_str())
            .unwrap_or("Unknown");
        let error = ExecutionError {
            step: result.name.clone(),
            message: result
                .error
                .as_ref()
                .map(|e| e.message.clone())
                .unwrap_or_default(),
        };

        tracing::error!(
            step = %error.step,
            reason = %reason,
            error = %error.message,
            "step failed, halting pipeline"
        );

        // O erro fica legível como `<nome>.error` (o resultado nunca é
        // ligado para um step que falhou).
        context.bind(
            error.step.clone(),
            serde_json::json!({
                "skipped": false,
                "error": { "reason": reason, "message": error.message }
            }),
        );
        context.mark_failed(&error, reason);
        context.record_result(result);
        error
    }
}
