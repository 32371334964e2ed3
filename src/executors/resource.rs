//! # Executor de Resource
//!
//! Fino de propósito: o trabalho de verdade vive no reconciliador.
//! Este executor delega, e em caso de sucesso liga o objeto resultante
//! duas vezes: sob `resources.<step>` (raiz dedicada) e sob o próprio
//! nome do step (regra geral de binding de resultado).

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

use super::StepExecutor;
use crate::clients::resource::ResourceClient;
use crate::context::ExecutionContext;
use crate::errors::{ErrorReason, StepError};
use crate::expression::template::TemplateEngine;
use crate::protocol::{Step, StepKind, StepResult};
use crate::reconciler::ResourceReconciler;

/// Executor responsável pela variante `resource`.
pub struct ResourceExecutor {
    resources: Arc<dyn ResourceClient>,
    templates: Arc<TemplateEngine>,
}

impl ResourceExecutor {
    pub fn new(resources: Arc<dyn ResourceClient>, templates: Arc<TemplateEngine>) -> Self {
        Self {
            resources,
            templates,
        }
    }
}

#[async_trait]
impl StepExecutor for ResourceExecutor {
    fn can_handle(&self, kind: StepKind) -> bool {
        kind == StepKind::Resource
    }

    #[tracing::instrument(name = "resource", skip_all, fields(step = %step.name))]
    async fn execute(
        &self,
        step: &Step,
        context: &mut ExecutionContext,
        cancel: &CancellationToken,
    ) -> StepResult {
        let start = Instant::now();
        let Some(spec) = &step.resource else {
            return StepResult::failed(
                &step.name,
                StepKind::Resource,
                StepError::new(ErrorReason::ValidationError, "step has no resource variant"),
            );
        };

        let reconciler = ResourceReconciler::new(&self.templates, self.resources.as_ref());
        match reconciler
            .reconcile(&step.name, spec, context.variables(), cancel)
            .await
        {
            Ok(outcome) => {
                context.bind_resource(&step.name, outcome.bound.clone());
                context.bind(step.name.clone(), outcome.bound.clone());

                StepResult::success(&step.name, StepKind::Resource, Some(outcome.bound))
                    .with_duration(start.elapsed().as_millis() as u64)
            }
            Err(error) => StepResult::failed(&step.name, StepKind::Resource, error)
                .with_duration(start.elapsed().as_millis() as u64),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::resource::RecordingResourceClient;
    use crate::clients::FixedClock;
    use crate::protocol::{Discovery, ResourceStep, StepStatus};
    use crate::reconciler::GENERATION_ANNOTATION;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn templates() -> Arc<TemplateEngine> {
        let instant = Utc.with_ymd_and_hms(2024, 3, 15, 12, 0, 0).unwrap();
        Arc::new(TemplateEngine::new(Arc::new(FixedClock::new(instant))))
    }

    fn resource_step() -> Step {
        Step {
            name: "applyConfig".to_string(),
            when: None,
            param: None,
            api_call: None,
            resource: Some(ResourceStep {
                manifest: Some(json!({
                    "apiVersion": "v1",
                    "kind": "ConfigMap",
                    "metadata": {
                        "name": "cm-{{ .clusterId }}",
                        "namespace": "default",
                        "annotations": { GENERATION_ANNOTATION: "1" }
                    }
                })),
                manifests: vec![],
                discovery: Discovery {
                    by_name: Some("cm-{{ .clusterId }}".to_string()),
                    by_selectors: None,
                    namespace: Some("default".to_string()),
                },
                recreate_on_change: false,
            }),
            payload: None,
            log: None,
        }
    }

    #[tokio::test]
    async fn test_success_binds_resource_root_and_step_name() {
        let client = Arc::new(RecordingResourceClient::new());
        let executor = ResourceExecutor::new(client, templates());
        let mut ctx = ExecutionContext::new(json!({"name": "test"}), json!({}));
        ctx.bind("clusterId", json!("c1"));

        let result = executor
            .execute(&resource_step(), &mut ctx, &CancellationToken::new())
            .await;

        assert_eq!(result.status, StepStatus::Success);
        assert_eq!(
            ctx.get("resources").unwrap()["applyConfig"]["metadata"]["name"],
            json!("cm-c1")
        );
        assert_eq!(
            ctx.get("applyConfig").unwrap()["metadata"]["name"],
            json!("cm-c1")
        );
    }

    #[tokio::test]
    async fn test_failure_binds_nothing() {
        let client = Arc::new(RecordingResourceClient::new());
        let executor = ResourceExecutor::new(client, templates());
        let mut ctx = ExecutionContext::new(json!({"name": "test"}), json!({}));
        // clusterId não ligado → TemplateError no manifesto.

        let result = executor
            .execute(&resource_step(), &mut ctx, &CancellationToken::new())
            .await;

        assert_eq!(result.status, StepStatus::Failed);
        assert_eq!(result.error.unwrap().reason, ErrorReason::TemplateError);
        assert_eq!(ctx.get("resources").unwrap(), &json!({}));
        assert!(ctx.get("applyConfig").is_none());
    }
}
