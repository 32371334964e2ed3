//! # Executor de Payload - Construção de Documentos JSON
//!
//! Percorre a árvore declarada no step e materializa um documento:
//!
//! - Mapa com forma de ValueDef (`{field|expression, default}`):
//!   extrai do ambiente; ausente usa o `default`; erro de avaliação é
//!   fatal (`PayloadError`)
//! - Mapa comum: recursão chave a chave (chaves também são templates)
//! - Lista: recursão elemento a elemento
//! - String: renderizada como template
//! - Demais folhas: passam como estão
//!
//! O documento final é serializado e o step liga a **string** JSON sob
//! o próprio nome, para que templates posteriores possam embuti-la
//! (`{{ .meuPayload }}` dentro de um body de ApiCall, por exemplo).

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

use super::StepExecutor;
use crate::context::ExecutionContext;
use crate::errors::{ErrorReason, StepError};
use crate::expression::template::TemplateEngine;
use crate::extractors::{ExtractSpec, ValueExtractor};
use crate::protocol::{Step, StepKind, StepResult};

/// Executor responsável pela variante `payload`.
pub struct PayloadExecutor {
    templates: Arc<TemplateEngine>,
}

impl PayloadExecutor {
    pub fn new(templates: Arc<TemplateEngine>) -> Self {
        Self { templates }
    }

    fn build_node(
        &self,
        node: &Value,
        env: &HashMap<String, Value>,
        source: &Value,
    ) -> Result<Value, StepError> {
        match node {
            Value::Object(map) => {
                if let Some(value_def) = as_value_def(map) {
                    return self.extract_value_def(&value_def, source);
                }
                let mut built = Map::with_capacity(map.len());
                for (key, child) in map {
                    let rendered_key = self
                        .templates
                        .render(key, env)
                        .map_err(|e| StepError::new(ErrorReason::TemplateError, e.to_string()))?;
                    built.insert(rendered_key, self.build_node(child, env, source)?);
                }
                Ok(Value::Object(built))
            }
            Value::Array(items) => {
                let mut built = Vec::with_capacity(items.len());
                for item in items {
                    built.push(self.build_node(item, env, source)?);
                }
                Ok(Value::Array(built))
            }
            Value::String(template) => self
                .templates
                .render(template, env)
                .map(Value::String)
                .map_err(|e| StepError::new(ErrorReason::TemplateError, e.to_string())),
            other => Ok(other.clone()),
        }
    }

    fn extract_value_def(
        &self,
        value_def: &ValueDef,
        source: &Value,
    ) -> Result<Value, StepError> {
        let spec = match value_def {
            ValueDef {
                field: Some(field), ..
            } => ExtractSpec::Field(field),
            ValueDef {
                expression: Some(expression),
                ..
            } => ExtractSpec::Expression(expression),
            _ => {
                return Err(StepError::new(
                    ErrorReason::PayloadError,
                    "value definition has neither field nor expression",
                ))
            }
        };

        match ValueExtractor::extract(source, &spec) {
            Ok(extracted) if extracted.missing => Ok(value_def
                .default
                .clone()
                .unwrap_or(Value::Null)),
            Ok(extracted) => Ok(extracted.value),
            Err(e) => Err(StepError::new(ErrorReason::PayloadError, e.to_string())),
        }
    }
}

/// Forma de uma folha `{field|expression, default}`.
struct ValueDef {
    field: Option<String>,
    expression: Option<String>,
    default: Option<Value>,
}

/// Reconhece um mapa com forma de ValueDef: tem `field` ou
/// `expression`, e nenhuma chave fora de `{field, expression, default}`.
fn as_value_def(map: &Map<String, Value>) -> Option<ValueDef> {
    if !map.contains_key("field") && !map.contains_key("expression") {
        return None;
    }
    if map
        .keys()
        .any(|key| !matches!(key.as_str(), "field" | "expression" | "default"))
    {
        return None;
    }
    Some(ValueDef {
        field: map.get("field").and_then(Value::as_str).map(String::from),
        expression: map
            .get("expression")
            .and_then(Value::as_str)
            .map(String::from),
        default: map.get("default").cloned(),
    })
}

#[async_trait]
impl StepExecutor for PayloadExecutor {
    fn can_handle(&self, kind: StepKind) -> bool {
        kind == StepKind::Payload
    }

    async fn execute(
        &self,
        step: &Step,
        context: &mut ExecutionContext,
        _cancel: &CancellationToken,
    ) -> StepResult {
        let start = Instant::now();
        let Some(tree) = &step.payload else {
            return StepResult::failed(
                &step.name,
                StepKind::Payload,
                StepError::new(ErrorReason::PayloadError, "step has no payload variant"),
            );
        };

        // O ambiente inteiro vira a fonte das extrações field/expression.
        let source = Value::Object(
            context
                .variables()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        );

        let built = match self.build_node(tree, context.variables(), &source) {
            Ok(built) => built,
            Err(error) => {
                return StepResult::failed(&step.name, StepKind::Payload, error)
                    .with_duration(start.elapsed().as_millis() as u64)
            }
        };

        let serialized = match serde_json::to_string(&built) {
            Ok(serialized) => serialized,
            Err(e) => {
                return StepResult::failed(
                    &step.name,
                    StepKind::Payload,
                    StepError::new(ErrorReason::PayloadError, e.to_string()),
                )
            }
        };

        tracing::debug!(step = %step.name, payload = %serialized, "payload built");
        context.bind(step.name.clone(), Value::String(serialized.clone()));

        StepResult::success(&step.name, StepKind::Payload, Some(Value::String(serialized)))
            .with_duration(start.elapsed().as_millis() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::FixedClock;
    use crate::protocol::StepStatus;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn executor() -> PayloadExecutor {
        let instant = Utc.with_ymd_and_hms(2024, 3, 15, 12, 0, 0).unwrap();
        PayloadExecutor::new(Arc::new(TemplateEngine::new(Arc::new(FixedClock::new(
            instant,
        )))))
    }

    fn payload_step(tree: Value) -> Step {
        Step {
            name: "myPayload".to_string(),
            when: None,
            param: None,
            api_call: None,
            resource: None,
            payload: Some(tree),
            log: None,
        }
    }

    fn context() -> ExecutionContext {
        let mut ctx = ExecutionContext::new(json!({"name": "test"}), json!({}));
        ctx.bind(
            "cluster",
            json!({"status": {"conditions": [{"type": "Ready", "status": "True"}]}}),
        );
        ctx.bind("clusterId", json!("c1"));
        ctx
    }

    async fn run(tree: Value) -> (StepResult, ExecutionContext) {
        let mut ctx = context();
        let result = executor()
            .execute(&payload_step(tree), &mut ctx, &CancellationToken::new())
            .await;
        (result, ctx)
    }

    #[tokio::test]
    async fn test_extraction_with_default() {
        let (result, ctx) = run(json!({
            "ready": { "expression": "cluster.status.conditions[0].status", "default": "Unknown" },
            "missing": { "field": "cluster.nonexistent.path", "default": "fallback" }
        }))
        .await;

        assert_eq!(result.status, StepStatus::Success);
        let bound = ctx.get("myPayload").unwrap().as_str().unwrap();
        let parsed: Value = serde_json::from_str(bound).unwrap();
        assert_eq!(parsed, json!({"ready": "True", "missing": "fallback"}));
    }

    #[tokio::test]
    async fn test_missing_without_default_is_null() {
        let (result, _) = run(json!({
            "gone": { "field": "cluster.nope" }
        }))
        .await;

        let parsed: Value =
            serde_json::from_str(result.result.unwrap().as_str().unwrap()).unwrap();
        assert_eq!(parsed, json!({"gone": null}));
    }

    #[tokio::test]
    async fn test_templates_in_strings_and_keys() {
        let (result, _) = run(json!({
            "cluster-{{ .clusterId }}": {
                "id": "{{ .clusterId }}",
                "fixed": 42
            }
        }))
        .await;

        let parsed: Value =
            serde_json::from_str(result.result.unwrap().as_str().unwrap()).unwrap();
        assert_eq!(parsed, json!({"cluster-c1": {"id": "c1", "fixed": 42}}));
    }

    #[tokio::test]
    async fn test_lists_recurse() {
        let (result, _) = run(json!({
            "items": ["{{ .clusterId }}", {"field": "clusterId"}, true]
        }))
        .await;

        let parsed: Value =
            serde_json::from_str(result.result.unwrap().as_str().unwrap()).unwrap();
        assert_eq!(parsed, json!({"items": ["c1", "c1", true]}));
    }

    #[tokio::test]
    async fn test_map_with_extra_keys_is_not_value_def() {
        // "field" + chave estranha: trata como mapa comum.
        let (result, _) = run(json!({
            "obj": { "field": "clusterId", "other": "x" }
        }))
        .await;

        let parsed: Value =
            serde_json::from_str(result.result.unwrap().as_str().unwrap()).unwrap();
        assert_eq!(parsed, json!({"obj": {"field": "clusterId", "other": "x"}}));
    }

    #[tokio::test]
    async fn test_expression_error_is_fatal() {
        let (result, ctx) = run(json!({
            "broken": { "expression": "cluster == " }
        }))
        .await;

        assert_eq!(result.status, StepStatus::Failed);
        assert_eq!(result.error.unwrap().reason, ErrorReason::PayloadError);
        assert!(ctx.get("myPayload").is_none());
    }

    #[tokio::test]
    async fn test_unbound_template_is_template_error() {
        let (result, _) = run(json!({"x": "{{ .missingVar }}"})).await;

        assert_eq!(result.status, StepStatus::Failed);
        assert_eq!(result.error.unwrap().reason, ErrorReason::TemplateError);
    }

    #[tokio::test]
    async fn test_literal_tree_round_trips() {
        let tree = json!({"a": [1, 2.5, null, {"b": false}]});
        let (result, _) = run(tree.clone()).await;

        let parsed: Value =
            serde_json::from_str(result.result.unwrap().as_str().unwrap()).unwrap();
        assert_eq!(parsed, tree);
    }
}
