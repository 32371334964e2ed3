//! # Reconciliador de Recursos
//!
//! Compara o recurso **desejado** (manifesto renderizado) com o estado
//! **observado** (objeto descoberto no backend) e decide a operação.
//!
//! ## Fluxo de reconciliação:
//!
//! ```text
//! ┌────────────┐    ┌────────────┐    ┌────────────┐    ┌────────────┐
//! │ 1. Build   │    │ 2. Discover│    │ 3. Decide  │    │ 4. Execute │
//! │  desired   │ →  │  existing  │ →  │  operation │ →  │  + bind    │
//! └────────────┘    └────────────┘    └────────────┘    └────────────┘
//! ```
//!
//! ## A anotação de geração
//!
//! Todo recurso gerenciado carrega
//! `metadata.annotations["hyperfleet.io/generation"]`, um inteiro
//! decimal monotônico. A decisão compara a geração desejada (Gd) com a
//! observada (Ge):
//!
//! | Estado | Operação | Motivo |
//! |---|---|---|
//! | ausente | create | "resource not found" |
//! | Gd > Ge | update (ou recreate) | "generation changed from Ge to Gd" |
//! | Gd == Ge | skip | "generation unchanged" |
//! | Gd < Ge | skip | "observed generation is newer" |
//!
//! Com `recreateOnChange`, o update vira delete + create. O delete é
//! best-effort: `NotFound` não aborta, qualquer outro erro sim.
//!
//! ## Campos de posse do servidor
//!
//! Em um update, `metadata.resourceVersion` e `metadata.uid` do objeto
//! observado são copiados para o desejado antes da chamada.
//!
//! ## Descoberta
//!
//! - `byName`: busca direta; `NotFound` significa ausente, não erro.
//! - `bySelectors`: lista por labels e escolhe o objeto de **maior**
//!   geração; empate desempata por `resourceVersion` (numérico,
//!   decrescente), senão ordem do servidor.

use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use tokio_util::sync::CancellationToken;

use crate::clients::resource::{
    normalize_namespace, object_name, object_namespace, resource_version, GroupVersionKind,
    ResourceClient, ResourceError,
};
use crate::errors::{ErrorReason, StepError};
use crate::expression::template::TemplateEngine;
use crate::protocol::{Discovery, ResourceStep};

/// Anotação que carrega a geração de um recurso gerenciado.
pub const GENERATION_ANNOTATION: &str = "hyperfleet.io/generation";

// ============================================================================
// OPERAÇÃO E DESFECHO
// ============================================================================

/// Operação decidida pela reconciliação.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    Update,
    Recreate,
    Skip,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Recreate => "recreate",
            Operation::Skip => "skip",
        }
    }
}

/// Desfecho de uma reconciliação bem sucedida.
#[derive(Debug)]
pub struct ReconcileOutcome {
    /// Operação executada.
    pub operation: Operation,

    /// Motivo legível da decisão.
    pub reason: String,

    /// Objeto a ligar sob `resources.<step>`: o objeto pós-aplicação,
    /// o observado em caso de skip, ou o mapa de constituintes quando o
    /// step é um bundle aplicado.
    pub bound: Value,
}

// ============================================================================
// RECONCILIADOR
// ============================================================================

/// Reconciliador de um step de recurso.
pub struct ResourceReconciler<'a> {
    templates: &'a TemplateEngine,
    client: &'a dyn ResourceClient,
}

impl<'a> ResourceReconciler<'a> {
    pub fn new(templates: &'a TemplateEngine, client: &'a dyn ResourceClient) -> Self {
        Self { templates, client }
    }

    /// Executa a reconciliação completa de um step.
    pub async fn reconcile(
        &self,
        step_name: &str,
        spec: &ResourceStep,
        env: &HashMap<String, Value>,
        cancel: &CancellationToken,
    ) -> Result<ReconcileOutcome, StepError> {
        // ====================================================================
        // PASSO 1: CONSTRUIR O DESEJADO
        // ====================================================================
        // render_value produz uma árvore nova, então execuções repetidas
        // do mesmo step nunca compartilham estado com o manifesto da
        // configuração.

        let bundle = !spec.manifests.is_empty();
        let mut desired_bundle: Vec<(String, Value)> = Vec::new();

        let desired = if bundle {
            for named in &spec.manifests {
                let rendered = self.build_desired(&named.manifest, env)?;
                desired_bundle.push((named.name.clone(), rendered));
            }
            // Representante do bundle para descoberta e decisão.
            desired_bundle[0].1.clone()
        } else {
            let manifest = spec.manifest.as_ref().ok_or_else(|| {
                StepError::new(
                    ErrorReason::ValidationError,
                    "resource step has no manifest",
                )
            })?;
            self.build_desired(manifest, env)?
        };

        // Geração desejada: a do manifesto, ou a maior do bundle.
        let desired_generation = if bundle {
            desired_bundle
                .iter()
                .filter_map(|(_, m)| generation_of(m))
                .max()
                .unwrap_or(0)
        } else {
            generation_of(&desired).unwrap_or(0)
        };

        let gvk = GroupVersionKind::of(&desired).ok_or_else(|| {
            StepError::new(
                ErrorReason::ValidationError,
                "manifest has no apiVersion/kind",
            )
        })?;

        // ====================================================================
        // PASSO 2: DESCOBRIR O OBSERVADO
        // ====================================================================

        let existing = self
            .discover(&gvk, &spec.discovery, env, cancel)
            .await?;

        // ====================================================================
        // PASSO 3: DECIDIR
        // ====================================================================

        let (operation, reason, existing) = match existing {
            None => (Operation::Create, "resource not found".to_string(), None),
            Some(existing) => {
                let observed_generation = generation_of(&existing).unwrap_or(0);
                if desired_generation > observed_generation {
                    let operation = if spec.recreate_on_change {
                        Operation::Recreate
                    } else {
                        Operation::Update
                    };
                    (
                        operation,
                        format!(
                            "generation changed from {} to {}",
                            observed_generation, desired_generation
                        ),
                        Some(existing),
                    )
                } else if desired_generation == observed_generation {
                    (
                        Operation::Skip,
                        "generation unchanged".to_string(),
                        Some(existing),
                    )
                } else {
                    (
                        Operation::Skip,
                        "observed generation is newer".to_string(),
                        Some(existing),
                    )
                }
            }
        };

        tracing::info!(
            step = %step_name,
            kind = %gvk.kind,
            operation = operation.as_str(),
            reason = %reason,
            "resource reconciliation decided"
        );

        // ====================================================================
        // PASSO 4: EXECUTAR E LIGAR
        // ====================================================================

        let bound = match operation {
            Operation::Skip => existing.unwrap_or(Value::Null),
            Operation::Create => {
                if bundle {
                    self.apply_bundle(&desired_bundle, cancel).await?
                } else {
                    self.call(self.client.create(&desired), cancel, &desired)
                        .await?
                }
            }
            Operation::Update => {
                if bundle {
                    self.apply_bundle(&desired_bundle, cancel).await?
                } else {
                    let mut desired = desired;
                    if let Some(existing) = &existing {
                        copy_server_fields(&mut desired, existing);
                    }
                    self.call(self.client.update(&desired), cancel, &desired)
                        .await?
                }
            }
            Operation::Recreate => {
                // Delete best-effort do observado, depois create.
                if let Some(existing) = &existing {
                    self.delete_existing(existing, cancel).await?;
                }
                if bundle {
                    self.apply_bundle(&desired_bundle, cancel).await?
                } else {
                    self.call(self.client.create(&desired), cancel, &desired)
                        .await?
                }
            }
        };

        Ok(ReconcileOutcome {
            operation,
            reason,
            bound,
        })
    }

    /// Renderiza e valida um manifesto.
    fn build_desired(
        &self,
        manifest: &Value,
        env: &HashMap<String, Value>,
    ) -> Result<Value, StepError> {
        let rendered = self
            .templates
            .render_value(manifest, env)
            .map_err(|e| StepError::new(ErrorReason::TemplateError, e.to_string()))?;

        for field in ["apiVersion", "kind"] {
            let present = rendered
                .get(field)
                .and_then(Value::as_str)
                .map(|s| !s.is_empty())
                .unwrap_or(false);
            if !present {
                return Err(StepError::new(
                    ErrorReason::ValidationError,
                    format!("manifest is missing required field '{}'", field),
                ));
            }
        }
        if object_name(&rendered).map(str::is_empty).unwrap_or(true) {
            return Err(StepError::new(
                ErrorReason::ValidationError,
                "manifest is missing required field 'metadata.name'",
            ));
        }

        match generation_of(&rendered) {
            Some(generation) if generation > 0 => Ok(rendered),
            Some(generation) => Err(StepError::new(
                ErrorReason::ValidationError,
                format!(
                    "annotation '{}' must be a positive integer, got {}",
                    GENERATION_ANNOTATION, generation
                ),
            )),
            None => Err(StepError::new(
                ErrorReason::ValidationError,
                format!(
                    "manifest is missing annotation '{}'",
                    GENERATION_ANNOTATION
                ),
            )),
        }
    }

    /// Descobre o objeto observado por nome ou por selectors.
    async fn discover(
        &self,
        gvk: &GroupVersionKind,
        discovery: &Discovery,
        env: &HashMap<String, Value>,
        cancel: &CancellationToken,
    ) -> Result<Option<Value>, StepError> {
        let namespace = match &discovery.namespace {
            Some(template) => self
                .templates
                .render(template, env)
                .map_err(|e| StepError::new(ErrorReason::TemplateError, e.to_string()))?,
            None => String::new(),
        };
        let namespace = normalize_namespace(&namespace).to_string();

        if let Some(name_template) = &discovery.by_name {
            let name = self
                .templates
                .render(name_template, env)
                .map_err(|e| StepError::new(ErrorReason::TemplateError, e.to_string()))?;

            let fetched = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(ResourceError::Canceled),
                fetched = self.client.get(gvk, &namespace, &name) => fetched,
            };
            return match fetched {
                Ok(object) => Ok(Some(object)),
                Err(ResourceError::NotFound) => Ok(None),
                Err(e) => Err(resource_step_error(e)),
            };
        }

        if let Some(selector_templates) = &discovery.by_selectors {
            let mut selector = BTreeMap::new();
            for (key_template, value_template) in selector_templates {
                let key = self
                    .templates
                    .render(key_template, env)
                    .map_err(|e| StepError::new(ErrorReason::TemplateError, e.to_string()))?;
                let value = self
                    .templates
                    .render(value_template, env)
                    .map_err(|e| StepError::new(ErrorReason::TemplateError, e.to_string()))?;
                selector.insert(key, value);
            }

            let listed = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(ResourceError::Canceled),
                listed = self.client.list(gvk, &namespace, &selector) => listed,
            };
            let objects = listed.map_err(resource_step_error)?;
            return Ok(pick_highest_generation(objects));
        }

        Err(StepError::new(
            ErrorReason::ValidationError,
            "discovery requires byName or bySelectors",
        ))
    }

    /// Executa uma chamada do cliente com cancelamento; em falha, loga o
    /// manifesto renderizado em debug.
    async fn call<F>(
        &self,
        operation: F,
        cancel: &CancellationToken,
        desired: &Value,
    ) -> Result<Value, StepError>
    where
        F: std::future::Future<Output = Result<Value, ResourceError>>,
    {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ResourceError::Canceled),
            result = operation => result,
        };
        result.map_err(|e| {
            tracing::debug!(manifest = %desired, "resource operation failed");
            resource_step_error(e)
        })
    }

    async fn apply_bundle(
        &self,
        bundle: &[(String, Value)],
        cancel: &CancellationToken,
    ) -> Result<Value, StepError> {
        let applied = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ResourceError::Canceled),
            applied = self.client.apply_bundle(bundle) => applied,
        };
        let applied = applied.map_err(resource_step_error)?;

        let mut constituents = Map::new();
        for (manifest_name, object) in applied {
            constituents.insert(manifest_name, object);
        }
        Ok(Value::Object(constituents))
    }

    async fn delete_existing(
        &self,
        existing: &Value,
        cancel: &CancellationToken,
    ) -> Result<(), StepError> {
        let gvk = GroupVersionKind::of(existing).ok_or_else(|| {
            StepError::new(
                ErrorReason::ResourceError,
                "discovered object has no apiVersion/kind",
            )
        })?;
        let name = object_name(existing).unwrap_or_default().to_string();
        let namespace = object_namespace(existing).to_string();

        let deleted = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ResourceError::Canceled),
            deleted = self.client.delete(&gvk, &namespace, &name) => deleted,
        };
        match deleted {
            Ok(()) | Err(ResourceError::NotFound) => Ok(()),
            Err(e) => Err(resource_step_error(e)),
        }
    }
}

// ============================================================================
// HELPERS
// ============================================================================

/// Lê a anotação de geração de um objeto como inteiro.
pub fn generation_of(object: &Value) -> Option<i64> {
    object
        .get("metadata")?
        .get("annotations")?
        .get(GENERATION_ANNOTATION)?
        .as_str()?
        .trim()
        .parse()
        .ok()
}

/// Escolhe o objeto de maior geração; empate por `resourceVersion`
/// numérico decrescente; persistindo o empate, fica o primeiro na
/// ordem do servidor.
fn pick_highest_generation(objects: Vec<Value>) -> Option<Value> {
    objects.into_iter().reduce(|best, candidate| {
        let ordering = generation_of(&candidate)
            .unwrap_or(0)
            .cmp(&generation_of(&best).unwrap_or(0))
            .then_with(|| {
                resource_version(&candidate)
                    .unwrap_or(i64::MIN)
                    .cmp(&resource_version(&best).unwrap_or(i64::MIN))
            });
        if ordering.is_gt() {
            candidate
        } else {
            best
        }
    })
}

/// Copia `resourceVersion` e `uid` do observado para o desejado.
fn copy_server_fields(desired: &mut Value, existing: &Value) {
    let Some(Value::Object(metadata)) = desired.get_mut("metadata") else {
        return;
    };
    let existing_metadata = existing.get("metadata");
    for field in ["resourceVersion", "uid"] {
        if let Some(value) = existing_metadata.and_then(|m| m.get(field)) {
            metadata.insert(field.to_string(), value.clone());
        }
    }
}

fn resource_step_error(error: ResourceError) -> StepError {
    match error {
        ResourceError::Canceled => StepError::new(ErrorReason::Canceled, error.to_string()),
        other => StepError::new(ErrorReason::ResourceError, other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::resource::RecordingResourceClient;
    use crate::clients::FixedClock;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use std::sync::Arc;

    fn engine() -> TemplateEngine {
        let instant = Utc.with_ymd_and_hms(2024, 3, 15, 12, 0, 0).unwrap();
        TemplateEngine::new(Arc::new(FixedClock::new(instant)))
    }

    fn env() -> HashMap<String, Value> {
        let mut env = HashMap::new();
        env.insert("clusterId".to_string(), json!("c1"));
        env
    }

    fn manifest(generation: &str) -> Value {
        json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {
                "name": "cm-{{ .clusterId }}",
                "namespace": "default",
                "annotations": { GENERATION_ANNOTATION: generation }
            },
            "data": { "cluster": "{{ .clusterId }}" }
        })
    }

    fn existing(generation: &str, resource_version: &str) -> Value {
        json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {
                "name": "cm-c1",
                "namespace": "default",
                "resourceVersion": resource_version,
                "uid": "uid-1",
                "annotations": { GENERATION_ANNOTATION: generation }
            }
        })
    }

    fn step(generation: &str, recreate: bool) -> ResourceStep {
        ResourceStep {
            manifest: Some(manifest(generation)),
            manifests: vec![],
            discovery: Discovery {
                by_name: Some("cm-{{ .clusterId }}".to_string()),
                by_selectors: None,
                namespace: Some("default".to_string()),
            },
            recreate_on_change: recreate,
        }
    }

    async fn reconcile(
        client: &RecordingResourceClient,
        spec: &ResourceStep,
    ) -> Result<ReconcileOutcome, StepError> {
        let templates = engine();
        let reconciler = ResourceReconciler::new(&templates, client);
        reconciler
            .reconcile("applyConfig", spec, &env(), &CancellationToken::new())
            .await
    }

    // ------------------------------------------------------------------------
    // Decisões por geração
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_absent_creates() {
        let client = RecordingResourceClient::new();
        let outcome = reconcile(&client, &step("3", false)).await.unwrap();

        assert_eq!(outcome.operation, Operation::Create);
        assert_eq!(outcome.reason, "resource not found");
        assert_eq!(outcome.bound["metadata"]["name"], json!("cm-c1"));

        let ops = client.operations();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].verb, "create");
    }

    #[tokio::test]
    async fn test_equal_generation_skips_without_calls() {
        let client = RecordingResourceClient::new();
        client.seed(existing("3", "5"));

        let outcome = reconcile(&client, &step("3", false)).await.unwrap();

        assert_eq!(outcome.operation, Operation::Skip);
        assert_eq!(outcome.reason, "generation unchanged");
        // O objeto ligado é o observado, com os campos do servidor.
        assert_eq!(outcome.bound["metadata"]["uid"], json!("uid-1"));
        assert!(client.operations().is_empty());
    }

    #[tokio::test]
    async fn test_higher_generation_updates_and_copies_server_fields() {
        let client = RecordingResourceClient::new();
        client.seed(existing("2", "5"));

        let outcome = reconcile(&client, &step("3", false)).await.unwrap();

        assert_eq!(outcome.operation, Operation::Update);
        assert_eq!(outcome.reason, "generation changed from 2 to 3");

        let ops = client.operations();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].verb, "update");
        // uid preservado pelo round-trip.
        assert_eq!(outcome.bound["metadata"]["uid"], json!("uid-1"));
    }

    #[tokio::test]
    async fn test_recreate_deletes_then_creates() {
        let client = RecordingResourceClient::new();
        client.seed(existing("2", "5"));

        let outcome = reconcile(&client, &step("3", true)).await.unwrap();

        assert_eq!(outcome.operation, Operation::Recreate);
        let verbs: Vec<String> = client.operations().iter().map(|o| o.verb.clone()).collect();
        assert_eq!(verbs, vec!["delete", "create"]);
    }

    #[tokio::test]
    async fn test_older_generation_skips() {
        let client = RecordingResourceClient::new();
        client.seed(existing("7", "5"));

        let outcome = reconcile(&client, &step("3", false)).await.unwrap();

        assert_eq!(outcome.operation, Operation::Skip);
        assert_eq!(outcome.reason, "observed generation is newer");
        assert!(client.operations().is_empty());
    }

    // ------------------------------------------------------------------------
    // Validação do manifesto
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_missing_generation_annotation_fails_validation() {
        let client = RecordingResourceClient::new();
        let mut spec = step("3", false);
        spec.manifest = Some(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": { "name": "cm-c1" }
        }));

        let error = reconcile(&client, &spec).await.unwrap_err();
        assert_eq!(error.reason, ErrorReason::ValidationError);
        assert!(error.message.contains(GENERATION_ANNOTATION));
    }

    #[tokio::test]
    async fn test_unparseable_generation_fails_validation() {
        let client = RecordingResourceClient::new();
        let error = reconcile(&client, &step("three", false)).await.unwrap_err();
        assert_eq!(error.reason, ErrorReason::ValidationError);
    }

    #[tokio::test]
    async fn test_missing_name_fails_validation() {
        let client = RecordingResourceClient::new();
        let mut spec = step("3", false);
        spec.manifest = Some(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": { "annotations": { GENERATION_ANNOTATION: "1" } }
        }));

        let error = reconcile(&client, &spec).await.unwrap_err();
        assert_eq!(error.reason, ErrorReason::ValidationError);
        assert!(error.message.contains("metadata.name"));
    }

    #[tokio::test]
    async fn test_unbound_template_in_manifest_is_template_error() {
        let client = RecordingResourceClient::new();
        let mut spec = step("3", false);
        spec.manifest = Some(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {
                "name": "cm-{{ .unknownVar }}",
                "annotations": { GENERATION_ANNOTATION: "1" }
            }
        }));

        let error = reconcile(&client, &spec).await.unwrap_err();
        assert_eq!(error.reason, ErrorReason::TemplateError);
    }

    // ------------------------------------------------------------------------
    // Descoberta por selectors
    // ------------------------------------------------------------------------

    fn selector_step(generation: &str) -> ResourceStep {
        let mut selectors = BTreeMap::new();
        selectors.insert(
            "hyperfleet.io/cluster".to_string(),
            "{{ .clusterId }}".to_string(),
        );
        ResourceStep {
            manifest: Some(manifest(generation)),
            manifests: vec![],
            discovery: Discovery {
                by_name: None,
                by_selectors: Some(selectors),
                namespace: Some("*".to_string()),
            },
            recreate_on_change: false,
        }
    }

    fn labeled(name: &str, generation: &str, resource_version: &str) -> Value {
        json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {
                "name": name,
                "namespace": "default",
                "resourceVersion": resource_version,
                "labels": { "hyperfleet.io/cluster": "c1" },
                "annotations": { GENERATION_ANNOTATION: generation }
            }
        })
    }

    #[tokio::test]
    async fn test_selector_discovery_picks_highest_generation() {
        let client = RecordingResourceClient::new();
        client.seed(labeled("cm-old", "1", "10"));
        client.seed(labeled("cm-new", "4", "11"));

        let outcome = reconcile(&client, &selector_step("4")).await.unwrap();

        // Gd == Ge do vencedor → skip, ligado ao objeto de geração 4.
        assert_eq!(outcome.operation, Operation::Skip);
        assert_eq!(outcome.bound["metadata"]["name"], json!("cm-new"));
        assert!(client.operations().is_empty());
    }

    #[tokio::test]
    async fn test_selector_tie_breaks_by_resource_version() {
        let client = RecordingResourceClient::new();
        client.seed(labeled("cm-a", "4", "10"));
        client.seed(labeled("cm-b", "4", "20"));

        let outcome = reconcile(&client, &selector_step("4")).await.unwrap();
        assert_eq!(outcome.bound["metadata"]["name"], json!("cm-b"));
    }

    #[tokio::test]
    async fn test_selector_empty_list_creates() {
        let client = RecordingResourceClient::new();
        let outcome = reconcile(&client, &selector_step("4")).await.unwrap();
        assert_eq!(outcome.operation, Operation::Create);
    }

    // ------------------------------------------------------------------------
    // Bundles
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_bundle_binds_constituents_by_name() {
        let client = RecordingResourceClient::new();
        let spec = ResourceStep {
            manifest: None,
            manifests: vec![
                crate::protocol::NamedManifest {
                    name: "primary".to_string(),
                    manifest: manifest("2"),
                },
                crate::protocol::NamedManifest {
                    name: "secondary".to_string(),
                    manifest: json!({
                        "apiVersion": "v1",
                        "kind": "Secret",
                        "metadata": {
                            "name": "secret-{{ .clusterId }}",
                            "namespace": "default",
                            "annotations": { GENERATION_ANNOTATION: "2" }
                        }
                    }),
                },
            ],
            discovery: Discovery {
                by_name: Some("cm-{{ .clusterId }}".to_string()),
                by_selectors: None,
                namespace: Some("default".to_string()),
            },
            recreate_on_change: false,
        };

        let templates = engine();
        let reconciler = ResourceReconciler::new(&templates, &client);
        let outcome = reconciler
            .reconcile("applyBundle", &spec, &env(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.operation, Operation::Create);
        assert_eq!(
            outcome.bound["primary"]["metadata"]["name"],
            json!("cm-c1")
        );
        assert_eq!(
            outcome.bound["secondary"]["kind"],
            json!("Secret")
        );
    }

    // ------------------------------------------------------------------------
    // Cancelamento
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_canceled_reconcile_reports_canceled() {
        let client = RecordingResourceClient::new();
        let templates = engine();
        let reconciler = ResourceReconciler::new(&templates, &client);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let error = reconciler
            .reconcile("applyConfig", &step("3", false), &env(), &cancel)
            .await
            .unwrap_err();
        assert_eq!(error.reason, ErrorReason::Canceled);
    }
}
