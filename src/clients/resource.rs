//! # Cliente de Recursos
//!
//! Contrato `ResourceClient` consumido pelo reconciliador, com um
//! `NotFound` de primeira classe (ausência não é erro de transporte).
//!
//! O transporte Kubernetes/ManifestWork de produção vive com o serviço
//! que embute o engine; este crate embarca o `RecordingResourceClient`,
//! um backend em memória com journal de operações usado em dry-run e
//! em testes. As semânticas observáveis pelo engine são as mesmas:
//! get/list/create/update/delete/apply_bundle, com `resourceVersion` e
//! `uid` de posse do servidor.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Mutex;
use thiserror::Error;
use uuid::Uuid;

/// Namespace que significa "todos os namespaces".
///
/// Configurações podem escrever `*` ou deixar vazio; ambos normalizam
/// para este valor antes de chegar ao cliente.
pub const ANY_NAMESPACE: &str = "*";

/// Normaliza a forma de "todos os namespaces".
pub fn normalize_namespace(namespace: &str) -> &str {
    if namespace.is_empty() {
        ANY_NAMESPACE
    } else {
        namespace
    }
}

// ============================================================================
// IDENTIDADE DE RECURSO
// ============================================================================

/// Grupo/versão/kind de um objeto.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupVersionKind {
    /// `apiVersion` completo (ex: "v1", "apps/v1").
    pub api_version: String,

    /// Kind (ex: "ConfigMap").
    pub kind: String,
}

impl GroupVersionKind {
    pub fn new(api_version: &str, kind: &str) -> Self {
        Self {
            api_version: api_version.to_string(),
            kind: kind.to_string(),
        }
    }

    /// Extrai o GVK de um objeto, se os campos existirem.
    pub fn of(object: &Value) -> Option<Self> {
        let api_version = object.get("apiVersion")?.as_str()?;
        let kind = object.get("kind")?.as_str()?;
        Some(Self::new(api_version, kind))
    }
}

// ============================================================================
// ERROS
// ============================================================================

/// Falhas do backend de recursos.
#[derive(Debug, Error)]
pub enum ResourceError {
    /// O objeto não existe. Para o reconciliador isso significa
    /// "ausente", não uma falha.
    #[error("resource not found")]
    NotFound,

    /// Falha do backend (transporte, conflito, permissão).
    #[error("resource backend error: {0}")]
    Backend(String),

    /// Cancelamento observado durante a operação.
    #[error("resource operation canceled")]
    Canceled,
}

// ============================================================================
// CONTRATO
// ============================================================================

/// Contrato consumido pelo reconciliador.
///
/// Implementações compartilhadas entre eventos devem ser thread-safe;
/// o engine as trata como opacas.
#[async_trait]
pub trait ResourceClient: Send + Sync {
    /// Busca um objeto por identidade. `NotFound` quando ausente.
    async fn get(
        &self,
        gvk: &GroupVersionKind,
        namespace: &str,
        name: &str,
    ) -> Result<Value, ResourceError>;

    /// Lista objetos casando um label selector.
    async fn list(
        &self,
        gvk: &GroupVersionKind,
        namespace: &str,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<Value>, ResourceError>;

    /// Cria um objeto e retorna a forma persistida.
    async fn create(&self, object: &Value) -> Result<Value, ResourceError>;

    /// Atualiza um objeto existente (espera `resourceVersion`/`uid`).
    async fn update(&self, object: &Value) -> Result<Value, ResourceError>;

    /// Remove um objeto. `NotFound` quando já ausente.
    async fn delete(
        &self,
        gvk: &GroupVersionKind,
        namespace: &str,
        name: &str,
    ) -> Result<(), ResourceError>;

    /// Aplica uma lista de manifestos nomeados embrulhada em um
    /// envelope do lado do servidor (transporte em bundle).
    /// Retorna os objetos persistidos, na mesma ordem.
    async fn apply_bundle(
        &self,
        objects: &[(String, Value)],
    ) -> Result<Vec<(String, Value)>, ResourceError>;
}

// ============================================================================
// HELPERS DE METADATA
// ============================================================================

/// `metadata.name` de um objeto.
pub fn object_name(object: &Value) -> Option<&str> {
    object.get("metadata")?.get("name")?.as_str()
}

/// `metadata.namespace` de um objeto (vazio quando ausente).
pub fn object_namespace(object: &Value) -> &str {
    object
        .get("metadata")
        .and_then(|m| m.get("namespace"))
        .and_then(Value::as_str)
        .unwrap_or_default()
}

/// `metadata.labels` de um objeto.
pub fn object_labels(object: &Value) -> Option<&Map<String, Value>> {
    object.get("metadata")?.get("labels")?.as_object()
}

/// `metadata.resourceVersion` como inteiro, quando parseável.
pub fn resource_version(object: &Value) -> Option<i64> {
    object
        .get("metadata")?
        .get("resourceVersion")?
        .as_str()?
        .parse()
        .ok()
}

// ============================================================================
// IMPLEMENTAÇÃO RECORDING (DRY-RUN / TESTES)
// ============================================================================

/// Uma operação observada pelo backend em memória.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceOp {
    /// "create", "update", "delete" ou "applyBundle".
    pub verb: String,
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

/// Backend de recursos em memória com journal.
///
/// `seed` pré-carrega objetos sem registrar no journal, para montar o
/// estado observado de um cenário.
#[derive(Default)]
pub struct RecordingResourceClient {
    store: Mutex<Vec<Value>>,
    journal: Mutex<Vec<ResourceOp>>,
}

impl RecordingResourceClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pré-carrega um objeto no estado observado.
    pub fn seed(&self, object: Value) {
        self.store.lock().expect("store lock poisoned").push(object);
    }

    /// Operações registradas, em ordem.
    pub fn operations(&self) -> Vec<ResourceOp> {
        self.journal
            .lock()
            .expect("journal lock poisoned")
            .clone()
    }

    /// Snapshot do estado corrente.
    pub fn objects(&self) -> Vec<Value> {
        self.store.lock().expect("store lock poisoned").clone()
    }

    fn journal_op(&self, verb: &str, object: &Value) {
        self.journal
            .lock()
            .expect("journal lock poisoned")
            .push(ResourceOp {
                verb: verb.to_string(),
                kind: object
                    .get("kind")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                namespace: object_namespace(object).to_string(),
                name: object_name(object).unwrap_or_default().to_string(),
            });
    }

    fn matches_identity(
        object: &Value,
        gvk: &GroupVersionKind,
        namespace: &str,
        name: &str,
    ) -> bool {
        GroupVersionKind::of(object).as_ref() == Some(gvk)
            && object_name(object) == Some(name)
            && namespace_matches(namespace, object_namespace(object))
    }
}

/// Casa um filtro de namespace contra o namespace de um objeto.
fn namespace_matches(filter: &str, actual: &str) -> bool {
    let filter = normalize_namespace(filter);
    filter == ANY_NAMESPACE || filter == actual
}

/// Escreve `resourceVersion` e `uid` nos metadados de um objeto.
fn stamp_server_fields(object: &mut Value, resource_version: i64, uid: Option<String>) {
    if let Some(Value::Object(metadata)) = object.get_mut("metadata") {
        metadata.insert(
            "resourceVersion".to_string(),
            Value::String(resource_version.to_string()),
        );
        if let Some(uid) = uid {
            metadata.insert("uid".to_string(), Value::String(uid));
        }
    }
}

#[async_trait]
impl ResourceClient for RecordingResourceClient {
    async fn get(
        &self,
        gvk: &GroupVersionKind,
        namespace: &str,
        name: &str,
    ) -> Result<Value, ResourceError> {
        let store = self.store.lock().expect("store lock poisoned");
        store
            .iter()
            .find(|o| Self::matches_identity(o, gvk, namespace, name))
            .cloned()
            .ok_or(ResourceError::NotFound)
    }

    async fn list(
        &self,
        gvk: &GroupVersionKind,
        namespace: &str,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<Value>, ResourceError> {
        let store = self.store.lock().expect("store lock poisoned");
        let matched = store
            .iter()
            .filter(|o| GroupVersionKind::of(o).as_ref() == Some(gvk))
            .filter(|o| namespace_matches(namespace, object_namespace(o)))
            .filter(|o| {
                let labels = object_labels(o);
                selector.iter().all(|(key, value)| {
                    labels
                        .and_then(|l| l.get(key))
                        .and_then(Value::as_str)
                        .map(|actual| actual == value)
                        .unwrap_or(false)
                })
            })
            .cloned()
            .collect();
        Ok(matched)
    }

    async fn create(&self, object: &Value) -> Result<Value, ResourceError> {
        let mut stored = object.clone();
        stamp_server_fields(&mut stored, 1, Some(Uuid::new_v4().to_string()));
        self.journal_op("create", &stored);
        self.store
            .lock()
            .expect("store lock poisoned")
            .push(stored.clone());
        Ok(stored)
    }

    async fn update(&self, object: &Value) -> Result<Value, ResourceError> {
        let gvk = GroupVersionKind::of(object)
            .ok_or_else(|| ResourceError::Backend("object without apiVersion/kind".to_string()))?;
        let name = object_name(object)
            .ok_or_else(|| ResourceError::Backend("object without metadata.name".to_string()))?
            .to_string();
        let namespace = object_namespace(object).to_string();

        let mut store = self.store.lock().expect("store lock poisoned");
        let existing = store
            .iter_mut()
            .find(|o| Self::matches_identity(o, &gvk, &namespace, &name))
            .ok_or(ResourceError::NotFound)?;

        let next_version = resource_version(existing).unwrap_or(0) + 1;
        let uid = existing
            .get("metadata")
            .and_then(|m| m.get("uid"))
            .and_then(Value::as_str)
            .map(String::from);

        let mut stored = object.clone();
        stamp_server_fields(&mut stored, next_version, uid);
        *existing = stored.clone();
        drop(store);

        self.journal_op("update", &stored);
        Ok(stored)
    }

    async fn delete(
        &self,
        gvk: &GroupVersionKind,
        namespace: &str,
        name: &str,
    ) -> Result<(), ResourceError> {
        let mut store = self.store.lock().expect("store lock poisoned");
        let before = store.len();
        store.retain(|o| !Self::matches_identity(o, gvk, namespace, name));
        if store.len() == before {
            return Err(ResourceError::NotFound);
        }
        drop(store);

        self.journal
            .lock()
            .expect("journal lock poisoned")
            .push(ResourceOp {
                verb: "delete".to_string(),
                kind: gvk.kind.clone(),
                namespace: normalize_namespace(namespace).to_string(),
                name: name.to_string(),
            });
        Ok(())
    }

    async fn apply_bundle(
        &self,
        objects: &[(String, Value)],
    ) -> Result<Vec<(String, Value)>, ResourceError> {
        let mut applied = Vec::with_capacity(objects.len());
        for (manifest_name, object) in objects {
            let exists = GroupVersionKind::of(object)
                .and_then(|gvk| {
                    object_name(object).map(|name| {
                        let store = self.store.lock().expect("store lock poisoned");
                        store
                            .iter()
                            .any(|o| Self::matches_identity(o, &gvk, object_namespace(object), name))
                    })
                })
                .unwrap_or(false);

            let stored = if exists {
                self.update(object).await?
            } else {
                self.create(object).await?
            };
            self.journal_op("applyBundle", &stored);
            applied.push((manifest_name.clone(), stored));
        }
        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config_map(name: &str, namespace: &str, labels: Value) -> Value {
        json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {
                "name": name,
                "namespace": namespace,
                "labels": labels,
            }
        })
    }

    #[tokio::test]
    async fn test_get_not_found_vs_found() {
        let client = RecordingResourceClient::new();
        let gvk = GroupVersionKind::new("v1", "ConfigMap");

        let missing = client.get(&gvk, "default", "cm-a").await;
        assert!(matches!(missing, Err(ResourceError::NotFound)));

        client.seed(config_map("cm-a", "default", json!({})));
        let found = client.get(&gvk, "default", "cm-a").await.unwrap();
        assert_eq!(object_name(&found), Some("cm-a"));
    }

    #[tokio::test]
    async fn test_get_any_namespace() {
        let client = RecordingResourceClient::new();
        let gvk = GroupVersionKind::new("v1", "ConfigMap");
        client.seed(config_map("cm-a", "fleet-system", json!({})));

        assert!(client.get(&gvk, "*", "cm-a").await.is_ok());
        assert!(client.get(&gvk, "", "cm-a").await.is_ok());
        assert!(matches!(
            client.get(&gvk, "default", "cm-a").await,
            Err(ResourceError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_list_filters_by_selector() {
        let client = RecordingResourceClient::new();
        let gvk = GroupVersionKind::new("v1", "ConfigMap");
        client.seed(config_map("cm-a", "default", json!({"app": "fleet"})));
        client.seed(config_map("cm-b", "default", json!({"app": "other"})));
        client.seed(config_map("cm-c", "default", json!({})));

        let mut selector = BTreeMap::new();
        selector.insert("app".to_string(), "fleet".to_string());
        let matched = client.list(&gvk, "default", &selector).await.unwrap();

        assert_eq!(matched.len(), 1);
        assert_eq!(object_name(&matched[0]), Some("cm-a"));
    }

    #[tokio::test]
    async fn test_create_stamps_server_fields() {
        let client = RecordingResourceClient::new();
        let created = client
            .create(&config_map("cm-a", "default", json!({})))
            .await
            .unwrap();

        assert_eq!(created["metadata"]["resourceVersion"], json!("1"));
        assert!(created["metadata"]["uid"].is_string());
        assert_eq!(client.operations()[0].verb, "create");
    }

    #[tokio::test]
    async fn test_update_bumps_resource_version_and_keeps_uid() {
        let client = RecordingResourceClient::new();
        let created = client
            .create(&config_map("cm-a", "default", json!({})))
            .await
            .unwrap();
        let uid = created["metadata"]["uid"].clone();

        let updated = client.update(&created).await.unwrap();
        assert_eq!(updated["metadata"]["resourceVersion"], json!("2"));
        assert_eq!(updated["metadata"]["uid"], uid);
    }

    #[tokio::test]
    async fn test_update_missing_is_not_found() {
        let client = RecordingResourceClient::new();
        let result = client
            .update(&config_map("cm-a", "default", json!({})))
            .await;
        assert!(matches!(result, Err(ResourceError::NotFound)));
    }

    #[tokio::test]
    async fn test_delete_removes_and_errors_when_absent() {
        let client = RecordingResourceClient::new();
        let gvk = GroupVersionKind::new("v1", "ConfigMap");
        client.seed(config_map("cm-a", "default", json!({})));

        client.delete(&gvk, "default", "cm-a").await.unwrap();
        assert!(matches!(
            client.delete(&gvk, "default", "cm-a").await,
            Err(ResourceError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_apply_bundle_creates_then_updates() {
        let client = RecordingResourceClient::new();
        let bundle = vec![
            ("primary".to_string(), config_map("cm-a", "default", json!({}))),
            ("secondary".to_string(), config_map("cm-b", "default", json!({}))),
        ];

        let applied = client.apply_bundle(&bundle).await.unwrap();
        assert_eq!(applied.len(), 2);
        assert_eq!(applied[0].0, "primary");

        // Reaplicar atualiza ao invés de duplicar.
        client.apply_bundle(&bundle).await.unwrap();
        assert_eq!(client.objects().len(), 2);
    }

    #[test]
    fn test_normalize_namespace() {
        assert_eq!(normalize_namespace(""), "*");
        assert_eq!(normalize_namespace("*"), "*");
        assert_eq!(normalize_namespace("default"), "default");
    }
}
