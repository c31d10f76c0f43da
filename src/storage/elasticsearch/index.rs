//! Versioned index provisioning and alias management
//!
//! Documents live in a versioned index (`skydive_v3`) and are always addressed
//! through a stable alias (`skydive`). Bumping [`INDEX_VERSION`] makes the next
//! startup create a fresh index and move the alias over to it.

use crate::storage::elasticsearch::connection::Connection;
use crate::storage::elasticsearch::error::{StorageError, StorageResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info};

/// Logical store name, also the alias every versioned index hides behind
pub const STORE_NAME: &str = "skydive";

/// Current schema generation
pub const INDEX_VERSION: u32 = 3;

/// Name, version and alias of one generation of the index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDescriptor {
    pub version: u32,
    pub name: String,
    pub alias: String,
}

impl IndexDescriptor {
    pub fn new(store: &str, version: u32) -> Self {
        Self {
            version,
            name: format!("{}_v{}", store, version),
            alias: store.to_string(),
        }
    }

    /// Descriptor of the index this build writes to
    pub fn current() -> Self {
        Self::new(STORE_NAME, INDEX_VERSION)
    }

    /// Prefix shared by every generation of this store's indices
    pub fn prefix(&self) -> String {
        format!("{}_", self.alias)
    }
}

/// Raw mapping definition of one object type. The body is passed through untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMapping {
    pub object_type: String,
    pub body: String,
}

impl ObjectMapping {
    pub fn new(object_type: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            object_type: object_type.into(),
            body: body.into(),
        }
    }
}

/// Target of an alias action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasTarget {
    pub alias: String,
    pub index: String,
}

/// One entry of an `_aliases` batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AliasAction {
    Add(AliasTarget),
    Remove(AliasTarget),
}

#[derive(Debug, Serialize)]
struct AliasBatch<'a> {
    actions: &'a [AliasAction],
}

/// Plan the alias batch moving `descriptor.alias` onto `descriptor.name`
///
/// Every other index of the store found in `current` is detached first;
/// unrelated indices are left alone. The add action always comes last.
pub fn plan_alias_actions(
    descriptor: &IndexDescriptor,
    current: Option<&Map<String, Value>>,
) -> Vec<AliasAction> {
    let prefix = descriptor.prefix();
    let mut actions = Vec::new();

    if let Some(table) = current {
        let mut stale: Vec<&String> = table
            .keys()
            .filter(|name| name.starts_with(&prefix) && **name != descriptor.name)
            .collect();
        stale.sort();

        actions.extend(stale.into_iter().map(|name| {
            AliasAction::Remove(AliasTarget {
                alias: descriptor.alias.clone(),
                index: name.clone(),
            })
        }));
    }

    actions.push(AliasAction::Add(AliasTarget {
        alias: descriptor.alias.clone(),
        index: descriptor.name.clone(),
    }));
    actions
}

/// Brings the versioned index, its mappings and its alias into place
pub struct IndexManager {
    connection: Arc<dyn Connection>,
    descriptor: IndexDescriptor,
}

impl IndexManager {
    pub fn new(connection: Arc<dyn Connection>, descriptor: IndexDescriptor) -> Self {
        Self {
            connection,
            descriptor,
        }
    }

    pub fn descriptor(&self) -> &IndexDescriptor {
        &self.descriptor
    }

    /// Open or create the index, push the mappings, then repoint the alias
    ///
    /// Safe to run against an already provisioned engine. The first failing
    /// step aborts the sequence.
    pub async fn ensure_index(&self, mappings: &[ObjectMapping]) -> StorageResult<()> {
        self.open_or_create().await?;
        self.apply_mappings(mappings).await?;
        self.repoint_alias().await?;
        Ok(())
    }

    async fn open_or_create(&self) -> StorageResult<()> {
        let index = &self.descriptor.name;

        if let Err(e) = self.connection.open_index(index).await {
            debug!(index = %index, error = %e, "Index could not be opened, creating it");

            self.connection.create_index(index).await.map_err(|e| {
                StorageError::IndexCreationFailed {
                    index: self.descriptor.alias.clone(),
                    reason: e.to_string(),
                }
            })?;
            info!(index = %index, "Created Elasticsearch index");
        }

        Ok(())
    }

    async fn apply_mappings(&self, mappings: &[ObjectMapping]) -> StorageResult<()> {
        for mapping in mappings {
            self.connection
                .put_mapping(&self.descriptor.name, &mapping.object_type, &mapping.body)
                .await
                .map_err(|e| StorageError::MappingFailed {
                    object_type: mapping.object_type.clone(),
                    reason: e.to_string(),
                })?;
            debug!(object_type = %mapping.object_type, "Applied mapping");
        }

        Ok(())
    }

    /// Detach the alias from previous generations and attach it to the current one
    pub async fn repoint_alias(&self) -> StorageResult<Vec<AliasAction>> {
        let table = self.fetch_alias_table().await?;
        let actions = plan_alias_actions(&self.descriptor, table.as_ref());

        let body = serde_json::to_string(&AliasBatch { actions: &actions })?;
        let response = self.connection.update_aliases(body).await;
        match response {
            Ok(response) if response.status == 200 => {}
            Ok(response) => {
                return Err(StorageError::AliasUpdateFailed {
                    alias: self.descriptor.alias.clone(),
                    status: response.status,
                })
            }
            Err(e) => return Err(e),
        }

        info!(
            alias = %self.descriptor.alias,
            index = %self.descriptor.name,
            removed = actions.len() - 1,
            "Alias points to the current index"
        );

        Ok(actions)
    }

    // An unreachable or empty alias table just means there is nothing to detach.
    async fn fetch_alias_table(&self) -> StorageResult<Option<Map<String, Value>>> {
        match self.connection.get_aliases().await {
            Ok(response) if response.status == 200 => {
                let table: Map<String, Value> = serde_json::from_slice(&response.body)
                    .map_err(|e| StorageError::AliasParseFailed(e.to_string()))?;
                Ok(Some(table))
            }
            Ok(response) => {
                debug!(status = response.status, "Alias table unavailable");
                Ok(None)
            }
            Err(e) => {
                debug!(error = %e, "Alias table unavailable");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn table(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_descriptor_naming() {
        let descriptor = IndexDescriptor::current();
        assert_eq!(descriptor.name, "skydive_v3");
        assert_eq!(descriptor.alias, "skydive");
        assert_eq!(descriptor.prefix(), "skydive_");
    }

    #[test]
    fn test_plan_without_alias_table() {
        let descriptor = IndexDescriptor::current();
        let actions = plan_alias_actions(&descriptor, None);
        assert_eq!(
            actions,
            vec![AliasAction::Add(AliasTarget {
                alias: "skydive".to_string(),
                index: "skydive_v3".to_string(),
            })]
        );
    }

    #[test]
    fn test_plan_already_current() {
        let descriptor = IndexDescriptor::current();
        let current = table(json!({"skydive_v3": {"aliases": {"skydive": {}}}}));

        let actions = plan_alias_actions(&descriptor, Some(&current));
        assert_eq!(actions.len(), 1);
        assert!(matches!(actions[0], AliasAction::Add(_)));
    }

    #[test]
    fn test_plan_removes_only_stale_generations() {
        let descriptor = IndexDescriptor::current();
        let current = table(json!({
            "skydive_v2": {"aliases": {"skydive": {}}},
            "skydive_v1": {"aliases": {}},
            "skydive_v3": {"aliases": {}},
            "logstash-2016.10.01": {"aliases": {}},
            "skydivers": {"aliases": {}}
        }));

        let actions = plan_alias_actions(&descriptor, Some(&current));
        let removed: Vec<&str> = actions
            .iter()
            .filter_map(|action| match action {
                AliasAction::Remove(target) => Some(target.index.as_str()),
                AliasAction::Add(_) => None,
            })
            .collect();

        assert_eq!(removed, vec!["skydive_v1", "skydive_v2"]);
        assert_eq!(
            actions.last(),
            Some(&AliasAction::Add(AliasTarget {
                alias: "skydive".to_string(),
                index: "skydive_v3".to_string(),
            }))
        );
    }

    #[test]
    fn test_alias_batch_wire_format() {
        let actions = vec![
            AliasAction::Remove(AliasTarget {
                alias: "skydive".to_string(),
                index: "skydive_v2".to_string(),
            }),
            AliasAction::Add(AliasTarget {
                alias: "skydive".to_string(),
                index: "skydive_v3".to_string(),
            }),
        ];

        let body = serde_json::to_value(AliasBatch { actions: &actions }).unwrap();
        assert_eq!(
            body,
            json!({"actions": [
                {"remove": {"alias": "skydive", "index": "skydive_v2"}},
                {"add": {"alias": "skydive", "index": "skydive_v3"}}
            ]})
        );
    }
}
