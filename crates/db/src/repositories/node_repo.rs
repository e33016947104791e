//! Repository for the mirrored node identities (`jobwatch_node`).

use jobwatch_core::error::CoreError;

use crate::document::{
    from_document, to_document, DocumentStore, Filter, FindOptions, SortKey, Update,
};
use crate::models::node::{NodeIdentity, COLL_NODE};

/// Provides mirror operations for node identities.
pub struct NodeRepo;

impl NodeRepo {
    /// Upsert the full identity keyed on its id. `connected` is not stored.
    pub async fn upsert(store: &dyn DocumentStore, node: &NodeIdentity) -> Result<(), CoreError> {
        let mut fields = to_document(node)?;
        fields.remove("connected");
        store
            .upsert(COLL_NODE, &Filter::eq("id", node.id.as_str()), Update::Set(fields))
            .await
    }

    pub async fn find_by_id(
        store: &dyn DocumentStore,
        id: &str,
    ) -> Result<Option<NodeIdentity>, CoreError> {
        store
            .find_one(COLL_NODE, &Filter::eq("id", id))
            .await?
            .map(|doc| from_document(&format!("{COLL_NODE}/{id}"), doc))
            .transpose()
    }

    /// All mirrored identities ordered by id.
    pub async fn list(store: &dyn DocumentStore) -> Result<Vec<NodeIdentity>, CoreError> {
        let docs = store
            .find(COLL_NODE, &Filter::All, &FindOptions::sorted(vec![SortKey::asc("id")]))
            .await?;
        docs.into_iter()
            .map(|doc| {
                let key = format!(
                    "{COLL_NODE}/{}",
                    doc.get("id").and_then(|v| v.as_str()).unwrap_or("?")
                );
                from_document(&key, doc)
            })
            .collect()
    }

    /// Delete the identity with the given id. Returns the number removed.
    pub async fn remove_by_id(store: &dyn DocumentStore, id: &str) -> Result<u64, CoreError> {
        store.delete_many(COLL_NODE, &Filter::eq("id", id)).await
    }
}
