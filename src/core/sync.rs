use crate::domain::model::{Dataset, Entity, EntityKind, SkippedEntity};
use crate::domain::ports::{Progress, StorageAdapter};
use crate::utils::error::Result;
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct KindReport {
    pub kind: EntityKind,
    pub written: usize,
    pub deleted: usize,
}

/// Result of a replace-save over a whole dataset.
#[derive(Debug, Default)]
pub struct SyncReport {
    pub kinds: Vec<KindReport>,
    pub skipped: Vec<SkippedEntity>,
    pub remapped_references: usize,
}

/// One-shot bulk import of an entire dataset: per kind, in parent-first
/// order, every existing record is deleted and the incoming set inserted
/// fresh. Identifier mappings are rebuilt along the way: a parent's old
/// identifiers (frontend id and any stale backend id) map to its newly
/// assigned identifier, which is substituted into the reference fields of
/// dependent kinds before those are written.
pub async fn replace_all(
    adapter: &dyn StorageAdapter,
    dataset: &Dataset,
    progress: Progress<'_>,
) -> Result<SyncReport> {
    let total = dataset.total();
    if let Some(report) = progress {
        report(0, total);
    }

    let mut id_map: HashMap<String, String> = HashMap::new();
    let mut sync_report = SyncReport::default();
    let mut done = 0usize;

    for kind in EntityKind::sync_order() {
        let kind = *kind;

        // wipe the existing set for this kind
        let existing = adapter.load(kind).await?;
        let mut deleted = 0;
        for record in &existing {
            if adapter.delete(kind, &record.id).await? {
                deleted += 1;
            }
        }
        if deleted > 0 {
            tracing::info!("🔄 {}: cleared {} existing records", kind, deleted);
        }

        // fresh inserts, with parent identifiers remapped into references
        let mut batch: Vec<Entity> = Vec::with_capacity(dataset.of_kind(kind).len());
        let mut old_backend_ids: Vec<Option<String>> = Vec::with_capacity(batch.capacity());
        for source in dataset.of_kind(kind) {
            let mut entity = source.clone();
            old_backend_ids.push(entity.backend_id.take());
            sync_report.remapped_references += remap_references(kind, &mut entity, &id_map);
            batch.push(entity);
        }

        let offset = done;
        let forward = progress.map(|report| {
            move |items: usize, _batch_total: usize| {
                if items > 0 {
                    report(offset + items, total);
                }
            }
        });
        let outcome = match &forward {
            Some(callback) => adapter.save(kind, &batch, Some(callback)).await?,
            None => adapter.save(kind, &batch, None).await?,
        };
        done += batch.len();

        // record the new identifier for every parent written in this round
        for (entity, old_backend_id) in batch.iter().zip(old_backend_ids) {
            let new_key = outcome
                .assignments
                .iter()
                .find(|a| a.id == entity.id)
                .map(|a| a.backend_id.clone())
                .unwrap_or_else(|| entity.id.clone());
            id_map.insert(entity.id.clone(), new_key.clone());
            if let Some(old) = old_backend_id {
                id_map.insert(old, new_key);
            }
        }

        sync_report.kinds.push(KindReport {
            kind,
            written: batch.len() - outcome.skipped.len(),
            deleted,
        });
        sync_report.skipped.extend(outcome.skipped);
    }

    if let Some(report) = progress {
        report(total, total);
    }
    tracing::info!(
        "✅ replace-save complete: {} records across {} kinds, {} references remapped",
        total,
        sync_report.kinds.len(),
        sync_report.remapped_references
    );
    Ok(sync_report)
}

/// Substitutes remapped parent identifiers into this entity's reference
/// fields. Returns how many references were rewritten.
fn remap_references(
    kind: EntityKind,
    entity: &mut Entity,
    id_map: &HashMap<String, String>,
) -> usize {
    let mut remapped = 0;
    for reference in kind.references() {
        if let Some(Value::String(old)) = entity.fields.get(reference.field) {
            if let Some(new_key) = id_map.get(old) {
                if new_key != old {
                    entity
                        .fields
                        .insert(reference.field.to_string(), Value::String(new_key.clone()));
                    remapped += 1;
                }
            }
        }
    }
    remapped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::local::LocalAdapter;
    use crate::domain::model::{IdAssignment, SaveOutcome};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn entity(id: &str, fields: Value) -> Entity {
        Entity::with_id(id, fields.as_object().unwrap().clone())
    }

    /// In-memory backend that assigns sequential numeric keys, the way a
    /// relational engine does.
    #[derive(Default)]
    struct KeyAssigningBackend {
        records: Mutex<HashMap<EntityKind, Vec<Entity>>>,
        next_key: AtomicUsize,
    }

    #[async_trait]
    impl StorageAdapter for KeyAssigningBackend {
        async fn save(
            &self,
            kind: EntityKind,
            entities: &[Entity],
            _progress: Progress<'_>,
        ) -> Result<SaveOutcome> {
            let mut outcome = SaveOutcome::default();
            let mut records = self.records.lock().unwrap();
            let stored = records.entry(kind).or_default();
            for entity in entities {
                let mut copy = entity.clone();
                if copy.backend_id.is_none() {
                    let key = (100 + self.next_key.fetch_add(1, Ordering::SeqCst)).to_string();
                    copy.backend_id = Some(key.clone());
                    outcome.assignments.push(IdAssignment {
                        id: copy.id.clone(),
                        backend_id: key,
                    });
                }
                stored.push(copy);
            }
            Ok(outcome)
        }

        async fn load(&self, kind: EntityKind) -> Result<Vec<Entity>> {
            Ok(self
                .records
                .lock()
                .unwrap()
                .get(&kind)
                .cloned()
                .unwrap_or_default())
        }

        async fn delete(&self, kind: EntityKind, id: &str) -> Result<bool> {
            let mut records = self.records.lock().unwrap();
            let stored = records.entry(kind).or_default();
            let before = stored.len();
            stored.retain(|e| e.id != id);
            Ok(stored.len() != before)
        }

        async fn test_connection(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn test_replace_all_wipes_and_rewrites() {
        let dir = TempDir::new().unwrap();
        let adapter = LocalAdapter::new(dir.path());

        adapter
            .save(
                EntityKind::Article,
                &[entity("stale", json!({ "name": "Old" }))],
                None,
            )
            .await
            .unwrap();

        let dataset = Dataset {
            articles: vec![entity("a1", json!({ "name": "Flour" }))],
            ..Dataset::default()
        };

        let report = replace_all(&adapter, &dataset, None).await.unwrap();

        let loaded = adapter.load(EntityKind::Article).await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, "a1");
        let articles = report
            .kinds
            .iter()
            .find(|k| k.kind == EntityKind::Article)
            .unwrap();
        assert_eq!(articles.deleted, 1);
        assert_eq!(articles.written, 1);
    }

    #[tokio::test]
    async fn test_replace_all_remaps_parent_identifiers() {
        let backend = KeyAssigningBackend::default();

        let dataset = Dataset {
            suppliers: vec![entity("s1", json!({ "name": "Mill & Co" }))],
            articles: vec![entity(
                "a1",
                json!({ "name": "Flour", "supplierId": "s1" }),
            )],
            recipes: vec![entity("r1", json!({ "title": "Bread" }))],
            recipe_ingredients: vec![entity(
                "ri1",
                json!({ "recipeId": "r1", "articleId": "a1", "amount": 2 }),
            )],
        };

        let report = replace_all(&backend, &dataset, None).await.unwrap();

        // the supplier got key "100"; the article referencing it was
        // rewritten before insert
        let suppliers = backend.load(EntityKind::Supplier).await.unwrap();
        let supplier_key = suppliers[0].backend_id.clone().unwrap();
        let articles = backend.load(EntityKind::Article).await.unwrap();
        assert_eq!(
            articles[0].field("supplierId"),
            Some(&Value::String(supplier_key))
        );

        // recipe ingredients see both of their parents' new keys
        let recipes = backend.load(EntityKind::Recipe).await.unwrap();
        let links = backend.load(EntityKind::RecipeIngredient).await.unwrap();
        assert_eq!(
            links[0].field("recipeId"),
            Some(&Value::String(recipes[0].backend_id.clone().unwrap()))
        );
        assert_eq!(
            links[0].field("articleId"),
            Some(&Value::String(articles[0].backend_id.clone().unwrap()))
        );

        assert_eq!(report.remapped_references, 3);
        assert!(report.skipped.is_empty());
    }

    #[tokio::test]
    async fn test_replace_all_without_assigned_keys_keeps_references() {
        let dir = TempDir::new().unwrap();
        let adapter = LocalAdapter::new(dir.path());

        let dataset = Dataset {
            suppliers: vec![entity("s1", json!({ "name": "Mill & Co" }))],
            articles: vec![entity(
                "a1",
                json!({ "name": "Flour", "supplierId": "s1" }),
            )],
            ..Dataset::default()
        };

        let report = replace_all(&adapter, &dataset, None).await.unwrap();

        let articles = adapter.load(EntityKind::Article).await.unwrap();
        assert_eq!(articles[0].field("supplierId"), Some(&json!("s1")));
        assert_eq!(report.remapped_references, 0);
    }

    #[tokio::test]
    async fn test_replace_all_reports_aggregate_progress() {
        let dir = TempDir::new().unwrap();
        let adapter = LocalAdapter::new(dir.path());

        let dataset = Dataset {
            suppliers: vec![entity("s1", json!({ "name": "A" }))],
            articles: vec![
                entity("a1", json!({ "name": "B" })),
                entity("a2", json!({ "name": "C" })),
            ],
            ..Dataset::default()
        };

        let seen = Mutex::new(Vec::new());
        replace_all(
            &adapter,
            &dataset,
            Some(&|done, total| {
                assert_eq!(total, 3);
                seen.lock().unwrap().push(done);
            }),
        )
        .await
        .unwrap();

        let seen = seen.into_inner().unwrap();
        assert_eq!(seen.first(), Some(&0));
        assert_eq!(seen.last(), Some(&3));
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
    }
}
