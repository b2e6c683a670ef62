use crate::domain::model::{Entity, EntityKind, ImageBlob, SaveOutcome, SkippedEntity};
use crate::domain::ports::{PictureStore, Progress, SettingsStore, StorageAdapter, IMAGE_EXTENSIONS};
use crate::transform::{self, WireProfile};
use crate::utils::error::{Result, StoreError};
use async_trait::async_trait;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

/// Embedded local backend: one JSON file per entity kind under a base
/// directory, picture files under `pictures/<kind>/`. No network.
#[derive(Debug, Clone)]
pub struct LocalAdapter {
    base_path: PathBuf,
}

impl LocalAdapter {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    fn kind_path(&self, kind: EntityKind) -> PathBuf {
        self.base_path.join(format!("{}.json", kind.collection()))
    }

    fn picture_path(&self, kind: EntityKind, id: &str, extension: &str) -> PathBuf {
        self.base_path
            .join("pictures")
            .join(kind.collection())
            .join(format!("{}.{}", id, extension))
    }

    fn read_all(&self, kind: EntityKind) -> Result<Vec<Value>> {
        let path = self.kind_path(kind);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let data = fs::read(&path)?;
        let values: Vec<Value> = serde_json::from_slice(&data)?;
        Ok(values)
    }

    fn write_all(&self, kind: EntityKind, values: &[Value]) -> Result<()> {
        let path = self.kind_path(kind);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_vec_pretty(values)?)?;
        Ok(())
    }
}

#[async_trait]
impl StorageAdapter for LocalAdapter {
    async fn save(
        &self,
        kind: EntityKind,
        entities: &[Entity],
        progress: Progress<'_>,
    ) -> Result<SaveOutcome> {
        let total = entities.len();
        if let Some(report) = progress {
            report(0, total);
        }

        // Merge-save: replace-in-place by id, else append, write back once.
        let mut current = self.read_all(kind)?;
        let mut outcome = SaveOutcome::default();

        for (index, entity) in entities.iter().enumerate() {
            match transform::encode(kind, entity, WireProfile::Canonical) {
                Ok(wire) => {
                    let slot = current
                        .iter_mut()
                        .find(|v| v.get("id").and_then(Value::as_str) == Some(entity.id.as_str()));
                    match slot {
                        Some(existing) => *existing = wire,
                        None => current.push(wire),
                    }
                }
                Err(StoreError::ValidationError { field, message }) => {
                    tracing::warn!("🔶 {}: skipping record '{}': {}", kind, entity.id, message);
                    outcome.skipped.push(SkippedEntity {
                        id: entity.id.clone(),
                        reason: format!("{}: {}", field, message),
                    });
                }
                Err(e) => return Err(e),
            }
            if let Some(report) = progress {
                report(index + 1, total);
            }
        }

        self.write_all(kind, &current)?;
        tracing::debug!("💾 {}: merged {} records into local store", kind, total);
        Ok(outcome)
    }

    async fn load(&self, kind: EntityKind) -> Result<Vec<Entity>> {
        self.read_all(kind)?
            .iter()
            .map(|wire| transform::decode(kind, wire, WireProfile::Canonical))
            .collect()
    }

    async fn delete(&self, kind: EntityKind, id: &str) -> Result<bool> {
        let mut current = self.read_all(kind)?;
        let before = current.len();
        current.retain(|v| v.get("id").and_then(Value::as_str) != Some(id));
        if current.len() == before {
            return Ok(false);
        }
        self.write_all(kind, &current)?;
        Ok(true)
    }

    async fn test_connection(&self) -> bool {
        fs::create_dir_all(&self.base_path).is_ok()
    }
}

#[async_trait]
impl PictureStore for LocalAdapter {
    async fn save_image(
        &self,
        kind: EntityKind,
        id: &str,
        bytes: &[u8],
        extension: &str,
    ) -> Result<()> {
        // Deterministic filename per entity; stale assets under another
        // extension are removed so re-uploads never accumulate orphans.
        for ext in IMAGE_EXTENSIONS {
            if *ext != extension {
                let stale = self.picture_path(kind, id, ext);
                if stale.exists() {
                    let _ = fs::remove_file(stale);
                }
            }
        }

        let path = self.picture_path(kind, id, extension);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, bytes)?;
        Ok(())
    }

    async fn load_image(&self, kind: EntityKind, id: &str) -> Result<Option<ImageBlob>> {
        for ext in IMAGE_EXTENSIONS {
            let path = self.picture_path(kind, id, ext);
            if path.exists() {
                return Ok(Some(ImageBlob {
                    bytes: fs::read(path)?,
                    extension: ext.to_string(),
                }));
            }
        }
        Ok(None)
    }

    async fn delete_image(&self, kind: EntityKind, id: &str) -> Result<bool> {
        let mut removed = false;
        for ext in IMAGE_EXTENSIONS {
            let path = self.picture_path(kind, id, ext);
            if path.exists() && fs::remove_file(path).is_ok() {
                removed = true;
            }
        }
        Ok(removed)
    }

    async fn test_connection(&self) -> bool {
        fs::create_dir_all(self.base_path.join("pictures")).is_ok()
    }
}

/// File-backed key/value store for per-connection state (derived
/// credentials). One flat JSON object per file.
#[derive(Debug, Clone)]
pub struct FileSettings {
    path: PathBuf,
}

impl FileSettings {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn read_map(&self) -> Result<serde_json::Map<String, Value>> {
        if !Path::new(&self.path).exists() {
            return Ok(serde_json::Map::new());
        }
        let data = fs::read(&self.path)?;
        Ok(serde_json::from_slice(&data)?)
    }
}

#[async_trait]
impl SettingsStore for FileSettings {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .read_map()?
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string))
    }

    async fn put(&self, key: &str, value: &str) -> Result<()> {
        let mut map = self.read_map()?;
        map.insert(key.to_string(), Value::String(value.to_string()));
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_vec_pretty(&map)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn entity(id: &str, name: &str) -> Entity {
        Entity::with_id(
            id,
            json!({ "name": name }).as_object().unwrap().clone(),
        )
    }

    #[tokio::test]
    async fn test_load_never_written_kind_returns_empty() {
        let dir = TempDir::new().unwrap();
        let adapter = LocalAdapter::new(dir.path());

        let loaded = adapter.load(EntityKind::Article).await.unwrap();
        assert!(loaded.is_empty());
    }

    #[tokio::test]
    async fn test_merge_save_is_non_destructive() {
        let dir = TempDir::new().unwrap();
        let adapter = LocalAdapter::new(dir.path());

        adapter
            .save(EntityKind::Article, &[entity("y", "Yeast")], None)
            .await
            .unwrap();
        adapter
            .save(EntityKind::Article, &[entity("x", "Flour")], None)
            .await
            .unwrap();

        let loaded = adapter.load(EntityKind::Article).await.unwrap();
        assert_eq!(loaded.len(), 2);

        // upsert by id replaces in place
        adapter
            .save(EntityKind::Article, &[entity("x", "Rye Flour")], None)
            .await
            .unwrap();
        let loaded = adapter.load(EntityKind::Article).await.unwrap();
        assert_eq!(loaded.len(), 2);
        let x = loaded.iter().find(|e| e.id == "x").unwrap();
        assert_eq!(x.field("name"), Some(&json!("Rye Flour")));
    }

    #[tokio::test]
    async fn test_progress_fires_before_and_after() {
        let dir = TempDir::new().unwrap();
        let adapter = LocalAdapter::new(dir.path());
        let calls = AtomicUsize::new(0);

        let batch = vec![entity("a", "A"), entity("b", "B"), entity("c", "C")];
        adapter
            .save(
                EntityKind::Supplier,
                &batch,
                Some(&|done, total| {
                    assert_eq!(total, 3);
                    assert_eq!(done, calls.fetch_add(1, Ordering::SeqCst));
                }),
            )
            .await
            .unwrap();

        // (0,3) plus one call per item
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_delete_missing_returns_false() {
        let dir = TempDir::new().unwrap();
        let adapter = LocalAdapter::new(dir.path());

        assert!(!adapter
            .delete(EntityKind::Recipe, "nonexistent")
            .await
            .unwrap());

        adapter
            .save(EntityKind::Recipe, &[entity("r1", "Bread")], None)
            .await
            .unwrap();
        assert!(adapter.delete(EntityKind::Recipe, "r1").await.unwrap());
        assert!(!adapter.delete(EntityKind::Recipe, "r1").await.unwrap());
    }

    #[tokio::test]
    async fn test_invalid_required_reference_is_skipped_not_fatal() {
        let dir = TempDir::new().unwrap();
        let adapter = LocalAdapter::new(dir.path());

        let good = Entity::with_id(
            "ok",
            json!({ "recipeId": "r1", "articleId": "a1", "amount": 1 })
                .as_object()
                .unwrap()
                .clone(),
        );
        let bad = Entity::with_id(
            "bad",
            json!({ "recipeId": "not valid!", "articleId": "a1", "amount": 1 })
                .as_object()
                .unwrap()
                .clone(),
        );

        let outcome = adapter
            .save(EntityKind::RecipeIngredient, &[good, bad], None)
            .await
            .unwrap();

        assert_eq!(outcome.skipped.len(), 1);
        assert_eq!(outcome.skipped[0].id, "bad");
        let loaded = adapter.load(EntityKind::RecipeIngredient).await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, "ok");
    }

    #[tokio::test]
    async fn test_picture_overwrite_and_probe() {
        let dir = TempDir::new().unwrap();
        let adapter = LocalAdapter::new(dir.path());

        adapter
            .save_image(EntityKind::Article, "a1", b"png-bytes", "png")
            .await
            .unwrap();
        // re-upload under a different extension replaces the old asset
        adapter
            .save_image(EntityKind::Article, "a1", b"jpg-bytes", "jpg")
            .await
            .unwrap();

        let blob = adapter
            .load_image(EntityKind::Article, "a1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(blob.extension, "jpg");
        assert_eq!(blob.bytes, b"jpg-bytes");

        assert!(adapter.delete_image(EntityKind::Article, "a1").await.unwrap());
        assert!(!adapter.delete_image(EntityKind::Article, "a1").await.unwrap());
        assert!(adapter
            .load_image(EntityKind::Article, "a1")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_file_settings_round_trip() {
        let dir = TempDir::new().unwrap();
        let settings = FileSettings::new(dir.path().join("settings.json"));

        assert!(settings.get("token").await.unwrap().is_none());
        settings.put("token", "abc").await.unwrap();
        settings.put("other", "xyz").await.unwrap();
        assert_eq!(settings.get("token").await.unwrap().as_deref(), Some("abc"));
    }
}
