use crate::adapters::couch::CouchAdapter;
use crate::adapters::firebase::FirebaseAdapter;
use crate::adapters::local::{FileSettings, LocalAdapter};
use crate::adapters::postgrest::PostgrestAdapter;
use crate::adapters::s3::S3PictureAdapter;
use crate::adapters::supabase::SupabaseAdapter;
use crate::config::{BackendConfig, StorageConfig};
use crate::core::token::TokenManager;
use crate::domain::model::{Entity, EntityKind, ImageBlob, SaveOutcome};
use crate::domain::ports::{PictureStore, Progress, SettingsStore, StorageAdapter};
use crate::utils::error::{Result, StoreError};
use crate::utils::validation::Validate;
use std::sync::Arc;

/// The orchestrator: resolves a configuration into a data/picture adapter
/// pair, verifies connectivity, and routes every application-level call.
///
/// A context is an explicit value threaded through the call graph; there
/// is no process-wide singleton, and switching configuration means
/// constructing a new context. Multiple independent contexts may coexist.
pub struct StorageContext {
    config: StorageConfig,
    data: Box<dyn StorageAdapter>,
    pictures: Box<dyn PictureStore>,
}

impl std::fmt::Debug for StorageContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageContext")
            .field("config", &self.config)
            .finish()
    }
}

impl StorageContext {
    /// Validates the configuration, builds both adapters, and verifies
    /// connectivity with each backend's cheap probe before returning.
    pub async fn connect(config: StorageConfig) -> Result<Self> {
        config.validate()?;
        let settings: Arc<dyn SettingsStore> =
            Arc::new(FileSettings::new(config.settings_path.clone()));

        let data = Self::build_data_adapter(&config.data, settings.clone()).await?;
        if !data.test_connection().await {
            return Err(StoreError::connection(format!(
                "data backend '{}' is unreachable",
                config.data.kind()
            )));
        }

        let pictures = Self::build_picture_adapter(&config.pictures).await?;
        if !pictures.test_connection().await {
            return Err(StoreError::connection(format!(
                "picture backend '{}' is unreachable",
                config.pictures.kind()
            )));
        }

        tracing::info!(
            "✅ storage ready: data via '{}', pictures via '{}'",
            config.data.kind(),
            config.pictures.kind()
        );
        Ok(Self {
            config,
            data,
            pictures,
        })
    }

    async fn build_data_adapter(
        config: &BackendConfig,
        settings: Arc<dyn SettingsStore>,
    ) -> Result<Box<dyn StorageAdapter>> {
        let adapter: Box<dyn StorageAdapter> = match config {
            BackendConfig::Local { base_dir } => Box::new(LocalAdapter::new(base_dir)),
            BackendConfig::Postgrest {
                base_url,
                jwt_secret,
                token_role,
            } => {
                let tokens =
                    TokenManager::new(jwt_secret, token_role, "postgrest.credential", settings);
                let adapter = PostgrestAdapter::new(base_url, tokens);
                if let Err(e) = adapter.ensure_schema().await {
                    tracing::warn!("🔶 schema check on '{}' not conclusive: {}", base_url, e);
                }
                Box::new(adapter)
            }
            BackendConfig::Couch {
                base_url,
                username,
                password,
                db_prefix,
            } => {
                let adapter = CouchAdapter::new(base_url, username, password, db_prefix);
                if let Err(e) = adapter.ensure_schema().await {
                    tracing::warn!("🔶 database setup on '{}' not conclusive: {}", base_url, e);
                }
                Box::new(adapter)
            }
            BackendConfig::Supabase {
                base_url,
                api_key,
                bucket,
            } => Box::new(SupabaseAdapter::new(base_url, api_key, bucket)),
            BackendConfig::Firebase {
                database_url,
                storage_url,
                bucket,
                auth_token,
            } => Box::new(FirebaseAdapter::new(
                database_url,
                storage_url,
                bucket,
                auth_token,
            )),
            BackendConfig::S3 { .. } => {
                return Err(StoreError::config(
                    "the object-storage backend holds binary assets only",
                ))
            }
        };
        Ok(adapter)
    }

    async fn build_picture_adapter(config: &BackendConfig) -> Result<Box<dyn PictureStore>> {
        let adapter: Box<dyn PictureStore> = match config {
            BackendConfig::Local { base_dir } => Box::new(LocalAdapter::new(base_dir)),
            BackendConfig::Supabase {
                base_url,
                api_key,
                bucket,
            } => Box::new(SupabaseAdapter::new(base_url, api_key, bucket)),
            BackendConfig::Firebase {
                database_url,
                storage_url,
                bucket,
                auth_token,
            } => Box::new(FirebaseAdapter::new(
                database_url,
                storage_url,
                bucket,
                auth_token,
            )),
            BackendConfig::S3 {
                bucket,
                region,
                endpoint,
            } => Box::new(
                S3PictureAdapter::connect(bucket.clone(), region.clone(), endpoint.clone()).await,
            ),
            BackendConfig::Postgrest { .. } | BackendConfig::Couch { .. } => {
                return Err(StoreError::config(
                    "row and document backends cannot hold binary assets",
                ))
            }
        };
        Ok(adapter)
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub async fn save(
        &self,
        kind: EntityKind,
        entities: &[Entity],
        progress: Progress<'_>,
    ) -> Result<SaveOutcome> {
        self.data.save(kind, entities, progress).await
    }

    pub async fn load(&self, kind: EntityKind) -> Result<Vec<Entity>> {
        self.data.load(kind).await
    }

    /// Deletes a record. For picture-bearing kinds the asset delete runs
    /// first, best-effort: its failure is logged and never blocks or rolls
    /// back the record delete.
    pub async fn delete(&self, kind: EntityKind, id: &str) -> Result<bool> {
        if kind.has_pictures() {
            if let Err(e) = self.pictures.delete_image(kind, id).await {
                tracing::warn!("🔶 {}: picture cleanup for '{}' failed: {}", kind, id, e);
            }
        }
        self.data.delete(kind, id).await
    }

    /// One-shot bulk import: wipes and rewrites every entity kind in
    /// parent-first order, remapping identifiers into dependent references.
    pub async fn replace_all(
        &self,
        dataset: &crate::domain::model::Dataset,
        progress: Progress<'_>,
    ) -> Result<crate::core::sync::SyncReport> {
        crate::core::sync::replace_all(self.data.as_ref(), dataset, progress).await
    }

    fn check_picture_kind(kind: EntityKind) -> Result<()> {
        if kind.has_pictures() {
            Ok(())
        } else {
            Err(StoreError::ValidationError {
                field: "kind".to_string(),
                message: format!("{} records do not carry pictures", kind),
            })
        }
    }

    pub async fn save_image(
        &self,
        kind: EntityKind,
        id: &str,
        bytes: &[u8],
        extension: &str,
    ) -> Result<()> {
        Self::check_picture_kind(kind)?;
        self.pictures.save_image(kind, id, bytes, extension).await
    }

    pub async fn load_image(&self, kind: EntityKind, id: &str) -> Result<Option<ImageBlob>> {
        Self::check_picture_kind(kind)?;
        self.pictures.load_image(kind, id).await
    }

    pub async fn delete_image(&self, kind: EntityKind, id: &str) -> Result<bool> {
        Self::check_picture_kind(kind)?;
        self.pictures.delete_image(kind, id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Mode;
    use serde_json::json;
    use tempfile::TempDir;

    fn local_config(dir: &TempDir) -> StorageConfig {
        let base = dir.path().to_str().unwrap().to_string();
        StorageConfig {
            mode: Mode::Local,
            data: BackendConfig::Local {
                base_dir: base.clone(),
            },
            pictures: BackendConfig::Local { base_dir: base },
            settings_path: dir
                .path()
                .join("settings.json")
                .to_str()
                .unwrap()
                .to_string(),
        }
    }

    fn article(id: &str, name: &str) -> Entity {
        Entity::with_id(
            id,
            json!({ "name": name }).as_object().unwrap().clone(),
        )
    }

    #[tokio::test]
    async fn test_local_round_trip_through_context() {
        let dir = TempDir::new().unwrap();
        let context = StorageContext::connect(local_config(&dir)).await.unwrap();

        context
            .save(EntityKind::Article, &[article("a1", "Flour")], None)
            .await
            .unwrap();
        let loaded = context.load(EntityKind::Article).await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, "a1");

        assert!(context.delete(EntityKind::Article, "a1").await.unwrap());
        assert!(context.load(EntityKind::Article).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_configuration_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut config = local_config(&dir);
        config.mode = Mode::Cloud;

        let err = StorageContext::connect(config).await.unwrap_err();
        assert!(matches!(err, StoreError::ConfigError { .. }));
    }

    #[tokio::test]
    async fn test_record_delete_removes_picture_first() {
        let dir = TempDir::new().unwrap();
        let context = StorageContext::connect(local_config(&dir)).await.unwrap();

        context
            .save(EntityKind::Recipe, &[article("r1", "Bread")], None)
            .await
            .unwrap();
        context
            .save_image(EntityKind::Recipe, "r1", b"png-bytes", "png")
            .await
            .unwrap();

        assert!(context.delete(EntityKind::Recipe, "r1").await.unwrap());
        assert!(context
            .load_image(EntityKind::Recipe, "r1")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_pictures_rejected_for_non_picture_kind() {
        let dir = TempDir::new().unwrap();
        let context = StorageContext::connect(local_config(&dir)).await.unwrap();

        let err = context
            .save_image(EntityKind::Supplier, "s1", b"x", "png")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ValidationError { .. }));
    }

    #[tokio::test]
    async fn test_independent_contexts_do_not_share_state() {
        let dir_a = TempDir::new().unwrap();
        let dir_b = TempDir::new().unwrap();
        let a = StorageContext::connect(local_config(&dir_a)).await.unwrap();
        let b = StorageContext::connect(local_config(&dir_b)).await.unwrap();

        a.save(EntityKind::Article, &[article("a1", "Flour")], None)
            .await
            .unwrap();

        assert_eq!(a.load(EntityKind::Article).await.unwrap().len(), 1);
        assert!(b.load(EntityKind::Article).await.unwrap().is_empty());
    }
}
