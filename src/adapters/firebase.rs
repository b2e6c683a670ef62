use crate::domain::model::{Entity, EntityKind, ImageBlob, SaveOutcome, SkippedEntity};
use crate::domain::ports::{PictureStore, Progress, StorageAdapter, IMAGE_EXTENSIONS};
use crate::transform::{self, WireProfile};
use crate::utils::error::{Result, StoreError};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;

/// Managed-platform adapter over a tree-shaped REST database
/// (`/<kind>/<id>.json`) with an `auth` query token, plus a path-style
/// bucket URL for pictures. The tree keeps the application id as its own
/// lookup key, so no backend keys are ever assigned.
pub struct FirebaseAdapter {
    client: Client,
    database_url: String,
    storage_url: String,
    bucket: String,
    auth_token: String,
}

impl FirebaseAdapter {
    pub fn new(
        database_url: impl Into<String>,
        storage_url: impl Into<String>,
        bucket: impl Into<String>,
        auth_token: impl Into<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            database_url: database_url.into().trim_end_matches('/').to_string(),
            storage_url: storage_url.into().trim_end_matches('/').to_string(),
            bucket: bucket.into(),
            auth_token: auth_token.into(),
        }
    }

    fn record_url(&self, kind: EntityKind, id: &str) -> String {
        format!("{}/{}/{}.json", self.database_url, kind.collection(), id)
    }

    fn collection_url(&self, kind: EntityKind) -> String {
        format!("{}/{}.json", self.database_url, kind.collection())
    }

    fn object_url(&self, kind: EntityKind, id: &str, extension: &str) -> String {
        format!(
            "{}/{}/pictures/{}/{}.{}",
            self.storage_url,
            self.bucket,
            kind.collection(),
            id,
            extension
        )
    }

    fn auth_query(&self) -> [(&'static str, &str); 1] {
        [("auth", self.auth_token.as_str())]
    }

    fn check_status(status: StatusCode, what: &str) -> Result<()> {
        if status.is_success() {
            return Ok(());
        }
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(StoreError::auth(format!(
                "database token rejected during {}",
                what
            ))),
            _ => Err(StoreError::connection(format!(
                "{} failed with status {}",
                what, status
            ))),
        }
    }
}

#[async_trait]
impl StorageAdapter for FirebaseAdapter {
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

        let mut outcome = SaveOutcome::default();
        for (index, entity) in entities.iter().enumerate() {
            match transform::encode(kind, entity, WireProfile::Tree) {
                Ok(record) => {
                    // PUT at the id path upserts the record in place
                    let response = self
                        .client
                        .put(self.record_url(kind, &entity.id))
                        .query(&self.auth_query())
                        .json(&record)
                        .send()
                        .await
                        .map_err(StoreError::from_transport)?;
                    Self::check_status(response.status(), &format!("save of {}", kind))?;
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

        Ok(outcome)
    }

    async fn load(&self, kind: EntityKind) -> Result<Vec<Entity>> {
        let response = self
            .client
            .get(self.collection_url(kind))
            .query(&self.auth_query())
            .send()
            .await
            .map_err(StoreError::from_transport)?;
        Self::check_status(response.status(), &format!("load of {}", kind))?;

        let body: Value = response.json().await.map_err(StoreError::from_transport)?;
        match body {
            // a never-written path answers with null, not an error
            Value::Null => Ok(Vec::new()),
            Value::Object(records) => records
                .values()
                .map(|record| transform::decode(kind, record, WireProfile::Tree))
                .collect(),
            _ => Err(StoreError::schema(format!(
                "{} tree holds a non-object value",
                kind
            ))),
        }
    }

    async fn delete(&self, kind: EntityKind, id: &str) -> Result<bool> {
        // the tree answers success for deleting absent paths; probe first
        // so missing records report false
        let url = self.record_url(kind, id);
        let response = self
            .client
            .get(&url)
            .query(&self.auth_query())
            .query(&[("shallow", "true")])
            .send()
            .await
            .map_err(StoreError::from_transport)?;
        Self::check_status(response.status(), &format!("lookup in {}", kind))?;
        let existing: Value = response.json().await.map_err(StoreError::from_transport)?;
        if existing.is_null() {
            return Ok(false);
        }

        let response = self
            .client
            .delete(&url)
            .query(&self.auth_query())
            .send()
            .await
            .map_err(StoreError::from_transport)?;
        Self::check_status(response.status(), &format!("delete from {}", kind))?;
        Ok(true)
    }

    async fn test_connection(&self) -> bool {
        let url = format!("{}/.json", self.database_url);
        let result = self
            .client
            .get(&url)
            .query(&self.auth_query())
            .query(&[("shallow", "true")])
            .send()
            .await;
        matches!(result, Ok(response) if response.status().is_success())
    }
}

#[async_trait]
impl PictureStore for FirebaseAdapter {
    async fn save_image(
        &self,
        kind: EntityKind,
        id: &str,
        bytes: &[u8],
        extension: &str,
    ) -> Result<()> {
        for ext in IMAGE_EXTENSIONS {
            if *ext != extension {
                let _ = self
                    .client
                    .delete(self.object_url(kind, id, ext))
                    .query(&self.auth_query())
                    .send()
                    .await;
            }
        }

        let response = self
            .client
            .put(self.object_url(kind, id, extension))
            .query(&self.auth_query())
            .header("Content-Type", "application/octet-stream")
            .body(bytes.to_vec())
            .send()
            .await
            .map_err(StoreError::from_transport)?;
        Self::check_status(response.status(), "picture upload")
    }

    async fn load_image(&self, kind: EntityKind, id: &str) -> Result<Option<ImageBlob>> {
        for ext in IMAGE_EXTENSIONS {
            let response = self
                .client
                .get(self.object_url(kind, id, ext))
                .query(&self.auth_query())
                .send()
                .await
                .map_err(StoreError::from_transport)?;
            if response.status().is_success() {
                let bytes = response.bytes().await.map_err(StoreError::from_transport)?;
                return Ok(Some(ImageBlob {
                    bytes: bytes.to_vec(),
                    extension: ext.to_string(),
                }));
            }
        }
        Ok(None)
    }

    async fn delete_image(&self, kind: EntityKind, id: &str) -> Result<bool> {
        let mut removed = false;
        for ext in IMAGE_EXTENSIONS {
            let response = self
                .client
                .delete(self.object_url(kind, id, ext))
                .query(&self.auth_query())
                .send()
                .await
                .map_err(StoreError::from_transport)?;
            if response.status().is_success() {
                removed = true;
            }
        }
        Ok(removed)
    }

    async fn test_connection(&self) -> bool {
        StorageAdapter::test_connection(self).await
    }
}
