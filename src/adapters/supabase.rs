use crate::domain::model::{
    Entity, EntityKind, IdAssignment, ImageBlob, SaveOutcome, SkippedEntity,
};
use crate::domain::ports::{PictureStore, Progress, StorageAdapter, IMAGE_EXTENSIONS};
use crate::transform::{self, WireProfile, FRONTEND_ID_COLUMN};
use crate::utils::error::{Result, StoreError};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::Value;

/// Managed-platform adapter bundling a PostgREST-compatible row surface
/// (`/rest/v1`) and an object bucket (`/storage/v1`). Platform keys are
/// static, so a 401 is fatal immediately; the refresh/retry protocol only
/// applies to derived tokens.
pub struct SupabaseAdapter {
    client: Client,
    base_url: String,
    api_key: String,
    bucket: String,
}

impl SupabaseAdapter {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        bucket: impl Into<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            bucket: bucket.into(),
        }
    }

    fn table_url(&self, kind: EntityKind) -> String {
        format!("{}/rest/v1/{}", self.base_url, kind.collection())
    }

    fn object_url(&self, kind: EntityKind, id: &str, extension: &str) -> String {
        format!(
            "{}/storage/v1/object/{}/pictures/{}/{}.{}",
            self.base_url,
            self.bucket,
            kind.collection(),
            id,
            extension
        )
    }

    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }

    fn check_status(status: StatusCode, what: &str) -> Result<()> {
        if status.is_success() {
            return Ok(());
        }
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(StoreError::auth(format!(
                "platform key rejected during {}",
                what
            ))),
            StatusCode::NOT_FOUND => Err(StoreError::schema(format!(
                "missing relation or bucket behind {}",
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
impl StorageAdapter for SupabaseAdapter {
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
            match transform::encode(kind, entity, WireProfile::RelationalJson) {
                Ok(row) => match &entity.backend_id {
                    Some(backend_id) => {
                        let response = self
                            .authed(
                                self.client
                                    .patch(self.table_url(kind))
                                    .query(&[("id", format!("eq.{}", backend_id))])
                                    .json(&row),
                            )
                            .send()
                            .await
                            .map_err(StoreError::from_transport)?;
                        Self::check_status(response.status(), &format!("update of {}", kind))?;
                    }
                    None => {
                        let response = self
                            .authed(
                                self.client
                                    .post(self.table_url(kind))
                                    .header("Prefer", "return=representation")
                                    .json(&row),
                            )
                            .send()
                            .await
                            .map_err(StoreError::from_transport)?;
                        Self::check_status(response.status(), &format!("insert into {}", kind))?;

                        let body: Vec<Value> =
                            response.json().await.map_err(StoreError::from_transport)?;
                        let backend_id = body
                            .first()
                            .and_then(|r| r.get("id"))
                            .and_then(transform::id_string)
                            .ok_or_else(|| {
                                StoreError::schema(format!(
                                    "{} insert returned no generated key",
                                    kind
                                ))
                            })?;
                        outcome.assignments.push(IdAssignment {
                            id: entity.id.clone(),
                            backend_id,
                        });
                    }
                },
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
            .authed(self.client.get(self.table_url(kind)).query(&[("select", "*")]))
            .send()
            .await
            .map_err(StoreError::from_transport)?;
        Self::check_status(response.status(), &format!("load of {}", kind))?;

        let rows: Vec<Value> = response.json().await.map_err(StoreError::from_transport)?;
        rows.iter()
            .map(|row| transform::decode(kind, row, WireProfile::RelationalJson))
            .collect()
    }

    async fn delete(&self, kind: EntityKind, id: &str) -> Result<bool> {
        let response = self
            .authed(
                self.client
                    .delete(self.table_url(kind))
                    .query(&[(FRONTEND_ID_COLUMN, format!("eq.{}", id))])
                    .header("Prefer", "return=representation"),
            )
            .send()
            .await
            .map_err(StoreError::from_transport)?;
        Self::check_status(response.status(), &format!("delete from {}", kind))?;

        let deleted: Vec<Value> = response.json().await.map_err(StoreError::from_transport)?;
        Ok(!deleted.is_empty())
    }

    async fn test_connection(&self) -> bool {
        let url = format!("{}/rest/v1/", self.base_url);
        match self.authed(self.client.get(&url)).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}

#[async_trait]
impl PictureStore for SupabaseAdapter {
    async fn save_image(
        &self,
        kind: EntityKind,
        id: &str,
        bytes: &[u8],
        extension: &str,
    ) -> Result<()> {
        // same-key uploads overwrite via x-upsert; stale assets under other
        // extensions are removed explicitly
        for ext in IMAGE_EXTENSIONS {
            if *ext != extension {
                let _ = self
                    .authed(self.client.delete(self.object_url(kind, id, ext)))
                    .send()
                    .await;
            }
        }

        let response = self
            .authed(
                self.client
                    .post(self.object_url(kind, id, extension))
                    .header("x-upsert", "true")
                    .header("Content-Type", "application/octet-stream")
                    .body(bytes.to_vec()),
            )
            .send()
            .await
            .map_err(StoreError::from_transport)?;
        Self::check_status(response.status(), "picture upload")
    }

    async fn load_image(&self, kind: EntityKind, id: &str) -> Result<Option<ImageBlob>> {
        for ext in IMAGE_EXTENSIONS {
            let response = self
                .authed(self.client.get(self.object_url(kind, id, ext)))
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
                .authed(self.client.delete(self.object_url(kind, id, ext)))
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
