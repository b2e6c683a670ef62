use crate::core::token::TokenManager;
use crate::domain::model::{Entity, EntityKind, IdAssignment, SaveOutcome, SkippedEntity};
use crate::domain::ports::{Progress, StorageAdapter};
use crate::transform::{self, WireProfile, FRONTEND_ID_COLUMN};
use crate::utils::error::{Result, StoreError};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::Value;

/// Maintenance RPC probed by `ensure_schema`. Creating it is the server's
/// migration concern; this layer only calls it.
const SCHEMA_RPC: &str = "pantry_schema_check";

/// Row-oriented REST adapter for a PostgREST-style relational surface.
/// The backend owns its serial primary key; the application id lives in an
/// indexed `frontend_id` column. Secured by a derived bearer token.
pub struct PostgrestAdapter {
    client: Client,
    base_url: String,
    tokens: TokenManager,
}

impl PostgrestAdapter {
    pub fn new(base_url: impl Into<String>, tokens: TokenManager) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            tokens,
        }
    }

    fn table_url(&self, kind: EntityKind) -> String {
        format!("{}/{}", self.base_url, kind.collection())
    }

    /// Runs a request with the current bearer token. On a 401 the token is
    /// refreshed exactly once and the same request retried exactly once; a
    /// second 401 is a fatal authorization error.
    async fn send_authed<F>(&self, build: F) -> Result<Response>
    where
        F: Fn(&str) -> RequestBuilder,
    {
        let credential = self.tokens.current().await?;
        let response = build(&credential.token)
            .send()
            .await
            .map_err(StoreError::from_transport)?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        tracing::warn!("🔑 bearer token rejected, refreshing and retrying once");
        let credential = self.tokens.refresh().await?;
        let retry = build(&credential.token)
            .send()
            .await
            .map_err(StoreError::from_transport)?;
        if retry.status() == StatusCode::UNAUTHORIZED {
            return Err(StoreError::auth(
                "bearer token rejected again after refresh",
            ));
        }
        Ok(retry)
    }

    fn expect_success(response: &Response, what: &str) -> Result<()> {
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        if status == StatusCode::NOT_FOUND {
            return Err(StoreError::schema(format!(
                "missing relation behind {}",
                what
            )));
        }
        Err(StoreError::connection(format!(
            "{} failed with status {}",
            what, status
        )))
    }

    async fn insert(&self, kind: EntityKind, entity: &Entity, row: Value) -> Result<IdAssignment> {
        let url = self.table_url(kind);
        let response = self
            .send_authed(|token| {
                self.client
                    .post(&url)
                    .bearer_auth(token)
                    .header("Prefer", "return=representation")
                    .json(&row)
            })
            .await?;
        Self::expect_success(&response, &format!("insert into {}", kind))?;

        // the engine-assigned key comes back in the representation
        let body: Vec<Value> = response.json().await.map_err(StoreError::from_transport)?;
        let backend_id = body
            .first()
            .and_then(|r| r.get("id"))
            .and_then(transform::id_string)
            .ok_or_else(|| {
                StoreError::schema(format!("{} insert returned no generated key", kind))
            })?;

        Ok(IdAssignment {
            id: entity.id.clone(),
            backend_id,
        })
    }

    async fn update(&self, kind: EntityKind, backend_id: &str, row: Value) -> Result<()> {
        let url = self.table_url(kind);
        let response = self
            .send_authed(|token| {
                self.client
                    .patch(&url)
                    .query(&[("id", format!("eq.{}", backend_id))])
                    .bearer_auth(token)
                    .json(&row)
            })
            .await?;
        Self::expect_success(&response, &format!("update of {}", kind))
    }

    /// Privileged maintenance probe: asks the backend to verify (and where
    /// supported, create) the expected tables. Never called in the hot path.
    pub async fn ensure_schema(&self) -> Result<()> {
        let url = format!("{}/rpc/{}", self.base_url, SCHEMA_RPC);
        let response = self
            .send_authed(|token| self.client.post(&url).bearer_auth(token).json(&Value::Null))
            .await?;
        Self::expect_success(&response, "schema check")
    }
}

#[async_trait]
impl StorageAdapter for PostgrestAdapter {
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
            match transform::encode(kind, entity, WireProfile::RelationalFlat) {
                Ok(row) => match &entity.backend_id {
                    Some(backend_id) => self.update(kind, backend_id, row).await?,
                    None => {
                        let assignment = self.insert(kind, entity, row).await?;
                        outcome.assignments.push(assignment);
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

        tracing::debug!(
            "💾 {}: saved {} records ({} skipped)",
            kind,
            total - outcome.skipped.len(),
            outcome.skipped.len()
        );
        Ok(outcome)
    }

    async fn load(&self, kind: EntityKind) -> Result<Vec<Entity>> {
        let url = self.table_url(kind);
        let response = self
            .send_authed(|token| {
                self.client
                    .get(&url)
                    .query(&[("select", "*")])
                    .bearer_auth(token)
            })
            .await?;
        Self::expect_success(&response, &format!("load of {}", kind))?;

        let rows: Vec<Value> = response.json().await.map_err(StoreError::from_transport)?;
        rows.iter()
            .map(|row| transform::decode(kind, row, WireProfile::RelationalFlat))
            .collect()
    }

    async fn delete(&self, kind: EntityKind, id: &str) -> Result<bool> {
        let url = self.table_url(kind);
        let response = self
            .send_authed(|token| {
                self.client
                    .delete(&url)
                    .query(&[(FRONTEND_ID_COLUMN, format!("eq.{}", id))])
                    .bearer_auth(token)
                    .header("Prefer", "return=representation")
            })
            .await?;
        Self::expect_success(&response, &format!("delete from {}", kind))?;

        let deleted: Vec<Value> = response.json().await.map_err(StoreError::from_transport)?;
        Ok(!deleted.is_empty())
    }

    async fn test_connection(&self) -> bool {
        let result = self
            .send_authed(|token| self.client.get(&self.base_url).bearer_auth(token))
            .await;
        matches!(result, Ok(response) if response.status().is_success())
    }
}
