use crate::domain::model::{Entity, EntityKind, IdAssignment, SaveOutcome, SkippedEntity};
use crate::domain::ports::{Progress, StorageAdapter};
use crate::transform::{self, WireProfile};
use crate::utils::error::{Result, StoreError};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};

/// Document-database adapter over a CouchDB-style REST surface: one
/// database per entity kind, `_bulk_docs` for writes, `_all_docs` for
/// reads, HTTP Basic credentials. Documents keep the application id as
/// their `_id`; the revision token rides in `backend_id`.
pub struct CouchAdapter {
    client: Client,
    base_url: String,
    username: String,
    password: String,
    db_prefix: String,
}

impl CouchAdapter {
    pub fn new(
        base_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        db_prefix: impl Into<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            username: username.into(),
            password: password.into(),
            db_prefix: db_prefix.into(),
        }
    }

    fn db_url(&self, kind: EntityKind) -> String {
        format!("{}/{}{}", self.base_url, self.db_prefix, kind.collection())
    }

    fn check_status(status: StatusCode, what: &str) -> Result<()> {
        if status.is_success() {
            return Ok(());
        }
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(StoreError::auth(format!(
                "basic credentials rejected during {}",
                what
            ))),
            StatusCode::NOT_FOUND => Err(StoreError::schema(format!(
                "database missing behind {}",
                what
            ))),
            _ => Err(StoreError::connection(format!(
                "{} failed with status {}",
                what, status
            ))),
        }
    }

    /// Creates any missing per-kind database. Safe to call repeatedly;
    /// an existing database answers 412.
    pub async fn ensure_schema(&self) -> Result<()> {
        for kind in EntityKind::all() {
            let response = self
                .client
                .put(self.db_url(*kind))
                .basic_auth(&self.username, Some(&self.password))
                .send()
                .await
                .map_err(StoreError::from_transport)?;
            if response.status() == StatusCode::PRECONDITION_FAILED {
                continue;
            }
            Self::check_status(response.status(), &format!("create of {}", kind))?;
        }
        Ok(())
    }
}

#[async_trait]
impl StorageAdapter for CouchAdapter {
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
        let mut docs = Vec::with_capacity(total);
        for entity in entities {
            match transform::encode(kind, entity, WireProfile::Document) {
                Ok(doc) => docs.push(doc),
                Err(StoreError::ValidationError { field, message }) => {
                    tracing::warn!("🔶 {}: skipping record '{}': {}", kind, entity.id, message);
                    outcome.skipped.push(SkippedEntity {
                        id: entity.id.clone(),
                        reason: format!("{}: {}", field, message),
                    });
                }
                Err(e) => return Err(e),
            }
        }

        if !docs.is_empty() {
            let url = format!("{}/_bulk_docs", self.db_url(kind));
            let response = self
                .client
                .post(&url)
                .basic_auth(&self.username, Some(&self.password))
                .json(&json!({ "docs": docs }))
                .send()
                .await
                .map_err(StoreError::from_transport)?;
            Self::check_status(response.status(), &format!("bulk save of {}", kind))?;

            let results: Vec<Value> = response.json().await.map_err(StoreError::from_transport)?;
            for result in &results {
                if result.get("ok").and_then(Value::as_bool) == Some(true) {
                    if let (Some(id), Some(rev)) = (
                        result.get("id").and_then(transform::id_string),
                        result.get("rev").and_then(transform::id_string),
                    ) {
                        outcome.assignments.push(IdAssignment {
                            id,
                            backend_id: rev,
                        });
                    }
                } else {
                    let id = result
                        .get("id")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown");
                    let error = result
                        .get("error")
                        .and_then(Value::as_str)
                        .unwrap_or("error");
                    return Err(StoreError::ValidationError {
                        field: "_rev".to_string(),
                        message: format!("document '{}' rejected by backend: {}", id, error),
                    });
                }
            }
        }

        if let Some(report) = progress {
            for done in 1..=total {
                report(done, total);
            }
        }
        tracing::debug!("💾 {}: bulk-saved {} documents", kind, docs.len());
        Ok(outcome)
    }

    async fn load(&self, kind: EntityKind) -> Result<Vec<Entity>> {
        let url = format!("{}/_all_docs", self.db_url(kind));
        let response = self
            .client
            .get(&url)
            .query(&[("include_docs", "true")])
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await
            .map_err(StoreError::from_transport)?;
        Self::check_status(response.status(), &format!("load of {}", kind))?;

        let body: Value = response.json().await.map_err(StoreError::from_transport)?;
        let rows = body
            .get("rows")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        rows.iter()
            .filter_map(|row| row.get("doc"))
            .filter(|doc| {
                doc.get("_id")
                    .and_then(Value::as_str)
                    .map(|id| !id.starts_with("_design"))
                    .unwrap_or(false)
            })
            .map(|doc| transform::decode(kind, doc, WireProfile::Document))
            .collect()
    }

    async fn delete(&self, kind: EntityKind, id: &str) -> Result<bool> {
        // resolve the live revision first; a missing doc is not an error
        let doc_url = format!("{}/{}", self.db_url(kind), id);
        let response = self
            .client
            .get(&doc_url)
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await
            .map_err(StoreError::from_transport)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        Self::check_status(response.status(), &format!("lookup in {}", kind))?;

        let doc: Value = response.json().await.map_err(StoreError::from_transport)?;
        let rev = doc
            .get("_rev")
            .and_then(Value::as_str)
            .ok_or_else(|| StoreError::schema(format!("document '{}' has no revision", id)))?
            .to_string();

        let response = self
            .client
            .delete(&doc_url)
            .query(&[("rev", rev)])
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await
            .map_err(StoreError::from_transport)?;
        Self::check_status(response.status(), &format!("delete from {}", kind))?;
        Ok(true)
    }

    async fn test_connection(&self) -> bool {
        let url = format!("{}/_up", self.base_url);
        match self.client.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn adapter(server: &MockServer) -> CouchAdapter {
        CouchAdapter::new(server.base_url(), "admin", "secret", "pantry_")
    }

    fn supplier(id: &str, name: &str) -> Entity {
        Entity::with_id(
            id,
            json!({ "name": name }).as_object().unwrap().clone(),
        )
    }

    #[tokio::test]
    async fn test_bulk_save_reports_revisions() {
        let server = MockServer::start();

        let bulk = server.mock(|when, then| {
            when.method(POST)
                .path("/pantry_suppliers/_bulk_docs")
                .json_body_partial(r#"{ "docs": [{ "_id": "s1", "name": "Mill & Co" }] }"#);
            then.status(201)
                .json_body(json!([{ "ok": true, "id": "s1", "rev": "1-abc" }]));
        });

        let adapter = adapter(&server);
        let outcome = adapter
            .save(EntityKind::Supplier, &[supplier("s1", "Mill & Co")], None)
            .await
            .unwrap();

        bulk.assert();
        assert_eq!(
            outcome.assignments,
            vec![IdAssignment {
                id: "s1".to_string(),
                backend_id: "1-abc".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_update_sends_revision() {
        let server = MockServer::start();

        let bulk = server.mock(|when, then| {
            when.method(POST)
                .path("/pantry_suppliers/_bulk_docs")
                .json_body_partial(r#"{ "docs": [{ "_id": "s1", "_rev": "1-abc" }] }"#);
            then.status(201)
                .json_body(json!([{ "ok": true, "id": "s1", "rev": "2-def" }]));
        });

        let mut entity = supplier("s1", "Mill & Co");
        entity.backend_id = Some("1-abc".to_string());

        let outcome = adapter(&server)
            .save(EntityKind::Supplier, &[entity], None)
            .await
            .unwrap();

        bulk.assert();
        assert_eq!(outcome.assignments[0].backend_id, "2-def");
    }

    #[tokio::test]
    async fn test_load_skips_design_documents() {
        let server = MockServer::start();

        server.mock(|when, then| {
            when.method(GET)
                .path("/pantry_suppliers/_all_docs")
                .query_param("include_docs", "true");
            then.status(200).json_body(json!({
                "total_rows": 2,
                "rows": [
                    { "id": "_design/idx", "doc": { "_id": "_design/idx" } },
                    { "id": "s1", "doc": { "_id": "s1", "_rev": "1-abc", "name": "Mill & Co" } }
                ]
            }));
        });

        let loaded = adapter(&server).load(EntityKind::Supplier).await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, "s1");
        assert_eq!(loaded[0].backend_id.as_deref(), Some("1-abc"));
    }

    #[tokio::test]
    async fn test_delete_resolves_revision_then_deletes() {
        let server = MockServer::start();

        let lookup = server.mock(|when, then| {
            when.method(GET).path("/pantry_suppliers/s1");
            then.status(200)
                .json_body(json!({ "_id": "s1", "_rev": "3-xyz" }));
        });
        let delete = server.mock(|when, then| {
            when.method(DELETE)
                .path("/pantry_suppliers/s1")
                .query_param("rev", "3-xyz");
            then.status(200).json_body(json!({ "ok": true }));
        });

        assert!(adapter(&server)
            .delete(EntityKind::Supplier, "s1")
            .await
            .unwrap());
        lookup.assert();
        delete.assert();
    }

    #[tokio::test]
    async fn test_delete_missing_document_returns_false() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/pantry_suppliers/ghost");
            then.status(404);
        });

        assert!(!adapter(&server)
            .delete(EntityKind::Supplier, "ghost")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_missing_database_maps_to_schema_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/pantry_articles/_all_docs");
            then.status(404);
        });

        let err = adapter(&server).load(EntityKind::Article).await.unwrap_err();
        assert!(matches!(err, StoreError::SchemaError { .. }));
    }

    #[tokio::test]
    async fn test_rejected_credentials_map_to_auth_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/pantry_articles/_all_docs");
            then.status(401);
        });

        let err = adapter(&server).load(EntityKind::Article).await.unwrap_err();
        assert!(matches!(err, StoreError::AuthError { .. }));
    }
}
