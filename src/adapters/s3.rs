use crate::domain::model::{EntityKind, ImageBlob};
use crate::domain::ports::{PictureStore, IMAGE_EXTENSIONS};
use crate::utils::error::{Result, StoreError};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::operation::get_object::GetObjectError;
use aws_sdk_s3::operation::head_object::HeadObjectError;
use aws_sdk_s3::Client as S3Client;

/// Dedicated object-storage adapter for binary assets over an
/// S3-compatible signed-request protocol. Data records never live here.
#[derive(Debug, Clone)]
pub struct S3PictureAdapter {
    client: S3Client,
    bucket: String,
}

impl S3PictureAdapter {
    pub fn new(client: S3Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    /// Builds a client from ambient credentials, with path-style addressing
    /// so MinIO-style endpoints work unchanged.
    pub async fn connect(
        bucket: impl Into<String>,
        region: impl Into<String>,
        endpoint: Option<String>,
    ) -> Self {
        let base = aws_config::load_defaults(BehaviorVersion::latest()).await;
        let mut builder = aws_sdk_s3::config::Builder::from(&base)
            .region(Region::new(region.into()))
            .force_path_style(true);
        if let Some(endpoint) = endpoint {
            builder = builder.endpoint_url(endpoint);
        }
        Self::new(S3Client::from_conf(builder.build()), bucket)
    }

    fn key(kind: EntityKind, id: &str, extension: &str) -> String {
        format!("pictures/{}/{}.{}", kind.collection(), id, extension)
    }
}

#[async_trait]
impl PictureStore for S3PictureAdapter {
    async fn save_image(
        &self,
        kind: EntityKind,
        id: &str,
        bytes: &[u8],
        extension: &str,
    ) -> Result<()> {
        // the deterministic key makes same-extension uploads overwrite;
        // stale assets under other extensions are removed first
        for ext in IMAGE_EXTENSIONS {
            if *ext != extension {
                let _ = self
                    .client
                    .delete_object()
                    .bucket(&self.bucket)
                    .key(Self::key(kind, id, ext))
                    .send()
                    .await;
            }
        }

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(Self::key(kind, id, extension))
            .body(bytes.to_vec().into())
            .send()
            .await
            .map_err(|e| StoreError::connection(format!("picture upload failed: {}", e)))?;
        Ok(())
    }

    async fn load_image(&self, kind: EntityKind, id: &str) -> Result<Option<ImageBlob>> {
        for ext in IMAGE_EXTENSIONS {
            let result = self
                .client
                .get_object()
                .bucket(&self.bucket)
                .key(Self::key(kind, id, ext))
                .send()
                .await;
            match result {
                Ok(output) => {
                    let data = output.body.collect().await.map_err(|e| {
                        StoreError::connection(format!("picture download failed: {}", e))
                    })?;
                    return Ok(Some(ImageBlob {
                        bytes: data.into_bytes().to_vec(),
                        extension: ext.to_string(),
                    }));
                }
                Err(SdkError::ServiceError(service)) => {
                    if matches!(service.err(), GetObjectError::NoSuchKey(_)) {
                        continue;
                    }
                    return Err(StoreError::connection(format!(
                        "picture lookup failed: {:?}",
                        service.err()
                    )));
                }
                Err(e) => {
                    return Err(StoreError::connection(format!(
                        "picture lookup failed: {}",
                        e
                    )))
                }
            }
        }
        Ok(None)
    }

    async fn delete_image(&self, kind: EntityKind, id: &str) -> Result<bool> {
        let mut removed = false;
        for ext in IMAGE_EXTENSIONS {
            let exists = self
                .client
                .head_object()
                .bucket(&self.bucket)
                .key(Self::key(kind, id, ext))
                .send()
                .await;
            match exists {
                Ok(_) => {}
                Err(SdkError::ServiceError(service))
                    if matches!(service.err(), HeadObjectError::NotFound(_)) =>
                {
                    continue;
                }
                Err(_) => continue,
            }

            let deleted = self
                .client
                .delete_object()
                .bucket(&self.bucket)
                .key(Self::key(kind, id, ext))
                .send()
                .await;
            match deleted {
                Ok(_) => removed = true,
                Err(e) => {
                    // best-effort: a failed asset delete never blocks the
                    // record operation it accompanies
                    tracing::warn!("🔶 picture delete failed for '{}': {}", id, e);
                }
            }
        }
        Ok(removed)
    }

    async fn test_connection(&self) -> bool {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_are_deterministic_entity_paths() {
        assert_eq!(
            S3PictureAdapter::key(EntityKind::Article, "a1", "jpg"),
            "pictures/articles/a1.jpg"
        );
        assert_eq!(
            S3PictureAdapter::key(EntityKind::Recipe, "r1", "png"),
            "pictures/recipes/r1.png"
        );
    }
}
