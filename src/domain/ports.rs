use crate::domain::model::{Entity, EntityKind, ImageBlob, SaveOutcome};
use crate::utils::error::Result;
use async_trait::async_trait;

/// Per-item progress callback: `(items_done, total)`. Fired once with
/// `(0, total)` before processing begins and once after each item.
pub type Progress<'a> = Option<&'a (dyn Fn(usize, usize) + Send + Sync)>;

/// The operation set every backend implementation provides. Entities in a
/// batch are processed sequentially, one network round trip at a time.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Persists a non-empty batch. Entities carrying a `backend_id` are
    /// updates; the rest are inserts, whose backend-assigned keys come back
    /// as assignments in the outcome. A single-item failure aborts the rest
    /// of the call, except identifier-validation failures, which are
    /// skipped and reported.
    async fn save(
        &self,
        kind: EntityKind,
        entities: &[Entity],
        progress: Progress<'_>,
    ) -> Result<SaveOutcome>;

    /// Returns every record of the kind. A kind never written yet yields an
    /// empty vec, not an error.
    async fn load(&self, kind: EntityKind) -> Result<Vec<Entity>>;

    /// Idempotent delete by application id. `false` means nothing was
    /// there to delete.
    async fn delete(&self, kind: EntityKind, id: &str) -> Result<bool>;

    /// Cheap, side-effect-free probe. Used at context construction, never
    /// in the hot read/write path.
    async fn test_connection(&self) -> bool;
}

/// Binary-asset extension. Assets are addressed by entity path
/// (`pictures/<kind>/<id>`), never by opaque object keys.
#[async_trait]
pub trait PictureStore: Send + Sync {
    /// Stores an asset under a key derived deterministically from the
    /// entity path, overwriting any previous asset for the same id.
    async fn save_image(
        &self,
        kind: EntityKind,
        id: &str,
        bytes: &[u8],
        extension: &str,
    ) -> Result<()>;

    /// Probes a fixed ordered list of common extensions and returns the
    /// first that exists, or `None`.
    async fn load_image(&self, kind: EntityKind, id: &str) -> Result<Option<ImageBlob>>;

    /// Best-effort delete; `false` means no asset was found.
    async fn delete_image(&self, kind: EntityKind, id: &str) -> Result<bool>;

    async fn test_connection(&self) -> bool;
}

/// Small persisted key/value store for per-connection state that must
/// survive process restarts (derived credentials).
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn put(&self, key: &str, value: &str) -> Result<()>;
}

/// Extension order the picture probe walks on load. The stored extension is
/// not known a priori, so the first hit wins.
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "gif"];
