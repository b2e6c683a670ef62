pub mod adapters;
pub mod config;
pub mod core;
pub mod domain;
pub mod transform;
pub mod utils;

pub use crate::config::{BackendConfig, BackendKind, Mode, StorageConfig};
pub use crate::core::{StorageContext, SyncReport, TokenManager};
pub use crate::domain::model::{
    apply_assignments, Dataset, Entity, EntityKind, IdAssignment, ImageBlob, SaveOutcome,
    SyncStatus,
};
pub use crate::domain::ports::{PictureStore, Progress, SettingsStore, StorageAdapter};
pub use crate::utils::error::{Result, StoreError};
