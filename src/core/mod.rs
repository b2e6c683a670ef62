pub mod context;
pub mod sync;
pub mod token;

pub use context::StorageContext;
pub use sync::{replace_all, SyncReport};
pub use token::{Credential, TokenManager};
