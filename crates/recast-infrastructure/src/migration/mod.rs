//! Forward migration framework.
//!
//! Two linear chains share the same machinery:
//!
//! - the **storage chain** ([`store`]), transforming whole-store
//!   snapshots between storage layouts, driven by the versioned store at
//!   open time;
//! - the **session chain** ([`session`]), transforming individual session
//!   records keyed on their own `schema_version`, driven by the
//!   repository at load time.

mod registry;
mod session;
mod store;
mod traits;

pub use registry::MigrationRegistry;
pub use session::{SessionV1ToV2Migration, session_migrations};
pub use store::{
    INDEX_KEY, SESSION_KEY_PREFIX, STORAGE_V1, STORAGE_VERSION, StoreV1ToV2Migration,
    storage_migrations,
};
pub use traits::{Migration, ValueMigration};
