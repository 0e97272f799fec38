//! Token store implementations.

pub mod file;
pub mod memory;
pub mod trait_def;

#[cfg(feature = "system-keyring")]
pub mod keyring;

// Re-exports
pub use file::FileTokenStore;
pub use memory::MemoryTokenStore;
pub use trait_def::TokenStore;

#[cfg(feature = "system-keyring")]
pub use keyring::KeyringTokenStore;

use crate::config::{AuthConfig, StorageBackend};
use std::sync::Arc;

/// Build the token store selected by the configuration.
///
/// The keyring backend falls back to file storage when the platform has no
/// usable credential store (headless servers, stripped-down containers), so
/// a default config still works everywhere.
pub fn store_from_config(config: &AuthConfig) -> Arc<dyn TokenStore> {
    match config.storage_backend {
        StorageBackend::File => Arc::new(FileTokenStore::new(&config.token_dir)),
        #[cfg(feature = "system-keyring")]
        StorageBackend::Keyring => {
            if KeyringTokenStore::is_available() {
                Arc::new(KeyringTokenStore::with_service(&config.service))
            } else {
                tracing::warn!(
                    "System keyring unavailable, falling back to file storage at {}",
                    config.token_dir.display()
                );
                Arc::new(FileTokenStore::new(&config.token_dir))
            }
        }
        #[cfg(not(feature = "system-keyring"))]
        StorageBackend::Keyring => {
            tracing::warn!(
                "Built without the system-keyring feature, falling back to file storage at {}",
                config.token_dir.display()
            );
            Arc::new(FileTokenStore::new(&config.token_dir))
        }
        StorageBackend::Memory => Arc::new(MemoryTokenStore::new()),
    }
}
