//! File-based token store.

use super::TokenStore;
use crate::auth::error::AuthError;
use std::path::{Path, PathBuf};
use tracing::instrument;

/// File permissions for token files (Unix only): owner read/write.
#[cfg(unix)]
const FILE_MODE: u32 = 0o600;

/// Directory permissions (Unix only): owner read/write/execute.
#[cfg(unix)]
const DIR_MODE: u32 = 0o700;

/// File-based token store.
///
/// Stores each token as a plain-text file per account in a configurable
/// directory. File path: `{dir}/{account}.token`.
///
/// # Security
/// - File permissions are set to 0600 (owner read/write only) on Unix
/// - Parent directories are created with 0700 permissions
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    /// Directory where token files are stored.
    dir: PathBuf,
}

impl FileTokenStore {
    /// Create a new FileTokenStore with the specified directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Get the directory where tokens are stored.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Get the file path for a specific account.
    fn account_path(&self, account: &str) -> Result<PathBuf, AuthError> {
        if account.is_empty() {
            return Err(AuthError::Storage("Account name cannot be empty".to_string()));
        }

        // Reject path traversal and ensure safe filename
        if account.contains('/') || account.contains('\\') || account.contains("..") {
            return Err(AuthError::Storage(format!(
                "Invalid account name '{}': potential path traversal",
                account
            )));
        }

        // Allow only alphanumeric, hyphen, and underscore
        if !account.chars().all(|c| c.is_alphanumeric() || c == '-' || c == '_') {
            return Err(AuthError::Storage(format!(
                "Invalid account name '{}': contains invalid characters",
                account
            )));
        }

        Ok(self.dir.join(format!("{}.token", account)))
    }

    /// Ensure the store directory exists with correct permissions.
    fn ensure_dir(&self) -> Result<(), AuthError> {
        if !self.dir.exists() {
            std::fs::create_dir_all(&self.dir).map_err(|e| {
                AuthError::Storage(format!(
                    "Failed to create token directory '{}': {}",
                    self.dir.display(),
                    e
                ))
            })?;

            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let perms = std::fs::Permissions::from_mode(DIR_MODE);
                std::fs::set_permissions(&self.dir, perms).map_err(|e| {
                    AuthError::Storage(format!(
                        "Failed to set directory permissions on '{}': {}",
                        self.dir.display(),
                        e
                    ))
                })?;
            }
        }
        Ok(())
    }
}

impl TokenStore for FileTokenStore {
    #[instrument(skip(self))]
    fn get(&self, account: &str) -> Result<Option<String>, AuthError> {
        let path = self.account_path(account)?;
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(AuthError::Storage(format!(
                    "Failed to read token file '{}': {}",
                    path.display(),
                    e
                )));
            }
        };

        let token = content.trim();
        if token.is_empty() {
            return Ok(None);
        }

        Ok(Some(token.to_string()))
    }

    #[instrument(skip(self, token))]
    fn put(&self, account: &str, token: &str) -> Result<(), AuthError> {
        self.ensure_dir()?;

        let path = self.account_path(account)?;

        // Write to temp file first, then rename for atomicity.
        // On Unix, set 0600 permissions at creation time to avoid a window
        // where tokens are readable by other users.
        let temp_path = path.with_extension("tmp");

        #[cfg(unix)]
        {
            use std::io::Write;
            use std::os::unix::fs::OpenOptionsExt;
            let mut file = std::fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(FILE_MODE)
                .open(&temp_path)
                .map_err(|e| {
                    AuthError::Storage(format!(
                        "Failed to create temp file '{}': {}",
                        temp_path.display(),
                        e
                    ))
                })?;
            file.write_all(token.as_bytes()).map_err(|e| {
                AuthError::Storage(format!(
                    "Failed to write temp file '{}': {}",
                    temp_path.display(),
                    e
                ))
            })?;
            file.sync_all().map_err(|e| {
                AuthError::Storage(format!(
                    "Failed to sync temp file '{}': {}",
                    temp_path.display(),
                    e
                ))
            })?;
        }

        #[cfg(not(unix))]
        {
            std::fs::write(&temp_path, token).map_err(|e| {
                AuthError::Storage(format!(
                    "Failed to write temp file '{}': {}",
                    temp_path.display(),
                    e
                ))
            })?;
        }

        // Atomic rename
        if let Err(e) = std::fs::rename(&temp_path, &path) {
            let _ = std::fs::remove_file(&temp_path);
            return Err(AuthError::Storage(format!(
                "Failed to rename '{}' to '{}': {}",
                temp_path.display(),
                path.display(),
                e
            )));
        }

        Ok(())
    }

    #[instrument(skip(self))]
    fn delete(&self, account: &str) -> Result<(), AuthError> {
        let path = self.account_path(account)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AuthError::Storage(format!(
                "Failed to remove token file '{}': {}",
                path.display(),
                e
            ))),
        }
    }

    fn exists(&self, account: &str) -> Result<bool, AuthError> {
        Ok(self.account_path(account)?.exists())
    }

    fn name(&self) -> &str {
        "file"
    }
}
