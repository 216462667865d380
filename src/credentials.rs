//! Per-session credential material on durable storage.
//!
//! Each session owns a directory named by its key under
//! `<data_dir>/sessions/`. The material exists on disk exactly as long as
//! the session is present in the registry; `purge` removes the whole
//! directory when the session is released.

use std::path::{Path, PathBuf};

use tokio::fs;

use crate::{AppError, Result};

/// Filename of the credential blob inside a session directory.
const CREDENTIAL_FILE: &str = "credential";

/// Filesystem store for per-session credential material.
#[derive(Debug)]
pub struct CredentialStore {
    root: PathBuf,
}

impl CredentialStore {
    /// Create a store rooted at `<data_dir>/sessions`.
    #[must_use]
    pub fn new(data_dir: &Path) -> Self {
        Self {
            root: data_dir.join("sessions"),
        }
    }

    /// Directory holding one session's material.
    #[must_use]
    pub fn session_dir(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    /// Persist credential material for a session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Credential` if the directory or file cannot be
    /// written.
    pub async fn save(&self, key: &str, material: &[u8]) -> Result<()> {
        let dir = self.session_dir(key);
        fs::create_dir_all(&dir)
            .await
            .map_err(|err| AppError::Credential(format!("failed to create {}: {err}", dir.display())))?;
        let path = dir.join(CREDENTIAL_FILE);
        fs::write(&path, material)
            .await
            .map_err(|err| AppError::Credential(format!("failed to write {}: {err}", path.display())))?;
        Ok(())
    }

    /// Read a session's credential material back from disk.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Credential` if the file is missing or unreadable.
    pub async fn load(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.session_dir(key).join(CREDENTIAL_FILE);
        fs::read(&path)
            .await
            .map_err(|err| AppError::Credential(format!("failed to read {}: {err}", path.display())))
    }

    /// Whether credential material is present for a session.
    pub async fn exists(&self, key: &str) -> bool {
        fs::try_exists(self.session_dir(key).join(CREDENTIAL_FILE))
            .await
            .unwrap_or(false)
    }

    /// Delete a session's directory and everything in it.
    ///
    /// Irreversible; callers invoke this only after the session's
    /// connection has been closed. Already-absent directories are fine.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Credential` on any other filesystem failure.
    pub async fn purge(&self, key: &str) -> Result<()> {
        let dir = self.session_dir(key);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(AppError::Credential(format!(
                "failed to remove {}: {err}",
                dir.display()
            ))),
        }
    }
}
