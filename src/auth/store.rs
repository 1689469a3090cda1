// Credential persistence on local disk

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use super::types::{ApplicationIdentity, UserCredential};
use crate::config::Config;
use crate::error::{Error, Result};

/// Reads and writes the two local auth artifacts
///
/// Pure local I/O; absence of either file is reported as `Ok(None)`.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    identity_path: PathBuf,
    credential_path: PathBuf,
}

impl CredentialStore {
    pub fn new(identity_path: impl Into<PathBuf>, credential_path: impl Into<PathBuf>) -> Self {
        Self {
            identity_path: identity_path.into(),
            credential_path: credential_path.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.identity_file.clone(), config.token_file.clone())
    }

    pub fn identity_path(&self) -> &Path {
        &self.identity_path
    }

    pub fn credential_path(&self) -> &Path {
        &self.credential_path
    }

    /// Load the application identity; malformed content is a configuration error
    pub fn load_identity(&self) -> Result<Option<ApplicationIdentity>> {
        let Some(raw) = read_optional(&self.identity_path)? else {
            tracing::debug!(
                "No application identity at {}",
                self.identity_path.display()
            );
            return Ok(None);
        };

        ApplicationIdentity::from_json(&raw).map(Some)
    }

    /// Load the persisted user credential; `None` means never authenticated
    pub fn load_user_credential(&self) -> Result<Option<UserCredential>> {
        let Some(raw) = read_optional(&self.credential_path)? else {
            return Ok(None);
        };

        let credential = serde_json::from_str(&raw).map_err(|e| {
            Error::Storage(format!(
                "Failed to parse user credential {}: {}",
                self.credential_path.display(),
                e
            ))
        })?;

        Ok(Some(credential))
    }

    /// Persist the user credential (write to temp file, then rename over the target)
    pub fn save_user_credential(&self, credential: &UserCredential) -> Result<()> {
        if let Some(parent) = self.credential_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let json = serde_json::to_string_pretty(credential)
            .map_err(|e| Error::Storage(format!("Failed to serialize credential: {}", e)))?;

        let temp = self.temp_path();
        if let Err(e) = write_private(&temp, json.as_bytes()) {
            let _ = fs::remove_file(&temp);
            return Err(e.into());
        }

        if let Err(e) = fs::rename(&temp, &self.credential_path) {
            let _ = fs::remove_file(&temp);
            return Err(e.into());
        }

        tracing::debug!(
            "Saved user credential to {}",
            self.credential_path.display()
        );
        Ok(())
    }

    /// Delete the persisted user credential; a missing file is not an error
    pub fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.credential_path) {
            Ok(()) => {
                tracing::info!(
                    "Removed user credential {}",
                    self.credential_path.display()
                );
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .credential_path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "token.json".into());
        name.push(".tmp");
        self.credential_path.with_file_name(name)
    }
}

fn read_optional(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(raw) => Ok(Some(raw)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::Storage(format!(
            "Failed to read {}: {}",
            path.display(),
            e
        ))),
    }
}

/// Write `contents` to a freshly created owner-only file and flush it to disk
fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    // A leftover temp file would keep its old mode
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }

    let mut file = create_private(path)?;
    file.write_all(contents)?;
    file.sync_all()
}

#[cfg(unix)]
fn create_private(path: &Path) -> std::io::Result<File> {
    use std::os::unix::fs::OpenOptionsExt;
    OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)
}

#[cfg(not(unix))]
fn create_private(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().write(true).create_new(true).open(path)
}
