//! Mounted secret lookup
//!
//! Secrets are mounted as one directory per secret and one file per key, so a
//! [`SecretKeySelector`] resolves to `<root>/<name>/<key>`.

use crate::config::{SecretKeySelector, SECRET_VOLUME_PATH};
use crate::error::{NatsError, Result};
use std::path::{Path, PathBuf};

/// Resolves secret references to file paths and values
pub trait SecretReader: Send + Sync {
    /// Path of the file backing the secret key
    fn secret_path(&self, selector: &SecretKeySelector) -> Result<PathBuf>;

    /// Contents of the secret key, with a trailing newline removed
    fn secret(&self, selector: &SecretKeySelector) -> Result<String>;
}

/// Reads secrets from a mounted volume
#[derive(Debug, Clone)]
pub struct VolumeSecretReader {
    root: PathBuf,
}

impl VolumeSecretReader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Default for VolumeSecretReader {
    fn default() -> Self {
        Self::new(SECRET_VOLUME_PATH)
    }
}

impl SecretReader for VolumeSecretReader {
    fn secret_path(&self, selector: &SecretKeySelector) -> Result<PathBuf> {
        if selector.name.is_empty() || selector.key.is_empty() {
            return Err(NatsError::Config(format!(
                "secret selector needs both name and key (name: {:?}, key: {:?})",
                selector.name, selector.key
            )));
        }
        Ok(self.root.join(&selector.name).join(&selector.key))
    }

    fn secret(&self, selector: &SecretKeySelector) -> Result<String> {
        let path = self.secret_path(selector)?;
        let data = std::fs::read_to_string(&path).map_err(|source| NatsError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(data.strip_suffix('\n').unwrap_or(&data).to_string())
    }
}
