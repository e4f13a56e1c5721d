//! Signing credentials.
//!
//! The credentials file is JSON: `{"key_id": "...", "secret": "..."}`. When the
//! deployment hands the file over as an environment variable instead, its
//! content is written to the configured path first.

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::{fs, path::Path};

#[derive(Deserialize, Clone)]
pub struct Credentials {
    pub key_id: String,
    pub secret: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("key_id", &self.key_id)
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    /// Write `content` to `path`, creating parent directories as needed.
    pub fn materialize(path: &Path, content: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
        }
        fs::write(path, content.as_bytes())
            .with_context(|| format!("writing credentials to {}", path.display()))?;
        tracing::info!("Materialized credentials at {}", path.display());
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading credentials from {}", path.display()))?;
        let creds: Credentials = serde_json::from_str(&raw)
            .with_context(|| format!("parsing credentials file {}", path.display()))?;
        if creds.secret.is_empty() {
            bail!("credentials file {} has an empty secret", path.display());
        }
        Ok(creds)
    }
}
