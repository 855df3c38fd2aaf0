//! File-backed database.
//!
//! One directory, two files per configuration:
//!
//! ```text
//! <dir>/<config-digest-hex>.cert.json   latest certificate
//! <dir>/<config-digest-hex>.config      opaque configuration blob
//! ```
//!
//! Writes go to a temporary file that is renamed over the target, so a crash
//! mid-write leaves either the old or the new value, never a torn one.

use async_trait::async_trait;
use ocr3_core::{Database, StorageError, StorageResult};
use ocr3_types::{CertifiedPrepareOrCommit, ConfigDigest};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const CERT_SUFFIX: &str = "cert.json";
const CONFIG_SUFFIX: &str = "config";

/// [`Database`] storing each slot as a file in one directory.
#[derive(Debug, Clone)]
pub struct FileDatabase {
    dir: PathBuf,
}

impl FileDatabase {
    /// Open (creating if needed) a database directory.
    pub fn open<P: AsRef<Path>>(dir: P) -> StorageResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        info!("Opening database at: {}", dir.display());
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Directory holding the database files.
    pub fn path(&self) -> &Path {
        &self.dir
    }

    fn slot_path(&self, config_digest: &ConfigDigest, suffix: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", config_digest.to_hex(), suffix))
    }

    async fn read_slot(&self, path: &Path) -> StorageResult<Option<Vec<u8>>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_slot(&self, path: &Path, value: &[u8]) -> StorageResult<()> {
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, value).await?;
        tokio::fs::rename(&tmp, path).await?;
        debug!("Wrote {} bytes to {}", value.len(), path.display());
        Ok(())
    }

    async fn remove_slot(&self, path: &Path) -> StorageResult<()> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl Database for FileDatabase {
    async fn read_cert(
        &self,
        config_digest: ConfigDigest,
    ) -> StorageResult<Option<CertifiedPrepareOrCommit>> {
        let path = self.slot_path(&config_digest, CERT_SUFFIX);
        match self.read_slot(&path).await? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| StorageError::Serialization(e.to_string())),
            None => Ok(None),
        }
    }

    async fn write_cert(
        &self,
        config_digest: ConfigDigest,
        cert: Option<&CertifiedPrepareOrCommit>,
    ) -> StorageResult<()> {
        let path = self.slot_path(&config_digest, CERT_SUFFIX);
        match cert {
            Some(cert) => {
                let bytes = serde_json::to_vec(cert)
                    .map_err(|e| StorageError::Serialization(e.to_string()))?;
                self.write_slot(&path, &bytes).await
            }
            None => self.remove_slot(&path).await,
        }
    }

    async fn read_config(&self, config_digest: ConfigDigest) -> StorageResult<Option<Vec<u8>>> {
        self.read_slot(&self.slot_path(&config_digest, CONFIG_SUFFIX))
            .await
    }

    async fn write_config(&self, config_digest: ConfigDigest, value: &[u8]) -> StorageResult<()> {
        let path = self.slot_path(&config_digest, CONFIG_SUFFIX);
        if value.is_empty() {
            self.remove_slot(&path).await
        } else {
            self.write_slot(&path, value).await
        }
    }
}
