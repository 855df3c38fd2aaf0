//! In-memory database.
//!
//! Certificates are stored serialized, so a value read back is exactly what a
//! file-backed database would return and no state is shared by reference with
//! the writer.

use async_trait::async_trait;
use ocr3_core::{Database, StorageError, StorageResult};
use ocr3_types::{CertifiedPrepareOrCommit, ConfigDigest};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::trace;

/// Thread-safe in-memory [`Database`].
#[derive(Default)]
pub struct MemoryDatabase {
    certs: RwLock<HashMap<ConfigDigest, Vec<u8>>>,
    configs: RwLock<HashMap<ConfigDigest, Vec<u8>>>,
    fail_writes: AtomicBool,
}

impl MemoryDatabase {
    /// Create an empty database.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail (or succeed again).
    ///
    /// Lets tests exercise the paths where persisting a certificate fails.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of certificate slots currently held.
    pub fn cert_count(&self) -> usize {
        self.certs.read().len()
    }

    fn check_writable(&self) -> StorageResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Io("writes disabled".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Database for MemoryDatabase {
    async fn read_cert(
        &self,
        config_digest: ConfigDigest,
    ) -> StorageResult<Option<CertifiedPrepareOrCommit>> {
        let certs = self.certs.read();
        match certs.get(&config_digest) {
            Some(bytes) => serde_json::from_slice(bytes)
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
        self.check_writable()?;
        match cert {
            Some(cert) => {
                let bytes = serde_json::to_vec(cert)
                    .map_err(|e| StorageError::Serialization(e.to_string()))?;
                trace!(%config_digest, seq_nr = cert.seq_nr(), "Writing cert");
                self.certs.write().insert(config_digest, bytes);
            }
            None => {
                self.certs.write().remove(&config_digest);
            }
        }
        Ok(())
    }

    async fn read_config(&self, config_digest: ConfigDigest) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.configs.read().get(&config_digest).cloned())
    }

    async fn write_config(&self, config_digest: ConfigDigest, value: &[u8]) -> StorageResult<()> {
        self.check_writable()?;
        let mut configs = self.configs.write();
        if value.is_empty() {
            configs.remove(&config_digest);
        } else {
            configs.insert(config_digest, value.to_vec());
        }
        Ok(())
    }
}
