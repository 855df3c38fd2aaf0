//! Persistence trait for protocol state.
//!
//! An oracle persists exactly one certificate per configuration: the highest
//! prepared or committed outcome it holds. Writes happen far more often than
//! reads; reads only happen on restart.

use async_trait::async_trait;
use ocr3_types::{CertifiedPrepareOrCommit, ConfigDigest};
use thiserror::Error;

/// Why a read or write of persisted state failed.
#[derive(Error, Debug)]
pub enum StorageError {
    /// The backing store could not be read or written.
    #[error("storage backend: {0}")]
    Io(String),

    /// A stored record could not be encoded or decoded.
    #[error("corrupt record: {0}")]
    Serialization(String),
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        StorageError::Io(e.to_string())
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Crash-recovery storage for one or more oracle configurations.
///
/// Implementations are shared between the report generation task and the
/// oracle supervisor, hence `Send + Sync`.
///
/// ```ignore
/// db.write_cert(digest, Some(&CertifiedPrepareOrCommit::genesis())).await?;
/// assert!(db.read_cert(digest).await?.is_some_and(|c| c.is_genesis()));
/// ```
#[async_trait]
pub trait Database: Send + Sync + 'static {
    /// Read the persisted certificate for a configuration.
    ///
    /// Returns `Ok(None)` if nothing was written yet.
    async fn read_cert(
        &self,
        config_digest: ConfigDigest,
    ) -> StorageResult<Option<CertifiedPrepareOrCommit>>;

    /// Overwrite the certificate slot. `None` deletes it.
    async fn write_cert(
        &self,
        config_digest: ConfigDigest,
        cert: Option<&CertifiedPrepareOrCommit>,
    ) -> StorageResult<()>;

    /// Read the opaque configuration blob stored for a digest.
    async fn read_config(&self, config_digest: ConfigDigest) -> StorageResult<Option<Vec<u8>>>;

    /// Store a configuration blob. Writing an empty value deletes it.
    async fn write_config(&self, config_digest: ConfigDigest, value: &[u8]) -> StorageResult<()>;
}
