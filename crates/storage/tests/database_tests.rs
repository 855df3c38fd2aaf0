//! Database tests
//!
//! Both implementations must behave identically, so each scenario runs
//! against a memory database and a file database.

use ocr3_core::Database;
use ocr3_storage::{FileDatabase, MemoryDatabase};
use ocr3_types::{
    AttributedCommitSignature, CertifiedCommit, CertifiedPrepare, CertifiedPrepareOrCommit,
    CommitSignature, ConfigDigest, OutcomeInputsDigest,
};
use tempfile::TempDir;

fn create_test_db() -> (FileDatabase, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let db = FileDatabase::open(temp_dir.path().join("ocr3")).unwrap();
    (db, temp_dir)
}

fn commit(seq_nr: u64, epoch: u64) -> CertifiedPrepareOrCommit {
    CertifiedPrepareOrCommit::Commit(CertifiedCommit {
        commit_epoch: epoch,
        seq_nr,
        outcome: format!("outcome-{seq_nr}").into_bytes(),
        commit_quorum_certificate: vec![AttributedCommitSignature {
            signature: CommitSignature(vec![7u8; 64]),
            signer: 2,
        }],
    })
}

fn prepare(seq_nr: u64, epoch: u64) -> CertifiedPrepareOrCommit {
    CertifiedPrepareOrCommit::Prepare(CertifiedPrepare {
        prepare_epoch: epoch,
        seq_nr,
        outcome_inputs_digest: OutcomeInputsDigest([3u8; 32]),
        outcome: b"prepared".to_vec(),
        prepare_quorum_certificate: vec![],
    })
}

async fn cert_roundtrip(db: &dyn Database) {
    let digest = ConfigDigest::new([1u8; 32]);
    assert_eq!(db.read_cert(digest).await.unwrap(), None);

    db.write_cert(digest, Some(&commit(4, 2))).await.unwrap();
    assert_eq!(db.read_cert(digest).await.unwrap(), Some(commit(4, 2)));

    // later writes replace earlier ones
    db.write_cert(digest, Some(&prepare(5, 3))).await.unwrap();
    assert_eq!(db.read_cert(digest).await.unwrap(), Some(prepare(5, 3)));

    db.write_cert(digest, None).await.unwrap();
    assert_eq!(db.read_cert(digest).await.unwrap(), None);

    // deleting a missing slot is fine
    db.write_cert(digest, None).await.unwrap();
}

async fn config_roundtrip(db: &dyn Database) {
    let digest = ConfigDigest::new([2u8; 32]);
    assert_eq!(db.read_config(digest).await.unwrap(), None);
    db.write_config(digest, b"contract config").await.unwrap();
    assert_eq!(
        db.read_config(digest).await.unwrap(),
        Some(b"contract config".to_vec())
    );
    db.write_config(digest, &[]).await.unwrap();
    assert_eq!(db.read_config(digest).await.unwrap(), None);
}

#[tokio::test]
async fn test_memory_cert_roundtrip() {
    cert_roundtrip(&MemoryDatabase::new()).await;
}

#[tokio::test]
async fn test_file_cert_roundtrip() {
    let (db, _temp) = create_test_db();
    cert_roundtrip(&db).await;
}

#[tokio::test]
async fn test_memory_config_roundtrip() {
    config_roundtrip(&MemoryDatabase::new()).await;
}

#[tokio::test]
async fn test_file_config_roundtrip() {
    let (db, _temp) = create_test_db();
    config_roundtrip(&db).await;
}

#[tokio::test]
async fn test_file_persists_across_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let digest = ConfigDigest::new([9u8; 32]);
    {
        let db = FileDatabase::open(temp_dir.path()).unwrap();
        db.write_cert(digest, Some(&commit(11, 4))).await.unwrap();
    }
    let db = FileDatabase::open(temp_dir.path()).unwrap();
    assert_eq!(db.read_cert(digest).await.unwrap(), Some(commit(11, 4)));
}

#[tokio::test]
async fn test_file_layout() {
    let (db, _temp) = create_test_db();
    let digest = ConfigDigest::new([0xab; 32]);
    db.write_cert(digest, Some(&commit(1, 1))).await.unwrap();
    db.write_config(digest, b"x").await.unwrap();

    let cert_path = db.path().join(format!("{}.cert.json", digest.to_hex()));
    let config_path = db.path().join(format!("{}.config", digest.to_hex()));
    assert!(cert_path.exists());
    assert!(config_path.exists());
    // no temporary files left behind
    let entries = std::fs::read_dir(db.path()).unwrap().count();
    assert_eq!(entries, 2);
}

#[tokio::test]
async fn test_file_corrupt_cert_is_serialization_error() {
    let (db, _temp) = create_test_db();
    let digest = ConfigDigest::new([4u8; 32]);
    std::fs::write(
        db.path().join(format!("{}.cert.json", digest.to_hex())),
        b"{not json",
    )
    .unwrap();
    assert!(matches!(
        db.read_cert(digest).await,
        Err(ocr3_core::StorageError::Serialization(_))
    ));
}

#[tokio::test]
async fn test_genesis_roundtrip() {
    let (db, _temp) = create_test_db();
    let digest = ConfigDigest::new([5u8; 32]);
    db.write_cert(digest, Some(&CertifiedPrepareOrCommit::genesis()))
        .await
        .unwrap();
    let read = db.read_cert(digest).await.unwrap().unwrap();
    assert!(read.is_genesis());
}
