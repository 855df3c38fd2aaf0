//! Quorum certificate verification tests.

use ocr3_crypto::{CryptoError, Ed25519PrivateKey};
use ocr3_types::*;

const N: usize = 4;
const F: usize = 1;

struct Committee {
    keys: Vec<Ed25519PrivateKey>,
    identities: Vec<OracleIdentity>,
}

fn committee() -> Committee {
    let keys: Vec<_> = (0..N)
        .map(|i| Ed25519PrivateKey::from_bytes(&[i as u8 + 1; 32]))
        .collect();
    let identities = keys
        .iter()
        .enumerate()
        .map(|(i, key)| OracleIdentity {
            offchain_public_key: key.public_key(),
            onchain_public_key: vec![i as u8; 20],
            peer_id: format!("peer-{i}"),
            transmit_account: format!("0x{i:040x}"),
        })
        .collect();
    Committee { keys, identities }
}

fn digest() -> ConfigDigest {
    ConfigDigest::new([9u8; 32])
}

fn sign(key: &Ed25519PrivateKey) -> impl FnOnce(&[u8]) -> std::result::Result<Vec<u8>, CryptoError> + '_ {
    move |msg| Ok(key.sign(msg))
}

fn certified_commit(c: &Committee, epoch: Epoch, seq_nr: SeqNr, signers: &[usize]) -> CertifiedCommit {
    let ts = Timestamp::new(digest(), epoch);
    let outcome = format!("outcome-{seq_nr}").into_bytes();
    let outcome_digest = make_outcome_digest(&outcome);
    let commit_quorum_certificate = signers
        .iter()
        .map(|&i| AttributedCommitSignature {
            signature: CommitSignature::make(&ts, seq_nr, &outcome_digest, sign(&c.keys[i])).unwrap(),
            signer: i as OracleId,
        })
        .collect();
    CertifiedCommit {
        commit_epoch: epoch,
        seq_nr,
        outcome,
        commit_quorum_certificate,
    }
}

fn certified_prepare(c: &Committee, epoch: Epoch, seq_nr: SeqNr, signers: &[usize]) -> CertifiedPrepare {
    let ts = Timestamp::new(digest(), epoch);
    let outcome = b"prepared".to_vec();
    let inputs = OutcomeInputsDigest([3u8; 32]);
    let outcome_digest = make_outcome_digest(&outcome);
    let prepare_quorum_certificate = signers
        .iter()
        .map(|&i| AttributedPrepareSignature {
            signature: PrepareSignature::make(&ts, seq_nr, &inputs, &outcome_digest, sign(&c.keys[i]))
                .unwrap(),
            signer: i as OracleId,
        })
        .collect();
    CertifiedPrepare {
        prepare_epoch: epoch,
        seq_nr,
        outcome_inputs_digest: inputs,
        outcome,
        prepare_quorum_certificate,
    }
}

fn proof_entry(
    c: &Committee,
    ts: &Timestamp,
    signer: usize,
    hct: HighestCertifiedTimestamp,
) -> AttributedSignedHighestCertifiedTimestamp {
    AttributedSignedHighestCertifiedTimestamp {
        signed_highest_certified_timestamp: SignedHighestCertifiedTimestamp::make(
            ts,
            hct,
            sign(&c.keys[signer]),
        )
        .unwrap(),
        signer: signer as OracleId,
    }
}

#[test]
fn test_commit_with_exact_quorum_verifies() {
    let c = committee();
    let q = byzantine_quorum_size(N, F);
    let cc = certified_commit(&c, 2, 5, &[0, 1, 2]);
    assert_eq!(q, 3);
    assert!(cc.verify(digest(), &c.identities, q).is_ok());
    assert!(cc.check_size(N, F, &ReportingPluginLimits::default()));
}

#[test]
fn test_commit_wrong_count() {
    let c = committee();
    let q = byzantine_quorum_size(N, F);
    let too_few = certified_commit(&c, 2, 5, &[0, 1]);
    let too_many = certified_commit(&c, 2, 5, &[0, 1, 2, 3]);
    assert_eq!(
        too_few.verify(digest(), &c.identities, q),
        Err(CertificateError::WrongSignatureCount {
            expected: 3,
            actual: 2
        })
    );
    assert!(too_many.verify(digest(), &c.identities, q).is_err());
}

#[test]
fn test_commit_duplicate_signer() {
    let c = committee();
    let cc = certified_commit(&c, 2, 5, &[0, 1, 1]);
    assert_eq!(
        cc.verify(digest(), &c.identities, 3),
        Err(CertificateError::DuplicateSigner(1))
    );
}

#[test]
fn test_commit_signer_out_of_bounds() {
    let c = committee();
    let mut cc = certified_commit(&c, 2, 5, &[0, 1, 2]);
    cc.commit_quorum_certificate[2].signer = 7;
    assert_eq!(
        cc.verify(digest(), &c.identities, 3),
        Err(CertificateError::SignerOutOfBounds(7))
    );
}

#[test]
fn test_commit_invalid_signature() {
    let c = committee();
    let mut cc = certified_commit(&c, 2, 5, &[0, 1, 2]);
    // claims oracle 3 but carries oracle 2's signature
    cc.commit_quorum_certificate[2].signer = 3;
    assert_eq!(
        cc.verify(digest(), &c.identities, 3),
        Err(CertificateError::InvalidSignature {
            index: 2,
            signer: 3
        })
    );
}

#[test]
fn test_commit_bound_to_config_digest() {
    let c = committee();
    let cc = certified_commit(&c, 2, 5, &[0, 1, 2]);
    assert!(cc
        .verify(ConfigDigest::new([1u8; 32]), &c.identities, 3)
        .is_err());
}

#[test]
fn test_tampered_outcome_fails() {
    let c = committee();
    let mut cp = certified_prepare(&c, 1, 4, &[1, 2, 3]);
    assert!(cp.verify(digest(), &c.identities, 3).is_ok());
    cp.outcome = b"tampered".to_vec();
    assert!(cp.verify(digest(), &c.identities, 3).is_err());
}

#[test]
fn test_epoch_start_proof_valid() {
    let c = committee();
    let ts = Timestamp::new(digest(), 3);
    let highest = CertifiedPrepareOrCommit::Commit(certified_commit(&c, 2, 5, &[0, 1, 2]));
    let lower = HighestCertifiedTimestamp {
        seq_nr: 4,
        committed_else_prepared: true,
        epoch: 2,
    };
    let proof = EpochStartProof {
        highest_certified_proof: vec![
            proof_entry(&c, &ts, 0, highest.timestamp()),
            proof_entry(&c, &ts, 1, lower),
            proof_entry(&c, &ts, 3, highest.timestamp()),
        ],
        highest_certified: highest,
    };
    assert!(proof.verify(&ts, &c.identities, 3).is_ok());
    assert!(proof.check_size(N, F, &ReportingPluginLimits::default()));
}

#[test]
fn test_epoch_start_proof_timestamp_mismatch() {
    let c = committee();
    let ts = Timestamp::new(digest(), 3);
    let carried = CertifiedPrepareOrCommit::Commit(certified_commit(&c, 2, 5, &[0, 1, 2]));
    let higher = HighestCertifiedTimestamp {
        seq_nr: 6,
        committed_else_prepared: false,
        epoch: 2,
    };
    let proof = EpochStartProof {
        highest_certified_proof: vec![
            proof_entry(&c, &ts, 0, carried.timestamp()),
            proof_entry(&c, &ts, 1, higher),
            proof_entry(&c, &ts, 2, carried.timestamp()),
        ],
        highest_certified: carried.clone(),
    };
    assert_eq!(
        proof.verify(&ts, &c.identities, 3),
        Err(CertificateError::TimestampMismatch {
            certified: carried.timestamp(),
            maximum: higher,
        })
    );
}

#[test]
fn test_epoch_start_proof_signed_for_other_epoch() {
    let c = committee();
    let ts = Timestamp::new(digest(), 3);
    let stale_ts = Timestamp::new(digest(), 2);
    let genesis = CertifiedPrepareOrCommit::genesis();
    let proof = EpochStartProof {
        highest_certified_proof: vec![
            proof_entry(&c, &ts, 0, genesis.timestamp()),
            proof_entry(&c, &stale_ts, 1, genesis.timestamp()),
            proof_entry(&c, &ts, 2, genesis.timestamp()),
        ],
        highest_certified: genesis,
    };
    assert_eq!(
        proof.verify(&ts, &c.identities, 3),
        Err(CertificateError::InvalidSignature {
            index: 1,
            signer: 1
        })
    );
}

#[test]
fn test_epoch_start_proof_invalid_highest_certified() {
    let c = committee();
    let ts = Timestamp::new(digest(), 3);
    let mut cp = certified_prepare(&c, 2, 7, &[0, 1, 2]);
    cp.outcome = b"forged".to_vec();
    let highest = CertifiedPrepareOrCommit::Prepare(cp);
    let proof = EpochStartProof {
        highest_certified_proof: (0..3)
            .map(|i| proof_entry(&c, &ts, i, highest.timestamp()))
            .collect(),
        highest_certified: highest,
    };
    assert!(matches!(
        proof.verify(&ts, &c.identities, 3),
        Err(CertificateError::InvalidHighestCertified(_))
    ));
}

#[test]
fn test_check_size_rejects_oversized_outcome() {
    let c = committee();
    let cc = certified_commit(&c, 2, 5, &[0, 1, 2]);
    let limits = ReportingPluginLimits {
        max_outcome_length: 2,
        ..Default::default()
    };
    assert!(!cc.check_size(N, F, &limits));
}
