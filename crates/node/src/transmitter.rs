//! Simulated report destination.
//!
//! [`Contract`] stands in for the onchain contract every oracle transmits
//! to. It checks that each transmission carries more than `f` signatures
//! and keeps a ledger of what arrived, in arrival order.

use std::sync::Arc;

use async_trait::async_trait;
use ocr3_core::ContractTransmitter;
use ocr3_types::{
    Account, AttributedOnchainSignature, ConfigDigest, OracleId, ReportWithInfo, SeqNr,
};
use parking_lot::RwLock;
use tokio::time::Instant;
use tracing::{info, warn};

/// One transmission accepted by the contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transmitted {
    /// Oracle that transmitted
    pub transmitter: OracleId,
    /// Round the report came from
    pub seq_nr: SeqNr,
    /// Report bytes
    pub report: Vec<u8>,
    /// Signers of the attached signatures
    pub signers: Vec<OracleId>,
    /// When the transmission arrived
    pub at: Instant,
}

#[derive(Debug, Default)]
struct Ledger {
    transmissions: Vec<Transmitted>,
    latest_seq_nr: SeqNr,
}

/// Shared ledger of transmitted reports.
#[derive(Debug, Default)]
pub struct Contract {
    min_signatures: usize,
    ledger: RwLock<Ledger>,
}

impl Contract {
    /// A contract that accepts any transmission.
    pub fn new() -> Self {
        Self::default()
    }

    /// A contract that rejects transmissions with fewer than `f + 1`
    /// signatures.
    pub fn with_fault_tolerance(f: usize) -> Self {
        Self {
            min_signatures: f + 1,
            ledger: RwLock::default(),
        }
    }

    /// Highest sequence number transmitted so far.
    pub fn latest_seq_nr(&self) -> SeqNr {
        self.ledger.read().latest_seq_nr
    }

    /// Every accepted transmission, in arrival order.
    pub fn transmissions(&self) -> Vec<Transmitted> {
        self.ledger.read().transmissions.clone()
    }

    /// Transmissions of `seq_nr`.
    pub fn transmissions_of(&self, seq_nr: SeqNr) -> Vec<Transmitted> {
        self.ledger
            .read()
            .transmissions
            .iter()
            .filter(|t| t.seq_nr == seq_nr)
            .cloned()
            .collect()
    }

    fn accept(&self, transmitted: Transmitted) -> anyhow::Result<()> {
        if transmitted.signers.len() < self.min_signatures {
            anyhow::bail!(
                "{} signatures, need at least {}",
                transmitted.signers.len(),
                self.min_signatures
            );
        }
        let mut ledger = self.ledger.write();
        ledger.latest_seq_nr = ledger.latest_seq_nr.max(transmitted.seq_nr);
        ledger.transmissions.push(transmitted);
        Ok(())
    }
}

/// Transmitter of one oracle, logging each report it sends to the
/// [`Contract`].
pub struct LoggingTransmitter {
    id: OracleId,
    contract: Arc<Contract>,
}

impl LoggingTransmitter {
    /// Transmitter for oracle `id`.
    pub fn new(id: OracleId, contract: Arc<Contract>) -> Self {
        Self { id, contract }
    }
}

#[async_trait]
impl ContractTransmitter<()> for LoggingTransmitter {
    async fn transmit(
        &self,
        config_digest: ConfigDigest,
        seq_nr: SeqNr,
        report: ReportWithInfo<()>,
        signatures: Vec<AttributedOnchainSignature>,
    ) -> anyhow::Result<()> {
        let signers: Vec<OracleId> = signatures.iter().map(|s| s.signer).collect();
        info!(
            oracle_id = self.id,
            %config_digest,
            seq_nr,
            report = %hex::encode(&report.report),
            ?signers,
            "Transmitting report"
        );

        let transmitted = Transmitted {
            transmitter: self.id,
            seq_nr,
            report: report.report,
            signers,
            at: Instant::now(),
        };
        if let Err(e) = self.contract.accept(transmitted) {
            warn!(oracle_id = self.id, seq_nr, error = %e, "Contract rejected report");
            return Err(e);
        }
        Ok(())
    }

    async fn from_account(&self) -> anyhow::Result<Account> {
        Ok(format!("0x{:040x}", self.id))
    }
}
