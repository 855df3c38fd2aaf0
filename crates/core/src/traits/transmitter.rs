//! Contract transmitter trait.

use async_trait::async_trait;
use ocr3_types::{Account, AttributedOnchainSignature, ConfigDigest, ReportWithInfo, SeqNr};

/// Delivers attested reports to the external target.
#[async_trait]
pub trait ContractTransmitter<RI>: Send + Sync + 'static
where
    RI: Send + Sync + 'static,
{
    /// Deliver a report with more than `f` onchain signatures.
    async fn transmit(
        &self,
        config_digest: ConfigDigest,
        seq_nr: SeqNr,
        report: ReportWithInfo<RI>,
        signatures: Vec<AttributedOnchainSignature>,
    ) -> anyhow::Result<()>;

    /// Account reports are transmitted from.
    async fn from_account(&self) -> anyhow::Result<Account>;
}
