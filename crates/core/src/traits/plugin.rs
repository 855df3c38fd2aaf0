//! Reporting plugin trait.
//!
//! The plugin holds the application logic: what to query, what to observe,
//! how to fold observations into an outcome, and which reports an outcome
//! produces. The protocol only moves opaque bytes between these calls.

use async_trait::async_trait;
use ocr3_types::{
    AttributedObservation, Observation, Outcome, OutcomeContext, Query, ReportPlus,
    ReportWithInfo, ReportingPluginInfo, SeqNr,
};

/// Application logic driven by the consensus protocol.
///
/// `RI` is the plugin-specific report metadata carried alongside each report.
/// All calls may be cancelled at any time by dropping the future; a plugin
/// must tolerate that.
#[async_trait]
pub trait ReportingPlugin<RI>: Send + Sync + 'static
where
    RI: Send + Sync + 'static,
{
    /// Static information (name, size limits).
    fn info(&self) -> ReportingPluginInfo;

    /// Leader only: produce the query for a round.
    async fn query(&self, ctx: &OutcomeContext) -> anyhow::Result<Query>;

    /// Produce an observation for the leader's query.
    async fn observation(&self, ctx: &OutcomeContext, query: &[u8]) -> anyhow::Result<Observation>;

    /// Deterministically compute the outcome from a quorum of observations.
    async fn outcome(
        &self,
        ctx: &OutcomeContext,
        query: &[u8],
        attributed_observations: &[AttributedObservation],
    ) -> anyhow::Result<Outcome>;

    /// Deterministically turn a committed outcome into reports.
    async fn reports(&self, seq_nr: SeqNr, outcome: &[u8]) -> anyhow::Result<Vec<ReportPlus<RI>>>;

    /// Decide whether a finalized report enters the transmission schedule.
    async fn should_accept_finalized_report(
        &self,
        seq_nr: SeqNr,
        report: &ReportWithInfo<RI>,
    ) -> anyhow::Result<bool>;

    /// Decide, right before transmitting, whether the report is still needed.
    async fn should_transmit_accepted_report(
        &self,
        seq_nr: SeqNr,
        report: &ReportWithInfo<RI>,
    ) -> anyhow::Result<bool>;

    /// Release resources. Called once when the oracle shuts down.
    async fn close(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
