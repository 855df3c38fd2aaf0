//! A counting reporting plugin.
//!
//! Every round the oracles agree on the next value of a counter: each
//! observes `previous + 1`, the outcome is the median of the observations,
//! and the outcome becomes one report. Transmission is skipped once the
//! contract already holds a report at least as recent.

use std::sync::Arc;

use async_trait::async_trait;
use ocr3_core::ReportingPlugin;
use ocr3_types::{
    AttributedObservation, Observation, OracleId, Outcome, OutcomeContext, Query, ReportPlus,
    ReportWithInfo, ReportingPluginInfo, ReportingPluginLimits, SeqNr,
};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::debug;

use crate::transmitter::Contract;

/// Encoded length of a counter value.
pub const COUNTER_LENGTH: usize = 8;

/// Errors raised by [`CounterPlugin`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CounterError {
    /// A value did not have the encoded length of a counter
    #[error("malformed counter: expected {COUNTER_LENGTH} bytes, got {0}")]
    Malformed(usize),

    /// No observation decoded to a counter
    #[error("no valid observations")]
    NoObservations,
}

/// Decode a counter; the empty genesis outcome counts as zero.
pub fn decode_counter(bytes: &[u8]) -> Result<u64, CounterError> {
    if bytes.is_empty() {
        return Ok(0);
    }
    let array: [u8; COUNTER_LENGTH] = bytes
        .try_into()
        .map_err(|_| CounterError::Malformed(bytes.len()))?;
    Ok(u64::from_be_bytes(array))
}

/// Encode a counter.
pub fn encode_counter(value: u64) -> Vec<u8> {
    value.to_be_bytes().to_vec()
}

/// Sequence numbers an oracle computed reports for, in call order.
///
/// Survives restarts of the oracle it belongs to, so it doubles as a record
/// of everything the oracle ever delivered.
#[derive(Debug, Default)]
pub struct DeliveryLog {
    seq_nrs: Mutex<Vec<SeqNr>>,
}

impl DeliveryLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, seq_nr: SeqNr) {
        self.seq_nrs.lock().push(seq_nr);
    }

    /// Everything recorded so far.
    pub fn seq_nrs(&self) -> Vec<SeqNr> {
        self.seq_nrs.lock().clone()
    }

    /// Whether `seq_nr` was recorded.
    pub fn contains(&self, seq_nr: SeqNr) -> bool {
        self.seq_nrs.lock().contains(&seq_nr)
    }

    /// Highest recorded sequence number, zero when empty.
    pub fn highest(&self) -> SeqNr {
        self.seq_nrs.lock().iter().copied().max().unwrap_or(0)
    }
}

/// Counter plugin instance of one oracle.
pub struct CounterPlugin {
    id: OracleId,
    contract: Arc<Contract>,
    deliveries: Arc<DeliveryLog>,
}

impl CounterPlugin {
    /// Plugin of oracle `id`, reading transmission state from `contract`.
    pub fn new(id: OracleId, contract: Arc<Contract>, deliveries: Arc<DeliveryLog>) -> Self {
        Self {
            id,
            contract,
            deliveries,
        }
    }
}

#[async_trait]
impl ReportingPlugin<()> for CounterPlugin {
    fn info(&self) -> ReportingPluginInfo {
        ReportingPluginInfo {
            name: "counter".to_string(),
            limits: ReportingPluginLimits {
                max_query_length: 0,
                max_observation_length: COUNTER_LENGTH,
                max_outcome_length: COUNTER_LENGTH,
                max_report_length: COUNTER_LENGTH,
                max_report_count: 1,
            },
        }
    }

    async fn query(&self, _ctx: &OutcomeContext) -> anyhow::Result<Query> {
        Ok(Vec::new())
    }

    async fn observation(&self, ctx: &OutcomeContext, _query: &[u8]) -> anyhow::Result<Observation> {
        let previous = decode_counter(&ctx.previous_outcome)?;
        Ok(encode_counter(previous + 1))
    }

    async fn outcome(
        &self,
        ctx: &OutcomeContext,
        _query: &[u8],
        attributed_observations: &[AttributedObservation],
    ) -> anyhow::Result<Outcome> {
        let mut values: Vec<u64> = attributed_observations
            .iter()
            .filter(|ao| ao.observation.len() == COUNTER_LENGTH)
            .filter_map(|ao| decode_counter(&ao.observation).ok())
            .collect();
        if values.is_empty() {
            return Err(CounterError::NoObservations.into());
        }
        values.sort_unstable();
        let median = values[values.len() / 2];
        debug!(oracle_id = self.id, seq_nr = ctx.seq_nr, median, "Computed counter outcome");
        Ok(encode_counter(median))
    }

    async fn reports(&self, seq_nr: SeqNr, outcome: &[u8]) -> anyhow::Result<Vec<ReportPlus<()>>> {
        self.deliveries.record(seq_nr);
        if outcome.is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![ReportPlus::new(outcome.to_vec(), ())])
    }

    async fn should_accept_finalized_report(
        &self,
        seq_nr: SeqNr,
        _report: &ReportWithInfo<()>,
    ) -> anyhow::Result<bool> {
        Ok(seq_nr > self.contract.latest_seq_nr())
    }

    async fn should_transmit_accepted_report(
        &self,
        seq_nr: SeqNr,
        _report: &ReportWithInfo<()>,
    ) -> anyhow::Result<bool> {
        Ok(seq_nr > self.contract.latest_seq_nr())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plugin() -> CounterPlugin {
        CounterPlugin::new(0, Arc::new(Contract::new()), Arc::new(DeliveryLog::new()))
    }

    fn ctx(seq_nr: SeqNr, previous: Option<u64>) -> OutcomeContext {
        OutcomeContext {
            seq_nr,
            previous_outcome: previous.map(encode_counter).unwrap_or_default(),
            epoch: 1,
            round: seq_nr,
        }
    }

    fn observed(observer: OracleId, observation: Vec<u8>) -> AttributedObservation {
        AttributedObservation {
            observation,
            observer,
        }
    }

    #[test]
    fn test_decode_counter() {
        assert_eq!(decode_counter(&[]), Ok(0));
        assert_eq!(decode_counter(&encode_counter(42)), Ok(42));
        assert_eq!(decode_counter(&[1, 2, 3]), Err(CounterError::Malformed(3)));
    }

    #[tokio::test]
    async fn test_observation_increments_previous_outcome() {
        let plugin = plugin();
        assert_eq!(plugin.observation(&ctx(1, None), &[]).await.unwrap(), encode_counter(1));
        assert_eq!(plugin.observation(&ctx(8, Some(7)), &[]).await.unwrap(), encode_counter(8));
    }

    #[tokio::test]
    async fn test_outcome_is_median_ignoring_garbage() {
        let plugin = plugin();
        let observations = vec![
            observed(0, encode_counter(5)),
            observed(1, encode_counter(900)),
            observed(2, vec![0xff]),
            observed(3, encode_counter(6)),
        ];
        let outcome = plugin.outcome(&ctx(5, Some(4)), &[], &observations).await.unwrap();
        assert_eq!(outcome, encode_counter(6));
    }

    #[tokio::test]
    async fn test_outcome_without_valid_observations_fails() {
        let plugin = plugin();
        let observations = vec![observed(0, vec![1]), observed(1, vec![])];
        assert!(plugin.outcome(&ctx(1, None), &[], &observations).await.is_err());
    }

    #[tokio::test]
    async fn test_reports_are_recorded() {
        let deliveries = Arc::new(DeliveryLog::new());
        let plugin = CounterPlugin::new(0, Arc::new(Contract::new()), deliveries.clone());

        let reports = plugin.reports(3, &encode_counter(3)).await.unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].report_with_info.report, encode_counter(3));
        assert!(plugin.reports(4, &[]).await.unwrap().is_empty());

        assert_eq!(deliveries.seq_nrs(), vec![3, 4]);
        assert_eq!(deliveries.highest(), 4);
        assert!(deliveries.contains(3));
    }
}
