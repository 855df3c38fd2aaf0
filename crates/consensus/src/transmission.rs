//! Transmission: staggered delivery of attested reports.
//!
//! Oracles do not all transmit at once. Each report gets a keyed random
//! order over the oracles, and the stages of `S` map positions in that order
//! to delays: the first `S[0]` oracles transmit immediately, the next `S[1]`
//! after ΔStage, and so on. The plugin may replace this with its own
//! [`TransmissionSchedule`]. Before the delay the plugin gets to veto the
//! report, and it gets a second veto right before the transmit call.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use ocr3_config::{LocalConfig, SharedConfig};
use ocr3_core::{ContractTransmitter, ReportingPlugin};
use ocr3_crypto::{permutation, prf};
use ocr3_types::{OracleId, SeqNr, TransmissionSchedule};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, Instrument, Span};

use crate::events::EventAttestedReport;
use crate::plugin_caller::{call_plugin, Deadline, PLUGIN_WATCHDOG_GRACE, TRANSMITTER_WATCHDOG_GRACE};
use crate::scheduler::Scheduler;

const LOCAL_EVENT_QUEUE_SIZE: usize = 16;

/// Why a plugin-supplied transmission schedule was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScheduleError {
    /// Every transmitter needs exactly one delay
    #[error("lengths do not match: {transmitters} transmitters, {delays} delays")]
    LengthMismatch {
        /// Number of transmitters
        transmitters: usize,
        /// Number of delays
        delays: usize,
    },

    /// A transmitter is not an oracle of this configuration
    #[error("oracle id {0} out of bounds")]
    OutOfRange(OracleId),

    /// A transmitter appears twice
    #[error("duplicate oracle id {0}")]
    Duplicate(OracleId),
}

/// Key of the transmission order of report `index` of `seq_nr`.
pub fn transmit_permutation_key(transmission_order_key: &[u8; 16], seq_nr: SeqNr, index: usize) -> [u8; 16] {
    let mac = prf(
        transmission_order_key,
        &[&seq_nr.to_be_bytes(), &(index as u64).to_be_bytes()],
    );
    let mut key = [0u8; 16];
    key.copy_from_slice(&mac[..16]);
    key
}

/// Delays from the stages of `s`. Oracles ranked beyond `sum(s)` are absent
/// and never transmit.
pub fn transmit_delays_default(
    n: usize,
    s: &[usize],
    delta_stage: Duration,
    key: &[u8; 16],
) -> BTreeMap<OracleId, Duration> {
    // pi maps oracle to rank; invert it to walk ranks in order
    let pi = permutation(n, key);
    let mut by_rank = vec![0usize; n];
    for (oracle, &rank) in pi.iter().enumerate() {
        by_rank[rank] = oracle;
    }

    let mut delays = BTreeMap::new();
    let mut stage_start = 0usize;
    for (stage, &stage_size) in s.iter().enumerate() {
        let stage_end = stage_start.saturating_add(stage_size).min(n);
        for &oracle in by_rank.get(stage_start..stage_end).unwrap_or_default() {
            delays.insert(oracle as OracleId, delta_stage * stage as u32);
        }
        stage_start = stage_start.saturating_add(stage_size);
        if stage_start >= n {
            break;
        }
    }
    delays
}

/// Delays from a plugin schedule: transmitter `i` gets
/// `transmission_delays[pi[i]]` for a keyed permutation `pi`.
pub fn transmit_delays_from_override(
    n: usize,
    schedule: &TransmissionSchedule,
    key: &[u8; 16],
) -> Result<BTreeMap<OracleId, Duration>, ScheduleError> {
    if schedule.transmitters.len() != schedule.transmission_delays.len() {
        return Err(ScheduleError::LengthMismatch {
            transmitters: schedule.transmitters.len(),
            delays: schedule.transmission_delays.len(),
        });
    }
    if let Some(&oracle) = schedule
        .transmitters
        .iter()
        .find(|&&oracle| oracle as usize >= n)
    {
        return Err(ScheduleError::OutOfRange(oracle));
    }

    let pi = permutation(schedule.transmitters.len(), key);
    let mut delays = BTreeMap::new();
    for (i, &oracle) in schedule.transmitters.iter().enumerate() {
        if delays
            .insert(oracle, schedule.transmission_delays[pi[i]])
            .is_some()
        {
            return Err(ScheduleError::Duplicate(oracle));
        }
    }
    Ok(delays)
}

/// Delays for report `index` of `seq_nr` under `config`. `None` if the
/// override is invalid, which is logged.
fn transmit_delays(
    config: &SharedConfig,
    seq_nr: SeqNr,
    index: usize,
    schedule_override: Option<&TransmissionSchedule>,
) -> Option<BTreeMap<OracleId, Duration>> {
    let key = transmit_permutation_key(&config.transmission_order_key(), seq_nr, index);
    match schedule_override {
        None => Some(transmit_delays_default(
            config.public.n(),
            &config.public.s,
            config.public.delta_stage(),
            &key,
        )),
        Some(schedule) => match transmit_delays_from_override(config.public.n(), schedule, &key) {
            Ok(delays) => Some(delays),
            Err(e) => {
                error!(seq_nr, index, error = %e, ?schedule, "Invalid transmission schedule override, cannot compute delay");
                None
            }
        },
    }
}

enum LocalEvent<RI> {
    Accepted {
        deadline: Instant,
        event: EventAttestedReport<RI>,
    },
}

/// Channels feeding Transmission.
pub struct TransmissionChannels<RI> {
    /// Attested reports
    pub from_report_finalization: mpsc::Receiver<EventAttestedReport<RI>>,
}

/// External collaborators used by Transmission.
pub struct TransmissionDeps<RI> {
    /// Application logic
    pub plugin: Arc<dyn ReportingPlugin<RI>>,
    /// Delivers reports
    pub contract_transmitter: Arc<dyn ContractTransmitter<RI>>,
}

/// Transmission state machine of one oracle.
pub struct Transmission<RI> {
    config: Arc<SharedConfig>,
    local_config: LocalConfig,
    id: OracleId,
    deps: TransmissionDeps<RI>,
    channels: TransmissionChannels<RI>,
    cancel: CancellationToken,

    scheduler: Scheduler<EventAttestedReport<RI>>,
    local_tx: mpsc::Sender<LocalEvent<RI>>,
    local_rx: mpsc::Receiver<LocalEvent<RI>>,
    tasks: JoinSet<()>,
}

impl<RI> Transmission<RI>
where
    RI: Clone + Send + Sync + 'static,
{
    /// Create the state machine for oracle `id`.
    pub fn new(
        config: Arc<SharedConfig>,
        local_config: LocalConfig,
        id: OracleId,
        deps: TransmissionDeps<RI>,
        channels: TransmissionChannels<RI>,
        cancel: CancellationToken,
    ) -> Self {
        let (local_tx, local_rx) = mpsc::channel(LOCAL_EVENT_QUEUE_SIZE);
        Self {
            config,
            local_config,
            id,
            deps,
            channels,
            cancel,
            scheduler: Scheduler::new(),
            local_tx,
            local_rx,
            tasks: JoinSet::new(),
        }
    }

    /// Run until cancelled.
    pub async fn run(mut self) {
        info!("Running Transmission");

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,

                Some(event) = self.channels.from_report_finalization.recv() => {
                    self.event_attested_report(event);
                }

                Some(event) = self.local_rx.recv() => match event {
                    LocalEvent::Accepted { deadline, event } => {
                        self.scheduler.schedule_deadline(event, deadline);
                    }
                },

                Some(event) = self.scheduler.scheduled().recv() => self.event_scheduled(event),

                Some(_) = self.tasks.join_next() => {}
            }
        }

        self.tasks.shutdown().await;
        self.scheduler.close().await;
        info!("Transmission: exiting");
    }

    fn event_attested_report(&mut self, event: EventAttestedReport<RI>) {
        let start = Instant::now();
        let config = self.config.clone();
        let id = self.id;
        let plugin = self.deps.plugin.clone();
        let cancel = self.cancel.clone();
        let tx = self.local_tx.clone();

        self.tasks.spawn(
            async move {
                let seq_nr = event.seq_nr;
                let index = event.index;

                let Some(delays) = transmit_delays(
                    &config,
                    seq_nr,
                    index,
                    event.transmission_schedule_override.as_ref(),
                ) else {
                    return;
                };
                let Some(&delay) = delays.get(&id) else {
                    debug!(
                        seq_nr,
                        index,
                        schedule_override = event.transmission_schedule_override.is_some(),
                        "Dropping AttestedReport because we're not included in transmission schedule"
                    );
                    return;
                };

                let Some(should_accept) = call_plugin(
                    "ShouldAcceptFinalizedReport",
                    config.public.max_duration_should_accept_finalized_report(),
                    Deadline::Hard,
                    PLUGIN_WATCHDOG_GRACE,
                    &cancel,
                    plugin.should_accept_finalized_report(seq_nr, &event.attested_report.report_with_info),
                )
                .await
                else {
                    return;
                };
                if !should_accept {
                    debug!(seq_nr, index, "ReportingPlugin::should_accept_finalized_report returned false");
                    return;
                }

                debug!(
                    seq_nr,
                    index,
                    delay_ms = delay.as_millis() as u64,
                    schedule_override = event.transmission_schedule_override.is_some(),
                    "Accepted AttestedReport for transmission"
                );
                let accepted = LocalEvent::Accepted {
                    deadline: start + delay,
                    event,
                };
                tokio::select! {
                    _ = tx.send(accepted) => {}
                    _ = cancel.cancelled() => {}
                }
            }
            .instrument(Span::current()),
        );
    }

    fn event_scheduled(&mut self, event: EventAttestedReport<RI>) {
        let config_digest = self.config.public.config_digest;
        let max_duration = self.config.public.max_duration_should_transmit_accepted_report();
        let transmit_timeout = self.local_config.contract_transmitter_transmit_timeout();
        let plugin = self.deps.plugin.clone();
        let transmitter = self.deps.contract_transmitter.clone();
        let cancel = self.cancel.clone();

        self.tasks.spawn(
            async move {
                let seq_nr = event.seq_nr;
                let index = event.index;
                let report = event.attested_report;

                let Some(should_transmit) = call_plugin(
                    "ShouldTransmitAcceptedReport",
                    max_duration,
                    Deadline::Hard,
                    PLUGIN_WATCHDOG_GRACE,
                    &cancel,
                    plugin.should_transmit_accepted_report(seq_nr, &report.report_with_info),
                )
                .await
                else {
                    return;
                };
                if !should_transmit {
                    info!(seq_nr, index, "ReportingPlugin::should_transmit_accepted_report returned false");
                    return;
                }

                debug!(seq_nr, index, "Transmitting report");
                let transmitted = call_plugin(
                    "ContractTransmitter::transmit",
                    transmit_timeout,
                    Deadline::Hard,
                    TRANSMITTER_WATCHDOG_GRACE,
                    &cancel,
                    transmitter.transmit(
                        config_digest,
                        seq_nr,
                        report.report_with_info,
                        report.attributed_signatures,
                    ),
                )
                .await;
                if transmitted.is_some() {
                    info!(seq_nr, index, "Successfully invoked ContractTransmitter::transmit");
                }
            }
            .instrument(Span::current()),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DELTA_STAGE: Duration = Duration::from_secs(5);

    fn delays_histogram(delays: &BTreeMap<OracleId, Duration>) -> BTreeMap<Duration, usize> {
        let mut histogram = BTreeMap::new();
        for delay in delays.values() {
            *histogram.entry(*delay).or_insert(0) += 1;
        }
        histogram
    }

    #[test]
    fn test_permutation_key_is_truncated_prf() {
        let order_key = [9u8; 16];
        let key = transmit_permutation_key(&order_key, 12, 3);
        let mac = prf(&order_key, &[&12u64.to_be_bytes(), &3u64.to_be_bytes()]);
        assert_eq!(key[..], mac[..16]);
        assert_ne!(key, transmit_permutation_key(&order_key, 12, 4));
        assert_ne!(key, transmit_permutation_key(&order_key, 13, 3));
    }

    #[test]
    fn test_default_delays_partition_stages() {
        let key = [1u8; 16];
        let delays = transmit_delays_default(4, &[1, 1, 2], DELTA_STAGE, &key);

        assert_eq!(delays.len(), 4);
        let histogram = delays_histogram(&delays);
        assert_eq!(histogram[&Duration::ZERO], 1);
        assert_eq!(histogram[&DELTA_STAGE], 1);
        assert_eq!(histogram[&(DELTA_STAGE * 2)], 2);
    }

    #[test]
    fn test_default_delays_follow_permutation_ranks() {
        let key = [2u8; 16];
        let pi = permutation(4, &key);
        let delays = transmit_delays_default(4, &[1, 1, 2], DELTA_STAGE, &key);
        for (oracle, &rank) in pi.iter().enumerate() {
            let expected = match rank {
                0 => Duration::ZERO,
                1 => DELTA_STAGE,
                _ => DELTA_STAGE * 2,
            };
            assert_eq!(delays[&(oracle as OracleId)], expected);
        }
    }

    #[test]
    fn test_default_delays_leave_out_oracles_beyond_sum() {
        let key = [3u8; 16];
        let delays = transmit_delays_default(7, &[1, 1, 2], DELTA_STAGE, &key);
        assert_eq!(delays.len(), 4);

        // sum(S) larger than n is cut at n
        let delays = transmit_delays_default(3, &[2, 5], DELTA_STAGE, &key);
        assert_eq!(delays.len(), 3);
        let histogram = delays_histogram(&delays);
        assert_eq!(histogram[&Duration::ZERO], 2);
        assert_eq!(histogram[&DELTA_STAGE], 1);
    }

    #[test]
    fn test_default_delays_deterministic() {
        let key = transmit_permutation_key(&[4u8; 16], 99, 0);
        assert_eq!(
            transmit_delays_default(10, &[2, 3, 5], DELTA_STAGE, &key),
            transmit_delays_default(10, &[2, 3, 5], DELTA_STAGE, &key)
        );
    }

    #[test]
    fn test_override_delays_permute_transmitters() {
        let key = [5u8; 16];
        let schedule = TransmissionSchedule {
            transmitters: vec![3, 0, 2],
            transmission_delays: vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(3),
            ],
        };
        let delays = transmit_delays_from_override(4, &schedule, &key).unwrap();
        let pi = permutation(3, &key);

        assert_eq!(delays.len(), 3);
        assert!(!delays.contains_key(&1));
        for (i, oracle) in schedule.transmitters.iter().enumerate() {
            assert_eq!(delays[oracle], schedule.transmission_delays[pi[i]]);
        }
    }

    #[test]
    fn test_override_rejects_invalid_schedules() {
        let key = [6u8; 16];
        let mismatch = TransmissionSchedule {
            transmitters: vec![0, 1],
            transmission_delays: vec![Duration::ZERO],
        };
        assert_eq!(
            transmit_delays_from_override(4, &mismatch, &key),
            Err(ScheduleError::LengthMismatch {
                transmitters: 2,
                delays: 1
            })
        );

        let out_of_range = TransmissionSchedule {
            transmitters: vec![0, 4],
            transmission_delays: vec![Duration::ZERO, Duration::ZERO],
        };
        assert_eq!(
            transmit_delays_from_override(4, &out_of_range, &key),
            Err(ScheduleError::OutOfRange(4))
        );

        let duplicate = TransmissionSchedule {
            transmitters: vec![1, 1],
            transmission_delays: vec![Duration::ZERO, Duration::ZERO],
        };
        assert_eq!(
            transmit_delays_from_override(4, &duplicate, &key),
            Err(ScheduleError::Duplicate(1))
        );
    }
}
