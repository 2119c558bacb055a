//! The poll loop, which measures all the sources at a fixed interval.

use std::{
    collections::BTreeMap,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use futures::{StreamExt, stream::FuturesUnordered};
use serde::Serialize;
use tokio::{
    sync::{mpsc, watch},
    time::MissedTickBehavior,
};
use tokio_util::sync::CancellationToken;

use crate::{
    measurement::{Measurement, MeasurementAccumulator, MeasurementValue},
    source::StatSource,
};

const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// The measurement channel has been closed by its receiver.
#[derive(Debug, thiserror::Error)]
#[error("the measurement channel has been closed")]
pub struct ChannelClosed;

/// Last value of every measurement produced by a poll cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CycleSnapshot {
    /// End of the cycle, in milliseconds since the Unix epoch. Zero before the first cycle.
    pub timestamp: u64,
    pub data: BTreeMap<String, MeasurementValue>,
}

/// Polls a set of sources and forwards their measurements to a channel.
pub struct Poller {
    sources: Vec<StatSource>,
    interval: Duration,
    tx: mpsc::Sender<Measurement>,
    snapshot_tx: watch::Sender<CycleSnapshot>,
}

impl Poller {
    pub fn new(sources: Vec<StatSource>, interval: Duration, tx: mpsc::Sender<Measurement>) -> Self {
        let (snapshot_tx, _) = watch::channel(CycleSnapshot::default());
        Self {
            sources,
            interval,
            tx,
            snapshot_tx,
        }
    }

    /// Returns a receiver that is notified with the snapshot of every completed cycle.
    pub fn subscribe(&self) -> watch::Receiver<CycleSnapshot> {
        self.snapshot_tx.subscribe()
    }

    /// Runs one poll cycle.
    ///
    /// All the sources are measured concurrently: the counters are read on the blocking
    /// thread pool while the remote services are queried. The measurements of a source
    /// are sent as soon as it has finished, so the order between sources is the order
    /// in which they complete. NaN and infinite values are dropped.
    /// A source that fails is logged and skipped, the others are not affected.
    pub async fn cycle(&mut self) -> Result<(), ChannelClosed> {
        let mut pending: FuturesUnordered<_> = self
            .sources
            .iter_mut()
            .map(|source| async move {
                let mut acc = MeasurementAccumulator::new();
                let res = source.measure(&mut acc).await;
                (source.name().to_owned(), acc, res)
            })
            .collect();

        let mut latest = BTreeMap::new();
        while let Some((name, acc, res)) = pending.next().await {
            if let Err(e) = res {
                log::error!("Failed to measure source {name}: {e}");
                continue;
            }
            log::debug!("source {name} produced {} measurements", acc.len());
            for m in acc {
                if !m.value.is_finite() {
                    log::debug!("dropping non-finite value of {}: {}", m.name, m.value);
                    continue;
                }
                latest.insert(m.name.clone(), m.value);
                self.tx.send(m).await.map_err(|_| ChannelClosed)?;
            }
        }
        drop(pending);

        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        self.snapshot_tx.send_replace(CycleSnapshot { timestamp, data: latest });
        Ok(())
    }

    /// Runs a cycle at every tick of the interval, until `shutdown` is cancelled.
    ///
    /// The first cycle starts immediately. If a cycle takes longer than the
    /// interval, the next one starts when it finishes.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<(), ChannelClosed> {
        let period = self.interval.max(MIN_INTERVAL);
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        log::info!("polling {} sources every {period:?}", self.sources.len());

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => (),
            }
            tokio::select! {
                _ = shutdown.cancelled() => break,
                res = self.cycle() => res?,
            }
        }
        log::info!("poll loop stopped");
        Ok(())
    }
}
