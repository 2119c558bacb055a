//! Network throughput, computed from the byte counters of `/proc/net/dev`.

use std::sync::Arc;

use crate::{
    measurement::{Measurement, MeasurementAccumulator},
    snapshot::{ByteCounters, CounterProvider, NetDevSnapshot},
};

use super::{error::MeasureError, read_counters};

const MEGABYTE: f64 = (1024 * 1024) as f64;

/// Name of the aggregated entry, computed from the sum of all the interfaces.
pub const TOTAL_INTERFACE: &str = "total";

/// Converts a number of bytes transferred in `elapsed_secs` seconds to megabits per second.
///
/// A zero elapsed time gives a non-finite value.
pub fn rate_mbps(delta_bytes: u64, elapsed_secs: f64) -> f64 {
    ((delta_bytes as f64 / elapsed_secs) / MEGABYTE) * 8.0
}

/// Throughput of one interface over the last interval.
#[derive(Debug, Clone, PartialEq)]
pub struct InterfaceRate {
    pub interface: String,
    pub download_mbps: f64,
    pub upload_mbps: f64,
}

/// Delta engine for network throughput.
///
/// Keeps the previous snapshot, and the time at which it was taken.
#[derive(Debug, Default)]
pub struct BandwidthRates {
    previous: Option<NetDevSnapshot>,
}

impl BandwidthRates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies a new snapshot and returns the rates of the interfaces since the previous one.
    ///
    /// Returns `None` on the first call. The aggregated [`TOTAL_INTERFACE`] entry comes last.
    pub fn update(&mut self, snapshot: NetDevSnapshot) -> Option<Vec<InterfaceRate>> {
        let prev = self.previous.replace(snapshot)?;
        let now = self.previous.as_ref()?;

        let elapsed = now.taken_at.saturating_duration_since(prev.taken_at).as_secs_f64();
        log::debug!("elapsed time since previous network sample: {elapsed:.3}s");

        let mut rates = Vec::with_capacity(now.interfaces.len() + 1);
        for (interface, counters) in &now.interfaces {
            // Also skips the first value when a new interface appears at runtime.
            let Some(prev_counters) = prev.interfaces.get(interface) else {
                log::debug!("new interface {interface}, skipped until next sample");
                continue;
            };
            if let Some(rate) = compute_rate(interface, counters, prev_counters, elapsed) {
                rates.push(rate);
            }
        }
        if let Some(rate) = compute_rate(TOTAL_INTERFACE, &now.total(), &prev.total(), elapsed) {
            rates.push(rate);
        }
        Some(rates)
    }
}

fn compute_rate(interface: &str, now: &ByteCounters, prev: &ByteCounters, elapsed_secs: f64) -> Option<InterfaceRate> {
    let (Some(downloaded), Some(uploaded)) = (now.rx.checked_sub(prev.rx), now.tx.checked_sub(prev.tx)) else {
        log::debug!("counters of {interface} went backwards, skipped");
        return None;
    };
    log::debug!("{interface} - downloaded ({downloaded})");
    log::debug!("{interface} - uploaded   ({uploaded})");
    Some(InterfaceRate {
        interface: interface.to_owned(),
        download_mbps: rate_mbps(downloaded, elapsed_secs),
        upload_mbps: rate_mbps(uploaded, elapsed_secs),
    })
}

/// Measures the download and upload rates of the network interfaces.
pub struct BandwidthStat {
    provider: Arc<dyn CounterProvider>,
    engine: BandwidthRates,
}

impl BandwidthStat {
    pub fn new(provider: Arc<dyn CounterProvider>) -> Self {
        Self {
            provider,
            engine: BandwidthRates::new(),
        }
    }

    pub async fn measure(&mut self, acc: &mut MeasurementAccumulator) -> Result<(), MeasureError> {
        let snapshot = read_counters(&self.provider, |p| p.net_dev()).await?;
        let Some(rates) = self.engine.update(snapshot) else {
            log::debug!("first network sample, nothing to compare with yet");
            return Ok(());
        };
        for rate in rates {
            let prefix = format!("network.interfaces.{}", rate.interface);
            acc.push(Measurement::gauge(format!("{prefix}.download.mbps"), rate.download_mbps));
            acc.push(Measurement::gauge(format!("{prefix}.upload.mbps"), rate.upload_mbps));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::time::{Duration, Instant};

    use pretty_assertions::assert_eq;

    use super::*;

    fn snapshot(taken_at: Instant, interfaces: &[(&str, u64, u64)]) -> NetDevSnapshot {
        NetDevSnapshot {
            taken_at,
            interfaces: interfaces
                .iter()
                .map(|(name, rx, tx)| (name.to_string(), ByteCounters { rx: *rx, tx: *tx }))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    #[test]
    fn first_sample_emits_nothing() {
        let mut engine = BandwidthRates::new();
        assert_eq!(engine.update(snapshot(Instant::now(), &[("eth0", 1, 1)])), None);
    }

    #[test]
    fn zero_delta_is_zero_rate() {
        let t0 = Instant::now();
        let mut engine = BandwidthRates::new();
        engine.update(snapshot(t0, &[("eth0", 1000, 2000)]));
        let rates = engine
            .update(snapshot(t0 + Duration::from_secs(2), &[("eth0", 1000, 2000)]))
            .unwrap();
        assert_eq!(
            rates,
            vec![
                InterfaceRate {
                    interface: "eth0".into(),
                    download_mbps: 0.0,
                    upload_mbps: 0.0
                },
                InterfaceRate {
                    interface: "total".into(),
                    download_mbps: 0.0,
                    upload_mbps: 0.0
                },
            ]
        );
    }

    #[test]
    fn zero_elapsed_is_not_finite() {
        let t0 = Instant::now();
        let mut engine = BandwidthRates::new();
        engine.update(snapshot(t0, &[("eth0", 1000, 2000)]));
        let rates = engine.update(snapshot(t0, &[("eth0", 2000, 2000)])).unwrap();
        assert!(rates[0].download_mbps.is_infinite());
        assert!(rates[0].upload_mbps.is_nan());
    }

    #[test]
    fn one_megabyte_per_second() {
        assert_eq!(rate_mbps(1024 * 1024, 1.0), 8.0);
        assert_eq!(rate_mbps(3 * 1024 * 1024, 3.0), 8.0);
    }

    #[test]
    fn interfaces_come_and_go() {
        let t0 = Instant::now();
        let mut engine = BandwidthRates::new();
        engine.update(snapshot(t0, &[("eth0", 0, 0), ("wg0", 0, 0)]));
        let rates = engine
            .update(snapshot(
                t0 + Duration::from_secs(1),
                &[("eth0", 1024 * 1024, 0), ("tun0", 50, 50)],
            ))
            .unwrap();
        let names: Vec<&str> = rates.iter().map(|r| r.interface.as_str()).collect();
        // tun0 is new, wg0 is gone
        assert_eq!(names, vec!["eth0", "total"]);
        assert_eq!(rates[0].download_mbps, 8.0);
    }

    #[test]
    fn counter_reset_is_skipped() {
        let t0 = Instant::now();
        let mut engine = BandwidthRates::new();
        engine.update(snapshot(t0, &[("eth0", 5000, 5000), ("eth1", 10, 10)]));
        let rates = engine
            .update(snapshot(t0 + Duration::from_secs(1), &[("eth0", 10, 10), ("eth1", 20, 20)]))
            .unwrap();
        let names: Vec<&str> = rates.iter().map(|r| r.interface.as_str()).collect();
        assert_eq!(names, vec!["eth1"]);
    }
}
