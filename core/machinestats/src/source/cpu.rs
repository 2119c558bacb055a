//! CPU busyness, computed from the tick counters of `/proc/stat`.

use std::{collections::HashMap, fmt, sync::Arc};

use crate::{
    measurement::{Measurement, MeasurementAccumulator},
    snapshot::{CounterProvider, CpuSnapshot, CpuTicks},
};

use super::{error::MeasureError, read_counters};

/// Tick counts of a CPU, decomposed the same way as `top` and `htop` do.
///
/// `user` and `nice` include the time spent running guests, which is already
/// accounted for in `guest` and `guest_nice`, therefore it is subtracted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatLine {
    pub user_time: i64,
    pub nice_time: i64,
    pub idle_all_time: i64,
    pub system_all_time: i64,
    pub virt_all_time: i64,
    pub total: i64,
}

impl From<&CpuTicks> for StatLine {
    fn from(t: &CpuTicks) -> Self {
        let user_time = t.user as i64 - t.guest as i64;
        let nice_time = t.nice as i64 - t.guest_nice as i64;
        let idle_all_time = t.idle as i64 + t.iowait as i64;
        let system_all_time = t.system as i64 + t.irq as i64 + t.softirq as i64;
        let virt_all_time = t.guest as i64 + t.guest_nice as i64;
        let total = user_time + nice_time + system_all_time + idle_all_time + t.steal as i64 + virt_all_time;
        Self {
            user_time,
            nice_time,
            idle_all_time,
            system_all_time,
            virt_all_time,
            total,
        }
    }
}

/// Computes the fraction of time that the CPU has not been idle between two samples.
///
/// Returns NaN if the total did not change between `prev` and `now`.
pub fn busyness(now: &StatLine, prev: &StatLine) -> f64 {
    let delta_total = now.total - prev.total;
    let delta_idle = now.idle_all_time - prev.idle_all_time;
    (delta_total - delta_idle) as f64 / delta_total as f64
}

/// Identifies a CPU line of `/proc/stat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CpuId {
    /// The aggregated line.
    Total,
    /// A single CPU, by index.
    Core(usize),
}

impl fmt::Display for CpuId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CpuId::Total => f.write_str("total"),
            CpuId::Core(i) => write!(f, "{i:02}"),
        }
    }
}

/// Delta engine for CPU busyness.
///
/// Keeps the previous [`StatLine`] of each CPU and compares it to the new one.
#[derive(Debug, Default)]
pub struct CpuBusyness {
    previous: HashMap<CpuId, StatLine>,
    per_cpu: bool,
}

impl CpuBusyness {
    /// Creates a new engine. If `per_cpu` is false, only the aggregated line is tracked.
    pub fn new(per_cpu: bool) -> Self {
        Self {
            previous: HashMap::new(),
            per_cpu,
        }
    }

    /// Applies a new snapshot and returns the busyness of every CPU that was already known.
    ///
    /// The aggregated value comes first, then the CPUs by increasing index.
    /// CPUs seen for the first time only seed the state.
    pub fn update(&mut self, snapshot: &CpuSnapshot) -> Vec<(CpuId, f64)> {
        let mut lines = Vec::with_capacity(snapshot.per_cpu.len() + 1);
        lines.push((CpuId::Total, StatLine::from(&snapshot.total)));
        if self.per_cpu {
            lines.extend(
                snapshot
                    .per_cpu
                    .iter()
                    .map(|(i, ticks)| (CpuId::Core(*i), StatLine::from(ticks))),
            );
        }

        let mut result = Vec::with_capacity(lines.len());
        for (id, now) in lines {
            if let Some(prev) = self.previous.insert(id, now) {
                result.push((id, busyness(&now, &prev)));
            }
        }
        result
    }
}

/// Measures the busyness of the CPUs.
pub struct CpuLoadStat {
    provider: Arc<dyn CounterProvider>,
    engine: CpuBusyness,
}

impl CpuLoadStat {
    pub fn new(provider: Arc<dyn CounterProvider>, per_cpu: bool) -> Self {
        Self {
            provider,
            engine: CpuBusyness::new(per_cpu),
        }
    }

    pub async fn measure(&mut self, acc: &mut MeasurementAccumulator) -> Result<(), MeasureError> {
        let snapshot = read_counters(&self.provider, |p| p.cpu_ticks()).await?;
        let values = self.engine.update(&snapshot);
        if values.is_empty() {
            log::debug!("first cpu sample, nothing to compare with yet");
        }
        for (cpu, value) in values {
            acc.push(Measurement::gauge(format!("cpu-load.{cpu}"), value));
        }
        Ok(())
    }
}
