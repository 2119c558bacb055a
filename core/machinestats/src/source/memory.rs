//! Memory pressure.

use std::sync::Arc;

use crate::{
    measurement::{Measurement, MeasurementAccumulator},
    snapshot::{CounterProvider, MemorySnapshot},
};

use super::{error::MeasureError, read_counters};

/// Percentage of the memory that is not available to new allocations.
pub fn used_percent(memory: &MemorySnapshot) -> f64 {
    let used = memory.total.saturating_sub(memory.available);
    (used as f64 / memory.total as f64) * 100.0
}

/// Measures the memory load, in percent.
pub struct MemoryLoadStat {
    provider: Arc<dyn CounterProvider>,
}

impl MemoryLoadStat {
    pub fn new(provider: Arc<dyn CounterProvider>) -> Self {
        Self { provider }
    }

    pub async fn measure(&mut self, acc: &mut MeasurementAccumulator) -> Result<(), MeasureError> {
        let memory = read_counters(&self.provider, |p| p.memory()).await?;
        acc.push(Measurement::gauge("memory-load", used_percent(&memory)));
        Ok(())
    }
}
