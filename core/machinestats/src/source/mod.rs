//! Stat sources.
//!
//! A source measures one aspect of the machine, or of a service running on it,
//! each time it is polled. Sources that compute rates keep the previous sample
//! of their counters, which is why [`StatSource::measure`] takes `&mut self`.

use std::sync::Arc;

use anyhow::anyhow;

use crate::{console::CoturnClient, measurement::MeasurementAccumulator, snapshot::CounterProvider};

mod bandwidth;
mod connections;
mod coturn;
mod cpu;
pub mod error;
mod http;
mod memory;

pub use bandwidth::{BandwidthRates, BandwidthStat, InterfaceRate, TOTAL_INTERFACE, rate_mbps};
pub use connections::ConnectionsStat;
pub use coturn::CoturnStat;
pub use cpu::{CpuBusyness, CpuId, CpuLoadStat, StatLine, busyness};
pub use error::MeasureError;
pub use http::{HttpJsonStat, flatten_map};
pub use memory::{MemoryLoadStat, used_percent};

/// A source of measurements, polled periodically.
pub enum StatSource {
    Cpu(CpuLoadStat),
    Bandwidth(BandwidthStat),
    Memory(MemoryLoadStat),
    Connections(ConnectionsStat),
    Coturn(CoturnStat),
    Http(HttpJsonStat),
}

impl StatSource {
    pub fn cpu(provider: Arc<dyn CounterProvider>, per_cpu: bool) -> Self {
        StatSource::Cpu(CpuLoadStat::new(provider, per_cpu))
    }

    pub fn bandwidth(provider: Arc<dyn CounterProvider>) -> Self {
        StatSource::Bandwidth(BandwidthStat::new(provider))
    }

    pub fn memory(provider: Arc<dyn CounterProvider>) -> Self {
        StatSource::Memory(MemoryLoadStat::new(provider))
    }

    pub fn connections(provider: Arc<dyn CounterProvider>) -> Self {
        StatSource::Connections(ConnectionsStat::new(provider))
    }

    pub fn coturn(client: CoturnClient) -> Self {
        StatSource::Coturn(CoturnStat::new(client))
    }

    /// Name of the source, used in the logs.
    pub fn name(&self) -> &str {
        match self {
            StatSource::Cpu(_) => "cpu",
            StatSource::Bandwidth(_) => "bandwidth",
            StatSource::Memory(_) => "memory",
            StatSource::Connections(_) => "connections",
            StatSource::Coturn(_) => "coturn",
            StatSource::Http(stat) => stat.name(),
        }
    }

    /// Polls the source and pushes its measurements to `acc`.
    ///
    /// On error, `acc` may contain some measurements of the failed poll.
    pub async fn measure(&mut self, acc: &mut MeasurementAccumulator) -> Result<(), MeasureError> {
        match self {
            StatSource::Cpu(stat) => stat.measure(acc).await,
            StatSource::Bandwidth(stat) => stat.measure(acc).await,
            StatSource::Memory(stat) => stat.measure(acc).await,
            StatSource::Connections(stat) => stat.measure(acc).await,
            StatSource::Coturn(stat) => stat.measure(acc).await,
            StatSource::Http(stat) => stat.measure(acc).await,
        }
    }
}

/// Calls the counter provider on the blocking thread pool.
///
/// Providers read files synchronously, this keeps them from blocking the
/// other sources of the cycle.
async fn read_counters<T, F>(provider: &Arc<dyn CounterProvider>, read: F) -> Result<T, MeasureError>
where
    T: Send + 'static,
    F: FnOnce(&dyn CounterProvider) -> anyhow::Result<T> + Send + 'static,
{
    let provider = provider.clone();
    tokio::task::spawn_blocking(move || read(provider.as_ref()))
        .await
        .map_err(|e| MeasureError::Counters(anyhow!("counter reading task failed: {e}")))?
        .map_err(MeasureError::Counters)
}
