use std::sync::Arc;

use crate::{
    measurement::{Measurement, MeasurementAccumulator},
    snapshot::CounterProvider,
};

use super::{error::MeasureError, read_counters};

/// Measures the number of open TCP and UDP sockets.
pub struct ConnectionsStat {
    provider: Arc<dyn CounterProvider>,
}

impl ConnectionsStat {
    pub fn new(provider: Arc<dyn CounterProvider>) -> Self {
        Self { provider }
    }

    pub async fn measure(&mut self, acc: &mut MeasurementAccumulator) -> Result<(), MeasureError> {
        let count = read_counters(&self.provider, |p| p.socket_count()).await?;
        acc.push(Measurement::gauge("connections", count));
        Ok(())
    }
}
