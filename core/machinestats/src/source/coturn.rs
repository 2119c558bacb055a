use crate::{
    console::CoturnClient,
    measurement::{Measurement, MeasurementAccumulator},
};

use super::error::MeasureError;

/// Measures the number of sessions of a coturn server.
pub struct CoturnStat {
    client: CoturnClient,
}

impl CoturnStat {
    pub fn new(client: CoturnClient) -> Self {
        Self { client }
    }

    pub async fn measure(&mut self, acc: &mut MeasurementAccumulator) -> Result<(), MeasureError> {
        let sessions = self.client.sessions().await?;
        log::debug!("coturn at {} has {sessions} sessions", self.client.address());
        acc.push(Measurement::gauge("coturn.numSessions", sessions));
        Ok(())
    }
}
