use crate::console::ConsoleError;

/// Error that can occur when a stat source is measured.
///
/// All these errors are temporary from the point of view of the poll loop:
/// the failed source is skipped for the current cycle and polled again at the next one.
#[derive(Debug, thiserror::Error)]
pub enum MeasureError {
    /// The counter provider could not produce a snapshot.
    #[error("could not read counters: {0:#}")]
    Counters(anyhow::Error),
    /// The remote console did not give the expected answer.
    #[error(transparent)]
    Console(#[from] ConsoleError),
    /// The HTTP endpoint could not be queried or returned invalid data.
    #[error("http request failed: {0:#}")]
    Http(anyhow::Error),
}
