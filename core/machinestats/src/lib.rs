//! Periodic statistics about a machine and the services that run on it.
//!
//! The crate is organized around a few concepts:
//! - [`CounterProvider`](snapshot::CounterProvider): reads raw, monotonic counters (CPU ticks, network bytes, ...).
//!   [`ProcfsProvider`](procfs::ProcfsProvider) reads them from the Linux procfs.
//! - [`StatSource`](source::StatSource): turns counters, or the answer of a remote service,
//!   into [`Measurement`](measurement::Measurement)s. Sources that compute rates keep the previous sample.
//! - [`console`]: a client for line-oriented consoles, used to query the coturn CLI.
//! - [`Poller`](poll::Poller): measures every source at a fixed interval and forwards the measurements
//!   to a channel, while keeping the last value of each one.
//!
//! # Example
//!
//! ```no_run
//! use std::{sync::Arc, time::Duration};
//!
//! use machinestats::{poll::Poller, procfs::ProcfsProvider, source::StatSource};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() {
//! let provider = Arc::new(ProcfsProvider::default());
//! let sources = vec![
//!     StatSource::cpu(provider.clone(), true),
//!     StatSource::bandwidth(provider.clone()),
//! ];
//! let (tx, mut rx) = tokio::sync::mpsc::channel(64);
//! let poller = Poller::new(sources, Duration::from_secs(3), tx);
//! tokio::spawn(poller.run(CancellationToken::new()));
//! while let Some(m) = rx.recv().await {
//!     println!("{} = {}", m.name, m.value);
//! }
//! # }
//! ```

pub mod console;
pub mod measurement;
pub mod poll;
pub mod procfs;
pub mod snapshot;
pub mod source;
