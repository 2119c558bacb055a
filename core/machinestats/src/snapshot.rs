//! Counter snapshots and the provider that produces them.
//!
//! The stat sources never read the operating system directly: they ask a
//! [`CounterProvider`] for a point-in-time snapshot of the counters they need.
//! The provider is injected when the sources are built, which makes it easy to
//! feed them synthetic snapshots in tests.

use std::collections::BTreeMap;
use std::time::Instant;

/// Provides point-in-time readings of system counters.
///
/// Every method may fail, in which case the current poll of the source that
/// called it fails (and only that one).
pub trait CounterProvider: Send + Sync {
    /// Reads the aggregated and per-CPU tick counters.
    fn cpu_ticks(&self) -> anyhow::Result<CpuSnapshot>;

    /// Reads the rx/tx byte counters of every network interface.
    fn net_dev(&self) -> anyhow::Result<NetDevSnapshot>;

    /// Reads the total and available memory.
    fn memory(&self) -> anyhow::Result<MemorySnapshot>;

    /// Counts the open TCP and UDP sockets.
    fn socket_count(&self) -> anyhow::Result<u64>;
}

/// Tick counters of one CPU line of `/proc/stat`.
///
/// Fields that are not reported by the kernel are set to zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuTicks {
    pub user: u64,
    pub nice: u64,
    pub system: u64,
    pub idle: u64,
    pub iowait: u64,
    pub irq: u64,
    pub softirq: u64,
    pub steal: u64,
    pub guest: u64,
    pub guest_nice: u64,
}

/// CPU tick counters, for the whole machine and for each CPU.
#[derive(Debug, Clone)]
pub struct CpuSnapshot {
    pub taken_at: Instant,
    /// The aggregated `cpu` line.
    pub total: CpuTicks,
    /// The `cpuN` lines, by position in `/proc/stat`.
    ///
    /// Offline CPUs have no line, so the position of a CPU is its index only
    /// when all the CPUs before it are online.
    pub per_cpu: BTreeMap<usize, CpuTicks>,
}

/// Received and transmitted bytes of a network interface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ByteCounters {
    pub rx: u64,
    pub tx: u64,
}

/// Byte counters of every network interface.
#[derive(Debug, Clone)]
pub struct NetDevSnapshot {
    pub taken_at: Instant,
    pub interfaces: BTreeMap<String, ByteCounters>,
}

impl NetDevSnapshot {
    /// Sums the counters of all the interfaces.
    pub fn total(&self) -> ByteCounters {
        self.interfaces.values().fold(ByteCounters::default(), |acc, c| ByteCounters {
            rx: acc.rx.wrapping_add(c.rx),
            tx: acc.tx.wrapping_add(c.tx),
        })
    }
}

/// Memory status, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemorySnapshot {
    pub total: u64,
    pub available: u64,
}
