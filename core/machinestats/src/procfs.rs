//! Counter provider that reads the Linux procfs.

use std::{
    fs::File,
    io::{self, BufRead, BufReader},
    path::PathBuf,
    time::Instant,
};

use anyhow::{Context, anyhow};
use procfs::{
    CpuTime, ExplicitSystemInfo, FromBufRead, FromBufReadSI, KernelStats, LocalSystemInfo, SystemInfoInterface,
    net::InterfaceDeviceStatus,
};

use crate::snapshot::{ByteCounters, CounterProvider, CpuSnapshot, CpuTicks, MemorySnapshot, NetDevSnapshot};

/// Reads counters from a procfs mount, `/proc` by default.
///
/// The root can be changed to read the procfs of the host from a container,
/// or to read fixtures in tests.
#[derive(Debug, Clone)]
pub struct ProcfsProvider {
    root: PathBuf,
    sysinfo: ExplicitSystemInfo,
}

/// Socket tables that [`ProcfsProvider::socket_count`] reads, and whether they must exist.
/// The IPv6 tables are missing when IPv6 is disabled.
const SOCKET_TABLES: [(&str, bool); 4] = [("tcp", true), ("tcp6", false), ("udp", true), ("udp6", false)];

impl Default for ProcfsProvider {
    fn default() -> Self {
        Self::new("/proc")
    }
}

impl ProcfsProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            sysinfo: gather_system_info(),
        }
    }

    fn open(&self, relative: &str) -> anyhow::Result<BufReader<File>> {
        let path = self.root.join(relative);
        let file = File::open(&path).with_context(|| format!("could not open {}", path.display()))?;
        Ok(BufReader::new(file))
    }
}

impl CounterProvider for ProcfsProvider {
    fn cpu_ticks(&self) -> anyhow::Result<CpuSnapshot> {
        let reader = self.open("stat")?;
        let taken_at = Instant::now();
        let stats = KernelStats::from_buf_read(reader, &self.sysinfo).context("error parsing stat")?;
        Ok(CpuSnapshot {
            taken_at,
            total: cpu_ticks(&stats.total),
            per_cpu: stats.cpu_time.iter().map(cpu_ticks).enumerate().collect(),
        })
    }

    fn net_dev(&self) -> anyhow::Result<NetDevSnapshot> {
        let reader = self.open("net/dev")?;
        let taken_at = Instant::now();
        let status = InterfaceDeviceStatus::from_buf_read(reader).context("error parsing net/dev")?;
        let interfaces = status
            .0
            .into_iter()
            .map(|(name, dev)| {
                let counters = ByteCounters {
                    rx: dev.recv_bytes,
                    tx: dev.sent_bytes,
                };
                (name, counters)
            })
            .collect();
        Ok(NetDevSnapshot { taken_at, interfaces })
    }

    fn memory(&self) -> anyhow::Result<MemorySnapshot> {
        let reader = self.open("meminfo")?;
        let mut total = None;
        let mut available = None;
        for line in reader.lines() {
            let line = line.context("could not read line from meminfo")?;
            if line.is_empty() {
                continue;
            }
            let (key, value) = parse_meminfo_line(&line).with_context(|| format!("invalid line in meminfo: {line}"))?;
            match key {
                "MemTotal" => total = Some(value),
                "MemAvailable" => available = Some(value),
                _ => (),
            }
            if total.is_some() && available.is_some() {
                break;
            }
        }
        Ok(MemorySnapshot {
            total: total.ok_or_else(|| anyhow!("MemTotal not found in meminfo"))?,
            available: available.ok_or_else(|| anyhow!("MemAvailable not found in meminfo"))?,
        })
    }

    fn socket_count(&self) -> anyhow::Result<u64> {
        let mut count = 0;
        for (table, required) in SOCKET_TABLES {
            let relative = format!("net/{table}");
            let path = self.root.join(&relative);
            let reader = match File::open(&path) {
                Ok(file) => BufReader::new(file),
                Err(e) if e.kind() == io::ErrorKind::NotFound && !required => {
                    log::debug!("{} does not exist, counting 0 sockets", path.display());
                    continue;
                }
                Err(e) => return Err(e).with_context(|| format!("could not open {}", path.display())),
            };
            count += count_table_entries(reader).with_context(|| format!("could not read {}", path.display()))?;
        }
        Ok(count)
    }
}

/// Converts the times of a cpu line. Fields that the kernel does not report are set to zero.
fn cpu_ticks(time: &CpuTime) -> CpuTicks {
    CpuTicks {
        user: time.user,
        nice: time.nice,
        system: time.system,
        idle: time.idle,
        iowait: time.iowait.unwrap_or(0),
        irq: time.irq.unwrap_or(0),
        softirq: time.softirq.unwrap_or(0),
        steal: time.steal.unwrap_or(0),
        guest: time.guest.unwrap_or(0),
        guest_nice: time.guest_nice.unwrap_or(0),
    }
}

/// System information needed to parse `stat`.
///
/// The boot time is left at zero: the cpu times do not use it.
fn gather_system_info() -> ExplicitSystemInfo {
    let local = LocalSystemInfo;
    ExplicitSystemInfo {
        boot_time_secs: 0,
        ticks_per_second: local.ticks_per_second(),
        page_size: local.page_size(),
        is_little_endian: local.is_little_endian(),
    }
}

fn parse_meminfo_line(line: &str) -> Option<(&str, u64)> {
    let mut s = line.split_ascii_whitespace();
    let key = s.next()?;
    let value = s.next()?;
    let unit = s.next(); // no unit means that the unit is Byte

    let key = key.strip_suffix(':')?;
    let value: u64 = value.parse().ok()?;
    let value = match unit {
        Some(unit) => convert_meminfo_to_bytes(value, unit)?,
        None => value,
    };
    Some((key, value))
}

fn convert_meminfo_to_bytes(value: u64, unit: &str) -> Option<u64> {
    // For meminfo, "kB" actually means "kiB".
    match unit {
        "B" => Some(value),
        "kB" | "KiB" | "kiB" | "KB" => Some(value * 1024),
        "mB" | "MiB" | "miB" | "MB" => Some(value * 1024 * 1024),
        "gB" | "GiB" | "giB" | "GB" => Some(value * 1024 * 1024 * 1024),
        _ => None,
    }
}

/// Counts the entries of a socket table, which starts with a header line.
fn count_table_entries(reader: impl BufRead) -> io::Result<u64> {
    let mut count = 0;
    for line in reader.lines().skip(1) {
        if !line?.trim().is_empty() {
            count += 1;
        }
    }
    Ok(count)
}
