//! Destinations of the measurements.

use std::net::{IpAddr, SocketAddr};

use anyhow::{Context, anyhow};
use machinestats::measurement::{Measurement, StatKind};
use tokio::{net::UdpSocket, sync::mpsc};

/// Sends the measurements to a statsd server, or only logs them.
pub enum Sink {
    Statsd(StatsdSink),
    Debug,
}

impl Sink {
    pub async fn write(&mut self, m: &Measurement) {
        match self {
            Sink::Statsd(statsd) => {
                if let Err(e) = statsd.send(m).await {
                    log::warn!("Failed to send {} to statsd: {e:#}", m.name);
                }
            }
            Sink::Debug => log::debug!("Logged stat '{}' ({:.2})", m.name, m.value.as_f64()),
        }
    }

    /// Writes every measurement received on `rx`, until the channel is closed.
    pub async fn run(mut self, mut rx: mpsc::Receiver<Measurement>) {
        while let Some(m) = rx.recv().await {
            self.write(&m).await;
        }
        log::debug!("measurement channel closed, sink stopped");
    }
}

/// Statsd client over UDP, one datagram per measurement.
pub struct StatsdSink {
    socket: UdpSocket,
    prefix: String,
}

impl StatsdSink {
    /// Creates a client that sends to `address`, a `host:port` pair where the host is optional.
    pub async fn connect(address: &str, prefix: String) -> anyhow::Result<Self> {
        let target = resolve_statsd_address(address).await?;
        let bind_addr: SocketAddr = if target.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let socket = UdpSocket::bind(bind_addr).await.context("failed to bind udp socket")?;
        socket
            .connect(target)
            .await
            .with_context(|| format!("failed to set up statsd connection to {target}"))?;
        log::info!("Sending stats to statsd at {target} with prefix '{prefix}'");
        Ok(Self { socket, prefix })
    }

    /// Formats a measurement as a statsd line.
    pub fn encode(&self, m: &Measurement) -> String {
        let kind = match m.kind {
            StatKind::Gauge => "g",
            StatKind::Counter => "c",
        };
        if self.prefix.is_empty() {
            format!("{}:{}|{kind}", m.name, m.value)
        } else {
            format!("{}.{}:{}|{kind}", self.prefix, m.name, m.value)
        }
    }

    pub async fn send(&self, m: &Measurement) -> anyhow::Result<()> {
        let line = self.encode(m);
        self.socket.send(line.as_bytes()).await?;
        log::debug!("Logged {line}");
        Ok(())
    }
}

async fn resolve_statsd_address(address: &str) -> anyhow::Result<SocketAddr> {
    let address = match address.strip_prefix(':') {
        Some(port) => format!("127.0.0.1:{port}"),
        None => address.to_owned(),
    };
    tokio::net::lookup_host(&address)
        .await
        .with_context(|| format!("invalid statsd address {address}"))?
        .next()
        .ok_or_else(|| anyhow!("statsd address {address} did not resolve to anything"))
}

/// Builds the prefix of the metric names: the configured prefix, then the IP address
/// with its dots replaced by dashes, separated by a dot.
pub fn compose_prefix(prefix: &str, ip: Option<IpAddr>) -> String {
    let mut parts = Vec::with_capacity(2);
    if !prefix.is_empty() {
        parts.push(prefix.to_owned());
    }
    if let Some(ip) = ip {
        parts.push(ip.to_string().replace(['.', ':'], "-"));
    }
    parts.join(".")
}

/// Returns the IP address of the interface that is used to reach the Internet.
///
/// No packet is sent: connecting a UDP socket only selects a route.
pub async fn outbound_ip() -> anyhow::Result<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket
        .connect("8.8.8.8:80")
        .await
        .context("no route to determine the outbound ip address")?;
    Ok(socket.local_addr()?.ip())
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn prefixes() {
        let ip = Some(IpAddr::V4(Ipv4Addr::new(10, 0, 3, 15)));
        assert_eq!(compose_prefix("", None), "");
        assert_eq!(compose_prefix("media", None), "media");
        assert_eq!(compose_prefix("", ip), "10-0-3-15");
        assert_eq!(compose_prefix("media", ip), "media.10-0-3-15");
    }

    #[tokio::test]
    async fn statsd_lines() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = server.local_addr().unwrap().port();

        let sink = StatsdSink::connect(&format!(":{port}"), String::from("media.10-0-3-15"))
            .await
            .unwrap();
        assert_eq!(
            sink.encode(&Measurement::gauge("cpu-load.total", 0.25)),
            "media.10-0-3-15.cpu-load.total:0.25|g"
        );
        assert_eq!(sink.encode(&Measurement::counter("requests", 3u64)), "media.10-0-3-15.requests:3|c");

        sink.send(&Measurement::gauge("coturn.numSessions", 42u64)).await.unwrap();
        let mut buf = [0u8; 512];
        let (n, _) = server.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"media.10-0-3-15.coturn.numSessions:42|g");
    }

    #[tokio::test]
    async fn statsd_without_prefix() {
        let sink = StatsdSink::connect("127.0.0.1:8125", String::new()).await.unwrap();
        assert_eq!(sink.encode(&Measurement::gauge("memory-load", 56.5)), "memory-load:56.5|g");
    }

    #[tokio::test]
    async fn sink_drains_channel() {
        let (tx, rx) = mpsc::channel(8);
        tx.send(Measurement::gauge("connections", 3u64)).await.unwrap();
        drop(tx);
        // returns once the channel is closed
        Sink::Debug.run(rx).await;
    }
}
