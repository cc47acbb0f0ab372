// Port prober (§4.1)
//
// Pure I/O, no state: given an IP and a port list, returns the subset that
// completed a TCP handshake within the per-port deadline. Probes run
// concurrently; an individual port's failure (refused, unreachable,
// timeout) is swallowed rather than surfaced, and there are no retries.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use futures::future::join_all;
use tokio::net::TcpStream;

/// Management ports probed before deciding whether a device is reachable at
/// all (§4.1).
pub const MANAGEMENT_PORTS: &[u16] = &[22, 23, 80, 161, 443, 8080, 8291, 8443, 8728];

/// Probes `ports` against `ip` concurrently and returns the sorted ascending
/// subset that accepted a connection within `timeout`.
pub async fn probe_ports(ip: IpAddr, ports: &[u16], timeout: Duration) -> Vec<u16> {
    let futures = ports.iter().map(|&port| async move {
        let addr = SocketAddr::new(ip, port);
        let connected = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map(|r| r.is_ok())
            .unwrap_or(false);
        connected.then_some(port)
    });

    let mut open: Vec<u16> = join_all(futures).await.into_iter().flatten().collect();
    open.sort_unstable();
    open
}

/// Convenience wrapper that probes the fixed §4.1 management port set.
pub async fn probe_management_ports(ip: IpAddr, timeout: Duration) -> Vec<u16> {
    probe_ports(ip, MANAGEMENT_PORTS, timeout).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, TcpListener};

    #[tokio::test]
    async fn test_probe_finds_listening_port() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        // Keep the listener alive for the duration of the probe.
        let _keep = listener;

        let ip = IpAddr::V4(Ipv4Addr::LOCALHOST);
        let open = probe_ports(ip, &[port], Duration::from_millis(500)).await;
        assert_eq!(open, vec![port]);
    }

    #[tokio::test]
    async fn test_probe_sorts_and_filters_closed_ports() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let open_port = listener.local_addr().unwrap().port();
        let _keep = listener;

        // Port 1 is privileged and essentially guaranteed closed/refused in
        // this sandbox; used purely as a closed-port stand-in.
        let closed_port = 1u16;

        let ip = IpAddr::V4(Ipv4Addr::LOCALHOST);
        let mut ports = vec![closed_port, open_port];
        ports.sort_unstable();
        let open = probe_ports(ip, &[open_port, closed_port], Duration::from_millis(300)).await;
        assert_eq!(open, vec![open_port]);
    }
}
