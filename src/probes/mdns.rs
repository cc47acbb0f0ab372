// mDNS sweep (§4.6).
//
// Runs once per scan, independent of the recursive device walk: it listens
// for `ServiceResolved` events across a small set of common service types
// for the scan's fixed budget and hands back (ip -> hostname) pairs the
// topology assembler uses to fill in hostnames SSH/SNMP never learned.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;

use mdns_sd::{ServiceDaemon, ServiceEvent};

use crate::error::{DiscoveryError, Result};

/// Service types worth browsing for general-purpose host/IP resolution on
/// a LAN segment; narrower than a full device-capability sweep since the
/// only thing this scanner wants out of mDNS is a hostname per IP (§4.6).
const SERVICE_TYPES: &[&str] = &[
    "_workstation._tcp.local.",
    "_device-info._tcp.local.",
    "_ssh._tcp.local.",
    "_http._tcp.local.",
    "_airplay._tcp.local.",
];

#[derive(Debug, Clone)]
pub struct MdnsRecord {
    pub ip: IpAddr,
    pub hostname: String,
}

/// Browses `SERVICE_TYPES` for `budget`, returning every resolved
/// (ip, hostname) pair observed. Never errors on "nothing found" — an
/// empty sweep is a normal outcome on networks with mDNS disabled.
pub async fn sweep(budget: Duration) -> Result<Vec<MdnsRecord>> {
    let daemon = ServiceDaemon::new()
        .map_err(|e| DiscoveryError::Transient {
            host: String::new(),
            operation: "mdns-sweep".into(),
            reason: e.to_string(),
        })?;

    let mut receivers = Vec::new();
    for service_type in SERVICE_TYPES {
        if let Ok(receiver) = daemon.browse(service_type) {
            receivers.push(receiver);
        }
    }

    let mut records = Vec::new();
    let deadline = tokio::time::Instant::now() + budget;

    'outer: loop {
        for receiver in &receivers {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                break 'outer;
            }

            match tokio::time::timeout(remaining.min(Duration::from_millis(200)), receiver.recv_async()).await {
                Ok(Ok(ServiceEvent::ServiceResolved(info))) => {
                    let hostname = info.get_hostname().trim_end_matches('.').to_string();
                    for addr in info.get_addresses() {
                        records.push(MdnsRecord { ip: *addr, hostname: hostname.clone() });
                    }
                }
                _ => {}
            }
        }

        if tokio::time::Instant::now() >= deadline {
            break;
        }
    }

    let _ = daemon.shutdown();
    Ok(dedup_records(records))
}

fn dedup_records(records: Vec<MdnsRecord>) -> Vec<MdnsRecord> {
    let mut seen: HashMap<IpAddr, String> = HashMap::new();
    for record in records {
        seen.entry(record.ip).or_insert(record.hostname);
    }
    seen.into_iter().map(|(ip, hostname)| MdnsRecord { ip, hostname }).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_dedup_keeps_first_hostname_per_ip() {
        let ip = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5));
        let records = vec![
            MdnsRecord { ip, hostname: "first".into() },
            MdnsRecord { ip, hostname: "second".into() },
        ];
        let deduped = dedup_records(records);
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].hostname, "first");
    }
}
