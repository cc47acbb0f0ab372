// MikroTik RouterOS CLI driver (§4.2, §4.5).
//
// Falls back from `mikrotik_api` when the API port is closed or the binary
// protocol handshake fails (older RouterOS without API-SSL, or API
// disabled entirely). Talks RouterOS's terse scripting CLI one command per
// exec channel, with `print terse` to get one line per record.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::Result;
use crate::model::device::OuiHint;
use crate::model::interface::Vlan;
use crate::net::ssh::{self, SshSession};

use super::{DeviceInfo, DriverContext, InterfaceInfo, LeaseInfo, Neighbor, VendorDriver};

pub struct MikrotikCliDriver;

static IDENTITY_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"name:\s*"?([^"\n]+)"?"#).unwrap());
static VERSION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"version:\s*([^\s]+)").unwrap());
static BOARD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"board-name:\s*([^\s]+)").unwrap());
static SERIAL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"serial-number:\s*([^\s]+)").unwrap());

#[async_trait]
impl VendorDriver for MikrotikCliDriver {
    fn name(&self) -> &'static str {
        "mikrotik-cli"
    }

    fn claims(&self, oui_hint: OuiHint, banner: Option<&str>) -> bool {
        super::claims_via_oui_or_banner(oui_hint, banner, OuiHint::Mikrotik)
    }

    /// RouterOS accepts one command per exec channel without ever closing
    /// the connection between them (§4.2: MikroTik is exec-mode capable,
    /// unlike Zyxel/3Com which close on any exec channel), so each command
    /// here gets its own channel instead of a scripted PTY session. A
    /// single command failing outright (channel reset, timeout) degrades to
    /// an empty output for that command rather than aborting the whole
    /// probe.
    async fn probe(&self, session: &mut SshSession, ctx: &DriverContext) -> Result<DeviceInfo> {
        let commands = [
            "/system identity print",
            "/system resource print",
            "/system routerboard print",
            "/ip address print terse",
            "/interface print terse",
            "/ip dhcp-server lease print terse",
            "/ip arp print terse",
        ];

        let mut outputs = Vec::with_capacity(commands.len());
        for cmd in commands {
            outputs.push(ssh::exec(session, cmd, ctx.exec_command_timeout).await.unwrap_or_default());
        }
        let [identity, resource, routerboard, addresses, interfaces, leases, arp] =
            outputs.try_into().unwrap_or_else(|v: Vec<String>| {
                let mut padded = v;
                padded.resize(7, String::new());
                padded.try_into().unwrap()
            });

        let hostname = IDENTITY_RE
            .captures(&identity)
            .map(|c| c[1].trim().to_string());
        let firmware_version = VERSION_RE
            .captures(&resource)
            .map(|c| c[1].to_string());
        let model = BOARD_RE
            .captures(&routerboard)
            .map(|c| c[1].to_string());
        let serial = SERIAL_RE
            .captures(&routerboard)
            .map(|c| c[1].to_string());

        Ok(DeviceInfo {
            primary_mac: None,
            hostname,
            vendor: Some("MikroTik".to_string()),
            model,
            serial,
            firmware_version,
            device_type_hint: Some("router".to_string()),
            interfaces: parse_interfaces(&interfaces, &addresses),
            neighbors: parse_arp_neighbors(&arp),
            leases: parse_leases(&leases),
            own_upstream_interface: None,
        })
    }
}

fn parse_interfaces(interfaces_terse: &str, addresses_terse: &str) -> Vec<InterfaceInfo> {
    let addr_by_iface = parse_terse_field_map(addresses_terse, "interface", "address");

    parse_terse_lines(interfaces_terse)
        .into_iter()
        .map(|fields| {
            let name = fields.get("name").cloned().unwrap_or_default();
            let ip = addr_by_iface.get(&name).cloned();
            let link_up = fields
                .get("running")
                .map(|v| v == "true" || v == "yes")
                .unwrap_or(true);
            InterfaceInfo {
                name,
                ip,
                bridge: None,
                vlan: fields.get("vlan-id").and_then(|v| v.parse().ok()).map(Vlan::access_only),
                poe_watts: None,
                poe_standard: None,
                link_up,
                comment: fields.get("comment").cloned(),
            }
        })
        .collect()
}

fn parse_arp_neighbors(arp_terse: &str) -> Vec<Neighbor> {
    parse_terse_lines(arp_terse)
        .into_iter()
        .map(|fields| Neighbor {
            mac: fields.get("mac-address").cloned(),
            ip: fields.get("address").cloned(),
            via_interface: fields.get("interface").cloned().unwrap_or_default(),
        })
        .collect()
}

fn parse_leases(lease_terse: &str) -> Vec<LeaseInfo> {
    parse_terse_lines(lease_terse)
        .into_iter()
        .filter_map(|fields| {
            Some(LeaseInfo {
                mac: fields.get("mac-address")?.clone(),
                ip: fields.get("address")?.clone(),
                hostname: fields.get("host-name").cloned(),
            })
        })
        .collect()
}

/// RouterOS `print terse` emits one record per line as
/// `0 name="ether1" running=true comment="uplink"`. Splits each line into
/// a `key -> value` map, stripping surrounding quotes from values.
fn parse_terse_lines(output: &str) -> Vec<std::collections::HashMap<String, String>> {
    static FIELD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"([\w-]+)=("(?:[^"\\]|\\.)*"|\S+)"#).unwrap());

    output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            FIELD_RE
                .captures_iter(line)
                .map(|c| (c[1].to_string(), c[2].trim_matches('"').to_string()))
                .collect()
        })
        .collect()
}

fn parse_terse_field_map(
    output: &str,
    key_field: &str,
    value_field: &str,
) -> std::collections::HashMap<String, String> {
    parse_terse_lines(output)
        .into_iter()
        .filter_map(|fields| {
            Some((fields.get(key_field)?.clone(), fields.get(value_field)?.clone()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claims_by_oui_hint() {
        let driver = MikrotikCliDriver;
        assert!(driver.claims(OuiHint::Mikrotik, None));
        assert!(!driver.claims(OuiHint::Zyxel, None));
    }

    #[test]
    fn test_claims_by_banner_when_oui_unknown() {
        let driver = MikrotikCliDriver;
        assert!(driver.claims(OuiHint::Unknown, Some("RouterOS 7.12 on hAP ac2")));
    }

    #[test]
    fn test_parse_terse_lines() {
        let out = r#"0 name="ether1" running=true comment="uplink""#;
        let fields = &parse_terse_lines(out)[0];
        assert_eq!(fields.get("name").unwrap(), "ether1");
        assert_eq!(fields.get("running").unwrap(), "true");
        assert_eq!(fields.get("comment").unwrap(), "uplink");
    }

    #[test]
    fn test_parse_arp_neighbors() {
        let out = "0 address=10.0.0.5 mac-address=AA:BB:CC:DD:EE:01 interface=ether1";
        let neighbors = parse_arp_neighbors(out);
        assert_eq!(neighbors.len(), 1);
        assert_eq!(neighbors[0].ip.as_deref(), Some("10.0.0.5"));
        assert_eq!(neighbors[0].via_interface, "ether1");
    }
}
