// Ruckus Unleashed / SmartZone driver (§4.2, §4.4, §4.5).
//
// Ruckus gear requires an `enable` preamble before privileged `show`
// commands work on some firmware; the shared shell profile marks that
// (`enable_preamble`), and this driver sends it before anything else.
// Unlike the wired-switch drivers, `show current-active-clients all`
// reports each associated client's IP directly alongside its MAC, so
// client rows recurse straight into the orchestrator without a separate
// ARP/DHCP lookup.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::Result;
use crate::model::device::OuiHint;
use crate::net::ssh::{self, SshSession};

use super::{DeviceInfo, DriverContext, Neighbor, VendorDriver};

pub struct RuckusDriver;

static VERSION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)(?:Version|SW:\s*Version)\s*:?\s*(\S+)").unwrap());
static MODEL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)Model\s*:?\s*(\S+)").unwrap());
static HOSTNAME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)(?:Device Name|Name)\s*:?\s*(\S+)").unwrap());
static CLIENT_ROW_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)([0-9a-f]{2}(?::[0-9a-f]{2}){5})\s+(\d{1,3}(?:\.\d{1,3}){3})").unwrap()
});

#[async_trait]
impl VendorDriver for RuckusDriver {
    fn name(&self) -> &'static str {
        "ruckus"
    }

    fn claims(&self, oui_hint: OuiHint, banner: Option<&str>) -> bool {
        super::claims_via_oui_or_banner(oui_hint, banner, OuiHint::Ruckus)
    }

    async fn probe(&self, session: &mut SshSession, ctx: &DriverContext) -> Result<DeviceInfo> {
        let profile = ssh::ruckus_profile();
        let commands = ["enable", "show sysinfo", "show current-active-clients all"];
        let outputs = ssh::shell(session, &profile, &commands, ctx.shell_command_timeout).await?;
        let sysinfo = outputs.get(1).map(String::as_str).unwrap_or_default();
        let clients = outputs.get(2).map(String::as_str).unwrap_or_default();

        let neighbors: Vec<Neighbor> = CLIENT_ROW_RE
            .captures_iter(clients)
            .map(|c| Neighbor {
                mac: Some(crate::model::device::canonical_mac(&c[1])),
                ip: Some(c[2].to_string()),
                via_interface: "wlan0".to_string(),
            })
            .collect();

        Ok(DeviceInfo {
            primary_mac: None,
            hostname: HOSTNAME_RE.captures(sysinfo).map(|c| c[1].to_string()),
            vendor: Some("Ruckus".to_string()),
            model: MODEL_RE.captures(sysinfo).map(|c| c[1].to_string()),
            serial: None,
            firmware_version: VERSION_RE.captures(sysinfo).map(|c| c[1].to_string()),
            device_type_hint: Some("access-point".to_string()),
            interfaces: vec![super::InterfaceInfo {
                name: "wlan0".to_string(),
                link_up: true,
                ..Default::default()
            }],
            neighbors,
            leases: Vec::new(),
            own_upstream_interface: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claims_by_oui() {
        let driver = RuckusDriver;
        assert!(driver.claims(OuiHint::Ruckus, None));
    }

    #[test]
    fn test_claims_by_banner() {
        let driver = RuckusDriver;
        assert!(driver.claims(OuiHint::Unknown, Some("Ruckus Wireless SmartZone")));
    }

    #[test]
    fn test_client_row_captures_mac_and_ip() {
        let clients = "Client MAC        IP Address    Host\naa:bb:cc:dd:ee:01 10.0.0.42     laptop-1\n";
        let caps: Vec<_> = CLIENT_ROW_RE.captures_iter(clients).collect();
        assert_eq!(caps.len(), 1);
        assert_eq!(&caps[0][1].to_lowercase(), "aa:bb:cc:dd:ee:01");
        assert_eq!(&caps[0][2], "10.0.0.42");
    }

    #[test]
    fn test_sysinfo_fields_parse() {
        let sysinfo = "Device Name: ap-lobby-1\nModel: R750\nVersion: 200.14.10.0.195\n";
        assert_eq!(HOSTNAME_RE.captures(sysinfo).unwrap()[1].to_string(), "ap-lobby-1");
        assert_eq!(MODEL_RE.captures(sysinfo).unwrap()[1].to_string(), "R750");
        assert_eq!(VERSION_RE.captures(sysinfo).unwrap()[1].to_string(), "200.14.10.0.195");
    }
}
