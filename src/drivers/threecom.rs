// 3Com / H3C Comware driver (§4.2, §4.4, §4.5).
//
// Identity comes from the CLI's `summary` screen; everything else —
// interfaces and the MAC forwarding table — comes from SNMP v2c, not shell
// parsing. Comware's CLI MAC table paginates unpredictably across firmware
// revisions, while ifTable/dot1dTpFdbTable are stable back to the
// earliest switches in this fleet.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::Result;
use crate::model::device::OuiHint;
use crate::net::ssh::{self, SshSession};
use crate::probes::snmp;

use super::{DeviceInfo, DriverContext, InterfaceInfo, Neighbor, VendorDriver};

pub struct ThreeComDriver;

static SYSNAME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^\s*sysname\s+(\S+)").unwrap());
static VERSION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)Comware Software, Version\s+(\S+)").unwrap());
static MODEL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)(?:H3C|3Com)\s+(\S+)\s+Switch").unwrap());

#[async_trait]
impl VendorDriver for ThreeComDriver {
    fn name(&self) -> &'static str {
        "threecom"
    }

    fn claims(&self, oui_hint: OuiHint, banner: Option<&str>) -> bool {
        super::claims_via_oui_or_banner(oui_hint, banner, OuiHint::ThreeCom)
    }

    async fn probe(&self, session: &mut SshSession, ctx: &DriverContext) -> Result<DeviceInfo> {
        let profile = ssh::zyxel_threecom_profile();
        // `summary` (user view) prints hostname, model, version, and
        // hardware revision in one screen, so no separate `display version`
        // round-trip is needed (§4.4).
        let commands = ["summary"];
        let outputs = ssh::shell(session, &profile, &commands, ctx.shell_command_timeout).await?;
        let summary = outputs.first().map(String::as_str).unwrap_or_default();
        let version = summary;
        let config = summary;

        let ip = ctx.ip.parse().ok();
        let (interfaces, neighbors) = match ip {
            Some(addr) => match snmp::walk_interfaces_and_fdb(addr, &ctx.snmp_community, ctx.connect_timeout).await {
                Ok((snmp_ifaces, fdb)) => {
                    let interfaces = snmp_ifaces
                        .iter()
                        .map(|i| InterfaceInfo {
                            name: i.name.clone(),
                            link_up: i.oper_up,
                            ..Default::default()
                        })
                        .collect();
                    let neighbors = fdb
                        .into_iter()
                        .map(|entry| {
                            let via_interface = snmp_ifaces
                                .iter()
                                .find(|i| i.if_index == entry.bridge_port)
                                .map(|i| i.name.clone())
                                .unwrap_or_else(|| format!("if{}", entry.bridge_port));
                            Neighbor { mac: Some(entry.mac), ip: None, via_interface }
                        })
                        .collect();
                    (interfaces, neighbors)
                }
                Err(_) => (Vec::new(), Vec::new()),
            },
            None => (Vec::new(), Vec::new()),
        };

        Ok(DeviceInfo {
            primary_mac: None,
            hostname: SYSNAME_RE.captures(config).map(|c| c[1].to_string()),
            vendor: Some("3Com".to_string()),
            model: MODEL_RE.captures(version).map(|c| c[1].to_string()),
            serial: None,
            firmware_version: VERSION_RE.captures(version).map(|c| c[1].to_string()),
            device_type_hint: Some("switch".to_string()),
            interfaces,
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
    fn test_claims_by_comware_banner() {
        let driver = ThreeComDriver;
        assert!(driver.claims(OuiHint::Unknown, Some("H3C Comware Platform Software")));
    }

    #[test]
    fn test_sysname_and_version_parse() {
        let config = "sysname core-sw-2\n";
        let version = "H3C Comware Software, Version 7.1.070\nH3C S5560 Switch";
        assert_eq!(SYSNAME_RE.captures(config).unwrap()[1].to_string(), "core-sw-2");
        assert_eq!(VERSION_RE.captures(version).unwrap()[1].to_string(), "7.1.070");
        assert_eq!(MODEL_RE.captures(version).unwrap()[1].to_string(), "S5560");
    }
}
