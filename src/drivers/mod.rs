//! Vendor driver abstraction (§4.2, §4.4, §4.5).
//!
//! A `VendorDriver` knows how to turn an established SSH session into
//! structured `DeviceInfo`: identity, interfaces, and discovered neighbors.
//! Which driver applies is decided before any shell command runs, from the
//! OUI of the primary MAC and (if ambiguous) the SSH banner text (§4.5).

pub mod mikrotik_api;
pub mod mikrotik_cli;
pub mod ruckus;
pub mod threecom;
pub mod zyxel;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::Result;
use crate::model::device::OuiHint;
use crate::model::interface::Vlan;
use crate::net::ssh::SshSession;

/// A port discovered on the probed device, prior to being persisted as an
/// `Interface` row.
#[derive(Debug, Clone, Default)]
pub struct InterfaceInfo {
    pub name: String,
    pub ip: Option<String>,
    pub bridge: Option<String>,
    pub vlan: Option<Vlan>,
    pub poe_watts: Option<f64>,
    pub poe_standard: Option<String>,
    pub link_up: bool,
    pub comment: Option<String>,
}

/// A neighboring device observed from this device's perspective — a MAC
/// table entry, an LLDP/CDP-equivalent adjacency, or a DHCP lease peer
/// (§4.4). The orchestrator recurses into each neighbor's `ip`.
#[derive(Debug, Clone)]
pub struct Neighbor {
    pub mac: Option<String>,
    pub ip: Option<String>,
    pub via_interface: String,
}

/// A DHCP lease observed on a router-class device (§3, §4.4).
#[derive(Debug, Clone)]
pub struct LeaseInfo {
    pub mac: String,
    pub ip: String,
    pub hostname: Option<String>,
}

/// Everything a driver can learn about a single device in one probe pass.
#[derive(Debug, Clone, Default)]
pub struct DeviceInfo {
    pub primary_mac: Option<String>,
    pub hostname: Option<String>,
    pub vendor: Option<String>,
    pub model: Option<String>,
    pub serial: Option<String>,
    pub firmware_version: Option<String>,
    pub device_type_hint: Option<String>,
    pub interfaces: Vec<InterfaceInfo>,
    pub neighbors: Vec<Neighbor>,
    pub leases: Vec<LeaseInfo>,
    /// The device's own upstream-facing interface name, when the driver can
    /// derive it directly (e.g. MikroTik's default-route-gateway-to-bridge-port
    /// chase, §4.4). First priority in the orchestrator's upstream-interface
    /// resolution order (§4.5).
    pub own_upstream_interface: Option<String>,
}

/// Context handed to every driver: the timeouts and any config a probe
/// needs, kept separate from `SshSession` so drivers stay testable against
/// a fake session-less harness where needed. `ip`/`api_port` exist for the
/// MikroTik API driver, which talks its own binary protocol on a separate
/// socket rather than over the SSH session (§4.2).
#[derive(Debug, Clone)]
pub struct DriverContext {
    pub ip: String,
    pub api_port: u16,
    pub shell_command_timeout: std::time::Duration,
    pub exec_command_timeout: std::time::Duration,
    pub connect_timeout: std::time::Duration,
    /// SNMP v2c community string, consulted by the 3Com driver for its
    /// interface table and MAC forwarding database (§4.4).
    pub snmp_community: String,
    /// The credential that won SSH auth for this device, reused by
    /// `mikrotik-api` for its own `/login` sentence (§4.2, §4.4) since the
    /// binary API keeps its own session state separate from the SSH one.
    pub username: String,
    pub password: String,
}

/// Implemented once per vendor family (§4.2, §4.5). `probe` owns the shell
/// or exec session for the duration of the call and returns whatever it
/// could determine; partial failures (one command failing) should degrade
/// gracefully to a partially-filled `DeviceInfo` rather than erroring.
#[async_trait]
pub trait VendorDriver: Send + Sync {
    /// Stable identifier stored in `Device::driver` (e.g. `"mikrotik-cli"`).
    fn name(&self) -> &'static str;

    /// Whether this driver claims devices presenting this OUI hint and/or
    /// banner text. Called before a shell session is opened, so the
    /// orchestrator can pick the command sequence upfront.
    fn claims(&self, oui_hint: OuiHint, banner: Option<&str>) -> bool;

    async fn probe(&self, session: &mut SshSession, ctx: &DriverContext) -> Result<DeviceInfo>;
}

/// Resolves the first claiming driver for a given OUI hint and banner
/// (§4.5). Order matters: more specific drivers are registered first.
pub struct DriverRegistry {
    drivers: Vec<Box<dyn VendorDriver>>,
}

impl DriverRegistry {
    pub fn with_defaults() -> Self {
        Self {
            drivers: vec![
                Box::new(mikrotik_api::MikrotikApiDriver),
                Box::new(mikrotik_cli::MikrotikCliDriver),
                Box::new(zyxel::ZyxelDriver),
                Box::new(threecom::ThreeComDriver),
                Box::new(ruckus::RuckusDriver),
            ],
        }
    }

    pub fn resolve(&self, oui_hint: OuiHint, banner: Option<&str>) -> Option<&dyn VendorDriver> {
        self.drivers
            .iter()
            .find(|d| d.claims(oui_hint, banner))
            .map(|d| d.as_ref())
    }

    /// Every claiming driver, in registration order, so the orchestrator can
    /// fall through to the next one when an earlier driver's `probe` itself
    /// fails outright (e.g. `mikrotik-api`'s TCP 8728 handshake not landing,
    /// falling through to `mikrotik-cli`'s SSH-shell probe, §4.4).
    pub fn resolve_candidates(&self, oui_hint: OuiHint, banner: Option<&str>) -> Vec<&dyn VendorDriver> {
        self.drivers
            .iter()
            .filter(|d| d.claims(oui_hint, banner))
            .map(|d| d.as_ref())
            .collect()
    }
}

/// Maps an OUI-derived vendor hint onto the set of SSH banner substrings
/// that corroborate it, used when the OUI alone is ambiguous (§4.5).
pub fn banner_hints() -> HashMap<OuiHint, &'static [&'static str]> {
    let mut map = HashMap::new();
    map.insert(OuiHint::Mikrotik, &["mikrotik", "routeros"][..]);
    map.insert(OuiHint::Zyxel, &["zyxel"][..]);
    map.insert(OuiHint::ThreeCom, &["3com", "h3c", "comware"][..]);
    map.insert(OuiHint::Ruckus, &["ruckus", "commscope"][..]);
    map
}

/// Shared `claims()` body for every vendor driver: matches outright on OUI,
/// otherwise falls back to the substrings `banner_hints` registers for
/// `target` (§4.5 two-stage classifier). Keeping this in one place means
/// a vendor's recognized banner text lives in `banner_hints` alone rather
/// than being duplicated per driver.
pub fn claims_via_oui_or_banner(oui_hint: OuiHint, banner: Option<&str>, target: OuiHint) -> bool {
    if oui_hint == target {
        return true;
    }
    let Some(banner) = banner else {
        return false;
    };
    let lower = banner.to_lowercase();
    banner_hints()
        .get(&target)
        .map(|hints| hints.iter().any(|hint| lower.contains(hint)))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_resolves_mikrotik_by_hint() {
        let registry = DriverRegistry::with_defaults();
        let driver = registry.resolve(OuiHint::Mikrotik, None);
        assert!(driver.is_some());
        assert_eq!(driver.unwrap().name(), "mikrotik-api");
    }

    #[test]
    fn test_registry_resolves_unknown_hint_via_banner() {
        let registry = DriverRegistry::with_defaults();
        let driver = registry.resolve(OuiHint::Unknown, Some("Welcome to ZyXEL device"));
        assert!(driver.is_some());
        assert_eq!(driver.unwrap().name(), "zyxel");
    }

    #[test]
    fn test_registry_returns_none_for_unclaimed_device() {
        let registry = DriverRegistry::with_defaults();
        let driver = registry.resolve(OuiHint::Unknown, None);
        assert!(driver.is_none());
    }
}
