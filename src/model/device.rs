use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse device classification (§3). Finer distinctions live in the free-form
/// `user_type` override field, which always wins once set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeviceType {
    Router,
    Switch,
    AccessPoint,
    EndDevice,
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeviceType::Router => "router",
            DeviceType::Switch => "switch",
            DeviceType::AccessPoint => "access-point",
            DeviceType::EndDevice => "end-device",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for DeviceType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "router" => Ok(DeviceType::Router),
            "switch" => Ok(DeviceType::Switch),
            "access-point" => Ok(DeviceType::AccessPoint),
            "end-device" => Ok(DeviceType::EndDevice),
            _ => Err(()),
        }
    }
}

/// A discovered network node, identified by its primary MAC address (§3).
/// When no MAC is learnable a synthetic `UNKNOWN-<ip-with-dashes>`
/// identifier is used instead (see `synthetic_mac`).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Device {
    pub primary_mac: String,
    pub network_id: String,
    pub hostname: Option<String>,
    pub ip: String,
    pub vendor: Option<String>,
    pub model: Option<String>,
    pub serial: Option<String>,
    pub firmware_version: Option<String>,
    pub device_type: String,
    pub accessible: bool,
    pub open_ports: sqlx::types::Json<Vec<u16>>,
    pub driver: Option<String>,
    pub parent_interface_id: Option<String>,
    pub upstream_interface: Option<String>,

    // User-managed fields. Never overwritten by a scan (§3 invariant).
    pub comment: Option<String>,
    pub nomad: bool,
    pub skip_login: bool,
    pub user_type: Option<String>,
    pub asset_tag: Option<String>,
    pub location_id: Option<String>,
}

impl Device {
    /// `UNKNOWN-<ip-with-dashes>` fallback identifier for a MAC-less device.
    pub fn synthetic_mac(ip: &str) -> String {
        format!("UNKNOWN-{}", ip.replace('.', "-").replace(':', "-"))
    }

    /// The effective classification: an explicit user override always wins,
    /// otherwise the type the scanner derived.
    pub fn effective_type(&self) -> &str {
        self.user_type.as_deref().unwrap_or(&self.device_type)
    }

    /// Copies the fields a scan must never clobber from `self` (the existing
    /// row) onto `incoming` (the freshly-scanned replacement), enforcing the
    /// user-field preservation invariant (§3, §8 property 2).
    pub fn preserve_user_fields(&self, incoming: &mut Device) {
        incoming.comment = self.comment.clone();
        incoming.nomad = self.nomad;
        incoming.skip_login = self.skip_login;
        incoming.user_type = self.user_type.clone();
        incoming.asset_tag = self.asset_tag.clone();
        incoming.location_id = self.location_id.clone();
    }
}

/// Canonicalizes a MAC address to the uppercase colon-separated form the
/// data model requires (§3).
pub fn canonical_mac(raw: &str) -> String {
    let hex: String = raw.chars().filter(|c| c.is_ascii_hexdigit()).collect();
    hex.to_uppercase()
        .as_bytes()
        .chunks(2)
        .map(|c| std::str::from_utf8(c).unwrap())
        .collect::<Vec<_>>()
        .join(":")
}

/// OUI classification hints used before any SSH session is opened, to
/// decide whether the orchestrator must commit to shell mode (§4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OuiHint {
    Mikrotik,
    Zyxel,
    ThreeCom,
    Ruckus,
    Unknown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthetic_mac() {
        assert_eq!(Device::synthetic_mac("10.0.0.5"), "UNKNOWN-10-0-0-5");
    }

    #[test]
    fn test_canonical_mac() {
        assert_eq!(canonical_mac("aa:bb:cc:dd:ee:ff"), "AA:BB:CC:DD:EE:FF");
        assert_eq!(canonical_mac("AABBCCDDEEFF"), "AA:BB:CC:DD:EE:FF");
        assert_eq!(canonical_mac("aa-bb-cc-dd-ee-ff"), "AA:BB:CC:DD:EE:FF");
    }

    #[test]
    fn test_device_type_roundtrip() {
        for ty in [
            DeviceType::Router,
            DeviceType::Switch,
            DeviceType::AccessPoint,
            DeviceType::EndDevice,
        ] {
            let s = ty.to_string();
            assert_eq!(s.parse::<DeviceType>().unwrap(), ty);
        }
    }

    #[test]
    fn test_user_type_override_wins() {
        let mut d = make_device();
        d.device_type = "switch".to_string();
        d.user_type = Some("core-switch".to_string());
        assert_eq!(d.effective_type(), "core-switch");
    }

    fn make_device() -> Device {
        Device {
            primary_mac: "AA:BB:CC:DD:EE:01".into(),
            network_id: "net-1".into(),
            hostname: None,
            ip: "10.0.0.1".into(),
            vendor: None,
            model: None,
            serial: None,
            firmware_version: None,
            device_type: "router".into(),
            accessible: true,
            open_ports: sqlx::types::Json(vec![22, 80]),
            driver: None,
            parent_interface_id: None,
            upstream_interface: None,
            comment: None,
            nomad: false,
            skip_login: false,
            user_type: None,
            asset_tag: None,
            location_id: None,
        }
    }

    #[test]
    fn test_preserve_user_fields() {
        let mut existing = make_device();
        existing.comment = Some("rack-3".to_string());
        existing.nomad = true;
        existing.asset_tag = Some("AT-42".to_string());

        let mut incoming = make_device();
        incoming.ip = "10.0.0.99".to_string();
        existing.preserve_user_fields(&mut incoming);

        assert_eq!(incoming.ip, "10.0.0.99");
        assert_eq!(incoming.comment.as_deref(), Some("rack-3"));
        assert!(incoming.nomad);
        assert_eq!(incoming.asset_tag.as_deref(), Some("AT-42"));
    }
}
