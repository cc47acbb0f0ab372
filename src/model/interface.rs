use serde::{Deserialize, Serialize};

/// A port on a device (§3). Owned by exactly one device; destroyed and
/// recreated wholesale on every scan.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Interface {
    pub id: String,
    pub device_mac: String,
    pub network_id: String,
    pub name: String,
    pub ip: Option<String>,
    pub bridge: Option<String>,
    pub vlan: Option<String>,
    pub poe_watts: Option<f64>,
    pub poe_standard: Option<String>,
    pub link_up: bool,
    pub comment: Option<String>,
}

/// A per-port VLAN descriptor: an optional untagged (access/PVID) VLAN plus
/// zero or more tagged VLANs on a trunk. Serializes to the wire format used
/// by every driver: `"1000"` (access only), `"T:1000,1010"` (tagged-only
/// trunk), or `"100+T:200,300"` (hybrid, PVID + tagged).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vlan {
    pub access: Option<u16>,
    pub tagged: Vec<u16>,
}

impl Vlan {
    pub fn access_only(vlan: u16) -> Self {
        Self {
            access: Some(vlan),
            tagged: Vec::new(),
        }
    }

    pub fn trunk(tagged: Vec<u16>) -> Self {
        Self {
            access: None,
            tagged,
        }
    }

    pub fn hybrid(pvid: u16, tagged: Vec<u16>) -> Self {
        Self {
            access: Some(pvid),
            tagged,
        }
    }

    /// Serializes to the canonical wire string, or `None` if the interface
    /// carries no VLAN information at all.
    pub fn to_wire_string(&self) -> Option<String> {
        match (self.access, self.tagged.is_empty()) {
            (None, true) => None,
            (Some(pvid), true) => Some(pvid.to_string()),
            (None, false) => Some(format!("T:{}", join_vlans(&self.tagged))),
            (Some(pvid), false) => Some(format!("{}+T:{}", pvid, join_vlans(&self.tagged))),
        }
    }

    /// Parses the canonical wire string back into a `Vlan`. Unknown/garbled
    /// input parses to an empty `Vlan` rather than erroring — VLAN strings
    /// are cosmetic enrichment, never load-bearing for topology.
    pub fn parse_wire_string(s: &str) -> Self {
        let s = s.trim();
        if s.is_empty() {
            return Vlan::default();
        }

        if let Some(tagged_part) = s.strip_prefix("T:") {
            return Vlan::trunk(parse_vlan_list(tagged_part));
        }

        if let Some((pvid_part, rest)) = s.split_once("+T:") {
            let pvid = pvid_part.trim().parse().ok();
            return Vlan {
                access: pvid,
                tagged: parse_vlan_list(rest),
            };
        }

        match s.parse() {
            Ok(pvid) => Vlan::access_only(pvid),
            Err(_) => Vlan::default(),
        }
    }
}

fn join_vlans(vlans: &[u16]) -> String {
    vlans
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

fn parse_vlan_list(s: &str) -> Vec<u16> {
    s.split(',')
        .filter_map(|part| part.trim().parse().ok())
        .collect()
}

/// A (MAC, IP, hostname) triple observed on a router's DHCP lease table
/// (§3). Network-scoped, re-created per scan.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DhcpLease {
    pub network_id: String,
    pub mac: String,
    pub ip: String,
    pub hostname: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_only_roundtrip() {
        let v = Vlan::access_only(1000);
        let s = v.to_wire_string().unwrap();
        assert_eq!(s, "1000");
        assert_eq!(Vlan::parse_wire_string(&s), v);
    }

    #[test]
    fn test_trunk_roundtrip() {
        let v = Vlan::trunk(vec![1000, 1010]);
        let s = v.to_wire_string().unwrap();
        assert_eq!(s, "T:1000,1010");
        assert_eq!(Vlan::parse_wire_string(&s), v);
    }

    #[test]
    fn test_hybrid_roundtrip() {
        let v = Vlan::hybrid(100, vec![200, 300]);
        let s = v.to_wire_string().unwrap();
        assert_eq!(s, "100+T:200,300");
        assert_eq!(Vlan::parse_wire_string(&s), v);
    }

    #[test]
    fn test_empty_vlan_has_no_wire_string() {
        assert_eq!(Vlan::default().to_wire_string(), None);
    }

    proptest::proptest! {
        #[test]
        fn prop_vlan_roundtrip(
            access in proptest::option::of(1u16..4094),
            tagged in proptest::collection::vec(1u16..4094, 0..8),
        ) {
            let v = Vlan { access, tagged };
            if let Some(s) = v.to_wire_string() {
                let parsed = Vlan::parse_wire_string(&s);
                proptest::prop_assert_eq!(parsed, v);
            }
        }
    }
}
