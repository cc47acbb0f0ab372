// SNMP v2c probe (§4.7).
//
// A best-effort secondary identity source, tried after SSH rather than
// instead of it: many of the devices in this fleet ship SNMP disabled by
// default, so a failed query here is never treated as a reason to mark a
// device inaccessible.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use crate::error::{DiscoveryError, Result};

const OID_SYS_DESCR: &[u32] = &[1, 3, 6, 1, 2, 1, 1, 1, 0];
const OID_SYS_NAME: &[u32] = &[1, 3, 6, 1, 2, 1, 1, 5, 0];
const OID_SYS_OBJECT_ID: &[u32] = &[1, 3, 6, 1, 2, 1, 1, 2, 0];

/// What a successful SNMP query can tell us about a device, prior to being
/// merged into `DeviceInfo` (§4.7).
#[derive(Debug, Clone, Default)]
pub struct SnmpIdentity {
    pub sys_descr: Option<String>,
    pub sys_name: Option<String>,
    pub sys_object_id: Option<String>,
}

/// Queries `sysDescr`, `sysName`, and `sysObjectID` over SNMP v2c.
/// `snmp2`'s `SyncSession` is blocking, so the call runs on a blocking
/// thread to avoid stalling the async scan loop (§4.7).
pub async fn query_identity(ip: IpAddr, community: &str, timeout: Duration) -> Result<SnmpIdentity> {
    let community = community.to_string();
    tokio::task::spawn_blocking(move || query_identity_blocking(ip, &community, timeout))
        .await
        .map_err(|e| DiscoveryError::Transient {
            host: ip.to_string(),
            operation: "snmp-query".into(),
            reason: e.to_string(),
        })?
}

fn query_identity_blocking(ip: IpAddr, community: &str, timeout: Duration) -> Result<SnmpIdentity> {
    let addr = SocketAddr::new(ip, 161);
    let mut session = snmp2::SyncSession::new(addr, community.as_bytes(), Some(timeout), 0)
        .map_err(|e| snmp_error(ip, &e.to_string()))?;

    let mut identity = SnmpIdentity::default();

    if let Ok(pdu) = session.get(OID_SYS_DESCR) {
        identity.sys_descr = first_string_varbind(&pdu);
    }
    if let Ok(pdu) = session.get(OID_SYS_NAME) {
        identity.sys_name = first_string_varbind(&pdu);
    }
    if let Ok(pdu) = session.get(OID_SYS_OBJECT_ID) {
        identity.sys_object_id = first_oid_varbind(&pdu);
    }

    if identity.sys_descr.is_none() && identity.sys_name.is_none() {
        return Err(snmp_error(ip, "no varbinds returned"));
    }

    Ok(identity)
}

const OID_IF_DESCR: &[u32] = &[1, 3, 6, 1, 2, 1, 2, 2, 1, 2];
const OID_IF_TYPE: &[u32] = &[1, 3, 6, 1, 2, 1, 2, 2, 1, 3];
const OID_IF_OPER_STATUS: &[u32] = &[1, 3, 6, 1, 2, 1, 2, 2, 1, 8];
const OID_DOT1D_TP_FDB_PORT: &[u32] = &[1, 3, 6, 1, 2, 1, 17, 4, 3, 1, 2];
const OID_DOT1D_BASE_PORT_IF_INDEX: &[u32] = &[1, 3, 6, 1, 2, 1, 17, 1, 4, 1, 2];

const IF_TYPE_ETHERNET_CSMACD: i64 = 6;

/// An `ifTable` row kept for ethernet ports (§4.4: "ethernet interfaces are
/// kept (ifType 6)").
#[derive(Debug, Clone)]
pub struct SnmpInterface {
    pub if_index: u32,
    pub name: String,
    pub oper_up: bool,
}

/// One `dot1dTpFdbTable` entry, a learned MAC mapped to the bridge port it
/// was seen on.
#[derive(Debug, Clone)]
pub struct SnmpFdbEntry {
    pub mac: String,
    pub bridge_port: u32,
}

/// Walks `ifTable`, keeping only ethernet (ifType 6) rows, and walks
/// `dot1dTpFdbTable` joined through `dot1dBasePortIfIndex` so each learned
/// MAC carries the matching `ifIndex` rather than the raw bridge-port
/// number (§4.4).
pub async fn walk_interfaces_and_fdb(
    ip: IpAddr,
    community: &str,
    timeout: Duration,
) -> Result<(Vec<SnmpInterface>, Vec<SnmpFdbEntry>)> {
    let community = community.to_string();
    tokio::task::spawn_blocking(move || walk_blocking(ip, &community, timeout))
        .await
        .map_err(|e| DiscoveryError::Transient {
            host: ip.to_string(),
            operation: "snmp-walk".into(),
            reason: e.to_string(),
        })?
}

fn walk_blocking(
    ip: IpAddr,
    community: &str,
    timeout: Duration,
) -> Result<(Vec<SnmpInterface>, Vec<SnmpFdbEntry>)> {
    let addr = SocketAddr::new(ip, 161);
    let mut session = snmp2::SyncSession::new(addr, community.as_bytes(), Some(timeout), 0)
        .map_err(|e| snmp_error(ip, &e.to_string()))?;

    let types = walk_table(&mut session, ip, OID_IF_TYPE)?;
    let descrs = walk_table(&mut session, ip, OID_IF_DESCR)?;
    let statuses = walk_table(&mut session, ip, OID_IF_OPER_STATUS)?;

    let mut interfaces = Vec::new();
    for (suffix, ty) in &types {
        if as_int(ty) != Some(IF_TYPE_ETHERNET_CSMACD) {
            continue;
        }
        let if_index = suffix.first().copied().unwrap_or(0);
        let name = descrs
            .iter()
            .find(|(idx, _)| idx == suffix)
            .and_then(|(_, v)| as_string(v))
            .unwrap_or_else(|| format!("if{if_index}"));
        let oper_up = statuses
            .iter()
            .find(|(idx, _)| idx == suffix)
            .and_then(|(_, v)| as_int(v))
            .map(|v| v == 1)
            .unwrap_or(false);
        interfaces.push(SnmpInterface { if_index, name, oper_up });
    }

    // dot1dBasePortIfIndex is indexed by bridge port number; its value is
    // the matching ifIndex.
    let base_port_if_index = walk_table(&mut session, ip, OID_DOT1D_BASE_PORT_IF_INDEX)?;
    // dot1dTpFdbTable is indexed by the 6-byte learned MAC itself, so the
    // OID suffix *is* the MAC address.
    let fdb_ports = walk_table(&mut session, ip, OID_DOT1D_TP_FDB_PORT)?;

    let mut fdb = Vec::new();
    for (mac_suffix, port_value) in fdb_ports {
        let Some(bridge_port) = as_int(&port_value) else { continue };
        let if_index = base_port_if_index
            .iter()
            .find(|(idx, _)| idx.first().copied().map(|p| p as i64) == Some(bridge_port))
            .and_then(|(_, v)| as_int(v))
            .unwrap_or(bridge_port);
        let Some(mac) = mac_from_suffix(&mac_suffix) else { continue };
        fdb.push(SnmpFdbEntry { mac, bridge_port: if_index as u32 });
    }

    Ok((interfaces, fdb))
}

/// A decoded SNMP scalar value, owned so it can outlive the PDU that
/// produced it (`snmp2::Value` borrows from the response buffer).
#[derive(Debug, Clone)]
enum Scalar {
    Int(i64),
    Bytes(Vec<u8>),
    Other,
}

fn as_int(v: &Scalar) -> Option<i64> {
    match v {
        Scalar::Int(i) => Some(*i),
        _ => None,
    }
}

fn as_string(v: &Scalar) -> Option<String> {
    match v {
        Scalar::Bytes(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
        _ => None,
    }
}

/// Walks one column via repeated `GETNEXT`, returning each row keyed by the
/// OID sub-identifiers past `base_oid` — the table index, which for
/// `dot1dTpFdbTable` is the 6-byte MAC itself.
fn walk_table(session: &mut snmp2::SyncSession, ip: IpAddr, base_oid: &[u32]) -> Result<Vec<(Vec<u32>, Scalar)>> {
    let mut rows = Vec::new();
    let mut next = base_oid.to_vec();

    loop {
        let pdu = session.getnext(&next).map_err(|e| snmp_error(ip, &e.to_string()))?;
        let Some((oid, value)) = pdu.varbinds.clone().next() else { break };
        let oid_vec: Vec<u32> = oid.into();
        if !oid_vec.starts_with(base_oid) || oid_vec.len() <= base_oid.len() {
            break;
        }
        let suffix = oid_vec[base_oid.len()..].to_vec();
        let scalar = match value {
            snmp2::Value::Integer(i) => Scalar::Int(i),
            snmp2::Value::OctetString(bytes) => Scalar::Bytes(bytes.to_vec()),
            _ => Scalar::Other,
        };
        rows.push((suffix, scalar));
        next = oid_vec;
        if rows.len() > 4096 {
            break;
        }
    }

    Ok(rows)
}

/// `dot1dTpFdbTable`'s index is 6 OID sub-identifiers, one per MAC octet.
fn mac_from_suffix(suffix: &[u32]) -> Option<String> {
    if suffix.len() != 6 {
        return None;
    }
    Some(
        suffix
            .iter()
            .map(|b| format!("{:02X}", b & 0xFF))
            .collect::<Vec<_>>()
            .join(":"),
    )
}

fn first_string_varbind(pdu: &snmp2::SnmpPdu) -> Option<String> {
    pdu.varbinds.clone().next().and_then(|(_, value)| match value {
        snmp2::Value::OctetString(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
        _ => None,
    })
}

fn first_oid_varbind(pdu: &snmp2::SnmpPdu) -> Option<String> {
    pdu.varbinds.clone().next().and_then(|(_, value)| match value {
        snmp2::Value::ObjectIdentifier(oid) => Some(oid.to_string()),
        _ => None,
    })
}

fn snmp_error(ip: IpAddr, reason: &str) -> DiscoveryError {
    DiscoveryError::Transient {
        host: ip.to_string(),
        operation: "snmp-query".into(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snmp_identity_default_is_empty() {
        let identity = SnmpIdentity::default();
        assert!(identity.sys_descr.is_none());
        assert!(identity.sys_name.is_none());
    }

    #[test]
    fn test_mac_from_suffix_requires_six_octets() {
        assert_eq!(mac_from_suffix(&[1, 2, 3]), None);
        assert_eq!(mac_from_suffix(&[0, 17, 34, 51, 68, 85]), Some("00:11:22:33:44:55".to_string()));
    }
}
