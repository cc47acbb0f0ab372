//! Topology assembler (§4.7).
//!
//! Turns the flat `devices`/`interfaces` store into a forest rooted at
//! devices with no `parent_interface_id`. Pure function of the database
//! state: no writes, nothing persisted, safe to cache per network.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::device::Device;
use crate::model::interface::{DhcpLease, Interface};
use crate::persistence::Store;

/// One node in the assembled tree: the device, its own interfaces, and its
/// children. Synthetic nodes (the "unknown switch" inference, §4.5 step 4
/// last bullet) reuse this shape with `device: None`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopologyNode {
    pub device: Option<Device>,
    pub synthetic_label: Option<String>,
    pub via_interface: Option<String>,
    pub interfaces: Vec<Interface>,
    pub children: Vec<TopologyNode>,
}

/// Builds the full forest for `network_id` (§4.7): resolves missing
/// hostnames from DHCP leases, links devices to their parent via
/// `parent_interface_id`, and inserts synthetic "unknown switch" nodes
/// wherever ≥2 inaccessible, wired children share a parent interface
/// (§4.5 step 4, §8 scenario 3).
pub async fn build_forest(store: &Store, network_id: &str) -> Result<Vec<TopologyNode>> {
    let mut devices = store.list_devices(network_id).await?;
    let interfaces = store.list_all_interfaces(network_id).await?;
    let leases = store.list_dhcp_leases(network_id).await?;

    resolve_hostnames(&mut devices, &leases);

    let interfaces_by_device: HashMap<String, Vec<Interface>> =
        interfaces.iter().fold(HashMap::new(), |mut map, iface| {
            map.entry(iface.device_mac.clone()).or_default().push(iface.clone());
            map
        });

    // interface id -> owning device MAC, to resolve parent_interface_id.
    let owner_of_interface: HashMap<String, String> = interfaces
        .iter()
        .map(|iface| (iface.id.clone(), iface.device_mac.clone()))
        .collect();
    // interface id -> interface name, for synthetic-node labeling and the
    // child's via_interface.
    let interface_names: HashMap<String, String> =
        interfaces.iter().map(|iface| (iface.id.clone(), iface.name.clone())).collect();

    // parent device MAC -> (interface name -> child device MACs)
    let mut children_by_parent_iface: HashMap<String, HashMap<String, Vec<String>>> = HashMap::new();
    let mut roots = Vec::new();

    for device in &devices {
        match &device.parent_interface_id {
            Some(iface_id) => {
                let Some(parent_mac) = owner_of_interface.get(iface_id) else {
                    // Dangling parent pointer (interface row missing): treat
                    // as a root rather than dropping the device.
                    roots.push(device.primary_mac.clone());
                    continue;
                };
                let iface_name = interface_names.get(iface_id).cloned().unwrap_or_default();
                children_by_parent_iface
                    .entry(parent_mac.clone())
                    .or_default()
                    .entry(iface_name)
                    .or_default()
                    .push(device.primary_mac.clone());
            }
            None => roots.push(device.primary_mac.clone()),
        }
    }

    let devices_by_mac: HashMap<String, Device> =
        devices.into_iter().map(|d| (d.primary_mac.clone(), d)).collect();

    let mut visiting = std::collections::HashSet::new();
    let mut forest = Vec::new();
    for root_mac in roots {
        if let Some(node) = build_node(
            &root_mac,
            None,
            &devices_by_mac,
            &interfaces_by_device,
            &children_by_parent_iface,
            &mut visiting,
        ) {
            forest.push(node);
        }
    }

    Ok(forest)
}

/// Recursively assembles one device and its children. `visiting` guards
/// against cycles (§9 design note: structurally impossible in practice
/// since each MAC is visited once per scan, but the assembler bails
/// defensively rather than trusting that invariant blindly, §8 property 3).
fn build_node(
    mac: &str,
    via_interface: Option<String>,
    devices_by_mac: &HashMap<String, Device>,
    interfaces_by_device: &HashMap<String, Vec<Interface>>,
    children_by_parent_iface: &HashMap<String, HashMap<String, Vec<String>>>,
    visiting: &mut std::collections::HashSet<String>,
) -> Option<TopologyNode> {
    if !visiting.insert(mac.to_string()) {
        return None;
    }

    let device = devices_by_mac.get(mac)?.clone();
    let own_interfaces = interfaces_by_device.get(mac).cloned().unwrap_or_default();

    let mut children = Vec::new();
    if let Some(by_iface) = children_by_parent_iface.get(mac) {
        let mut iface_names: Vec<&String> = by_iface.keys().collect();
        iface_names.sort();

        for iface_name in iface_names {
            let child_macs = &by_iface[iface_name];
            let child_nodes: Vec<TopologyNode> = child_macs
                .iter()
                .filter_map(|child_mac| {
                    build_node(
                        child_mac,
                        Some(iface_name.clone()),
                        devices_by_mac,
                        interfaces_by_device,
                        children_by_parent_iface,
                        visiting,
                    )
                })
                .collect();

            if should_infer_unknown_switch(iface_name, &child_nodes) {
                children.push(TopologyNode {
                    device: None,
                    synthetic_label: Some(format!("unknown switch ({iface_name})")),
                    via_interface: Some(iface_name.clone()),
                    interfaces: Vec::new(),
                    children: child_nodes,
                });
            } else {
                children.extend(child_nodes);
            }
        }
    }

    visiting.remove(mac);

    Some(TopologyNode {
        device: Some(device),
        synthetic_label: None,
        via_interface,
        interfaces: own_interfaces,
        children,
    })
}

/// §4.5 step 4 last bullet / §8 scenario 3: when ≥2 children share a wired
/// (non-`wlan*`) parent interface and every one of them is inaccessible, a
/// synthetic switch is inferred between the parent and those children
/// rather than showing them as flat siblings of a single port.
fn should_infer_unknown_switch(iface_name: &str, children: &[TopologyNode]) -> bool {
    if children.len() < 2 {
        return false;
    }
    if iface_name.to_lowercase().starts_with("wlan") {
        return false;
    }
    children
        .iter()
        .all(|c| c.device.as_ref().map(|d| !d.accessible).unwrap_or(false))
}

/// Fills in a missing `Device::hostname` from the DHCP lease table, first by
/// MAC then by IP (§4.7).
fn resolve_hostnames(devices: &mut [Device], leases: &[DhcpLease]) {
    let by_mac: HashMap<&str, &DhcpLease> = leases.iter().map(|l| (l.mac.as_str(), l)).collect();
    let by_ip: HashMap<&str, &DhcpLease> = leases.iter().map(|l| (l.ip.as_str(), l)).collect();

    for device in devices.iter_mut() {
        if device.hostname.is_some() {
            continue;
        }
        let hint = by_mac
            .get(device.primary_mac.as_str())
            .or_else(|| by_ip.get(device.ip.as_str()))
            .and_then(|lease| lease.hostname.clone());
        device.hostname = hint;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(mac: &str, parent_interface_id: Option<&str>, accessible: bool) -> Device {
        Device {
            primary_mac: mac.to_string(),
            network_id: "net-1".to_string(),
            hostname: None,
            ip: "10.0.0.1".to_string(),
            vendor: None,
            model: None,
            serial: None,
            firmware_version: None,
            device_type: "end-device".to_string(),
            accessible,
            open_ports: sqlx::types::Json(Vec::new()),
            driver: None,
            parent_interface_id: parent_interface_id.map(|s| s.to_string()),
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
    fn test_resolve_hostnames_prefers_mac_then_ip() {
        let mut devices = vec![device("AA:BB:CC:DD:EE:01", None, true)];
        devices[0].ip = "10.0.0.5".to_string();
        let leases = vec![DhcpLease {
            network_id: "net-1".to_string(),
            mac: "AA:BB:CC:DD:EE:01".to_string(),
            ip: "10.0.0.5".to_string(),
            hostname: Some("laptop-1".to_string()),
        }];
        resolve_hostnames(&mut devices, &leases);
        assert_eq!(devices[0].hostname.as_deref(), Some("laptop-1"));
    }

    #[test]
    fn test_should_infer_unknown_switch_requires_all_inaccessible() {
        let children = vec![
            TopologyNode { device: Some(device("A", None, false)), synthetic_label: None, via_interface: None, interfaces: vec![], children: vec![] },
            TopologyNode { device: Some(device("B", None, true)), synthetic_label: None, via_interface: None, interfaces: vec![], children: vec![] },
        ];
        assert!(!should_infer_unknown_switch("ether3", &children));
    }

    #[test]
    fn test_should_infer_unknown_switch_skips_wireless() {
        let children = vec![
            TopologyNode { device: Some(device("A", None, false)), synthetic_label: None, via_interface: None, interfaces: vec![], children: vec![] },
            TopologyNode { device: Some(device("B", None, false)), synthetic_label: None, via_interface: None, interfaces: vec![], children: vec![] },
        ];
        assert!(!should_infer_unknown_switch("wlan1", &children));
        assert!(should_infer_unknown_switch("ether3", &children));
    }
}
