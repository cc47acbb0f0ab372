//! Integration tests for the discovery engine's persistence gateway and
//! topology assembler (§13): a `tempfile`-backed SQLite database exercised
//! through the real `Store`, reproducing the §8 end-to-end scenarios at the
//! boundary that doesn't require a live SSH/network fixture. Scenarios that
//! hinge on driver/credential/SSH behavior are covered by the scanner's own
//! `#[cfg(test)]` unit tests against synthetic `DeviceInfo` values; these
//! tests instead verify what the scanner's writes actually look like once
//! they land in the database, and what the topology assembler does with
//! them afterward.

use chrono::Utc;
use topograph_lib::model::credential::Credential;
use topograph_lib::model::device::canonical_mac;
use topograph_lib::model::interface::{Interface, Vlan};
use topograph_lib::model::network::Network;
use topograph_lib::model::scan::{Scan, ScanStatus};
use topograph_lib::model::{Device, DeviceType};
use topograph_lib::persistence::Store;
use topograph_lib::topology;

async fn test_store() -> (Store, tempfile::TempPath) {
    let file = tempfile::NamedTempFile::new().expect("create temp db file");
    let path = file.into_temp_path();
    let store = Store::connect(path.to_str().unwrap()).await.expect("connect to temp sqlite db");
    (store, path)
}

fn bare_device(network_id: &str, mac: &str, ip: &str, accessible: bool, parent_interface_id: Option<&str>, upstream_interface: Option<&str>) -> Device {
    Device {
        primary_mac: mac.to_string(),
        network_id: network_id.to_string(),
        hostname: None,
        ip: ip.to_string(),
        vendor: None,
        model: None,
        serial: None,
        firmware_version: None,
        device_type: if accessible { DeviceType::Router.to_string() } else { DeviceType::EndDevice.to_string() },
        accessible,
        open_ports: sqlx::types::Json(Vec::new()),
        driver: None,
        parent_interface_id: parent_interface_id.map(|s| s.to_string()),
        upstream_interface: upstream_interface.map(|s| s.to_string()),
        comment: None,
        nomad: false,
        skip_login: false,
        user_type: None,
        asset_tag: None,
        location_id: None,
    }
}

fn bare_interface(id: &str, network_id: &str, device_mac: &str, name: &str) -> Interface {
    Interface {
        id: id.to_string(),
        device_mac: device_mac.to_string(),
        network_id: network_id.to_string(),
        name: name.to_string(),
        ip: None,
        bridge: None,
        vlan: None,
        poe_watts: None,
        poe_standard: None,
        link_up: true,
        comment: None,
    }
}

/// §8 scenario 1: root-only, one accessible router, no parent interface.
#[tokio::test]
async fn scenario_root_only() {
    let (store, _guard) = test_store().await;
    let network = Network::new("net-1", "HQ", "10.0.0.1", "admin", "hunter2");
    store.upsert_network(&network).await.unwrap();

    let root = bare_device("net-1", "AA:BB:CC:00:00:01", "10.0.0.1", true, None, None);
    store.upsert_device(&root).await.unwrap();
    store.replace_interfaces("net-1", &root.primary_mac, &[]).await.unwrap();

    let forest = topology::build_forest(&store, "net-1").await.unwrap();
    assert_eq!(forest.len(), 1);
    let root_node = &forest[0];
    assert!(root_node.children.is_empty());
    let device = root_node.device.as_ref().unwrap();
    assert_eq!(device.effective_type(), "router");
    assert!(device.accessible);
    assert!(device.parent_interface_id.is_none());
}

/// §8 scenario 2: root learns a MAC on `ether2` with no IP; the child is an
/// inaccessible end-device whose `parent_interface_id` resolves back to the
/// root's `ether2` row and whose `upstream_interface` is `"ether2"`.
#[tokio::test]
async fn scenario_bridged_end_device() {
    let (store, _guard) = test_store().await;
    let network = Network::new("net-1", "HQ", "10.0.0.1", "admin", "hunter2");
    store.upsert_network(&network).await.unwrap();

    let root = bare_device("net-1", "AA:BB:CC:00:00:01", "10.0.0.1", true, None, None);
    store.upsert_device(&root).await.unwrap();
    let ether2 = bare_interface("iface-ether2", "net-1", &root.primary_mac, "ether2");
    store.replace_interfaces("net-1", &root.primary_mac, std::slice::from_ref(&ether2)).await.unwrap();

    let child = bare_device("net-1", "AA:BB:CC:DD:EE:01", "", false, Some(&ether2.id), Some("ether2"));
    store.upsert_device(&child).await.unwrap();
    store.replace_interfaces("net-1", &child.primary_mac, &[]).await.unwrap();

    let forest = topology::build_forest(&store, "net-1").await.unwrap();
    assert_eq!(forest.len(), 1);
    assert_eq!(forest[0].children.len(), 1);

    let child_node = &forest[0].children[0];
    let child_device = child_node.device.as_ref().unwrap();
    assert_eq!(child_device.effective_type(), "end-device");
    assert!(!child_device.accessible);
    assert_eq!(child_device.upstream_interface.as_deref(), Some("ether2"));
    assert_eq!(child_node.via_interface.as_deref(), Some("ether2"));
}

/// §8 scenario 3: three inaccessible, wired children sharing `ether3` on
/// the parent get a synthetic "unknown switch" node inserted between them
/// and the parent in the assembled tree, but the database still holds only
/// the four real devices.
#[tokio::test]
async fn scenario_unknown_switch_inference() {
    let (store, _guard) = test_store().await;
    let network = Network::new("net-1", "HQ", "10.0.0.1", "admin", "hunter2");
    store.upsert_network(&network).await.unwrap();

    let root = bare_device("net-1", "AA:BB:CC:00:00:01", "10.0.0.1", true, None, None);
    store.upsert_device(&root).await.unwrap();
    let ether3 = bare_interface("iface-ether3", "net-1", &root.primary_mac, "ether3");
    store.replace_interfaces("net-1", &root.primary_mac, std::slice::from_ref(&ether3)).await.unwrap();

    for suffix in ["01", "02", "03"] {
        let mac = format!("AA:BB:CC:DD:EE:{suffix}");
        let child = bare_device("net-1", &mac, "", false, Some(&ether3.id), Some("ether3"));
        store.upsert_device(&child).await.unwrap();
        store.replace_interfaces("net-1", &mac, &[]).await.unwrap();
    }

    let all_devices = store.list_devices("net-1").await.unwrap();
    assert_eq!(all_devices.len(), 4, "database holds only the four real devices, no synthetic row");

    let forest = topology::build_forest(&store, "net-1").await.unwrap();
    assert_eq!(forest.len(), 1);
    assert_eq!(forest[0].children.len(), 1, "the three siblings collapse under one synthetic switch");

    let synthetic = &forest[0].children[0];
    assert!(synthetic.device.is_none());
    assert_eq!(synthetic.children.len(), 3);
    assert!(synthetic.synthetic_label.as_deref().unwrap().contains("ether3"));
}

/// §8 scenario 6 / property 2: a device's user-managed fields survive a
/// second scan that changes its IP.
#[tokio::test]
async fn user_field_preservation_across_scans() {
    let (store, _guard) = test_store().await;
    let network = Network::new("net-1", "HQ", "10.0.0.1", "admin", "hunter2");
    store.upsert_network(&network).await.unwrap();

    let mut first_scan = bare_device("net-1", "AA:11:22:33:44:55", "10.0.0.50", true, None, None);
    store.upsert_device(&first_scan).await.unwrap();

    first_scan.comment = Some("rack-3".to_string());
    first_scan.nomad = true;
    store.upsert_device(&first_scan).await.unwrap();

    let mut second_scan = bare_device("net-1", "AA:11:22:33:44:55", "10.0.0.77", true, None, None);
    let existing = store.get_device("net-1", &second_scan.primary_mac).await.unwrap().unwrap();
    existing.preserve_user_fields(&mut second_scan);
    store.upsert_device(&second_scan).await.unwrap();

    let persisted = store.get_device("net-1", "AA:11:22:33:44:55").await.unwrap().unwrap();
    assert_eq!(persisted.ip, "10.0.0.77");
    assert_eq!(persisted.comment.as_deref(), Some("rack-3"));
    assert!(persisted.nomad);
}

/// §8 property 1: re-upserting the same MAC never creates a second row.
#[tokio::test]
async fn mac_uniqueness_holds_across_upserts() {
    let (store, _guard) = test_store().await;
    let network = Network::new("net-1", "HQ", "10.0.0.1", "admin", "hunter2");
    store.upsert_network(&network).await.unwrap();

    let mac = "AA:BB:CC:DD:EE:FF";
    for ip in ["10.0.0.5", "10.0.0.6", "10.0.0.7"] {
        let device = bare_device("net-1", mac, ip, true, None, None);
        store.upsert_device(&device).await.unwrap();
    }

    let devices = store.list_devices("net-1").await.unwrap();
    assert_eq!(devices.iter().filter(|d| d.primary_mac == mac).count(), 1);
    assert_eq!(devices[0].ip, "10.0.0.7");
}

/// §8 property 9: once a credential is recorded as the winner for a MAC,
/// `winning_credential_for_mac` returns exactly it.
#[tokio::test]
async fn credential_priority_honors_matched_device() {
    let (store, _guard) = test_store().await;
    let network = Network::new("net-1", "HQ", "10.0.0.1", "admin", "hunter2");
    store.upsert_network(&network).await.unwrap();

    let losing = Credential { id: "cred-losing".into(), network_id: Some("net-1".into()), username: "guest".into(), password: "guest".into() };
    let winning = Credential { id: "cred-winning".into(), network_id: Some("net-1".into()), username: "svc".into(), password: "s3cr3t".into() };
    store.upsert_credential(&losing).await.unwrap();
    store.upsert_credential(&winning).await.unwrap();

    let mac = "AA:BB:CC:DD:EE:02";
    store.record_matched_device(&winning.id, mac).await.unwrap();

    let resolved = store.winning_credential_for_mac(mac).await.unwrap().expect("a winner is on file");
    assert_eq!(resolved.id, winning.id);
    assert_eq!(resolved.username, "svc");
}

/// §8 property 4: interface ownership — every interface's `device_mac`
/// points at a real device, and a child's `parent_interface_id` resolves to
/// an interface of a device in the same network.
#[tokio::test]
async fn interface_ownership_invariant() {
    let (store, _guard) = test_store().await;
    let network = Network::new("net-1", "HQ", "10.0.0.1", "admin", "hunter2");
    store.upsert_network(&network).await.unwrap();

    let root = bare_device("net-1", "AA:BB:CC:00:00:01", "10.0.0.1", true, None, None);
    store.upsert_device(&root).await.unwrap();
    let ether1 = bare_interface("iface-ether1", "net-1", &root.primary_mac, "ether1");
    store.replace_interfaces("net-1", &root.primary_mac, std::slice::from_ref(&ether1)).await.unwrap();

    let child = bare_device("net-1", "AA:BB:CC:DD:EE:09", "10.0.0.9", true, Some(&ether1.id), Some("ether1"));
    store.upsert_device(&child).await.unwrap();

    let all_devices = store.list_devices("net-1").await.unwrap();
    let all_interfaces = store.list_all_interfaces("net-1").await.unwrap();
    let mac_set: std::collections::HashSet<&str> = all_devices.iter().map(|d| d.primary_mac.as_str()).collect();

    for iface in &all_interfaces {
        assert!(mac_set.contains(iface.device_mac.as_str()), "interface owner must exist");
    }
    for device in &all_devices {
        if let Some(parent_id) = &device.parent_interface_id {
            assert!(all_interfaces.iter().any(|i| &i.id == parent_id), "parent_interface_id must reference a real interface");
        }
    }
}

/// §8 property 7, exercised through the persisted wire form rather than
/// the in-memory `Vlan` type directly: a hybrid VLAN string round-trips
/// through an `Interface` row unchanged.
#[tokio::test]
async fn vlan_wire_string_round_trips_through_storage() {
    let (store, _guard) = test_store().await;
    let network = Network::new("net-1", "HQ", "10.0.0.1", "admin", "hunter2");
    store.upsert_network(&network).await.unwrap();

    let root = bare_device("net-1", "AA:BB:CC:00:00:01", "10.0.0.1", true, None, None);
    store.upsert_device(&root).await.unwrap();

    let vlan = Vlan::hybrid(100, vec![200, 300]);
    let mut iface = bare_interface("iface-trunk", "net-1", &root.primary_mac, "ether5");
    iface.vlan = vlan.to_wire_string();
    store.replace_interfaces("net-1", &root.primary_mac, std::slice::from_ref(&iface)).await.unwrap();

    let stored = store.list_interfaces("net-1", &root.primary_mac).await.unwrap();
    assert_eq!(stored.len(), 1);
    let parsed = Vlan::parse_wire_string(stored[0].vlan.as_deref().unwrap());
    assert_eq!(parsed, vlan);
}

/// §3 lifetime rules: a scan left `running` by a crashed/restarted process
/// is force-transitioned to `failed` the next time it's reconciled.
#[tokio::test]
async fn stale_running_scan_is_force_failed() {
    let (store, _guard) = test_store().await;
    let network = Network::new("net-1", "HQ", "10.0.0.1", "admin", "hunter2");
    store.upsert_network(&network).await.unwrap();

    let scan = Scan {
        id: "scan-orphaned".into(),
        network_id: "net-1".into(),
        status: ScanStatus::Running.to_string(),
        started_at: Utc::now(),
        completed_at: None,
        device_count: 0,
        failure_reason: None,
    };
    store.start_scan(&scan).await.unwrap();

    let reconciled = store.fail_stale_running_scans().await.unwrap();
    assert_eq!(reconciled, 1);

    let after = store.get_scan(&scan.id).await.unwrap().unwrap();
    assert_eq!(after.status, "failed");
}

/// MAC canonicalization is idempotent and case/format-insensitive, a
/// precondition every scenario above relies on implicitly.
#[test]
fn canonical_mac_is_stable() {
    assert_eq!(canonical_mac("aa:bb:cc:dd:ee:ff"), canonical_mac("AA-BB-CC-DD-EE-FF"));
    assert_eq!(canonical_mac("AABBCCDDEEFF"), "AA:BB:CC:DD:EE:FF");
}
