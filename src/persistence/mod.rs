//! SQLite persistence gateway (§5).
//!
//! One `Store` per process, backed by a `sqlx::SqlitePool`. Devices and
//! interfaces are replaced wholesale per scan except for the handful of
//! user-managed `Device` fields the model layer protects
//! (`Device::preserve_user_fields`); scan logs are appended through a
//! bounded, fire-and-forget channel so a slow disk never stalls the
//! scanner.

mod migrate;

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use tokio::sync::mpsc;

use crate::error::{DiscoveryError, Result};
use crate::model::credential::Credential;
use crate::model::device::Device;
use crate::model::floorplan::{Floorplan, Location, LocationPolygon, Point};
use crate::model::interface::{DhcpLease, Interface};
use crate::model::network::Network;
use crate::model::scan::{LogLevel, Scan, ScanLog, ScanStatus};

/// Bound on the scan-log write-behind channel (§5, §6). Logs are
/// best-effort telemetry, not an audit trail; a full channel drops the
/// newest entry rather than back-pressuring the scan loop.
const SCAN_LOG_CHANNEL_DEPTH: usize = 512;

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
    log_sender: mpsc::Sender<ScanLog>,
    seq_counters: Arc<dashmap::DashMap<String, AtomicI64>>,
}

impl Store {
    pub async fn connect(database_path: &str) -> Result<Self> {
        let url = format!("sqlite://{database_path}?mode=rwc");
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect(&url)
            .await
            .map_err(persistence_error)?;

        migrate::run(&pool).await?;

        let (log_sender, mut log_receiver) = mpsc::channel::<ScanLog>(SCAN_LOG_CHANNEL_DEPTH);
        let writer_pool = pool.clone();
        tokio::spawn(async move {
            while let Some(entry) = log_receiver.recv().await {
                let _ = sqlx::query(
                    "INSERT INTO scan_logs (scan_id, seq, level, message, timestamp) VALUES (?, ?, ?, ?, ?)",
                )
                .bind(&entry.scan_id)
                .bind(entry.seq)
                .bind(&entry.level)
                .bind(&entry.message)
                .bind(entry.timestamp.to_rfc3339())
                .execute(&writer_pool)
                .await;
            }
        });

        Ok(Self {
            pool,
            log_sender,
            seq_counters: Arc::new(dashmap::DashMap::new()),
        })
    }

    // -- networks ---------------------------------------------------

    pub async fn upsert_network(&self, network: &Network) -> Result<()> {
        sqlx::query(
            "INSERT INTO networks (id, name, root_ip, root_username, root_password, last_scanned_at, device_count, is_online)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                root_ip = excluded.root_ip,
                root_username = excluded.root_username,
                root_password = excluded.root_password,
                last_scanned_at = excluded.last_scanned_at,
                device_count = excluded.device_count,
                is_online = excluded.is_online",
        )
        .bind(&network.id)
        .bind(&network.name)
        .bind(&network.root_ip)
        .bind(&network.root_username)
        .bind(&network.root_password)
        .bind(network.last_scanned_at.map(|t| t.to_rfc3339()))
        .bind(network.device_count)
        .bind(network.is_online)
        .execute(&self.pool)
        .await
        .map_err(persistence_error)?;
        Ok(())
    }

    pub async fn list_networks(&self) -> Result<Vec<Network>> {
        sqlx::query_as("SELECT * FROM networks ORDER BY name")
            .fetch_all(&self.pool)
            .await
            .map_err(persistence_error)
    }

    pub async fn get_network(&self, id: &str) -> Result<Option<Network>> {
        sqlx::query_as("SELECT * FROM networks WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(persistence_error)
    }

    pub async fn delete_network(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM networks WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(persistence_error)?;
        Ok(())
    }

    // -- credentials --------------------------------------------------

    pub async fn upsert_credential(&self, credential: &Credential) -> Result<()> {
        sqlx::query(
            "INSERT INTO credentials (id, network_id, username, password) VALUES (?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET username = excluded.username, password = excluded.password",
        )
        .bind(&credential.id)
        .bind(&credential.network_id)
        .bind(&credential.username)
        .bind(&credential.password)
        .execute(&self.pool)
        .await
        .map_err(persistence_error)?;
        Ok(())
    }

    pub async fn list_credentials(&self, network_id: Option<&str>) -> Result<Vec<Credential>> {
        match network_id {
            Some(id) => {
                sqlx::query_as("SELECT * FROM credentials WHERE network_id = ? OR network_id IS NULL")
                    .bind(id)
                    .fetch_all(&self.pool)
                    .await
            }
            None => sqlx::query_as("SELECT * FROM credentials").fetch_all(&self.pool).await,
        }
        .map_err(persistence_error)
    }

    pub async fn record_matched_device(&self, credential_id: &str, mac: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO matched_devices (credential_id, mac) VALUES (?, ?)
             ON CONFLICT(credential_id, mac) DO NOTHING",
        )
        .bind(credential_id)
        .bind(mac)
        .execute(&self.pool)
        .await
        .map_err(persistence_error)?;
        Ok(())
    }

    // -- devices --------------------------------------------------------

    /// Fetches the existing row for `(network_id, mac)`, if any, so the
    /// caller can apply `Device::preserve_user_fields` before calling
    /// `upsert_device` (§3 invariant).
    pub async fn get_device(&self, network_id: &str, mac: &str) -> Result<Option<Device>> {
        sqlx::query_as("SELECT * FROM devices WHERE network_id = ? AND primary_mac = ?")
            .bind(network_id)
            .bind(mac)
            .fetch_optional(&self.pool)
            .await
            .map_err(persistence_error)
    }

    pub async fn upsert_device(&self, device: &Device) -> Result<()> {
        sqlx::query(
            "INSERT INTO devices (
                primary_mac, network_id, hostname, ip, vendor, model, serial, firmware_version,
                device_type, accessible, open_ports, driver, parent_interface_id, upstream_interface,
                comment, nomad, skip_login, user_type, asset_tag, location_id
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(network_id, primary_mac) DO UPDATE SET
                hostname = excluded.hostname,
                ip = excluded.ip,
                vendor = excluded.vendor,
                model = excluded.model,
                serial = excluded.serial,
                firmware_version = excluded.firmware_version,
                device_type = excluded.device_type,
                accessible = excluded.accessible,
                open_ports = excluded.open_ports,
                driver = excluded.driver,
                parent_interface_id = excluded.parent_interface_id,
                upstream_interface = excluded.upstream_interface,
                comment = excluded.comment,
                nomad = excluded.nomad,
                skip_login = excluded.skip_login,
                user_type = excluded.user_type,
                asset_tag = excluded.asset_tag,
                location_id = excluded.location_id",
        )
        .bind(&device.primary_mac)
        .bind(&device.network_id)
        .bind(&device.hostname)
        .bind(&device.ip)
        .bind(&device.vendor)
        .bind(&device.model)
        .bind(&device.serial)
        .bind(&device.firmware_version)
        .bind(&device.device_type)
        .bind(device.accessible)
        .bind(&device.open_ports)
        .bind(&device.driver)
        .bind(&device.parent_interface_id)
        .bind(&device.upstream_interface)
        .bind(&device.comment)
        .bind(device.nomad)
        .bind(device.skip_login)
        .bind(&device.user_type)
        .bind(&device.asset_tag)
        .bind(&device.location_id)
        .execute(&self.pool)
        .await
        .map_err(persistence_error)?;
        Ok(())
    }

    pub async fn list_devices(&self, network_id: &str) -> Result<Vec<Device>> {
        sqlx::query_as("SELECT * FROM devices WHERE network_id = ?")
            .bind(network_id)
            .fetch_all(&self.pool)
            .await
            .map_err(persistence_error)
    }

    /// Replaces every interface owned by `device_mac` with `interfaces`
    /// (§3: interfaces are destroyed and recreated wholesale per scan).
    pub async fn replace_interfaces(&self, network_id: &str, device_mac: &str, interfaces: &[Interface]) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(persistence_error)?;
        sqlx::query("DELETE FROM interfaces WHERE network_id = ? AND device_mac = ?")
            .bind(network_id)
            .bind(device_mac)
            .execute(&mut *tx)
            .await
            .map_err(persistence_error)?;

        for iface in interfaces {
            sqlx::query(
                "INSERT INTO interfaces (id, device_mac, network_id, name, ip, bridge, vlan, poe_watts, poe_standard, link_up, comment)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&iface.id)
            .bind(&iface.device_mac)
            .bind(&iface.network_id)
            .bind(&iface.name)
            .bind(&iface.ip)
            .bind(&iface.bridge)
            .bind(&iface.vlan)
            .bind(iface.poe_watts)
            .bind(&iface.poe_standard)
            .bind(iface.link_up)
            .bind(&iface.comment)
            .execute(&mut *tx)
            .await
            .map_err(persistence_error)?;
        }

        tx.commit().await.map_err(persistence_error)?;
        Ok(())
    }

    pub async fn list_interfaces(&self, network_id: &str, device_mac: &str) -> Result<Vec<Interface>> {
        sqlx::query_as("SELECT * FROM interfaces WHERE network_id = ? AND device_mac = ?")
            .bind(network_id)
            .bind(device_mac)
            .fetch_all(&self.pool)
            .await
            .map_err(persistence_error)
    }

    /// Every interface row in the network, regardless of owning device —
    /// what the topology assembler needs to resolve `parent_interface_id`
    /// back to the parent device's MAC (§4.7).
    pub async fn list_all_interfaces(&self, network_id: &str) -> Result<Vec<Interface>> {
        sqlx::query_as("SELECT * FROM interfaces WHERE network_id = ?")
            .bind(network_id)
            .fetch_all(&self.pool)
            .await
            .map_err(persistence_error)
    }

    /// Replaces every DHCP lease for `network_id` (§3: leases are
    /// network-scoped and re-created per scan).
    pub async fn replace_dhcp_leases(&self, network_id: &str, leases: &[DhcpLease]) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(persistence_error)?;
        sqlx::query("DELETE FROM dhcp_leases WHERE network_id = ?")
            .bind(network_id)
            .execute(&mut *tx)
            .await
            .map_err(persistence_error)?;

        for lease in leases {
            sqlx::query("INSERT INTO dhcp_leases (network_id, mac, ip, hostname) VALUES (?, ?, ?, ?)")
                .bind(&lease.network_id)
                .bind(&lease.mac)
                .bind(&lease.ip)
                .bind(&lease.hostname)
                .execute(&mut *tx)
                .await
                .map_err(persistence_error)?;
        }

        tx.commit().await.map_err(persistence_error)?;
        Ok(())
    }

    pub async fn list_dhcp_leases(&self, network_id: &str) -> Result<Vec<DhcpLease>> {
        sqlx::query_as("SELECT * FROM dhcp_leases WHERE network_id = ?")
            .bind(network_id)
            .fetch_all(&self.pool)
            .await
            .map_err(persistence_error)
    }

    // -- scans ------------------------------------------------------------

    pub async fn start_scan(&self, scan: &Scan) -> Result<()> {
        sqlx::query(
            "INSERT INTO scans (id, network_id, status, started_at, completed_at, device_count, failure_reason)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&scan.id)
        .bind(&scan.network_id)
        .bind(scan.status.to_string())
        .bind(scan.started_at.to_rfc3339())
        .bind(scan.completed_at.map(|t| t.to_rfc3339()))
        .bind(scan.device_count)
        .bind(&scan.failure_reason)
        .execute(&self.pool)
        .await
        .map_err(persistence_error)?;
        self.seq_counters.insert(scan.id.clone(), AtomicI64::new(0));
        Ok(())
    }

    pub async fn finish_scan(&self, scan_id: &str, status: ScanStatus, device_count: i64, failure_reason: Option<String>) -> Result<()> {
        sqlx::query(
            "UPDATE scans SET status = ?, completed_at = ?, device_count = ?, failure_reason = ? WHERE id = ?",
        )
        .bind(status.to_string())
        .bind(Utc::now().to_rfc3339())
        .bind(device_count)
        .bind(failure_reason)
        .bind(scan_id)
        .execute(&self.pool)
        .await
        .map_err(persistence_error)?;
        self.seq_counters.remove(scan_id);
        Ok(())
    }

    pub async fn get_scan(&self, scan_id: &str) -> Result<Option<Scan>> {
        sqlx::query_as("SELECT * FROM scans WHERE id = ?")
            .bind(scan_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(persistence_error)
    }

    pub async fn list_scan_logs(&self, scan_id: &str) -> Result<Vec<ScanLog>> {
        sqlx::query_as("SELECT * FROM scan_logs WHERE scan_id = ? ORDER BY seq")
            .bind(scan_id)
            .fetch_all(&self.pool)
            .await
            .map_err(persistence_error)
    }

    /// Fire-and-forget scan log append (§6): assigns the next sequence
    /// number and hands the row to the write-behind channel, dropping it
    /// silently if the channel is full rather than blocking the scanner.
    pub fn log(&self, scan_id: &str, level: LogLevel, message: impl Into<String>) {
        let seq = self
            .seq_counters
            .entry(scan_id.to_string())
            .or_insert_with(|| AtomicI64::new(0))
            .fetch_add(1, Ordering::Relaxed);

        let entry = ScanLog {
            scan_id: scan_id.to_string(),
            seq,
            level: level.to_string(),
            message: message.into(),
            timestamp: Utc::now(),
        };

        let _ = self.log_sender.try_send(entry);
    }

    /// The credential that last succeeded against `mac`, if any (§3
    /// `MatchedDevice`, §8 property 9): joined so the scanner can try it
    /// before any other candidate.
    pub async fn winning_credential_for_mac(&self, mac: &str) -> Result<Option<Credential>> {
        sqlx::query_as(
            "SELECT c.* FROM credentials c
             JOIN matched_devices m ON m.credential_id = c.id
             WHERE m.mac = ?",
        )
        .bind(mac)
        .fetch_optional(&self.pool)
        .await
        .map_err(persistence_error)
    }

    /// A server restart while a scan was `running` is only detectable at
    /// the next status query; force-transitions any such row to `failed`
    /// (§3 Lifetime rules). Returns the number of scans reconciled.
    pub async fn fail_stale_running_scans(&self) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE scans SET status = 'failed', completed_at = ?, failure_reason = 'interrupted by restart'
             WHERE status = 'running'",
        )
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(persistence_error)?;
        Ok(result.rows_affected())
    }

    // -- floorplans / locations / polygons (§3, §4.8) --------------------

    pub async fn upsert_floorplan(&self, floorplan: &Floorplan) -> Result<()> {
        sqlx::query(
            "INSERT INTO floorplans (id, network_id, name, source_path) VALUES (?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name, source_path = excluded.source_path",
        )
        .bind(&floorplan.id)
        .bind(&floorplan.network_id)
        .bind(&floorplan.name)
        .bind(&floorplan.source_path)
        .execute(&self.pool)
        .await
        .map_err(persistence_error)?;
        Ok(())
    }

    pub async fn list_floorplans(&self, network_id: &str) -> Result<Vec<Floorplan>> {
        sqlx::query_as("SELECT * FROM floorplans WHERE network_id = ?")
            .bind(network_id)
            .fetch_all(&self.pool)
            .await
            .map_err(persistence_error)
    }

    pub async fn get_floorplan(&self, id: &str) -> Result<Option<Floorplan>> {
        sqlx::query_as("SELECT * FROM floorplans WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(persistence_error)
    }

    pub async fn upsert_location(&self, location: &Location) -> Result<()> {
        sqlx::query(
            "INSERT INTO locations (id, network_id, name) VALUES (?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name",
        )
        .bind(&location.id)
        .bind(&location.network_id)
        .bind(&location.name)
        .execute(&self.pool)
        .await
        .map_err(persistence_error)?;
        Ok(())
    }

    pub async fn list_locations(&self, network_id: &str) -> Result<Vec<Location>> {
        sqlx::query_as("SELECT * FROM locations WHERE network_id = ?")
            .bind(network_id)
            .fetch_all(&self.pool)
            .await
            .map_err(persistence_error)
    }

    pub async fn upsert_location_polygon(&self, polygon: &LocationPolygon) -> Result<()> {
        let points_json = serde_json::to_string(&polygon.points).unwrap_or_else(|_| "[]".to_string());
        sqlx::query(
            "INSERT INTO location_polygons (id, floorplan_id, location_id, points) VALUES (?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET floorplan_id = excluded.floorplan_id, location_id = excluded.location_id, points = excluded.points",
        )
        .bind(&polygon.id)
        .bind(&polygon.floorplan_id)
        .bind(&polygon.location_id)
        .bind(points_json)
        .execute(&self.pool)
        .await
        .map_err(persistence_error)?;
        Ok(())
    }

    /// Reads every polygon bound to `floorplan_id`, deserializing the
    /// JSON-encoded point list back into `Vec<Point>`.
    pub async fn list_location_polygons(&self, floorplan_id: &str) -> Result<Vec<LocationPolygon>> {
        #[derive(sqlx::FromRow)]
        struct Row {
            id: String,
            floorplan_id: String,
            location_id: String,
            points: String,
        }

        let rows: Vec<Row> = sqlx::query_as("SELECT * FROM location_polygons WHERE floorplan_id = ?")
            .bind(floorplan_id)
            .fetch_all(&self.pool)
            .await
            .map_err(persistence_error)?;

        Ok(rows
            .into_iter()
            .map(|r| LocationPolygon {
                id: r.id,
                floorplan_id: r.floorplan_id,
                location_id: r.location_id,
                points: serde_json::from_str::<Vec<Point>>(&r.points).unwrap_or_default(),
            })
            .collect())
    }

    /// Devices assigned to `location_id` within `network_id`, for the PDF
    /// badge placer (§4.8).
    pub async fn list_devices_by_location(&self, network_id: &str, location_id: &str) -> Result<Vec<Device>> {
        sqlx::query_as("SELECT * FROM devices WHERE network_id = ? AND location_id = ?")
            .bind(network_id)
            .bind(location_id)
            .fetch_all(&self.pool)
            .await
            .map_err(persistence_error)
    }
}

fn persistence_error(e: sqlx::Error) -> DiscoveryError {
    DiscoveryError::PersistenceConflict {
        entity: "store".into(),
        key: String::new(),
        reason: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::network::Network;

    async fn in_memory_store() -> Store {
        Store::connect(":memory:").await.unwrap()
    }

    #[tokio::test]
    async fn test_network_roundtrip() {
        let store = in_memory_store().await;
        let network = Network::new("net-1", "Home", "10.0.0.1", "admin", "secret");
        store.upsert_network(&network).await.unwrap();

        let fetched = store.get_network("net-1").await.unwrap().unwrap();
        assert_eq!(fetched.name, "Home");
    }

    #[tokio::test]
    async fn test_device_upsert_preserves_nothing_by_itself() {
        let store = in_memory_store().await;
        let network = Network::new("net-1", "Home", "10.0.0.1", "admin", "secret");
        store.upsert_network(&network).await.unwrap();

        let device = Device {
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
        };
        store.upsert_device(&device).await.unwrap();

        let devices = store.list_devices("net-1").await.unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].ip, "10.0.0.1");
    }
}
