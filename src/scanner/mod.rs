//! Scanner orchestrator (§4.5).
//!
//! Recursively walks a network from its root device, probing management
//! ports, trying credentials in priority order, detecting the vendor, and
//! persisting each device before recursing into its neighbors. One
//! cooperative worker per active scan (§5): cancellation is a shared
//! atomic flag checked between devices and at every I/O boundary, never a
//! hard kill of an in-flight operation.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::drivers::{DeviceInfo, DriverContext, DriverRegistry};
use crate::error::{DiscoveryError, Result};
use crate::events::{DeviceEvent, EventBus, EventKind, StatusEvent};
use crate::model::credential::Credential;
use crate::model::device::{canonical_mac, Device, DeviceType, OuiHint};
use crate::model::interface::{DhcpLease, Interface};
use crate::model::network::Network;
use crate::model::scan::{LogLevel, Scan, ScanStatus};
use crate::net::jump_host::{self, JumpHostManager, JumpHostState};
use crate::net::prober;
use crate::net::ssh;
use crate::persistence::Store;
use crate::probes::{mdns, oui, snmp};

/// A (username, password) pair under consideration for a device, with the
/// `Credential` row id it came from when it isn't the network's own root
/// credential (§3, §4.5 step 4 "remember which credential won").
#[derive(Debug, Clone)]
struct CredentialCandidate {
    id: Option<String>,
    username: String,
    password: String,
}

/// Whichever path is available to reach a non-root device's SSH port
/// (§4.5 step 4 "decide connection path").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnPath {
    Direct,
    Tunneled,
    Unreachable,
}

/// State threaded through one scan's recursion: everything `scan_device`
/// needs but that doesn't belong on `ScannerHandle` itself, since
/// `ScannerHandle` is shared across concurrently running scans.
struct ScanContext {
    network: Network,
    scan_id: String,
    abort: Arc<AtomicBool>,
    visited: HashSet<String>,
    base_credentials: Vec<CredentialCandidate>,
    mdns_hints: HashMap<IpAddr, String>,
    jump_host: JumpHostManager,
    dhcp_leases: Vec<DhcpLease>,
    device_count: i64,
}

/// Owns the driver registry and tracks, per network, whether a scan is
/// currently running — the in-process equivalent of the HTTP layer's
/// "409 if already running" contract (§5, §6).
#[derive(Clone)]
pub struct ScannerHandle {
    store: Store,
    bus: EventBus,
    config: AppConfig,
    registry: Arc<DriverRegistry>,
    running: Arc<DashMap<String, Arc<AtomicBool>>>,
}

impl ScannerHandle {
    pub fn new(store: Store, bus: EventBus, config: AppConfig) -> Self {
        Self {
            store,
            bus,
            config,
            registry: Arc::new(DriverRegistry::with_defaults()),
            running: Arc::new(DashMap::new()),
        }
    }

    /// Starts a scan against `network_id` as a detached background task and
    /// returns its scan id immediately. Rejects a second concurrent scan
    /// against the same network (§5).
    pub async fn start(&self, network_id: &str) -> Result<String> {
        if self.running.contains_key(network_id) {
            return Err(DiscoveryError::Fatal {
                reason: format!("a scan is already running for network {network_id}"),
            });
        }

        let network = self
            .store
            .get_network(network_id)
            .await?
            .ok_or_else(|| DiscoveryError::Fatal {
                reason: format!("network {network_id} does not exist"),
            })?;

        let scan_id = Uuid::new_v4().to_string();
        let abort_flag = Arc::new(AtomicBool::new(false));
        self.running.insert(network_id.to_string(), abort_flag.clone());

        let scan = Scan {
            id: scan_id.clone(),
            network_id: network_id.to_string(),
            status: ScanStatus::Running.to_string(),
            started_at: Utc::now(),
            completed_at: None,
            device_count: 0,
            failure_reason: None,
        };
        self.store.start_scan(&scan).await?;
        self.bus.publish(EventKind::Status(StatusEvent {
            scan_id: scan_id.clone(),
            status: ScanStatus::Running.to_string(),
        }));
        self.bus.log(&scan_id, LogLevel::Info, format!("scan started for {}", network.name));

        let worker = self.clone();
        let network_id_owned = network_id.to_string();
        let scan_id_owned = scan_id.clone();
        tokio::spawn(async move {
            worker.drive_scan(network, scan_id_owned, network_id_owned, abort_flag).await;
        });

        Ok(scan_id)
    }

    /// Cooperative abort (§5, §9): flips the shared flag; the worker
    /// notices at the next iteration boundary or I/O deadline.
    pub fn abort(&self, network_id: &str) -> Result<()> {
        match self.running.get(network_id) {
            Some(flag) => {
                flag.store(true, Ordering::SeqCst);
                Ok(())
            }
            None => Err(DiscoveryError::Fatal {
                reason: format!("no running scan for network {network_id}"),
            }),
        }
    }

    pub fn is_running(&self, network_id: &str) -> bool {
        self.running.contains_key(network_id)
    }

    /// Owns the scan's terminal bookkeeping (finish_scan, network row
    /// update, terminal event) regardless of how `run_scan` concluded
    /// (§4.5 step 5, §7 closing principle: scan-level failures are
    /// terminal and final).
    async fn drive_scan(&self, network: Network, scan_id: String, network_id: String, abort: Arc<AtomicBool>) {
        let outcome = self.run_scan(&network, &scan_id, abort).await;
        self.running.remove(&network_id);

        let (status, failure_reason, device_count) = match outcome {
            Ok(count) => (ScanStatus::Completed, None, count),
            Err(DiscoveryError::Aborted) => {
                warn!(scan_id = %scan_id, "scan aborted");
                self.bus.log(&scan_id, LogLevel::Warn, "scan cancelled");
                (ScanStatus::Failed, Some("cancelled".to_string()), 0)
            }
            Err(e) => {
                error!(scan_id = %scan_id, error = %e, "scan failed");
                self.bus.log(&scan_id, LogLevel::Error, format!("scan failed: {e}"));
                (ScanStatus::Failed, Some(e.to_string()), 0)
            }
        };

        if let Err(e) = self.store.finish_scan(&scan_id, status, device_count, failure_reason).await {
            error!(scan_id = %scan_id, error = %e, "failed to persist terminal scan state");
        }

        let is_online = status == ScanStatus::Completed;
        let mut updated_network = network;
        updated_network.last_scanned_at = Some(Utc::now());
        updated_network.device_count = device_count;
        updated_network.is_online = is_online;
        if let Err(e) = self.store.upsert_network(&updated_network).await {
            error!(scan_id = %scan_id, error = %e, "failed to update network after scan");
        }

        self.bus.publish(EventKind::Status(StatusEvent {
            scan_id: scan_id.clone(),
            status: status.to_string(),
        }));
        self.bus.log(&scan_id, LogLevel::Success, format!("scan finished: {status}"));
    }

    /// §4.5 steps 1-5, minus the terminal bookkeeping (handled by the
    /// caller so it runs regardless of the `Result` here).
    async fn run_scan(&self, network: &Network, scan_id: &str, abort: Arc<AtomicBool>) -> Result<i64> {
        let base_credentials = self.load_ordered_credentials(network).await?;

        let mdns_hints = if self.config.mdns_enabled {
            match mdns::sweep(self.config.mdns_budget).await {
                Ok(records) => records.into_iter().map(|r| (r.ip, r.hostname)).collect(),
                Err(e) => {
                    warn!(scan_id = %scan_id, error = %e, "mdns sweep failed, continuing without hints");
                    HashMap::new()
                }
            }
        } else {
            HashMap::new()
        };

        let mut ctx = ScanContext {
            network: network.clone(),
            scan_id: scan_id.to_string(),
            abort,
            visited: HashSet::new(),
            base_credentials,
            mdns_hints,
            jump_host: JumpHostManager::absent(),
            dhcp_leases: Vec::new(),
            device_count: 0,
        };

        let root_ip: IpAddr = network
            .root_ip
            .parse()
            .map_err(|_| DiscoveryError::Fatal {
                reason: format!("root_ip '{}' is not a valid IP address", network.root_ip),
            })?;

        let result = self.scan_device(&mut ctx, root_ip, None, None, None).await;

        self.store.replace_dhcp_leases(&network.id, &ctx.dhcp_leases).await?;

        result?;
        Ok(ctx.device_count)
    }

    /// Root credential first, then network-scoped `Credential` rows, then
    /// global ones (§4.5 step 1).
    async fn load_ordered_credentials(&self, network: &Network) -> Result<Vec<CredentialCandidate>> {
        let mut ordered = vec![CredentialCandidate {
            id: None,
            username: network.root_username.clone(),
            password: network.root_password.clone(),
        }];

        let scoped = self.store.list_credentials(Some(&network.id)).await?;
        let (network_scoped, global): (Vec<Credential>, Vec<Credential>) =
            scoped.into_iter().partition(|c| c.network_id.is_some());

        for c in network_scoped {
            ordered.push(CredentialCandidate { id: Some(c.id), username: c.username, password: c.password });
        }
        for c in global {
            ordered.push(CredentialCandidate { id: Some(c.id), username: c.username, password: c.password });
        }

        Ok(ordered)
    }

    /// Moves the MAC's previously-winning credential to the front, if one
    /// is on file (§4.5 step 4, §8 property 9).
    async fn ordered_credentials_for(&self, ctx: &ScanContext, mac: Option<&str>) -> Result<Vec<CredentialCandidate>> {
        let Some(mac) = mac else {
            return Ok(ctx.base_credentials.clone());
        };

        match self.store.winning_credential_for_mac(mac).await? {
            Some(winner) => {
                let mut ordered = vec![CredentialCandidate {
                    id: Some(winner.id.clone()),
                    username: winner.username,
                    password: winner.password,
                }];
                ordered.extend(ctx.base_credentials.iter().filter(|c| c.id.as_deref() != Some(winner.id.as_str())).cloned());
                Ok(ordered)
            }
            None => Ok(ctx.base_credentials.clone()),
        }
    }

    /// The recursive body of the algorithm (§4.5 step 4). `parent_interface_id`
    /// is the id of the `Interface` row on the parent device this device was
    /// reached through; `parent_via_interface` is that interface's name, used
    /// as a last-resort guess at this device's own upstream interface name.
    fn scan_device<'a>(
        &'a self,
        ctx: &'a mut ScanContext,
        ip: IpAddr,
        parent_interface_id: Option<String>,
        parent_via_interface: Option<String>,
        known_mac: Option<String>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
        if ctx.abort.load(Ordering::SeqCst) {
            return Err(DiscoveryError::Aborted);
        }

        if let Some(mac) = &known_mac {
            if ctx.visited.contains(mac) {
                return Ok(());
            }
        }

        let ip_str = ip.to_string();
        let open_ports = prober::probe_management_ports(ip, self.config.tcp_connect_timeout).await;

        if open_ports.is_empty() {
            return self
                .persist_leaf(ctx, &ip_str, known_mac, parent_interface_id, parent_via_interface, Vec::new())
                .await;
        }

        if let Some(mac) = &known_mac {
            if let Some(existing) = self.store.get_device(&ctx.network.id, mac).await? {
                if existing.skip_login {
                    ctx.visited.insert(mac.clone());
                    self.bus.log(&ctx.scan_id, LogLevel::Info, format!("{mac} marked skip_login, not probing"));
                    return Ok(());
                }
            }
        }

        let is_root = ip_str == ctx.network.root_ip;
        let conn_path = if is_root {
            ConnPath::Direct
        } else if ctx.jump_host.state() == JumpHostState::ProbedYes {
            ConnPath::Tunneled
        } else if open_ports.contains(&22) {
            ConnPath::Direct
        } else if matches!(ctx.jump_host.state(), JumpHostState::Established) {
            ConnPath::Tunneled
        } else {
            ConnPath::Unreachable
        };

        if conn_path == ConnPath::Unreachable {
            self.bus.log(&ctx.scan_id, LogLevel::Warn, format!("{ip_str} has no reachable SSH path, recording as end-device"));
            return self
                .persist_leaf(ctx, &ip_str, known_mac, parent_interface_id, parent_via_interface, open_ports)
                .await;
        }

        let candidates = self.ordered_credentials_for(ctx, known_mac.as_deref()).await?;
        let mut session = None;
        let mut won_credential_id = None;

        for candidate in &candidates {
            if ctx.abort.load(Ordering::SeqCst) {
                return Err(DiscoveryError::Aborted);
            }

            let attempt = match conn_path {
                ConnPath::Direct => {
                    ssh::connect(&ip_str, &candidate.username, &candidate.password, 22, self.config.ssh_connect_timeout).await
                }
                ConnPath::Tunneled => match ctx.jump_host.forward_out(&ip_str, 22).await {
                    Ok(channel) => {
                        let stream = jump_host::as_tunneled_stream(channel);
                        ssh::connect_over_stream(stream, &candidate.username, &candidate.password, self.config.ssh_connect_timeout)
                            .await
                            .ok()
                    }
                    Err(_) => None,
                },
                ConnPath::Unreachable => None,
            };

            if let Some(s) = attempt {
                session = Some(s);
                won_credential_id = candidate.id.clone();
                break;
            }
        }

        let Some(mut session) = session else {
            self.bus.log(&ctx.scan_id, LogLevel::Warn, format!("{ip_str}: no working credential after {} attempt(s)", candidates.len()));
            return self
                .persist_leaf(ctx, &ip_str, known_mac, parent_interface_id, parent_via_interface, open_ports)
                .await;
        };

        if is_root && ctx.jump_host.state() == JumpHostState::Absent {
            if let Some(candidate) = candidates.iter().find(|c| c.id == won_credential_id).or_else(|| candidates.first()) {
                if let Some(tunnel_session) = ssh::connect(&ip_str, &candidate.username, &candidate.password, 22, self.config.ssh_connect_timeout).await {
                    ctx.jump_host = JumpHostManager::established(tunnel_session);
                    let supported = ctx.jump_host.confirm_forwarding(&ctx.network.root_ip, 22).await;
                    self.bus.log(
                        &ctx.scan_id,
                        LogLevel::Info,
                        format!("jump host forwarding {}", if supported { "available" } else { "unavailable" }),
                    );
                }
            }
        }

        let oui_hint = known_mac.as_deref().map(|m| oui::classify(m).1).unwrap_or(OuiHint::Unknown);
        let candidates = self.registry.resolve_candidates(oui_hint, session.banner.as_deref());

        if candidates.is_empty() {
            self.bus.log(&ctx.scan_id, LogLevel::Warn, format!("{ip_str}: no vendor driver claims this device"));
            return self
                .persist_device_with_info(ctx, &ip_str, known_mac, parent_interface_id, parent_via_interface, won_credential_id, None, DeviceInfo::default(), true, open_ports)
                .await;
        };

        let driver_ctx = DriverContext {
            ip: ip_str.clone(),
            api_port: 8728,
            shell_command_timeout: self.config.ssh_shell_command_timeout,
            exec_command_timeout: self.config.ssh_exec_timeout,
            connect_timeout: self.config.tcp_connect_timeout,
            snmp_community: self.config.snmp_community.clone(),
            username: session.authenticated_username.clone().unwrap_or_default(),
            password: session.authenticated_password.clone().unwrap_or_default(),
        };

        // Try each claiming driver in order; a driver whose probe fails
        // outright (not a partial-field miss, which drivers already degrade
        // gracefully) falls through to the next candidate (§4.4: mikrotik-api
        // falling through to mikrotik-cli when the binary API isn't reachable).
        let mut info = None;
        let mut used_driver = candidates[0].name();
        for driver in &candidates {
            match driver.probe(&mut session, &driver_ctx).await {
                Ok(result) => {
                    used_driver = driver.name();
                    info = Some(result);
                    break;
                }
                Err(e) => {
                    warn!(ip = %ip_str, driver = driver.name(), error = %e, "driver probe failed, trying next candidate");
                    self.bus.log(&ctx.scan_id, LogLevel::Warn, format!("{ip_str}: driver '{}' failed: {e}", driver.name()));
                }
            }
        }

        let info = match info {
            Some(info) => info,
            None => {
                error!(ip = %ip_str, "every candidate driver failed");
                self.bus.log(&ctx.scan_id, LogLevel::Error, format!("{ip_str}: every candidate driver failed"));
                DeviceInfo::default()
            }
        };

        self.persist_device_with_info(
            ctx,
            &ip_str,
            known_mac,
            parent_interface_id,
            parent_via_interface,
            won_credential_id,
            Some(used_driver),
            info,
            true,
            open_ports,
        )
        .await
        })
    }

    /// Best-effort SNMP v2c identity enrichment (§2 auxiliary probes, §4.7):
    /// only attempted when port 161 was seen open, and a failure here is
    /// swallowed rather than affecting accessibility, since plenty of
    /// devices in this fleet run with SNMP disabled.
    async fn enrich_via_snmp(&self, ip_str: &str, open_ports: &[u16]) -> Option<snmp::SnmpIdentity> {
        if !open_ports.contains(&161) {
            return None;
        }
        let ip: IpAddr = ip_str.parse().ok()?;
        snmp::query_identity(ip, &self.config.snmp_community, self.config.snmp_timeout)
            .await
            .ok()
    }

    /// Persists a device for which no SSH session could be opened at all
    /// (no open management ports, no reachable path, or no working
    /// credential) as an inaccessible leaf, with whatever open ports and
    /// OUI/mDNS/SNMP enrichment is available (§4.5 step 2, §7).
    async fn persist_leaf(
        &self,
        ctx: &mut ScanContext,
        ip_str: &str,
        known_mac: Option<String>,
        parent_interface_id: Option<String>,
        parent_via_interface: Option<String>,
        open_ports: Vec<u16>,
    ) -> Result<()> {
        let mac = known_mac.unwrap_or_else(|| Device::synthetic_mac(ip_str));
        if ctx.visited.contains(&mac) {
            return Ok(());
        }
        ctx.visited.insert(mac.clone());

        let ip: Option<IpAddr> = ip_str.parse().ok();
        let snmp_identity = self.enrich_via_snmp(ip_str, &open_ports).await;
        let hostname = ip
            .and_then(|ip| ctx.mdns_hints.get(&ip).cloned())
            .or_else(|| snmp_identity.as_ref().and_then(|i| i.sys_name.clone()));
        let vendor = oui::vendor_name(&mac)
            .map(|v| v.to_string())
            .or_else(|| snmp_identity.as_ref().and_then(|i| i.sys_descr.clone()));

        let device = Device {
            primary_mac: mac.clone(),
            network_id: ctx.network.id.clone(),
            hostname,
            ip: ip_str.to_string(),
            vendor,
            model: None,
            serial: None,
            firmware_version: None,
            device_type: DeviceType::EndDevice.to_string(),
            accessible: false,
            open_ports: sqlx::types::Json(open_ports),
            driver: None,
            parent_interface_id,
            upstream_interface: parent_via_interface,
            comment: None,
            nomad: false,
            skip_login: false,
            user_type: None,
            asset_tag: None,
            location_id: None,
        };

        self.upsert_device_preserving(ctx, device).await?;
        self.store.replace_interfaces(&ctx.network.id, &mac, &[]).await?;
        Ok(())
    }

    /// Persists a device that *was* reached, classifies its type, resolves
    /// its upstream interface, replaces its interfaces wholesale, records
    /// the winning credential (if any), and recurses into its neighbors
    /// (§4.5 step 4).
    #[allow(clippy::too_many_arguments)]
    async fn persist_device_with_info(
        &self,
        ctx: &mut ScanContext,
        ip_str: &str,
        known_mac: Option<String>,
        parent_interface_id: Option<String>,
        parent_via_interface: Option<String>,
        won_credential_id: Option<String>,
        driver_name: Option<&str>,
        info: DeviceInfo,
        accessible: bool,
        open_ports: Vec<u16>,
    ) -> Result<()> {
        let mac = info
            .primary_mac
            .clone()
            .or(known_mac)
            .map(|m| canonical_mac(&m))
            .unwrap_or_else(|| Device::synthetic_mac(ip_str));

        if ctx.visited.contains(&mac) {
            return Ok(());
        }
        ctx.visited.insert(mac.clone());

        let own_upstream = resolve_upstream_interface(&info, ip_str, parent_via_interface.as_deref());
        let device_type = classify_device_type(&info, info.interfaces.len());

        let ip: Option<IpAddr> = ip_str.parse().ok();
        let snmp_identity = self.enrich_via_snmp(ip_str, &open_ports).await;
        let hostname = info
            .hostname
            .clone()
            .or_else(|| ip.and_then(|ip| ctx.mdns_hints.get(&ip).cloned()))
            .or_else(|| snmp_identity.as_ref().and_then(|i| i.sys_name.clone()));
        let vendor = info
            .vendor
            .clone()
            .or_else(|| snmp_identity.as_ref().and_then(|i| i.sys_descr.clone()));
        let model = info
            .model
            .clone()
            .or_else(|| snmp_identity.as_ref().and_then(|i| i.sys_descr.clone()));

        let device = Device {
            primary_mac: mac.clone(),
            network_id: ctx.network.id.clone(),
            hostname,
            ip: ip_str.to_string(),
            vendor,
            model,
            serial: info.serial.clone(),
            firmware_version: info.firmware_version.clone(),
            device_type: device_type.to_string(),
            accessible,
            open_ports: sqlx::types::Json(open_ports),
            driver: driver_name.map(|s| s.to_string()),
            parent_interface_id,
            upstream_interface: own_upstream.clone(),
            comment: None,
            nomad: false,
            skip_login: false,
            user_type: None,
            asset_tag: None,
            location_id: None,
        };

        self.upsert_device_preserving(ctx, device).await?;

        if let Some(credential_id) = &won_credential_id {
            self.store.record_matched_device(credential_id, &mac).await?;
        }

        let mut iface_name_to_id = HashMap::new();
        let mut interfaces = Vec::with_capacity(info.interfaces.len());
        for iface in &info.interfaces {
            let id = Uuid::new_v4().to_string();
            iface_name_to_id.insert(iface.name.clone(), id.clone());
            interfaces.push(Interface {
                id,
                device_mac: mac.clone(),
                network_id: ctx.network.id.clone(),
                name: iface.name.clone(),
                ip: iface.ip.clone(),
                bridge: iface.bridge.clone(),
                vlan: iface.vlan.as_ref().and_then(|v| v.to_wire_string()),
                poe_watts: iface.poe_watts,
                poe_standard: iface.poe_standard.clone(),
                link_up: iface.link_up,
                comment: iface.comment.clone(),
            });
        }
        self.store.replace_interfaces(&ctx.network.id, &mac, &interfaces).await?;

        ctx.dhcp_leases.extend(info.leases.iter().map(|l| DhcpLease {
            network_id: ctx.network.id.clone(),
            mac: canonical_mac(&l.mac),
            ip: l.ip.clone(),
            hostname: l.hostname.clone(),
        }));

        for neighbor in &info.neighbors {
            if ctx.abort.load(Ordering::SeqCst) {
                return Err(DiscoveryError::Aborted);
            }

            if let Some(own_up) = &own_upstream {
                if &neighbor.via_interface == own_up {
                    continue;
                }
            }

            let child_mac = neighbor.mac.as_deref().map(canonical_mac);
            if let Some(m) = &child_mac {
                if ctx.visited.contains(m) {
                    continue;
                }
            }

            let child_parent_iface_id = iface_name_to_id.get(&neighbor.via_interface).cloned();

            match neighbor.ip.as_ref().and_then(|s| s.parse::<IpAddr>().ok()) {
                Some(child_ip) => {
                    self.scan_device(ctx, child_ip, child_parent_iface_id, Some(neighbor.via_interface.clone()), child_mac)
                        .await?;
                }
                None => {
                    let leaf_mac = child_mac.unwrap_or_else(|| Device::synthetic_mac(&format!("{ip_str}-{}", neighbor.via_interface)));
                    if ctx.visited.contains(&leaf_mac) {
                        continue;
                    }
                    ctx.visited.insert(leaf_mac.clone());

                    let vendor = oui::vendor_name(&leaf_mac).map(|v| v.to_string());
                    let device = Device {
                        primary_mac: leaf_mac.clone(),
                        network_id: ctx.network.id.clone(),
                        hostname: None,
                        ip: String::new(),
                        vendor,
                        model: None,
                        serial: None,
                        firmware_version: None,
                        device_type: DeviceType::EndDevice.to_string(),
                        accessible: false,
                        open_ports: sqlx::types::Json(Vec::new()),
                        driver: None,
                        parent_interface_id: child_parent_iface_id,
                        upstream_interface: Some(neighbor.via_interface.clone()),
                        comment: None,
                        nomad: false,
                        skip_login: false,
                        user_type: None,
                        asset_tag: None,
                        location_id: None,
                    };
                    self.upsert_device_preserving(ctx, device).await?;
                    self.store.replace_interfaces(&ctx.network.id, &leaf_mac, &[]).await?;
                }
            }
        }

        Ok(())
    }

    /// Upserts a device, first copying over the user-managed fields of any
    /// existing row with the same MAC (§3, §8 property 2), then emits the
    /// incremental device-discovery event (§6).
    async fn upsert_device_preserving(&self, ctx: &mut ScanContext, mut device: Device) -> Result<()> {
        if let Some(existing) = self.store.get_device(&ctx.network.id, &device.primary_mac).await? {
            existing.preserve_user_fields(&mut device);
        }

        info!(scan_id = %ctx.scan_id, mac = %device.primary_mac, ip = %device.ip, accessible = device.accessible, "device discovered");
        self.bus.publish(EventKind::Device(DeviceEvent {
            scan_id: ctx.scan_id.clone(),
            mac: device.primary_mac.clone(),
            ip: device.ip.clone(),
            accessible: device.accessible,
        }));

        self.store.upsert_device(&device).await?;
        ctx.device_count += 1;
        Ok(())
    }
}

/// Upstream-interface resolution priority (§4.5 step 4): a driver-reported
/// interface wins outright; failing that, the interface whose IP matches
/// the address we connected to; failing that, the name of the interface
/// the parent reported us as a neighbor on.
fn resolve_upstream_interface(info: &DeviceInfo, connected_ip: &str, parent_via_interface: Option<&str>) -> Option<String> {
    if let Some(own) = &info.own_upstream_interface {
        return Some(own.clone());
    }
    if let Some(iface) = info.interfaces.iter().find(|i| i.ip.as_deref() == Some(connected_ip)) {
        return Some(iface.name.clone());
    }
    parent_via_interface.map(|s| s.to_string())
}

/// Device-type classification (§4.5 step 4): an explicit driver hint wins;
/// otherwise a `wlan*`-named interface marks an access point, more than
/// two wired interfaces marks a switch, and anything else is an end
/// device. Vendor/model hints (e.g. a Zyxel "GS" model line) are folded
/// into the driver's own `device_type_hint` rather than re-derived here.
fn classify_device_type(info: &DeviceInfo, interface_count: usize) -> DeviceType {
    if let Some(hint) = &info.device_type_hint {
        if let Ok(ty) = hint.parse::<DeviceType>() {
            return ty;
        }
    }

    let has_wlan = info.interfaces.iter().any(|i| i.name.to_lowercase().starts_with("wlan"));
    if has_wlan {
        return DeviceType::AccessPoint;
    }

    let wired_count = info.interfaces.iter().filter(|i| !i.name.to_lowercase().starts_with("wlan")).count();
    if wired_count > 2 || interface_count > 2 {
        return DeviceType::Switch;
    }

    DeviceType::EndDevice
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::InterfaceInfo;

    #[test]
    fn test_classify_uses_driver_hint() {
        let info = DeviceInfo {
            device_type_hint: Some("router".to_string()),
            ..Default::default()
        };
        assert_eq!(classify_device_type(&info, 0), DeviceType::Router);
    }

    #[test]
    fn test_classify_wlan_interface_is_access_point() {
        let info = DeviceInfo {
            interfaces: vec![InterfaceInfo { name: "wlan0".to_string(), ..Default::default() }],
            ..Default::default()
        };
        assert_eq!(classify_device_type(&info, 1), DeviceType::AccessPoint);
    }

    #[test]
    fn test_classify_many_wired_interfaces_is_switch() {
        let info = DeviceInfo {
            interfaces: vec![
                InterfaceInfo { name: "ether1".to_string(), ..Default::default() },
                InterfaceInfo { name: "ether2".to_string(), ..Default::default() },
                InterfaceInfo { name: "ether3".to_string(), ..Default::default() },
            ],
            ..Default::default()
        };
        assert_eq!(classify_device_type(&info, 3), DeviceType::Switch);
    }

    #[test]
    fn test_classify_default_is_end_device() {
        let info = DeviceInfo::default();
        assert_eq!(classify_device_type(&info, 0), DeviceType::EndDevice);
    }

    #[test]
    fn test_resolve_upstream_prefers_driver_reported() {
        let info = DeviceInfo {
            own_upstream_interface: Some("ether1".to_string()),
            ..Default::default()
        };
        assert_eq!(resolve_upstream_interface(&info, "10.0.0.5", Some("ether9")), Some("ether1".to_string()));
    }

    #[test]
    fn test_resolve_upstream_matches_connected_ip() {
        let info = DeviceInfo {
            interfaces: vec![InterfaceInfo { name: "ether2".to_string(), ip: Some("10.0.0.5".to_string()), ..Default::default() }],
            ..Default::default()
        };
        assert_eq!(resolve_upstream_interface(&info, "10.0.0.5", None), Some("ether2".to_string()));
    }

    #[test]
    fn test_resolve_upstream_falls_back_to_parent_hint() {
        let info = DeviceInfo::default();
        assert_eq!(resolve_upstream_interface(&info, "10.0.0.5", Some("ether3")), Some("ether3".to_string()));
    }
}
