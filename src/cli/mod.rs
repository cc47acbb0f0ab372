//! CLI surface (§12).
//!
//! The HTTP/WebSocket layer of §6 is an external collaborator this
//! repository does not ship; this `clap`-derived binary is the first real
//! consumer of the core's public contract instead, built on
//! `ScannerHandle`, `Store`, `topology::build_forest`, and `badges::{layout,
//! render}` directly. `scan run` mirrors `POST /scan/{network}/start`; a
//! Ctrl-C during `scan run` mirrors `POST /scan/{network}/stop` — both the
//! start and the cooperative abort happen against the same in-process
//! `ScannerHandle`, since (unlike the HTTP/WS layer it stands in for) each
//! CLI invocation is its own process with no channel back into a scan
//! started by a *different* invocation. `topology show` mirrors
//! `GET /scan/{network}/topology`.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use uuid::Uuid;

use crate::badges;
use crate::config::AppConfig;
use crate::events::EventKind;
use crate::model::credential::Credential;
use crate::model::floorplan::{Floorplan, Location, LocationPolygon};
use crate::model::network::Network;
use crate::model::scan::LogLevel;
use crate::persistence::Store;
use crate::scanner::ScannerHandle;
use crate::topology::{self, TopologyNode};

#[derive(Parser)]
#[command(name = "topograph")]
#[command(author = "Topograph Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Recursive enterprise network topology discovery engine", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage `Network` rows (root IP, root credential, name).
    Network {
        #[command(subcommand)]
        action: NetworkAction,
    },
    /// Manage global/network-scoped `Credential` rows.
    Credential {
        #[command(subcommand)]
        action: CredentialAction,
    },
    /// Run a scan to completion (Ctrl-C aborts it cooperatively).
    Scan {
        #[command(subcommand)]
        action: ScanAction,
    },
    /// Show the assembled topology forest for a network.
    Topology {
        network: String,
        #[arg(long, help = "Print as JSON instead of an indented tree")]
        json: bool,
    },
    /// Render device badges onto a floorplan PDF.
    Badges {
        #[command(subcommand)]
        action: BadgesAction,
    },
}

#[derive(Subcommand)]
pub enum NetworkAction {
    Add {
        name: String,
        root_ip: String,
        #[arg(long)]
        username: String,
        #[arg(long)]
        password: String,
    },
    List,
    Rm {
        id: String,
    },
}

#[derive(Subcommand)]
pub enum CredentialAction {
    Add {
        username: String,
        password: String,
        #[arg(long, help = "Scope this credential to one network; omit for global")]
        network: Option<String>,
    },
    List {
        #[arg(long)]
        network: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum ScanAction {
    /// Runs one scan to completion, rendering the event bus as live
    /// progress. Ctrl-C requests a cooperative abort (§5) of this same
    /// scan; there is no separate `watch`/`abort` subcommand because a
    /// second `topograph` invocation has no process-local handle back to
    /// a scan started by this one (that cross-process reach is exactly
    /// what the HTTP/WebSocket layer of §6 is for).
    Run { network: String },
}

#[derive(Subcommand)]
pub enum BadgesAction {
    Render {
        network: String,
        floorplan: String,
        out: String,
        #[arg(long, default_value_t = 612.0, help = "Page width in PDF points")]
        page_width: f64,
        #[arg(long, default_value_t = 792.0, help = "Page height in PDF points")]
        page_height: f64,
    },
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load().context("loading configuration")?;
    let store = Store::connect(&config.database_path)
        .await
        .context("connecting to the persistence gateway")?;

    // §3 lifetime rules: a server restart while a scan was "running" is
    // detected at the next status-bearing entry point and force-failed.
    store.fail_stale_running_scans().await.context("reconciling stale scan state")?;

    match cli.command {
        Commands::Network { action } => run_network(&store, action).await,
        Commands::Credential { action } => run_credential(&store, action).await,
        Commands::Scan { action } => run_scan(&store, config, action).await,
        Commands::Topology { network, json } => run_topology(&store, &network, json).await,
        Commands::Badges { action } => run_badges(&store, action).await,
    }
}

async fn run_network(store: &Store, action: NetworkAction) -> Result<()> {
    match action {
        NetworkAction::Add { name, root_ip, username, password } => {
            let network = Network::new(Uuid::new_v4().to_string(), name, root_ip, username, password);
            store.upsert_network(&network).await?;
            println!("{} network {} ({})", "created".green(), network.name, network.id);
        }
        NetworkAction::List => {
            for network in store.list_networks().await? {
                let status = if network.is_online { "online".green() } else { "offline".red() };
                println!(
                    "{}  {:<20} root={:<16} devices={:<4} {}",
                    network.id, network.name, network.root_ip, network.device_count, status
                );
            }
        }
        NetworkAction::Rm { id } => {
            store.delete_network(&id).await?;
            println!("{} network {id}", "removed".yellow());
        }
    }
    Ok(())
}

async fn run_credential(store: &Store, action: CredentialAction) -> Result<()> {
    match action {
        CredentialAction::Add { username, password, network } => {
            let credential = Credential {
                id: Uuid::new_v4().to_string(),
                network_id: network,
                username,
                password,
            };
            store.upsert_credential(&credential).await?;
            println!("{} credential {} ({})", "created".green(), credential.username, credential.id);
        }
        CredentialAction::List { network } => {
            for credential in store.list_credentials(network.as_deref()).await? {
                let scope = credential.network_id.as_deref().unwrap_or("global");
                println!("{}  {:<16} scope={scope}", credential.id, credential.username);
            }
        }
    }
    Ok(())
}

async fn resolve_network_id(store: &Store, network: &str) -> Result<String> {
    if store.get_network(network).await?.is_some() {
        return Ok(network.to_string());
    }
    for candidate in store.list_networks().await? {
        if candidate.name == network {
            return Ok(candidate.id);
        }
    }
    bail!("no network named or with id '{network}'")
}

async fn run_scan(store: &Store, config: AppConfig, action: ScanAction) -> Result<()> {
    let bus = crate::events::EventBus::new();
    let scanner = ScannerHandle::new(store.clone(), bus.clone(), config);

    match action {
        ScanAction::Run { network } => {
            let network_id = resolve_network_id(store, &network).await?;
            let subscription = bus.subscribe();
            let scan_id = scanner.start(&network_id).await?;
            println!("{} scan {scan_id} for network {network_id}", "started".green());
            render_until_terminal(&scanner, &network_id, &subscription, &scan_id).await?;
        }
    }
    Ok(())
}

/// Drains the event bus, rendering each event, until the scan reaches a
/// terminal status (completed/failed) or the operator hits Ctrl-C — which
/// flips the same in-process `ScannerHandle`'s abort flag (§5), mirroring
/// what a separate `POST /scan/{network}/stop` call would do against a
/// long-running server.
async fn render_until_terminal(
    scanner: &ScannerHandle,
    network_id: &str,
    subscription: &crate::events::Subscription,
    scan_id: &str,
) -> Result<()> {
    loop {
        let mut terminal = false;
        for event in subscription.drain() {
            if let EventKind::Status(s) = &event {
                if s.scan_id == scan_id && (s.status == "completed" || s.status == "failed") {
                    terminal = true;
                }
            }
            render_event(&event);
        }
        if terminal {
            break;
        }
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(150)) => {}
            result = tokio::signal::ctrl_c() => {
                result.context("installing ctrl-c handler")?;
                println!("{} scan {scan_id}", "abort requested (ctrl-c)".yellow());
                scanner.abort(network_id)?;
            }
        }
    }
    Ok(())
}

fn render_event(event: &EventKind) {
    match event {
        EventKind::Log(log) => {
            let level = match log.level {
                LogLevel::Info => "info".normal(),
                LogLevel::Success => "ok".green(),
                LogLevel::Warn => "warn".yellow(),
                LogLevel::Error => "error".red(),
            };
            println!("[{level}] {}", log.message);
        }
        EventKind::Device(device) => {
            let accessible = if device.accessible { "up".green() } else { "down".red() };
            println!("  {} {} {}", device.mac.cyan(), device.ip, accessible);
        }
        EventKind::Topology(topo) => {
            println!("{} topology updated: {} devices", "~".blue(), topo.device_count);
        }
        EventKind::Status(status) => {
            println!("{} scan {} -> {}", "*".bold(), status.scan_id, status.status);
        }
    }
}

async fn run_topology(store: &Store, network: &str, json: bool) -> Result<()> {
    let network_id = resolve_network_id(store, network).await?;
    let forest = topology::build_forest(store, &network_id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&forest)?);
    } else {
        for root in &forest {
            print_tree(root, 0);
        }
    }
    Ok(())
}

fn print_tree(node: &TopologyNode, depth: usize) {
    let indent = "  ".repeat(depth);
    match &node.device {
        Some(device) => {
            let label = device.hostname.clone().unwrap_or_else(|| device.primary_mac.clone());
            let via = node.via_interface.as_deref().map(|i| format!(" via {i}")).unwrap_or_default();
            println!("{indent}{} [{}] {}{via}", label, device.effective_type(), device.ip);
        }
        None => {
            println!("{indent}({})", node.synthetic_label.as_deref().unwrap_or("unknown"));
        }
    }
    for child in &node.children {
        print_tree(child, depth + 1);
    }
}

async fn run_badges(store: &Store, action: BadgesAction) -> Result<()> {
    match action {
        BadgesAction::Render { network, floorplan, out, page_width, page_height } => {
            let network_id = resolve_network_id(store, &network).await?;
            let floorplan_record = find_or_register_floorplan(store, &network_id, &floorplan).await?;
            let locations = store.list_locations(&network_id).await?;
            let polygons = store.list_location_polygons(&floorplan_record.id).await?;

            // §4.8 "deterministic for a given polygon/device list (sort by
            // centroid-Y first, stable tie-break by location ID)".
            let mut ordered: Vec<(Location, LocationPolygon)> = polygons
                .into_iter()
                .filter_map(|polygon| {
                    locations
                        .iter()
                        .find(|l| l.id == polygon.location_id)
                        .cloned()
                        .map(|location| (location, polygon))
                })
                .collect();
            ordered.sort_by(|(a_loc, a_poly), (b_loc, b_poly)| {
                a_poly
                    .centroid()
                    .y
                    .partial_cmp(&b_poly.centroid().y)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a_loc.id.cmp(&b_loc.id))
            });

            let mut layouts = Vec::with_capacity(ordered.len());
            for (index, (location, polygon)) in ordered.into_iter().enumerate() {
                let devices = store.list_devices_by_location(&network_id, &location.id).await?;
                let stack_down = index % 2 == 0;
                let placed = badges::layout(&polygon, &devices, stack_down, page_width, page_height);
                layouts.push(badges::LocationLayout { polygon, label: location.name, badges: placed });
            }

            badges::render(&floorplan, &out, page_width, page_height, &layouts)?;
            println!("{} {out}", "wrote".green());
        }
    }
    Ok(())
}

/// Finds the `Floorplan` row backing `source_path`, registering a new one
/// against `network_id` if this is the first time it's referenced. Keeps
/// `badges render` usable without a separate `floorplan add` step, since
/// floorplan CRUD belongs to the external collaborators of §1.
async fn find_or_register_floorplan(store: &Store, network_id: &str, source_path: &str) -> Result<Floorplan> {
    for floorplan in store.list_floorplans(network_id).await? {
        if floorplan.source_path == source_path {
            return Ok(floorplan);
        }
    }
    let floorplan = Floorplan {
        id: Uuid::new_v4().to_string(),
        network_id: network_id.to_string(),
        name: source_path.to_string(),
        source_path: source_path.to_string(),
    };
    store.upsert_floorplan(&floorplan).await?;
    Ok(floorplan)
}
