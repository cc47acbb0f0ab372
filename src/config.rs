// Runtime configuration for the discovery engine (§6, §12)
//
// Layering: built-in defaults -> optional config.toml -> TOPOGRAPH_* env
// vars, environment wins. Mirrors the layered `config::Config` pattern used
// for network-management tooling elsewhere in the ecosystem rather than
// hand-rolled `std::env::var` parsing.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Path to the SQLite database file backing the persistence gateway.
    pub database_path: String,
    /// Outbound network interface to bind scanner sockets to, e.g. when the
    /// scanner host reaches target networks over a VPN tunnel interface.
    pub vpn_interface: Option<String>,
    /// Whether the mDNS sweep (§4.5 step 2) runs at all.
    pub mdns_enabled: bool,
    /// SNMP v2c community string used by the 3Com driver and the auxiliary
    /// SNMP probe.
    pub snmp_community: String,
    /// Maximum number of scans that may run concurrently across networks.
    pub scan_concurrency: usize,
    #[serde(with = "duration_millis")]
    pub tcp_connect_timeout: Duration,
    #[serde(with = "duration_millis")]
    pub ssh_connect_timeout: Duration,
    #[serde(with = "duration_millis")]
    pub ssh_exec_timeout: Duration,
    #[serde(with = "duration_millis")]
    pub ssh_shell_command_timeout: Duration,
    #[serde(with = "duration_millis")]
    pub mdns_budget: Duration,
    /// Per-request timeout for the auxiliary SNMP v2c identity probe
    /// (§4.5 step 2 enrichment, §5).
    #[serde(with = "duration_millis")]
    pub snmp_timeout: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: "topograph.db".to_string(),
            vpn_interface: None,
            mdns_enabled: true,
            snmp_community: "public".to_string(),
            scan_concurrency: 4,
            tcp_connect_timeout: Duration::from_secs(3),
            ssh_connect_timeout: Duration::from_secs(15),
            ssh_exec_timeout: Duration::from_secs(10),
            ssh_shell_command_timeout: Duration::from_secs(45),
            mdns_budget: Duration::from_secs(5),
            snmp_timeout: Duration::from_secs(3),
        }
    }
}

impl AppConfig {
    /// Loads configuration from built-in defaults, an optional
    /// `config.toml` in the working directory, and `TOPOGRAPH_`-prefixed
    /// environment variables (e.g. `TOPOGRAPH_DATABASE_PATH`).
    pub fn load() -> Result<Self> {
        let defaults = AppConfig::default();
        let builder = config::Config::builder()
            .set_default("database_path", defaults.database_path.clone())?
            .set_default("vpn_interface", None::<String>)?
            .set_default("mdns_enabled", defaults.mdns_enabled)?
            .set_default("snmp_community", defaults.snmp_community.clone())?
            .set_default("scan_concurrency", defaults.scan_concurrency as i64)?
            .set_default(
                "tcp_connect_timeout",
                defaults.tcp_connect_timeout.as_millis() as i64,
            )?
            .set_default(
                "ssh_connect_timeout",
                defaults.ssh_connect_timeout.as_millis() as i64,
            )?
            .set_default(
                "ssh_exec_timeout",
                defaults.ssh_exec_timeout.as_millis() as i64,
            )?
            .set_default(
                "ssh_shell_command_timeout",
                defaults.ssh_shell_command_timeout.as_millis() as i64,
            )?
            .set_default("mdns_budget", defaults.mdns_budget.as_millis() as i64)?
            .set_default("snmp_timeout", defaults.snmp_timeout.as_millis() as i64)?
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::with_prefix("TOPOGRAPH"));

        builder
            .build()
            .context("failed to build configuration")?
            .try_deserialize()
            .context("failed to deserialize configuration")
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(d)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.snmp_community, "public");
        assert_eq!(cfg.scan_concurrency, 4);
        assert!(cfg.mdns_enabled);
        assert_eq!(cfg.tcp_connect_timeout, Duration::from_secs(3));
    }
}
