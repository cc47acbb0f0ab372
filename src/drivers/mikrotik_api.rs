// MikroTik RouterOS API driver (§4.2, §4.5).
//
// Preferred over `mikrotik_cli` when the API port is open: a binary,
// length-prefixed sentence protocol that avoids prompt/pagination parsing
// entirely. Falls through to the CLI driver (by registry order) if the
// API port is closed or the handshake fails — this driver's `probe`
// returns an error in that case rather than panicking, and the
// orchestrator treats a driver error as "try the next one".

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::error::{DiscoveryError, Result};
use crate::model::device::OuiHint;
use crate::net::ssh::SshSession;

use super::{DeviceInfo, DriverContext, InterfaceInfo, LeaseInfo, Neighbor, VendorDriver};

pub struct MikrotikApiDriver;

#[async_trait]
impl VendorDriver for MikrotikApiDriver {
    fn name(&self) -> &'static str {
        "mikrotik-api"
    }

    fn claims(&self, oui_hint: OuiHint, banner: Option<&str>) -> bool {
        super::claims_via_oui_or_banner(oui_hint, banner, OuiHint::Mikrotik)
    }

    /// Ignores the SSH session entirely — the API talks its own binary
    /// protocol over `ctx.api_port`. The orchestrator only calls this
    /// driver after a credential has already authenticated via SSH against
    /// the same device, and hands that (username, password) pair through
    /// `DriverContext` for a plaintext `/login` sentence (RouterOS 6.43+)
    /// before any other command — every command before login returns
    /// `!trap` otherwise.
    async fn probe(&self, _session: &mut SshSession, ctx: &DriverContext) -> Result<DeviceInfo> {
        let addr = format!("{}:{}", ctx.ip, ctx.api_port);
        let stream = timeout(ctx.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| api_error(&ctx.ip, "connect timed out"))?
            .map_err(|e| api_error(&ctx.ip, &e.to_string()))?;

        let mut client = ApiClient::new(stream, ctx.ip.clone());
        client.login(&ctx.username, &ctx.password).await?;

        let identity = client.query("/system/identity/print", &[]).await?;
        let resource = client.query("/system/resource/print", &[]).await?;
        let routerboard = client.query("/system/routerboard/print", &[]).await?;
        let addresses = client.query("/ip/address/print", &[]).await?;
        let interfaces = client.query("/interface/print", &[]).await?;
        let leases = client.query("/ip/dhcp-server/lease/print", &[]).await?;
        let arp = client.query("/ip/arp/print", &[]).await?;

        let hostname = identity.first().and_then(|r| r.get("name")).cloned();
        let firmware_version = resource.first().and_then(|r| r.get("version")).cloned();
        let model = routerboard.first().and_then(|r| r.get("board-name")).cloned();
        let serial = routerboard.first().and_then(|r| r.get("serial-number")).cloned();

        let addr_by_iface: HashMap<String, String> = addresses
            .iter()
            .filter_map(|r| Some((r.get("interface")?.clone(), r.get("address")?.clone())))
            .collect();

        Ok(DeviceInfo {
            primary_mac: None,
            hostname,
            vendor: Some("MikroTik".to_string()),
            model,
            serial,
            firmware_version,
            device_type_hint: Some("router".to_string()),
            interfaces: interfaces
                .into_iter()
                .map(|r| {
                    let name = r.get("name").cloned().unwrap_or_default();
                    InterfaceInfo {
                        ip: addr_by_iface.get(&name).cloned(),
                        link_up: r.get("running").map(|v| v == "true").unwrap_or(true),
                        comment: r.get("comment").cloned(),
                        name,
                        ..Default::default()
                    }
                })
                .collect(),
            neighbors: arp
                .into_iter()
                .map(|r| Neighbor {
                    mac: r.get("mac-address").cloned(),
                    ip: r.get("address").cloned(),
                    via_interface: r.get("interface").cloned().unwrap_or_default(),
                })
                .collect(),
            leases: leases
                .into_iter()
                .filter_map(|r| {
                    Some(LeaseInfo {
                        mac: r.get("mac-address")?.clone(),
                        ip: r.get("address")?.clone(),
                        hostname: r.get("host-name").cloned(),
                    })
                })
                .collect(),
            own_upstream_interface: None,
        })
    }
}

fn api_error(host: &str, reason: &str) -> DiscoveryError {
    DiscoveryError::Transient {
        host: host.to_string(),
        operation: "mikrotik-api".into(),
        reason: reason.to_string(),
    }
}

/// Thin wrapper around RouterOS's length-prefixed word protocol. Only the
/// read path needed for `print` queries is implemented; writes always send
/// complete sentences in one `write_all` call.
struct ApiClient {
    stream: TcpStream,
    host: String,
}

impl ApiClient {
    fn new(stream: TcpStream, host: String) -> Self {
        Self { stream, host }
    }

    async fn write_sentence(&mut self, words: &[&str]) -> Result<()> {
        let mut buf = Vec::new();
        for word in words {
            encode_word(word, &mut buf);
        }
        buf.push(0); // zero-length word terminates the sentence
        self.stream
            .write_all(&buf)
            .await
            .map_err(|e| api_error(&self.host, &e.to_string()))
    }

    async fn read_sentence(&mut self) -> Result<Vec<String>> {
        let mut words = Vec::new();
        loop {
            let len = self.read_length().await?;
            if len == 0 {
                return Ok(words);
            }
            let mut buf = vec![0u8; len];
            self.stream
                .read_exact(&mut buf)
                .await
                .map_err(|e| api_error(&self.host, &e.to_string()))?;
            words.push(String::from_utf8_lossy(&buf).into_owned());
        }
    }

    async fn read_length(&mut self) -> Result<usize> {
        let mut first = [0u8; 1];
        self.stream
            .read_exact(&mut first)
            .await
            .map_err(|e| api_error(&self.host, &e.to_string()))?;
        let b0 = first[0];

        if b0 & 0x80 == 0 {
            Ok(b0 as usize)
        } else if b0 & 0xC0 == 0x80 {
            let mut rest = [0u8; 1];
            self.stream.read_exact(&mut rest).await.ok();
            Ok((((b0 & 0x3F) as usize) << 8) | rest[0] as usize)
        } else {
            // Lengths beyond 14 bits are vanishingly rare for the record
            // sizes these queries return; treat as protocol desync.
            Err(api_error(&self.host, "unsupported API length prefix"))
        }
    }

    /// Sends the RouterOS 6.43+ plaintext `/login` sentence and waits for
    /// `!done`. Must be the first sentence on the connection — every other
    /// command returns `!trap` ("invalid user name or password") until a
    /// login succeeds.
    async fn login(&mut self, username: &str, password: &str) -> Result<()> {
        let name_arg = format!("=name={username}");
        let password_arg = format!("=password={password}");
        self.write_sentence(&["/login", &name_arg, &password_arg]).await?;

        let sentence = self.read_sentence().await?;
        match sentence.first().map(|s| s.as_str()) {
            Some("!done") => Ok(()),
            Some("!trap") | Some("!fatal") => Err(api_error(&self.host, "login rejected")),
            _ => Err(api_error(&self.host, "unexpected reply to /login")),
        }
    }

    /// Issues a query command and collects every `!re` reply row until the
    /// terminating `!done`, returning each row as an attribute map.
    async fn query(&mut self, command: &str, args: &[&str]) -> Result<Vec<HashMap<String, String>>> {
        let mut words = vec![command];
        words.extend_from_slice(args);
        self.write_sentence(&words).await?;

        let mut rows = Vec::new();
        loop {
            let sentence = self.read_sentence().await?;
            match sentence.first().map(|s| s.as_str()) {
                Some("!done") => return Ok(rows),
                Some("!trap") | Some("!fatal") => {
                    return Err(api_error(&self.host, "device returned an API error"))
                }
                Some("!re") => {
                    let row = sentence[1..]
                        .iter()
                        .filter_map(|w| w.strip_prefix('=').and_then(|rest| rest.split_once('=')))
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect();
                    rows.push(row);
                }
                _ => {}
            }
        }
    }
}

fn encode_word(word: &str, out: &mut Vec<u8>) {
    let bytes = word.as_bytes();
    let len = bytes.len();
    if len < 0x80 {
        out.push(len as u8);
    } else {
        out.push(0x80 | ((len >> 8) as u8 & 0x3F));
        out.push((len & 0xFF) as u8);
    }
    out.extend_from_slice(bytes);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_word_short() {
        let mut buf = Vec::new();
        encode_word("hi", &mut buf);
        assert_eq!(buf, vec![2, b'h', b'i']);
    }

    #[test]
    fn test_claims_mikrotik() {
        let driver = MikrotikApiDriver;
        assert!(driver.claims(OuiHint::Mikrotik, None));
        assert!(!driver.claims(OuiHint::Ruckus, None));
    }
}
