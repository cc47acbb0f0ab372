// SSH connector (§4.2)
//
// Wraps direct and tunneled SSH session establishment, credential rotation
// with retry, and exec/shell channel selection. Built on `russh` (pure Rust,
// async, and — unlike the higher-level `async-ssh2-tokio` wrapper some
// sibling tools in this space use — exposes `channel_open_direct_tcpip`
// directly, which the jump-host manager needs).

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use russh::client::{self, Handle};
use russh::{ChannelMsg, Preferred};
use tokio::time::timeout;

use crate::error::{DiscoveryError, Result};

/// Legacy key-exchange algorithms accepted in addition to modern defaults,
/// since target devices are frequently a decade or more old (§4.2).
fn legacy_preferred() -> Preferred {
    let mut preferred = Preferred::default();
    let mut kex = preferred.kex.to_vec();
    kex.extend([
        russh::kex::DH_G14_SHA1,
        russh::kex::DH_G1_SHA1,
        russh::kex::CURVE25519,
    ]);
    preferred.kex = kex.into();
    preferred
}

struct AcceptAllKeys;

#[async_trait::async_trait]
impl client::Handler for AcceptAllKeys {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh_keys::key::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        // Target devices hold self-signed/unknown host keys; we are reading
        // read-only inventory data, not trusting a remote shell session with
        // secrets, so we accept any host key (mirrors the "HTTPS with cert
        // verification disabled" stance the spec takes for device web UIs).
        Ok(true)
    }
}

/// An established SSH session plus the banner the server presented, used
/// for vendor pre-classification before any command is issued (§4.5).
pub struct SshSession {
    pub handle: Handle<AcceptAllKeys>,
    pub banner: Option<String>,
    /// The credential that authenticated this session, kept around for
    /// drivers that need to re-present it to a second protocol on the same
    /// device (e.g. the Zyxel HTTP serial-number fallback, §4.4).
    pub authenticated_username: Option<String>,
    pub authenticated_password: Option<String>,
}

/// `connect(ip, user, password, port=22, timeout=15s) -> session | nil`
/// (§4.2). Retries up to 3 times with a 500ms gap; returns `None` rather
/// than erroring when every attempt fails, since a failed connect is a
/// routine "not accessible" outcome, not an exceptional one.
pub async fn connect(
    ip: &str,
    user: &str,
    password: &str,
    port: u16,
    connect_timeout: Duration,
) -> Option<SshSession> {
    let config = Arc::new(client::Config {
        preferred: legacy_preferred(),
        ..Default::default()
    });

    for attempt in 0..3 {
        if attempt > 0 {
            tokio::time::sleep(Duration::from_millis(500)).await;
        }

        let addr = format!("{ip}:{port}");
        let connected = timeout(
            connect_timeout,
            client::connect(config.clone(), addr, AcceptAllKeys),
        )
        .await;

        let mut handle = match connected {
            Ok(Ok(handle)) => handle,
            _ => continue,
        };

        let banner = handle.banner().map(|s| s.to_string());

        match handle.authenticate_password(user, password).await {
            Ok(true) => {
                return Some(SshSession {
                    handle,
                    banner,
                    authenticated_username: Some(user.to_string()),
                    authenticated_password: Some(password.to_string()),
                })
            }
            _ => continue,
        }
    }

    None
}

/// Same as `connect`, but over an already-open byte stream rather than a
/// fresh TCP dial — used when the target is only reachable through the
/// jump host's `direct-tcpip` tunnel (§4.3). No retry loop here: the
/// tunnel itself is the thing worth retrying, not the SSH handshake on
/// top of it, so a single attempt is made and failures surface directly.
pub async fn connect_over_stream<S>(
    stream: S,
    user: &str,
    password: &str,
    connect_timeout: Duration,
) -> Result<SshSession>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let config = Arc::new(client::Config {
        preferred: legacy_preferred(),
        ..Default::default()
    });

    let mut handle = timeout(
        connect_timeout,
        client::connect_stream(config, stream, AcceptAllKeys),
    )
    .await
    .map_err(|_| DiscoveryError::Transient {
        host: String::new(),
        operation: "ssh-tunnel-connect".into(),
        reason: "handshake timed out".into(),
    })?
    .map_err(|e| DiscoveryError::Transient {
        host: String::new(),
        operation: "ssh-tunnel-connect".into(),
        reason: e.to_string(),
    })?;

    let banner = handle.banner().map(|s| s.to_string());

    match handle.authenticate_password(user, password).await {
        Ok(true) => Ok(SshSession {
            handle,
            banner,
            authenticated_username: Some(user.to_string()),
            authenticated_password: Some(password.to_string()),
        }),
        Ok(false) => Err(DiscoveryError::AuthExhausted {
            host: String::new(),
            attempted: 1,
        }),
        Err(e) => Err(DiscoveryError::Transient {
            host: String::new(),
            operation: "ssh-tunnel-auth".into(),
            reason: e.to_string(),
        }),
    }
}

/// One command issued on its own channel, stdout+stderr concatenated,
/// closing on remote EOF (§4.2 exec mode).
pub async fn exec(session: &mut SshSession, command: &str, exec_timeout: Duration) -> Result<String> {
    let run = async {
        let mut channel = session
            .handle
            .channel_open_session()
            .await
            .map_err(|e| DiscoveryError::Transient {
                host: String::new(),
                operation: "ssh-channel-open".into(),
                reason: e.to_string(),
            })?;

        channel
            .exec(true, command)
            .await
            .map_err(|e| DiscoveryError::Transient {
                host: String::new(),
                operation: "ssh-exec".into(),
                reason: e.to_string(),
            })?;

        let mut output = Vec::new();
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { ref data } | ChannelMsg::ExtendedData { ref data, .. } => {
                    output.extend_from_slice(data);
                }
                ChannelMsg::Eof | ChannelMsg::Close => break,
                _ => {}
            }
        }

        Ok(String::from_utf8_lossy(&output).into_owned())
    };

    timeout(exec_timeout, run).await.map_err(|_| DiscoveryError::Transient {
        host: String::new(),
        operation: "ssh-exec".into(),
        reason: "timed out".into(),
    })?
}

/// Per-vendor shell decoding profile (§4.2, §9 shell prompt state machine):
/// a prompt regex, an optional pagination prompt + response bytes to send
/// when seen, and whether the `enable` preamble is required.
pub struct ShellProfile {
    pub prompt: Regex,
    pub pagination: Option<Regex>,
    pub pagination_response: &'static [u8],
    pub enable_preamble: bool,
}

static MIKROTIK_PROMPT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)\][\w.-]*>\s*$").unwrap());
static ZYXEL_3COM_PROMPT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)[\w.-]+#\s*$").unwrap());
static RUCKUS_PROMPT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)[\w.-]+[>#]\s*$").unwrap());
static MORE_PAGINATION: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)--\s*more\s*--").unwrap());

pub fn mikrotik_profile() -> ShellProfile {
    ShellProfile {
        prompt: MIKROTIK_PROMPT.clone(),
        pagination: None,
        pagination_response: b"",
        enable_preamble: false,
    }
}

pub fn zyxel_threecom_profile() -> ShellProfile {
    ShellProfile {
        prompt: ZYXEL_3COM_PROMPT.clone(),
        pagination: Some(MORE_PAGINATION.clone()),
        pagination_response: b" ",
        enable_preamble: false,
    }
}

pub fn ruckus_profile() -> ShellProfile {
    ShellProfile {
        prompt: RUCKUS_PROMPT.clone(),
        pagination: Some(MORE_PAGINATION.clone()),
        pagination_response: b" ",
        enable_preamble: true,
    }
}

/// Strips ANSI CSI sequences, VT100 two-byte escapes, carriage returns, and
/// standalone "7" cursor-save artifacts some devices emit mid-stream
/// (§4.2). Applied to every chunk before prompt/pagination matching.
pub fn strip_ansi(input: &str) -> String {
    static CSI: Lazy<Regex> = Lazy::new(|| Regex::new(r"\x1b\[[0-9;?]*[A-Za-z]").unwrap());
    static TWO_BYTE_ESCAPE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\x1b[()][A-Za-z0-9]").unwrap());
    static STANDALONE_SEVEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\x1b7").unwrap());

    let no_csi = CSI.replace_all(input, "");
    let no_twobyte = TWO_BYTE_ESCAPE.replace_all(&no_csi, "");
    let no_seven = STANDALONE_SEVEN.replace_all(&no_twobyte, "");
    no_seven.replace('\r', "")
}

/// Runs a scripted command sequence over a PTY (§4.2 shell mode). Falls
/// back from PTY-open to a plain shell channel after 10s of silence and
/// gives up (returning whatever output was collected) after 20s total, per
/// the shell-open fallback timeline in §4.2/§5.
pub async fn shell(
    session: &mut SshSession,
    profile: &ShellProfile,
    commands: &[&str],
    per_command_timeout: Duration,
) -> Result<Vec<String>> {
    let mut channel = session
        .handle
        .channel_open_session()
        .await
        .map_err(|e| DiscoveryError::Transient {
            host: String::new(),
            operation: "ssh-channel-open".into(),
            reason: e.to_string(),
        })?;

    let pty_opened = timeout(
        Duration::from_secs(10),
        channel.request_pty(false, "vt100", 132, 24, 0, 0, &[]),
    )
    .await;

    if pty_opened.is_err() || matches!(pty_opened, Ok(Err(_))) {
        // Silence on PTY-open: fall back to a plain (non-PTY) shell channel.
    }

    channel
        .request_shell(true)
        .await
        .map_err(|e| DiscoveryError::Transient {
            host: String::new(),
            operation: "ssh-shell-open".into(),
            reason: e.to_string(),
        })?;

    let mut results = Vec::with_capacity(commands.len());
    let mut pending: VecDeque<&str> = commands.iter().copied().collect();
    let mut buffer = String::new();
    let overall = timeout(Duration::from_secs(20), async {
        while let Some(cmd) = pending.pop_front() {
            channel
                .data(format!("{cmd}\n").as_bytes())
                .await
                .map_err(|e| DiscoveryError::Transient {
                    host: String::new(),
                    operation: "ssh-shell-write".into(),
                    reason: e.to_string(),
                })?;

            let captured = read_until_prompt(&mut channel, profile, per_command_timeout).await?;
            buffer.push_str(&captured);
            results.push(strip_echoed_command(&captured, cmd, profile));
        }
        Ok::<(), DiscoveryError>(())
    })
    .await;

    match overall {
        Ok(Ok(())) => Ok(results),
        _ => Ok(results),
    }
}

async fn read_until_prompt(
    channel: &mut russh::Channel<client::Msg>,
    profile: &ShellProfile,
    per_command_timeout: Duration,
) -> Result<String> {
    let mut accumulated = String::new();

    let read_loop = async {
        loop {
            let msg = channel.wait().await;
            match msg {
                Some(ChannelMsg::Data { ref data }) => {
                    accumulated.push_str(&String::from_utf8_lossy(data));
                    let clean = strip_ansi(&accumulated);

                    if let Some(pagination) = &profile.pagination {
                        if pagination.is_match(&clean) {
                            channel
                                .data(profile.pagination_response)
                                .await
                                .map_err(|e| DiscoveryError::Transient {
                                    host: String::new(),
                                    operation: "ssh-shell-pagination".into(),
                                    reason: e.to_string(),
                                })?;
                            continue;
                        }
                    }

                    if profile.prompt.is_match(&clean) {
                        return Ok(clean);
                    }
                }
                Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => {
                    return Ok(strip_ansi(&accumulated));
                }
                _ => {}
            }
        }
    };

    match timeout(per_command_timeout, read_loop).await {
        Ok(result) => result,
        Err(_) => Ok(strip_ansi(&accumulated)),
    }
}

/// Slices the command output between the echoed command and the next
/// prompt (§4.2, §8 property 10: shell-prompt decoder) — trims both the
/// echoed command at the front and the trailing prompt line `read_until_prompt`
/// leaves at the end, since that match is what ends the read in the first
/// place.
fn strip_echoed_command(captured: &str, command: &str, profile: &ShellProfile) -> String {
    let after_command = match captured.find(command) {
        Some(idx) => &captured[idx + command.len()..],
        None => captured,
    };
    let after_command = after_command.trim_start_matches('\n');

    let without_prompt = match profile.prompt.find_iter(after_command).last() {
        Some(m) => &after_command[..m.start()],
        None => after_command,
    };

    without_prompt.trim_end_matches('\n').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_ansi_removes_csi_and_cr() {
        let input = "\x1b[2Jhello\r\nworld\x1b7";
        assert_eq!(strip_ansi(input), "hello\nworld");
    }

    #[test]
    fn test_mikrotik_prompt_matches() {
        let profile = mikrotik_profile();
        assert!(profile.prompt.is_match("[admin@MikroTik] >"));
    }

    #[test]
    fn test_zyxel_prompt_matches() {
        let profile = zyxel_threecom_profile();
        assert!(profile.prompt.is_match("switch-1#"));
        assert!(profile.pagination.as_ref().unwrap().is_match("--More--"));
    }

    #[test]
    fn test_strip_echoed_command_trims_leading_echo_and_trailing_prompt() {
        let captured = "show version\nModel: X\nswitch#";
        let profile = zyxel_threecom_profile();
        assert_eq!(strip_echoed_command(captured, "show version", &profile), "Model: X");
    }

    #[test]
    fn test_strip_echoed_command_multiline_output() {
        let captured = "show version\nModel: X\nFirmware: 1.2.3\nswitch-1#";
        let profile = zyxel_threecom_profile();
        assert_eq!(
            strip_echoed_command(captured, "show version", &profile),
            "Model: X\nFirmware: 1.2.3"
        );
    }
}
