// Jump-host manager (§4.3)
//
// Some devices are only reachable by tunneling through an already-probed
// device on the same network (typically the root device) via SSH
// direct-tcpip forwarding. This module tracks, per scan, whether such a
// tunnel is available and usable, and exposes it as a generic byte stream
// for both further SSH hops and the Zyxel serial-over-HTTPS fallback.

use std::time::Duration;

use russh::client::Msg;
use russh::Channel;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::timeout;

use crate::error::{DiscoveryError, Result};
use crate::net::ssh::SshSession;

/// State of the jump-host tunnel for the lifetime of one scan (§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JumpHostState {
    /// No candidate jump host established yet.
    Absent,
    /// A session to the jump host exists but forwarding has not been
    /// exercised yet.
    Established,
    /// `direct-tcpip` forwarding confirmed to work through this host.
    ProbedYes,
    /// Forwarding was attempted and failed; do not retry this host.
    ProbedNo,
}

/// Holds the jump host's own SSH session and the forwarding state derived
/// from it. One instance is shared across the recursive scan so every
/// descendant device can reuse the same tunnel (§4.3).
pub struct JumpHostManager {
    session: Option<SshSession>,
    state: JumpHostState,
}

impl JumpHostManager {
    pub fn absent() -> Self {
        Self {
            session: None,
            state: JumpHostState::Absent,
        }
    }

    pub fn established(session: SshSession) -> Self {
        Self {
            session: Some(session),
            state: JumpHostState::Established,
        }
    }

    pub fn state(&self) -> JumpHostState {
        self.state
    }

    /// Confirms (or rejects) that the jump host will forward a
    /// `direct-tcpip` channel, with a 5s deadline (§4.3). Caches the
    /// verdict so repeated callers don't re-probe.
    pub async fn confirm_forwarding(&mut self, probe_host: &str, probe_port: u16) -> bool {
        if self.state == JumpHostState::ProbedYes {
            return true;
        }
        if self.state == JumpHostState::ProbedNo {
            return false;
        }

        let Some(session) = self.session.as_mut() else {
            self.state = JumpHostState::ProbedNo;
            return false;
        };

        let opened = timeout(
            Duration::from_secs(5),
            session
                .handle
                .channel_open_direct_tcpip(probe_host, probe_port as u32, "0.0.0.0", 0),
        )
        .await;

        match opened {
            Ok(Ok(_channel)) => {
                self.state = JumpHostState::ProbedYes;
                true
            }
            _ => {
                self.state = JumpHostState::ProbedNo;
                false
            }
        }
    }

    /// Opens a forwarded TCP stream through the jump host to
    /// `(target_host, target_port)`, usable as a plain async byte stream
    /// for a further SSH hop or an HTTPS client (§4.3).
    pub async fn forward_out(
        &mut self,
        target_host: &str,
        target_port: u16,
    ) -> Result<Channel<Msg>> {
        let session = self.session.as_mut().ok_or_else(|| DiscoveryError::Transient {
            host: target_host.to_string(),
            operation: "jump-host-forward".into(),
            reason: "no jump host session established".into(),
        })?;

        session
            .handle
            .channel_open_direct_tcpip(target_host, target_port as u32, "0.0.0.0", 0)
            .await
            .map_err(|e| DiscoveryError::Transient {
                host: target_host.to_string(),
                operation: "jump-host-forward".into(),
                reason: e.to_string(),
            })
    }
}

/// Wraps a forwarded channel as a plain `AsyncRead + AsyncWrite` stream for
/// use with an HTTPS client talking to a device's serial-over-web endpoint
/// (§4.3 Zyxel fallback). `russh::Channel::into_stream` already produces
/// this shape; this helper just names the intent at call sites.
pub fn as_tunneled_stream(channel: Channel<Msg>) -> impl AsyncRead + AsyncWrite + Unpin + Send {
    channel.into_stream()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absent_state_rejects_forward_without_probing() {
        let manager = JumpHostManager::absent();
        assert_eq!(manager.state(), JumpHostState::Absent);
    }

    #[tokio::test]
    async fn test_confirm_forwarding_with_no_session_is_probed_no() {
        let mut manager = JumpHostManager::absent();
        let ok = manager.confirm_forwarding("10.0.0.5", 22).await;
        assert!(!ok);
        assert_eq!(manager.state(), JumpHostState::ProbedNo);
    }
}
