// Tunnel dialer: one authenticated SSH session to a jump host, exposed as a
// byte-stream dialer for the database client.

use crate::error::{TunnelError, TunnelResult};
use crate::models::{HostKeyPolicy, TunnelConfig};
use crate::services::auth;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use russh::client;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Byte stream multiplexed over the jump-host SSH session.
pub type TunnelStream = russh::ChannelStream<client::Msg>;

/// SSH client handler enforcing the configured host key policy.
struct HostKeyHandler {
    policy: HostKeyPolicy,
    host: String,
    port: u16,
}

#[async_trait]
impl client::Handler for HostKeyHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &russh_keys::key::PublicKey,
    ) -> Result<bool, Self::Error> {
        match &self.policy {
            HostKeyPolicy::KnownHosts => {
                match russh_keys::check_known_hosts(&self.host, self.port.into(), server_public_key)
                {
                    Ok(true) => Ok(true),
                    Ok(false) => {
                        tracing::warn!(
                            "host key for {}:{} not found in known_hosts",
                            self.host,
                            self.port
                        );
                        Ok(false)
                    }
                    Err(e) => {
                        tracing::warn!(
                            "known_hosts verification failed for {}:{}: {}",
                            self.host,
                            self.port,
                            e
                        );
                        Ok(false)
                    }
                }
            }
            HostKeyPolicy::Fingerprint { sha256 } => {
                let expected = sha256.trim_start_matches("SHA256:");
                let actual = server_public_key.fingerprint();
                let matched = actual.trim_start_matches("SHA256:") == expected;
                if !matched {
                    tracing::warn!(
                        "host key fingerprint mismatch for {}:{}: got SHA256:{}",
                        self.host,
                        self.port,
                        actual
                    );
                }
                Ok(matched)
            }
            HostKeyPolicy::AcceptAny => {
                tracing::warn!(
                    "accepting unverified host key for {}:{}",
                    self.host,
                    self.port
                );
                Ok(true)
            }
        }
    }
}

/// Dialer that authenticates to an SSH jump host and opens byte streams to
/// addresses reachable from the jump host's network position.
///
/// One dialer owns at most one live SSH session. The session is established
/// once and then reused: every stream dial opens another `direct-tcpip`
/// channel multiplexed over it. The dialer adds no locking of its own;
/// concurrent dials are as safe as the underlying session's channel opens.
pub struct TunnelDialer {
    id: Uuid,
    config: TunnelConfig,
    session: Option<client::Handle<HostKeyHandler>>,
    connected_at: Option<DateTime<Utc>>,
}

impl TunnelDialer {
    /// Create a dialer for the given jump host configuration. No network
    /// activity happens until [`establish`](Self::establish).
    pub fn new(config: TunnelConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            config,
            session: None,
            connected_at: None,
        }
    }

    /// Dialer identity used in log lines.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The jump host configuration this dialer was built from.
    pub fn config(&self) -> &TunnelConfig {
        &self.config
    }

    /// Whether a live session is held.
    pub fn is_established(&self) -> bool {
        self.session.is_some()
    }

    /// When the current session was established.
    pub fn connected_at(&self) -> Option<DateTime<Utc>> {
        self.connected_at
    }

    /// Connect to the jump host, verify its key against the policy, and
    /// authenticate. Idempotent: an already-established session is kept.
    pub async fn establish(&mut self) -> TunnelResult<()> {
        if self.session.is_some() {
            return Ok(());
        }
        self.config.validate()?;

        tracing::info!(
            dialer = %self.id,
            "establishing SSH session to {}:{} as {}",
            self.config.host,
            self.config.port,
            self.config.username
        );

        let ssh_config = Arc::new(client::Config::default());
        let handler = HostKeyHandler {
            policy: self.config.host_key_policy.clone(),
            host: self.config.host.clone(),
            port: self.config.port,
        };

        let mut handle = client::connect(
            ssh_config,
            (self.config.host.as_str(), self.config.port),
            handler,
        )
        .await
        .map_err(|e| {
            TunnelError::handshake_with_hint(
                format!(
                    "failed to reach jump host {}:{}: {}",
                    self.config.host, self.config.port, e
                ),
                "Verify the jump host is reachable and its key passes the host key policy",
            )
        })?;

        auth::authenticate(&mut handle, &self.config).await?;

        tracing::info!(dialer = %self.id, "SSH session established");
        self.session = Some(handle);
        self.connected_at = Some(Utc::now());
        Ok(())
    }

    /// Open a new logical byte stream through the established session to
    /// `address` (`host:port` as seen from the jump host).
    ///
    /// Fails without any network activity when no session is established.
    /// `network` must name a TCP transport; `direct-tcpip` channels carry
    /// nothing else.
    pub async fn dial_stream(&self, network: &str, address: &str) -> TunnelResult<TunnelStream> {
        let session = self.session.as_ref().ok_or_else(|| {
            TunnelError::stream_with_hint(
                "SSH session not established",
                "Call establish() before dialing streams",
            )
        })?;
        ensure_tcp(network)?;
        let (host, port) = split_host_port(address)?;

        tracing::debug!(dialer = %self.id, "opening channel to {}:{}", host, port);
        let channel = session
            .channel_open_direct_tcpip(host, port as u32, "127.0.0.1", 0)
            .await
            .map_err(|e| {
                TunnelError::stream_with_hint(
                    format!("failed to open channel to {}: {}", address, e),
                    "The destination must be reachable from the jump host, \
                     and the server must allow TCP forwarding",
                )
            })?;

        Ok(channel.into_stream())
    }

    /// [`dial_stream`](Self::dial_stream) with a timeout argument for
    /// callers that carry one. The timeout is accepted but no deadline is
    /// applied to the channel open; pacing rides on the SSH session's own
    /// keepalive settings.
    pub async fn dial_stream_timeout(
        &self,
        network: &str,
        address: &str,
        timeout: Duration,
    ) -> TunnelResult<TunnelStream> {
        let _ = timeout;
        self.dial_stream(network, address).await
    }

    /// Disconnect and drop the session. Subsequent dials fail until
    /// [`establish`](Self::establish) is called again.
    pub async fn close(&mut self) -> TunnelResult<()> {
        if let Some(session) = self.session.take() {
            self.connected_at = None;
            session
                .disconnect(russh::Disconnect::ByApplication, "closing tunnel", "en")
                .await
                .map_err(|e| TunnelError::stream(format!("SSH disconnect failed: {}", e)))?;
            tracing::info!(dialer = %self.id, "SSH session closed");
        }
        Ok(())
    }
}

impl std::fmt::Debug for TunnelDialer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunnelDialer")
            .field("id", &self.id)
            .field("host", &self.config.host)
            .field("port", &self.config.port)
            .field("established", &self.session.is_some())
            .finish()
    }
}

fn ensure_tcp(network: &str) -> TunnelResult<()> {
    match network {
        "tcp" | "tcp4" | "tcp6" => Ok(()),
        other => Err(TunnelError::stream(format!(
            "unsupported transport {:?}: tunnel channels are TCP only",
            other
        ))),
    }
}

fn split_host_port(address: &str) -> TunnelResult<(&str, u16)> {
    let (host, port) = address.rsplit_once(':').ok_or_else(|| {
        TunnelError::stream(format!("address {:?} is not in host:port form", address))
    })?;
    let port: u16 = port
        .parse()
        .map_err(|_| TunnelError::stream(format!("invalid port in address {:?}", address)))?;
    // Unbracket IPv6 literals
    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    if host.is_empty() {
        return Err(TunnelError::stream(format!(
            "address {:?} has an empty host",
            address
        )));
    }
    Ok((host, port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use russh::client::Handler;

    const TEST_PUBLIC_KEY_B64: &str =
        "AAAAC3NzaC1lZDI1NTE5AAAAIKp1cnawheoeiNwcnfeCPb7cy5/TuAjB/+kEizPCVzK4";

    fn password_config() -> TunnelConfig {
        let mut config = TunnelConfig::new("bastion.internal", "deploy");
        config.password = Some("secret".into());
        config
    }

    #[tokio::test]
    async fn test_dial_before_establish_fails_without_io() {
        let dialer = TunnelDialer::new(password_config());
        let err = dialer.dial_stream("tcp", "localhost:5432").await.err().unwrap();
        assert!(matches!(err, TunnelError::Stream { .. }));
        assert!(err.to_string().contains("not established"));
    }

    #[tokio::test]
    async fn test_dial_timeout_flavor_fails_identically() {
        // The timeout argument introduces no separate failure path: with no
        // session, both flavors report the same missing-session error even
        // for a vanishingly small timeout.
        let dialer = TunnelDialer::new(password_config());
        let err = dialer
            .dial_stream_timeout("tcp", "localhost:5432", Duration::from_nanos(1))
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("not established"));
    }

    #[tokio::test]
    async fn test_establish_validates_before_network() {
        let mut dialer = TunnelDialer::new(TunnelConfig::default());
        let err = dialer.establish().await.unwrap_err();
        assert!(matches!(err, TunnelError::Validation { .. }));
        assert!(!dialer.is_established());
    }

    #[tokio::test]
    async fn test_establish_unreachable_host_is_handshake_error() {
        let mut config = password_config();
        config.host = "127.0.0.1".into();
        config.port = 1;
        config.host_key_policy = HostKeyPolicy::AcceptAny;

        let mut dialer = TunnelDialer::new(config);
        let err = dialer.establish().await.unwrap_err();
        assert!(matches!(err, TunnelError::Handshake { .. }));
        assert!(!dialer.is_established());
    }

    #[test]
    fn test_ensure_tcp() {
        assert!(ensure_tcp("tcp").is_ok());
        assert!(ensure_tcp("tcp4").is_ok());
        assert!(ensure_tcp("tcp6").is_ok());
        assert!(ensure_tcp("udp").is_err());
        assert!(ensure_tcp("unix").is_err());
    }

    #[test]
    fn test_split_host_port() {
        assert_eq!(
            split_host_port("localhost:5432").unwrap(),
            ("localhost", 5432)
        );
        assert_eq!(split_host_port("[::1]:5432").unwrap(), ("::1", 5432));
        assert!(split_host_port("localhost").is_err());
        assert!(split_host_port("localhost:notaport").is_err());
        assert!(split_host_port(":5432").is_err());
    }

    #[tokio::test]
    async fn test_fingerprint_policy_pins_server_key() {
        let key = russh_keys::parse_public_key_base64(TEST_PUBLIC_KEY_B64).unwrap();
        let fingerprint = key.fingerprint();

        let mut handler = HostKeyHandler {
            policy: HostKeyPolicy::Fingerprint {
                sha256: format!("SHA256:{}", fingerprint),
            },
            host: "bastion.internal".into(),
            port: 22,
        };
        assert!(handler.check_server_key(&key).await.unwrap());

        let mut handler = HostKeyHandler {
            policy: HostKeyPolicy::Fingerprint {
                sha256: "SHA256:AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA".into(),
            },
            host: "bastion.internal".into(),
            port: 22,
        };
        assert!(!handler.check_server_key(&key).await.unwrap());
    }

    #[tokio::test]
    async fn test_accept_any_policy_accepts() {
        let key = russh_keys::parse_public_key_base64(TEST_PUBLIC_KEY_B64).unwrap();
        let mut handler = HostKeyHandler {
            policy: HostKeyPolicy::AcceptAny,
            host: "bastion.internal".into(),
            port: 22,
        };
        assert!(handler.check_server_key(&key).await.unwrap());
    }
}
