// Delegation to the PostgreSQL client over a tunneled byte stream.

use crate::error::{TunnelError, TunnelResult};
use crate::models::{ConnectionTestResult, TunnelConfig};
use crate::services::tunnel::{TunnelDialer, TunnelStream};
use chrono::{DateTime, Utc};
use native_tls::TlsConnector;
use std::time::Instant;
use tokio::task::JoinHandle;
use tokio_postgres::config::{Host, SslMode};
use tokio_postgres::{Client, Config, NoTls};
use tokio_util::sync::CancellationToken;

/// A live PostgreSQL connection whose wire traffic rides the SSH tunnel.
///
/// Owns the dialer, the client, and the driver task that pumps the
/// connection. Closing it stops the driver and tears down the SSH session,
/// so the tunnel's lifetime is scoped to the logical database connection.
pub struct TunneledConnection {
    /// The PostgreSQL client for issuing queries
    pub client: Client,
    dialer: TunnelDialer,
    connected_at: DateTime<Utc>,
    cancel_token: CancellationToken,
    driver: JoinHandle<()>,
}

impl TunneledConnection {
    /// The dialer carrying this connection. Additional streams to other
    /// destinations multiplex over the same session.
    pub fn dialer(&self) -> &TunnelDialer {
        &self.dialer
    }

    /// When the database handshake completed.
    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// Stop the driver task and close the SSH session.
    pub async fn close(mut self) -> TunnelResult<()> {
        self.cancel_token.cancel();
        let _ = (&mut self.driver).await;
        self.dialer.close().await
    }
}

impl Drop for TunneledConnection {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

/// Connection service: opens tunneled database connections and probes them.
pub struct ConnectionService;

impl ConnectionService {
    /// Open a database connection through the dialer's jump host.
    ///
    /// `target` is a connection string in the PostgreSQL client's own
    /// format (`host=... port=... user=...` or a `postgres://` URL); its
    /// host and port are resolved from the jump host's network position.
    /// The SSH session is established first if the dialer does not already
    /// hold one, then a single stream is dialed and the protocol handshake
    /// is delegated to the client over it.
    pub async fn connect(
        mut dialer: TunnelDialer,
        target: &str,
    ) -> TunnelResult<TunneledConnection> {
        let pg_config: Config = target.parse()?;
        let (host, port) = target_endpoint(&pg_config)?;

        dialer.establish().await?;

        let stream = match dialer.dial_stream("tcp", &format!("{}:{}", host, port)).await {
            Ok(stream) => stream,
            Err(e) => {
                let _ = dialer.close().await;
                return Err(e);
            }
        };

        let cancel_token = CancellationToken::new();
        let (client, driver) =
            match Self::handshake(&pg_config, stream, &host, cancel_token.clone()).await {
                Ok(pair) => pair,
                Err(e) => {
                    let _ = dialer.close().await;
                    return Err(e);
                }
            };

        tracing::info!(
            dialer = %dialer.id(),
            "database connection established to {}:{} through {}",
            host,
            port,
            dialer.config().host
        );

        Ok(TunneledConnection {
            client,
            dialer,
            connected_at: Utc::now(),
            cancel_token,
            driver,
        })
    }

    /// Probe the full path (tunnel, handshake, `SELECT version()`) without
    /// keeping anything open.
    pub async fn test_connection(config: TunnelConfig, target: &str) -> ConnectionTestResult {
        let start = Instant::now();
        let dialer = TunnelDialer::new(config);

        let connection = match Self::connect(dialer, target).await {
            Ok(connection) => connection,
            Err(e) => {
                return ConnectionTestResult {
                    success: false,
                    server_version: None,
                    latency_ms: start.elapsed().as_millis() as u64,
                    error: Some(e.to_string()),
                };
            }
        };

        let result = match connection.client.query_one("SELECT version()", &[]).await {
            Ok(row) => ConnectionTestResult {
                success: true,
                server_version: Some(row.get(0)),
                latency_ms: start.elapsed().as_millis() as u64,
                error: None,
            },
            Err(e) => ConnectionTestResult {
                success: false,
                server_version: None,
                latency_ms: start.elapsed().as_millis() as u64,
                error: Some(TunnelError::from(e).to_string()),
            },
        };

        if let Err(e) = connection.close().await {
            tracing::warn!("closing probe connection failed: {}", e);
        }

        result
    }

    /// Run the PostgreSQL handshake over the tunneled stream, negotiating
    /// TLS according to the target's `sslmode`. Certificate verification is
    /// off for tunneled TLS: the hostname the certificate names is not the
    /// endpoint the stream reaches.
    async fn handshake(
        pg_config: &Config,
        stream: TunnelStream,
        domain: &str,
        cancel_token: CancellationToken,
    ) -> TunnelResult<(Client, JoinHandle<()>)> {
        match pg_config.get_ssl_mode() {
            SslMode::Disable => {
                let (client, connection) = pg_config.connect_raw(stream, NoTls).await?;
                Ok((client, Self::spawn_driver(connection, cancel_token)))
            }
            _ => {
                let connector = TlsConnector::builder()
                    .danger_accept_invalid_certs(true)
                    .build()
                    .map_err(|e| {
                        TunnelError::stream(format!("failed to create TLS connector: {}", e))
                    })?;
                let tls = postgres_native_tls::TlsConnector::new(connector, domain);
                let (client, connection) = pg_config.connect_raw(stream, tls).await?;
                Ok((client, Self::spawn_driver(connection, cancel_token)))
            }
        }
    }

    /// Drive the connection until it ends or the owner cancels it.
    fn spawn_driver<S, T>(
        connection: tokio_postgres::Connection<S, T>,
        cancel_token: CancellationToken,
    ) -> JoinHandle<()>
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
        T: tokio_postgres::tls::TlsStream + Unpin + Send + 'static,
    {
        tokio::spawn(async move {
            tokio::select! {
                result = connection => {
                    if let Err(e) = result {
                        tracing::warn!("database connection ended with error: {}", e);
                    }
                }
                _ = cancel_token.cancelled() => {
                    tracing::debug!("database connection driver cancelled");
                }
            }
        })
    }
}

/// The target's host and port as the jump host will dial them. The first
/// host wins when the connection string lists several.
fn target_endpoint(config: &Config) -> TunnelResult<(String, u16)> {
    let host = match config.get_hosts() {
        [] => {
            return Err(TunnelError::validation_with_hint(
                "target connection string has no host",
                "Add host=... for the database as seen from the jump host",
            ))
        }
        [host, rest @ ..] => {
            if !rest.is_empty() {
                tracing::debug!("target lists {} hosts; using the first", rest.len() + 1);
            }
            host
        }
    };

    let host = match host {
        Host::Tcp(host) => host.clone(),
        #[cfg(unix)]
        Host::Unix(path) => {
            return Err(TunnelError::stream(format!(
                "unix socket target {} cannot be dialed through the tunnel",
                path.display()
            )))
        }
    };

    let port = config.get_ports().first().copied().unwrap_or(5432);
    Ok((host, port))
}
