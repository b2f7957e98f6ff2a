//! PostgreSQL connections tunneled through an SSH jump host.
//!
//! This crate reaches a database whose port is not directly routable by
//! multiplexing the wire protocol over one authenticated SSH session:
//!
//! - **error**: unified error type with actionable hints
//! - **models**: tunnel configuration and probe results
//! - **services**: the tunnel dialer, authentication resolution, database
//!   delegation, and logging setup
//!
//! ```no_run
//! use pgtunnel::{ConnectionService, TunnelConfig, TunnelDialer};
//!
//! # async fn run() -> pgtunnel::TunnelResult<()> {
//! let mut config = TunnelConfig::new("bastion.internal", "deploy");
//! config.private_key = Some("/home/deploy/.ssh/id_ed25519".into());
//!
//! let dialer = TunnelDialer::new(config);
//! let connection =
//!     ConnectionService::connect(dialer, "host=10.0.0.5 user=app dbname=appdb").await?;
//! let row = connection.client.query_one("SELECT 1", &[]).await?;
//! # let _ = row;
//! connection.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod models;
pub mod services;

pub use error::{TunnelError, TunnelResult};
pub use models::{ConnectionTestResult, HostKeyPolicy, TunnelConfig};
pub use services::{
    AuthMethod, ConnectionService, LogGuard, TunnelDialer, TunnelStream, TunneledConnection,
};
