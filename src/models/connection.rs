use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Host key verification policy for the jump host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum HostKeyPolicy {
    /// Verify the server key against the user's known_hosts file
    #[default]
    KnownHosts,
    /// Accept only a server key with this SHA-256 fingerprint
    /// (an optional `SHA256:` prefix is accepted)
    Fingerprint { sha256: String },
    /// Accept any server key. Insecure; every accepted key is logged
    /// with a warning.
    AcceptAny,
}

/// Jump host configuration for tunneled connections.
///
/// Which authentication methods are offered is derived from the optional
/// fields: agent identities when an agent endpoint resolves, then the
/// private key when one is configured, otherwise the password. A configured
/// private key suppresses password authentication for the same attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TunnelConfig {
    /// Jump host hostname or address
    pub host: String,
    /// Jump host SSH port (default: 22)
    pub port: u16,
    /// SSH username on the jump host
    pub username: String,
    /// Password for password authentication
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Path to a private key file for public-key authentication
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_key: Option<PathBuf>,
    /// Passphrase for an encrypted private key
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_passphrase: Option<String>,
    /// Host key verification policy
    #[serde(default)]
    pub host_key_policy: HostKeyPolicy,
    /// Explicit SSH agent endpoint. Falls back to the environment's
    /// agent socket when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_socket: Option<PathBuf>,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 22,
            username: String::new(),
            password: None,
            private_key: None,
            key_passphrase: None,
            host_key_policy: HostKeyPolicy::default(),
            agent_socket: None,
        }
    }
}

impl TunnelConfig {
    /// Create a configuration for the given jump host and user.
    pub fn new(host: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            username: username.into(),
            ..Default::default()
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), crate::error::TunnelError> {
        if self.host.trim().is_empty() {
            return Err(crate::error::TunnelError::validation_with_hint(
                "Jump host is required",
                "Enter the SSH server hostname or IP address",
            ));
        }
        if self.username.trim().is_empty() {
            return Err(crate::error::TunnelError::validation_with_hint(
                "Username is required",
                "Enter the SSH username for the jump host",
            ));
        }
        if self.port == 0 {
            return Err(crate::error::TunnelError::validation_with_hint(
                "Invalid port number",
                "Port must be between 1 and 65535 (default: 22)",
            ));
        }
        Ok(())
    }
}

/// Result of probing a tunneled connection end to end.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionTestResult {
    /// Whether the tunnel and database handshake both succeeded
    pub success: bool,
    /// PostgreSQL server version if connected
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_version: Option<String>,
    /// Time from first dial to verdict in milliseconds
    pub latency_ms: u64,
    /// Error message if the probe failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TunnelConfig::default();
        assert_eq!(config.port, 22);
        assert_eq!(config.host_key_policy, HostKeyPolicy::KnownHosts);
        assert!(config.password.is_none());
        assert!(config.private_key.is_none());
    }

    #[test]
    fn test_validate_requires_host_and_username() {
        let config = TunnelConfig::default();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Jump host"));

        let config = TunnelConfig::new("bastion.internal", "");
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Username"));

        let mut config = TunnelConfig::new("bastion.internal", "deploy");
        config.port = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("port"));

        let config = TunnelConfig::new("bastion.internal", "deploy");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serde_camel_case() {
        let mut config = TunnelConfig::new("bastion.internal", "deploy");
        config.private_key = Some(PathBuf::from("/home/deploy/.ssh/id_ed25519"));
        config.key_passphrase = Some("s3cret".into());

        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["host"], "bastion.internal");
        assert_eq!(json["privateKey"], "/home/deploy/.ssh/id_ed25519");
        assert_eq!(json["keyPassphrase"], "s3cret");
        assert_eq!(json["hostKeyPolicy"]["type"], "knownHosts");
        // Unset optionals are omitted entirely
        assert!(json.get("password").is_none());
        assert!(json.get("agentSocket").is_none());

        let back: TunnelConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back.host, config.host);
        assert_eq!(back.private_key, config.private_key);
    }

    #[test]
    fn test_host_key_policy_tagging() {
        let policy = HostKeyPolicy::Fingerprint {
            sha256: "SHA256:AAAA".into(),
        };
        let json = serde_json::to_value(&policy).unwrap();
        assert_eq!(json["type"], "fingerprint");
        assert_eq!(json["sha256"], "SHA256:AAAA");

        let back: HostKeyPolicy = serde_json::from_str(r#"{"type":"acceptAny"}"#).unwrap();
        assert_eq!(back, HostKeyPolicy::AcceptAny);
    }

    #[test]
    fn test_policy_defaults_when_missing() {
        let config: TunnelConfig = serde_json::from_str(
            r#"{"host":"bastion.internal","port":22,"username":"deploy"}"#,
        )
        .unwrap();
        assert_eq!(config.host_key_policy, HostKeyPolicy::KnownHosts);
    }
}
