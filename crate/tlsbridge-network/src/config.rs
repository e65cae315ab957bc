//! Bridge configuration file.
//!
//! A configuration describes either a server or a client bridge:
//!
//! ```toml
//! [server]
//! address = "0.0.0.0:9443"
//! cert = "server.crt"
//! key = "server.key"
//! ```
//!
//! or
//!
//! ```toml
//! [client]
//! address = "bridge.example.com:9443"
//! trust = "ca.pem"
//! ```
//!
//! Relative paths are relative to the directory of the configuration
//! file.

use crate::bridge::{Bridge, ClientOptions};
use crate::security::TrustAnchors;
use anyhow::Context as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tlsbridge_types::Registry;

#[derive(Clone, serde::Deserialize, serde::Serialize, Debug, PartialEq, Eq, Default)]
#[serde(deny_unknown_fields)]
pub struct BridgeConfig {
    pub server: Option<ServerConfig>,
    pub client: Option<ClientConfig>,
}

/// Accept connections.
#[derive(Clone, serde::Deserialize, serde::Serialize, Debug, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Address to listen on, as host:port.
    pub address: String,

    /// PEM file containing the certificate chain, server certificate
    /// first.
    pub cert: PathBuf,

    /// PEM file containing the private key of the server certificate.
    pub key: PathBuf,
}

/// Connect to a server.
#[derive(Clone, serde::Deserialize, serde::Serialize, Debug, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    /// Address of the server, as host:port.
    pub address: String,

    /// PEM file containing the certificates to trust. The system
    /// root certificates are used if unset.
    pub trust: Option<PathBuf>,

    /// Name expected in the server certificate, if not the host
    /// part of the address.
    pub domain: Option<String>,
}

/// The side of the bridge a configuration describes.
#[derive(Debug, Clone, Copy)]
pub enum Endpoint<'a> {
    Server(&'a ServerConfig),
    Client(&'a ClientConfig),
}

impl BridgeConfig {
    /// Read and check the configuration file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("{}: cannot read config", path.display()))?;
        let mut config =
            Self::parse(&content).with_context(|| format!("{}: invalid config", path.display()))?;
        if let Some(dir) = path.parent() {
            config.resolve_paths(dir);
        }

        Ok(config)
    }

    /// Parse and check a configuration.
    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: BridgeConfig = toml::from_str(content)?;
        config.endpoint()?;

        Ok(config)
    }

    /// The side of the bridge this configuration describes.
    ///
    /// Fails unless there's exactly one of `[server]` and `[client]`.
    pub fn endpoint(&self) -> anyhow::Result<Endpoint<'_>> {
        match (&self.server, &self.client) {
            (Some(server), None) => Ok(Endpoint::Server(server)),
            (None, Some(client)) => Ok(Endpoint::Client(client)),
            (Some(_), Some(_)) => anyhow::bail!("both [server] and [client] are defined"),
            (None, None) => anyhow::bail!("one of [server] or [client] must be defined"),
        }
    }

    /// Create the bridge this configuration describes.
    pub async fn open(&self, registry: Arc<Registry>) -> anyhow::Result<Bridge> {
        match self.endpoint()? {
            Endpoint::Server(server) => {
                let bridge =
                    Bridge::server_from_files(&server.address, &server.cert, &server.key, registry)
                        .await
                        .with_context(|| format!("server on {}", server.address))?;

                Ok(bridge)
            }
            Endpoint::Client(client) => {
                let anchors = match &client.trust {
                    Some(path) => TrustAnchors::from_pem_file(path)?,
                    None => TrustAnchors::System,
                };
                let options = ClientOptions {
                    domain: client.domain.clone(),
                };
                let bridge = Bridge::client(&client.address, &anchors, registry, options)
                    .with_context(|| format!("client of {}", client.address))?;

                Ok(bridge)
            }
        }
    }

    fn resolve_paths(&mut self, dir: &Path) {
        if let Some(server) = &mut self.server {
            server.cert = dir.join(&server.cert);
            server.key = dir.join(&server.key);
        }
        if let Some(client) = &mut self.client {
            client.trust = client.trust.as_ref().map(|trust| dir.join(trust));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::Role;
    use crate::testing::TestPki;
    use assert_fs::prelude::*;
    use tlsbridge_types::Envelope;

    #[test]
    fn parse_server() -> anyhow::Result<()> {
        let config = BridgeConfig::parse(
            r#"
            [server]
            address = "localhost:9443"
            cert = "server.crt"
            key = "server.key"
            "#,
        )?;

        assert_eq!(
            BridgeConfig {
                server: Some(ServerConfig {
                    address: "localhost:9443".to_string(),
                    cert: PathBuf::from("server.crt"),
                    key: PathBuf::from("server.key"),
                }),
                client: None,
            },
            config
        );

        Ok(())
    }

    #[test]
    fn parse_client() -> anyhow::Result<()> {
        let config = BridgeConfig::parse(
            r#"
            [client]
            address = "localhost:9443"
            domain = "example.com"
            "#,
        )?;

        let Endpoint::Client(client) = config.endpoint()? else {
            panic!("expected a client config");
        };
        assert_eq!("localhost:9443", client.address);
        assert_eq!(None, client.trust);
        assert_eq!(Some("example.com".to_string()), client.domain);

        Ok(())
    }

    #[test]
    fn reject_invalid() {
        // Neither
        assert!(BridgeConfig::parse("").is_err());

        // Both
        assert!(
            BridgeConfig::parse(
                r#"
                [server]
                address = "localhost:9443"
                cert = "server.crt"
                key = "server.key"

                [client]
                address = "localhost:9443"
                "#
            )
            .is_err()
        );

        // Unknown field
        assert!(
            BridgeConfig::parse(
                r#"
                [client]
                address = "localhost:9443"
                port = 9443
                "#
            )
            .is_err()
        );

        // Missing key
        assert!(
            BridgeConfig::parse(
                r#"
                [server]
                address = "localhost:9443"
                cert = "server.crt"
                "#
            )
            .is_err()
        );
    }

    #[test]
    fn load_resolves_relative_paths() -> anyhow::Result<()> {
        let dir = assert_fs::TempDir::new()?;
        let config_file = dir.child("bridge.toml");
        config_file.write_str(
            r#"
            [server]
            address = "localhost:9443"
            cert = "server.crt"
            key = "/etc/tlsbridge/server.key"
            "#,
        )?;

        let config = BridgeConfig::load(config_file.path())?;
        let Endpoint::Server(server) = config.endpoint()? else {
            panic!("expected a server config");
        };
        assert_eq!(dir.path().join("server.crt"), server.cert);
        assert_eq!(PathBuf::from("/etc/tlsbridge/server.key"), server.key);

        Ok(())
    }

    #[test]
    fn load_missing_file() -> anyhow::Result<()> {
        let dir = assert_fs::TempDir::new()?;
        assert!(BridgeConfig::load(&dir.path().join("missing.toml")).is_err());

        Ok(())
    }

    #[tokio::test]
    async fn open_server_and_client() -> anyhow::Result<()> {
        let _ = env_logger::try_init();
        let pki = TestPki::generate()?;
        let dir = assert_fs::TempDir::new()?;
        pki.write_files(dir.path())?;
        let registry = Arc::new(Registry::permissive());

        let server_config = dir.child("server.toml");
        server_config.write_str(
            r#"
            [server]
            address = "127.0.0.1:0"
            cert = "server.crt"
            key = "server.key"
            "#,
        )?;
        let server = BridgeConfig::load(server_config.path())?
            .open(Arc::clone(&registry))
            .await?;
        assert_eq!(Role::Server, server.role());
        let addr = server
            .local_addr()
            .ok_or(anyhow::anyhow!("no local address"))?;

        let client_config = dir.child("client.toml");
        client_config.write_str(&format!(
            r#"
            [client]
            address = "{addr}"
            trust = "ca.pem"
            "#
        ))?;
        let client = BridgeConfig::load(client_config.path())?
            .open(Arc::clone(&registry))
            .await?;
        assert_eq!(Role::Client, client.role());

        client.send(Envelope::new("hello", "world")).await?;
        assert_eq!(
            Envelope::new("hello", "world"),
            tokio::time::timeout(std::time::Duration::from_secs(5), server.receive()).await??
        );

        Ok(())
    }
}
