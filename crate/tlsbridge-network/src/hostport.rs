use crate::error::TransportError;
use rustls::pki_types::ServerName;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// A resolved host:port pair.
///
/// The host is kept as given, as it's also the name the client
/// expects to find in the server certificate.
#[derive(Clone, PartialEq, Eq, Debug, Hash)]
pub struct HostPort {
    host: String,
    port: u16,
    addr: SocketAddr,
}

impl HostPort {
    /// Parse a host:port string and resolve it.
    ///
    /// IPv6 addresses must be written between brackets, as in
    /// `[::1]:9443`.
    pub async fn parse(s: &str) -> Result<Self, TransportError> {
        let (host, port_str) = s
            .rsplit_once(':')
            .ok_or_else(|| address_error(s, "missing port"))?;
        let port = port_str
            .parse::<u16>()
            .map_err(|_| address_error(s, "invalid port"))?;
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        if host.is_empty() {
            return Err(address_error(s, "missing host"));
        }
        let addr = tokio::net::lookup_host(s)
            .await
            .map_err(|err| address_error(s, &format!("DNS lookup failed: {err}")))?
            .next()
            .ok_or_else(|| address_error(s, "DNS lookup returned nothing"))?;

        Ok(HostPort {
            host: host.to_string(),
            port,
            addr,
        })
    }

    /// Address of the given port on the IPv4 loopback interface.
    pub fn localhost(port: u16) -> Self {
        HostPort::from(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port))
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Name to check the server certificate against.
    pub(crate) fn server_name(
        &self,
        domain: Option<&str>,
    ) -> Result<ServerName<'static>, TransportError> {
        let name = domain.unwrap_or(&self.host);
        ServerName::try_from(name.to_string())
            .map_err(|err| address_error(name, &format!("invalid server name: {err}")))
    }
}

fn address_error(address: &str, reason: &str) -> TransportError {
    TransportError::Address {
        address: address.to_string(),
        reason: reason.to_string(),
    }
}

impl fmt::Display for HostPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl From<SocketAddr> for HostPort {
    fn from(addr: SocketAddr) -> Self {
        HostPort {
            host: addr.ip().to_string(),
            port: addr.port(),
            addr,
        }
    }
}
