use crate::async_utils::AbortOnDrop;
use crate::security::{ServerCredentials, TrustAnchors};
use rcgen::{BasicConstraints, CertificateParams, DnType, IsCa, KeyPair};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

/// A throwaway CA and a server certificate it signed.
///
/// The server certificate is valid for `localhost` and `127.0.0.1`.
pub(crate) struct TestPki {
    pub(crate) ca_cert_pem: String,
    pub(crate) server_cert_pem: String,
    pub(crate) server_key_pem: String,
}

impl TestPki {
    pub(crate) fn generate() -> anyhow::Result<Self> {
        let ca_key = KeyPair::generate()?;
        let mut ca_params = CertificateParams::new(Vec::<String>::new())?;
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        ca_params
            .distinguished_name
            .push(DnType::CommonName, "tlsbridge test CA");
        let ca_cert = ca_params.self_signed(&ca_key)?;

        let server_key = KeyPair::generate()?;
        let mut server_params =
            CertificateParams::new(vec!["localhost".to_string(), "127.0.0.1".to_string()])?;
        server_params
            .distinguished_name
            .push(DnType::CommonName, "localhost");
        let server_cert = server_params.signed_by(&server_key, &ca_cert, &ca_key)?;

        Ok(Self {
            ca_cert_pem: ca_cert.pem(),
            server_cert_pem: server_cert.pem(),
            server_key_pem: server_key.serialize_pem(),
        })
    }

    pub(crate) fn server_credentials(&self) -> anyhow::Result<ServerCredentials> {
        Ok(ServerCredentials::from_pem(
            self.server_cert_pem.as_bytes(),
            self.server_key_pem.as_bytes(),
        )?)
    }

    pub(crate) fn trust_anchors(&self) -> anyhow::Result<TrustAnchors> {
        Ok(TrustAnchors::from_pem(self.ca_cert_pem.as_bytes())?)
    }

    /// Write server certificate, server key and CA certificate, in
    /// that order, into the given directory.
    pub(crate) fn write_files(&self, dir: &Path) -> anyhow::Result<(PathBuf, PathBuf, PathBuf)> {
        let cert = dir.join("server.crt");
        let key = dir.join("server.key");
        let ca = dir.join("ca.pem");
        std::fs::write(&cert, &self.server_cert_pem)?;
        std::fs::write(&key, &self.server_key_pem)?;
        std::fs::write(&ca, &self.ca_cert_pem)?;

        Ok((cert, key, ca))
    }
}

/// A TCP proxy whose connections can be cut on demand.
pub(crate) struct TcpProxy {
    addr: SocketAddr,
    accepted: Arc<AtomicU32>,
    sever: watch::Sender<u32>,
    _task: AbortOnDrop<()>,
}

impl TcpProxy {
    /// Listen on a local port and forward everything to `target`.
    pub(crate) async fn start(target: SocketAddr) -> anyhow::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let accepted = Arc::new(AtomicU32::new(0));
        let (sever, _) = watch::channel(0);

        let task = AbortOnDrop::new(tokio::spawn({
            let accepted = Arc::clone(&accepted);
            let sever = sever.clone();
            async move {
                while let Ok((mut inbound, _)) = listener.accept().await {
                    let Ok(mut outbound) = TcpStream::connect(target).await else {
                        continue;
                    };
                    accepted.fetch_add(1, Ordering::Relaxed);
                    let mut severed = sever.subscribe();
                    tokio::spawn(async move {
                        tokio::select!(
                            _ = tokio::io::copy_bidirectional(&mut inbound, &mut outbound) => {}
                            _ = severed.changed() => {}
                        );
                    });
                }
            }
        }));

        Ok(Self {
            addr,
            accepted,
            sever,
            _task: task,
        })
    }

    pub(crate) fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Number of connections forwarded so far.
    pub(crate) fn accepted(&self) -> u32 {
        self.accepted.load(Ordering::Relaxed)
    }

    /// Close all open connections. New connections still go through.
    pub(crate) fn sever(&self) {
        self.sever.send_modify(|generation| *generation += 1);
    }
}
