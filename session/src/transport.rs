//! Datagram transports for commissioner sessions.
//!
//! CoAP runs over a `Connection`: plain UDP for tests and tooling, DTLS 1.2
//! behind the `dtls` feature for real Border Agents, and in-process pairs for
//! the joiner relay path and unit tests.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use hkdf::Hkdf;
use sha2::Sha256;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Mutex};

use meshcop_wire::{Error, Result};

/// Largest datagram a session will carry.
pub const MAX_DATAGRAM_SIZE: usize = 4096;

/// Expand keying material from a session secret (HKDF-SHA256).
pub fn derive_key_material(secret: &[u8], label: &[u8], length: usize) -> Result<Vec<u8>> {
    let hk = Hkdf::<Sha256>::new(None, secret);
    let mut out = vec![0u8; length];
    hk.expand(label, &mut out)
        .map_err(|_| Error::security("requested key material too long"))?;
    Ok(out)
}

/// A connected, message-oriented secure (or test) channel.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Send one datagram.
    async fn send(&self, datagram: &[u8]) -> Result<()>;

    /// Receive the next datagram.
    async fn recv(&self) -> Result<Bytes>;

    /// Tear the connection down.
    async fn close(&self) -> Result<()>;

    /// Export keying material bound to the session secret (KEK derivation).
    async fn export_key_material(&self, label: &[u8], length: usize) -> Result<Vec<u8>>;
}

/// Plain UDP, used by tests and by the in-tree mock Border Agent.
pub struct UdpConnection {
    socket: UdpSocket,
}

impl UdpConnection {
    /// Bind an ephemeral socket and connect it to `peer`.
    pub async fn connect(peer: SocketAddr) -> Result<Self> {
        let bind_addr: SocketAddr = if peer.is_ipv6() {
            "[::]:0".parse().expect("literal addr")
        } else {
            "0.0.0.0:0".parse().expect("literal addr")
        };
        let socket = UdpSocket::bind(bind_addr).await?;
        socket.connect(peer).await?;
        Ok(Self { socket })
    }

    /// Wrap an already connected socket.
    pub fn from_socket(socket: UdpSocket) -> Self {
        Self { socket }
    }
}

#[async_trait]
impl Connection for UdpConnection {
    async fn send(&self, datagram: &[u8]) -> Result<()> {
        self.socket.send(datagram).await?;
        Ok(())
    }

    async fn recv(&self) -> Result<Bytes> {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        let len = self.socket.recv(&mut buf).await?;
        buf.truncate(len);
        Ok(Bytes::from(buf))
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    async fn export_key_material(&self, _label: &[u8], _length: usize) -> Result<Vec<u8>> {
        Err(Error::security(
            "plain UDP carries no exportable session secret",
        ))
    }
}

/// One end of an in-process connection pair.
///
/// Carries an optional shared secret so that key-material export works the
/// same way it does on a real secure session.
pub struct PairConnection {
    tx: mpsc::UnboundedSender<Bytes>,
    rx: Mutex<mpsc::UnboundedReceiver<Bytes>>,
    secret: Option<Vec<u8>>,
}

impl PairConnection {
    /// Create both ends of a loopback link.
    pub fn pair() -> (Self, Self) {
        Self::pair_with_secret(None)
    }

    /// Create a loopback link sharing a session secret.
    pub fn pair_with_secret(secret: Option<Vec<u8>>) -> (Self, Self) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        (
            Self {
                tx: a_tx,
                rx: Mutex::new(b_rx),
                secret: secret.clone(),
            },
            Self {
                tx: b_tx,
                rx: Mutex::new(a_rx),
                secret,
            },
        )
    }
}

#[async_trait]
impl Connection for PairConnection {
    async fn send(&self, datagram: &[u8]) -> Result<()> {
        self.tx
            .send(Bytes::copy_from_slice(datagram))
            .map_err(|_| Error::new(meshcop_wire::ErrorKind::IoError, "peer endpoint dropped"))
    }

    async fn recv(&self) -> Result<Bytes> {
        self.rx
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| Error::new(meshcop_wire::ErrorKind::IoError, "peer endpoint closed"))
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    async fn export_key_material(&self, label: &[u8], length: usize) -> Result<Vec<u8>> {
        let secret = self
            .secret
            .as_ref()
            .ok_or_else(|| Error::security("loopback link has no session secret"))?;
        derive_key_material(secret, label, length)
    }
}

/// Credentials for establishing a DTLS session.
#[derive(Clone, Default)]
pub struct DtlsConfig {
    /// PSK (the network PSKc, or a joiner PSKd) for PSK ciphersuites.
    pub psk: Option<Vec<u8>>,
    /// Identity hint presented with the PSK.
    pub psk_identity: Option<Vec<u8>>,
    /// PEM private key (CCM).
    pub private_key: Option<Vec<u8>>,
    /// PEM certificate chain (CCM).
    pub certificate: Option<Vec<u8>>,
    /// PEM trust anchor (CCM).
    pub trust_anchor: Option<Vec<u8>>,
}

impl std::fmt::Debug for DtlsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DtlsConfig")
            .field("psk", &self.psk.as_ref().map(|_| "<set>"))
            .field("certificate", &self.certificate.as_ref().map(|_| "<set>"))
            .finish_non_exhaustive()
    }
}

#[cfg(feature = "dtls")]
pub mod dtls {
    //! DTLS 1.2 client binding (webrtc-dtls).

    use super::*;
    use tracing::{debug, warn};
    use webrtc_dtls::cipher_suite::CipherSuiteId;
    use webrtc_dtls::config::{Config, ExtendedMasterSecretType};
    use webrtc_dtls::conn::DTLSConn;
    use webrtc_dtls::crypto::Certificate;
    use webrtc_util::Conn;

    /// A DTLS 1.2 client session over UDP.
    pub struct DtlsConnection {
        conn: Arc<DTLSConn>,
    }

    impl DtlsConnection {
        /// Connect and run the handshake. PSK configs negotiate
        /// TLS_PSK_WITH_AES_128_CCM_8; certificate configs negotiate
        /// ECDHE-ECDSA.
        pub async fn connect(peer: SocketAddr, config: &DtlsConfig) -> Result<Self> {
            let socket = UdpSocket::bind(if peer.is_ipv6() { "[::]:0" } else { "0.0.0.0:0" })
                .await?;
            socket.connect(peer).await?;
            let socket: Arc<dyn Conn + Send + Sync> = Arc::new(socket);

            let dtls_config = if let Some(psk) = config.psk.clone() {
                Config {
                    psk: Some(Arc::new(move |_hint: &[u8]| Ok(psk.clone()))),
                    psk_identity_hint: Some(
                        config
                            .psk_identity
                            .clone()
                            .unwrap_or_else(|| b"commissioner".to_vec()),
                    ),
                    cipher_suites: vec![CipherSuiteId::Tls_Psk_With_Aes_128_Ccm_8],
                    extended_master_secret: ExtendedMasterSecretType::Require,
                    ..Default::default()
                }
            } else {
                let certificate = Certificate::from_pem(
                    std::str::from_utf8(
                        config
                            .certificate
                            .as_deref()
                            .ok_or_else(|| Error::security("certificate required"))?,
                    )
                    .map_err(|_| Error::security("certificate PEM is not UTF-8"))?,
                )
                .map_err(|err| Error::security(format!("bad certificate: {err}")))?;
                Config {
                    certificates: vec![certificate],
                    extended_master_secret: ExtendedMasterSecretType::Require,
                    ..Default::default()
                }
            };

            debug!("starting DTLS handshake with {peer}");
            let conn = DTLSConn::new(socket, dtls_config, true, None)
                .await
                .map_err(|err| {
                    warn!("DTLS handshake with {peer} failed: {err}");
                    Error::security(format!("DTLS handshake failed: {err}"))
                })?;
            Ok(Self {
                conn: Arc::new(conn),
            })
        }
    }

    #[async_trait]
    impl Connection for DtlsConnection {
        async fn send(&self, datagram: &[u8]) -> Result<()> {
            self.conn
                .send(datagram)
                .await
                .map_err(|err| Error::security(format!("DTLS send failed: {err}")))?;
            Ok(())
        }

        async fn recv(&self) -> Result<Bytes> {
            let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
            let len = self
                .conn
                .recv(&mut buf)
                .await
                .map_err(|err| Error::security(format!("DTLS recv failed: {err}")))?;
            buf.truncate(len);
            Ok(Bytes::from(buf))
        }

        async fn close(&self) -> Result<()> {
            self.conn
                .close()
                .await
                .map_err(|err| Error::security(format!("DTLS close failed: {err}")))?;
            Ok(())
        }

        async fn export_key_material(&self, label: &[u8], length: usize) -> Result<Vec<u8>> {
            let label = std::str::from_utf8(label)
                .map_err(|_| Error::invalid_args("export label must be UTF-8"))?;
            self.conn
                .connection_state()
                .await
                .export_keying_material(label, &[], length)
                .map_err(|err| Error::security(format!("key export failed: {err}")))
        }
    }
}
