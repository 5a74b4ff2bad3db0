//! Joiner session termination.
//!
//! Inbound RLY_RX.ntf frames are demultiplexed by joiner IID onto per-joiner
//! sessions. Each session tunnels its records back through RLY_TX.ntf,
//! serves JOIN_FIN.req, and on acceptance entrusts the joiner router with
//! the KEK via JOIN_ENT.ntf.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use meshcop_datasets::{JoinerId, JoinerInfo, JoinerType, JOINER_ID_LENGTH};
use meshcop_session::{derive_key_material, CoapEndpoint, Connection, SessionController};
use meshcop_wire::coap::{Code, MessageType};
use meshcop_wire::{uri, Error, ErrorKind, Result, Tlv, TlvList, TlvType};

use crate::admission::JoinerAdmission;
use crate::handler::{FinalizeInfo, HandlerSet};
use crate::relay::{joiner_id_from_iid, RelayFrame};

/// KEK delivered to the joiner router on acceptance.
pub const KEK_LENGTH: usize = 16;
/// Export label the KEK is derived under (shared with joiner tooling).
pub const KEK_LABEL: &[u8] = b"meshcop joiner kek";

/// The commissioner end of one relayed joiner session.
struct RelayConnection {
    controller: SessionController,
    joiner_iid: [u8; JOINER_ID_LENGTH],
    joiner_udp_port: u16,
    joiner_router_locator: u16,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Bytes>>,
    /// PSKd for MeshCoP joiners; CCM joiners key from certificates inside
    /// the handshake layer and export nothing here.
    secret: Option<Vec<u8>>,
}

#[async_trait]
impl Connection for RelayConnection {
    async fn send(&self, datagram: &[u8]) -> Result<()> {
        let frame = RelayFrame {
            joiner_iid: self.joiner_iid,
            joiner_udp_port: self.joiner_udp_port,
            joiner_router_locator: self.joiner_router_locator,
            encapsulation: Bytes::copy_from_slice(datagram),
            kek: None,
        };
        self.controller
            .mgmt_notify(uri::RELAY_TX, frame.to_tlvs()?)
            .await
    }

    async fn recv(&self) -> Result<Bytes> {
        self.rx
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| Error::new(ErrorKind::IoError, "joiner session closed"))
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    async fn export_key_material(&self, label: &[u8], length: usize) -> Result<Vec<u8>> {
        let secret = self
            .secret
            .as_ref()
            .ok_or_else(|| Error::security("joiner session has no exportable secret"))?;
        derive_key_material(secret, label, length)
    }
}

struct ManagerInner {
    admission: JoinerAdmission,
    handlers: HandlerSet,
    sessions: Mutex<HashMap<[u8; JOINER_ID_LENGTH], mpsc::UnboundedSender<Bytes>>>,
    max_sessions: usize,
}

/// Demultiplexes relayed joiner traffic onto per-joiner sessions.
#[derive(Clone)]
pub struct JoinerSessionManager {
    inner: Arc<ManagerInner>,
}

impl JoinerSessionManager {
    pub fn new(admission: JoinerAdmission, handlers: HandlerSet, max_sessions: usize) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                admission,
                handlers,
                sessions: Mutex::new(HashMap::new()),
                max_sessions,
            }),
        }
    }

    /// Number of joiner sessions currently running.
    pub fn active_sessions(&self) -> usize {
        self.inner.sessions.lock().expect("session map lock").len()
    }

    /// The joiner type a relayed frame belongs to, from its UDP port.
    fn joiner_type_for_port(&self, port: u16) -> JoinerType {
        let dataset = self.inner.admission.store().commissioner();
        if dataset.ae_udp_port == Some(port) {
            JoinerType::Ae
        } else if dataset.nmkp_udp_port == Some(port) {
            JoinerType::Nmkp
        } else {
            JoinerType::MeshCoP
        }
    }

    fn joiner_info(&self, joiner_type: JoinerType, joiner_id: &JoinerId) -> Option<JoinerInfo> {
        match &self.inner.handlers.joiner_info {
            Some(requester) => requester(joiner_type, joiner_id),
            None => self.inner.admission.lookup(joiner_type, joiner_id),
        }
    }

    /// Feed one RLY_RX.ntf payload into the demultiplexer.
    pub async fn handle_relay_rx(&self, payload: &[u8]) -> Result<()> {
        let frame = RelayFrame::decode(payload)?;
        {
            let mut sessions = self.inner.sessions.lock().expect("session map lock");
            if let Some(tx) = sessions.get(&frame.joiner_iid) {
                if tx.send(frame.encapsulation.clone()).is_ok() {
                    return Ok(());
                }
                sessions.remove(&frame.joiner_iid);
            }
        }
        self.start_session(frame)
    }

    fn start_session(&self, frame: RelayFrame) -> Result<()> {
        let joiner_id = joiner_id_from_iid(frame.joiner_iid);
        let joiner_type = self.joiner_type_for_port(frame.joiner_udp_port);

        let info = match self.joiner_info(joiner_type, &joiner_id) {
            Some(info) => info,
            None => {
                debug!("no joiner entry for {joiner_id}; dropping relayed frame");
                return Ok(());
            }
        };
        if !self
            .inner
            .admission
            .steering_for(joiner_type)
            .contains(&joiner_id)
        {
            debug!("joiner {joiner_id} not in the {joiner_type} steering data");
            return Ok(());
        }

        let rx = {
            let mut sessions = self.inner.sessions.lock().expect("session map lock");
            if sessions.len() >= self.inner.max_sessions {
                warn!("joiner session limit {} reached; dropping {joiner_id}", self.inner.max_sessions);
                return Ok(());
            }
            let (tx, rx) = mpsc::unbounded_channel();
            tx.send(frame.encapsulation.clone())
                .expect("receiver held locally");
            sessions.insert(frame.joiner_iid, tx);
            rx
        };

        let secret = match joiner_type {
            JoinerType::MeshCoP => Some(info.pskd.clone().into_bytes()),
            JoinerType::Ae | JoinerType::Nmkp => None,
        };
        let conn = RelayConnection {
            controller: self.inner.admission.store().controller().clone(),
            joiner_iid: frame.joiner_iid,
            joiner_udp_port: frame.joiner_udp_port,
            joiner_router_locator: frame.joiner_router_locator,
            rx: tokio::sync::Mutex::new(rx),
            secret,
        };
        info!("joiner session for {joiner_id} (type {joiner_type}) started");
        tokio::spawn(self.clone().run_joiner_session(conn, info, joiner_type, joiner_id));
        Ok(())
    }

    async fn run_joiner_session(
        self,
        conn: RelayConnection,
        info: JoinerInfo,
        joiner_type: JoinerType,
        joiner_id: JoinerId,
    ) {
        let joiner_iid = conn.joiner_iid;
        let joiner_udp_port = conn.joiner_udp_port;
        let joiner_router_locator = conn.joiner_router_locator;
        let (endpoint, mut requests) = CoapEndpoint::new(Arc::new(conn));

        while let Some(request) = requests.recv().await {
            match request.uri_path().as_str() {
                uri::JOINER_FINALIZE => {
                    let accepted = match TlvList::decode(&request.payload) {
                        Ok(tlvs) => {
                            let finalize = FinalizeInfo::from_tlvs(&tlvs);
                            (self.inner.handlers.commissioning)(&info, &finalize)
                        }
                        Err(err) => {
                            warn!("bad JOIN_FIN.req from {joiner_id}: {err}");
                            false
                        }
                    };

                    let mut reply = TlvList::new();
                    reply.push(Tlv::u8(
                        TlvType::State,
                        if accepted { 0x01 } else { 0xFF },
                    ));
                    if let Err(err) = endpoint
                        .respond(&request, Code::CHANGED, reply.encode())
                        .await
                    {
                        warn!("failed sending JOIN_FIN.rsp to {joiner_id}: {err}");
                        break;
                    }

                    if accepted {
                        self.entrust(
                            &endpoint,
                            joiner_iid,
                            joiner_udp_port,
                            joiner_router_locator,
                            joiner_type,
                            &joiner_id,
                        )
                        .await;
                    }
                    break;
                }
                other => {
                    debug!("joiner {joiner_id} requested unknown {other}");
                    if request.typ == MessageType::Confirmable {
                        let _ = endpoint
                            .respond(&request, Code::NOT_FOUND, Bytes::new())
                            .await;
                    }
                }
            }
        }

        endpoint.close().await;
        self.inner
            .sessions
            .lock()
            .expect("session map lock")
            .remove(&joiner_iid);
        debug!("joiner session for {joiner_id} ended");
    }

    /// JOIN_ENT.ntf: hand the KEK to the Border Agent for the joiner router.
    async fn entrust(
        &self,
        endpoint: &CoapEndpoint,
        joiner_iid: [u8; JOINER_ID_LENGTH],
        joiner_udp_port: u16,
        joiner_router_locator: u16,
        joiner_type: JoinerType,
        joiner_id: &JoinerId,
    ) {
        let kek = match endpoint
            .connection()
            .export_key_material(KEK_LABEL, KEK_LENGTH)
            .await
        {
            Ok(kek) => kek,
            Err(err) => {
                // AE/NMKP joiners receive their keys through enrollment.
                debug!("no KEK for {joiner_id}: {err}");
                self.inner.admission.mark_commissioned(joiner_type, joiner_id);
                return;
            }
        };

        let iid_tlv = Tlv::new(TlvType::JoinerIid, joiner_iid.to_vec()).expect("8-byte IID");
        let kek_tlv = Tlv::new(TlvType::JoinerRouterKek, kek).expect("short KEK");
        let mut tlvs = TlvList::new();
        tlvs.push(iid_tlv);
        tlvs.push(Tlv::u16(TlvType::JoinerUdpPort, joiner_udp_port));
        tlvs.push(Tlv::u16(TlvType::JoinerRouterLocator, joiner_router_locator));
        tlvs.push(kek_tlv);

        match self
            .inner
            .admission
            .store()
            .controller()
            .mgmt_notify(uri::JOINER_ENTRUST, tlvs)
            .await
        {
            Ok(()) => {
                info!("joiner {joiner_id} commissioned, KEK entrusted");
                self.inner.admission.mark_commissioned(joiner_type, joiner_id);
            }
            Err(err) => warn!("JOIN_ENT.ntf for {joiner_id} failed: {err}"),
        }
    }
}
