//! The commissioner session controller.
//!
//! Drives petition against the Border Agent, retains commissioner status with
//! periodic keep-alives, and demultiplexes inbound notifications into session
//! events.
//!
//! ```text
//! Disabled --petition--> Petitioning --accept--> Active --ka-fail/resign--> Disabled
//!                                    \--reject--> Disabled
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use meshcop_datasets::codec::channel_mask_from_tlv;
use meshcop_datasets::ChannelMask;
use meshcop_wire::coap::{Code, Message, MessageType};
use meshcop_wire::{uri, Error, ErrorKind, Result, StateTlv, Tlv, TlvList, TlvType};

use crate::coap::CoapEndpoint;

/// Keep-alive timeouts tolerated before the session is torn down.
const MAX_KEEP_ALIVE_STRIKES: u32 = 3;

/// Session controller states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Disabled,
    Petitioning,
    Active,
}

/// Configuration of a commissioner session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Commissioner identifier presented in the petition.
    pub commissioner_id: String,
    /// Whether the commissioner operates in CCM mode.
    pub ccm: bool,
    /// Interval between LEAD_KA.req transmissions.
    pub keep_alive_interval: Duration,
    /// Per-operation response budget.
    pub timeout: Duration,
    /// Signed commissioner token obtained before this session (CCM).
    pub signed_token: Option<Vec<u8>>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            commissioner_id: "commissioner".to_string(),
            ccm: false,
            keep_alive_interval: Duration::from_secs(30),
            timeout: crate::coap::DEFAULT_TIMEOUT,
            signed_token: None,
        }
    }
}

/// Events surfaced to the application.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The controller changed state.
    StateChanged(State),
    /// MGMT_DATASET_CHANGED.ntf arrived; the caller should re-pull.
    DatasetChanged,
    /// MGMT_PANID_CONFLICT.ans arrived.
    PanIdConflict {
        peer: String,
        pan_id: u16,
        channel_mask: ChannelMask,
    },
    /// MGMT_ED_REPORT.ans arrived.
    EnergyReport {
        peer: String,
        channel_mask: ChannelMask,
        energy_list: Vec<u8>,
    },
    /// RLY_RX.ntf arrived; payload is the raw relay TLV set.
    RelayRx(Bytes),
}

struct ControllerInner {
    coap: CoapEndpoint,
    config: SessionConfig,
    state: Mutex<State>,
    session_id: Mutex<Option<u16>>,
    border_agent_locator: Mutex<Option<u16>>,
    existing_commissioner_id: Mutex<Option<String>>,
    signed_token: Mutex<Option<Vec<u8>>>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    /// Bumped on resign/demote so stale keep-alive tasks stop.
    keep_alive_generation: AtomicU64,
}

/// Handle to the commissioner session; cheap to clone.
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<ControllerInner>,
}

impl SessionController {
    /// Wrap a CoAP endpoint to the Border Agent. The returned receiver
    /// carries session events; the inbound-request dispatcher runs until the
    /// endpoint closes.
    pub fn new(
        coap: CoapEndpoint,
        requests_rx: mpsc::UnboundedReceiver<Message>,
        config: SessionConfig,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let signed_token = config.signed_token.clone();
        let controller = Self {
            inner: Arc::new(ControllerInner {
                coap,
                config,
                state: Mutex::new(State::Disabled),
                session_id: Mutex::new(None),
                border_agent_locator: Mutex::new(None),
                existing_commissioner_id: Mutex::new(None),
                signed_token: Mutex::new(signed_token),
                events_tx,
                keep_alive_generation: AtomicU64::new(0),
            }),
        };
        tokio::spawn(controller.clone().dispatch_loop(requests_rx));
        (controller, events_rx)
    }

    /// Current controller state.
    pub fn state(&self) -> State {
        *self.inner.state.lock().expect("state lock")
    }

    pub fn is_active(&self) -> bool {
        self.state() == State::Active
    }

    pub fn is_ccm_mode(&self) -> bool {
        self.inner.config.ccm
    }

    /// The commissioner ID presented in petitions.
    pub fn commissioner_id(&self) -> String {
        self.inner.config.commissioner_id.clone()
    }

    /// The session ID assigned by the Leader, once Active.
    pub fn session_id(&self) -> Result<u16> {
        self.inner
            .session_id
            .lock()
            .expect("session id lock")
            .ok_or_else(|| Error::invalid_state("the commissioner is not active"))
    }

    /// The Border Agent RLOC16 from the petition reply.
    pub fn border_agent_locator(&self) -> Result<u16> {
        self.inner
            .border_agent_locator
            .lock()
            .expect("locator lock")
            .ok_or_else(|| Error::invalid_state("the commissioner is not active"))
    }

    /// The ID of the commissioner that rejected our petition, if any.
    pub fn existing_commissioner_id(&self) -> Option<String> {
        self.inner
            .existing_commissioner_id
            .lock()
            .expect("id lock")
            .clone()
    }

    /// The signed commissioner token attached to CCM petitions.
    pub fn signed_token(&self) -> Option<Vec<u8>> {
        self.inner.signed_token.lock().expect("token lock").clone()
    }

    pub(crate) fn store_signed_token(&self, token: Vec<u8>) {
        *self.inner.signed_token.lock().expect("token lock") = Some(token);
    }

    /// The per-operation timeout from the session config.
    pub fn timeout(&self) -> Duration {
        self.inner.config.timeout
    }

    /// The CoAP endpoint of the Border Agent session.
    pub fn coap(&self) -> &CoapEndpoint {
        &self.inner.coap
    }

    fn set_state(&self, state: State) {
        let changed = {
            let mut guard = self.inner.state.lock().expect("state lock");
            let changed = *guard != state;
            *guard = state;
            changed
        };
        if changed {
            debug!("session state -> {state:?}");
            let _ = self.inner.events_tx.send(SessionEvent::StateChanged(state));
        }
    }

    /// Error unless the session is Active.
    pub fn ensure_active(&self) -> Result<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(Error::invalid_state("the commissioner is not active"))
        }
    }

    /// Send LEAD_PET.req and become the network's commissioner.
    ///
    /// On rejection the existing commissioner's ID is retained and available
    /// through [`existing_commissioner_id`](Self::existing_commissioner_id).
    pub async fn petition(&self) -> Result<(u16, u16)> {
        {
            let mut state = self.inner.state.lock().expect("state lock");
            if *state != State::Disabled {
                return Err(Error::invalid_state("petition while already petitioning or active"));
            }
            *state = State::Petitioning;
        }
        let _ = self
            .inner
            .events_tx
            .send(SessionEvent::StateChanged(State::Petitioning));

        let mut tlvs = TlvList::new();
        tlvs.push(Tlv::string(TlvType::CommissionerId, &self.inner.config.commissioner_id)?);
        if self.inner.config.ccm {
            if let Some(token) = self.signed_token() {
                tlvs.push(Tlv::new(TlvType::CommissionerToken, token)?);
            }
        }

        let request =
            Message::request(true, Code::POST, uri::PETITION).with_payload(tlvs.encode());
        let outcome = self
            .inner
            .coap
            .request(request, self.inner.config.timeout)
            .await;
        let response = match outcome {
            Ok(response) => response,
            Err(err) => {
                self.set_state(State::Disabled);
                return Err(err);
            }
        };

        let (session_id, locator) = match self.parse_petition_reply(&response) {
            Ok(parsed) => parsed,
            Err(err) => {
                self.set_state(State::Disabled);
                return Err(err);
            }
        };
        *self.inner.session_id.lock().expect("session id lock") = Some(session_id);
        *self
            .inner
            .border_agent_locator
            .lock()
            .expect("locator lock") = Some(locator);
        self.set_state(State::Active);
        info!("petition accepted, session id {session_id}, border agent locator {locator:#06x}");

        let generation = self
            .inner
            .keep_alive_generation
            .fetch_add(1, Ordering::SeqCst)
            + 1;
        tokio::spawn(self.clone().keep_alive_loop(generation));

        Ok((session_id, locator))
    }

    fn parse_petition_reply(&self, response: &Message) -> Result<(u16, u16)> {
        let tlvs = TlvList::decode(&response.payload)?;
        let state = StateTlv::from_code(tlvs.require(TlvType::State)?.as_u8()?)?;
        if state != StateTlv::Accept {
            if let Some(id) = tlvs.first(TlvType::CommissionerId) {
                *self
                    .inner
                    .existing_commissioner_id
                    .lock()
                    .expect("id lock") = Some(id.as_str()?.to_string());
            }
            return Err(Error::rejected(match self.existing_commissioner_id() {
                Some(id) => format!("petition rejected, active commissioner is \"{id}\""),
                None => "petition rejected".to_string(),
            }));
        }
        let session_id = tlvs.require(TlvType::CommissionerSessionId)?.as_u16()?;
        let locator = tlvs.require(TlvType::BorderAgentLocator)?.as_u16()?;
        Ok((session_id, locator))
    }

    async fn send_keep_alive(&self, keep: bool) -> Result<StateTlv> {
        let mut tlvs = TlvList::new();
        tlvs.push(Tlv::u8(
            TlvType::State,
            if keep { StateTlv::Accept.code() } else { 0x00 },
        ));
        tlvs.push(Tlv::u16(TlvType::CommissionerSessionId, self.session_id()?));
        let request =
            Message::request(true, Code::POST, uri::KEEP_ALIVE).with_payload(tlvs.encode());
        let response = self
            .inner
            .coap
            .request(request, self.inner.config.timeout)
            .await?;
        let tlvs = TlvList::decode(&response.payload)?;
        StateTlv::from_code(tlvs.require(TlvType::State)?.as_u8()?)
    }

    async fn keep_alive_loop(self, generation: u64) {
        let mut strikes = 0u32;
        loop {
            tokio::time::sleep(self.inner.config.keep_alive_interval).await;
            if self.inner.keep_alive_generation.load(Ordering::SeqCst) != generation
                || !self.is_active()
            {
                return;
            }
            match self.send_keep_alive(true).await {
                Ok(StateTlv::Accept) => strikes = 0,
                Ok(_) => {
                    // An explicit reject fails in-flight callers the same
                    // way silence does: with Timeout.
                    warn!("keep-alive rejected by the leader");
                    self.demote(Error::timeout("keep-alive rejected"));
                    return;
                }
                Err(err) if err.kind() == ErrorKind::Timeout => {
                    strikes += 1;
                    warn!("keep-alive timeout {strikes}/{MAX_KEEP_ALIVE_STRIKES}");
                    if strikes >= MAX_KEEP_ALIVE_STRIKES {
                        self.demote(Error::timeout("keep-alive lost"));
                        return;
                    }
                }
                Err(err) => {
                    warn!("keep-alive failed: {err}");
                    self.demote(err);
                    return;
                }
            }
        }
    }

    /// Drop to Disabled and fail everything in flight.
    fn demote(&self, err: Error) {
        self.inner.keep_alive_generation.fetch_add(1, Ordering::SeqCst);
        *self.inner.session_id.lock().expect("session id lock") = None;
        *self
            .inner
            .border_agent_locator
            .lock()
            .expect("locator lock") = None;
        self.set_state(State::Disabled);
        self.inner.coap.fail_all(err);
    }

    /// Resign commissioner status: LEAD_KA.req with State=0, then teardown.
    pub async fn resign(&self) -> Result<()> {
        self.ensure_active()?;
        if let Err(err) = self.send_keep_alive(false).await {
            debug!("resign keep-alive failed: {err}");
        }
        self.demote(Error::cancelled("resigned"));
        self.inner.coap.close().await;
        Ok(())
    }

    /// Cancel all outstanding requests without resigning.
    pub fn abort_requests(&self) {
        self.inner.coap.abort();
    }

    /// Issue a MGMT-style confirmable request on the session and return the
    /// decoded response TLVs. Fails with `Rejected` on a non-2.xx code.
    pub async fn mgmt_request(&self, uri_path: &str, tlvs: TlvList) -> Result<TlvList> {
        self.ensure_active()?;
        let request =
            Message::request(true, Code::POST, uri_path).with_payload(tlvs.encode());
        let response = self
            .inner
            .coap
            .request(request, self.inner.config.timeout)
            .await?;
        if !response.code.is_success() {
            return Err(Error::rejected(format!(
                "{uri_path} answered {}",
                response.code
            )));
        }
        TlvList::decode(&response.payload)
    }

    /// Send a non-confirmable MGMT notification (fire and forget).
    pub async fn mgmt_notify(&self, uri_path: &str, tlvs: TlvList) -> Result<()> {
        self.ensure_active()?;
        let message =
            Message::request(false, Code::POST, uri_path).with_payload(tlvs.encode());
        self.inner.coap.notify(message).await
    }

    async fn dispatch_loop(self, mut requests_rx: mpsc::UnboundedReceiver<Message>) {
        while let Some(request) = requests_rx.recv().await {
            if let Err(err) = self.dispatch(&request).await {
                warn!("failed handling {}: {err}", request.uri_path());
            }
        }
        debug!("session request dispatcher stopped");
    }

    async fn dispatch(&self, request: &Message) -> Result<()> {
        let uri_path = request.uri_path();
        match uri_path.as_str() {
            uri::DATASET_CHANGED => {
                self.respond_ok(request).await?;
                let _ = self.inner.events_tx.send(SessionEvent::DatasetChanged);
            }
            uri::PANID_CONFLICT => {
                let tlvs = TlvList::decode(&request.payload)?;
                let pan_id = tlvs.require(TlvType::PanId)?.as_u16()?;
                let channel_mask = channel_mask_from_tlv(tlvs.require(TlvType::ChannelMask)?)?;
                self.respond_ok(request).await?;
                let _ = self.inner.events_tx.send(SessionEvent::PanIdConflict {
                    peer: peer_address(&tlvs),
                    pan_id,
                    channel_mask,
                });
            }
            uri::ENERGY_REPORT => {
                let tlvs = TlvList::decode(&request.payload)?;
                let channel_mask = channel_mask_from_tlv(tlvs.require(TlvType::ChannelMask)?)?;
                let energy_list = tlvs.require(TlvType::EnergyList)?.value().to_vec();
                self.respond_ok(request).await?;
                let _ = self.inner.events_tx.send(SessionEvent::EnergyReport {
                    peer: peer_address(&tlvs),
                    channel_mask,
                    energy_list,
                });
            }
            uri::RELAY_RX => {
                // RLY_RX.ntf is non-confirmable; no response.
                let _ = self
                    .inner
                    .events_tx
                    .send(SessionEvent::RelayRx(request.payload.clone()));
            }
            other => {
                debug!("no handler for inbound {other}");
                if request.typ == MessageType::Confirmable {
                    self.inner
                        .coap
                        .respond(request, Code::NOT_FOUND, Bytes::new())
                        .await?;
                }
            }
        }
        Ok(())
    }

    async fn respond_ok(&self, request: &Message) -> Result<()> {
        if request.typ == MessageType::Confirmable {
            self.inner
                .coap
                .respond(request, Code::CHANGED, Bytes::new())
                .await?;
        }
        Ok(())
    }
}

/// Responder address from an optional IPv6 Address TLV.
fn peer_address(tlvs: &TlvList) -> String {
    tlvs.first(TlvType::Ipv6Address)
        .and_then(|tlv| {
            let octets: [u8; 16] = tlv.value().as_ref().try_into().ok()?;
            Some(std::net::Ipv6Addr::from(octets).to_string())
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::PairConnection;
    use std::sync::Arc;

    /// Minimal in-process leader answering petition and keep-alive.
    fn spawn_leader(conn: PairConnection, accept: bool) {
        let (endpoint, mut requests) = CoapEndpoint::new(Arc::new(conn));
        tokio::spawn(async move {
            while let Some(request) = requests.recv().await {
                let mut tlvs = TlvList::new();
                match request.uri_path().as_str() {
                    uri::PETITION => {
                        if accept {
                            tlvs.push(Tlv::u8(TlvType::State, StateTlv::Accept.code()));
                            tlvs.push(Tlv::u16(TlvType::CommissionerSessionId, 0x1234));
                            tlvs.push(Tlv::u16(TlvType::BorderAgentLocator, 0x0400));
                        } else {
                            tlvs.push(Tlv::u8(TlvType::State, StateTlv::Reject.code()));
                            tlvs.push(Tlv::string(TlvType::CommissionerId, "other-comm").unwrap());
                        }
                    }
                    uri::KEEP_ALIVE => {
                        tlvs.push(Tlv::u8(TlvType::State, StateTlv::Accept.code()));
                    }
                    _ => {}
                }
                endpoint
                    .respond(&request, Code::CHANGED, tlvs.encode())
                    .await
                    .unwrap();
            }
        });
    }

    fn controller_over(
        conn: PairConnection,
        config: SessionConfig,
    ) -> (SessionController, mpsc::UnboundedReceiver<SessionEvent>) {
        let (endpoint, requests_rx) = CoapEndpoint::new(Arc::new(conn));
        SessionController::new(endpoint, requests_rx, config)
    }

    #[tokio::test]
    async fn test_petition_accept() {
        let (a, b) = PairConnection::pair();
        spawn_leader(b, true);
        let (controller, _events) = controller_over(a, SessionConfig::default());

        let (session_id, locator) = controller.petition().await.unwrap();
        assert_eq!(session_id, 0x1234);
        assert_eq!(locator, 0x0400);
        assert!(controller.is_active());
        assert_eq!(controller.session_id().unwrap(), 0x1234);
    }

    #[tokio::test]
    async fn test_petition_reject_yields_existing_id() {
        let (a, b) = PairConnection::pair();
        spawn_leader(b, false);
        let (controller, _events) = controller_over(a, SessionConfig::default());

        let err = controller.petition().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Rejected);
        assert_eq!(
            controller.existing_commissioner_id().as_deref(),
            Some("other-comm")
        );
        assert_eq!(controller.state(), State::Disabled);
    }

    #[tokio::test]
    async fn test_mgmt_request_requires_active() {
        let (a, _b) = PairConnection::pair();
        let (controller, _events) = controller_over(a, SessionConfig::default());
        let err = controller
            .mgmt_request(uri::ACTIVE_SET, TlvList::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keep_alive_strikes_demote() {
        let (a, b) = PairConnection::pair();
        // Leader accepts the petition, then goes silent.
        let (endpoint, mut requests) = CoapEndpoint::new(Arc::new(b));
        tokio::spawn(async move {
            if let Some(request) = requests.recv().await {
                let mut tlvs = TlvList::new();
                tlvs.push(Tlv::u8(TlvType::State, StateTlv::Accept.code()));
                tlvs.push(Tlv::u16(TlvType::CommissionerSessionId, 7));
                tlvs.push(Tlv::u16(TlvType::BorderAgentLocator, 0x0400));
                endpoint
                    .respond(&request, Code::CHANGED, tlvs.encode())
                    .await
                    .unwrap();
            }
            // Swallow keep-alives without answering.
            while requests.recv().await.is_some() {}
        });

        let config = SessionConfig {
            keep_alive_interval: Duration::from_millis(100),
            timeout: Duration::from_millis(50),
            ..Default::default()
        };
        let (controller, mut events) = controller_over(a, config);
        controller.petition().await.unwrap();

        // Three missed keep-alives must drop the session.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(600);
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(SessionEvent::StateChanged(State::Disabled)) => break,
                    Some(_) => continue,
                    None => panic!("event stream ended early"),
                },
                _ = tokio::time::sleep_until(deadline) => panic!("session never demoted"),
            }
        }
        assert!(!controller.is_active());
        assert!(controller.session_id().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_keep_alive_reject_fails_in_flight_with_timeout() {
        let (a, b) = PairConnection::pair();
        // Leader accepts the petition, rejects the first keep-alive, and
        // leaves management requests unanswered.
        let (endpoint, mut requests) = CoapEndpoint::new(Arc::new(b));
        tokio::spawn(async move {
            while let Some(request) = requests.recv().await {
                let mut tlvs = TlvList::new();
                match request.uri_path().as_str() {
                    uri::PETITION => {
                        tlvs.push(Tlv::u8(TlvType::State, StateTlv::Accept.code()));
                        tlvs.push(Tlv::u16(TlvType::CommissionerSessionId, 9));
                        tlvs.push(Tlv::u16(TlvType::BorderAgentLocator, 0x0400));
                    }
                    uri::KEEP_ALIVE => {
                        tlvs.push(Tlv::u8(TlvType::State, StateTlv::Reject.code()));
                    }
                    _ => continue,
                }
                endpoint
                    .respond(&request, Code::CHANGED, tlvs.encode())
                    .await
                    .unwrap();
            }
        });

        let config = SessionConfig {
            keep_alive_interval: Duration::from_millis(100),
            timeout: Duration::from_secs(30),
            ..Default::default()
        };
        let (controller, mut events) = controller_over(a, config);
        controller.petition().await.unwrap();

        // A management request left hanging when the reject lands.
        let pending = {
            let controller = controller.clone();
            tokio::spawn(async move {
                controller
                    .mgmt_request(uri::ACTIVE_GET, TlvList::new())
                    .await
            })
        };

        let deadline = tokio::time::Instant::now() + Duration::from_secs(600);
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(SessionEvent::StateChanged(State::Disabled)) => break,
                    Some(_) => continue,
                    None => panic!("event stream ended early"),
                },
                _ = tokio::time::sleep_until(deadline) => panic!("session never demoted"),
            }
        }

        let err = pending.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(!controller.is_active());
    }
}
