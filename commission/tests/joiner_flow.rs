//! Joiner admission end to end: steering, relay, finalize, entrust.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;

use meshcop_commission::{
    iid_from_joiner_id, FinalizeInfo, HandlerSet, JoinerAdmission, JoinerSessionManager,
    RelayFrame, KEK_LABEL, KEK_LENGTH,
};
use meshcop_datasets::codec;
use meshcop_datasets::{CommissionerDataset, JoinerId, JoinerType, SteeringData};
use meshcop_mgmt::DatasetStore;
use meshcop_session::{
    derive_key_material, CoapEndpoint, PairConnection, SessionConfig, SessionController,
    SessionEvent,
};
use meshcop_wire::coap::{Code, Message};
use meshcop_wire::{uri, StateTlv, Tlv, TlvList, TlvType};

const JOINER_PORT: u16 = 1000;
const ROUTER_LOCATOR: u16 = 0x0c00;

/// What the mock Border Agent observed.
struct BaObservations {
    commissioner: Mutex<CommissionerDataset>,
    relay_tx: mpsc::UnboundedSender<RelayFrame>,
    entrust: mpsc::UnboundedSender<Vec<u8>>,
}

async fn run_border_agent(
    endpoint: CoapEndpoint,
    mut requests: mpsc::UnboundedReceiver<Message>,
    observations: Arc<BaObservations>,
) {
    while let Some(request) = requests.recv().await {
        match request.uri_path().as_str() {
            uri::PETITION => {
                let mut tlvs = TlvList::new();
                tlvs.push(Tlv::u8(TlvType::State, StateTlv::Accept.code()));
                tlvs.push(Tlv::u16(TlvType::CommissionerSessionId, 1));
                tlvs.push(Tlv::u16(TlvType::BorderAgentLocator, 0x0400));
                endpoint
                    .respond(&request, Code::CHANGED, tlvs.encode())
                    .await
                    .unwrap();
            }
            uri::KEEP_ALIVE | uri::COMMISSIONER_SET => {
                if request.uri_path() == uri::COMMISSIONER_SET {
                    let payload = TlvList::decode(&request.payload).unwrap();
                    let dataset = codec::commissioner_from_tlvs(&payload).unwrap();
                    observations
                        .commissioner
                        .lock()
                        .unwrap()
                        .merge_from_set(&dataset);
                }
                let mut tlvs = TlvList::new();
                tlvs.push(Tlv::u8(TlvType::State, StateTlv::Accept.code()));
                endpoint
                    .respond(&request, Code::CHANGED, tlvs.encode())
                    .await
                    .unwrap();
            }
            uri::RELAY_TX => {
                let frame = RelayFrame::decode(&request.payload).unwrap();
                observations.relay_tx.send(frame).unwrap();
            }
            uri::JOINER_ENTRUST => {
                let tlvs = TlvList::decode(&request.payload).unwrap();
                let kek = tlvs
                    .require(TlvType::JoinerRouterKek)
                    .unwrap()
                    .value()
                    .to_vec();
                observations.entrust.send(kek).unwrap();
            }
            other => panic!("border agent saw unexpected {other}"),
        }
    }
}

struct Rig {
    admission: JoinerAdmission,
    manager: JoinerSessionManager,
    ba_endpoint: CoapEndpoint,
    observations: Arc<BaObservations>,
    relay_tx: mpsc::UnboundedReceiver<RelayFrame>,
    entrust: mpsc::UnboundedReceiver<Vec<u8>>,
}

async fn commissioned_rig() -> Rig {
    let (a, b) = PairConnection::pair();
    let (relay_tx_sender, relay_tx) = mpsc::unbounded_channel();
    let (entrust_sender, entrust) = mpsc::unbounded_channel();
    let observations = Arc::new(BaObservations {
        commissioner: Mutex::new(CommissionerDataset::default()),
        relay_tx: relay_tx_sender,
        entrust: entrust_sender,
    });

    let (ba_endpoint, ba_requests) = CoapEndpoint::new(Arc::new(b));
    tokio::spawn(run_border_agent(
        ba_endpoint.clone(),
        ba_requests,
        observations.clone(),
    ));

    let (endpoint, requests_rx) = CoapEndpoint::new(Arc::new(a));
    let (controller, mut events) =
        SessionController::new(endpoint, requests_rx, SessionConfig::default());
    let store = DatasetStore::new(controller.clone());
    let admission = JoinerAdmission::new(store);
    let manager = JoinerSessionManager::new(admission.clone(), HandlerSet::default(), 8);

    // Route relay events the way the application's event loop does.
    {
        let manager = manager.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if let SessionEvent::RelayRx(payload) = event {
                    manager.handle_relay_rx(&payload).await.unwrap();
                }
            }
        });
    }

    controller.petition().await.unwrap();

    Rig {
        admission,
        manager,
        ba_endpoint,
        observations,
        relay_tx,
        entrust,
    }
}

/// Push one joiner CoAP message through the relay path.
async fn relay_from_joiner(rig: &Rig, joiner_id: &JoinerId, message: &Message) {
    let frame = RelayFrame {
        joiner_iid: iid_from_joiner_id(joiner_id),
        joiner_udp_port: JOINER_PORT,
        joiner_router_locator: ROUTER_LOCATOR,
        encapsulation: Bytes::from(message.encode().unwrap().to_vec()),
        kek: None,
    };
    let notification = Message::request(false, Code::POST, uri::RELAY_RX)
        .with_payload(frame.to_tlvs().unwrap().encode());
    rig.ba_endpoint.notify(notification).await.unwrap();
}

fn finalize_request() -> Message {
    let info = FinalizeInfo {
        vendor_name: "Acme".into(),
        vendor_model: "Sensor-1".into(),
        vendor_sw_version: "1.0".into(),
        ..Default::default()
    };
    let mut message = Message::request(true, Code::POST, uri::JOINER_FINALIZE)
        .with_payload(info.to_tlvs().unwrap().encode());
    message.message_id = 0x42;
    message.token = Bytes::copy_from_slice(&[0xA, 0xB, 0xC, 0xD]);
    message
}

async fn recv_or_timeout<T>(rx: &mut mpsc::UnboundedReceiver<T>, what: &str) -> T {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {what}"))
        .unwrap_or_else(|| panic!("{what} channel closed"))
}

#[tokio::test]
async fn test_enable_joiner_and_commission() {
    let mut rig = commissioned_rig().await;
    let eui64: u64 = 0x0123_4567_89AB_CDEF;
    let joiner_id = JoinerId::from_eui64(eui64);

    rig.admission
        .enable_joiner(JoinerType::MeshCoP, eui64, "J01NME", "")
        .await
        .unwrap();

    // The pushed steering TLV is a 1-16 byte bloom with the joiner's bit set.
    let steering = rig
        .observations
        .commissioner
        .lock()
        .unwrap()
        .steering_data
        .clone()
        .expect("steering data pushed");
    assert!((1..=16).contains(&steering.len()));
    assert!(steering.contains(&joiner_id));

    // Joiner runs its (seamed) handshake and finalizes.
    relay_from_joiner(&rig, &joiner_id, &finalize_request()).await;

    // JOIN_FIN.rsp comes back through the relay and accepts.
    let frame = recv_or_timeout(&mut rig.relay_tx, "JOIN_FIN.rsp relay frame").await;
    assert_eq!(frame.joiner_iid, iid_from_joiner_id(&joiner_id));
    let response = Message::decode(&frame.encapsulation).unwrap();
    assert_eq!(response.code, Code::CHANGED);
    assert_eq!(response.token.as_ref(), &[0xA, 0xB, 0xC, 0xD]);
    let state = TlvList::decode(&response.payload)
        .unwrap()
        .require(TlvType::State)
        .unwrap()
        .as_u8()
        .unwrap();
    assert_eq!(state, 0x01);

    // The KEK reaches the Border Agent and matches the joiner's derivation.
    let kek = recv_or_timeout(&mut rig.entrust, "JOIN_ENT.ntf").await;
    assert_eq!(
        kek,
        derive_key_material(b"J01NME", KEK_LABEL, KEK_LENGTH).unwrap()
    );

    assert!(rig
        .admission
        .is_joiner_commissioned(JoinerType::MeshCoP, eui64));
}

#[tokio::test]
async fn test_wildcard_fallback_commissions_but_tracks_under_id_zero() {
    let mut rig = commissioned_rig().await;
    let eui64: u64 = 0xDEAD_BEEF_0000_0001;
    let joiner_id = JoinerId::from_eui64(eui64);

    rig.admission
        .enable_all_joiners(JoinerType::MeshCoP, "J01NME", "")
        .await
        .unwrap();
    assert!(rig
        .observations
        .commissioner
        .lock()
        .unwrap()
        .steering_data
        .clone()
        .unwrap()
        .is_all_ones());

    relay_from_joiner(&rig, &joiner_id, &finalize_request()).await;

    let kek = recv_or_timeout(&mut rig.entrust, "JOIN_ENT.ntf").await;
    assert_eq!(kek.len(), KEK_LENGTH);

    // Wildcard admissions are tracked only under the reserved ID.
    assert!(!rig
        .admission
        .is_joiner_commissioned(JoinerType::MeshCoP, eui64));
    assert!(rig.admission.is_joiner_commissioned(JoinerType::MeshCoP, 0));
}

#[tokio::test]
async fn test_steering_idempotence_on_disable() {
    let rig = commissioned_rig().await;
    let eui64: u64 = 0x1122_3344_5566_7788;

    let before = rig.admission.steering_for(JoinerType::MeshCoP);
    assert_eq!(before, SteeringData::disallow_all());

    rig.admission
        .enable_joiner(JoinerType::MeshCoP, eui64, "J01NME", "")
        .await
        .unwrap();
    rig.admission
        .disable_joiner(JoinerType::MeshCoP, eui64)
        .await
        .unwrap();

    assert_eq!(rig.admission.steering_for(JoinerType::MeshCoP), before);
    assert!(rig
        .admission
        .lookup(JoinerType::MeshCoP, &JoinerId::from_eui64(eui64))
        .is_none());
    let pushed = rig
        .observations
        .commissioner
        .lock()
        .unwrap()
        .steering_data
        .clone()
        .unwrap();
    assert!(pushed.is_all_zeros());
}

#[tokio::test]
async fn test_disable_unknown_joiner_is_not_found() {
    let rig = commissioned_rig().await;
    let err = rig
        .admission
        .disable_joiner(JoinerType::MeshCoP, 0x5555)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), meshcop_wire::ErrorKind::NotFound);
}

#[tokio::test]
async fn test_unenabled_joiner_is_dropped() {
    let rig = commissioned_rig().await;
    let joiner_id = JoinerId::from_eui64(0x9999);

    relay_from_joiner(&rig, &joiner_id, &finalize_request()).await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(rig.manager.active_sessions(), 0);
}

#[tokio::test]
async fn test_duplicate_enable_is_already_exists() {
    let rig = commissioned_rig().await;
    rig.admission
        .enable_joiner(JoinerType::MeshCoP, 0x77, "PSKD77", "")
        .await
        .unwrap();
    let err = rig
        .admission
        .enable_joiner(JoinerType::MeshCoP, 0x77, "PSKD77", "")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), meshcop_wire::ErrorKind::AlreadyExists);
}
