//! End-to-end dataset flows against an in-process Border Agent.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;

use meshcop_datasets::codec;
use meshcop_datasets::{
    ActiveDataset, ActiveFields, BbrDataset, Channel, ChannelMask, CommissionerDataset,
    NetworkData, PendingDataset, Timestamp,
};
use meshcop_mgmt::{DatasetStore, Management};
use meshcop_session::{
    CoapEndpoint, PairConnection, SessionConfig, SessionController, SessionEvent,
};
use meshcop_wire::coap::{Code, Message};
use meshcop_wire::{uri, ErrorKind, StateTlv, Tlv, TlvList, TlvType};

const SESSION_ID: u16 = 0x1234;
const LOCATOR: u16 = 0x0400;

#[derive(Clone)]
struct LeaderState {
    inner: Arc<Mutex<NetworkData>>,
}

impl LeaderState {
    fn new() -> Self {
        let mut pskc = [0u8; 16];
        pskc.copy_from_slice(&hex::decode("3aa55f91ca47d1e4e71a08cb35e91591").unwrap());
        let data = NetworkData {
            active_dataset: ActiveDataset {
                active_timestamp: Some(Timestamp::new(10, 0, false)),
                channel: Some(Channel {
                    page: 0,
                    number: 15,
                }),
                channel_mask: Some(ChannelMask::from_bits(0, 0x07FF_F800)),
                extended_pan_id: Some([0xDE, 0xAD, 0x00, 0xBE, 0xEF, 0x00, 0xCA, 0xFE]),
                mesh_local_prefix: Some([0xFD, 0xDE, 0xAD, 0x00, 0xBE, 0xEF, 0x00, 0x00]),
                network_master_key: Some([0x11; 16]),
                network_name: Some("openthread-test".into()),
                pan_id: Some(0xFACE),
                pskc: Some(pskc),
                ..Default::default()
            },
            pending_dataset: PendingDataset::default(),
            comm_dataset: CommissionerDataset {
                border_agent_locator: Some(LOCATOR),
                session_id: Some(SESSION_ID),
                joiner_udp_port: Some(1000),
                ..Default::default()
            },
            bbr_dataset: BbrDataset::default(),
        };
        Self {
            inner: Arc::new(Mutex::new(data)),
        }
    }

    fn snapshot(&self) -> NetworkData {
        self.inner.lock().unwrap().clone()
    }
}

fn accept_reply() -> TlvList {
    let mut tlvs = TlvList::new();
    tlvs.push(Tlv::u8(TlvType::State, StateTlv::Accept.code()));
    tlvs
}

async fn run_border_agent(
    endpoint: CoapEndpoint,
    mut requests: mpsc::UnboundedReceiver<Message>,
    state: LeaderState,
) {
    while let Some(request) = requests.recv().await {
        let payload = TlvList::decode(&request.payload).unwrap_or_default();
        let reply = match request.uri_path().as_str() {
            uri::PETITION => {
                let mut tlvs = accept_reply();
                tlvs.push(Tlv::u16(TlvType::CommissionerSessionId, SESSION_ID));
                tlvs.push(Tlv::u16(TlvType::BorderAgentLocator, LOCATOR));
                Some(tlvs)
            }
            uri::KEEP_ALIVE => Some(accept_reply()),
            uri::ACTIVE_GET => {
                let data = state.snapshot();
                Some(codec::active_to_tlvs(&data.active_dataset).unwrap())
            }
            uri::ACTIVE_SET => {
                let dataset = codec::active_from_tlvs(&payload).unwrap();
                state
                    .inner
                    .lock()
                    .unwrap()
                    .active_dataset
                    .merge_from(&dataset);
                Some(accept_reply())
            }
            uri::PENDING_GET => {
                let data = state.snapshot();
                Some(codec::pending_to_tlvs(&data.pending_dataset).unwrap())
            }
            uri::PENDING_SET => {
                let dataset = codec::pending_from_tlvs(&payload).unwrap();
                state
                    .inner
                    .lock()
                    .unwrap()
                    .pending_dataset
                    .merge_from(&dataset);
                Some(accept_reply())
            }
            uri::COMMISSIONER_GET => {
                let data = state.snapshot();
                Some(codec::commissioner_to_tlvs(&data.comm_dataset).unwrap())
            }
            uri::COMMISSIONER_SET => {
                let dataset = codec::commissioner_from_tlvs(&payload).unwrap();
                state
                    .inner
                    .lock()
                    .unwrap()
                    .comm_dataset
                    .merge_from_set(&dataset);
                Some(accept_reply())
            }
            uri::BBR_GET => {
                let data = state.snapshot();
                Some(codec::bbr_to_tlvs(&data.bbr_dataset).unwrap())
            }
            uri::BBR_SET => {
                let dataset = codec::bbr_from_tlvs(&payload).unwrap();
                state.inner.lock().unwrap().bbr_dataset.merge_from(&dataset);
                Some(accept_reply())
            }
            uri::PANID_QUERY => {
                // Answer asynchronously with a conflict for the queried PAN.
                let pan_id = payload.require(TlvType::PanId).unwrap().as_u16().unwrap();
                let mask = payload.require(TlvType::ChannelMask).unwrap().clone();
                let mut answer = TlvList::new();
                answer.push(Tlv::u16(TlvType::PanId, pan_id));
                answer.push(mask);
                let message = Message::request(false, Code::POST, uri::PANID_CONFLICT)
                    .with_payload(answer.encode());
                endpoint.notify(message).await.unwrap();
                None
            }
            uri::ENERGY_SCAN => {
                let mask = payload.require(TlvType::ChannelMask).unwrap().clone();
                let mut answer = TlvList::new();
                answer.push(mask);
                answer.push(Tlv::new(TlvType::EnergyList, vec![0x40, 0x41, 0x42]).unwrap());
                answer.push(
                    Tlv::new(
                        TlvType::Ipv6Address,
                        "fdde:ad00:beef::42"
                            .parse::<std::net::Ipv6Addr>()
                            .unwrap()
                            .octets()
                            .to_vec(),
                    )
                    .unwrap(),
                );
                let message = Message::request(false, Code::POST, uri::ENERGY_REPORT)
                    .with_payload(answer.encode());
                endpoint.notify(message).await.unwrap();
                None
            }
            uri::MLR => {
                let mut tlvs = TlvList::new();
                tlvs.push(Tlv::u8(TlvType::State, 0x00));
                Some(tlvs)
            }
            _ => None,
        };
        if let Some(tlvs) = reply {
            endpoint
                .respond(&request, Code::CHANGED, tlvs.encode())
                .await
                .unwrap();
        }
    }
}

struct Rig {
    controller: SessionController,
    store: DatasetStore,
    management: Management,
    leader: LeaderState,
    events: mpsc::UnboundedReceiver<SessionEvent>,
}

async fn commissioned_rig() -> Rig {
    let (a, b) = PairConnection::pair();
    let leader = LeaderState::new();

    let (ba_endpoint, ba_requests) = CoapEndpoint::new(Arc::new(b));
    tokio::spawn(run_border_agent(ba_endpoint, ba_requests, leader.clone()));

    let (endpoint, requests_rx) = CoapEndpoint::new(Arc::new(a));
    let (controller, events) =
        SessionController::new(endpoint, requests_rx, SessionConfig::default());
    let store = DatasetStore::new(controller.clone());
    let management = Management::new(controller.clone());

    controller.petition().await.unwrap();
    store.pull_all().await.unwrap();

    Rig {
        controller,
        store,
        management,
        leader,
        events,
    }
}

#[tokio::test]
async fn test_petition_and_pull() {
    let rig = commissioned_rig().await;

    let session_id = rig.controller.session_id().unwrap();
    assert!((1..=65535).contains(&session_id));
    assert_eq!(rig.controller.border_agent_locator().unwrap(), LOCATOR);

    let active = rig.store.active(ActiveFields::all());
    assert_eq!(active.network_name.as_deref(), Some("openthread-test"));
    assert_eq!(active.pan_id, Some(0xFACE));
    let commissioner = rig.store.commissioner();
    assert_eq!(commissioner.session_id, Some(SESSION_ID));
    assert_eq!(commissioner.joiner_udp_port, Some(1000));
}

#[tokio::test]
async fn test_channel_change_with_delay() {
    let rig = commissioned_rig().await;

    let dataset = PendingDataset {
        active: ActiveDataset {
            channel: Some(Channel {
                page: 0,
                number: 26,
            }),
            ..Default::default()
        },
        delay_timer: Some(5000),
        ..Default::default()
    };
    rig.store.set_pending(dataset).await.unwrap();

    // Local mirror carries both fields.
    let pending = rig.store.pending();
    assert_eq!(pending.active.channel.map(|c| c.number), Some(26));
    assert_eq!(pending.delay_timer, Some(5000));
    assert!(pending.pending_timestamp.is_some());

    // So does the leader's copy.
    let leader = rig.leader.snapshot().pending_dataset;
    assert_eq!(leader.active.channel.map(|c| c.number), Some(26));
    assert_eq!(leader.delay_timer, Some(5000));
}

#[tokio::test]
async fn test_pan_id_conflict_aggregation() {
    let mut rig = commissioned_rig().await;

    rig.management
        .pan_id_query(0x07FF_F800, 0x1234, "ff03::1")
        .await
        .unwrap();

    // Route the conflict notification the way the application does.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let event = tokio::select! {
            event = rig.events.recv() => event.expect("event stream open"),
            _ = tokio::time::sleep_until(deadline) => panic!("no conflict notification"),
        };
        if let SessionEvent::PanIdConflict {
            pan_id,
            channel_mask,
            ..
        } = event
        {
            rig.management.record_pan_id_conflict(pan_id, channel_mask);
            break;
        }
    }

    assert!(rig.management.has_pan_id_conflict(0x1234));
    let mask = rig.management.pan_id_conflict(0x1234).unwrap();
    assert_eq!(mask.first_bits(), Some(0x07FF_F800));
}

#[tokio::test]
async fn test_energy_scan_aggregation() {
    let mut rig = commissioned_rig().await;

    rig.management
        .energy_scan(0x07FF_F800, 2, 32, 100, "fdde:ad00:beef::42")
        .await
        .unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let event = tokio::select! {
            event = rig.events.recv() => event.expect("event stream open"),
            _ = tokio::time::sleep_until(deadline) => panic!("no energy report"),
        };
        if let SessionEvent::EnergyReport {
            peer,
            channel_mask,
            energy_list,
        } = event
        {
            rig.management
                .record_energy_report(peer, channel_mask, energy_list);
            break;
        }
    }

    let report = rig.management.energy_report("fdde:ad00:beef::42").unwrap();
    assert_eq!(report.energy_list, vec![0x40, 0x41, 0x42]);
}

#[tokio::test]
async fn test_mlr_success() {
    let rig = commissioned_rig().await;
    rig.management
        .register_multicast_listeners(&["ff04::123".parse().unwrap()], 3600)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_active_set_timestamp_strictly_increases() {
    let rig = commissioned_rig().await;
    let before = rig
        .store
        .active(ActiveFields::all())
        .active_timestamp
        .unwrap();

    rig.store
        .set_active(ActiveDataset {
            network_name: Some("renamed".into()),
            ..Default::default()
        })
        .await
        .unwrap();

    let after = rig.leader.snapshot().active_dataset;
    assert_eq!(after.network_name.as_deref(), Some("renamed"));
    assert!(after.active_timestamp.unwrap() > before);
}

#[tokio::test]
async fn test_concurrent_sets_serialize() {
    let rig = commissioned_rig().await;

    let store_a = rig.store.clone();
    let store_b = rig.store.clone();
    let (a, b) = tokio::join!(
        store_a.set_active(ActiveDataset {
            network_name: Some("writer-a".into()),
            ..Default::default()
        }),
        store_b.set_active(ActiveDataset {
            pan_id: Some(0xBEEF),
            ..Default::default()
        }),
    );
    a.unwrap();
    b.unwrap();

    let leader = rig.leader.snapshot().active_dataset;
    assert_eq!(leader.network_name.as_deref(), Some("writer-a"));
    assert_eq!(leader.pan_id, Some(0xBEEF));
}

#[tokio::test]
async fn test_save_network_data_roundtrip() {
    let rig = commissioned_rig().await;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("network-data.json");
    let data = rig.store.network_data();
    data.save(&path).unwrap();

    let reloaded = NetworkData::load(&path).unwrap();
    assert_eq!(reloaded, data);
    assert_eq!(
        reloaded.active_dataset.present(),
        data.active_dataset.present()
    );
    assert_eq!(reloaded.comm_dataset.present(), data.comm_dataset.present());
    assert_eq!(reloaded.bbr_dataset.present(), data.bbr_dataset.present());
}

#[tokio::test]
async fn test_no_mgmt_traffic_while_disabled() {
    let (a, _b) = PairConnection::pair();
    let (endpoint, requests_rx) = CoapEndpoint::new(Arc::new(a));
    let (controller, _events) =
        SessionController::new(endpoint, requests_rx, SessionConfig::default());
    let store = DatasetStore::new(controller.clone());
    let err = store.pull_active().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);

    let err = store.set_active(ActiveDataset::default()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);
}
