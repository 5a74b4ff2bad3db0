//! Dataset (de)serialization driven by the presence projection.
//!
//! Absent fields emit no TLV; unknown TLVs survive decoding (the caller keeps
//! the list) but are never re-emitted by the encoders.

use std::net::Ipv6Addr;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use meshcop_wire::{Error, Result, Tlv, TlvList, TlvType};

use crate::active::{ActiveDataset, ActiveFields, Channel, ChannelMask, ChannelMaskEntry, SecurityPolicy};
use crate::bbr::{BbrDataset, BbrFields};
use crate::commissioner::{CommissionerDataset, CommissionerFields};
use crate::pending::{PendingDataset, PendingFields};
use crate::steering::SteeringData;
use crate::timestamp::Timestamp;

fn channel_tlv(channel: &Channel) -> Tlv {
    let mut buf = BytesMut::with_capacity(3);
    buf.put_u8(channel.page);
    buf.put_u16(channel.number);
    Tlv::new(TlvType::Channel, buf.freeze()).expect("3-byte channel TLV")
}

fn channel_from_tlv(tlv: &Tlv) -> Result<Channel> {
    let value = tlv.value();
    if value.len() != 3 {
        return Err(Error::invalid_args("Channel TLV must be 3 bytes"));
    }
    Ok(Channel {
        page: value[0],
        number: u16::from_be_bytes([value[1], value[2]]),
    })
}

/// Encode a Channel Mask TLV (also used by scan and conflict payloads).
pub fn channel_mask_tlv(mask: &ChannelMask) -> Result<Tlv> {
    let mut buf = BytesMut::new();
    for entry in &mask.entries {
        if entry.masks.len() > u8::MAX as usize {
            return Err(Error::invalid_args("channel mask entry too long"));
        }
        buf.put_u8(entry.page);
        buf.put_u8(entry.masks.len() as u8);
        buf.put_slice(&entry.masks);
    }
    Tlv::new(TlvType::ChannelMask, buf.freeze())
}

/// Decode a Channel Mask TLV.
pub fn channel_mask_from_tlv(tlv: &Tlv) -> Result<ChannelMask> {
    let mut src = tlv.value().clone();
    let mut entries = Vec::new();
    while !src.is_empty() {
        if src.len() < 2 {
            return Err(Error::invalid_args("truncated Channel Mask entry"));
        }
        let page = src.get_u8();
        let len = src.get_u8() as usize;
        if src.len() < len {
            return Err(Error::invalid_args("Channel Mask entry overruns TLV"));
        }
        entries.push(ChannelMaskEntry {
            page,
            masks: src.split_to(len).to_vec(),
        });
    }
    Ok(ChannelMask { entries })
}

fn security_policy_tlv(policy: &SecurityPolicy) -> Result<Tlv> {
    let mut buf = BytesMut::with_capacity(2 + policy.flags.len());
    buf.put_u16(policy.rotation_hours);
    buf.put_slice(&policy.flags);
    Tlv::new(TlvType::SecurityPolicy, buf.freeze())
}

fn security_policy_from_tlv(tlv: &Tlv) -> Result<SecurityPolicy> {
    let value = tlv.value();
    if value.len() < 3 {
        return Err(Error::invalid_args("Security Policy TLV shorter than 3 bytes"));
    }
    Ok(SecurityPolicy {
        rotation_hours: u16::from_be_bytes([value[0], value[1]]),
        flags: value[2..].to_vec(),
    })
}

fn fixed_bytes<const N: usize>(tlv: &Tlv) -> Result<[u8; N]> {
    tlv.value().as_ref().try_into().map_err(|_| {
        Error::invalid_args(format!(
            "{:?} TLV has length {}, expected {N}",
            tlv.typ(),
            tlv.value().len()
        ))
    })
}

/// Encode the Active dataset.
pub fn active_to_tlvs(dataset: &ActiveDataset) -> Result<TlvList> {
    let mut tlvs = TlvList::new();
    if let Some(ts) = dataset.active_timestamp {
        tlvs.push(Tlv::u64(TlvType::ActiveTimestamp, ts.encode()));
    }
    if let Some(channel) = &dataset.channel {
        tlvs.push(channel_tlv(channel));
    }
    if let Some(mask) = &dataset.channel_mask {
        tlvs.push(channel_mask_tlv(mask)?);
    }
    if let Some(xpan) = &dataset.extended_pan_id {
        tlvs.push(Tlv::new(TlvType::ExtendedPanId, xpan.to_vec())?);
    }
    if let Some(prefix) = &dataset.mesh_local_prefix {
        tlvs.push(Tlv::new(TlvType::MeshLocalPrefix, prefix.to_vec())?);
    }
    if let Some(key) = &dataset.network_master_key {
        tlvs.push(Tlv::new(TlvType::NetworkMasterKey, key.to_vec())?);
    }
    if let Some(name) = &dataset.network_name {
        tlvs.push(Tlv::string(TlvType::NetworkName, name)?);
    }
    if let Some(pan_id) = dataset.pan_id {
        tlvs.push(Tlv::u16(TlvType::PanId, pan_id));
    }
    if let Some(pskc) = &dataset.pskc {
        tlvs.push(Tlv::new(TlvType::Pskc, pskc.to_vec())?);
    }
    if let Some(policy) = &dataset.security_policy {
        tlvs.push(security_policy_tlv(policy)?);
    }
    Ok(tlvs)
}

/// Decode the Active dataset, ignoring unrelated TLVs.
pub fn active_from_tlvs(tlvs: &TlvList) -> Result<ActiveDataset> {
    let mut dataset = ActiveDataset::default();
    for tlv in tlvs.iter() {
        match tlv.typ() {
            TlvType::ActiveTimestamp => {
                dataset.active_timestamp = Some(Timestamp::decode(tlv.as_u64()?));
            }
            TlvType::Channel => dataset.channel = Some(channel_from_tlv(tlv)?),
            TlvType::ChannelMask => dataset.channel_mask = Some(channel_mask_from_tlv(tlv)?),
            TlvType::ExtendedPanId => dataset.extended_pan_id = Some(fixed_bytes(tlv)?),
            TlvType::MeshLocalPrefix => dataset.mesh_local_prefix = Some(fixed_bytes(tlv)?),
            TlvType::NetworkMasterKey => dataset.network_master_key = Some(fixed_bytes(tlv)?),
            TlvType::NetworkName => dataset.network_name = Some(tlv.as_str()?.to_string()),
            TlvType::PanId => dataset.pan_id = Some(tlv.as_u16()?),
            TlvType::Pskc => dataset.pskc = Some(fixed_bytes(tlv)?),
            TlvType::SecurityPolicy => {
                dataset.security_policy = Some(security_policy_from_tlv(tlv)?);
            }
            _ => {}
        }
    }
    Ok(dataset)
}

/// Encode the Pending dataset.
pub fn pending_to_tlvs(dataset: &PendingDataset) -> Result<TlvList> {
    let mut tlvs = active_to_tlvs(&dataset.active)?;
    if let Some(ts) = dataset.pending_timestamp {
        tlvs.push(Tlv::u64(TlvType::PendingTimestamp, ts.encode()));
    }
    if let Some(delay) = dataset.delay_timer {
        tlvs.push(Tlv::u32(TlvType::DelayTimer, delay));
    }
    Ok(tlvs)
}

/// Decode the Pending dataset.
pub fn pending_from_tlvs(tlvs: &TlvList) -> Result<PendingDataset> {
    let mut dataset = PendingDataset {
        active: active_from_tlvs(tlvs)?,
        ..Default::default()
    };
    if let Some(tlv) = tlvs.first(TlvType::PendingTimestamp) {
        dataset.pending_timestamp = Some(Timestamp::decode(tlv.as_u64()?));
    }
    if let Some(tlv) = tlvs.first(TlvType::DelayTimer) {
        dataset.delay_timer = Some(tlv.as_u32()?);
    }
    Ok(dataset)
}

/// Encode the Commissioner dataset.
pub fn commissioner_to_tlvs(dataset: &CommissionerDataset) -> Result<TlvList> {
    let mut tlvs = TlvList::new();
    if let Some(locator) = dataset.border_agent_locator {
        tlvs.push(Tlv::u16(TlvType::BorderAgentLocator, locator));
    }
    if let Some(session_id) = dataset.session_id {
        tlvs.push(Tlv::u16(TlvType::CommissionerSessionId, session_id));
    }
    if let Some(steering) = &dataset.steering_data {
        tlvs.push(Tlv::new(TlvType::SteeringData, steering.as_bytes().to_vec())?);
    }
    if let Some(steering) = &dataset.ae_steering_data {
        tlvs.push(Tlv::new(
            TlvType::AeSteeringData,
            steering.as_bytes().to_vec(),
        )?);
    }
    if let Some(steering) = &dataset.nmkp_steering_data {
        tlvs.push(Tlv::new(
            TlvType::NmkpSteeringData,
            steering.as_bytes().to_vec(),
        )?);
    }
    if let Some(port) = dataset.joiner_udp_port {
        tlvs.push(Tlv::u16(TlvType::JoinerUdpPort, port));
    }
    if let Some(port) = dataset.ae_udp_port {
        tlvs.push(Tlv::u16(TlvType::AeUdpPort, port));
    }
    if let Some(port) = dataset.nmkp_udp_port {
        tlvs.push(Tlv::u16(TlvType::NmkpUdpPort, port));
    }
    Ok(tlvs)
}

/// Decode the Commissioner dataset.
pub fn commissioner_from_tlvs(tlvs: &TlvList) -> Result<CommissionerDataset> {
    let mut dataset = CommissionerDataset::default();
    for tlv in tlvs.iter() {
        match tlv.typ() {
            TlvType::BorderAgentLocator => dataset.border_agent_locator = Some(tlv.as_u16()?),
            TlvType::CommissionerSessionId => dataset.session_id = Some(tlv.as_u16()?),
            TlvType::SteeringData => {
                dataset.steering_data = Some(SteeringData::from_bytes(tlv.value())?);
            }
            TlvType::AeSteeringData => {
                dataset.ae_steering_data = Some(SteeringData::from_bytes(tlv.value())?);
            }
            TlvType::NmkpSteeringData => {
                dataset.nmkp_steering_data = Some(SteeringData::from_bytes(tlv.value())?);
            }
            TlvType::JoinerUdpPort => dataset.joiner_udp_port = Some(tlv.as_u16()?),
            TlvType::AeUdpPort => dataset.ae_udp_port = Some(tlv.as_u16()?),
            TlvType::NmkpUdpPort => dataset.nmkp_udp_port = Some(tlv.as_u16()?),
            _ => {}
        }
    }
    Ok(dataset)
}

/// Encode the BBR dataset.
pub fn bbr_to_tlvs(dataset: &BbrDataset) -> Result<TlvList> {
    let mut tlvs = TlvList::new();
    if let Some(hostname) = &dataset.tri_hostname {
        tlvs.push(Tlv::string(TlvType::TriHostname, hostname)?);
    }
    if let Some(hostname) = &dataset.registrar_hostname {
        tlvs.push(Tlv::string(TlvType::RegistrarHostname, hostname)?);
    }
    if let Some(addr) = &dataset.registrar_ipv6_addr {
        let parsed: Ipv6Addr = addr
            .parse()
            .map_err(|_| Error::invalid_args(format!("bad registrar IPv6 address {addr}")))?;
        tlvs.push(Tlv::new(
            TlvType::RegistrarIpv6Address,
            parsed.octets().to_vec(),
        )?);
    }
    Ok(tlvs)
}

/// Decode the BBR dataset.
pub fn bbr_from_tlvs(tlvs: &TlvList) -> Result<BbrDataset> {
    let mut dataset = BbrDataset::default();
    for tlv in tlvs.iter() {
        match tlv.typ() {
            TlvType::TriHostname => dataset.tri_hostname = Some(tlv.as_str()?.to_string()),
            TlvType::RegistrarHostname => {
                dataset.registrar_hostname = Some(tlv.as_str()?.to_string());
            }
            TlvType::RegistrarIpv6Address => {
                let octets: [u8; 16] = fixed_bytes(tlv)?;
                dataset.registrar_ipv6_addr = Some(Ipv6Addr::from(octets).to_string());
            }
            _ => {}
        }
    }
    Ok(dataset)
}

fn get_tlv(codes: Vec<u8>) -> TlvList {
    let mut tlvs = TlvList::new();
    if !codes.is_empty() {
        tlvs.push(Tlv::new(TlvType::Get, Bytes::from(codes)).expect("short Get TLV"));
    }
    tlvs
}

/// The MGMT_ACTIVE_GET payload for a field selection; empty requests all.
pub fn active_get_tlvs(fields: ActiveFields) -> TlvList {
    if fields == ActiveFields::all() {
        return TlvList::new();
    }
    let table = [
        (ActiveFields::ACTIVE_TIMESTAMP, TlvType::ActiveTimestamp),
        (ActiveFields::CHANNEL, TlvType::Channel),
        (ActiveFields::CHANNEL_MASK, TlvType::ChannelMask),
        (ActiveFields::EXTENDED_PAN_ID, TlvType::ExtendedPanId),
        (ActiveFields::MESH_LOCAL_PREFIX, TlvType::MeshLocalPrefix),
        (ActiveFields::NETWORK_MASTER_KEY, TlvType::NetworkMasterKey),
        (ActiveFields::NETWORK_NAME, TlvType::NetworkName),
        (ActiveFields::PAN_ID, TlvType::PanId),
        (ActiveFields::PSKC, TlvType::Pskc),
        (ActiveFields::SECURITY_POLICY, TlvType::SecurityPolicy),
    ];
    get_tlv(
        table
            .iter()
            .filter(|(bit, _)| fields.contains(*bit))
            .map(|(_, typ)| typ.code())
            .collect(),
    )
}

/// The MGMT_PENDING_GET payload; empty requests all.
pub fn pending_get_tlvs(fields: ActiveFields, pending: PendingFields) -> TlvList {
    if fields == ActiveFields::all() && pending == PendingFields::all() {
        return TlvList::new();
    }
    let mut codes: Vec<u8> = active_get_tlvs(fields)
        .first(TlvType::Get)
        .map(|tlv| tlv.value().to_vec())
        .unwrap_or_default();
    if pending.contains(PendingFields::PENDING_TIMESTAMP) {
        codes.push(TlvType::PendingTimestamp.code());
    }
    if pending.contains(PendingFields::DELAY_TIMER) {
        codes.push(TlvType::DelayTimer.code());
    }
    get_tlv(codes)
}

/// The MGMT_COMMISSIONER_GET payload; empty requests all.
pub fn commissioner_get_tlvs(fields: CommissionerFields) -> TlvList {
    if fields == CommissionerFields::all() {
        return TlvList::new();
    }
    let table = [
        (
            CommissionerFields::BORDER_AGENT_LOCATOR,
            TlvType::BorderAgentLocator,
        ),
        (CommissionerFields::SESSION_ID, TlvType::CommissionerSessionId),
        (CommissionerFields::STEERING_DATA, TlvType::SteeringData),
        (CommissionerFields::AE_STEERING_DATA, TlvType::AeSteeringData),
        (
            CommissionerFields::NMKP_STEERING_DATA,
            TlvType::NmkpSteeringData,
        ),
        (CommissionerFields::JOINER_UDP_PORT, TlvType::JoinerUdpPort),
        (CommissionerFields::AE_UDP_PORT, TlvType::AeUdpPort),
        (CommissionerFields::NMKP_UDP_PORT, TlvType::NmkpUdpPort),
    ];
    get_tlv(
        table
            .iter()
            .filter(|(bit, _)| fields.contains(*bit))
            .map(|(_, typ)| typ.code())
            .collect(),
    )
}

/// The MGMT_BBR_GET payload; empty requests all.
pub fn bbr_get_tlvs(fields: BbrFields) -> TlvList {
    if fields == BbrFields::all() {
        return TlvList::new();
    }
    let table = [
        (BbrFields::TRI_HOSTNAME, TlvType::TriHostname),
        (BbrFields::REGISTRAR_HOSTNAME, TlvType::RegistrarHostname),
        (BbrFields::REGISTRAR_IPV6_ADDR, TlvType::RegistrarIpv6Address),
    ];
    get_tlv(
        table
            .iter()
            .filter(|(bit, _)| fields.contains(*bit))
            .map(|(_, typ)| typ.code())
            .collect(),
    )
}
