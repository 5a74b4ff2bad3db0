//! Relay frame codec (RLY_RX.ntf / RLY_TX.ntf).
//!
//! Joiner DTLS records are tunneled through the Border Agent in relay
//! frames keyed by the joiner IID.

use bytes::Bytes;

use meshcop_datasets::{JoinerId, JOINER_ID_LENGTH};
use meshcop_wire::{Result, Tlv, TlvList, TlvType};

/// The IEEE local-administration bit flipped between joiner ID and IID.
const LOCAL_ADDR_BIT: u8 = 0x02;

/// A relayed joiner frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayFrame {
    /// Interface identifier of the joiner (joiner ID with the local bit
    /// flipped).
    pub joiner_iid: [u8; JOINER_ID_LENGTH],
    /// Source UDP port on the joiner side.
    pub joiner_udp_port: u16,
    /// RLOC16 of the joiner router.
    pub joiner_router_locator: u16,
    /// Encapsulated DTLS record(s).
    pub encapsulation: Bytes,
    /// KEK attached when entrusting the joiner router.
    pub kek: Option<Vec<u8>>,
}

impl RelayFrame {
    /// Encode into the RLY_TX.ntf TLV set.
    pub fn to_tlvs(&self) -> Result<TlvList> {
        let mut tlvs = TlvList::new();
        tlvs.push(Tlv::new(TlvType::JoinerIid, self.joiner_iid.to_vec())?);
        tlvs.push(Tlv::u16(TlvType::JoinerUdpPort, self.joiner_udp_port));
        tlvs.push(Tlv::u16(
            TlvType::JoinerRouterLocator,
            self.joiner_router_locator,
        ));
        tlvs.push(Tlv::new(
            TlvType::JoinerDtlsEncapsulation,
            self.encapsulation.clone(),
        )?);
        if let Some(kek) = &self.kek {
            tlvs.push(Tlv::new(TlvType::JoinerRouterKek, kek.clone())?);
        }
        Ok(tlvs)
    }

    /// Decode an RLY_RX.ntf payload.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let tlvs = TlvList::decode(payload)?;
        let joiner_iid: [u8; JOINER_ID_LENGTH] = tlvs
            .require(TlvType::JoinerIid)?
            .value()
            .as_ref()
            .try_into()
            .map_err(|_| meshcop_wire::Error::invalid_args("Joiner IID TLV must be 8 bytes"))?;
        Ok(Self {
            joiner_iid,
            joiner_udp_port: tlvs.require(TlvType::JoinerUdpPort)?.as_u16()?,
            joiner_router_locator: tlvs.require(TlvType::JoinerRouterLocator)?.as_u16()?,
            encapsulation: tlvs
                .require(TlvType::JoinerDtlsEncapsulation)?
                .value()
                .clone(),
            kek: tlvs
                .first(TlvType::JoinerRouterKek)
                .map(|tlv| tlv.value().to_vec()),
        })
    }
}

/// The IID a joiner uses on the mesh, from its joiner ID.
pub fn iid_from_joiner_id(joiner_id: &JoinerId) -> [u8; JOINER_ID_LENGTH] {
    let mut iid = *joiner_id.as_bytes();
    iid[0] ^= LOCAL_ADDR_BIT;
    iid
}

/// Recover the joiner ID from a relayed IID.
pub fn joiner_id_from_iid(mut iid: [u8; JOINER_ID_LENGTH]) -> JoinerId {
    iid[0] ^= LOCAL_ADDR_BIT;
    JoinerId::from_bytes(iid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_roundtrip() {
        let frame = RelayFrame {
            joiner_iid: [1, 2, 3, 4, 5, 6, 7, 8],
            joiner_udp_port: 1000,
            joiner_router_locator: 0x0400,
            encapsulation: Bytes::from_static(&[0x16, 0xFE, 0xFD]),
            kek: None,
        };
        let decoded = RelayFrame::decode(&frame.to_tlvs().unwrap().encode()).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_frame_with_kek() {
        let frame = RelayFrame {
            joiner_iid: [0; 8],
            joiner_udp_port: 1,
            joiner_router_locator: 2,
            encapsulation: Bytes::new(),
            kek: Some(vec![0xAB; 32]),
        };
        let decoded = RelayFrame::decode(&frame.to_tlvs().unwrap().encode()).unwrap();
        assert_eq!(decoded.kek.as_deref(), Some(&[0xAB; 32][..]));
    }

    #[test]
    fn test_iid_flip_is_involutive() {
        let joiner_id = JoinerId::from_eui64(0x0123_4567_89AB_CDEF);
        let iid = iid_from_joiner_id(&joiner_id);
        assert_ne!(&iid, joiner_id.as_bytes());
        assert_eq!(joiner_id_from_iid(iid), joiner_id);
    }

    #[test]
    fn test_decode_requires_iid() {
        let mut tlvs = TlvList::new();
        tlvs.push(Tlv::u16(TlvType::JoinerUdpPort, 1000));
        let err = RelayFrame::decode(&tlvs.encode()).unwrap_err();
        assert_eq!(err.kind(), meshcop_wire::ErrorKind::NotFound);
    }
}
