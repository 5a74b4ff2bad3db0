//! MeshCoP TLV encoding and decoding.
//!
//! TLVs are 1-byte type, 1-byte length, big-endian payload. A length byte of
//! 0xFF escapes to the extended form with a 16-bit length. All multi-byte
//! integers are big-endian.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};

/// Length byte announcing the extended (16-bit length) TLV form.
const EXTENDED_LENGTH_ESCAPE: u8 = 0xFF;

/// MeshCoP TLV types.
///
/// Unassigned codes decode to `Unknown` so that foreign TLVs survive a
/// decode/re-encode cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TlvType {
    Channel,
    PanId,
    ExtendedPanId,
    NetworkName,
    Pskc,
    NetworkMasterKey,
    NetworkKeySequence,
    MeshLocalPrefix,
    SteeringData,
    BorderAgentLocator,
    CommissionerId,
    CommissionerSessionId,
    SecurityPolicy,
    Get,
    ActiveTimestamp,
    CommissionerUdpPort,
    State,
    JoinerDtlsEncapsulation,
    JoinerUdpPort,
    JoinerIid,
    JoinerRouterLocator,
    JoinerRouterKek,
    ProvisioningUrl,
    VendorName,
    VendorModel,
    VendorSwVersion,
    VendorData,
    VendorStackVersion,
    UdpEncapsulation,
    Ipv6Address,
    PendingTimestamp,
    DelayTimer,
    ChannelMask,
    Count,
    Period,
    ScanDuration,
    EnergyList,
    DomainName,
    DomainPrefix,
    AeSteeringData,
    NmkpSteeringData,
    CommissionerToken,
    CommissionerSignature,
    AeUdpPort,
    NmkpUdpPort,
    TriHostname,
    RegistrarHostname,
    RegistrarIpv6Address,
    Unknown(u8),
}

impl TlvType {
    /// The wire code for this type.
    pub fn code(self) -> u8 {
        match self {
            TlvType::Channel => 0,
            TlvType::PanId => 1,
            TlvType::ExtendedPanId => 2,
            TlvType::NetworkName => 3,
            TlvType::Pskc => 4,
            TlvType::NetworkMasterKey => 5,
            TlvType::NetworkKeySequence => 6,
            TlvType::MeshLocalPrefix => 7,
            TlvType::SteeringData => 8,
            TlvType::BorderAgentLocator => 9,
            TlvType::CommissionerId => 10,
            TlvType::CommissionerSessionId => 11,
            TlvType::SecurityPolicy => 12,
            TlvType::Get => 13,
            TlvType::ActiveTimestamp => 14,
            TlvType::CommissionerUdpPort => 15,
            TlvType::State => 16,
            TlvType::JoinerDtlsEncapsulation => 17,
            TlvType::JoinerUdpPort => 18,
            TlvType::JoinerIid => 19,
            TlvType::JoinerRouterLocator => 20,
            TlvType::JoinerRouterKek => 21,
            TlvType::ProvisioningUrl => 32,
            TlvType::VendorName => 33,
            TlvType::VendorModel => 34,
            TlvType::VendorSwVersion => 35,
            TlvType::VendorData => 36,
            TlvType::VendorStackVersion => 37,
            TlvType::UdpEncapsulation => 48,
            TlvType::Ipv6Address => 49,
            TlvType::PendingTimestamp => 51,
            TlvType::DelayTimer => 52,
            TlvType::ChannelMask => 53,
            TlvType::Count => 54,
            TlvType::Period => 55,
            TlvType::ScanDuration => 56,
            TlvType::EnergyList => 57,
            TlvType::DomainName => 59,
            TlvType::DomainPrefix => 60,
            TlvType::AeSteeringData => 61,
            TlvType::NmkpSteeringData => 62,
            TlvType::CommissionerToken => 63,
            TlvType::CommissionerSignature => 64,
            TlvType::AeUdpPort => 65,
            TlvType::NmkpUdpPort => 66,
            TlvType::TriHostname => 67,
            TlvType::RegistrarHostname => 68,
            TlvType::RegistrarIpv6Address => 69,
            TlvType::Unknown(code) => code,
        }
    }

    /// Map a wire code to a type.
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => TlvType::Channel,
            1 => TlvType::PanId,
            2 => TlvType::ExtendedPanId,
            3 => TlvType::NetworkName,
            4 => TlvType::Pskc,
            5 => TlvType::NetworkMasterKey,
            6 => TlvType::NetworkKeySequence,
            7 => TlvType::MeshLocalPrefix,
            8 => TlvType::SteeringData,
            9 => TlvType::BorderAgentLocator,
            10 => TlvType::CommissionerId,
            11 => TlvType::CommissionerSessionId,
            12 => TlvType::SecurityPolicy,
            13 => TlvType::Get,
            14 => TlvType::ActiveTimestamp,
            15 => TlvType::CommissionerUdpPort,
            16 => TlvType::State,
            17 => TlvType::JoinerDtlsEncapsulation,
            18 => TlvType::JoinerUdpPort,
            19 => TlvType::JoinerIid,
            20 => TlvType::JoinerRouterLocator,
            21 => TlvType::JoinerRouterKek,
            32 => TlvType::ProvisioningUrl,
            33 => TlvType::VendorName,
            34 => TlvType::VendorModel,
            35 => TlvType::VendorSwVersion,
            36 => TlvType::VendorData,
            37 => TlvType::VendorStackVersion,
            48 => TlvType::UdpEncapsulation,
            49 => TlvType::Ipv6Address,
            51 => TlvType::PendingTimestamp,
            52 => TlvType::DelayTimer,
            53 => TlvType::ChannelMask,
            54 => TlvType::Count,
            55 => TlvType::Period,
            56 => TlvType::ScanDuration,
            57 => TlvType::EnergyList,
            59 => TlvType::DomainName,
            60 => TlvType::DomainPrefix,
            61 => TlvType::AeSteeringData,
            62 => TlvType::NmkpSteeringData,
            63 => TlvType::CommissionerToken,
            64 => TlvType::CommissionerSignature,
            65 => TlvType::AeUdpPort,
            66 => TlvType::NmkpUdpPort,
            67 => TlvType::TriHostname,
            68 => TlvType::RegistrarHostname,
            69 => TlvType::RegistrarIpv6Address,
            other => TlvType::Unknown(other),
        }
    }

    /// Whether this type was not recognized on decode.
    pub fn is_unknown(self) -> bool {
        matches!(self, TlvType::Unknown(_))
    }
}

/// Values of the State TLV.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateTlv {
    Reject,
    Pending,
    Accept,
}

impl StateTlv {
    pub fn code(self) -> u8 {
        match self {
            StateTlv::Reject => 0xFF,
            StateTlv::Pending => 0x00,
            StateTlv::Accept => 0x01,
        }
    }

    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            0xFF => Ok(StateTlv::Reject),
            0x00 => Ok(StateTlv::Pending),
            0x01 => Ok(StateTlv::Accept),
            other => Err(Error::invalid_args(format!(
                "unknown State TLV value {other:#04x}"
            ))),
        }
    }
}

/// A single decoded TLV.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tlv {
    typ: TlvType,
    value: Bytes,
}

impl Tlv {
    /// Create a TLV, rejecting oversize values.
    pub fn new(typ: TlvType, value: impl Into<Bytes>) -> Result<Self> {
        let value = value.into();
        if value.len() > u16::MAX as usize {
            return Err(Error::invalid_args(format!(
                "TLV value of {} bytes exceeds the 16-bit length limit",
                value.len()
            )));
        }
        Ok(Self { typ, value })
    }

    pub fn u8(typ: TlvType, value: u8) -> Self {
        Self {
            typ,
            value: Bytes::copy_from_slice(&[value]),
        }
    }

    pub fn u16(typ: TlvType, value: u16) -> Self {
        Self {
            typ,
            value: Bytes::copy_from_slice(&value.to_be_bytes()),
        }
    }

    pub fn u32(typ: TlvType, value: u32) -> Self {
        Self {
            typ,
            value: Bytes::copy_from_slice(&value.to_be_bytes()),
        }
    }

    pub fn u64(typ: TlvType, value: u64) -> Self {
        Self {
            typ,
            value: Bytes::copy_from_slice(&value.to_be_bytes()),
        }
    }

    pub fn string(typ: TlvType, value: &str) -> Result<Self> {
        Self::new(typ, Bytes::copy_from_slice(value.as_bytes()))
    }

    pub fn typ(&self) -> TlvType {
        self.typ
    }

    pub fn value(&self) -> &Bytes {
        &self.value
    }

    pub fn into_value(self) -> Bytes {
        self.value
    }

    pub fn as_u8(&self) -> Result<u8> {
        self.expect_len(1)?;
        Ok(self.value[0])
    }

    pub fn as_u16(&self) -> Result<u16> {
        self.expect_len(2)?;
        Ok(u16::from_be_bytes([self.value[0], self.value[1]]))
    }

    pub fn as_u32(&self) -> Result<u32> {
        self.expect_len(4)?;
        let mut buf = [0u8; 4];
        buf.copy_from_slice(&self.value);
        Ok(u32::from_be_bytes(buf))
    }

    pub fn as_u64(&self) -> Result<u64> {
        self.expect_len(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&self.value);
        Ok(u64::from_be_bytes(buf))
    }

    pub fn as_str(&self) -> Result<&str> {
        std::str::from_utf8(&self.value)
            .map_err(|_| Error::invalid_args(format!("{:?} TLV is not valid UTF-8", self.typ)))
    }

    fn expect_len(&self, len: usize) -> Result<()> {
        if self.value.len() != len {
            return Err(Error::invalid_args(format!(
                "{:?} TLV has length {}, expected {}",
                self.typ,
                self.value.len(),
                len
            )));
        }
        Ok(())
    }

    /// Size of this TLV when encoded.
    pub fn encoded_len(&self) -> usize {
        let header = if self.value.len() >= EXTENDED_LENGTH_ESCAPE as usize {
            4
        } else {
            2
        };
        header + self.value.len()
    }

    /// Append the wire form to `dst`.
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.put_u8(self.typ.code());
        if self.value.len() >= EXTENDED_LENGTH_ESCAPE as usize {
            dst.put_u8(EXTENDED_LENGTH_ESCAPE);
            dst.put_u16(self.value.len() as u16);
        } else {
            dst.put_u8(self.value.len() as u8);
        }
        dst.put_slice(&self.value);
    }

    /// Decode one TLV from the front of `src`.
    pub fn decode(src: &mut Bytes) -> Result<Self> {
        if src.len() < 2 {
            return Err(Error::invalid_args("truncated TLV header"));
        }
        let typ = TlvType::from_code(src.get_u8());
        let mut len = src.get_u8() as usize;
        if len == EXTENDED_LENGTH_ESCAPE as usize {
            if src.len() < 2 {
                return Err(Error::invalid_args("truncated extended TLV length"));
            }
            len = src.get_u16() as usize;
        }
        if src.len() < len {
            return Err(Error::invalid_args(format!(
                "{typ:?} TLV announces {len} bytes, {} available",
                src.len()
            )));
        }
        let value = src.split_to(len);
        Ok(Self { typ, value })
    }
}

/// An ordered collection of TLVs as carried by one CoAP payload.
///
/// Repeated types are allowed (e.g. the IPv6 Address TLV list of MLR.req).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlvList {
    tlvs: Vec<Tlv>,
}

impl TlvList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode a whole payload into its TLVs.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut src = Bytes::copy_from_slice(payload);
        let mut tlvs = Vec::new();
        while !src.is_empty() {
            tlvs.push(Tlv::decode(&mut src)?);
        }
        Ok(Self { tlvs })
    }

    /// Encode all TLVs back to back.
    pub fn encode(&self) -> Bytes {
        let total = self.tlvs.iter().map(Tlv::encoded_len).sum();
        let mut dst = BytesMut::with_capacity(total);
        for tlv in &self.tlvs {
            tlv.encode(&mut dst);
        }
        dst.freeze()
    }

    pub fn push(&mut self, tlv: Tlv) {
        self.tlvs.push(tlv);
    }

    /// First TLV of the given type, if any.
    pub fn first(&self, typ: TlvType) -> Option<&Tlv> {
        self.tlvs.iter().find(|tlv| tlv.typ() == typ)
    }

    /// First TLV of the given type, or a `NotFound` error naming it.
    pub fn require(&self, typ: TlvType) -> Result<&Tlv> {
        self.first(typ)
            .ok_or_else(|| Error::not_found(format!("missing {typ:?} TLV")))
    }

    /// All TLVs of the given type, in wire order.
    pub fn all(&self, typ: TlvType) -> impl Iterator<Item = &Tlv> {
        self.tlvs.iter().filter(move |tlv| tlv.typ() == typ)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tlv> {
        self.tlvs.iter()
    }

    pub fn len(&self) -> usize {
        self.tlvs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tlvs.is_empty()
    }
}

impl FromIterator<Tlv> for TlvList {
    fn from_iter<I: IntoIterator<Item = Tlv>>(iter: I) -> Self {
        Self {
            tlvs: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for TlvList {
    type Item = Tlv;
    type IntoIter = std::vec::IntoIter<Tlv>;

    fn into_iter(self) -> Self::IntoIter {
        self.tlvs.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_roundtrip() {
        let tlv = Tlv::u16(TlvType::PanId, 0x1234);
        let mut buf = BytesMut::new();
        tlv.encode(&mut buf);
        assert_eq!(buf.as_ref(), &[0x01, 0x02, 0x12, 0x34]);

        let mut src = buf.freeze();
        let decoded = Tlv::decode(&mut src).unwrap();
        assert_eq!(decoded, tlv);
        assert_eq!(decoded.as_u16().unwrap(), 0x1234);
        assert!(src.is_empty());
    }

    #[test]
    fn test_extended_length_form() {
        let value = vec![0xAB; 300];
        let tlv = Tlv::new(TlvType::CommissionerToken, value.clone()).unwrap();
        let mut buf = BytesMut::new();
        tlv.encode(&mut buf);
        assert_eq!(buf[1], 0xFF);
        assert_eq!(u16::from_be_bytes([buf[2], buf[3]]), 300);

        let decoded = Tlv::decode(&mut buf.freeze()).unwrap();
        assert_eq!(decoded.value().as_ref(), value.as_slice());
    }

    #[test]
    fn test_exactly_254_bytes_stays_short_form() {
        let tlv = Tlv::new(TlvType::VendorData, vec![0u8; 254]).unwrap();
        let mut buf = BytesMut::new();
        tlv.encode(&mut buf);
        assert_eq!(buf[1], 254);
        assert_eq!(buf.len(), 2 + 254);
    }

    #[test]
    fn test_unknown_type_is_preserved() {
        let raw = [0xF0, 0x02, 0xDE, 0xAD, 0x00, 0x01, 0x0B];
        let list = TlvList::decode(&raw).unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list.iter().next().unwrap().typ(), TlvType::Unknown(0xF0));
        assert_eq!(list.encode().as_ref(), &raw[..]);
    }

    #[test]
    fn test_truncated_value_is_an_error() {
        let raw = [0x00, 0x03, 0x00];
        assert!(TlvList::decode(&raw).is_err());
    }

    #[test]
    fn test_repeated_types_kept_in_order() {
        let mut list = TlvList::new();
        list.push(Tlv::new(TlvType::Ipv6Address, vec![1u8; 16]).unwrap());
        list.push(Tlv::new(TlvType::Ipv6Address, vec![2u8; 16]).unwrap());
        let decoded = TlvList::decode(&list.encode()).unwrap();
        let addrs: Vec<_> = decoded.all(TlvType::Ipv6Address).collect();
        assert_eq!(addrs.len(), 2);
        assert_eq!(addrs[0].value()[0], 1);
        assert_eq!(addrs[1].value()[0], 2);
    }

    #[test]
    fn test_state_tlv_values() {
        assert_eq!(StateTlv::from_code(0x01).unwrap(), StateTlv::Accept);
        assert_eq!(StateTlv::from_code(0xFF).unwrap(), StateTlv::Reject);
        assert!(StateTlv::from_code(0x42).is_err());
    }
}
