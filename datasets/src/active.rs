//! The Active Operational Dataset and its field types.
//!
//! Presence is carried by `Option` fields; `present()` projects the dataset
//! onto a bitmap for GET masks and wire encoding decisions.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::hexfmt;
use crate::timestamp::Timestamp;

/// A radio channel: channel page plus channel number.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub page: u8,
    pub number: u16,
}

/// One Channel Mask TLV entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelMaskEntry {
    pub page: u8,
    #[serde(with = "hexfmt::vec")]
    pub masks: Vec<u8>,
}

/// A channel mask: a list of per-page mask entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelMask {
    pub entries: Vec<ChannelMaskEntry>,
}

impl ChannelMask {
    /// A single page-0 entry from a 32-bit mask, as used by scan requests.
    pub fn from_bits(page: u8, mask: u32) -> Self {
        Self {
            entries: vec![ChannelMaskEntry {
                page,
                masks: mask.to_be_bytes().to_vec(),
            }],
        }
    }

    /// The first entry's mask as a 32-bit value, if it is four bytes.
    pub fn first_bits(&self) -> Option<u32> {
        let entry = self.entries.first()?;
        let bytes: [u8; 4] = entry.masks.as_slice().try_into().ok()?;
        Some(u32::from_be_bytes(bytes))
    }
}

/// The network Security Policy: rotation time plus policy flag bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityPolicy {
    pub rotation_hours: u16,
    #[serde(with = "hexfmt::vec")]
    pub flags: Vec<u8>,
}

bitflags! {
    /// Presence bitmap of the Active Operational Dataset.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ActiveFields: u16 {
        const ACTIVE_TIMESTAMP   = 1 << 0;
        const CHANNEL            = 1 << 1;
        const CHANNEL_MASK       = 1 << 2;
        const EXTENDED_PAN_ID    = 1 << 3;
        const MESH_LOCAL_PREFIX  = 1 << 4;
        const NETWORK_MASTER_KEY = 1 << 5;
        const NETWORK_NAME       = 1 << 6;
        const PAN_ID             = 1 << 7;
        const PSKC               = 1 << 8;
        const SECURITY_POLICY    = 1 << 9;
    }
}

/// In-memory mirror of the Active Operational Dataset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ActiveDataset {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_timestamp: Option<Timestamp>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<Channel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_mask: Option<ChannelMask>,
    #[serde(with = "hexfmt::opt_array", skip_serializing_if = "Option::is_none")]
    pub extended_pan_id: Option<[u8; 8]>,
    #[serde(with = "hexfmt::opt_array", skip_serializing_if = "Option::is_none")]
    pub mesh_local_prefix: Option<[u8; 8]>,
    #[serde(with = "hexfmt::opt_array", skip_serializing_if = "Option::is_none")]
    pub network_master_key: Option<[u8; 16]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pan_id: Option<u16>,
    #[serde(with = "hexfmt::opt_array", skip_serializing_if = "Option::is_none")]
    pub pskc: Option<[u8; 16]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub security_policy: Option<SecurityPolicy>,
}

impl ActiveDataset {
    /// Project the present fields onto the bitmap.
    pub fn present(&self) -> ActiveFields {
        let mut fields = ActiveFields::empty();
        set_if!(fields, ActiveFields::ACTIVE_TIMESTAMP, self.active_timestamp);
        set_if!(fields, ActiveFields::CHANNEL, self.channel);
        set_if!(fields, ActiveFields::CHANNEL_MASK, self.channel_mask);
        set_if!(fields, ActiveFields::EXTENDED_PAN_ID, self.extended_pan_id);
        set_if!(fields, ActiveFields::MESH_LOCAL_PREFIX, self.mesh_local_prefix);
        set_if!(
            fields,
            ActiveFields::NETWORK_MASTER_KEY,
            self.network_master_key
        );
        set_if!(fields, ActiveFields::NETWORK_NAME, self.network_name);
        set_if!(fields, ActiveFields::PAN_ID, self.pan_id);
        set_if!(fields, ActiveFields::PSKC, self.pskc);
        set_if!(fields, ActiveFields::SECURITY_POLICY, self.security_policy);
        fields
    }

    /// A copy keeping only the requested fields.
    pub fn filtered(&self, fields: ActiveFields) -> Self {
        let mut out = self.clone();
        if !fields.contains(ActiveFields::ACTIVE_TIMESTAMP) {
            out.active_timestamp = None;
        }
        if !fields.contains(ActiveFields::CHANNEL) {
            out.channel = None;
        }
        if !fields.contains(ActiveFields::CHANNEL_MASK) {
            out.channel_mask = None;
        }
        if !fields.contains(ActiveFields::EXTENDED_PAN_ID) {
            out.extended_pan_id = None;
        }
        if !fields.contains(ActiveFields::MESH_LOCAL_PREFIX) {
            out.mesh_local_prefix = None;
        }
        if !fields.contains(ActiveFields::NETWORK_MASTER_KEY) {
            out.network_master_key = None;
        }
        if !fields.contains(ActiveFields::NETWORK_NAME) {
            out.network_name = None;
        }
        if !fields.contains(ActiveFields::PAN_ID) {
            out.pan_id = None;
        }
        if !fields.contains(ActiveFields::PSKC) {
            out.pskc = None;
        }
        if !fields.contains(ActiveFields::SECURITY_POLICY) {
            out.security_policy = None;
        }
        out
    }

    /// Additive merge: fields present in `src` overwrite, absent fields leave
    /// this dataset unchanged.
    pub fn merge_from(&mut self, src: &Self) {
        merge_present!(
            self,
            src,
            [
                active_timestamp,
                channel,
                channel_mask,
                extended_pan_id,
                mesh_local_prefix,
                network_master_key,
                network_name,
                pan_id,
                pskc,
                security_policy,
            ]
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ActiveDataset {
        ActiveDataset {
            active_timestamp: Some(Timestamp::new(1, 0, false)),
            channel: Some(Channel {
                page: 0,
                number: 15,
            }),
            network_name: Some("openthread".into()),
            pan_id: Some(0xFACE),
            ..Default::default()
        }
    }

    #[test]
    fn test_present_projection() {
        let dataset = sample();
        let fields = dataset.present();
        assert!(fields.contains(ActiveFields::ACTIVE_TIMESTAMP | ActiveFields::CHANNEL));
        assert!(!fields.contains(ActiveFields::PSKC));
    }

    #[test]
    fn test_filtered_copy() {
        let dataset = sample();
        let out = dataset.filtered(ActiveFields::CHANNEL | ActiveFields::PSKC);
        assert_eq!(
            out.channel,
            Some(Channel {
                page: 0,
                number: 15
            })
        );
        assert_eq!(out.pan_id, None);
        assert_eq!(out.pskc, None);
    }

    #[test]
    fn test_merge_is_additive() {
        let mut dst = sample();
        let src = ActiveDataset {
            pan_id: Some(0x1234),
            ..Default::default()
        };
        dst.merge_from(&src);
        assert_eq!(dst.pan_id, Some(0x1234));
        // Absent in src, untouched in dst.
        assert_eq!(dst.network_name.as_deref(), Some("openthread"));
    }

    #[test]
    fn test_channel_mask_bits() {
        let mask = ChannelMask::from_bits(0, 0x07FF_F800);
        assert_eq!(mask.first_bits(), Some(0x07FF_F800));
    }
}
