//! The Commissioner Dataset.
//!
//! The Leader owns the session ID and Border Agent locator; the steering and
//! joiner-UDP-port families carry replace semantics on the wire (absence in a
//! SET deletes the field).

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::steering::SteeringData;

bitflags! {
    /// Presence bitmap of the Commissioner Dataset.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CommissionerFields: u16 {
        const BORDER_AGENT_LOCATOR = 1 << 0;
        const SESSION_ID           = 1 << 1;
        const STEERING_DATA        = 1 << 2;
        const AE_STEERING_DATA     = 1 << 3;
        const NMKP_STEERING_DATA   = 1 << 4;
        const JOINER_UDP_PORT      = 1 << 5;
        const AE_UDP_PORT          = 1 << 6;
        const NMKP_UDP_PORT        = 1 << 7;
    }
}

/// In-memory mirror of the Commissioner Dataset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CommissionerDataset {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub border_agent_locator: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub steering_data: Option<SteeringData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ae_steering_data: Option<SteeringData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nmkp_steering_data: Option<SteeringData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub joiner_udp_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ae_udp_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nmkp_udp_port: Option<u16>,
}

impl CommissionerDataset {
    /// Project the present fields onto the bitmap.
    pub fn present(&self) -> CommissionerFields {
        let mut fields = CommissionerFields::empty();
        set_if!(
            fields,
            CommissionerFields::BORDER_AGENT_LOCATOR,
            self.border_agent_locator
        );
        set_if!(fields, CommissionerFields::SESSION_ID, self.session_id);
        set_if!(fields, CommissionerFields::STEERING_DATA, self.steering_data);
        set_if!(
            fields,
            CommissionerFields::AE_STEERING_DATA,
            self.ae_steering_data
        );
        set_if!(
            fields,
            CommissionerFields::NMKP_STEERING_DATA,
            self.nmkp_steering_data
        );
        set_if!(
            fields,
            CommissionerFields::JOINER_UDP_PORT,
            self.joiner_udp_port
        );
        set_if!(fields, CommissionerFields::AE_UDP_PORT, self.ae_udp_port);
        set_if!(fields, CommissionerFields::NMKP_UDP_PORT, self.nmkp_udp_port);
        fields
    }

    /// A copy keeping only the requested fields.
    pub fn filtered(&self, fields: CommissionerFields) -> Self {
        let mut out = self.clone();
        if !fields.contains(CommissionerFields::BORDER_AGENT_LOCATOR) {
            out.border_agent_locator = None;
        }
        if !fields.contains(CommissionerFields::SESSION_ID) {
            out.session_id = None;
        }
        if !fields.contains(CommissionerFields::STEERING_DATA) {
            out.steering_data = None;
        }
        if !fields.contains(CommissionerFields::AE_STEERING_DATA) {
            out.ae_steering_data = None;
        }
        if !fields.contains(CommissionerFields::NMKP_STEERING_DATA) {
            out.nmkp_steering_data = None;
        }
        if !fields.contains(CommissionerFields::JOINER_UDP_PORT) {
            out.joiner_udp_port = None;
        }
        if !fields.contains(CommissionerFields::AE_UDP_PORT) {
            out.ae_udp_port = None;
        }
        if !fields.contains(CommissionerFields::NMKP_UDP_PORT) {
            out.nmkp_udp_port = None;
        }
        out
    }

    /// Additive merge, used when folding in a MGMT_COMMISSIONER_GET response:
    /// absent fields in `src` leave the cache untouched.
    pub fn merge_from(&mut self, src: &Self) {
        merge_present!(
            self,
            src,
            [
                border_agent_locator,
                session_id,
                steering_data,
                ae_steering_data,
                nmkp_steering_data,
                joiner_udp_port,
                ae_udp_port,
                nmkp_udp_port,
            ]
        );
    }

    /// Merge after a successful MGMT_COMMISSIONER_SET. The locator and
    /// session ID stay additive, but the steering/port families mirror the
    /// wire's replace semantics: fields absent in the sent dataset are
    /// cleared from the cache.
    pub fn merge_from_set(&mut self, src: &Self) {
        merge_present!(self, src, [border_agent_locator, session_id]);
        merge_replace!(
            self,
            src,
            [
                steering_data,
                ae_steering_data,
                nmkp_steering_data,
                joiner_udp_port,
                ae_udp_port,
                nmkp_udp_port,
            ]
        );
    }

    /// The outbound copy of this dataset for MGMT_COMMISSIONER_SET: the
    /// Leader owns the session ID and Border Agent locator, so their present
    /// bits are cleared.
    pub fn for_set(&self) -> Self {
        let mut out = self.clone();
        out.border_agent_locator = None;
        out.session_id = None;
        out
    }
}
