//! The BBR Dataset (CCM networks only).

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Presence bitmap of the BBR Dataset.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BbrFields: u16 {
        const TRI_HOSTNAME        = 1 << 0;
        const REGISTRAR_HOSTNAME  = 1 << 1;
        const REGISTRAR_IPV6_ADDR = 1 << 2;
    }
}

/// In-memory mirror of the BBR Dataset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BbrDataset {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tri_hostname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registrar_hostname: Option<String>,
    /// Textual IPv6 address of the registrar.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registrar_ipv6_addr: Option<String>,
}

impl BbrDataset {
    /// Project the present fields onto the bitmap.
    pub fn present(&self) -> BbrFields {
        let mut fields = BbrFields::empty();
        set_if!(fields, BbrFields::TRI_HOSTNAME, self.tri_hostname);
        set_if!(fields, BbrFields::REGISTRAR_HOSTNAME, self.registrar_hostname);
        set_if!(
            fields,
            BbrFields::REGISTRAR_IPV6_ADDR,
            self.registrar_ipv6_addr
        );
        fields
    }

    /// Additive merge.
    pub fn merge_from(&mut self, src: &Self) {
        merge_present!(
            self,
            src,
            [tri_hostname, registrar_hostname, registrar_ipv6_addr]
        );
    }
}
