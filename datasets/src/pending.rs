//! The Pending Operational Dataset.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::active::ActiveDataset;
use crate::timestamp::Timestamp;

bitflags! {
    /// Presence bitmap of the fields the Pending dataset adds over Active.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PendingFields: u16 {
        const PENDING_TIMESTAMP = 1 << 0;
        const DELAY_TIMER       = 1 << 1;
    }
}

/// In-memory mirror of the Pending Operational Dataset: every Active field
/// plus the pending timestamp and the delay timer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PendingDataset {
    #[serde(flatten)]
    pub active: ActiveDataset,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_timestamp: Option<Timestamp>,
    /// Milliseconds until the pending dataset takes effect.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay_timer: Option<u32>,
}

impl PendingDataset {
    /// Project the pending-only fields onto their bitmap.
    pub fn present(&self) -> PendingFields {
        let mut fields = PendingFields::empty();
        set_if!(fields, PendingFields::PENDING_TIMESTAMP, self.pending_timestamp);
        set_if!(fields, PendingFields::DELAY_TIMER, self.delay_timer);
        fields
    }

    /// Additive merge over all carried fields.
    pub fn merge_from(&mut self, src: &Self) {
        self.active.merge_from(&src.active);
        merge_present!(self, src, [pending_timestamp, delay_timer]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::active::Channel;

    #[test]
    fn test_merge_covers_embedded_active() {
        let mut dst = PendingDataset::default();
        let src = PendingDataset {
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
        dst.merge_from(&src);
        assert_eq!(dst.active.channel.map(|c| c.number), Some(26));
        assert_eq!(dst.delay_timer, Some(5000));
        assert!(dst.pending_timestamp.is_none());
    }
}
