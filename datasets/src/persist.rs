//! Network data persistence.
//!
//! `SaveNetworkData` writes the four cached datasets as one JSON document
//! with absent fields omitted and byte fields hex-encoded.

use std::path::Path;

use serde::{Deserialize, Serialize};

use meshcop_wire::{Error, ErrorKind, Result};

use crate::active::ActiveDataset;
use crate::bbr::BbrDataset;
use crate::commissioner::CommissionerDataset;
use crate::pending::PendingDataset;

/// The persisted snapshot of the four datasets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NetworkData {
    pub active_dataset: ActiveDataset,
    pub pending_dataset: PendingDataset,
    pub comm_dataset: CommissionerDataset,
    pub bbr_dataset: BbrDataset,
}

impl NetworkData {
    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|err| Error::new(ErrorKind::Internal, err.to_string()))
    }

    /// Parse from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|err| Error::invalid_args(err.to_string()))
    }

    /// Write the JSON document to a file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.to_json()?).map_err(Error::from)
    }

    /// Load a previously saved document.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path.as_ref()).map_err(|_| {
            Error::not_found(format!("cannot read {}", path.as_ref().display()))
        })?;
        Self::from_json(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::active::Channel;
    use crate::steering::SteeringData;
    use crate::timestamp::Timestamp;

    fn sample() -> NetworkData {
        NetworkData {
            active_dataset: ActiveDataset {
                active_timestamp: Some(Timestamp::new(1, 0, false)),
                channel: Some(Channel {
                    page: 0,
                    number: 11,
                }),
                network_master_key: Some([0xAA; 16]),
                network_name: Some("testnet".into()),
                ..Default::default()
            },
            pending_dataset: PendingDataset {
                delay_timer: Some(5000),
                ..Default::default()
            },
            comm_dataset: CommissionerDataset {
                border_agent_locator: Some(0x0400),
                session_id: Some(1),
                steering_data: Some(SteeringData::allow_all()),
                ..Default::default()
            },
            bbr_dataset: BbrDataset::default(),
        }
    }

    #[test]
    fn test_json_roundtrip_preserves_presence() {
        let data = sample();
        let reloaded = NetworkData::from_json(&data.to_json().unwrap()).unwrap();
        assert_eq!(reloaded, data);
        assert_eq!(
            reloaded.active_dataset.present(),
            data.active_dataset.present()
        );
        assert_eq!(reloaded.comm_dataset.present(), data.comm_dataset.present());
    }

    #[test]
    fn test_absent_fields_are_omitted() {
        let json = sample().to_json().unwrap();
        assert!(!json.contains("pskc"));
        assert!(json.contains("\"networkMasterKey\": \"aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa\""));
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("network-data.json");
        let data = sample();
        data.save(&path).unwrap();
        assert_eq!(NetworkData::load(&path).unwrap(), data);
    }

    #[test]
    fn test_load_missing_file_is_not_found() {
        let err = NetworkData::load("/nonexistent/network-data.json").unwrap_err();
        assert_eq!(err.kind(), meshcop_wire::ErrorKind::NotFound);
    }
}
