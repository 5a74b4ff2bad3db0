//! Joiner identities.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Length of a joiner ID in bytes.
pub const JOINER_ID_LENGTH: usize = 8;

/// The IEEE local-administration bit forced on in derived joiner IDs.
const LOCAL_ADDR_BIT: u8 = 0x02;

/// The commissioning protocol a joiner uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum JoinerType {
    /// Thread 1.1 MeshCoP joining (PSKd / EC-JPAKE).
    MeshCoP,
    /// CCM Autonomous Enrollment.
    Ae,
    /// CCM Network Master Key Provisioning.
    Nmkp,
}

impl std::fmt::Display for JoinerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JoinerType::MeshCoP => f.write_str("meshcop"),
            JoinerType::Ae => f.write_str("ae"),
            JoinerType::Nmkp => f.write_str("nmkp"),
        }
    }
}

/// An 8-byte joiner identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JoinerId([u8; JOINER_ID_LENGTH]);

impl JoinerId {
    /// Derive the joiner ID from an EUI-64: the first 8 bytes of
    /// SHA-256 over the big-endian EUI-64, with the local bit set.
    pub fn from_eui64(eui64: u64) -> Self {
        let digest = Sha256::digest(eui64.to_be_bytes());
        let mut id = [0u8; JOINER_ID_LENGTH];
        id.copy_from_slice(&digest[..JOINER_ID_LENGTH]);
        id[0] |= LOCAL_ADDR_BIT;
        Self(id)
    }

    /// A discerner is used verbatim.
    pub fn from_discerner(discerner: [u8; JOINER_ID_LENGTH]) -> Self {
        Self(discerner)
    }

    /// The reserved ID matching any joiner, tracked under EUI-64 zero.
    pub fn wildcard() -> Self {
        Self::from_eui64(0)
    }

    /// Reconstruct from raw bytes (e.g. a Joiner IID).
    pub fn from_bytes(bytes: [u8; JOINER_ID_LENGTH]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; JOINER_ID_LENGTH] {
        &self.0
    }
}

impl std::fmt::Display for JoinerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// Key of a joiner entry: unique per (type, id) within the commissioner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JoinerKey {
    pub joiner_type: JoinerType,
    pub joiner_id: JoinerId,
}

/// Everything the commissioner knows about an enabled joiner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinerInfo {
    pub joiner_type: JoinerType,
    /// EUI-64 the entry was enabled with; zero for the wildcard entry.
    pub eui64: u64,
    /// Joining credential; ignored for the certificate-based CCM types.
    pub pskd: String,
    pub provisioning_url: String,
    /// Set once a JOIN_FIN.req for this ID has been accepted.
    pub commissioned: bool,
}

impl JoinerInfo {
    pub fn new(
        joiner_type: JoinerType,
        eui64: u64,
        pskd: impl Into<String>,
        provisioning_url: impl Into<String>,
    ) -> Self {
        Self {
            joiner_type,
            eui64,
            pskd: pskd.into(),
            provisioning_url: provisioning_url.into(),
            commissioned: false,
        }
    }

    /// The joiner ID this entry is keyed by.
    pub fn joiner_id(&self) -> JoinerId {
        JoinerId::from_eui64(self.eui64)
    }
}
