//! The handler set supplied by the application.
//!
//! The commissioning loop owns one `HandlerSet` value handed over at
//! construction; user code never reaches back into the loop.

use std::fmt;
use std::sync::Arc;

use meshcop_datasets::{JoinerId, JoinerInfo, JoinerType};
use meshcop_wire::{Result, Tlv, TlvList, TlvType};

/// Vendor data carried in a JOIN_FIN.req.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FinalizeInfo {
    pub vendor_name: String,
    pub vendor_model: String,
    pub vendor_sw_version: String,
    pub vendor_stack_version: Vec<u8>,
    pub provisioning_url: String,
    pub vendor_data: Vec<u8>,
}

impl FinalizeInfo {
    /// Parse from a finalize payload; every field is optional.
    pub fn from_tlvs(tlvs: &TlvList) -> Self {
        let text = |typ: TlvType| {
            tlvs.first(typ)
                .and_then(|tlv| tlv.as_str().ok())
                .unwrap_or_default()
                .to_string()
        };
        let bytes = |typ: TlvType| {
            tlvs.first(typ)
                .map(|tlv| tlv.value().to_vec())
                .unwrap_or_default()
        };
        Self {
            vendor_name: text(TlvType::VendorName),
            vendor_model: text(TlvType::VendorModel),
            vendor_sw_version: text(TlvType::VendorSwVersion),
            vendor_stack_version: bytes(TlvType::VendorStackVersion),
            provisioning_url: text(TlvType::ProvisioningUrl),
            vendor_data: bytes(TlvType::VendorData),
        }
    }

    /// Encode as a finalize payload (used by joiner-side tooling and tests).
    pub fn to_tlvs(&self) -> Result<TlvList> {
        let mut tlvs = TlvList::new();
        if !self.vendor_name.is_empty() {
            tlvs.push(Tlv::string(TlvType::VendorName, &self.vendor_name)?);
        }
        if !self.vendor_model.is_empty() {
            tlvs.push(Tlv::string(TlvType::VendorModel, &self.vendor_model)?);
        }
        if !self.vendor_sw_version.is_empty() {
            tlvs.push(Tlv::string(TlvType::VendorSwVersion, &self.vendor_sw_version)?);
        }
        if !self.vendor_stack_version.is_empty() {
            tlvs.push(Tlv::new(
                TlvType::VendorStackVersion,
                self.vendor_stack_version.clone(),
            )?);
        }
        if !self.provisioning_url.is_empty() {
            tlvs.push(Tlv::string(TlvType::ProvisioningUrl, &self.provisioning_url)?);
        }
        if !self.vendor_data.is_empty() {
            tlvs.push(Tlv::new(TlvType::VendorData, self.vendor_data.clone())?);
        }
        Ok(tlvs)
    }
}

/// Decides whether a joiner that finished its handshake may join.
pub type CommissioningHandler = Arc<dyn Fn(&JoinerInfo, &FinalizeInfo) -> bool + Send + Sync>;

/// Overrides the joiner-entry lookup (defaults to the admission registry
/// with wildcard fallback).
pub type JoinerInfoRequester =
    Arc<dyn Fn(JoinerType, &JoinerId) -> Option<JoinerInfo> + Send + Sync>;

/// The application-supplied handlers.
#[derive(Clone)]
pub struct HandlerSet {
    /// Commissioning decision; the default accepts every joiner.
    pub commissioning: CommissioningHandler,
    /// Optional joiner-info override.
    pub joiner_info: Option<JoinerInfoRequester>,
}

impl Default for HandlerSet {
    fn default() -> Self {
        Self {
            commissioning: Arc::new(|_, _| true),
            joiner_info: None,
        }
    }
}

impl fmt::Debug for HandlerSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerSet")
            .field("joiner_info", &self.joiner_info.is_some())
            .finish_non_exhaustive()
    }
}
