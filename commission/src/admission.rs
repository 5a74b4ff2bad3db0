//! Joiner registry and steering-data maintenance.
//!
//! Every mutation rewrites the type-specific Bloom filter from the surviving
//! entries and pushes the whole Commissioner dataset (minus the Leader-owned
//! fields) through MGMT_COMMISSIONER_SET before the local registry changes.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use tracing::info;

use meshcop_datasets::{
    CommissionerDataset, JoinerId, JoinerInfo, JoinerKey, JoinerType, SteeringData,
};
use meshcop_mgmt::DatasetStore;
use meshcop_wire::{Error, Result};

struct AdmissionInner {
    store: DatasetStore,
    joiners: Mutex<BTreeMap<JoinerKey, JoinerInfo>>,
}

/// Handle to the joiner registry; cheap to clone.
#[derive(Clone)]
pub struct JoinerAdmission {
    inner: Arc<AdmissionInner>,
}

fn steering_slot(dataset: &mut CommissionerDataset, joiner_type: JoinerType) -> &mut Option<SteeringData> {
    match joiner_type {
        JoinerType::MeshCoP => &mut dataset.steering_data,
        JoinerType::Ae => &mut dataset.ae_steering_data,
        JoinerType::Nmkp => &mut dataset.nmkp_steering_data,
    }
}

/// Rebuild a Bloom filter from a set of joiner entries.
fn build_steering(entries: &[&JoinerInfo]) -> SteeringData {
    if entries.is_empty() {
        return SteeringData::disallow_all();
    }
    if entries.iter().any(|info| info.eui64 == 0) {
        // Wildcard entry admits everyone.
        return SteeringData::allow_all();
    }
    let length = SteeringData::length_for(entries.len());
    let mut steering = SteeringData::with_length(length).expect("length within bounds");
    for info in entries {
        steering.add(&info.joiner_id());
    }
    steering
}

impl JoinerAdmission {
    pub fn new(store: DatasetStore) -> Self {
        Self {
            inner: Arc::new(AdmissionInner {
                store,
                joiners: Mutex::new(BTreeMap::new()),
            }),
        }
    }

    pub fn store(&self) -> &DatasetStore {
        &self.inner.store
    }

    fn entries_of(&self, joiner_type: JoinerType) -> Vec<JoinerInfo> {
        self.inner
            .joiners
            .lock()
            .expect("joiner map lock")
            .iter()
            .filter(|(key, _)| key.joiner_type == joiner_type)
            .map(|(_, info)| info.clone())
            .collect()
    }

    /// Push a steering filter into the Commissioner dataset on the Leader.
    async fn push_steering(&self, joiner_type: JoinerType, steering: SteeringData) -> Result<()> {
        let mut dataset = self.inner.store.commissioner();
        *steering_slot(&mut dataset, joiner_type) = Some(steering);
        self.inner.store.set_commissioner(dataset).await
    }

    /// Enable a joiner: admit its ID into the type's Bloom filter and record
    /// the credential.
    pub async fn enable_joiner(
        &self,
        joiner_type: JoinerType,
        eui64: u64,
        pskd: &str,
        provisioning_url: &str,
    ) -> Result<()> {
        self.inner.store.controller().ensure_active()?;
        let joiner_id = JoinerId::from_eui64(eui64);
        let key = JoinerKey {
            joiner_type,
            joiner_id,
        };
        if self
            .inner
            .joiners
            .lock()
            .expect("joiner map lock")
            .contains_key(&key)
        {
            return Err(Error::already_exists(format!(
                "joiner (type={joiner_type}, eui64={eui64:#018x}) has already been enabled"
            )));
        }

        let candidate = JoinerInfo::new(joiner_type, eui64, pskd, provisioning_url);
        let mut entries = self.entries_of(joiner_type);
        entries.push(candidate.clone());
        let steering = build_steering(&entries.iter().collect::<Vec<_>>());
        self.push_steering(joiner_type, steering).await?;

        info!("enabled joiner {joiner_id} (type {joiner_type})");
        self.inner
            .joiners
            .lock()
            .expect("joiner map lock")
            .insert(key, candidate);
        Ok(())
    }

    /// Disable a joiner and rebuild the filter from the remaining entries.
    /// Unknown EUI-64s are a `NotFound` error and leave everything alone.
    pub async fn disable_joiner(&self, joiner_type: JoinerType, eui64: u64) -> Result<()> {
        self.inner.store.controller().ensure_active()?;
        let joiner_id = JoinerId::from_eui64(eui64);
        let key = JoinerKey {
            joiner_type,
            joiner_id,
        };
        if !self
            .inner
            .joiners
            .lock()
            .expect("joiner map lock")
            .contains_key(&key)
        {
            return Err(Error::not_found(format!(
                "joiner (type={joiner_type}, eui64={eui64:#018x}) is not enabled"
            )));
        }

        let remaining: Vec<JoinerInfo> = self
            .entries_of(joiner_type)
            .into_iter()
            .filter(|info| info.eui64 != eui64)
            .collect();
        let steering = build_steering(&remaining.iter().collect::<Vec<_>>());
        self.push_steering(joiner_type, steering).await?;

        info!("disabled joiner {joiner_id} (type {joiner_type})");
        self.inner
            .joiners
            .lock()
            .expect("joiner map lock")
            .remove(&key);
        Ok(())
    }

    /// Enable any joiner of the type: all-ones filter plus a wildcard entry.
    /// Per-EUI entries of the type are evicted.
    pub async fn enable_all_joiners(
        &self,
        joiner_type: JoinerType,
        pskd: &str,
        provisioning_url: &str,
    ) -> Result<()> {
        self.inner.store.controller().ensure_active()?;
        self.push_steering(joiner_type, SteeringData::allow_all())
            .await?;

        let mut joiners = self.inner.joiners.lock().expect("joiner map lock");
        joiners.retain(|key, _| key.joiner_type != joiner_type);
        joiners.insert(
            JoinerKey {
                joiner_type,
                joiner_id: JoinerId::wildcard(),
            },
            JoinerInfo::new(joiner_type, 0, pskd, provisioning_url),
        );
        info!("enabled all joiners of type {joiner_type}");
        Ok(())
    }

    /// Disable every joiner of the type: all-zeros filter, entries dropped.
    pub async fn disable_all_joiners(&self, joiner_type: JoinerType) -> Result<()> {
        self.inner.store.controller().ensure_active()?;
        self.push_steering(joiner_type, SteeringData::disallow_all())
            .await?;
        self.inner
            .joiners
            .lock()
            .expect("joiner map lock")
            .retain(|key, _| key.joiner_type != joiner_type);
        info!("disabled all joiners of type {joiner_type}");
        Ok(())
    }

    /// Exact lookup, then the type's wildcard entry.
    pub fn lookup(&self, joiner_type: JoinerType, joiner_id: &JoinerId) -> Option<JoinerInfo> {
        let joiners = self.inner.joiners.lock().expect("joiner map lock");
        joiners
            .get(&JoinerKey {
                joiner_type,
                joiner_id: *joiner_id,
            })
            .or_else(|| {
                joiners.get(&JoinerKey {
                    joiner_type,
                    joiner_id: JoinerId::wildcard(),
                })
            })
            .cloned()
    }

    /// Whether this exact EUI-64 has completed commissioning. Wildcard
    /// admissions are tracked only under the wildcard ID.
    pub fn is_joiner_commissioned(&self, joiner_type: JoinerType, eui64: u64) -> bool {
        self.inner
            .joiners
            .lock()
            .expect("joiner map lock")
            .get(&JoinerKey {
                joiner_type,
                joiner_id: JoinerId::from_eui64(eui64),
            })
            .map(|info| info.commissioned)
            .unwrap_or(false)
    }

    /// Flag the entry a joiner matched as commissioned.
    pub fn mark_commissioned(&self, joiner_type: JoinerType, joiner_id: &JoinerId) {
        let mut joiners = self.inner.joiners.lock().expect("joiner map lock");
        let key = JoinerKey {
            joiner_type,
            joiner_id: *joiner_id,
        };
        let entry = if joiners.contains_key(&key) {
            joiners.get_mut(&key)
        } else {
            joiners.get_mut(&JoinerKey {
                joiner_type,
                joiner_id: JoinerId::wildcard(),
            })
        };
        if let Some(info) = entry {
            info.commissioned = true;
        }
    }

    /// The type's filter as implied by the registry (for inspection).
    pub fn steering_for(&self, joiner_type: JoinerType) -> SteeringData {
        build_steering(&self.entries_of(joiner_type).iter().collect::<Vec<_>>())
    }

    /// Snapshot of all entries.
    pub fn joiners(&self) -> Vec<JoinerInfo> {
        self.inner
            .joiners
            .lock()
            .expect("joiner map lock")
            .values()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_steering_empty_disallows() {
        assert!(build_steering(&[]).is_all_zeros());
    }

    #[test]
    fn test_build_steering_wildcard_allows_all() {
        let wildcard = JoinerInfo::new(JoinerType::MeshCoP, 0, "PSKD01", "");
        assert!(build_steering(&[&wildcard]).is_all_ones());
    }

    #[test]
    fn test_build_steering_contains_members() {
        let a = JoinerInfo::new(JoinerType::MeshCoP, 0x1111, "A", "");
        let b = JoinerInfo::new(JoinerType::MeshCoP, 0x2222, "B", "");
        let steering = build_steering(&[&a, &b]);
        assert!(steering.contains(&a.joiner_id()));
        assert!(steering.contains(&b.joiner_id()));
        assert!(steering.len() <= 16);
    }
}
