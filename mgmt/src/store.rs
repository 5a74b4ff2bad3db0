//! The dataset store: in-memory mirrors of the four remote datasets.
//!
//! Only MGMT_*_SET needs serialization; each kind owns an in-flight slot, and
//! a writer that had to wait re-pulls the dataset before sending so that its
//! copy reflects the winner of the race.

use std::sync::{Arc, Mutex};

use tracing::debug;

use meshcop_datasets::codec;
use meshcop_datasets::{
    ActiveDataset, ActiveFields, BbrDataset, BbrFields, CommissionerDataset, CommissionerFields,
    NetworkData, PendingDataset, PendingFields, Timestamp,
};
use meshcop_session::SessionController;
use meshcop_wire::{uri, Error, Result, Tlv, TlvList, TlvType};

struct StoreInner {
    controller: SessionController,
    active: Mutex<ActiveDataset>,
    pending: Mutex<PendingDataset>,
    commissioner: Mutex<CommissionerDataset>,
    bbr: Mutex<BbrDataset>,
    active_slot: tokio::sync::Mutex<()>,
    pending_slot: tokio::sync::Mutex<()>,
    commissioner_slot: tokio::sync::Mutex<()>,
    bbr_slot: tokio::sync::Mutex<()>,
}

/// Handle to the dataset store; cheap to clone.
#[derive(Clone)]
pub struct DatasetStore {
    inner: Arc<StoreInner>,
}

impl DatasetStore {
    pub fn new(controller: SessionController) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                controller,
                active: Mutex::new(ActiveDataset::default()),
                pending: Mutex::new(PendingDataset::default()),
                commissioner: Mutex::new(CommissionerDataset::default()),
                bbr: Mutex::new(BbrDataset::default()),
                active_slot: tokio::sync::Mutex::new(()),
                pending_slot: tokio::sync::Mutex::new(()),
                commissioner_slot: tokio::sync::Mutex::new(()),
                bbr_slot: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn controller(&self) -> &SessionController {
        &self.inner.controller
    }

    fn session_id_tlv(&self) -> Result<Tlv> {
        Ok(Tlv::u16(
            TlvType::CommissionerSessionId,
            self.inner.controller.session_id()?,
        ))
    }

    /// Local copy of the Active dataset, filtered by the requested fields.
    pub fn active(&self, fields: ActiveFields) -> ActiveDataset {
        self.inner.active.lock().expect("active lock").filtered(fields)
    }

    /// Local copy of the Pending dataset.
    pub fn pending(&self) -> PendingDataset {
        self.inner.pending.lock().expect("pending lock").clone()
    }

    /// Local copy of the Commissioner dataset.
    pub fn commissioner(&self) -> CommissionerDataset {
        self.inner
            .commissioner
            .lock()
            .expect("commissioner lock")
            .clone()
    }

    /// Local copy of the BBR dataset.
    pub fn bbr(&self) -> BbrDataset {
        self.inner.bbr.lock().expect("bbr lock").clone()
    }

    /// MGMT_ACTIVE_GET with the full mask; replaces the local mirror.
    pub async fn pull_active(&self) -> Result<ActiveDataset> {
        let tlvs = self
            .inner
            .controller
            .mgmt_request(uri::ACTIVE_GET, codec::active_get_tlvs(ActiveFields::all()))
            .await?;
        let dataset = codec::active_from_tlvs(&tlvs)?;
        *self.inner.active.lock().expect("active lock") = dataset.clone();
        Ok(dataset)
    }

    /// MGMT_PENDING_GET with the full mask; replaces the local mirror.
    pub async fn pull_pending(&self) -> Result<PendingDataset> {
        let tlvs = self
            .inner
            .controller
            .mgmt_request(
                uri::PENDING_GET,
                codec::pending_get_tlvs(ActiveFields::all(), PendingFields::all()),
            )
            .await?;
        let dataset = codec::pending_from_tlvs(&tlvs)?;
        *self.inner.pending.lock().expect("pending lock") = dataset.clone();
        Ok(dataset)
    }

    /// MGMT_COMMISSIONER_GET with the full mask. The reply merges
    /// additively: absent steering fields do not clear the cache.
    pub async fn pull_commissioner(&self) -> Result<CommissionerDataset> {
        let tlvs = self
            .inner
            .controller
            .mgmt_request(
                uri::COMMISSIONER_GET,
                codec::commissioner_get_tlvs(CommissionerFields::all()),
            )
            .await?;
        let dataset = codec::commissioner_from_tlvs(&tlvs)?;
        let merged = {
            let mut cache = self.inner.commissioner.lock().expect("commissioner lock");
            cache.merge_from(&dataset);
            cache.clone()
        };
        Ok(merged)
    }

    /// MGMT_BBR_GET with the full mask; replaces the local mirror.
    pub async fn pull_bbr(&self) -> Result<BbrDataset> {
        let tlvs = self
            .inner
            .controller
            .mgmt_request(uri::BBR_GET, codec::bbr_get_tlvs(BbrFields::all()))
            .await?;
        let dataset = codec::bbr_from_tlvs(&tlvs)?;
        *self.inner.bbr.lock().expect("bbr lock") = dataset.clone();
        Ok(dataset)
    }

    /// Pull every dataset the mode carries.
    pub async fn pull_all(&self) -> Result<()> {
        self.pull_commissioner().await?;
        if self.inner.controller.is_ccm_mode() {
            self.pull_bbr().await?;
        }
        self.pull_active().await?;
        self.pull_pending().await?;
        Ok(())
    }

    /// MGMT_ACTIVE_SET. The sent dataset always carries a strictly
    /// increasing Active Timestamp; on success the sent fields merge into
    /// the local mirror.
    pub async fn set_active(&self, mut dataset: ActiveDataset) -> Result<()> {
        let _guard = match self.inner.active_slot.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                let guard = self.inner.active_slot.lock().await;
                debug!("active SET slot was busy; re-pulling before send");
                self.pull_active().await?;
                guard
            }
        };

        let cached = self
            .inner
            .active
            .lock()
            .expect("active lock")
            .active_timestamp;
        dataset.active_timestamp = Some(next_timestamp(dataset.active_timestamp, cached));

        let mut tlvs = codec::active_to_tlvs(&dataset)?;
        tlvs.push(self.session_id_tlv()?);
        let reply = self
            .inner
            .controller
            .mgmt_request(uri::ACTIVE_SET, tlvs)
            .await?;
        expect_accept(&reply, "MGMT_ACTIVE_SET")?;

        self.inner
            .active
            .lock()
            .expect("active lock")
            .merge_from(&dataset);
        Ok(())
    }

    /// MGMT_PENDING_SET. The pending timestamp is forced above both the
    /// cached pending and active timestamps.
    pub async fn set_pending(&self, mut dataset: PendingDataset) -> Result<()> {
        let _guard = match self.inner.pending_slot.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                let guard = self.inner.pending_slot.lock().await;
                debug!("pending SET slot was busy; re-pulling before send");
                self.pull_pending().await?;
                guard
            }
        };

        if dataset.delay_timer.is_none() {
            return Err(Error::invalid_args(
                "pending dataset requires a delay timer",
            ));
        }
        let active_ts = self
            .inner
            .active
            .lock()
            .expect("active lock")
            .active_timestamp;
        let pending_ts = self
            .inner
            .pending
            .lock()
            .expect("pending lock")
            .pending_timestamp;
        let floor = match (active_ts, pending_ts) {
            (Some(a), Some(p)) => Some(a.max(p)),
            (a, p) => a.or(p),
        };
        dataset.pending_timestamp = Some(next_timestamp(dataset.pending_timestamp, floor));

        let mut tlvs = codec::pending_to_tlvs(&dataset)?;
        tlvs.push(self.session_id_tlv()?);
        let reply = self
            .inner
            .controller
            .mgmt_request(uri::PENDING_SET, tlvs)
            .await?;
        expect_accept(&reply, "MGMT_PENDING_SET")?;

        self.inner
            .pending
            .lock()
            .expect("pending lock")
            .merge_from(&dataset);
        Ok(())
    }

    /// MGMT_COMMISSIONER_SET. The Leader-owned fields are stripped from the
    /// outbound copy; the merge after success applies the wire's replace
    /// semantics to the steering/port families.
    pub async fn set_commissioner(&self, dataset: CommissionerDataset) -> Result<()> {
        let _guard = match self.inner.commissioner_slot.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                let guard = self.inner.commissioner_slot.lock().await;
                debug!("commissioner SET slot was busy; re-pulling before send");
                self.pull_commissioner().await?;
                guard
            }
        };

        let outbound = dataset.for_set();
        let mut tlvs = codec::commissioner_to_tlvs(&outbound)?;
        tlvs.push(self.session_id_tlv()?);
        let reply = self
            .inner
            .controller
            .mgmt_request(uri::COMMISSIONER_SET, tlvs)
            .await?;
        expect_accept(&reply, "MGMT_COMMISSIONER_SET")?;

        self.inner
            .commissioner
            .lock()
            .expect("commissioner lock")
            .merge_from_set(&outbound);
        Ok(())
    }

    /// MGMT_BBR_SET (CCM only).
    pub async fn set_bbr(&self, dataset: BbrDataset) -> Result<()> {
        let _guard = match self.inner.bbr_slot.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                let guard = self.inner.bbr_slot.lock().await;
                debug!("bbr SET slot was busy; re-pulling before send");
                self.pull_bbr().await?;
                guard
            }
        };

        let mut tlvs = codec::bbr_to_tlvs(&dataset)?;
        tlvs.push(self.session_id_tlv()?);
        let reply = self.inner.controller.mgmt_request(uri::BBR_SET, tlvs).await?;
        expect_accept(&reply, "MGMT_BBR_SET")?;

        self.inner.bbr.lock().expect("bbr lock").merge_from(&dataset);
        Ok(())
    }

    /// Snapshot of the four mirrors for persistence.
    pub fn network_data(&self) -> NetworkData {
        NetworkData {
            active_dataset: self.inner.active.lock().expect("active lock").clone(),
            pending_dataset: self.inner.pending.lock().expect("pending lock").clone(),
            comm_dataset: self
                .inner
                .commissioner
                .lock()
                .expect("commissioner lock")
                .clone(),
            bbr_dataset: self.inner.bbr.lock().expect("bbr lock").clone(),
        }
    }
}

/// The timestamp to send: the caller's when already above the floor,
/// otherwise the floor incremented.
fn next_timestamp(requested: Option<Timestamp>, floor: Option<Timestamp>) -> Timestamp {
    let floor = floor.unwrap_or_else(Timestamp::now);
    match requested {
        Some(ts) if ts > floor => ts,
        _ => floor.incremented(),
    }
}

/// MGMT_*_SET replies carry a State TLV; anything but Accept is a rejection.
fn expect_accept(tlvs: &TlvList, operation: &str) -> Result<()> {
    let state = tlvs.require(TlvType::State)?.as_u8()?;
    if state == meshcop_wire::StateTlv::Accept.code() {
        Ok(())
    } else {
        Err(Error::rejected(format!(
            "{operation} rejected with state {state:#04x}"
        )))
    }
}
