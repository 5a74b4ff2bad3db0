//! Dataset store and management request engine for the commissioner.
//!
//! [`DatasetStore`] mirrors the four remote datasets and owns the
//! MGMT_*_GET/SET flows, including the per-kind SET serialization.
//! [`Management`] runs the scan/announce/MLR/CCM request family and
//! aggregates the asynchronous answers.

#![warn(clippy::all)]

pub mod ops;
pub mod store;

pub use ops::{EnergyReport, Management};
pub use store::DatasetStore;
