//! MeshCoP wire codecs for the external commissioner.
//!
//! This crate provides the TLV engine and the CoAP message codec that all
//! commissioner traffic passes through, plus the shared error type.
//!
//! ## Features
//!
//! - **TLV engine**: 1-byte type / 1-byte length with the 16-bit extended
//!   form, unknown-type preservation
//! - **CoAP codec**: RFC 7252 header, options and Block1/Block2 values
//! - **URIs**: the MeshCoP resource paths
//! - **Error**: one structured error with a kind and a detail message

#![warn(clippy::all)]

pub mod coap;
pub mod error;
pub mod tlv;
pub mod uri;

pub use coap::{BlockOption, Code, Message, MessageType};
pub use error::{Error, ErrorKind, Result};
pub use tlv::{StateTlv, Tlv, TlvList, TlvType};
