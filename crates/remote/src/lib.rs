//! Reqwest implementation of the remote-API port for field sync.
//!
//! The port itself (`fieldbook_core::sync::RemoteApi`) lives in core so the
//! engine can be tested against scripted fakes; this crate supplies the real
//! HTTP client used in production wiring.

pub mod client;

pub use client::FieldApiClient;
