//! Internet service fingerprinting pipeline.
//!
//! Discovery finds open ports; the fingerprint engine probes each
//! `(address, port, transport)` endpoint with protocol-specific payloads and
//! streams out one [`engine::ServiceEvent`] per identified service.

pub mod cli;
pub mod discovery;
pub mod engine;
pub mod network;
pub mod output;
pub mod probe;
