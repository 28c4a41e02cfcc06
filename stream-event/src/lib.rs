//! Stream event protocol: type + payload + envelope.
//!
//! This crate defines the wire shape of a single stream event and envelope injection.
//! It has no dependency on the agent runtime crate; a host bridges its own internal
//! event stream into `ProtocolEvent` and calls `to_json` to frame it for the wire.

pub mod envelope;
pub mod event;

pub use envelope::{to_json, Envelope, EnvelopeState};
pub use event::ProtocolEvent;
