//! Sonance Transport - the audio-server seam
//!
//! This crate defines the capability set the connection manager in
//! `sonance_core` consumes, without implementing any server protocol:
//! - The [`ServerTransport`] trait: connection lifecycle, async device
//!   listing, stream primitives, buffer primitives, stream reassignment
//! - The plain data types that cross the seam ([`ConnectionState`],
//!   [`DeviceInfo`], [`SampleSpec`], [`BufferAttrs`], [`TransportEvent`])
//! - [`LoopbackTransport`]: an in-process implementation with no server
//!   behind it, used by tests and embedding demos
//!
//! Real transports (a native client library binding, a network client)
//! implement [`ServerTransport`] and deliver their asynchronous outcomes
//! through the registered [`EventSink`].

mod error;
mod loopback;
mod traits;

pub use error::{TransportError, TransportResult};
pub use loopback::{LoopbackController, LoopbackTransport, StreamRecord};
pub use traits::{
    BufferAttrs, ConnectionState, DeviceInfo, EventSink, SampleSpec, ServerTransport, StreamId,
    TransportEvent,
};
