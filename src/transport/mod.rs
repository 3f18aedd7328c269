//! Session transport: one duplex WebSocket to the transcription backend
//!
//! Outbound audio goes over the wire as raw binary frames, one per batch;
//! inbound traffic is JSON text frames parsed into [`InboundMessage`].
//! [`TransportChannel`] owns a single connection, [`ReconnectSupervisor`]
//! replaces it wholesale after a spontaneous loss, and the raw socket sits
//! behind the [`WireDialer`]/[`WireStream`] seam so the whole stack runs
//! against a scripted backend in tests.

pub mod channel;
pub mod error;
pub mod messages;
pub mod reconnect;
pub mod wire;

pub use channel::{ChannelEvent, TransportChannel};
pub use error::TransportError;
pub use messages::InboundMessage;
pub use reconnect::{ReconnectPolicy, ReconnectSupervisor};
pub use wire::{WebSocketDialer, WireDialer, WireEvent, WireStream};
