//! Wire protocol between renderer contexts and the host.
//!
//! Channel names and routing live in [`channel`], request/reply pairing in
//! [`correlator`], the typed request frames in [`message`] and [`types`],
//! and the renderer-side half of the bridge in [`client`].

pub mod channel;
pub mod client;
pub mod correlator;
pub mod message;
pub mod types;

pub use channel::{Route, SessionId};
pub use client::{ExtensionClient, IncomingMessage, Port, Transport};
pub use correlator::{CorrelationId, Correlator, PendingReply};
pub use message::{ApiRequest, RequestEnvelope};
pub use types::MessageSender;
