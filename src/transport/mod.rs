//! Reconnecting duplex transport.
//!
//! A [`Transport`] keeps one physical connection to a chat backend alive,
//! queues outgoing payloads while the connection is down and dispatches
//! inbound frames to registered listeners.
//!
//! # Architecture
//!
//! - [`Machine`]: the connection state machine. Every event (open, message,
//!   error, close, timer, send, close request) is a transition that returns
//!   [`Effect`]s; it owns the outbound queue and the reconnect flag.
//! - [`Transport`]: public handle. It spawns the runtime task that executes
//!   effects against a [`Channel`] and a single reconnect timer.
//! - [`Connector`] / [`Channel`]: the seam to the physical connection. The
//!   `ws` feature provides a WebSocket implementation; tests substitute
//!   an in-process fake.
//! - [`Registration`]: returned by every `on_*` method, removes the listener.
//!
//! # Delivery guarantees
//!
//! Queued payloads are flushed in the order they were sent. A payload whose
//! transmission fails mid-flush is put back at the head of the queue, so a
//! channel that drops after accepting a frame but before reporting success
//! can see that frame twice: delivery is at-least-once.

pub mod config;
pub mod connection;
pub mod error;
pub mod listeners;
pub mod machine;
pub mod traits;
#[cfg(feature = "ws")]
pub mod ws;

pub use config::{Config, ReconnectConfig};
pub use connection::Transport;
#[expect(
    clippy::module_name_repetitions,
    reason = "TransportError includes module name for clarity when used outside this module"
)]
pub use error::TransportError;
pub use listeners::{Inbound, Registration};
pub use machine::{ConnectionState, Delivery, Effect, Machine, Notification};
pub use traits::{Channel, ChannelEvent, Connector};
