//! Seams between the transport runtime and a physical channel.
//!
//! The runtime never touches sockets directly. It asks a [`Connector`] for a
//! fresh [`Channel`] and then reacts to the channel's events, so any duplex
//! message pipe (a WebSocket, an in-process fake in tests) can back a
//! [`Transport`](super::Transport).

use async_trait::async_trait;

use super::error::TransportError;

/// Event produced by an open channel.
#[non_exhaustive]
#[derive(Debug)]
pub enum ChannelEvent {
    /// A text frame arrived
    Message(String),
    /// The channel reported an error; it may still close afterwards
    Error(TransportError),
    /// The channel is gone and produces no further events
    Closed,
}

/// An open, bidirectional text channel.
#[async_trait]
pub trait Channel: Send + 'static {
    /// Transmit one text frame.
    async fn send(&mut self, text: &str) -> Result<(), TransportError>;

    /// Wait for the next event.
    ///
    /// Must be cancel-safe: the runtime drops this future whenever another
    /// event source wins the race. After [`ChannelEvent::Closed`] is returned
    /// it is not polled again.
    async fn next_event(&mut self) -> ChannelEvent;

    /// Close the channel. Must tolerate a channel that is already closed.
    async fn close(&mut self);
}

/// Opens channels to an endpoint.
///
/// A successful return is the channel's open event; an error is reported to
/// listeners and treated as an immediate close.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Channel: Channel;

    async fn connect(&self, endpoint: &str) -> Result<Self::Channel, TransportError>;
}
