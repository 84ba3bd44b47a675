//! Connection state machine.
//!
//! [`Machine`] holds every piece of transport state that matters for
//! correctness (connection state, the outbound queue, the reconnect flag and
//! the pending timer) and changes it only in response to events. Each
//! transition returns the [`Effect`]s the runtime must carry out, so the
//! reconnection logic runs without any socket or timer.

use std::collections::VecDeque;
use std::time::Duration;

use backoff::backoff::Backoff;

use super::config::ReconnectConfig;
use super::error::TransportError;
use super::listeners::Inbound;

/// Connection state tracking.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected, possibly waiting for a reconnect timer
    Disconnected,
    /// A connection attempt is in flight
    Connecting,
    /// The channel is open
    Connected,
}

impl ConnectionState {
    /// Check if the connection is currently active.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }
}

/// What happened to a payload handed to [`Machine::send`].
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Transmitted on the open channel
    Sent,
    /// Appended to the outbound queue until the next flush
    Queued,
    /// Dropped because the transport was closed
    Discarded,
}

/// Listener notification requested by a transition.
#[non_exhaustive]
#[derive(Debug)]
pub enum Notification {
    Connected,
    Disconnected,
    /// Error listeners receive `None` once a connection opens
    ErrorCleared,
    Error(TransportError),
    Message(Inbound),
}

/// Work the runtime performs on behalf of the machine, in order.
#[non_exhaustive]
#[derive(Debug)]
pub enum Effect {
    /// Start a new connection attempt
    Open,
    /// Close the current channel and abandon any attempt in flight
    CloseChannel,
    /// Transmit one payload on the open channel
    Transmit(String),
    /// Drain the outbound queue through [`Machine::next_outbound`]
    Flush,
    Notify(Notification),
    /// Arm the reconnect timer, replacing any pending one
    ScheduleReconnect(Duration),
    CancelReconnect,
    ClearListeners,
}

pub struct Machine {
    state: ConnectionState,
    should_reconnect: bool,
    reconnect_pending: bool,
    queue: VecDeque<String>,
    schedule: Box<dyn Backoff + Send>,
}

impl Machine {
    #[must_use]
    pub fn new(reconnect: ReconnectConfig) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            should_reconnect: true,
            reconnect_pending: false,
            queue: VecDeque::new(),
            schedule: reconnect.schedule(),
        }
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// `false` once [`close`](Self::close) has run.
    #[must_use]
    pub fn should_reconnect(&self) -> bool {
        self.should_reconnect
    }

    #[must_use]
    pub fn reconnect_pending(&self) -> bool {
        self.reconnect_pending
    }

    /// Number of payloads waiting for a flush.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Replace any existing channel with a new connection attempt.
    pub fn connect(&mut self) -> Vec<Effect> {
        if !self.should_reconnect {
            return Vec::new();
        }

        let mut effects = Vec::new();
        if self.reconnect_pending {
            self.reconnect_pending = false;
            effects.push(Effect::CancelReconnect);
        }
        if self.state != ConnectionState::Disconnected {
            effects.push(Effect::CloseChannel);
        }
        if self.state.is_connected() {
            effects.push(Effect::Notify(Notification::Disconnected));
        }

        self.state = ConnectionState::Connecting;
        effects.push(Effect::Open);
        effects
    }

    /// The attempt in flight produced an open channel.
    pub fn opened(&mut self) -> Vec<Effect> {
        if self.state != ConnectionState::Connecting {
            // Superseded attempt
            return vec![Effect::CloseChannel];
        }

        self.state = ConnectionState::Connected;
        self.reconnect_pending = false;
        self.schedule.reset();

        let mut effects = vec![
            Effect::Notify(Notification::Connected),
            Effect::Notify(Notification::ErrorCleared),
            Effect::CancelReconnect,
        ];
        if !self.queue.is_empty() {
            effects.push(Effect::Flush);
        }
        effects
    }

    pub fn message(&mut self, text: String) -> Vec<Effect> {
        vec![Effect::Notify(Notification::Message(Inbound::parse(text)))]
    }

    /// Errors are reported but never change state; the close event does.
    pub fn error(&mut self, error: TransportError) -> Vec<Effect> {
        vec![Effect::Notify(Notification::Error(error))]
    }

    /// The channel closed, or the attempt in flight failed.
    pub fn closed(&mut self) -> Vec<Effect> {
        if self.state == ConnectionState::Disconnected {
            return Vec::new();
        }

        self.state = ConnectionState::Disconnected;
        let mut effects = vec![
            Effect::CloseChannel,
            Effect::Notify(Notification::Disconnected),
        ];

        if self.should_reconnect {
            match self.schedule.next_backoff() {
                Some(delay) => {
                    self.reconnect_pending = true;
                    effects.push(Effect::ScheduleReconnect(delay));
                }
                None => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!("reconnect schedule exhausted, staying disconnected");
                }
            }
        }
        effects
    }

    pub fn timer_fired(&mut self) -> Vec<Effect> {
        if !self.reconnect_pending {
            return Vec::new();
        }
        self.reconnect_pending = false;
        self.connect()
    }

    /// Transmit now when connected, otherwise queue and reconnect eagerly
    /// unless an attempt is already in flight.
    pub fn send(&mut self, payload: String) -> (Delivery, Vec<Effect>) {
        if !self.should_reconnect {
            return (Delivery::Discarded, Vec::new());
        }

        match self.state {
            ConnectionState::Connected => (Delivery::Sent, vec![Effect::Transmit(payload)]),
            ConnectionState::Connecting => {
                self.queue.push_back(payload);
                (Delivery::Queued, Vec::new())
            }
            ConnectionState::Disconnected => {
                self.queue.push_back(payload);
                (Delivery::Queued, self.connect())
            }
        }
    }

    /// Request a drain of the outbound queue. Redundant requests are harmless.
    pub fn flush(&mut self) -> Vec<Effect> {
        if self.state.is_connected() && !self.queue.is_empty() {
            vec![Effect::Flush]
        } else {
            Vec::new()
        }
    }

    /// Pop the next payload to transmit while connected.
    pub fn next_outbound(&mut self) -> Option<String> {
        if self.state.is_connected() {
            self.queue.pop_front()
        } else {
            None
        }
    }

    /// Put back a payload whose transmission failed, ahead of everything queued.
    pub fn requeue_front(&mut self, payload: String) {
        if self.should_reconnect {
            self.queue.push_front(payload);
        }
    }

    /// Terminal teardown. Idempotent.
    pub fn close(&mut self) -> Vec<Effect> {
        self.should_reconnect = false;
        self.reconnect_pending = false;
        self.state = ConnectionState::Disconnected;
        self.queue.clear();

        vec![
            Effect::CloseChannel,
            Effect::CancelReconnect,
            Effect::ClearListeners,
        ]
    }
}
