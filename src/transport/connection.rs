use std::collections::VecDeque;
use std::future::pending;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::future::BoxFuture;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::coop::consume_budget;
use tokio::time::{Duration, Instant, sleep_until, timeout};

use super::config::Config;
use super::error::TransportError;
use super::listeners::{Inbound, Listeners, Registration};
use super::machine::{ConnectionState, Effect, Machine, Notification};
use super::traits::{Channel, ChannelEvent, Connector};
use crate::Result;

/// Requests from [`Transport`] handles to the runtime task.
#[derive(Debug)]
enum Command {
    Connect,
    Send(String),
    Flush,
    Close,
}

/// A reconnecting, queueing duplex channel to one endpoint.
///
/// Construction spawns a runtime task that owns the physical channel and
/// connects immediately. When the channel is lost the task reconnects on a
/// timer; payloads sent in the meantime are queued and flushed in order once
/// the channel opens again. [`close`](Self::close) is terminal.
///
/// All operations return immediately. Events reach the caller through the
/// registered listeners, which run on the runtime task in receive order.
///
/// The handle is cheap to clone. Once every clone is dropped the transport
/// closes itself.
///
/// # Example
///
/// ```no_run
/// use chat_client_sdk::transport::{Config, Transport};
/// use serde_json::json;
///
/// # async fn example() -> chat_client_sdk::Result<()> {
/// let transport = Transport::new("wss://chat.example.com/ws/chat/", Config::default())?;
///
/// let _typing = transport.on_message_type("typing", |value| {
///     println!("typing: {}", value["user"]);
/// });
/// let _errors = transport.on_error(|error| match error {
///     Some(e) => eprintln!("channel error: {e}"),
///     None => println!("connected, errors cleared"),
/// });
///
/// // Queued until the connection opens
/// transport.send(&json!({ "type": "message", "text": "hello" }))?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Transport {
    endpoint: Arc<str>,
    command_tx: mpsc::UnboundedSender<Command>,
    listeners: Arc<Listeners>,
    state_rx: watch::Receiver<ConnectionState>,
    queued: Arc<AtomicUsize>,
}

impl Transport {
    /// Connect to a WebSocket endpoint (`ws://` or `wss://`).
    ///
    /// Must be called within a tokio runtime.
    #[cfg(feature = "ws")]
    pub fn new(endpoint: &str, config: Config) -> Result<Self> {
        let url = url::Url::parse(endpoint)?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(crate::error::Error::validation(format!(
                "unsupported endpoint scheme {}, expected ws or wss",
                url.scheme()
            )));
        }

        Ok(Self::with_connector(endpoint, config, super::ws::WsConnector))
    }

    /// Connect to `endpoint` through a custom [`Connector`].
    ///
    /// Must be called within a tokio runtime.
    pub fn with_connector<C: Connector>(endpoint: &str, config: Config, connector: C) -> Self {
        let endpoint: Arc<str> = Arc::from(endpoint);
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let listeners = Arc::new(Listeners::default());
        let queued = Arc::new(AtomicUsize::new(0));

        let runtime = Runtime {
            endpoint: Arc::clone(&endpoint),
            connector: Arc::new(connector),
            machine: Machine::new(config.reconnect),
            connect_timeout: config.connect_timeout,
            listeners: Arc::clone(&listeners),
            channel: None,
            attempt: None,
            reconnect_at: None,
            state_tx,
            queued: Arc::clone(&queued),
        };

        tokio::spawn(runtime.run(command_rx));

        Self {
            endpoint,
            command_tx,
            listeners,
            state_rx,
            queued,
        }
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Close any existing channel and open a new one. Ignored after close.
    pub fn connect(&self) {
        self.command(Command::Connect);
    }

    /// Serialize `payload` as JSON and transmit it, queueing it while disconnected.
    ///
    /// Fails only when `payload` cannot be serialized. Payloads sent after
    /// [`close`](Self::close) are dropped.
    pub fn send<R: Serialize + ?Sized>(&self, payload: &R) -> Result<()> {
        let json = serde_json::to_string(payload)?;
        self.command(Command::Send(json));
        Ok(())
    }

    /// Drain the outbound queue now if connected. Safe to call redundantly.
    pub fn flush(&self) {
        self.command(Command::Flush);
    }

    /// Tear down the transport for good: close the channel, cancel the
    /// reconnect timer, drop queued payloads and all listeners. Idempotent.
    pub fn close(&self) {
        self.listeners.clear();
        self.command(Command::Close);
    }

    /// `true` once the transport has been closed and its runtime has stopped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.command_tx.is_closed()
    }

    /// Get the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Subscribe to connection state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Number of payloads waiting for the connection to open.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::Acquire)
    }

    /// Number of registered listeners across all events.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Call `callback` for every inbound frame, parsed or raw.
    pub fn on_message<F>(&self, callback: F) -> Registration
    where
        F: Fn(&Inbound) + Send + Sync + 'static,
    {
        self.listeners.on_message(callback)
    }

    /// Call `callback` with the full parsed frame whenever its `type` field equals `message_type`.
    pub fn on_message_type<F>(&self, message_type: &str, callback: F) -> Registration
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.listeners.on_message_type(message_type, callback)
    }

    /// Call `callback` with each channel error, and with `None` whenever a connection opens.
    pub fn on_error<F>(&self, callback: F) -> Registration
    where
        F: Fn(Option<&TransportError>) + Send + Sync + 'static,
    {
        self.listeners.on_error(callback)
    }

    pub fn on_connect<F>(&self, callback: F) -> Registration
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.listeners.on_connect(callback)
    }

    pub fn on_disconnect<F>(&self, callback: F) -> Registration
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.listeners.on_disconnect(callback)
    }

    fn command(&self, command: Command) {
        // The runtime is gone only after close, when every request is moot
        if let Err(e) = self.command_tx.send(command) {
            #[cfg(feature = "tracing")]
            tracing::trace!(command = ?e.0, "transport closed, ignoring request");
            #[cfg(not(feature = "tracing"))]
            let _ = &e;
        }
    }
}

/// What woke the runtime up.
enum Wake<C: Connector> {
    Command(Option<Command>),
    Channel(ChannelEvent),
    Attempt(std::result::Result<C::Channel, TransportError>),
    Timer,
}

/// Task owning the machine, the physical channel and the reconnect timer.
struct Runtime<C: Connector> {
    endpoint: Arc<str>,
    connector: Arc<C>,
    machine: Machine,
    connect_timeout: Option<Duration>,
    listeners: Arc<Listeners>,
    channel: Option<C::Channel>,
    attempt: Option<BoxFuture<'static, std::result::Result<C::Channel, TransportError>>>,
    reconnect_at: Option<Instant>,
    state_tx: watch::Sender<ConnectionState>,
    queued: Arc<AtomicUsize>,
}

impl<C: Connector> Runtime<C> {
    async fn run(mut self, mut command_rx: mpsc::UnboundedReceiver<Command>) {
        let effects = self.machine.connect();
        self.apply(effects).await;

        while self.machine.should_reconnect() {
            // Requests go first so a busy channel can never hold off close
            let wake: Wake<C> = tokio::select! {
                biased;

                command = command_rx.recv() => Wake::Command(command),
                event = next_event(&mut self.channel) => Wake::Channel(event),
                outcome = attempt(&mut self.attempt) => Wake::Attempt(outcome),
                () = reconnect_timer(self.reconnect_at) => Wake::Timer,
            };

            let effects = match wake {
                Wake::Command(Some(Command::Connect)) => self.machine.connect(),
                Wake::Command(Some(Command::Send(payload))) => {
                    let (delivery, effects) = self.machine.send(payload);
                    #[cfg(feature = "tracing")]
                    tracing::trace!(endpoint = %self.endpoint, ?delivery, "payload accepted");
                    #[cfg(not(feature = "tracing"))]
                    let _ = &delivery;
                    effects
                }
                Wake::Command(Some(Command::Flush)) => self.machine.flush(),
                // Every handle is gone: nobody can observe the transport any more
                Wake::Command(Some(Command::Close) | None) => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(endpoint = %self.endpoint, "closing transport");
                    self.machine.close()
                }
                Wake::Channel(ChannelEvent::Message(text)) => self.machine.message(text),
                Wake::Channel(ChannelEvent::Error(error)) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(endpoint = %self.endpoint, error = %error, "channel error");
                    self.machine.error(error)
                }
                Wake::Channel(ChannelEvent::Closed) => {
                    self.channel = None;
                    #[cfg(feature = "tracing")]
                    tracing::debug!(endpoint = %self.endpoint, "channel closed");
                    self.machine.closed()
                }
                Wake::Attempt(Ok(channel)) => {
                    self.attempt = None;
                    self.channel = Some(channel);
                    #[cfg(feature = "tracing")]
                    tracing::debug!(endpoint = %self.endpoint, "connected");
                    self.machine.opened()
                }
                Wake::Attempt(Err(error)) => {
                    self.attempt = None;
                    #[cfg(feature = "tracing")]
                    tracing::warn!(endpoint = %self.endpoint, error = %error, "unable to connect");
                    let mut effects = self.machine.error(error);
                    effects.extend(self.machine.closed());
                    effects
                }
                Wake::Timer => {
                    self.reconnect_at = None;
                    #[cfg(feature = "tracing")]
                    tracing::debug!(endpoint = %self.endpoint, "reconnecting");
                    self.machine.timer_fired()
                }
            };

            self.apply(effects).await;
            // A channel that always has a frame ready would otherwise never yield
            consume_budget().await;
        }
    }

    /// Carry out effects in order. Failed transmissions feed their follow-up
    /// transitions back into the same run.
    async fn apply(&mut self, effects: Vec<Effect>) {
        let mut work = VecDeque::from(effects);

        while let Some(effect) = work.pop_front() {
            match effect {
                Effect::Open => {
                    let connector = Arc::clone(&self.connector);
                    let endpoint = Arc::clone(&self.endpoint);
                    let connect_timeout = self.connect_timeout;
                    #[cfg(feature = "tracing")]
                    tracing::debug!(endpoint = %endpoint, ?connect_timeout, "connecting");
                    self.attempt = Some(Box::pin(async move {
                        let Some(limit) = connect_timeout else {
                            return connector.connect(&endpoint).await;
                        };
                        timeout(limit, connector.connect(&endpoint))
                            .await
                            .unwrap_or(Err(TransportError::ConnectTimeout(limit)))
                    }));
                }
                Effect::CloseChannel => {
                    self.attempt = None;
                    if let Some(mut channel) = self.channel.take() {
                        channel.close().await;
                    }
                }
                Effect::Transmit(payload) => {
                    work.extend(self.transmit(payload).await);
                }
                Effect::Flush => {
                    work.extend(self.flush().await);
                }
                Effect::Notify(notification) => self.notify(notification),
                Effect::ScheduleReconnect(delay) => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(endpoint = %self.endpoint, ?delay, "reconnect scheduled");
                    self.reconnect_at = Some(Instant::now() + delay);
                }
                Effect::CancelReconnect => self.reconnect_at = None,
                Effect::ClearListeners => self.listeners.clear(),
            }
        }

        self.state_tx.send_replace(self.machine.state());
        self.queued.store(self.machine.queued(), Ordering::Release);
    }

    async fn transmit(&mut self, payload: String) -> Vec<Effect> {
        let Some(channel) = self.channel.as_mut() else {
            self.machine.requeue_front(payload);
            return self.machine.closed();
        };

        match channel.send(&payload).await {
            Ok(()) => Vec::new(),
            Err(error) => self.lost_during_send(payload, error),
        }
    }

    /// Drain the queue while the channel stays open.
    async fn flush(&mut self) -> Vec<Effect> {
        while let Some(payload) = self.machine.next_outbound() {
            let Some(channel) = self.channel.as_mut() else {
                self.machine.requeue_front(payload);
                return self.machine.closed();
            };

            if let Err(error) = channel.send(&payload).await {
                return self.lost_during_send(payload, error);
            }
        }
        Vec::new()
    }

    fn lost_during_send(&mut self, payload: String, error: TransportError) -> Vec<Effect> {
        #[cfg(feature = "tracing")]
        tracing::warn!(
            endpoint = %self.endpoint,
            error = %error,
            queued = self.machine.queued() + 1,
            "send failed, payload requeued"
        );
        self.machine.requeue_front(payload);
        let mut effects = self.machine.error(error);
        effects.extend(self.machine.closed());
        effects
    }

    fn notify(&self, notification: Notification) {
        match notification {
            Notification::Connected => self.listeners.dispatch_connect(),
            Notification::Disconnected => self.listeners.dispatch_disconnect(),
            Notification::ErrorCleared => self.listeners.dispatch_error(None),
            Notification::Error(error) => self.listeners.dispatch_error(Some(&error)),
            Notification::Message(inbound) => {
                #[cfg(feature = "tracing")]
                tracing::trace!(?inbound, "dispatching inbound frame");
                self.listeners.dispatch_message(&inbound);
            }
        }
    }
}

async fn next_event<Ch: Channel>(channel: &mut Option<Ch>) -> ChannelEvent {
    match channel {
        Some(channel) => channel.next_event().await,
        None => pending().await,
    }
}

async fn attempt<T>(attempt: &mut Option<BoxFuture<'static, T>>) -> T {
    match attempt {
        Some(future) => future.await,
        None => pending().await,
    }
}

async fn reconnect_timer(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending().await,
    }
}
