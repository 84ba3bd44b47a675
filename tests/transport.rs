#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests"
)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chat_client_sdk::transport::{
    Channel, ChannelEvent, Config, ConnectionState, Connector, Inbound, Transport, TransportError,
};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep, timeout};

/// Test side of one fake connection.
struct Remote {
    /// Feeds events to the transport
    events: mpsc::UnboundedSender<ChannelEvent>,
    /// Frames the transport transmitted
    sent: mpsc::UnboundedReceiver<String>,
    /// Make every later transmission fail
    fail_sends: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
}

impl Remote {
    fn message(&self, text: &str) {
        self.events
            .send(ChannelEvent::Message(text.to_owned()))
            .unwrap();
    }

    fn drop_connection(&self) {
        self.events.send(ChannelEvent::Closed).unwrap();
    }

    async fn recv(&mut self) -> String {
        timeout(Duration::from_secs(60), self.sent.recv())
            .await
            .unwrap()
            .unwrap()
    }
}

struct FakeChannel {
    events: mpsc::UnboundedReceiver<ChannelEvent>,
    sent: mpsc::UnboundedSender<String>,
    fail_sends: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl Channel for FakeChannel {
    async fn send(&mut self, text: &str) -> Result<(), TransportError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed);
        }
        _ = self.sent.send(text.to_owned());
        Ok(())
    }

    async fn next_event(&mut self) -> ChannelEvent {
        self.events.recv().await.unwrap_or(ChannelEvent::Closed)
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[derive(Clone)]
struct FakeConnector {
    accept: Arc<AtomicBool>,
    /// Never finish connecting
    stall: Arc<AtomicBool>,
    attempts: Arc<AtomicUsize>,
    remotes: mpsc::UnboundedSender<Remote>,
}

#[async_trait]
impl Connector for FakeConnector {
    type Channel = FakeChannel;

    async fn connect(&self, _endpoint: &str) -> Result<FakeChannel, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.stall.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if !self.accept.load(Ordering::SeqCst) {
            return Err(TransportError::Channel("connection refused".to_owned()));
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        let fail_sends = Arc::new(AtomicBool::new(false));
        let closed = Arc::new(AtomicBool::new(false));

        _ = self.remotes.send(Remote {
            events: events_tx,
            sent: sent_rx,
            fail_sends: Arc::clone(&fail_sends),
            closed: Arc::clone(&closed),
        });

        Ok(FakeChannel {
            events: events_rx,
            sent: sent_tx,
            fail_sends,
            closed,
        })
    }
}

struct Harness {
    transport: Transport,
    connector: FakeConnector,
    remotes: mpsc::UnboundedReceiver<Remote>,
}

impl Harness {
    fn new(accept: bool) -> Self {
        Self::with_config(accept, Config::default())
    }

    fn with_config(accept: bool, config: Config) -> Self {
        Self::build(accept, false, config)
    }

    /// Every attempt hangs until [`Harness::stall`] releases it.
    fn stalled(config: Config) -> Self {
        Self::build(true, true, config)
    }

    fn build(accept: bool, stall: bool, config: Config) -> Self {
        let (remotes_tx, remotes) = mpsc::unbounded_channel();
        let connector = FakeConnector {
            accept: Arc::new(AtomicBool::new(accept)),
            stall: Arc::new(AtomicBool::new(stall)),
            attempts: Arc::new(AtomicUsize::new(0)),
            remotes: remotes_tx,
        };
        let transport = Transport::with_connector("fake://chat", config, connector.clone());

        Self {
            transport,
            connector,
            remotes,
        }
    }

    fn accept(&self, accept: bool) {
        self.connector.accept.store(accept, Ordering::SeqCst);
    }

    fn stall(&self, stall: bool) {
        self.connector.stall.store(stall, Ordering::SeqCst);
    }

    fn attempts(&self) -> usize {
        self.connector.attempts.load(Ordering::SeqCst)
    }

    /// Wait for the next successful connection.
    async fn remote(&mut self) -> Remote {
        timeout(Duration::from_secs(60), self.remotes.recv())
            .await
            .unwrap()
            .unwrap()
    }
}

/// Channel with a frame permanently ready, counting every frame handed out.
struct FloodChannel {
    frames: Arc<AtomicUsize>,
}

#[async_trait]
impl Channel for FloodChannel {
    async fn send(&mut self, _text: &str) -> Result<(), TransportError> {
        Ok(())
    }

    async fn next_event(&mut self) -> ChannelEvent {
        self.frames.fetch_add(1, Ordering::SeqCst);
        ChannelEvent::Message(r#"{"type":"tick"}"#.to_owned())
    }

    async fn close(&mut self) {}
}

struct FloodConnector {
    frames: Arc<AtomicUsize>,
}

#[async_trait]
impl Connector for FloodConnector {
    type Channel = FloodChannel;

    async fn connect(&self, _endpoint: &str) -> Result<FloodChannel, TransportError> {
        Ok(FloodChannel {
            frames: Arc::clone(&self.frames),
        })
    }
}

/// Let the runtime task catch up until `condition` holds.
async fn eventually<F: FnMut() -> bool>(mut condition: F) {
    for _ in 0..1_000 {
        if condition() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition never became true");
}

fn collect<T: Send + 'static>() -> (mpsc::UnboundedSender<T>, mpsc::UnboundedReceiver<T>) {
    mpsc::unbounded_channel()
}

async fn next<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    timeout(Duration::from_secs(60), rx.recv())
        .await
        .unwrap()
        .unwrap()
}

mod lifecycle {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn connects_on_construction() {
        let mut harness = Harness::new(true);
        let (tx, mut connected) = collect::<()>();
        let _registration = harness.transport.on_connect(move || { _ = tx.send(()); });

        let _remote = harness.remote().await;
        next(&mut connected).await;

        eventually(|| harness.transport.state() == ConnectionState::Connected).await;
        assert_eq!(harness.attempts(), 1, "exactly one attempt");
    }

    #[tokio::test(start_paused = true)]
    async fn reconnects_after_configured_interval() {
        let mut harness = Harness::with_config(true, Config::with_reconnect_interval(Duration::from_secs(2)));
        let remote = harness.remote().await;

        let lost_at = Instant::now();
        remote.drop_connection();
        let _second = harness.remote().await;

        let elapsed = lost_at.elapsed();
        assert!(
            elapsed >= Duration::from_secs(2) && elapsed < Duration::from_secs(3),
            "reconnected after {elapsed:?}"
        );
        assert_eq!(harness.attempts(), 2, "one reconnect attempt");
    }

    #[tokio::test(start_paused = true)]
    async fn default_interval_is_five_seconds() {
        let mut harness = Harness::new(true);
        let remote = harness.remote().await;

        let lost_at = Instant::now();
        remote.drop_connection();
        let _second = harness.remote().await;

        assert!(
            lost_at.elapsed() >= Duration::from_secs(5),
            "reconnected after {:?}",
            lost_at.elapsed()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn close_then_connect_never_reconnects() {
        let mut harness = Harness::new(true);
        let remote = harness.remote().await;

        harness.transport.close();
        harness.transport.connect();
        eventually(|| harness.transport.is_closed()).await;
        sleep(Duration::from_secs(60)).await;

        assert_eq!(harness.attempts(), 1, "no attempt after close");
        assert!(remote.closed.load(Ordering::SeqCst), "channel closed");
        assert_eq!(harness.transport.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn pending_timer_does_not_fire_after_open() {
        let mut harness = Harness::new(true);
        let remote = harness.remote().await;
        remote.drop_connection();
        eventually(|| harness.transport.state() == ConnectionState::Disconnected).await;

        // Sending while disconnected connects right away, ahead of the timer
        harness.transport.send(&json!({ "text": "hi" })).unwrap();
        let mut second = harness.remote().await;
        assert_eq!(second.recv().await, r#"{"text":"hi"}"#);

        sleep(Duration::from_secs(30)).await;
        assert_eq!(harness.attempts(), 2, "timer must not start a third attempt");
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_connect_replaces_live_connection() {
        let mut harness = Harness::new(true);
        let first = harness.remote().await;
        let (tx, mut disconnected) = collect::<()>();
        let _registration = harness.transport.on_disconnect(move || { _ = tx.send(()); });

        harness.transport.connect();
        let _second = harness.remote().await;

        next(&mut disconnected).await;
        assert!(first.closed.load(Ordering::SeqCst), "old channel closed");
        assert_eq!(harness.attempts(), 2, "one replacement attempt");
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_attempt_times_out_and_retries() {
        let config = Config::with_reconnect_interval(Duration::from_secs(1))
            .connect_timeout(Some(Duration::from_secs(10)));
        let mut harness = Harness::stalled(config);
        let (tx, mut errors) = collect::<Option<String>>();
        let _registration = harness
            .transport
            .on_error(move |error| { _ = tx.send(error.map(ToString::to_string)); });

        let started = Instant::now();
        let error = next(&mut errors).await.unwrap();
        assert!(error.contains("timed out"), "unexpected error: {error}");
        assert!(started.elapsed() >= Duration::from_secs(10), "gave up early");

        harness.stall(false);
        let _remote = harness.remote().await;

        assert_eq!(next(&mut errors).await, None, "error cleared on open");
        assert_eq!(harness.attempts(), 2, "one retry after the timeout");
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_attempt_without_timeout_keeps_waiting() {
        let harness = Harness::stalled(Config::default().connect_timeout(None));

        sleep(Duration::from_secs(600)).await;

        assert_eq!(harness.transport.state(), ConnectionState::Connecting);
        assert_eq!(harness.attempts(), 1, "no retry while the attempt is pending");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn close_is_not_held_off_by_inbound_flood() {
        let frames = Arc::new(AtomicUsize::new(0));
        let transport = Transport::with_connector(
            "fake://chat",
            Config::default(),
            FloodConnector {
                frames: Arc::clone(&frames),
            },
        );
        let _registration = transport.on_message_type("tick", |_| {});

        timeout(Duration::from_secs(5), async {
            while frames.load(Ordering::SeqCst) < 1_000 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        let at_close = frames.load(Ordering::SeqCst);
        transport.close();
        timeout(Duration::from_secs(5), async {
            while !transport.is_closed() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        let after_close = frames.load(Ordering::SeqCst) - at_close;
        assert!(after_close < 1_000, "{after_close} frames consumed after close");
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_every_handle_closes() {
        let mut harness = Harness::new(true);
        let remote = harness.remote().await;

        drop(harness.transport);
        eventually(|| remote.closed.load(Ordering::SeqCst)).await;
        sleep(Duration::from_secs(60)).await;

        assert_eq!(harness.connector.attempts.load(Ordering::SeqCst), 1, "no reconnect");
    }
}

mod queueing {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn sends_while_disconnected_flush_in_order() {
        let mut harness = Harness::new(false);

        for n in 1..=3 {
            harness.transport.send(&json!({ "n": n })).unwrap();
        }
        eventually(|| harness.transport.queued() == 3).await;

        harness.accept(true);
        let mut remote = harness.remote().await;

        assert_eq!(remote.recv().await, r#"{"n":1}"#);
        assert_eq!(remote.recv().await, r#"{"n":2}"#);
        assert_eq!(remote.recv().await, r#"{"n":3}"#);
        eventually(|| harness.transport.queued() == 0).await;
        assert!(remote.sent.try_recv().is_err(), "nothing sent twice");
    }

    #[tokio::test(start_paused = true)]
    async fn failed_send_is_requeued_and_retried() {
        let mut harness = Harness::new(true);
        let first = harness.remote().await;
        let (tx, mut errors) = collect::<Option<String>>();
        let _registration = harness
            .transport
            .on_error(move |error| { _ = tx.send(error.map(ToString::to_string)); });

        first.fail_sends.store(true, Ordering::SeqCst);
        harness.transport.send(&json!({ "n": 1 })).unwrap();

        assert!(next(&mut errors).await.is_some(), "send failure reported");
        eventually(|| harness.transport.queued() == 1).await;

        let mut second = harness.remote().await;
        assert_eq!(second.recv().await, r#"{"n":1}"#);
        assert_eq!(next(&mut errors).await, None, "open clears the error");
    }

    #[tokio::test(start_paused = true)]
    async fn sends_after_close_are_discarded() {
        let mut harness = Harness::new(true);
        let mut remote = harness.remote().await;

        harness.transport.close();
        harness.transport.send(&json!({ "late": true })).unwrap();
        eventually(|| harness.transport.is_closed()).await;

        assert_eq!(harness.transport.queued(), 0);
        assert!(remote.sent.try_recv().is_err(), "nothing transmitted");
    }

    #[tokio::test(start_paused = true)]
    async fn unserializable_payload_is_an_error() {
        let harness = Harness::new(true);
        let mut map = std::collections::HashMap::new();
        map.insert(vec![1_u8], 1);

        let err = harness.transport.send(&map).unwrap_err();
        assert_eq!(err.kind(), chat_client_sdk::error::Kind::Internal);
    }
}

mod dispatch {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn malformed_json_reaches_message_listeners_raw() {
        let mut harness = Harness::new(true);
        let (tx, mut messages) = collect::<Inbound>();
        let _registration = harness
            .transport
            .on_message(move |inbound| { _ = tx.send(inbound.clone()); });

        let remote = harness.remote().await;
        remote.message("not json");

        let inbound = next(&mut messages).await;
        assert_eq!(inbound.as_raw(), Some("not json"));
        assert_eq!(inbound.as_json(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn typed_frames_reach_generic_and_typed_listeners_once() {
        let mut harness = Harness::new(true);
        let (all_tx, mut all) = collect::<Inbound>();
        let (ping_tx, mut pings) = collect::<Value>();
        let (pong_tx, mut pongs) = collect::<Value>();
        let _all = harness
            .transport
            .on_message(move |inbound| { _ = all_tx.send(inbound.clone()); });
        let _ping = harness
            .transport
            .on_message_type("ping", move |value| { _ = ping_tx.send(value.clone()); });
        let _pong = harness
            .transport
            .on_message_type("pong", move |value| { _ = pong_tx.send(value.clone()); });

        let remote = harness.remote().await;
        remote.message(r#"{"type":"ping","id":1}"#);
        remote.message("marker");

        let first = next(&mut all).await;
        assert_eq!(first.as_json(), Some(&json!({ "type": "ping", "id": 1 })));
        assert_eq!(next(&mut pings).await, json!({ "type": "ping", "id": 1 }));
        assert_eq!(next(&mut all).await.as_raw(), Some("marker"));

        assert!(pings.try_recv().is_err(), "ping dispatched once");
        assert!(pongs.try_recv().is_err(), "other types untouched");
    }

    #[tokio::test(start_paused = true)]
    async fn non_string_type_gets_generic_dispatch_only() {
        let mut harness = Harness::new(true);
        let (all_tx, mut all) = collect::<Inbound>();
        let (typed_tx, mut typed) = collect::<Value>();
        let _all = harness
            .transport
            .on_message(move |inbound| { _ = all_tx.send(inbound.clone()); });
        let _typed = harness
            .transport
            .on_message_type("7", move |value| { _ = typed_tx.send(value.clone()); });

        let remote = harness.remote().await;
        remote.message(r#"{"type":7}"#);

        assert_eq!(next(&mut all).await.message_type(), None);
        assert!(typed.try_recv().is_err(), "numeric type is not dispatched");
    }

    #[tokio::test(start_paused = true)]
    async fn unregistered_listener_is_not_called() {
        let mut harness = Harness::new(true);
        let (gone_tx, mut gone) = collect::<Inbound>();
        let (kept_tx, mut kept) = collect::<Inbound>();
        let registration = harness
            .transport
            .on_message(move |inbound| { _ = gone_tx.send(inbound.clone()); });
        let _kept = harness
            .transport
            .on_message(move |inbound| { _ = kept_tx.send(inbound.clone()); });

        assert!(registration.unregister(), "listener was registered");

        let remote = harness.remote().await;
        remote.message("hello");

        assert_eq!(next(&mut kept).await.as_raw(), Some("hello"));
        assert!(gone.try_recv().is_err(), "removed listener stays silent");
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_registrations_are_each_called() {
        let mut harness = Harness::new(true);
        let calls = Arc::new(AtomicUsize::new(0));
        let (tx, mut done) = collect::<()>();

        let counter = Arc::clone(&calls);
        let callback = move |_: &Value| {
            counter.fetch_add(1, Ordering::SeqCst);
        };
        let _first = harness.transport.on_message_type("typing", callback.clone());
        let _second = harness.transport.on_message_type("typing", callback);
        let _marker = harness.transport.on_message(move |inbound| {
            if inbound.as_raw() == Some("marker") {
                _ = tx.send(());
            }
        });

        let remote = harness.remote().await;
        remote.message(r#"{"type":"typing"}"#);
        remote.message("marker");
        next(&mut done).await;

        assert_eq!(calls.load(Ordering::SeqCst), 2, "no de-duplication");
    }

    #[tokio::test(start_paused = true)]
    async fn connection_failures_are_reported_then_cleared() {
        let mut harness = Harness::new(false);
        let (tx, mut errors) = collect::<Option<String>>();
        let _registration = harness
            .transport
            .on_error(move |error| { _ = tx.send(error.map(ToString::to_string)); });

        let refused = next(&mut errors).await;
        assert!(
            refused.as_deref().is_some_and(|e| e.contains("connection refused")),
            "got {refused:?}"
        );

        harness.accept(true);
        let _remote = harness.remote().await;
        // Failed retries may still be reported before the open clears them
        while next(&mut errors).await.is_some() {}
    }

    #[tokio::test(start_paused = true)]
    async fn channel_errors_do_not_close() {
        let mut harness = Harness::new(true);
        let (tx, mut errors) = collect::<Option<String>>();
        let _registration = harness
            .transport
            .on_error(move |error| { _ = tx.send(error.map(ToString::to_string)); });

        let remote = harness.remote().await;
        assert_eq!(next(&mut errors).await, None);

        remote
            .events
            .send(ChannelEvent::Error(TransportError::Channel("hiccup".to_owned())))
            .unwrap();
        assert!(next(&mut errors).await.is_some(), "error dispatched");

        assert_eq!(harness.transport.state(), ConnectionState::Connected);
        assert_eq!(harness.attempts(), 1, "no reconnect after a plain error");
    }

    #[tokio::test(start_paused = true)]
    async fn close_clears_listeners() {
        let mut harness = Harness::new(true);
        let (tx, mut messages) = collect::<Inbound>();
        let _registration = harness
            .transport
            .on_message(move |inbound| { _ = tx.send(inbound.clone()); });
        let remote = harness.remote().await;

        assert_eq!(harness.transport.listener_count(), 1);
        harness.transport.close();
        assert_eq!(harness.transport.listener_count(), 0);
        _ = remote.events.send(ChannelEvent::Message("late".to_owned()));
        eventually(|| harness.transport.is_closed()).await;

        assert!(messages.recv().await.is_none(), "listener dropped on close");
    }
}
