//! Minimal chat client: joins a room, logs every frame and sends a message
//! every few seconds until interrupted.
//!
//! Run with tracing enabled:
//! ```sh
//! RUST_LOG=debug cargo run --example chat --features tracing -- wss://chat.example.com/ws/chat/
//! ```

use std::time::Duration;

use chat_client_sdk::session::{self, Engine, SessionStore};
use chat_client_sdk::transport::{Config, ReconnectConfig, Transport};
use serde_json::{Value, json};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let endpoint = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "ws://127.0.0.1:8080/ws/chat/".to_owned());
    let session_id = "demo-session";

    let store = SessionStore::new(
        Engine::with_directory(".chat-demo"),
        session::Config::default(),
    );
    let mut history: Vec<Value> = store
        .get_session::<Value>(session_id)
        .await?
        .and_then(|session| session["messages"].as_array().cloned())
        .unwrap_or_default();
    info!(restored = history.len(), "loaded session");

    let config = Config::with_reconnect(ReconnectConfig::exponential(Duration::from_millis(500)));
    let transport = Transport::new(&endpoint, config)?;

    let _connect = transport.on_connect(|| info!("connected"));
    let _disconnect = transport.on_disconnect(|| warn!("disconnected"));
    let _errors = transport.on_error(|e| match e {
        Some(e) => error!(error = %e, "channel error"),
        None => info!("errors cleared"),
    });
    let _messages = transport.on_message(|inbound| info!(?inbound, "frame"));
    let _chat = transport.on_message_type("chat_message", |frame| {
        info!(text = %frame["text"], "chat message");
    });

    transport.send(&json!({ "type": "join", "sessionId": session_id }))?;

    let mut ticker = tokio::time::interval(Duration::from_secs(3));
    for n in 0..5 {
        ticker.tick().await;
        let message = json!({
            "type": "chat_message",
            "sessionId": session_id,
            "text": format!("hello #{n}"),
        });
        transport.send(&message)?;
        history.push(message);
        info!(state = ?transport.state(), queued = transport.queued(), "sent");
    }

    store
        .store_session(&json!({ "sessionId": session_id, "messages": history }))
        .await?;
    transport.close();

    Ok(())
}
