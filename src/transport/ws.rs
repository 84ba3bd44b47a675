//! WebSocket channel backed by `tokio-tungstenite`.

use async_trait::async_trait;
use futures::{SinkExt as _, StreamExt as _};
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

use super::error::TransportError;
use super::traits::{Channel, ChannelEvent, Connector};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens [`WsChannel`]s with [`connect_async`].
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    type Channel = WsChannel;

    async fn connect(&self, endpoint: &str) -> Result<WsChannel, TransportError> {
        let (stream, _) = connect_async(endpoint).await?;
        Ok(WsChannel {
            stream,
            failed: false,
        })
    }
}

/// One WebSocket connection.
///
/// Text frames are delivered as messages, binary frames only when they hold
/// UTF-8. Control frames are answered by `tungstenite` itself.
pub struct WsChannel {
    stream: WsStream,
    /// Set after a read error; the next read reports the close
    failed: bool,
}

#[async_trait]
impl Channel for WsChannel {
    async fn send(&mut self, text: &str) -> Result<(), TransportError> {
        self.stream.send(Message::text(text.to_owned())).await?;
        Ok(())
    }

    async fn next_event(&mut self) -> ChannelEvent {
        if self.failed {
            return ChannelEvent::Closed;
        }

        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    #[cfg(feature = "tracing")]
                    tracing::trace!(%text, "Received WebSocket text message");
                    return ChannelEvent::Message(text.to_string());
                }
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => return ChannelEvent::Message(text),
                    Err(e) => {
                        #[cfg(feature = "tracing")]
                        tracing::debug!(error = %e, "Ignoring non UTF-8 binary frame");
                        #[cfg(not(feature = "tracing"))]
                        let _ = &e;
                    }
                },
                Some(Ok(Message::Close(_))) | None => return ChannelEvent::Closed,
                Some(Ok(_)) => {
                    // Ping, pong and raw frames
                }
                Some(Err(e)) => {
                    self.failed = true;
                    return ChannelEvent::Error(e.into());
                }
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            #[cfg(feature = "tracing")]
            tracing::trace!(error = %e, "WebSocket close handshake failed");
            #[cfg(not(feature = "tracing"))]
            let _ = &e;
        }
    }
}
