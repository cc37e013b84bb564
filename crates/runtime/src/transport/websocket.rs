//! WebSocket transport (`ws://host:port/devtools/browser/<id>`).

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use super::{Transport, TransportFuture, TransportParts, TransportReceiver};
use crate::error::{Error, Result};

/// Entry point for WebSocket transports.
pub struct WebSocketTransport;

impl WebSocketTransport {
	/// Connects to a DevTools WebSocket endpoint.
	pub async fn connect(url: &str) -> Result<TransportParts> {
		tracing::info!(url, "Connecting to DevTools WebSocket");

		let (stream, _) = tokio_tungstenite::connect_async(url)
			.await
			.map_err(|e| Error::ConnectionFailed(format!("{url}: {e}")))?;

		tracing::info!(url, "DevTools WebSocket connection established");
		Ok(Self::from_stream(stream))
	}

	/// Wraps an already established WebSocket stream.
	pub fn from_stream<S>(stream: WebSocketStream<S>) -> TransportParts
	where
		S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
	{
		let (sink, source) = stream.split();
		let (message_tx, message_rx) = mpsc::unbounded_channel();

		TransportParts {
			sender: Box::new(WebSocketTransportSender { sink }),
			receiver: Box::new(WebSocketTransportReceiver { source, message_tx }),
			message_rx,
		}
	}
}

/// Write half of a WebSocket transport.
pub struct WebSocketTransportSender<S> {
	sink: SplitSink<WebSocketStream<S>, WsMessage>,
}

impl<S> Transport for WebSocketTransportSender<S>
where
	S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
	fn send(&mut self, message: Value) -> TransportFuture<'_> {
		Box::pin(async move {
			let text = serde_json::to_string(&message)?;
			self.sink
				.send(WsMessage::Text(text))
				.await
				.map_err(|e| Error::Transport(format!("Failed to write message: {e}")))
		})
	}
}

/// Read half of a WebSocket transport.
pub struct WebSocketTransportReceiver<S> {
	source: SplitStream<WebSocketStream<S>>,
	message_tx: mpsc::UnboundedSender<Value>,
}

impl<S> TransportReceiver for WebSocketTransportReceiver<S>
where
	S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
	fn run(self: Box<Self>) -> TransportFuture<'static> {
		let Self {
			mut source,
			message_tx,
		} = *self;

		Box::pin(async move {
			while let Some(frame) = source.next().await {
				let parsed = match frame {
					Ok(WsMessage::Text(text)) => serde_json::from_str::<Value>(&text),
					Ok(WsMessage::Binary(bytes)) => serde_json::from_slice::<Value>(&bytes),
					Ok(WsMessage::Close(frame)) => {
						tracing::debug!(?frame, "WebSocket closed by peer");
						return Ok(());
					}
					Ok(_) => continue,
					Err(e) => {
						return Err(Error::Transport(format!("Failed to read message: {e}")));
					}
				};

				match parsed {
					Ok(message) => {
						if message_tx.send(message).is_err() {
							tracing::debug!("Message receiver dropped, stopping WebSocket reader");
							return Ok(());
						}
					}
					Err(e) => tracing::warn!(error = %e, "Skipping malformed WebSocket message"),
				}
			}
			Ok(())
		})
	}
}
