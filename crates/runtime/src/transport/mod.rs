//! Bidirectional framed-message transports to the browser.
//!
//! A transport is split into two halves so the connection can drive them from
//! independent tasks:
//!
//! - [`Transport`] writes outbound JSON messages
//! - [`TransportReceiver`] reads inbound frames and forwards each parsed message
//!   over an unbounded channel
//!
//! Two implementations are provided: [`PipeTransport`] (NUL-delimited frames over
//! any async byte stream, as used by `--remote-debugging-pipe`) and
//! [`WebSocketTransport`] (one message per WebSocket frame).

mod pipe;
mod websocket;


use std::future::Future;
use std::pin::Pin;

use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::Result;

pub use pipe::{PipeTransport, PipeTransportReceiver, PipeTransportSender};
pub use websocket::{WebSocketTransport, WebSocketTransportReceiver, WebSocketTransportSender};

/// Boxed future returned by transport operations.
pub type TransportFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// Write half of a transport.
pub trait Transport: Send {
	/// Serializes and writes one message.
	fn send(&mut self, message: Value) -> TransportFuture<'_>;
}

/// Read half of a transport.
pub trait TransportReceiver: Send {
	/// Reads frames until EOF or error, forwarding each message.
	///
	/// Returns `Ok(())` on a clean end of stream or when the message channel's
	/// receiver is dropped.
	fn run(self: Box<Self>) -> TransportFuture<'static>;
}

/// The pieces a [`Connection`](crate::Connection) needs from a transport.
pub struct TransportParts {
	pub sender: Box<dyn Transport>,
	pub receiver: Box<dyn TransportReceiver>,
	pub message_rx: mpsc::UnboundedReceiver<Value>,
}
