//! NUL-delimited JSON frames over a pair of async byte streams.

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use super::{Transport, TransportFuture, TransportParts, TransportReceiver};
use crate::error::{Error, Result};

/// Frame terminator used by `--remote-debugging-pipe`.
const FRAME_DELIMITER: u8 = 0;

/// Pipe transport over a writer (browser stdin side) and reader (browser stdout side).
///
/// Each message is the JSON text followed by a single NUL byte.
pub struct PipeTransport<W, R> {
	stdin: W,
	stdout: R,
	message_tx: mpsc::UnboundedSender<Value>,
}

impl<W, R> PipeTransport<W, R>
where
	W: AsyncWrite + Unpin + Send + 'static,
	R: AsyncRead + Unpin + Send + 'static,
{
	/// Creates a transport and the receiver inbound messages are forwarded to.
	pub fn new(stdin: W, stdout: R) -> (Self, mpsc::UnboundedReceiver<Value>) {
		let (message_tx, message_rx) = mpsc::unbounded_channel();
		(
			Self {
				stdin,
				stdout,
				message_tx,
			},
			message_rx,
		)
	}

	/// Splits into independently driven write and read halves.
	pub fn into_parts(self) -> (PipeTransportSender<W>, PipeTransportReceiver<R>) {
		(
			PipeTransportSender { stdin: self.stdin },
			PipeTransportReceiver {
				stdout: self.stdout,
				message_tx: self.message_tx,
			},
		)
	}

	/// Splits and boxes both halves for [`Connection::new`](crate::Connection::new).
	pub fn into_transport_parts(self, message_rx: mpsc::UnboundedReceiver<Value>) -> TransportParts {
		let (sender, receiver) = self.into_parts();
		TransportParts {
			sender: Box::new(sender),
			receiver: Box::new(receiver),
			message_rx,
		}
	}

	/// Writes one message.
	pub async fn send(&mut self, message: Value) -> Result<()> {
		write_frame(&mut self.stdin, &message).await
	}

	/// Reads frames until EOF, forwarding each message.
	pub async fn run(&mut self) -> Result<()> {
		read_frames(&mut self.stdout, &self.message_tx).await
	}
}

/// Write half of a [`PipeTransport`].
pub struct PipeTransportSender<W> {
	stdin: W,
}

impl<W> Transport for PipeTransportSender<W>
where
	W: AsyncWrite + Unpin + Send + 'static,
{
	fn send(&mut self, message: Value) -> TransportFuture<'_> {
		Box::pin(async move { write_frame(&mut self.stdin, &message).await })
	}
}

/// Read half of a [`PipeTransport`].
pub struct PipeTransportReceiver<R> {
	stdout: R,
	message_tx: mpsc::UnboundedSender<Value>,
}

impl<R> TransportReceiver for PipeTransportReceiver<R>
where
	R: AsyncRead + Unpin + Send + 'static,
{
	fn run(self: Box<Self>) -> TransportFuture<'static> {
		let Self {
			mut stdout,
			message_tx,
		} = *self;
		Box::pin(async move { read_frames(&mut stdout, &message_tx).await })
	}
}

async fn write_frame<W>(writer: &mut W, message: &Value) -> Result<()>
where
	W: AsyncWrite + Unpin,
{
	let mut bytes = serde_json::to_vec(message)?;
	bytes.push(FRAME_DELIMITER);

	writer
		.write_all(&bytes)
		.await
		.map_err(|e| Error::Transport(format!("Failed to write message: {e}")))?;
	writer
		.flush()
		.await
		.map_err(|e| Error::Transport(format!("Failed to flush message: {e}")))
}

async fn read_frames<R>(reader: R, message_tx: &mpsc::UnboundedSender<Value>) -> Result<()>
where
	R: AsyncRead + Unpin,
{
	let mut reader = BufReader::new(reader);
	let mut frame = Vec::new();

	loop {
		frame.clear();
		let read = reader
			.read_until(FRAME_DELIMITER, &mut frame)
			.await
			.map_err(|e| Error::Transport(format!("Failed to read message: {e}")))?;

		if read == 0 {
			tracing::debug!("Pipe transport reached end of stream");
			return Ok(());
		}

		if frame.last() != Some(&FRAME_DELIMITER) {
			return Err(Error::Transport(format!(
				"Failed to read message: stream ended inside a {read}-byte frame"
			)));
		}
		frame.pop();

		if frame.is_empty() {
			continue;
		}

		let message: Value = match serde_json::from_slice(&frame) {
			Ok(message) => message,
			Err(e) => {
				tracing::warn!(error = %e, len = frame.len(), "Skipping malformed frame");
				continue;
			}
		};

		if message_tx.send(message).is_err() {
			tracing::debug!("Message receiver dropped, stopping pipe reader");
			return Ok(());
		}
	}
}
