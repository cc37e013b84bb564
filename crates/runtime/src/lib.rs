//! DevTools runtime: transports, connection multiplexing and target sessions.
//!
//! - [`transport`] - framed JSON channels (pipe and WebSocket)
//! - [`Connection`] - command ids, pending-command tables, session routing
//! - [`Session`] - per-target command/event channel
//! - [`emitter`] - typed pub/sub with RAII [`Subscription`]s
//! - [`Error`] - the error taxonomy shared by the whole client

mod callbacks;
pub mod connection;
pub mod emitter;
pub mod error;
pub mod session;
pub mod transport;

pub use callbacks::CommandFuture;
pub use connection::{Connection, ConnectionEvent, ConnectionOptions};
pub use emitter::{EventEmitter, EventWaiter, HandlerId, Subscription};
pub use error::{Error, NavigationError, Result};
pub use session::{DisconnectReason, Session};
pub use transport::{
	PipeTransport, Transport, TransportParts, TransportReceiver, WebSocketTransport,
};

/// Routes `tracing` output through the test harness's captured writer.
#[cfg(test)]
pub(crate) fn init_test_tracing() {
	static INIT: std::sync::Once = std::sync::Once::new();
	INIT.call_once(|| {
		let _ = tracing_subscriber::fmt()
			.with_test_writer()
			.with_max_level(tracing::Level::DEBUG)
			.try_init();
	});
}
