//! Error types for the DevTools runtime.

use serde_json::Value;
use thiserror::Error;

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while driving a browser over the DevTools protocol.
#[derive(Debug, Error)]
pub enum Error {
	/// The browser rejected a command.
	#[error("Protocol error ({method}): {message}{}", data.as_ref().map(|d| format!(" {d}")).unwrap_or_default())]
	Protocol {
		/// Method of the rejected command.
		method: String,
		/// Remote error code, when supplied.
		code: Option<i64>,
		/// Remote error message.
		message: String,
		/// Extra remote detail, when supplied.
		data: Option<Value>,
	},

	/// The transport is gone; every pending command is rejected with this.
	#[error("Connection closed: {reason}")]
	ConnectionClosed { reason: String },

	/// The target session was detached; only that session's work is rejected.
	#[error("Session closed: cannot send '{method}', session {session_id} is detached")]
	SessionClosed { session_id: String, method: String },

	/// A deadline elapsed.
	#[error("Timeout of {duration_ms}ms exceeded: {operation}")]
	Timeout {
		/// Description of what was being waited on (method or condition list).
		operation: String,
		duration_ms: u64,
	},

	/// The navigated frame went away or the navigation was superseded.
	#[error(transparent)]
	Navigation(#[from] NavigationError),

	/// The execution context was destroyed (navigation or explicit clear).
	#[error("Execution context {context_id} was destroyed, most likely because of a navigation")]
	ExecutionContextDestroyed { context_id: i64 },

	/// The evaluated script threw.
	#[error("Evaluation failed: {message}")]
	Evaluation { message: String },

	/// Failed to establish the transport.
	#[error("Failed to connect to browser: {0}")]
	ConnectionFailed(String),

	/// Transport-level I/O or framing failure.
	#[error("Transport error: {0}")]
	Transport(String),

	/// I/O error.
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	/// JSON serialization/deserialization error.
	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),

	/// An internal channel closed before delivering a result.
	#[error("Channel closed unexpectedly")]
	ChannelClosed,

	/// Invalid argument provided to a method.
	#[error("Invalid argument: {0}")]
	InvalidArgument(String),

	/// No frame with the given id is attached.
	#[error("Frame not found: {0}")]
	FrameNotFound(String),
}

/// Reasons a navigation or navigation wait could not complete.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NavigationError {
	/// The watched frame (or an ancestor) detached.
	#[error("Navigating frame {frame_id} was detached")]
	FrameDetached { frame_id: String },

	/// A newer cross-document navigation replaced the watched one.
	#[error("Navigation of frame {frame_id} was aborted by a newer navigation")]
	Aborted { frame_id: String },

	/// The browser reported a navigation failure (e.g. `net::ERR_NAME_NOT_RESOLVED`).
	#[error("Navigation to '{url}' failed: {reason}")]
	Failed { url: String, reason: String },

	/// The session owning the frame closed.
	#[error("Target closed while navigating")]
	TargetClosed,

	/// The renderer crashed.
	#[error("Target crashed while navigating")]
	TargetCrashed,
}

impl Error {
	/// Builds a timeout error for `operation`.
	pub fn timeout(operation: impl Into<String>, duration: std::time::Duration) -> Self {
		Error::Timeout {
			operation: operation.into(),
			duration_ms: duration.as_millis() as u64,
		}
	}

	/// Returns true if this is a timeout error.
	pub fn is_timeout(&self) -> bool {
		matches!(self, Error::Timeout { .. })
	}

	/// Returns true if the underlying connection is gone.
	pub fn is_connection_closed(&self) -> bool {
		matches!(self, Error::ConnectionClosed { .. })
	}

	/// Returns true if the target session was detached.
	pub fn is_session_closed(&self) -> bool {
		matches!(self, Error::SessionClosed { .. })
	}

	/// Returns true for any error meaning the target can no longer be reached.
	pub fn is_target_closed(&self) -> bool {
		matches!(
			self,
			Error::ConnectionClosed { .. }
				| Error::SessionClosed { .. }
				| Error::Navigation(NavigationError::TargetClosed)
				| Error::Navigation(NavigationError::TargetCrashed)
		)
	}

	/// Returns true if this is a navigation error.
	pub fn is_navigation(&self) -> bool {
		matches!(self, Error::Navigation(_))
	}

	/// Returns the remote method name if this is a protocol error.
	pub fn method(&self) -> Option<&str> {
		match self {
			Error::Protocol { method, .. } | Error::SessionClosed { method, .. } => Some(method),
			_ => None,
		}
	}
}
