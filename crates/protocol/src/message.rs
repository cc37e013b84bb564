//! Message envelope for the DevTools wire protocol.
//!
//! Three shapes travel over the transport:
//!
//! - outbound command `{id, method, params, sessionId?}`
//! - inbound response `{id, result | error, sessionId?}`
//! - inbound event `{method, params, sessionId?}`
//!
//! Session-scoped traffic carries `sessionId`; browser-level traffic omits it.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Command sent to the browser.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Command {
	/// Connection-wide unique id used to correlate the response.
	pub id: u64,
	/// Fully qualified method name (e.g. `Page.navigate`).
	pub method: String,
	/// Method parameters; omitted on the wire when null.
	#[serde(default, skip_serializing_if = "Value::is_null")]
	pub params: Value,
	/// Target session this command is addressed to.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub session_id: Option<String>,
}

/// Response to a previously sent [`Command`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
	/// Id of the command this response answers.
	pub id: u64,
	/// Success payload (mutually exclusive with `error`).
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub result: Option<Value>,
	/// Failure payload (mutually exclusive with `result`).
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<ErrorPayload>,
	/// Session the originating command was addressed to.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub session_id: Option<String>,
}

impl Response {
	/// Splits the response into its success value or remote error.
	///
	/// A response without either field resolves to `Value::Null`.
	pub fn into_outcome(self) -> Result<Value, ErrorPayload> {
		match self.error {
			Some(error) => Err(error),
			None => Ok(self.result.unwrap_or(Value::Null)),
		}
	}
}

/// Remote error details.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
	/// JSON-RPC style error code.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub code: Option<i64>,
	/// Human-readable message.
	pub message: String,
	/// Extra detail supplied by the browser.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub data: Option<Value>,
}

/// Unsolicited event emitted by the browser.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
	/// Event name (e.g. `Page.frameNavigated`).
	pub method: String,
	/// Event parameters.
	#[serde(default)]
	pub params: Value,
	/// Session the event belongs to; absent for browser-level events.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub session_id: Option<String>,
}

impl Event {
	/// Returns the session id, treating an empty string as absent.
	pub fn session(&self) -> Option<&str> {
		self.session_id.as_deref().filter(|id| !id.is_empty())
	}
}

/// Discriminated union of inbound messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
	/// Response message (has an `id` field).
	Response(Response),
	/// Event message (has `method`, no `id`).
	Event(Event),
	/// Unknown message shape (forward-compatible catch-all).
	Unknown(Value),
}
