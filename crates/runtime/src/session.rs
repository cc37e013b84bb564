//! Target sessions: one logical command/event channel per attached target.

use std::sync::{Arc, Weak};
use std::time::Duration;

use cdp_protocol::Event;
use cdp_protocol::events::TargetInfo;
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::callbacks::{CallbackTable, CommandFuture};
use crate::connection::Connection;
use crate::emitter::{EventEmitter, EventWaiter, Subscription};
use crate::error::{Error, Result};

/// Why a session stopped accepting commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
	/// The browser reported `Target.detachedFromTarget`.
	TargetDetached,
	/// The whole connection went away.
	ConnectionClosed { reason: String },
}

/// Command/event channel bound to one attached target (flatten mode).
///
/// Sessions are created by the [`Connection`] when it sees
/// `Target.attachedToTarget`, and hold only a weak reference back to it. Once
/// the session is closed every send fails locally without touching the wire.
pub struct Session {
	id: Arc<str>,
	target: TargetInfo,
	parent_id: Option<Arc<str>>,
	connection: Mutex<Option<Weak<Connection>>>,
	pub(crate) callbacks: CallbackTable,
	events: EventEmitter<Event>,
	disconnected: EventEmitter<DisconnectReason>,
}

impl Session {
	pub(crate) fn new(
		id: Arc<str>,
		target: TargetInfo,
		parent_id: Option<Arc<str>>,
		connection: Weak<Connection>,
	) -> Self {
		Self {
			id,
			target,
			parent_id,
			connection: Mutex::new(Some(connection)),
			callbacks: CallbackTable::default(),
			events: EventEmitter::new(),
			disconnected: EventEmitter::new(),
		}
	}

	/// Protocol session id.
	pub fn id(&self) -> &str {
		&self.id
	}

	/// Target this session is attached to, as reported at attach time.
	pub fn target_info(&self) -> &TargetInfo {
		&self.target
	}

	pub fn target_id(&self) -> &str {
		&self.target.target_id
	}

	/// Target type (`page`, `iframe`, `worker`, ...).
	pub fn target_type(&self) -> &str {
		&self.target.target_type
	}

	/// Session the attach event arrived on, for auto-attached child targets.
	pub fn parent_id(&self) -> Option<&str> {
		self.parent_id.as_deref()
	}

	/// Returns the owning connection while the session is open.
	pub fn connection(&self) -> Option<Arc<Connection>> {
		self.connection.lock().as_ref().and_then(Weak::upgrade)
	}

	pub fn is_closed(&self) -> bool {
		self.connection.lock().is_none()
	}

	/// Sends a command on this session.
	///
	/// Fails immediately with [`Error::SessionClosed`] once the session is
	/// detached.
	pub fn command(&self, method: &str, params: Value) -> CommandFuture {
		match self.connection() {
			Some(connection) => connection.enqueue(Some(self), method, params),
			None => CommandFuture::failed(self.closed_error(method)),
		}
	}

	/// Sends a command and deserializes its result.
	pub async fn send<P, R>(&self, method: &str, params: P) -> Result<R>
	where
		P: Serialize,
		R: DeserializeOwned,
	{
		let params = serde_json::to_value(params)?;
		let result = self.command(method, params).await?;
		Ok(serde_json::from_value(result)?)
	}

	/// Sends a command whose result carries nothing of interest.
	pub async fn send_no_result<P: Serialize>(&self, method: &str, params: P) -> Result<()> {
		let params = serde_json::to_value(params)?;
		self.command(method, params).await.map(|_| ())
	}

	/// Asks the browser to detach this session.
	///
	/// The session closes when the resulting `Target.detachedFromTarget` arrives.
	pub async fn detach(&self) -> Result<()> {
		let connection = self.connection().ok_or_else(|| self.closed_error("Target.detachFromTarget"))?;
		connection
			.command(
				"Target.detachFromTarget",
				serde_json::json!({ "sessionId": self.id.as_ref() }),
			)
			.await
			.map(|_| ())
	}

	/// Subscribes to every protocol event addressed to this session.
	pub fn on<F>(&self, handler: F) -> Subscription
	where
		F: Fn(&Event) + Send + Sync + 'static,
	{
		self.events.on(handler)
	}

	/// Subscribes to session disconnection.
	pub fn on_disconnected<F>(&self, handler: F) -> Subscription
	where
		F: Fn(&DisconnectReason) + Send + Sync + 'static,
	{
		self.disconnected.on(handler)
	}

	/// Registers a waiter for the next event named `method`.
	pub fn waiter(&self, method: &str) -> EventWaiter<Event> {
		let method = method.to_string();
		self.events.waiter(move |event| event.method == method)
	}

	/// Waits for the next event named `method`.
	pub async fn wait_for_event(&self, method: &str, timeout: Option<Duration>) -> Result<Event> {
		self.waiter(method).wait(timeout, method).await
	}

	/// Number of protocol-event listeners (for leak checks).
	pub fn listener_count(&self) -> usize {
		self.events.listener_count() + self.disconnected.listener_count()
	}

	/// Number of commands awaiting a response on this session.
	pub fn pending_commands(&self) -> usize {
		self.callbacks.len()
	}

	pub(crate) fn dispatch_event(&self, event: &Event) {
		self.events.emit(event);
	}

	/// Clears the back-reference, rejects pending commands and notifies listeners.
	///
	/// Only the first call has any effect.
	pub(crate) fn close(&self, reason: DisconnectReason) {
		if self.connection.lock().take().is_none() {
			return;
		}

		let rejected = match &reason {
			DisconnectReason::TargetDetached => self.callbacks.reject_all(|method| self.closed_error(method)),
			DisconnectReason::ConnectionClosed { reason } => self.callbacks.reject_all(|_| Error::ConnectionClosed {
				reason: reason.clone(),
			}),
		};

		tracing::debug!(session_id = %self.id, ?reason, rejected, "Session closed");
		self.disconnected.emit(&reason);
	}

	fn closed_error(&self, method: &str) -> Error {
		Error::SessionClosed {
			session_id: self.id.to_string(),
			method: method.to_string(),
		}
	}
}

impl std::fmt::Debug for Session {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Session")
			.field("id", &self.id)
			.field("target_id", &self.target.target_id)
			.field("target_type", &self.target.target_type)
			.field("closed", &self.is_closed())
			.finish()
	}
}
