//! Command/response correlation and session routing over one transport.
//!
//! # Message flow
//!
//! 1. A caller sends through [`Connection::command`] or [`Session::command`]
//! 2. The connection takes the next id from a counter shared by all sessions
//!    and registers a pending entry in the caller's table
//! 3. The command is queued for the writer task
//! 4. The dispatch loop receives inbound messages from the reader task in wire
//!    order
//! 5. Responses resolve the entry in the connection's or the addressed
//!    session's table; events go to the connection's or the session's listeners
//!
//! `Target.attachedToTarget` registers the new [`Session`] before the event is
//! delivered, so nothing sent on the new session afterwards is dropped.
//! `Target.detachedFromTarget` closes the session, then drops it from routing,
//! before delivery.


use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use cdp_protocol::events::{AttachToTargetResult, AttachedToTarget, DetachedFromTarget, TargetInfo};
use cdp_protocol::{Command, DEFAULT_PROTOCOL_TIMEOUT_MS, Event, Message};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{Notify, mpsc};

use crate::callbacks::{CallbackTable, CommandFuture};
use crate::emitter::{EventEmitter, EventWaiter, Subscription};
use crate::error::{Error, Result};
use crate::session::{DisconnectReason, Session};
use crate::transport::{Transport, TransportParts, TransportReceiver, WebSocketTransport};

/// Connection-level notifications.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
	/// A target session was registered.
	SessionAttached(Arc<Session>),
	/// A target session was detached by the browser.
	SessionDetached(Arc<Session>),
	/// The transport went away or [`Connection::close`] was called.
	Disconnected { reason: String },
}

/// Options for a [`Connection`].
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
	/// Per-command deadline; `None` waits indefinitely.
	pub protocol_timeout: Option<Duration>,
}

impl Default for ConnectionOptions {
	fn default() -> Self {
		Self {
			protocol_timeout: Some(Duration::from_millis(DEFAULT_PROTOCOL_TIMEOUT_MS)),
		}
	}
}

impl ConnectionOptions {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn protocol_timeout(mut self, timeout: Option<Duration>) -> Self {
		self.protocol_timeout = timeout;
		self
	}
}

/// Transport halves, taken once by [`Connection::run`].
struct ConnectionIo {
	sender: Box<dyn Transport>,
	receiver: Box<dyn TransportReceiver>,
	message_rx: mpsc::UnboundedReceiver<Value>,
	outbound_rx: mpsc::UnboundedReceiver<Value>,
}

/// Multiplexed DevTools connection.
pub struct Connection {
	last_id: AtomicU64,
	callbacks: CallbackTable,
	sessions: DashMap<Arc<str>, Arc<Session>>,
	outbound_tx: mpsc::UnboundedSender<Value>,
	io: Mutex<Option<ConnectionIo>>,
	closed: AtomicBool,
	close_reason: Mutex<Option<String>>,
	shutdown: Notify,
	events: EventEmitter<Event>,
	lifecycle: EventEmitter<ConnectionEvent>,
	options: ConnectionOptions,
}

impl Connection {
	/// Creates a connection over `parts`. Nothing is read until [`run`](Self::run).
	pub fn new(parts: TransportParts) -> Self {
		Self::with_options(parts, ConnectionOptions::default())
	}

	pub fn with_options(parts: TransportParts, options: ConnectionOptions) -> Self {
		let TransportParts {
			sender,
			receiver,
			message_rx,
		} = parts;
		let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

		Self {
			last_id: AtomicU64::new(0),
			callbacks: CallbackTable::default(),
			sessions: DashMap::new(),
			outbound_tx,
			io: Mutex::new(Some(ConnectionIo {
				sender,
				receiver,
				message_rx,
				outbound_rx,
			})),
			closed: AtomicBool::new(false),
			close_reason: Mutex::new(None),
			shutdown: Notify::new(),
			events: EventEmitter::new(),
			lifecycle: EventEmitter::new(),
			options,
		}
	}

	/// Connects to a browser WebSocket endpoint and starts the dispatch loop.
	pub async fn connect(ws_url: &str, options: ConnectionOptions) -> Result<Arc<Self>> {
		let parts = WebSocketTransport::connect(ws_url).await?;
		Ok(Self::with_options(parts, options).start())
	}

	/// Spawns [`run`](Self::run) on the current runtime.
	pub fn start(self) -> Arc<Self> {
		let connection = Arc::new(self);
		let runner = Arc::clone(&connection);
		tokio::spawn(async move { runner.run().await });
		connection
	}

	pub fn options(&self) -> &ConnectionOptions {
		&self.options
	}

	/// Sends a browser-level command (no session).
	pub fn command(&self, method: &str, params: Value) -> CommandFuture {
		self.enqueue(None, method, params)
	}

	/// Sends a browser-level command and deserializes its result.
	pub async fn send<P, R>(&self, method: &str, params: P) -> Result<R>
	where
		P: Serialize,
		R: DeserializeOwned,
	{
		let params = serde_json::to_value(params)?;
		let result = self.command(method, params).await?;
		Ok(serde_json::from_value(result)?)
	}

	/// Attaches to `target` in flatten mode and returns its session.
	pub async fn create_session(&self, target: &TargetInfo) -> Result<Arc<Session>> {
		let result: AttachToTargetResult = self
			.send(
				"Target.attachToTarget",
				serde_json::json!({ "targetId": target.target_id, "flatten": true }),
			)
			.await?;

		// The browser normally sends the attach event before the response.
		let session_id = result.session_id;
		let waiter = self.lifecycle.waiter({
			let session_id = session_id.clone();
			move |event| matches!(event, ConnectionEvent::SessionAttached(session) if session.id() == session_id)
		});
		if let Some(session) = self.session(&session_id) {
			return Ok(session);
		}

		let operation = format!("Target.attachedToTarget for session {session_id}");
		match waiter.wait(self.options.protocol_timeout, &operation).await? {
			ConnectionEvent::SessionAttached(session) => Ok(session),
			_ => Err(Error::ChannelClosed),
		}
	}

	/// Looks up a live session by id.
	pub fn session(&self, session_id: &str) -> Option<Arc<Session>> {
		self.sessions.get(session_id).map(|entry| Arc::clone(entry.value()))
	}

	/// Snapshot of every live session.
	pub fn sessions(&self) -> Vec<Arc<Session>> {
		self.sessions.iter().map(|entry| Arc::clone(entry.value())).collect()
	}

	/// Subscribes to browser-level protocol events (no session id).
	pub fn on<F>(&self, handler: F) -> Subscription
	where
		F: Fn(&Event) + Send + Sync + 'static,
	{
		self.events.on(handler)
	}

	/// Subscribes to session attach/detach and disconnection.
	pub fn on_lifecycle<F>(&self, handler: F) -> Subscription
	where
		F: Fn(&ConnectionEvent) + Send + Sync + 'static,
	{
		self.lifecycle.on(handler)
	}

	/// Registers a waiter for the next connection lifecycle event matching `predicate`.
	pub fn lifecycle_waiter<F>(&self, predicate: F) -> EventWaiter<ConnectionEvent>
	where
		F: Fn(&ConnectionEvent) -> bool + Send + Sync + 'static,
	{
		self.lifecycle.waiter(predicate)
	}

	pub fn is_closed(&self) -> bool {
		self.closed.load(Ordering::SeqCst)
	}

	/// Number of browser-level commands awaiting a response.
	pub fn pending_commands(&self) -> usize {
		self.callbacks.len()
	}

	/// Tears the connection down, rejecting everything still pending.
	pub fn close(&self) {
		self.teardown("Connection closed by client");
	}

	/// Drives the connection until the transport closes or [`close`](Self::close) is called.
	///
	/// Only the first call does anything.
	pub async fn run(self: &Arc<Self>) {
		let Some(io) = self.io.lock().take() else {
			tracing::warn!("Connection run loop already started");
			return;
		};
		let ConnectionIo {
			mut sender,
			receiver,
			mut message_rx,
			mut outbound_rx,
		} = io;

		let mut reader = tokio::spawn(async move { receiver.run().await });
		let mut writer = tokio::spawn(async move {
			while let Some(message) = outbound_rx.recv().await {
				if let Err(e) = sender.send(message).await {
					tracing::error!(error = %e, "Transport write error");
					return Err(e);
				}
			}
			Ok(())
		});

		let reason = loop {
			tokio::select! {
				message = message_rx.recv() => match message {
					Some(value) => self.dispatch_value(value),
					None => {
						break match (&mut reader).await {
							Ok(Ok(())) => "Transport closed".to_string(),
							Ok(Err(e)) => {
								tracing::error!(error = %e, "Transport read error");
								e.to_string()
							}
							Err(e) => format!("Transport reader task failed: {e}"),
						};
					}
				},
				result = &mut writer => {
					break match result {
						Ok(Err(e)) => e.to_string(),
						_ => "Transport writer stopped".to_string(),
					};
				}
				_ = self.shutdown.notified() => break "Connection closed by client".to_string(),
			}
		};

		self.teardown(&reason);
		reader.abort();
		writer.abort();
	}

	/// Dispatches one inbound message.
	///
	/// Exposed so callers that own their own read loop can drive the connection.
	pub fn dispatch(self: &Arc<Self>, message: Message) -> Result<()> {
		match message {
			Message::Response(response) => {
				let id = response.id;
				let session_id = response.session_id.clone().filter(|id| !id.is_empty());
				let resolved = match session_id.as_deref() {
					Some(session_id) => match self.session(session_id) {
						Some(session) => session.callbacks.resolve(id, response.into_outcome()),
						None => {
							tracing::debug!(id, session_id, "Response for unknown session (ignored)");
							return Ok(());
						}
					},
					None => self.callbacks.resolve(id, response.into_outcome()),
				};
				if !resolved {
					tracing::debug!(id, ?session_id, "Response for unknown command (ignored)");
				}
				Ok(())
			}
			Message::Event(event) => {
				match event.method.as_str() {
					"Target.attachedToTarget" => {
						let attached: AttachedToTarget = serde_json::from_value(event.params.clone())?;
						let session = self.register_session(attached, event.session());
						self.route_event(&event);
						self.lifecycle.emit(&ConnectionEvent::SessionAttached(session));
					}
					"Target.detachedFromTarget" => {
						let detached: DetachedFromTarget = serde_json::from_value(event.params.clone())?;
						let session = self.session(&detached.session_id);
						if let Some(session) = &session {
							session.close(DisconnectReason::TargetDetached);
						}
						self.sessions.remove(detached.session_id.as_str());
						self.route_event(&event);
						if let Some(session) = session {
							self.lifecycle.emit(&ConnectionEvent::SessionDetached(session));
						}
					}
					_ => self.route_event(&event),
				}
				Ok(())
			}
			Message::Unknown(value) => {
				tracing::debug!(message = %value, "Unknown message shape (ignored)");
				Ok(())
			}
		}
	}

	fn dispatch_value(self: &Arc<Self>, value: Value) {
		match serde_json::from_value::<Message>(value) {
			Ok(message) => {
				if let Err(e) = self.dispatch(message) {
					tracing::warn!(error = %e, "Error dispatching message");
				}
			}
			Err(e) => tracing::warn!(error = %e, "Failed to parse message"),
		}
	}

	fn register_session(self: &Arc<Self>, attached: AttachedToTarget, parent: Option<&str>) -> Arc<Session> {
		let id: Arc<str> = Arc::from(attached.session_id.as_str());
		let session = Arc::new(Session::new(
			Arc::clone(&id),
			attached.target_info,
			parent.map(Arc::from),
			Arc::downgrade(self),
		));
		tracing::debug!(
			session_id = %id,
			target_type = session.target_type(),
			target_id = session.target_id(),
			"Session attached"
		);
		if let Some(previous) = self.sessions.insert(id, Arc::clone(&session)) {
			previous.close(DisconnectReason::TargetDetached);
		}
		session
	}

	fn route_event(&self, event: &Event) {
		match event.session() {
			None => self.events.emit(event),
			Some(session_id) => match self.session(session_id) {
				Some(session) => session.dispatch_event(event),
				None => {
					tracing::debug!(session_id, method = %event.method, "Event for unknown session (dropped)");
				}
			},
		}
	}

	/// Registers and queues a command on behalf of the connection or `session`.
	pub(crate) fn enqueue(&self, session: Option<&Session>, method: &str, params: Value) -> CommandFuture {
		if let Some(error) = self.send_blocker(session, method) {
			return CommandFuture::failed(error);
		}

		let table = session.map_or(&self.callbacks, |session| &session.callbacks);
		let id = self.last_id.fetch_add(1, Ordering::SeqCst) + 1;
		let rx = table.register(id, method);

		// A close racing the registration above may have missed this entry.
		if let Some(error) = self.send_blocker(session, method) {
			table.remove(id);
			return CommandFuture::failed(error);
		}

		let command = Command {
			id,
			method: method.to_string(),
			params,
			session_id: session.map(|session| session.id().to_string()),
		};
		let value = match serde_json::to_value(&command) {
			Ok(value) => value,
			Err(e) => {
				table.remove(id);
				return CommandFuture::failed(e.into());
			}
		};

		tracing::debug!(id, method, session_id = ?command.session_id, "Sending command");
		if self.outbound_tx.send(value).is_err() {
			table.remove(id);
			return CommandFuture::failed(self.closed_error());
		}

		CommandFuture::pending(id, method, rx, table.clone(), self.options.protocol_timeout)
	}

	fn send_blocker(&self, session: Option<&Session>, method: &str) -> Option<Error> {
		if self.is_closed() {
			return Some(self.closed_error());
		}
		match session {
			Some(session) if session.is_closed() => Some(Error::SessionClosed {
				session_id: session.id().to_string(),
				method: method.to_string(),
			}),
			_ => None,
		}
	}

	fn closed_error(&self) -> Error {
		Error::ConnectionClosed {
			reason: self
				.close_reason
				.lock()
				.clone()
				.unwrap_or_else(|| "Connection closed".to_string()),
		}
	}

	fn teardown(&self, reason: &str) {
		self.close_reason.lock().get_or_insert_with(|| reason.to_string());
		if self.closed.swap(true, Ordering::SeqCst) {
			return;
		}

		let rejected = self.callbacks.reject_all(|_| Error::ConnectionClosed {
			reason: reason.to_string(),
		});

		let ids: Vec<Arc<str>> = self.sessions.iter().map(|entry| Arc::clone(entry.key())).collect();
		let sessions: Vec<Arc<Session>> = ids
			.iter()
			.filter_map(|id| self.sessions.remove(id).map(|(_, session)| session))
			.collect();
		for session in &sessions {
			session.close(DisconnectReason::ConnectionClosed {
				reason: reason.to_string(),
			});
		}

		tracing::info!(reason, rejected, sessions = sessions.len(), "Connection closed");
		self.lifecycle.emit(&ConnectionEvent::Disconnected {
			reason: reason.to_string(),
		});
		self.shutdown.notify_one();
	}
}

impl std::fmt::Debug for Connection {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Connection")
			.field("sessions", &self.sessions.len())
			.field("pending", &self.callbacks.len())
			.field("closed", &self.is_closed())
			.finish()
	}
}
