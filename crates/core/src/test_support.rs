//! In-process fixtures: a connection whose transport is never driven, fed by
//! dispatching protocol messages directly.

use std::sync::Arc;

use cdp_protocol::Message;
use cdp_protocol::events::FrameTree;
use cdp_runtime::{Connection, PipeTransport, Session};
use serde_json::{Value, json};
use tokio::io::{DuplexStream, duplex};

pub(crate) const SESSION_ID: &str = "S1";

pub(crate) struct TestTarget {
	connection: Arc<Connection>,
	session: Arc<Session>,
	_pipes: (DuplexStream, DuplexStream),
}

impl TestTarget {
	pub(crate) fn new() -> Self {
		let (stdin_read, stdin_write) = duplex(1024);
		let (stdout_read, stdout_write) = duplex(1024);
		let (transport, message_rx) = PipeTransport::new(stdin_write, stdout_read);
		let connection = Arc::new(Connection::new(transport.into_transport_parts(message_rx)));

		dispatch(
			&connection,
			json!({
				"method": "Target.attachedToTarget",
				"params": {
					"sessionId": SESSION_ID,
					"targetInfo": {"targetId": "T1", "type": "page", "title": "", "url": "about:blank", "attached": true},
					"waitingForDebugger": false
				}
			}),
		);
		let session = connection.session(SESSION_ID).expect("session registered on attach");

		Self {
			connection,
			session,
			_pipes: (stdin_read, stdout_write),
		}
	}

	pub(crate) fn session(&self) -> Arc<Session> {
		Arc::clone(&self.session)
	}

	pub(crate) fn connection(&self) -> &Arc<Connection> {
		&self.connection
	}

	/// Delivers a session-scoped event.
	pub(crate) fn event(&self, method: &str, params: Value) {
		dispatch(
			&self.connection,
			json!({"method": method, "params": params, "sessionId": SESSION_ID}),
		);
	}

	pub(crate) fn frame_tree(&self, tree: Value) -> FrameTree {
		serde_json::from_value(tree).expect("valid frame tree")
	}

	pub(crate) fn frame_navigated(&self, frame_id: &str, parent_id: Option<&str>, loader_id: &str, url: &str) {
		let mut frame = json!({"id": frame_id, "loaderId": loader_id, "url": url});
		if let Some(parent_id) = parent_id {
			frame["parentId"] = json!(parent_id);
		}
		self.event("Page.frameNavigated", json!({ "frame": frame }));
	}

	pub(crate) fn frame_attached(&self, frame_id: &str, parent_id: &str) {
		self.event(
			"Page.frameAttached",
			json!({"frameId": frame_id, "parentFrameId": parent_id}),
		);
	}

	pub(crate) fn frame_detached(&self, frame_id: &str) {
		self.event(
			"Page.frameDetached",
			json!({"frameId": frame_id, "reason": "remove"}),
		);
	}

	pub(crate) fn lifecycle(&self, frame_id: &str, loader_id: &str, name: &str) {
		self.event(
			"Page.lifecycleEvent",
			json!({"frameId": frame_id, "loaderId": loader_id, "name": name, "timestamp": 1.0}),
		);
	}

	pub(crate) fn context_created(&self, context_id: i64, frame_id: &str, world_name: Option<&str>) {
		let context_type = if world_name.is_none() { "default" } else { "isolated" };
		self.event(
			"Runtime.executionContextCreated",
			json!({
				"context": {
					"id": context_id,
					"origin": "https://example.test",
					"name": world_name.unwrap_or_default(),
					"auxData": {
						"frameId": frame_id,
						"isDefault": world_name.is_none(),
						"type": context_type
					}
				}
			}),
		);
	}

	pub(crate) fn detach(&self) {
		dispatch(
			&self.connection,
			json!({"method": "Target.detachedFromTarget", "params": {"sessionId": SESSION_ID}}),
		);
	}
}

fn dispatch(connection: &Arc<Connection>, value: Value) {
	let message: Message = serde_json::from_value(value).expect("valid message");
	connection.dispatch(message).expect("dispatch");
}
