//! In-process fake browser speaking NUL-framed CDP over duplex pipes.

#![allow(dead_code)]

use std::sync::{Arc, Once};

use cdp::protocol::events::TargetInfo;
use cdp::{Connection, Page, PageOptions, PipeTransport, UTILITY_WORLD_NAME};
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, duplex};
use tokio::task::JoinHandle;
use tracing_subscriber::filter::LevelFilter;

pub const SESSION_ID: &str = "S1";
pub const FRAME_ID: &str = "F1";

/// How the fake browser answers `Page.navigate`.
#[derive(Debug, Clone)]
pub enum Navigation {
	/// Commits and loads the document with `status`.
	Load { status: u16 },
	/// `from` answers 302 to the navigated URL, which then loads with 200.
	Redirect { from: String },
	/// Replies with `errorText` and never commits.
	Fail { error_text: String },
	/// Commits but never fires lifecycle events.
	Stall,
}

pub fn init_tracing() {
	static INIT: Once = Once::new();
	INIT.call_once(|| {
		let _ = tracing_subscriber::fmt()
			.with_test_writer()
			.with_max_level(LevelFilter::DEBUG)
			.try_init();
	});
}

pub struct FakeBrowser {
	pub connection: Arc<Connection>,
	task: JoinHandle<()>,
}

impl FakeBrowser {
	pub fn start(navigation: Navigation) -> Self {
		init_tracing();
		let (browser_stdin, client_stdin) = duplex(64 * 1024);
		let (client_stdout, browser_stdout) = duplex(64 * 1024);
		let (transport, message_rx) = PipeTransport::new(client_stdin, client_stdout);
		let connection = Connection::new(transport.into_transport_parts(message_rx)).start();
		let task = tokio::spawn(serve(browser_stdin, browser_stdout, navigation));
		Self { connection, task }
	}

	pub async fn page(&self, options: PageOptions) -> Page {
		let target = TargetInfo {
			target_id: "T1".to_string(),
			target_type: "page".to_string(),
			..Default::default()
		};
		let session = self.connection.create_session(&target).await.expect("attach");
		Page::attach(session, options).await.expect("page attach")
	}

	/// Drops the browser side of the pipes.
	pub fn crash(&self) {
		self.task.abort();
	}
}

impl Drop for FakeBrowser {
	fn drop(&mut self) {
		self.task.abort();
	}
}

async fn serve(stdin: DuplexStream, mut stdout: DuplexStream, navigation: Navigation) {
	let mut reader = BufReader::new(stdin);
	let mut state = BrowserState {
		navigation,
		next_context_id: 10,
		documents: 0,
	};
	loop {
		let mut frame = Vec::new();
		match reader.read_until(0, &mut frame).await {
			Ok(0) | Err(_) => return,
			Ok(_) => {}
		}
		frame.pop();
		let Ok(command) = serde_json::from_slice::<Value>(&frame) else {
			continue;
		};
		for message in state.respond(&command) {
			let mut bytes = serde_json::to_vec(&message).expect("serialize");
			bytes.push(0);
			if stdout.write_all(&bytes).await.is_err() {
				return;
			}
		}
	}
}

struct BrowserState {
	navigation: Navigation,
	next_context_id: i64,
	documents: u32,
}

impl BrowserState {
	fn respond(&mut self, command: &Value) -> Vec<Value> {
		let id = command["id"].clone();
		let method = command["method"].as_str().unwrap_or_default();
		let params = &command["params"];
		let reply = |result: Value| match command.get("sessionId") {
			Some(session_id) => json!({"id": id, "result": result, "sessionId": session_id}),
			None => json!({"id": id, "result": result}),
		};

		match method {
			"Target.attachToTarget" => vec![
				json!({
					"method": "Target.attachedToTarget",
					"params": {
						"sessionId": SESSION_ID,
						"targetInfo": {"targetId": "T1", "type": "page", "title": "", "url": "about:blank", "attached": true},
						"waitingForDebugger": false
					}
				}),
				reply(json!({ "sessionId": SESSION_ID })),
			],
			"Page.getFrameTree" => vec![reply(json!({
				"frameTree": {"frame": {"id": FRAME_ID, "loaderId": "L0", "url": "about:blank"}}
			}))],
			"Runtime.enable" => vec![self.context_created(None), reply(json!({}))],
			"Page.createIsolatedWorld" => {
				let context = self.context_created(Some(UTILITY_WORLD_NAME));
				let context_id = context["params"]["context"]["id"].clone();
				vec![context, reply(json!({ "executionContextId": context_id }))]
			}
			"Page.navigate" => {
				let url = params["url"].as_str().unwrap_or_default().to_string();
				self.navigate(&url, reply)
			}
			"Runtime.evaluate" => {
				let expression = params["expression"].as_str().unwrap_or_default();
				if expression.contains("throw") {
					vec![reply(json!({
						"result": {"type": "object", "subtype": "error", "description": "Error: boom"},
						"exceptionDetails": {
							"text": "Uncaught",
							"lineNumber": 0,
							"columnNumber": 0,
							"exception": {"type": "object", "description": "Error: boom"}
						}
					}))]
				} else {
					vec![reply(json!({ "result": {"type": "number", "value": 42} }))]
				}
			}
			"Page.close" => vec![
				reply(json!({})),
				json!({"method": "Target.detachedFromTarget", "params": {"sessionId": SESSION_ID, "targetId": "T1"}}),
			],
			_ => vec![reply(json!({}))],
		}
	}

	fn navigate(&mut self, url: &str, reply: impl Fn(Value) -> Value) -> Vec<Value> {
		self.documents += 1;
		let loader_id = format!("NAV{}", self.documents);

		let (status, mut messages) = match &self.navigation {
			Navigation::Fail { error_text } => {
				return vec![reply(json!({
					"frameId": FRAME_ID,
					"errorText": error_text
				}))];
			}
			Navigation::Load { status } => (*status, vec![request_will_be_sent(&loader_id, url, None)]),
			Navigation::Redirect { from } => (
				200,
				vec![
					request_will_be_sent(&loader_id, from, None),
					request_will_be_sent(&loader_id, url, Some(from)),
				],
			),
			Navigation::Stall => (200, vec![request_will_be_sent(&loader_id, url, None)]),
		};

		messages.push(session_event("Page.lifecycleEvent", lifecycle(&loader_id, "init")));
		messages.push(session_event("Runtime.executionContextsCleared", json!({})));
		messages.push(session_event(
			"Page.frameNavigated",
			json!({"frame": {"id": FRAME_ID, "loaderId": loader_id, "url": url}, "type": "Navigation"}),
		));
		messages.push(self.context_created(None));
		messages.push(self.context_created(Some(UTILITY_WORLD_NAME)));
		messages.push(session_event(
			"Network.responseReceived",
			json!({
				"requestId": loader_id,
				"loaderId": loader_id,
				"type": "Document",
				"frameId": FRAME_ID,
				"response": {"url": url, "status": status, "statusText": "OK", "headers": {}, "mimeType": "text/html"}
			}),
		));
		messages.push(reply(json!({ "frameId": FRAME_ID, "loaderId": loader_id })));
		if matches!(self.navigation, Navigation::Stall) {
			return messages;
		}
		messages.push(session_event(
			"Network.loadingFinished",
			json!({"requestId": loader_id, "encodedDataLength": 128}),
		));
		messages.push(session_event("Page.lifecycleEvent", lifecycle(&loader_id, "DOMContentLoaded")));
		messages.push(session_event("Page.lifecycleEvent", lifecycle(&loader_id, "load")));
		messages
	}

	fn context_created(&mut self, world_name: Option<&str>) -> Value {
		self.next_context_id += 1;
		let context_type = if world_name.is_some() { "isolated" } else { "default" };
		session_event(
			"Runtime.executionContextCreated",
			json!({
				"context": {
					"id": self.next_context_id,
					"origin": "",
					"name": world_name.unwrap_or_default(),
					"auxData": {"frameId": FRAME_ID, "isDefault": world_name.is_none(), "type": context_type}
				}
			}),
		)
	}
}

fn session_event(method: &str, params: Value) -> Value {
	json!({"method": method, "params": params, "sessionId": SESSION_ID})
}

fn lifecycle(loader_id: &str, name: &str) -> Value {
	json!({"frameId": FRAME_ID, "loaderId": loader_id, "name": name, "timestamp": 1.0})
}

fn request_will_be_sent(loader_id: &str, url: &str, redirected_from: Option<&str>) -> Value {
	let mut params = json!({
		"requestId": loader_id,
		"loaderId": loader_id,
		"documentURL": url,
		"request": {"url": url, "method": "GET", "headers": {}},
		"type": "Document",
		"frameId": FRAME_ID
	});
	if let Some(from) = redirected_from {
		params["redirectResponse"] = json!({
			"url": from,
			"status": 302,
			"statusText": "Found",
			"headers": {"Location": url},
			"mimeType": ""
		});
	}
	session_event("Network.requestWillBeSent", params)
}
