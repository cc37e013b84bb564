//! Request/response records and per-frame in-flight accounting.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use cdp_protocol::Event;
use cdp_protocol::events::{
	LoadingFailed, LoadingFinished, RequestServedFromCache, RequestWillBeSent, ResponsePayload,
	ResponseReceived,
};
use cdp_runtime::{DisconnectReason, EventEmitter, Result, Session, Subscription};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::json;

/// Network notifications.
///
/// `Response`, `RequestFinished` and `RequestFailed` carry the request; its
/// [`response`](Request::response) and [`failure`](Request::failure) are already
/// updated when the event is emitted.
#[derive(Debug, Clone)]
pub enum NetworkEvent {
	Request(Request),
	Response(Request),
	RequestFinished(Request),
	RequestFailed(Request),
	/// The number of unfinished requests of a frame changed.
	InFlightChanged { frame_id: String, in_flight: usize },
}

/// Remote endpoint a response was served from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteAddress {
	pub ip: String,
	pub port: u16,
}

/// Response headers and metadata. The body is never buffered.
#[derive(Debug, Clone)]
pub struct Response {
	url: String,
	status: u16,
	status_text: String,
	headers: HashMap<String, String>,
	mime_type: String,
	remote_address: Option<RemoteAddress>,
	from_cache: bool,
	from_service_worker: bool,
	protocol: Option<String>,
}

impl Response {
	fn new(payload: ResponsePayload, from_memory_cache: bool) -> Self {
		let remote_address = payload.remote_ip_address.map(|ip| RemoteAddress {
			ip,
			port: payload.remote_port.unwrap_or_default(),
		});
		Self {
			url: payload.url,
			status: payload.status,
			status_text: payload.status_text,
			headers: payload.headers,
			mime_type: payload.mime_type,
			remote_address,
			from_cache: payload.from_disk_cache || from_memory_cache,
			from_service_worker: payload.from_service_worker,
			protocol: payload.protocol,
		}
	}

	pub fn url(&self) -> &str {
		&self.url
	}

	pub fn status(&self) -> u16 {
		self.status
	}

	pub fn status_text(&self) -> &str {
		&self.status_text
	}

	pub fn headers(&self) -> &HashMap<String, String> {
		&self.headers
	}

	/// Case-insensitive header lookup.
	pub fn header(&self, name: &str) -> Option<&str> {
		self.headers
			.iter()
			.find(|(key, _)| key.eq_ignore_ascii_case(name))
			.map(|(_, value)| value.as_str())
	}

	pub fn mime_type(&self) -> &str {
		&self.mime_type
	}

	pub fn remote_address(&self) -> Option<&RemoteAddress> {
		self.remote_address.as_ref()
	}

	/// Served from the disk or memory cache.
	pub fn from_cache(&self) -> bool {
		self.from_cache
	}

	pub fn from_service_worker(&self) -> bool {
		self.from_service_worker
	}

	/// Negotiated protocol (`http/1.1`, `h2`, ...).
	pub fn protocol(&self) -> Option<&str> {
		self.protocol.as_deref()
	}

	/// Returns true for status 0 (e.g. `file://`) or 2xx.
	pub fn ok(&self) -> bool {
		self.status == 0 || (200..300).contains(&self.status)
	}
}

/// A network request issued by the page.
///
/// A redirect produces a new `Request` under the same request id; the
/// superseded one is terminal and heads the new request's
/// [`redirect_chain`](Self::redirect_chain).
#[derive(Clone)]
pub struct Request {
	inner: Arc<RequestInner>,
}

struct RequestInner {
	request_id: String,
	url: String,
	method: String,
	headers: HashMap<String, String>,
	post_data: Option<String>,
	resource_type: String,
	frame_id: Option<String>,
	loader_id: String,
	is_navigation: bool,
	redirect_chain: Vec<Request>,
	state: Mutex<RequestState>,
}

#[derive(Default)]
struct RequestState {
	response: Option<Response>,
	failure: Option<String>,
	finished: bool,
	from_memory_cache: bool,
}

impl Request {
	fn new(event: RequestWillBeSent, redirect_chain: Vec<Request>) -> Self {
		let resource_type = event.resource_type.unwrap_or_else(|| "Other".to_string());
		let is_navigation = event.request_id == event.loader_id && resource_type == "Document";
		let url = match &event.request.url_fragment {
			Some(fragment) => format!("{}{}", event.request.url, fragment),
			None => event.request.url.clone(),
		};
		Self {
			inner: Arc::new(RequestInner {
				request_id: event.request_id,
				url,
				method: event.request.method,
				headers: event.request.headers,
				post_data: event.request.post_data,
				resource_type,
				frame_id: event.frame_id,
				loader_id: event.loader_id,
				is_navigation,
				redirect_chain,
				state: Mutex::new(RequestState::default()),
			}),
		}
	}

	pub fn request_id(&self) -> &str {
		&self.inner.request_id
	}

	pub fn url(&self) -> &str {
		&self.inner.url
	}

	pub fn method(&self) -> &str {
		&self.inner.method
	}

	pub fn headers(&self) -> &HashMap<String, String> {
		&self.inner.headers
	}

	pub fn post_data(&self) -> Option<&str> {
		self.inner.post_data.as_deref()
	}

	/// Resource type as reported by the browser (`Document`, `Script`, ...).
	pub fn resource_type(&self) -> &str {
		&self.inner.resource_type
	}

	pub fn frame_id(&self) -> Option<&str> {
		self.inner.frame_id.as_deref()
	}

	pub fn loader_id(&self) -> &str {
		&self.inner.loader_id
	}

	/// Returns true for the document request that drives a frame navigation.
	pub fn is_navigation_request(&self) -> bool {
		self.inner.is_navigation
	}

	/// Requests superseded by redirects, oldest first.
	pub fn redirect_chain(&self) -> &[Request] {
		&self.inner.redirect_chain
	}

	pub fn response(&self) -> Option<Response> {
		self.inner.state.lock().response.clone()
	}

	/// Error text of a failed request.
	pub fn failure(&self) -> Option<String> {
		self.inner.state.lock().failure.clone()
	}

	/// Returns true once the request finished, failed or was redirected.
	pub fn is_finished(&self) -> bool {
		self.inner.state.lock().finished
	}

	pub fn ptr_eq(&self, other: &Request) -> bool {
		Arc::ptr_eq(&self.inner, &other.inner)
	}

	fn set_response(&self, payload: ResponsePayload) {
		let mut state = self.inner.state.lock();
		let response = Response::new(payload, state.from_memory_cache);
		state.response = Some(response);
	}

	fn mark_served_from_cache(&self) {
		let mut state = self.inner.state.lock();
		state.from_memory_cache = true;
		if let Some(response) = state.response.as_mut() {
			response.from_cache = true;
		}
	}

	fn finish(&self, failure: Option<String>) {
		let mut state = self.inner.state.lock();
		state.finished = true;
		if failure.is_some() {
			state.failure = failure;
		}
	}
}

impl fmt::Debug for Request {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Request")
			.field("request_id", &self.inner.request_id)
			.field("method", &self.inner.method)
			.field("url", &self.inner.url)
			.field("frame_id", &self.inner.frame_id)
			.field("redirects", &self.inner.redirect_chain.len())
			.finish()
	}
}

#[derive(Default)]
struct NetworkState {
	/// Unfinished requests by request id.
	requests: HashMap<String, Request>,
	in_flight: HashMap<String, usize>,
}

/// Tracks the network activity of one page session.
pub struct NetworkManager {
	session: Arc<Session>,
	state: Mutex<NetworkState>,
	events: EventEmitter<NetworkEvent>,
	subscriptions: Mutex<Vec<Subscription>>,
}

impl NetworkManager {
	pub fn new(session: Arc<Session>) -> Arc<Self> {
		let manager = Arc::new(Self {
			session: Arc::clone(&session),
			state: Mutex::new(NetworkState::default()),
			events: EventEmitter::new(),
			subscriptions: Mutex::new(Vec::new()),
		});

		let weak = Arc::downgrade(&manager);
		let on_event = session.on(move |event| {
			if let Some(manager) = weak.upgrade() {
				manager.handle_event(event);
			}
		});
		let weak = Arc::downgrade(&manager);
		let on_disconnect = session.on_disconnected(move |reason| {
			if let Some(manager) = weak.upgrade() {
				manager.handle_disconnect(reason);
			}
		});
		manager.subscriptions.lock().extend([on_event, on_disconnect]);

		manager
	}

	/// Enables the network domain.
	pub async fn initialize(&self) -> Result<()> {
		self.session.send_no_result("Network.enable", json!({})).await
	}

	/// Sends `headers` with every request of the page.
	pub async fn set_extra_http_headers(&self, headers: HashMap<String, String>) -> Result<()> {
		self.session
			.send_no_result("Network.setExtraHTTPHeaders", json!({ "headers": headers }))
			.await
	}

	pub async fn set_cache_enabled(&self, enabled: bool) -> Result<()> {
		self.session
			.send_no_result("Network.setCacheDisabled", json!({ "cacheDisabled": !enabled }))
			.await
	}

	/// Number of unfinished requests issued by `frame_id`.
	pub fn in_flight(&self, frame_id: &str) -> usize {
		self.state.lock().in_flight.get(frame_id).copied().unwrap_or(0)
	}

	/// Looks up an unfinished request.
	pub fn request(&self, request_id: &str) -> Option<Request> {
		self.state.lock().requests.get(request_id).cloned()
	}

	pub fn on<F>(&self, handler: F) -> Subscription
	where
		F: Fn(&NetworkEvent) + Send + Sync + 'static,
	{
		self.events.on(handler)
	}

	pub fn listener_count(&self) -> usize {
		self.events.listener_count()
	}

	fn handle_event(&self, event: &Event) {
		let mut emitted = Vec::new();
		{
			let mut state = self.state.lock();
			let out = &mut emitted;
			match event.method.as_str() {
				"Network.requestWillBeSent" => {
					if let Some(sent) = parse::<RequestWillBeSent>(event) {
						state.request_will_be_sent(sent, out);
					}
				}
				"Network.responseReceived" => {
					if let Some(received) = parse::<ResponseReceived>(event) {
						state.response_received(received, out);
					}
				}
				"Network.loadingFinished" => {
					if let Some(finished) = parse::<LoadingFinished>(event) {
						state.complete(&finished.request_id, None, out);
					}
				}
				"Network.loadingFailed" => {
					if let Some(failed) = parse::<LoadingFailed>(event) {
						state.complete(&failed.request_id, Some(failed.error_text), out);
					}
				}
				"Network.requestServedFromCache" => {
					if let Some(served) = parse::<RequestServedFromCache>(event) {
						if let Some(request) = state.requests.get(&served.request_id) {
							request.mark_served_from_cache();
						}
					}
				}
				_ => {}
			}
		}
		for event in &emitted {
			self.events.emit(event);
		}
	}

	fn handle_disconnect(&self, reason: &DisconnectReason) {
		let mut state = self.state.lock();
		tracing::debug!(
			session_id = self.session.id(),
			?reason,
			unfinished = state.requests.len(),
			"Dropping network state of closed session"
		);
		state.requests.clear();
		state.in_flight.clear();
	}
}

impl fmt::Debug for NetworkManager {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("NetworkManager")
			.field("session", &self.session.id())
			.field("requests", &self.state.lock().requests.len())
			.finish()
	}
}

fn parse<T: DeserializeOwned>(event: &Event) -> Option<T> {
	match serde_json::from_value(event.params.clone()) {
		Ok(params) => Some(params),
		Err(e) => {
			tracing::warn!(method = %event.method, error = %e, "Malformed event payload");
			None
		}
	}
}

impl NetworkState {
	fn request_will_be_sent(&mut self, mut event: RequestWillBeSent, out: &mut Vec<NetworkEvent>) {
		let mut redirect_chain = Vec::new();
		if let Some(redirect_response) = event.redirect_response.take() {
			match self.requests.get(&event.request_id).cloned() {
				Some(prior) => {
					prior.set_response(redirect_response);
					out.push(NetworkEvent::Response(prior.clone()));
					self.settle(&prior, None, out);
					redirect_chain = prior.redirect_chain().to_vec();
					redirect_chain.push(prior);
				}
				None => {
					tracing::debug!(request_id = %event.request_id, "Redirect of unknown request");
				}
			}
		}

		let request = Request::new(event, redirect_chain);
		let replaced = self
			.requests
			.insert(request.request_id().to_string(), request.clone());
		if replaced.is_none() {
			if let Some(frame_id) = request.frame_id() {
				self.adjust(frame_id, true, out);
			}
		}
		tracing::debug!(
			request_id = request.request_id(),
			method = request.method(),
			url = request.url(),
			"Request will be sent"
		);
		out.push(NetworkEvent::Request(request));
	}

	fn response_received(&mut self, event: ResponseReceived, out: &mut Vec<NetworkEvent>) {
		let Some(request) = self.requests.get(&event.request_id).cloned() else {
			tracing::debug!(request_id = %event.request_id, "Response for unknown request (ignored)");
			return;
		};
		request.set_response(event.response);
		out.push(NetworkEvent::Response(request));
	}

	fn complete(&mut self, request_id: &str, failure: Option<String>, out: &mut Vec<NetworkEvent>) {
		let Some(request) = self.requests.get(request_id).cloned() else {
			tracing::debug!(request_id, "Completion of unknown request (ignored)");
			return;
		};
		self.settle(&request, failure, out);
	}

	/// Makes `request` terminal and releases its in-flight slot.
	fn settle(&mut self, request: &Request, failure: Option<String>, out: &mut Vec<NetworkEvent>) {
		self.requests.remove(request.request_id());
		let failed = failure.is_some();
		request.finish(failure);
		if let Some(frame_id) = request.frame_id() {
			self.adjust(frame_id, false, out);
		}
		out.push(if failed {
			NetworkEvent::RequestFailed(request.clone())
		} else {
			NetworkEvent::RequestFinished(request.clone())
		});
	}

	fn adjust(&mut self, frame_id: &str, increment: bool, out: &mut Vec<NetworkEvent>) {
		let count = self.in_flight.entry(frame_id.to_string()).or_insert(0);
		*count = if increment {
			*count + 1
		} else {
			count.saturating_sub(1)
		};
		let in_flight = *count;
		if in_flight == 0 {
			self.in_flight.remove(frame_id);
		}
		out.push(NetworkEvent::InFlightChanged {
			frame_id: frame_id.to_string(),
			in_flight,
		});
	}
}
