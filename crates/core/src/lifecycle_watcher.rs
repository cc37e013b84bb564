//! Navigation completion decisions.
//!
//! A [`LifecycleWatcher`] composes frame lifecycle events, per-frame network
//! activity and a deadline into one outcome. Signals from the frame and
//! network managers are forwarded into a channel and applied in batches, so
//! a termination observed in the same batch as a satisfying event wins.

use std::sync::Arc;
use std::time::Duration;

use cdp_protocol::{DEFAULT_NETWORK_IDLE_MS, WaitUntil, describe_conditions};
use cdp_runtime::{Error, NavigationError, Result, Subscription};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::frame::Frame;
use crate::frame_manager::{FrameEvent, FrameManager};
use crate::network_manager::{NetworkEvent, NetworkManager, Request, Response};

/// Why a watcher stopped before its conditions held.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
	FrameDetached,
	NavigationAborted,
	TargetClosed,
	TargetCrashed,
}

/// Watcher state. Every state but `Pending` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
	Pending,
	Satisfied,
	TimedOut,
	Terminated(TerminationReason),
}

#[derive(Debug)]
enum Signal {
	Navigated(u64),
	NavigatedWithinDocument,
	/// Something that may complete a lifecycle condition changed.
	Recheck,
	InFlight(usize),
	NavigationRequest(Request),
	Terminated(TerminationReason),
}

#[derive(Debug)]
struct IdleTracker {
	threshold: usize,
	quiet_since: Option<Instant>,
}

impl IdleTracker {
	fn update(&mut self, in_flight: usize, now: Instant) {
		self.quiet_since = (in_flight <= self.threshold).then_some(now);
	}

	fn due(&self, window: Duration) -> Option<Instant> {
		self.quiet_since.map(|since| since + window)
	}
}

/// Watches one navigation attempt of one frame.
pub struct LifecycleWatcher {
	frame_manager: Arc<FrameManager>,
	frame: Frame,
	frame_id: String,
	conditions: Vec<WaitUntil>,
	timeout: Option<Duration>,
	deadline: Option<Instant>,
	idle_window: Duration,
	initial_navigation_id: u64,
	/// Navigation id whose lifecycle is being watched, once known.
	committed: Option<u64>,
	in_flight: usize,
	idle: Vec<IdleTracker>,
	navigation_request: Option<Request>,
	termination: Option<TerminationReason>,
	state: WatcherState,
	signals: mpsc::UnboundedReceiver<Signal>,
	subscriptions: Vec<Subscription>,
}

impl LifecycleWatcher {
	/// Watches the next navigation of `frame`.
	///
	/// The first cross-document navigation seen becomes the watched one; a
	/// later one aborts the watch. A same-document navigation also counts as
	/// the commit. Empty `wait_until` means `[load]`.
	pub fn new(
		frame_manager: Arc<FrameManager>,
		network_manager: Arc<NetworkManager>,
		frame: Frame,
		wait_until: Vec<WaitUntil>,
		timeout: Option<Duration>,
	) -> Self {
		Self::build(frame_manager, network_manager, frame, wait_until, timeout, false)
	}

	/// Watches the document `frame` currently shows.
	pub fn for_current_document(
		frame_manager: Arc<FrameManager>,
		network_manager: Arc<NetworkManager>,
		frame: Frame,
		wait_until: Vec<WaitUntil>,
		timeout: Option<Duration>,
	) -> Self {
		Self::build(frame_manager, network_manager, frame, wait_until, timeout, true)
	}

	fn build(
		frame_manager: Arc<FrameManager>,
		network_manager: Arc<NetworkManager>,
		frame: Frame,
		wait_until: Vec<WaitUntil>,
		timeout: Option<Duration>,
		current_document: bool,
	) -> Self {
		let now = Instant::now();
		let conditions = if wait_until.is_empty() {
			vec![WaitUntil::Load]
		} else {
			wait_until
		};
		let frame_id = frame.id();
		let initial_navigation_id = frame.navigation_id();
		let in_flight = network_manager.in_flight(&frame_id);
		let idle = conditions
			.iter()
			.filter_map(WaitUntil::idle_threshold)
			.map(|threshold| IdleTracker {
				threshold,
				quiet_since: None,
			})
			.collect();

		let (tx, signals) = mpsc::unbounded_channel();
		let subscriptions = subscribe(&frame_manager, &network_manager, &frame, tx);

		let termination = if frame.is_detached() {
			Some(TerminationReason::FrameDetached)
		} else if frame_manager.session().is_closed() {
			Some(TerminationReason::TargetClosed)
		} else {
			None
		};

		let mut watcher = Self {
			frame_manager,
			frame,
			frame_id,
			conditions,
			timeout,
			deadline: timeout.map(|timeout| now + timeout),
			idle_window: Duration::from_millis(DEFAULT_NETWORK_IDLE_MS),
			initial_navigation_id,
			committed: None,
			in_flight,
			idle,
			navigation_request: None,
			termination,
			state: WatcherState::Pending,
			signals,
			subscriptions,
		};
		if current_document {
			watcher.commit(initial_navigation_id, now);
		}
		watcher
	}

	/// Sets the quiet period the idle conditions must hold for.
	pub fn idle_window(mut self, window: Duration) -> Self {
		self.idle_window = window;
		self
	}

	pub fn state(&self) -> WatcherState {
		self.state
	}

	pub fn frame(&self) -> &Frame {
		&self.frame
	}

	/// Instant after which the watch times out.
	pub fn deadline(&self) -> Option<Instant> {
		self.deadline
	}

	/// Latest navigation request recorded for the frame.
	pub fn navigation_request(&self) -> Option<&Request> {
		self.navigation_request.as_ref()
	}

	pub fn navigation_response(&self) -> Option<Response> {
		self.navigation_request.as_ref().and_then(Request::response)
	}

	/// Waits until the watch reaches a terminal state.
	///
	/// Calling it again after settlement returns the same outcome.
	pub async fn settle(&mut self) -> Result<()> {
		loop {
			if self.state != WatcherState::Pending {
				return self.outcome();
			}

			while let Ok(signal) = self.signals.try_recv() {
				self.apply(signal);
			}
			let now = Instant::now();
			if let Some(state) = self.evaluate(now) {
				self.state = state;
				self.dispose();
				tracing::debug!(
					frame_id = %self.frame_id,
					conditions = %describe_conditions(&self.conditions),
					state = ?state,
					"Lifecycle watcher settled"
				);
				continue;
			}

			let wake = self.next_wake(now);
			tokio::select! {
				biased;
				signal = self.signals.recv() => match signal {
					Some(signal) => self.apply(signal),
					None => {
						self.termination.get_or_insert(TerminationReason::TargetClosed);
					}
				},
				_ = sleep_until(wake) => {}
			}
		}
	}

	fn apply(&mut self, signal: Signal) {
		let now = Instant::now();
		match signal {
			Signal::Navigated(navigation_id) => match self.committed {
				None if navigation_id > self.initial_navigation_id => self.commit(navigation_id, now),
				Some(committed) if navigation_id != committed => {
					tracing::debug!(
						frame_id = %self.frame_id,
						watched = committed,
						navigation_id,
						"Watched navigation superseded"
					);
					self.termination.get_or_insert(TerminationReason::NavigationAborted);
				}
				_ => {}
			},
			Signal::NavigatedWithinDocument => {
				if self.committed.is_none() {
					self.commit(self.frame.navigation_id(), now);
				}
			}
			Signal::Recheck => {}
			Signal::InFlight(in_flight) => {
				self.in_flight = in_flight;
				if self.committed.is_some() {
					for tracker in &mut self.idle {
						tracker.update(in_flight, now);
					}
				}
			}
			Signal::NavigationRequest(request) => {
				if self.termination.is_none() {
					self.navigation_request = Some(request);
				}
			}
			Signal::Terminated(reason) => {
				self.termination.get_or_insert(reason);
			}
		}
	}

	fn commit(&mut self, navigation_id: u64, now: Instant) {
		self.committed = Some(navigation_id);
		for tracker in &mut self.idle {
			tracker.update(self.in_flight, now);
		}
	}

	fn evaluate(&self, now: Instant) -> Option<WatcherState> {
		if let Some(reason) = self.termination {
			return Some(WatcherState::Terminated(reason));
		}
		// Lifecycle state survives a detach, so never trust it for a dead frame.
		if self.frame.is_detached() {
			return Some(WatcherState::Terminated(TerminationReason::FrameDetached));
		}
		if self.conditions_met(now) {
			return Some(WatcherState::Satisfied);
		}
		if self.deadline.is_some_and(|deadline| now >= deadline) {
			return Some(WatcherState::TimedOut);
		}
		None
	}

	fn conditions_met(&self, now: Instant) -> bool {
		let Some(committed) = self.committed else {
			return false;
		};
		if self.frame.navigation_id() != committed {
			return false;
		}
		let idle = self
			.idle
			.iter()
			.all(|tracker| tracker.due(self.idle_window).is_some_and(|due| now >= due));
		idle && self
			.conditions
			.iter()
			.filter_map(WaitUntil::lifecycle_event)
			.all(|event| self.frame_manager.lifecycle_complete(&self.frame, event))
	}

	/// Earliest future instant at which the outcome can change without a signal.
	fn next_wake(&self, now: Instant) -> Option<Instant> {
		self.idle
			.iter()
			.filter_map(|tracker| tracker.due(self.idle_window))
			.filter(|due| *due > now)
			.chain(self.deadline)
			.min()
	}

	fn outcome(&self) -> Result<()> {
		let frame_id = self.frame_id.clone();
		match self.state {
			WatcherState::Pending | WatcherState::Satisfied => Ok(()),
			WatcherState::TimedOut => {
				let operation = format!(
					"waiting for {} on frame {}",
					describe_conditions(&self.conditions),
					frame_id
				);
				Err(Error::timeout(operation, self.timeout.unwrap_or_default()))
			}
			WatcherState::Terminated(reason) => Err(match reason {
				TerminationReason::FrameDetached => NavigationError::FrameDetached { frame_id },
				TerminationReason::NavigationAborted => NavigationError::Aborted { frame_id },
				TerminationReason::TargetClosed => NavigationError::TargetClosed,
				TerminationReason::TargetCrashed => NavigationError::TargetCrashed,
			}
			.into()),
		}
	}

	fn dispose(&mut self) {
		self.subscriptions.clear();
		self.signals.close();
	}
}

impl std::fmt::Debug for LifecycleWatcher {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("LifecycleWatcher")
			.field("frame_id", &self.frame_id)
			.field("conditions", &self.conditions)
			.field("committed", &self.committed)
			.field("in_flight", &self.in_flight)
			.field("state", &self.state)
			.finish()
	}
}

fn subscribe(
	frame_manager: &FrameManager,
	network_manager: &NetworkManager,
	frame: &Frame,
	tx: mpsc::UnboundedSender<Signal>,
) -> Vec<Subscription> {
	let on_frame = {
		let frame = frame.clone();
		let tx = tx.clone();
		frame_manager.on(move |event| {
			let signal = match event {
				FrameEvent::Navigated {
					frame: navigated,
					navigation_id,
				} if navigated.ptr_eq(&frame) => Signal::Navigated(*navigation_id),
				FrameEvent::NavigatedWithinDocument(navigated) if navigated.ptr_eq(&frame) => {
					Signal::NavigatedWithinDocument
				}
				FrameEvent::Detached(detached) if detached.ptr_eq(&frame) => {
					Signal::Terminated(TerminationReason::FrameDetached)
				}
				FrameEvent::TargetCrashed => Signal::Terminated(TerminationReason::TargetCrashed),
				FrameEvent::Lifecycle { .. } | FrameEvent::Detached(_) => Signal::Recheck,
				_ => return,
			};
			let _ = tx.send(signal);
		})
	};

	let on_network = {
		let frame = frame.clone();
		let tx = tx.clone();
		network_manager.on(move |event| {
			let signal = match event {
				NetworkEvent::InFlightChanged { frame_id, in_flight } if *frame_id == frame.id() => {
					Signal::InFlight(*in_flight)
				}
				NetworkEvent::Request(request)
					if request.is_navigation_request()
						&& request.frame_id().is_some_and(|id| id == frame.id()) =>
				{
					Signal::NavigationRequest(request.clone())
				}
				_ => return,
			};
			let _ = tx.send(signal);
		})
	};

	let on_disconnect = frame_manager.session().on_disconnected(move |_| {
		let _ = tx.send(Signal::Terminated(TerminationReason::TargetClosed));
	});

	vec![on_frame, on_network, on_disconnect]
}

async fn sleep_until(deadline: Option<Instant>) {
	match deadline {
		Some(deadline) => tokio::time::sleep_until(deadline).await,
		None => std::future::pending().await,
	}
}

#[cfg(test)]
mod tests {
	use serde_json::{Value, json};

	use super::*;
	use crate::test_support::TestTarget;

	struct Fixture {
		target: TestTarget,
		frames: Arc<FrameManager>,
		network: Arc<NetworkManager>,
	}

	impl Fixture {
		fn new() -> Self {
			let target = TestTarget::new();
			let frames = FrameManager::new(target.session());
			let network = NetworkManager::new(target.session());
			frames.handle_frame_tree(&target.frame_tree(json!({
				"frame": {"id": "F1", "loaderId": "L0", "url": "https://example.test/"},
				"childFrames": [{
					"frame": {"id": "A", "parentId": "F1", "loaderId": "LA", "url": "https://a.test/"}
				}]
			})));
			Self {
				target,
				frames,
				network,
			}
		}

		fn main(&self) -> Frame {
			self.frames.main_frame().unwrap()
		}

		fn watch(&self, frame: Frame, wait_until: Vec<WaitUntil>, timeout: Duration) -> LifecycleWatcher {
			LifecycleWatcher::new(
				Arc::clone(&self.frames),
				Arc::clone(&self.network),
				frame,
				wait_until,
				Some(timeout),
			)
		}

		fn request(&self, request_id: &str, loader_id: &str, resource_type: &str) {
			self.target.event(
				"Network.requestWillBeSent",
				json!({
					"requestId": request_id,
					"loaderId": loader_id,
					"request": {"url": "https://example.test/next", "method": "GET"},
					"type": resource_type,
					"frameId": "F1"
				}),
			);
		}

		fn finish(&self, request_id: &str) {
			self.target
				.event("Network.loadingFinished", json!({ "requestId": request_id }));
		}

		fn respond(&self, request_id: &str, status: u16) {
			let response: Value = json!({
				"requestId": request_id,
				"response": {"url": "https://example.test/next", "status": status, "headers": {}}
			});
			self.target.event("Network.responseReceived", response);
		}

		fn listeners(&self) -> (usize, usize, usize) {
			(
				self.frames.listener_count(),
				self.network.listener_count(),
				self.target.session().listener_count(),
			)
		}
	}

	#[tokio::test(start_paused = true)]
	async fn load_and_networkidle0_wait_for_quiet_window() {
		let fixture = Fixture::new();
		let mut watcher = fixture.watch(
			fixture.main(),
			vec![WaitUntil::Load, WaitUntil::NetworkIdle0],
			Duration::from_secs(30),
		);
		let started = Instant::now();

		let settling = tokio::spawn(async move {
			let result = watcher.settle().await;
			(result, Instant::now(), watcher)
		});

		fixture.target.lifecycle("F1", "L1", "init");
		fixture.request("L1", "L1", "Document");
		fixture.target.frame_navigated("F1", None, "L1", "https://example.test/next");
		fixture.respond("L1", 200);
		fixture.finish("L1");
		fixture.request("R2", "L1", "Script");
		fixture.target.lifecycle("F1", "L1", "load");
		fixture.target.lifecycle("A", "LA", "load");

		tokio::task::yield_now().await;
		tokio::time::advance(Duration::from_millis(200)).await;
		fixture.finish("R2");

		let (result, settled_at, watcher) = settling.await.unwrap();
		result.unwrap();
		assert_eq!(watcher.state(), WatcherState::Satisfied);
		assert!(settled_at - started >= Duration::from_millis(700));
		assert_eq!(watcher.navigation_response().unwrap().status(), 200);
	}

	#[tokio::test(start_paused = true)]
	async fn stale_load_never_satisfies() {
		let fixture = Fixture::new();
		let mut watcher = fixture.watch(fixture.main(), vec![WaitUntil::Load], Duration::from_millis(100));

		fixture.target.frame_navigated("F1", None, "L1", "https://example.test/next");
		fixture.target.lifecycle("F1", "L0", "load");

		let err = watcher.settle().await.unwrap_err();
		assert!(err.is_timeout());
		assert!(err.to_string().contains("waiting for [load] on frame F1"));
		assert_eq!(watcher.state(), WatcherState::TimedOut);
	}

	#[tokio::test]
	async fn short_timeout_leaves_no_listeners() {
		let fixture = Fixture::new();
		let before = fixture.listeners();
		let mut watcher = fixture.watch(fixture.main(), vec![WaitUntil::Load], Duration::from_millis(1));
		assert_ne!(fixture.listeners(), before);

		let err = watcher.settle().await.unwrap_err();

		assert!(err.is_timeout());
		assert_eq!(watcher.state(), WatcherState::TimedOut);
		assert_eq!(fixture.listeners(), before);
	}

	#[tokio::test]
	async fn detach_preempts_satisfying_event() {
		let fixture = Fixture::new();
		let child = fixture.frames.frame("A").unwrap();
		let mut watcher = fixture.watch(child, vec![WaitUntil::Load], Duration::from_secs(5));

		fixture.target.frame_navigated("A", Some("F1"), "LA2", "https://a.test/next");
		fixture.target.lifecycle("A", "LA2", "load");
		fixture.target.frame_detached("A");

		match watcher.settle().await.unwrap_err() {
			Error::Navigation(NavigationError::FrameDetached { frame_id }) => assert_eq!(frame_id, "A"),
			other => panic!("unexpected error: {other:?}"),
		}
		assert_eq!(
			watcher.state(),
			WatcherState::Terminated(TerminationReason::FrameDetached)
		);
	}

	#[tokio::test]
	async fn ancestor_detach_terminates() {
		let fixture = Fixture::new();
		fixture.target.frame_attached("A1", "A");
		let grandchild = fixture.frames.frame("A1").unwrap();
		let mut watcher = fixture.watch(grandchild, vec![WaitUntil::Load], Duration::from_secs(5));

		fixture.target.frame_detached("A");

		match watcher.settle().await.unwrap_err() {
			Error::Navigation(NavigationError::FrameDetached { frame_id }) => assert_eq!(frame_id, "A1"),
			other => panic!("unexpected error: {other:?}"),
		}
		assert!(fixture.frames.frame("A1").is_none());
	}

	#[tokio::test]
	async fn loaded_document_detached_before_settling_terminates() {
		let fixture = Fixture::new();
		fixture.target.lifecycle("A", "LA", "load");
		let child = fixture.frames.frame("A").unwrap();
		let mut watcher = LifecycleWatcher::for_current_document(
			Arc::clone(&fixture.frames),
			Arc::clone(&fixture.network),
			child,
			vec![WaitUntil::Load],
			Some(Duration::from_secs(5)),
		);

		fixture.target.frame_detached("A");

		let err = watcher.settle().await.unwrap_err();
		assert!(matches!(
			err,
			Error::Navigation(NavigationError::FrameDetached { ref frame_id }) if frame_id == "A"
		));
		assert_eq!(
			watcher.state(),
			WatcherState::Terminated(TerminationReason::FrameDetached)
		);
	}

	#[tokio::test]
	async fn newer_navigation_aborts() {
		let fixture = Fixture::new();
		let mut watcher = fixture.watch(fixture.main(), vec![WaitUntil::Load], Duration::from_secs(5));

		fixture.target.frame_navigated("F1", None, "L1", "https://example.test/one");
		fixture.target.frame_navigated("F1", None, "L2", "https://example.test/two");

		let err = watcher.settle().await.unwrap_err();
		assert!(matches!(
			err,
			Error::Navigation(NavigationError::Aborted { ref frame_id }) if frame_id == "F1"
		));
	}

	#[tokio::test]
	async fn same_document_navigation_commits_without_aborting() {
		let fixture = Fixture::new();
		fixture.target.lifecycle("F1", "L0", "load");
		fixture.target.lifecycle("A", "LA", "load");
		let mut watcher = fixture.watch(fixture.main(), vec![WaitUntil::Load], Duration::from_secs(5));

		for url in ["https://example.test/#a", "https://example.test/#b"] {
			fixture.target.event(
				"Page.navigatedWithinDocument",
				json!({"frameId": "F1", "url": url}),
			);
		}

		watcher.settle().await.unwrap();
		assert_eq!(watcher.state(), WatcherState::Satisfied);
	}

	#[tokio::test]
	async fn current_document_already_loaded() {
		let fixture = Fixture::new();
		fixture.target.lifecycle("F1", "L0", "DOMContentLoaded");
		fixture.target.lifecycle("A", "LA", "DOMContentLoaded");

		let mut watcher = LifecycleWatcher::for_current_document(
			Arc::clone(&fixture.frames),
			Arc::clone(&fixture.network),
			fixture.main(),
			vec![WaitUntil::DomContentLoaded],
			None,
		);

		watcher.settle().await.unwrap();
		watcher.settle().await.unwrap();
		assert_eq!(fixture.frames.listener_count(), 0);
	}

	#[tokio::test(start_paused = true)]
	async fn networkidle2_tolerates_two_requests() {
		let fixture = Fixture::new();
		fixture.request("R1", "L0", "Script");
		fixture.request("R2", "L0", "Script");

		let mut watcher = LifecycleWatcher::for_current_document(
			Arc::clone(&fixture.frames),
			Arc::clone(&fixture.network),
			fixture.main(),
			vec![WaitUntil::NetworkIdle2],
			Some(Duration::from_secs(5)),
		)
		.idle_window(Duration::from_millis(50));
		let started = Instant::now();

		watcher.settle().await.unwrap();
		assert!(Instant::now() - started >= Duration::from_millis(50));
	}

	#[tokio::test]
	async fn crash_terminates() {
		let fixture = Fixture::new();
		let mut watcher = fixture.watch(fixture.main(), vec![WaitUntil::Load], Duration::from_secs(5));

		fixture.target.event("Inspector.targetCrashed", json!({}));

		let err = watcher.settle().await.unwrap_err();
		assert!(matches!(err, Error::Navigation(NavigationError::TargetCrashed)));
		assert!(err.is_target_closed());
	}

	#[tokio::test]
	async fn session_detach_terminates() {
		let fixture = Fixture::new();
		let mut watcher = fixture.watch(fixture.main(), vec![WaitUntil::Load], Duration::from_secs(5));

		fixture.target.detach();

		let err = watcher.settle().await.unwrap_err();
		assert!(matches!(err, Error::Navigation(NavigationError::TargetClosed)));
	}

	#[tokio::test]
	async fn detached_frame_terminates_immediately() {
		let fixture = Fixture::new();
		let child = fixture.frames.frame("A").unwrap();
		fixture.target.frame_detached("A");

		let mut watcher = fixture.watch(child, vec![WaitUntil::Load], Duration::from_secs(5));

		assert!(watcher.settle().await.unwrap_err().is_navigation());
	}

	#[tokio::test]
	async fn dropping_unsettled_watcher_unsubscribes() {
		let fixture = Fixture::new();
		let before = fixture.listeners();

		let watcher = fixture.watch(fixture.main(), vec![WaitUntil::Load], Duration::from_secs(5));
		drop(watcher);

		assert_eq!(fixture.listeners(), before);
	}
}
