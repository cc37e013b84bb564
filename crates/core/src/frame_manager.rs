//! Frame tree and per-frame execution-context lifecycle.
//!
//! The [`FrameManager`] is the only writer of frame state. It consumes the
//! session's `Page.*` and `Runtime.*` events, mutates the tree under a short
//! lock, and emits the resulting [`FrameEvent`]s after the lock is released.

#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use cdp_protocol::Event;
use cdp_protocol::events::{
	ExecutionContextCreated, ExecutionContextDescription, ExecutionContextDestroyed, FrameAttached,
	FrameDetached, FrameNavigated, FramePayload, FrameStoppedLoading, FrameTree, GetFrameTreeResult,
	LifecycleEvent, NavigatedWithinDocument,
};
use cdp_runtime::{
	DisconnectReason, EventEmitter, EventWaiter, NavigationError, Result, Session, Subscription,
};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::execution_context::{ContextState, ExecutionContext, UTILITY_WORLD_NAME, World};
use crate::frame::Frame;

/// Frame tree notifications.
#[derive(Debug, Clone)]
pub enum FrameEvent {
	Attached(Frame),
	/// Cross-document navigation committed; `navigation_id` is the frame's new id.
	Navigated { frame: Frame, navigation_id: u64 },
	NavigatedWithinDocument(Frame),
	/// Emitted once per node, children before parents.
	Detached(Frame),
	/// A lifecycle event was recorded for the frame's current document.
	Lifecycle {
		frame: Frame,
		name: String,
		navigation_id: u64,
	},
	ContextCreated(ExecutionContext),
	ContextDestroyed(ExecutionContext),
	TargetCrashed,
}

#[derive(Default)]
struct TreeState {
	frames: HashMap<String, Frame>,
	main_frame: Option<Frame>,
	contexts: HashMap<i64, ExecutionContext>,
	/// Contexts reported before their frame was attached.
	pending_contexts: HashMap<String, Vec<ExecutionContext>>,
}

/// Maintains the live frame tree of one page session.
pub struct FrameManager {
	session: Arc<Session>,
	tree: Mutex<TreeState>,
	events: EventEmitter<FrameEvent>,
	subscriptions: Mutex<Vec<Subscription>>,
}

impl FrameManager {
	/// Creates a manager listening to `session`. Call [`initialize`](Self::initialize)
	/// to enable the domains and seed the tree.
	pub fn new(session: Arc<Session>) -> Arc<Self> {
		let manager = Arc::new(Self {
			session: Arc::clone(&session),
			tree: Mutex::new(TreeState::default()),
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

	/// Enables the page and runtime domains, seeds the tree from
	/// `Page.getFrameTree` and creates the utility world in every frame.
	pub async fn initialize(&self) -> Result<()> {
		self.session.send_no_result("Page.enable", json!({})).await?;
		let result: GetFrameTreeResult = self.session.send("Page.getFrameTree", json!({})).await?;
		self.handle_frame_tree(&result.frame_tree);

		self.session
			.send_no_result("Page.setLifecycleEventsEnabled", json!({ "enabled": true }))
			.await?;
		self.session.send_no_result("Runtime.enable", json!({})).await?;
		self.session
			.send_no_result(
				"Page.addScriptToEvaluateOnNewDocument",
				json!({ "source": "", "worldName": UTILITY_WORLD_NAME }),
			)
			.await?;

		for frame in self.frames() {
			let frame_id = frame.id();
			let created = self
				.session
				.send_no_result(
					"Page.createIsolatedWorld",
					json!({ "frameId": frame_id, "worldName": UTILITY_WORLD_NAME, "grantUniveralAccess": true }),
				)
				.await;
			if let Err(e) = created {
				tracing::debug!(frame_id, error = %e, "Failed to create utility world");
			}
		}
		Ok(())
	}

	pub fn session(&self) -> &Arc<Session> {
		&self.session
	}

	pub fn main_frame(&self) -> Option<Frame> {
		self.tree.lock().main_frame.clone()
	}

	pub fn frame(&self, frame_id: &str) -> Option<Frame> {
		self.tree.lock().frames.get(frame_id).cloned()
	}

	/// Every attached frame, main frame first, in tree order.
	pub fn frames(&self) -> Vec<Frame> {
		let tree = self.tree.lock();
		let mut frames = Vec::with_capacity(tree.frames.len());
		if let Some(main) = &tree.main_frame {
			tree.collect(main, &mut frames);
		}
		frames
	}

	pub fn child_frames(&self, frame: &Frame) -> Vec<Frame> {
		let tree = self.tree.lock();
		frame
			.child_ids()
			.iter()
			.filter_map(|id| tree.frames.get(id).cloned())
			.collect()
	}

	/// Looks up a context by protocol id.
	pub fn execution_context_by_id(&self, context_id: i64) -> Option<ExecutionContext> {
		self.tree.lock().contexts.get(&context_id).cloned()
	}

	/// Returns true if `event` fired for the current document of `frame` and
	/// of every descendant.
	pub fn lifecycle_complete(&self, frame: &Frame, event: &str) -> bool {
		self.tree.lock().lifecycle_complete(frame, event)
	}

	/// Waits until `frame` has a live context in `world`.
	pub async fn wait_for_execution_context(
		&self,
		frame: &Frame,
		world: World,
		timeout: Option<Duration>,
	) -> Result<ExecutionContext> {
		let frame_id = frame.id();
		let waiter = {
			let frame_id = frame_id.clone();
			let world = world.clone();
			self.events.waiter(move |event| match event {
				FrameEvent::ContextCreated(context) => {
					context.frame_id() == Some(frame_id.as_str()) && context.world() == &world
				}
				FrameEvent::Detached(detached) => detached.id() == frame_id,
				_ => false,
			})
		};

		if let Some(context) = frame.execution_context(&world) {
			return Ok(context);
		}
		if frame.is_detached() {
			return Err(NavigationError::FrameDetached { frame_id }.into());
		}
		if self.session.is_closed() {
			return Err(NavigationError::TargetClosed.into());
		}

		let operation = format!("waiting for {world} execution context of frame {frame_id}");
		match waiter.wait(timeout, &operation).await? {
			FrameEvent::ContextCreated(context) => Ok(context),
			_ => Err(NavigationError::FrameDetached { frame_id }.into()),
		}
	}

	/// Subscribes to frame tree notifications.
	pub fn on<F>(&self, handler: F) -> Subscription
	where
		F: Fn(&FrameEvent) + Send + Sync + 'static,
	{
		self.events.on(handler)
	}

	pub fn waiter<F>(&self, predicate: F) -> EventWaiter<FrameEvent>
	where
		F: Fn(&FrameEvent) -> bool + Send + Sync + 'static,
	{
		self.events.waiter(predicate)
	}

	/// Number of frame-event listeners (for leak checks).
	pub fn listener_count(&self) -> usize {
		self.events.listener_count()
	}

	pub(crate) fn handle_frame_tree(&self, frame_tree: &FrameTree) {
		let mut emitted = Vec::new();
		self.tree.lock().apply_frame_tree(frame_tree, &mut emitted);
		self.emit_all(emitted);
	}

	fn handle_event(&self, event: &Event) {
		let mut emitted = Vec::new();
		{
			let mut tree = self.tree.lock();
			let out = &mut emitted;
			match event.method.as_str() {
				"Page.frameAttached" => {
					if let Some(attached) = parse::<FrameAttached>(event) {
						tree.attach(&attached.frame_id, &attached.parent_frame_id, out);
					}
				}
				"Page.frameNavigated" => {
					if let Some(navigated) = parse::<FrameNavigated>(event) {
						tree.navigated(&navigated.frame, out);
					}
				}
				"Page.navigatedWithinDocument" => {
					if let Some(navigated) = parse::<NavigatedWithinDocument>(event) {
						tree.navigated_within_document(&navigated.frame_id, &navigated.url, out);
					}
				}
				"Page.frameDetached" => {
					if let Some(detached) = parse::<FrameDetached>(event) {
						if detached.reason.as_deref() == Some("swap") {
							tracing::debug!(frame_id = %detached.frame_id, "Frame swapped to another process");
						} else {
							tree.detach(&detached.frame_id, out);
						}
					}
				}
				"Page.lifecycleEvent" => {
					if let Some(lifecycle) = parse::<LifecycleEvent>(event) {
						tree.lifecycle(&lifecycle, out);
					}
				}
				"Page.frameStoppedLoading" => {
					if let Some(stopped) = parse::<FrameStoppedLoading>(event) {
						tree.stopped_loading(&stopped.frame_id, out);
					}
				}
				"Runtime.executionContextCreated" => {
					if let Some(created) = parse::<ExecutionContextCreated>(event) {
						tree.context_created(&self.session, created.context, out);
					}
				}
				"Runtime.executionContextDestroyed" => {
					if let Some(destroyed) = parse::<ExecutionContextDestroyed>(event) {
						tree.context_destroyed(destroyed.execution_context_id, out);
					}
				}
				"Runtime.executionContextsCleared" => tree.invalidate_all(out),
				"Inspector.targetCrashed" => {
					tracing::warn!(session_id = self.session.id(), "Target crashed");
					out.push(FrameEvent::TargetCrashed);
				}
				_ => {}
			}
		}
		self.emit_all(emitted);
	}

	fn handle_disconnect(&self, reason: &DisconnectReason) {
		tracing::debug!(session_id = self.session.id(), ?reason, "Invalidating contexts of closed session");
		let mut emitted = Vec::new();
		self.tree.lock().invalidate_all(&mut emitted);
		self.emit_all(emitted);
	}

	fn emit_all(&self, events: Vec<FrameEvent>) {
		for event in &events {
			self.events.emit(event);
		}
	}
}

impl std::fmt::Debug for FrameManager {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("FrameManager")
			.field("session", &self.session.id())
			.field("frames", &self.tree.lock().frames.len())
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

impl TreeState {
	fn collect(&self, frame: &Frame, out: &mut Vec<Frame>) {
		out.push(frame.clone());
		for child_id in frame.child_ids() {
			if let Some(child) = self.frames.get(&child_id) {
				self.collect(child, out);
			}
		}
	}

	fn lifecycle_complete(&self, frame: &Frame, event: &str) -> bool {
		frame.has_lifecycle_event(event)
			&& frame.child_ids().iter().all(|child_id| match self.frames.get(child_id) {
				Some(child) => self.lifecycle_complete(child, event),
				None => true,
			})
	}

	fn apply_frame_tree(&mut self, node: &FrameTree, out: &mut Vec<FrameEvent>) {
		if let Some(parent_id) = &node.frame.parent_id {
			self.attach(&node.frame.id, parent_id, out);
		}
		self.navigated(&node.frame, out);
		for child in &node.child_frames {
			self.apply_frame_tree(child, out);
		}
	}

	fn attach(&mut self, frame_id: &str, parent_id: &str, out: &mut Vec<FrameEvent>) -> Option<Frame> {
		if let Some(existing) = self.frames.get(frame_id) {
			return Some(existing.clone());
		}
		let Some(parent) = self.frames.get(parent_id).cloned() else {
			tracing::debug!(frame_id, parent_id, "Attach under unknown parent (ignored)");
			return None;
		};

		let frame = Frame::new(frame_id, Some(parent_id));
		parent.write().children.push(frame_id.to_string());
		self.frames.insert(frame_id.to_string(), frame.clone());
		tracing::debug!(frame_id, parent_id, "Frame attached");
		out.push(FrameEvent::Attached(frame.clone()));
		self.adopt_pending_contexts(&frame, out);
		Some(frame)
	}

	fn ensure_main_frame(&mut self, frame_id: &str, out: &mut Vec<FrameEvent>) -> Frame {
		match self.main_frame.clone() {
			Some(main) if main.id() == frame_id => main,
			Some(main) => {
				let old_id = main.id();
				for child_id in main.child_ids() {
					self.detach(&child_id, out);
				}
				self.frames.remove(&old_id);
				main.write().id = frame_id.to_string();
				self.frames.insert(frame_id.to_string(), main.clone());
				tracing::debug!(old_id, new_id = frame_id, "Main frame replaced");
				self.adopt_pending_contexts(&main, out);
				main
			}
			None => {
				let frame = Frame::new(frame_id, None);
				self.frames.insert(frame_id.to_string(), frame.clone());
				self.main_frame = Some(frame.clone());
				out.push(FrameEvent::Attached(frame.clone()));
				self.adopt_pending_contexts(&frame, out);
				frame
			}
		}
	}

	fn navigated(&mut self, payload: &FramePayload, out: &mut Vec<FrameEvent>) {
		let frame = match &payload.parent_id {
			None => self.ensure_main_frame(&payload.id, out),
			Some(parent_id) => match self.attach(&payload.id, parent_id, out) {
				Some(frame) => frame,
				None => return,
			},
		};

		// A new document starts without children.
		for child_id in frame.child_ids() {
			self.detach(&child_id, out);
		}

		let (navigation_id, contexts) = {
			let mut state = frame.write();
			state.url = payload.full_url();
			state.name = payload.name.clone().unwrap_or_default();
			if state.loader_id != payload.loader_id {
				state.loader_id = payload.loader_id.clone();
				state.lifecycle.clear();
			}
			state.navigation_id += 1;
			let contexts: Vec<ExecutionContext> = state.worlds.drain().map(|(_, context)| context).collect();
			(state.navigation_id, contexts)
		};

		for context in contexts {
			self.release_context(context, ContextState::Destroyed, out);
		}

		tracing::debug!(frame_id = %payload.id, url = %payload.url, navigation_id, "Frame navigated");
		out.push(FrameEvent::Navigated { frame, navigation_id });
	}

	fn navigated_within_document(&mut self, frame_id: &str, url: &str, out: &mut Vec<FrameEvent>) {
		let Some(frame) = self.frames.get(frame_id).cloned() else {
			return;
		};
		frame.write().url = url.to_string();
		out.push(FrameEvent::NavigatedWithinDocument(frame));
	}

	/// Removes `frame_id` and its subtree, children first.
	fn detach(&mut self, frame_id: &str, out: &mut Vec<FrameEvent>) {
		let Some(frame) = self.frames.get(frame_id).cloned() else {
			return;
		};
		for child_id in frame.child_ids() {
			self.detach(&child_id, out);
		}

		let (parent_id, contexts) = {
			let mut state = frame.write();
			state.detached = true;
			state.children.clear();
			let contexts: Vec<ExecutionContext> = state.worlds.drain().map(|(_, context)| context).collect();
			(state.parent_id.clone(), contexts)
		};
		for context in contexts {
			self.release_context(context, ContextState::FrameDetached, out);
		}
		for context in self.pending_contexts.remove(frame_id).unwrap_or_default() {
			self.release_context(context, ContextState::FrameDetached, out);
		}

		if let Some(parent) = parent_id.as_deref().and_then(|id| self.frames.get(id)) {
			parent.write().children.retain(|child| child != frame_id);
		}
		self.frames.remove(frame_id);
		if self.main_frame.as_ref().is_some_and(|main| main.ptr_eq(&frame)) {
			self.main_frame = None;
		}

		tracing::debug!(frame_id, "Frame detached");
		out.push(FrameEvent::Detached(frame));
	}

	fn lifecycle(&mut self, event: &LifecycleEvent, out: &mut Vec<FrameEvent>) {
		let Some(frame) = self.frames.get(&event.frame_id).cloned() else {
			return;
		};
		let navigation_id = {
			let mut state = frame.write();
			if event.name == "init" {
				state.loader_id = event.loader_id.clone();
				state.lifecycle.clear();
				return;
			}
			if state.loader_id != event.loader_id {
				tracing::debug!(
					frame_id = %event.frame_id,
					name = %event.name,
					loader_id = %event.loader_id,
					"Stale lifecycle event (ignored)"
				);
				return;
			}
			if !state.lifecycle.insert(event.name.clone()) {
				return;
			}
			state.navigation_id
		};
		out.push(FrameEvent::Lifecycle {
			frame,
			name: event.name.clone(),
			navigation_id,
		});
	}

	fn stopped_loading(&mut self, frame_id: &str, out: &mut Vec<FrameEvent>) {
		let Some(frame) = self.frames.get(frame_id).cloned() else {
			return;
		};
		for name in ["DOMContentLoaded", "load"] {
			let inserted = {
				let mut state = frame.write();
				state.lifecycle.insert(name.to_string()).then_some(state.navigation_id)
			};
			if let Some(navigation_id) = inserted {
				out.push(FrameEvent::Lifecycle {
					frame: frame.clone(),
					name: name.to_string(),
					navigation_id,
				});
			}
		}
	}

	fn context_created(
		&mut self,
		session: &Arc<Session>,
		description: ExecutionContextDescription,
		out: &mut Vec<FrameEvent>,
	) {
		let context = ExecutionContext::new(Arc::clone(session), description);
		self.contexts.insert(context.id(), context.clone());

		let frame = context.frame_id().and_then(|id| self.frames.get(id)).cloned();
		match (frame, context.frame_id()) {
			(Some(frame), _) => self.bind_context(&frame, context.clone(), out),
			(None, Some(frame_id)) => {
				tracing::debug!(context_id = context.id(), frame_id, "Context for unknown frame held");
				self.pending_contexts
					.entry(frame_id.to_string())
					.or_default()
					.push(context.clone());
			}
			(None, None) => {}
		}
		out.push(FrameEvent::ContextCreated(context));
	}

	fn bind_context(&mut self, frame: &Frame, context: ExecutionContext, out: &mut Vec<FrameEvent>) {
		let previous = frame.write().worlds.insert(context.world().clone(), context.clone());
		if let Some(previous) = previous.filter(|previous| !previous.ptr_eq(&context)) {
			self.release_context(previous, ContextState::Destroyed, out);
		}
	}

	fn adopt_pending_contexts(&mut self, frame: &Frame, out: &mut Vec<FrameEvent>) {
		let Some(pending) = self.pending_contexts.remove(&frame.id()) else {
			return;
		};
		for context in pending.into_iter().filter(ExecutionContext::is_live) {
			self.bind_context(frame, context, out);
		}
	}

	fn context_destroyed(&mut self, context_id: i64, out: &mut Vec<FrameEvent>) {
		let Some(context) = self.contexts.get(&context_id).cloned() else {
			return;
		};
		if let Some(frame) = context.frame_id().and_then(|id| self.frames.get(id)) {
			frame
				.write()
				.worlds
				.retain(|_, bound| !bound.ptr_eq(&context));
		}
		if let Some(frame_id) = context.frame_id() {
			if let Some(pending) = self.pending_contexts.get_mut(frame_id) {
				pending.retain(|held| !held.ptr_eq(&context));
			}
		}
		self.release_context(context, ContextState::Destroyed, out);
	}

	/// Invalidates every context without touching the frames.
	fn invalidate_all(&mut self, out: &mut Vec<FrameEvent>) {
		for frame in self.frames.values() {
			frame.write().worlds.clear();
		}
		self.pending_contexts.clear();
		let contexts: Vec<ExecutionContext> = self.contexts.drain().map(|(_, context)| context).collect();
		for context in contexts {
			if context.invalidate(ContextState::Destroyed) {
				out.push(FrameEvent::ContextDestroyed(context));
			}
		}
	}

	fn release_context(&mut self, context: ExecutionContext, state: ContextState, out: &mut Vec<FrameEvent>) {
		self.contexts.remove(&context.id());
		if context.invalidate(state) {
			out.push(FrameEvent::ContextDestroyed(context));
		}
	}
}
