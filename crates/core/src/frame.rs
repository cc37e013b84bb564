//! [`Frame`] node of a page's frame tree.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::execution_context::{ExecutionContext, World};

/// A frame within a page.
///
/// Frames are owned by the [`FrameManager`](crate::FrameManager), which is the
/// only writer; handles are cheap clones observing the live node. A detached
/// frame keeps its last known state and reports [`is_detached`](Self::is_detached).
#[derive(Clone)]
pub struct Frame {
	inner: Arc<RwLock<FrameState>>,
}

pub(crate) struct FrameState {
	pub(crate) id: String,
	pub(crate) parent_id: Option<String>,
	pub(crate) url: String,
	pub(crate) name: String,
	pub(crate) loader_id: String,
	/// Bumped on every cross-document navigation.
	pub(crate) navigation_id: u64,
	/// Lifecycle events seen for `loader_id`.
	pub(crate) lifecycle: HashSet<String>,
	pub(crate) children: Vec<String>,
	pub(crate) worlds: HashMap<World, ExecutionContext>,
	pub(crate) detached: bool,
}

impl Frame {
	pub(crate) fn new(id: &str, parent_id: Option<&str>) -> Self {
		Self {
			inner: Arc::new(RwLock::new(FrameState {
				id: id.to_string(),
				parent_id: parent_id.map(str::to_string),
				url: String::new(),
				name: String::new(),
				loader_id: String::new(),
				navigation_id: 0,
				lifecycle: HashSet::new(),
				children: Vec::new(),
				worlds: HashMap::new(),
				detached: false,
			})),
		}
	}

	pub(crate) fn read(&self) -> RwLockReadGuard<'_, FrameState> {
		self.inner.read()
	}

	pub(crate) fn write(&self) -> RwLockWriteGuard<'_, FrameState> {
		self.inner.write()
	}

	/// Protocol frame id.
	///
	/// The main frame's id can change when the browser swaps it for a new one.
	pub fn id(&self) -> String {
		self.inner.read().id.clone()
	}

	pub fn parent_id(&self) -> Option<String> {
		self.inner.read().parent_id.clone()
	}

	pub fn is_main_frame(&self) -> bool {
		self.inner.read().parent_id.is_none()
	}

	pub fn url(&self) -> String {
		self.inner.read().url.clone()
	}

	pub fn name(&self) -> String {
		self.inner.read().name.clone()
	}

	/// Loader id of the current document.
	pub fn loader_id(&self) -> String {
		self.inner.read().loader_id.clone()
	}

	pub fn navigation_id(&self) -> u64 {
		self.inner.read().navigation_id
	}

	pub fn is_detached(&self) -> bool {
		self.inner.read().detached
	}

	pub fn child_ids(&self) -> Vec<String> {
		self.inner.read().children.clone()
	}

	/// Returns true if `name` fired for the current document.
	pub fn has_lifecycle_event(&self, name: &str) -> bool {
		self.inner.read().lifecycle.contains(name)
	}

	pub fn lifecycle_events(&self) -> Vec<String> {
		let mut events: Vec<String> = self.inner.read().lifecycle.iter().cloned().collect();
		events.sort();
		events
	}

	/// Current live context for `world`, if any.
	pub fn execution_context(&self, world: &World) -> Option<ExecutionContext> {
		self.inner
			.read()
			.worlds
			.get(world)
			.filter(|context| context.is_live())
			.cloned()
	}

	/// Returns true if both handles refer to the same frame node.
	pub fn ptr_eq(&self, other: &Frame) -> bool {
		Arc::ptr_eq(&self.inner, &other.inner)
	}
}

impl fmt::Debug for Frame {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let state = self.inner.read();
		f.debug_struct("Frame")
			.field("id", &state.id)
			.field("parent_id", &state.parent_id)
			.field("url", &state.url)
			.field("navigation_id", &state.navigation_id)
			.field("detached", &state.detached)
			.finish()
	}
}
