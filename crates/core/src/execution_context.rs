//! JavaScript execution contexts ("worlds") of a frame.

use std::fmt;
use std::sync::Arc;

use cdp_protocol::events::{EvaluateResult, ExecutionContextDescription, RemoteObject};
use cdp_runtime::{Error, NavigationError, Result, Session};
use serde_json::{Value, json};
use tokio::sync::watch;

/// Name of the isolated world created in every frame for internal scripts.
pub const UTILITY_WORLD_NAME: &str = "__cdp_utility_world__";

/// World a context belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum World {
	/// The page's own JavaScript world.
	Main,
	/// A named isolated world.
	Isolated(String),
}

impl World {
	/// The isolated world used for internal scripts.
	pub fn utility() -> Self {
		World::Isolated(UTILITY_WORLD_NAME.to_string())
	}
}

impl fmt::Display for World {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			World::Main => write!(f, "main"),
			World::Isolated(name) => write!(f, "isolated({name})"),
		}
	}
}

/// Validity of an [`ExecutionContext`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
	Live,
	/// Destroyed by navigation, `Runtime.executionContextDestroyed` or a clear.
	Destroyed,
	/// The owning frame was detached.
	FrameDetached,
}

/// A JavaScript execution context bound to a session.
///
/// Contexts are invalidated, never deleted: a handle obtained before a
/// navigation keeps reporting [`ContextState::Destroyed`] and every evaluation
/// on it fails with [`Error::ExecutionContextDestroyed`]. Contexts of a
/// detached frame fail with [`NavigationError::FrameDetached`] instead.
#[derive(Clone)]
pub struct ExecutionContext {
	inner: Arc<ContextInner>,
}

struct ContextInner {
	id: i64,
	unique_id: Option<String>,
	frame_id: Option<String>,
	world: World,
	origin: String,
	session: Arc<Session>,
	state: watch::Sender<ContextState>,
}

impl ExecutionContext {
	pub(crate) fn new(session: Arc<Session>, description: ExecutionContextDescription) -> Self {
		let aux = description.aux_data.unwrap_or_default();
		let world = if aux.is_default {
			World::Main
		} else {
			World::Isolated(description.name)
		};
		let (state, _) = watch::channel(ContextState::Live);

		Self {
			inner: Arc::new(ContextInner {
				id: description.id,
				unique_id: description.unique_id,
				frame_id: aux.frame_id,
				world,
				origin: description.origin,
				session,
				state,
			}),
		}
	}

	/// Protocol execution context id.
	pub fn id(&self) -> i64 {
		self.inner.id
	}

	pub fn unique_id(&self) -> Option<&str> {
		self.inner.unique_id.as_deref()
	}

	/// Owning frame, if the context belongs to one.
	pub fn frame_id(&self) -> Option<&str> {
		self.inner.frame_id.as_deref()
	}

	pub fn world(&self) -> &World {
		&self.inner.world
	}

	pub fn origin(&self) -> &str {
		&self.inner.origin
	}

	pub fn state(&self) -> ContextState {
		*self.inner.state.borrow()
	}

	pub fn is_live(&self) -> bool {
		self.state() == ContextState::Live
	}

	pub fn ptr_eq(&self, other: &ExecutionContext) -> bool {
		Arc::ptr_eq(&self.inner, &other.inner)
	}

	/// Marks the context invalid. Only the first invalidation sticks.
	pub(crate) fn invalidate(&self, state: ContextState) -> bool {
		self.inner.state.send_if_modified(|current| {
			if *current == ContextState::Live && state != ContextState::Live {
				*current = state;
				true
			} else {
				false
			}
		})
	}

	/// Evaluates `expression`, awaiting promises and returning the value by JSON.
	pub async fn evaluate(&self, expression: &str) -> Result<Value> {
		let params = json!({
			"expression": expression,
			"contextId": self.inner.id,
			"returnByValue": true,
			"awaitPromise": true,
		});
		self.run("Runtime.evaluate", params).await
	}

	/// Calls `declaration` (a function source) with JSON-serializable `args`.
	pub async fn call_function(&self, declaration: &str, args: Vec<Value>) -> Result<Value> {
		let arguments: Vec<Value> = args.into_iter().map(|value| json!({ "value": value })).collect();
		let params = json!({
			"functionDeclaration": declaration,
			"executionContextId": self.inner.id,
			"arguments": arguments,
			"returnByValue": true,
			"awaitPromise": true,
		});
		self.run("Runtime.callFunctionOn", params).await
	}

	async fn run(&self, method: &str, params: Value) -> Result<Value> {
		if !self.is_live() {
			return Err(self.invalidated_error());
		}

		let invalidated = wait_invalidated(self.inner.state.subscribe());
		let command = self.inner.session.command(method, params);

		let raw = tokio::select! {
			biased;
			result = command => result,
			_ = invalidated => return Err(self.invalidated_error()),
		};

		let raw = raw.map_err(|e| match e {
			Error::Protocol { ref message, .. } if is_context_gone(message) => self.invalidated_error(),
			other => other,
		})?;

		let result: EvaluateResult = serde_json::from_value(raw)?;
		if let Some(details) = result.exception_details {
			return Err(Error::Evaluation {
				message: details.message(),
			});
		}
		Ok(remote_value(result.result))
	}

	/// A context lost with its frame reports the detach, not the context.
	fn invalidated_error(&self) -> Error {
		match (self.state(), &self.inner.frame_id) {
			(ContextState::FrameDetached, Some(frame_id)) => NavigationError::FrameDetached {
				frame_id: frame_id.clone(),
			}
			.into(),
			_ => Error::ExecutionContextDestroyed {
				context_id: self.inner.id,
			},
		}
	}
}

impl fmt::Debug for ExecutionContext {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ExecutionContext")
			.field("id", &self.inner.id)
			.field("frame_id", &self.inner.frame_id)
			.field("world", &self.inner.world)
			.field("state", &self.state())
			.finish()
	}
}

async fn wait_invalidated(mut rx: watch::Receiver<ContextState>) {
	loop {
		if *rx.borrow_and_update() != ContextState::Live {
			return;
		}
		if rx.changed().await.is_err() {
			std::future::pending::<()>().await;
		}
	}
}

fn is_context_gone(message: &str) -> bool {
	message.contains("Cannot find context with specified id")
		|| message.contains("Execution context was destroyed")
		|| message.contains("Cannot find default execution context")
}

fn remote_value(object: RemoteObject) -> Value {
	match (object.value, object.unserializable_value) {
		(Some(value), _) => value,
		(None, Some(unserializable)) => Value::String(unserializable),
		(None, None) => Value::Null,
	}
}
