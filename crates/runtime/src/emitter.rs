//! Typed publish/subscribe used by every component.
//!
//! Listeners are synchronous callbacks stored in an [`IndexMap`] keyed by
//! [`HandlerId`], so removal is O(1) and emission order is registration order.
//! Registration returns a [`Subscription`] that removes the listener when
//! dropped; removal is idempotent.
//!
//! Emission snapshots the listener list before invoking it, so listeners may
//! subscribe or unsubscribe (including themselves) from inside a callback.
//! Emitters are driven from the connection's dispatch loop, which keeps
//! listener invocation in wire order.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use indexmap::IndexMap;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::{Error, Result};

/// Unique identifier for event handlers.
pub type HandlerId = u64;

static NEXT_HANDLER_ID: AtomicU64 = AtomicU64::new(1);

/// Returns a new globally-unique handler ID.
pub fn next_handler_id() -> HandlerId {
	NEXT_HANDLER_ID.fetch_add(1, Ordering::SeqCst)
}

/// Listener callback.
pub type HandlerFn<E> = Arc<dyn Fn(&E) + Send + Sync>;

type HandlerMap<E> = Arc<Mutex<IndexMap<HandlerId, HandlerFn<E>>>>;

/// Typed event emitter.
pub struct EventEmitter<E> {
	handlers: HandlerMap<E>,
}

impl<E> Default for EventEmitter<E> {
	fn default() -> Self {
		Self {
			handlers: Arc::new(Mutex::new(IndexMap::new())),
		}
	}
}

impl<E: Send + Sync + 'static> EventEmitter<E> {
	pub fn new() -> Self {
		Self::default()
	}

	/// Registers a listener for every emitted event.
	pub fn on<F>(&self, handler: F) -> Subscription
	where
		F: Fn(&E) + Send + Sync + 'static,
	{
		let id = next_handler_id();
		self.handlers.lock().insert(id, Arc::new(handler));
		Subscription::from_handler_map(id, &self.handlers)
	}

	/// Delivers `event` to every listener registered at the time of the call.
	pub fn emit(&self, event: &E) {
		let handlers: Vec<HandlerFn<E>> = self.handlers.lock().values().cloned().collect();
		for handler in handlers {
			handler(event);
		}
	}

	/// Returns the number of registered listeners.
	pub fn listener_count(&self) -> usize {
		self.handlers.lock().len()
	}

	/// Removes every listener.
	pub fn clear(&self) {
		self.handlers.lock().clear();
	}

	/// Registers a one-shot waiter for the first event matching `predicate`.
	///
	/// The listener is registered before this returns, so events emitted after
	/// the call are never missed. It is removed on match, timeout, or drop.
	pub fn waiter<F>(&self, predicate: F) -> EventWaiter<E>
	where
		E: Clone,
		F: Fn(&E) -> bool + Send + Sync + 'static,
	{
		let (tx, rx) = oneshot::channel();
		let tx = Mutex::new(Some(tx));
		let subscription = self.on(move |event: &E| {
			if predicate(event) {
				if let Some(tx) = tx.lock().take() {
					let _ = tx.send(event.clone());
				}
			}
		});
		EventWaiter {
			rx,
			subscription: Some(subscription),
		}
	}
}

impl<E> fmt::Debug for EventEmitter<E> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("EventEmitter")
			.field("listeners", &self.handlers.lock().len())
			.finish()
	}
}

/// RAII handle that unregisters an event handler on drop.
///
/// Holds a weak reference to the handler map, so dropping after the owning
/// emitter is gone is a no-op.
pub struct Subscription {
	id: HandlerId,
	dropper: Option<Arc<dyn Fn(HandlerId) + Send + Sync>>,
}

impl Subscription {
	/// Creates a subscription with a custom dropper function.
	pub fn new(id: HandlerId, dropper: Arc<dyn Fn(HandlerId) + Send + Sync>) -> Self {
		Self {
			id,
			dropper: Some(dropper),
		}
	}

	fn from_handler_map<E: Send + Sync + 'static>(id: HandlerId, handlers: &HandlerMap<E>) -> Self {
		let weak: Weak<Mutex<IndexMap<HandlerId, HandlerFn<E>>>> = Arc::downgrade(handlers);
		let dropper = Arc::new(move |id: HandlerId| {
			if let Some(map) = weak.upgrade() {
				map.lock().shift_remove(&id);
			}
		});
		Self::new(id, dropper)
	}

	/// Returns this subscription's handler ID.
	pub fn id(&self) -> HandlerId {
		self.id
	}

	/// Returns true until the subscription has been removed.
	pub fn is_active(&self) -> bool {
		self.dropper.is_some()
	}

	/// Removes the listener. Calling this more than once is a no-op.
	pub fn unsubscribe(&mut self) {
		if let Some(dropper) = self.dropper.take() {
			(dropper)(self.id);
		}
	}
}

impl Drop for Subscription {
	fn drop(&mut self) {
		self.unsubscribe();
	}
}

impl fmt::Debug for Subscription {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Subscription")
			.field("id", &self.id)
			.field("active", &self.dropper.is_some())
			.finish()
	}
}

/// One-shot event waiter returned by [`EventEmitter::waiter`].
///
/// Await it directly for an unbounded wait, or call [`wait`](Self::wait) for a
/// deadline.
pub struct EventWaiter<E> {
	rx: oneshot::Receiver<E>,
	subscription: Option<Subscription>,
}

impl<E: Send + 'static> EventWaiter<E> {
	/// Waits for the event, failing with [`Error::Timeout`] naming `operation`.
	///
	/// A `timeout` of `None` waits indefinitely.
	pub async fn wait(mut self, timeout: Option<Duration>, operation: &str) -> Result<E> {
		let result = match timeout {
			Some(duration) => match tokio::time::timeout(duration, &mut self.rx).await {
				Ok(received) => received.map_err(|_| Error::ChannelClosed),
				Err(_) => Err(Error::timeout(operation, duration)),
			},
			None => (&mut self.rx).await.map_err(|_| Error::ChannelClosed),
		};
		self.cancel();
		result
	}

	/// Stops waiting and unregisters the listener.
	pub fn cancel(&mut self) {
		if let Some(mut subscription) = self.subscription.take() {
			subscription.unsubscribe();
		}
	}
}

impl<E: Send + 'static> Future for EventWaiter<E> {
	type Output = Result<E>;

	fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		match Pin::new(&mut self.rx).poll(cx) {
			Poll::Ready(result) => {
				self.cancel();
				Poll::Ready(result.map_err(|_| Error::ChannelClosed))
			}
			Poll::Pending => Poll::Pending,
		}
	}
}
