//! Pending-command tables and the future returned for every command.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use cdp_protocol::ErrorPayload;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::{Instant, Sleep};

use crate::error::{Error, Result};

struct PendingCommand {
	method: String,
	tx: oneshot::Sender<Result<Value>>,
}

/// Pending commands keyed by id.
///
/// The connection owns one table and every session owns its own; an entry is
/// removed exactly once, by the response, a rejection, cancellation or timeout.
#[derive(Clone, Default)]
pub(crate) struct CallbackTable {
	pending: Arc<DashMap<u64, PendingCommand>>,
}

impl CallbackTable {
	pub(crate) fn register(&self, id: u64, method: &str) -> oneshot::Receiver<Result<Value>> {
		let (tx, rx) = oneshot::channel();
		self.pending.insert(
			id,
			PendingCommand {
				method: method.to_string(),
				tx,
			},
		);
		rx
	}

	/// Completes `id` with the browser's answer. Returns false for unknown ids.
	pub(crate) fn resolve(&self, id: u64, outcome: std::result::Result<Value, ErrorPayload>) -> bool {
		let Some((_, pending)) = self.pending.remove(&id) else {
			return false;
		};
		let result = outcome.map_err(|error| Error::Protocol {
			method: pending.method,
			code: error.code,
			message: error.message,
			data: error.data,
		});
		let _ = pending.tx.send(result);
		true
	}

	pub(crate) fn remove(&self, id: u64) -> bool {
		self.pending.remove(&id).is_some()
	}

	/// Rejects and clears every pending entry, building each error from its method.
	pub(crate) fn reject_all(&self, error: impl Fn(&str) -> Error) -> usize {
		let ids: Vec<u64> = self.pending.iter().map(|entry| *entry.key()).collect();
		let mut rejected = 0;
		for id in ids {
			if let Some((_, pending)) = self.pending.remove(&id) {
				let _ = pending.tx.send(Err(error(&pending.method)));
				rejected += 1;
			}
		}
		rejected
	}

	pub(crate) fn len(&self) -> usize {
		self.pending.len()
	}
}

/// Removes the pending entry when an unfinished command future is dropped.
struct CancelGuard {
	id: u64,
	table: CallbackTable,
	completed: bool,
}

impl CancelGuard {
	fn complete(&mut self) {
		self.completed = true;
	}
}

impl Drop for CancelGuard {
	fn drop(&mut self) {
		if !self.completed && self.table.remove(self.id) {
			tracing::debug!(id = self.id, "Removed pending command on drop");
		}
	}
}

struct Pending {
	method: String,
	rx: oneshot::Receiver<Result<Value>>,
	guard: CancelGuard,
	deadline: Option<(Instant, Duration)>,
	sleep: Option<Pin<Box<Sleep>>>,
}

enum State {
	Failed(Option<Error>),
	Pending(Pending),
}

/// Future resolving to a command's result.
///
/// Commands that could not be sent (closed connection, detached session)
/// return a future that is already resolved with the error. Dropping an
/// unfinished future or calling [`cancel`](Self::cancel) removes the pending
/// entry; a late response for it is then ignored.
pub struct CommandFuture {
	state: State,
}

impl CommandFuture {
	pub(crate) fn failed(error: Error) -> Self {
		Self {
			state: State::Failed(Some(error)),
		}
	}

	pub(crate) fn pending(
		id: u64,
		method: &str,
		rx: oneshot::Receiver<Result<Value>>,
		table: CallbackTable,
		timeout: Option<Duration>,
	) -> Self {
		Self {
			state: State::Pending(Pending {
				method: method.to_string(),
				rx,
				guard: CancelGuard {
					id,
					table,
					completed: false,
				},
				deadline: timeout.map(|duration| (Instant::now() + duration, duration)),
				sleep: None,
			}),
		}
	}

	/// Returns the command id, or `None` if the command never reached the wire.
	pub fn id(&self) -> Option<u64> {
		match &self.state {
			State::Pending(pending) => Some(pending.guard.id),
			State::Failed(_) => None,
		}
	}

	/// Returns true if the command was rejected before being sent.
	pub fn is_failed(&self) -> bool {
		matches!(self.state, State::Failed(_))
	}

	/// Abandons the command and removes its pending entry.
	pub fn cancel(self) {
		drop(self);
	}
}

impl Future for CommandFuture {
	type Output = Result<Value>;

	fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		let this = self.get_mut();
		let pending = match &mut this.state {
			State::Failed(error) => {
				return Poll::Ready(Err(error.take().unwrap_or(Error::ChannelClosed)));
			}
			State::Pending(pending) => pending,
		};

		if let Poll::Ready(result) = Pin::new(&mut pending.rx).poll(cx) {
			pending.guard.complete();
			return Poll::Ready(result.map_err(|_| Error::ChannelClosed).and_then(|r| r));
		}

		if let Some((deadline, duration)) = pending.deadline {
			let sleep = pending
				.sleep
				.get_or_insert_with(|| Box::pin(tokio::time::sleep_until(deadline)));
			if sleep.as_mut().poll(cx).is_ready() {
				pending.guard.complete();
				pending.guard.table.remove(pending.guard.id);
				tracing::debug!(id = pending.guard.id, method = %pending.method, "Command timed out");
				return Poll::Ready(Err(Error::timeout(pending.method.clone(), duration)));
			}
		}

		Poll::Pending
	}
}

impl std::fmt::Debug for CommandFuture {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match &self.state {
			State::Failed(_) => f.debug_struct("CommandFuture").field("failed", &true).finish(),
			State::Pending(pending) => f
				.debug_struct("CommandFuture")
				.field("id", &pending.guard.id)
				.field("method", &pending.method)
				.finish(),
		}
	}
}
