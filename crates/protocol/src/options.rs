//! Navigation options and protocol defaults.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default timeout in milliseconds for navigation and wait operations.
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Default per-command protocol timeout in milliseconds.
pub const DEFAULT_PROTOCOL_TIMEOUT_MS: u64 = 180_000;

/// Default quiet period for `networkidle0`/`networkidle2`, in milliseconds.
pub const DEFAULT_NETWORK_IDLE_MS: u64 = 500;

/// Converts a millisecond timeout where 0 means "no deadline".
pub fn timeout_from_ms(ms: u64) -> Option<Duration> {
	(ms > 0).then(|| Duration::from_millis(ms))
}

/// Condition that marks a navigation as complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaitUntil {
	/// The `load` event fired for the navigated document.
	#[default]
	Load,
	/// The `DOMContentLoaded` event fired for the navigated document.
	#[serde(rename = "domcontentloaded")]
	DomContentLoaded,
	/// No requests in flight for the frame for the idle window.
	#[serde(rename = "networkidle0")]
	NetworkIdle0,
	/// At most two requests in flight for the frame for the idle window.
	#[serde(rename = "networkidle2")]
	NetworkIdle2,
}

impl WaitUntil {
	/// Returns the option name as accepted by [`FromStr`].
	pub fn as_str(&self) -> &'static str {
		match self {
			WaitUntil::Load => "load",
			WaitUntil::DomContentLoaded => "domcontentloaded",
			WaitUntil::NetworkIdle0 => "networkidle0",
			WaitUntil::NetworkIdle2 => "networkidle2",
		}
	}

	/// Returns the `Page.lifecycleEvent` name this condition waits for, if any.
	pub fn lifecycle_event(&self) -> Option<&'static str> {
		match self {
			WaitUntil::Load => Some("load"),
			WaitUntil::DomContentLoaded => Some("DOMContentLoaded"),
			WaitUntil::NetworkIdle0 | WaitUntil::NetworkIdle2 => None,
		}
	}

	/// Returns the tolerated number of in-flight requests for idle conditions.
	pub fn idle_threshold(&self) -> Option<usize> {
		match self {
			WaitUntil::NetworkIdle0 => Some(0),
			WaitUntil::NetworkIdle2 => Some(2),
			WaitUntil::Load | WaitUntil::DomContentLoaded => None,
		}
	}
}

impl fmt::Display for WaitUntil {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for WaitUntil {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"load" => Ok(WaitUntil::Load),
			"domcontentloaded" => Ok(WaitUntil::DomContentLoaded),
			"networkidle0" => Ok(WaitUntil::NetworkIdle0),
			"networkidle2" => Ok(WaitUntil::NetworkIdle2),
			other => Err(format!("Unknown wait condition: {other}")),
		}
	}
}

/// Formats a condition list as `[load, networkidle0]`.
pub fn describe_conditions(conditions: &[WaitUntil]) -> String {
	let names: Vec<&str> = conditions.iter().map(WaitUntil::as_str).collect();
	format!("[{}]", names.join(", "))
}

/// Navigation options for `goto()`, `reload()` and `wait_for_navigation()`.
#[derive(Debug, Clone, Default)]
pub struct NavigateOptions {
	/// Maximum navigation time; `None` uses the page default, zero disables it.
	pub timeout: Option<Duration>,
	/// Conditions that must all hold; empty means `[load]`.
	pub wait_until: Vec<WaitUntil>,
	/// Referer header value.
	pub referer: Option<String>,
}

impl NavigateOptions {
	/// Creates new default options.
	pub fn new() -> Self {
		Self::default()
	}

	/// Sets the timeout.
	pub fn timeout(mut self, timeout: Duration) -> Self {
		self.timeout = Some(timeout);
		self
	}

	/// Adds a wait condition.
	pub fn wait_until(mut self, wait_until: WaitUntil) -> Self {
		if !self.wait_until.contains(&wait_until) {
			self.wait_until.push(wait_until);
		}
		self
	}

	/// Sets the referer header.
	pub fn referer(mut self, referer: impl Into<String>) -> Self {
		self.referer = Some(referer.into());
		self
	}

	/// Returns the effective condition list.
	pub fn conditions(&self) -> Vec<WaitUntil> {
		if self.wait_until.is_empty() {
			vec![WaitUntil::Load]
		} else {
			self.wait_until.clone()
		}
	}

	/// Resolves the effective deadline given the caller's default.
	pub fn effective_timeout(&self, default: Option<Duration>) -> Option<Duration> {
		match self.timeout {
			Some(timeout) if timeout.is_zero() => None,
			Some(timeout) => Some(timeout),
			None => default,
		}
	}
}
