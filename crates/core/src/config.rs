//! Page-level defaults.

use std::time::Duration;

use cdp_protocol::{DEFAULT_NETWORK_IDLE_MS, DEFAULT_TIMEOUT_MS, timeout_from_ms};

/// Environment variable overriding [`PageOptions::default_timeout`] (milliseconds, 0 disables).
pub const DEFAULT_TIMEOUT_ENV: &str = "CDP_DEFAULT_TIMEOUT_MS";

/// Environment variable overriding [`PageOptions::network_idle_window`] (milliseconds).
pub const NETWORK_IDLE_ENV: &str = "CDP_NETWORK_IDLE_MS";

/// Options applied to every operation of a [`Page`](crate::Page).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageOptions {
	/// Deadline for navigations and waits that do not set their own; `None` waits forever.
	pub default_timeout: Option<Duration>,
	/// Quiet period `networkidle0`/`networkidle2` must hold for.
	pub network_idle_window: Duration,
}

impl Default for PageOptions {
	fn default() -> Self {
		Self {
			default_timeout: Some(Duration::from_millis(DEFAULT_TIMEOUT_MS)),
			network_idle_window: Duration::from_millis(DEFAULT_NETWORK_IDLE_MS),
		}
	}
}

impl PageOptions {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn default_timeout(mut self, timeout: Option<Duration>) -> Self {
		self.default_timeout = timeout;
		self
	}

	pub fn network_idle_window(mut self, window: Duration) -> Self {
		self.network_idle_window = window;
		self
	}

	/// Defaults overridden by `CDP_DEFAULT_TIMEOUT_MS` and `CDP_NETWORK_IDLE_MS`.
	pub fn from_env() -> Self {
		Self::from_lookup(|key| std::env::var(key).ok())
	}

	fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
		let mut options = Self::default();
		if let Some(ms) = read_ms(&lookup, DEFAULT_TIMEOUT_ENV) {
			options.default_timeout = timeout_from_ms(ms);
		}
		if let Some(ms) = read_ms(&lookup, NETWORK_IDLE_ENV) {
			options.network_idle_window = Duration::from_millis(ms);
		}
		options
	}
}

fn read_ms(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<u64> {
	let value = lookup(key)?;
	match value.trim().parse::<u64>() {
		Ok(ms) => Some(ms),
		Err(e) => {
			tracing::warn!(key, value = %value, error = %e, "Ignoring invalid millisecond value");
			None
		}
	}
}

#[cfg(test)]
mod tests {
	use std::collections::HashMap;

	use super::*;

	fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
		let vars: HashMap<String, String> = vars
			.iter()
			.map(|(key, value)| (key.to_string(), value.to_string()))
			.collect();
		move |key| vars.get(key).cloned()
	}

	#[test]
	fn defaults_without_environment() {
		let options = PageOptions::from_lookup(lookup(&[]));
		assert_eq!(options, PageOptions::default());
		assert_eq!(options.default_timeout, Some(Duration::from_secs(30)));
		assert_eq!(options.network_idle_window, Duration::from_millis(500));
	}

	#[test]
	fn environment_overrides() {
		let options = PageOptions::from_lookup(lookup(&[
			(DEFAULT_TIMEOUT_ENV, "5000"),
			(NETWORK_IDLE_ENV, " 250 "),
		]));
		assert_eq!(options.default_timeout, Some(Duration::from_secs(5)));
		assert_eq!(options.network_idle_window, Duration::from_millis(250));
	}

	#[test]
	fn zero_timeout_disables_deadline() {
		let options = PageOptions::from_lookup(lookup(&[(DEFAULT_TIMEOUT_ENV, "0")]));
		assert_eq!(options.default_timeout, None);
	}

	#[test]
	fn invalid_values_keep_defaults() {
		let options = PageOptions::from_lookup(lookup(&[
			(DEFAULT_TIMEOUT_ENV, "soon"),
			(NETWORK_IDLE_ENV, "-1"),
		]));
		assert_eq!(options, PageOptions::default());
	}
}
