//! Navigation methods for [`Page`].

use std::sync::Arc;
use std::time::Duration;

use cdp_protocol::events::NavigateResult;
use cdp_protocol::{NavigateOptions, WaitUntil};
use cdp_runtime::{Error, NavigationError, Result};
use serde_json::json;

use super::Page;
use crate::frame::Frame;
use crate::lifecycle_watcher::LifecycleWatcher;
use crate::network_manager::Response;

impl Page {
	/// Navigates the main frame to `url`.
	///
	/// Returns the response of the last navigation request, or `None` when the
	/// navigation produced none (same-document navigations, `about:blank`).
	pub async fn goto(&self, url: &str, options: NavigateOptions) -> Result<Option<Response>> {
		let frame = self.main_frame()?;
		self.goto_frame(&frame, url, options).await
	}

	/// Navigates `frame` to `url`.
	pub async fn goto_frame(&self, frame: &Frame, url: &str, options: NavigateOptions) -> Result<Option<Response>> {
		let timeout = options.effective_timeout(self.options.default_timeout);
		let mut watcher = self.watcher(frame, &options, timeout, false);

		let mut params = json!({ "url": url, "frameId": frame.id() });
		if let Some(referer) = &options.referer {
			params["referer"] = json!(referer);
		}

		tracing::debug!(url, frame_id = %frame.id(), "Navigating");
		let navigate = self.session.send::<_, NavigateResult>("Page.navigate", params);
		let result = match watcher.deadline() {
			Some(deadline) => tokio::time::timeout_at(deadline, navigate)
				.await
				.map_err(|_| Error::timeout(format!("Page.navigate to {url}"), timeout.unwrap_or_default()))??,
			None => navigate.await?,
		};

		if let Some(reason) = result.error_text {
			return Err(NavigationError::Failed {
				url: url.to_string(),
				reason,
			}
			.into());
		}

		watcher.settle().await?;
		Ok(watcher.navigation_response())
	}

	/// Reloads the main frame.
	pub async fn reload(&self, options: NavigateOptions) -> Result<Option<Response>> {
		let frame = self.main_frame()?;
		let timeout = options.effective_timeout(self.options.default_timeout);
		let mut watcher = self.watcher(&frame, &options, timeout, false);

		self.session.send_no_result("Page.reload", json!({})).await?;

		watcher.settle().await?;
		Ok(watcher.navigation_response())
	}

	/// Waits for the next navigation of the main frame, however it is triggered.
	pub async fn wait_for_navigation(&self, options: NavigateOptions) -> Result<Option<Response>> {
		let frame = self.main_frame()?;
		let timeout = options.effective_timeout(self.options.default_timeout);
		let mut watcher = self.watcher(&frame, &options, timeout, false);

		watcher.settle().await?;
		Ok(watcher.navigation_response())
	}

	/// Waits until `state` holds for the document currently in the main frame.
	///
	/// A `timeout` of `None` uses the page default; zero waits forever.
	pub async fn wait_for_load_state(&self, state: WaitUntil, timeout: Option<Duration>) -> Result<()> {
		let frame = self.main_frame()?;
		let options = NavigateOptions {
			timeout,
			wait_until: vec![state],
			referer: None,
		};
		let timeout = options.effective_timeout(self.options.default_timeout);
		self.watcher(&frame, &options, timeout, true).settle().await
	}

	fn watcher(
		&self,
		frame: &Frame,
		options: &NavigateOptions,
		timeout: Option<Duration>,
		current_document: bool,
	) -> LifecycleWatcher {
		let frame_manager = Arc::clone(&self.frame_manager);
		let network_manager = Arc::clone(&self.network_manager);
		let watcher = if current_document {
			LifecycleWatcher::for_current_document(
				frame_manager,
				network_manager,
				frame.clone(),
				options.conditions(),
				timeout,
			)
		} else {
			LifecycleWatcher::new(
				frame_manager,
				network_manager,
				frame.clone(),
				options.conditions(),
				timeout,
			)
		};
		watcher.idle_window(self.options.network_idle_window)
	}
}
