//! [`Page`] facade over one attached page target.

mod eval;
mod navigation;

use std::sync::Arc;

use cdp_runtime::{Error, Result, Session};
use serde_json::json;

use crate::config::PageOptions;
use crate::frame::Frame;
use crate::frame_manager::FrameManager;
use crate::network_manager::NetworkManager;

/// A browser tab driven through one [`Session`].
///
/// Handles are cheap clones sharing the same managers.
#[derive(Clone)]
pub struct Page {
	session: Arc<Session>,
	frame_manager: Arc<FrameManager>,
	network_manager: Arc<NetworkManager>,
	options: PageOptions,
}

impl Page {
	/// Builds the page managers for `session` and enables the domains they need.
	///
	/// The network domain is enabled first so the requests of the initial
	/// document are tracked.
	pub async fn attach(session: Arc<Session>, options: PageOptions) -> Result<Self> {
		let network_manager = NetworkManager::new(Arc::clone(&session));
		network_manager.initialize().await?;

		let frame_manager = FrameManager::new(Arc::clone(&session));
		frame_manager.initialize().await?;

		tracing::debug!(
			session_id = session.id(),
			target_id = session.target_id(),
			frames = frame_manager.frames().len(),
			"Page attached"
		);

		Ok(Self {
			session,
			frame_manager,
			network_manager,
			options,
		})
	}

	pub fn session(&self) -> &Arc<Session> {
		&self.session
	}

	pub fn frame_manager(&self) -> &Arc<FrameManager> {
		&self.frame_manager
	}

	pub fn network_manager(&self) -> &Arc<NetworkManager> {
		&self.network_manager
	}

	pub fn options(&self) -> &PageOptions {
		&self.options
	}

	/// Returns the top-level frame.
	pub fn main_frame(&self) -> Result<Frame> {
		self.frame_manager
			.main_frame()
			.ok_or_else(|| Error::FrameNotFound("main frame".to_string()))
	}

	/// Every attached frame, main frame first.
	pub fn frames(&self) -> Vec<Frame> {
		self.frame_manager.frames()
	}

	/// URL of the main frame (empty before the first navigation is known).
	pub fn url(&self) -> String {
		self.frame_manager
			.main_frame()
			.map(|frame| frame.url())
			.unwrap_or_default()
	}

	pub fn is_closed(&self) -> bool {
		self.session.is_closed()
	}

	/// Closes the page.
	pub async fn close(&self) -> Result<()> {
		self.session.send_no_result("Page.close", json!({})).await
	}
}

impl std::fmt::Debug for Page {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Page")
			.field("session", &self.session.id())
			.field("url", &self.url())
			.finish()
	}
}
