//! cdp: a Chrome DevTools Protocol client control plane.
//!
//! One [`Connection`] multiplexes many target [`Session`]s over a single
//! transport. On top of a page session, the [`FrameManager`] keeps the live
//! frame tree and its execution contexts, the [`NetworkManager`] tracks
//! requests, and a [`LifecycleWatcher`] turns their events into a single
//! "navigation complete" decision. [`Page`] ties them together.
//!
//! # Examples
//!
//! ```ignore
//! use cdp::{Connection, ConnectionOptions, NavigateOptions, Page, PageOptions, WaitUntil};
//! use cdp::protocol::events::TargetInfo;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let connection = Connection::connect(
//!         "ws://127.0.0.1:9222/devtools/browser/<id>",
//!         ConnectionOptions::default(),
//!     )
//!     .await?;
//!
//!     let created: serde_json::Value = connection
//!         .send("Target.createTarget", serde_json::json!({ "url": "about:blank" }))
//!         .await?;
//!     let target = TargetInfo {
//!         target_id: created["targetId"].as_str().unwrap_or_default().to_string(),
//!         target_type: "page".to_string(),
//!         ..Default::default()
//!     };
//!     let session = connection.create_session(&target).await?;
//!     let page = Page::attach(session, PageOptions::from_env()).await?;
//!
//!     let response = page
//!         .goto(
//!             "https://example.com",
//!             NavigateOptions::new().wait_until(WaitUntil::NetworkIdle0),
//!         )
//!         .await?;
//!     println!("status: {:?}", response.map(|r| r.status()));
//!
//!     let title = page.evaluate("document.title").await?;
//!     println!("title: {title}");
//!
//!     page.close().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod execution_context;
pub mod frame;
pub mod frame_manager;
pub mod lifecycle_watcher;
pub mod network_manager;
pub mod page;

#[cfg(test)]
mod test_support;

pub use cdp_protocol as protocol;
pub use cdp_protocol::{NavigateOptions, WaitUntil};
pub use cdp_runtime::{
	CommandFuture, Connection, ConnectionEvent, ConnectionOptions, DisconnectReason, Error,
	EventWaiter, NavigationError, PipeTransport, Result, Session, Subscription, WebSocketTransport,
};
pub use config::PageOptions;
pub use execution_context::{ContextState, ExecutionContext, UTILITY_WORLD_NAME, World};
pub use frame::Frame;
pub use frame_manager::{FrameEvent, FrameManager};
pub use lifecycle_watcher::{LifecycleWatcher, TerminationReason, WatcherState};
pub use network_manager::{NetworkEvent, NetworkManager, RemoteAddress, Request, Response};
pub use page::Page;
