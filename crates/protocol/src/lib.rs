//! Wire types for the Chrome DevTools Protocol.
//!
//! This crate holds the serde types shared by the runtime and the high-level API:
//!
//! - [`message`] - the command/response/event envelope
//! - [`events`] - typed payloads for the events and results the core consumes
//! - [`options`] - navigation options and defaults
//!
//! Method and parameter schemas beyond these are not modeled; callers pass
//! `serde_json::Value` params for anything else.

pub mod events;
pub mod message;
pub mod options;

pub use message::{Command, ErrorPayload, Event, Message, Response};
pub use options::{
	DEFAULT_NETWORK_IDLE_MS, DEFAULT_PROTOCOL_TIMEOUT_MS, DEFAULT_TIMEOUT_MS, NavigateOptions,
	WaitUntil, describe_conditions, timeout_from_ms,
};
