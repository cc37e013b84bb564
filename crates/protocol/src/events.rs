//! Typed payloads for the events and command results the core consumes.
//!
//! Only the fields the session, frame and network layers read are modeled.
//! Unknown fields are ignored so newer browsers stay compatible.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Description of a debuggable target.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetInfo {
	pub target_id: String,
	/// Target type (`page`, `iframe`, `worker`, `service_worker`, ...).
	#[serde(rename = "type")]
	pub target_type: String,
	#[serde(default)]
	pub title: String,
	#[serde(default)]
	pub url: String,
	#[serde(default)]
	pub attached: bool,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub opener_id: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub browser_context_id: Option<String>,
}

/// `Target.attachedToTarget`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachedToTarget {
	pub session_id: String,
	pub target_info: TargetInfo,
	#[serde(default)]
	pub waiting_for_debugger: bool,
}

/// `Target.detachedFromTarget`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetachedFromTarget {
	pub session_id: String,
	#[serde(default)]
	pub target_id: Option<String>,
}

/// Result of `Target.attachToTarget`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachToTargetResult {
	pub session_id: String,
}

/// Frame description carried by `Page.frameNavigated` and `Page.getFrameTree`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FramePayload {
	pub id: String,
	#[serde(default)]
	pub parent_id: Option<String>,
	#[serde(default)]
	pub loader_id: String,
	#[serde(default)]
	pub name: Option<String>,
	#[serde(default)]
	pub url: String,
	#[serde(default)]
	pub url_fragment: Option<String>,
}

impl FramePayload {
	/// Returns the full URL including any fragment.
	pub fn full_url(&self) -> String {
		match &self.url_fragment {
			Some(fragment) => format!("{}{}", self.url, fragment),
			None => self.url.clone(),
		}
	}
}

/// Recursive frame tree returned by `Page.getFrameTree`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameTree {
	pub frame: FramePayload,
	#[serde(default)]
	pub child_frames: Vec<FrameTree>,
}

/// Result of `Page.getFrameTree`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetFrameTreeResult {
	pub frame_tree: FrameTree,
}

/// `Page.frameAttached`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameAttached {
	pub frame_id: String,
	pub parent_frame_id: String,
}

/// `Page.frameNavigated`
#[derive(Debug, Clone, Deserialize)]
pub struct FrameNavigated {
	pub frame: FramePayload,
	#[serde(default, rename = "type")]
	pub navigation_type: Option<String>,
}

/// `Page.navigatedWithinDocument`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigatedWithinDocument {
	pub frame_id: String,
	pub url: String,
}

/// `Page.frameDetached`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameDetached {
	pub frame_id: String,
	/// `remove` or `swap`.
	#[serde(default)]
	pub reason: Option<String>,
}

/// `Page.frameStoppedLoading`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameStoppedLoading {
	pub frame_id: String,
}

/// `Page.lifecycleEvent`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleEvent {
	pub frame_id: String,
	pub loader_id: String,
	pub name: String,
	#[serde(default)]
	pub timestamp: f64,
}

/// Result of `Page.navigate`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigateResult {
	pub frame_id: String,
	/// Absent for same-document navigations.
	#[serde(default)]
	pub loader_id: Option<String>,
	#[serde(default)]
	pub error_text: Option<String>,
}

/// Auxiliary data attached to an execution context by the page domain.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContextAuxData {
	#[serde(default)]
	pub frame_id: Option<String>,
	#[serde(default)]
	pub is_default: bool,
	#[serde(default, rename = "type")]
	pub context_type: Option<String>,
}

/// `Runtime.ExecutionContextDescription`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContextDescription {
	pub id: i64,
	#[serde(default)]
	pub origin: String,
	#[serde(default)]
	pub name: String,
	#[serde(default)]
	pub unique_id: Option<String>,
	#[serde(default)]
	pub aux_data: Option<ExecutionContextAuxData>,
}

/// `Runtime.executionContextCreated`
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionContextCreated {
	pub context: ExecutionContextDescription,
}

/// `Runtime.executionContextDestroyed`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContextDestroyed {
	pub execution_context_id: i64,
}

/// `Runtime.RemoteObject`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteObject {
	#[serde(rename = "type")]
	pub object_type: String,
	#[serde(default)]
	pub subtype: Option<String>,
	#[serde(default)]
	pub value: Option<Value>,
	#[serde(default)]
	pub unserializable_value: Option<String>,
	#[serde(default)]
	pub description: Option<String>,
}

/// `Runtime.ExceptionDetails`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionDetails {
	#[serde(default)]
	pub text: String,
	#[serde(default)]
	pub exception: Option<RemoteObject>,
	#[serde(default)]
	pub line_number: i64,
	#[serde(default)]
	pub column_number: i64,
}

impl ExceptionDetails {
	/// Returns the most descriptive message available.
	pub fn message(&self) -> String {
		self.exception
			.as_ref()
			.and_then(|exception| exception.description.clone())
			.unwrap_or_else(|| self.text.clone())
	}
}

/// Result of `Runtime.evaluate` and `Runtime.callFunctionOn`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateResult {
	pub result: RemoteObject,
	#[serde(default)]
	pub exception_details: Option<ExceptionDetails>,
}

/// `Network.Request`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestPayload {
	pub url: String,
	#[serde(default)]
	pub url_fragment: Option<String>,
	pub method: String,
	#[serde(default)]
	pub headers: HashMap<String, String>,
	#[serde(default)]
	pub post_data: Option<String>,
}

/// `Network.Response`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponsePayload {
	pub url: String,
	pub status: u16,
	#[serde(default)]
	pub status_text: String,
	#[serde(default)]
	pub headers: HashMap<String, String>,
	#[serde(default)]
	pub mime_type: String,
	#[serde(default, rename = "remoteIPAddress")]
	pub remote_ip_address: Option<String>,
	#[serde(default)]
	pub remote_port: Option<u16>,
	#[serde(default)]
	pub from_disk_cache: bool,
	#[serde(default)]
	pub from_service_worker: bool,
	#[serde(default)]
	pub protocol: Option<String>,
}

/// `Network.requestWillBeSent`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestWillBeSent {
	pub request_id: String,
	#[serde(default)]
	pub loader_id: String,
	#[serde(default, rename = "documentURL")]
	pub document_url: String,
	pub request: RequestPayload,
	#[serde(default)]
	pub redirect_response: Option<ResponsePayload>,
	#[serde(default, rename = "type")]
	pub resource_type: Option<String>,
	#[serde(default)]
	pub frame_id: Option<String>,
}

/// `Network.responseReceived`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseReceived {
	pub request_id: String,
	#[serde(default)]
	pub loader_id: String,
	pub response: ResponsePayload,
	#[serde(default, rename = "type")]
	pub resource_type: Option<String>,
	#[serde(default)]
	pub frame_id: Option<String>,
}

/// `Network.loadingFinished`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadingFinished {
	pub request_id: String,
	#[serde(default)]
	pub encoded_data_length: f64,
}

/// `Network.loadingFailed`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadingFailed {
	pub request_id: String,
	pub error_text: String,
	#[serde(default)]
	pub canceled: bool,
}

/// `Network.requestServedFromCache`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestServedFromCache {
	pub request_id: String,
}
