use std::sync::Arc;
use std::time::Duration;

use cdp_runtime::{Error, NavigationError, Subscription};
use parking_lot::Mutex;
use serde_json::json;

use super::*;
use crate::test_support::TestTarget;

fn seeded(target: &TestTarget) -> Arc<FrameManager> {
	let manager = FrameManager::new(target.session());
	let tree = target.frame_tree(json!({
		"frame": {"id": "F0", "loaderId": "L0", "url": "https://example.test/"},
		"childFrames": [{
			"frame": {"id": "A", "parentId": "F0", "loaderId": "LA", "url": "https://a.test/"},
			"childFrames": [{
				"frame": {"id": "A1", "parentId": "A", "loaderId": "LA1", "url": "https://a1.test/"}
			}]
		}]
	}));
	manager.handle_frame_tree(&tree);
	manager
}

fn record(manager: &FrameManager) -> (Subscription, Arc<Mutex<Vec<FrameEvent>>>) {
	let seen = Arc::new(Mutex::new(Vec::new()));
	let sink = Arc::clone(&seen);
	let subscription = manager.on(move |event| sink.lock().push(event.clone()));
	(subscription, seen)
}

fn ids(frames: &[Frame]) -> Vec<String> {
	frames.iter().map(Frame::id).collect()
}

fn detached_ids(events: &[FrameEvent]) -> Vec<String> {
	events
		.iter()
		.filter_map(|event| match event {
			FrameEvent::Detached(frame) => Some(frame.id()),
			_ => None,
		})
		.collect()
}

#[tokio::test]
async fn frame_tree_seeds_nodes_in_tree_order() {
	let target = TestTarget::new();
	let manager = seeded(&target);

	assert_eq!(ids(&manager.frames()), vec!["F0", "A", "A1"]);
	let main = manager.main_frame().unwrap();
	assert!(main.is_main_frame());
	assert_eq!(main.url(), "https://example.test/");
	assert_eq!(ids(&manager.child_frames(&main)), vec!["A"]);
	assert_eq!(manager.frame("A1").unwrap().parent_id().as_deref(), Some("A"));
}

#[tokio::test]
async fn detaching_subtree_emits_children_first() {
	let target = TestTarget::new();
	let manager = seeded(&target);
	let a = manager.frame("A").unwrap();
	let a1 = manager.frame("A1").unwrap();
	let (_subscription, seen) = record(&manager);

	target.frame_detached("A");

	assert_eq!(detached_ids(&seen.lock()), vec!["A1", "A"]);
	assert!(manager.frame("A").is_none());
	assert!(manager.frame("A1").is_none());
	assert!(a.is_detached() && a1.is_detached());
	assert!(manager.main_frame().unwrap().child_ids().is_empty());
	assert_eq!(ids(&manager.frames()), vec!["F0"]);
}

#[tokio::test]
async fn swap_detach_keeps_frame() {
	let target = TestTarget::new();
	let manager = seeded(&target);

	target.event(
		"Page.frameDetached",
		json!({"frameId": "A", "reason": "swap"}),
	);

	assert!(manager.frame("A").is_some());
	assert!(!manager.frame("A").unwrap().is_detached());
}

#[tokio::test]
async fn attach_under_unknown_parent_is_ignored() {
	let target = TestTarget::new();
	let manager = seeded(&target);

	target.frame_attached("B", "missing");
	target.frame_attached("B", "F0");

	assert!(manager.frame("B").is_some());
	assert_eq!(manager.main_frame().unwrap().child_ids(), vec!["A", "B"]);
}

#[tokio::test]
async fn cross_document_navigation_resets_frame() {
	let target = TestTarget::new();
	let manager = seeded(&target);
	target.context_created(1, "F0", None);
	let main = manager.main_frame().unwrap();
	let context = main.execution_context(&World::Main).unwrap();
	let before = main.navigation_id();
	let (_subscription, seen) = record(&manager);

	target.frame_navigated("F0", None, "L1", "https://example.test/next");

	assert_eq!(main.navigation_id(), before + 1);
	assert_eq!(main.url(), "https://example.test/next");
	assert_eq!(main.loader_id(), "L1");
	assert!(main.child_ids().is_empty());
	assert!(manager.frame("A").is_none());
	assert_eq!(context.state(), ContextState::Destroyed);
	assert!(main.execution_context(&World::Main).is_none());

	let seen = seen.lock();
	assert_eq!(detached_ids(&seen), vec!["A1", "A"]);
	assert!(seen.iter().any(|event| matches!(
		event,
		FrameEvent::Navigated { navigation_id, .. } if *navigation_id == before + 1
	)));
}

#[tokio::test]
async fn same_document_navigation_keeps_navigation_id() {
	let target = TestTarget::new();
	let manager = seeded(&target);
	let main = manager.main_frame().unwrap();
	let before = main.navigation_id();

	target.event(
		"Page.navigatedWithinDocument",
		json!({"frameId": "F0", "url": "https://example.test/#section"}),
	);

	assert_eq!(main.navigation_id(), before);
	assert_eq!(main.url(), "https://example.test/#section");
}

#[tokio::test]
async fn stale_lifecycle_events_are_ignored() {
	let target = TestTarget::new();
	let manager = seeded(&target);
	target.frame_navigated("F0", None, "L1", "https://example.test/next");
	let main = manager.main_frame().unwrap();
	let (_subscription, seen) = record(&manager);

	target.lifecycle("F0", "L0", "load");
	assert!(!main.has_lifecycle_event("load"));
	assert!(seen.lock().is_empty());

	target.lifecycle("F0", "L1", "load");
	target.lifecycle("F0", "L1", "load");
	assert!(main.has_lifecycle_event("load"));
	let lifecycle_events = seen
		.lock()
		.iter()
		.filter(|event| matches!(event, FrameEvent::Lifecycle { .. }))
		.count();
	assert_eq!(lifecycle_events, 1);
}

#[tokio::test]
async fn init_starts_a_new_loader() {
	let target = TestTarget::new();
	let manager = seeded(&target);
	let main = manager.main_frame().unwrap();
	target.lifecycle("F0", "L0", "DOMContentLoaded");
	assert_eq!(main.lifecycle_events(), vec!["DOMContentLoaded"]);

	target.lifecycle("F0", "L2", "init");

	assert_eq!(main.loader_id(), "L2");
	assert!(main.lifecycle_events().is_empty());
}

#[tokio::test]
async fn stopped_loading_records_load_events() {
	let target = TestTarget::new();
	let manager = seeded(&target);
	let main = manager.main_frame().unwrap();

	target.event("Page.frameStoppedLoading", json!({"frameId": "F0"}));

	assert_eq!(main.lifecycle_events(), vec!["DOMContentLoaded", "load"]);
}

#[tokio::test]
async fn lifecycle_complete_requires_descendants() {
	let target = TestTarget::new();
	let manager = seeded(&target);
	let main = manager.main_frame().unwrap();

	target.lifecycle("F0", "L0", "load");
	target.lifecycle("A", "LA", "load");
	assert!(!manager.lifecycle_complete(&main, "load"));

	target.lifecycle("A1", "LA1", "load");
	assert!(manager.lifecycle_complete(&main, "load"));
	assert!(!manager.lifecycle_complete(&main, "DOMContentLoaded"));
}

#[tokio::test]
async fn context_for_unknown_frame_is_held_until_attach() {
	let target = TestTarget::new();
	let manager = seeded(&target);

	target.context_created(5, "B", None);
	assert!(manager.execution_context_by_id(5).is_some());

	target.frame_attached("B", "F0");

	let frame = manager.frame("B").unwrap();
	let context = frame.execution_context(&World::Main).unwrap();
	assert_eq!(context.id(), 5);
}

#[tokio::test]
async fn contexts_cleared_keeps_frames() {
	let target = TestTarget::new();
	let manager = seeded(&target);
	target.context_created(1, "F0", None);
	target.context_created(2, "A", Some(UTILITY_WORLD_NAME));
	let main_context = manager.execution_context_by_id(1).unwrap();
	let utility = manager.execution_context_by_id(2).unwrap();

	target.event("Runtime.executionContextsCleared", json!({}));

	assert_eq!(ids(&manager.frames()), vec!["F0", "A", "A1"]);
	assert_eq!(main_context.state(), ContextState::Destroyed);
	assert_eq!(utility.state(), ContextState::Destroyed);
	assert!(manager.execution_context_by_id(1).is_none());
}

#[tokio::test]
async fn destroyed_context_leaves_other_worlds() {
	let target = TestTarget::new();
	let manager = seeded(&target);
	target.context_created(1, "F0", None);
	target.context_created(2, "F0", Some(UTILITY_WORLD_NAME));
	let main = manager.main_frame().unwrap();

	target.event(
		"Runtime.executionContextDestroyed",
		json!({"executionContextId": 1}),
	);

	assert!(main.execution_context(&World::Main).is_none());
	assert_eq!(main.execution_context(&World::utility()).unwrap().id(), 2);
}

#[tokio::test]
async fn detached_frame_contexts_report_frame_detached() {
	let target = TestTarget::new();
	let manager = seeded(&target);
	target.context_created(3, "A1", None);
	let context = manager.execution_context_by_id(3).unwrap();

	target.frame_detached("A");

	assert_eq!(context.state(), ContextState::FrameDetached);
}

#[tokio::test]
async fn evaluating_in_detached_frame_reports_frame_detached() {
	let target = TestTarget::new();
	let manager = seeded(&target);
	target.context_created(3, "A1", None);
	target.context_created(4, "F0", None);
	let orphaned = manager.execution_context_by_id(3).unwrap();
	let main = manager.execution_context_by_id(4).unwrap();

	target.frame_detached("A");
	target.event("Runtime.executionContextDestroyed", json!({"executionContextId": 4}));

	match orphaned.evaluate("1").await.unwrap_err() {
		Error::Navigation(NavigationError::FrameDetached { frame_id }) => assert_eq!(frame_id, "A1"),
		other => panic!("unexpected error: {other:?}"),
	}
	assert!(matches!(
		main.evaluate("1").await.unwrap_err(),
		Error::ExecutionContextDestroyed { context_id: 4 }
	));
	assert_eq!(target.session().pending_commands(), 0);
}

#[tokio::test]
async fn wait_for_execution_context_resolves_on_creation() {
	let target = TestTarget::new();
	let manager = seeded(&target);
	let frame = manager.frame("A").unwrap();

	let waiting = {
		let manager = Arc::clone(&manager);
		let frame = frame.clone();
		tokio::spawn(async move {
			manager
				.wait_for_execution_context(&frame, World::utility(), Some(Duration::from_secs(5)))
				.await
		})
	};
	tokio::task::yield_now().await;
	target.context_created(8, "A", None);
	target.context_created(9, "A", Some(UTILITY_WORLD_NAME));

	let context = waiting.await.unwrap().unwrap();
	assert_eq!(context.id(), 9);
	assert_eq!(manager.listener_count(), 0);
}

#[tokio::test]
async fn wait_for_execution_context_fails_on_detach() {
	let target = TestTarget::new();
	let manager = seeded(&target);
	let frame = manager.frame("A1").unwrap();

	let waiting = {
		let manager = Arc::clone(&manager);
		let frame = frame.clone();
		tokio::spawn(async move { manager.wait_for_execution_context(&frame, World::Main, None).await })
	};
	tokio::task::yield_now().await;
	target.frame_detached("A");

	match waiting.await.unwrap().unwrap_err() {
		Error::Navigation(NavigationError::FrameDetached { frame_id }) => assert_eq!(frame_id, "A1"),
		other => panic!("unexpected error: {other:?}"),
	}

	let err = manager
		.wait_for_execution_context(&frame, World::Main, None)
		.await
		.unwrap_err();
	assert!(err.is_navigation());
}

#[tokio::test(start_paused = true)]
async fn wait_for_execution_context_times_out() {
	let target = TestTarget::new();
	let manager = seeded(&target);
	let frame = manager.main_frame().unwrap();

	let err = manager
		.wait_for_execution_context(&frame, World::Main, Some(Duration::from_millis(10)))
		.await
		.unwrap_err();

	assert!(err.is_timeout());
	assert!(err.to_string().contains("main execution context of frame F0"));
	assert_eq!(manager.listener_count(), 0);
}

#[tokio::test]
async fn main_frame_replacement_keeps_handle() {
	let target = TestTarget::new();
	let manager = seeded(&target);
	let main = manager.main_frame().unwrap();

	target.frame_navigated("F9", None, "L9", "https://other.test/");

	let replaced = manager.main_frame().unwrap();
	assert!(replaced.ptr_eq(&main));
	assert_eq!(main.id(), "F9");
	assert!(manager.frame("F0").is_none());
	assert!(manager.frame("A").is_none());
	assert_eq!(ids(&manager.frames()), vec!["F9"]);
}

#[tokio::test]
async fn target_crash_is_reported() {
	let target = TestTarget::new();
	let manager = seeded(&target);
	let (_subscription, seen) = record(&manager);

	target.event("Inspector.targetCrashed", json!({}));

	assert!(matches!(seen.lock().as_slice(), [FrameEvent::TargetCrashed]));
}

#[tokio::test]
async fn session_detach_invalidates_contexts() {
	let target = TestTarget::new();
	let manager = seeded(&target);
	target.context_created(1, "F0", None);
	let context = manager.execution_context_by_id(1).unwrap();

	target.detach();

	assert_eq!(context.state(), ContextState::Destroyed);
	assert!(manager.frame("F0").is_some());
}

#[tokio::test]
async fn malformed_payload_is_skipped() {
	let target = TestTarget::new();
	let manager = seeded(&target);

	target.event("Page.frameAttached", json!({"frameId": 7}));

	assert_eq!(ids(&manager.frames()), vec!["F0", "A", "A1"]);
}
