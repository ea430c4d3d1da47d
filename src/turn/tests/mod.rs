use std::sync::Arc;

use pretty_assertions::assert_eq;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::error::TillerError;
use crate::events::StreamEventPayload;
use crate::scheduler::ToolCallStatus;
use crate::tools::{FnTool, OutputSink, StaticApprovalPolicy, ToolSet};
use crate::turn::TurnStatus;

use support::*;

fn demo_tools() -> Arc<ToolSet> {
    Arc::new(
        ToolSet::new()
            .register(Arc::new(FnTool::new(
                "list_directory",
                |_args, _output: OutputSink, _cancel| async move {
                    Ok(json!(["config.json", "notes.md"]))
                },
            )))
            .register(Arc::new(FnTool::new(
                "read_file",
                |args: serde_json::Value, _output: OutputSink, _cancel| async move {
                    Ok(json!({ "path": args["path"], "contents": "{}" }))
                },
            )))
            .register(Arc::new(FnTool::new(
                "echo",
                |args, _output: OutputSink, _cancel| async move { Ok(args) },
            )))
            .register(Arc::new(FnTool::new(
                "sleepy",
                |_args, _output: OutputSink, cancel: CancellationToken| async move {
                    cancel.cancelled().await;
                    Err(TillerError::execution("sleepy", "interrupted"))
                },
            ))),
    )
}

fn approve_all() -> Arc<StaticApprovalPolicy> {
    Arc::new(StaticApprovalPolicy::approve_all())
}

#[tokio::test]
async fn text_only_turn_emits_content_then_complete() {
    let mut fx = fixture(
        vec![vec![
            text("Hello"),
            thought("nothing to do here"),
            text_done(" world"),
            turn_end(),
        ]],
        demo_tools(),
        approve_all(),
        EngineConfig::default(),
    );
    let handle = fx.start("hi");
    let result = handle.wait().await;
    assert_eq!(result.status, TurnStatus::Completed);
    assert!(fx.stream.is_closed());

    let events = drain_events(&mut fx.frames);
    let kinds: Vec<_> = events.iter().map(|e| payload_kind(&e.payload)).collect();
    assert_eq!(kinds, vec!["content", "thought", "content", "complete"]);
    // Partial/complete framing is preserved on the wire.
    assert_eq!(
        events
            .iter()
            .filter_map(|e| match &e.payload {
                StreamEventPayload::Content { done, .. } => Some(*done),
                _ => None,
            })
            .collect::<Vec<_>>(),
        vec![false, true]
    );
}

#[tokio::test]
async fn tool_batch_results_feed_the_next_round_trip() {
    let mut fx = fixture(
        vec![
            vec![
                text("Listing files, then reading the config."),
                tool_call("call-1", "list_directory", json!({ "path": "." })),
                tool_call("call-2", "read_file", json!({ "path": "config.json" })),
                turn_end(),
            ],
            vec![text_done("Here is what I found."), turn_end()],
        ],
        demo_tools(),
        Arc::new(StaticApprovalPolicy::gating(["read_file"])),
        EngineConfig::default(),
    );
    let handle = fx.start("list files then read config.json");

    let scheduler = fx.scheduler.clone();
    wait_until(move || {
        scheduler
            .calls()
            .iter()
            .any(|call| call.status == ToolCallStatus::AwaitingApproval)
    })
    .await;
    fx.scheduler
        .resolve_confirmation(
            "call-2",
            crate::scheduler::ConfirmationOutcome::Cancel,
            CancellationToken::new(),
        )
        .unwrap();

    let result = handle.wait().await;
    assert_eq!(result.status, TurnStatus::Completed);

    // Both results went back into the second round-trip, in batch order.
    let outbound = fx.outbound.lock().unwrap();
    assert_eq!(outbound.len(), 2);
    let results = &outbound[1].tool_results;
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].call_id, "call-1");
    assert!(!results[0].is_error);
    assert_eq!(results[1].call_id, "call-2");
    assert!(results[1].is_error);

    let events = drain_events(&mut fx.frames);
    // The rejected call never produced execution output.
    assert!(!events.iter().any(|e| matches!(
        &e.payload,
        StreamEventPayload::ToolExecution { call_id, .. } if call_id == "call-2"
    )));
    assert_eq!(payload_kind(&events.last().unwrap().payload), "complete");
}

#[tokio::test]
async fn session_stream_error_fails_the_turn() {
    let mut fx = fixture(
        vec![vec![text("partial"), stream_error("upstream reset")]],
        demo_tools(),
        approve_all(),
        EngineConfig::default(),
    );
    let handle = fx.start("hi");
    let result = handle.wait().await;
    assert_eq!(result.status, TurnStatus::Failed);
    assert!(result.error.unwrap().contains("upstream reset"));

    let events = drain_events(&mut fx.frames);
    let terminal: Vec<_> = events
        .iter()
        .filter(|e| e.payload.is_terminal())
        .collect();
    assert_eq!(terminal.len(), 1);
    assert_eq!(payload_kind(&terminal[0].payload), "error");
    assert!(fx.stream.is_closed());
}

#[tokio::test]
async fn provider_failure_fails_the_turn() {
    let mut fx = failing_provider_fixture(EngineConfig::default());
    let handle = fx.start("hi");
    let result = handle.wait().await;
    assert_eq!(result.status, TurnStatus::Failed);
    assert!(result.error.unwrap().contains("session unavailable"));

    let events = drain_events(&mut fx.frames);
    assert_eq!(events.len(), 1);
    assert_eq!(payload_kind(&events[0].payload), "error");
}

#[tokio::test]
async fn abort_during_execution_cancels_call_and_closes_once() {
    let mut fx = fixture(
        vec![vec![
            tool_call("call-1", "sleepy", json!({})),
            turn_end(),
        ]],
        demo_tools(),
        approve_all(),
        EngineConfig::default(),
    );
    let handle = fx.start("hi");

    let scheduler = fx.scheduler.clone();
    wait_until(move || {
        scheduler
            .calls()
            .iter()
            .any(|call| call.status == ToolCallStatus::Executing)
    })
    .await;
    assert!(handle.abort());
    let result = handle.wait().await;
    assert_eq!(result.status, TurnStatus::Cancelled);
    assert!(fx.stream.is_closed());
    assert!(!fx.scheduler.has_active_batch());

    // Give the execution task its chance to race a duplicate completion.
    tokio::task::yield_now().await;
    let events = drain_events(&mut fx.frames);
    let call_results = events
        .iter()
        .filter(|e| matches!(
            &e.payload,
            StreamEventPayload::ToolResult { call_id, status, .. }
                if call_id == "call-1" && *status == ToolCallStatus::Cancelled
        ))
        .count();
    assert_eq!(call_results, 1);
    let terminal: Vec<_> = events
        .iter()
        .filter(|e| e.payload.is_terminal())
        .collect();
    assert_eq!(terminal.len(), 1);
    assert_eq!(payload_kind(&terminal[0].payload), "error");
}

#[tokio::test(start_paused = true)]
async fn idle_agent_stream_times_out() {
    let mut fx = fixture(
        vec![vec![text("thinking"), hang()]],
        demo_tools(),
        approve_all(),
        EngineConfig::default().with_stream_idle_timeout_ms(50),
    );
    let handle = fx.start("hi");
    let result = handle.wait().await;
    assert_eq!(result.status, TurnStatus::Failed);
    assert!(result.error.unwrap().contains("idle timeout"));

    let events = drain_events(&mut fx.frames);
    assert_eq!(payload_kind(&events.last().unwrap().payload), "error");
}

#[tokio::test]
async fn round_trip_limit_ends_a_looping_turn() {
    let looping_round_trip = || {
        vec![
            tool_call("call-1", "echo", json!({ "n": 1 })),
            turn_end(),
        ]
    };
    let mut fx = fixture(
        vec![looping_round_trip(), looping_round_trip(), looping_round_trip()],
        demo_tools(),
        approve_all(),
        EngineConfig::default().with_max_round_trips(2),
    );
    let handle = fx.start("hi");
    let result = handle.wait().await;
    assert_eq!(result.status, TurnStatus::Failed);
    assert!(result.error.unwrap().contains("max round trips"));
    assert_eq!(fx.outbound.lock().unwrap().len(), 2);

    let events = drain_events(&mut fx.frames);
    assert_eq!(payload_kind(&events.last().unwrap().payload), "error");
}
