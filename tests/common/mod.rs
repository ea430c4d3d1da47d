//! Shared fixtures for integration tests, built on the public API only.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use tiller::prelude::*;

/// One scripted item of a stubbed round-trip.
#[derive(Clone)]
pub enum ScriptFragment {
    Frag(ResponseFragment),
    /// Stream never yields again.
    Hang,
}

pub fn text_done(text: &str) -> ScriptFragment {
    ScriptFragment::Frag(ResponseFragment::Text {
        text: text.to_string(),
        done: true,
    })
}

pub fn tool_call(call_id: &str, name: &str, arguments: serde_json::Value) -> ScriptFragment {
    ScriptFragment::Frag(ResponseFragment::ToolCall(ToolCallRequest::new(
        call_id, name, arguments,
    )))
}

pub fn turn_end() -> ScriptFragment {
    ScriptFragment::Frag(ResponseFragment::TurnEnd)
}

pub fn hang() -> ScriptFragment {
    ScriptFragment::Hang
}

/// Scripted agent session; one script per round-trip, outbound messages
/// recorded for assertions.
pub struct ScriptedSession {
    scripts: Vec<Vec<ScriptFragment>>,
    calls: AtomicUsize,
    pub outbound: Arc<Mutex<Vec<OutboundMessage>>>,
}

impl ScriptedSession {
    pub fn new(scripts: Vec<Vec<ScriptFragment>>) -> Arc<Self> {
        Arc::new(Self {
            scripts,
            calls: AtomicUsize::new(0),
            outbound: Arc::new(Mutex::new(Vec::new())),
        })
    }
}

#[async_trait]
impl Session for ScriptedSession {
    async fn send_message(
        &self,
        message: OutboundMessage,
        _cancel: CancellationToken,
    ) -> Result<FragmentStream> {
        self.outbound.lock().unwrap().push(message);
        let index = self.calls.fetch_add(1, Ordering::SeqCst);
        let script = self
            .scripts
            .get(index)
            .cloned()
            .unwrap_or_else(|| vec![turn_end()]);

        let mut items: Vec<Result<ResponseFragment>> = Vec::new();
        let mut hangs = false;
        for fragment in script {
            match fragment {
                ScriptFragment::Frag(fragment) => items.push(Ok(fragment)),
                ScriptFragment::Hang => {
                    hangs = true;
                    break;
                }
            }
        }
        let base = tokio_stream::iter(items);
        if hangs {
            Ok(base.chain(futures::stream::pending()).boxed())
        } else {
            Ok(base.boxed())
        }
    }
}

pub struct ScriptedProvider {
    session: Arc<ScriptedSession>,
}

impl ScriptedProvider {
    pub fn new(session: Arc<ScriptedSession>) -> Arc<Self> {
        Arc::new(Self { session })
    }
}

#[async_trait]
impl SessionProvider for ScriptedProvider {
    async fn get_session(&self, _workspace: &Path) -> Result<Arc<dyn Session>> {
        Ok(self.session.clone())
    }
}

pub fn demo_tools() -> Arc<ToolSet> {
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
            ))),
    )
}

pub fn decode_frames(frames: &[Vec<u8>]) -> Vec<StreamEvent> {
    frames
        .iter()
        .map(|frame| tiller::events::decode(frame).unwrap())
        .collect()
}

/// Spin the runtime until `predicate` holds.
pub async fn wait_until(mut predicate: impl FnMut() -> bool) {
    for _ in 0..10_000 {
        if predicate() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition not reached");
}
