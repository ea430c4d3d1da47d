//! Tool execution collaborator contracts and a registry-backed executor.

pub mod approval;

pub use approval::{ApprovalPolicy, StaticApprovalPolicy};

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, TillerError};
use crate::scheduler::ToolCallRequest;

/// Accepts incremental execution output. Each chunk is appended to the
/// owning call's accumulated output and forwarded to the client.
pub type OutputSink = Arc<dyn Fn(String) + Send + Sync>;

/// Executes approved tool calls on behalf of the scheduler.
///
/// Implementations must observe `cancel` and unwind promptly rather than
/// completing normally once it fires.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(
        &self,
        request: &ToolCallRequest,
        output: OutputSink,
        cancel: CancellationToken,
    ) -> Result<serde_json::Value>;
}

/// A single named tool, registrable in a [`ToolSet`].
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name (must match what the agent calls).
    fn name(&self) -> &str;

    async fn run(
        &self,
        arguments: &serde_json::Value,
        output: OutputSink,
        cancel: CancellationToken,
    ) -> Result<serde_json::Value>;
}

type ToolHandler = dyn Fn(
        serde_json::Value,
        OutputSink,
        CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<serde_json::Value>> + Send>>
    + Send
    + Sync;

/// Closure-based tool for quick registration.
pub struct FnTool {
    name: String,
    handler: Arc<ToolHandler>,
}

impl FnTool {
    pub fn new<F, Fut>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(serde_json::Value, OutputSink, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<serde_json::Value>> + Send + 'static,
    {
        Self {
            name: name.into(),
            handler: Arc::new(move |args, output, cancel| {
                Box::pin(handler(args, output, cancel))
            }),
        }
    }
}

#[async_trait]
impl Tool for FnTool {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(
        &self,
        arguments: &serde_json::Value,
        output: OutputSink,
        cancel: CancellationToken,
    ) -> Result<serde_json::Value> {
        (self.handler)(arguments.clone(), output, cancel).await
    }
}

/// Name-dispatching executor over registered tools.
#[derive(Default)]
pub struct ToolSet {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.insert(tool.name().to_string(), tool);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }
}

#[async_trait]
impl ToolExecutor for ToolSet {
    async fn execute(
        &self,
        request: &ToolCallRequest,
        output: OutputSink,
        cancel: CancellationToken,
    ) -> Result<serde_json::Value> {
        let Some(tool) = self.tools.get(&request.name) else {
            return Err(TillerError::execution(
                &request.name,
                format!("tool '{}' not registered", request.name),
            ));
        };
        tool.run(&request.arguments, output, cancel).await
    }
}
