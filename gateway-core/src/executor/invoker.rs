//! The tool-provider boundary the executor calls through (spec.md §6):
//! `listTools`/`callTool`, consumed here as a single `call_tool` seam mirroring
//! `vector::EmbeddingProvider`'s external-collaborator shape.

use crate::error::{Error, Result};
use crate::tool::ToolId;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

/// Calls a registered tool by id with resolved JSON arguments.
///
/// Implementations tolerate providers appearing/disappearing mid-workflow;
/// a call to an unregistered tool must surface `Error::tool_unavailable`
/// rather than panicking.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    async fn call_tool(&self, tool: &ToolId, args: serde_json::Value) -> Result<serde_json::Value>;
}

/// A fixed-response invoker for tests: returns a canned result or error per
/// tool id, and records every call it received.
#[derive(Default)]
pub struct FakeInvoker {
    responses: HashMap<ToolId, Result<serde_json::Value>>,
    calls: Mutex<Vec<(ToolId, serde_json::Value)>>,
}

impl FakeInvoker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_result(mut self, tool: ToolId, value: serde_json::Value) -> Self {
        self.responses.insert(tool, Ok(value));
        self
    }

    #[must_use]
    pub fn with_error(mut self, tool: ToolId, message: impl Into<String>) -> Self {
        self.responses
            .insert(tool, Err(Error::executor_crash(message.into())));
        self
    }

    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock().expect("fake invoker lock poisoned").len()
    }
}

#[async_trait]
impl ToolInvoker for FakeInvoker {
    async fn call_tool(&self, tool: &ToolId, args: serde_json::Value) -> Result<serde_json::Value> {
        self.calls
            .lock()
            .expect("fake invoker lock poisoned")
            .push((tool.clone(), args));
        match self.responses.get(tool) {
            Some(Ok(value)) => Ok(value.clone()),
            Some(Err(_)) => Err(Error::executor_crash(format!("fake failure for {tool}"))),
            None => Err(Error::tool_unavailable(tool.to_string())),
        }
    }
}
