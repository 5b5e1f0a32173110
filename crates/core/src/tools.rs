//! Client Tool Call Bridge
//!
//! The remote agent can ask the client to run a named local capability. This
//! module keeps the registry of those capabilities and turns every accepted
//! request into a future that resolves to exactly one [`ToolCallResult`]
//! carrying the request's `tool_call_id`, whatever the handler does: returns,
//! fails, panics, or hangs past the timeout.

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default bound on how long a handler may take before the call is failed.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(15);

/// Parameters of a tool call, as sent by the agent.
pub type ToolParameters = Map<String, Value>;

/// A remote request to run a local tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub tool_name: String,
    pub tool_call_id: String,
    #[serde(default)]
    pub parameters: ToolParameters,
}

/// The answer to a [`ToolCallRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallResult {
    pub tool_call_id: String,
    pub result: String,
    pub is_error: bool,
}

impl ToolCallResult {
    pub fn ok(tool_call_id: impl Into<String>, result: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            result: result.into(),
            is_error: false,
        }
    }

    pub fn error(tool_call_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            result: message.into(),
            is_error: true,
        }
    }
}

/// A local capability the agent can invoke by name.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, parameters: ToolParameters) -> anyhow::Result<String>;
}

#[async_trait]
impl<F, Fut> ToolHandler for F
where
    F: Fn(ToolParameters) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<String>> + Send + 'static,
{
    async fn call(&self, parameters: ToolParameters) -> anyhow::Result<String> {
        (self)(parameters).await
    }
}

/// An accepted tool call. Awaiting it always yields the call's single result.
pub struct PendingToolCall {
    pub tool_call_id: String,
    pub tool_name: String,
    future: BoxFuture<'static, ToolCallResult>,
}

impl PendingToolCall {
    pub async fn run(self) -> ToolCallResult {
        self.future.await
    }
}

/// Registry of tool handlers plus the set of calls still awaiting an answer.
pub struct ToolCallBridge {
    handlers: HashMap<String, Arc<dyn ToolHandler>>,
    in_flight: HashSet<String>,
    timeout: Duration,
}

impl ToolCallBridge {
    pub fn new(timeout: Duration) -> Self {
        Self {
            handlers: HashMap::new(),
            in_flight: HashSet::new(),
            timeout,
        }
    }

    /// Binds `tool_name` to `handler`, returning the handler it replaced.
    pub fn register_handler(
        &mut self,
        tool_name: impl Into<String>,
        handler: impl ToolHandler + 'static,
    ) -> Option<Arc<dyn ToolHandler>> {
        let tool_name = tool_name.into();
        info!(tool = %tool_name, "Registered tool handler");
        self.handlers.insert(tool_name, Arc::new(handler))
    }

    pub fn has_handler(&self, tool_name: &str) -> bool {
        self.handlers.contains_key(tool_name)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Accepts a request and returns the future producing its answer.
    ///
    /// Returns `None` when a call with the same id is already in flight, since
    /// answering it twice would break the one-result-per-call contract.
    pub fn accept(&mut self, request: ToolCallRequest) -> Option<PendingToolCall> {
        let ToolCallRequest {
            tool_name,
            tool_call_id,
            parameters,
        } = request;

        if !self.in_flight.insert(tool_call_id.clone()) {
            warn!(tool = %tool_name, call_id = %tool_call_id, "Duplicate tool call id ignored");
            return None;
        }

        let future = match self.handlers.get(&tool_name) {
            None => {
                warn!(tool = %tool_name, call_id = %tool_call_id, "No handler registered for tool");
                let result = ToolCallResult::error(&tool_call_id, format!("Unknown tool: {tool_name}"));
                futures::future::ready(result).boxed()
            }
            Some(handler) => {
                let handler = Arc::clone(handler);
                let call_id = tool_call_id.clone();
                let timeout = self.timeout;
                async move {
                    let invocation = AssertUnwindSafe(handler.call(parameters)).catch_unwind();
                    match tokio::time::timeout(timeout, invocation).await {
                        Ok(Ok(Ok(result))) => ToolCallResult::ok(call_id, result),
                        Ok(Ok(Err(e))) => ToolCallResult::error(call_id, format!("{e:#}")),
                        Ok(Err(_)) => ToolCallResult::error(call_id, "Tool handler panicked"),
                        Err(_) => ToolCallResult::error(
                            call_id,
                            format!("Tool call timed out after {}ms", timeout.as_millis()),
                        ),
                    }
                }
                .boxed()
            }
        };

        debug!(tool = %tool_name, call_id = %tool_call_id, "Tool call accepted");
        Some(PendingToolCall {
            tool_call_id,
            tool_name,
            future,
        })
    }

    /// Marks a call as answered. Returns `false` if the call was not in
    /// flight, in which case its result must not be sent.
    pub fn complete(&mut self, tool_call_id: &str) -> bool {
        self.in_flight.remove(tool_call_id)
    }

    /// Forgets every in-flight call; their late results will be dropped.
    pub fn cancel_all(&mut self) {
        if !self.in_flight.is_empty() {
            info!(count = self.in_flight.len(), "Abandoning in-flight tool calls");
        }
        self.in_flight.clear();
    }
}

impl Default for ToolCallBridge {
    fn default() -> Self {
        Self::new(DEFAULT_TOOL_TIMEOUT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    fn request(tool_name: &str, call_id: &str) -> ToolCallRequest {
        ToolCallRequest {
            tool_name: tool_name.into(),
            tool_call_id: call_id.into(),
            parameters: Map::new(),
        }
    }

    #[tokio::test]
    async fn test_handler_success() {
        let mut bridge = ToolCallBridge::default();
        bridge.register_handler("get_form", |_params: ToolParameters| async {
            anyhow::Ok("good form".to_string())
        });

        let pending = bridge.accept(request("get_form", "abc")).unwrap();
        assert_eq!(bridge.in_flight(), 1);
        let result = pending.run().await;
        assert_eq!(result, ToolCallResult::ok("abc", "good form"));
        assert!(bridge.complete("abc"));
        assert_eq!(bridge.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_handler_error_becomes_error_result() {
        let mut bridge = ToolCallBridge::default();
        bridge.register_handler("get_form", |_params: ToolParameters| async {
            Err::<String, _>(anyhow!("timeout"))
        });

        let result = bridge.accept(request("get_form", "abc")).unwrap().run().await;
        assert_eq!(result, ToolCallResult::error("abc", "timeout"));
    }

    #[tokio::test]
    async fn test_unknown_tool_answers_immediately() {
        let mut bridge = ToolCallBridge::default();
        let result = bridge.accept(request("count_reps", "x1")).unwrap().run().await;
        assert!(result.is_error);
        assert_eq!(result.tool_call_id, "x1");
        assert_eq!(result.result, "Unknown tool: count_reps");
    }

    #[tokio::test]
    async fn test_panicking_handler_is_contained() {
        let mut bridge = ToolCallBridge::default();
        bridge.register_handler("boom", |_params: ToolParameters| async {
            if true {
                panic!("handler bug");
            }
            anyhow::Ok(String::new())
        });
        let result = bridge.accept(request("boom", "p1")).unwrap().run().await;
        assert_eq!(result, ToolCallResult::error("p1", "Tool handler panicked"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_handler_times_out() {
        let mut bridge = ToolCallBridge::new(Duration::from_millis(500));
        bridge.register_handler("slow", |_params: ToolParameters| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            anyhow::Ok("late".to_string())
        });
        let result = bridge.accept(request("slow", "s1")).unwrap().run().await;
        assert_eq!(
            result,
            ToolCallResult::error("s1", "Tool call timed out after 500ms")
        );
    }

    #[tokio::test]
    async fn test_duplicate_call_id_is_rejected_while_in_flight() {
        let mut bridge = ToolCallBridge::default();
        bridge.register_handler("get_form", |_params: ToolParameters| async {
            anyhow::Ok("ok".to_string())
        });
        let first = bridge.accept(request("get_form", "dup")).unwrap();
        assert!(bridge.accept(request("get_form", "dup")).is_none());

        let _ = first.run().await;
        assert!(bridge.complete("dup"));
        assert!(!bridge.complete("dup"));

        // Once answered, the id may be reused.
        assert!(bridge.accept(request("get_form", "dup")).is_some());
    }

    #[tokio::test]
    async fn test_parameters_reach_handler() {
        let mut bridge = ToolCallBridge::default();
        bridge.register_handler("echo", |params: ToolParameters| async move {
            anyhow::Ok(params
                .get("exercise")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string())
        });
        let mut req = request("echo", "e1");
        req.parameters
            .insert("exercise".into(), Value::String("lunge".into()));
        let result = bridge.accept(req).unwrap().run().await;
        assert_eq!(result.result, "lunge");
    }

    #[test]
    fn test_cancel_all_drops_in_flight() {
        let mut bridge = ToolCallBridge::default();
        let _pending = bridge.accept(request("missing", "c1")).unwrap();
        bridge.cancel_all();
        assert!(!bridge.complete("c1"));
    }

    #[test]
    fn test_register_replaces_handler() {
        let mut bridge = ToolCallBridge::default();
        assert!(
            bridge
                .register_handler("t", |_p: ToolParameters| async { anyhow::Ok(String::new()) })
                .is_none()
        );
        assert!(
            bridge
                .register_handler("t", |_p: ToolParameters| async { anyhow::Ok(String::new()) })
                .is_some()
        );
        assert!(bridge.has_handler("t"));
    }
}
