//! MCP JSON-RPC 2.0 dispatch

use futures::FutureExt;
use serde_json::{json, Value};
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::protocol::{Call, InboundFrame, JsonRpcResponse, ErrorReason, PROTOCOL_VERSION};
use super::registry::{CallContext, CapabilityKind, CapabilityRegistry, Resolved};
use super::session::{SessionId, SessionTransport};
use crate::config::UpstreamConfig;
use crate::{Error, Result};

/// Name and version reported in `initialize`
#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

impl Default for ServerInfo {
    fn default() -> Self {
        Self {
            name: "mcprelay".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Resolves inbound frames against the registry and produces outbound frames
pub struct Dispatcher {
    registry: Arc<CapabilityRegistry>,
    server_info: ServerInfo,
    handler_timeout: Duration,
    http: reqwest::Client,
    upstream: Arc<UpstreamConfig>,
}

impl Dispatcher {
    pub fn new(registry: Arc<CapabilityRegistry>, handler_timeout: Duration) -> Self {
        Self {
            registry,
            server_info: ServerInfo::default(),
            handler_timeout,
            http: reqwest::Client::new(),
            upstream: Arc::new(UpstreamConfig::default()),
        }
    }

    pub fn with_server_info(mut self, server_info: ServerInfo) -> Self {
        self.server_info = server_info;
        self
    }

    pub fn with_upstream(mut self, upstream: UpstreamConfig, http: reqwest::Client) -> Self {
        self.upstream = Arc::new(upstream);
        self.http = http;
        self
    }

    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    pub fn server_info(&self) -> &ServerInfo {
        &self.server_info
    }

    /// Build the per-call context for a session
    pub fn context(&self, session_id: &str, credential: Option<String>) -> CallContext {
        CallContext {
            session_id: session_id.to_string(),
            credential,
            http: self.http.clone(),
            upstream: self.upstream.clone(),
        }
    }

    /// Dispatch one frame. Requests always yield exactly one response.
    /// Notifications run the same way but their outcome is only logged.
    pub async fn dispatch(&self, frame: &InboundFrame, ctx: &CallContext) -> Option<JsonRpcResponse> {
        let outcome = match frame.call() {
            Ok(call) => self.run(call, ctx).await,
            Err(e) => Err(e),
        };

        if frame.is_notification() {
            match &outcome {
                Ok(_) => tracing::debug!(method = %frame.method, "Notification handled"),
                Err(e) => tracing::debug!(method = %frame.method, error = %e, "Notification failed"),
            }
            return None;
        }
        let id = frame.id.clone();

        let response = match outcome {
            Ok(result) => {
                metrics::counter!("relay_dispatch_total", "method" => frame.method.clone(), "outcome" => "ok")
                    .increment(1);
                JsonRpcResponse::success(id, result)
            }
            Err(e) => {
                let reason = ErrorReason::of(&e);
                tracing::debug!(method = %frame.method, reason = reason.as_str(), error = %e, "Dispatch failed");
                metrics::counter!("relay_dispatch_total", "method" => frame.method.clone(), "outcome" => reason.as_str())
                    .increment(1);
                JsonRpcResponse::failure(id, &e)
            }
        };
        Some(response)
    }

    async fn run(&self, call: Call, ctx: &CallContext) -> Result<Value> {
        match call {
            Call::Initialize => Ok(self.initialize_result()),
            Call::Ping => Ok(json!({})),
            Call::ListTools => Ok(json!({ "tools": self.registry.tools_list() })),
            Call::ListPrompts => Ok(json!({ "prompts": self.registry.prompts_list() })),
            Call::ListResourceTemplates => Ok(json!({
                "resourceTemplates": self.registry.resource_templates_list()
            })),
            Call::ListResources { template: None } => self.list_resources(ctx).await,
            Call::ListResources {
                template: Some(name),
            } => {
                let entry = self.registry.listable_resource(&name)?;
                let resources = self.guarded(entry.handler.list(ctx)).await?;
                Ok(json!({ "resources": resources }))
            }
            Call::Invoke {
                kind,
                target,
                arguments,
            } => self.invoke(kind, &target, arguments, ctx).await,
            Call::Unknown(method) => Err(Error::MethodNotFound(method)),
        }
    }

    fn initialize_result(&self) -> Value {
        json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {
                "tools": {},
                "resources": {},
                "prompts": {}
            },
            "serverInfo": {
                "name": self.server_info.name,
                "version": self.server_info.version
            }
        })
    }

    async fn list_resources(&self, ctx: &CallContext) -> Result<Value> {
        let mut resources = Vec::new();
        for entry in self.registry.listable_resources() {
            let listed = self.guarded(entry.handler.list(ctx)).await?;
            resources.extend(listed);
        }
        Ok(json!({ "resources": resources }))
    }

    async fn invoke(
        &self,
        kind: CapabilityKind,
        target: &str,
        arguments: Value,
        ctx: &CallContext,
    ) -> Result<Value> {
        match self.registry.resolve(kind, target)? {
            Resolved::Tool(entry) => {
                let params = entry.schema.validate(&arguments)?;
                let result = self.guarded(entry.handler.call(params, ctx)).await?;
                Ok(serde_json::to_value(result)?)
            }
            Resolved::Prompt(entry) => {
                let params = entry.schema.validate(&arguments)?;
                let result = self.guarded(entry.handler.get(params, ctx)).await?;
                Ok(serde_json::to_value(result)?)
            }
            Resolved::Resource { entry, bindings } => {
                let bindings: serde_json::Map<String, Value> = bindings
                    .into_iter()
                    .map(|(k, v)| (k, Value::String(v)))
                    .collect();
                let vars = entry.schema.validate(&Value::Object(bindings))?;
                let result = self.guarded(entry.handler.read(target, vars, ctx)).await?;
                Ok(serde_json::to_value(result)?)
            }
        }
    }

    /// Run a handler future with the timeout, converting panics and errors
    /// into handler failures
    async fn guarded<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let fut = AssertUnwindSafe(fut).catch_unwind();
        match tokio::time::timeout(self.handler_timeout, fut).await {
            Err(_) => Err(Error::Timeout(self.handler_timeout.as_millis() as u64)),
            Ok(Err(panic)) => {
                let message = panic_message(panic.as_ref());
                tracing::error!(panic = %message, "Handler panicked");
                Err(Error::Handler(format!("Handler panicked: {}", message)))
            }
            Ok(Ok(Err(e @ (Error::Handler(_) | Error::NotSupported(_))))) => Err(e),
            Ok(Ok(Err(e))) => Err(Error::Handler(e.to_string())),
            Ok(Ok(Ok(value))) => Ok(value),
        }
    }

    /// Spawn the dispatch loop for one session.
    ///
    /// Frames are processed one at a time, so responses leave in the order
    /// requests arrived. The loop ends when the session's inbox closes or a
    /// response can no longer be written.
    pub fn spawn_loop(
        self: &Arc<Self>,
        transport: Arc<SessionTransport>,
        session_id: SessionId,
        mut inbox: mpsc::UnboundedReceiver<InboundFrame>,
    ) -> JoinHandle<()> {
        let dispatcher = self.clone();
        tokio::spawn(async move {
            while let Some(frame) = inbox.recv().await {
                let ctx = dispatcher.context(&session_id, transport.credential(&session_id));
                let Some(response) = dispatcher.dispatch(&frame, &ctx).await else {
                    continue;
                };

                if let Err(e) = transport.send(&session_id, &response).await {
                    tracing::warn!(session = %session_id, method = %frame.method, error = %e, "Dropping response");
                    break;
                }
            }
            tracing::debug!(session = %session_id, "Dispatch loop finished");
        })
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::capabilities::register_echo_capabilities;
    use crate::mcp::protocol::{ResourceContents, ResourceDescriptor, ResourceResult, ToolResult};
    use crate::mcp::registry::{McpResource, McpTool};
    use crate::mcp::schema::{InputSchema, ValidatedParams};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FailingTool;

    #[async_trait]
    impl McpTool for FailingTool {
        fn name(&self) -> &str {
            "fail"
        }

        fn description(&self) -> &str {
            "Always fails"
        }

        fn input_schema(&self) -> InputSchema {
            InputSchema::new()
        }

        async fn call(&self, _params: ValidatedParams, _ctx: &CallContext) -> Result<ToolResult> {
            Err(Error::handler("upstream exploded"))
        }
    }

    struct PanickingTool;

    #[async_trait]
    impl McpTool for PanickingTool {
        fn name(&self) -> &str {
            "panic"
        }

        fn description(&self) -> &str {
            "Panics"
        }

        fn input_schema(&self) -> InputSchema {
            InputSchema::new()
        }

        async fn call(&self, _params: ValidatedParams, _ctx: &CallContext) -> Result<ToolResult> {
            panic!("boom");
        }
    }

    struct SlowTool;

    #[async_trait]
    impl McpTool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }

        fn description(&self) -> &str {
            "Sleeps past the timeout"
        }

        fn input_schema(&self) -> InputSchema {
            InputSchema::new()
        }

        async fn call(&self, _params: ValidatedParams, _ctx: &CallContext) -> Result<ToolResult> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(ToolResult::text("late"))
        }
    }

    struct CountingTool(Arc<AtomicUsize>);

    #[async_trait]
    impl McpTool for CountingTool {
        fn name(&self) -> &str {
            "count"
        }

        fn description(&self) -> &str {
            "Counts invocations"
        }

        fn input_schema(&self) -> InputSchema {
            InputSchema::new().param(crate::mcp::schema::ParamSpec::required(
                "n",
                crate::mcp::schema::ParamType::Integer,
            ))
        }

        async fn call(&self, _params: ValidatedParams, _ctx: &CallContext) -> Result<ToolResult> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(ToolResult::text("counted"))
        }
    }

    struct DocsResource;

    #[async_trait]
    impl McpResource for DocsResource {
        fn name(&self) -> &str {
            "docs"
        }

        fn description(&self) -> &str {
            "Listable documents"
        }

        fn uri_template(&self) -> &str {
            "docs://{page}"
        }

        fn supports_list(&self) -> bool {
            true
        }

        async fn list(&self, _ctx: &CallContext) -> Result<Vec<ResourceDescriptor>> {
            Ok(vec![ResourceDescriptor {
                uri: "docs://intro".to_string(),
                name: "intro".to_string(),
                description: None,
                mime_type: None,
            }])
        }

        async fn read(
            &self,
            uri: &str,
            vars: ValidatedParams,
            _ctx: &CallContext,
        ) -> Result<ResourceResult> {
            Ok(ResourceResult {
                contents: vec![ResourceContents {
                    uri: uri.to_string(),
                    mime_type: None,
                    text: vars.str("page").unwrap_or_default().to_string(),
                }],
            })
        }
    }

    fn dispatcher_with(extra: Vec<Arc<dyn McpTool>>) -> Dispatcher {
        let mut registry = CapabilityRegistry::new();
        register_echo_capabilities(&mut registry).unwrap();
        for tool in extra {
            registry.register_tool(tool).unwrap();
        }
        Dispatcher::new(Arc::new(registry), Duration::from_millis(200))
    }

    fn request(id: i64, method: &str, params: Value) -> InboundFrame {
        InboundFrame {
            session_id: "s1".to_string(),
            id: Some(json!(id)),
            method: method.to_string(),
            params,
        }
    }

    #[tokio::test]
    async fn test_tool_echo() {
        let d = dispatcher_with(vec![]);
        let ctx = d.context("s1", None);
        let resp = d
            .dispatch(
                &request(1, "tools/call", json!({"name": "echo", "arguments": {"message": "hi"}})),
                &ctx,
            )
            .await
            .unwrap();
        assert!(!resp.is_error());
        assert_eq!(resp.result.unwrap()["content"][0]["text"], "Tool echo: hi");
    }

    #[tokio::test]
    async fn test_unknown_tool_is_not_found() {
        let d = dispatcher_with(vec![]);
        let ctx = d.context("s1", None);
        let resp = d
            .dispatch(&request(1, "tools/call", json!({"name": "nope"})), &ctx)
            .await
            .unwrap();
        assert_eq!(resp.reason(), Some("NotFound"));
        assert!(resp.error.unwrap().message.contains("nope"));
    }

    #[tokio::test]
    async fn test_invalid_params_never_reach_handler() {
        let calls = Arc::new(AtomicUsize::new(0));
        let d = dispatcher_with(vec![Arc::new(CountingTool(calls.clone()))]);
        let ctx = d.context("s1", None);

        let missing = d
            .dispatch(&request(1, "tools/call", json!({"name": "count", "arguments": {}})), &ctx)
            .await
            .unwrap();
        assert_eq!(missing.reason(), Some("InvalidParams"));

        let wrong_type = d
            .dispatch(
                &request(2, "tools/call", json!({"name": "count", "arguments": {"n": "one"}})),
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(wrong_type.reason(), Some("InvalidParams"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let ok = d
            .dispatch(&request(3, "tools/call", json!({"name": "count", "arguments": {"n": 1}})), &ctx)
            .await
            .unwrap();
        assert!(!ok.is_error());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_handler_error_and_panic_are_isolated() {
        let d = dispatcher_with(vec![Arc::new(FailingTool), Arc::new(PanickingTool)]);
        let ctx = d.context("s1", None);

        let failed = d
            .dispatch(&request(1, "tools/call", json!({"name": "fail"})), &ctx)
            .await
            .unwrap();
        assert_eq!(failed.reason(), Some("HandlerError"));
        assert_eq!(failed.error.unwrap().message, "upstream exploded");

        let panicked = d
            .dispatch(&request(2, "tools/call", json!({"name": "panic"})), &ctx)
            .await
            .unwrap();
        assert_eq!(panicked.reason(), Some("HandlerError"));
        assert!(panicked.error.unwrap().message.contains("boom"));

        let next = d
            .dispatch(&request(3, "tools/call", json!({"name": "echo", "arguments": {"message": "still here"}})), &ctx)
            .await
            .unwrap();
        assert!(!next.is_error());
    }

    #[tokio::test]
    async fn test_handler_timeout() {
        let d = dispatcher_with(vec![Arc::new(SlowTool)]);
        let ctx = d.context("s1", None);
        let resp = d
            .dispatch(&request(1, "tools/call", json!({"name": "slow"})), &ctx)
            .await
            .unwrap();
        assert_eq!(resp.reason(), Some("Timeout"));
    }

    #[tokio::test]
    async fn test_resource_template_binding() {
        let d = dispatcher_with(vec![]);
        let ctx = d.context("s1", None);
        let resp = d
            .dispatch(&request(1, "resources/read", json!({"uri": "echo://hello-world"})), &ctx)
            .await
            .unwrap();
        let result = resp.result.unwrap();
        assert_eq!(result["contents"][0]["uri"], "echo://hello-world");
        assert_eq!(result["contents"][0]["text"], "Resource echo: hello-world");
    }

    #[tokio::test]
    async fn test_prompt_get() {
        let d = dispatcher_with(vec![]);
        let ctx = d.context("s1", None);
        let resp = d
            .dispatch(
                &request(1, "prompts/get", json!({"name": "echo", "arguments": {"message": "x"}})),
                &ctx,
            )
            .await
            .unwrap();
        let result = resp.result.unwrap();
        assert_eq!(result["messages"][0]["role"], "user");
        assert_eq!(
            result["messages"][0]["content"]["text"],
            "Please process this message: x"
        );
    }

    #[tokio::test]
    async fn test_lists_and_handshake_methods() {
        let d = dispatcher_with(vec![]);
        let ctx = d.context("s1", None);

        let init = d.dispatch(&request(1, "initialize", json!({})), &ctx).await.unwrap();
        assert_eq!(init.result.unwrap()["protocolVersion"], PROTOCOL_VERSION);

        let tools = d.dispatch(&request(2, "tools/list", Value::Null), &ctx).await.unwrap();
        assert_eq!(tools.result.unwrap()["tools"][0]["name"], "echo");

        let templates = d
            .dispatch(&request(3, "resources/templates/list", Value::Null), &ctx)
            .await
            .unwrap();
        assert_eq!(
            templates.result.unwrap()["resourceTemplates"][0]["uriTemplate"],
            "echo://{message}"
        );

        let resources = d.dispatch(&request(4, "resources/list", Value::Null), &ctx).await.unwrap();
        assert_eq!(resources.result.unwrap()["resources"], json!([]));

        let unknown = d.dispatch(&request(5, "bogus", Value::Null), &ctx).await.unwrap();
        assert_eq!(unknown.reason(), Some("MethodNotFound"));
    }

    #[tokio::test]
    async fn test_notification_produces_no_frame() {
        let d = dispatcher_with(vec![]);
        let ctx = d.context("s1", None);
        let mut frame = request(1, "notifications/initialized", Value::Null);
        frame.id = None;
        assert!(d.dispatch(&frame, &ctx).await.is_none());
    }

    #[tokio::test]
    async fn test_notification_still_runs_handler() {
        let calls = Arc::new(AtomicUsize::new(0));
        let d = dispatcher_with(vec![Arc::new(CountingTool(calls.clone()))]);
        let ctx = d.context("s1", None);

        let mut frame = request(1, "tools/call", json!({"name": "count", "arguments": {"n": 1}}));
        frame.id = None;
        assert!(d.dispatch(&frame, &ctx).await.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Failures on notifications are swallowed too
        frame.params = json!({"name": "count", "arguments": {}});
        assert!(d.dispatch(&frame, &ctx).await.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_resources_list_by_template() {
        let mut registry = CapabilityRegistry::new();
        register_echo_capabilities(&mut registry).unwrap();
        registry.register_resource(Arc::new(DocsResource)).unwrap();
        let d = Dispatcher::new(Arc::new(registry), Duration::from_millis(200));
        let ctx = d.context("s1", None);

        let all = d.dispatch(&request(1, "resources/list", Value::Null), &ctx).await.unwrap();
        assert_eq!(all.result.unwrap()["resources"][0]["uri"], "docs://intro");

        let docs = d
            .dispatch(&request(2, "resources/list", json!({"template": "docs"})), &ctx)
            .await
            .unwrap();
        assert_eq!(docs.result.unwrap()["resources"][0]["name"], "intro");

        let echo = d
            .dispatch(&request(3, "resources/list", json!({"template": "echo"})), &ctx)
            .await
            .unwrap();
        assert_eq!(echo.reason(), Some("NotSupported"));

        let missing = d
            .dispatch(&request(4, "resources/list", json!({"template": "nope"})), &ctx)
            .await
            .unwrap();
        assert_eq!(missing.reason(), Some("NotFound"));
    }
}
