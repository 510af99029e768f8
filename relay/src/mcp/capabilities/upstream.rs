use async_trait::async_trait;
use std::time::Duration;

use crate::mcp::protocol::ToolResult;
use crate::mcp::registry::{CallContext, McpTool};
use crate::mcp::schema::{InputSchema, ParamSpec, ParamType, ValidatedParams};
use crate::{Error, Result};

/// GET a path on the configured upstream REST API, forwarding the session's
/// API credential, and return the body as text
pub struct UpstreamGetTool;

#[async_trait]
impl McpTool for UpstreamGetTool {
    fn name(&self) -> &str {
        "upstream_get"
    }

    fn description(&self) -> &str {
        "Fetch a path from the upstream REST API"
    }

    fn input_schema(&self) -> InputSchema {
        InputSchema::new()
            .param(
                ParamSpec::required("path", ParamType::String)
                    .describe("Path relative to the upstream base URL, e.g. /v1/items"),
            )
            .param(
                ParamSpec::optional("query", ParamType::Object)
                    .describe("Query parameters as a flat object"),
            )
    }

    async fn call(&self, params: ValidatedParams, ctx: &CallContext) -> Result<ToolResult> {
        let base = ctx
            .upstream
            .base_url
            .as_deref()
            .ok_or_else(|| Error::handler("No upstream base_url configured"))?;
        let path = params
            .str("path")
            .ok_or_else(|| Error::handler("Missing path"))?;

        let url = format!(
            "{}/{}",
            base.trim_end_matches('/'),
            path.trim_start_matches('/')
        );

        let mut request = ctx
            .http
            .get(&url)
            .timeout(Duration::from_millis(ctx.upstream.timeout_ms));

        if let Some(query) = params.get("query").and_then(|q| q.as_object()) {
            let pairs: Vec<(String, String)> = query
                .iter()
                .map(|(k, v)| {
                    let value = match v {
                        serde_json::Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    (k.clone(), value)
                })
                .collect();
            request = request.query(&pairs);
        }

        if let Some(credential) = &ctx.credential {
            request = request.header(ctx.upstream.auth_header.as_str(), credential.as_str());
        }

        tracing::debug!(session = %ctx.session_id, url = %url, "Calling upstream");
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(Error::handler(format!(
                "Upstream returned {}: {}",
                status, body
            )));
        }

        Ok(ToolResult::text(body))
    }
}
