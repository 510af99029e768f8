use async_trait::async_trait;

use crate::mcp::protocol::{
    Content, PromptMessage, PromptResult, ResourceContents, ResourceResult, Role, ToolResult,
};
use crate::mcp::registry::{CallContext, McpPrompt, McpResource, McpTool};
use crate::mcp::schema::{InputSchema, ParamSpec, ParamType, ValidatedParams};
use crate::{Error, Result};

fn message_schema() -> InputSchema {
    InputSchema::new()
        .param(ParamSpec::required("message", ParamType::String).describe("Text to echo back"))
}

fn message(params: &ValidatedParams) -> Result<&str> {
    params
        .str("message")
        .ok_or_else(|| Error::handler("Missing message"))
}

/// Echo tool: returns the message prefixed with `Tool echo:`
pub struct EchoTool;

#[async_trait]
impl McpTool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo a message back as text content"
    }

    fn input_schema(&self) -> InputSchema {
        message_schema()
    }

    async fn call(&self, params: ValidatedParams, _ctx: &CallContext) -> Result<ToolResult> {
        Ok(ToolResult::text(format!("Tool echo: {}", message(&params)?)))
    }
}

/// Echo resource template `echo://{message}`
pub struct EchoResource;

#[async_trait]
impl McpResource for EchoResource {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo the message embedded in the URI"
    }

    fn uri_template(&self) -> &str {
        "echo://{message}"
    }

    fn mime_type(&self) -> Option<&str> {
        Some("text/plain")
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
                mime_type: self.mime_type().map(String::from),
                text: format!("Resource echo: {}", message(&vars)?),
            }],
        })
    }
}

/// Echo prompt: asks the model to process the message
pub struct EchoPrompt;

#[async_trait]
impl McpPrompt for EchoPrompt {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Wrap a message in a processing prompt"
    }

    fn input_schema(&self) -> InputSchema {
        message_schema()
    }

    async fn get(&self, params: ValidatedParams, _ctx: &CallContext) -> Result<PromptResult> {
        Ok(PromptResult {
            description: None,
            messages: vec![PromptMessage {
                role: Role::User,
                content: Content::text(format!(
                    "Please process this message: {}",
                    message(&params)?
                )),
            }],
        })
    }
}
