//! Capability registry: tools, resource templates and prompts
//!
//! Capabilities are registered once at startup and the registry is then shared
//! read-only behind an `Arc`. Tools and prompts resolve by exact name; resources
//! resolve by matching the requested URI against each template in registration
//! order.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::protocol::{PromptResult, ResourceDescriptor, ResourceResult, ToolResult};
use super::schema::{InputSchema, ParamSpec, ParamType, ValidatedParams};
use super::session::SessionId;
use super::template::UriTemplate;
use crate::config::UpstreamConfig;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapabilityKind {
    Tool,
    Resource,
    Prompt,
}

impl CapabilityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CapabilityKind::Tool => "Tool",
            CapabilityKind::Resource => "Resource",
            CapabilityKind::Prompt => "Prompt",
        }
    }
}

impl fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-invocation context handed to every handler
#[derive(Clone)]
pub struct CallContext {
    pub session_id: SessionId,
    /// API credential captured for this session, if the client sent one
    pub credential: Option<String>,
    pub http: reqwest::Client,
    pub upstream: Arc<UpstreamConfig>,
}

/// Trait for MCP tools
#[async_trait]
pub trait McpTool: Send + Sync {
    /// Tool name (used in tools/call)
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn input_schema(&self) -> InputSchema;

    async fn call(&self, params: ValidatedParams, ctx: &CallContext) -> Result<ToolResult>;
}

/// Trait for templated MCP resources
#[async_trait]
pub trait McpResource: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// URI template, e.g. `echo://{message}`
    fn uri_template(&self) -> &str;

    fn mime_type(&self) -> Option<&str> {
        None
    }

    /// Whether `list` enumerates concrete URIs for this template
    fn supports_list(&self) -> bool {
        false
    }

    async fn list(&self, _ctx: &CallContext) -> Result<Vec<ResourceDescriptor>> {
        Err(Error::NotSupported(format!(
            "Listing is not supported for resource template {}",
            self.uri_template()
        )))
    }

    /// Read one resource. `vars` holds the template bindings.
    async fn read(&self, uri: &str, vars: ValidatedParams, ctx: &CallContext)
        -> Result<ResourceResult>;
}

/// Trait for MCP prompts
#[async_trait]
pub trait McpPrompt: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn input_schema(&self) -> InputSchema;

    async fn get(&self, params: ValidatedParams, ctx: &CallContext) -> Result<PromptResult>;
}

pub struct ToolEntry {
    pub handler: Arc<dyn McpTool>,
    pub schema: InputSchema,
}

pub struct PromptEntry {
    pub handler: Arc<dyn McpPrompt>,
    pub schema: InputSchema,
}

pub struct ResourceEntry {
    pub handler: Arc<dyn McpResource>,
    pub template: UriTemplate,
    /// Derived from the template: every variable is a required string
    pub schema: InputSchema,
}

/// Outcome of a successful resolve
pub enum Resolved<'a> {
    Tool(&'a ToolEntry),
    Prompt(&'a PromptEntry),
    Resource {
        entry: &'a ResourceEntry,
        bindings: HashMap<String, String>,
    },
}

/// Public description of one capability
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CapabilityDescriptor {
    pub name: String,
    pub kind: CapabilityKind,
    pub description: String,
    pub schema: Value,
    #[serde(rename = "uriTemplate", skip_serializing_if = "Option::is_none")]
    pub uri_template: Option<String>,
}

/// Registry of available capabilities
#[derive(Default)]
pub struct CapabilityRegistry {
    tools: HashMap<String, ToolEntry>,
    prompts: HashMap<String, PromptEntry>,
    resources: Vec<ResourceEntry>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_tool(&mut self, tool: Arc<dyn McpTool>) -> Result<()> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(Error::DuplicateCapability {
                kind: CapabilityKind::Tool.as_str(),
                name,
            });
        }
        let schema = tool.input_schema();
        self.tools.insert(name, ToolEntry { handler: tool, schema });
        Ok(())
    }

    pub fn register_prompt(&mut self, prompt: Arc<dyn McpPrompt>) -> Result<()> {
        let name = prompt.name().to_string();
        if self.prompts.contains_key(&name) {
            return Err(Error::DuplicateCapability {
                kind: CapabilityKind::Prompt.as_str(),
                name,
            });
        }
        let schema = prompt.input_schema();
        self.prompts.insert(
            name,
            PromptEntry {
                handler: prompt,
                schema,
            },
        );
        Ok(())
    }

    /// Register a resource template. Both the name and the template must be unique.
    pub fn register_resource(&mut self, resource: Arc<dyn McpResource>) -> Result<()> {
        let template = UriTemplate::parse(resource.uri_template())?;

        if let Some(existing) = self.resources.iter().find(|r| {
            r.handler.name() == resource.name() || r.template.as_str() == template.as_str()
        }) {
            return Err(Error::DuplicateCapability {
                kind: CapabilityKind::Resource.as_str(),
                name: format!("{} ({})", existing.handler.name(), existing.template),
            });
        }

        let schema = template
            .variables()
            .iter()
            .fold(InputSchema::new(), |schema, var| {
                schema.param(ParamSpec::required(var.clone(), ParamType::String))
            });

        self.resources.push(ResourceEntry {
            handler: resource,
            template,
            schema,
        });
        Ok(())
    }

    /// Resolve a tool/prompt by name or a resource by URI
    pub fn resolve(&self, kind: CapabilityKind, name_or_uri: &str) -> Result<Resolved<'_>> {
        let not_found = || Error::NotFound {
            kind: kind.as_str(),
            name: name_or_uri.to_string(),
        };

        match kind {
            CapabilityKind::Tool => self
                .tools
                .get(name_or_uri)
                .map(Resolved::Tool)
                .ok_or_else(not_found),
            CapabilityKind::Prompt => self
                .prompts
                .get(name_or_uri)
                .map(Resolved::Prompt)
                .ok_or_else(not_found),
            CapabilityKind::Resource => self
                .resources
                .iter()
                .find_map(|entry| {
                    entry
                        .template
                        .match_uri(name_or_uri)
                        .map(|bindings| Resolved::Resource { entry, bindings })
                })
                .ok_or_else(not_found),
        }
    }

    /// Look up a resource template by name for listing. Fails with
    /// `NotSupported` when its handler cannot enumerate resources.
    pub fn listable_resource(&self, name: &str) -> Result<&ResourceEntry> {
        let entry = self
            .resources
            .iter()
            .find(|r| r.handler.name() == name)
            .ok_or_else(|| Error::NotFound {
                kind: CapabilityKind::Resource.as_str(),
                name: name.to_string(),
            })?;

        if !entry.handler.supports_list() {
            return Err(Error::NotSupported(format!(
                "Listing is not supported for resource template {}",
                entry.template
            )));
        }
        Ok(entry)
    }

    /// Resource templates that implement listing, in registration order
    pub fn listable_resources(&self) -> impl Iterator<Item = &ResourceEntry> {
        self.resources.iter().filter(|r| r.handler.supports_list())
    }

    /// List all tools in MCP format
    pub fn tools_list(&self) -> Vec<Value> {
        let mut tools: Vec<&ToolEntry> = self.tools.values().collect();
        tools.sort_by(|a, b| a.handler.name().cmp(b.handler.name()));
        tools
            .into_iter()
            .map(|t| {
                json!({
                    "name": t.handler.name(),
                    "description": t.handler.description(),
                    "inputSchema": t.schema.to_json_schema()
                })
            })
            .collect()
    }

    /// List all prompts in MCP format
    pub fn prompts_list(&self) -> Vec<Value> {
        let mut prompts: Vec<&PromptEntry> = self.prompts.values().collect();
        prompts.sort_by(|a, b| a.handler.name().cmp(b.handler.name()));
        prompts
            .into_iter()
            .map(|p| {
                let arguments: Vec<Value> = p
                    .schema
                    .params()
                    .iter()
                    .map(|param| {
                        json!({
                            "name": param.name,
                            "description": param.description,
                            "required": param.required
                        })
                    })
                    .collect();
                json!({
                    "name": p.handler.name(),
                    "description": p.handler.description(),
                    "arguments": arguments
                })
            })
            .collect()
    }

    /// List resource templates in MCP format (registration order)
    pub fn resource_templates_list(&self) -> Vec<Value> {
        self.resources
            .iter()
            .map(|r| {
                let mut value = json!({
                    "uriTemplate": r.template.as_str(),
                    "name": r.handler.name(),
                    "description": r.handler.description()
                });
                if let Some(mime) = r.handler.mime_type() {
                    value["mimeType"] = Value::String(mime.to_string());
                }
                value
            })
            .collect()
    }

    /// Capability catalog for discovery, sorted by kind then name
    pub fn catalog(&self) -> Vec<CapabilityDescriptor> {
        let mut out: Vec<CapabilityDescriptor> = Vec::with_capacity(self.len());

        out.extend(self.tools.values().map(|t| CapabilityDescriptor {
            name: t.handler.name().to_string(),
            kind: CapabilityKind::Tool,
            description: t.handler.description().to_string(),
            schema: t.schema.to_json_schema(),
            uri_template: None,
        }));
        out.extend(self.resources.iter().map(|r| CapabilityDescriptor {
            name: r.handler.name().to_string(),
            kind: CapabilityKind::Resource,
            description: r.handler.description().to_string(),
            schema: r.schema.to_json_schema(),
            uri_template: Some(r.template.as_str().to_string()),
        }));
        out.extend(self.prompts.values().map(|p| CapabilityDescriptor {
            name: p.handler.name().to_string(),
            kind: CapabilityKind::Prompt,
            description: p.handler.description().to_string(),
            schema: p.schema.to_json_schema(),
            uri_template: None,
        }));

        out.sort_by(|a, b| (a.kind.as_str(), &a.name).cmp(&(b.kind.as_str(), &b.name)));
        out
    }

    pub fn len(&self) -> usize {
        self.tools.len() + self.prompts.len() + self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
