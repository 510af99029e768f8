//! MCP (Model Context Protocol) over HTTP SSE
//!
//! This module provides the session transport bridge:
//! - SessionTransport: SSE session lifecycle and POST routing
//! - Dispatcher: JSON-RPC 2.0 request handling and the per-session dispatch loop
//! - CapabilityRegistry: tools, resource templates and prompts
//! - schema: parameter validation before dispatch

pub mod capabilities;
pub mod dispatch;
pub mod protocol;
pub mod registry;
pub mod schema;
pub mod session;
pub mod template;

pub use dispatch::{Dispatcher, ServerInfo};
pub use registry::{CallContext, CapabilityKind, CapabilityRegistry, McpPrompt, McpResource, McpTool};
pub use session::{SessionTransport, SseEvent};
