//! Built-in capabilities

mod echo;
mod upstream;

pub use echo::{EchoPrompt, EchoResource, EchoTool};
pub use upstream::UpstreamGetTool;

use std::sync::Arc;

use super::registry::CapabilityRegistry;
use crate::config::UpstreamConfig;
use crate::Result;

/// Register the `echo` tool, resource template and prompt
pub fn register_echo_capabilities(registry: &mut CapabilityRegistry) -> Result<()> {
    registry.register_tool(Arc::new(EchoTool))?;
    registry.register_resource(Arc::new(EchoResource))?;
    registry.register_prompt(Arc::new(EchoPrompt))?;
    Ok(())
}

/// Register every built-in capability the configuration enables
pub fn register_builtin_capabilities(
    registry: &mut CapabilityRegistry,
    upstream: &UpstreamConfig,
) -> Result<()> {
    register_echo_capabilities(registry)?;
    if upstream.base_url.is_some() {
        registry.register_tool(Arc::new(UpstreamGetTool))?;
    }
    Ok(())
}
