//! Tool invocation: registry, policy, and the builtin adapters.
//!
//! A tool call names a source (configured in `tool_sources`) and a tool.
//! The registry applies the external-source policy, picks an adapter, and
//! dispatches. The internal adapter is a fixed read-only window over the
//! runtime's own state; the read-only API adapter proxies GETs to a remote
//! tool host.

pub mod internal;
pub mod readonly_api;
pub mod registry;
pub mod types;

pub use registry::ToolRegistry;
pub use types::{ToolAdapter, ToolContext, ToolInvocation, ToolOutcome};
