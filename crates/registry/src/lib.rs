//! # Helmsman Registry
//!
//! Discovers tool servers, starts them on demand, and exposes every tool
//! they serve as a [`helmsman_core::Tool`].
//!
//! Servers are separate processes speaking JSON-RPC 2.0 over stdio. The
//! registry keeps two collections apart: an arena of immutable
//! [`ServerDescriptor`]s built by [`ToolProviderRegistry::discover`], and a
//! map of live [`ServerConnection`]s created by
//! [`ToolProviderRegistry::start_server`].

pub mod client;
pub mod descriptor;
pub mod discovery;
pub mod meta;
pub mod protocol;
pub mod registry;
pub mod remote_tool;
pub mod transport;

#[cfg(test)]
pub(crate) mod fake;

pub use client::{ConnectionTimeouts, ServerConnection};
pub use descriptor::{ServerDescriptor, ServerOrigin};
pub use discovery::DiscoverySources;
pub use registry::{ServerState, ServerStatus, ToolProviderRegistry};
pub use remote_tool::RemoteTool;
pub use transport::{Launcher, ProcessLauncher, Transport};
