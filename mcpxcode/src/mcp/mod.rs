//! MCP front end.
//!
//! `mcpxcode serve` speaks JSON-RPC over stdio. Every registry entry is
//! advertised as a tool whose input schema is derived from its argument
//! specs, and every call goes through the [`Dispatcher`](crate::dispatch::Dispatcher).
//! Logs are written to stderr so they never interleave with the protocol.

mod server;
mod tools;

pub use server::run_mcp_server;
pub use tools::XcodeMcpServer;
