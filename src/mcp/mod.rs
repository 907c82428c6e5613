//! Model Context Protocol (MCP) over JSON-RPC 2.0

pub mod rpc;
pub mod server;
