//! Resolution tools exposed over the MCP protocol
//!
//! Validates tool arguments and renders resolver outcomes as tool results.

pub mod tools;
pub mod utils;
