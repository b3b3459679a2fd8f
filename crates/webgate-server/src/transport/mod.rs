//! Transport servers: line-delimited stdio and the `/mcp` WebSocket.

pub mod stdio;
pub mod ws;
