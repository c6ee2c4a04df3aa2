// Tern - Multi-transport MCP capability gateway
// Library exports

// Core modules
pub mod config;
pub mod errors;
pub mod mcp;
pub mod server;
pub mod tunnel;
