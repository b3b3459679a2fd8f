//! Tool dispatch, the JSON-RPC protocol core, the two transport servers and
//! the orchestrator that wires the gateway together.

pub mod config;
pub mod dispatch;
pub mod envelope;
pub mod gateway;
pub mod protocol;
pub mod registry;
pub mod tools;
pub mod transport;

pub use config::GatewayConfig;
pub use envelope::CallToolResult;
pub use gateway::{AppState, Gateway};
pub use protocol::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
pub use registry::{ToolDescriptor, ToolInvocation, ToolRegistry};
