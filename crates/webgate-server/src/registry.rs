//! Tool registration and lookup.

use crate::envelope::CallToolResult;
use crate::protocol::JsonRpcNotification;
use dashmap::DashMap;
use serde_json::{json, Value};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

pub type ToolFuture = Pin<Box<dyn Future<Output = CallToolResult> + Send>>;
/// Handlers capture their state at registration time; invocation passes the
/// argument map plus the calling client's identity.
pub type ToolHandler = Arc<dyn Fn(ToolInvocation) -> ToolFuture + Send + Sync>;

#[derive(Debug, Clone)]
pub struct ToolInvocation {
    /// Transport-assigned client identity (rate-limit key, session owner).
    pub client_id: String,
    pub arguments: Value,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

struct RegisteredTool {
    descriptor: ToolDescriptor,
    handler: ToolHandler,
}

pub struct ToolRegistry {
    tools: DashMap<String, RegisteredTool>,
    notifications: broadcast::Sender<JsonRpcNotification>,
}

impl ToolRegistry {
    pub fn new(notifications: broadcast::Sender<JsonRpcNotification>) -> Self {
        Self {
            tools: DashMap::new(),
            notifications,
        }
    }

    /// Register a tool. Duplicate names are rejected.
    pub fn register(&self, descriptor: ToolDescriptor, handler: ToolHandler) -> Result<(), String> {
        let name = descriptor.name.clone();
        match self.tools.entry(name.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(format!("tool '{name}' is already registered"))
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(RegisteredTool {
                    descriptor,
                    handler,
                });
                debug!(tool = %name, "tool registered");
                let _ = self.notifications.send(JsonRpcNotification::new(
                    "tool.registered",
                    json!({"name": name}),
                ));
                Ok(())
            }
        }
    }

    pub fn unregister(&self, name: &str) -> bool {
        let removed = self.tools.remove(name).is_some();
        if removed {
            info!(tool = %name, "tool unregistered");
            let _ = self.notifications.send(JsonRpcNotification::new(
                "tool.unregistered",
                json!({"name": name}),
            ));
        }
        removed
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn list(&self) -> Vec<ToolDescriptor> {
        let mut descriptors: Vec<ToolDescriptor> = self
            .tools
            .iter()
            .map(|entry| entry.value().descriptor.clone())
            .collect();
        descriptors.sort_by(|a, b| a.name.cmp(&b.name));
        descriptors
    }

    /// Invoke a tool by name; `None` when no such tool exists.
    pub async fn call(&self, name: &str, invocation: ToolInvocation) -> Option<CallToolResult> {
        let handler = self.tools.get(name).map(|t| t.handler.clone())?;
        Some(handler(invocation).await)
    }
}
