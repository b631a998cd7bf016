//! Tool catalog and invoker traits.
//!
//! The engine never talks to a tool directly: it resolves a
//! [`ToolDescriptor`] through a [`ToolCatalog`] and hands it to a
//! [`ToolInvoker`]. Transport-specific catalogs (MCP servers, HTTP
//! registries) implement these traits elsewhere; [`ToolRegistry`] covers
//! tools that live in the same process.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::ToolError;

/// What the model is told about a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: Value,

    /// Group the tool belongs to, used by group filters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

/// Resolves and lists tools.
#[async_trait]
pub trait ToolCatalog: Send + Sync {
    /// Look up a tool by name.
    async fn resolve(&self, name: &str) -> Option<ToolDescriptor>;

    /// Tools visible under the given group and name filters.
    /// An empty filter admits everything.
    async fn list_available(&self, groups: &[String], names: &[String]) -> Vec<ToolDescriptor>;
}

/// Invokes a resolved tool.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    async fn invoke(&self, tool: &ToolDescriptor, arguments: Value) -> std::result::Result<Value, ToolError>;
}

/// A tool implemented in-process.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "weather").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the LLM).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> Value;

    /// Optional group for filtering.
    fn group(&self) -> Option<&str> {
        None
    }

    /// Execute the tool with the given arguments.
    async fn execute(&self, arguments: Value) -> std::result::Result<Value, ToolError>;

    fn to_descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
            group: self.group().map(str::to_string),
        }
    }
}

/// A registry of in-process tools, usable as both catalog and invoker.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, tool);
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    /// List all registered tool names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[async_trait]
impl ToolCatalog for ToolRegistry {
    async fn resolve(&self, name: &str) -> Option<ToolDescriptor> {
        self.tools.get(name).map(|t| t.to_descriptor())
    }

    async fn list_available(&self, groups: &[String], names: &[String]) -> Vec<ToolDescriptor> {
        let mut descriptors: Vec<ToolDescriptor> = self
            .tools
            .values()
            .map(|t| t.to_descriptor())
            .filter(|d| {
                groups.is_empty()
                    || d.group.as_ref().is_some_and(|g| groups.iter().any(|f| f == g))
            })
            .filter(|d| names.is_empty() || names.iter().any(|n| n == &d.name))
            .collect();
        // Stable prompt text across runs
        descriptors.sort_by(|a, b| a.name.cmp(&b.name));
        descriptors
    }
}

#[async_trait]
impl ToolInvoker for ToolRegistry {
    async fn invoke(&self, tool: &ToolDescriptor, arguments: Value) -> std::result::Result<Value, ToolError> {
        let handle = self
            .tools
            .get(&tool.name)
            .ok_or_else(|| ToolError::NotFound(tool.name.clone()))?;
        handle.execute(arguments).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A simple test tool for unit tests.
    struct EchoTool {
        group: Option<&'static str>,
    }

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echoes back the input"
        }
        fn parameters_schema(&self) -> Value {
            serde_json::json!({
                "type": "object",
                "properties": { "text": { "type": "string" } },
                "required": ["text"]
            })
        }
        fn group(&self) -> Option<&str> {
            self.group
        }
        async fn execute(&self, arguments: Value) -> Result<Value, ToolError> {
            arguments
                .get("text")
                .cloned()
                .ok_or_else(|| ToolError::InvalidArguments("missing 'text'".into()))
        }
    }

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool { group: Some("util") }));
        registry
    }

    #[tokio::test]
    async fn resolve_known_and_unknown() {
        let registry = registry();
        assert!(registry.resolve("echo").await.is_some());
        assert!(registry.resolve("nonexistent").await.is_none());
    }

    #[tokio::test]
    async fn group_and_name_filters_apply() {
        let registry = registry();
        assert_eq!(registry.list_available(&[], &[]).await.len(), 1);
        assert_eq!(registry.list_available(&["util".into()], &[]).await.len(), 1);
        assert!(registry.list_available(&["net".into()], &[]).await.is_empty());
        assert!(registry.list_available(&[], &["shell".into()]).await.is_empty());
    }

    #[tokio::test]
    async fn invoke_runs_the_tool() {
        let registry = registry();
        let descriptor = registry.resolve("echo").await.unwrap();
        let out = registry
            .invoke(&descriptor, serde_json::json!({"text": "hello world"}))
            .await
            .unwrap();
        assert_eq!(out, "hello world");
    }

    #[tokio::test]
    async fn invoke_missing_tool() {
        let registry = ToolRegistry::new();
        let descriptor = ToolDescriptor {
            name: "ghost".into(),
            description: String::new(),
            parameters: Value::Null,
            group: None,
        };
        let err = registry.invoke(&descriptor, Value::Null).await.unwrap_err();
        assert!(matches!(err, ToolError::NotFound(_)));
    }
}
