//! Tool servers and their operations.
//!
//! Two sides live here:
//! - the client view: [`ToolDescriptor`] says how to launch a server and
//!   [`ToolCatalog`] is what a running server advertises;
//! - the server view: each operation implements [`Tool`] and is registered
//!   in a [`ToolRegistry`], which is the dispatch boundary.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tracing::warn;

use crate::error::ToolError;
use crate::provider::ToolDefinition;

/// How to launch one tool server, and which capability it provides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Capability name, e.g. "search" or "discord-metadata".
    pub name: String,

    /// Executable path.
    pub command: String,

    /// Arguments passed to the executable.
    #[serde(default)]
    pub args: Vec<String>,

    /// Environment variables set for the child process.
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Environment variables that must be present in `env` for the server to work.
    #[serde(default)]
    pub required_env: Vec<String>,
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            required_env: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn requiring_env(mut self, key: impl Into<String>) -> Self {
        self.required_env.push(key.into());
        self
    }

    /// Required variables that are absent or empty in `env`.
    pub fn missing_env(&self) -> Vec<&str> {
        self.required_env
            .iter()
            .filter(|k| self.env.get(*k).is_none_or(|v| v.is_empty()))
            .map(|k| k.as_str())
            .collect()
    }
}

/// One parameter of an operation, as read from its JSON schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    /// JSON schema type ("string", "integer", ...). "any" if unspecified.
    pub kind: String,
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A named operation advertised by a tool server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationSpec {
    pub name: String,
    pub description: String,
    /// JSON Schema of the argument object.
    pub input_schema: serde_json::Value,
}

impl OperationSpec {
    /// The typed parameter view of `input_schema`, sorted by name.
    pub fn parameters(&self) -> Vec<ParamSpec> {
        let required: Vec<&str> = self.input_schema["required"]
            .as_array()
            .map(|arr| arr.iter().filter_map(|v| v.as_str()).collect())
            .unwrap_or_default();

        let mut params: Vec<ParamSpec> = self.input_schema["properties"]
            .as_object()
            .map(|props| {
                props
                    .iter()
                    .map(|(name, schema)| ParamSpec {
                        name: name.clone(),
                        kind: schema["type"].as_str().unwrap_or("any").to_string(),
                        required: required.contains(&name.as_str()),
                        default: schema.get("default").cloned(),
                        description: schema["description"].as_str().map(String::from),
                    })
                    .collect()
            })
            .unwrap_or_default();
        params.sort_by(|a, b| a.name.cmp(&b.name));
        params
    }

    pub fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.input_schema.clone(),
        }
    }
}

/// The operations one running tool server advertises. Fetched per session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolCatalog {
    pub operations: Vec<OperationSpec>,
}

impl ToolCatalog {
    pub fn new(operations: Vec<OperationSpec>) -> Self {
        Self { operations }
    }

    pub fn get(&self, name: &str) -> Option<&OperationSpec> {
        self.operations.iter().find(|op| op.name == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.operations.iter().map(|op| op.name.as_str()).collect()
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.operations.iter().map(|op| op.to_definition()).collect()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

/// The text result of one operation call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub text: String,
    /// True for negative results: unknown operation, handler failure.
    #[serde(default)]
    pub is_error: bool,
}

impl ToolOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: false,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: true,
        }
    }

    /// The structured "unknown operation" result.
    pub fn unknown_operation(name: &str) -> Self {
        Self::error(format!("Unknown tool: {name}"))
    }
}

/// One operation handler of a tool server.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The operation name (e.g., "weather_search").
    fn name(&self) -> &str;

    /// A description of what this operation does (sent to the model).
    fn description(&self) -> &str;

    /// JSON Schema describing this operation's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the operation with the given arguments.
    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolOutput, ToolError>;

    /// Advertised form of this operation.
    fn to_spec(&self) -> OperationSpec {
        OperationSpec {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.parameters_schema(),
        }
    }
}

/// The operations of one tool server, keyed by name.
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
    /// Insertion order, so the catalog is listed deterministically.
    order: Vec<String>,
    timeout: Duration,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            order: Vec::new(),
            timeout: Duration::from_secs(15),
        }
    }

    /// Bound for a single handler invocation in [`ToolRegistry::dispatch`].
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_none() {
            self.order.push(name);
        }
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    /// The advertised catalog, in registration order.
    pub fn catalog(&self) -> ToolCatalog {
        ToolCatalog::new(
            self.order
                .iter()
                .filter_map(|name| self.tools.get(name))
                .map(|t| t.to_spec())
                .collect(),
        )
    }

    /// Execute a tool by name, surfacing errors.
    pub async fn execute(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolOutput, ToolError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        match tokio::time::timeout(self.timeout, tool.execute(arguments)).await {
            Ok(result) => result,
            Err(_) => Err(ToolError::Timeout {
                tool_name: name.to_string(),
                timeout_secs: self.timeout.as_secs(),
            }),
        }
    }

    /// Execute a tool by name; never fails.
    ///
    /// Unknown names yield [`ToolOutput::unknown_operation`]; handler errors and
    /// timeouts become error text.
    pub async fn dispatch(&self, name: &str, arguments: serde_json::Value) -> ToolOutput {
        match self.execute(name, arguments).await {
            Ok(output) => output,
            Err(ToolError::NotFound(name)) => {
                warn!(tool = %name, "Unknown tool requested");
                ToolOutput::unknown_operation(&name)
            }
            Err(e) => {
                warn!(tool = %name, error = %e, "Tool handler failed");
                ToolOutput::error(format!("Error: {e}"))
            }
        }
    }

    pub fn names(&self) -> Vec<&str> {
        self.order.iter().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echoes back the input"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({
                "type": "object",
                "properties": {
                    "text": { "type": "string", "description": "What to echo" },
                    "times": { "type": "integer", "default": 1 }
                },
                "required": ["text"]
            })
        }
        async fn execute(&self, arguments: serde_json::Value) -> Result<ToolOutput, ToolError> {
            let text = arguments["text"]
                .as_str()
                .ok_or_else(|| ToolError::InvalidArguments("Missing 'text' argument".into()))?;
            Ok(ToolOutput::text(text))
        }
    }

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "Never finishes in time"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object", "properties": {}})
        }
        async fn execute(&self, _arguments: serde_json::Value) -> Result<ToolOutput, ToolError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(ToolOutput::text("late"))
        }
    }

    #[test]
    fn parameters_are_typed() {
        let spec = EchoTool.to_spec();
        let params = spec.parameters();
        assert_eq!(params.len(), 2);
        assert_eq!(params[0].name, "text");
        assert_eq!(params[0].kind, "string");
        assert!(params[0].required);
        assert_eq!(params[1].name, "times");
        assert!(!params[1].required);
        assert_eq!(params[1].default, Some(serde_json::json!(1)));
    }

    #[test]
    fn catalog_keeps_registration_order() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(SlowTool));
        registry.register(Box::new(EchoTool));
        assert_eq!(registry.catalog().names(), vec!["slow", "echo"]);
    }

    #[test]
    fn descriptor_reports_missing_env() {
        let descriptor = ToolDescriptor::new("discord-metadata", "concierge")
            .with_env("DISCORD_TOKEN", "abc")
            .requiring_env("DISCORD_TOKEN")
            .requiring_env("DISCORD_GUILD_ID");
        assert_eq!(descriptor.missing_env(), vec!["DISCORD_GUILD_ID"]);
    }

    #[tokio::test]
    async fn dispatch_known_tool() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool));
        let output = registry
            .dispatch("echo", serde_json::json!({"text": "hello"}))
            .await;
        assert_eq!(output, ToolOutput::text("hello"));
    }

    #[tokio::test]
    async fn dispatch_unknown_tool_is_a_result() {
        let registry = ToolRegistry::new();
        let output = registry.dispatch("nope", serde_json::json!({})).await;
        assert!(output.is_error);
        assert_eq!(output.text, "Unknown tool: nope");
    }

    #[tokio::test]
    async fn dispatch_converts_handler_errors() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool));
        let output = registry.dispatch("echo", serde_json::json!({})).await;
        assert!(output.is_error);
        assert!(output.text.contains("text"));
    }

    #[tokio::test(start_paused = true)]
    async fn dispatch_times_out_slow_handlers() {
        let mut registry = ToolRegistry::new().with_timeout(Duration::from_millis(50));
        registry.register(Box::new(SlowTool));
        let output = registry.dispatch("slow", serde_json::json!({})).await;
        assert!(output.is_error);
        assert!(output.text.contains("timed out"));
    }
}
