use std::collections::HashMap;
use std::future::ready;

use chatloop_model::ModelTool;
use serde_json::Value;

use super::{AnyTool, BoxedToolFuture, Error, Tool, ToolObject};

/// A set of tools, keyed by name.
///
/// Once built, the registry is only read, so it can be shared between
/// concurrent tool calls.
#[derive(Default)]
pub struct Registry {
    tools: HashMap<String, Box<dyn ToolObject>>,
}

impl Registry {
    /// Creates an empty registry.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tool, replacing any tool with the same name.
    pub fn register<T: Tool>(&mut self, tool: T) {
        let name = tool.name().to_owned();
        if self.tools.contains_key(&name) {
            warn!("tool `{name}` is registered twice, replacing");
        }
        self.tools.insert(name, Box::new(AnyTool(tool)));
    }

    /// Returns `true` if a tool with the name is registered.
    #[inline]
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Returns the number of registered tools.
    #[inline]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Returns `true` if no tool is registered.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Returns the definitions of all tools, sorted by name.
    pub fn definitions(&self) -> Vec<ModelTool> {
        let mut definitions: Vec<_> = self
            .tools
            .values()
            .map(|tool| ModelTool {
                name: tool.name().to_owned(),
                description: tool.description().to_owned(),
                parameters: tool.parameter_schema().clone(),
            })
            .collect();
        definitions.sort_by(|a, b| a.name.cmp(&b.name));
        definitions
    }

    /// Calls a tool with structured arguments.
    ///
    /// The returned future is independent of the registry.
    pub fn call(&self, name: &str, arguments: Value) -> BoxedToolFuture {
        let Some(tool) = self.tools.get(name) else {
            warn!("tool not found: {name}");
            return Box::pin(ready(Err(Error::not_found()
                .with_reason(format!("no tool named `{name}`")))));
        };
        tool.execute(arguments)
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;
    use serde_json::json;

    use super::*;
    use crate::tool::{ErrorKind, ToolResult};

    static EMPTY_SCHEMA: &Value = &Value::Null;

    #[derive(Deserialize)]
    struct AddInput {
        a: i64,
        b: i64,
    }

    struct AddTool;

    impl Tool for AddTool {
        type Input = AddInput;

        fn name(&self) -> &str {
            "add"
        }

        fn description(&self) -> &str {
            "Adds two numbers"
        }

        fn parameter_schema(&self) -> &Value {
            EMPTY_SCHEMA
        }

        fn execute(
            &self,
            input: Self::Input,
        ) -> impl Future<Output = ToolResult> + Send + 'static {
            ready(Ok(json!(input.a + input.b)))
        }
    }

    struct NamedTool(&'static str);

    impl Tool for NamedTool {
        type Input = Value;

        fn name(&self) -> &str {
            self.0
        }

        fn description(&self) -> &str {
            "A test tool"
        }

        fn parameter_schema(&self) -> &Value {
            EMPTY_SCHEMA
        }

        fn execute(
            &self,
            _input: Self::Input,
        ) -> impl Future<Output = ToolResult> + Send + 'static {
            ready(Ok(Value::Null))
        }
    }

    #[test]
    fn test_definitions_are_sorted() {
        let mut registry = Registry::new();
        registry.register(NamedTool("zeta"));
        registry.register(NamedTool("alpha"));
        registry.register(AddTool);
        registry.register(NamedTool("alpha"));

        assert_eq!(registry.len(), 3);
        assert!(registry.contains("zeta"));
        assert!(!registry.contains("beta"));
        let names: Vec<_> = registry
            .definitions()
            .into_iter()
            .map(|definition| definition.name)
            .collect();
        assert_eq!(names, ["add", "alpha", "zeta"]);
    }

    #[tokio::test]
    async fn test_call() {
        let mut registry = Registry::new();
        registry.register(AddTool);

        let result = registry.call("add", json!({ "a": 1, "b": 2 })).await;
        assert_eq!(result, Ok(json!(3)));

        let err = registry
            .call("add", json!({ "a": "one" }))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);

        let err = registry.call("sub", json!({})).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
