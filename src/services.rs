//! Collaborators for automated tasks: service handlers keyed by task type
//! and the decision gateway used by business-rule tasks.

use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use crate::variables::Variables;

/// Static headers declared on a service task.
pub type Headers = BTreeMap<String, String>;

/// Implementation of a service task type.
///
/// Returning `Ok(None)` means no result is available yet; the task waits
/// and can be run again later through `run_automated_tasks`.
pub trait ServiceHandler: Send + Sync {
    fn call(&self, variables: &Variables, headers: &Headers) -> anyhow::Result<Option<Value>>;
}

impl<F> ServiceHandler for F
where
    F: Fn(&Variables, &Headers) -> anyhow::Result<Option<Value>> + Send + Sync,
{
    fn call(&self, variables: &Variables, headers: &Headers) -> anyhow::Result<Option<Value>> {
        self(variables, headers)
    }
}

/// Evaluates decision tables for business-rule tasks.
pub trait DecisionGateway: Send + Sync {
    fn evaluate_decision(
        &self,
        decision_id: &str,
        variables: &Variables,
    ) -> anyhow::Result<Option<Value>>;
}

/// Service handlers registered on a context.
#[derive(Clone, Default)]
pub struct ServiceRegistry {
    handlers: HashMap<String, Arc<dyn ServiceHandler>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, task_type: impl Into<String>, handler: impl ServiceHandler + 'static) {
        self.handlers.insert(task_type.into(), Arc::new(handler));
    }

    pub fn get(&self, task_type: &str) -> Option<Arc<dyn ServiceHandler>> {
        self.handlers.get(task_type).cloned()
    }

    pub fn contains(&self, task_type: &str) -> bool {
        self.handlers.contains_key(task_type)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut task_types: Vec<&String> = self.handlers.keys().collect();
        task_types.sort();
        f.debug_struct("ServiceRegistry")
            .field("task_types", &task_types)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn closures_register_as_handlers() {
        let mut registry = ServiceRegistry::new();
        registry.register(
            "greet",
            |variables: &Variables, headers: &Headers| -> anyhow::Result<Option<Value>> {
                let name = variables.get("name").and_then(Value::as_str).unwrap_or("stranger");
                let greeting = headers.get("greeting").map(String::as_str).unwrap_or("Hello");
                Ok(Some(json!(format!("{greeting} {name}!"))))
            },
        );

        let handler = registry.get("greet").unwrap();
        let variables: Variables = [("name", json!("Eric"))].into_iter().collect();
        let headers: Headers = [("greeting".to_string(), "Bonjour".to_string())].into();
        assert_eq!(
            handler.call(&variables, &headers).unwrap(),
            Some(json!("Bonjour Eric!"))
        );
        assert!(registry.get("unknown").is_none());
        assert_eq!(format!("{registry:?}"), "ServiceRegistry { task_types: [\"greet\"] }");
    }
}
