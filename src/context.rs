//! Process context
//!
//! A [`Context`] owns the live definitions, the collaborators (expressions,
//! services, decisions, clock) and every execution tree started or restored
//! in it. All engine operations go through it.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::ops::Index;
use std::sync::Arc;
use tracing::{debug_span, info, info_span};

use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::execution::behavior;
use crate::execution::lifecycle::Trigger;
use crate::execution::{Execution, ExecutionKey};
use crate::expression::{BasicExpressions, ExpressionGateway};
use crate::listener::{LifecycleEvent, ListenerEvent, ListenerRegistry};
use crate::model::{Definitions, Step};
use crate::services::{DecisionGateway, ServiceHandler, ServiceRegistry};
use crate::variables::Variables;

pub struct Context {
    pub(crate) definitions: Arc<Definitions>,
    pub(crate) config: EngineConfig,
    pub(crate) listeners: ListenerRegistry,
    pub(crate) services: ServiceRegistry,
    pub(crate) decisions: Option<Arc<dyn DecisionGateway>>,
    pub(crate) expressions: Arc<dyn ExpressionGateway>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) executions: Vec<Execution>,
    pub(crate) ids: HashMap<String, ExecutionKey>,
    pub(crate) roots: Vec<ExecutionKey>,
    pub(crate) steps_taken: usize,
}

impl Context {
    pub fn new(definitions: Definitions) -> Self {
        Self::with_shared_definitions(Arc::new(definitions))
    }

    /// Several contexts may run against one set of definitions.
    pub fn with_shared_definitions(definitions: Arc<Definitions>) -> Self {
        Self {
            definitions,
            config: EngineConfig::default(),
            listeners: ListenerRegistry::new(),
            services: ServiceRegistry::new(),
            decisions: None,
            expressions: Arc::new(BasicExpressions),
            clock: Arc::new(SystemClock),
            executions: Vec::new(),
            ids: HashMap::new(),
            roots: Vec::new(),
            steps_taken: 0,
        }
    }

    pub fn from_yaml(source: &str) -> Result<Self> {
        Ok(Self::new(Definitions::from_yaml(source)?))
    }

    // ─── Builders ─────────────────────────────────────────────────────────

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_expressions(mut self, expressions: Arc<dyn ExpressionGateway>) -> Self {
        self.expressions = expressions;
        self
    }

    pub fn with_decisions(mut self, decisions: Arc<dyn DecisionGateway>) -> Self {
        self.decisions = Some(decisions);
        self
    }

    pub fn register_service(
        &mut self,
        task_type: impl Into<String>,
        handler: impl ServiceHandler + 'static,
    ) {
        self.services.register(task_type, handler);
    }

    pub fn listeners_mut(&mut self) -> &mut ListenerRegistry {
        &mut self.listeners
    }

    pub fn on<F>(&mut self, kind: LifecycleEvent, listener: F)
    where
        F: Fn(&ListenerEvent<'_>) + Send + Sync + 'static,
    {
        self.listeners.on(kind, listener);
    }

    pub fn definitions(&self) -> &Definitions {
        &self.definitions
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    // ─── Starting instances ───────────────────────────────────────────────

    /// Start the first process of the definitions.
    pub fn start(&mut self, variables: Variables) -> Result<ExecutionKey> {
        let process_id = self
            .definitions
            .processes()
            .first()
            .map(|p| p.id.clone())
            .ok_or_else(|| EngineError::lookup("the definitions contain no process"))?;
        self.start_process(&process_id, variables, None)
    }

    /// Start a process instance. With `start_event_id` the instance enters
    /// through that start event only, treating it as already triggered.
    pub fn start_process(
        &mut self,
        process_id: &str,
        variables: Variables,
        start_event_id: Option<&str>,
    ) -> Result<ExecutionKey> {
        let process = self.definitions.require_process(process_id)?;
        if let Some(id) = start_event_id {
            let start = self.definitions.require_step(id)?;
            if !start.is_start_event() || start.scope_id.as_deref() != Some(process_id) {
                return Err(EngineError::lookup(format!(
                    "`{id}` is not a start event of process `{process_id}`"
                )));
            }
        }

        let span = info_span!("start_process", process = process_id);
        let _entered = span.enter();
        self.begin_operation();

        let key = self.allocate(Some(process), None, None, variables);
        self.exec_mut(key).start_event_id = start_event_id.map(str::to_string);
        self.roots.push(key);
        info!(execution = %self.exec(key).id, "process instance created");
        self.start_execution(key)?;
        self.settle(key)?;
        Ok(key)
    }

    /// Start an instance of every process with a start event listening for
    /// `message`. Returns the new root executions, possibly none.
    pub fn start_with_message(
        &mut self,
        message: &str,
        variables: Variables,
    ) -> Result<Vec<ExecutionKey>> {
        let targets: Vec<(String, String)> = self
            .definitions
            .message_start_events(message)
            .into_iter()
            .map(|(process, start)| (process.id.clone(), start.id.clone()))
            .collect();
        let mut started = Vec::with_capacity(targets.len());
        for (process_id, start_id) in targets {
            started.push(self.start_process(&process_id, variables.clone(), Some(&start_id))?);
        }
        Ok(started)
    }

    // ─── Stimuli ──────────────────────────────────────────────────────────

    /// Signal a waiting execution, optionally carrying a result.
    pub fn signal(&mut self, key: ExecutionKey, result: Option<Value>) -> Result<()> {
        self.ensure_key(key)?;
        let span = debug_span!("signal", execution = %self.exec(key).id);
        let _entered = span.enter();
        self.begin_operation();
        self.signal_execution(key, result)?;
        self.settle(key)
    }

    /// Deliver a message to the first waiting child of `scope` listening for
    /// it. Returns whether one caught it.
    pub fn throw_message(
        &mut self,
        scope: ExecutionKey,
        message: &str,
        variables: Variables,
    ) -> Result<bool> {
        self.ensure_key(scope)?;
        let span = debug_span!("throw_message", scope = %self.exec(scope).id, message);
        let _entered = span.enter();
        self.begin_operation();
        let caught = self.throw_in(scope, Trigger::Message, message, &variables)?;
        self.notify_thrown(scope, Trigger::Message, message);
        self.settle(scope)?;
        Ok(caught)
    }

    pub fn throw_error(
        &mut self,
        scope: ExecutionKey,
        error: &str,
        variables: Variables,
    ) -> Result<bool> {
        self.ensure_key(scope)?;
        let span = debug_span!("throw_error", scope = %self.exec(scope).id, error);
        let _entered = span.enter();
        self.begin_operation();
        let caught = self.throw_in(scope, Trigger::Error, error, &variables)?;
        self.notify_thrown(scope, Trigger::Error, error);
        self.settle(scope)?;
        Ok(caught)
    }

    /// Fire the timers of waiting children of `scope` that are due by the
    /// context clock. Returns how many fired.
    pub fn check_expired_timers(&mut self, scope: ExecutionKey) -> Result<usize> {
        self.ensure_key(scope)?;
        let span = debug_span!("check_expired_timers", scope = %self.exec(scope).id);
        let _entered = span.enter();
        self.begin_operation();
        let fired = self.fire_expired_timers(scope)?;
        self.settle(scope)?;
        Ok(fired)
    }

    /// Re-evaluate conditional catch events waiting in `scope`.
    pub fn check_conditions(&mut self, scope: ExecutionKey) -> Result<usize> {
        self.ensure_key(scope)?;
        let span = debug_span!("check_conditions", scope = %self.exec(scope).id);
        let _entered = span.enter();
        self.begin_operation();
        let fired = self.fire_satisfied_conditions(scope)?;
        self.settle(scope)?;
        Ok(fired)
    }

    /// Run every waiting automated task directly inside `scope`.
    pub fn run_automated_tasks(&mut self, scope: ExecutionKey) -> Result<usize> {
        self.ensure_key(scope)?;
        let span = debug_span!("run_automated_tasks", scope = %self.exec(scope).id);
        let _entered = span.enter();
        self.begin_operation();
        let ran = self.run_waiting_automated(scope)?;
        self.settle(scope)?;
        Ok(ran)
    }

    pub fn run_task(&mut self, key: ExecutionKey) -> Result<()> {
        self.ensure_key(key)?;
        let span = debug_span!("run_task", execution = %self.exec(key).id);
        let _entered = span.enter();
        self.begin_operation();
        self.run_automated_task(key)?;
        self.settle(key)
    }

    /// Release inclusive joins under the instance of `key` whose pending
    /// branches died during the operation.
    fn settle(&mut self, key: ExecutionKey) -> Result<()> {
        let root = self.root_of(key);
        behavior::settle_inclusive_joins(self, root)
    }

    pub(crate) fn ensure_key(&self, key: ExecutionKey) -> Result<()> {
        if key.0 < self.executions.len() {
            Ok(())
        } else {
            Err(EngineError::lookup(format!(
                "execution key {} does not belong to this context",
                key.0
            )))
        }
    }

    // ─── Queries ──────────────────────────────────────────────────────────

    pub fn get(&self, key: ExecutionKey) -> Option<&Execution> {
        self.executions.get(key.0)
    }

    /// Root executions in the order they were started or restored.
    pub fn roots(&self) -> &[ExecutionKey] {
        &self.roots
    }

    pub fn execution_by_id(&self, id: &str) -> Option<ExecutionKey> {
        self.ids.get(id).copied()
    }

    pub fn parent(&self, key: ExecutionKey) -> Option<ExecutionKey> {
        self.get(key).and_then(Execution::parent)
    }

    pub fn children(&self, key: ExecutionKey) -> &[ExecutionKey] {
        self.get(key).map(Execution::children).unwrap_or(&[])
    }

    pub fn root_of(&self, key: ExecutionKey) -> ExecutionKey {
        let mut cursor = key;
        while let Some(parent) = self.parent(cursor) {
            cursor = parent;
        }
        cursor
    }

    /// The host of a boundary event execution.
    pub fn attached_to(&self, key: ExecutionKey) -> Option<ExecutionKey> {
        let host_id = self.get(key)?.attached_to_id.as_deref()?;
        self.execution_by_id(host_id)
    }

    /// First child of `key` for `step_id`, in creation order.
    pub fn child_by_step_id(&self, key: ExecutionKey, step_id: &str) -> Option<ExecutionKey> {
        self.children(key)
            .iter()
            .copied()
            .find(|c| self.exec(*c).step_id() == Some(step_id))
    }

    pub fn children_by_step_id(&self, key: ExecutionKey, step_id: &str) -> Vec<ExecutionKey> {
        self.children(key)
            .iter()
            .copied()
            .filter(|c| self.exec(*c).step_id() == Some(step_id))
            .collect()
    }

    pub fn waiting_children(&self, key: ExecutionKey) -> Vec<ExecutionKey> {
        self.children_where(key, |_| true)
    }

    pub fn waiting_tasks(&self, key: ExecutionKey) -> Vec<ExecutionKey> {
        self.children_where(key, Step::is_task)
    }

    pub fn waiting_automated_tasks(&self, key: ExecutionKey) -> Vec<ExecutionKey> {
        self.children_where(key, Step::is_automated)
    }

    fn children_where(&self, key: ExecutionKey, predicate: impl Fn(&Step) -> bool) -> Vec<ExecutionKey> {
        self.children(key)
            .iter()
            .copied()
            .filter(|c| {
                let child = self.exec(*c);
                child.is_waiting() && child.step.as_deref().is_some_and(&predicate)
            })
            .collect()
    }
}

/// Panics on a key from another context, like slice indexing. Use
/// [`Context::get`] when the key is untrusted.
impl Index<ExecutionKey> for Context {
    type Output = Execution;

    fn index(&self, key: ExecutionKey) -> &Execution {
        self.exec(key)
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("processes", &self.definitions.processes().len())
            .field("config", &self.config)
            .field("services", &self.services)
            .field("listeners", &self.listeners)
            .field("decisions", &self.decisions.is_some())
            .field("executions", &self.executions.len())
            .field("roots", &self.roots)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ONE_TASK: &str = r#"
id: tiny
processes:
  - id: Tiny
    steps:
      - { id: Start, kind: StartEvent }
      - { id: Work, kind: UserTask }
      - { id: End, kind: EndEvent }
    flows:
      - { from: Start, to: Work }
      - { from: Work, to: End }
"#;

    #[test]
    fn queries_follow_the_tree() {
        let mut context = Context::from_yaml(ONE_TASK).unwrap();
        let root = context.start(Variables::new()).unwrap();

        assert_eq!(context.roots(), &[root]);
        let work = context.child_by_step_id(root, "Work").unwrap();
        assert_eq!(context.parent(work), Some(root));
        assert_eq!(context.root_of(work), root);
        assert_eq!(context.waiting_tasks(root), vec![work]);
        assert!(context.waiting_automated_tasks(root).is_empty());
        assert_eq!(context.execution_by_id(&context[work].id), Some(work));
        assert_eq!(context.children_by_step_id(root, "Start").len(), 1);
    }

    #[test]
    fn foreign_keys_are_rejected() {
        let mut context = Context::from_yaml(ONE_TASK).unwrap();
        let err = context.signal(ExecutionKey(42), None).unwrap_err();
        assert!(matches!(err, EngineError::Lookup(_)));
        assert!(matches!(context.serialize(ExecutionKey(42)), Err(EngineError::Lookup(_))));
        assert!(context.tree(ExecutionKey(42)).is_err());
        assert!(context.get(ExecutionKey(42)).is_none());
    }

    #[test]
    fn start_event_must_belong_to_the_process() {
        let mut context = Context::from_yaml(ONE_TASK).unwrap();
        let err = context
            .start_process("Tiny", Variables::new(), Some("Work"))
            .unwrap_err();
        assert!(matches!(err, EngineError::Lookup(_)));
        assert!(context.roots().is_empty());
    }
}
