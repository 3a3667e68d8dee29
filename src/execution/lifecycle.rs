//! Lifecycle operations on the execution tree: start, continue, wait, take,
//! end, terminate and the scope-level stimuli. Step-kind specifics live in
//! [`behavior`](super::behavior).

use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, trace};
use uuid::Uuid;

use super::behavior;
use super::{Execution, ExecutionKey, ExecutionStatus};
use crate::context::Context;
use crate::error::{EngineError, Result};
use crate::expression::strip_prefix;
use crate::listener::{LifecycleEvent, ListenerEvent};
use crate::model::{EventKind, SequenceFlow, Step, StepKind};
use crate::variables::{underscore, Variables};

/// What a scope-level throw is looking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Trigger {
    Message,
    Error,
}

impl Context {
    // ─── Arena ────────────────────────────────────────────────────────────

    pub(crate) fn exec(&self, key: ExecutionKey) -> &Execution {
        &self.executions[key.0]
    }

    pub(crate) fn exec_mut(&mut self, key: ExecutionKey) -> &mut Execution {
        &mut self.executions[key.0]
    }

    pub(crate) fn step_of(&self, key: ExecutionKey) -> Result<Arc<Step>> {
        let execution = self.exec(key);
        execution
            .step
            .clone()
            .ok_or_else(|| EngineError::lookup(format!("execution {} has no step", execution.id)))
    }

    pub(crate) fn allocate(
        &mut self,
        step: Option<Arc<Step>>,
        parent: Option<ExecutionKey>,
        attached_to_id: Option<String>,
        variables: Variables,
    ) -> ExecutionKey {
        let key = ExecutionKey(self.executions.len());
        let id = self.generate_id();
        self.ids.insert(id.clone(), key);
        self.executions.push(Execution::new(
            key,
            id,
            step,
            parent,
            attached_to_id,
            variables,
        ));
        if let Some(parent) = parent {
            self.exec_mut(parent).children.push(key);
        }
        key
    }

    /// Every execution below `key`, parents before their children.
    pub(crate) fn descendants(&self, key: ExecutionKey) -> Vec<ExecutionKey> {
        let mut found = Vec::new();
        let mut stack: Vec<ExecutionKey> = self.exec(key).children.iter().rev().copied().collect();
        while let Some(next) = stack.pop() {
            found.push(next);
            stack.extend(self.exec(next).children.iter().rev().copied());
        }
        found
    }

    fn generate_id(&self) -> String {
        loop {
            let id = Uuid::new_v4().simple().to_string();
            if !self.ids.contains_key(&id) {
                return id;
            }
        }
    }

    pub(crate) fn begin_operation(&mut self) {
        self.steps_taken = 0;
    }

    fn tick(&mut self, key: ExecutionKey) -> Result<()> {
        self.steps_taken += 1;
        if self.steps_taken > self.config.max_steps_per_operation {
            return Err(EngineError::graph(format!(
                "operation exceeded {} step dispatches at `{}`; the graph loops without reaching a wait state",
                self.config.max_steps_per_operation,
                self.exec(key).step_id().unwrap_or("-")
            )));
        }
        Ok(())
    }

    pub(crate) fn notify(
        &self,
        kind: LifecycleEvent,
        key: ExecutionKey,
        flow: Option<&SequenceFlow>,
        name: Option<&str>,
    ) {
        let execution = self.exec(key);
        debug!(
            event = kind.name(),
            execution = %execution.id,
            step = execution.step_id().unwrap_or("-"),
            status = %execution.status,
            flow = ?flow.map(|f| f.id.as_str()),
            name = ?name,
            "lifecycle"
        );
        self.listeners.emit(&ListenerEvent {
            kind,
            execution,
            sequence_flow: flow,
            name,
        });
    }

    // ─── Variables & expressions ──────────────────────────────────────────

    /// Variables visible from `key`: its own merged over its ancestors',
    /// stopping at the enclosing process instance.
    pub fn visible_variables(&self, key: ExecutionKey) -> Variables {
        let mut chain = vec![key];
        let mut cursor = key;
        while !self.is_variable_boundary(cursor) {
            match self.exec(cursor).parent {
                Some(parent) => {
                    chain.push(parent);
                    cursor = parent;
                }
                None => break,
            }
        }
        let mut merged = Variables::new();
        for link in chain.iter().rev() {
            merged.merge(&self.exec(*link).variables);
        }
        merged
    }

    fn is_variable_boundary(&self, key: ExecutionKey) -> bool {
        matches!(
            self.exec(key).step.as_deref().map(|s| &s.kind),
            Some(StepKind::Process)
        )
    }

    /// Variables an execution's conditions and mappings read: those of the
    /// scope it runs in.
    pub(crate) fn scope_variables(&self, key: ExecutionKey) -> Variables {
        match self.exec(key).parent {
            Some(parent) => self.visible_variables(parent),
            None => self.exec(key).variables.clone(),
        }
    }

    pub(crate) fn evaluate_expression(&self, text: &str, variables: &Variables) -> Result<Value> {
        Ok(self.expressions.evaluate(strip_prefix(text), variables)?)
    }

    pub(crate) fn evaluate_condition(&self, text: &str, variables: &Variables) -> Result<bool> {
        Ok(self
            .expressions
            .evaluate_condition(strip_prefix(text), variables)?)
    }

    fn apply_input_mappings(&mut self, key: ExecutionKey) -> Result<()> {
        let step = self.step_of(key)?;
        if step.input_mappings.is_empty() {
            return Ok(());
        }
        let scope = self.scope_variables(key);
        for mapping in &step.input_mappings {
            let value = self.evaluate_expression(&mapping.source, &scope)?;
            self.exec_mut(key)
                .variables
                .insert(mapping.target.clone(), value);
        }
        Ok(())
    }

    fn output_mapping_values(&self, key: ExecutionKey) -> Result<Vec<(String, Value)>> {
        let Some(step) = self.exec(key).step.as_deref() else {
            return Ok(Vec::new());
        };
        let own = &self.exec(key).variables;
        step.output_mappings
            .iter()
            .map(|m| Ok((m.target.clone(), self.evaluate_expression(&m.source, own)?)))
            .collect()
    }

    fn result_variables(&self, key: ExecutionKey, result: Value) -> Result<Variables> {
        if result.is_null() {
            return Ok(Variables::new());
        }
        let step = self.step_of(key)?;
        if let Some(name) = step.result_variable() {
            return Ok([(name, result)].into_iter().collect());
        }
        Ok(match result {
            Value::Object(map) => map.into(),
            other => [(underscore(&step.id), other)].into_iter().collect(),
        })
    }

    // ─── Lifecycle ────────────────────────────────────────────────────────

    pub(crate) fn start_execution(&mut self, key: ExecutionKey) -> Result<()> {
        let now = self.clock.now();
        let first_start = self.exec(key).is_activated();
        {
            let execution = self.exec_mut(key);
            execution.status = ExecutionStatus::Started;
            execution.started_at.get_or_insert(now);
        }
        if first_start {
            self.apply_input_mappings(key)?;
        }
        self.notify(LifecycleEvent::ExecutionStarted, key, None, None);
        if first_start {
            self.spawn_boundary_events(key)?;
        }
        self.continue_execution(key)
    }

    fn spawn_boundary_events(&mut self, key: ExecutionKey) -> Result<()> {
        let step = self.step_of(key)?;
        if step.attachments.is_empty() || !step.is_activity() {
            return Ok(());
        }
        let Some(parent) = self.exec(key).parent else {
            return Ok(());
        };
        let host_id = self.exec(key).id.clone();
        for attachment_id in &step.attachments {
            let attachment = self.definitions.require_step(attachment_id)?;
            self.execute_step(parent, attachment, Some(host_id.clone()), None)?;
        }
        Ok(())
    }

    pub(crate) fn continue_execution(&mut self, key: ExecutionKey) -> Result<()> {
        self.tick(key)?;
        behavior::execute(self, key)
    }

    pub(crate) fn wait(&mut self, key: ExecutionKey) -> Result<()> {
        self.exec_mut(key).status = ExecutionStatus::Waiting;
        self.notify(LifecycleEvent::ExecutionWaited, key, None, None);
        Ok(())
    }

    /// Find the unended child of `parent` for `step`, or create one, and
    /// record the arriving token. Boundary instances are always new.
    pub(crate) fn prepare_child(
        &mut self,
        parent: ExecutionKey,
        step: Arc<Step>,
        attached_to_id: Option<String>,
        flow: Option<&SequenceFlow>,
    ) -> ExecutionKey {
        let existing = if attached_to_id.is_none() {
            self.exec(parent).children.iter().copied().find(|c| {
                let child = self.exec(*c);
                !child.is_ended() && child.step_id() == Some(step.id.as_str())
            })
        } else {
            None
        };
        let key = match existing {
            Some(key) => key,
            None => self.allocate(Some(step), Some(parent), attached_to_id, Variables::new()),
        };
        if let Some(flow) = flow {
            self.exec_mut(key).record_token_in(&flow.id);
        }
        key
    }

    pub(crate) fn execute_step(
        &mut self,
        parent: ExecutionKey,
        step: Arc<Step>,
        attached_to_id: Option<String>,
        flow: Option<&SequenceFlow>,
    ) -> Result<ExecutionKey> {
        let key = self.prepare_child(parent, step, attached_to_id, flow);
        self.start_execution(key)?;
        Ok(key)
    }

    /// Emit a token on every flow, then start the targets. All targets are
    /// placed in the tree before any of them runs, so joins downstream see
    /// every branch that is still pending.
    pub(crate) fn take_all(&mut self, key: ExecutionKey, flows: &[Arc<SequenceFlow>]) -> Result<()> {
        let parent = self.exec(key).parent.ok_or_else(|| {
            EngineError::invalid_state(format!(
                "execution {} has no enclosing scope to take flows in",
                self.exec(key).id
            ))
        })?;
        if self.exec(parent).is_ended() {
            return Ok(());
        }

        let mut targets: Vec<ExecutionKey> = Vec::with_capacity(flows.len());
        for flow in flows {
            self.exec_mut(key).record_token_out(&flow.id);
            self.notify(LifecycleEvent::FlowTaken, key, Some(flow), None);
            let target = self.definitions.require_step(&flow.target)?;
            let child = self.prepare_child(parent, target, None, Some(flow));
            if !targets.contains(&child) {
                targets.push(child);
            }
        }

        for child in targets {
            if self.exec(parent).is_ended() {
                break;
            }
            if !self.exec(child).is_ended() {
                self.start_execution(child)?;
            }
        }
        Ok(())
    }

    pub(crate) fn end(&mut self, key: ExecutionKey, notify_parent: bool) -> Result<()> {
        self.finish(key, ExecutionStatus::Completed, notify_parent)
    }

    pub(crate) fn terminate(&mut self, key: ExecutionKey) -> Result<()> {
        self.finish(key, ExecutionStatus::Terminated, false)
    }

    fn finish(
        &mut self,
        key: ExecutionKey,
        status: ExecutionStatus,
        notify_parent: bool,
    ) -> Result<()> {
        if self.exec(key).is_ended() {
            return Ok(());
        }
        let outputs = if status == ExecutionStatus::Completed {
            self.output_mapping_values(key)?
        } else {
            Vec::new()
        };

        let now = self.clock.now();
        let parent = {
            let execution = self.exec_mut(key);
            execution.status = status;
            for (target, value) in outputs {
                execution.variables.insert(target, value);
            }
            execution.ended_at = Some(now);
            execution.parent
        };

        if status == ExecutionStatus::Completed {
            if let Some(parent) = parent {
                let variables = self.exec(key).variables.clone();
                if !variables.is_empty() {
                    self.exec_mut(parent).variables.merge(&variables);
                }
            }
        }

        if parent.is_none() {
            info!(execution = %self.exec(key).id, status = %status, "process instance ended");
        }
        self.notify(LifecycleEvent::ExecutionEnded, key, None, None);

        let children = self.exec(key).children.clone();
        for child in children {
            if !self.exec(child).is_ended() {
                self.finish(child, ExecutionStatus::Terminated, false)?;
            }
        }

        if let Some(parent) = parent {
            let host_id = self.exec(key).id.clone();
            let boundaries: Vec<ExecutionKey> = self
                .exec(parent)
                .children
                .iter()
                .copied()
                .filter(|c| {
                    let sibling = self.exec(*c);
                    sibling.is_waiting() && sibling.attached_to_id.as_deref() == Some(host_id.as_str())
                })
                .collect();
            for boundary in boundaries {
                self.finish(boundary, ExecutionStatus::Terminated, false)?;
            }
            if notify_parent {
                self.has_ended(parent, key)?;
            }
        }
        Ok(())
    }

    /// A child of `scope` ended. An end event, or the process instance of a
    /// call activity, completes the scope at once and anything still
    /// running inside it is terminated. Other paths that simply run out of
    /// flows complete the scope once nothing inside it is still running.
    pub(crate) fn has_ended(&mut self, scope: ExecutionKey, child: ExecutionKey) -> Result<()> {
        let execution = self.exec(scope);
        if execution.is_ended() {
            return Ok(());
        }
        let ends_scope = matches!(
            self.exec(child).step.as_deref().map(|s| &s.kind),
            Some(StepKind::Event(EventKind::End) | StepKind::Process)
        );
        if !ends_scope && execution.children.iter().any(|c| !self.exec(*c).is_ended()) {
            trace!(
                scope = %execution.id,
                child = %self.exec(child).id,
                "scope still has active children"
            );
            return Ok(());
        }
        behavior::complete_scope(self, scope)
    }

    pub(crate) fn signal_execution(&mut self, key: ExecutionKey, result: Option<Value>) -> Result<()> {
        let execution = self.exec(key);
        if execution.is_ended() {
            return Err(EngineError::invalid_state(format!(
                "execution {} ({}) has already {}",
                execution.id,
                execution.step_id().unwrap_or("-"),
                execution.status
            )));
        }
        if let Some(result) = result {
            let variables = self.result_variables(key, result)?;
            self.exec_mut(key).variables.merge(&variables);
        }
        behavior::signal(self, key)
    }

    // ─── Scope-level stimuli ──────────────────────────────────────────────

    /// Deliver a message or error to the first waiting child of `scope`
    /// registered for `name`. Returns whether one matched.
    pub(crate) fn throw_in(
        &mut self,
        scope: ExecutionKey,
        trigger: Trigger,
        name: &str,
        variables: &Variables,
    ) -> Result<bool> {
        let target = self.exec(scope).children.iter().copied().find(|c| {
            let child = self.exec(*c);
            let names = match trigger {
                Trigger::Message => &child.message_names,
                Trigger::Error => &child.error_names,
            };
            child.is_waiting() && names.iter().any(|n| n == name)
        });

        if let Some(target) = target {
            debug!(
                trigger = ?trigger,
                name,
                catcher = %self.exec(target).id,
                step = self.exec(target).step_id().unwrap_or("-"),
                "delivering"
            );
            self.signal_execution(target, Some(variables.to_value()))?;
        }
        Ok(target.is_some())
    }

    /// Tell listeners a message or error was thrown into `scope`, whether or
    /// not anything caught it.
    pub(crate) fn notify_thrown(&self, scope: ExecutionKey, trigger: Trigger, name: &str) {
        let event = match trigger {
            Trigger::Message => LifecycleEvent::MessageThrown,
            Trigger::Error => LifecycleEvent::ErrorThrown,
        };
        self.notify(event, scope, None, Some(name));
    }

    pub(crate) fn fire_expired_timers(&mut self, scope: ExecutionKey) -> Result<usize> {
        let now = self.clock.now();
        let due: Vec<ExecutionKey> = self
            .exec(scope)
            .children
            .iter()
            .copied()
            .filter(|c| {
                let child = self.exec(*c);
                child.is_waiting() && child.timer_expires_at.is_some_and(|at| at <= now)
            })
            .collect();

        let mut fired = 0;
        for key in due {
            // An earlier timer may have interrupted this one.
            if !self.exec(key).is_waiting() {
                continue;
            }
            debug!(execution = %self.exec(key).id, "timer expired");
            self.signal_execution(key, None)?;
            fired += 1;
        }
        Ok(fired)
    }

    pub(crate) fn fire_satisfied_conditions(&mut self, scope: ExecutionKey) -> Result<usize> {
        let armed: Vec<ExecutionKey> = self
            .exec(scope)
            .children
            .iter()
            .copied()
            .filter(|c| {
                let child = self.exec(*c);
                child.is_waiting()
                    && child.condition.is_some()
                    && child.step.as_deref().is_some_and(Step::is_catch_event)
            })
            .collect();

        let mut fired = 0;
        for key in armed {
            if !self.exec(key).is_waiting() {
                continue;
            }
            let Some(condition) = self.exec(key).condition.clone() else {
                continue;
            };
            let variables = self.scope_variables(key);
            if self.evaluate_condition(&condition, &variables)? {
                self.signal_execution(key, None)?;
                fired += 1;
            }
        }
        Ok(fired)
    }

    pub(crate) fn run_waiting_automated(&mut self, scope: ExecutionKey) -> Result<usize> {
        let tasks: Vec<ExecutionKey> = self
            .exec(scope)
            .children
            .iter()
            .copied()
            .filter(|c| {
                let child = self.exec(*c);
                child.is_waiting() && child.step.as_deref().is_some_and(Step::is_automated)
            })
            .collect();

        let mut ran = 0;
        for key in tasks {
            if !self.exec(key).is_waiting() {
                continue;
            }
            self.run_automated_task(key)?;
            ran += 1;
        }
        Ok(ran)
    }

    /// Run an automated task; signal it with the result, or leave it waiting
    /// when no result is available yet.
    pub(crate) fn run_automated_task(&mut self, key: ExecutionKey) -> Result<()> {
        let execution = self.exec(key);
        if execution.is_ended() {
            return Err(EngineError::invalid_state(format!(
                "execution {} has already {}",
                execution.id, execution.status
            )));
        }
        let step = self.step_of(key)?;
        if !step.is_automated() {
            return Err(EngineError::invalid_state(format!(
                "{} `{}` is not an automated task",
                step.type_name(),
                step.id
            )));
        }
        match behavior::run_automated(self, key, &step)? {
            Some(result) if !result.is_null() => self.signal_execution(key, Some(result)),
            _ => {
                if !self.exec(key).is_waiting() {
                    self.wait(key)?;
                }
                Ok(())
            }
        }
    }
}
