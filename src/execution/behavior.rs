//! Per-kind step behavior: what entering, signaling and completing mean for
//! tasks, gateways, events and scopes.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

use super::lifecycle::Trigger;
use super::ExecutionKey;
use crate::context::Context;
use crate::error::{EngineError, Result};
use crate::expression::EXPRESSION_PREFIX;
use crate::model::{
    CalledElement, EventDefinition, EventKind, SequenceFlow, Step, StepKind, TaskKind,
    TimerDefinition,
};
use crate::timer;
use crate::variables::Variables;

/// Behavior on entry, after the execution has been started.
pub(crate) fn execute(ctx: &mut Context, key: ExecutionKey) -> Result<()> {
    let step = ctx.step_of(key)?;
    match &step.kind {
        StepKind::Task(_) => execute_task(ctx, key, &step),
        StepKind::ExclusiveGateway
        | StepKind::InclusiveGateway
        | StepKind::ParallelGateway
        | StepKind::EventBasedGateway => execute_gateway(ctx, key, &step),
        StepKind::Event(kind) => execute_event(ctx, key, &step, kind),
        StepKind::SubProcess => start_scope(ctx, key, &step, None),
        StepKind::CallActivity(called) => call_process(ctx, key, called),
        StepKind::Process => {
            let requested = ctx.exec(key).start_event_id.clone();
            start_scope(ctx, key, &step, requested.as_deref())
        }
    }
}

/// Behavior when a waiting execution is signaled.
pub(crate) fn signal(ctx: &mut Context, key: ExecutionKey) -> Result<()> {
    let step = ctx.step_of(key)?;
    match &step.kind {
        StepKind::Task(_) => {
            let flows = ctx.definitions.outgoing_flows(&step)?;
            leave(ctx, key, &flows)
        }
        StepKind::Event(_) => signal_event(ctx, key, &step),
        _ if step.is_gateway() && step.is_converging() => execute_gateway(ctx, key, &step),
        _ => Err(EngineError::invalid_state(format!(
            "{} `{}` does not accept signals",
            step.type_name(),
            step.id
        ))),
    }
}

/// Every child of a scope execution has ended.
pub(crate) fn complete_scope(ctx: &mut Context, key: ExecutionKey) -> Result<()> {
    let step = ctx.step_of(key)?;
    match step.kind {
        StepKind::SubProcess | StepKind::CallActivity(_) => {
            let flows = ctx.definitions.outgoing_flows(&step)?;
            leave(ctx, key, &flows)
        }
        _ => ctx.end(key, true),
    }
}

/// End the execution and move its token on along `flows`.
pub(crate) fn leave(ctx: &mut Context, key: ExecutionKey, flows: &[Arc<SequenceFlow>]) -> Result<()> {
    ctx.end(key, false)?;
    resolve_race(ctx, key)?;
    proceed(ctx, key, flows)
}

/// Take `flows` from an ended execution; without any, it was the last
/// token on its path and the enclosing scope is told.
fn proceed(ctx: &mut Context, key: ExecutionKey, flows: &[Arc<SequenceFlow>]) -> Result<()> {
    if !flows.is_empty() {
        return ctx.take_all(key, flows);
    }
    match ctx.exec(key).parent {
        Some(parent) => ctx.has_ended(parent, key),
        None => Ok(()),
    }
}

/// An execution reached through an event-based gateway won the race:
/// terminate the siblings waiting on the gateway's other branches.
fn resolve_race(ctx: &mut Context, key: ExecutionKey) -> Result<()> {
    let execution = ctx.exec(key);
    let Some(scope) = execution.parent else {
        return Ok(());
    };
    let mut rivals: Vec<String> = Vec::new();
    for flow_id in &execution.tokens_in {
        let Some(flow) = ctx.definitions.flow_by_id(flow_id) else {
            continue;
        };
        let Some(source) = ctx.definitions.step_by_id(&flow.source) else {
            continue;
        };
        if matches!(source.kind, StepKind::EventBasedGateway) {
            rivals.extend(source.outgoing.iter().filter(|f| *f != flow_id).cloned());
        }
    }
    if rivals.is_empty() {
        return Ok(());
    }

    let losers: Vec<ExecutionKey> = ctx
        .exec(scope)
        .children
        .iter()
        .copied()
        .filter(|&c| {
            let sibling = ctx.exec(c);
            c != key && !sibling.is_ended() && sibling.tokens_in.iter().any(|t| rivals.contains(t))
        })
        .collect();
    for loser in losers {
        debug!(
            winner = %ctx.exec(key).id,
            loser = %ctx.exec(loser).id,
            "event-based gateway race decided"
        );
        ctx.terminate(loser)?;
    }
    Ok(())
}

// ─── Tasks ────────────────────────────────────────────────────────────────

fn execute_task(ctx: &mut Context, key: ExecutionKey, step: &Step) -> Result<()> {
    if step.is_automated() && ctx.config.run_automated_tasks_on_enter {
        return ctx.run_automated_task(key);
    }
    ctx.wait(key)
}

/// Produce the result of an automated task, if one is available.
pub(crate) fn run_automated(ctx: &Context, key: ExecutionKey, step: &Step) -> Result<Option<Value>> {
    let StepKind::Task(task) = &step.kind else {
        return Ok(None);
    };
    match task {
        TaskKind::Service { task_type, headers } => {
            let Some(handler) = ctx.services.get(task_type) else {
                debug!(task = %step.id, task_type = %task_type, "no handler registered; task waits");
                return Ok(None);
            };
            let variables = ctx.visible_variables(key);
            Ok(handler.call(&variables, headers)?)
        }
        TaskKind::Script { script, .. } => {
            let variables = ctx.visible_variables(key);
            ctx.evaluate_expression(script, &variables).map(Some)
        }
        TaskKind::BusinessRule { decision_id, .. } => {
            let Some(decisions) = ctx.decisions.as_ref() else {
                debug!(task = %step.id, decision = %decision_id, "no decision gateway; task waits");
                return Ok(None);
            };
            let variables = ctx.visible_variables(key);
            Ok(decisions.evaluate_decision(decision_id, &variables)?)
        }
        _ => Ok(None),
    }
}

// ─── Gateways ─────────────────────────────────────────────────────────────

fn execute_gateway(ctx: &mut Context, key: ExecutionKey, step: &Step) -> Result<()> {
    if step.is_converging() && !join_ready(ctx, key, step) {
        debug!(
            gateway = %step.id,
            tokens = ?ctx.exec(key).tokens_in,
            "join waiting for more tokens"
        );
        return ctx.wait(key);
    }
    let flows = select_flows(ctx, key, step)?;
    leave(ctx, key, &flows)
}

fn join_ready(ctx: &Context, key: ExecutionKey, step: &Step) -> bool {
    let arrived = &ctx.exec(key).tokens_in;
    match step.kind {
        StepKind::ParallelGateway => step.incoming.iter().all(|f| arrived.contains(f)),
        StepKind::InclusiveGateway => inclusive_join_ready(ctx, key, step),
        _ => true,
    }
}

/// An inclusive join fires once no active sibling can still deliver a token
/// on one of the incoming flows that have not arrived yet.
fn inclusive_join_ready(ctx: &Context, key: ExecutionKey, step: &Step) -> bool {
    let execution = ctx.exec(key);
    let Some(scope) = execution.parent else {
        return true;
    };
    let pending: Vec<&SequenceFlow> = step
        .incoming
        .iter()
        .filter(|f| !execution.tokens_in.contains(*f))
        .filter_map(|f| ctx.definitions.flow_by_id(f).map(Arc::as_ref))
        .collect();
    if pending.is_empty() {
        return true;
    }

    !ctx.exec(scope).children.iter().any(|&sibling| {
        if sibling == key {
            return false;
        }
        let other = ctx.exec(sibling);
        let Some(other_step) = other.step.as_deref() else {
            return false;
        };
        !other.is_ended()
            && pending.iter().any(|flow| {
                other_step.id == flow.source
                    || ctx.definitions.can_reach(&other_step.id, &flow.source, &step.id)
            })
    })
}

/// Fire every waiting inclusive join under `root` whose missing branches
/// can no longer deliver a token. Joins only re-check themselves when a
/// token arrives, so one whose pending branch was terminated is released
/// here.
pub(crate) fn settle_inclusive_joins(ctx: &mut Context, root: ExecutionKey) -> Result<()> {
    loop {
        let view: &Context = ctx;
        let ready = view.descendants(root).into_iter().find_map(|key| {
            let execution = view.exec(key);
            let step = execution.step.clone()?;
            let waiting_join = execution.is_waiting()
                && matches!(step.kind, StepKind::InclusiveGateway)
                && step.is_converging();
            (waiting_join && inclusive_join_ready(view, key, &step)).then_some((key, step))
        });
        let Some((key, step)) = ready else {
            return Ok(());
        };
        debug!(
            gateway = %step.id,
            execution = %ctx.exec(key).id,
            "inclusive join released; no pending branch can reach it"
        );
        execute_gateway(ctx, key, &step)?;
    }
}

fn select_flows(ctx: &mut Context, key: ExecutionKey, step: &Step) -> Result<Vec<Arc<SequenceFlow>>> {
    let flows = ctx.definitions.outgoing_flows(step)?;
    if flows.is_empty() {
        return Ok(flows);
    }
    match step.kind {
        StepKind::ExclusiveGateway => {
            let scope = ctx.scope_variables(key);
            for flow in flows.iter().filter(|f| !f.is_default) {
                if flow_condition_holds(ctx, flow, &scope)? {
                    ctx.exec_mut(key).condition = flow.condition.clone();
                    return Ok(vec![flow.clone()]);
                }
            }
            default_flow(step, &flows).map(|flow| vec![flow])
        }
        StepKind::InclusiveGateway => {
            let scope = ctx.scope_variables(key);
            let mut selected = Vec::new();
            for flow in flows.iter().filter(|f| !f.is_default) {
                if flow_condition_holds(ctx, flow, &scope)? {
                    selected.push(flow.clone());
                }
            }
            if selected.is_empty() {
                selected.push(default_flow(step, &flows)?);
            }
            Ok(selected)
        }
        _ => Ok(flows),
    }
}

fn flow_condition_holds(ctx: &Context, flow: &SequenceFlow, variables: &Variables) -> Result<bool> {
    match flow.condition.as_deref() {
        None => Ok(true),
        Some(condition) => ctx.evaluate_condition(condition, variables),
    }
}

fn default_flow(step: &Step, flows: &[Arc<SequenceFlow>]) -> Result<Arc<SequenceFlow>> {
    flows.iter().find(|f| f.is_default).cloned().ok_or_else(|| {
        EngineError::graph(format!(
            "{} `{}`: no outgoing condition holds and there is no default flow",
            step.type_name(),
            step.id
        ))
    })
}

// ─── Events ───────────────────────────────────────────────────────────────

fn execute_event(ctx: &mut Context, key: ExecutionKey, step: &Step, kind: &EventKind) -> Result<()> {
    match kind {
        EventKind::Start => {
            let triggered = ctx
                .exec(key)
                .parent
                .and_then(|p| ctx.exec(p).start_event_id.as_deref())
                == Some(step.id.as_str());
            if step.event_definitions.is_empty() || triggered {
                pass_through(ctx, key, step)
            } else {
                catch(ctx, key, step)
            }
        }
        EventKind::IntermediateCatch if step.event_definitions.is_empty() => {
            pass_through(ctx, key, step)
        }
        EventKind::IntermediateCatch | EventKind::Boundary { .. } => catch(ctx, key, step),
        EventKind::IntermediateThrow | EventKind::End => throw(ctx, key, step),
    }
}

fn pass_through(ctx: &mut Context, key: ExecutionKey, step: &Step) -> Result<()> {
    let flows = ctx.definitions.outgoing_flows(step)?;
    leave(ctx, key, &flows)
}

/// Register what the event waits for, then wait. A conditional definition
/// whose condition already holds fires straight away.
fn catch(ctx: &mut Context, key: ExecutionKey, step: &Step) -> Result<()> {
    let mut message_names = Vec::new();
    let mut error_names = Vec::new();
    let mut expires_at = None;
    let mut condition = None;
    let mut satisfied = false;

    for definition in &step.event_definitions {
        match definition {
            EventDefinition::Message { message } => message_names.push(message.clone()),
            EventDefinition::Error { error } => error_names.push(error.clone()),
            EventDefinition::Timer(timer) => expires_at = Some(timer_expiry(ctx, key, timer)?),
            EventDefinition::Conditional { condition: expression } => {
                let variables = ctx.scope_variables(key);
                satisfied |= ctx.evaluate_condition(expression, &variables)?;
                condition = Some(expression.clone());
            }
            EventDefinition::Terminate => {
                return Err(EngineError::graph(format!(
                    "{} `{}` cannot wait for a terminate definition",
                    step.type_name(),
                    step.id
                )))
            }
        }
    }

    {
        let execution = ctx.exec_mut(key);
        execution.message_names = message_names;
        execution.error_names = error_names;
        execution.timer_expires_at = expires_at;
        execution.condition = condition;
    }

    if satisfied {
        return signal_event(ctx, key, step);
    }
    ctx.wait(key)
}

/// Timer values starting with `=` are expressions producing the actual
/// duration, date or cycle text.
fn timer_expiry(ctx: &Context, key: ExecutionKey, timer: &TimerDefinition) -> Result<DateTime<Utc>> {
    let variables = ctx.scope_variables(key);
    let resolve = |value: &Option<String>| -> Result<Option<String>> {
        match value.as_deref() {
            Some(text) if text.starts_with(EXPRESSION_PREFIX) => {
                Ok(Some(match ctx.evaluate_expression(text, &variables)? {
                    Value::String(resolved) => resolved,
                    other => other.to_string(),
                }))
            }
            other => Ok(other.map(str::to_string)),
        }
    };
    let resolved = TimerDefinition {
        duration: resolve(&timer.duration)?,
        date: resolve(&timer.date)?,
        cycle: resolve(&timer.cycle)?,
    };
    timer::expires_at(&resolved, ctx.clock.now())
}

/// A caught event fired: end it, interrupt the host when the boundary
/// cancels, settle any event-based race, and move on.
fn signal_event(ctx: &mut Context, key: ExecutionKey, step: &Step) -> Result<()> {
    let cancel_host = match &step.kind {
        StepKind::Event(EventKind::Boundary { cancel_activity, .. }) => *cancel_activity,
        StepKind::Event(EventKind::End | EventKind::IntermediateThrow) => {
            return Err(EngineError::invalid_state(format!(
                "{} `{}` is a throw event and does not accept signals",
                step.type_name(),
                step.id
            )))
        }
        _ => false,
    };
    let flows = ctx.definitions.outgoing_flows(step)?;

    ctx.end(key, false)?;
    if cancel_host {
        if let Some(host) = ctx.attached_to(key) {
            debug!(
                boundary = %step.id,
                host = %ctx.exec(host).id,
                "interrupting boundary event fired"
            );
            ctx.terminate(host)?;
        }
    }
    resolve_race(ctx, key)?;
    proceed(ctx, key, &flows)
}

/// Throw each definition up the scope chain, then leave unless the throw
/// ended this execution on the way.
fn throw(ctx: &mut Context, key: ExecutionKey, step: &Step) -> Result<()> {
    let payload = ctx.exec(key).variables.clone();
    for definition in &step.event_definitions {
        match definition {
            EventDefinition::Message { message } => {
                propagate(ctx, key, Trigger::Message, message, &payload)?;
            }
            EventDefinition::Error { error } => {
                propagate(ctx, key, Trigger::Error, error, &payload)?;
            }
            EventDefinition::Terminate => {
                ctx.end(key, false)?;
                let root = ctx.root_of(key);
                info!(
                    event = %step.id,
                    root = %ctx.exec(root).id,
                    "terminate end event reached"
                );
                return ctx.terminate(root);
            }
            EventDefinition::Timer(_) | EventDefinition::Conditional { .. } => {
                return Err(EngineError::graph(format!(
                    "{} `{}` cannot throw a {} definition",
                    step.type_name(),
                    step.id,
                    definition.kind_name()
                )))
            }
        }
        if ctx.exec(key).is_ended() {
            return Ok(());
        }
    }
    let flows = ctx.definitions.outgoing_flows(step)?;
    leave(ctx, key, &flows)
}

/// Offer the throw to each enclosing scope, innermost first, until one has
/// a matching catcher. Listeners hear of it once, on the thrower's scope.
fn propagate(
    ctx: &mut Context,
    key: ExecutionKey,
    trigger: Trigger,
    name: &str,
    payload: &Variables,
) -> Result<bool> {
    let origin = ctx.exec(key).parent;
    let mut scope = origin;
    let mut caught = false;
    while let Some(current) = scope {
        if ctx.throw_in(current, trigger, name, payload)? {
            caught = true;
            break;
        }
        scope = ctx.exec(current).parent;
    }
    if !caught {
        debug!(trigger = ?trigger, name, "nothing caught the throw");
    }
    if let Some(origin) = origin {
        ctx.notify_thrown(origin, trigger, name);
    }
    Ok(caught)
}

// ─── Scopes ───────────────────────────────────────────────────────────────

/// Enter a process or sub-process through its start events. Every start
/// event is placed before any runs so an early end cannot complete the
/// scope under the others.
fn start_scope(ctx: &mut Context, key: ExecutionKey, step: &Step, requested: Option<&str>) -> Result<()> {
    let starts = match requested {
        Some(id) => vec![ctx.definitions.require_step(id)?],
        None => ctx.definitions.start_events(step)?,
    };
    if starts.is_empty() {
        return Err(EngineError::graph(format!(
            "{} `{}` has no start event",
            step.type_name(),
            step.id
        )));
    }
    let prepared: Vec<ExecutionKey> = starts
        .into_iter()
        .map(|start| ctx.prepare_child(key, start, None, None))
        .collect();
    for child in prepared {
        if ctx.exec(key).is_ended() {
            break;
        }
        if ctx.exec(child).is_activated() {
            ctx.start_execution(child)?;
        }
    }
    Ok(())
}

fn call_process(ctx: &mut Context, key: ExecutionKey, called: &CalledElement) -> Result<()> {
    let process = ctx.definitions.require_process(&called.process_id)?;
    let variables = if called.propagate_parent_variables {
        ctx.visible_variables(key)
    } else {
        Variables::new()
    };
    let child = ctx.allocate(Some(process), Some(key), None, variables);
    debug!(
        call_activity = %ctx.exec(key).id,
        process = %called.process_id,
        instance = %ctx.exec(child).id,
        "calling process"
    );
    ctx.start_execution(child)
}
