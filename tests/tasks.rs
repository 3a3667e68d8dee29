//! Tasks: waiting for signals, result handling and automated execution.

mod common;

use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bpmn_flow::{
    DecisionGateway, EngineConfig, EngineError, ExecutionStatus, Headers, Variables,
};
use common::Harness;

// ---------------------------------------------------------------------------
// Plain tasks
// ---------------------------------------------------------------------------

#[test]
fn task_waits_until_signaled() {
    let mut h = Harness::new("task.yaml");
    let root = h.start(json!({}));

    let task = h.child(root, "UserTask");
    assert_eq!(h.context[task].status, ExecutionStatus::Waiting);
    assert_eq!(h.context[root].status, ExecutionStatus::Started);
    assert_eq!(h.context.waiting_tasks(root), vec![task]);

    h.context.signal(task, Some(json!({ "foo": "bar" }))).unwrap();

    assert!(h.context[task].is_completed());
    assert!(h.context[h.child(root, "End")].is_completed());
    assert!(h.context[root].is_completed());
    assert_eq!(h.context[root].variables.get("foo"), Some(&json!("bar")));
    assert!(h.context[root].ended_at.is_some());
}

#[test]
fn lifecycle_events_arrive_in_order() {
    let mut h = Harness::new("task.yaml");
    let root = h.start(json!({}));
    assert_eq!(
        h.events(),
        vec![
            "executionStarted:Task",
            "executionStarted:Start",
            "executionEnded:Start",
            "flowTaken:Flow_Start_UserTask",
            "executionStarted:UserTask",
            "executionWaited:UserTask",
        ]
    );

    h.clear_events();
    let task = h.child(root, "UserTask");
    h.context.signal(task, None).unwrap();
    assert_eq!(
        h.events(),
        vec![
            "executionEnded:UserTask",
            "flowTaken:Flow_UserTask_End",
            "executionStarted:End",
            "executionEnded:End",
            "executionEnded:Task",
        ]
    );
}

#[test]
fn scalar_result_is_stored_under_the_step_name() {
    let mut h = Harness::new("task.yaml");
    let root = h.start(json!({}));
    let task = h.child(root, "UserTask");

    h.context.signal(task, Some(json!(42))).unwrap();

    assert_eq!(h.context[root].variables.get("user_task"), Some(&json!(42)));
}

#[test]
fn signaling_an_ended_execution_is_rejected() {
    let mut h = Harness::new("task.yaml");
    let root = h.start(json!({}));
    let task = h.child(root, "UserTask");
    h.context.signal(task, None).unwrap();

    let err = h.context.signal(task, None).unwrap_err();
    assert!(matches!(err, EngineError::InvalidState(_)), "{err}");
}

#[test]
fn scopes_do_not_accept_signals() {
    let mut h = Harness::new("task.yaml");
    let root = h.start(json!({}));

    let err = h.context.signal(root, None).unwrap_err();
    assert!(matches!(err, EngineError::InvalidState(_)), "{err}");
    assert!(h.context[h.child(root, "UserTask")].is_waiting());
}

// ---------------------------------------------------------------------------
// Service tasks
// ---------------------------------------------------------------------------

#[test]
fn service_task_runs_its_handler_on_entry() {
    let mut h = Harness::new("automated_tasks.yaml");
    h.context.register_service(
        "lookup-customer",
        |variables: &Variables, headers: &Headers| -> anyhow::Result<Option<Value>> {
            Ok(Some(json!({
                "customer": format!("{}-{}", variables.get("id").unwrap(), headers["region"]),
            })))
        },
    );
    let root = h.start_process("Service", json!({ "id": 7 }));

    assert!(h.context[h.child(root, "Lookup")].is_completed());
    assert!(h.context[root].is_completed());
    assert_eq!(h.context[root].variables.get("customer"), Some(&json!("7-eu")));
}

#[test]
fn service_task_without_handler_waits_for_a_later_run() {
    let mut h = Harness::new("automated_tasks.yaml");
    let root = h.start_process("Service", json!({}));
    let lookup = h.child(root, "Lookup");
    assert!(h.context[lookup].is_waiting());
    assert_eq!(h.context.waiting_automated_tasks(root), vec![lookup]);

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    h.context.register_service(
        "lookup-customer",
        move |_: &Variables, _: &Headers| -> anyhow::Result<Option<Value>> {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Some(json!({ "found": true })))
        },
    );

    assert_eq!(h.context.run_automated_tasks(root).unwrap(), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(h.context[root].is_completed());
    assert_eq!(h.context.run_automated_tasks(root).unwrap(), 0);
}

#[test]
fn handler_returning_none_keeps_the_task_waiting() {
    let mut h = Harness::new("automated_tasks.yaml");
    h.context.register_service(
        "lookup-customer",
        |_: &Variables, _: &Headers| -> anyhow::Result<Option<Value>> { Ok(None) },
    );
    let root = h.start_process("Service", json!({}));
    let lookup = h.child(root, "Lookup");

    assert!(h.context[lookup].is_waiting());
    h.context.run_task(lookup).unwrap();
    assert!(h.context[lookup].is_waiting());

    h.context.signal(lookup, Some(json!({ "manual": true }))).unwrap();
    assert!(h.context[root].is_completed());
}

#[test]
fn handler_failures_propagate_unchanged() {
    let mut h = Harness::new("automated_tasks.yaml");
    h.context.register_service(
        "lookup-customer",
        |_: &Variables, _: &Headers| -> anyhow::Result<Option<Value>> {
            anyhow::bail!("customer service unavailable")
        },
    );
    let err = h
        .context
        .start_process("Service", Variables::new(), None)
        .unwrap_err();

    assert!(matches!(err, EngineError::Collaborator(_)));
    assert_eq!(err.to_string(), "customer service unavailable");
}

#[test]
fn automated_tasks_can_be_deferred_by_configuration() {
    let mut h = Harness::configured("automated_tasks.yaml", |context| {
        context.with_config(EngineConfig {
            run_automated_tasks_on_enter: false,
            ..EngineConfig::default()
        })
    });
    let root = h.start_process("Script", json!({ "price": 10, "shipping": 5 }));
    let total = h.child(root, "Total");
    assert!(h.context[total].is_waiting());

    h.context.run_task(total).unwrap();
    assert_eq!(h.context[root].variables.get("total"), Some(&json!(15)));
    assert!(h.context[root].is_completed());
}

#[test]
fn run_task_rejects_manual_tasks() {
    let mut h = Harness::new("task.yaml");
    let root = h.start(json!({}));
    let task = h.child(root, "UserTask");

    let err = h.context.run_task(task).unwrap_err();
    assert!(matches!(err, EngineError::InvalidState(_)));
}

// ---------------------------------------------------------------------------
// Script and business rule tasks
// ---------------------------------------------------------------------------

#[test]
fn script_result_lands_in_the_result_variable() {
    let mut h = Harness::new("automated_tasks.yaml");
    let root = h.start_process("Script", json!({ "price": 10, "shipping": 5 }));

    assert!(h.context[root].is_completed());
    assert_eq!(h.context[root].variables.get("total"), Some(&json!(15)));
}

struct Menu;

impl DecisionGateway for Menu {
    fn evaluate_decision(
        &self,
        decision_id: &str,
        variables: &Variables,
    ) -> anyhow::Result<Option<Value>> {
        assert_eq!(decision_id, "Dish");
        let dish = match variables.get("season").and_then(Value::as_str) {
            Some("Summer") => "Salad",
            _ => "Stew",
        };
        Ok(Some(json!({ "dish": dish })))
    }
}

#[test]
fn business_rule_task_uses_the_decision_gateway() {
    let mut h = Harness::configured("automated_tasks.yaml", |context| {
        context.with_decisions(Arc::new(Menu))
    });
    let root = h.start_process("Decision", json!({ "season": "Summer" }));

    assert!(h.context[root].is_completed());
    assert_eq!(
        h.context[root].variables.get("dinner"),
        Some(&json!({ "dish": "Salad" }))
    );
}

#[test]
fn business_rule_task_without_gateway_waits() {
    let mut h = Harness::new("automated_tasks.yaml");
    let root = h.start_process("Decision", json!({}));
    assert!(h.context[h.child(root, "ChooseDish")].is_waiting());
}
