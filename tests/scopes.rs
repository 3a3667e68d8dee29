//! Scopes: loops back into a scope, sub-process variable mappings and
//! called processes.

mod common;

use pretty_assertions::assert_eq;
use serde_json::json;

use common::Harness;

// ---------------------------------------------------------------------------
// Loops
// ---------------------------------------------------------------------------

#[test]
fn looping_back_creates_a_fresh_execution_per_visit() {
    let mut h = Harness::new("repeat.yaml");
    let root = h.start_process("RepeatTask", json!({ "again": true }));

    let first = h.child(root, "Work");
    h.context.signal(first, None).unwrap();

    let works = h.context.children_by_step_id(root, "Work");
    assert_eq!(works.len(), 2);
    assert!(h.context[first].is_completed());
    assert_eq!(h.context.waiting_tasks(root), vec![works[1]]);
    assert_eq!(h.context.children_by_step_id(root, "Merge").len(), 2);
    assert!(h.events().contains(&"flowTaken:Loop".to_string()));

    h.context
        .signal(works[1], Some(json!({ "again": false })))
        .unwrap();
    assert!(h.context[h.child(root, "End")].is_completed());
    assert!(h.context[root].is_completed());
}

#[test]
fn parallel_round_can_run_twice() {
    let mut h = Harness::new("repeat.yaml");
    let root = h.start_process("RepeatParallel", json!({ "again": true }));

    let left = h.child(root, "Left");
    let right = h.child(root, "Right");
    h.context.signal(left, None).unwrap();
    h.context.signal(right, None).unwrap();

    let joins = h.context.children_by_step_id(root, "Join");
    assert_eq!(joins.len(), 1);
    assert!(h.context[joins[0]].is_completed());
    let waiting = h.context.waiting_tasks(root);
    assert_eq!(waiting.len(), 2);

    h.context
        .signal(waiting[0], Some(json!({ "again": false })))
        .unwrap();
    let joins = h.context.children_by_step_id(root, "Join");
    assert_eq!(joins.len(), 2);
    assert!(h.context[joins[1]].is_waiting());
    assert_eq!(h.context[joins[1]].tokens_in.len(), 1);

    h.context.signal(waiting[1], None).unwrap();
    assert!(h.context[joins[1]].is_completed());
    assert!(h.context[h.child(root, "RoundEnd")].is_completed());
    assert!(h.context[root].is_completed());
}

// ---------------------------------------------------------------------------
// Sub-processes
// ---------------------------------------------------------------------------

#[test]
fn sub_process_sees_outer_variables_and_its_inputs() {
    let mut h = Harness::new("subprocess.yaml");
    let root = h.start(json!({ "amount": 20 }));

    let inner = h.child(root, "Inner");
    assert_eq!(h.context[inner].variables.get("local_amount"), Some(&json!(20)));
    assert!(!h.context[root].variables.contains("local_amount"));

    let collect = h.child(inner, "Collect");
    let visible = h.context.visible_variables(collect);
    assert_eq!(visible.get("amount"), Some(&json!(20)));
    assert_eq!(visible.get("local_amount"), Some(&json!(20)));
}

#[test]
fn sub_process_outputs_are_computed_from_its_own_variables() {
    let mut h = Harness::new("subprocess.yaml");
    let root = h.start(json!({ "amount": 20 }));
    let inner = h.child(root, "Inner");

    let collect = h.child(inner, "Collect");
    h.context.signal(collect, Some(json!({ "fee": 5 }))).unwrap();

    assert!(h.context[inner].is_completed());
    assert_eq!(h.context[inner].variables.get("charged"), Some(&json!(25)));
    assert_eq!(h.context[root].variables.get("charged"), Some(&json!(25)));
    assert!(h.context[h.child(root, "After")].is_waiting());
}

#[test]
fn terminated_sub_process_does_not_publish_its_variables() {
    let mut h = Harness::new("terminate_event.yaml");
    let root = h.start(json!({}));
    let inner = h.child(root, "Inner");

    let abort = h.child(inner, "Abort");
    h.context.signal(abort, Some(json!({ "reason": "late" }))).unwrap();

    assert!(h.context[inner].is_terminated());
    assert_eq!(h.context[inner].variables.get("reason"), Some(&json!("late")));
    assert!(!h.context[root].variables.contains("reason"));
}

// ---------------------------------------------------------------------------
// Call activities
// ---------------------------------------------------------------------------

#[test]
fn call_activity_runs_the_called_process_with_parent_variables() {
    let mut h = Harness::new("call_activity.yaml");
    let root = h.start_process("Main", json!({ "customer": "ada" }));

    let call = h.child(root, "Call");
    let instance = h.child(call, "Child");
    assert_eq!(h.context[instance].step_type(), Some("Process"));
    assert_eq!(h.context.root_of(instance), root);

    let task = h.child(instance, "ChildTask");
    assert_eq!(
        h.context.visible_variables(task).get("customer"),
        Some(&json!("ada"))
    );

    h.context.signal(task, Some(json!({ "done": true }))).unwrap();

    assert!(h.context[instance].is_completed());
    assert!(h.context[call].is_completed());
    assert!(h.context[h.child(root, "After")].is_waiting());
    assert_eq!(h.context[root].variables.get("done"), Some(&json!(true)));
}

#[test]
fn call_activity_can_isolate_the_called_process() {
    let mut h = Harness::new("call_activity.yaml");
    let root = h.start_process("IsolatedMain", json!({ "customer": "ada" }));

    let call = h.child(root, "IsolatedCall");
    let instance = h.child(call, "Child");
    assert!(h.context[instance].variables.is_empty());

    let task = h.child(instance, "ChildTask");
    assert!(!h.context.visible_variables(task).contains("customer"));

    h.context.signal(task, None).unwrap();
    assert!(h.context[root].is_completed());
}
