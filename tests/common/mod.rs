//! Shared helpers for the integration tests.
#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use bpmn_flow::{Context, Definitions, ExecutionKey, ManualClock, Variables};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

pub fn definitions(name: &str) -> Definitions {
    Definitions::load_from_file(&fixture_path(name))
        .unwrap_or_else(|e| panic!("fixture {name} failed to load: {e:#}"))
}

/// 2024-01-01 09:00 UTC, where every test clock starts.
pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap()
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

/// A context on a manual clock that records every lifecycle event as
/// `eventName:stepId` (or `flowTaken:flowId`).
pub struct Harness {
    pub context: Context,
    pub clock: Arc<ManualClock>,
    pub events: Arc<Mutex<Vec<String>>>,
}

impl Harness {
    pub fn new(fixture: &str) -> Self {
        Self::with_definitions(definitions(fixture))
    }

    pub fn with_definitions(definitions: Definitions) -> Self {
        Self::custom(definitions, |context| context)
    }

    /// Harness whose context is adjusted by `configure` before use.
    pub fn configured(fixture: &str, configure: impl FnOnce(Context) -> Context) -> Self {
        Self::custom(definitions(fixture), configure)
    }

    pub fn custom(definitions: Definitions, configure: impl FnOnce(Context) -> Context) -> Self {
        let clock = Arc::new(ManualClock::new(epoch()));
        let events = Arc::new(Mutex::new(Vec::new()));
        let mut context = configure(Context::new(definitions).with_clock(clock.clone()));

        let sink = events.clone();
        context.listeners_mut().on_all(move |event| {
            let subject = match event.sequence_flow {
                Some(flow) => flow.id.clone(),
                None => event.execution.step_id().unwrap_or("?").to_string(),
            };
            sink.lock().unwrap().push(format!("{}:{}", event.kind, subject));
        });

        Self {
            context,
            clock,
            events,
        }
    }

    pub fn start(&mut self, variables: Value) -> ExecutionKey {
        self.context.start(vars(variables)).unwrap()
    }

    pub fn start_process(&mut self, process_id: &str, variables: Value) -> ExecutionKey {
        self.context
            .start_process(process_id, vars(variables), None)
            .unwrap()
    }

    /// The only child of `parent` for `step_id`.
    pub fn child(&self, parent: ExecutionKey, step_id: &str) -> ExecutionKey {
        let found = self.context.children_by_step_id(parent, step_id);
        assert_eq!(
            found.len(),
            1,
            "expected one {step_id} under {}:\n{}",
            self.context[parent].id,
            self.context.render(parent).unwrap_or_default()
        );
        found[0]
    }

    pub fn has_child(&self, parent: ExecutionKey, step_id: &str) -> bool {
        self.context.child_by_step_id(parent, step_id).is_some()
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn clear_events(&self) {
        self.events.lock().unwrap().clear();
    }
}

pub fn vars(value: Value) -> Variables {
    Variables::from_value(value).expect("variables must be a JSON object")
}
