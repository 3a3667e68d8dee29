//! Static step definitions.
//!
//! Steps are immutable once [`Definitions`](super::Definitions) is built. The
//! execution tree holds them behind `Arc` and dispatches on [`StepKind`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ─── Mappings & event definitions ─────────────────────────────────────────

/// Copies the value of `source` (an expression) into the variable `target`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mapping {
    pub source: String,
    pub target: String,
}

/// When a timer fires. Exactly one field is set in a valid definition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cycle: Option<String>,
}

impl TimerDefinition {
    pub fn duration(value: impl Into<String>) -> Self {
        Self {
            duration: Some(value.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventDefinition {
    Message { message: String },
    Error { error: String },
    Timer(TimerDefinition),
    Terminate,
    Conditional { condition: String },
}

impl EventDefinition {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Message { .. } => "message",
            Self::Error { .. } => "error",
            Self::Timer(_) => "timer",
            Self::Terminate => "terminate",
            Self::Conditional { .. } => "conditional",
        }
    }
}

// ─── Step kinds ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum TaskKind {
    /// Plain task with no implementation attached; waits for a signal.
    Task,
    User {
        assignee: Option<String>,
        candidate_groups: Vec<String>,
    },
    Manual,
    Service {
        task_type: String,
        headers: BTreeMap<String, String>,
    },
    Script {
        script: String,
        result_variable: Option<String>,
    },
    BusinessRule {
        decision_id: String,
        result_variable: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    Start,
    End,
    IntermediateCatch,
    IntermediateThrow,
    Boundary {
        attached_to: String,
        cancel_activity: bool,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct CalledElement {
    pub process_id: String,
    pub propagate_parent_variables: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StepKind {
    Task(TaskKind),
    ExclusiveGateway,
    ParallelGateway,
    InclusiveGateway,
    EventBasedGateway,
    Event(EventKind),
    SubProcess,
    CallActivity(CalledElement),
    Process,
}

// ─── Step ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub id: String,
    pub name: Option<String>,
    pub kind: StepKind,
    /// Id of the process or sub-process containing this step.
    pub scope_id: Option<String>,
    /// Incoming sequence flow ids, in declaration order.
    pub incoming: Vec<String>,
    /// Outgoing sequence flow ids, in declaration order.
    pub outgoing: Vec<String>,
    /// Boundary events attached to this step.
    pub attachments: Vec<String>,
    /// Steps directly contained by a process or sub-process.
    pub contents: Vec<String>,
    pub event_definitions: Vec<EventDefinition>,
    pub input_mappings: Vec<Mapping>,
    pub output_mappings: Vec<Mapping>,
}

impl Step {
    pub fn new(id: impl Into<String>, kind: StepKind) -> Self {
        Self {
            id: id.into(),
            name: None,
            kind,
            scope_id: None,
            incoming: Vec::new(),
            outgoing: Vec::new(),
            attachments: Vec::new(),
            contents: Vec::new(),
            event_definitions: Vec::new(),
            input_mappings: Vec::new(),
            output_mappings: Vec::new(),
        }
    }

    /// Type tag used in serialized execution state.
    pub fn type_name(&self) -> &'static str {
        match &self.kind {
            StepKind::Task(task) => match task {
                TaskKind::Task => "Task",
                TaskKind::User { .. } => "UserTask",
                TaskKind::Manual => "ManualTask",
                TaskKind::Service { .. } => "ServiceTask",
                TaskKind::Script { .. } => "ScriptTask",
                TaskKind::BusinessRule { .. } => "BusinessRuleTask",
            },
            StepKind::ExclusiveGateway => "ExclusiveGateway",
            StepKind::ParallelGateway => "ParallelGateway",
            StepKind::InclusiveGateway => "InclusiveGateway",
            StepKind::EventBasedGateway => "EventBasedGateway",
            StepKind::Event(event) => match event {
                EventKind::Start => "StartEvent",
                EventKind::End => "EndEvent",
                EventKind::IntermediateCatch => "IntermediateCatchEvent",
                EventKind::IntermediateThrow => "IntermediateThrowEvent",
                EventKind::Boundary { .. } => "BoundaryEvent",
            },
            StepKind::SubProcess => "SubProcess",
            StepKind::CallActivity(_) => "CallActivity",
            StepKind::Process => "Process",
        }
    }

    pub fn is_task(&self) -> bool {
        matches!(self.kind, StepKind::Task(_))
    }

    /// Tasks, sub-processes and call activities. Only activities host
    /// boundary events.
    pub fn is_activity(&self) -> bool {
        matches!(
            self.kind,
            StepKind::Task(_) | StepKind::SubProcess | StepKind::CallActivity(_)
        )
    }

    /// Tasks the engine can complete without a human.
    pub fn is_automated(&self) -> bool {
        matches!(
            self.kind,
            StepKind::Task(TaskKind::Service { .. })
                | StepKind::Task(TaskKind::Script { .. })
                | StepKind::Task(TaskKind::BusinessRule { .. })
        )
    }

    pub fn is_gateway(&self) -> bool {
        matches!(
            self.kind,
            StepKind::ExclusiveGateway
                | StepKind::ParallelGateway
                | StepKind::InclusiveGateway
                | StepKind::EventBasedGateway
        )
    }

    pub fn is_event(&self) -> bool {
        matches!(self.kind, StepKind::Event(_))
    }

    pub fn is_start_event(&self) -> bool {
        matches!(self.kind, StepKind::Event(EventKind::Start))
    }

    pub fn is_end_event(&self) -> bool {
        matches!(self.kind, StepKind::Event(EventKind::End))
    }

    pub fn is_boundary_event(&self) -> bool {
        matches!(self.kind, StepKind::Event(EventKind::Boundary { .. }))
    }

    /// Start, intermediate catch and boundary events.
    pub fn is_catch_event(&self) -> bool {
        matches!(
            self.kind,
            StepKind::Event(EventKind::Start)
                | StepKind::Event(EventKind::IntermediateCatch)
                | StepKind::Event(EventKind::Boundary { .. })
        )
    }

    pub fn is_throw_event(&self) -> bool {
        matches!(
            self.kind,
            StepKind::Event(EventKind::End) | StepKind::Event(EventKind::IntermediateThrow)
        )
    }

    /// Processes and sub-processes own child executions for their contents.
    pub fn is_scope(&self) -> bool {
        matches!(self.kind, StepKind::Process | StepKind::SubProcess)
    }

    pub fn is_converging(&self) -> bool {
        self.incoming.len() > 1
    }

    pub fn is_diverging(&self) -> bool {
        self.outgoing.len() > 1
    }

    pub fn result_variable(&self) -> Option<&str> {
        match &self.kind {
            StepKind::Task(TaskKind::Script {
                result_variable, ..
            })
            | StepKind::Task(TaskKind::BusinessRule {
                result_variable, ..
            }) => result_variable.as_deref(),
            _ => None,
        }
    }

    pub fn message_names(&self) -> impl Iterator<Item = &str> {
        self.event_definitions.iter().filter_map(|d| match d {
            EventDefinition::Message { message } => Some(message.as_str()),
            _ => None,
        })
    }

    pub fn error_names(&self) -> impl Iterator<Item = &str> {
        self.event_definitions.iter().filter_map(|d| match d {
            EventDefinition::Error { error } => Some(error.as_str()),
            _ => None,
        })
    }

    pub fn timer_definition(&self) -> Option<&TimerDefinition> {
        self.event_definitions.iter().find_map(|d| match d {
            EventDefinition::Timer(timer) => Some(timer),
            _ => None,
        })
    }

    pub fn has_terminate_definition(&self) -> bool {
        self.event_definitions
            .iter()
            .any(|d| matches!(d, EventDefinition::Terminate))
    }
}
