//! Execution tree
//!
//! One [`Execution`] exists per step instance, active or historical. The
//! tree lives in the context's arena; parent, children and boundary links
//! are [`ExecutionKey`] handles into it.

pub(crate) mod behavior;
pub(crate) mod lifecycle;
pub mod printer;
pub mod state;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::model::Step;
use crate::variables::Variables;

pub use state::ExecutionState;

/// Handle to an execution inside a [`Context`](crate::Context).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExecutionKey(pub(crate) usize);

impl ExecutionKey {
    pub fn index(self) -> usize {
        self.0
    }
}

// ─── Status ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    #[default]
    Activated,
    Started,
    Waiting,
    Completed,
    Terminated,
}

impl ExecutionStatus {
    /// Completed and terminated are absorbing.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Terminated)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Activated => "activated",
            Self::Started => "started",
            Self::Waiting => "waiting",
            Self::Completed => "completed",
            Self::Terminated => "terminated",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Execution ────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Execution {
    pub(crate) key: ExecutionKey,
    pub id: String,
    /// `None` only for a restored node whose state carried no step id.
    pub step: Option<Arc<Step>>,
    pub status: ExecutionStatus,
    pub variables: Variables,
    /// Sequence flow ids that delivered tokens here.
    pub tokens_in: Vec<String>,
    /// Sequence flow ids this execution emitted tokens on.
    pub tokens_out: Vec<String>,
    pub(crate) parent: Option<ExecutionKey>,
    pub(crate) children: Vec<ExecutionKey>,
    /// Host execution id for boundary event instances.
    pub attached_to_id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub timer_expires_at: Option<DateTime<Utc>>,
    /// Condition text that selected a flow or arms a conditional catch.
    pub condition: Option<String>,
    pub message_names: Vec<String>,
    pub error_names: Vec<String>,
    /// Start event requested for a process execution; not persisted.
    pub(crate) start_event_id: Option<String>,
}

impl Execution {
    pub(crate) fn new(
        key: ExecutionKey,
        id: String,
        step: Option<Arc<Step>>,
        parent: Option<ExecutionKey>,
        attached_to_id: Option<String>,
        variables: Variables,
    ) -> Self {
        Self {
            key,
            id,
            step,
            status: ExecutionStatus::Activated,
            variables,
            tokens_in: Vec::new(),
            tokens_out: Vec::new(),
            parent,
            children: Vec::new(),
            attached_to_id,
            started_at: None,
            ended_at: None,
            timer_expires_at: None,
            condition: None,
            message_names: Vec::new(),
            error_names: Vec::new(),
            start_event_id: None,
        }
    }

    pub fn key(&self) -> ExecutionKey {
        self.key
    }

    pub fn parent(&self) -> Option<ExecutionKey> {
        self.parent
    }

    pub fn children(&self) -> &[ExecutionKey] {
        &self.children
    }

    pub fn step_id(&self) -> Option<&str> {
        self.step.as_deref().map(|s| s.id.as_str())
    }

    pub fn step_type(&self) -> Option<&'static str> {
        self.step.as_deref().map(Step::type_name)
    }

    pub fn is_activated(&self) -> bool {
        self.status == ExecutionStatus::Activated
    }

    pub fn is_started(&self) -> bool {
        self.started_at.is_some()
    }

    pub fn is_waiting(&self) -> bool {
        self.status == ExecutionStatus::Waiting
    }

    pub fn is_completed(&self) -> bool {
        self.status == ExecutionStatus::Completed
    }

    pub fn is_terminated(&self) -> bool {
        self.status == ExecutionStatus::Terminated
    }

    pub fn is_ended(&self) -> bool {
        self.status.is_terminal()
    }

    pub(crate) fn record_token_in(&mut self, flow_id: &str) {
        if !self.tokens_in.iter().any(|t| t == flow_id) {
            self.tokens_in.push(flow_id.to_string());
        }
    }

    pub(crate) fn record_token_out(&mut self, flow_id: &str) {
        if !self.tokens_out.iter().any(|t| t == flow_id) {
            self.tokens_out.push(flow_id.to_string());
        }
    }
}
