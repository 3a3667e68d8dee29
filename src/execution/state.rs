//! Serialized execution state
//!
//! [`ExecutionState`] is the persisted form of an execution tree. Hosts
//! store it however they like and restore it against the same definitions
//! later; serializing a restored tree yields the same document.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;

use super::{Execution, ExecutionKey, ExecutionStatus};
use crate::context::Context;
use crate::error::{EngineError, Result};
use crate::model::Step;
use crate::variables::Variables;

/// Step type tag that marks a process execution.
const PROCESS_TYPE: &str = "Process";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionState {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attached_to_id: Option<String>,
    pub status: ExecutionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Variables::is_empty")]
    pub variables: Variables,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tokens_in: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tokens_out: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub message_names: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub error_names: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timer_expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ExecutionState>,
}

impl ExecutionState {
    pub fn from_json(source: &str) -> Result<Self> {
        Ok(serde_json::from_str(source)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// A state node with its step resolved, ready to be placed in the arena.
struct Staged<'a> {
    state: &'a ExecutionState,
    step: Option<Arc<Step>>,
    children: Vec<Staged<'a>>,
}

impl Context {
    /// The persisted form of the tree under `key`.
    pub fn serialize(&self, key: ExecutionKey) -> Result<ExecutionState> {
        self.ensure_key(key)?;
        Ok(self.state_of(key))
    }

    fn state_of(&self, key: ExecutionKey) -> ExecutionState {
        let execution = self.exec(key);
        ExecutionState {
            id: execution.id.clone(),
            step_id: execution.step_id().map(str::to_string),
            step_type: execution.step_type().map(str::to_string),
            attached_to_id: execution.attached_to_id.clone(),
            status: execution.status,
            started_at: execution.started_at,
            ended_at: execution.ended_at,
            variables: execution.variables.clone(),
            tokens_in: execution.tokens_in.clone(),
            tokens_out: execution.tokens_out.clone(),
            message_names: execution.message_names.clone(),
            error_names: execution.error_names.clone(),
            timer_expires_at: execution.timer_expires_at,
            condition: execution.condition.clone(),
            children: execution
                .children
                .iter()
                .map(|child| self.state_of(*child))
                .collect(),
        }
    }

    pub fn serialize_json(&self, key: ExecutionKey) -> Result<String> {
        self.serialize(key)?.to_json()
    }

    /// Rebuild a persisted tree as a new root of this context.
    ///
    /// Every step is resolved and every id checked before anything is added,
    /// so a failed restore leaves the context untouched.
    pub fn restore(&mut self, state: &ExecutionState) -> Result<ExecutionKey> {
        let mut seen = HashSet::new();
        let staged = self.stage(state, &mut seen)?;
        let key = self.place(staged, None);
        self.roots.push(key);
        info!(
            execution = %state.id,
            executions = seen.len(),
            "execution tree restored"
        );
        Ok(key)
    }

    pub fn restore_json(&mut self, source: &str) -> Result<ExecutionKey> {
        let state = ExecutionState::from_json(source)?;
        self.restore(&state)
    }

    fn stage<'a>(
        &self,
        state: &'a ExecutionState,
        seen: &mut HashSet<&'a str>,
    ) -> Result<Staged<'a>> {
        if self.ids.contains_key(&state.id) || !seen.insert(state.id.as_str()) {
            return Err(EngineError::invalid_state(format!(
                "execution id `{}` is already in use",
                state.id
            )));
        }

        let step = match state.step_id.as_deref() {
            None => None,
            Some(id) if state.step_type.as_deref() == Some(PROCESS_TYPE) => {
                Some(self.definitions.require_process(id)?)
            }
            Some(id) => Some(self.definitions.require_step(id)?),
        };
        if let (Some(step), Some(recorded)) = (&step, state.step_type.as_deref()) {
            if step.type_name() != recorded {
                return Err(EngineError::lookup(format!(
                    "step `{}` is a {} in the definitions but was persisted as a {}",
                    step.id,
                    step.type_name(),
                    recorded
                )));
            }
        }

        let children = state
            .children
            .iter()
            .map(|child| self.stage(child, seen))
            .collect::<Result<Vec<_>>>()?;
        Ok(Staged {
            state,
            step,
            children,
        })
    }

    fn place(&mut self, staged: Staged<'_>, parent: Option<ExecutionKey>) -> ExecutionKey {
        let state = staged.state;
        let key = ExecutionKey(self.executions.len());
        let mut execution = Execution::new(
            key,
            state.id.clone(),
            staged.step,
            parent,
            state.attached_to_id.clone(),
            state.variables.clone(),
        );
        execution.status = state.status;
        execution.started_at = state.started_at;
        execution.ended_at = state.ended_at;
        execution.tokens_in = state.tokens_in.clone();
        execution.tokens_out = state.tokens_out.clone();
        execution.message_names = state.message_names.clone();
        execution.error_names = state.error_names.clone();
        execution.timer_expires_at = state.timer_expires_at;
        execution.condition = state.condition.clone();

        self.ids.insert(state.id.clone(), key);
        self.executions.push(execution);
        if let Some(parent) = parent {
            self.exec_mut(parent).children.push(key);
        }
        for child in staged.children {
            self.place(child, Some(key));
        }
        key
    }
}
