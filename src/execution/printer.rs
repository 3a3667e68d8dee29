//! Human-readable views of an execution tree, for logs and the CLI.

use std::fmt;

use super::ExecutionKey;
use crate::context::Context;
use crate::error::Result;

/// Indented dump of an execution and its descendants.
pub struct TreeView<'a> {
    context: &'a Context,
    root: ExecutionKey,
}

impl fmt::Display for TreeView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_node(f, self.root, 0)
    }
}

impl TreeView<'_> {
    fn write_node(&self, f: &mut fmt::Formatter<'_>, key: ExecutionKey, depth: usize) -> fmt::Result {
        let execution = &self.context[key];
        write!(
            f,
            "{:indent$}{} <{}> {} [{}]",
            "",
            execution.step_id().unwrap_or("?"),
            execution.step_type().unwrap_or("?"),
            execution.status,
            execution.id,
            indent = depth * 2
        )?;
        if let Some(host) = &execution.attached_to_id {
            write!(f, " attached to {host}")?;
        }
        if !execution.tokens_in.is_empty() {
            write!(f, " in={}", execution.tokens_in.join(","))?;
        }
        if !execution.tokens_out.is_empty() {
            write!(f, " out={}", execution.tokens_out.join(","))?;
        }
        if execution.is_waiting() {
            if !execution.message_names.is_empty() {
                write!(f, " messages={}", execution.message_names.join(","))?;
            }
            if !execution.error_names.is_empty() {
                write!(f, " errors={}", execution.error_names.join(","))?;
            }
            if let Some(at) = execution.timer_expires_at {
                write!(f, " timer={}", at.to_rfc3339())?;
            }
        }
        if let Some(condition) = &execution.condition {
            write!(f, " when {condition}")?;
        }
        if !execution.variables.is_empty() {
            write!(f, " {}", execution.variables.to_value())?;
        }
        writeln!(f)?;
        for child in self.context.children(key) {
            self.write_node(f, *child, depth + 1)?;
        }
        Ok(())
    }
}

impl Context {
    pub fn tree(&self, key: ExecutionKey) -> Result<TreeView<'_>> {
        self.ensure_key(key)?;
        Ok(TreeView {
            context: self,
            root: key,
        })
    }

    pub fn render(&self, key: ExecutionKey) -> Result<String> {
        Ok(self.tree(key)?.to_string())
    }

    /// Sequence flows currently holding a token below `key`: emitted by a
    /// child and not yet consumed by an ended one.
    pub fn tokens(&self, key: ExecutionKey) -> Vec<String> {
        let mut tokens: Vec<String> = Vec::new();
        for child in self.children(key) {
            let execution = &self[*child];
            tokens.extend(execution.tokens_out.iter().cloned());
            if execution.is_ended() {
                tokens.retain(|t| !execution.tokens_in.contains(t));
            }
            tokens.extend(self.tokens(*child));
        }
        let mut seen = std::collections::HashSet::new();
        tokens.retain(|t| seen.insert(t.clone()));
        tokens
    }
}
