//! BPMN-Flow - execution tree and step dispatch for BPMN process graphs
//!
//! Process definitions are authored as YAML (or JSON) documents, validated
//! and indexed into [`Definitions`]. A [`Context`] starts process instances
//! as trees of [`Execution`]s and advances them as the host delivers
//! stimuli: signals, messages, errors, timer checks and automated task runs.
//! Trees serialize to [`ExecutionState`] for the host to persist.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use bpmn_flow::{Context, Variables};
//! use serde_json::json;
//!
//! let yaml = std::fs::read_to_string("order.yaml").unwrap();
//! let mut context = Context::from_yaml(&yaml).unwrap();
//! let order = context.start(Variables::new()).unwrap();
//! for task in context.waiting_tasks(order) {
//!     context.signal(task, Some(json!({ "approved": true }))).unwrap();
//! }
//! ```

// Core error handling
pub mod error;

// Static model and authoring format
pub mod model;

// Runtime
pub mod context;
pub mod execution;
pub mod variables;

// Collaborators
pub mod clock;
pub mod expression;
pub mod listener;
pub mod services;
pub mod timer;

pub mod config;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::EngineConfig;
pub use context::Context;
pub use error::{EngineError, Result};
pub use execution::printer::TreeView;
pub use execution::{Execution, ExecutionKey, ExecutionState, ExecutionStatus};
pub use expression::{BasicExpressions, ExpressionGateway};
pub use listener::{LifecycleEvent, ListenerEvent, ListenerRegistry};
pub use model::{Definitions, SequenceFlow, Step, StepKind};
pub use services::{DecisionGateway, Headers, ServiceHandler, ServiceRegistry};
pub use variables::Variables;
