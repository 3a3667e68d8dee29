//! Static flow model: steps, sequence flows and the definitions index.

pub mod definitions;
pub mod document;
pub mod flow;
pub mod step;
pub mod validate;

pub use definitions::Definitions;
pub use document::{parse_definitions_yaml, DefinitionsDocument};
pub use flow::SequenceFlow;
pub use step::{
    CalledElement, EventDefinition, EventKind, Mapping, Step, StepKind, TaskKind, TimerDefinition,
};
pub use validate::{validate_document, ValidationError};
