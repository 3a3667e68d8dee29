//! Authoring format for process definitions.
//!
//! A [`DefinitionsDocument`] is what hosts write by hand (YAML) or generate
//! (JSON). It is validated and indexed into [`Definitions`](super::Definitions)
//! before anything executes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::step::{EventDefinition, Mapping};

// ── Helper defaults for serde ──

fn default_true() -> bool {
    true
}

fn is_false(v: &bool) -> bool {
    !v
}

fn is_true(v: &bool) -> bool {
    *v
}

// ── Top-level document ──

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DefinitionsDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub processes: Vec<ProcessDocument>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessDocument {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub steps: Vec<StepDocument>,
    #[serde(default)]
    pub flows: Vec<FlowDocument>,
}

// ── Flow ──

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub from: String,
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_default: bool,
}

impl FlowDocument {
    /// Declared id, or one derived from the endpoints.
    pub fn resolved_id(&self) -> String {
        self.id
            .clone()
            .unwrap_or_else(|| format!("Flow_{}_{}", self.from, self.to))
    }
}

// ── Step ──

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDocument {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub kind: StepKindDocument,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<EventDefinition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<Mapping>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<Mapping>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum StepKindDocument {
    Task,
    UserTask {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        assignee: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        candidate_groups: Vec<String>,
    },
    ManualTask,
    ServiceTask {
        task_type: String,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        headers: BTreeMap<String, String>,
    },
    ScriptTask {
        script: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result_variable: Option<String>,
    },
    BusinessRuleTask {
        decision_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result_variable: Option<String>,
    },
    ExclusiveGateway,
    ParallelGateway,
    InclusiveGateway,
    EventBasedGateway,
    StartEvent,
    EndEvent,
    IntermediateCatchEvent,
    IntermediateThrowEvent,
    BoundaryEvent {
        attached_to: String,
        #[serde(default = "default_true", skip_serializing_if = "is_true")]
        cancel_activity: bool,
    },
    SubProcess {
        #[serde(default)]
        steps: Vec<StepDocument>,
        #[serde(default)]
        flows: Vec<FlowDocument>,
    },
    CallActivity {
        process_id: String,
        #[serde(default = "default_true", skip_serializing_if = "is_true")]
        propagate_parent_variables: bool,
    },
}

impl StepKindDocument {
    pub fn is_activity(&self) -> bool {
        matches!(
            self,
            Self::Task
                | Self::UserTask { .. }
                | Self::ManualTask
                | Self::ServiceTask { .. }
                | Self::ScriptTask { .. }
                | Self::BusinessRuleTask { .. }
                | Self::SubProcess { .. }
                | Self::CallActivity { .. }
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Task => "Task",
            Self::UserTask { .. } => "UserTask",
            Self::ManualTask => "ManualTask",
            Self::ServiceTask { .. } => "ServiceTask",
            Self::ScriptTask { .. } => "ScriptTask",
            Self::BusinessRuleTask { .. } => "BusinessRuleTask",
            Self::ExclusiveGateway => "ExclusiveGateway",
            Self::ParallelGateway => "ParallelGateway",
            Self::InclusiveGateway => "InclusiveGateway",
            Self::EventBasedGateway => "EventBasedGateway",
            Self::StartEvent => "StartEvent",
            Self::EndEvent => "EndEvent",
            Self::IntermediateCatchEvent => "IntermediateCatchEvent",
            Self::IntermediateThrowEvent => "IntermediateThrowEvent",
            Self::BoundaryEvent { .. } => "BoundaryEvent",
            Self::SubProcess { .. } => "SubProcess",
            Self::CallActivity { .. } => "CallActivity",
        }
    }
}

/// Parse a YAML document. Validation happens when the document is indexed.
pub fn parse_definitions_yaml(yaml_str: &str) -> anyhow::Result<DefinitionsDocument> {
    let document: DefinitionsDocument = serde_yaml::from_str(yaml_str)?;
    Ok(document)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_steps_with_kind_specific_fields() {
        let yaml = r#"
processes:
  - id: Greeting
    steps:
      - { kind: StartEvent, id: Start }
      - kind: ServiceTask
        id: Greet
        task_type: greet
        headers: { language: fr }
        inputs:
          - { source: "=name", target: who }
      - kind: BoundaryEvent
        id: Timeout
        attached_to: Greet
        events:
          - { type: timer, duration: PT1H }
      - { kind: EndEvent, id: End }
    flows:
      - { from: Start, to: Greet }
      - { id: Done, from: Greet, to: End }
"#;
        let document = parse_definitions_yaml(yaml).unwrap();
        let process = &document.processes[0];
        assert_eq!(process.steps.len(), 4);

        match &process.steps[1].kind {
            StepKindDocument::ServiceTask { task_type, headers } => {
                assert_eq!(task_type, "greet");
                assert_eq!(headers.get("language").map(String::as_str), Some("fr"));
            }
            other => panic!("unexpected kind {other:?}"),
        }
        assert_eq!(process.steps[1].inputs[0].target, "who");

        match &process.steps[2].kind {
            StepKindDocument::BoundaryEvent {
                attached_to,
                cancel_activity,
            } => {
                assert_eq!(attached_to, "Greet");
                assert!(cancel_activity);
            }
            other => panic!("unexpected kind {other:?}"),
        }
        assert_eq!(process.flows[0].resolved_id(), "Flow_Start_Greet");
        assert_eq!(process.flows[1].resolved_id(), "Done");
    }

    #[test]
    fn nested_sub_process_steps_parse() {
        let yaml = r#"
processes:
  - id: Outer
    steps:
      - { kind: StartEvent, id: Start }
      - kind: SubProcess
        id: Inner
        steps:
          - { kind: StartEvent, id: InnerStart }
          - { kind: EndEvent, id: InnerEnd }
        flows:
          - { from: InnerStart, to: InnerEnd }
"#;
        let document = parse_definitions_yaml(yaml).unwrap();
        match &document.processes[0].steps[1].kind {
            StepKindDocument::SubProcess { steps, flows } => {
                assert_eq!(steps.len(), 2);
                assert_eq!(flows.len(), 1);
            }
            other => panic!("unexpected kind {other:?}"),
        }
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let yaml = r#"
processes:
  - id: Broken
    steps:
      - { kind: Teleporter, id: T }
"#;
        assert!(parse_definitions_yaml(yaml).is_err());
    }
}
