//! Read-only index over validated process definitions.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::Arc;

use anyhow::Context as _;
use tracing::debug;

use super::document::*;
use super::flow::SequenceFlow;
use super::step::*;
use super::validate::validate_document;
use crate::error::{EngineError, Result};

/// All processes, steps and flows known to a context.
#[derive(Debug, Clone, Default)]
pub struct Definitions {
    processes: Vec<Arc<Step>>,
    process_index: HashMap<String, Arc<Step>>,
    steps: HashMap<String, Arc<Step>>,
    flows: HashMap<String, Arc<SequenceFlow>>,
}

impl Definitions {
    /// Validate and index a document.
    pub fn from_document(document: DefinitionsDocument) -> Result<Self> {
        let errors = validate_document(&document);
        if !errors.is_empty() {
            let rendered: Vec<String> = errors.iter().map(ToString::to_string).collect();
            return Err(EngineError::graph(format!(
                "definition failed validation:\n  {}",
                rendered.join("\n  ")
            )));
        }

        let mut builder = IndexBuilder::default();
        for process in document.processes {
            builder.add_process(process);
        }
        let definitions = builder.finish();
        debug!(
            processes = definitions.processes.len(),
            steps = definitions.steps.len(),
            flows = definitions.flows.len(),
            "definitions indexed"
        );
        Ok(definitions)
    }

    pub fn from_yaml(source: &str) -> Result<Self> {
        let document: DefinitionsDocument = serde_yaml::from_str(source)?;
        Self::from_document(document)
    }

    pub fn from_json(source: &str) -> Result<Self> {
        let document: DefinitionsDocument = serde_json::from_str(source)?;
        Self::from_document(document)
    }

    /// Load a `.yaml`/`.yml` or `.json` definitions file.
    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("Reading {}", path.display()))?;
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));
        let definitions = if is_json {
            Self::from_json(&source)
        } else {
            Self::from_yaml(&source)
        };
        definitions.with_context(|| format!("Loading definitions from {}", path.display()))
    }

    pub fn processes(&self) -> &[Arc<Step>] {
        &self.processes
    }

    pub fn process_by_id(&self, id: &str) -> Option<&Arc<Step>> {
        self.process_index.get(id)
    }

    pub fn step_by_id(&self, id: &str) -> Option<&Arc<Step>> {
        self.steps.get(id)
    }

    pub fn flow_by_id(&self, id: &str) -> Option<&Arc<SequenceFlow>> {
        self.flows.get(id)
    }

    pub(crate) fn require_process(&self, id: &str) -> Result<Arc<Step>> {
        self.process_by_id(id)
            .cloned()
            .ok_or_else(|| EngineError::lookup(format!("process `{id}` is not defined")))
    }

    pub(crate) fn require_step(&self, id: &str) -> Result<Arc<Step>> {
        self.step_by_id(id)
            .cloned()
            .ok_or_else(|| EngineError::lookup(format!("step `{id}` is not defined")))
    }

    pub(crate) fn require_flow(&self, id: &str) -> Result<Arc<SequenceFlow>> {
        self.flow_by_id(id)
            .cloned()
            .ok_or_else(|| EngineError::lookup(format!("sequence flow `{id}` is not defined")))
    }

    /// Outgoing flows of `step`, in declaration order.
    pub fn outgoing_flows(&self, step: &Step) -> Result<Vec<Arc<SequenceFlow>>> {
        step.outgoing.iter().map(|id| self.require_flow(id)).collect()
    }

    /// Start events a scope begins with when no specific one is requested:
    /// the untriggered ("none") start events, or every start event when the
    /// scope only has triggered ones.
    pub fn start_events(&self, scope: &Step) -> Result<Vec<Arc<Step>>> {
        let mut all = Vec::new();
        for id in &scope.contents {
            let step = self.require_step(id)?;
            if step.is_start_event() {
                all.push(step);
            }
        }
        let none: Vec<Arc<Step>> = all
            .iter()
            .filter(|s| s.event_definitions.is_empty())
            .cloned()
            .collect();
        Ok(if none.is_empty() { all } else { none })
    }

    /// Processes with a start event listening for `message`, paired with
    /// that start event.
    pub fn message_start_events(&self, message: &str) -> Vec<(Arc<Step>, Arc<Step>)> {
        let mut found = Vec::new();
        for process in &self.processes {
            for id in &process.contents {
                if let Some(step) = self.steps.get(id) {
                    if step.is_start_event() && step.message_names().any(|m| m == message) {
                        found.push((process.clone(), step.clone()));
                    }
                }
            }
        }
        found
    }

    /// Whether a token at `from` can reach `to` along sequence flows (and
    /// through boundary events) without passing through `avoid`.
    pub fn can_reach(&self, from: &str, to: &str, avoid: &str) -> bool {
        let mut queue: VecDeque<&str> = VecDeque::from([from]);
        let mut visited: HashSet<&str> = HashSet::new();
        while let Some(current) = queue.pop_front() {
            if !visited.insert(current) {
                continue;
            }
            let Some(step) = self.steps.get(current) else {
                continue;
            };
            let next = step
                .outgoing
                .iter()
                .filter_map(|f| self.flows.get(f).map(|flow| flow.target.as_str()))
                .chain(step.attachments.iter().map(String::as_str));
            for target in next {
                if target == to {
                    return true;
                }
                if target != avoid {
                    queue.push_back(target);
                }
            }
        }
        false
    }
}

// ─── Index construction ───────────────────────────────────────────────────

#[derive(Default)]
struct IndexBuilder {
    drafts: Vec<Step>,
    processes: Vec<Step>,
    flows: Vec<SequenceFlow>,
}

impl IndexBuilder {
    fn add_process(&mut self, process: ProcessDocument) {
        let mut step = Step::new(process.id.clone(), StepKind::Process);
        step.name = process.name;
        step.contents = self.add_scope(&process.id, process.steps, process.flows);
        self.processes.push(step);
    }

    /// Adds the contents of a scope and returns the ids of its direct steps.
    fn add_scope(
        &mut self,
        scope_id: &str,
        steps: Vec<StepDocument>,
        flows: Vec<FlowDocument>,
    ) -> Vec<String> {
        let mut contents = Vec::with_capacity(steps.len());
        for document in steps {
            contents.push(document.id.clone());
            let mut nested = None;
            let kind = match document.kind {
                StepKindDocument::Task => StepKind::Task(TaskKind::Task),
                StepKindDocument::UserTask {
                    assignee,
                    candidate_groups,
                } => StepKind::Task(TaskKind::User {
                    assignee,
                    candidate_groups,
                }),
                StepKindDocument::ManualTask => StepKind::Task(TaskKind::Manual),
                StepKindDocument::ServiceTask { task_type, headers } => {
                    StepKind::Task(TaskKind::Service { task_type, headers })
                }
                StepKindDocument::ScriptTask {
                    script,
                    result_variable,
                } => StepKind::Task(TaskKind::Script {
                    script,
                    result_variable,
                }),
                StepKindDocument::BusinessRuleTask {
                    decision_id,
                    result_variable,
                } => StepKind::Task(TaskKind::BusinessRule {
                    decision_id,
                    result_variable,
                }),
                StepKindDocument::ExclusiveGateway => StepKind::ExclusiveGateway,
                StepKindDocument::ParallelGateway => StepKind::ParallelGateway,
                StepKindDocument::InclusiveGateway => StepKind::InclusiveGateway,
                StepKindDocument::EventBasedGateway => StepKind::EventBasedGateway,
                StepKindDocument::StartEvent => StepKind::Event(EventKind::Start),
                StepKindDocument::EndEvent => StepKind::Event(EventKind::End),
                StepKindDocument::IntermediateCatchEvent => {
                    StepKind::Event(EventKind::IntermediateCatch)
                }
                StepKindDocument::IntermediateThrowEvent => {
                    StepKind::Event(EventKind::IntermediateThrow)
                }
                StepKindDocument::BoundaryEvent {
                    attached_to,
                    cancel_activity,
                } => StepKind::Event(EventKind::Boundary {
                    attached_to,
                    cancel_activity,
                }),
                StepKindDocument::SubProcess { steps, flows } => {
                    nested = Some((steps, flows));
                    StepKind::SubProcess
                }
                StepKindDocument::CallActivity {
                    process_id,
                    propagate_parent_variables,
                } => StepKind::CallActivity(CalledElement {
                    process_id,
                    propagate_parent_variables,
                }),
            };

            let mut step = Step::new(document.id, kind);
            step.name = document.name;
            step.scope_id = Some(scope_id.to_string());
            step.event_definitions = document.events;
            step.input_mappings = document.inputs;
            step.output_mappings = document.outputs;
            if let Some((steps, flows)) = nested {
                let id = step.id.clone();
                step.contents = self.add_scope(&id, steps, flows);
            }
            self.drafts.push(step);
        }

        for flow in flows {
            let mut sequence_flow = SequenceFlow::new(flow.resolved_id(), flow.from, flow.to);
            sequence_flow.name = flow.name;
            sequence_flow.condition = flow.condition;
            sequence_flow.is_default = flow.is_default;
            self.flows.push(sequence_flow);
        }
        contents
    }

    fn finish(self) -> Definitions {
        let mut steps: HashMap<String, Step> = self
            .drafts
            .into_iter()
            .map(|s| (s.id.clone(), s))
            .collect();

        for flow in &self.flows {
            if let Some(source) = steps.get_mut(&flow.source) {
                source.outgoing.push(flow.id.clone());
            }
            if let Some(target) = steps.get_mut(&flow.target) {
                target.incoming.push(flow.id.clone());
            }
        }

        let attachments: Vec<(String, String)> = steps
            .values()
            .filter_map(|s| match &s.kind {
                StepKind::Event(EventKind::Boundary { attached_to, .. }) => {
                    Some((attached_to.clone(), s.id.clone()))
                }
                _ => None,
            })
            .collect();
        for (host, boundary) in attachments {
            if let Some(host) = steps.get_mut(&host) {
                host.attachments.push(boundary);
            }
        }
        // Attachment order follows declaration order within the scope.
        let order: HashMap<String, usize> = steps
            .values()
            .flat_map(|s| s.contents.iter().cloned().enumerate().map(|(i, id)| (id, i)))
            .chain(
                self.processes
                    .iter()
                    .flat_map(|p| p.contents.iter().cloned().enumerate().map(|(i, id)| (id, i))),
            )
            .collect();
        for step in steps.values_mut() {
            step.attachments
                .sort_by_key(|id| order.get(id).copied().unwrap_or(usize::MAX));
        }

        let processes: Vec<Arc<Step>> = self.processes.into_iter().map(Arc::new).collect();
        Definitions {
            process_index: processes
                .iter()
                .map(|p| (p.id.clone(), p.clone()))
                .collect(),
            processes,
            steps: steps
                .into_iter()
                .map(|(id, step)| (id, Arc::new(step)))
                .collect(),
            flows: self
                .flows
                .into_iter()
                .map(|f| (f.id.clone(), Arc::new(f)))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ORDER: &str = r#"
processes:
  - id: Order
    steps:
      - { kind: StartEvent, id: Start }
      - { kind: UserTask, id: Review }
      - kind: BoundaryEvent
        id: Reminder
        attached_to: Review
        cancel_activity: false
        events: [{ type: timer, duration: PT1H }]
      - { kind: EndEvent, id: End }
      - { kind: EndEvent, id: Reminded }
    flows:
      - { id: F1, from: Start, to: Review }
      - { id: F2, from: Review, to: End }
      - { id: F3, from: Reminder, to: Reminded }
"#;

    #[test]
    fn indexes_flows_and_attachments() {
        let definitions = Definitions::from_yaml(ORDER).unwrap();
        let review = definitions.step_by_id("Review").unwrap();
        assert_eq!(review.incoming, vec!["F1"]);
        assert_eq!(review.outgoing, vec!["F2"]);
        assert_eq!(review.attachments, vec!["Reminder"]);
        assert_eq!(review.scope_id.as_deref(), Some("Order"));

        let process = definitions.process_by_id("Order").unwrap();
        assert_eq!(process.contents.len(), 5);
        assert!(definitions.step_by_id("Order").is_none());
        assert!(definitions.process_by_id("Review").is_none());
    }

    #[test]
    fn reachability_respects_avoided_step() {
        let definitions = Definitions::from_yaml(ORDER).unwrap();
        assert!(definitions.can_reach("Start", "End", "Nothing"));
        assert!(definitions.can_reach("Review", "Reminded", "Nothing"));
        assert!(!definitions.can_reach("Start", "End", "Review"));
        assert!(!definitions.can_reach("End", "Start", "Nothing"));
    }

    #[test]
    fn none_start_events_are_preferred() {
        let yaml = r#"
processes:
  - id: P
    steps:
      - { kind: StartEvent, id: Plain }
      - kind: StartEvent
        id: OnMessage
        events: [{ type: message, message: Go }]
"#;
        let definitions = Definitions::from_yaml(yaml).unwrap();
        let process = definitions.process_by_id("P").unwrap();
        let starts = definitions.start_events(process).unwrap();
        assert_eq!(starts.len(), 1);
        assert_eq!(starts[0].id, "Plain");
        assert_eq!(definitions.message_start_events("Go").len(), 1);
        assert!(definitions.message_start_events("Stop").is_empty());
    }

    #[test]
    fn invalid_document_fails_with_graph_error() {
        let yaml = r#"
processes:
  - id: P
    steps:
      - { kind: Task, id: Lonely }
"#;
        let err = Definitions::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, EngineError::GraphDefinition(_)));
        assert!(err.to_string().contains("[V5]"));
    }

    #[test]
    fn oversized_timer_duration_fails_to_load() {
        let yaml = r#"
processes:
  - id: P
    steps:
      - { kind: StartEvent, id: Start }
      - kind: IntermediateCatchEvent
        id: Wait
        events: [{ type: timer, duration: PT9999999999999999H }]
    flows:
      - { from: Start, to: Wait }
"#;
        let err = Definitions::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, EngineError::GraphDefinition(_)), "{err}");
        assert!(err.to_string().contains("[V7]"), "{err}");
    }
}
