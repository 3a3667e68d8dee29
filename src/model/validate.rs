use std::collections::{HashMap, HashSet};

use super::document::*;
use super::step::EventDefinition;
use crate::timer;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub rule: String,
    pub message: String,
}

impl ValidationError {
    fn new(rule: &str, message: String) -> Self {
        Self {
            rule: rule.to_string(),
            message,
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.rule, self.message)
    }
}

/// Validate a document before indexing. Returns all errors found.
pub fn validate_document(document: &DefinitionsDocument) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let process_ids: HashSet<&str> = document.processes.iter().map(|p| p.id.as_str()).collect();

    // V1: ids are unique across processes, steps and flows
    for process in &document.processes {
        if !seen.insert(process.id.clone()) {
            errors.push(ValidationError::new(
                "V1",
                format!("Duplicate process id: {}", process.id),
            ));
        }
    }
    for process in &document.processes {
        collect_ids(&process.steps, &process.flows, &mut seen, &mut errors);
    }

    for process in &document.processes {
        validate_scope(
            &process.id,
            &process.steps,
            &process.flows,
            &process_ids,
            &mut errors,
        );
    }

    errors
}

fn collect_ids(
    steps: &[StepDocument],
    flows: &[FlowDocument],
    seen: &mut HashSet<String>,
    errors: &mut Vec<ValidationError>,
) {
    for step in steps {
        if !seen.insert(step.id.clone()) {
            errors.push(ValidationError::new(
                "V1",
                format!("Duplicate step id: {}", step.id),
            ));
        }
        if let StepKindDocument::SubProcess { steps, flows } = &step.kind {
            collect_ids(steps, flows, seen, errors);
        }
    }
    for flow in flows {
        let id = flow.resolved_id();
        if !seen.insert(id.clone()) {
            errors.push(ValidationError::new("V1", format!("Duplicate flow id: {id}")));
        }
    }
}

fn validate_scope(
    scope_id: &str,
    steps: &[StepDocument],
    flows: &[FlowDocument],
    process_ids: &HashSet<&str>,
    errors: &mut Vec<ValidationError>,
) {
    let step_map: HashMap<&str, &StepDocument> =
        steps.iter().map(|s| (s.id.as_str(), s)).collect();

    // V2: flow endpoints exist in this scope
    for flow in flows {
        for (end, label) in [(&flow.from, "from"), (&flow.to, "to")] {
            if !step_map.contains_key(end.as_str()) {
                errors.push(ValidationError::new(
                    "V2",
                    format!(
                        "Flow {} '{}' references unknown step '{}' in scope {}",
                        flow.resolved_id(),
                        label,
                        end,
                        scope_id
                    ),
                ));
            }
        }
    }

    // V3: boundary events attach to an activity of this scope
    for step in steps {
        if let StepKindDocument::BoundaryEvent { attached_to, .. } = &step.kind {
            match step_map.get(attached_to.as_str()) {
                Some(host) if host.kind.is_activity() => {}
                Some(host) => errors.push(ValidationError::new(
                    "V3",
                    format!(
                        "Boundary event {} is attached to {} ({}), which is not an activity",
                        step.id,
                        attached_to,
                        host.kind.label()
                    ),
                )),
                None => errors.push(ValidationError::new(
                    "V3",
                    format!(
                        "Boundary event {} is attached to unknown step {}",
                        step.id, attached_to
                    ),
                )),
            }
        }
    }

    // V4: default flows only leave exclusive/inclusive gateways, one per gateway
    let mut defaults: HashMap<&str, usize> = HashMap::new();
    for flow in flows.iter().filter(|f| f.is_default) {
        *defaults.entry(flow.from.as_str()).or_default() += 1;
        if let Some(source) = step_map.get(flow.from.as_str()) {
            if !matches!(
                source.kind,
                StepKindDocument::ExclusiveGateway | StepKindDocument::InclusiveGateway
            ) {
                errors.push(ValidationError::new(
                    "V4",
                    format!(
                        "Flow {} is marked default but leaves {} ({})",
                        flow.resolved_id(),
                        source.id,
                        source.kind.label()
                    ),
                ));
            }
        }
    }
    for (source, count) in defaults {
        if count > 1 {
            errors.push(ValidationError::new(
                "V4",
                format!("Step {source} has {count} default flows"),
            ));
        }
    }

    // V5: every scope can be started
    if !steps
        .iter()
        .any(|s| matches!(s.kind, StepKindDocument::StartEvent))
    {
        errors.push(ValidationError::new(
            "V5",
            format!("Scope {scope_id} has no start event"),
        ));
    }

    for step in steps {
        // V6: call activities reference a known process
        if let StepKindDocument::CallActivity { process_id, .. } = &step.kind {
            if !process_ids.contains(process_id.as_str()) {
                errors.push(ValidationError::new(
                    "V6",
                    format!(
                        "Call activity {} references unknown process {}",
                        step.id, process_id
                    ),
                ));
            }
        }

        validate_event_definitions(step, errors);

        // V8: start events are sources, end events are sinks
        match step.kind {
            StepKindDocument::StartEvent if flows.iter().any(|f| f.to == step.id) => {
                errors.push(ValidationError::new(
                    "V8",
                    format!("Start event {} has incoming flows", step.id),
                ));
            }
            StepKindDocument::EndEvent if flows.iter().any(|f| f.from == step.id) => {
                errors.push(ValidationError::new(
                    "V8",
                    format!("End event {} has outgoing flows", step.id),
                ));
            }
            _ => {}
        }

        if let StepKindDocument::SubProcess { steps, flows } = &step.kind {
            validate_scope(&step.id, steps, flows, process_ids, errors);
        }
    }
}

// V7: event definitions fit the step that carries them
fn validate_event_definitions(step: &StepDocument, errors: &mut Vec<ValidationError>) {
    let catching = matches!(
        step.kind,
        StepKindDocument::StartEvent
            | StepKindDocument::IntermediateCatchEvent
            | StepKindDocument::BoundaryEvent { .. }
    );
    let throwing = matches!(
        step.kind,
        StepKindDocument::EndEvent | StepKindDocument::IntermediateThrowEvent
    );

    if !step.events.is_empty() && !catching && !throwing {
        errors.push(ValidationError::new(
            "V7",
            format!(
                "{} ({}) is not an event and cannot carry event definitions",
                step.id,
                step.kind.label()
            ),
        ));
        return;
    }
    if step.events.is_empty() && matches!(step.kind, StepKindDocument::BoundaryEvent { .. }) {
        errors.push(ValidationError::new(
            "V7",
            format!("Boundary event {} has no event definition", step.id),
        ));
    }

    for definition in &step.events {
        match definition {
            EventDefinition::Terminate if !matches!(step.kind, StepKindDocument::EndEvent) => {
                errors.push(ValidationError::new(
                    "V7",
                    format!("Terminate definition on {}, which is not an end event", step.id),
                ));
            }
            EventDefinition::Timer(_) | EventDefinition::Conditional { .. } if !catching => {
                errors.push(ValidationError::new(
                    "V7",
                    format!(
                        "{} definition on {}, which does not catch",
                        definition.kind_name(),
                        step.id
                    ),
                ));
            }
            EventDefinition::Timer(timer_def) => {
                if let Err(e) = timer::check_definition(timer_def) {
                    errors.push(ValidationError::new(
                        "V7",
                        format!("Timer on {}: {}", step.id, e),
                    ));
                }
            }
            _ => {}
        }
    }
}
