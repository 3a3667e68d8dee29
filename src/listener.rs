//! Lifecycle notifications.
//!
//! Hosts subscribe to execution lifecycle events to drive task inboxes,
//! audit logs or UIs. Callbacks run synchronously inside the engine
//! operation that produced the event and see the execution as it is at that
//! moment.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::execution::Execution;
use crate::model::SequenceFlow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
    ExecutionStarted,
    ExecutionWaited,
    ExecutionEnded,
    FlowTaken,
    MessageThrown,
    ErrorThrown,
}

impl LifecycleEvent {
    pub const ALL: [LifecycleEvent; 6] = [
        LifecycleEvent::ExecutionStarted,
        LifecycleEvent::ExecutionWaited,
        LifecycleEvent::ExecutionEnded,
        LifecycleEvent::FlowTaken,
        LifecycleEvent::MessageThrown,
        LifecycleEvent::ErrorThrown,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::ExecutionStarted => "executionStarted",
            Self::ExecutionWaited => "executionWaited",
            Self::ExecutionEnded => "executionEnded",
            Self::FlowTaken => "flowTaken",
            Self::MessageThrown => "messageThrown",
            Self::ErrorThrown => "errorThrown",
        }
    }
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What a listener receives.
#[derive(Debug, Clone, Copy)]
pub struct ListenerEvent<'a> {
    pub kind: LifecycleEvent,
    pub execution: &'a Execution,
    /// Set for `flowTaken`.
    pub sequence_flow: Option<&'a SequenceFlow>,
    /// Message or error name for `messageThrown` / `errorThrown`.
    pub name: Option<&'a str>,
}

pub type Listener = Arc<dyn Fn(&ListenerEvent<'_>) + Send + Sync>;

#[derive(Clone, Default)]
pub struct ListenerRegistry {
    by_event: HashMap<LifecycleEvent, Vec<Listener>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<F>(&mut self, kind: LifecycleEvent, listener: F)
    where
        F: Fn(&ListenerEvent<'_>) + Send + Sync + 'static,
    {
        self.by_event.entry(kind).or_default().push(Arc::new(listener));
    }

    /// Subscribe one callback to every lifecycle event.
    pub fn on_all<F>(&mut self, listener: F)
    where
        F: Fn(&ListenerEvent<'_>) + Send + Sync + 'static,
    {
        let shared: Listener = Arc::new(listener);
        for kind in LifecycleEvent::ALL {
            self.by_event.entry(kind).or_default().push(shared.clone());
        }
    }

    pub fn count(&self, kind: LifecycleEvent) -> usize {
        self.by_event.get(&kind).map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.by_event.values().all(Vec::is_empty)
    }

    pub(crate) fn emit(&self, event: &ListenerEvent<'_>) {
        if let Some(listeners) = self.by_event.get(&event.kind) {
            for listener in listeners {
                listener(event);
            }
        }
    }
}

impl fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for kind in LifecycleEvent::ALL {
            map.entry(&kind.name(), &self.count(kind));
        }
        map.finish()
    }
}
