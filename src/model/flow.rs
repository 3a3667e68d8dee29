/// A directed edge between two steps of the same scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceFlow {
    pub id: String,
    pub name: Option<String>,
    pub source: String,
    pub target: String,
    /// Guard expression; a flow without one is always satisfied.
    pub condition: Option<String>,
    /// Taken by exclusive/inclusive gateways when no condition holds.
    pub is_default: bool,
}

impl SequenceFlow {
    pub fn new(id: impl Into<String>, source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            source: source.into(),
            target: target.into(),
            condition: None,
            is_default: false,
        }
    }
}
