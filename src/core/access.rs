use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Import,
    Export,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Import => "import",
            Action::Export => "export",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decides whether an action on a resource type may run. Queried before any
/// adapter work.
pub trait AccessGate: Send + Sync {
    fn allows(&self, action: Action, resource_type: &str) -> bool;
}

impl<F> AccessGate for F
where
    F: Fn(Action, &str) -> bool + Send + Sync,
{
    fn allows(&self, action: Action, resource_type: &str) -> bool {
        self(action, resource_type)
    }
}

/// Allow-list of `(action, type tag)` pairs.
#[derive(Debug, Default, Clone)]
pub struct StaticAccessGate {
    allowed: HashSet<(Action, String)>,
}

impl StaticAccessGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow(mut self, action: Action, resource_type: &str) -> Self {
        self.allowed
            .insert((action, resource_type.to_ascii_lowercase()));
        self
    }
}

impl AccessGate for StaticAccessGate {
    fn allows(&self, action: Action, resource_type: &str) -> bool {
        self.allowed
            .contains(&(action, resource_type.to_ascii_lowercase()))
    }
}
