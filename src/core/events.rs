use crate::domain::model::Record;
use crate::utils::error::{EtlError, Result};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Import,
    Export,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Import => "import",
            Direction::Export => "export",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Before,
    Row,
    Error,
    Progress,
    After,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Before => "before",
            Stage::Row => "row",
            Stage::Error => "error",
            Stage::Progress => "progress",
            Stage::After => "after",
        }
    }
}

/// `{direction}.{stage}`, e.g. `import.row`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventName {
    pub direction: Direction,
    pub stage: Stage,
}

impl EventName {
    pub const fn new(direction: Direction, stage: Stage) -> Self {
        Self { direction, stage }
    }

    pub const fn import(stage: Stage) -> Self {
        Self::new(Direction::Import, stage)
    }

    pub const fn export(stage: Stage) -> Self {
        Self::new(Direction::Export, stage)
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.direction.as_str(), self.stage.as_str())
    }
}

impl std::str::FromStr for EventName {
    type Err = EtlError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || EtlError::ConfigError {
            message: format!("Unknown event name '{}'", s),
        };
        let (direction, stage) = s.split_once('.').ok_or_else(invalid)?;
        let direction = match direction {
            "import" => Direction::Import,
            "export" => Direction::Export,
            _ => return Err(invalid()),
        };
        let stage = match stage {
            "before" => Stage::Before,
            "row" => Stage::Row,
            "error" => Stage::Error,
            "progress" => Stage::Progress,
            "after" => Stage::After,
            _ => return Err(invalid()),
        };
        Ok(Self { direction, stage })
    }
}

#[derive(Debug, Clone, Copy)]
pub enum EventPayload<'a> {
    Before {
        type_tag: &'a str,
        location: &'a str,
    },
    Row {
        unit: u64,
        record: &'a Record,
    },
    /// `unit`/`record` are absent for faults that are not tied to one unit.
    Error {
        unit: Option<u64>,
        record: Option<&'a Record>,
        error: &'a EtlError,
    },
    Progress {
        count: u64,
        total: u64,
        percent: f64,
    },
    After {
        processed: u64,
        failed: u64,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct PipelineEvent<'a> {
    pub name: EventName,
    pub payload: EventPayload<'a>,
}

pub type Handler = Arc<dyn Fn(&PipelineEvent<'_>) -> Result<()> + Send + Sync>;

/// Synchronous publish/subscribe over pipeline lifecycle events.
#[derive(Default)]
pub struct EventBus {
    handlers: RwLock<HashMap<EventName, Vec<Handler>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, name: EventName, handler: F)
    where
        F: Fn(&PipelineEvent<'_>) -> Result<()> + Send + Sync + 'static,
    {
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        handlers.entry(name).or_default().push(Arc::new(handler));
    }

    /// Calls the handlers for `event.name` in subscription order. The first
    /// handler error stops delivery and is returned.
    pub fn publish(&self, event: &PipelineEvent<'_>) -> Result<()> {
        // Snapshot so handlers may subscribe without deadlocking.
        let snapshot: Vec<Handler> = {
            let handlers = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
            match handlers.get(&event.name) {
                Some(list) => list.clone(),
                None => return Ok(()),
            }
        };
        for handler in snapshot {
            handler(event)?;
        }
        Ok(())
    }

    pub fn emit(&self, name: EventName, payload: EventPayload<'_>) -> Result<()> {
        self.publish(&PipelineEvent { name, payload })
    }

    pub fn handler_count(&self, name: EventName) -> usize {
        let handlers = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
        handlers.get(&name).map(Vec::len).unwrap_or(0)
    }
}
