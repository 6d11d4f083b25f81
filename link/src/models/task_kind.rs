use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::LinkError;

/// The transforms an isolated worker can be asked to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    Aggregate,
    Filter,
    Sort,
    Transform,
    Analyze,
}

impl TaskKind {
    pub const ALL: [TaskKind; 5] = [
        TaskKind::Aggregate,
        TaskKind::Filter,
        TaskKind::Sort,
        TaskKind::Transform,
        TaskKind::Analyze,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Aggregate => "aggregate",
            Self::Filter => "filter",
            Self::Sort => "sort",
            Self::Transform => "transform",
            Self::Analyze => "analyze",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskKind {
    type Err = LinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| LinkError::ConfigurationError(format!("Unknown task type: {}", s)))
    }
}
