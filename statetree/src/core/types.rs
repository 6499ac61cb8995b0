//! Shared deterministic types for the execution core.
//!
//! These types define stable contracts between the layout, arena, graph and
//! execution modules. They carry no I/O and no interior mutability.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Status of a run, a state, or a single task tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Failed,
    Succeeded,
    Running,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, RunStatus::Running)
    }

    pub fn label(self) -> &'static str {
        match self {
            RunStatus::Failed => "failed",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Running => "running",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// The owning-object context an instance runs on behalf of.
///
/// Heap instance objects are re-parented to the owner when duplicated.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Owner {
    pub name: String,
}

impl Owner {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Index of a state in the compiled state array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StateHandle(pub u16);

impl StateHandle {
    pub const INVALID: StateHandle = StateHandle(u16::MAX);
    pub const ROOT: StateHandle = StateHandle(0);

    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }

    pub fn index(self) -> usize {
        usize::from(self.0)
    }
}

impl Default for StateHandle {
    fn default() -> Self {
        Self::INVALID
    }
}

impl fmt::Display for StateHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "#{}", self.0)
        } else {
            f.write_str("#invalid")
        }
    }
}

/// Half-open `[begin, end)` range into one of the graph's flat arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct IndexRange {
    pub begin: u16,
    pub end: u16,
}

impl IndexRange {
    pub const EMPTY: IndexRange = IndexRange { begin: 0, end: 0 };

    pub fn new(begin: u16, end: u16) -> Self {
        debug_assert!(begin <= end);
        Self { begin, end }
    }

    pub fn len(self) -> usize {
        usize::from(self.end.saturating_sub(self.begin))
    }

    pub fn is_empty(self) -> bool {
        self.end <= self.begin
    }

    pub fn contains(self, index: u16) -> bool {
        index >= self.begin && index < self.end
    }

    pub fn iter(self) -> impl DoubleEndedIterator<Item = u16> {
        self.begin..self.end
    }

    pub fn as_usize(self) -> std::ops::Range<usize> {
        usize::from(self.begin)..usize::from(self.end)
    }
}

/// What a transition does once its conditions pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    /// Not configured. When fired, masks every ancestor's transitions for this tick.
    NotSet,
    Succeeded,
    Failed,
    GotoState,
    NextState,
    SelectChildState,
}

/// A transition kind plus its resolved target (only meaningful for goto/next).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransitionTarget {
    pub kind: TransitionKind,
    pub state: StateHandle,
}

impl TransitionTarget {
    pub const NOT_SET: TransitionTarget = TransitionTarget {
        kind: TransitionKind::NotSet,
        state: StateHandle::INVALID,
    };

    pub fn new(kind: TransitionKind, state: StateHandle) -> Self {
        Self { kind, state }
    }

    pub fn is_set(self) -> bool {
        self.kind != TransitionKind::NotSet
    }
}

impl Default for TransitionTarget {
    fn default() -> Self {
        Self::NOT_SET
    }
}
