//! Lifecycle of one processing run.

use serde::{Deserialize, Serialize};
use std::fmt;

/// State of a single merge → partition → archive run.
///
/// Runs move strictly forward through
/// `Received → Merging → Partitioning → Archiving → Done`.
/// `Failed` is reachable from any non-terminal state and is absorbing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Received,
    Merging,
    Partitioning,
    Archiving,
    Done,
    Failed,
}

impl PipelineState {
    /// The state that follows this one on success, if any.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Received => Some(Self::Merging),
            Self::Merging => Some(Self::Partitioning),
            Self::Partitioning => Some(Self::Archiving),
            Self::Archiving => Some(Self::Done),
            Self::Done | Self::Failed => None,
        }
    }

    /// Whether no further transitions are possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Check whether moving to `to` is legal.
    pub fn can_transition(self, to: Self) -> bool {
        if to == Self::Failed {
            return !self.is_terminal();
        }
        self.next() == Some(to)
    }

    /// Move to `to`, rejecting illegal transitions.
    pub fn transition(&mut self, to: Self) -> crate::Result<()> {
        if !self.can_transition(to) {
            return Err(crate::Error::InvalidTransition { from: *self, to });
        }
        *self = to;
        Ok(())
    }

    /// Move to the next state on the success path.
    pub fn advance(&mut self) -> crate::Result<Self> {
        let to = self.next().ok_or(crate::Error::InvalidTransition {
            from: *self,
            to: *self,
        })?;
        *self = to;
        Ok(to)
    }

    /// Collapse into `Failed`. A no-op for runs that already terminated.
    pub fn fail(&mut self) {
        if !self.is_terminal() {
            *self = Self::Failed;
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Merging => "merging",
            Self::Partitioning => "partitioning",
            Self::Archiving => "archiving",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
