//! Per-collection run state machine.
//!
//! ```text
//! Idle → LeaseRequested → Skipped
//!                       → Fetching → Persisting → Fetching ... → Done
//!                                                              → Failed
//!                                                              → Cancelled
//! Done | Failed | Cancelled → LeaseReleased
//! ```
//!
//! `Skipped` and `LeaseReleased` are terminal.

use std::fmt;

use crate::error::{Result, SyncError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollectionState {
    Idle,
    LeaseRequested,
    /// Another worker holds a live lease.
    Skipped,
    Fetching,
    Persisting,
    Done,
    Failed,
    /// Shutdown was requested between pages.
    Cancelled,
    LeaseReleased,
}

impl CollectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CollectionState::Idle => "idle",
            CollectionState::LeaseRequested => "lease_requested",
            CollectionState::Skipped => "skipped",
            CollectionState::Fetching => "fetching",
            CollectionState::Persisting => "persisting",
            CollectionState::Done => "done",
            CollectionState::Failed => "failed",
            CollectionState::Cancelled => "cancelled",
            CollectionState::LeaseReleased => "lease_released",
        }
    }

    /// No further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CollectionState::Skipped | CollectionState::LeaseReleased
        )
    }

    /// The lease is held and must still be released.
    pub fn holds_lease(&self) -> bool {
        matches!(
            self,
            CollectionState::Fetching
                | CollectionState::Persisting
                | CollectionState::Done
                | CollectionState::Failed
                | CollectionState::Cancelled
        )
    }
}

impl fmt::Display for CollectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracks one collection's progress through a cycle.
#[derive(Debug, Clone)]
pub struct CollectionRun {
    pub collection: String,
    pub state: CollectionState,
    pub pages: u64,
}

impl CollectionRun {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            state: CollectionState::Idle,
            pages: 0,
        }
    }

    /// Move to `to`, rejecting transitions the machine does not allow.
    pub fn transition(&mut self, to: CollectionState) -> Result<()> {
        self.validate_transition(to)?;
        self.state = to;
        Ok(())
    }

    fn validate_transition(&self, to: CollectionState) -> Result<()> {
        use CollectionState::*;

        let valid = match (self.state, to) {
            (Idle, LeaseRequested) => true,

            (LeaseRequested, Skipped) => true,
            (LeaseRequested, Fetching) => true,
            // Lease lookup itself failed
            (LeaseRequested, Failed) => true,

            (Fetching, Persisting) => true,
            (Fetching, Failed) => true,
            (Fetching, Cancelled) => true,

            (Persisting, Fetching) => true,
            (Persisting, Done) => true,
            (Persisting, Failed) => true,
            (Persisting, Cancelled) => true,

            (Done, LeaseReleased) => true,
            (Failed, LeaseReleased) => true,
            (Cancelled, LeaseReleased) => true,

            _ => false,
        };

        if !valid {
            return Err(SyncError::InvalidStateTransition {
                from: self.state.as_str().to_string(),
                to: to.as_str().to_string(),
                reason: format!(
                    "Cannot transition collection {} from {} to {}",
                    self.collection,
                    self.state.as_str(),
                    to.as_str()
                ),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use CollectionState::*;

    #[test]
    fn test_full_two_page_path() {
        let mut run = CollectionRun::new("WidgetCollection");
        for state in [
            LeaseRequested,
            Fetching,
            Persisting,
            Fetching,
            Persisting,
            Done,
            LeaseReleased,
        ] {
            run.transition(state).unwrap();
        }
        assert!(run.state.is_terminal());
    }

    #[test]
    fn test_skipped_is_terminal() {
        let mut run = CollectionRun::new("WidgetCollection");
        run.transition(LeaseRequested).unwrap();
        run.transition(Skipped).unwrap();

        assert!(run.state.is_terminal());
        assert!(!run.state.holds_lease());
        assert!(run.transition(Fetching).is_err());
    }

    #[test]
    fn test_failed_must_release() {
        let mut run = CollectionRun::new("WidgetCollection");
        run.transition(LeaseRequested).unwrap();
        run.transition(Fetching).unwrap();
        run.transition(Failed).unwrap();

        assert!(run.state.holds_lease());
        assert!(run.transition(Fetching).is_err());
        run.transition(LeaseReleased).unwrap();
    }

    #[test]
    fn test_invalid_transition_error() {
        let mut run = CollectionRun::new("WidgetCollection");
        let err = run.transition(Persisting).unwrap_err();

        match err {
            SyncError::InvalidStateTransition { from, to, .. } => {
                assert_eq!(from, "idle");
                assert_eq!(to, "persisting");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(run.state, Idle);
    }
}
