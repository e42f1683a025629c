use std::fmt;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Active,
    Draining,
    Finalized,
    Aborted,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Created => "created",
            SessionState::Active => "active",
            SessionState::Draining => "draining",
            SessionState::Finalized => "finalized",
            SessionState::Aborted => "aborted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Finalized | SessionState::Aborted)
    }

    /// Forward steps follow the run in order; any live state may abort.
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;
        match (*self, next) {
            (Created, Active) | (Active, Draining) | (Draining, Finalized) => true,
            (from, Aborted) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("illegal session transition {from} -> {to}")]
pub struct TransitionError {
    pub from: SessionState,
    pub to: SessionState,
}

/// Current state of one run.
#[derive(Debug)]
pub struct Lifecycle {
    session_id: String,
    state: SessionState,
}

impl Lifecycle {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            state: SessionState::Created,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn advance(&mut self, next: SessionState) -> Result<(), TransitionError> {
        if !self.state.can_transition_to(next) {
            return Err(TransitionError {
                from: self.state,
                to: next,
            });
        }
        debug!(session_id = %self.session_id, from = %self.state, to = %next, "Session state change");
        self.state = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SessionState::*;

    #[test]
    fn test_happy_path() {
        let mut lifecycle = Lifecycle::new("s1");
        for next in [Active, Draining, Finalized] {
            lifecycle.advance(next).unwrap();
        }
        assert_eq!(lifecycle.state(), Finalized);
        assert!(lifecycle.state().is_terminal());
    }

    #[test]
    fn test_abort_from_any_live_state() {
        for path in [vec![], vec![Active], vec![Active, Draining]] {
            let mut lifecycle = Lifecycle::new("s1");
            for next in path {
                lifecycle.advance(next).unwrap();
            }
            lifecycle.advance(Aborted).unwrap();
            assert_eq!(lifecycle.state(), Aborted);
        }
    }

    #[test]
    fn test_illegal_transitions_rejected() {
        let mut lifecycle = Lifecycle::new("s1");
        let err = lifecycle.advance(Draining).unwrap_err();
        assert_eq!(err, TransitionError { from: Created, to: Draining });
        assert_eq!(err.to_string(), "illegal session transition created -> draining");
        assert_eq!(lifecycle.state(), Created);

        lifecycle.advance(Active).unwrap();
        lifecycle.advance(Draining).unwrap();
        lifecycle.advance(Finalized).unwrap();
        assert!(lifecycle.advance(Aborted).is_err());
        assert!(lifecycle.advance(Active).is_err());
    }
}
