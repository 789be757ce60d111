//! The job state machine.
//!
//! This module lives in `core` (zero internal deps) so the store, the
//! scheduler, and any future tooling consult one transition table.

use crate::job::JobState;

/// Returns the set of states reachable from `from` in a single transition.
///
/// Every terminal state may re-enter `Pending` (retry); `Running` is
/// entered by scheduler admission only and left by the executor only.
pub fn valid_transitions(from: JobState) -> &'static [JobState] {
    match from {
        JobState::Pending => &[JobState::Running, JobState::Canceled],
        JobState::Running => &[JobState::Succeeded, JobState::Failed],
        JobState::Succeeded | JobState::Failed | JobState::Canceled => &[JobState::Pending],
    }
}

/// Check whether a single transition from `from` to `to` is legal.
pub fn can_transition(from: JobState, to: JobState) -> bool {
    valid_transitions(from).contains(&to)
}

/// Validate a transition, returning a descriptive message for illegal ones.
pub fn validate_transition(from: JobState, to: JobState) -> Result<(), String> {
    if can_transition(from, to) {
        Ok(())
    } else {
        Err(format!("Invalid transition: {from} -> {to}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use JobState::*;

    // -----------------------------------------------------------------------
    // Valid transitions
    // -----------------------------------------------------------------------

    #[test]
    fn pending_to_running() {
        assert!(can_transition(Pending, Running));
    }

    #[test]
    fn pending_to_canceled() {
        assert!(can_transition(Pending, Canceled));
    }

    #[test]
    fn running_to_succeeded() {
        assert!(can_transition(Running, Succeeded));
    }

    #[test]
    fn running_to_failed() {
        assert!(can_transition(Running, Failed));
    }

    #[test]
    fn every_terminal_state_can_retry() {
        for terminal in [Succeeded, Failed, Canceled] {
            assert!(can_transition(terminal, Pending), "{terminal} -> PENDING");
        }
    }

    // -----------------------------------------------------------------------
    // Invalid transitions
    // -----------------------------------------------------------------------

    #[test]
    fn running_cannot_be_canceled() {
        assert!(!can_transition(Running, Canceled));
    }

    #[test]
    fn running_cannot_retry() {
        assert!(!can_transition(Running, Pending));
    }

    #[test]
    fn pending_cannot_skip_to_terminal_success() {
        assert!(!can_transition(Pending, Succeeded));
        assert!(!can_transition(Pending, Failed));
    }

    #[test]
    fn terminal_states_cannot_reach_each_other() {
        for from in [Succeeded, Failed, Canceled] {
            for to in [Succeeded, Failed, Canceled] {
                assert!(!can_transition(from, to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn validate_reports_both_states() {
        let msg = validate_transition(Running, Pending).unwrap_err();
        assert!(msg.contains("RUNNING"));
        assert!(msg.contains("PENDING"));
    }
}
