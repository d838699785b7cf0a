//! The instance state machine.
//!
//! Transitions are a pure function `(current, event) -> next`; anything
//! not in the table is a failed precondition the API surfaces as a 400.

use stratus_core::{Result, StratusError};
use stratus_db::model::InstanceState;

/// Events that move an instance between states. `Container*` events are
/// driver acknowledgements; the rest are API calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceEvent {
    /// API start on a stopped instance.
    Start,
    /// Driver reports the container is up.
    ContainerRunning,
    /// API stop.
    Stop,
    /// Driver reports the container has stopped.
    ContainerStopped,
    /// API delete; legal from any state.
    Delete,
}

/// Apply one event. Returns the next state or `FailedPrecondition`.
pub fn transition(current: InstanceState, event: InstanceEvent) -> Result<InstanceState> {
    use InstanceEvent::*;
    use InstanceState::*;

    let next = match (current, event) {
        (_, Delete) => Deleted,
        (Provisioning, ContainerRunning) => Running,
        (Running, Stop) => Stopping,
        (Stopping, ContainerStopped) => Terminated,
        (Terminated, Start) => Provisioning,
        (state, event) => {
            return Err(StratusError::failed_precondition(format!(
                "instance is {}; {event:?} is not valid in that state",
                state.as_str()
            )));
        }
    };
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use InstanceEvent::*;
    use InstanceState::*;

    #[test]
    fn happy_path_walks_the_diagram() {
        assert_eq!(transition(Provisioning, ContainerRunning).unwrap(), Running);
        assert_eq!(transition(Running, Stop).unwrap(), Stopping);
        assert_eq!(transition(Stopping, ContainerStopped).unwrap(), Terminated);
        assert_eq!(transition(Terminated, Start).unwrap(), Provisioning);
    }

    #[test]
    fn delete_is_legal_from_every_state() {
        for state in [Provisioning, Running, Stopping, Terminated] {
            assert_eq!(transition(state, Delete).unwrap(), Deleted);
        }
    }

    #[test]
    fn invalid_transitions_are_failed_preconditions() {
        for (state, event) in [
            (Running, Start),
            (Provisioning, Stop),
            (Terminated, Stop),
            (Stopping, Start),
            (Running, ContainerStopped),
        ] {
            let err = transition(state, event).unwrap_err();
            assert_eq!(err.kind(), stratus_core::ErrorKind::FailedPrecondition, "{state:?} {event:?}");
        }
    }
}
