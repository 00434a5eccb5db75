//! Unit tests for the agent status state machine.

use agent_switchboard::spawner::AgentStatus;

const ALL: [AgentStatus; 4] = [
    AgentStatus::Idle,
    AgentStatus::Working,
    AgentStatus::Completed,
    AgentStatus::Failed,
];

#[test]
fn allowed_transitions() {
    assert!(AgentStatus::Idle.can_transition_to(AgentStatus::Working));
    assert!(AgentStatus::Idle.can_transition_to(AgentStatus::Failed));
    assert!(AgentStatus::Working.can_transition_to(AgentStatus::Completed));
    assert!(AgentStatus::Working.can_transition_to(AgentStatus::Failed));
}

#[test]
fn idle_cannot_complete_without_working() {
    assert!(!AgentStatus::Idle.can_transition_to(AgentStatus::Completed));
}

#[test]
fn working_cannot_return_to_idle() {
    assert!(!AgentStatus::Working.can_transition_to(AgentStatus::Idle));
}

#[test]
fn terminal_states_are_final() {
    for terminal in [AgentStatus::Completed, AgentStatus::Failed] {
        assert!(terminal.is_terminal());
        for next in ALL {
            assert!(
                !terminal.can_transition_to(next),
                "{terminal:?} -> {next:?} must be rejected"
            );
        }
    }
}

#[test]
fn self_transitions_are_rejected() {
    for status in ALL {
        assert!(!status.can_transition_to(status), "{status:?} -> itself");
    }
}

#[test]
fn status_serializes_snake_case() {
    assert_eq!(
        serde_json::to_string(&AgentStatus::Completed).unwrap(),
        "\"completed\""
    );
}
