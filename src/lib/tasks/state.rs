use super::types::State;

// Indexed by `State as usize`; order must follow the enum declaration.
const SUCCESSORS: [&[State]; 5] = [
    // Pending
    &[State::Scheduled],
    // Scheduled
    &[State::Scheduled, State::Running, State::Failed],
    // Running
    &[State::Running, State::Completed, State::Failed],
    // Completed
    &[],
    // Failed
    &[],
];

pub fn successors(state: State) -> &'static [State] {
    SUCCESSORS[state as usize]
}

pub fn valid_state_transition(src: State, dst: State) -> bool {
    successors(src).contains(&dst)
}
