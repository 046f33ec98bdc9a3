//! Round-trip controller states

use serde::{Deserialize, Serialize};

/// State of the round-trip controller within a single `run`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoundState {
    /// Request sent (or about to be sent), waiting for the model
    AwaitingModel,

    /// Model produced its final answer
    ModelRespondedFinal,

    /// Model asked for a tool call
    ModelRespondedTool,

    /// Tool is being executed through the registry
    DispatchingTool,
}

impl RoundState {
    /// Whether moving from `self` to `next` is a legal transition
    pub fn can_transition_to(&self, next: RoundState) -> bool {
        use RoundState::*;
        matches!(
            (self, next),
            (AwaitingModel, ModelRespondedFinal)
                | (AwaitingModel, ModelRespondedTool)
                | (ModelRespondedTool, DispatchingTool)
                | (DispatchingTool, AwaitingModel)
        )
    }
}

impl Default for RoundState {
    fn default() -> Self {
        RoundState::AwaitingModel
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let state = RoundState::default();
        assert_eq!(state, RoundState::AwaitingModel);
    }

    #[test]
    fn test_transitions() {
        assert!(RoundState::AwaitingModel.can_transition_to(RoundState::ModelRespondedTool));
        assert!(RoundState::ModelRespondedTool.can_transition_to(RoundState::DispatchingTool));
        assert!(RoundState::DispatchingTool.can_transition_to(RoundState::AwaitingModel));
        assert!(!RoundState::ModelRespondedFinal.can_transition_to(RoundState::AwaitingModel));
        assert!(!RoundState::AwaitingModel.can_transition_to(RoundState::DispatchingTool));
    }
}
