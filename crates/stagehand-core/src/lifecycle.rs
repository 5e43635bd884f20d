use crate::CoreError;
use stagehand_store::StageState;

/// `Created -> Required (0..n) -> Applied`. `Applied` is terminal until the
/// stage is destroyed; destroy itself is valid from every state.
pub fn validate_transition(from: StageState, to: StageState) -> Result<(), CoreError> {
    let valid = matches!(
        (from, to),
        (
            StageState::Created | StageState::Required,
            StageState::Required | StageState::Applied
        )
    );

    if valid {
        Ok(())
    } else {
        Err(CoreError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}
