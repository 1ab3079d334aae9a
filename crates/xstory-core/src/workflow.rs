//! Pure state machine for story workflow.
//!
//! All stage, hold and disposition changes go through [`transition`]. It does
//! no I/O; the store applies the returned state and reacts to the effects.
//!
//! Rules:
//! - A disposed or released node rejects every event.
//! - Clearing a hold advances the stage by exactly one, except at concept,
//!   where leaving the stage needs an explicit approval (`Advance`).
//! - Stages move forward one step at a time; skips and reversals are rejected.

use serde::{Deserialize, Serialize};

use crate::types::{Disposition, HoldReason, Stage, WorkflowState};
use crate::{Error, Result};

/// Events that trigger workflow transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowEvent {
    /// Put the node on hold (replaces any existing hold)
    SetHold(HoldReason),
    /// Lift the hold; advances the stage outside concept
    ClearHold,
    /// Terminal classification
    SetDisposition(Disposition),
    /// Explicit single-step advance (concept approval)
    Advance,
    /// Request a specific stage; only the next stage is accepted
    SetStage(Stage),
}

/// Side effects the store must carry out after applying a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Effect {
    HoldSet(HoldReason),
    HoldCleared(HoldReason),
    StageAdvanced { from: Stage, to: Stage },
    Disposed(Disposition),
}

/// Pure transition function.
///
/// `id` is only used to build error messages.
pub fn transition(
    id: &str,
    state: WorkflowState,
    event: WorkflowEvent,
) -> Result<(WorkflowState, Vec<Effect>)> {
    if let Some(disposition) = state.disposition {
        return Err(Error::invalid_transition(
            id,
            format!("node is disposed ({})", disposition),
        ));
    }
    if state.stage == Stage::Released {
        return Err(Error::invalid_transition(id, "node is released"));
    }

    let mut next = state;
    let mut effects = Vec::new();

    match event {
        WorkflowEvent::SetHold(reason) => {
            next.hold_reason = Some(reason);
            effects.push(Effect::HoldSet(reason));
        }

        WorkflowEvent::ClearHold => {
            let Some(reason) = state.hold_reason else {
                return Err(Error::invalid_transition(id, "node is not on hold"));
            };
            next.hold_reason = None;
            effects.push(Effect::HoldCleared(reason));

            // Concept exit is gated on approval, not on a plain hold clear
            if state.stage != Stage::Concept {
                effects.push(advance(id, &mut next)?);
            }
        }

        WorkflowEvent::SetDisposition(disposition) => {
            next.disposition = Some(disposition);
            effects.push(Effect::Disposed(disposition));
        }

        WorkflowEvent::Advance => {
            if let Some(reason) = state.hold_reason {
                return Err(Error::invalid_transition(
                    id,
                    format!("node is on hold ({})", reason),
                ));
            }
            effects.push(advance(id, &mut next)?);
        }

        WorkflowEvent::SetStage(target) => {
            if target <= state.stage {
                return Err(Error::invalid_transition(
                    id,
                    format!("stage cannot move from {} to {}", state.stage, target),
                ));
            }
            if Some(target) != state.stage.next() {
                return Err(Error::invalid_transition(
                    id,
                    format!("cannot skip from {} to {}", state.stage, target),
                ));
            }
            return transition(id, state, WorkflowEvent::Advance);
        }
    }

    Ok((next, effects))
}

fn advance(id: &str, state: &mut WorkflowState) -> Result<Effect> {
    let from = state.stage;
    let to = from
        .next()
        .ok_or_else(|| Error::invalid_transition(id, "no stage after released"))?;
    state.stage = to;
    Ok(Effect::StageAdvanced { from, to })
}
