//! The unit-of-work status graph.
//!
//! Exactly one function matters here: [`check_transition`]. Every mutation
//! path in the engine calls it before touching a row, under the row lock,
//! so an illegal edge can never be persisted. Terminal statuses
//! (`COMPLETED`, `FAILED`) have no outgoing edges at all.
//!
//! The graph:
//!
//! ```text
//! PENDING        -> ACTIVE                 lease grant
//! PENDING        -> ZOMBIED_SOFT           ambiguity lock
//! ACTIVE         -> PENDING                routed onward / injection
//! ACTIVE         -> COMPLETED              submit through the terminal gate
//! ACTIVE         -> FAILED                 report_failure
//! ACTIVE         -> ZOMBIED_SOFT           soft timeout
//! ACTIVE         -> ZOMBIED_DEAD           hard timeout
//! ACTIVE         -> PAUSED                 kill-switch
//! ACTIVE         -> PENDING_PILOT_APPROVAL Park & Notify
//! PAUSED         -> ACTIVE                 waiver
//! PENDING_PILOT_APPROVAL -> ACTIVE         pilot resume
//! PENDING_PILOT_APPROVAL -> FAILED         pilot cancel
//! ZOMBIED_SOFT   -> ACTIVE                 pilot clarification
//! ZOMBIED_SOFT   -> ZOMBIED_DEAD           hard timeout while stalled
//! ZOMBIED_DEAD   -> PENDING                sweeper reclamation
//! ZOMBIED_DEAD   -> FAILED                 reclamation policy gives up
//! ```

use miette::Diagnostic;
use thiserror::Error;

use crate::types::UowStatus;

/// Raised when a caller asks for an edge the graph does not have. The row
/// is left untouched.
#[derive(Debug, Clone, Error, Diagnostic, PartialEq, Eq)]
#[error("illegal transition {from} -> {to}")]
#[diagnostic(
    code(gatewright::state::illegal_transition),
    help("Check the unit of work's current status before intervening; terminal statuses never move.")
)]
pub struct IllegalTransition {
    pub from: UowStatus,
    pub to: UowStatus,
}

/// Whether the graph has an edge `from -> to`.
#[must_use]
pub fn is_legal(from: UowStatus, to: UowStatus) -> bool {
    use UowStatus::*;
    matches!(
        (from, to),
        (Pending, Active)
            | (Pending, ZombiedSoft)
            | (Active, Pending)
            | (Active, Completed)
            | (Active, Failed)
            | (Active, ZombiedSoft)
            | (Active, ZombiedDead)
            | (Active, Paused)
            | (Active, PendingPilotApproval)
            | (Paused, Active)
            | (PendingPilotApproval, Active)
            | (PendingPilotApproval, Failed)
            | (ZombiedSoft, Active)
            | (ZombiedSoft, ZombiedDead)
            | (ZombiedDead, Pending)
            | (ZombiedDead, Failed)
    )
}

/// Validate an edge, returning the error the engine surfaces to callers.
pub fn check_transition(from: UowStatus, to: UowStatus) -> Result<(), IllegalTransition> {
    if is_legal(from, to) {
        Ok(())
    } else {
        Err(IllegalTransition { from, to })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use UowStatus::*;

    #[test]
    fn terminal_statuses_have_no_exits() {
        for to in UowStatus::ALL {
            assert!(!is_legal(Completed, to), "Completed -> {to}");
            assert!(!is_legal(Failed, to), "Failed -> {to}");
        }
    }

    #[test]
    fn lease_and_routing_edges() {
        assert!(is_legal(Pending, Active));
        assert!(is_legal(Active, Pending));
        assert!(is_legal(Active, Completed));
        assert!(is_legal(Active, PendingPilotApproval));
    }

    #[test]
    fn pilot_edges_match_preconditions() {
        assert!(is_legal(PendingPilotApproval, Active));
        assert!(is_legal(PendingPilotApproval, Failed));
        assert!(is_legal(Paused, Active));
        assert!(is_legal(ZombiedSoft, Active));
        assert!(!is_legal(Pending, Paused));
        assert!(!is_legal(ZombiedSoft, Pending));
    }

    #[test]
    fn zombie_path() {
        assert!(is_legal(Active, ZombiedSoft));
        assert!(is_legal(ZombiedSoft, ZombiedDead));
        assert!(is_legal(ZombiedDead, Pending));
        assert!(check_transition(ZombiedDead, Active).is_err());
    }
}
