//! The append-only transition ledger.
//!
//! Every accepted status change writes exactly one [`HistoryEntry`] carrying
//! the content hash before and after the transition. Rows are never updated
//! or deleted while the unit of work exists; `seq` is monotonic per UOW and
//! allocated under the same row lock as the status change itself.
//!
//! [`verify_chain`] lets an auditor replay a UOW's ledger: link integrity
//! (each row's `prev_content_hash` equals its predecessor's
//! `new_content_hash`, the first link hangs off the empty seed) and, when
//! the caller supplies it, agreement between the final link and the hash
//! stored on the UOW row.

use chrono::{DateTime, Utc};
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use thiserror::Error;

use crate::hashing::EMPTY_SEED;
use crate::types::{ActorId, UowId, UowStatus};

/// What kind of transition a history row records.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransitionKind {
    /// Initial placement by the materializer or the decomposer.
    Created,
    Checkout,
    Submit,
    /// INJECT decision: payload attached, interaction unchanged.
    Injection,
    Failure,
    AmbiguityLock,
    ParkAndNotify,
    KillSwitch,
    Clarification,
    ConstitutionalWaiver,
    PilotResume,
    PilotCancel,
    ZombieSoft,
    ZombieDead,
    ZombieReclaimed,
    Decomposition,
    ToxicMark,
}

impl TransitionKind {
    #[must_use]
    pub fn encode(self) -> &'static str {
        match self {
            TransitionKind::Created => "CREATED",
            TransitionKind::Checkout => "CHECKOUT",
            TransitionKind::Submit => "SUBMIT",
            TransitionKind::Injection => "INJECTION",
            TransitionKind::Failure => "FAILURE",
            TransitionKind::AmbiguityLock => "AMBIGUITY_LOCK",
            TransitionKind::ParkAndNotify => "PARK_AND_NOTIFY",
            TransitionKind::KillSwitch => "KILL_SWITCH",
            TransitionKind::Clarification => "CLARIFICATION",
            TransitionKind::ConstitutionalWaiver => "CONSTITUTIONAL_WAIVER",
            TransitionKind::PilotResume => "PILOT_RESUME",
            TransitionKind::PilotCancel => "PILOT_CANCEL",
            TransitionKind::ZombieSoft => "ZOMBIE_SOFT",
            TransitionKind::ZombieDead => "ZOMBIE_DEAD",
            TransitionKind::ZombieReclaimed => "ZOMBIE_RECLAIMED",
            TransitionKind::Decomposition => "DECOMPOSITION",
            TransitionKind::ToxicMark => "TOXIC_MARK",
        }
    }

    pub fn decode(s: &str) -> Option<Self> {
        const ALL: [TransitionKind; 17] = [
            TransitionKind::Created,
            TransitionKind::Checkout,
            TransitionKind::Submit,
            TransitionKind::Injection,
            TransitionKind::Failure,
            TransitionKind::AmbiguityLock,
            TransitionKind::ParkAndNotify,
            TransitionKind::KillSwitch,
            TransitionKind::Clarification,
            TransitionKind::ConstitutionalWaiver,
            TransitionKind::PilotResume,
            TransitionKind::PilotCancel,
            TransitionKind::ZombieSoft,
            TransitionKind::ZombieDead,
            TransitionKind::ZombieReclaimed,
            TransitionKind::Decomposition,
            TransitionKind::ToxicMark,
        ];
        ALL.into_iter().find(|k| k.encode() == s)
    }
}

/// One row of the per-UOW ledger.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub uow_id: UowId,
    /// Monotonic per UOW, starting at 1.
    pub seq: u64,
    /// `None` only for the creation row.
    pub from_status: Option<UowStatus>,
    pub to_status: UowStatus,
    pub actor_id: ActorId,
    pub event_type: TransitionKind,
    pub reason: Option<String>,
    pub prev_content_hash: String,
    pub new_content_hash: String,
    pub recorded_at: DateTime<Utc>,
    /// Opaque per-transition context (original Park & Notify target,
    /// matched branch index, child ids, ...).
    pub metadata: Json,
}

/// A history row before `seq`, hashes, and timestamp are assigned by the
/// ledger append (which runs under the UOW row lock).
#[derive(Clone, Debug)]
pub struct TransitionRecord {
    pub from_status: Option<UowStatus>,
    pub to_status: UowStatus,
    pub actor_id: ActorId,
    pub event_type: TransitionKind,
    pub reason: Option<String>,
    pub metadata: Json,
}

impl TransitionRecord {
    pub fn new(
        from_status: Option<UowStatus>,
        to_status: UowStatus,
        actor_id: ActorId,
        event_type: TransitionKind,
    ) -> Self {
        Self {
            from_status,
            to_status,
            actor_id,
            event_type,
            reason: None,
            metadata: Json::Null,
        }
    }

    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: Json) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Violations detected while replaying a ledger.
#[derive(Debug, Error, Diagnostic, PartialEq)]
pub enum ChainViolation {
    #[error("history seq gap at row {index}: expected {expected}, found {found}")]
    #[diagnostic(code(gatewright::history::seq_gap))]
    SeqGap {
        index: usize,
        expected: u64,
        found: u64,
    },

    #[error("broken hash link at seq {seq}: prev hash does not match predecessor")]
    #[diagnostic(
        code(gatewright::history::broken_link),
        help("Rows were reordered, rewritten, or the seed was altered; the ledger is not trustworthy.")
    )]
    BrokenLink { seq: u64 },

    #[error("first row must chain off the empty seed")]
    #[diagnostic(code(gatewright::history::bad_seed))]
    BadSeed,

    #[error("final link {found} does not reproduce the stored content hash {expected}")]
    #[diagnostic(code(gatewright::history::hash_mismatch))]
    HashMismatch { expected: String, found: String },
}

/// Replay a UOW's ledger and check link integrity. If `expected_hash` is
/// given, the final link must reproduce it (property: replaying history
/// from the empty seed yields the UOW's current content hash).
pub fn verify_chain(
    entries: &[HistoryEntry],
    expected_hash: Option<&str>,
) -> Result<(), ChainViolation> {
    let mut prev_new_hash: Option<&str> = None;
    for (index, entry) in entries.iter().enumerate() {
        let expected_seq = index as u64 + 1;
        if entry.seq != expected_seq {
            return Err(ChainViolation::SeqGap {
                index,
                expected: expected_seq,
                found: entry.seq,
            });
        }
        match prev_new_hash {
            None => {
                if entry.prev_content_hash != EMPTY_SEED {
                    return Err(ChainViolation::BadSeed);
                }
            }
            Some(prev) => {
                if entry.prev_content_hash != prev {
                    return Err(ChainViolation::BrokenLink { seq: entry.seq });
                }
            }
        }
        prev_new_hash = Some(&entry.new_content_hash);
    }
    if let (Some(expected), Some(found)) = (expected_hash, prev_new_hash) {
        if expected != found {
            return Err(ChainViolation::HashMismatch {
                expected: expected.to_string(),
                found: found.to_string(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashing::{canonical_attributes, chain_hash};
    use std::collections::BTreeMap;

    fn entry(seq: u64, prev: &str, new: &str) -> HistoryEntry {
        HistoryEntry {
            uow_id: UowId::from("uow-1"),
            seq,
            from_status: None,
            to_status: UowStatus::Pending,
            actor_id: ActorId::system(),
            event_type: TransitionKind::Created,
            reason: None,
            prev_content_hash: prev.to_string(),
            new_content_hash: new.to_string(),
            recorded_at: Utc::now(),
            metadata: Json::Null,
        }
    }

    #[test]
    fn valid_chain_verifies() {
        let canonical = canonical_attributes(&BTreeMap::new());
        let h1 = chain_hash("", &canonical);
        let h2 = chain_hash(&h1, &canonical);
        let rows = vec![entry(1, "", &h1), entry(2, &h1, &h2)];
        assert!(verify_chain(&rows, Some(&h2)).is_ok());
    }

    #[test]
    fn broken_link_detected() {
        let rows = vec![entry(1, "", "aaa"), entry(2, "bbb", "ccc")];
        assert_eq!(
            verify_chain(&rows, None),
            Err(ChainViolation::BrokenLink { seq: 2 })
        );
    }

    #[test]
    fn seq_gap_detected() {
        let rows = vec![entry(1, "", "aaa"), entry(3, "aaa", "bbb")];
        assert!(matches!(
            verify_chain(&rows, None),
            Err(ChainViolation::SeqGap { .. })
        ));
    }

    #[test]
    fn non_empty_seed_rejected() {
        let rows = vec![entry(1, "deadbeef", "aaa")];
        assert_eq!(verify_chain(&rows, None), Err(ChainViolation::BadSeed));
    }

    #[test]
    fn event_type_roundtrip() {
        assert_eq!(
            TransitionKind::decode("CONSTITUTIONAL_WAIVER"),
            Some(TransitionKind::ConstitutionalWaiver)
        );
        assert_eq!(TransitionKind::decode("NOPE"), None);
    }
}
