//! # Engine Error Kinds
//!
//! Most of the crate reports failures through `eyre::Report` with contextual
//! messages. The variants below exist for the handful of places that must
//! *dispatch* on what went wrong rather than merely report it:
//!
//! - the version manager stores a sticky per-transaction error and replays it
//!   on every later call for that XID;
//! - `delete` turns a detected deadlock into `ConcurrentUpdate` and
//!   auto-aborts the transaction;
//! - the session executor distinguishes statement-level errors (sent back as
//!   a flag-1 packet, connection stays open) from fatal ones.
//!
//! Every variant is cheap to clone so a kind can be parked inside a
//! transaction and surfaced again later.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("xid file is corrupted")]
    BadXidFile,
    #[error("log file is corrupted")]
    BadLogFile,
    #[error("memory budget too small")]
    InvalidMem,
    #[error("cache is full")]
    CacheFull,
    #[error("data too large")]
    DataTooLarge,
    #[error("database is busy")]
    DatabaseBusy,
    #[error("deadlock detected")]
    Deadlock,
    #[error("concurrent update issue")]
    ConcurrentUpdate,
    #[error("transaction not found")]
    NoTransaction,
    #[error("nested transaction not supported")]
    NestedTransaction,
    #[error("entry is null")]
    NullEntry,
    #[error("invalid command")]
    InvalidCommand,
    #[error("invalid values")]
    InvalidValues,
    #[error("invalid logic operator")]
    InvalidLogOp,
    #[error("invalid field type")]
    InvalidFieldType,
    #[error("duplicated table")]
    DuplicatedTable,
    #[error("table not found")]
    TableNotFound,
    #[error("field not found")]
    FieldNotFound,
    #[error("field not indexed")]
    FieldNotIndexed,
    #[error("table has no index")]
    TableNoIndex,
    #[error("invalid packet data")]
    InvalidPacket,
}

impl EngineError {
    /// True when the report's root cause is this exact kind.
    pub fn is_cause_of(&self, report: &eyre::Report) -> bool {
        matches!(report.downcast_ref::<EngineError>(), Some(e) if e == self)
    }
}

/// Extracts the engine kind from a report, if it carries one.
pub fn kind_of(report: &eyre::Report) -> Option<EngineError> {
    report.downcast_ref::<EngineError>().cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_round_trips_through_report() {
        let report = eyre::Report::new(EngineError::Deadlock);
        assert_eq!(kind_of(&report), Some(EngineError::Deadlock));
        assert!(EngineError::Deadlock.is_cause_of(&report));
        assert!(!EngineError::CacheFull.is_cause_of(&report));
    }

    #[test]
    fn wrapped_kind_still_downcasts() {
        let report =
            eyre::Report::new(EngineError::TableNotFound).wrap_err("while executing select");
        assert_eq!(kind_of(&report), Some(EngineError::TableNotFound));
    }

    #[test]
    fn plain_report_has_no_kind() {
        let report = eyre::eyre!("plain io failure");
        assert_eq!(kind_of(&report), None);
    }
}
