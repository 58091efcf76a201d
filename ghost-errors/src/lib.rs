//! Error types for the ghost-applier crate, grounded on the
//! `thiserror`-derived error enums used throughout this kind of codebase
//! (e.g. `psql-srv`'s `DecodeError`/`EncodeError`).

use thiserror::Error;

/// The crate's error taxonomy, plus the two low-level error sources
/// (`mysql_async`, I/O) every variant above them can bubble up through.
#[derive(Debug, Error)]
pub enum ApplierError {
    /// Connection reset, deadlock, or a lock-wait timeout hit on a
    /// non-critical path. The caller decides whether and how to retry, up
    /// to `MigrationConfig::max_retries`.
    #[error("transient query error: {0}")]
    TransientQuery(String),

    /// The ghost, old, or changelog table already exists and
    /// `--initially-drop` was not requested.
    #[error("preexisting table: {0}")]
    PreexistingTable(String),

    /// An unknown DML kind was seen, or a column ordinal could not be
    /// resolved against the table's schema.
    #[error("DML translation error: {0}")]
    Translator(String),

    /// `GET_LOCK` returned anything other than 1.
    #[error("advisory lock unavailable: {0}")]
    LockUnavailable(String),

    /// `lock_wait_timeout` elapsed while holding or waiting on the cut-over
    /// table lock.
    #[error("cut-over lock timeout: {0}")]
    CutOverLockTimeout(String),

    /// A configuration precondition failed before any DDL was issued
    /// (table name too long, no usable unique key, etc).
    #[error("fatal configuration error: {0}")]
    FatalConfig(String),

    /// An error during `DropAll` teardown. Logged by the caller, never
    /// propagated further.
    #[error("teardown error: {0}")]
    Teardown(String),

    /// A condition that should be structurally impossible given the
    /// invariants documented alongside the offending call site.
    #[error("internal error: {0}")]
    Internal(String),

    #[error("mysql error: {0}")]
    Mysql(#[from] mysql_async::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ApplierError {
    /// Sentinel error injected into a rendezvous channel on exit so a
    /// waiting peer never deadlocks. See the cut-over coordinator's
    /// "inject-to-release" discipline.
    pub fn released_without_result() -> Self {
        ApplierError::Internal(
            "rendezvous channel closed without a result; injected to release blocked reader"
                .to_string(),
        )
    }
}

pub type ApplierResult<T> = std::result::Result<T, ApplierError>;

/// Build an [`ApplierError::Internal`] as a `Result`, for use with `?` at
/// the call site (mirrors `readyset_errors::internal!`).
#[macro_export]
macro_rules! internal {
    ($($arg:tt)*) => {
        ::std::result::Result::Err($crate::ApplierError::Internal(::std::format!($($arg)*)))
    };
}

/// Build an [`ApplierError::FatalConfig`] as a `Result`.
#[macro_export]
macro_rules! fatal_config {
    ($($arg:tt)*) => {
        ::std::result::Result::Err($crate::ApplierError::FatalConfig(::std::format!($($arg)*)))
    };
}

/// Build an [`ApplierError::Translator`] as a `Result`.
#[macro_export]
macro_rules! translator_err {
    ($($arg:tt)*) => {
        ::std::result::Result::Err($crate::ApplierError::Translator(::std::format!($($arg)*)))
    };
}

/// Build an [`ApplierError::TransientQuery`] as a `Result`.
#[macro_export]
macro_rules! transient {
    ($($arg:tt)*) => {
        ::std::result::Result::Err($crate::ApplierError::TransientQuery(::std::format!($($arg)*)))
    };
}
